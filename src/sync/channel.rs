//! Packet framing over a byte stream
//!
//! Every packet is a 4-byte header (3-byte little-endian length, 1-byte sequence) and its
//! payload. A payload of 0xFFFFFF bytes or more is split into chunks; a chunk of exactly
//! 0xFFFFFF bytes means another chunk follows, so a payload that is an exact multiple of
//! 0xFFFFFF ends with an empty chunk.

use std::borrow::Cow;
use std::io::{self, BufReader, Read, Write};

use zerocopy::{FromZeros, IntoBytes};

use crate::constant::MAX_PACKET_CHUNK;
use crate::error::{Error, Result};
use crate::protocol::codec::FieldSource;
use crate::protocol::packet::{PacketHeader, write_packet_header};
use crate::sync::compress::CompressedStream;

/// Payloads up to this size are returned in the channel's scratch buffer by `read_packet(true)`
pub const SCRATCH_BUFFER_SIZE: usize = 1024;

/// Per-command packet sequence number
///
/// Wraps at 256. Mismatches are logged but not enforced since some proxies rewrite them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceCounter {
    next: u8,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.next = 0;
    }

    pub fn peek(&self) -> u8 {
        self.next
    }

    pub fn set(&mut self, next: u8) {
        self.next = next;
    }

    /// Sequence number for the next outgoing packet
    pub fn advance(&mut self) -> u8 {
        let sequence = self.next;
        self.next = sequence.wrapping_add(1);
        sequence
    }

    /// Record an incoming sequence number
    pub fn observe(&mut self, received: u8) {
        if received != self.next {
            tracing::trace!(expected = self.next, received, "packet sequence mismatch");
        }
        self.next = received.wrapping_add(1);
    }
}

/// One reassembled payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet<'a> {
    /// Sequence number of the last chunk
    pub sequence: u8,
    pub payload: Cow<'a, [u8]>,
}

/// `BufReader` that passes writes straight through to the inner stream
#[derive(Debug)]
pub struct BufStream<S> {
    inner: BufReader<S>,
}

impl<S: Read + Write> BufStream<S> {
    pub fn new(stream: S) -> Self {
        Self {
            inner: BufReader::new(stream),
        }
    }

    pub fn get_ref(&self) -> &S {
        self.inner.get_ref()
    }

    /// Bytes read from the stream but not consumed yet
    pub fn buffered(&self) -> usize {
        self.inner.buffer().len()
    }

    pub fn into_inner(self) -> S {
        self.inner.into_inner()
    }
}

impl<S: Read> Read for BufStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.inner.read_exact(buf)
    }
}

impl<S: Write> Write for BufStream<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.get_mut().write(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.inner.get_mut().write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.get_mut().flush()
    }
}

#[derive(Debug)]
enum Transport<S> {
    Plain(BufStream<S>),
    Compressed(CompressedStream<BufStream<S>>),
}

impl<S: Read + Write> Read for Transport<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(s) => s.read(buf),
            Self::Compressed(s) => s.read(buf),
        }
    }
}

impl<S: Read + Write> Write for Transport<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(s) => s.write(buf),
            Self::Compressed(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(s) => s.flush(),
            Self::Compressed(s) => s.flush(),
        }
    }
}

fn unexpected_end() -> Error {
    Error::IoError(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "unexpected end of stream",
    ))
}

/// `read_exact` that reports a closed stream as "unexpected end of stream"
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            unexpected_end()
        } else {
            Error::IoError(e)
        }
    })
}

fn discard<R: Read>(reader: &mut R, len: u64) -> Result<()> {
    let copied = io::copy(&mut reader.take(len), &mut io::sink())?;
    if copied < len {
        return Err(unexpected_end());
    }
    Ok(())
}

/// Blocking packet channel: framing, continuation, sequence numbers and optional compression
#[derive(Debug)]
pub struct PacketChannel<S> {
    transport: Transport<S>,
    sequence: SequenceCounter,
    scratch: Vec<u8>,
    frame: Vec<u8>,
    max_allowed_packet: Option<usize>,
}

impl<S: Read + Write> PacketChannel<S> {
    pub fn new(stream: S) -> Self {
        Self {
            transport: Transport::Plain(BufStream::new(stream)),
            sequence: SequenceCounter::new(),
            scratch: Vec::with_capacity(SCRATCH_BUFFER_SIZE),
            frame: Vec::new(),
            max_allowed_packet: None,
        }
    }

    pub fn get_ref(&self) -> &S {
        match &self.transport {
            Transport::Plain(s) => s.get_ref(),
            Transport::Compressed(s) => s.get_ref().get_ref(),
        }
    }

    /// Give the stream back, e.g. to wrap it in TLS
    ///
    /// Fails if the peer already sent bytes that were buffered but not consumed.
    pub fn into_inner(self) -> Result<S> {
        let stream = match self.transport {
            Transport::Plain(s) => s,
            Transport::Compressed(s) => s.into_inner(),
        };
        if stream.buffered() > 0 {
            return Err(Error::InvalidPacket);
        }
        Ok(stream.into_inner())
    }

    /// Switch to the compressed protocol; every later packet travels inside compressed frames
    pub fn enable_compression(self) -> Self {
        let transport = match self.transport {
            Transport::Plain(s) => Transport::Compressed(CompressedStream::new(s)),
            compressed @ Transport::Compressed(_) => compressed,
        };
        Self { transport, ..self }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self.transport, Transport::Compressed(_))
    }

    pub fn sequence(&self) -> u8 {
        self.sequence.peek()
    }

    pub fn set_sequence(&mut self, next: u8) {
        self.sequence.set(next);
    }

    /// Start of a new command: both the packet and the compressed sequence restart at 0
    pub fn reset_sequence(&mut self) {
        self.sequence.reset();
        if let Transport::Compressed(s) = &mut self.transport {
            s.reset_sequence();
        }
    }

    pub fn max_allowed_packet(&self) -> Option<usize> {
        self.max_allowed_packet
    }

    /// Payloads larger than this are refused by `write_packet` before anything is sent
    pub fn set_max_allowed_packet(&mut self, max: Option<usize>) {
        self.max_allowed_packet = max;
    }

    fn read_header(&mut self) -> Result<(usize, u8)> {
        let mut header = PacketHeader::new_zeroed();
        fill(&mut self.transport, header.as_mut_bytes())?;
        let length = header.length();
        self.sequence.observe(header.sequence_id);
        tracing::trace!(length, sequence = header.sequence_id, "packet header");
        Ok((length, header.sequence_id))
    }

    /// Read one payload into `out` (cleared first), joining continuation chunks
    ///
    /// Returns the sequence number of the last chunk.
    pub fn read_packet_into(&mut self, out: &mut Vec<u8>) -> Result<u8> {
        out.clear();
        loop {
            let (length, sequence) = self.read_header()?;
            let start = out.len();
            out.resize(start + length, 0);
            fill(&mut self.transport, &mut out[start..])?;
            if length < MAX_PACKET_CHUNK {
                return Ok(sequence);
            }
        }
    }

    /// Read one payload
    ///
    /// With `reusable`, payloads up to [`SCRATCH_BUFFER_SIZE`] bytes borrow the channel's
    /// scratch buffer, valid until the next call.
    pub fn read_packet(&mut self, reusable: bool) -> Result<Packet<'_>> {
        if !reusable {
            let mut payload = Vec::new();
            let sequence = self.read_packet_into(&mut payload)?;
            return Ok(Packet {
                sequence,
                payload: Cow::Owned(payload),
            });
        }

        let mut scratch = std::mem::take(&mut self.scratch);
        let sequence = self.read_packet_into(&mut scratch)?;
        if scratch.len() > SCRATCH_BUFFER_SIZE {
            self.scratch = Vec::with_capacity(SCRATCH_BUFFER_SIZE);
            return Ok(Packet {
                sequence,
                payload: Cow::Owned(scratch),
            });
        }
        self.scratch = scratch;
        Ok(Packet {
            sequence,
            payload: Cow::Borrowed(&self.scratch),
        })
    }

    /// Read and drop one payload without buffering it
    pub fn skip_packet(&mut self) -> Result<()> {
        loop {
            let (length, _) = self.read_header()?;
            discard(&mut self.transport, length as u64)?;
            if length < MAX_PACKET_CHUNK {
                return Ok(());
            }
        }
    }

    /// Stream the next payload instead of buffering it
    pub fn begin_payload(&mut self) -> Result<PayloadReader<'_, S>> {
        let (length, _) = self.read_header()?;
        Ok(PayloadReader {
            channel: self,
            chunk_remaining: length,
            more_chunks: length == MAX_PACKET_CHUNK,
            first_chunk_len: length,
            peeked: None,
        })
    }

    /// Frame `payload` with the running sequence number and send it
    pub fn write_packet(&mut self, payload: &[u8]) -> Result<()> {
        self.write_packet_unflushed(payload)?;
        self.transport.flush()?;
        Ok(())
    }

    /// Like [`Self::write_packet`] but leaves the bytes in the transport until [`Self::flush`]
    pub fn write_packet_unflushed(&mut self, payload: &[u8]) -> Result<()> {
        if let Some(max) = self.max_allowed_packet
            && payload.len() > max
        {
            return Err(Error::PacketTooLarge {
                size: payload.len(),
                max,
            });
        }

        for chunk in payload.chunks(MAX_PACKET_CHUNK) {
            self.write_chunk(chunk)?;
        }
        // empty payloads and exact multiples of the chunk size end with an empty chunk
        if payload
            .chunks(MAX_PACKET_CHUNK)
            .last()
            .is_none_or(|last| last.len() == MAX_PACKET_CHUNK)
        {
            self.write_chunk(&[])?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.transport.flush()?;
        Ok(())
    }

    fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        let sequence = self.sequence.advance();
        self.frame.clear();
        write_packet_header(&mut self.frame, sequence, chunk.len());
        self.frame.extend_from_slice(chunk);
        self.transport.write_all(&self.frame)?;
        tracing::trace!(length = chunk.len(), sequence, "packet written");
        Ok(())
    }
}

/// One payload read incrementally, crossing continuation chunks transparently
///
/// Dropping it early leaves the rest of the payload on the wire; call [`Self::finish`].
#[derive(Debug)]
pub struct PayloadReader<'c, S> {
    channel: &'c mut PacketChannel<S>,
    chunk_remaining: usize,
    more_chunks: bool,
    first_chunk_len: usize,
    peeked: Option<u8>,
}

impl<S: Read + Write> PayloadReader<'_, S> {
    /// Length of the first chunk (0xFFFFFF when the payload continues)
    pub fn first_chunk_len(&self) -> usize {
        self.first_chunk_len
    }

    /// First byte of the payload, `None` if it is empty
    pub fn peek_u8(&mut self) -> Result<Option<u8>> {
        if self.peeked.is_some() {
            return Ok(self.peeked);
        }
        if !self.next_chunk()? {
            return Ok(None);
        }
        let mut byte = [0u8; 1];
        fill(&mut self.channel.transport, &mut byte)?;
        self.chunk_remaining -= 1;
        self.peeked = Some(byte[0]);
        Ok(self.peeked)
    }

    /// Make sure the current chunk has bytes left; false at the end of the payload
    fn next_chunk(&mut self) -> Result<bool> {
        while self.chunk_remaining == 0 {
            if !self.more_chunks {
                return Ok(false);
            }
            let (length, _) = self.channel.read_header()?;
            self.chunk_remaining = length;
            self.more_chunks = length == MAX_PACKET_CHUNK;
        }
        Ok(true)
    }

    /// Append the unread rest of the payload to `out` (cleared first)
    pub fn read_to_end(mut self, out: &mut Vec<u8>) -> Result<()> {
        out.clear();
        if let Some(byte) = self.peeked.take() {
            out.push(byte);
        }
        while self.next_chunk()? {
            let start = out.len();
            out.resize(start + self.chunk_remaining, 0);
            fill(&mut self.channel.transport, &mut out[start..])?;
            self.chunk_remaining = 0;
        }
        Ok(())
    }

    /// Discard whatever is left of the payload
    pub fn finish(mut self) -> Result<()> {
        let mut leftover = 0usize;
        while self.next_chunk()? {
            leftover += self.chunk_remaining;
            discard(&mut self.channel.transport, self.chunk_remaining as u64)?;
            self.chunk_remaining = 0;
        }
        if leftover > 0 {
            tracing::trace!(leftover, "unread bytes at the end of a payload");
        }
        Ok(())
    }
}

impl<S: Read + Write> FieldSource for PayloadReader<'_, S> {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        if !buf.is_empty()
            && let Some(byte) = self.peeked.take()
        {
            buf[0] = byte;
            filled = 1;
        }
        while filled < buf.len() {
            if !self.next_chunk()? {
                return Err(Error::UnexpectedEof);
            }
            let n = (buf.len() - filled).min(self.chunk_remaining);
            fill(&mut self.channel.transport, &mut buf[filled..filled + n])?;
            filled += n;
            self.chunk_remaining -= n;
        }
        Ok(())
    }

    fn read_into(&mut self, out: &mut Vec<u8>, len: usize) -> Result<()> {
        let mut left = len;
        if left > 0
            && let Some(byte) = self.peeked.take()
        {
            out.push(byte);
            left -= 1;
        }
        while left > 0 {
            if !self.next_chunk()? {
                return Err(Error::UnexpectedEof);
            }
            let n = left.min(self.chunk_remaining);
            let start = out.len();
            out.resize(start + n, 0);
            fill(&mut self.channel.transport, &mut out[start..])?;
            left -= n;
            self.chunk_remaining -= n;
        }
        Ok(())
    }

    fn skip(&mut self, len: u64) -> Result<()> {
        let mut left = len;
        if left > 0 && self.peeked.take().is_some() {
            left -= 1;
        }
        while left > 0 {
            if !self.next_chunk()? {
                return Err(Error::UnexpectedEof);
            }
            let n = left.min(self.chunk_remaining as u64);
            discard(&mut self.channel.transport, n)?;
            left -= n;
            self.chunk_remaining -= n as usize;
        }
        Ok(())
    }
}
