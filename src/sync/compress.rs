//! Compressed protocol framing
//!
//! After authentication with `CLIENT_COMPRESS`, the packet stream is carried inside
//! frames with a 7-byte header. Frame and packet boundaries are independent: one frame
//! may hold several packets and one packet may span frames.

use std::io::{self, Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use zerocopy::{FromZeros, IntoBytes};

use crate::constant::MAX_PACKET_CHUNK;
use crate::protocol::packet::CompressedPacketHeader;
use crate::sync::channel::SequenceCounter;

/// Frames shorter than this are sent uncompressed
pub const MIN_COMPRESS_LENGTH: usize = 1536;

/// `Read + Write` adapter that speaks compressed frames over `S`
///
/// Writes are collected until `flush`, which emits them as one or more frames.
#[derive(Debug)]
pub struct CompressedStream<S> {
    inner: S,
    sequence: SequenceCounter,
    /// Decompressed bytes of the current frame
    read_buf: Vec<u8>,
    read_pos: usize,
    frame_buf: Vec<u8>,
    write_buf: Vec<u8>,
}

impl<S: Read + Write> CompressedStream<S> {
    pub fn new(inner: S) -> Self {
        tracing::debug!("compressed protocol enabled");
        Self {
            inner,
            sequence: SequenceCounter::new(),
            read_buf: Vec::new(),
            read_pos: 0,
            frame_buf: Vec::new(),
            write_buf: Vec::new(),
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    pub fn reset_sequence(&mut self) {
        self.sequence.reset();
    }

    fn read_frame(&mut self) -> io::Result<()> {
        let mut header = CompressedPacketHeader::new_zeroed();
        self.inner.read_exact(header.as_mut_bytes())?;
        self.sequence.observe(header.sequence_id);
        let compressed_length = header.compressed_length();
        let uncompressed_length = header.uncompressed_length();
        tracing::trace!(compressed_length, uncompressed_length, "compressed frame");

        self.read_buf.clear();
        self.read_pos = 0;
        if uncompressed_length == 0 {
            self.read_buf.resize(compressed_length, 0);
            return self.inner.read_exact(&mut self.read_buf);
        }

        self.frame_buf.clear();
        self.frame_buf.resize(compressed_length, 0);
        self.inner.read_exact(&mut self.frame_buf)?;
        self.read_buf.reserve(uncompressed_length);
        ZlibDecoder::new(self.frame_buf.as_slice())
            .take(uncompressed_length as u64 + 1)
            .read_to_end(&mut self.read_buf)?;
        if self.read_buf.len() != uncompressed_length {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "compressed frame inflated to {} bytes, header says {uncompressed_length}",
                    self.read_buf.len()
                ),
            ));
        }
        Ok(())
    }

    fn write_frame(&mut self, chunk: &[u8]) -> io::Result<()> {
        if chunk.len() >= MIN_COMPRESS_LENGTH {
            let mut encoder = ZlibEncoder::new(
                Vec::with_capacity(chunk.len() / 2),
                Compression::default(),
            );
            encoder.write_all(chunk)?;
            let compressed = encoder.finish()?;
            if compressed.len() < chunk.len() {
                return self.send_frame(&compressed, chunk.len());
            }
        }
        self.send_frame(chunk, 0)
    }

    fn send_frame(&mut self, body: &[u8], uncompressed_length: usize) -> io::Result<()> {
        let header =
            CompressedPacketHeader::encode(body.len(), self.sequence.advance(), uncompressed_length);
        self.inner.write_all(header.as_bytes())?;
        self.inner.write_all(body)
    }
}

impl<S: Read + Write> Read for CompressedStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.read_pos >= self.read_buf.len() {
            self.read_frame()?;
        }
        let available = &self.read_buf[self.read_pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.read_pos += n;
        Ok(n)
    }
}

impl<S: Read + Write> Write for CompressedStream<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let pending = std::mem::take(&mut self.write_buf);
        for chunk in pending.chunks(MAX_PACKET_CHUNK) {
            self.write_frame(chunk)?;
        }
        self.write_buf = pending;
        self.write_buf.clear();
        self.inner.flush()
    }
}
