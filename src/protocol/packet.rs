use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::{Error, Result};

/// MySQL packet header (zero-copy)
///
/// Layout matches MySQL wire protocol:
/// - length: 3 bytes (little-endian, payload length)
/// - sequence_id: 1 byte
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, IntoBytes)]
pub struct PacketHeader {
    pub length: [u8; 3],
    pub sequence_id: u8,
}

impl PacketHeader {
    pub const SIZE: usize = 4;

    pub fn encode(length: usize, sequence_id: u8) -> Self {
        let len = u32::to_le_bytes(length as u32);
        Self {
            length: [len[0], len[1], len[2]],
            sequence_id,
        }
    }

    pub fn length(&self) -> usize {
        u32::from_le_bytes([self.length[0], self.length[1], self.length[2], 0]) as usize
    }

    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        if data.len() < Self::SIZE {
            return Err(Error::InvalidPacket);
        }
        Self::ref_from_bytes(&data[..Self::SIZE]).map_err(|_| Error::InvalidPacket)
    }
}

/// Header of a frame in the compressed protocol
///
/// Layout:
/// - compressed_length: 3 bytes (length of the frame body on the wire)
/// - sequence_id: 1 byte (compressed sequence, independent of the packet sequence)
/// - uncompressed_length: 3 bytes (0 when the body is sent uncompressed)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, IntoBytes)]
pub struct CompressedPacketHeader {
    pub compressed_length: [u8; 3],
    pub sequence_id: u8,
    pub uncompressed_length: [u8; 3],
}

impl CompressedPacketHeader {
    pub const SIZE: usize = 7;

    pub fn encode(compressed_length: usize, sequence_id: u8, uncompressed_length: usize) -> Self {
        let c = u32::to_le_bytes(compressed_length as u32);
        let u = u32::to_le_bytes(uncompressed_length as u32);
        Self {
            compressed_length: [c[0], c[1], c[2]],
            sequence_id,
            uncompressed_length: [u[0], u[1], u[2]],
        }
    }

    pub fn compressed_length(&self) -> usize {
        let c = self.compressed_length;
        u32::from_le_bytes([c[0], c[1], c[2], 0]) as usize
    }

    pub fn uncompressed_length(&self) -> usize {
        let u = self.uncompressed_length;
        u32::from_le_bytes([u[0], u[1], u[2], 0]) as usize
    }
}

/// Helper function to write packet header
#[inline]
pub fn write_packet_header(out: &mut Vec<u8>, sequence_id: u8, payload_length: usize) {
    out.extend_from_slice(PacketHeader::encode(payload_length, sequence_id).as_bytes());
}

/// OK packet payload (minimal header only)
///
/// Layout: 0x00 (or 0xFE when it replaces an EOF) followed by variable-length fields:
/// - affected_rows: length-encoded integer
/// - last_insert_id: length-encoded integer
/// - status_flags: 2 bytes
/// - warnings: 2 bytes
/// - info / session state: depends on CLIENT_SESSION_TRACK
#[derive(Debug, Clone, Copy)]
pub struct OkPayloadBytes<'a>(pub &'a [u8]);

impl<'a> OkPayloadBytes<'a> {
    pub fn bytes(&self) -> &'a [u8] {
        self.0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ErrPayloadBytes<'a>(pub &'a [u8]);
