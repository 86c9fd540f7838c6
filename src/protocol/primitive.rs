use crate::error::{Error, Result};
use zerocopy::FromBytes;
use zerocopy::byteorder::little_endian::{U16 as U16LE, U32 as U32LE, U64 as U64LE};

/// NULL marker of a length-encoded value
pub const LENENC_NULL: u8 = 0xFB;

/// A decoded length-encoded integer: either a value or the NULL sentinel (0xFB)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LenEnc {
    Null,
    Int(u64),
}

/// Read 1-byte integer
pub fn read_int_1(data: &[u8]) -> Result<(u8, &[u8])> {
    match data.split_first() {
        Some((&byte, rest)) => Ok((byte, rest)),
        None => Err(Error::UnexpectedEof),
    }
}

/// Read 2-byte little-endian integer
pub fn read_int_2(data: &[u8]) -> Result<(u16, &[u8])> {
    let (value, rest) = U16LE::read_from_prefix(data).map_err(|_| Error::UnexpectedEof)?;
    Ok((value.get(), rest))
}

/// Read 3-byte little-endian integer
pub fn read_int_3(data: &[u8]) -> Result<(u32, &[u8])> {
    match data {
        [a, b, c, rest @ ..] => Ok((u32::from_le_bytes([*a, *b, *c, 0]), rest)),
        _ => Err(Error::UnexpectedEof),
    }
}

/// Read 4-byte little-endian integer
pub fn read_int_4(data: &[u8]) -> Result<(u32, &[u8])> {
    let (value, rest) = U32LE::read_from_prefix(data).map_err(|_| Error::UnexpectedEof)?;
    Ok((value.get(), rest))
}

/// Read 8-byte little-endian integer
pub fn read_int_8(data: &[u8]) -> Result<(u64, &[u8])> {
    let (value, rest) = U64LE::read_from_prefix(data).map_err(|_| Error::UnexpectedEof)?;
    Ok((value.get(), rest))
}

/// Number of bytes that follow a length-encoded integer's first byte
///
/// Returns `None` for the NULL marker and for the reserved 0xFF byte.
pub fn lenenc_extra_len(first: u8) -> Option<usize> {
    match first {
        0x00..=0xFA => Some(0),
        0xFC => Some(2),
        0xFD => Some(3),
        0xFE => Some(8),
        0xFB | 0xFF => None,
    }
}

/// Decode the bytes following a length-encoded integer's first byte
pub fn lenenc_from_parts(first: u8, extra: &[u8]) -> u64 {
    if extra.is_empty() {
        return first as u64;
    }
    let mut bytes = [0u8; 8];
    let n = extra.len().min(8);
    bytes[..n].copy_from_slice(&extra[..n]);
    u64::from_le_bytes(bytes)
}

/// Read a length-encoded integer, distinguishing the NULL sentinel
pub fn read_lenenc(data: &[u8]) -> Result<(LenEnc, &[u8])> {
    let (first, rest) = read_int_1(data)?;
    if first == LENENC_NULL {
        return Ok((LenEnc::Null, rest));
    }
    let extra_len = lenenc_extra_len(first).ok_or(Error::InvalidPacket)?;
    let (extra, rest) = read_string_fix(rest, extra_len)?;
    Ok((LenEnc::Int(lenenc_from_parts(first, extra)), rest))
}

/// Read length-encoded integer where NULL is not allowed
pub fn read_int_lenenc(data: &[u8]) -> Result<(u64, &[u8])> {
    match read_lenenc(data)? {
        (LenEnc::Int(value), rest) => Ok((value, rest)),
        (LenEnc::Null, _) => Err(Error::InvalidPacket),
    }
}

/// Read fixed-length string
pub fn read_string_fix(data: &[u8], len: usize) -> Result<(&[u8], &[u8])> {
    if data.len() < len {
        return Err(Error::UnexpectedEof);
    }
    Ok(data.split_at(len))
}

/// Read null-terminated string
pub fn read_string_null(data: &[u8]) -> Result<(&[u8], &[u8])> {
    match data.iter().position(|&byte| byte == 0) {
        Some(i) => Ok((&data[..i], &data[i + 1..])),
        None => Err(Error::UnexpectedEof),
    }
}

/// Read length-encoded string
pub fn read_string_lenenc(data: &[u8]) -> Result<(&[u8], &[u8])> {
    let (len, rest) = read_int_lenenc(data)?;
    let len = usize::try_from(len).map_err(|_| Error::InvalidPacket)?;
    read_string_fix(rest, len)
}

/// Read length-encoded string that may be NULL
pub fn read_string_lenenc_nullable(data: &[u8]) -> Result<(Option<&[u8]>, &[u8])> {
    match read_lenenc(data)? {
        (LenEnc::Null, rest) => Ok((None, rest)),
        (LenEnc::Int(len), rest) => {
            let len = usize::try_from(len).map_err(|_| Error::InvalidPacket)?;
            let (value, rest) = read_string_fix(rest, len)?;
            Ok((Some(value), rest))
        }
    }
}

/// Write 1-byte integer
pub fn write_int_1(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

/// Write 2-byte little-endian integer
pub fn write_int_2(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Write 3-byte little-endian integer
pub fn write_int_3(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes()[..3]);
}

/// Write 4-byte little-endian integer
pub fn write_int_4(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Write 8-byte little-endian integer
pub fn write_int_8(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Write length-encoded integer
pub fn write_int_lenenc(out: &mut Vec<u8>, value: u64) {
    if value < 251 {
        out.push(value as u8);
    } else if value < (1 << 16) {
        out.push(0xfc);
        write_int_2(out, value as u16);
    } else if value < (1 << 24) {
        out.push(0xfd);
        write_int_3(out, value as u32);
    } else {
        out.push(0xfe);
        write_int_8(out, value);
    }
}

/// Write the NULL marker of a length-encoded value
pub fn write_null_lenenc(out: &mut Vec<u8>) {
    out.push(LENENC_NULL);
}

/// Write null-terminated string
pub fn write_string_null(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

/// Write length-encoded string
pub fn write_string_lenenc(out: &mut Vec<u8>, s: &str) {
    write_bytes_lenenc(out, s.as_bytes());
}

/// Write length-encoded bytes
pub fn write_bytes_lenenc(out: &mut Vec<u8>, data: &[u8]) {
    write_int_lenenc(out, data.len() as u64);
    out.extend_from_slice(data);
}
