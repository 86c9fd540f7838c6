//! Row codec for the text and binary result set protocols
//!
//! Decoders pull bytes from a [`FieldSource`] instead of a finished payload, so a field
//! larger than `max_field_size` is read up to the cap and the rest is skipped without
//! ever being buffered.

use auto_impl::auto_impl;

use crate::col::ColumnDefinition;
use crate::constant::{BinaryEncoding, ColumnType};
use crate::error::{Error, Result};
use crate::protocol::primitive::*;
use crate::protocol::value::{NullBitmap, RESULT_SET_BITMAP_OFFSET, null_bitmap_len, write_null_bitmap};
use crate::row::Row;

/// Sequential byte source for one row payload
#[auto_impl(&mut)]
pub trait FieldSource {
    /// Fill `buf` completely
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Append exactly `len` bytes to `out`
    fn read_into(&mut self, out: &mut Vec<u8>, len: usize) -> Result<()>;

    /// Discard exactly `len` bytes
    fn skip(&mut self, len: u64) -> Result<()>;

    fn read_u8(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.read_exact(&mut byte)?;
        Ok(byte[0])
    }
}

/// [`FieldSource`] over an in-memory payload
#[derive(Debug, Clone)]
pub struct SliceSource<'a> {
    data: &'a [u8],
}

impl<'a> SliceSource<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn remaining(&self) -> &'a [u8] {
        self.data
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let (head, rest) = read_string_fix(self.data, len)?;
        self.data = rest;
        Ok(head)
    }
}

impl FieldSource for SliceSource<'_> {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let bytes = self.take(buf.len())?;
        buf.copy_from_slice(bytes);
        Ok(())
    }

    fn read_into(&mut self, out: &mut Vec<u8>, len: usize) -> Result<()> {
        let bytes = self.take(len)?;
        out.extend_from_slice(bytes);
        Ok(())
    }

    fn skip(&mut self, len: u64) -> Result<()> {
        let len = usize::try_from(len).map_err(|_| Error::UnexpectedEof)?;
        self.take(len)?;
        Ok(())
    }
}

/// Read a length-encoded integer from a source
pub fn read_lenenc_from<S: FieldSource>(src: &mut S) -> Result<LenEnc> {
    let first = src.read_u8()?;
    if first == LENENC_NULL {
        return Ok(LenEnc::Null);
    }
    let extra_len = lenenc_extra_len(first).ok_or(Error::InvalidPacket)?;
    let mut extra = [0u8; 8];
    src.read_exact(&mut extra[..extra_len])?;
    Ok(LenEnc::Int(lenenc_from_parts(first, &extra[..extra_len])))
}

/// Column types whose values `max_field_size` may cut short
pub fn is_truncatable(column_type: ColumnType) -> bool {
    matches!(
        column_type,
        ColumnType::MYSQL_TYPE_VARCHAR
            | ColumnType::MYSQL_TYPE_VAR_STRING
            | ColumnType::MYSQL_TYPE_STRING
            | ColumnType::MYSQL_TYPE_TINY_BLOB
            | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
            | ColumnType::MYSQL_TYPE_LONG_BLOB
            | ColumnType::MYSQL_TYPE_BLOB
            | ColumnType::MYSQL_TYPE_JSON
            | ColumnType::MYSQL_TYPE_GEOMETRY
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowProtocol {
    /// COM_QUERY results: every value is a length-encoded string
    Text,
    /// COM_STMT_EXECUTE results: NULL bitmap plus type-driven layout
    Binary,
}

/// Decodes row payloads of one result set into [`Row`]s
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowCodec {
    pub protocol: RowProtocol,
    /// Longest prefix of a string/blob value kept in memory
    pub max_field_size: Option<usize>,
}

impl RowCodec {
    pub fn new(protocol: RowProtocol, max_field_size: Option<usize>) -> Self {
        Self {
            protocol,
            max_field_size,
        }
    }

    pub fn decode<S: FieldSource>(
        &self,
        src: &mut S,
        columns: &[ColumnDefinition],
        row: &mut Row,
    ) -> Result<()> {
        match self.protocol {
            RowProtocol::Text => decode_text_row(src, columns, self.max_field_size, row),
            RowProtocol::Binary => decode_binary_row(src, columns, self.max_field_size, row),
        }
    }
}

fn field_cap(column: &ColumnDefinition, max_field_size: Option<usize>) -> Option<usize> {
    max_field_size.filter(|_| is_truncatable(column.column_type))
}

/// Copy a `len`-byte field into `row`, keeping at most `cap` bytes
fn read_field<S: FieldSource>(
    src: &mut S,
    row: &mut Row,
    len: u64,
    cap: Option<usize>,
) -> Result<()> {
    let keep = match cap {
        Some(cap) => len.min(cap as u64),
        None => len,
    };
    let keep_len = usize::try_from(keep).map_err(|_| Error::InvalidPacket)?;
    let start = row.field_buffer().len();
    src.read_into(row.field_buffer(), keep_len)?;
    if len > keep {
        src.skip(len - keep)?;
    }
    row.finish_field(start);
    Ok(())
}

/// Decode a text protocol row: one length-encoded string (or 0xFB NULL) per column
pub fn decode_text_row<S: FieldSource>(
    src: &mut S,
    columns: &[ColumnDefinition],
    max_field_size: Option<usize>,
    row: &mut Row,
) -> Result<()> {
    row.clear();
    for column in columns {
        match read_lenenc_from(src)? {
            LenEnc::Null => row.push_null(),
            LenEnc::Int(len) => read_field(src, row, len, field_cap(column, max_field_size))?,
        }
    }
    Ok(())
}

/// Decode a binary protocol row
///
/// Layout: `0x00`, NULL bitmap of `(N + 2 + 7) / 8` bytes (column `i` at bit `i + 2`),
/// then every non-NULL value in the layout its column type dictates. Temporal values are
/// stored without their length byte; the length of the stored slice tells the variant.
pub fn decode_binary_row<S: FieldSource>(
    src: &mut S,
    columns: &[ColumnDefinition],
    max_field_size: Option<usize>,
    row: &mut Row,
) -> Result<()> {
    row.clear();
    if src.read_u8()? != 0x00 {
        return Err(Error::InvalidPacket);
    }

    let bitmap_len = null_bitmap_len(columns.len(), RESULT_SET_BITMAP_OFFSET);
    let mut bitmap = Vec::with_capacity(bitmap_len);
    src.read_into(&mut bitmap, bitmap_len)?;
    let nulls = NullBitmap::for_result_set(&bitmap);

    for (idx, column) in columns.iter().enumerate() {
        if nulls.is_null(idx) {
            row.push_null();
            continue;
        }
        match column.column_type.binary_encoding() {
            BinaryEncoding::Empty => read_field(src, row, 0, None)?,
            BinaryEncoding::Fixed(len) => read_field(src, row, len as u64, None)?,
            BinaryEncoding::Temporal => {
                let len = src.read_u8()?;
                if !matches!(len, 0 | 4 | 7 | 8 | 11 | 12) {
                    return Err(Error::InvalidPacket);
                }
                read_field(src, row, u64::from(len), None)?;
            }
            BinaryEncoding::LengthEncoded => match read_lenenc_from(src)? {
                LenEnc::Int(len) => {
                    read_field(src, row, len, field_cap(column, max_field_size))?;
                }
                LenEnc::Null => return Err(Error::InvalidPacket),
            },
        }
    }
    Ok(())
}

/// Encode a text protocol row (scripted servers and tests)
pub fn write_text_row(out: &mut Vec<u8>, fields: &[Option<&[u8]>]) {
    for field in fields {
        match field {
            Some(bytes) => write_bytes_lenenc(out, bytes),
            None => write_null_lenenc(out),
        }
    }
}

/// Encode a binary protocol row (scripted servers and tests)
///
/// Fixed-width values must already have their exact width; temporal values are given
/// without the length byte.
pub fn write_binary_row(
    out: &mut Vec<u8>,
    columns: &[ColumnDefinition],
    fields: &[Option<&[u8]>],
) -> Result<()> {
    if columns.len() != fields.len() {
        return Err(Error::BadUsageError(format!(
            "{} columns but {} values",
            columns.len(),
            fields.len()
        )));
    }
    out.push(0x00);
    write_null_bitmap(out, fields.len(), RESULT_SET_BITMAP_OFFSET, |i| {
        fields[i].is_none()
    });
    for (column, field) in columns.iter().zip(fields) {
        let Some(bytes) = field else { continue };
        match column.column_type.binary_encoding() {
            BinaryEncoding::Empty => {}
            BinaryEncoding::Fixed(len) if bytes.len() == len => out.extend_from_slice(bytes),
            BinaryEncoding::Fixed(len) => {
                return Err(Error::BadUsageError(format!(
                    "column {} needs {len} bytes, got {}",
                    column.name,
                    bytes.len()
                )));
            }
            BinaryEncoding::Temporal => {
                let len = u8::try_from(bytes.len())
                    .map_err(|_| Error::BadUsageError("temporal value too long".to_string()))?;
                out.push(len);
                out.extend_from_slice(bytes);
            }
            BinaryEncoding::LengthEncoded => write_bytes_lenenc(out, bytes),
        }
    }
    Ok(())
}
