use crate::col::ColumnDefinition;
use crate::constant::{ColumnFlags, ColumnType};
use crate::error::{Error, Result, eyre};
use crate::protocol::primitive::*;
use zerocopy::byteorder::little_endian::{U16 as U16LE, U32 as U32LE};
use zerocopy::{FromBytes, Immutable, KnownLayout};

/// Represents a payload part of a column definition packet
#[derive(Debug, Clone, Copy)]
pub struct ColumnDefinitionBytes<'a>(pub &'a [u8]);

impl<'a> ColumnDefinitionBytes<'a> {
    /// Get a reference to the fixed-size tail of the column definition
    ///
    /// The tail is always the last 12 bytes of the column definition packet
    pub fn tail(&self) -> Result<&'a ColumnDefinitionTail> {
        if self.0.len() < 12 {
            return Err(Error::LibraryBug(eyre!(
                "column definition too short: {} < 12",
                self.0.len()
            )));
        }
        let tail_bytes = &self.0[self.0.len() - 12..];
        ColumnDefinitionTail::ref_from_bytes(tail_bytes).map_err(Error::from_debug)
    }

    /// Type tag and flags, without touching the variable-length names
    pub fn type_and_flags(&self) -> Result<ColumnTypeAndFlags> {
        let tail = self.tail()?;
        Ok(ColumnTypeAndFlags {
            column_type: tail.column_type()?,
            flags: tail.flags(),
        })
    }
}

fn lossy(bytes: &[u8]) -> String {
    match simdutf8::basic::from_utf8(bytes) {
        Ok(s) => s.to_owned(),
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

impl TryFrom<ColumnDefinitionBytes<'_>> for ColumnDefinition {
    type Error = Error;

    fn try_from(bytes: ColumnDefinitionBytes<'_>) -> Result<Self> {
        let data = bytes.0;

        // ─── Variable Length String Fields ───────────────────────────
        let (catalog, data) = read_string_lenenc(data)?;
        let (schema, data) = read_string_lenenc(data)?;
        let (table, data) = read_string_lenenc(data)?;
        let (org_table, data) = read_string_lenenc(data)?;
        let (name, data) = read_string_lenenc(data)?;
        let (org_name, data) = read_string_lenenc(data)?;

        // ─── Fixed Tail ──────────────────────────────────────────────
        // length of the fixed fields is always 0x0c
        let (_length, data) = read_int_lenenc(data)?;
        let (tail, _rest) =
            ColumnDefinitionTail::ref_from_prefix(data).map_err(|_| Error::UnexpectedEof)?;

        Ok(ColumnDefinition {
            catalog: lossy(catalog),
            schema: lossy(schema),
            table: lossy(table),
            org_table: lossy(org_table),
            name: lossy(name),
            org_name: lossy(org_name),
            charset: tail.charset(),
            column_length: tail.column_length(),
            column_type: tail.column_type()?,
            flags: tail.flags(),
            decimals: tail.decimals,
        })
    }
}

/// Fixed-size tail of Column Definition packet (12 bytes)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct ColumnDefinitionTail {
    charset: U16LE,
    column_length: U32LE,
    column_type: u8,
    flags: U16LE,
    decimals: u8,
    reserved: U16LE,
}

impl ColumnDefinitionTail {
    pub fn charset(&self) -> u16 {
        self.charset.get()
    }

    pub fn column_length(&self) -> u32 {
        self.column_length.get()
    }

    pub fn column_type(&self) -> Result<ColumnType> {
        ColumnType::from_u8(self.column_type).ok_or(Error::InvalidPacket)
    }

    /// Unknown bits are dropped; servers add flags over time.
    pub fn flags(&self) -> ColumnFlags {
        ColumnFlags::from_bits_truncate(self.flags.get())
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }
}

/// Column type and flags, the part of a column definition the row codec needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnTypeAndFlags {
    pub column_type: ColumnType,
    pub flags: ColumnFlags,
}

impl From<&ColumnDefinition> for ColumnTypeAndFlags {
    fn from(col: &ColumnDefinition) -> Self {
        Self {
            column_type: col.column_type,
            flags: col.flags,
        }
    }
}

/// Write a column definition packet payload (Protocol::ColumnDefinition41)
///
/// The client never sends these; scripted servers and proxies do.
pub fn write_column_definition(out: &mut Vec<u8>, col: &ColumnDefinition) {
    write_string_lenenc(out, &col.catalog);
    write_string_lenenc(out, &col.schema);
    write_string_lenenc(out, &col.table);
    write_string_lenenc(out, &col.org_table);
    write_string_lenenc(out, &col.name);
    write_string_lenenc(out, &col.org_name);
    write_int_lenenc(out, 0x0c);
    write_int_2(out, col.charset);
    write_int_4(out, col.column_length);
    write_int_1(out, col.column_type as u8);
    write_int_2(out, col.flags.bits());
    write_int_1(out, col.decimals);
    write_int_2(out, 0);
}
