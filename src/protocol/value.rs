//! Typed view over binary protocol fields
use crate::constant::{BinaryEncoding, ColumnFlags, ColumnType};
use crate::error::{Error, Result, eyre};
use crate::protocol::command::ColumnTypeAndFlags;
use zerocopy::byteorder::little_endian::{U16 as U16LE, U32 as U32LE};
use zerocopy::{FromBytes, Immutable, KnownLayout};

#[derive(Debug, Clone, Copy)]
pub enum Value<'a> {
    /// NULL value
    Null,
    /// Signed integer (TINYINT, SMALLINT, INT, BIGINT)
    SignedInt(i64),
    /// Unsigned integer (TINYINT UNSIGNED, SMALLINT UNSIGNED, INT UNSIGNED, BIGINT UNSIGNED)
    UnsignedInt(u64),
    /// FLOAT - 4-byte floating point
    Float(f32),
    /// DOUBLE - 8-byte floating point
    Double(f64),
    /// DATE/DATETIME/TIMESTAMP - 0 bytes (0000-00-00 00:00:00)
    Timestamp0,
    /// DATE/DATETIME/TIMESTAMP - 4 bytes (ymd)
    Timestamp4(&'a Timestamp4),
    /// DATE/DATETIME/TIMESTAMP - 7 bytes (ymd + hms)
    Timestamp7(&'a Timestamp7),
    /// DATE/DATETIME/TIMESTAMP - 11 bytes (ymd + hms + microseconds)
    Timestamp11(&'a Timestamp11),
    /// TIME - 0 bytes (00:00:00)
    Time0,
    /// TIME - 8 bytes (without microseconds)
    Time8(&'a Time8),
    /// TIME - 12 bytes (with microseconds)
    Time12(&'a Time12),
    /// BLOB, GEOMETRY, STRING, VARCHAR, VAR_STRING, DECIMAL, ..
    Byte(&'a [u8]),
}

fn fixed<const N: usize>(field: &[u8]) -> Result<[u8; N]> {
    field.try_into().map_err(|_| {
        Error::LibraryBug(eyre!(
            "fixed-width field has {} bytes, expected {}",
            field.len(),
            N
        ))
    })
}

impl<'a> Value<'a> {
    /// Interpret one field of a decoded binary row
    ///
    /// `field` is the value exactly as the row codec isolated it: fixed-width bytes,
    /// the body of a temporal value (its length selects the variant), or the
    /// content of a length-encoded string.
    pub fn parse(type_and_flags: &ColumnTypeAndFlags, field: Option<&'a [u8]>) -> Result<Self> {
        let Some(field) = field else {
            return Ok(Value::Null);
        };
        let is_unsigned = type_and_flags.flags.contains(ColumnFlags::UNSIGNED_FLAG);

        match type_and_flags.column_type.binary_encoding() {
            BinaryEncoding::Empty => Ok(Value::Null),
            BinaryEncoding::Fixed(1) => {
                let [b] = fixed::<1>(field)?;
                Ok(if is_unsigned {
                    Value::UnsignedInt(b as u64)
                } else {
                    Value::SignedInt(b as i8 as i64)
                })
            }
            BinaryEncoding::Fixed(2) => {
                let v = u16::from_le_bytes(fixed(field)?);
                Ok(if is_unsigned {
                    Value::UnsignedInt(v as u64)
                } else {
                    Value::SignedInt(v as i16 as i64)
                })
            }
            BinaryEncoding::Fixed(4) => {
                let bytes = fixed::<4>(field)?;
                if type_and_flags.column_type == ColumnType::MYSQL_TYPE_FLOAT {
                    return Ok(Value::Float(f32::from_le_bytes(bytes)));
                }
                let v = u32::from_le_bytes(bytes);
                Ok(if is_unsigned {
                    Value::UnsignedInt(v as u64)
                } else {
                    Value::SignedInt(v as i32 as i64)
                })
            }
            BinaryEncoding::Fixed(8) => {
                let bytes = fixed::<8>(field)?;
                if type_and_flags.column_type == ColumnType::MYSQL_TYPE_DOUBLE {
                    return Ok(Value::Double(f64::from_le_bytes(bytes)));
                }
                let v = u64::from_le_bytes(bytes);
                Ok(if is_unsigned {
                    Value::UnsignedInt(v)
                } else {
                    Value::SignedInt(v as i64)
                })
            }
            BinaryEncoding::Fixed(n) => Err(Error::LibraryBug(eyre!("unsupported width {n}"))),
            BinaryEncoding::Temporal => parse_temporal(type_and_flags, field),
            BinaryEncoding::LengthEncoded => Ok(Value::Byte(field)),
        }
    }
}

fn parse_temporal<'a>(type_and_flags: &ColumnTypeAndFlags, field: &'a [u8]) -> Result<Value<'a>> {
    let is_time = matches!(
        type_and_flags.column_type,
        ColumnType::MYSQL_TYPE_TIME | ColumnType::MYSQL_TYPE_TIME2
    );
    let value = match (is_time, field.len()) {
        (false, 0) => Value::Timestamp0,
        (false, 4) => Value::Timestamp4(Timestamp4::ref_from_bytes(field).map_err(Error::from_debug)?),
        (false, 7) => Value::Timestamp7(Timestamp7::ref_from_bytes(field).map_err(Error::from_debug)?),
        (false, 11) => {
            Value::Timestamp11(Timestamp11::ref_from_bytes(field).map_err(Error::from_debug)?)
        }
        (true, 0) => Value::Time0,
        (true, 8) => Value::Time8(Time8::ref_from_bytes(field).map_err(Error::from_debug)?),
        (true, 12) => Value::Time12(Time12::ref_from_bytes(field).map_err(Error::from_debug)?),
        (_, len) => return Err(Error::LibraryBug(eyre!("invalid temporal length: {}", len))),
    };
    Ok(value)
}

// ============================================================================
// Temporal Types
// ============================================================================

/// TIMESTAMP - 4 bytes (DATE/DATETIME/TIMESTAMP with date only)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct Timestamp4 {
    pub year: U16LE,
    pub month: u8,
    pub day: u8,
}

impl Timestamp4 {
    pub fn year(&self) -> u16 {
        self.year.get()
    }
}

/// TIMESTAMP - 7 bytes (DATE/DATETIME/TIMESTAMP without microseconds)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct Timestamp7 {
    pub year: U16LE,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl Timestamp7 {
    pub fn year(&self) -> u16 {
        self.year.get()
    }
}

/// TIMESTAMP - 11 bytes (DATE/DATETIME/TIMESTAMP with microseconds)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct Timestamp11 {
    pub year: U16LE,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub microsecond: U32LE,
}

impl Timestamp11 {
    pub fn year(&self) -> u16 {
        self.year.get()
    }

    pub fn microsecond(&self) -> u32 {
        self.microsecond.get()
    }
}

/// TIME - 8 bytes
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct Time8 {
    pub is_negative: u8,
    pub days: U32LE,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl Time8 {
    pub fn is_negative(&self) -> bool {
        self.is_negative != 0
    }

    pub fn days(&self) -> u32 {
        self.days.get()
    }
}

/// TIME - 12 bytes: negative (1), days (4 LE), hour (1), minute (1), second (1), microsecond (4 LE)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct Time12 {
    pub is_negative: u8,
    pub days: U32LE,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub microsecond: U32LE,
}

impl Time12 {
    pub fn is_negative(&self) -> bool {
        self.is_negative != 0
    }

    pub fn days(&self) -> u32 {
        self.days.get()
    }

    pub fn microsecond(&self) -> u32 {
        self.microsecond.get()
    }
}

// ============================================================================
// NULL Bitmap
// ============================================================================

/// Bit offset of column 0 in a binary result row bitmap
pub const RESULT_SET_BITMAP_OFFSET: usize = 2;

/// Byte length of a NULL bitmap covering `len` entries starting at bit `offset`
pub const fn null_bitmap_len(len: usize, offset: usize) -> usize {
    (len + offset).div_ceil(8)
}

/// NULL bitmap for binary protocol
///
/// In MySQL binary protocol, NULL values are indicated by a bitmap where each bit
/// represents whether a column is NULL (1 = NULL, 0 = not NULL).
///
/// For result sets (COM_STMT_EXECUTE response), the bitmap has an offset of 2 bits.
/// For prepared statement parameters, the offset is 0 bits.
#[derive(Debug, Clone, Copy)]
pub struct NullBitmap<'a> {
    bitmap: &'a [u8],
    offset: usize,
}

impl<'a> NullBitmap<'a> {
    /// Create a NULL bitmap for result sets (offset = 2)
    pub fn for_result_set(bitmap: &'a [u8]) -> Self {
        Self {
            bitmap,
            offset: RESULT_SET_BITMAP_OFFSET,
        }
    }

    /// Create a NULL bitmap for parameters (offset = 0)
    pub fn for_parameters(bitmap: &'a [u8]) -> Self {
        Self { bitmap, offset: 0 }
    }

    /// Check if the column at the given index is NULL
    pub fn is_null(&self, idx: usize) -> bool {
        let bit_pos = idx + self.offset;
        let byte_pos = bit_pos >> 3;
        let bit_offset = bit_pos & 7;

        match self.bitmap.get(byte_pos) {
            Some(byte) => byte & (1 << bit_offset) != 0,
            None => false,
        }
    }

    /// Get the raw bitmap bytes
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bitmap
    }
}

/// Append a NULL bitmap of `len` entries starting at bit `offset`
pub fn write_null_bitmap(
    out: &mut Vec<u8>,
    len: usize,
    offset: usize,
    is_null: impl Fn(usize) -> bool,
) {
    let start = out.len();
    out.resize(start + null_bitmap_len(len, offset), 0);
    for idx in (0..len).filter(|&i| is_null(i)) {
        let bit_pos = idx + offset;
        out[start + (bit_pos >> 3)] |= 1 << (bit_pos & 7);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tf(column_type: ColumnType, flags: ColumnFlags) -> ColumnTypeAndFlags {
        ColumnTypeAndFlags { column_type, flags }
    }

    fn parse<'a>(t: &ColumnTypeAndFlags, field: &'a [u8]) -> Result<Value<'a>> {
        Value::parse(t, Some(field))
    }

    #[test]
    fn signed_integers() {
        let t = tf(ColumnType::MYSQL_TYPE_TINY, ColumnFlags::empty());
        assert!(matches!(parse(&t, &[214]).unwrap(), Value::SignedInt(-42)));

        let t = tf(ColumnType::MYSQL_TYPE_SHORT, ColumnFlags::empty());
        let v = parse(&t, &[0x18, 0xFC]).unwrap();
        assert!(matches!(v, Value::SignedInt(-1000)));

        let t = tf(ColumnType::MYSQL_TYPE_LONG, ColumnFlags::empty());
        let v = parse(&t, &[0x60, 0x79, 0xFE, 0xFF]).unwrap();
        assert!(matches!(v, Value::SignedInt(-100_000)));
    }

    #[test]
    fn unsigned_integers() {
        let t = tf(ColumnType::MYSQL_TYPE_TINY, ColumnFlags::UNSIGNED_FLAG);
        assert!(matches!(parse(&t, &[200]).unwrap(), Value::UnsignedInt(200)));

        let t = tf(ColumnType::MYSQL_TYPE_LONGLONG, ColumnFlags::UNSIGNED_FLAG);
        let max = u64::MAX.to_le_bytes();
        let v = parse(&t, &max).unwrap();
        assert!(matches!(v, Value::UnsignedInt(u64::MAX)));
    }

    #[test]
    fn float_and_double() {
        let t = tf(ColumnType::MYSQL_TYPE_FLOAT, ColumnFlags::empty());
        match parse(&t, &1.5f32.to_le_bytes()).unwrap() {
            Value::Float(f) => assert_eq!(f, 1.5),
            other => panic!("unexpected {other:?}"),
        }

        let t = tf(ColumnType::MYSQL_TYPE_DOUBLE, ColumnFlags::empty());
        match parse(&t, &std::f64::consts::PI.to_le_bytes()).unwrap() {
            Value::Double(d) => assert_eq!(d, std::f64::consts::PI),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn timestamps_by_length() {
        let t = tf(ColumnType::MYSQL_TYPE_DATETIME, ColumnFlags::empty());
        assert!(matches!(parse(&t, &[]).unwrap(), Value::Timestamp0));

        let mut field = 2024u16.to_le_bytes().to_vec();
        field.extend_from_slice(&[12, 25]);
        match parse(&t, &field).unwrap() {
            Value::Timestamp4(ts) => {
                assert_eq!(ts.year(), 2024);
                assert_eq!((ts.month, ts.day), (12, 25));
            }
            other => panic!("unexpected {other:?}"),
        }

        field.extend_from_slice(&[15, 30, 45]);
        match parse(&t, &field).unwrap() {
            Value::Timestamp7(ts) => assert_eq!((ts.hour, ts.minute, ts.second), (15, 30, 45)),
            other => panic!("unexpected {other:?}"),
        }

        field.extend_from_slice(&123_456u32.to_le_bytes());
        match parse(&t, &field).unwrap() {
            Value::Timestamp11(ts) => assert_eq!(ts.microsecond(), 123_456),
            other => panic!("unexpected {other:?}"),
        }

        assert!(parse(&t, &[1, 2, 3]).is_err());
    }

    #[test]
    fn time_by_length() {
        let t = tf(ColumnType::MYSQL_TYPE_TIME, ColumnFlags::empty());
        assert!(matches!(parse(&t, &[]).unwrap(), Value::Time0));

        let mut field = vec![1];
        field.extend_from_slice(&1u32.to_le_bytes());
        field.extend_from_slice(&[12, 30, 45]);
        match parse(&t, &field).unwrap() {
            Value::Time8(time) => {
                assert!(time.is_negative());
                assert_eq!(time.days(), 1);
                assert_eq!((time.hour, time.minute, time.second), (12, 30, 45));
            }
            other => panic!("unexpected {other:?}"),
        }

        field.extend_from_slice(&7u32.to_le_bytes());
        match parse(&t, &field).unwrap() {
            Value::Time12(time) => assert_eq!(time.microsecond(), 7),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn bytes_and_null() {
        let t = tf(ColumnType::MYSQL_TYPE_BLOB, ColumnFlags::empty());
        match parse(&t, &[0xDE, 0xAD]).unwrap() {
            Value::Byte(b) => assert_eq!(b, &[0xDE, 0xAD]),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(Value::parse(&t, None).unwrap(), Value::Null));
    }

    #[test]
    fn wrong_fixed_width_is_rejected() {
        let t = tf(ColumnType::MYSQL_TYPE_LONG, ColumnFlags::empty());
        assert!(parse(&t, &[1, 2]).is_err());
    }

    #[test]
    fn null_bitmap_result_set() {
        // bit 2 -> column 0, bit 12 -> column 10
        let bitmap = [0b0000_0100, 0b0001_0000];
        let null_bitmap = NullBitmap::for_result_set(&bitmap);

        assert!(null_bitmap.is_null(0));
        assert!(!null_bitmap.is_null(1));
        assert!(!null_bitmap.is_null(2));
        assert!(null_bitmap.is_null(10));
        assert!(!null_bitmap.is_null(100));
    }

    #[test]
    fn null_bitmap_parameters() {
        let bitmap = [0b0000_0101];
        let null_bitmap = NullBitmap::for_parameters(&bitmap);

        assert!(null_bitmap.is_null(0));
        assert!(!null_bitmap.is_null(1));
        assert!(null_bitmap.is_null(2));
        assert!(!null_bitmap.is_null(3));
    }

    #[test]
    fn bitmap_lengths() {
        assert_eq!(null_bitmap_len(0, 2), 1);
        assert_eq!(null_bitmap_len(6, 2), 1);
        assert_eq!(null_bitmap_len(7, 2), 2);
        assert_eq!(null_bitmap_len(64, 2), 9);
        assert_eq!(null_bitmap_len(0, 0), 0);
        assert_eq!(null_bitmap_len(8, 0), 1);
        assert_eq!(null_bitmap_len(9, 0), 2);
    }
}
