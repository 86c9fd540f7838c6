use auto_impl::auto_impl;

use crate::constant::ColumnType;
use crate::error::Result;
use crate::protocol::primitive::*;

/// Wire type of a bound parameter: the type byte and the unsigned flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamType {
    pub column_type: ColumnType,
    pub unsigned: bool,
}

impl ParamType {
    pub const NULL: Self = Self::signed(ColumnType::MYSQL_TYPE_NULL);

    pub const fn signed(column_type: ColumnType) -> Self {
        Self {
            column_type,
            unsigned: false,
        }
    }

    pub const fn unsigned(column_type: ColumnType) -> Self {
        Self {
            column_type,
            unsigned: true,
        }
    }

    /// Format:
    /// - Byte 0: MySQL type (MYSQL_TYPE_*)
    /// - Byte 1: Unsigned flag (0x80 if unsigned, 0x00 otherwise)
    pub fn encode(self, out: &mut Vec<u8>) {
        out.push(self.column_type as u8);
        out.push(if self.unsigned { 0x80 } else { 0x00 });
    }
}

/// Trait for encoding a single parameter in prepared statements
///
/// The runtime type may differ between executions of the same statement
/// (e.g. `Option<i32>` is `NULL` one time and `LONG` the next).
#[auto_impl(&, Box)]
pub trait Param {
    /// Returns true if this parameter is NULL
    fn is_null(&self) -> bool {
        false
    }

    fn param_type(&self) -> ParamType;

    /// Encode parameter value (binary encoded)
    ///
    /// Only called if is_null() returns false.
    fn encode_value(&self, out: &mut Vec<u8>) -> Result<()>;
}

macro_rules! impl_param_for_int {
    ($($t:ty => $column_type:ident, $unsigned:literal, $write:ident as $wire:ty;)+) => {
        $(
            impl Param for $t {
                fn param_type(&self) -> ParamType {
                    ParamType {
                        column_type: ColumnType::$column_type,
                        unsigned: $unsigned,
                    }
                }

                fn encode_value(&self, out: &mut Vec<u8>) -> Result<()> {
                    $write(out, *self as $wire);
                    Ok(())
                }
            }
        )+
    };
}

impl_param_for_int! {
    i8 => MYSQL_TYPE_TINY, false, write_int_1 as u8;
    i16 => MYSQL_TYPE_SHORT, false, write_int_2 as u16;
    i32 => MYSQL_TYPE_LONG, false, write_int_4 as u32;
    i64 => MYSQL_TYPE_LONGLONG, false, write_int_8 as u64;
    u8 => MYSQL_TYPE_TINY, true, write_int_1 as u8;
    u16 => MYSQL_TYPE_SHORT, true, write_int_2 as u16;
    u32 => MYSQL_TYPE_LONG, true, write_int_4 as u32;
    u64 => MYSQL_TYPE_LONGLONG, true, write_int_8 as u64;
}

impl Param for bool {
    fn param_type(&self) -> ParamType {
        ParamType::signed(ColumnType::MYSQL_TYPE_TINY)
    }

    fn encode_value(&self, out: &mut Vec<u8>) -> Result<()> {
        write_int_1(out, u8::from(*self));
        Ok(())
    }
}

impl Param for f32 {
    fn param_type(&self) -> ParamType {
        ParamType::signed(ColumnType::MYSQL_TYPE_FLOAT)
    }

    fn encode_value(&self, out: &mut Vec<u8>) -> Result<()> {
        write_int_4(out, self.to_bits());
        Ok(())
    }
}

impl Param for f64 {
    fn param_type(&self) -> ParamType {
        ParamType::signed(ColumnType::MYSQL_TYPE_DOUBLE)
    }

    fn encode_value(&self, out: &mut Vec<u8>) -> Result<()> {
        write_int_8(out, self.to_bits());
        Ok(())
    }
}

impl Param for str {
    fn param_type(&self) -> ParamType {
        ParamType::signed(ColumnType::MYSQL_TYPE_VAR_STRING)
    }

    fn encode_value(&self, out: &mut Vec<u8>) -> Result<()> {
        write_string_lenenc(out, self);
        Ok(())
    }
}

impl Param for String {
    fn param_type(&self) -> ParamType {
        self.as_str().param_type()
    }

    fn encode_value(&self, out: &mut Vec<u8>) -> Result<()> {
        self.as_str().encode_value(out)
    }
}

impl Param for [u8] {
    fn param_type(&self) -> ParamType {
        ParamType::signed(ColumnType::MYSQL_TYPE_BLOB)
    }

    fn encode_value(&self, out: &mut Vec<u8>) -> Result<()> {
        write_bytes_lenenc(out, self);
        Ok(())
    }
}

impl Param for Vec<u8> {
    fn param_type(&self) -> ParamType {
        self.as_slice().param_type()
    }

    fn encode_value(&self, out: &mut Vec<u8>) -> Result<()> {
        self.as_slice().encode_value(out)
    }
}

impl<T: Param> Param for Option<T> {
    fn is_null(&self) -> bool {
        match self {
            Some(value) => value.is_null(),
            None => true,
        }
    }

    fn param_type(&self) -> ParamType {
        match self {
            Some(value) => value.param_type(),
            None => ParamType::NULL,
        }
    }

    fn encode_value(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            Some(value) => value.encode_value(out),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode<P: Param>(param: P) -> (Vec<u8>, Vec<u8>) {
        let mut types = Vec::new();
        let mut values = Vec::new();
        param.param_type().encode(&mut types);
        if !param.is_null() {
            param.encode_value(&mut values).unwrap();
        }
        (types, values)
    }

    #[test]
    fn signed_and_unsigned_integers() {
        let (types, values) = encode(-42i32);
        assert_eq!(types, vec![ColumnType::MYSQL_TYPE_LONG as u8, 0x00]);
        assert_eq!(values, (-42i32).to_le_bytes());

        let (types, values) = encode(12_345_678_901_234u64);
        assert_eq!(types, vec![ColumnType::MYSQL_TYPE_LONGLONG as u8, 0x80]);
        assert_eq!(values, 12_345_678_901_234u64.to_le_bytes());

        let (types, values) = encode(-1i8);
        assert_eq!(types, vec![ColumnType::MYSQL_TYPE_TINY as u8, 0x00]);
        assert_eq!(values, vec![0xFF]);
    }

    #[test]
    fn floats() {
        let (types, values) = encode(3.5f64);
        assert_eq!(types, vec![ColumnType::MYSQL_TYPE_DOUBLE as u8, 0x00]);
        assert_eq!(values, 3.5f64.to_bits().to_le_bytes());

        let (types, _) = encode(1.0f32);
        assert_eq!(types, vec![ColumnType::MYSQL_TYPE_FLOAT as u8, 0x00]);
    }

    #[test]
    fn strings_and_bytes() {
        let (types, values) = encode("Hello, MySQL!");
        assert_eq!(types, vec![ColumnType::MYSQL_TYPE_VAR_STRING as u8, 0x00]);
        assert_eq!(values[0], 13);
        assert_eq!(&values[1..], b"Hello, MySQL!");

        let (types, values) = encode(String::from("Rust"));
        assert_eq!(types, vec![ColumnType::MYSQL_TYPE_VAR_STRING as u8, 0x00]);
        assert_eq!(values, b"\x04Rust");

        let (types, values) = encode(vec![0xDEu8, 0xAD]);
        assert_eq!(types, vec![ColumnType::MYSQL_TYPE_BLOB as u8, 0x00]);
        assert_eq!(values, vec![2, 0xDE, 0xAD]);
    }

    #[test]
    fn option_switches_between_null_and_value_type() {
        let (types, values) = encode(None::<i32>);
        assert_eq!(types, vec![ColumnType::MYSQL_TYPE_NULL as u8, 0x00]);
        assert!(values.is_empty());

        let (types, values) = encode(Some(42i32));
        assert_eq!(types, vec![ColumnType::MYSQL_TYPE_LONG as u8, 0x00]);
        assert_eq!(values, 42i32.to_le_bytes());
    }

    #[test]
    fn bool_is_tiny() {
        let (types, values) = encode(true);
        assert_eq!(types, vec![ColumnType::MYSQL_TYPE_TINY as u8, 0x00]);
        assert_eq!(values, vec![1]);
    }
}
