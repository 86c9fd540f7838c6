use crate::constant::{ColumnType, CommandByte};
use crate::error::{Error, Result};
use crate::protocol::primitive::*;
use crate::protocol::r#trait::param::ParamType;
use crate::protocol::r#trait::params::Params;
use zerocopy::byteorder::little_endian::{U16 as U16LE, U32 as U32LE};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Prepared statement OK response (zero-copy)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, IntoBytes)]
pub struct PrepareOk {
    statement_id: U32LE,
    num_columns: U16LE,
    num_params: U16LE,
    _reserved: u8,
    warning_count: U16LE,
}

impl PrepareOk {
    pub const SIZE: usize = 11;

    pub fn new(statement_id: u32, num_columns: u16, num_params: u16) -> Self {
        Self {
            statement_id: U32LE::new(statement_id),
            num_columns: U16LE::new(num_columns),
            num_params: U16LE::new(num_params),
            _reserved: 0,
            warning_count: U16LE::new(0),
        }
    }

    pub fn statement_id(&self) -> u32 {
        self.statement_id.get()
    }

    /// Number of result columns
    pub fn num_columns(&self) -> u16 {
        self.num_columns.get()
    }

    pub fn num_params(&self) -> u16 {
        self.num_params.get()
    }

    pub fn warning_count(&self) -> u16 {
        self.warning_count.get()
    }
}

/// Write COM_STMT_PREPARE command
pub fn write_prepare(out: &mut Vec<u8>, sql: &str) {
    write_int_1(out, CommandByte::StmtPrepare as u8);
    out.extend_from_slice(sql.as_bytes());
}

/// Read COM_STMT_PREPARE_OK
///
/// Some servers omit the trailing warning count; the short form is accepted.
pub fn read_prepare_ok(payload: &[u8]) -> Result<PrepareOk> {
    let (status, data) = read_int_1(payload)?;
    if status != 0x00 {
        return Err(Error::InvalidPacket);
    }
    let mut fixed = [0u8; PrepareOk::SIZE];
    let n = data.len().min(PrepareOk::SIZE);
    if n < 9 {
        return Err(Error::UnexpectedEof);
    }
    fixed[..n].copy_from_slice(&data[..n]);
    PrepareOk::read_from_bytes(&fixed).map_err(|_| Error::InvalidPacket)
}

/// Write the COM_STMT_PREPARE_OK payload (scripted servers and tests)
pub fn write_prepare_ok(out: &mut Vec<u8>, prepare_ok: &PrepareOk) {
    write_int_1(out, 0x00);
    out.extend_from_slice(prepare_ok.as_bytes());
}

/// Write COM_STMT_EXECUTE command
///
/// Layout after the 4-byte statement id: cursor flags, iteration count (always 1),
/// then for a non-empty parameter list the NULL bitmap, the new-params-bound flag,
/// the type header when `send_types` is set, and the non-NULL values.
pub fn write_execute<P: Params>(
    out: &mut Vec<u8>,
    statement_id: u32,
    params: &P,
    send_types: bool,
) -> Result<()> {
    write_int_1(out, CommandByte::StmtExecute as u8);
    write_int_4(out, statement_id);

    // CURSOR_TYPE_NO_CURSOR
    write_int_1(out, 0x00);
    write_int_4(out, 1);

    if params.is_empty() {
        return Ok(());
    }

    params.write_null_bitmap(out);
    if send_types {
        write_int_1(out, 0x01);
        for param_type in params.param_types() {
            param_type.encode(out);
        }
    } else {
        write_int_1(out, 0x00);
    }
    params.write_values(out)
}

/// Decoded COM_STMT_EXECUTE request (scripted servers and tests)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteRequest {
    pub statement_id: u32,
    pub null_bitmap: Vec<u8>,
    /// `None` when the client elided the type header
    pub param_types: Option<Vec<ParamType>>,
    pub values: Vec<u8>,
}

/// Parse a COM_STMT_EXECUTE payload for a statement with `num_params` placeholders
pub fn read_execute(payload: &[u8], num_params: usize) -> Result<ExecuteRequest> {
    let (command, rest) = read_int_1(payload)?;
    if command != CommandByte::StmtExecute as u8 {
        return Err(Error::InvalidPacket);
    }
    let (statement_id, rest) = read_int_4(rest)?;
    let (_flags, rest) = read_int_1(rest)?;
    let (_iterations, rest) = read_int_4(rest)?;
    if num_params == 0 {
        return Ok(ExecuteRequest {
            statement_id,
            null_bitmap: Vec::new(),
            param_types: None,
            values: rest.to_vec(),
        });
    }

    let (null_bitmap, rest) = read_string_fix(rest, num_params.div_ceil(8))?;
    let (bound, mut rest) = read_int_1(rest)?;
    let param_types = if bound == 0x01 {
        let mut types = Vec::with_capacity(num_params);
        for _ in 0..num_params {
            let (type_byte, r) = read_int_1(rest)?;
            let (flag, r) = read_int_1(r)?;
            rest = r;
            let column_type =
                ColumnType::from_u8(type_byte).ok_or(Error::InvalidPacket)?;
            types.push(ParamType {
                column_type,
                unsigned: flag & 0x80 != 0,
            });
        }
        Some(types)
    } else {
        None
    };

    Ok(ExecuteRequest {
        statement_id,
        null_bitmap: null_bitmap.to_vec(),
        param_types,
        values: rest.to_vec(),
    })
}

/// Write COM_STMT_CLOSE command (the server sends no reply)
pub fn write_close_statement(out: &mut Vec<u8>, statement_id: u32) {
    write_int_1(out, CommandByte::StmtClose as u8);
    write_int_4(out, statement_id);
}

/// Write COM_STMT_RESET command
pub fn write_reset_statement(out: &mut Vec<u8>, statement_id: u32) {
    write_int_1(out, CommandByte::StmtReset as u8);
    write_int_4(out, statement_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn prepare_ok_round_trip() {
        let mut out = Vec::new();
        write_prepare_ok(&mut out, &PrepareOk::new(7, 2, 3));
        assert_eq!(out.len(), 12);
        let ok = read_prepare_ok(&out).unwrap();
        assert_eq!(ok.statement_id(), 7);
        assert_eq!(ok.num_columns(), 2);
        assert_eq!(ok.num_params(), 3);
        assert_eq!(ok.warning_count(), 0);
    }

    #[test]
    fn prepare_ok_without_warning_count() {
        let payload = [0x00, 1, 0, 0, 0, 0, 0, 1, 0, 0];
        let ok = read_prepare_ok(&payload).unwrap();
        assert_eq!(ok.statement_id(), 1);
        assert_eq!(ok.num_params(), 1);

        assert!(read_prepare_ok(&[0x00, 1, 0]).is_err());
        assert!(read_prepare_ok(&[0xFF, 0, 0]).is_err());
    }

    #[test]
    fn execute_without_params() {
        let mut out = Vec::new();
        write_execute(&mut out, 5, &(), true).unwrap();
        assert_eq!(out, vec![0x17, 5, 0, 0, 0, 0x00, 1, 0, 0, 0]);
    }

    #[test]
    fn execute_with_type_header() {
        let mut out = Vec::new();
        write_execute(&mut out, 1, &(42i32, None::<&str>), true).unwrap();
        let request = read_execute(&out, 2).unwrap();
        assert_eq!(request.statement_id, 1);
        assert_eq!(request.null_bitmap, vec![0b10]);
        assert_eq!(
            request.param_types,
            Some(vec![
                ParamType::signed(ColumnType::MYSQL_TYPE_LONG),
                ParamType::NULL,
            ])
        );
        assert_eq!(request.values, 42i32.to_le_bytes());
    }

    #[test]
    fn execute_eliding_type_header() {
        let mut out = Vec::new();
        write_execute(&mut out, 1, &(42i32,), false).unwrap();
        // header(10) + bitmap(1) + bound flag(1) + value(4)
        assert_eq!(out.len(), 16);
        assert_eq!(out[11], 0x00);
        let request = read_execute(&out, 1).unwrap();
        assert_eq!(request.param_types, None);
        assert_eq!(request.values, 42i32.to_le_bytes());
    }

    #[test]
    fn close_and_reset() {
        let mut out = Vec::new();
        write_close_statement(&mut out, 0x0102_0304);
        assert_eq!(out, vec![0x19, 4, 3, 2, 1]);
        out.clear();
        write_reset_statement(&mut out, 1);
        assert_eq!(out, vec![0x1a, 1, 0, 0, 0]);
    }
}
