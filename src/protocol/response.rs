use crate::constant::{CapabilityFlags, SESSION_TRACK_SCHEMA, ServerStatusFlags};
use crate::error::{Error, Result};
use crate::protocol::packet::{ErrPayloadBytes, OkPayloadBytes};
use crate::protocol::primitive::*;
use zerocopy::byteorder::little_endian::U16 as U16LE;
use zerocopy::{FromBytes, Immutable, KnownLayout};

/// A server response classified by its leading byte
///
/// Produced once at the boundary; every consumer matches exhaustively.
#[derive(Debug)]
pub enum Response<'a> {
    Ok(OkPayloadBytes<'a>),
    Err(ErrPayloadBytes<'a>),
    Eof(&'a EofPacket),
    /// `0xFB` followed by the file name requested by `LOAD DATA LOCAL INFILE`
    LocalInfile(&'a [u8]),
    ResultSetHeader { column_count: u64 },
}

/// Classify the first packet of a command response
pub fn read_response(payload: &[u8]) -> Result<Response<'_>> {
    match payload.first() {
        None => Err(Error::InvalidPacket),
        Some(0x00) => Ok(Response::Ok(OkPayloadBytes(payload))),
        Some(0xFF) => Ok(Response::Err(ErrPayloadBytes(payload))),
        Some(0xFB) => Ok(Response::LocalInfile(&payload[1..])),
        Some(0xFE) if payload.len() < 9 => Ok(Response::Eof(read_eof_packet(payload)?)),
        Some(_) => {
            let (column_count, _rest) = read_int_lenenc(payload)?;
            if column_count == 0 {
                return Err(Error::InvalidPacket);
            }
            Ok(Response::ResultSetHeader { column_count })
        }
    }
}

/// OK packet response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OkPayload {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: ServerStatusFlags,
    pub warnings: u16,
    pub info: String,
    /// New default schema reported through session tracking
    pub schema_changed: Option<String>,
}

impl OkPayload {
    /// Parse an OK packet (header `0x00`, or `0xFE` when it terminates rows)
    pub fn parse(bytes: OkPayloadBytes<'_>, capabilities: CapabilityFlags) -> Result<Self> {
        let (header, data) = read_int_1(bytes.bytes())?;
        if header != 0x00 && header != 0xFE {
            return Err(Error::InvalidPacket);
        }

        let (affected_rows, rest) = read_int_lenenc(data)?;
        let (last_insert_id, rest) = read_int_lenenc(rest)?;
        let (status_flags, rest) = read_int_2(rest)?;
        let (warnings, rest) = read_int_2(rest)?;
        let status_flags = ServerStatusFlags::from_bits_truncate(status_flags);

        let mut info = String::new();
        let mut schema_changed = None;
        if capabilities.contains(CapabilityFlags::CLIENT_SESSION_TRACK) {
            if !rest.is_empty() {
                let (message, rest) = read_string_lenenc(rest)?;
                info = String::from_utf8_lossy(message).into_owned();
                if status_flags.contains(ServerStatusFlags::SERVER_SESSION_STATE_CHANGED)
                    && !rest.is_empty()
                {
                    let (state, _rest) = read_string_lenenc(rest)?;
                    schema_changed = read_schema_change(state)?;
                }
            }
        } else {
            info = String::from_utf8_lossy(rest).into_owned();
        }

        Ok(OkPayload {
            affected_rows,
            last_insert_id,
            status_flags,
            warnings,
            info,
            schema_changed,
        })
    }
}

/// Walk session-state entries and return the last schema change, if any
fn read_schema_change(mut data: &[u8]) -> Result<Option<String>> {
    let mut schema = None;
    while !data.is_empty() {
        let (kind, rest) = read_int_1(data)?;
        let (entry, rest) = read_string_lenenc(rest)?;
        data = rest;
        if kind == SESSION_TRACK_SCHEMA {
            let (name, _) = read_string_lenenc(entry)?;
            schema = Some(String::from_utf8_lossy(name).into_owned());
        }
    }
    Ok(schema)
}

/// ERR packet response
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("ERROR {} ({}): {}", self.error_code, self.sql_state, self.message)]
pub struct ErrPayload {
    pub error_code: u16,
    pub sql_state: String,
    pub message: String,
}

impl TryFrom<ErrPayloadBytes<'_>> for ErrPayload {
    type Error = Error;

    fn try_from(bytes: ErrPayloadBytes<'_>) -> Result<Self> {
        let (header, data) = read_int_1(bytes.0)?;
        if header != 0xFF {
            return Err(Error::InvalidPacket);
        }

        let (error_code, data) = read_int_2(data)?;

        let (sql_state, rest) = match data.split_first() {
            Some((b'#', rest)) => {
                let (state_bytes, rest) = read_string_fix(rest, 5)?;
                (String::from_utf8_lossy(state_bytes).into_owned(), rest)
            }
            _ => (String::new(), data),
        };

        Ok(ErrPayload {
            error_code,
            sql_state,
            message: String::from_utf8_lossy(rest).into_owned(),
        })
    }
}

/// EOF packet response (zero-copy)
///
/// Layout matches MySQL wire protocol after header byte 0xFE:
/// - warnings: 2 bytes (little-endian)
/// - status_flags: 2 bytes (little-endian)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct EofPacket {
    pub warnings: U16LE,
    pub status_flags: U16LE,
}

impl EofPacket {
    pub fn warnings(&self) -> u16 {
        self.warnings.get()
    }

    pub fn status_flags(&self) -> ServerStatusFlags {
        ServerStatusFlags::from_bits_truncate(self.status_flags.get())
    }
}

/// Read EOF packet (header byte 0xFE, length < 9) - zero-copy
pub fn read_eof_packet(payload: &[u8]) -> Result<&EofPacket> {
    let (header, data) = read_int_1(payload)?;
    if header != 0xFE {
        return Err(Error::InvalidPacket);
    }
    let (eof, _rest) = EofPacket::ref_from_prefix(data).map_err(|_| Error::UnexpectedEof)?;
    Ok(eof)
}

/// Write an OK packet with the given header byte (`0x00`, or `0xFE` as a row terminator)
///
/// `info` is written raw, which is what a client without session tracking expects.
pub fn write_ok_packet(out: &mut Vec<u8>, header: u8, ok: &OkPayload) {
    write_int_1(out, header);
    write_int_lenenc(out, ok.affected_rows);
    write_int_lenenc(out, ok.last_insert_id);
    write_int_2(out, ok.status_flags.bits());
    write_int_2(out, ok.warnings);
    out.extend_from_slice(ok.info.as_bytes());
}

pub fn write_err_packet(out: &mut Vec<u8>, err: &ErrPayload) {
    write_int_1(out, 0xFF);
    write_int_2(out, err.error_code);
    if !err.sql_state.is_empty() {
        out.push(b'#');
        out.extend_from_slice(err.sql_state.as_bytes());
    }
    out.extend_from_slice(err.message.as_bytes());
}

pub fn write_eof_packet(out: &mut Vec<u8>, warnings: u16, status_flags: ServerStatusFlags) {
    write_int_1(out, 0xFE);
    write_int_2(out, warnings);
    write_int_2(out, status_flags.bits());
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn ok_packet_without_session_track() {
        let payload = [0x00, 0x02, 0x05, 0x02, 0x00, 0x01, 0x00, b'h', b'i'];
        let ok = OkPayload::parse(OkPayloadBytes(&payload), CapabilityFlags::empty()).unwrap();
        assert_eq!(ok.affected_rows, 2);
        assert_eq!(ok.last_insert_id, 5);
        assert!(ok.status_flags.contains(ServerStatusFlags::SERVER_STATUS_AUTOCOMMIT));
        assert_eq!(ok.warnings, 1);
        assert_eq!(ok.info, "hi");
        assert_eq!(ok.schema_changed, None);
    }

    #[test]
    fn ok_packet_with_schema_change() {
        let mut payload = vec![0x00, 0x00, 0x00];
        let status = ServerStatusFlags::SERVER_STATUS_AUTOCOMMIT
            | ServerStatusFlags::SERVER_SESSION_STATE_CHANGED;
        write_int_2(&mut payload, status.bits());
        write_int_2(&mut payload, 0);
        write_string_lenenc(&mut payload, "");

        let mut entry = Vec::new();
        write_string_lenenc(&mut entry, "shop");
        let mut state = vec![SESSION_TRACK_SCHEMA];
        write_bytes_lenenc(&mut state, &entry);
        write_bytes_lenenc(&mut payload, &state);

        let ok = OkPayload::parse(
            OkPayloadBytes(&payload),
            CapabilityFlags::CLIENT_SESSION_TRACK,
        )
        .unwrap();
        assert_eq!(ok.schema_changed.as_deref(), Some("shop"));
    }

    #[test]
    fn err_packet_with_sql_state() {
        let mut payload = vec![0xFF];
        write_int_2(&mut payload, 1146);
        payload.extend_from_slice(b"#42S02Table 'x' doesn't exist");

        let err = ErrPayload::try_from(ErrPayloadBytes(&payload)).unwrap();
        assert_eq!(
            err,
            ErrPayload {
                error_code: 1146,
                sql_state: "42S02".to_string(),
                message: "Table 'x' doesn't exist".to_string(),
            }
        );
        assert_eq!(
            err.to_string(),
            "ERROR 1146 (42S02): Table 'x' doesn't exist"
        );
    }

    #[test]
    fn err_packet_without_sql_state() {
        let mut payload = vec![0xFF];
        write_int_2(&mut payload, 1040);
        payload.extend_from_slice(b"Too many connections");

        let err = ErrPayload::try_from(ErrPayloadBytes(&payload)).unwrap();
        assert_eq!(err.sql_state, "");
        assert_eq!(err.message, "Too many connections");
    }

    #[test]
    fn response_dispatch() {
        assert!(matches!(
            read_response(&[0x00, 0, 0, 2, 0, 0, 0]).unwrap(),
            Response::Ok(_)
        ));
        assert!(matches!(
            read_response(&[0xFF, 0x7A, 0x04]).unwrap(),
            Response::Err(_)
        ));
        assert!(matches!(
            read_response(&[0xFE, 0, 0, 2, 0]).unwrap(),
            Response::Eof(_)
        ));
        match read_response(b"\xFB/tmp/data.csv").unwrap() {
            Response::LocalInfile(name) => assert_eq!(name, b"/tmp/data.csv"),
            other => panic!("unexpected {other:?}"),
        }
        match read_response(&[0x03]).unwrap() {
            Response::ResultSetHeader { column_count } => assert_eq!(column_count, 3),
            other => panic!("unexpected {other:?}"),
        }
        assert!(read_response(&[]).is_err());
    }

    #[test]
    fn writers_match_readers() {
        let ok = OkPayload {
            affected_rows: 300,
            last_insert_id: 9,
            status_flags: ServerStatusFlags::SERVER_STATUS_IN_TRANS,
            warnings: 2,
            ..OkPayload::default()
        };
        let mut out = Vec::new();
        write_ok_packet(&mut out, 0xFE, &ok);
        assert_eq!(
            OkPayload::parse(OkPayloadBytes(&out), CapabilityFlags::CLIENT_SESSION_TRACK).unwrap(),
            ok
        );

        let err = ErrPayload {
            error_code: 1064,
            sql_state: "42000".to_string(),
            message: "syntax".to_string(),
        };
        out.clear();
        write_err_packet(&mut out, &err);
        assert_eq!(ErrPayload::try_from(ErrPayloadBytes(&out)).unwrap(), err);

        out.clear();
        write_eof_packet(&mut out, 0, ServerStatusFlags::SERVER_STATUS_AUTOCOMMIT);
        assert_eq!(out, vec![0xFE, 0, 0, 2, 0]);
    }

    #[test]
    fn eof_packet_fields() {
        let eof = read_eof_packet(&[0xFE, 0x01, 0x00, 0x0A, 0x00]).unwrap();
        assert_eq!(eof.warnings(), 1);
        assert!(
            eof.status_flags()
                .contains(ServerStatusFlags::SERVER_MORE_RESULTS_EXISTS)
        );
    }
}
