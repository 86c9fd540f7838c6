use crate::constant::{CapabilityFlags, MAX_PACKET_CHUNK, ServerStatusFlags};
use crate::error::{Error, Result};
use crate::protocol::command::ColumnDefinitionBytes;
use crate::protocol::packet::{ErrPayloadBytes, OkPayloadBytes};
use crate::protocol::response::{OkPayload, Response, read_eof_packet, read_response};

/// Where the decoder is within one command response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultState {
    /// Next packet is OK / ERR / LOCAL INFILE / result set header
    AwaitingHeader,
    ReadingColumns { total: usize, remaining: usize },
    /// All column definitions read; an EOF packet follows (no CLIENT_DEPRECATE_EOF)
    AwaitingColumnsEof,
    ReadingRows,
    Finished,
}

/// Event produced by [`ResultDecoder::drive`]
#[derive(Debug)]
pub enum ResultEvent<'a> {
    /// Statement without a result set completed
    Ok(OkPayload),
    /// Server asks for the contents of this file
    LocalInfile(&'a [u8]),
    ResultSetStart { column_count: usize },
    Column(ColumnDefinitionBytes<'a>),
    /// EOF after the column definitions
    ColumnsEnd,
    /// A row packet, to be handed to the row codec
    Row(&'a [u8]),
    ResultSetEnd {
        status_flags: ServerStatusFlags,
        warnings: u16,
        /// Present when the terminator was an OK packet (CLIENT_DEPRECATE_EOF)
        ok: Option<OkPayload>,
    },
}

/// State machine over the packets of one command response
///
/// Pure parsing without I/O. A server ERR at any point yields `Err(Error::ServerError)`
/// and moves to `Finished`; the caller's connection stays usable.
#[derive(Debug, Clone)]
pub struct ResultDecoder {
    state: ResultState,
    capabilities: CapabilityFlags,
    binary: bool,
}

impl ResultDecoder {
    /// `binary` selects the prepared statement row protocol
    pub fn new(capabilities: CapabilityFlags, binary: bool) -> Self {
        Self {
            state: ResultState::AwaitingHeader,
            capabilities,
            binary,
        }
    }

    pub fn state(&self) -> ResultState {
        self.state
    }

    pub fn is_binary(&self) -> bool {
        self.binary
    }

    pub fn is_finished(&self) -> bool {
        self.state == ResultState::Finished
    }

    /// Whether the next packet may be a row
    pub fn expects_row(&self) -> bool {
        self.state == ResultState::ReadingRows
    }

    fn deprecate_eof(&self) -> bool {
        self.capabilities
            .contains(CapabilityFlags::CLIENT_DEPRECATE_EOF)
    }

    /// Classify a packet in the row phase from its first byte and its first chunk length
    ///
    /// A text row may legitimately start with 0xFE (a column longer than 16 MiB), but then
    /// its first chunk is a full 0xFFFFFF bytes; a terminator never is.
    pub fn is_row_packet(&self, first_byte: u8, first_chunk_len: usize) -> bool {
        if self.binary {
            return first_byte == 0x00;
        }
        match first_byte {
            0xFF => false,
            0xFE => first_chunk_len >= MAX_PACKET_CHUNK,
            _ => true,
        }
    }

    /// Drive the state machine with the next full payload
    pub fn drive<'a>(&mut self, payload: &'a [u8]) -> Result<ResultEvent<'a>> {
        match self.state {
            ResultState::AwaitingHeader => self.drive_header(payload),

            ResultState::ReadingColumns { total, remaining } => {
                if payload.first() == Some(&0xFF) {
                    return self.fail(payload);
                }
                let remaining = remaining - 1;
                self.state = if remaining > 0 {
                    ResultState::ReadingColumns { total, remaining }
                } else if self.deprecate_eof() {
                    ResultState::ReadingRows
                } else {
                    ResultState::AwaitingColumnsEof
                };
                Ok(ResultEvent::Column(ColumnDefinitionBytes(payload)))
            }

            ResultState::AwaitingColumnsEof => match payload.first() {
                Some(0xFE) => {
                    self.state = ResultState::ReadingRows;
                    Ok(ResultEvent::ColumnsEnd)
                }
                Some(0xFF) => self.fail(payload),
                _ => Err(Error::InvalidPacket),
            },

            ResultState::ReadingRows => {
                let first = *payload.first().ok_or(Error::InvalidPacket)?;
                if self.is_row_packet(first, payload.len()) {
                    return Ok(ResultEvent::Row(payload));
                }
                match first {
                    0xFF => self.fail(payload),
                    0xFE => self.end_result_set(payload),
                    _ => Err(Error::InvalidPacket),
                }
            }

            ResultState::Finished => Err(Error::from_debug(
                "ResultDecoder driven after the response finished",
            )),
        }
    }

    fn drive_header<'a>(&mut self, payload: &'a [u8]) -> Result<ResultEvent<'a>> {
        match read_response(payload)? {
            Response::Ok(bytes) => {
                let ok = OkPayload::parse(bytes, self.capabilities)?;
                self.state = next_after(ok.status_flags);
                Ok(ResultEvent::Ok(ok))
            }
            Response::Err(bytes) => {
                self.state = ResultState::Finished;
                Err(bytes.into())
            }
            Response::LocalInfile(filename) => Ok(ResultEvent::LocalInfile(filename)),
            Response::Eof(_) => Err(Error::InvalidPacket),
            Response::ResultSetHeader { column_count } => {
                let column_count =
                    usize::try_from(column_count).map_err(|_| Error::InvalidPacket)?;
                self.state = ResultState::ReadingColumns {
                    total: column_count,
                    remaining: column_count,
                };
                Ok(ResultEvent::ResultSetStart { column_count })
            }
        }
    }

    fn end_result_set<'a>(&mut self, payload: &'a [u8]) -> Result<ResultEvent<'a>> {
        let (status_flags, warnings, ok) = if self.deprecate_eof() {
            let ok = OkPayload::parse(OkPayloadBytes(payload), self.capabilities)?;
            (ok.status_flags, ok.warnings, Some(ok))
        } else {
            let eof = read_eof_packet(payload)?;
            (eof.status_flags(), eof.warnings(), None)
        };
        self.state = next_after(status_flags);
        Ok(ResultEvent::ResultSetEnd {
            status_flags,
            warnings,
            ok,
        })
    }

    fn fail<T>(&mut self, payload: &[u8]) -> Result<T> {
        self.state = ResultState::Finished;
        Err(ErrPayloadBytes(payload).into())
    }
}

fn next_after(status_flags: ServerStatusFlags) -> ResultState {
    if status_flags.contains(ServerStatusFlags::SERVER_MORE_RESULTS_EXISTS) {
        ResultState::AwaitingHeader
    } else {
        ResultState::Finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::col::ColumnDefinition;
    use crate::constant::ColumnType;
    use crate::protocol::command::write_column_definition;
    use crate::protocol::response::{ErrPayload, write_eof_packet, write_err_packet, write_ok_packet};

    fn column(name: &str) -> Vec<u8> {
        let mut out = Vec::new();
        write_column_definition(&mut out, &ColumnDefinition::new(name, ColumnType::MYSQL_TYPE_LONG));
        out
    }

    fn eof(status: ServerStatusFlags) -> Vec<u8> {
        let mut out = Vec::new();
        write_eof_packet(&mut out, 0, status);
        out
    }

    #[test]
    fn ok_without_result_set() {
        let mut decoder = ResultDecoder::new(CapabilityFlags::empty(), false);
        let mut payload = Vec::new();
        write_ok_packet(
            &mut payload,
            0x00,
            &OkPayload {
                affected_rows: 3,
                ..OkPayload::default()
            },
        );
        match decoder.drive(&payload).unwrap() {
            ResultEvent::Ok(ok) => assert_eq!(ok.affected_rows, 3),
            other => panic!("unexpected {other:?}"),
        }
        assert!(decoder.is_finished());
    }

    #[test]
    fn text_result_set_with_eof() {
        let mut decoder = ResultDecoder::new(CapabilityFlags::empty(), false);
        assert!(matches!(
            decoder.drive(&[0x01]).unwrap(),
            ResultEvent::ResultSetStart { column_count: 1 }
        ));
        let col = column("1");
        assert!(matches!(decoder.drive(&col).unwrap(), ResultEvent::Column(_)));
        assert_eq!(decoder.state(), ResultState::AwaitingColumnsEof);
        let columns_eof = eof(ServerStatusFlags::empty());
        assert!(matches!(
            decoder.drive(&columns_eof).unwrap(),
            ResultEvent::ColumnsEnd
        ));
        assert!(decoder.expects_row());
        match decoder.drive(b"\x011").unwrap() {
            ResultEvent::Row(row) => assert_eq!(row, b"\x011"),
            other => panic!("unexpected {other:?}"),
        }
        let end = eof(ServerStatusFlags::SERVER_STATUS_AUTOCOMMIT);
        assert!(matches!(
            decoder.drive(&end).unwrap(),
            ResultEvent::ResultSetEnd { ok: None, .. }
        ));
        assert!(decoder.is_finished());
        assert!(decoder.drive(&end).is_err());
    }

    #[test]
    fn deprecate_eof_skips_column_eof_and_ends_with_ok() {
        let caps = CapabilityFlags::CLIENT_DEPRECATE_EOF;
        let mut decoder = ResultDecoder::new(caps, true);
        decoder.drive(&[0x01]).unwrap();
        let col = column("id");
        decoder.drive(&col).unwrap();
        assert!(decoder.expects_row());

        assert!(matches!(
            decoder.drive(&[0x00, 0x00, 7, 0, 0, 0]).unwrap(),
            ResultEvent::Row(_)
        ));

        let mut terminator = Vec::new();
        write_ok_packet(&mut terminator, 0xFE, &OkPayload::default());
        assert!(matches!(
            decoder.drive(&terminator).unwrap(),
            ResultEvent::ResultSetEnd { ok: Some(_), .. }
        ));
        assert!(decoder.is_finished());
    }

    #[test]
    fn more_results_reenters_header_state() {
        let mut decoder = ResultDecoder::new(CapabilityFlags::empty(), false);
        decoder.drive(&[0x01]).unwrap();
        let col = column("a");
        decoder.drive(&col).unwrap();
        decoder.drive(&eof(ServerStatusFlags::empty())).unwrap();
        decoder
            .drive(&eof(ServerStatusFlags::SERVER_MORE_RESULTS_EXISTS))
            .unwrap();
        assert_eq!(decoder.state(), ResultState::AwaitingHeader);

        let mut ok = Vec::new();
        write_ok_packet(&mut ok, 0x00, &OkPayload::default());
        assert!(matches!(decoder.drive(&ok).unwrap(), ResultEvent::Ok(_)));
        assert!(decoder.is_finished());
    }

    #[test]
    fn error_mid_rows_finishes() {
        let mut decoder = ResultDecoder::new(CapabilityFlags::CLIENT_DEPRECATE_EOF, false);
        decoder.drive(&[0x01]).unwrap();
        let col = column("a");
        decoder.drive(&col).unwrap();

        let mut err = Vec::new();
        write_err_packet(
            &mut err,
            &ErrPayload {
                error_code: 1317,
                sql_state: "70100".to_string(),
                message: "Query execution was interrupted".to_string(),
            },
        );
        let error = decoder.drive(&err).unwrap_err();
        assert_eq!(error.error_code(), 1317);
        assert!(!error.is_fatal());
        assert!(decoder.is_finished());
    }

    #[test]
    fn local_infile_keeps_awaiting_header() {
        let mut decoder = ResultDecoder::new(CapabilityFlags::empty(), false);
        match decoder.drive(b"\xFBdata.csv").unwrap() {
            ResultEvent::LocalInfile(name) => assert_eq!(name, b"data.csv"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(decoder.state(), ResultState::AwaitingHeader);
    }

    #[test]
    fn row_classification() {
        let text = ResultDecoder::new(CapabilityFlags::empty(), false);
        assert!(text.is_row_packet(0x01, 2));
        assert!(text.is_row_packet(0xFB, 1));
        assert!(!text.is_row_packet(0xFE, 5));
        assert!(text.is_row_packet(0xFE, MAX_PACKET_CHUNK));
        assert!(!text.is_row_packet(0xFF, 10));

        let binary = ResultDecoder::new(CapabilityFlags::empty(), true);
        assert!(binary.is_row_packet(0x00, 3));
        assert!(!binary.is_row_packet(0xFE, 7));
    }
}
