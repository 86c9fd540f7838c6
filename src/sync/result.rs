use std::fs::File;
use std::io::Read;

use crate::col::ColumnDefinition;
use crate::constant::ServerStatusFlags;
use crate::error::{Error, Result};
use crate::protocol::codec::{RowCodec, RowProtocol};
use crate::protocol::command::{ResultDecoder, ResultEvent, ResultState};
use crate::protocol::response::OkPayload;
use crate::row::Row;
use crate::sync::conn::Conn;

const LOCAL_INFILE_CHUNK: usize = 64 * 1024;

/// Streaming reader over the response of one command
///
/// Rows are decoded straight from the socket. The connection stays borrowed until the
/// stream is consumed or dropped; dropping an unfinished stream drains the remaining
/// packets so the next command starts at a packet boundary.
pub struct ResultStream<'c> {
    conn: &'c mut Conn,
    decoder: ResultDecoder,
    codec: RowCodec,
    columns: Vec<ColumnDefinition>,
    ok: Option<OkPayload>,
    status_flags: ServerStatusFlags,
    warnings: u16,
    infile_error: Option<Error>,
}

impl<'c> ResultStream<'c> {
    /// Read the first response header of a command already sent on `conn`
    pub(crate) fn start(conn: &'c mut Conn, protocol: RowProtocol) -> Result<Self> {
        let decoder = ResultDecoder::new(conn.capabilities(), protocol == RowProtocol::Binary);
        let codec = RowCodec::new(protocol, conn.max_field_size());
        conn.set_active_result(true);
        let mut stream = Self {
            conn,
            decoder,
            codec,
            columns: Vec::new(),
            ok: None,
            status_flags: ServerStatusFlags::empty(),
            warnings: 0,
            infile_error: None,
        };
        stream.read_header()?;
        Ok(stream)
    }

    /// Columns of the current result set; empty when the current result is an OK
    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    pub fn has_result_set(&self) -> bool {
        !self.columns.is_empty()
    }

    /// OK packet of the current result, if it carried one
    pub fn ok_packet(&self) -> Option<&OkPayload> {
        self.ok.as_ref()
    }

    pub fn affected_rows(&self) -> u64 {
        self.ok.as_ref().map_or(0, |ok| ok.affected_rows)
    }

    pub fn last_insert_id(&self) -> u64 {
        self.ok.as_ref().map_or(0, |ok| ok.last_insert_id)
    }

    pub fn warnings(&self) -> u16 {
        self.warnings
    }

    pub fn status_flags(&self) -> ServerStatusFlags {
        self.status_flags
    }

    /// Whether another result follows the current one
    pub fn more_results(&self) -> bool {
        self.decoder.state() == ResultState::AwaitingHeader
    }

    pub fn is_finished(&self) -> bool {
        self.decoder.is_finished()
    }

    /// Decode the next row of the current result set into `row`
    ///
    /// Returns `false` at the end of the result set. `row` is reused across calls.
    pub fn fetch_row(&mut self, row: &mut Row) -> Result<bool> {
        let result = self.advance(Some(row));
        self.conn.guard(result)
    }

    pub fn next_row(&mut self) -> Result<Option<Row>> {
        let mut row = Row::new();
        Ok(self.fetch_row(&mut row)?.then_some(row))
    }

    /// Remaining rows of the current result set
    pub fn collect_rows(&mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row()? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Skip what is left of the current result and move to the next one
    ///
    /// Returns `false` when the command produced no further result.
    pub fn next_result(&mut self) -> Result<bool> {
        self.skip_rows()?;
        if self.decoder.state() != ResultState::AwaitingHeader {
            return Ok(false);
        }
        self.read_header()?;
        Ok(true)
    }

    /// Consume every remaining packet of the response
    pub fn close(mut self) -> Result<()> {
        self.drain()
    }

    fn drain(&mut self) -> Result<()> {
        while self.next_result()? {}
        Ok(())
    }

    fn skip_rows(&mut self) -> Result<()> {
        loop {
            let result = self.advance(None);
            if !self.conn.guard(result)? {
                return Ok(());
            }
        }
    }

    fn read_header(&mut self) -> Result<()> {
        let result = self.read_header_packets();
        self.conn.guard(result)
    }

    fn read_header_packets(&mut self) -> Result<()> {
        self.columns.clear();
        self.ok = None;
        loop {
            let (channel, buf) = self.conn.io()?;
            channel.read_packet_into(buf)?;
            match self.decoder.drive(buf)? {
                ResultEvent::Ok(ok) => {
                    self.conn.apply_ok(&ok);
                    self.status_flags = ok.status_flags;
                    self.warnings = ok.warnings;
                    self.ok = Some(ok);
                    return match self.infile_error.take() {
                        Some(err) => Err(err),
                        None => Ok(()),
                    };
                }
                ResultEvent::LocalInfile(filename) => {
                    let filename = String::from_utf8_lossy(filename).into_owned();
                    self.send_local_infile(&filename)?;
                }
                ResultEvent::ResultSetStart { column_count } => {
                    self.columns.reserve(column_count);
                }
                ResultEvent::Column(bytes) => {
                    self.columns.push(ColumnDefinition::try_from(bytes)?);
                    if self.decoder.expects_row() {
                        return Ok(());
                    }
                }
                ResultEvent::ColumnsEnd => return Ok(()),
                ResultEvent::Row(_) | ResultEvent::ResultSetEnd { .. } => {
                    return Err(Error::from_debug("row data before the result set header"));
                }
            }
        }
    }

    /// Read one packet of the row phase; decode it into `row` when given, skip it otherwise
    fn advance(&mut self, row: Option<&mut Row>) -> Result<bool> {
        if !self.decoder.expects_row() {
            return Ok(false);
        }
        let (channel, buf) = self.conn.io()?;
        let mut reader = channel.begin_payload()?;
        let first = reader.peek_u8()?.ok_or(Error::InvalidPacket)?;

        if self.decoder.is_row_packet(first, reader.first_chunk_len()) {
            match row {
                Some(row) => {
                    row.clear();
                    self.codec.decode(&mut reader, &self.columns, row)?;
                    reader.finish()?;
                }
                None => reader.finish()?,
            }
            return Ok(true);
        }

        reader.read_to_end(buf)?;
        match self.decoder.drive(buf)? {
            ResultEvent::ResultSetEnd {
                status_flags,
                warnings,
                ok,
            } => {
                self.status_flags = status_flags;
                self.warnings = warnings;
                match &ok {
                    Some(ok) => self.conn.apply_ok(ok),
                    None => self.conn.apply_status(status_flags),
                }
                self.ok = ok;
                Ok(false)
            }
            _ => Err(Error::InvalidPacket),
        }
    }

    /// Answer a LOCAL INFILE request: the file content, then an empty packet
    ///
    /// A refused or unreadable file still gets the empty packet so the server answers
    /// with its OK or ERR; the client-side error is reported after that answer.
    fn send_local_infile(&mut self, filename: &str) -> Result<()> {
        let allowed = self.conn.allow_local_infile();
        let (channel, _) = self.conn.io()?;

        if !allowed {
            tracing::warn!(filename, "refused LOCAL INFILE request");
            self.infile_error = Some(Error::BadUsageError(format!(
                "LOCAL INFILE request for '{filename}' refused: allow_local_infile is disabled"
            )));
            return channel.write_packet(&[]);
        }

        tracing::debug!(filename, "sending LOCAL INFILE");
        match File::open(filename) {
            Ok(mut file) => {
                let mut chunk = vec![0_u8; LOCAL_INFILE_CHUNK];
                loop {
                    match file.read(&mut chunk) {
                        Ok(0) => break,
                        Ok(n) => channel.write_packet_unflushed(&chunk[..n])?,
                        Err(err) => {
                            self.infile_error = Some(Error::BadUsageError(format!(
                                "could not read LOCAL INFILE '{filename}': {err}"
                            )));
                            break;
                        }
                    }
                }
            }
            Err(err) => {
                self.infile_error = Some(Error::BadUsageError(format!(
                    "could not open LOCAL INFILE '{filename}': {err}"
                )));
            }
        }
        channel.write_packet(&[])
    }
}

impl Drop for ResultStream<'_> {
    fn drop(&mut self) {
        if !self.decoder.is_finished() && !self.conn.is_broken() {
            tracing::debug!("draining unread result");
            if let Err(err) = self.drain() {
                tracing::warn!(%err, "failed to drain an unread result");
            }
        }
        self.conn.set_active_result(false);
    }
}

impl std::fmt::Debug for ResultStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultStream")
            .field("state", &self.decoder.state())
            .field("columns", &self.columns.len())
            .field("ok", &self.ok)
            .finish()
    }
}
