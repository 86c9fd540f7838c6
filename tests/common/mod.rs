//! Scripted in-memory server for integration tests
//!
//! The server end of a `UnixStream` pair runs in its own thread and replays
//! pre-built packets built with the crate's own writers.

#![allow(dead_code)]

use std::os::unix::net::UnixStream;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mariadb_wire::col::ColumnDefinition;
use mariadb_wire::constant::{CapabilityFlags, ColumnType, ServerStatusFlags, UTF8MB4_GENERAL_CI};
use mariadb_wire::protocol::codec::{write_binary_row, write_text_row};
use mariadb_wire::protocol::command::prepared::{PrepareOk, write_prepare_ok};
use mariadb_wire::protocol::command::write_column_definition;
use mariadb_wire::protocol::connection::{InitialHandshake, write_initial_handshake};
use mariadb_wire::protocol::primitive::write_int_lenenc;
use mariadb_wire::protocol::response::{
    ErrPayload, OkPayload, write_eof_packet, write_err_packet, write_ok_packet,
};
use mariadb_wire::sync::{PacketChannel, Stream};
use mariadb_wire::{Opts, Result};

pub const SESSION_VARIABLES_QUERY: &str = "SELECT @@max_allowed_packet, @@wait_timeout";
pub const MAX_ALLOWED_PACKET: &str = "16777216";
pub const WAIT_TIMEOUT: &str = "28800";

/// Everything a MariaDB server would advertise, minus TLS and compression
pub fn default_server_capabilities() -> CapabilityFlags {
    CapabilityFlags::all() - CapabilityFlags::CLIENT_SSL - CapabilityFlags::CLIENT_COMPRESS
}

pub fn test_opts() -> Opts {
    Opts {
        user: "app".to_string(),
        password: "secret".to_string(),
        ..Opts::default()
    }
}

/// Route the crate's tracing output to the test harness; shown with `--nocapture`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}

/// Start a scripted server; the returned stream is the client end
pub fn start<T, F>(advertised: CapabilityFlags, script: F) -> (Stream, JoinHandle<Result<T>>)
where
    T: Send + 'static,
    F: FnOnce(&mut Server) -> Result<T> + Send + 'static,
{
    init_tracing();
    let (client, server) = UnixStream::pair().expect("socket pair");
    server
        .set_read_timeout(Some(Duration::from_secs(10)))
        .expect("server read timeout");
    let handle = thread::spawn(move || {
        let mut server = Server::handshake(server, advertised)?;
        script(&mut server)
    });
    (Stream::unix(client), handle)
}

pub fn join<T>(handle: JoinHandle<Result<T>>) -> T {
    handle
        .join()
        .expect("server thread panicked")
        .expect("server script failed")
}

pub struct Server {
    channel: PacketChannel<UnixStream>,
    /// Capabilities both sides agreed on
    pub capabilities: CapabilityFlags,
    /// Payload of the client's HandshakeResponse41
    pub handshake_response: Vec<u8>,
    buf: Vec<u8>,
}

impl Server {
    fn handshake(stream: UnixStream, advertised: CapabilityFlags) -> Result<Self> {
        let mut channel = PacketChannel::new(stream);
        let mut out = Vec::new();
        write_initial_handshake(
            &mut out,
            &InitialHandshake {
                protocol_version: 10,
                server_version: "5.5.5-11.4.2-MariaDB-log".to_string(),
                connection_id: 42,
                auth_plugin_data: b"0123456789abcdefghij".to_vec(),
                capability_flags: advertised,
                charset: UTF8MB4_GENERAL_CI,
                status_flags: ServerStatusFlags::SERVER_STATUS_AUTOCOMMIT,
                auth_plugin_name: "mysql_native_password".to_string(),
            },
        );
        channel.write_packet(&out)?;

        let mut handshake_response = Vec::new();
        channel.read_packet_into(&mut handshake_response)?;
        let client_flags = u32::from_le_bytes([
            handshake_response[0],
            handshake_response[1],
            handshake_response[2],
            handshake_response[3],
        ]);
        let capabilities = CapabilityFlags::from_bits_truncate(client_flags) & advertised;

        out.clear();
        write_ok_packet(&mut out, 0x00, &OkPayload::default());
        channel.write_packet(&out)?;

        if capabilities.contains(CapabilityFlags::CLIENT_COMPRESS) {
            channel = channel.enable_compression();
        }
        Ok(Self {
            channel,
            capabilities,
            handshake_response,
            buf: Vec::new(),
        })
    }

    pub fn is_compressed(&self) -> bool {
        self.channel.is_compressed()
    }

    fn deprecate_eof(&self) -> bool {
        self.capabilities
            .contains(CapabilityFlags::CLIENT_DEPRECATE_EOF)
    }

    /// Next client packet
    pub fn read(&mut self) -> Result<Vec<u8>> {
        self.channel.read_packet_into(&mut self.buf)?;
        Ok(self.buf.clone())
    }

    /// Next client packet, which must be a COM_QUERY
    pub fn read_query(&mut self) -> Result<String> {
        let payload = self.read()?;
        assert_eq!(payload.first(), Some(&0x03), "expected COM_QUERY, got {payload:?}");
        Ok(String::from_utf8(payload[1..].to_vec()).expect("query is UTF-8"))
    }

    pub fn expect_query(&mut self, sql: &str) -> Result<()> {
        let query = self.read_query()?;
        assert_eq!(query, sql);
        Ok(())
    }

    /// Answer the post-authentication setup; returns the statements received
    pub fn accept_setup(&mut self) -> Result<Vec<String>> {
        let mut received = Vec::new();
        loop {
            let sql = self.read_query()?;
            received.push(sql.clone());
            if sql == SESSION_VARIABLES_QUERY {
                self.send_session_variables()?;
                return Ok(received);
            }
            self.send_ok(&OkPayload::default())?;
        }
    }

    pub fn send_session_variables(&mut self) -> Result<()> {
        let columns = [
            ColumnDefinition::new("@@max_allowed_packet", ColumnType::MYSQL_TYPE_LONGLONG),
            ColumnDefinition::new("@@wait_timeout", ColumnType::MYSQL_TYPE_LONGLONG),
        ];
        self.send_text_result(
            &columns,
            &[vec![
                Some(MAX_ALLOWED_PACKET.as_bytes()),
                Some(WAIT_TIMEOUT.as_bytes()),
            ]],
        )
    }

    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.channel.write_packet(payload)
    }

    pub fn send_ok(&mut self, ok: &OkPayload) -> Result<()> {
        let mut out = Vec::new();
        write_ok_packet(&mut out, 0x00, ok);
        self.send(&out)
    }

    pub fn send_err(&mut self, error_code: u16, sql_state: &str, message: &str) -> Result<()> {
        let mut out = Vec::new();
        write_err_packet(
            &mut out,
            &ErrPayload {
                error_code,
                sql_state: sql_state.to_string(),
                message: message.to_string(),
            },
        );
        self.send(&out)
    }

    /// Column count, column definitions and the EOF that may follow them
    pub fn send_columns(&mut self, columns: &[ColumnDefinition]) -> Result<()> {
        let mut out = Vec::new();
        write_int_lenenc(&mut out, columns.len() as u64);
        self.send(&out)?;
        self.send_definitions(columns)
    }

    /// Definitions of a prepare response or a result set, with their EOF if any
    pub fn send_definitions(&mut self, columns: &[ColumnDefinition]) -> Result<()> {
        let mut out = Vec::new();
        for column in columns {
            out.clear();
            write_column_definition(&mut out, column);
            self.send(&out)?;
        }
        if !columns.is_empty() && !self.deprecate_eof() {
            out.clear();
            write_eof_packet(&mut out, 0, ServerStatusFlags::SERVER_STATUS_AUTOCOMMIT);
            self.send(&out)?;
        }
        Ok(())
    }

    /// EOF, or an OK with header 0xFE when EOF is deprecated
    pub fn send_terminator(&mut self, status_flags: ServerStatusFlags) -> Result<()> {
        let mut out = Vec::new();
        if self.deprecate_eof() {
            write_ok_packet(
                &mut out,
                0xFE,
                &OkPayload {
                    status_flags,
                    ..OkPayload::default()
                },
            );
        } else {
            write_eof_packet(&mut out, 0, status_flags);
        }
        self.send(&out)
    }

    pub fn send_text_result(
        &mut self,
        columns: &[ColumnDefinition],
        rows: &[Vec<Option<&[u8]>>],
    ) -> Result<()> {
        self.send_text_result_with_status(columns, rows, ServerStatusFlags::SERVER_STATUS_AUTOCOMMIT)
    }

    pub fn send_text_result_with_status(
        &mut self,
        columns: &[ColumnDefinition],
        rows: &[Vec<Option<&[u8]>>],
        status_flags: ServerStatusFlags,
    ) -> Result<()> {
        self.send_columns(columns)?;
        let mut out = Vec::new();
        for row in rows {
            out.clear();
            write_text_row(&mut out, row);
            self.send(&out)?;
        }
        self.send_terminator(status_flags)
    }

    pub fn send_binary_result(
        &mut self,
        columns: &[ColumnDefinition],
        rows: &[Vec<Option<&[u8]>>],
    ) -> Result<()> {
        self.send_columns(columns)?;
        let mut out = Vec::new();
        for row in rows {
            out.clear();
            write_binary_row(&mut out, columns, row)?;
            self.send(&out)?;
        }
        self.send_terminator(ServerStatusFlags::SERVER_STATUS_AUTOCOMMIT)
    }

    /// Answer a COM_STMT_PREPARE; returns the SQL text
    pub fn accept_prepare(
        &mut self,
        statement_id: u32,
        params: &[ColumnDefinition],
        columns: &[ColumnDefinition],
    ) -> Result<String> {
        let payload = self.read()?;
        assert_eq!(payload.first(), Some(&0x16), "expected COM_STMT_PREPARE, got {payload:?}");
        let mut out = Vec::new();
        write_prepare_ok(
            &mut out,
            &PrepareOk::new(statement_id, columns.len() as u16, params.len() as u16),
        );
        self.send(&out)?;
        self.send_definitions(params)?;
        self.send_definitions(columns)?;
        Ok(String::from_utf8(payload[1..].to_vec()).expect("statement is UTF-8"))
    }

    /// Read a COM_PING and answer it
    pub fn accept_ping(&mut self) -> Result<()> {
        let payload = self.read()?;
        assert_eq!(payload, [0x0e], "expected COM_PING");
        self.send_ok(&OkPayload::default())
    }
}
