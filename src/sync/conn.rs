use std::io::ErrorKind;
use std::net::{TcpStream, ToSocketAddrs};
use std::os::unix::net::UnixStream;
use std::str::FromStr;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crossbeam_queue::SegQueue;

use crate::buffer::BufferSet;
use crate::col::ColumnDefinition;
use crate::constant::{CapabilityFlags, ServerStatusFlags, error_code};
use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::protocol::codec::RowProtocol;
use crate::protocol::command::ColumnDefinitionBytes;
use crate::protocol::command::prepared::{
    PrepareOk, read_prepare_ok, write_close_statement, write_execute, write_prepare,
};
use crate::protocol::command::query::write_query;
use crate::protocol::command::utility::{
    write_init_db, write_ping, write_quit, write_reset_connection,
};
use crate::protocol::connection::{
    Handshake, HandshakeAction, HandshakeConfig, InitialHandshake, ServerVersion,
};
use crate::protocol::packet::ErrPayloadBytes;
use crate::protocol::r#trait::Params;
use crate::protocol::response::{ErrPayload, OkPayload};
use crate::row::Row;
use crate::sync::channel::PacketChannel;
use crate::sync::prepared::{CloseQueue, PrepareCache, PreparedStatement, ServerPrepared};
use crate::sync::result::ResultStream;
use crate::sync::stream::{Stream, TlsUpgrader, default_tls_upgrader};

/// Connection shared between threads; one command runs at a time
pub type SharedConn = Arc<Mutex<Conn>>;

const SESSION_VARIABLES_QUERY: &str = "SELECT @@max_allowed_packet, @@wait_timeout";
const SESSION_VARIABLES_FALLBACK: &str =
    "SHOW VARIABLES WHERE Variable_name IN ('max_allowed_packet', 'wait_timeout')";
const UNKNOWN_COLUMN_HINT: &str = "parameters cannot stand for identifiers; if a placeholder is \
     compared to a column of another type, wrap it in CAST(? AS <type>)";

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    AwaitingGreeting,
    Authenticating,
    TlsUpgrade,
    /// Authenticated; session variables are being set
    PostAuthSetup,
    Ready,
    /// Closed by the user or after a fatal error
    Closed,
}

fn transition(state: &mut SessionState, next: SessionState) {
    tracing::trace!(from = ?*state, to = ?next, "session state");
    *state = next;
}

/// A synchronous client session
pub struct Conn {
    channel: Option<PacketChannel<Stream>>,
    state: SessionState,
    opts: Opts,
    buffers: BufferSet,
    greeting: InitialHandshake,
    server_version: ServerVersion,
    capabilities: CapabilityFlags,
    status_flags: ServerStatusFlags,
    schema: Option<String>,
    max_allowed_packet: Option<usize>,
    wait_timeout: Option<u64>,
    max_field_size: Option<usize>,
    cache: PrepareCache,
    close_queue: CloseQueue,
    live_statements: Vec<Weak<ServerPrepared>>,
    active_result: bool,
}

impl Conn {
    /// Open a connection from options or a `mysql://` / `mariadb://` URL
    ///
    /// If the pipelined session setup times out, the connection is reopened once with
    /// pipelining disabled.
    pub fn new<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        Self::with_connector(opts.try_into()?, open_stream)
    }

    /// Like [`Conn::new`], with streams opened by `open` instead of from `opts.host`
    ///
    /// `open` is called again for the unpipelined retry.
    pub fn with_connector<F>(opts: Opts, mut open: F) -> Result<Self>
    where
        F: FnMut(&Opts) -> Result<Stream>,
    {
        let upgrader = default_tls_upgrader();
        match Self::establish(open(&opts)?, opts.clone(), &*upgrader) {
            Err(err) if opts.pipeline_setup && is_timeout(&err) => {
                tracing::warn!(%err, "pipelined setup timed out; retrying without pipelining");
                let opts = Opts {
                    pipeline_setup: false,
                    ..opts
                };
                Self::establish(open(&opts)?, opts, &*upgrader)
            }
            result => result,
        }
    }

    /// Run the session over an already connected stream
    pub fn with_stream(stream: Stream, opts: Opts) -> Result<Self> {
        let upgrader = default_tls_upgrader();
        Self::establish(stream, opts, &*upgrader)
    }

    /// Like [`Conn::with_stream`] with a caller-provided TLS layer
    pub fn with_stream_and_upgrader(
        stream: Stream,
        opts: Opts,
        upgrader: &dyn TlsUpgrader,
    ) -> Result<Self> {
        Self::establish(stream, opts, upgrader)
    }

    pub fn into_shared(self) -> SharedConn {
        Arc::new(Mutex::new(self))
    }

    #[tracing::instrument(skip_all)]
    fn establish(stream: Stream, opts: Opts, upgrader: &dyn TlsUpgrader) -> Result<Self> {
        let mut state = SessionState::Disconnected;
        transition(&mut state, SessionState::AwaitingGreeting);

        let create_database = opts.create_database_if_not_exist && opts.db.is_some();
        let mut capabilities = opts.capabilities;
        capabilities.set(CapabilityFlags::CLIENT_COMPRESS, opts.compress);
        capabilities.set(CapabilityFlags::CLIENT_LOCAL_FILES, opts.allow_local_infile);

        let mut handshake = Handshake::new(HandshakeConfig {
            username: opts.user.clone(),
            password: opts.password.clone(),
            // the database may not exist yet; it is created and selected after authentication
            database: if create_database {
                None
            } else {
                opts.db.clone()
            },
            capabilities,
            tls: opts.tls,
            secure_transport: stream.is_secure(),
            max_packet_size: opts.max_packet_size,
            charset: opts.charset,
        });

        let mut channel = PacketChannel::new(stream);
        let mut buffers = BufferSet::new();
        let mut pending = None;

        let capabilities = loop {
            let action = match pending.take() {
                Some(action) => action,
                None => {
                    channel.read_packet_into(&mut buffers.read_buffer)?;
                    let action = handshake.drive(&buffers.read_buffer)?;
                    if state == SessionState::AwaitingGreeting {
                        transition(&mut state, SessionState::Authenticating);
                    }
                    action
                }
            };

            match action {
                HandshakeAction::Write(payload) => channel.write_packet(&payload)?,
                HandshakeAction::Read => {}
                HandshakeAction::UpgradeTls(ssl_request) => {
                    transition(&mut state, SessionState::TlsUpgrade);
                    channel.write_packet(&ssl_request)?;
                    let next_sequence = channel.sequence();
                    let stream = upgrader.upgrade(channel.into_inner()?, tls_host(&opts.host))?;
                    channel = PacketChannel::new(stream);
                    channel.set_sequence(next_sequence);
                    transition(&mut state, SessionState::Authenticating);
                    pending = Some(handshake.resume_after_tls()?);
                }
                HandshakeAction::Connected(capabilities) => break capabilities,
            }
        };

        let greeting = handshake
            .into_greeting()
            .ok_or_else(|| Error::from_debug("handshake finished without a greeting"))?;
        if capabilities.contains(CapabilityFlags::CLIENT_COMPRESS) {
            channel = channel.enable_compression();
        }
        transition(&mut state, SessionState::PostAuthSetup);

        let server_version = ServerVersion::parse(&greeting.server_version);
        tracing::debug!(
            server_version = %greeting.server_version,
            connection_id = greeting.connection_id,
            "authenticated"
        );

        let mut conn = Self {
            channel: Some(channel),
            state,
            status_flags: greeting.status_flags,
            schema: if create_database {
                None
            } else {
                opts.db.clone()
            },
            max_field_size: opts.max_field_size,
            cache: PrepareCache::new(if opts.statement_cache_enabled() {
                opts.prep_stmt_cache_size
            } else {
                0
            }),
            close_queue: Arc::new(SegQueue::new()),
            live_statements: Vec::new(),
            active_result: false,
            max_allowed_packet: None,
            wait_timeout: None,
            greeting,
            server_version,
            capabilities,
            buffers,
            opts,
        };

        conn.post_auth_setup()?;
        conn.set_state(SessionState::Ready);
        Ok(conn)
    }

    /// Session setup after authentication
    ///
    /// All setup statements are sent at once when pipelining is enabled, then every
    /// response is read. The first server error is reported after all responses were
    /// consumed. A failing `SELECT @@...` falls back to `SHOW VARIABLES`.
    #[tracing::instrument(skip_all)]
    fn post_auth_setup(&mut self) -> Result<()> {
        let no_backslash_escapes = self
            .status_flags
            .contains(ServerStatusFlags::SERVER_STATUS_NO_BACKSLASH_ESCAPES);
        let mut commands = Vec::new();

        if let Some(autocommit) = self.opts.autocommit {
            commands.push(format!("SET autocommit={}", u8::from(autocommit)));
        }
        if let Some(time_zone) = &self.opts.time_zone {
            commands.push(format!(
                "SET time_zone={}",
                quote_string(time_zone, no_backslash_escapes)
            ));
        }
        if self.opts.session_track_schema
            && self
                .capabilities
                .contains(CapabilityFlags::CLIENT_SESSION_TRACK)
        {
            commands.push("SET session_track_schema=1".to_string());
        }
        if self.opts.create_database_if_not_exist
            && let Some(db) = &self.opts.db
        {
            let db = quote_identifier(db);
            commands.push(format!("CREATE DATABASE IF NOT EXISTS {db}"));
            commands.push(format!("USE {db}"));
        }
        if let Some(init_command) = &self.opts.init_command {
            commands.push(init_command.clone());
        }
        commands.push(SESSION_VARIABLES_QUERY.to_string());

        let mut outcomes = self.run_setup(&commands, self.opts.pipeline_setup)?;
        let variables = outcomes
            .pop()
            .ok_or_else(|| Error::from_debug("setup produced no outcome"))?;
        if let Some(err) = outcomes.into_iter().find_map(Result::err) {
            return Err(err);
        }

        match variables {
            Ok(rows) => {
                let row = rows.first();
                let max_allowed_packet = row.map(|row| row.get_str(0)).transpose()?.flatten();
                let wait_timeout = row.map(|row| row.get_str(1)).transpose()?.flatten();
                self.apply_variables(max_allowed_packet, wait_timeout);
            }
            Err(err) => {
                tracing::debug!(%err, "session variables query failed; using SHOW VARIABLES");
                self.load_variables_fallback()?;
            }
        }

        if self.opts.create_database_if_not_exist && self.schema.is_none() {
            self.schema = self.opts.db.clone();
        }
        Ok(())
    }

    /// Run each setup statement and collect its rows or its server error
    ///
    /// Fatal errors abort the setup.
    fn run_setup(
        &mut self,
        commands: &[String],
        pipelined: bool,
    ) -> Result<Vec<Result<Vec<Row>>>> {
        if pipelined {
            self.set_read_timeout(Some(self.opts.pipeline_timeout))?;
            for sql in commands {
                self.send_query(sql)?;
            }
        }

        let mut outcomes = Vec::with_capacity(commands.len());
        for sql in commands {
            if !pipelined {
                self.send_query(sql)?;
            }
            match self.read_rows() {
                Err(err) if err.is_fatal() => return Err(err),
                outcome => outcomes.push(outcome),
            }
        }

        if pipelined {
            self.set_read_timeout(self.opts.socket_timeout)?;
        }
        Ok(outcomes)
    }

    fn load_variables_fallback(&mut self) -> Result<()> {
        let rows = self.query_rows(SESSION_VARIABLES_FALLBACK)?;
        let mut max_allowed_packet = None;
        let mut wait_timeout = None;
        for row in &rows {
            match row.get_str(0)? {
                Some("max_allowed_packet") => max_allowed_packet = row.get_str(1)?,
                Some("wait_timeout") => wait_timeout = row.get_str(1)?,
                _ => {}
            }
        }
        let max_allowed_packet = max_allowed_packet.map(str::to_owned);
        let wait_timeout = wait_timeout.map(str::to_owned);
        self.apply_variables(max_allowed_packet.as_deref(), wait_timeout.as_deref());
        Ok(())
    }

    fn apply_variables(&mut self, max_allowed_packet: Option<&str>, wait_timeout: Option<&str>) {
        let max_allowed_packet =
            max_allowed_packet.and_then(|v| parse_variable::<usize>("max_allowed_packet", v));
        if let Some(value) = max_allowed_packet {
            self.max_allowed_packet = Some(value);
            if let Some(channel) = self.channel.as_mut() {
                channel.set_max_allowed_packet(Some(value));
            }
        }
        if let Some(value) = wait_timeout.and_then(|v| parse_variable("wait_timeout", v)) {
            self.wait_timeout = Some(value);
        }
        tracing::debug!(
            max_allowed_packet = ?self.max_allowed_packet,
            wait_timeout = ?self.wait_timeout,
            "session variables"
        );
    }


    /// Run a text-protocol statement and stream its results
    #[tracing::instrument(skip_all)]
    pub fn query(&mut self, sql: &str) -> Result<ResultStream<'_>> {
        self.send_query(sql)?;
        ResultStream::start(self, RowProtocol::Text)
    }

    /// Run a statement and discard all of its results
    pub fn query_drop(&mut self, sql: &str) -> Result<()> {
        self.query(sql)?.close()
    }

    /// Rows of the first result set; further results are discarded
    pub fn query_rows(&mut self, sql: &str) -> Result<Vec<Row>> {
        self.read_rows_of(|conn| conn.query(sql))
    }

    /// Prepare a statement on the server, or reuse it from the statement cache
    #[tracing::instrument(skip_all)]
    pub fn prepare(&mut self, sql: &str) -> Result<PreparedStatement> {
        self.ensure_usable()?;
        let cached = self.cache.capacity() > 0;
        if cached && let Some(statement) = self.cache.get(self.schema.as_deref(), sql) {
            tracing::trace!(statement_id = statement.statement_id(), "statement cache hit");
            return Ok(statement);
        }

        self.send(|out| {
            write_prepare(out, sql);
            Ok(())
        })?;
        let result = self.read_prepare_response(sql);
        let (prepare_ok, params, columns) = self.guard(result)?;
        tracing::debug!(statement_id = prepare_ok.statement_id(), "prepared");

        let statement = Arc::new(ServerPrepared::new(
            prepare_ok.statement_id(),
            sql.to_string(),
            self.schema.clone(),
            params,
            columns,
            cached,
            Arc::clone(&self.close_queue),
        ));
        self.live_statements.retain(|weak| weak.strong_count() > 0);
        self.live_statements.push(Arc::downgrade(&statement));
        if cached {
            self.cache.insert(Arc::clone(&statement));
        }
        Ok(PreparedStatement::from_acquired(statement))
    }

    /// Execute a prepared statement and stream its binary-protocol results
    #[tracing::instrument(skip_all)]
    pub fn exec<P: Params>(
        &mut self,
        statement: &PreparedStatement,
        params: P,
    ) -> Result<ResultStream<'_>> {
        self.send_execute(statement, &params)?;
        let result = ResultStream::start(self, RowProtocol::Binary);
        if result.is_err() {
            statement.server().clear_type_cache();
        }
        result
    }

    pub fn exec_drop<P: Params>(&mut self, statement: &PreparedStatement, params: P) -> Result<()> {
        self.exec(statement, params)?.close()
    }

    pub fn exec_rows<P: Params>(
        &mut self,
        statement: &PreparedStatement,
        params: P,
    ) -> Result<Vec<Row>> {
        self.read_rows_of(|conn| conn.exec(statement, params))
    }

    pub fn ping(&mut self) -> Result<()> {
        self.send(|out| {
            write_ping(out);
            Ok(())
        })?;
        self.read_ok().map(drop)
    }

    /// COM_RESET_CONNECTION: server-side session state and prepared statements are discarded
    #[tracing::instrument(skip_all)]
    pub fn reset(&mut self) -> Result<()> {
        self.send(|out| {
            write_reset_connection(out);
            Ok(())
        })?;
        self.read_ok()?;
        self.invalidate_statements();
        Ok(())
    }

    /// COM_INIT_DB
    pub fn select_db(&mut self, db: &str) -> Result<()> {
        self.send(|out| {
            write_init_db(out, db);
            Ok(())
        })?;
        self.read_ok()?;
        self.schema = Some(db.to_string());
        Ok(())
    }

    /// Send COM_QUIT and close the stream
    pub fn close(mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        let result = self.send(|out| {
            write_quit(out);
            Ok(())
        });
        self.mark_closed();
        result
    }

    /// Limit the bytes kept per truncatable field of rows read from now on
    pub fn set_max_field_size(&mut self, max_field_size: Option<usize>) {
        self.max_field_size = max_field_size;
    }


    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_broken(&self) -> bool {
        self.state == SessionState::Closed
    }

    pub fn opts(&self) -> &Opts {
        &self.opts
    }

    pub fn server_version(&self) -> &ServerVersion {
        &self.server_version
    }

    pub fn connection_id(&self) -> u32 {
        self.greeting.connection_id
    }

    /// Negotiated capabilities
    pub fn capabilities(&self) -> CapabilityFlags {
        self.capabilities
    }

    /// Status flags of the last OK or EOF packet
    pub fn status_flags(&self) -> ServerStatusFlags {
        self.status_flags
    }

    pub fn in_transaction(&self) -> bool {
        self.status_flags
            .contains(ServerStatusFlags::SERVER_STATUS_IN_TRANS)
    }

    /// Current default database, tracked through `select_db` and session-state changes
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn max_allowed_packet(&self) -> Option<usize> {
        self.max_allowed_packet
    }

    pub fn wait_timeout(&self) -> Option<u64> {
        self.wait_timeout
    }

    pub fn max_field_size(&self) -> Option<usize> {
        self.max_field_size
    }

    pub fn is_compressed(&self) -> bool {
        self.channel.as_ref().is_some_and(PacketChannel::is_compressed)
    }

    pub fn cached_statements(&self) -> usize {
        self.cache.len()
    }

    /// Statements waiting to be closed with the next command
    pub fn pending_closes(&self) -> usize {
        self.close_queue.len()
    }


    pub(crate) fn io(&mut self) -> Result<(&mut PacketChannel<Stream>, &mut Vec<u8>)> {
        let channel = self.channel.as_mut().ok_or(Error::ConnectionClosed)?;
        Ok((channel, &mut self.buffers.read_buffer))
    }

    /// Close the connection when `result` carries a fatal error
    pub(crate) fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result
            && err.is_fatal()
        {
            tracing::debug!(%err, "closing connection after fatal error");
            self.mark_closed();
        }
        result
    }

    pub(crate) fn apply_ok(&mut self, ok: &OkPayload) {
        self.status_flags = ok.status_flags;
        if let Some(schema) = &ok.schema_changed {
            tracing::trace!(schema, "default schema changed");
            self.schema = (!schema.is_empty()).then(|| schema.clone());
        }
    }

    pub(crate) fn apply_status(&mut self, status_flags: ServerStatusFlags) {
        self.status_flags = status_flags;
    }

    pub(crate) fn set_active_result(&mut self, active: bool) {
        self.active_result = active;
    }

    pub(crate) fn allow_local_infile(&self) -> bool {
        self.opts.allow_local_infile
    }

    fn set_state(&mut self, next: SessionState) {
        transition(&mut self.state, next);
    }

    fn mark_closed(&mut self) {
        self.set_state(SessionState::Closed);
        self.channel = None;
        self.active_result = false;
        self.invalidate_statements();
    }

    /// The server forgot every statement; nothing may close them any more
    fn invalidate_statements(&mut self) {
        self.cache.invalidate_all();
        for statement in self.live_statements.drain(..) {
            if let Some(statement) = statement.upgrade() {
                statement.invalidate();
            }
        }
        while self.close_queue.pop().is_some() {}
    }

    fn ensure_usable(&self) -> Result<()> {
        match self.state {
            SessionState::Ready | SessionState::PostAuthSetup => Ok(()),
            _ => Err(Error::ConnectionClosed),
        }
    }

    /// Prepare the connection for a new command
    ///
    /// Closes statements whose last handle was dropped and resets the sequence.
    fn begin_command(&mut self) -> Result<()> {
        self.ensure_usable()?;
        if self.active_result {
            self.mark_closed();
            return Err(Error::BadUsageError(
                "a new command was sent while a result was still being read".to_string(),
            ));
        }

        let result = self.flush_close_queue();
        self.guard(result)?;
        if let Some(channel) = self.channel.as_mut() {
            channel.reset_sequence();
        }
        Ok(())
    }

    fn flush_close_queue(&mut self) -> Result<()> {
        let channel = self.channel.as_mut().ok_or(Error::ConnectionClosed)?;
        while let Some(statement_id) = self.close_queue.pop() {
            tracing::trace!(statement_id, "closing statement");
            channel.reset_sequence();
            let out = self.buffers.new_write_buffer();
            write_close_statement(out, statement_id);
            channel.write_packet(self.buffers.write_buffer())?;
        }
        Ok(())
    }

    /// Start a command and send the payload built by `build`
    fn send(&mut self, build: impl FnOnce(&mut Vec<u8>) -> Result<()>) -> Result<()> {
        self.begin_command()?;
        build(self.buffers.new_write_buffer())?;
        let channel = self.channel.as_mut().ok_or(Error::ConnectionClosed)?;
        let result = channel.write_packet(self.buffers.write_buffer());
        self.guard(result)
    }

    fn send_query(&mut self, sql: &str) -> Result<()> {
        self.send(|out| {
            write_query(out, sql);
            Ok(())
        })
    }

    fn send_execute<P: Params>(&mut self, statement: &PreparedStatement, params: &P) -> Result<()> {
        let server = statement.server();
        if !server.belongs_to(&self.close_queue) {
            return Err(Error::BadUsageError(
                "prepared statement belongs to another connection".to_string(),
            ));
        }
        if server.is_deallocated() {
            return Err(Error::BadUsageError(
                "prepared statement was deallocated by a connection reset".to_string(),
            ));
        }
        if params.len() != server.params().len() {
            return Err(Error::BadUsageError(format!(
                "statement expects {} parameters, got {}",
                server.params().len(),
                params.len()
            )));
        }

        let send_types = server.needs_type_header(&params.param_types());
        let statement_id = server.statement_id();
        let result = self.send(|out| write_execute(out, statement_id, params, send_types));
        if result.is_err() {
            server.clear_type_cache();
        }
        result
    }

    fn read_rows(&mut self) -> Result<Vec<Row>> {
        self.read_rows_of(|conn| ResultStream::start(conn, RowProtocol::Text))
    }

    fn read_rows_of<'c>(
        &'c mut self,
        start: impl FnOnce(&'c mut Self) -> Result<ResultStream<'c>>,
    ) -> Result<Vec<Row>> {
        let mut result = start(self)?;
        let rows = result.collect_rows()?;
        result.close()?;
        Ok(rows)
    }

    fn read_ok(&mut self) -> Result<OkPayload> {
        let result = ResultStream::start(self, RowProtocol::Text)?;
        let ok = result.ok_packet().cloned();
        result.close()?;
        ok.ok_or_else(|| Error::from_debug("expected an OK packet, got a result set"))
    }

    fn read_prepare_response(
        &mut self,
        sql: &str,
    ) -> Result<(PrepareOk, Vec<ColumnDefinition>, Vec<ColumnDefinition>)> {
        let deprecate_eof = self
            .capabilities
            .contains(CapabilityFlags::CLIENT_DEPRECATE_EOF);
        let (channel, buf) = self.io()?;
        channel.read_packet_into(buf)?;

        if buf.first() == Some(&0xFF) {
            let source = ErrPayload::try_from(ErrPayloadBytes(buf))?;
            let hint = (source.error_code == error_code::ER_BAD_FIELD_ERROR)
                .then_some(UNKNOWN_COLUMN_HINT);
            return Err(Error::PrepareError {
                sql: sql.to_string(),
                source,
                hint,
            });
        }

        let prepare_ok = read_prepare_ok(buf)?;
        let params = read_definitions(channel, buf, prepare_ok.num_params().into(), deprecate_eof)?;
        let columns =
            read_definitions(channel, buf, prepare_ok.num_columns().into(), deprecate_eof)?;
        Ok((prepare_ok, params, columns))
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        let channel = self.channel.as_ref().ok_or(Error::ConnectionClosed)?;
        channel.get_ref().set_read_timeout(timeout)?;
        Ok(())
    }
}

impl Drop for Conn {
    fn drop(&mut self) {
        if self.state != SessionState::Ready || self.active_result {
            return;
        }
        if let Some(channel) = self.channel.as_mut() {
            channel.reset_sequence();
            let mut out = Vec::with_capacity(1);
            write_quit(&mut out);
            if let Err(err) = channel.write_packet(&out) {
                tracing::trace!(%err, "COM_QUIT on drop failed");
            }
        }
    }
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("state", &self.state)
            .field("connection_id", &self.greeting.connection_id)
            .field("server_version", &self.server_version.raw)
            .field("schema", &self.schema)
            .field("cached_statements", &self.cache.len())
            .finish_non_exhaustive()
    }
}

fn read_definitions(
    channel: &mut PacketChannel<Stream>,
    buf: &mut Vec<u8>,
    count: usize,
    deprecate_eof: bool,
) -> Result<Vec<ColumnDefinition>> {
    let mut definitions = Vec::with_capacity(count);
    for _ in 0..count {
        channel.read_packet_into(buf)?;
        definitions.push(ColumnDefinition::try_from(ColumnDefinitionBytes(buf))?);
    }
    if count > 0 && !deprecate_eof {
        channel.read_packet_into(buf)?;
        if buf.first() != Some(&0xFE) {
            return Err(Error::InvalidPacket);
        }
    }
    Ok(definitions)
}

fn open_stream(opts: &Opts) -> Result<Stream> {
    if let Some(path) = &opts.socket {
        let stream = UnixStream::connect(path)?;
        stream.set_read_timeout(opts.socket_timeout)?;
        return Ok(Stream::unix(stream));
    }

    if opts.host.is_empty() {
        return Err(Error::BadConfigError(
            "Missing host in connection options".to_string(),
        ));
    }
    let host = tls_host(&opts.host);
    let mut last_error = None;
    for addr in (host, opts.port).to_socket_addrs()? {
        let connected = match opts.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match connected {
            Ok(stream) => {
                stream.set_nodelay(opts.tcp_nodelay)?;
                stream.set_read_timeout(opts.socket_timeout)?;
                return Ok(Stream::tcp(stream));
            }
            Err(err) => {
                tracing::debug!(%addr, %err, "connect failed");
                last_error = Some(err);
            }
        }
    }
    Err(match last_error {
        Some(err) => Error::IoError(err),
        None => Error::BadConfigError(format!("Could not resolve host {host}")),
    })
}

/// Host name without IPv6 brackets
fn tls_host(host: &str) -> &str {
    host.trim_start_matches('[').trim_end_matches(']')
}

fn is_timeout(err: &Error) -> bool {
    match err {
        Error::IoError(io) => matches!(io.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut),
        _ => false,
    }
}

fn parse_variable<T: FromStr>(name: &str, value: &str) -> Option<T> {
    match value.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(name, value, "could not parse session variable");
            None
        }
    }
}

fn quote_string(value: &str, no_backslash_escapes: bool) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        match c {
            '\'' => quoted.push_str("''"),
            '\\' if !no_backslash_escapes => quoted.push_str("\\\\"),
            c => quoted.push(c),
        }
    }
    quoted.push('\'');
    quoted
}

fn quote_identifier(value: &str) -> String {
    format!("`{}`", value.replace('`', "``"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_string_escapes_quotes_and_backslashes() {
        assert_eq!(quote_string("+00:00", false), "'+00:00'");
        assert_eq!(quote_string("it's", false), "'it''s'");
        assert_eq!(quote_string(r"a\b", false), r"'a\\b'");
        assert_eq!(quote_string(r"a\b", true), r"'a\b'");
    }

    #[test]
    fn quote_identifier_doubles_backticks() {
        assert_eq!(quote_identifier("shop"), "`shop`");
        assert_eq!(quote_identifier("we`ird"), "`we``ird`");
    }

    #[test]
    fn tls_host_strips_ipv6_brackets() {
        assert_eq!(tls_host("[::1]"), "::1");
        assert_eq!(tls_host("db.example.com"), "db.example.com");
    }

    #[test]
    fn timeouts_are_recognized() {
        let err = Error::IoError(std::io::Error::from(ErrorKind::WouldBlock));
        assert!(is_timeout(&err));
        let err = Error::IoError(std::io::Error::from(ErrorKind::ConnectionReset));
        assert!(!is_timeout(&err));
        assert!(!is_timeout(&Error::ConnectionClosed));
    }

    #[test]
    fn unparsable_variables_are_ignored() {
        assert_eq!(parse_variable::<usize>("max_allowed_packet", " 4194304 "), Some(4_194_304));
        assert_eq!(parse_variable::<u64>("wait_timeout", "soon"), None);
    }
}
