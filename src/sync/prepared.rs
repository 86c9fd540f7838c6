//! Server-side prepared statement bookkeeping
//!
//! A statement id is shared by every [`PreparedStatement`] handle for the same
//! `(schema, sql)` and by the per-connection [`PrepareCache`]. It is closed on the server
//! once no handle holds it and the cache has let go of it. The close itself is queued and
//! sent by the connection before its next command, so handles may be dropped on any thread.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_queue::SegQueue;

use crate::col::ColumnDefinition;
use crate::protocol::r#trait::ParamType;

/// Statement ids waiting for COM_STMT_CLOSE
pub type CloseQueue = Arc<SegQueue<u32>>;

#[derive(Debug, Default)]
struct ShareState {
    share_counter: usize,
    in_cache: bool,
    /// One-shot gate: set when the close is queued, or when the server already forgot the id
    being_deallocated: bool,
}

impl ShareState {
    fn try_deallocate(&mut self) -> bool {
        if self.share_counter == 0 && !self.in_cache && !self.being_deallocated {
            self.being_deallocated = true;
            true
        } else {
            false
        }
    }
}

/// A statement prepared on the server
#[derive(Debug)]
pub struct ServerPrepared {
    statement_id: u32,
    sql: String,
    schema: Option<String>,
    params: Vec<ColumnDefinition>,
    columns: Vec<ColumnDefinition>,
    share: Mutex<ShareState>,
    /// Parameter types announced by the last execute that sent a type header
    param_type_cache: Mutex<Option<Vec<ParamType>>>,
    close_queue: CloseQueue,
}

impl ServerPrepared {
    /// New statement with one reference held by the caller
    pub fn new(
        statement_id: u32,
        sql: String,
        schema: Option<String>,
        params: Vec<ColumnDefinition>,
        columns: Vec<ColumnDefinition>,
        in_cache: bool,
        close_queue: CloseQueue,
    ) -> Self {
        Self {
            statement_id,
            sql,
            schema,
            params,
            columns,
            share: Mutex::new(ShareState {
                share_counter: 1,
                in_cache,
                being_deallocated: false,
            }),
            param_type_cache: Mutex::new(None),
            close_queue,
        }
    }

    pub fn statement_id(&self) -> u32 {
        self.statement_id
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn params(&self) -> &[ColumnDefinition] {
        &self.params
    }

    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    fn share(&self) -> MutexGuard<'_, ShareState> {
        self.share.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn share_counter(&self) -> usize {
        self.share().share_counter
    }

    pub fn in_cache(&self) -> bool {
        self.share().in_cache
    }

    /// The id was queued for closing or invalidated by a connection reset
    pub fn is_deallocated(&self) -> bool {
        self.share().being_deallocated
    }

    /// Take a reference; returns false if the id is no longer valid on the server
    pub fn acquire(&self) -> bool {
        let mut share = self.share();
        share.share_counter += 1;
        !share.being_deallocated
    }

    /// Drop a reference; the last one out of an evicted statement queues the close
    pub fn release(&self) {
        let mut share = self.share();
        if share.share_counter == 0 {
            tracing::warn!(statement_id = self.statement_id, "release without acquire");
            return;
        }
        share.share_counter -= 1;
        if share.try_deallocate() {
            self.queue_close();
        }
    }

    /// Remove from the cache; closes immediately if nobody holds the statement
    pub fn uncache(&self) {
        let mut share = self.share();
        share.in_cache = false;
        if share.try_deallocate() {
            self.queue_close();
        }
    }

    /// The server dropped the id (COM_RESET_CONNECTION); never close it
    pub fn invalidate(&self) {
        let mut share = self.share();
        share.in_cache = false;
        share.being_deallocated = true;
    }

    fn queue_close(&self) {
        tracing::trace!(statement_id = self.statement_id, "statement close queued");
        self.close_queue.push(self.statement_id);
    }

    pub fn belongs_to(&self, close_queue: &CloseQueue) -> bool {
        Arc::ptr_eq(&self.close_queue, close_queue)
    }

    /// Whether an execute with `types` has to carry the type header
    ///
    /// True the first time and whenever any slot's type differs from the last header sent.
    pub fn needs_type_header(&self, types: &[ParamType]) -> bool {
        let mut cache = self
            .param_type_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if cache.as_deref() == Some(types) {
            return false;
        }
        *cache = Some(types.to_vec());
        true
    }

    /// Forget the announced types so the next execute resends them
    pub fn clear_type_cache(&self) {
        *self
            .param_type_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Handle to a server-side prepared statement
///
/// Cloning shares the statement id; the last handle dropped after the statement left the
/// cache closes it on the server.
#[derive(Debug)]
pub struct PreparedStatement {
    inner: Arc<ServerPrepared>,
}

impl PreparedStatement {
    /// Wrap a statement whose reference the caller already acquired
    pub(crate) fn from_acquired(inner: Arc<ServerPrepared>) -> Self {
        Self { inner }
    }

    pub fn statement_id(&self) -> u32 {
        self.inner.statement_id()
    }

    pub fn sql(&self) -> &str {
        self.inner.sql()
    }

    pub fn num_params(&self) -> usize {
        self.inner.params().len()
    }

    pub fn params(&self) -> &[ColumnDefinition] {
        self.inner.params()
    }

    pub fn columns(&self) -> &[ColumnDefinition] {
        self.inner.columns()
    }

    pub(crate) fn server(&self) -> &ServerPrepared {
        &self.inner
    }
}

impl Clone for PreparedStatement {
    fn clone(&self) -> Self {
        self.inner.acquire();
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Drop for PreparedStatement {
    fn drop(&mut self) {
        self.inner.release();
    }
}

type CacheKey = (Option<String>, String);

#[derive(Debug)]
struct CacheEntry {
    statement: Arc<ServerPrepared>,
    last_used: u64,
}

/// Per-connection LRU cache of prepared statements keyed by `(schema, sql)`
///
/// Evicted statements are only uncached; the close waits for the last handle.
#[derive(Debug)]
pub struct PrepareCache {
    entries: HashMap<CacheKey, CacheEntry>,
    capacity: usize,
    tick: u64,
}

impl PrepareCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity.min(256)),
            capacity,
            tick: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, schema: Option<&str>, sql: &str) -> bool {
        self.entries
            .contains_key(&(schema.map(ToString::to_string), sql.to_string()))
    }

    /// Cached statement for `(schema, sql)` with a freshly acquired reference
    pub fn get(&mut self, schema: Option<&str>, sql: &str) -> Option<PreparedStatement> {
        self.tick += 1;
        let key = (schema.map(ToString::to_string), sql.to_string());
        let entry = self.entries.get_mut(&key)?;
        if !entry.statement.acquire() {
            entry.statement.release();
            return None;
        }
        entry.last_used = self.tick;
        Some(PreparedStatement::from_acquired(Arc::clone(&entry.statement)))
    }

    /// Cache a statement created with `in_cache` set, evicting the least recently used one
    pub fn insert(&mut self, statement: Arc<ServerPrepared>) {
        if self.capacity == 0 {
            statement.uncache();
            return;
        }
        self.tick += 1;
        let key = (
            statement.schema().map(ToString::to_string),
            statement.sql().to_string(),
        );
        if let Some(previous) = self.entries.remove(&key) {
            previous.statement.uncache();
        }
        while self.entries.len() >= self.capacity {
            self.evict_lru();
        }
        self.entries.insert(
            key,
            CacheEntry {
                statement,
                last_used: self.tick,
            },
        );
    }

    fn evict_lru(&mut self) {
        let Some(key) = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone())
        else {
            return;
        };
        if let Some(entry) = self.entries.remove(&key) {
            tracing::debug!(
                statement_id = entry.statement.statement_id(),
                "evicting prepared statement"
            );
            entry.statement.uncache();
        }
    }

    /// Empty the cache, uncaching every statement
    pub fn clear(&mut self) {
        for (_, entry) in self.entries.drain() {
            entry.statement.uncache();
        }
    }

    /// Empty the cache after the server forgot every statement id
    pub fn invalidate_all(&mut self) {
        for (_, entry) in self.entries.drain() {
            entry.statement.invalidate();
        }
    }
}
