//! The session: one physical connection, its transaction state and the objects registered on it.
//!
//! Every public entry point takes the session mutex exactly once. Administrative commands the
//! driver issues on its own behalf (version probe, cursor survival checks, deferred CLOSE) run
//! against the already locked [`SessionState`], so the lock is never re-acquired on the same
//! thread.

mod cursor_io;
mod metadata;
mod registry;
mod state;
mod statement;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use chrono::{DateTime, Utc};

use crate::config::{ConnectionParams, CursorOptions, ErrorRollback};
use crate::error::{DriverError, ErrorRecord, TransportError};
use crate::executor::{self, Plan};
use crate::results::{
    CursorId, FetchPlan, KeyColumns, ResultChain, ResultSet, ServerCursor, TUPLE_COLUMN,
};
use crate::sql_scan;
use crate::transaction::TxEvent;
use crate::transport::{CancelHandle, Connector};
use crate::types::QueryFlags;

pub use metadata::TableInfo;
pub use registry::{CursorHandle, DescriptorHandle, StatementHandle};
pub use state::{ServerVersion, SessionStatus};
pub use statement::Statement;

pub(crate) use state::SessionState;

use registry::{CursorEntry, DescriptorEntry, StatementEntry};

/// One submission: SQL text, an optional companion text sent in the same round trip, flags, and an
/// optional result to refill with the rows instead of returning them in the chain.
#[derive(Debug)]
pub struct QueryRequest<'a> {
    text: &'a str,
    companion: Option<&'a str>,
    flags: QueryFlags,
    reuse: Option<&'a mut ResultSet>,
}

impl<'a> QueryRequest<'a> {
    #[must_use]
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            companion: None,
            flags: QueryFlags::NONE,
            reuse: None,
        }
    }

    #[must_use]
    pub fn companion(mut self, text: &'a str) -> Self {
        self.companion = Some(text);
        self
    }

    #[must_use]
    pub fn flags(mut self, flags: QueryFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Deliver the first row-bearing result into `target` rather than the returned chain.
    #[must_use]
    pub fn reuse(mut self, target: &'a mut ResultSet) -> Self {
        self.reuse = Some(target);
        self
    }
}

/// Server objects waiting for a moment when they can be cleaned up.
#[derive(Debug)]
enum Discard {
    CloseCursor(CursorId),
}

/// State shared by a session, its statements and its incremental results.
pub(crate) struct SessionShared {
    state: Mutex<SessionState>,
    /// Kept outside `state` so a result dropped while the session is busy can still queue work.
    discards: Mutex<Vec<Discard>>,
    canceller: Option<Box<dyn CancelHandle>>,
    params: ConnectionParams,
}

impl fmt::Debug for SessionShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionShared")
            .field("state", &self.state)
            .field("can_cancel", &self.canceller.is_some())
            .field("host", &self.params.host)
            .finish_non_exhaustive()
    }
}

impl SessionShared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn discard_queue(&self) -> MutexGuard<'_, Vec<Discard>> {
        self.discards.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Flags every caller statement gets from the session's settings.
    pub(crate) fn default_flags(&self) -> QueryFlags {
        let state = self.lock();
        let mut flags = QueryFlags::NONE;
        if !state.tx.autocommit() {
            flags |= QueryFlags::GO_INTO_TRANSACTION;
        }
        if state.error_rollback == ErrorRollback::Statement {
            flags |= QueryFlags::ROLLBACK_ON_ERROR;
        }
        flags
    }

    pub(crate) fn submit(&self, request: QueryRequest<'_>) -> Result<ResultChain, DriverError> {
        let QueryRequest {
            text,
            companion,
            flags,
            reuse,
        } = request;
        let mut plan = Plan::new(text).companion(companion).flags(flags);
        if reuse.is_some() {
            plan = plan.staged();
        }
        let outcome = {
            let mut state = self.lock();
            self.process_discards(&mut state);
            executor::run(&mut state, &plan)?
        };
        if let (Some(target), Some(staged)) = (reuse, outcome.staged) {
            let requested = sql_scan::fetch_count(text);
            target.refill(&staged.columns, staged.rows, staged.tag, requested)?;
        }
        Ok(outcome.chain)
    }

    /// Declare a server cursor for `query` and prime it with the first window.
    pub(crate) fn declare_cursor(
        self: &Arc<Self>,
        query: &str,
        opts: CursorOptions,
    ) -> Result<ResultSet, DriverError> {
        let batch = opts.fetch_size.unwrap_or(self.params.fetch_size);
        let plan = FetchPlan::new(batch, opts.rowset_size);
        let first = plan.size_for(0);
        let body = if opts.updatable {
            sql_scan::append_select_column(query, TUPLE_COLUMN)
        } else {
            sql_scan::trim_terminators(query).to_string()
        };

        let mut state = self.lock();
        self.process_discards(&mut state);
        let name = state.next_cursor_name();
        let quoted = sql_scan::quote_ident(&name);
        let declare = format!(
            "DECLARE {quoted} {}CURSOR{} FOR {body}",
            if opts.scrollable { "SCROLL " } else { "" },
            if opts.with_hold { " WITH HOLD" } else { "" },
        );
        let fetch = format!("FETCH FORWARD {first} IN {quoted}");
        let flags = if opts.with_hold {
            QueryFlags::NONE
        } else {
            QueryFlags::GO_INTO_TRANSACTION
        };
        let outcome = executor::run(
            &mut state,
            &Plan::new(&declare)
                .companion(Some(fetch.as_str()))
                .flags(flags)
                .staged(),
        )?;
        let handle = CursorHandle(state.cursors.insert(CursorEntry {
            name: name.clone(),
            holdable: opts.with_hold,
            must_verify: false,
            abandoned: false,
        }));
        let Some(staged) = outcome.staged else {
            drop(state);
            self.close_cursor(&CursorId { handle, name: name.clone() })?;
            return Err(DriverError::Cursor(format!(
                "cursor {name} did not return a row description"
            )));
        };
        drop(state);

        let key_columns = if opts.updatable {
            KeyColumns::detect(&staged.columns)
        } else {
            KeyColumns::default()
        };
        tracing::debug!(
            cursor = %name,
            batch,
            first,
            scrollable = opts.scrollable,
            hidden = key_columns.hidden_count(),
            "declared cursor"
        );
        let cursor = ServerCursor {
            id: CursorId { handle, name },
            session: Arc::downgrade(self),
            server_pos: 0,
            scrollable: opts.scrollable,
            closed: false,
        };
        ResultSet::incremental(
            staged.tag,
            &staged.columns,
            staged.rows,
            first,
            cursor,
            plan,
            key_columns,
            opts.updatable,
        )
    }

    /// Explicit close from [`ResultSet::close_cursor`].
    pub(crate) fn close_cursor(&self, id: &CursorId) -> Result<(), DriverError> {
        let mut state = self.lock();
        self.close_cursor_locked(&mut state, id)
    }

    fn close_cursor_locked(
        &self,
        state: &mut SessionState,
        id: &CursorId,
    ) -> Result<(), DriverError> {
        let Some(entry) = state.cursors.get(id.handle.0) else {
            return Ok(());
        };
        if entry.abandoned || state.status != SessionStatus::Connected {
            state.cursors.remove(id.handle.0);
            return Ok(());
        }
        if state.tx.in_error() {
            tracing::debug!(cursor = %id.name, "transaction failed; deferring cursor close");
            self.discard_queue().push(Discard::CloseCursor(id.clone()));
            return Ok(());
        }
        // commit or rollback already destroyed a cursor that was not held
        let gone = entry.must_verify && !entry.holdable;
        state.cursors.remove(id.handle.0);
        if !gone {
            let sql = format!("CLOSE {}", sql_scan::quote_ident(&id.name));
            let flags = if state.tx.in_transaction() {
                QueryFlags::ROLLBACK_ON_ERROR | QueryFlags::IGNORE_ABORT_ON_CONN
            } else {
                QueryFlags::IGNORE_ABORT_ON_CONN
            };
            match executor::run(state, &Plan::new(&sql).flags(flags)) {
                Ok(_) => tracing::debug!(cursor = %id.name, "closed cursor"),
                Err(e) if e.kind().is_session_fatal() => return Err(e),
                Err(e) => tracing::warn!(cursor = %id.name, error = %e, "cursor close failed"),
            }
        }
        self.commit_if_last_cursor(state)
    }

    /// In autocommit mode a transaction the driver opened for cursors ends with its last cursor.
    fn commit_if_last_cursor(&self, state: &mut SessionState) -> Result<(), DriverError> {
        let tx = &state.tx;
        if tx.autocommit() && tx.is_implicit() && !tx.in_error() && state.cursors.is_empty() {
            tracing::debug!("last cursor closed; committing implicit transaction");
            executor::run(state, &Plan::admin("COMMIT"))?;
        }
        Ok(())
    }

    /// Close from a dropped result. Never blocks on the session lock.
    pub(crate) fn discard_cursor(&self, id: &CursorId) {
        let mut state = match self.state.try_lock() {
            Ok(state) => state,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                tracing::debug!(cursor = %id.name, "session busy; deferring cursor close");
                self.discard_queue().push(Discard::CloseCursor(id.clone()));
                return;
            }
        };
        if let Err(e) = self.close_cursor_locked(&mut state, id) {
            tracing::warn!(cursor = %id.name, error = %e, "dropping cursor failed");
        }
    }

    /// Issue queued cleanup while the session can take it.
    fn process_discards(&self, state: &mut SessionState) {
        if state.tx.in_error() || state.status != SessionStatus::Connected {
            return;
        }
        let pending = std::mem::take(&mut *self.discard_queue());
        if !pending.is_empty() {
            tracing::debug!(count = pending.len(), "processing deferred discards");
        }
        for discard in pending {
            match discard {
                Discard::CloseCursor(id) => {
                    if let Err(e) = self.close_cursor_locked(state, &id) {
                        tracing::warn!(
                            cursor = %id.name,
                            error = %e,
                            "deferred cursor close failed"
                        );
                    }
                }
            }
        }
    }
}

/// A logical database connection.
#[derive(Debug)]
pub struct Session {
    shared: Arc<SessionShared>,
}

impl Session {
    /// Connect and prepare a session.
    ///
    /// # Errors
    /// Returns `DriverError::Config` for invalid parameters, `DriverError::Transport` when the
    /// connection cannot be opened, and the session's failure if it dies while probing the server.
    pub fn open(params: ConnectionParams, connector: &dyn Connector) -> Result<Self, DriverError> {
        params.validate()?;
        let transport = connector.connect(&params)?;
        let canceller = transport.cancel_handle();
        let reported = transport.parameter("server_version");
        let mut state = SessionState::new(transport, &params);
        state.server_version = match reported {
            Some(text) => ServerVersion::parse(&text),
            None => probe_server_version(&mut state)?,
        };
        tracing::info!(
            host = %params.host,
            port = params.port,
            database = %params.database,
            server_version = ?state.server_version.map(|v| v.to_string()),
            "session opened"
        );
        Ok(Self {
            shared: Arc::new(SessionShared {
                state: Mutex::new(state),
                discards: Mutex::new(Vec::new()),
                canceller,
                params,
            }),
        })
    }

    /// Send one submission and return its result chain.
    ///
    /// # Errors
    /// See [`DriverError`]. A failing statement yields `DriverError::Statement` carrying the
    /// results produced up to and including the failure.
    pub fn submit(&self, request: QueryRequest<'_>) -> Result<ResultChain, DriverError> {
        self.shared.submit(request)
    }

    /// Run `sql` with the flags implied by the session's autocommit and error-rollback settings.
    ///
    /// # Errors
    /// As [`Session::submit`].
    pub fn execute(&self, sql: &str) -> Result<ResultChain, DriverError> {
        let flags = self.shared.default_flags();
        self.shared.submit(QueryRequest::new(sql).flags(flags))
    }

    /// Open an incremental result over a server cursor for `query`.
    ///
    /// # Errors
    /// As [`Session::submit`]; `DriverError::Cursor` when the query returns no rows description.
    pub fn declare_cursor(
        &self,
        query: &str,
        opts: CursorOptions,
    ) -> Result<ResultSet, DriverError> {
        self.shared.declare_cursor(query, opts)
    }

    /// Commit the open transaction. A failed transaction is rolled back by the server and reported
    /// as `DriverError::Execution`.
    ///
    /// # Errors
    /// Returns the session's error when the COMMIT cannot be sent.
    pub fn commit(&self) -> Result<(), DriverError> {
        let mut state = self.shared.lock();
        if !state.tx.in_transaction() {
            return Ok(());
        }
        let failed = state.tx.in_error();
        executor::run(&mut state, &Plan::new("COMMIT"))?;
        if failed {
            return Err(DriverError::Execution(
                "transaction was rolled back because a statement failed".to_string(),
            ));
        }
        Ok(())
    }

    /// # Errors
    /// Returns the session's error when the ROLLBACK cannot be sent.
    pub fn rollback(&self) -> Result<(), DriverError> {
        let mut state = self.shared.lock();
        if !state.tx.in_transaction() {
            return Ok(());
        }
        executor::run(&mut state, &Plan::new("ROLLBACK"))?;
        Ok(())
    }

    /// Switch autocommit. Turning it on commits an open transaction first.
    ///
    /// # Errors
    /// Returns the COMMIT's error; autocommit is left unchanged in that case.
    pub fn set_autocommit(&self, on: bool) -> Result<(), DriverError> {
        let mut state = self.shared.lock();
        if on && !state.tx.autocommit() && state.tx.in_transaction() {
            executor::run(&mut state, &Plan::new("COMMIT"))?;
        }
        state.tx.set_autocommit(on);
        tracing::info!(autocommit = on, "autocommit changed");
        Ok(())
    }

    #[must_use]
    pub fn autocommit(&self) -> bool {
        self.shared.lock().tx.autocommit()
    }

    /// Ask the server to cancel the command in flight. Safe to call while another thread is blocked
    /// inside [`Session::submit`]; the session lock is not taken.
    ///
    /// # Errors
    /// Returns `DriverError::Transport` if the cancel request could not be delivered.
    pub fn cancel(&self) -> Result<(), DriverError> {
        match &self.shared.canceller {
            Some(canceller) => {
                tracing::debug!("sending cancel request");
                canceller.cancel().map_err(DriverError::from)
            }
            None => Err(DriverError::Transport(TransportError::Cancel(
                "transport has no cancel channel".to_string(),
            ))),
        }
    }

    /// Drop the connection and invalidate every statement, descriptor and cursor. Closing twice
    /// does nothing.
    pub fn close(&self) {
        let mut state = self.shared.lock();
        if state.status == SessionStatus::NotConnected {
            return;
        }
        let statements = state.statements.drain().len();
        let descriptors = state.descriptors.drain().len();
        let cursors = state.cursors.drain().len();
        if let Some(mut transport) = state.transport.take() {
            transport.close();
        }
        state.status = SessionStatus::NotConnected;
        state.tx.apply(TxEvent::ConnectionLost);
        drop(state);
        self.shared.discard_queue().clear();
        tracing::info!(statements, descriptors, cursors, "session closed");
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.shared.lock().status
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.shared.lock().tx.in_transaction()
    }

    #[must_use]
    pub fn in_error_transaction(&self) -> bool {
        self.shared.lock().tx.in_error()
    }

    #[must_use]
    pub fn server_version(&self) -> Option<ServerVersion> {
        self.shared.lock().server_version
    }

    /// The most recent failure not marked call-local.
    #[must_use]
    pub fn last_error(&self) -> Option<ErrorRecord> {
        self.shared.lock().last_error.clone()
    }

    #[must_use]
    pub fn open_cursor_count(&self) -> usize {
        self.shared.lock().cursors.len()
    }

    /// Cleanup commands queued until the session can take them.
    #[must_use]
    pub fn pending_discard_count(&self) -> usize {
        self.shared.discard_queue().len()
    }

    /// # Errors
    /// Returns `DriverError::NotConnected` after [`Session::close`].
    pub fn allocate_statement(&self) -> Result<Statement, DriverError> {
        let mut state = self.shared.lock();
        if state.status == SessionStatus::NotConnected {
            return Err(DriverError::NotConnected);
        }
        let handle = StatementHandle(state.statements.insert(StatementEntry::default()));
        Ok(Statement::new(Arc::clone(&self.shared), handle))
    }

    #[must_use]
    pub fn statement_count(&self) -> usize {
        self.shared.lock().statements.len()
    }

    /// Allocate a descriptor, optionally owned by a statement and freed with it.
    ///
    /// # Errors
    /// Returns `DriverError::NotConnected` after close and `DriverError::InvalidHandle` for a freed
    /// owner.
    pub fn allocate_descriptor(
        &self,
        owner: Option<&Statement>,
    ) -> Result<DescriptorHandle, DriverError> {
        allocate_descriptor(&self.shared, owner.map(Statement::handle))
    }

    /// # Errors
    /// Returns `DriverError::InvalidHandle` if the descriptor was already freed.
    pub fn free_descriptor(&self, handle: DescriptorHandle) -> Result<(), DriverError> {
        let mut state = self.shared.lock();
        let entry = state
            .descriptors
            .remove(handle.0)
            .ok_or_else(|| DriverError::InvalidHandle("descriptor already freed".to_string()))?;
        if let Some(owner) = entry.owner
            && let Some(statement) = state.statements.get_mut(owner.0)
        {
            statement.descriptors.retain(|d| *d != handle);
        }
        Ok(())
    }

    #[must_use]
    pub fn descriptor_count(&self) -> usize {
        self.shared.lock().descriptors.len()
    }

    /// Cached metadata for `schema.table` or `table`, stamping its access time.
    #[must_use]
    pub fn table_info(&self, name: &str) -> Option<Arc<TableInfo>> {
        self.shared.lock().metadata.get(name)
    }

    pub fn cache_table_info(&self, info: TableInfo) -> Arc<TableInfo> {
        self.shared.lock().metadata.insert(info)
    }

    #[must_use]
    pub fn table_last_access(&self, name: &str) -> Option<DateTime<Utc>> {
        self.shared.lock().metadata.last_access(name)
    }

    #[must_use]
    pub fn cached_table_count(&self) -> usize {
        self.shared.lock().metadata.len()
    }

    #[must_use]
    pub fn params(&self) -> &ConnectionParams {
        &self.shared.params
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

pub(crate) fn allocate_descriptor(
    shared: &SessionShared,
    owner: Option<StatementHandle>,
) -> Result<DescriptorHandle, DriverError> {
    let mut state = shared.lock();
    if state.status == SessionStatus::NotConnected {
        return Err(DriverError::NotConnected);
    }
    if let Some(owner) = owner
        && !state.statements.contains(owner.0)
    {
        return Err(DriverError::InvalidHandle(
            "owning statement was freed".to_string(),
        ));
    }
    let handle = DescriptorHandle(state.descriptors.insert(DescriptorEntry { owner }));
    if let Some(statement) = owner.and_then(|o| state.statements.get_mut(o.0)) {
        statement.descriptors.push(handle);
    }
    Ok(handle)
}

fn probe_server_version(state: &mut SessionState) -> Result<Option<ServerVersion>, DriverError> {
    match executor::run(state, &Plan::admin("SHOW server_version").staged()) {
        Ok(outcome) => Ok(outcome
            .staged
            .and_then(|s| s.rows.into_iter().next())
            .and_then(|row| row.into_iter().next())
            .and_then(|cell| cell.as_str().and_then(ServerVersion::parse))),
        Err(e) if e.kind().is_session_fatal() => Err(e),
        Err(e) => {
            tracing::warn!(error = %e, "could not read server version");
            Ok(None)
        }
    }
}
