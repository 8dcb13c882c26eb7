//! In-memory stand-in for a PostgreSQL server.
//!
//! Understands the handful of statements the driver issues plus simple caller SQL over in-memory
//! tables. Transaction blocks, savepoints, failed-transaction rejection and cursor positioning
//! follow the server's rules closely enough for the driver's state machines to be exercised end to
//! end. One session at a time per server.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::config::ConnectionParams;
use crate::error::{ServerError, ServerNotice, Severity, TransportError};
use crate::sql_scan;
use crate::transport::{
    BackendMessage, CancelHandle, Connector, TransactionStatus, Transport,
};
use crate::types::{Cell, ColumnDescriptor};

const INT4: u32 = 23;
const INT8: u32 = 20;
const TEXT: u32 = 25;
const TID: u32 = 27;
const VOID: u32 = 2278;

/// Scripted misbehaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The connection drops while the next statement runs.
    DropConnection,
    /// The next statement draws a FATAL error and the server closes the connection.
    Fatal,
    /// Every statement containing `pattern` (case-insensitive) fails with this error.
    FailMatching {
        pattern: String,
        sqlstate: String,
        message: String,
    },
}

#[derive(Debug, Clone)]
struct Table {
    columns: Vec<ColumnDescriptor>,
    unique: Option<usize>,
    rows: Vec<(u16, Vec<Cell>)>,
    next_tid: u16,
}

#[derive(Debug)]
struct FakeCursor {
    columns: Vec<ColumnDescriptor>,
    rows: Vec<Vec<Cell>>,
    /// 0 before the first row, `k` on row `k`, `len + 1` after the last.
    pos: usize,
    scroll: bool,
    hold: bool,
    /// Declared inside the open transaction block.
    in_tx: bool,
    savepoint_depth: usize,
}

#[derive(Debug)]
struct Savepoint {
    name: String,
    snapshot: BTreeMap<String, Table>,
}

#[derive(Debug)]
struct TxBlock {
    failed: bool,
    snapshot: BTreeMap<String, Table>,
    savepoints: Vec<Savepoint>,
}

#[derive(Debug)]
struct ServerState {
    tables: BTreeMap<String, Table>,
    tx: Option<TxBlock>,
    cursors: BTreeMap<String, FakeCursor>,
    version: String,
    report_version: bool,
    refuse: bool,
    faults: Vec<Fault>,
    commands: Vec<String>,
    statements: Vec<String>,
    cancel_requested: bool,
    cancels: usize,
    sleeping: bool,
    connections: usize,
}

impl Default for ServerState {
    fn default() -> Self {
        Self {
            tables: BTreeMap::new(),
            tx: None,
            cursors: BTreeMap::new(),
            version: "16.2".to_string(),
            report_version: true,
            refuse: false,
            faults: Vec::new(),
            commands: Vec::new(),
            statements: Vec::new(),
            cancel_requested: false,
            cancels: 0,
            sleeping: false,
            connections: 0,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<ServerState>,
    wake: Condvar,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to an in-memory server. Clones share the same server.
#[derive(Debug, Clone, Default)]
pub struct FakeServer {
    inner: Arc<Inner>,
}

impl FakeServer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `version` as the server version.
    #[must_use]
    pub fn with_version(self, version: &str) -> Self {
        self.inner.lock().version = version.to_string();
        self
    }

    /// Leave `server_version` out of the startup parameters so the driver has to ask.
    #[must_use]
    pub fn without_version_parameter(self) -> Self {
        self.inner.lock().report_version = false;
        self
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.lock().refuse = refuse;
    }

    /// Create a table. `columns` pairs names with type oids.
    pub fn create_table(&self, name: &str, columns: &[(&str, u32)], unique: Option<&str>) {
        let columns: Vec<ColumnDescriptor> = columns
            .iter()
            .map(|(col, oid)| ColumnDescriptor::new(*col, *oid))
            .collect();
        let unique = unique.and_then(|u| columns.iter().position(|c| c.name == u));
        self.inner.lock().tables.insert(
            name.to_string(),
            Table {
                columns,
                unique,
                rows: Vec::new(),
                next_tid: 1,
            },
        );
    }

    /// Append rows directly, bypassing constraints.
    ///
    /// # Panics
    /// If the table does not exist.
    pub fn insert_rows(&self, table: &str, rows: Vec<Vec<Cell>>) {
        let mut state = self.inner.lock();
        let table = state
            .tables
            .get_mut(table)
            .unwrap_or_else(|| panic!("no table {table}"));
        for cells in rows {
            let tid = table.next_tid;
            table.next_tid += 1;
            table.rows.push((tid, cells));
        }
    }

    /// Create `name (id int unique, label text)` holding ids `1..=count`.
    pub fn seed_numbers(&self, name: &str, count: usize) {
        self.create_table(name, &[("id", INT4), ("label", TEXT)], Some("id"));
        self.insert_rows(
            name,
            (1..=count)
                .map(|i| vec![Cell::text(&i.to_string()), Cell::text(&format!("row {i}"))])
                .collect(),
        );
    }

    pub fn inject_fault(&self, fault: Fault) {
        self.inner.lock().faults.push(fault);
    }

    pub fn clear_faults(&self) {
        self.inner.lock().faults.clear();
    }

    /// Every command text received, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.inner.lock().commands.clone()
    }

    /// Every individual statement executed, in order.
    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        self.inner.lock().statements.clone()
    }

    /// Statements starting with `prefix`, ignoring case.
    #[must_use]
    pub fn count_statements(&self, prefix: &str) -> usize {
        let prefix = prefix.to_ascii_uppercase();
        self.inner
            .lock()
            .statements
            .iter()
            .filter(|s| s.to_ascii_uppercase().starts_with(&prefix))
            .count()
    }

    pub fn clear_log(&self) {
        let mut state = self.inner.lock();
        state.commands.clear();
        state.statements.clear();
    }

    #[must_use]
    pub fn table_rows(&self, table: &str) -> usize {
        self.inner.lock().tables.get(table).map_or(0, |t| t.rows.len())
    }

    #[must_use]
    pub fn open_cursors(&self) -> Vec<String> {
        self.inner.lock().cursors.keys().cloned().collect()
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.inner.lock().tx.is_some()
    }

    #[must_use]
    pub fn cancel_count(&self) -> usize {
        self.inner.lock().cancels
    }

    /// True while a `pg_sleep` statement is blocked.
    #[must_use]
    pub fn is_sleeping(&self) -> bool {
        self.inner.lock().sleeping
    }

    #[must_use]
    pub fn connections(&self) -> usize {
        self.inner.lock().connections
    }
}

impl Connector for FakeServer {
    fn connect(&self, params: &ConnectionParams) -> Result<Box<dyn Transport>, TransportError> {
        let mut state = self.inner.lock();
        if state.refuse {
            return Err(TransportError::Connect(format!(
                "connection to {}:{} refused",
                params.host, params.port
            )));
        }
        state.connections += 1;
        state.reset_connection();
        tracing::trace!(user = %params.user, "fake server accepted connection");
        Ok(Box::new(FakeTransport {
            inner: Arc::clone(&self.inner),
            queue: VecDeque::new(),
            out: VecDeque::new(),
            dead: false,
            copy_pending: false,
        }))
    }
}

struct FakeCanceller {
    inner: Arc<Inner>,
}

impl CancelHandle for FakeCanceller {
    fn cancel(&self) -> Result<(), TransportError> {
        let mut state = self.inner.lock();
        state.cancels += 1;
        // an idle backend ignores cancel requests
        if state.sleeping {
            state.cancel_requested = true;
            self.inner.wake.notify_all();
        }
        Ok(())
    }
}

struct FakeTransport {
    inner: Arc<Inner>,
    queue: VecDeque<String>,
    out: VecDeque<Result<BackendMessage, TransportError>>,
    dead: bool,
    copy_pending: bool,
}

impl FakeTransport {
    fn run_next(&mut self, sql: &str) {
        let inner = Arc::clone(&self.inner);
        let mut state = inner.lock();
        state.statements.push(sql.to_string());
        tracing::trace!(sql, "fake server statement");

        if let Some(fault) = state.take_fault(sql) {
            match fault {
                Fault::DropConnection => {
                    self.kill(&mut state);
                    self.out.push_back(Err(TransportError::Receive(
                        "server closed the connection unexpectedly".to_string(),
                    )));
                }
                Fault::Fatal => {
                    self.kill(&mut state);
                    self.out.push_back(Ok(BackendMessage::Error(ServerError::new(
                        Severity::Fatal,
                        "57P01",
                        "terminating connection due to administrator command",
                    ))));
                }
                Fault::FailMatching {
                    sqlstate, message, ..
                } => self.fail(&mut state, error(&sqlstate, message)),
            }
            return;
        }

        let tokens = tokenize(sql);
        if state.tx.as_ref().is_some_and(|t| t.failed) && !allowed_when_failed(&tokens) {
            self.fail(
                &mut state,
                error(
                    "25P02",
                    "current transaction is aborted, \
                     commands ignored until end of transaction block",
                ),
            );
            return;
        }
        if is_kw_at(&tokens, 0, "COPY") {
            let inbound = sql.to_ascii_uppercase().contains("STDIN");
            self.out.push_back(Ok(if inbound {
                BackendMessage::CopyInStart
            } else {
                BackendMessage::CopyOutStart
            }));
            self.copy_pending = true;
            return;
        }
        if let Some(seconds) = sleep_seconds(&tokens) {
            state.sleeping = true;
            let (mut state, _) = inner
                .wake
                .wait_timeout_while(state, Duration::from_secs_f64(seconds), |s| {
                    !s.cancel_requested
                })
                .unwrap_or_else(PoisonError::into_inner);
            state.sleeping = false;
            if state.cancel_requested {
                state.cancel_requested = false;
                self.fail(
                    &mut state,
                    error("57014", "canceling statement due to user request"),
                );
            } else {
                self.out.extend(
                    rows_response(
                        vec![ColumnDescriptor::new("pg_sleep", VOID)],
                        vec![vec![Cell::text("")]],
                        false,
                        "SELECT 1",
                    )
                    .into_iter()
                    .map(Ok),
                );
            }
            return;
        }

        match state.execute(sql, &tokens) {
            Ok(messages) => self.out.extend(messages.into_iter().map(Ok)),
            Err(err) => self.fail(&mut state, err),
        }
    }

    fn fail(&mut self, state: &mut ServerState, err: ServerError) {
        if let Some(tx) = state.tx.as_mut() {
            tx.failed = true;
        }
        self.queue.clear();
        self.out.push_back(Ok(BackendMessage::Error(err)));
    }

    fn kill(&mut self, state: &mut ServerState) {
        self.dead = true;
        self.queue.clear();
        state.reset_connection();
    }
}

impl Transport for FakeTransport {
    fn send(&mut self, sql: &str) -> Result<(), TransportError> {
        if self.dead {
            return Err(TransportError::Send("connection is closed".to_string()));
        }
        self.inner.lock().commands.push(sql.to_string());
        self.queue = sql_scan::split_statements(sql)
            .into_iter()
            .map(str::to_string)
            .collect();
        if self.queue.is_empty() {
            self.out.push_back(Ok(BackendMessage::EmptyQuery));
        }
        Ok(())
    }

    fn next_message(&mut self) -> Result<Option<BackendMessage>, TransportError> {
        loop {
            if let Some(message) = self.out.pop_front() {
                return message.map(Some);
            }
            if self.copy_pending {
                return Err(TransportError::Receive(
                    "server is waiting for COPY data".to_string(),
                ));
            }
            if self.dead {
                return Ok(None);
            }
            let Some(sql) = self.queue.pop_front() else {
                return Ok(None);
            };
            self.run_next(&sql);
        }
    }

    fn abort_copy(&mut self, reason: &str) -> Result<(), TransportError> {
        if !self.copy_pending {
            return Err(TransportError::Send("no COPY in progress".to_string()));
        }
        self.copy_pending = false;
        let inner = Arc::clone(&self.inner);
        let mut state = inner.lock();
        self.fail(
            &mut state,
            error("57014", format!("COPY from stdin failed: {reason}")),
        );
        Ok(())
    }

    fn transaction_status(&self) -> TransactionStatus {
        if self.dead {
            return TransactionStatus::Unknown;
        }
        match &self.inner.lock().tx {
            None => TransactionStatus::Idle,
            Some(tx) if tx.failed => TransactionStatus::InError,
            Some(_) => TransactionStatus::InTransaction,
        }
    }

    fn is_usable(&self) -> bool {
        !self.dead
    }

    fn parameter(&self, name: &str) -> Option<String> {
        let state = self.inner.lock();
        (name == "server_version" && state.report_version).then(|| state.version.clone())
    }

    fn cancel_handle(&self) -> Option<Box<dyn CancelHandle>> {
        Some(Box::new(FakeCanceller {
            inner: Arc::clone(&self.inner),
        }))
    }

    fn close(&mut self) {
        if !self.dead {
            self.dead = true;
            self.inner.lock().reset_connection();
        }
    }
}

impl ServerState {
    /// A new or lost connection: open work is rolled back and cursors vanish.
    fn reset_connection(&mut self) {
        if let Some(tx) = self.tx.take() {
            self.tables = tx.snapshot;
        }
        self.cursors.clear();
        self.cancel_requested = false;
    }

    fn take_fault(&mut self, sql: &str) -> Option<Fault> {
        let upper = sql.to_ascii_uppercase();
        let idx = self.faults.iter().position(|f| match f {
            Fault::DropConnection | Fault::Fatal => true,
            Fault::FailMatching { pattern, .. } => upper.contains(&pattern.to_ascii_uppercase()),
        })?;
        match &self.faults[idx] {
            Fault::FailMatching { .. } => Some(self.faults[idx].clone()),
            _ => Some(self.faults.remove(idx)),
        }
    }

    fn execute(&mut self, sql: &str, tokens: &[Token]) -> Result<Vec<BackendMessage>, ServerError> {
        let mut p = Parser::new(sql, tokens);
        let Some(first) = p.next_word() else {
            return Err(syntax_error(p.peek_text()));
        };
        match first.as_str() {
            "BEGIN" | "START" => Ok(self.begin()),
            "COMMIT" | "END" => Ok(self.commit()),
            "ROLLBACK" | "ABORT" => {
                p.eat_kw("WORK");
                p.eat_kw("TRANSACTION");
                if p.eat_kw("TO") {
                    p.eat_kw("SAVEPOINT");
                    let name = p.expect_name()?;
                    self.rollback_to(&name)
                } else {
                    Ok(self.rollback())
                }
            }
            "SAVEPOINT" => {
                let name = p.expect_name()?;
                self.savepoint(name)
            }
            "RELEASE" => {
                p.eat_kw("SAVEPOINT");
                let name = p.expect_name()?;
                self.release(&name)
            }
            "DECLARE" => self.declare(&mut p),
            "FETCH" => self.fetch(&mut p),
            "MOVE" => self.move_cursor(&mut p),
            "CLOSE" => self.close(&mut p),
            "SELECT" => {
                let (columns, rows) = self.select(&mut p)?;
                let tag = format!("SELECT {}", rows.len());
                Ok(rows_response(columns, rows, false, &tag))
            }
            "SHOW" => self.show(&mut p),
            "INSERT" => self.insert(&mut p),
            "CREATE" => self.create_table(&mut p),
            "DROP" => self.drop_table(&mut p),
            _ => Err(syntax_error(&first)),
        }
    }

    fn begin(&mut self) -> Vec<BackendMessage> {
        if self.tx.is_some() {
            return vec![
                notice("25001", "there is already a transaction in progress"),
                complete("BEGIN"),
            ];
        }
        self.tx = Some(TxBlock {
            failed: false,
            snapshot: self.tables.clone(),
            savepoints: Vec::new(),
        });
        vec![complete("BEGIN")]
    }

    fn commit(&mut self) -> Vec<BackendMessage> {
        match self.tx.as_ref().map(|t| t.failed) {
            None => vec![
                notice("25P01", "there is no transaction in progress"),
                complete("COMMIT"),
            ],
            Some(true) => self.rollback(),
            Some(false) => {
                self.tx = None;
                self.cursors.retain(|_, c| c.hold);
                for cursor in self.cursors.values_mut() {
                    cursor.in_tx = false;
                }
                vec![complete("COMMIT")]
            }
        }
    }

    fn rollback(&mut self) -> Vec<BackendMessage> {
        let Some(tx) = self.tx.take() else {
            return vec![
                notice("25P01", "there is no transaction in progress"),
                complete("ROLLBACK"),
            ];
        };
        self.tables = tx.snapshot;
        self.cursors.retain(|_, c| c.hold && !c.in_tx);
        vec![complete("ROLLBACK")]
    }

    fn rollback_to(&mut self, name: &str) -> Result<Vec<BackendMessage>, ServerError> {
        let Some(tx) = self.tx.as_mut() else {
            return Err(error(
                "25P01",
                "ROLLBACK TO SAVEPOINT can only be used in transaction blocks",
            ));
        };
        let idx = tx
            .savepoints
            .iter()
            .rposition(|s| s.name == name)
            .ok_or_else(|| error("3B001", format!("savepoint \"{name}\" does not exist")))?;
        tx.savepoints.truncate(idx + 1);
        tx.failed = false;
        self.tables = tx.savepoints[idx].snapshot.clone();
        self.cursors
            .retain(|_, c| !(c.in_tx && c.savepoint_depth > idx));
        Ok(vec![complete("ROLLBACK")])
    }

    fn savepoint(&mut self, name: String) -> Result<Vec<BackendMessage>, ServerError> {
        let snapshot = self.tables.clone();
        let tx = self
            .tx
            .as_mut()
            .ok_or_else(|| error("25P01", "SAVEPOINT can only be used in transaction blocks"))?;
        tx.savepoints.push(Savepoint { name, snapshot });
        Ok(vec![complete("SAVEPOINT")])
    }

    fn release(&mut self, name: &str) -> Result<Vec<BackendMessage>, ServerError> {
        let tx = self.tx.as_mut().ok_or_else(|| {
            error(
                "25P01",
                "RELEASE SAVEPOINT can only be used in transaction blocks",
            )
        })?;
        let idx = tx
            .savepoints
            .iter()
            .rposition(|s| s.name == name)
            .ok_or_else(|| error("3B001", format!("savepoint \"{name}\" does not exist")))?;
        tx.savepoints.truncate(idx);
        Ok(vec![complete("RELEASE")])
    }

    fn declare(&mut self, p: &mut Parser<'_>) -> Result<Vec<BackendMessage>, ServerError> {
        let name = p.expect_name()?;
        p.eat_kw("BINARY");
        let mut scroll = false;
        if p.eat_kw("NO") {
            p.expect_kw("SCROLL")?;
        } else if p.eat_kw("SCROLL") {
            scroll = true;
        }
        p.expect_kw("CURSOR")?;
        let mut hold = false;
        if p.eat_kw("WITH") {
            p.expect_kw("HOLD")?;
            hold = true;
        } else if p.eat_kw("WITHOUT") {
            p.expect_kw("HOLD")?;
        }
        p.expect_kw("FOR")?;
        if !hold && self.tx.is_none() {
            return Err(error(
                "25P01",
                "DECLARE CURSOR can only be used in transaction blocks",
            ));
        }
        if self.cursors.contains_key(&name) {
            return Err(error("42P03", format!("cursor \"{name}\" already exists")));
        }
        let query = p.rest();
        let tokens = tokenize(query);
        let mut inner = Parser::new(query, &tokens);
        if !inner.eat_kw("SELECT") {
            return Err(syntax_error(inner.peek_text()));
        }
        let (columns, rows) = self.select(&mut inner)?;
        let savepoint_depth = self.tx.as_ref().map_or(0, |t| t.savepoints.len());
        self.cursors.insert(
            name,
            FakeCursor {
                columns,
                rows,
                pos: 0,
                scroll,
                hold,
                in_tx: self.tx.is_some(),
                savepoint_depth,
            },
        );
        Ok(vec![complete("DECLARE CURSOR")])
    }

    /// `[FORWARD|BACKWARD] [n|ALL] [IN|FROM] name`
    fn cursor_motion(p: &mut Parser<'_>) -> Result<(bool, Option<usize>, String), ServerError> {
        let mut forward = true;
        if p.eat_kw("BACKWARD") {
            forward = false;
        } else {
            p.eat_kw("FORWARD");
            p.eat_kw("NEXT");
        }
        let count = if p.eat_kw("ALL") {
            None
        } else {
            Some(p.number().unwrap_or(1))
        };
        if !p.eat_kw("IN") {
            p.eat_kw("FROM");
        }
        let name = p.expect_name()?;
        Ok((forward, count, name))
    }

    fn cursor_mut(&mut self, name: &str) -> Result<&mut FakeCursor, ServerError> {
        self.cursors
            .get_mut(name)
            .ok_or_else(|| error("34000", format!("cursor \"{name}\" does not exist")))
    }

    fn fetch(&mut self, p: &mut Parser<'_>) -> Result<Vec<BackendMessage>, ServerError> {
        let (forward, count, name) = Self::cursor_motion(p)?;
        if !forward {
            return Err(syntax_error("BACKWARD"));
        }
        let cursor = self.cursor_mut(&name)?;
        let len = cursor.rows.len();
        let want = count.unwrap_or(usize::MAX);
        let start = cursor.pos.min(len);
        let end = start.saturating_add(want).min(len);
        let rows = cursor.rows[start..end].to_vec();
        cursor.pos = if end - start < want { len + 1 } else { end };
        let tag = format!("FETCH {}", rows.len());
        Ok(rows_response(cursor.columns.clone(), rows, true, &tag))
    }

    fn move_cursor(&mut self, p: &mut Parser<'_>) -> Result<Vec<BackendMessage>, ServerError> {
        let (forward, count, name) = Self::cursor_motion(p)?;
        let cursor = self.cursor_mut(&name)?;
        let len = cursor.rows.len();
        let want = count.unwrap_or(usize::MAX);
        let moved = if forward {
            let start = cursor.pos.min(len);
            let got = want.min(len - start);
            cursor.pos = if got < want { len + 1 } else { start + got };
            got
        } else {
            if !cursor.scroll {
                return Err(error(
                    "55000",
                    "cursor can only scan forward",
                )
                .with_detail("Declare it with SCROLL option to enable backward scan."));
            }
            let got = want.min(cursor.pos.saturating_sub(1));
            cursor.pos = if got < want { 0 } else { cursor.pos - want };
            got
        };
        Ok(vec![complete(&format!("MOVE {moved}"))])
    }

    fn close(&mut self, p: &mut Parser<'_>) -> Result<Vec<BackendMessage>, ServerError> {
        if p.eat_kw("ALL") {
            self.cursors.clear();
        } else {
            let name = p.expect_name()?;
            if self.cursors.remove(&name).is_none() {
                return Err(error("34000", format!("cursor \"{name}\" does not exist")));
            }
        }
        Ok(vec![complete("CLOSE CURSOR")])
    }

    fn show(&mut self, p: &mut Parser<'_>) -> Result<Vec<BackendMessage>, ServerError> {
        let name = p.expect_name()?;
        if name != "server_version" {
            return Err(error(
                "42704",
                format!("unrecognized configuration parameter \"{name}\""),
            ));
        }
        Ok(rows_response(
            vec![ColumnDescriptor::new("server_version", TEXT)],
            vec![vec![Cell::text(&self.version)]],
            false,
            "SHOW",
        ))
    }

    fn select(
        &mut self,
        p: &mut Parser<'_>,
    ) -> Result<(Vec<ColumnDescriptor>, Vec<Vec<Cell>>), ServerError> {
        let items = p.select_items();
        if !p.eat_kw("FROM") {
            let mut columns = Vec::with_capacity(items.len());
            let mut row = Vec::with_capacity(items.len());
            for item in &items {
                let (column, cell) = literal_item(item)?;
                columns.push(column);
                row.push(cell);
            }
            return Ok((columns, vec![row]));
        }
        let table_name = p.expect_name()?;
        if table_name == "pg_cursors" {
            p.expect_kw("WHERE")?;
            p.expect_kw("NAME")?;
            p.expect_punct('=')?;
            let wanted = p.string()?;
            let count = usize::from(self.cursors.contains_key(&wanted));
            return Ok((
                vec![ColumnDescriptor::new("count", INT8)],
                vec![vec![Cell::text(&count.to_string())]],
            ));
        }
        let table = self.tables.get(&table_name).ok_or_else(|| {
            error("42P01", format!("relation \"{table_name}\" does not exist"))
        })?;

        enum Pick {
            Column(usize),
            Tid,
        }
        let mut picks = Vec::new();
        let mut columns = Vec::new();
        for item in &items {
            match item.as_slice() {
                [Tok::Punct('*')] => {
                    for (i, col) in table.columns.iter().enumerate() {
                        picks.push(Pick::Column(i));
                        columns.push(col.clone());
                    }
                }
                [tok] if name_of(tok).as_deref() == Some("ctid") => {
                    picks.push(Pick::Tid);
                    columns.push(ColumnDescriptor::new("ctid", TID));
                }
                [tok] => {
                    let name = name_of(tok).unwrap_or_default();
                    let i = table
                        .columns
                        .iter()
                        .position(|c| c.name == name)
                        .ok_or_else(|| {
                            error("42703", format!("column \"{name}\" does not exist"))
                        })?;
                    picks.push(Pick::Column(i));
                    columns.push(table.columns[i].clone());
                }
                _ => return Err(syntax_error("select list")),
            }
        }
        let rows = table
            .rows
            .iter()
            .map(|(tid, cells)| {
                picks
                    .iter()
                    .map(|pick| match pick {
                        Pick::Column(i) => cells.get(*i).cloned().unwrap_or_default(),
                        Pick::Tid => Cell::text(&format!("(0,{tid})")),
                    })
                    .collect()
            })
            .collect();
        Ok((columns, rows))
    }

    fn insert(&mut self, p: &mut Parser<'_>) -> Result<Vec<BackendMessage>, ServerError> {
        p.expect_kw("INTO")?;
        let table_name = p.expect_name()?;
        let table = self.tables.get_mut(&table_name).ok_or_else(|| {
            error("42P01", format!("relation \"{table_name}\" does not exist"))
        })?;
        let targets: Vec<usize> = if p.eat_punct('(') {
            let mut targets = Vec::new();
            loop {
                let name = p.expect_name()?;
                let i = table
                    .columns
                    .iter()
                    .position(|c| c.name == name)
                    .ok_or_else(|| error("42703", format!("column \"{name}\" does not exist")))?;
                targets.push(i);
                if !p.eat_punct(',') {
                    break;
                }
            }
            p.expect_punct(')')?;
            targets
        } else {
            (0..table.columns.len()).collect()
        };
        p.expect_kw("VALUES")?;

        let mut staged: Vec<Vec<Cell>> = Vec::new();
        loop {
            p.expect_punct('(')?;
            let mut values = Vec::new();
            loop {
                values.push(p.value()?);
                if !p.eat_punct(',') {
                    break;
                }
            }
            p.expect_punct(')')?;
            if values.len() > targets.len() {
                return Err(error(
                    "42601",
                    "INSERT has more expressions than target columns",
                ));
            }
            let mut row = vec![Cell::null(); table.columns.len()];
            for (target, value) in targets.iter().zip(values) {
                row[*target] = value;
            }
            staged.push(row);
            if !p.eat_punct(',') {
                break;
            }
        }

        if let Some(u) = table.unique {
            let mut seen: Vec<&Cell> = table.rows.iter().map(|(_, r)| &r[u]).collect();
            for row in &staged {
                let key = &row[u];
                if !key.is_null() && seen.contains(&key) {
                    let column = &table.columns[u].name;
                    return Err(error(
                        "23505",
                        format!(
                            "duplicate key value violates unique constraint \
                             \"{table_name}_{column}_key\""
                        ),
                    )
                    .with_detail(format!(
                        "Key ({column})=({}) already exists.",
                        key.as_str().unwrap_or_default()
                    )));
                }
                seen.push(key);
            }
        }
        let count = staged.len();
        for row in staged {
            let tid = table.next_tid;
            table.next_tid += 1;
            table.rows.push((tid, row));
        }
        Ok(vec![complete(&format!("INSERT 0 {count}"))])
    }

    fn create_table(&mut self, p: &mut Parser<'_>) -> Result<Vec<BackendMessage>, ServerError> {
        p.expect_kw("TABLE")?;
        let name = p.expect_name()?;
        if self.tables.contains_key(&name) {
            return Err(error("42P07", format!("relation \"{name}\" already exists")));
        }
        p.expect_punct('(')?;
        let mut columns = Vec::new();
        let mut unique = None;
        loop {
            let column = p.expect_name()?;
            let type_name = p.next_word().unwrap_or_default();
            let oid = match type_name.as_str() {
                "INT" | "INTEGER" | "INT4" | "SERIAL" => INT4,
                "BIGINT" | "INT8" | "BIGSERIAL" => INT8,
                _ => TEXT,
            };
            while let Some(word) = p.next_word_in_column() {
                if word == "PRIMARY" || word == "UNIQUE" {
                    unique = Some(columns.len());
                }
            }
            columns.push(ColumnDescriptor::new(column, oid));
            if !p.eat_punct(',') {
                break;
            }
        }
        p.expect_punct(')')?;
        self.tables.insert(
            name,
            Table {
                columns,
                unique,
                rows: Vec::new(),
                next_tid: 1,
            },
        );
        Ok(vec![complete("CREATE TABLE")])
    }

    fn drop_table(&mut self, p: &mut Parser<'_>) -> Result<Vec<BackendMessage>, ServerError> {
        p.expect_kw("TABLE")?;
        let if_exists = p.eat_kw("IF") && p.eat_kw("EXISTS");
        let name = p.expect_name()?;
        if self.tables.remove(&name).is_none() {
            if if_exists {
                return Ok(vec![
                    notice("00000", &format!("table \"{name}\" does not exist, skipping")),
                    complete("DROP TABLE"),
                ]);
            }
            return Err(error("42P01", format!("table \"{name}\" does not exist")));
        }
        Ok(vec![complete("DROP TABLE")])
    }
}

fn error(sqlstate: &str, message: impl Into<String>) -> ServerError {
    ServerError::new(Severity::Error, sqlstate, message)
}

fn syntax_error(near: &str) -> ServerError {
    error("42601", format!("syntax error at or near \"{near}\""))
}

fn notice(sqlstate: &str, message: &str) -> BackendMessage {
    BackendMessage::Notice(ServerNotice {
        sqlstate: sqlstate.to_string(),
        message: message.to_string(),
    })
}

fn complete(tag: &str) -> BackendMessage {
    BackendMessage::CommandComplete(tag.to_string())
}

fn rows_response(
    columns: Vec<ColumnDescriptor>,
    rows: Vec<Vec<Cell>>,
    batched: bool,
    tag: &str,
) -> Vec<BackendMessage> {
    let mut out = vec![BackendMessage::RowDescription(columns)];
    if batched {
        if !rows.is_empty() {
            out.push(BackendMessage::DataRows(rows));
        }
    } else {
        out.extend(rows.into_iter().map(BackendMessage::DataRow));
    }
    out.push(complete(tag));
    out
}

fn allowed_when_failed(tokens: &[Token]) -> bool {
    ["ROLLBACK", "ABORT", "COMMIT", "END"]
        .iter()
        .any(|kw| is_kw_at(tokens, 0, kw))
}

/// `SELECT pg_sleep(n)`
fn sleep_seconds(tokens: &[Token]) -> Option<f64> {
    match tokens {
        [select, func, open, Token { tok: Tok::Num(n), .. }, close]
            if select.tok.is_kw("SELECT")
                && func.tok.is_kw("PG_SLEEP")
                && open.tok == Tok::Punct('(')
                && close.tok == Tok::Punct(')') =>
        {
            u32::try_from(*n).ok().map(f64::from)
        }
        _ => None,
    }
}

fn literal_item(item: &[Tok]) -> Result<(ColumnDescriptor, Cell), ServerError> {
    let (expr, alias) = match item {
        [expr @ .., as_kw, alias] if as_kw.is_kw("AS") => (expr, name_of(alias)),
        _ => (item, None),
    };
    let (oid, cell) = match expr {
        [Tok::Num(n)] => (INT4, Cell::text(&n.to_string())),
        [Tok::Punct('-'), Tok::Num(n)] => (INT4, Cell::text(&(-n).to_string())),
        [Tok::Str(s)] => (TEXT, Cell::text(s)),
        [null] if null.is_kw("NULL") => (TEXT, Cell::null()),
        [Tok::Num(a), Tok::Punct('/'), Tok::Num(b)] => {
            if *b == 0 {
                return Err(error("22012", "division by zero"));
            }
            (INT4, Cell::text(&(a / b).to_string()))
        }
        [first, ..] => return Err(syntax_error(&first.text())),
        [] => return Err(syntax_error("SELECT")),
    };
    let name = alias.unwrap_or_else(|| "?column?".to_string());
    Ok((ColumnDescriptor::new(name, oid), cell))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tok {
    Word(String),
    Ident(String),
    Num(i64),
    Str(String),
    Punct(char),
}

impl Tok {
    fn is_kw(&self, kw: &str) -> bool {
        matches!(self, Tok::Word(w) if w.eq_ignore_ascii_case(kw))
    }

    fn text(&self) -> String {
        match self {
            Tok::Word(s) | Tok::Ident(s) | Tok::Str(s) => s.clone(),
            Tok::Num(n) => n.to_string(),
            Tok::Punct(c) => c.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    start: usize,
}

fn is_kw_at(tokens: &[Token], idx: usize, kw: &str) -> bool {
    tokens.get(idx).is_some_and(|t| t.tok.is_kw(kw))
}

/// Identifier text: bare words fold to lower case, quoted ones are kept.
fn name_of(tok: &Tok) -> Option<String> {
    match tok {
        Tok::Word(w) => Some(w.to_ascii_lowercase()),
        Tok::Ident(s) => Some(s.clone()),
        _ => None,
    }
}

fn tokenize(sql: &str) -> Vec<Token> {
    let chars: Vec<(usize, char)> = sql.char_indices().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let (start, c) = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '\'' || c == '"' {
            let mut text = String::new();
            i += 1;
            while i < chars.len() {
                let ch = chars[i].1;
                if ch == c {
                    if chars.get(i + 1).map(|x| x.1) == Some(c) {
                        text.push(c);
                        i += 2;
                        continue;
                    }
                    break;
                }
                text.push(ch);
                i += 1;
            }
            i += 1;
            let tok = if c == '\'' {
                Tok::Str(text)
            } else {
                Tok::Ident(text)
            };
            out.push(Token { tok, start });
            continue;
        }
        if c.is_ascii_digit() {
            let mut n: i64 = 0;
            while i < chars.len() && chars[i].1.is_ascii_digit() {
                n = n
                    .saturating_mul(10)
                    .saturating_add(i64::from(chars[i].1.to_digit(10).unwrap_or(0)));
                i += 1;
            }
            out.push(Token {
                tok: Tok::Num(n),
                start,
            });
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let mut word = String::new();
            while i < chars.len() && (chars[i].1.is_alphanumeric() || chars[i].1 == '_') {
                word.push(chars[i].1);
                i += 1;
            }
            out.push(Token {
                tok: Tok::Word(word),
                start,
            });
            continue;
        }
        out.push(Token {
            tok: Tok::Punct(c),
            start,
        });
        i += 1;
    }
    out
}

struct Parser<'a> {
    sql: &'a str,
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(sql: &'a str, tokens: &'a [Token]) -> Self {
        Self {
            sql,
            tokens,
            pos: 0,
        }
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|t| &t.tok)
    }

    fn peek_text(&self) -> &str {
        match self.tokens.get(self.pos) {
            Some(t) => self.sql[t.start..].split_whitespace().next().unwrap_or(""),
            None => "end of input",
        }
    }

    /// The raw text from the current token on.
    fn rest(&self) -> &'a str {
        let sql = self.sql;
        self.tokens.get(self.pos).map_or("", |t| &sql[t.start..])
    }

    fn next_word(&mut self) -> Option<String> {
        match self.peek() {
            Some(Tok::Word(w)) => {
                let w = w.to_ascii_uppercase();
                self.pos += 1;
                Some(w)
            }
            _ => None,
        }
    }

    /// Constraint words after a column type, stopping at `,` or `)`.
    fn next_word_in_column(&mut self) -> Option<String> {
        let mut depth = 0usize;
        loop {
            match self.peek() {
                Some(Tok::Word(_)) if depth == 0 => return self.next_word(),
                Some(Tok::Punct(',' | ')')) if depth == 0 => return None,
                None => return None,
                Some(Tok::Punct('(')) => depth += 1,
                Some(Tok::Punct(')')) => depth -= 1,
                Some(_) => {}
            }
            self.pos += 1;
        }
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_kw(kw)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_kw(&mut self, kw: &str) -> Result<(), ServerError> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(syntax_error(self.peek_text()))
        }
    }

    fn eat_punct(&mut self, c: char) -> bool {
        if self.peek() == Some(&Tok::Punct(c)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, c: char) -> Result<(), ServerError> {
        if self.eat_punct(c) {
            Ok(())
        } else {
            Err(syntax_error(self.peek_text()))
        }
    }

    fn expect_name(&mut self) -> Result<String, ServerError> {
        match self.peek().and_then(name_of) {
            Some(name) => {
                self.pos += 1;
                Ok(name)
            }
            None => Err(syntax_error(self.peek_text())),
        }
    }

    fn number(&mut self) -> Option<usize> {
        match self.peek() {
            Some(Tok::Num(n)) => {
                let n = usize::try_from(*n).ok()?;
                self.pos += 1;
                Some(n)
            }
            _ => None,
        }
    }

    fn string(&mut self) -> Result<String, ServerError> {
        match self.peek() {
            Some(Tok::Str(s)) => {
                let s = s.clone();
                self.pos += 1;
                Ok(s)
            }
            _ => Err(syntax_error(self.peek_text())),
        }
    }

    fn value(&mut self) -> Result<Cell, ServerError> {
        let negative = self.eat_punct('-');
        let cell = match self.peek() {
            Some(Tok::Num(n)) => {
                let n = if negative { -n } else { *n };
                Cell::text(&n.to_string())
            }
            Some(Tok::Str(s)) if !negative => Cell::text(s),
            Some(tok) if tok.is_kw("NULL") && !negative => Cell::null(),
            _ => return Err(syntax_error(self.peek_text())),
        };
        self.pos += 1;
        Ok(cell)
    }

    /// Select-list items up to a top-level FROM.
    fn select_items(&mut self) -> Vec<Vec<Tok>> {
        let mut items = Vec::new();
        let mut current = Vec::new();
        let mut depth = 0usize;
        while let Some(tok) = self.peek() {
            match tok {
                Tok::Word(_) if depth == 0 && tok.is_kw("FROM") => break,
                Tok::Punct(',') if depth == 0 => {
                    items.push(std::mem::take(&mut current));
                    self.pos += 1;
                    continue;
                }
                Tok::Punct('(') => depth += 1,
                Tok::Punct(')') => depth = depth.saturating_sub(1),
                _ => {}
            }
            current.push(tok.clone());
            self.pos += 1;
        }
        if !current.is_empty() {
            items.push(current);
        }
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(transport: &mut dyn Transport, sql: &str) -> Vec<BackendMessage> {
        transport.send(sql).unwrap();
        let mut out = Vec::new();
        while let Some(m) = transport.next_message().unwrap() {
            out.push(m);
        }
        out
    }

    #[test]
    fn fetch_follows_cursor_positions() {
        let server = FakeServer::new();
        server.seed_numbers("t", 5);
        let mut transport = server.connect(&ConnectionParams::default()).unwrap();
        run(&mut *transport, "BEGIN;DECLARE \"c\" SCROLL CURSOR FOR SELECT id FROM t");
        let out = run(&mut *transport, "FETCH FORWARD 3 IN \"c\"");
        assert_eq!(out.last(), Some(&complete("FETCH 3")));
        let out = run(&mut *transport, "FETCH FORWARD 3 IN \"c\"");
        assert_eq!(out.last(), Some(&complete("FETCH 2")));
        let out = run(&mut *transport, "MOVE BACKWARD 1 IN \"c\"");
        assert_eq!(out, vec![complete("MOVE 1")]);
        let out = run(&mut *transport, "FETCH FORWARD 1 IN \"c\"");
        assert_eq!(out.last(), Some(&complete("FETCH 0")));
        let out = run(&mut *transport, "MOVE BACKWARD 5 IN \"c\"");
        assert_eq!(out, vec![complete("MOVE 5")]);
        let out = run(&mut *transport, "MOVE ALL IN \"c\"");
        assert_eq!(out, vec![complete("MOVE 4")]);
    }

    #[test]
    fn failed_blocks_reject_statements() {
        let server = FakeServer::new();
        let mut transport = server.connect(&ConnectionParams::default()).unwrap();
        let out = run(&mut *transport, "BEGIN;SELECT 1/0;SELECT 1");
        assert_eq!(out.len(), 2);
        assert_eq!(transport.transaction_status(), TransactionStatus::InError);
        let out = run(&mut *transport, "SELECT 1");
        assert!(matches!(&out[0], BackendMessage::Error(e) if e.sqlstate == "25P02"));
        run(&mut *transport, "ROLLBACK");
        assert_eq!(transport.transaction_status(), TransactionStatus::Idle);
    }

    #[test]
    fn savepoints_restore_tables() {
        let server = FakeServer::new();
        server.seed_numbers("t", 1);
        let mut transport = server.connect(&ConnectionParams::default()).unwrap();
        run(
            &mut *transport,
            "BEGIN;SAVEPOINT s;INSERT INTO t VALUES (2, 'b');ROLLBACK TO SAVEPOINT s;RELEASE s",
        );
        assert_eq!(server.table_rows("t"), 1);
        assert_eq!(transport.transaction_status(), TransactionStatus::InTransaction);
    }

    #[test]
    fn tokenizer_keeps_quoted_text() {
        let tokens = tokenize("SELECT 'it''s', \"Mixed\" FROM t");
        assert_eq!(tokens[1].tok, Tok::Str("it's".to_string()));
        assert_eq!(tokens[3].tok, Tok::Ident("Mixed".to_string()));
    }
}
