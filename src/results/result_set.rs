use std::sync::{Arc, Weak};

use crate::error::{DriverError, ServerError, ServerNotice};
use crate::session::{CursorHandle, SessionShared};
use crate::types::{Cell, Columns, CommandTag};

use super::fetch::{FetchPlan, Target};
use super::keyset::{DeltaBuffers, KeyColumns, KeysetEntry, RowStatus};
use super::row::Row;
use super::store::RowStore;

/// Outcome class of one statement in a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultStatus {
    /// The statement completed without returning rows.
    CommandOk,
    /// The statement returned a (possibly empty) row set.
    TuplesOk,
    /// The statement text was empty.
    EmptyQuery,
    /// The statement failed; see [`ResultSet::error`].
    Error,
    /// The statement tried to start a COPY transfer, which was refused.
    CopyRejected,
}

/// Identity of a server-side cursor inside its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CursorId {
    pub handle: CursorHandle,
    pub name: String,
}

/// Live server cursor backing an incremental result.
#[derive(Debug)]
pub(crate) struct ServerCursor {
    pub id: CursorId,
    pub session: Weak<SessionShared>,
    /// 0 before the first row, `k` on 1-based row `k`, `n + 1` after the last row.
    pub server_pos: usize,
    /// Keep earlier windows when fetching forward so the caller can scroll back locally.
    pub scrollable: bool,
    pub closed: bool,
}

/// The result of one statement.
///
/// Eager results hold every row in the cache. Incremental results hold a window of rows over a
/// server-side cursor and pull further windows on demand from [`ResultSet::advance_row`].
#[derive(Debug)]
pub struct ResultSet {
    pub(crate) status: ResultStatus,
    pub(crate) tag: Option<CommandTag>,
    pub(crate) columns: Arc<Columns>,
    pub(crate) notices: Vec<ServerNotice>,
    pub(crate) error: Option<ServerError>,
    pub(crate) store: RowStore,
    /// Logical row number of the first cached row.
    pub(crate) base: usize,
    /// Logical row number the next advance looks at.
    pub(crate) next: usize,
    /// Logical row number of the row last returned.
    pub(crate) current: Option<usize>,
    /// Rows the server holds, once a short fetch or move has revealed it.
    pub(crate) server_rows: Option<usize>,
    pub(crate) end_seen: bool,
    /// Highest logical row number received from the server so far, plus one.
    pub(crate) rows_read: usize,
    pub(crate) pending: Option<Target>,
    pub(crate) cursor: Option<ServerCursor>,
    pub(crate) key_columns: KeyColumns,
    pub(crate) deltas: DeltaBuffers,
    pub(crate) plan: FetchPlan,
}

impl ResultSet {
    pub(crate) fn new(
        status: ResultStatus,
        tag: Option<CommandTag>,
        columns: Arc<Columns>,
    ) -> Self {
        Self {
            status,
            tag,
            columns,
            notices: Vec::new(),
            error: None,
            store: RowStore::new(false),
            base: 0,
            next: 0,
            current: None,
            server_rows: Some(0),
            end_seen: true,
            rows_read: 0,
            pending: None,
            cursor: None,
            key_columns: KeyColumns::default(),
            deltas: DeltaBuffers::default(),
            plan: FetchPlan::default(),
        }
    }

    /// An eager result holding every row of the response.
    ///
    /// # Errors
    /// Returns `DriverError::OutOfMemory` if the cache cannot hold the rows.
    pub(crate) fn eager(
        tag: Option<CommandTag>,
        columns: Arc<Columns>,
        raw: Vec<Vec<Cell>>,
    ) -> Result<Self, DriverError> {
        let mut result = Self::new(ResultStatus::TuplesOk, tag, columns);
        let count = raw.len();
        let rows = raw
            .into_iter()
            .map(|cells| Row::new(Arc::clone(&result.columns), cells))
            .collect();
        result.store.replace(rows, Vec::new())?;
        result.server_rows = Some(count);
        result.rows_read = count;
        Ok(result)
    }

    pub(crate) fn failed(error: ServerError, copy_rejected: bool) -> Self {
        let status = if copy_rejected {
            ResultStatus::CopyRejected
        } else {
            ResultStatus::Error
        };
        let mut result = Self::new(status, None, Arc::new(Columns::default()));
        result.error = Some(error);
        result
    }

    /// An incremental result over a freshly declared cursor, primed with the first fetch.
    ///
    /// `requested` is the row count the first fetch asked for; fewer rows means the cursor is
    /// exhausted.
    ///
    /// # Errors
    /// Returns `DriverError::OutOfMemory` if the first window cannot be cached.
    pub(crate) fn incremental(
        tag: Option<CommandTag>,
        raw_columns: &Columns,
        first: Vec<Vec<Cell>>,
        requested: usize,
        cursor: ServerCursor,
        plan: FetchPlan,
        key_columns: KeyColumns,
        track_keys: bool,
    ) -> Result<Self, DriverError> {
        let columns = Arc::new(key_columns.visible(raw_columns));
        let mut result = Self::new(ResultStatus::TuplesOk, tag, columns);
        result.store = RowStore::new(track_keys);
        result.server_rows = None;
        result.end_seen = false;
        result.key_columns = key_columns;
        result.plan = plan;
        let got = first.len();
        result.cursor = Some(ServerCursor {
            server_pos: if got < requested { got + 1 } else { got },
            ..cursor
        });
        result.absorb(0, first, requested)?;
        Ok(result)
    }

    #[must_use]
    pub fn status(&self) -> ResultStatus {
        self.status
    }

    #[must_use]
    pub fn tag(&self) -> Option<&CommandTag> {
        self.tag.as_ref()
    }

    /// Rows affected or returned, as reported by the completion tag.
    #[must_use]
    pub fn rows_affected(&self) -> Option<u64> {
        self.tag.as_ref().and_then(CommandTag::rows)
    }

    #[must_use]
    pub fn columns(&self) -> &Arc<Columns> {
        &self.columns
    }

    #[must_use]
    pub fn notices(&self) -> &[ServerNotice] {
        &self.notices
    }

    #[must_use]
    pub fn error(&self) -> Option<&ServerError> {
        self.error.as_ref()
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// True when rows are pulled from a server-side cursor.
    #[must_use]
    pub fn is_incremental(&self) -> bool {
        self.cursor.is_some()
    }

    #[must_use]
    pub fn cursor_name(&self) -> Option<&str> {
        self.cursor.as_ref().map(|c| c.id.name.as_str())
    }

    /// Whether the backing cursor has been closed. Eager results report `true`.
    #[must_use]
    pub fn is_cursor_closed(&self) -> bool {
        self.cursor.as_ref().is_none_or(|c| c.closed)
    }

    /// The rows currently cached, starting at logical row [`ResultSet::window_start`].
    #[must_use]
    pub fn cached_rows(&self) -> &[Row] {
        self.store.rows()
    }

    #[must_use]
    pub fn window_start(&self) -> usize {
        self.base
    }

    /// Total logical rows, once known. Includes rows registered through
    /// [`ResultSet::register_insert`].
    #[must_use]
    pub fn total_rows(&self) -> Option<usize> {
        self.server_rows.map(|n| n + self.deltas.added.len())
    }

    /// Rows received from the server so far.
    #[must_use]
    pub fn rows_read(&self) -> usize {
        self.rows_read
    }

    /// Logical row number of the row last returned by [`ResultSet::advance_row`].
    #[must_use]
    pub fn position(&self) -> Option<usize> {
        self.current
    }

    #[must_use]
    pub fn current_row(&self) -> Option<&Row> {
        self.current
            .and_then(|c| c.checked_sub(self.base))
            .and_then(|i| self.store.row(i))
    }

    /// Keyset entry for a cached row of an updatable result.
    #[must_use]
    pub fn keyset_entry(&self, logical: usize) -> Option<&KeysetEntry> {
        logical
            .checked_sub(self.base)
            .and_then(|i| self.store.key(i))
    }

    #[must_use]
    pub fn is_updatable(&self) -> bool {
        self.store.tracks_keys()
    }

    /// Record a local update of a row. Cached copies are overwritten in place.
    ///
    /// # Errors
    /// Returns `DriverError::Cursor` for results without a keyset and `DriverError::Execution` when
    /// the cell count does not match the columns.
    pub fn register_update(&mut self, logical: usize, cells: Vec<Cell>) -> Result<(), DriverError> {
        self.require_updatable()?;
        if cells.len() != self.columns.len() {
            return Err(DriverError::Execution(format!(
                "update supplies {} values for {} columns",
                cells.len(),
                self.columns.len()
            )));
        }
        if let Some(added) = self
            .server_rows
            .and_then(|n| logical.checked_sub(n))
            .and_then(|i| self.deltas.added.get_mut(i))
        {
            added.clone_from(&cells);
        } else {
            self.deltas.updated.insert(logical, cells.clone());
        }
        if let Some(i) = self.window_index(logical) {
            if let Some(row) = self.store.row_mut(i) {
                row.cells = cells;
            }
            if let Some(entry) = self.store.key_mut(i)
                && entry.status == RowStatus::Clean
            {
                entry.status = RowStatus::Updated;
            }
        }
        Ok(())
    }

    /// Record a local delete. The row is skipped by later advances.
    ///
    /// # Errors
    /// Returns `DriverError::Cursor` for results without a keyset.
    pub fn register_delete(&mut self, logical: usize) -> Result<(), DriverError> {
        self.require_updatable()?;
        self.deltas.deleted.insert(logical);
        if let Some(entry) = self
            .window_index(logical)
            .and_then(|i| self.store.key_mut(i))
        {
            entry.status = RowStatus::Deleted;
        }
        Ok(())
    }

    /// Record a locally added row. It is delivered after the last server row.
    ///
    /// # Errors
    /// Returns `DriverError::Cursor` for results without a keyset and `DriverError::Execution` when
    /// the cell count does not match the columns.
    pub fn register_insert(&mut self, cells: Vec<Cell>) -> Result<(), DriverError> {
        self.require_updatable()?;
        if cells.len() != self.columns.len() {
            return Err(DriverError::Execution(format!(
                "insert supplies {} values for {} columns",
                cells.len(),
                self.columns.len()
            )));
        }
        self.deltas.added.push(cells);
        Ok(())
    }

    /// Whether local edits are waiting to be merged with the server's rows.
    #[must_use]
    pub fn has_pending_edits(&self) -> bool {
        !self.deltas.is_empty()
    }

    fn require_updatable(&self) -> Result<(), DriverError> {
        if self.store.tracks_keys() {
            Ok(())
        } else {
            Err(DriverError::Cursor("result set is not updatable".to_string()))
        }
    }

    pub(crate) fn window_index(&self, logical: usize) -> Option<usize> {
        let i = logical.checked_sub(self.base)?;
        (i < self.store.len()).then_some(i)
    }

    /// Close the backing server cursor. Closing twice, or closing an eager result, does nothing.
    ///
    /// # Errors
    /// Returns the session's error if the close could neither be sent nor deferred.
    pub fn close_cursor(&mut self) -> Result<(), DriverError> {
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(());
        };
        if cursor.closed {
            return Ok(());
        }
        cursor.closed = true;
        self.pending = None;
        self.store.release();
        self.base = self.next;
        match cursor.session.upgrade() {
            Some(shared) => shared.close_cursor(&cursor.id),
            None => Ok(()),
        }
    }
}

impl Drop for ResultSet {
    fn drop(&mut self) {
        if let Some(cursor) = self.cursor.as_ref().filter(|c| !c.closed)
            && let Some(shared) = cursor.session.upgrade()
        {
            shared.discard_cursor(&cursor.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ColumnDescriptor;

    fn columns() -> Arc<Columns> {
        Arc::new(Columns::new(vec![
            ColumnDescriptor::new("id", 23),
            ColumnDescriptor::new("name", 25),
        ]))
    }

    #[test]
    fn eager_results_are_complete() {
        let raw = vec![
            vec![Cell::text("1"), Cell::text("a")],
            vec![Cell::text("2"), Cell::null()],
        ];
        let rs = ResultSet::eager(Some(CommandTag::new("SELECT 2")), columns(), raw).unwrap();
        assert_eq!(rs.total_rows(), Some(2));
        assert_eq!(rs.rows_affected(), Some(2));
        assert!(!rs.is_incremental());
        assert!(rs.is_cursor_closed());
        assert!(rs.cached_rows()[1].get("name").unwrap().is_null());
    }

    #[test]
    fn eager_results_reject_edits() {
        let mut rs = ResultSet::eager(None, columns(), Vec::new()).unwrap();
        let err = rs.register_delete(0).unwrap_err();
        assert!(matches!(err, DriverError::Cursor(_)));
    }

    #[test]
    fn closing_an_eager_result_is_a_no_op() {
        let mut rs = ResultSet::new(ResultStatus::CommandOk, None, columns());
        rs.close_cursor().unwrap();
        rs.close_cursor().unwrap();
    }
}
