//! Scroll and fetch engine for incremental results.
//!
//! The cache window covers logical rows `base .. base + cached`. Advancing inside the window costs
//! nothing; leaving it repositions the server cursor with MOVE when needed and pulls the next
//! window with a single FETCH.

use std::sync::Arc;

use crate::error::DriverError;
use crate::types::{Cell, Columns, CommandTag};

use super::keyset::{KeysetEntry, RowStatus};
use super::result_set::{CursorId, ResultSet, ResultStatus};
use super::row::Row;

/// Scroll request accepted by [`ResultSet::reposition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchDirection {
    Next,
    Prior,
    First,
    Last,
    /// 1-based row number; negative counts back from the end, 0 means the first row.
    Absolute(i64),
    /// Offset from the row last returned.
    Relative(i64),
}

/// A scroll target not yet applied to the server cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Target {
    Index(usize),
    /// `k` rows before the end; `FromEnd(1)` is the last row.
    FromEnd(usize),
}

/// Fetch sizing for an incremental result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FetchPlan {
    pub batch: usize,
    /// Caller row-set size; fetches end on a row-set boundary. 0 or 1 disables widening.
    pub rowset: usize,
    /// Logical row where the caller's row-set numbering starts.
    pub rowset_origin: usize,
}

impl Default for FetchPlan {
    fn default() -> Self {
        Self {
            batch: 1,
            rowset: 0,
            rowset_origin: 0,
        }
    }
}

impl FetchPlan {
    pub(crate) fn new(batch: usize, rowset: usize) -> Self {
        Self {
            batch: batch.max(1),
            rowset,
            rowset_origin: 0,
        }
    }

    /// Rows to request for a window starting at `start`.
    pub(crate) fn size_for(&self, start: usize) -> usize {
        let mut size = self.batch.max(1);
        if self.rowset > 1 {
            let rem = (start + size).saturating_sub(self.rowset_origin) % self.rowset;
            if rem != 0 {
                size += self.rowset - rem;
            }
        }
        size
    }
}

/// Cursor commands the engine needs from the session.
pub(crate) trait CursorIo {
    /// Fail if the cursor was abandoned or no longer exists on the server.
    fn ensure_alive(&self, cursor: &CursorId) -> Result<(), DriverError>;

    /// `FETCH FORWARD count`; returns raw rows including hidden identity columns.
    fn fetch(&self, cursor: &CursorId, count: usize) -> Result<Vec<Vec<Cell>>, DriverError>;

    /// `MOVE FORWARD` for positive deltas, `MOVE BACKWARD` for negative ones; returns the count the
    /// server reports.
    fn move_by(&self, cursor: &CursorId, delta: i64) -> Result<usize, DriverError>;

    /// `MOVE ALL`; returns the count the server reports.
    fn move_all(&self, cursor: &CursorId) -> Result<usize, DriverError>;
}

impl ResultSet {
    /// Return the next row, fetching the next window from the server cursor when the cache is
    /// spent.
    ///
    /// `Ok(None)` is end-of-data. At most one FETCH is issued per call unless every row of the
    /// fetched window was deleted locally.
    ///
    /// # Errors
    /// Returns `DriverError::Cursor` when the cursor is closed or vanished, or when a forward-only
    /// cursor is asked for a row behind it. Returns `DriverError::OutOfMemory` when the window
    /// cannot be cached, and the session's error when a FETCH or MOVE fails. Cached rows are left
    /// intact in every case.
    pub fn advance_row(&mut self) -> Result<Option<&Row>, DriverError> {
        let session = self
            .cursor
            .as_ref()
            .filter(|c| !c.closed)
            .and_then(|c| c.session.upgrade());
        let idx = match &session {
            Some(shared) => self.step(Some(&**shared as &dyn CursorIo))?,
            None => self.step(None)?,
        };
        Ok(idx.and_then(|i| self.store.row(i)))
    }

    /// Schedule a scroll. The move happens on the next [`ResultSet::advance_row`], which returns
    /// the target row. Targets before the first row clamp to the first row.
    ///
    /// A forward-only cursor serves backward targets from the cached window only; anything further
    /// back fails the next advance with `DriverError::Cursor` without touching the server.
    pub fn reposition(&mut self, direction: FetchDirection) {
        let anchor = self.anchor();
        let target = match direction {
            FetchDirection::Next => Target::Index(clamp(anchor + 1)),
            FetchDirection::Prior => Target::Index(clamp(anchor - 1)),
            FetchDirection::First => Target::Index(0),
            FetchDirection::Last => Target::FromEnd(1),
            FetchDirection::Absolute(n) if n < 0 => {
                Target::FromEnd(usize::try_from(n.unsigned_abs()).unwrap_or(usize::MAX))
            }
            FetchDirection::Absolute(n) => Target::Index(clamp(n - 1)),
            FetchDirection::Relative(k) => Target::Index(clamp(anchor + k)),
        };
        tracing::trace!(?direction, ?target, "reposition requested");
        self.schedule(target);
    }

    /// Logical row the relative directions count from.
    fn anchor(&self) -> i64 {
        match self.current {
            Some(c) => to_i64(c),
            None if self.at_end() => to_i64(self.next),
            None => to_i64(self.next) - 1,
        }
    }

    fn schedule(&mut self, target: Target) {
        self.current = None;
        let resolved = match (target, self.total_rows()) {
            (Target::FromEnd(k), Some(total)) => Target::Index(total.saturating_sub(k)),
            (other, _) => other,
        };
        match resolved {
            Target::Index(t) if self.resolves_locally(t) => {
                self.pending = None;
                self.next = self.total_rows().map_or(t, |total| t.min(total));
                self.plan.rowset_origin = self.next;
            }
            other => self.pending = Some(other),
        }
    }

    fn resolves_locally(&self, t: usize) -> bool {
        self.is_cursor_closed()
            || self.window_index(t).is_some()
            || self.total_rows().is_some_and(|total| t >= total)
            || self.server_rows.is_some_and(|n| t >= n)
    }

    pub(crate) fn at_end(&self) -> bool {
        self.end_seen && self.total_rows().is_some_and(|total| self.next >= total)
    }

    fn next_in_window(&mut self) -> Option<usize> {
        while let Some(i) = self.window_index(self.next) {
            self.next += 1;
            if self.store.key(i).is_some_and(KeysetEntry::is_deleted) {
                continue;
            }
            self.current = Some(self.next - 1);
            return Some(i);
        }
        None
    }

    /// Core of [`ResultSet::advance_row`]; returns the cache index of the row to hand out.
    pub(crate) fn step(&mut self, io: Option<&dyn CursorIo>) -> Result<Option<usize>, DriverError> {
        loop {
            if self.pending.is_none() {
                if let Some(i) = self.next_in_window() {
                    return Ok(Some(i));
                }
                if self.at_end() {
                    self.current = None;
                    return Ok(None);
                }
                if self.fill_from_added()? {
                    continue;
                }
            }
            let Some(cursor) = self.cursor.as_ref() else {
                self.current = None;
                return Ok(None);
            };
            let Some(io) = io else {
                return Err(if cursor.closed {
                    DriverError::Cursor(format!("cursor {} is closed", cursor.id.name))
                } else {
                    DriverError::NotConnected
                });
            };
            let id = cursor.id.clone();
            if let Some(target) = self.pending {
                if let Err(e) = self.check_forward_only(target) {
                    self.pending = None;
                    return Err(e);
                }
            }
            io.ensure_alive(&id)?;
            if let Some(target) = self.pending.take() {
                if let Err(e) = self.apply_target(io, &id, target) {
                    self.pending = Some(target);
                    return Err(e);
                }
                continue;
            }
            self.fetch_window(io, &id)?;
        }
    }

    /// A forward-only cursor can only reach uncached rows ahead of the server position.
    fn check_forward_only(&self, target: Target) -> Result<(), DriverError> {
        let Some(cursor) = self.cursor.as_ref().filter(|c| !c.scrollable) else {
            return Ok(());
        };
        let backward = match target {
            Target::Index(t) => self.window_index(t).is_none() && t < cursor.server_pos,
            Target::FromEnd(_) => true,
        };
        if backward {
            Err(DriverError::Cursor(format!(
                "cursor {} is forward-only and the requested row is no longer cached",
                cursor.id.name
            )))
        } else {
            Ok(())
        }
    }

    /// Turn a pending target into a concrete `next`, moving to the end first for end-relative
    /// targets.
    fn apply_target(
        &mut self,
        io: &dyn CursorIo,
        id: &CursorId,
        target: Target,
    ) -> Result<(), DriverError> {
        let t = match target {
            Target::Index(t) => t,
            Target::FromEnd(k) => {
                if self.server_rows.is_none() {
                    let pos = self.server_pos();
                    let moved = io.move_all(id)?;
                    let total = pos + moved;
                    tracing::debug!(cursor = %id.name, total, "moved to end of cursor");
                    self.note_end(total);
                    self.set_server_pos(total + 1);
                }
                self.total_rows().unwrap_or_default().saturating_sub(k)
            }
        };
        self.next = t;
        self.plan.rowset_origin = t;
        // a move revealing the end may put the target past the last row
        if self.window_index(t).is_none()
            && !self.at_end()
            && self.server_rows.is_none_or(|n| t < n)
        {
            self.seek(io, id, t)?;
        }
        if let Some(total) = self.total_rows() {
            self.next = self.next.min(total);
        }
        Ok(())
    }

    /// Position the server cursor so the next FETCH FORWARD returns logical row `t`.
    fn seek(&mut self, io: &dyn CursorIo, id: &CursorId, t: usize) -> Result<(), DriverError> {
        let pos = self.server_pos();
        if pos == t {
            return Ok(());
        }
        if t > pos {
            let want = t - pos;
            let moved = io.move_by(id, to_i64(want))?;
            if moved < want {
                self.note_end(pos + moved);
                self.set_server_pos(pos + moved + 1);
            } else {
                self.set_server_pos(t);
            }
        } else {
            io.move_by(id, -to_i64(pos - t))?;
            self.set_server_pos(t);
        }
        Ok(())
    }

    fn fetch_window(&mut self, io: &dyn CursorIo, id: &CursorId) -> Result<(), DriverError> {
        let start = self.next;
        self.seek(io, id, start)?;
        if self.at_end() {
            return Ok(());
        }
        let size = self.plan.size_for(start);
        let raw = io.fetch(id, size)?;
        let got = raw.len();
        tracing::debug!(cursor = %id.name, start, size, got, "fetched window");
        self.set_server_pos(if got < size { start + got + 1 } else { start + got });
        self.absorb(start, raw, size)
    }

    /// Place fetched rows into the cache at logical row `start` and merge local edits.
    ///
    /// # Errors
    /// Returns `DriverError::OutOfMemory` with the previous window untouched.
    pub(crate) fn absorb(
        &mut self,
        start: usize,
        raw: Vec<Vec<Cell>>,
        requested: usize,
    ) -> Result<(), DriverError> {
        let got = raw.len();
        let short = got < requested;
        let track = self.store.tracks_keys();
        let mut rows = Vec::new();
        rows.try_reserve_exact(requested.max(got)).map_err(|e| {
            DriverError::OutOfMemory(format!("fetch window of {requested} rows: {e}"))
        })?;
        let mut keys = Vec::new();
        if track {
            keys.try_reserve_exact(requested.max(got)).map_err(|e| {
                DriverError::OutOfMemory(format!("keyset window of {requested} rows: {e}"))
            })?;
        }
        for (j, cells) in raw.into_iter().enumerate() {
            let logical = start + j;
            let (mut visible, mut entry) = self.key_columns.split(cells, logical);
            self.deltas.overlay(logical, &mut visible, &mut entry);
            rows.push(Row::new(Arc::clone(&self.columns), visible));
            if track {
                keys.push(entry);
            }
        }
        if short {
            for cells in self.deltas.added.iter().take(requested - got) {
                rows.push(Row::new(Arc::clone(&self.columns), cells.clone()));
                if track {
                    keys.push(added_entry());
                }
            }
        }
        let contiguous = self
            .cursor
            .as_ref()
            .is_some_and(|c| c.scrollable)
            && self.store.len() > 0
            && start == self.base + self.store.len();
        if contiguous {
            self.store.append(rows, keys)?;
        } else {
            self.store.replace(rows, keys)?;
            self.base = start;
        }
        self.rows_read = self.rows_read.max(start + got);
        if short {
            self.note_end(start + got);
        }
        Ok(())
    }

    /// Serve locally added rows once the server rows are exhausted.
    fn fill_from_added(&mut self) -> Result<bool, DriverError> {
        let Some(server) = self.server_rows.filter(|_| self.end_seen) else {
            return Ok(false);
        };
        let Some(offset) = self.next.checked_sub(server) else {
            return Ok(false);
        };
        if offset >= self.deltas.added.len() || self.window_index(self.next).is_some() {
            return Ok(false);
        }
        let track = self.store.tracks_keys();
        let mut rows = Vec::new();
        let mut keys = Vec::new();
        for cells in self.deltas.added.iter().skip(offset).take(self.plan.batch.max(1)) {
            rows.push(Row::new(Arc::clone(&self.columns), cells.clone()));
            if track {
                keys.push(added_entry());
            }
        }
        self.store.replace(rows, keys)?;
        self.base = self.next;
        Ok(true)
    }

    fn note_end(&mut self, server_rows: usize) {
        self.end_seen = true;
        self.server_rows = Some(server_rows);
    }

    fn server_pos(&self) -> usize {
        self.cursor.as_ref().map_or(0, |c| c.server_pos)
    }

    fn set_server_pos(&mut self, pos: usize) {
        if let Some(cursor) = self.cursor.as_mut() {
            cursor.server_pos = pos;
        }
    }

    /// Replace the window with rows the caller fetched through a reused submission.
    ///
    /// `requested` is the row count of the caller's forward FETCH when it could be read from the
    /// text; fewer rows than that mark the end of the cursor.
    ///
    /// # Errors
    /// Returns `DriverError::OutOfMemory` with the previous window untouched.
    pub(crate) fn refill(
        &mut self,
        columns: &Columns,
        raw: Vec<Vec<Cell>>,
        tag: Option<CommandTag>,
        requested: Option<usize>,
    ) -> Result<(), DriverError> {
        if self.columns.is_empty() {
            self.columns = Arc::new(self.key_columns.visible(columns));
            self.status = ResultStatus::TuplesOk;
        }
        let got = raw.len();
        self.pending = None;
        self.current = None;
        if self.cursor.is_none() {
            self.absorb(0, raw, got)?;
            self.next = 0;
            self.rows_read = got;
            self.note_end(got);
        } else {
            let start = self.next;
            let pos = self.server_pos();
            // an empty answer ends the cursor whatever was asked for
            let requested = requested.unwrap_or(1);
            let short = got < requested;
            // a caller-issued fetch moves forward from the current position
            self.set_server_pos(if short { pos + got + 1 } else { pos + got });
            // capped at what can arrive: the rows plus locally added ones
            let window = if short {
                requested.min(got + 1 + self.deltas.added.len())
            } else {
                got
            };
            self.absorb(start, raw, window)?;
        }
        if tag.is_some() {
            self.tag = tag;
        }
        Ok(())
    }
}

fn added_entry() -> KeysetEntry {
    KeysetEntry {
        tuple: None,
        surrogate: None,
        status: RowStatus::Added,
    }
}

fn clamp(idx: i64) -> usize {
    usize::try_from(idx.max(0)).unwrap_or(usize::MAX)
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::sync::Weak;

    use super::*;
    use crate::config::CursorOptions;
    use crate::results::keyset::KeyColumns;
    use crate::results::result_set::ServerCursor;
    use crate::session::CursorHandle;
    use crate::types::{ColumnDescriptor, Columns};

    /// Cursor over `n` integer rows that records the commands it receives.
    struct ScriptedCursor {
        rows: usize,
        pos: RefCell<usize>,
        log: RefCell<Vec<String>>,
    }

    impl ScriptedCursor {
        fn new(rows: usize) -> Self {
            Self {
                rows,
                pos: RefCell::new(0),
                log: RefCell::new(Vec::new()),
            }
        }

        fn fetches(&self) -> Vec<String> {
            self.log
                .borrow()
                .iter()
                .filter(|c| c.starts_with("FETCH"))
                .cloned()
                .collect()
        }
    }

    impl CursorIo for ScriptedCursor {
        fn ensure_alive(&self, _cursor: &CursorId) -> Result<(), DriverError> {
            Ok(())
        }

        fn fetch(&self, _cursor: &CursorId, count: usize) -> Result<Vec<Vec<Cell>>, DriverError> {
            let mut pos = self.pos.borrow_mut();
            let first = (*pos).min(self.rows);
            let last = (first + count).min(self.rows);
            let out: Vec<Vec<Cell>> = (first..last)
                .map(|i| vec![Cell::text(&i.to_string())])
                .collect();
            *pos = if last - first < count { self.rows + 1 } else { last };
            self.log.borrow_mut().push(format!("FETCH {count} -> {}", out.len()));
            Ok(out)
        }

        fn move_by(&self, _cursor: &CursorId, delta: i64) -> Result<usize, DriverError> {
            let mut pos = self.pos.borrow_mut();
            self.log.borrow_mut().push(format!("MOVE {delta}"));
            if delta >= 0 {
                let d = delta as usize;
                let moved = d.min(self.rows.saturating_sub(*pos));
                *pos = if moved < d { self.rows + 1 } else { *pos + d };
                Ok(moved)
            } else {
                let d = delta.unsigned_abs() as usize;
                let moved = d.min(pos.saturating_sub(1));
                *pos = pos.saturating_sub(d);
                Ok(moved)
            }
        }

        fn move_all(&self, _cursor: &CursorId) -> Result<usize, DriverError> {
            let mut pos = self.pos.borrow_mut();
            let moved = self.rows.saturating_sub(*pos);
            *pos = self.rows + 1;
            self.log.borrow_mut().push("MOVE ALL".to_string());
            Ok(moved)
        }
    }

    fn cursor_result(io: &ScriptedCursor, opts: CursorOptions, batch: usize) -> ResultSet {
        let cols = Columns::new(vec![ColumnDescriptor::new("n", 23)]);
        let plan = FetchPlan::new(opts.fetch_size.unwrap_or(batch), opts.rowset_size);
        let size = plan.size_for(0);
        let id = CursorId {
            handle: CursorHandle::dangling(),
            name: "SQL_CUR1".to_string(),
        };
        let first = io.fetch(&id, size).unwrap();
        ResultSet::incremental(
            None,
            &cols,
            first,
            size,
            ServerCursor {
                id,
                session: Weak::new(),
                server_pos: 0,
                scrollable: opts.scrollable,
                closed: false,
            },
            plan,
            KeyColumns::default(),
            opts.updatable,
        )
        .unwrap()
    }

    fn next_value(rs: &mut ResultSet, io: &ScriptedCursor) -> Option<String> {
        rs.step(Some(io))
            .unwrap()
            .and_then(|i| rs.store.row(i))
            .and_then(|r| r.get_by_index(0))
            .and_then(|c| c.as_str().map(str::to_owned))
    }

    #[test]
    fn fetch_size_widens_to_rowset_boundary() {
        let plan = FetchPlan::new(10, 4);
        assert_eq!(plan.size_for(0), 12);
        assert_eq!(plan.size_for(12), 12);
        assert_eq!(FetchPlan::new(10, 0).size_for(7), 10);
    }

    #[test]
    fn short_fetch_ends_without_another_fetch() {
        let io = ScriptedCursor::new(25);
        let mut rs = cursor_result(&io, CursorOptions::default(), 10);
        let mut seen = 0;
        while next_value(&mut rs, &io).is_some() {
            seen += 1;
        }
        assert_eq!(seen, 25);
        assert_eq!(io.fetches(), vec!["FETCH 10 -> 10", "FETCH 10 -> 10", "FETCH 10 -> 5"]);
        assert_eq!(rs.total_rows(), Some(25));
        assert!(next_value(&mut rs, &io).is_none());
        assert_eq!(io.fetches().len(), 3);
    }

    #[test]
    fn prior_before_start_clamps() {
        let io = ScriptedCursor::new(5);
        let mut rs = cursor_result(&io, CursorOptions::default().scrollable(), 10);
        assert_eq!(next_value(&mut rs, &io).as_deref(), Some("0"));
        rs.reposition(FetchDirection::Relative(-7));
        assert_eq!(next_value(&mut rs, &io).as_deref(), Some("0"));
    }

    #[test]
    fn last_moves_to_end_when_total_unknown() {
        let io = ScriptedCursor::new(50);
        let mut rs = cursor_result(&io, CursorOptions::default().scrollable(), 10);
        rs.reposition(FetchDirection::Last);
        assert_eq!(next_value(&mut rs, &io).as_deref(), Some("49"));
        assert!(io.log.borrow().iter().any(|c| c == "MOVE ALL"));
        assert_eq!(rs.total_rows(), Some(50));
        assert!(next_value(&mut rs, &io).is_none());
    }

    #[test]
    fn absolute_past_end_reports_end() {
        let io = ScriptedCursor::new(15);
        let mut rs = cursor_result(&io, CursorOptions::default(), 10);
        rs.reposition(FetchDirection::Absolute(40));
        assert!(next_value(&mut rs, &io).is_none());
        assert_eq!(rs.total_rows(), Some(15));
        assert_eq!(io.fetches().len(), 1);
    }

    #[test]
    fn scrolling_back_outside_window_moves_backward() {
        let io = ScriptedCursor::new(30);
        let mut rs = cursor_result(&io, CursorOptions::default().scrollable(), 10);
        for _ in 0..15 {
            next_value(&mut rs, &io);
        }
        rs.reposition(FetchDirection::Absolute(3));
        assert_eq!(next_value(&mut rs, &io).as_deref(), Some("2"));
        assert!(io.log.borrow().iter().any(|c| c == "MOVE -18"));
    }

    #[test]
    fn deleted_rows_are_skipped_and_updates_survive_refetch() {
        let io = ScriptedCursor::new(30);
        let mut rs = cursor_result(&io, CursorOptions::default().scrollable().updatable(), 10);
        assert_eq!(next_value(&mut rs, &io).as_deref(), Some("0"));
        rs.register_delete(1).unwrap();
        rs.register_update(2, vec![Cell::text("two")]).unwrap();
        assert_eq!(next_value(&mut rs, &io).as_deref(), Some("two"));
        for _ in 0..20 {
            next_value(&mut rs, &io);
        }
        rs.reposition(FetchDirection::Absolute(3));
        assert_eq!(next_value(&mut rs, &io).as_deref(), Some("two"));
        assert!(io.log.borrow().iter().any(|c| c.starts_with("MOVE -")));
    }

    #[test]
    fn forward_only_cursor_never_moves_backward() {
        let io = ScriptedCursor::new(6);
        let mut rs = cursor_result(&io, CursorOptions::default(), 2);
        for _ in 0..3 {
            next_value(&mut rs, &io);
        }
        // still cached
        rs.reposition(FetchDirection::Absolute(3));
        assert_eq!(next_value(&mut rs, &io).as_deref(), Some("2"));

        let sent = io.log.borrow().len();
        rs.reposition(FetchDirection::Relative(-100));
        let err = rs.step(Some(&io)).unwrap_err();
        assert!(matches!(err, DriverError::Cursor(_)));
        assert_eq!(io.log.borrow().len(), sent);

        rs.reposition(FetchDirection::Last);
        assert!(matches!(rs.step(Some(&io)), Err(DriverError::Cursor(_))));
        assert_eq!(io.log.borrow().len(), sent);

        // the rejected request is dropped and forward reads carry on
        assert_eq!(next_value(&mut rs, &io).as_deref(), Some("3"));
        assert_eq!(next_value(&mut rs, &io).as_deref(), Some("4"));
        assert!(!io.log.borrow().iter().any(|c| c.starts_with("MOVE")));
    }

    #[test]
    fn window_too_large_to_cache_keeps_the_old_one() {
        let io = ScriptedCursor::new(6);
        let mut rs = cursor_result(&io, CursorOptions::default(), 2);
        assert_eq!(next_value(&mut rs, &io).as_deref(), Some("0"));

        let err = rs
            .absorb(2, vec![vec![Cell::text("2")]], usize::MAX)
            .unwrap_err();
        assert!(matches!(err, DriverError::OutOfMemory(_)));
        assert_eq!(rs.store.len(), 2);
        assert_eq!(rs.total_rows(), None);
        assert_eq!(next_value(&mut rs, &io).as_deref(), Some("1"));
    }

    #[test]
    fn added_rows_follow_the_server_rows() {
        let io = ScriptedCursor::new(3);
        let mut rs = cursor_result(&io, CursorOptions::default().updatable(), 10);
        rs.register_insert(vec![Cell::text("new")]).unwrap();
        let mut values = Vec::new();
        while let Some(v) = next_value(&mut rs, &io) {
            values.push(v);
        }
        assert_eq!(values, vec!["0", "1", "2", "new"]);
        assert_eq!(rs.total_rows(), Some(4));
    }
}
