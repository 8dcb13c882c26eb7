use crate::error::DriverError;
use crate::executor::{self, Outcome, Plan};
use crate::results::{CursorId, CursorIo};
use crate::sql_scan::{quote_ident, quote_literal};
use crate::types::{Cell, QueryFlags};

use super::{SessionShared, SessionState, SessionStatus};

/// Failed FETCH/MOVE commands surface as execution errors; session-level failures pass through.
fn as_execution(err: DriverError) -> DriverError {
    match err {
        DriverError::Statement { error, .. } => DriverError::Execution(error.to_string()),
        other => other,
    }
}

/// Runs FETCH/MOVE so that a failure inside a transaction only undoes the command itself.
fn run_cursor_command(state: &mut SessionState, sql: &str) -> Result<Outcome, DriverError> {
    let flags = if state.tx.in_transaction() {
        QueryFlags::ROLLBACK_ON_ERROR | QueryFlags::IGNORE_ABORT_ON_CONN
    } else {
        QueryFlags::IGNORE_ABORT_ON_CONN
    };
    tracing::debug!(sql, ?flags, "cursor command");
    executor::run(state, &Plan::new(sql).flags(flags).staged()).map_err(as_execution)
}

fn moved(outcome: &Outcome) -> usize {
    outcome
        .tag_rows()
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or_default()
}

impl CursorIo for SessionShared {
    fn ensure_alive(&self, cursor: &CursorId) -> Result<(), DriverError> {
        let mut state = self.lock();
        match state.status {
            SessionStatus::NotConnected => return Err(DriverError::NotConnected),
            SessionStatus::Dead => {
                return Err(DriverError::ConnectionDead(format!(
                    "cursor {} was abandoned with its session",
                    cursor.name
                )));
            }
            SessionStatus::Connected | SessionStatus::Executing => {}
        }
        let entry = state
            .cursors
            .get(cursor.handle.0)
            .ok_or_else(|| DriverError::Cursor(format!("cursor {} is not open", cursor.name)))?;
        if entry.abandoned {
            return Err(DriverError::Cursor(format!(
                "cursor {} no longer exists",
                cursor.name
            )));
        }
        if !entry.must_verify {
            return Ok(());
        }

        let probe = format!(
            "SELECT count(*) FROM pg_cursors WHERE name = {}",
            quote_literal(&cursor.name)
        );
        let outcome =
            executor::run(&mut state, &Plan::admin(&probe).staged()).map_err(as_execution)?;
        let alive = outcome
            .staged
            .as_ref()
            .and_then(|s| s.rows.first())
            .and_then(|row| row.first())
            .and_then(Cell::parse::<i64>)
            .is_some_and(|n| n > 0);
        let Some(entry) = state.cursors.get_mut(cursor.handle.0) else {
            return Err(DriverError::Cursor(format!("cursor {} is not open", cursor.name)));
        };
        if alive {
            entry.must_verify = false;
            Ok(())
        } else {
            entry.abandoned = true;
            tracing::debug!(cursor = %cursor.name, "cursor did not survive the transaction end");
            Err(DriverError::Cursor(format!(
                "cursor {} did not survive the end of its transaction",
                cursor.name
            )))
        }
    }

    fn fetch(&self, cursor: &CursorId, count: usize) -> Result<Vec<Vec<Cell>>, DriverError> {
        let sql = format!("FETCH FORWARD {count} IN {}", quote_ident(&cursor.name));
        let outcome = run_cursor_command(&mut self.lock(), &sql)?;
        Ok(outcome.staged.map(|s| s.rows).unwrap_or_default())
    }

    fn move_by(&self, cursor: &CursorId, delta: i64) -> Result<usize, DriverError> {
        let direction = if delta < 0 { "BACKWARD" } else { "FORWARD" };
        let sql = format!(
            "MOVE {direction} {} IN {}",
            delta.unsigned_abs(),
            quote_ident(&cursor.name)
        );
        let outcome = run_cursor_command(&mut self.lock(), &sql)?;
        Ok(moved(&outcome))
    }

    fn move_all(&self, cursor: &CursorId) -> Result<usize, DriverError> {
        let sql = format!("MOVE ALL IN {}", quote_ident(&cursor.name));
        let outcome = run_cursor_command(&mut self.lock(), &sql)?;
        Ok(moved(&outcome))
    }
}
