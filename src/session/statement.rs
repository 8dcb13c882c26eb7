use std::sync::Arc;

use crate::config::CursorOptions;
use crate::error::DriverError;
use crate::results::{ResultChain, ResultSet};
use crate::sql_scan;

use super::registry::{DescriptorHandle, StatementHandle};
use super::{QueryRequest, SessionShared, SessionStatus};

/// A statement handle: owns the results of its most recent execution.
///
/// Dropping the statement (or calling [`Statement::free`]) closes its cursors, frees the
/// descriptors it owns and tombstones its registry slot.
#[derive(Debug)]
pub struct Statement {
    shared: Arc<SessionShared>,
    handle: StatementHandle,
    results: Option<ResultChain>,
}

impl Statement {
    pub(crate) fn new(shared: Arc<SessionShared>, handle: StatementHandle) -> Self {
        Self {
            shared,
            handle,
            results: None,
        }
    }

    #[must_use]
    pub fn handle(&self) -> StatementHandle {
        self.handle
    }

    fn ensure_registered(&self) -> Result<(), DriverError> {
        let state = self.shared.lock();
        if state.status == SessionStatus::NotConnected {
            return Err(DriverError::NotConnected);
        }
        if state.statements.contains(self.handle.0) {
            Ok(())
        } else {
            Err(DriverError::InvalidHandle(
                "statement is no longer registered".to_string(),
            ))
        }
    }

    /// Execute `sql`, replacing the previous results.
    ///
    /// With `use_declare_fetch` on, a lone SELECT runs through a server cursor and its result is
    /// incremental.
    ///
    /// # Errors
    /// `DriverError::InvalidHandle` for a statement whose session was closed under it, otherwise as
    /// [`Session::submit`](super::Session::submit).
    pub fn execute(&mut self, sql: &str) -> Result<&mut ResultChain, DriverError> {
        self.ensure_registered()?;
        // old cursors close before the lock is taken for the new submission
        drop(self.results.take());
        let chain = if self.shared.params.use_declare_fetch && is_single_select(sql) {
            let mut chain = ResultChain::new();
            chain.push(self.shared.declare_cursor(sql, CursorOptions::default())?);
            chain
        } else {
            let flags = self.shared.default_flags();
            self.shared.submit(QueryRequest::new(sql).flags(flags))?
        };
        Ok(self.results.insert(chain))
    }

    /// Execute `query` through a server cursor with explicit options.
    ///
    /// # Errors
    /// As [`Statement::execute`].
    pub fn execute_cursor(
        &mut self,
        query: &str,
        opts: CursorOptions,
    ) -> Result<&mut ResultSet, DriverError> {
        self.ensure_registered()?;
        drop(self.results.take());
        let mut chain = ResultChain::new();
        chain.push(self.shared.declare_cursor(query, opts)?);
        self.results
            .insert(chain)
            .first_mut()
            .ok_or_else(|| DriverError::Cursor("cursor result missing".to_string()))
    }

    #[must_use]
    pub fn results(&self) -> Option<&ResultChain> {
        self.results.as_ref()
    }

    pub fn results_mut(&mut self) -> Option<&mut ResultChain> {
        self.results.as_mut()
    }

    /// Detach the results; they then live independently of the statement.
    pub fn take_results(&mut self) -> Option<ResultChain> {
        self.results.take()
    }

    /// Close every cursor held by the current results. Rows already cached stay readable.
    ///
    /// # Errors
    /// Returns the first close failure.
    pub fn close_cursor(&mut self) -> Result<(), DriverError> {
        match self.results.as_mut() {
            Some(chain) => chain.close_cursors(),
            None => Ok(()),
        }
    }

    /// # Errors
    /// `DriverError::InvalidHandle` once the statement was invalidated by a session close.
    pub fn allocate_descriptor(&self) -> Result<DescriptorHandle, DriverError> {
        super::allocate_descriptor(&self.shared, Some(self.handle))
    }

    /// Release the statement now rather than at scope end.
    pub fn free(self) {}
}

impl Drop for Statement {
    fn drop(&mut self) {
        drop(self.results.take());
        let mut state = self.shared.lock();
        if let Some(entry) = state.statements.remove(self.handle.0) {
            for descriptor in entry.descriptors {
                state.descriptors.remove(descriptor.0);
            }
            tracing::trace!(descriptors = state.descriptors.len(), "statement freed");
        }
    }
}

fn is_single_select(sql: &str) -> bool {
    sql_scan::split_statements(sql).len() == 1
        && sql_scan::leading_keyword(sql).as_deref() == Some("SELECT")
}
