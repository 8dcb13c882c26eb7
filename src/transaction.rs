//! Local belief about the session's transaction, kept honest by the server's reported status.

use crate::transport::TransactionStatus;

/// Where the session stands with respect to transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxState {
    /// No transaction block is open.
    #[default]
    Idle,
    /// A transaction block is open and healthy.
    Active,
    /// A transaction block is open but a statement failed; only rollback is accepted.
    Failed,
}

/// Everything that can move the transaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxEvent {
    /// A BEGIN completed. `implicit` when the driver injected it.
    Began { implicit: bool },
    /// COMMIT completed (or END).
    Committed,
    /// A full ROLLBACK completed.
    RolledBack,
    /// ROLLBACK TO SAVEPOINT completed; the block is healthy again.
    RolledBackToSavepoint,
    /// A statement failed inside the block.
    StatementFailed,
    /// The server reported its status at the end of a response.
    Reported(TransactionStatus),
    /// The session died; nothing about the server can be assumed.
    ConnectionLost,
}

/// Tracks autocommit and transaction state with one transition function.
#[derive(Debug, Clone, Default)]
pub struct TransactionController {
    autocommit: bool,
    state: TxState,
    /// The open block was begun by the driver on the caller's behalf.
    implicit: bool,
}

impl TransactionController {
    #[must_use]
    pub fn new(autocommit: bool) -> Self {
        Self {
            autocommit,
            state: TxState::Idle,
            implicit: false,
        }
    }

    #[must_use]
    pub fn state(&self) -> TxState {
        self.state
    }

    #[must_use]
    pub fn autocommit(&self) -> bool {
        self.autocommit
    }

    pub fn set_autocommit(&mut self, on: bool) {
        self.autocommit = on;
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        !matches!(self.state, TxState::Idle)
    }

    #[must_use]
    pub fn in_error(&self) -> bool {
        matches!(self.state, TxState::Failed)
    }

    #[must_use]
    pub fn is_implicit(&self) -> bool {
        self.implicit && self.in_transaction()
    }

    pub fn apply(&mut self, event: TxEvent) {
        let next = match (self.state, event) {
            (TxState::Idle, TxEvent::Began { .. }) => TxState::Active,
            // a nested BEGIN only draws a warning from the server
            (state, TxEvent::Began { .. }) => state,
            (_, TxEvent::Committed | TxEvent::RolledBack | TxEvent::ConnectionLost) => {
                TxState::Idle
            }
            (TxState::Idle, TxEvent::RolledBackToSavepoint | TxEvent::StatementFailed) => {
                TxState::Idle
            }
            (_, TxEvent::RolledBackToSavepoint) => TxState::Active,
            (_, TxEvent::StatementFailed) => TxState::Failed,
            (state, TxEvent::Reported(status)) => match status {
                TransactionStatus::Idle => TxState::Idle,
                TransactionStatus::InTransaction => TxState::Active,
                TransactionStatus::InError => TxState::Failed,
                TransactionStatus::Unknown => state,
            },
        };
        if next == TxState::Idle {
            self.implicit = false;
        } else if self.state == TxState::Idle {
            // a block first seen through a status report was not opened by us
            self.implicit = matches!(event, TxEvent::Began { implicit: true });
        }
        if next != self.state {
            tracing::trace!(from = ?self.state, to = ?next, ?event, "transaction state change");
        }
        self.state = next;
    }

    /// Final consistency check against the server's authoritative status.
    pub fn reconcile(&mut self, status: TransactionStatus) {
        let before = self.state;
        self.apply(TxEvent::Reported(status));
        if before != self.state {
            tracing::debug!(
                local = ?before,
                server = ?status,
                "transaction state reconciled with server"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_commit_cycle() {
        let mut tx = TransactionController::new(true);
        tx.apply(TxEvent::Began { implicit: true });
        assert!(tx.in_transaction());
        assert!(tx.is_implicit());
        tx.apply(TxEvent::Committed);
        assert_eq!(tx.state(), TxState::Idle);
        assert!(!tx.is_implicit());
    }

    #[test]
    fn failure_then_savepoint_recovery() {
        let mut tx = TransactionController::new(false);
        tx.apply(TxEvent::Began { implicit: false });
        tx.apply(TxEvent::StatementFailed);
        assert!(tx.in_error());
        tx.apply(TxEvent::RolledBackToSavepoint);
        assert_eq!(tx.state(), TxState::Active);
    }

    #[test]
    fn failure_outside_a_block_stays_idle() {
        let mut tx = TransactionController::new(true);
        tx.apply(TxEvent::StatementFailed);
        assert_eq!(tx.state(), TxState::Idle);
    }

    #[test]
    fn server_report_wins() {
        let mut tx = TransactionController::new(true);
        tx.reconcile(TransactionStatus::InError);
        assert!(tx.in_error());
        assert!(!tx.is_implicit());
        tx.reconcile(TransactionStatus::Unknown);
        assert!(tx.in_error());
        tx.reconcile(TransactionStatus::Idle);
        assert!(!tx.in_transaction());
    }

    #[test]
    fn nested_begin_keeps_state() {
        let mut tx = TransactionController::new(true);
        tx.apply(TxEvent::Began { implicit: false });
        tx.apply(TxEvent::StatementFailed);
        tx.apply(TxEvent::Began { implicit: true });
        assert!(tx.in_error());
        assert!(!tx.is_implicit());
    }
}
