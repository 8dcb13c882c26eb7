//! Query submission: builds the compound command, reads the response and keeps the session's
//! transaction state in step with what the server did.

mod compound;
mod response;
mod tags;

use crate::config::ErrorRollback;
use crate::error::{DriverError, ErrorRecord};
use crate::results::ResultChain;
use crate::session::{SessionState, SessionStatus};
use crate::transaction::TxEvent;
use crate::types::QueryFlags;

use compound::{Compound, PER_QUERY_SAVEPOINT, Wrapping};
use response::{Collected, Collector, Failure};
use tags::TagEffect;

pub(crate) use response::StagedRows;

/// One submission as the executor sees it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Plan<'a> {
    pub text: &'a str,
    pub companion: Option<&'a str>,
    pub flags: QueryFlags,
    /// Keep the first row-bearing result's rows out of the chain.
    pub stage_rows: bool,
    /// Roll back after a failure. Off for the driver's own recovery commands.
    pub recover: bool,
}

impl<'a> Plan<'a> {
    pub(crate) fn new(text: &'a str) -> Self {
        Self {
            text,
            companion: None,
            flags: QueryFlags::NONE,
            stage_rows: false,
            recover: true,
        }
    }

    /// A driver-issued command whose failure stays call-local.
    pub(crate) fn admin(text: &'a str) -> Self {
        Self {
            flags: QueryFlags::IGNORE_ABORT_ON_CONN,
            recover: false,
            ..Self::new(text)
        }
    }

    pub(crate) fn companion(mut self, companion: Option<&'a str>) -> Self {
        self.companion = companion;
        self
    }

    pub(crate) fn flags(mut self, flags: QueryFlags) -> Self {
        self.flags = flags;
        self
    }

    pub(crate) fn staged(mut self) -> Self {
        self.stage_rows = true;
        self
    }
}

/// What a successful run produced.
#[derive(Debug)]
pub(crate) struct Outcome {
    pub chain: ResultChain,
    pub staged: Option<StagedRows>,
}

impl Outcome {
    /// Row count of the first completion tag, for FETCH/MOVE/count probes.
    pub(crate) fn tag_rows(&self) -> Option<u64> {
        self.staged
            .as_ref()
            .and_then(|s| s.tag.as_ref())
            .or_else(|| self.chain.first().and_then(|r| r.tag()))
            .and_then(crate::types::CommandTag::rows)
    }
}

/// Runs submissions against a session whose lock the caller already holds.
pub(crate) struct QueryExecutor<'s> {
    state: &'s mut SessionState,
}

impl<'s> QueryExecutor<'s> {
    pub(crate) fn new(state: &'s mut SessionState) -> Self {
        Self { state }
    }

    /// Send one compound command and turn the response into a result chain.
    ///
    /// # Errors
    /// - `DriverError::NotConnected` / `DriverError::ConnectionDead` when the session cannot send.
    /// - `DriverError::Transport`, `DriverError::ServerFatal` or `DriverError::Protocol` when the
    ///   exchange kills the session.
    /// - `DriverError::Statement` when a statement fails; the chain up to the failure rides along.
    /// - `DriverError::OutOfMemory` when rows could not be stored.
    pub(crate) fn run(&mut self, plan: &Plan<'_>) -> Result<Outcome, DriverError> {
        self.ensure_usable()?;
        let compound = Compound::build(plan.text, plan.companion, self.wrapping(plan.flags));
        let text = compound.text();
        tracing::debug!(sql = %text, flags = ?plan.flags, "sending command");

        let Some(transport) = self.state.transport.as_mut() else {
            return Err(self.fail_session(DriverError::ConnectionDead(
                "no transport session".to_string(),
            )));
        };
        self.state.status = SessionStatus::Executing;
        if let Err(e) = transport.send(&text) {
            return Err(self.fail_session(DriverError::Transport(e)));
        }
        let collected = Collector::new(&compound, plan.stage_rows).collect(&mut **transport);
        let usable = transport.is_usable();
        self.state.status = SessionStatus::Connected;
        self.finish(plan, collected, usable)
    }

    fn ensure_usable(&mut self) -> Result<(), DriverError> {
        match self.state.status {
            SessionStatus::NotConnected => Err(DriverError::NotConnected),
            SessionStatus::Dead => Err(DriverError::ConnectionDead(
                "session is no longer usable".to_string(),
            )),
            SessionStatus::Connected | SessionStatus::Executing => {
                if self.state.transport.is_some() {
                    Ok(())
                } else {
                    Err(self.fail_session(DriverError::ConnectionDead(
                        "no transport session".to_string(),
                    )))
                }
            }
        }
    }

    fn wrapping(&self, flags: QueryFlags) -> Wrapping {
        let tx = &self.state.tx;
        let begin = flags.contains(QueryFlags::GO_INTO_TRANSACTION) && !tx.in_transaction();
        let savepoint = flags.contains(QueryFlags::ROLLBACK_ON_ERROR)
            && (tx.in_transaction() || begin)
            && !tx.in_error()
            && self.state.supports_savepoints();
        Wrapping {
            begin,
            savepoint,
            commit: flags.contains(QueryFlags::END_WITH_COMMIT),
        }
    }

    fn finish(
        &mut self,
        plan: &Plan<'_>,
        collected: Collected,
        usable: bool,
    ) -> Result<Outcome, DriverError> {
        let Collected {
            results,
            staged,
            effects,
            first_error,
            failure,
            out_of_memory,
            savepoint_acked,
            release_acked,
        } = collected;
        for effect in effects {
            self.apply(effect);
        }
        if let Some(failure) = failure {
            return Err(self.fail_session(failure.into_error()));
        }
        if !usable {
            return Err(self.fail_session(DriverError::ConnectionDead(
                "connection lost during response".to_string(),
            )));
        }

        let mut chain = ResultChain::new();
        for result in results {
            chain.push(result);
        }
        let call_local = plan.flags.contains(QueryFlags::IGNORE_ABORT_ON_CONN);

        if let Some(error) = first_error {
            chain.truncate_after_first_error();
            if !call_local {
                self.state.last_error = Some(ErrorRecord::from_server_error(&error));
            }
            self.state.tx.apply(TxEvent::StatementFailed);
            if plan.recover {
                self.recover(savepoint_acked && !release_acked);
            }
            self.reconcile();
            tracing::debug!(%error, "statement failed");
            return Err(DriverError::Statement {
                error,
                partial: Box::new(chain),
            });
        }

        self.reconcile();
        if let Some(msg) = out_of_memory {
            let err = DriverError::OutOfMemory(msg);
            if !call_local {
                self.state.last_error = Some(ErrorRecord::from_driver_error(&err));
            }
            return Err(err);
        }
        Ok(Outcome { chain, staged })
    }

    /// Undo the failed statement, or the whole failed block.
    fn recover(&mut self, savepoint_live: bool) {
        if !self.state.tx.in_error() {
            return;
        }
        let command = if savepoint_live {
            format!("ROLLBACK TO SAVEPOINT {PER_QUERY_SAVEPOINT};RELEASE {PER_QUERY_SAVEPOINT}")
        } else if self.state.error_rollback == ErrorRollback::Nop {
            return;
        } else {
            "ROLLBACK".to_string()
        };
        if let Err(e) = self.run(&Plan::admin(&command)) {
            tracing::warn!(
                error = %e,
                command = %command,
                "recovery after failed statement failed"
            );
        }
    }

    fn apply(&mut self, effect: TagEffect) {
        match effect {
            TagEffect::Tx(event) => self.state.tx.apply(event),
            TagEffect::CursorsRolledBack => {
                for cursor in self.state.cursors.values_mut() {
                    cursor.must_verify = true;
                }
            }
            TagEffect::CursorsCommitted => {
                for cursor in self.state.cursors.values_mut().filter(|c| !c.holdable) {
                    cursor.must_verify = true;
                }
            }
            TagEffect::SchemaChanged => self.state.metadata.clear(),
        }
    }

    fn reconcile(&mut self) {
        if let Some(transport) = self.state.transport.as_ref() {
            let status = transport.transaction_status();
            self.state.tx.reconcile(status);
        }
    }

    fn fail_session(&mut self, err: DriverError) -> DriverError {
        self.state.last_error = Some(ErrorRecord::from_driver_error(&err));
        self.state.mark_dead(&err.to_string());
        err
    }
}

/// Convenience for the common single-command case.
pub(crate) fn run(state: &mut SessionState, plan: &Plan<'_>) -> Result<Outcome, DriverError> {
    QueryExecutor::new(state).run(plan)
}
