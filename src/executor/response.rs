use std::sync::Arc;

use crate::error::{DriverError, ServerError, ServerNotice, TransportError};
use crate::results::{ResultSet, ResultStatus};
use crate::transport::{BackendMessage, Transport};
use crate::types::{Cell, Columns, CommandTag};

use super::compound::{Compound, Role};
use super::tags::{TagEffect, interpret};

/// Rows of the first row-bearing caller result, kept out of the chain for a refill target.
#[derive(Debug)]
pub(crate) struct StagedRows {
    pub columns: Arc<Columns>,
    pub rows: Vec<Vec<Cell>>,
    pub tag: Option<CommandTag>,
}

/// A failure that leaves the session unusable.
#[derive(Debug)]
pub(crate) enum Failure {
    Transport(TransportError),
    Fatal(ServerError),
    Protocol(String),
}

impl Failure {
    pub(crate) fn into_error(self) -> DriverError {
        match self {
            Failure::Transport(e) => DriverError::Transport(e),
            Failure::Fatal(e) => DriverError::ServerFatal(e),
            Failure::Protocol(msg) => DriverError::Protocol(msg),
        }
    }
}

/// Everything read from one response stream.
#[derive(Debug, Default)]
pub(crate) struct Collected {
    pub results: Vec<ResultSet>,
    pub staged: Option<StagedRows>,
    pub effects: Vec<TagEffect>,
    pub first_error: Option<ServerError>,
    pub failure: Option<Failure>,
    pub out_of_memory: Option<String>,
    pub savepoint_acked: bool,
    pub release_acked: bool,
}

/// Row-bearing result being filled.
struct Pending {
    columns: Arc<Columns>,
    rows: Vec<Vec<Cell>>,
}

/// Reads one response, classifying each unit against the compound command that produced it.
pub(crate) struct Collector<'a> {
    compound: &'a Compound,
    stage_rows: bool,
    ordinal: usize,
    pending: Option<Pending>,
    notices: Vec<ServerNotice>,
    copy_rejected: bool,
    out: Collected,
}

impl<'a> Collector<'a> {
    pub(crate) fn new(compound: &'a Compound, stage_rows: bool) -> Self {
        Self {
            compound,
            stage_rows,
            ordinal: 0,
            pending: None,
            notices: Vec::new(),
            copy_rejected: false,
            out: Collected::default(),
        }
    }

    /// Drain the response. Stops early only when the session can no longer be trusted.
    pub(crate) fn collect(mut self, transport: &mut dyn Transport) -> Collected {
        loop {
            let message = match transport.next_message() {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(e) => {
                    self.out.failure = Some(Failure::Transport(e));
                    break;
                }
            };
            tracing::trace!(ordinal = self.ordinal, ?message, "response unit");
            if let Err(failure) = self.accept(message, transport) {
                self.out.failure = Some(failure);
                break;
            }
        }
        if !self.notices.is_empty() {
            match self.out.results.last_mut() {
                Some(last) => last.notices.append(&mut self.notices),
                None => tracing::debug!(count = self.notices.len(), "notices without a result"),
            }
        }
        self.out
    }

    fn accept(
        &mut self,
        message: BackendMessage,
        transport: &mut dyn Transport,
    ) -> Result<(), Failure> {
        match message {
            BackendMessage::RowDescription(descriptors) => {
                if self.pending.is_some() {
                    return Err(Failure::Protocol(
                        "row description before the previous result completed".to_string(),
                    ));
                }
                self.pending = Some(Pending {
                    columns: Arc::new(Columns::new(descriptors)),
                    rows: Vec::new(),
                });
            }
            BackendMessage::DataRow(cells) => self.push_rows(std::iter::once(cells))?,
            BackendMessage::DataRows(batch) => self.push_rows(batch)?,
            BackendMessage::CommandComplete(raw) => self.complete(CommandTag::new(raw)),
            BackendMessage::EmptyQuery => {
                let role = self.next_role().0;
                if !role.is_injected() {
                    let result = ResultSet::new(
                        ResultStatus::EmptyQuery,
                        None,
                        Arc::new(Columns::default()),
                    );
                    self.finish(result);
                }
            }
            BackendMessage::Notice(notice) => self.notices.push(notice),
            BackendMessage::Error(error) => {
                self.next_role();
                self.pending = None;
                if error.is_fatal() {
                    return Err(Failure::Fatal(error));
                }
                let result = ResultSet::failed(error.clone(), self.copy_rejected);
                self.copy_rejected = false;
                self.out.first_error.get_or_insert(error);
                self.finish(result);
            }
            BackendMessage::CopyInStart | BackendMessage::CopyOutStart => {
                tracing::debug!("refusing copy transfer");
                self.copy_rejected = true;
                transport
                    .abort_copy("COPY is not supported by this driver")
                    .map_err(Failure::Transport)?;
            }
        }
        Ok(())
    }

    fn next_role(&mut self) -> (Role, String) {
        let part = self
            .compound
            .part(self.ordinal)
            .map_or((Role::Caller, String::new()), |p| (p.role, p.sql.clone()));
        self.ordinal += 1;
        part
    }

    fn push_rows(&mut self, rows: impl IntoIterator<Item = Vec<Cell>>) -> Result<(), Failure> {
        let Some(pending) = self.pending.as_mut() else {
            return Err(Failure::Protocol(
                "data row without a row description".to_string(),
            ));
        };
        if self.out.out_of_memory.is_some() {
            return Ok(());
        }
        for cells in rows {
            if let Err(e) = pending.rows.try_reserve(1) {
                // keep reading so the connection stays in sync, but stop storing
                self.out.out_of_memory = Some(format!(
                    "result of more than {} rows: {e}",
                    pending.rows.len()
                ));
                pending.rows = Vec::new();
                return Ok(());
            }
            pending.rows.push(cells);
        }
        Ok(())
    }

    fn complete(&mut self, tag: CommandTag) {
        let (role, sql) = self.next_role();
        self.out.effects.extend(interpret(&tag, role, &sql));
        match role {
            Role::Savepoint => self.out.savepoint_acked = true,
            Role::Release => self.out.release_acked = true,
            Role::Begin | Role::Commit | Role::Caller => {}
        }
        let pending = self.pending.take();
        if role.is_injected() {
            tracing::trace!(%tag, "discarded injected acknowledgement");
            return;
        }
        let result = match pending {
            Some(p) if self.stage_rows && self.out.staged.is_none() => {
                let result = ResultSet::new(
                    ResultStatus::TuplesOk,
                    Some(tag.clone()),
                    Arc::clone(&p.columns),
                );
                self.out.staged = Some(StagedRows {
                    columns: p.columns,
                    rows: p.rows,
                    tag: Some(tag),
                });
                result
            }
            Some(p) => match ResultSet::eager(Some(tag), p.columns, p.rows) {
                Ok(result) => result,
                Err(e) => {
                    self.out.out_of_memory.get_or_insert(e.to_string());
                    return;
                }
            },
            None => ResultSet::new(
                ResultStatus::CommandOk,
                Some(tag),
                Arc::new(Columns::default()),
            ),
        };
        self.finish(result);
    }

    fn finish(&mut self, mut result: ResultSet) {
        result.notices.append(&mut self.notices);
        self.out.results.push(result);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::error::Severity;
    use crate::executor::compound::Wrapping;
    use crate::transport::{CancelHandle, TransactionStatus};
    use crate::types::ColumnDescriptor;

    struct Scripted {
        messages: VecDeque<Result<BackendMessage, TransportError>>,
        aborted: bool,
    }

    impl Scripted {
        fn new(messages: Vec<BackendMessage>) -> Self {
            Self {
                messages: messages.into_iter().map(Ok).collect(),
                aborted: false,
            }
        }
    }

    impl Transport for Scripted {
        fn send(&mut self, _sql: &str) -> Result<(), TransportError> {
            Ok(())
        }

        fn next_message(&mut self) -> Result<Option<BackendMessage>, TransportError> {
            self.messages.pop_front().transpose()
        }

        fn abort_copy(&mut self, reason: &str) -> Result<(), TransportError> {
            self.aborted = true;
            self.messages.push_front(Ok(BackendMessage::Error(ServerError::new(
                Severity::Error,
                "57014",
                format!("COPY from stdin failed: {reason}"),
            ))));
            Ok(())
        }

        fn transaction_status(&self) -> TransactionStatus {
            TransactionStatus::Idle
        }

        fn is_usable(&self) -> bool {
            true
        }

        fn parameter(&self, _name: &str) -> Option<String> {
            None
        }

        fn cancel_handle(&self) -> Option<Box<dyn CancelHandle>> {
            None
        }

        fn close(&mut self) {}
    }

    fn wrapped(text: &str) -> Compound {
        Compound::build(
            text,
            None,
            Wrapping {
                begin: true,
                savepoint: true,
                commit: false,
            },
        )
    }

    #[test]
    fn injected_acks_are_hidden() {
        let compound = wrapped("select 1");
        let mut transport = Scripted::new(vec![
            BackendMessage::CommandComplete("BEGIN".into()),
            BackendMessage::CommandComplete("SAVEPOINT".into()),
            BackendMessage::RowDescription(vec![ColumnDescriptor::new("?column?", 23)]),
            BackendMessage::DataRow(vec![Cell::text("1")]),
            BackendMessage::CommandComplete("SELECT 1".into()),
            BackendMessage::CommandComplete("RELEASE".into()),
        ]);
        let out = Collector::new(&compound, false).collect(&mut transport);
        assert_eq!(out.results.len(), 1);
        assert_eq!(out.results[0].cached_rows().len(), 1);
        assert!(out.savepoint_acked && out.release_acked);
        assert_eq!(
            out.effects,
            vec![TagEffect::Tx(crate::transaction::TxEvent::Began { implicit: true })]
        );
    }

    #[test]
    fn data_without_description_is_a_protocol_violation() {
        let compound = wrapped("select 1");
        let mut transport = Scripted::new(vec![BackendMessage::DataRow(vec![Cell::null()])]);
        let out = Collector::new(&compound, false).collect(&mut transport);
        assert!(matches!(out.failure, Some(Failure::Protocol(_))));
    }

    #[test]
    fn copy_is_refused() {
        let compound = Compound::build("copy t from stdin", None, Wrapping::default());
        let mut transport = Scripted::new(vec![BackendMessage::CopyInStart]);
        let out = Collector::new(&compound, false).collect(&mut transport);
        assert!(transport.aborted);
        assert_eq!(out.results[0].status(), ResultStatus::CopyRejected);
        assert!(out.first_error.is_some());
    }

    #[test]
    fn notices_attach_to_the_next_result() {
        let compound = Compound::build("select 1; select 2", None, Wrapping::default());
        let mut transport = Scripted::new(vec![
            BackendMessage::Notice(ServerNotice {
                sqlstate: "01000".into(),
                message: "heads up".into(),
            }),
            BackendMessage::CommandComplete("SELECT 0".into()),
            BackendMessage::CommandComplete("SELECT 0".into()),
        ]);
        let out = Collector::new(&compound, false).collect(&mut transport);
        assert_eq!(out.results[0].notices().len(), 1);
        assert!(out.results[1].notices().is_empty());
    }

    #[test]
    fn staging_keeps_rows_out_of_the_chain() {
        let compound = Compound::build("fetch 2 in c", None, Wrapping::default());
        let mut transport = Scripted::new(vec![
            BackendMessage::RowDescription(vec![ColumnDescriptor::new("n", 23)]),
            BackendMessage::DataRows(vec![vec![Cell::text("1")], vec![Cell::text("2")]]),
            BackendMessage::CommandComplete("FETCH 2".into()),
        ]);
        let out = Collector::new(&compound, true).collect(&mut transport);
        assert_eq!(out.staged.as_ref().map(|s| s.rows.len()), Some(2));
        assert!(out.results[0].cached_rows().is_empty());
    }
}
