use std::fmt;

use crate::config::{ConnectionParams, ErrorRollback};
use crate::error::ErrorRecord;
use crate::transaction::{TransactionController, TxEvent};
use crate::transport::Transport;

use super::metadata::MetadataCache;
use super::registry::{CursorEntry, DescriptorEntry, Registry, StatementEntry};

/// Connection lifecycle as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    NotConnected,
    Connected,
    /// A command is in flight.
    Executing,
    /// The connection failed; every operation fails until the session is closed.
    Dead,
}

/// Server release, from the `server_version` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
}

impl ServerVersion {
    /// Parse strings such as `16.2`, `9.6.24` or `17beta1 (Debian)`.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let mut numbers = text
            .trim()
            .split(|c: char| !c.is_ascii_digit())
            .take_while(|s| !s.is_empty());
        let major = numbers.next()?.parse().ok()?;
        let minor = numbers.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        Some(Self { major, minor })
    }

    #[must_use]
    pub fn supports_savepoints(self) -> bool {
        self.major >= 8
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Everything guarded by the session mutex.
pub(crate) struct SessionState {
    pub transport: Option<Box<dyn Transport>>,
    pub status: SessionStatus,
    pub tx: TransactionController,
    pub server_version: Option<ServerVersion>,
    pub statements: Registry<StatementEntry>,
    pub descriptors: Registry<DescriptorEntry>,
    pub cursors: Registry<CursorEntry>,
    pub metadata: MetadataCache,
    pub last_error: Option<ErrorRecord>,
    pub cursor_seq: u64,
    pub error_rollback: ErrorRollback,
}

impl SessionState {
    pub(crate) fn new(transport: Box<dyn Transport>, params: &ConnectionParams) -> Self {
        Self {
            transport: Some(transport),
            status: SessionStatus::Connected,
            tx: TransactionController::new(true),
            server_version: None,
            statements: Registry::default(),
            descriptors: Registry::default(),
            cursors: Registry::default(),
            metadata: MetadataCache::default(),
            last_error: None,
            cursor_seq: 0,
            error_rollback: params.error_rollback,
        }
    }

    /// Unknown versions are assumed modern.
    pub(crate) fn supports_savepoints(&self) -> bool {
        self.server_version
            .is_none_or(ServerVersion::supports_savepoints)
    }

    pub(crate) fn next_cursor_name(&mut self) -> String {
        self.cursor_seq += 1;
        format!("SQL_CUR{}", self.cursor_seq)
    }

    /// The connection can no longer be trusted: drop it and abandon every cursor.
    pub(crate) fn mark_dead(&mut self, reason: &str) {
        if self.status != SessionStatus::Dead {
            tracing::warn!(reason, cursors = self.cursors.len(), "session is dead");
        }
        self.status = SessionStatus::Dead;
        self.tx.apply(TxEvent::ConnectionLost);
        for cursor in self.cursors.values_mut() {
            cursor.abandoned = true;
        }
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
    }
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("status", &self.status)
            .field("tx", &self.tx)
            .field("server_version", &self.server_version)
            .field("statements", &self.statements.len())
            .field("descriptors", &self.descriptors.len())
            .field("cursors", &self.cursors.len())
            .finish_non_exhaustive()
    }
}
