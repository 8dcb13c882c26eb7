use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::results::ResultChain;

/// Severity reported by the server alongside an error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Error,
    Fatal,
    Panic,
}

impl Severity {
    /// Parse the severity field of an error response. Unknown values are treated as `Error`.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "FATAL" => Severity::Fatal,
            "PANIC" => Severity::Panic,
            _ => Severity::Error,
        }
    }
}

/// An error response produced by the server for one statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerError {
    pub severity: Severity,
    pub sqlstate: String,
    pub message: String,
    pub detail: Option<String>,
}

impl ServerError {
    #[must_use]
    pub fn new(
        severity: Severity,
        sqlstate: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            sqlstate: sqlstate.into(),
            message: message.into(),
            detail: None,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Top-level severities end the server session.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self.severity, Severity::Fatal | Severity::Panic)
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}: {}", self.severity, self.sqlstate, self.message)?;
        if let Some(detail) = &self.detail {
            write!(f, " ({detail})")?;
        }
        Ok(())
    }
}

/// A notice or warning attached to a result. Never fails the statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerNotice {
    pub sqlstate: String,
    pub message: String,
}

/// Failure reported by a transport implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("send failed: {0}")]
    Send(String),

    #[error("receive failed: {0}")]
    Receive(String),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("cancel request failed: {0}")]
    Cancel(String),
}

/// The error taxonomy every [`DriverError`] maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// The transport is unusable; the session is dead and its cursors abandoned.
    TransportFatal,
    /// Top-level server severity; handled like a transport failure.
    ServerFatal,
    /// Ordinary SQL error; the session stays usable after rollback.
    Statement,
    /// Local allocation failure; only the one operation fails.
    LocalResource,
    /// Unexpected response shape; handled like a transport failure.
    ProtocolViolation,
    /// Caller misuse such as a stale handle or bad configuration.
    Usage,
}

impl ErrorKind {
    /// Whether errors of this kind leave the session unusable.
    #[must_use]
    pub fn is_session_fatal(self) -> bool {
        matches!(
            self,
            ErrorKind::TransportFatal | ErrorKind::ServerFatal | ErrorKind::ProtocolViolation
        )
    }
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session is not connected")]
    NotConnected,

    #[error("Session is dead: {0}")]
    ConnectionDead(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Statement failed: {error}")]
    Statement {
        error: ServerError,
        /// Results produced up to and including the failing one.
        partial: Box<ResultChain>,
    },

    #[error("Fatal server error: {0}")]
    ServerFatal(ServerError),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Cursor error: {0}")]
    Cursor(String),

    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    #[error("SQL execution error: {0}")]
    Execution(String),
}

impl DriverError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            DriverError::Transport(_) | DriverError::ConnectionDead(_) => ErrorKind::TransportFatal,
            DriverError::ServerFatal(_) => ErrorKind::ServerFatal,
            DriverError::Statement { .. } | DriverError::Execution(_) | DriverError::Cursor(_) => {
                ErrorKind::Statement
            }
            DriverError::OutOfMemory(_) => ErrorKind::LocalResource,
            DriverError::Protocol(_) => ErrorKind::ProtocolViolation,
            DriverError::Config(_) | DriverError::NotConnected | DriverError::InvalidHandle(_) => {
                ErrorKind::Usage
            }
        }
    }

    /// The server-side error behind this failure, when there is one.
    #[must_use]
    pub fn server_error(&self) -> Option<&ServerError> {
        match self {
            DriverError::Statement { error, .. } | DriverError::ServerFatal(error) => Some(error),
            _ => None,
        }
    }

    #[must_use]
    pub fn sqlstate(&self) -> Option<&str> {
        self.server_error().map(|e| e.sqlstate.as_str())
    }
}

/// The session's sticky "most recent error".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub sqlstate: Option<String>,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl ErrorRecord {
    #[must_use]
    pub fn from_driver_error(err: &DriverError) -> Self {
        Self {
            kind: err.kind(),
            sqlstate: err.sqlstate().map(str::to_owned),
            message: err.to_string(),
            occurred_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn from_server_error(err: &ServerError) -> Self {
        Self {
            kind: if err.is_fatal() {
                ErrorKind::ServerFatal
            } else {
                ErrorKind::Statement
            },
            sqlstate: Some(err.sqlstate.clone()),
            message: err.message.clone(),
            occurred_at: Utc::now(),
        }
    }
}
