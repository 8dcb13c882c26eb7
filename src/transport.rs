//! The seam between the driver and the wire library that owns the physical connection.
//!
//! A [`Transport`] is a blocking request/response session: the driver sends one command text and
//! then pulls response units until the server reports it is ready for the next command. The wire
//! encoding behind it is not this crate's concern.

use crate::config::ConnectionParams;
use crate::error::{ServerError, ServerNotice, TransportError};
use crate::types::{Cell, ColumnDescriptor};

pub use crate::error::Severity;

/// Transaction status as last reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionStatus {
    #[default]
    Idle,
    InTransaction,
    InError,
    /// The transport cannot tell, usually because the connection is gone.
    Unknown,
}

/// One unit of a response stream.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendMessage {
    /// Column metadata; starts a row-bearing result.
    RowDescription(Vec<ColumnDescriptor>),
    /// One row of the current row-bearing result.
    DataRow(Vec<Cell>),
    /// A batch of rows for the current row-bearing result.
    DataRows(Vec<Vec<Cell>>),
    /// A statement finished with the given tag.
    CommandComplete(String),
    /// The statement text was empty.
    EmptyQuery,
    Notice(ServerNotice),
    Error(ServerError),
    CopyInStart,
    CopyOutStart,
}

/// Out-of-band cancellation of the command in flight on a session.
///
/// Implementations open their own secondary connection; they never touch the session's primary
/// transport, so `cancel` may run while another thread is blocked inside
/// [`Transport::next_message`].
pub trait CancelHandle: Send + Sync {
    /// # Errors
    /// Returns [`TransportError::Cancel`] if the cancel request could not be delivered.
    fn cancel(&self) -> Result<(), TransportError>;
}

/// Blocking session primitives offered by the wire library.
pub trait Transport: Send {
    /// Send one command text. The response is read with [`Transport::next_message`].
    ///
    /// # Errors
    /// Returns [`TransportError::Send`] if the command could not be written.
    fn send(&mut self, sql: &str) -> Result<(), TransportError>;

    /// Next unit of the current response, or `None` once the server is ready for a new command.
    ///
    /// # Errors
    /// Returns [`TransportError::Receive`] if the connection fails while reading.
    fn next_message(&mut self) -> Result<Option<BackendMessage>, TransportError>;

    /// Leave copy mode by refusing the transfer.
    ///
    /// # Errors
    /// Returns [`TransportError::Send`] if the refusal could not be written.
    fn abort_copy(&mut self, reason: &str) -> Result<(), TransportError>;

    /// Authoritative transaction status after the last completed response.
    fn transaction_status(&self) -> TransactionStatus;

    /// False once the underlying connection can no longer carry commands.
    fn is_usable(&self) -> bool;

    /// A server parameter reported at startup, such as `server_version`.
    fn parameter(&self, name: &str) -> Option<String>;

    /// Handle used to cancel commands from another thread.
    fn cancel_handle(&self) -> Option<Box<dyn CancelHandle>>;

    /// Terminate the connection. Errors are ignored.
    fn close(&mut self);
}

/// Opens transports from connection parameters.
pub trait Connector {
    /// # Errors
    /// Returns [`TransportError::Connect`] if the handshake fails or exceeds the connect timeout.
    fn connect(&self, params: &ConnectionParams) -> Result<Box<dyn Transport>, TransportError>;
}
