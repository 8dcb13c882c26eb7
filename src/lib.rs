//! Session, transaction and cursor-cache engine for a call-level SQL driver.
//!
//! A [`Session`] owns one connection through a [`Transport`], wraps caller SQL into compound
//! commands that keep the server's transaction state and the driver's in step, and hands back
//! [`ResultSet`]s that are either fully cached or backed by a server-side cursor.

pub mod config;
pub mod error;
mod executor;
pub mod prelude;
pub mod results;
pub mod session;
pub mod sql_scan;
pub mod transaction;
pub mod transport;
pub mod types;

#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use config::{ConnectionParams, ConnectionParamsBuilder, CursorOptions, ErrorRollback};
pub use error::{
    DriverError, ErrorKind, ErrorRecord, ServerError, ServerNotice, Severity, TransportError,
};
pub use results::{FetchDirection, ResultChain, ResultSet, ResultStatus, Row};
pub use session::{QueryRequest, Session, SessionStatus, Statement};
pub use transaction::{TransactionController, TxState};
pub use transport::{BackendMessage, CancelHandle, Connector, TransactionStatus, Transport};
pub use types::{Cell, ColumnDescriptor, Columns, CommandTag, QueryFlags};
