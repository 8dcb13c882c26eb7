//! Convenient imports for common functionality.
//!
//! `use sql_driver_core::prelude::*;` brings in the session, its results and the types a caller
//! touches on every query.

pub use crate::config::{ConnectionParams, CursorOptions, ErrorRollback};
pub use crate::error::{DriverError, ErrorKind};
pub use crate::results::{FetchDirection, ResultChain, ResultSet, ResultStatus, Row};
pub use crate::session::{QueryRequest, Session, SessionStatus, Statement};
pub use crate::transport::Connector;
pub use crate::types::{Cell, QueryFlags};
