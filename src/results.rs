//! Result caches: eager results, cursor-backed incremental results, and the chain a submission
//! yields.

mod chain;
mod fetch;
mod keyset;
mod result_set;
mod row;
mod store;

pub use chain::ResultChain;
pub use fetch::FetchDirection;
pub use keyset::{KeysetEntry, RowStatus, TupleId};
pub use result_set::{ResultSet, ResultStatus};
pub use row::Row;

pub(crate) use fetch::{CursorIo, FetchPlan};
pub(crate) use keyset::{KeyColumns, TUPLE_COLUMN};
pub(crate) use result_set::{CursorId, ServerCursor};
