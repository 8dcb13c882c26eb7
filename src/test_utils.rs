//! Test utilities: an in-memory server double and tracing setup.
//!
//! Enabled with the `test-utils` feature; the crate's own integration tests and benches turn it on
//! through a self dev-dependency.

mod fake_server;

pub use fake_server::{Fault, FakeServer};

use crate::config::ConnectionParams;

/// Install a test-friendly `tracing` subscriber. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_target(false)
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Connection parameters accepted by [`FakeServer`].
#[must_use]
pub fn test_params() -> ConnectionParams {
    ConnectionParams::builder("localhost", "testing", "tester")
        .password("secret")
        .application_name("sql-driver-core-tests")
        .finish()
}
