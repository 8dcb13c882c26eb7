use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DriverError;

const DEFAULT_PORT: u16 = 5432;
const DEFAULT_FETCH_SIZE: usize = 100;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection parameters supplied once at open time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: Option<String>,
    /// Bounds only the initial handshake.
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,
    /// Default number of rows per incremental fetch.
    pub fetch_size: usize,
    /// Route row-returning statements through server-side cursors.
    pub use_declare_fetch: bool,
    pub application_name: Option<String>,
    /// How much work a failing statement undoes.
    pub error_rollback: ErrorRollback,
}

/// What the driver rolls back after a statement fails inside a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorRollback {
    /// Leave the failed transaction for the caller to end.
    Nop,
    /// Roll back the whole transaction.
    #[default]
    Transaction,
    /// Undo only the failing statement through a per-statement savepoint.
    Statement,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            database: String::new(),
            user: String::new(),
            password: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            fetch_size: DEFAULT_FETCH_SIZE,
            use_declare_fetch: false,
            application_name: None,
            error_rollback: ErrorRollback::default(),
        }
    }
}

impl ConnectionParams {
    #[must_use]
    pub fn builder(host: &str, database: &str, user: &str) -> ConnectionParamsBuilder {
        ConnectionParamsBuilder::new(host, database, user)
    }

    /// Check that every required field is present.
    ///
    /// # Errors
    /// Returns `DriverError::Config` naming the first missing or invalid field.
    pub fn validate(&self) -> Result<(), DriverError> {
        if self.host.is_empty() {
            return Err(DriverError::Config("host is required".to_string()));
        }
        if self.database.is_empty() {
            return Err(DriverError::Config("database is required".to_string()));
        }
        if self.user.is_empty() {
            return Err(DriverError::Config("user is required".to_string()));
        }
        if self.port == 0 {
            return Err(DriverError::Config("port must be non-zero".to_string()));
        }
        if self.fetch_size == 0 {
            return Err(DriverError::Config(
                "fetch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Fluent builder for [`ConnectionParams`].
#[derive(Debug, Clone)]
pub struct ConnectionParamsBuilder {
    params: ConnectionParams,
}

impl ConnectionParamsBuilder {
    #[must_use]
    pub fn new(host: &str, database: &str, user: &str) -> Self {
        Self {
            params: ConnectionParams {
                host: host.to_string(),
                database: database.to_string(),
                user: user.to_string(),
                ..ConnectionParams::default()
            },
        }
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.params.port = port;
        self
    }

    #[must_use]
    pub fn password(mut self, password: &str) -> Self {
        self.params.password = Some(password.to_string());
        self
    }

    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.params.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn fetch_size(mut self, rows: usize) -> Self {
        self.params.fetch_size = rows;
        self
    }

    #[must_use]
    pub fn use_declare_fetch(mut self, enabled: bool) -> Self {
        self.params.use_declare_fetch = enabled;
        self
    }

    #[must_use]
    pub fn application_name(mut self, name: &str) -> Self {
        self.params.application_name = Some(name.to_string());
        self
    }

    #[must_use]
    pub fn error_rollback(mut self, level: ErrorRollback) -> Self {
        self.params.error_rollback = level;
        self
    }

    #[must_use]
    pub fn finish(self) -> ConnectionParams {
        self.params
    }
}

/// Per-cursor options for incremental results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CursorOptions {
    /// Rows per fetch; falls back to the session's `fetch_size`.
    pub fetch_size: Option<usize>,
    /// Rows the caller consumes per row-set; fetches are widened to end on a row-set boundary.
    pub rowset_size: usize,
    /// Keep fetched windows so the caller can scroll back without a server round trip.
    pub scrollable: bool,
    /// Track a keyset and local edits for positioned updates.
    pub updatable: bool,
    /// Declare the cursor `WITH HOLD` so it survives commit.
    pub with_hold: bool,
}

impl CursorOptions {
    #[must_use]
    pub fn fetch_size(mut self, rows: usize) -> Self {
        self.fetch_size = Some(rows);
        self
    }

    #[must_use]
    pub fn rowset_size(mut self, rows: usize) -> Self {
        self.rowset_size = rows;
        self
    }

    #[must_use]
    pub fn scrollable(mut self) -> Self {
        self.scrollable = true;
        self
    }

    #[must_use]
    pub fn updatable(mut self) -> Self {
        self.updatable = true;
        self.scrollable = true;
        self
    }

    #[must_use]
    pub fn with_hold(mut self) -> Self {
        self.with_hold = true;
        self
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_secs())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
