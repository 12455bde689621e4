//! Configuration errors raised while wiring up tracking, tunnels and databases.
//!
//! Everything else (ssh failures, driver errors, Sentry transport problems) is
//! passed through as `anyhow::Error` with context attached. Callers that need
//! to tell the two apart can `downcast_ref::<ConfigError>()`.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unable to load DSN")]
    MissingDsn,

    #[error("Database credentials not set")]
    MissingDatabaseCredentials,

    #[error("Database name not set")]
    MissingDatabaseName,

    #[error("SSH credentials not set")]
    MissingSshCredentials,

    #[error("We need either a port or an ssh tunnel to connect to")]
    MissingPortOrTunnel,

    #[error("{var} must be a port number, got '{value}'")]
    InvalidPort { var: &'static str, value: String },

    #[error("invalid connection string for protocol '{protocol}': {reason}")]
    InvalidConnectionString { protocol: String, reason: String },
}
