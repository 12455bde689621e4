//! Pooled database access with scoped sessions.

mod connection;
mod params;

pub use connection::{DatabaseConnection, PoolConfig, Session, SessionFactory};
pub use params::{ConnectionParams, DEFAULT_HOST, DEFAULT_PROTOCOL, redacted};
