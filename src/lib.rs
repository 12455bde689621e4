//! Error tracking, pooled database sessions and on-demand SSH tunnels for
//! services whose database is only reachable through a bastion host during
//! development.

pub mod database;
pub mod environment;
pub mod error;
pub mod legacy;
pub mod settings;
pub mod ssh;
pub mod telemetry;

pub use database::{ConnectionParams, DatabaseConnection, Session, SessionFactory};
pub use environment::Environment;
pub use error::ConfigError;
pub use settings::EnvSource;
pub use ssh::TunnelDescriptor;
pub use telemetry::ErrorTracking;
