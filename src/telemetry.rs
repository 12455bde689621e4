//! Logging bootstrap and crash reporting.

use crate::environment::Environment;
use crate::error::ConfigError;
use crate::settings::{EnvSource, SENTRY_DSN};
use anyhow::{Context, Result};
use sentry::ClientInitGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_FILTER: &str = "dbtunnel=info,warn";

/// Install the global subscriber: fmt output filtered by `RUST_LOG`
/// (default `dbtunnel=info,warn`), with warnings forwarded to Sentry as
/// breadcrumbs and errors as events.
pub fn init_logging() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .try_init()
        .context("Failed to install tracing subscriber")
}

/// Sentry client setup. Hold on to the returned guard; dropping it flushes
/// and disables the client.
pub struct ErrorTracking;

impl ErrorTracking {
    /// `SENTRY_DSN` is required; without it this fails.
    pub fn initialize(env: &EnvSource) -> Result<ClientInitGuard> {
        let dsn = env.get(SENTRY_DSN).ok_or(ConfigError::MissingDsn)?;
        Self::start(&dsn, None)
    }

    /// Production requires `SENTRY_DSN`. Anywhere else tracking is skipped
    /// with a warning and no client is returned.
    pub fn initialize_for(
        env: &EnvSource,
        environment: Environment,
    ) -> Result<Option<ClientInitGuard>> {
        if !environment.is_production() {
            tracing::warn!("Skipping error tracking service");
            return Ok(None);
        }

        let dsn = env.get(SENTRY_DSN).ok_or(ConfigError::MissingDsn)?;
        Self::start(&dsn, Some("production")).map(Some)
    }

    fn start(dsn: &str, environment: Option<&'static str>) -> Result<ClientInitGuard> {
        let dsn: sentry::types::Dsn = dsn.parse().context("SENTRY_DSN is not a valid DSN")?;

        let guard = sentry::init(sentry::ClientOptions {
            dsn: Some(dsn),
            release: sentry::release_name!(),
            environment: environment.map(Into::into),
            ..Default::default()
        });

        tracing::info!("Error tracking enabled");
        Ok(guard)
    }
}
