//! Connectivity check
//!
//! Connects to the configured database the same way a service would
//! (through an SSH tunnel when `IS_DEV` is set), runs a trivial query in a
//! session and shuts everything down.
//!
//! Run with:
//!   IS_DEV=1 DB_USERNAME=.. DB_PASSWORD=.. DB_NAME=.. SSH_HOST=.. SSH_USERNAME=.. \
//!     cargo run --bin dbtunnel-check

use anyhow::{Context, Result};
use dbtunnel::legacy::POSTGRES_PORT;
use dbtunnel::settings::{DatabaseSettings, SSH_HOST};
use dbtunnel::{DatabaseConnection, EnvSource, Environment, ErrorTracking, TunnelDescriptor};
use std::sync::Arc;

fn main() -> Result<()> {
    // Subscriber first so a bad .env file gets reported. RUST_LOG therefore
    // comes from the shell, not from .env.
    dbtunnel::telemetry::init_logging()?;
    let env = EnvSource::process();

    let environment = Environment::from_env(&env);
    let _tracking = ErrorTracking::initialize_for(&env, environment)?;

    smol::block_on(check(&env, environment))
}

async fn check(env: &EnvSource, environment: Environment) -> Result<()> {
    let tunnel = if environment.is_development() {
        let target_port = DatabaseSettings::from_env(env)?
            .port
            .unwrap_or(POSTGRES_PORT);
        let tunnel = TunnelDescriptor::from_env(env, target_port)?;
        tracing::info!(
            "Development mode: tunnelling via {} to port {}",
            env.get(SSH_HOST).unwrap_or_default(),
            target_port
        );
        Some(Arc::new(tunnel))
    } else {
        None
    };

    let db = DatabaseConnection::from_env(env, tunnel).await?;
    tracing::info!("Connecting with {:?}", db);

    db.ping().await?;
    tracing::info!("SELECT 1 succeeded");

    let version: String = db
        .get_new_session(|session| {
            Box::pin(async move {
                let version = sqlx::query_scalar("SELECT version()")
                    .fetch_one(&mut **session)
                    .await
                    .context("Failed to read server version")?;
                Ok::<_, anyhow::Error>(version)
            })
        })
        .await?;
    tracing::info!(
        "Server version: {}",
        version.split(',').next().unwrap_or(&version)
    );

    db.close().await;
    tracing::info!("Connection check complete");
    Ok(())
}
