//! Fixed-layout setup used by older services: Postgres on port 5432 of the
//! database host, reached over SSH with a key file during development.
//!
//! Unlike [`DatabaseConnection::init`], nothing here is configurable beyond
//! the environment variables; callers that need another port, host or
//! password authentication should use the general API instead.

use crate::database::{ConnectionParams, DatabaseConnection, Session};
use crate::environment::Environment;
use crate::error::ConfigError;
use crate::settings::{
    DB_NAME, DB_PASSWORD, DB_USERNAME, EnvSource, SSH_HOST, SSH_KEY_FILE, SSH_USERNAME,
};
use crate::ssh::{
    DEFAULT_REMOTE_HOST, DEFAULT_SSH_PORT, ForwarderLauncher, SshAuthMethod, SshTunnelConfig,
    SystemSsh, TunnelDescriptor,
};
use anyhow::Result;
use futures::future::BoxFuture;
use std::sync::Arc;

pub const POSTGRES_PORT: u16 = 5432;

/// Builds the development tunnel from `SSH_HOST`, `SSH_USERNAME` and
/// `SSH_KEY_FILE`, all of which are required.
pub struct SshTunnelFactory {
    config: SshTunnelConfig,
}

impl SshTunnelFactory {
    pub fn from_env(env: &EnvSource) -> Result<Self, ConfigError> {
        let (Some(host), Some(username), Some(key_file)) = (
            env.get(SSH_HOST),
            env.get(SSH_USERNAME),
            env.get(SSH_KEY_FILE),
        ) else {
            return Err(ConfigError::MissingSshCredentials);
        };

        let auth = SshAuthMethod::PublicKey {
            private_key_path: key_file,
            passphrase: None,
        };
        let config = SshTunnelConfig::new(host, username, auth, POSTGRES_PORT)
            .with_ssh_port(DEFAULT_SSH_PORT)
            .with_remote_host(DEFAULT_REMOTE_HOST);

        Ok(Self { config })
    }

    pub fn config(&self) -> &SshTunnelConfig {
        &self.config
    }

    /// Open the tunnel now.
    pub async fn start_tunnel(&self) -> Result<Arc<TunnelDescriptor>> {
        self.start_tunnel_with(Arc::new(SystemSsh)).await
    }

    pub async fn start_tunnel_with(
        &self,
        launcher: Arc<dyn ForwarderLauncher>,
    ) -> Result<Arc<TunnelDescriptor>> {
        let tunnel = Arc::new(TunnelDescriptor::with_launcher(self.config.clone(), launcher));
        tunnel.get_entrance_port().await?;
        Ok(tunnel)
    }
}

/// The application's database handle. Construct it once at startup and pass
/// it to whatever needs sessions.
#[derive(Debug)]
pub struct Database {
    connection: DatabaseConnection,
}

impl Database {
    pub async fn connect(env: &EnvSource, environment: Environment) -> Result<Self> {
        Self::connect_with(env, environment, Arc::new(SystemSsh)).await
    }

    pub async fn connect_with(
        env: &EnvSource,
        environment: Environment,
        launcher: Arc<dyn ForwarderLauncher>,
    ) -> Result<Self> {
        let params = Self::params(env)?;

        let tunnel = if environment.is_development() {
            Some(
                SshTunnelFactory::from_env(env)?
                    .start_tunnel_with(launcher)
                    .await?,
            )
        } else {
            None
        };

        let connection = DatabaseConnection::init(params, tunnel).await?;
        Ok(Self { connection })
    }

    fn params(env: &EnvSource) -> Result<ConnectionParams, ConfigError> {
        let (Some(username), Some(password)) = (env.get(DB_USERNAME), env.get(DB_PASSWORD)) else {
            return Err(ConfigError::MissingDatabaseCredentials);
        };
        let name = env.get(DB_NAME).ok_or(ConfigError::MissingDatabaseName)?;

        Ok(ConnectionParams::new(username, password, name).with_port(POSTGRES_PORT))
    }

    /// See [`DatabaseConnection::get_new_session`].
    pub async fn get_new_session<T, F>(&self, work: F) -> Result<T>
    where
        F: for<'s> FnOnce(&'s mut Session) -> BoxFuture<'s, Result<T>>,
    {
        self.connection.get_new_session(work).await
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }

    pub async fn close(self) {
        self.connection.close().await;
    }
}
