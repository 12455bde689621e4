use super::params::{ConnectionParams, redacted};
use crate::error::ConfigError;
use crate::settings::EnvSource;
use crate::ssh::TunnelDescriptor;
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use sqlx::any::{AnyPoolOptions, install_default_drivers};
use sqlx::{Any, AnyPool, Transaction};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// One unit of work against the database.
pub type Session = Transaction<'static, Any>;

/// Pool sizing for the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Hands out sessions bound to the engine.
#[derive(Debug, Clone)]
pub struct SessionFactory {
    pool: AnyPool,
}

impl SessionFactory {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    pub async fn new_session(&self) -> Result<Session> {
        self.pool
            .begin()
            .await
            .context("Failed to start database session")
    }
}

/// A pooled database connection, optionally reached through an SSH tunnel.
///
/// The tunnel (if any) is kept alive for as long as this value is.
pub struct DatabaseConnection {
    url: Url,
    engine: AnyPool,
    session_factory: SessionFactory,
    tunnel: Option<Arc<TunnelDescriptor>>,
}

impl DatabaseConnection {
    /// Build the engine and session factory.
    ///
    /// With a tunnel, the tunnel is opened first and its local port replaces
    /// `params.port`. Without one, `params.port` is required.
    pub async fn init(
        params: ConnectionParams,
        tunnel: Option<Arc<TunnelDescriptor>>,
    ) -> Result<Self> {
        Self::init_with_pool(params, tunnel, PoolConfig::default()).await
    }

    pub async fn init_with_pool(
        params: ConnectionParams,
        tunnel: Option<Arc<TunnelDescriptor>>,
        pool: PoolConfig,
    ) -> Result<Self> {
        let port = match (&tunnel, params.port) {
            (Some(tunnel), _) => tunnel.get_entrance_port().await?,
            (None, Some(port)) => port,
            (None, None) => return Err(ConfigError::MissingPortOrTunnel.into()),
        };

        let url = params.connection_url(port)?;
        Self::from_url(url, tunnel, pool)
    }

    /// Connection parameters from `DB_*` variables, host `localhost`,
    /// protocol `postgresql`.
    pub async fn from_env(env: &EnvSource, tunnel: Option<Arc<TunnelDescriptor>>) -> Result<Self> {
        let params = ConnectionParams::from_env(env)?;
        Self::init(params, tunnel).await
    }

    /// Build the engine for an already complete URL. The pool connects
    /// lazily, so this never touches the network.
    pub fn from_url(
        url: Url,
        tunnel: Option<Arc<TunnelDescriptor>>,
        pool: PoolConfig,
    ) -> Result<Self> {
        install_default_drivers();

        let engine = AnyPoolOptions::new()
            .max_connections(pool.max_connections)
            .acquire_timeout(pool.acquire_timeout)
            .connect_lazy(url.as_str())
            .with_context(|| format!("Failed to create engine for {}", redacted(&url)))?;

        tracing::info!("Database engine ready for {}", redacted(&url));

        Ok(Self {
            url,
            session_factory: SessionFactory::new(engine.clone()),
            engine,
            tunnel,
        })
    }

    /// Run `work` in a fresh session.
    ///
    /// The session is committed when `work` returns `Ok` and rolled back when
    /// it returns `Err`. Either way, and also when `work` panics, the
    /// connection goes back to the pool.
    ///
    /// ```ignore
    /// let count: i64 = db
    ///     .get_new_session(|session| {
    ///         Box::pin(async move {
    ///             let n = sqlx::query_scalar("SELECT COUNT(*) FROM orders")
    ///                 .fetch_one(&mut **session)
    ///                 .await?;
    ///             Ok::<_, anyhow::Error>(n)
    ///         })
    ///     })
    ///     .await?;
    /// ```
    pub async fn get_new_session<T, F>(&self, work: F) -> Result<T>
    where
        F: for<'s> FnOnce(&'s mut Session) -> BoxFuture<'s, Result<T>>,
    {
        let mut session = self.session_factory.new_session().await?;

        match work(&mut session).await {
            Ok(value) => {
                session
                    .commit()
                    .await
                    .context("Failed to commit database session")?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = session.rollback().await {
                    tracing::warn!("Rollback after failed session also failed: {}", rollback_err);
                }
                Err(e)
            }
        }
    }

    /// Round-trip `SELECT 1` through the pool.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.engine)
            .await
            .with_context(|| format!("Database at {} is unreachable", redacted(&self.url)))?;
        Ok(())
    }

    pub fn engine(&self) -> &AnyPool {
        &self.engine
    }

    pub fn session_factory(&self) -> &SessionFactory {
        &self.session_factory
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn tunnel(&self) -> Option<&Arc<TunnelDescriptor>> {
        self.tunnel.as_ref()
    }

    /// Close the pool, then the tunnel.
    pub async fn close(self) {
        self.engine.close().await;
        if let Some(tunnel) = &self.tunnel {
            tunnel.close().await;
        }
        tracing::debug!("Database connection to {} closed", redacted(&self.url));
    }
}

impl fmt::Debug for DatabaseConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConnection")
            .field("url", &redacted(&self.url))
            .field("tunnel", &self.tunnel)
            .finish_non_exhaustive()
    }
}
