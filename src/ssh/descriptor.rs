//! A tunnel that is opened on first use.

use super::forwarder::{Forwarder, ForwarderLauncher, SystemSsh};
use super::types::{SshAuthMethod, SshTunnelConfig};
use crate::settings::{EnvSource, SshSettings};
use anyhow::Result;
use async_lock::Mutex;
use std::fmt;
use std::sync::Arc;

/// Describes how to reach a remote port and owns at most one forwarder for it.
///
/// Nothing is started until [`TunnelDescriptor::get_entrance_port`] is called.
/// Dropping the descriptor drops the forwarder, which kills the ssh process.
pub struct TunnelDescriptor {
    config: SshTunnelConfig,
    launcher: Arc<dyn ForwarderLauncher>,
    forwarder: Mutex<Option<Box<dyn Forwarder>>>,
}

impl TunnelDescriptor {
    pub fn new(config: SshTunnelConfig) -> Self {
        Self::with_launcher(config, Arc::new(SystemSsh))
    }

    pub fn with_launcher(config: SshTunnelConfig, launcher: Arc<dyn ForwarderLauncher>) -> Self {
        Self {
            config,
            launcher,
            forwarder: Mutex::new(None),
        }
    }

    /// Tunnel to `proxy_target_port` on the SSH server, using `SSH_HOST`,
    /// `SSH_USERNAME` and either `SSH_KEY_FILE` or `SSH_PASSWORD`.
    pub fn from_env(env: &EnvSource, proxy_target_port: u16) -> Result<Self> {
        let ssh = SshSettings::from_env(env)?;
        let config = SshTunnelConfig::new(
            ssh.host.clone(),
            ssh.username.clone(),
            ssh.auth_method(),
            proxy_target_port,
        );
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &SshTunnelConfig {
        &self.config
    }

    pub fn auth_method(&self) -> &SshAuthMethod {
        &self.config.auth_method
    }

    /// Start the tunnel if it isn't running yet and return the local port
    /// that forwards to the remote end.
    pub async fn get_entrance_port(&self) -> Result<u16> {
        let mut guard = self.forwarder.lock().await;
        if let Some(forwarder) = guard.as_ref() {
            return Ok(forwarder.local_port());
        }

        let forwarder = self.launcher.launch(&self.config).await?;
        let port = forwarder.local_port();
        tracing::debug!(
            "Tunnel to {}:{} via {} listening on port {}",
            self.config.remote_host,
            self.config.remote_port,
            self.config.ssh_url(),
            port
        );
        *guard = Some(forwarder);
        Ok(port)
    }

    pub async fn is_open(&self) -> bool {
        self.forwarder.lock().await.is_some()
    }

    /// Stop the forwarder if one is running. A later
    /// [`get_entrance_port`](Self::get_entrance_port) opens a fresh one.
    pub async fn close(&self) {
        let forwarder = self.forwarder.lock().await.take();
        if let Some(mut forwarder) = forwarder {
            tracing::info!("Closing ssh tunnel");
            forwarder.stop().await;
        }
    }
}

impl fmt::Debug for TunnelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelDescriptor")
            .field("ssh", &self.config.ssh_url())
            .field("ssh_port", &self.config.ssh_port)
            .field("remote_host", &self.config.remote_host)
            .field("remote_port", &self.config.remote_port)
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{CountingLauncher, descriptor};
    use super::*;
    use crate::settings::{SSH_HOST, SSH_KEY_FILE, SSH_PASSWORD, SSH_USERNAME};
    use std::sync::atomic::Ordering;

    #[test]
    fn test_nothing_starts_until_port_requested() {
        smol::block_on(async {
            let launcher = Arc::new(CountingLauncher::default());
            let tunnel = descriptor(launcher.clone());

            assert!(!tunnel.is_open().await);
            assert_eq!(launcher.launches(), 0);
        });
    }

    #[test]
    fn test_entrance_port_is_reused() {
        smol::block_on(async {
            let launcher = Arc::new(CountingLauncher::default());
            let tunnel = descriptor(launcher.clone());

            let first = tunnel.get_entrance_port().await.unwrap();
            let second = tunnel.get_entrance_port().await.unwrap();
            let third = tunnel.get_entrance_port().await.unwrap();

            assert_eq!(first, CountingLauncher::FIRST_PORT);
            assert_eq!(first, second);
            assert_eq!(second, third);
            assert_eq!(launcher.launches(), 1);
        });
    }

    #[test]
    fn test_concurrent_first_use_launches_once() {
        smol::block_on(async {
            let launcher = Arc::new(CountingLauncher::default());
            let tunnel = Arc::new(descriptor(launcher.clone()));

            let tasks: Vec<_> = (0..8)
                .map(|_| {
                    let tunnel = tunnel.clone();
                    smol::spawn(async move { tunnel.get_entrance_port().await })
                })
                .collect();

            for task in tasks {
                assert_eq!(task.await.unwrap(), CountingLauncher::FIRST_PORT);
            }
            assert_eq!(launcher.launches(), 1);
        });
    }

    #[test]
    fn test_launch_failure_propagates() {
        smol::block_on(async {
            let launcher = Arc::new(CountingLauncher {
                fail: true,
                ..Default::default()
            });
            let tunnel = descriptor(launcher);

            let err = tunnel.get_entrance_port().await.unwrap_err();
            assert!(err.to_string().contains("Connection refused"));
            assert!(!tunnel.is_open().await);
        });
    }

    #[test]
    fn test_close_stops_forwarder_once() {
        smol::block_on(async {
            let launcher = Arc::new(CountingLauncher::default());
            let tunnel = descriptor(launcher.clone());

            tunnel.get_entrance_port().await.unwrap();
            tunnel.close().await;
            tunnel.close().await;

            assert!(!tunnel.is_open().await);
            assert_eq!(launcher.stops.load(Ordering::SeqCst), 1);
        });
    }

    #[test]
    fn test_reopen_after_close() {
        smol::block_on(async {
            let launcher = Arc::new(CountingLauncher::default());
            let tunnel = descriptor(launcher.clone());

            tunnel.get_entrance_port().await.unwrap();
            tunnel.close().await;
            let port = tunnel.get_entrance_port().await.unwrap();

            assert_eq!(port, CountingLauncher::FIRST_PORT + 1);
            assert_eq!(launcher.launches(), 2);
        });
    }

    #[test]
    fn test_from_env_prefers_key_file() {
        let env = EnvSource::from_pairs([
            (SSH_HOST, "bastion.example.com"),
            (SSH_USERNAME, "deploy"),
            (SSH_KEY_FILE, "/home/deploy/.ssh/id_ed25519"),
            (SSH_PASSWORD, "letmein"),
        ]);
        let tunnel = TunnelDescriptor::from_env(&env, 5433).unwrap();

        assert!(matches!(
            tunnel.auth_method(),
            SshAuthMethod::PublicKey { private_key_path, .. } if private_key_path == "/home/deploy/.ssh/id_ed25519"
        ));
        assert_eq!(tunnel.config().ssh_port, 22);
        assert_eq!(tunnel.config().remote_host, "127.0.0.1");
        assert_eq!(tunnel.config().remote_port, 5433);
    }

    #[test]
    fn test_from_env_without_host_fails() {
        let env = EnvSource::from_pairs([(SSH_USERNAME, "deploy")]);
        let err = TunnelDescriptor::from_env(&env, 5432).unwrap_err();
        assert_eq!(
            err.downcast_ref::<crate::ConfigError>(),
            Some(&crate::ConfigError::MissingSshCredentials)
        );
    }
}
