//! The seam between a tunnel descriptor and whatever actually moves bytes.

use super::tunnel::SshTunnel;
use super::types::SshTunnelConfig;
use anyhow::Result;
use async_trait::async_trait;

/// A running port forward.
#[async_trait]
pub trait Forwarder: Send {
    /// Local port that forwards to the remote end.
    fn local_port(&self) -> u16;

    /// Stop forwarding. Calling it twice is harmless.
    async fn stop(&mut self);
}

/// Starts forwarders for a tunnel configuration.
#[async_trait]
pub trait ForwarderLauncher: Send + Sync {
    async fn launch(&self, config: &SshTunnelConfig) -> Result<Box<dyn Forwarder>>;
}

/// Launches the system `ssh` binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSsh;

#[async_trait]
impl ForwarderLauncher for SystemSsh {
    async fn launch(&self, config: &SshTunnelConfig) -> Result<Box<dyn Forwarder>> {
        let tunnel = SshTunnel::start(config.clone()).await?;
        Ok(Box::new(tunnel))
    }
}
