//! SSH tunneling for reaching a database that only listens on a remote host.
//!
//! This module provides:
//! - `TunnelDescriptor` - Lazily opened tunnel owning at most one forwarder
//! - `SshTunnel` - `ssh -L` process forwarder
//! - `Forwarder` / `ForwarderLauncher` - The seam between the two

mod descriptor;
mod forwarder;
mod tunnel;
mod types;

#[cfg(test)]
pub(crate) use descriptor::testing;
pub use descriptor::TunnelDescriptor;
pub use forwarder::{Forwarder, ForwarderLauncher, SystemSsh};
pub use tunnel::SshTunnel;
pub use types::{DEFAULT_REMOTE_HOST, DEFAULT_SSH_PORT, SshAuthMethod, SshTunnelConfig};
