//! SSH tunnel configuration types.

use std::path::PathBuf;

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_REMOTE_HOST: &str = "127.0.0.1";
pub const DEFAULT_LOCAL_BIND_HOST: &str = "127.0.0.1";

/// Authentication method for SSH connections
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SshAuthMethod {
    /// Use ssh-agent or the user's default identities
    #[default]
    Agent,
    /// Password authentication (delivered through SSH_ASKPASS)
    Password(String),
    /// Private key file with optional passphrase
    PublicKey {
        private_key_path: String,
        passphrase: Option<String>,
    },
}

impl SshAuthMethod {
    /// Pick key authentication when a key file is given, otherwise password,
    /// otherwise whatever the agent offers.
    pub fn prefer_key(key_file: Option<PathBuf>, password: Option<String>) -> Self {
        match (key_file, password) {
            (Some(path), _) => SshAuthMethod::PublicKey {
                private_key_path: path.to_string_lossy().into_owned(),
                passphrase: None,
            },
            (None, Some(password)) => SshAuthMethod::Password(password),
            (None, None) => SshAuthMethod::Agent,
        }
    }

    /// Secret ssh would prompt for: the password, or a key's passphrase.
    pub fn askpass_secret(&self) -> Option<&str> {
        match self {
            SshAuthMethod::Agent => None,
            SshAuthMethod::Password(password) => Some(password),
            SshAuthMethod::PublicKey { passphrase, .. } => passphrase.as_deref(),
        }
    }
}

/// Where to tunnel to and how to get there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTunnelConfig {
    /// SSH server hostname
    pub ssh_host: String,
    /// SSH server port (default: 22)
    pub ssh_port: u16,
    /// SSH username
    pub ssh_user: String,
    pub auth_method: SshAuthMethod,
    /// Remote host to tunnel to, as seen from the SSH server
    pub remote_host: String,
    pub remote_port: u16,
    /// Local bind address (default: 127.0.0.1)
    pub local_bind_host: String,
    /// Local port to bind (0 for an ephemeral port)
    pub local_bind_port: u16,
    /// Additional arguments passed to ssh verbatim
    pub extra_args: Vec<String>,
}

impl SshTunnelConfig {
    /// Forward to `remote_port` on the SSH server's loopback interface.
    pub fn new(
        ssh_host: impl Into<String>,
        ssh_user: impl Into<String>,
        auth_method: SshAuthMethod,
        remote_port: u16,
    ) -> Self {
        Self {
            ssh_host: ssh_host.into(),
            ssh_port: DEFAULT_SSH_PORT,
            ssh_user: ssh_user.into(),
            auth_method,
            remote_host: DEFAULT_REMOTE_HOST.to_string(),
            remote_port,
            local_bind_host: DEFAULT_LOCAL_BIND_HOST.to_string(),
            local_bind_port: 0,
            extra_args: Vec::new(),
        }
    }

    pub fn with_ssh_port(mut self, port: u16) -> Self {
        self.ssh_port = port;
        self
    }

    pub fn with_remote_host(mut self, host: impl Into<String>) -> Self {
        self.remote_host = host.into();
        self
    }

    /// Set the local bind port (0 for an ephemeral port)
    pub fn with_local_port(mut self, port: u16) -> Self {
        self.local_bind_port = port;
        self
    }

    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    /// Build the SSH destination (user@host)
    pub fn ssh_url(&self) -> String {
        if self.ssh_user.is_empty() {
            self.ssh_host.clone()
        } else {
            format!("{}@{}", self.ssh_user, self.ssh_host)
        }
    }

    /// `-L` argument for the given local port.
    pub fn forward_spec(&self, local_port: u16) -> String {
        format!(
            "{}:{}:{}:{}",
            self.local_bind_host, local_port, self.remote_host, self.remote_port
        )
    }
}
