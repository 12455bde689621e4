//! SSH port forwarding through the system ssh binary.
//!
//! Using `ssh -L` instead of an SSH library means the user's ~/.ssh/config,
//! ssh-agent, known_hosts and ProxyJump settings all apply unchanged.

use super::forwarder::Forwarder;
use super::types::{SshAuthMethod, SshTunnelConfig};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use smol::io::{AsyncBufReadExt, BufReader};
use smol::net::TcpListener;
use smol::process::{Child, Command, Stdio};
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// An active `ssh -N -L` process forwarding a local port to the remote host.
///
/// The ssh process is the forward itself (no connection multiplexing), so
/// killing it tears the forward down. It is killed when the tunnel is dropped.
pub struct SshTunnel {
    config: SshTunnelConfig,
    local_port: u16,
    process: Child,
    stopped: bool,
    #[cfg(unix)]
    _askpass_dir: Option<tempfile::TempDir>,
}

impl SshTunnel {
    /// Spawn ssh and wait until the local end accepts connections.
    pub async fn start(config: SshTunnelConfig) -> Result<Self> {
        let local_port = Self::resolve_local_port(&config).await?;
        let forward_spec = config.forward_spec(local_port);

        let mut cmd = Command::new("ssh");
        cmd.kill_on_drop(true);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.args(ssh_args(&config, local_port));

        #[cfg(unix)]
        let askpass_dir = match config.auth_method.askpass_secret() {
            Some(secret) => Some(Self::setup_askpass(&mut cmd, secret)?),
            None => None,
        };

        #[cfg(not(unix))]
        if config.auth_method.askpass_secret().is_some() {
            tracing::warn!(
                "Password authentication via askpass not supported on this platform, \
                falling back to default SSH auth"
            );
        }

        tracing::info!(
            "Starting SSH tunnel: ssh -L {} -N {}",
            forward_spec,
            config.ssh_url()
        );
        tracing::debug!("Full SSH command: {:?}", cmd);

        let mut process = cmd.spawn().context("Failed to spawn ssh process")?;

        if let Some(stderr) = process.stderr.take() {
            let ssh_url = config.ssh_url();
            smol::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Some(result) = lines.next().await {
                    match result {
                        Ok(line) => log_ssh_stderr(&ssh_url, &line),
                        Err(e) => {
                            tracing::debug!("SSH stderr read error: {}", e);
                            break;
                        }
                    }
                }
            })
            .detach();
        }

        // Give ssh a moment to authenticate before probing
        smol::Timer::after(Duration::from_millis(500)).await;

        if let Ok(Some(status)) = process.try_status() {
            anyhow::bail!(
                "SSH process exited immediately with status: {}. \
                Check SSH credentials and connectivity to {}:{}",
                status,
                config.ssh_host,
                config.ssh_port
            );
        }

        let verify_addr = format!("{}:{}", config.local_bind_host, local_port);
        let mut retries = 5;
        while retries > 0 {
            match smol::net::TcpStream::connect(&verify_addr).await {
                Ok(_) => {
                    tracing::info!(
                        "SSH tunnel established: {} -> {}:{}",
                        verify_addr,
                        config.remote_host,
                        config.remote_port
                    );
                    break;
                }
                Err(_) if retries > 1 => {
                    smol::Timer::after(Duration::from_millis(200)).await;
                    retries -= 1;
                }
                Err(e) => {
                    let _ = process.kill();
                    anyhow::bail!(
                        "SSH tunnel failed to establish - local port {} not listening: {}",
                        local_port,
                        e
                    );
                }
            }
        }

        Ok(Self {
            config,
            local_port,
            process,
            stopped: false,
            #[cfg(unix)]
            _askpass_dir: askpass_dir,
        })
    }

    /// Point SSH_ASKPASS at a script in a private temp dir that prints the
    /// secret. The dir (and script) go away when the returned handle drops.
    #[cfg(unix)]
    fn setup_askpass(cmd: &mut Command, secret: &str) -> Result<tempfile::TempDir> {
        let temp_dir = tempfile::Builder::new()
            .prefix("dbtunnel-ssh-")
            .tempdir()
            .context("Failed to create temp directory")?;
        let askpass_path = temp_dir.path().join("askpass.sh");

        std::fs::write(&askpass_path, askpass_script(secret))
            .context("Failed to write askpass script")?;

        let mut perms = std::fs::metadata(&askpass_path)?.permissions();
        perms.set_mode(0o700);
        std::fs::set_permissions(&askpass_path, perms)?;

        cmd.env("SSH_ASKPASS", &askpass_path);
        cmd.env("SSH_ASKPASS_REQUIRE", "force");
        // askpass is only consulted without a terminal
        cmd.env("DISPLAY", ":0");

        Ok(temp_dir)
    }

    /// The configured local port, or an ephemeral one when it is 0.
    async fn resolve_local_port(config: &SshTunnelConfig) -> Result<u16> {
        if config.local_bind_port == 0 {
            Self::find_available_port(&config.local_bind_host).await
        } else {
            Ok(config.local_bind_port)
        }
    }

    async fn find_available_port(bind_host: &str) -> Result<u16> {
        let listener = TcpListener::bind(format!("{}:0", bind_host))
            .await
            .context("Failed to find available port")?;
        let port = listener.local_addr()?.port();
        drop(listener);
        Ok(port)
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn is_alive(&mut self) -> bool {
        matches!(self.process.try_status(), Ok(None))
    }

    /// SIGTERM, then SIGKILL if ssh is still around, then reap it.
    pub async fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        tracing::info!("Closing ssh tunnel to {}", self.config.ssh_url());

        #[cfg(unix)]
        {
            // SAFETY: the pid belongs to a child we have not reaped yet.
            unsafe {
                libc::kill(self.process.id() as i32, libc::SIGTERM);
            }
            smol::Timer::after(Duration::from_millis(100)).await;
        }

        if self.is_alive() {
            let _ = self.process.kill();
        }

        let _ = self.process.status().await;

        tracing::debug!("SSH tunnel shutdown complete");
    }
}

#[async_trait]
impl Forwarder for SshTunnel {
    fn local_port(&self) -> u16 {
        self.local_port
    }

    async fn stop(&mut self) {
        self.shutdown().await;
    }
}

impl Drop for SshTunnel {
    fn drop(&mut self) {
        if !self.stopped {
            tracing::debug!("Dropping live ssh tunnel to {}", self.config.ssh_url());
            let _ = self.process.kill();
        }
    }
}

/// Arguments for a single-use `ssh -N -L` forward. No ControlMaster: the
/// spawned process must be the one holding the listener.
fn ssh_args(config: &SshTunnelConfig, local_port: u16) -> Vec<String> {
    let mut args: Vec<String> = vec!["-L".into(), config.forward_spec(local_port), "-N".into()];

    for option in [
        "ExitOnForwardFailure=yes",
        "StrictHostKeyChecking=accept-new",
        "ServerAliveInterval=15",
        "ServerAliveCountMax=3",
    ] {
        args.push("-o".into());
        args.push(option.into());
    }

    if config.ssh_port != 22 {
        args.push("-p".into());
        args.push(config.ssh_port.to_string());
    }

    if let SshAuthMethod::PublicKey {
        private_key_path, ..
    } = &config.auth_method
    {
        args.push("-i".into());
        args.push(private_key_path.clone());
    }

    args.extend(config.extra_args.iter().cloned());
    args.push(config.ssh_url());
    args
}

fn askpass_script(secret: &str) -> String {
    format!("#!/bin/sh\necho '{}'\n", secret.replace('\'', "'\"'\"'"))
}

fn log_ssh_stderr(ssh_url: &str, line: &str) {
    if line.contains("Permission denied") || line.contains("Authentication failed") {
        tracing::error!("SSH authentication failed for {}: {}", ssh_url, line);
    } else if line.contains("Connection refused") || line.contains("Connection timed out") {
        tracing::error!("SSH connection error: {}", line);
    } else {
        tracing::debug!("SSH stderr: {}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_askpass_script_quotes_secret() {
        assert_eq!(askpass_script("simple"), "#!/bin/sh\necho 'simple'\n");
        assert_eq!(
            askpass_script("it's"),
            "#!/bin/sh\necho 'it'\"'\"'s'\n"
        );
    }

    #[test]
    fn test_find_available_port() {
        smol::block_on(async {
            let port = SshTunnel::find_available_port("127.0.0.1").await.unwrap();
            assert_ne!(port, 0);
        });
    }

    #[test]
    fn test_resolve_local_port() {
        smol::block_on(async {
            let fixed = SshTunnelConfig::new("bastion", "deploy", SshAuthMethod::Agent, 5432)
                .with_local_port(15432);
            assert_eq!(SshTunnel::resolve_local_port(&fixed).await.unwrap(), 15432);

            let ephemeral = fixed.with_local_port(0);
            assert_ne!(SshTunnel::resolve_local_port(&ephemeral).await.unwrap(), 0);
        });
    }

    #[test]
    fn test_ssh_args_single_process_forward() {
        let config = SshTunnelConfig::new("bastion", "deploy", SshAuthMethod::Agent, 5432);
        let args = ssh_args(&config, 40001);

        assert_eq!(&args[..3], ["-L", "127.0.0.1:40001:127.0.0.1:5432", "-N"]);
        assert!(args.iter().any(|a| a == "ExitOnForwardFailure=yes"));
        // A multiplexing master would outlive the spawned pid and keep the port open
        assert!(!args.iter().any(|a| a.starts_with("Control")));
        assert!(!args.iter().any(|a| a == "-p" || a == "-i"));
        assert_eq!(args.last().map(String::as_str), Some("deploy@bastion"));
    }

    #[test]
    fn test_ssh_args_key_port_and_extra_args() {
        let auth = SshAuthMethod::PublicKey {
            private_key_path: "/keys/id_rsa".to_string(),
            passphrase: None,
        };
        let config = SshTunnelConfig::new("bastion", "deploy", auth, 5432)
            .with_ssh_port(2222)
            .with_extra_args(vec!["-J".to_string(), "jump.example.com".to_string()]);
        let args = ssh_args(&config, 40001);

        let port = args.iter().position(|a| a == "-p").unwrap();
        assert_eq!(args[port + 1], "2222");
        let key = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[key + 1], "/keys/id_rsa");
        assert_eq!(
            &args[args.len() - 3..],
            ["-J", "jump.example.com", "deploy@bastion"]
        );
    }
}
