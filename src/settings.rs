//! Environment-backed settings.
//!
//! Values are read through an [`EnvSource`] so that callers (and tests) can
//! swap the process environment for a fixed map. Empty values count as unset.

use crate::error::ConfigError;
use crate::ssh::SshAuthMethod;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

pub const SENTRY_DSN: &str = "SENTRY_DSN";
pub const DB_USERNAME: &str = "DB_USERNAME";
pub const DB_PASSWORD: &str = "DB_PASSWORD";
pub const DB_NAME: &str = "DB_NAME";
pub const DB_PORT: &str = "DB_PORT";
pub const SSH_HOST: &str = "SSH_HOST";
pub const SSH_USERNAME: &str = "SSH_USERNAME";
pub const SSH_KEY_FILE: &str = "SSH_KEY_FILE";
pub const SSH_PASSWORD: &str = "SSH_PASSWORD";
pub const IS_DEV: &str = "IS_DEV";

type Lookup = dyn Fn(&str) -> Option<String> + Send + Sync;

/// Where settings come from.
#[derive(Clone)]
pub struct EnvSource {
    lookup: Arc<Lookup>,
}

impl EnvSource {
    /// The process environment, after loading `.env` from the working
    /// directory if one exists. Variables already set are not overridden.
    pub fn process() -> Self {
        // Allow missing `.env` files without failing.
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                tracing::warn!("Ignoring unreadable .env file: {}", e);
            }
        }
        Self {
            lookup: Arc::new(|key| std::env::var(key).ok()),
        }
    }

    /// A fixed set of variables; nothing else is visible.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            lookup: Arc::new(move |key| map.get(key).cloned()),
        }
    }

    /// Look up a variable, treating empty values as unset.
    pub fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.is_empty())
    }

    pub fn is_set(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn port(&self, key: &'static str) -> Result<Option<u16>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map(Some)
                .map_err(|_| ConfigError::InvalidPort {
                    var: key,
                    value: raw,
                }),
        }
    }
}

impl fmt::Debug for EnvSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvSource").finish_non_exhaustive()
    }
}

/// Database credentials from `DB_*` variables.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub name: String,
    /// `DB_PORT`, when set.
    pub port: Option<u16>,
}

impl DatabaseSettings {
    pub fn from_env(env: &EnvSource) -> Result<Self, ConfigError> {
        let (Some(username), Some(password)) = (env.get(DB_USERNAME), env.get(DB_PASSWORD)) else {
            return Err(ConfigError::MissingDatabaseCredentials);
        };
        let name = env.get(DB_NAME).ok_or(ConfigError::MissingDatabaseName)?;
        let port = env.port(DB_PORT)?;

        Ok(Self {
            username,
            password,
            name,
            port,
        })
    }
}

impl fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("username", &self.username)
            .field("password", &"********")
            .field("name", &self.name)
            .field("port", &self.port)
            .finish()
    }
}

/// SSH endpoint credentials from `SSH_*` variables.
#[derive(Clone, PartialEq, Eq)]
pub struct SshSettings {
    pub host: String,
    pub username: String,
    pub key_file: Option<PathBuf>,
    pub password: Option<String>,
}

impl SshSettings {
    /// Host and username are required; key file and password are optional.
    pub fn from_env(env: &EnvSource) -> Result<Self, ConfigError> {
        let (Some(host), Some(username)) = (env.get(SSH_HOST), env.get(SSH_USERNAME)) else {
            return Err(ConfigError::MissingSshCredentials);
        };

        Ok(Self {
            host,
            username,
            key_file: env.get(SSH_KEY_FILE).map(PathBuf::from),
            password: env.get(SSH_PASSWORD),
        })
    }

    pub fn auth_method(&self) -> SshAuthMethod {
        SshAuthMethod::prefer_key(self.key_file.clone(), self.password.clone())
    }
}

impl fmt::Debug for SshSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshSettings")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("key_file", &self.key_file)
            .field("password", &self.password.as_ref().map(|_| "********"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_env() -> Vec<(&'static str, &'static str)> {
        vec![
            (DB_USERNAME, "app"),
            (DB_PASSWORD, "hunter2"),
            (DB_NAME, "orders"),
        ]
    }

    #[test]
    fn test_database_settings_from_env() {
        let mut vars = db_env();
        vars.push((DB_PORT, "6543"));
        let settings = DatabaseSettings::from_env(&EnvSource::from_pairs(vars)).unwrap();

        assert_eq!(settings.username, "app");
        assert_eq!(settings.password, "hunter2");
        assert_eq!(settings.name, "orders");
        assert_eq!(settings.port, Some(6543));
    }

    #[test]
    fn test_database_port_is_optional() {
        let settings = DatabaseSettings::from_env(&EnvSource::from_pairs(db_env())).unwrap();
        assert_eq!(settings.port, None);
    }

    #[test]
    fn test_missing_database_password() {
        let env = EnvSource::from_pairs([(DB_USERNAME, "app"), (DB_NAME, "orders")]);
        assert_eq!(
            DatabaseSettings::from_env(&env),
            Err(ConfigError::MissingDatabaseCredentials)
        );
    }

    #[test]
    fn test_missing_database_name() {
        let env = EnvSource::from_pairs([(DB_USERNAME, "app"), (DB_PASSWORD, "hunter2")]);
        assert_eq!(
            DatabaseSettings::from_env(&env),
            Err(ConfigError::MissingDatabaseName)
        );
    }

    #[test]
    fn test_empty_value_counts_as_unset() {
        let env = EnvSource::from_pairs([
            (DB_USERNAME, ""),
            (DB_PASSWORD, "hunter2"),
            (DB_NAME, "orders"),
        ]);
        assert_eq!(
            DatabaseSettings::from_env(&env),
            Err(ConfigError::MissingDatabaseCredentials)
        );
    }

    #[test]
    fn test_invalid_port() {
        let mut vars = db_env();
        vars.push((DB_PORT, "not-a-port"));
        assert_eq!(
            DatabaseSettings::from_env(&EnvSource::from_pairs(vars)),
            Err(ConfigError::InvalidPort {
                var: DB_PORT,
                value: "not-a-port".to_string()
            })
        );
    }

    #[test]
    fn test_ssh_settings_require_host_and_user() {
        let env = EnvSource::from_pairs([(SSH_HOST, "bastion.example.com")]);
        assert_eq!(
            SshSettings::from_env(&env),
            Err(ConfigError::MissingSshCredentials)
        );
    }

    #[test]
    fn test_ssh_key_preferred_over_password() {
        let env = EnvSource::from_pairs([
            (SSH_HOST, "bastion.example.com"),
            (SSH_USERNAME, "deploy"),
            (SSH_KEY_FILE, "/home/deploy/.ssh/id_ed25519"),
            (SSH_PASSWORD, "letmein"),
        ]);
        let settings = SshSettings::from_env(&env).unwrap();

        assert_eq!(
            settings.auth_method(),
            SshAuthMethod::PublicKey {
                private_key_path: "/home/deploy/.ssh/id_ed25519".to_string(),
                passphrase: None,
            }
        );
    }

    #[test]
    fn test_ssh_password_used_without_key() {
        let env = EnvSource::from_pairs([
            (SSH_HOST, "bastion.example.com"),
            (SSH_USERNAME, "deploy"),
            (SSH_PASSWORD, "letmein"),
        ]);
        let settings = SshSettings::from_env(&env).unwrap();

        assert_eq!(
            settings.auth_method(),
            SshAuthMethod::Password("letmein".to_string())
        );
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let settings = DatabaseSettings::from_env(&EnvSource::from_pairs(db_env())).unwrap();
        assert!(!format!("{:?}", settings).contains("hunter2"));
    }
}
