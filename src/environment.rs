use crate::settings::{EnvSource, IS_DEV};

/// Whether we are on a developer machine (database behind an SSH tunnel) or
/// in production (database reachable directly).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    Production,
    #[default]
    Development,
}

impl Environment {
    /// Resolve from `IS_DEV`: any non-empty value means development.
    pub fn from_env(env: &EnvSource) -> Self {
        if env.is_set(IS_DEV) {
            Environment::Development
        } else {
            Environment::Production
        }
    }

    /// `IS_DEV` from the process environment.
    pub fn is_dev() -> bool {
        Self::from_env(&EnvSource::process()).is_development()
    }

    pub fn is_development(self) -> bool {
        self == Environment::Development
    }

    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_is_production() {
        let env = EnvSource::from_pairs(Vec::<(String, String)>::new());
        assert_eq!(Environment::from_env(&env), Environment::Production);
    }

    #[test]
    fn test_any_value_is_development() {
        for value in ["1", "true", "yes", "0", "false"] {
            let env = EnvSource::from_pairs([(IS_DEV, value)]);
            assert!(
                Environment::from_env(&env).is_development(),
                "IS_DEV={} should mean development",
                value
            );
        }
    }

    #[test]
    fn test_empty_value_is_production() {
        let env = EnvSource::from_pairs([(IS_DEV, "")]);
        assert!(Environment::from_env(&env).is_production());
    }

    #[test]
    fn test_default_is_development() {
        assert_eq!(Environment::default(), Environment::Development);
    }
}
