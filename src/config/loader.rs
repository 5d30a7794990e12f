//! Configuration loading from disk and the process environment.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Values supplied on the command line or through the environment.
/// Set fields replace what the file (or the defaults) provided.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub log_level: Option<String>,
    pub port: Option<u16>,
    pub attempts: Option<usize>,
    pub consider: Option<Vec<String>>,
    pub balance_method: Option<String>,
    pub rules: Option<PathBuf>,
}

impl Overrides {
    pub fn apply(self, config: &mut ProxyConfig) {
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(attempts) = self.attempts {
            config.attempts = attempts;
        }
        if let Some(consider) = self.consider {
            config.consider = consider
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(method) = self.balance_method {
            config.balance_method = method;
        }
        if let Some(rules) = self.rules {
            config.rules = rules;
        }
    }
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: ProxyConfig = toml::from_str(&content)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Build the effective configuration: defaults, then the optional file, then overrides.
pub fn resolve(path: Option<&Path>, overrides: Overrides) -> Result<ProxyConfig, ConfigError> {
    let mut config = match path {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    overrides.apply(&mut config);

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn file(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn file_then_overrides() {
        let f = file("port = 9000\nattempts = 3\nbalance_method = \"load\"\n");
        let overrides = Overrides {
            attempts: Some(5),
            consider: Some(vec!["up".into(), " unknown ".into(), "".into()]),
            ..Default::default()
        };

        let config = resolve(Some(f.path()), overrides).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.attempts, 5);
        assert_eq!(config.balance_method, "load");
        assert_eq!(config.consider, vec!["up".to_string(), "unknown".to_string()]);
    }

    #[test]
    fn parse_errors_surface() {
        let f = file("port = \"not a number\"");
        assert!(matches!(load_config(f.path()), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn validation_errors_surface() {
        let f = file("port = 0");
        let err = load_config(f.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("port must not be 0"));
    }

    #[test]
    fn no_file_uses_defaults() {
        let config = resolve(None, Overrides::default()).unwrap();
        assert_eq!(config.port, 8080);
    }
}
