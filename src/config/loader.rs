//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::ResilienceConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation failed: {}", format_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn format_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ResilienceConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: ResilienceConfig = toml::from_str(&content)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_valid_file() {
        let dir = std::env::temp_dir().join("resilient-client-loader-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("valid.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "[breaker]\nfailure_threshold = 4").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.breaker.failure_threshold, 4);
    }

    #[test]
    fn surfaces_validation_errors() {
        let dir = std::env::temp_dir().join("resilient-client-loader-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("invalid.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "[connection]\nretry_attempts = 0").unwrap();

        match load_config(&path) {
            Err(ConfigError::Validation(errors)) => {
                assert_eq!(errors[0].field, "connection.retry_attempts");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(Path::new("/nonexistent/resilience.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
