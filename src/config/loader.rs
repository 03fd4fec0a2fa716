//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<GatewayConfig, ConfigError> {
    let config: GatewayConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::MonitorKind;
    use std::io::Write;

    const SAMPLE: &str = r#"
[listener]
bind_address = "127.0.0.1:8080"

[[clusters]]
name = "app"
nodes = ["127.0.0.1:3001", "127.0.0.1:3002"]
monitor = "expect"
send = "PING\r\n"
expect = "PONG"
fade_expect = "DRAIN"

[[routes]]
name = "api"
path_prefix = "/api"
cluster = "app"
cache_tag = "api"
sticky_header = "x-session"

[[routes]]
name = "static"
local_root = "/srv/www"

[cache]
max_size = 1048576
cacheable_size_limit = 65536

[stock]
limit = 4
"#;

    #[test]
    fn test_parse_sample() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(config.clusters[0].monitor, MonitorKind::Expect);
        assert_eq!(config.clusters[0].path, "/health");
        assert_eq!(config.routes[0].sticky_header.as_deref(), Some("x-session"));
        assert_eq!(config.routes[1].local_root.as_deref(), Some("/srv/www"));
        assert_eq!(config.stock.limit, 4);
        assert_eq!(config.stock.max_idle, 8);
        assert_eq!(config.failure.fade_ttl_secs, 3 * 60 * 60);
    }

    #[test]
    fn test_load_config_from_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(SAMPLE.as_bytes()).unwrap();
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.routes.len(), 2);
    }

    #[test]
    fn test_parse_error_and_validation_error() {
        assert!(matches!(
            parse_config("listener = 3"),
            Err(ConfigError::Parse(_))
        ));

        let err = parse_config("[[routes]]\nname = \"x\"\ncluster = \"ghost\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("unknown cluster 'ghost'"));
    }
}
