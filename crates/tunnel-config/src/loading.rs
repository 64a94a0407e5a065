//! Configuration file loading.
//!
//! `tunneld` consumes a single `Configuration` value; there is no hierarchy
//! of user/project files to merge (unlike the per-user config layering this
//! module's ancestor implemented) — a tunnel daemon reads exactly the file
//! named on its command line.

use crate::errors::ConfigError;
use crate::types::Configuration;
use crate::validation;
use std::path::Path;

/// Load and validate a configuration file.
///
/// Returns `ConfigError::Io` if the file cannot be read, `ConfigError::Parse`
/// if it is not valid TOML or does not match the expected shape, or a
/// validation error from [`validation::validate`].
pub fn load_file(path: &Path) -> Result<Configuration, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    load_str(&content, path)
}

fn load_str(content: &str, path: &Path) -> Result<Configuration, ConfigError> {
    let config: Configuration = toml::from_str(content).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    validation::validate(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, TlsRole};
    use std::path::PathBuf;

    #[test]
    fn loads_a_minimal_accepting_service() {
        let toml = r#"
[global]
debug = 6
foreground = true

[[service]]
name = "https"
direction = "accepting"
accept = "0.0.0.0:443"
connect = "127.0.0.1:8443"
cert = "cert.pem"
client = "server"
"#;
        let config = load_str(toml, Path::new("test.toml")).unwrap();
        assert_eq!(config.global.debug, 6);
        assert!(config.global.foreground);
        assert_eq!(config.services.len(), 1);
        let svc = &config.services[0];
        assert_eq!(svc.name, "https");
        assert_eq!(svc.direction, Direction::Accepting);
        assert_eq!(svc.client, TlsRole::Server);
        assert_eq!(svc.key_path(), PathBuf::from("cert.pem"));
    }

    #[test]
    fn key_defaults_to_cert_when_absent() {
        let toml = r#"
[[service]]
name = "https"
direction = "accepting"
accept = "0.0.0.0:443"
connect = "127.0.0.1:8443"
cert = "cert.pem"
key = "key.pem"
client = "server"
"#;
        let config = load_str(toml, Path::new("test.toml")).unwrap();
        assert_eq!(config.services[0].key_path(), Path::new("key.pem"));
    }

    #[test]
    fn invalid_toml_is_a_parse_error() {
        let result = load_str("not valid toml [[[", Path::new("test.toml"));
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn missing_accept_on_accepting_service_fails_validation() {
        let toml = r#"
[[service]]
name = "https"
direction = "accepting"
connect = "127.0.0.1:8443"
cert = "cert.pem"
client = "server"
"#;
        let result = load_str(toml, Path::new("test.toml"));
        assert!(matches!(result, Err(ConfigError::MissingField { .. })));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let result = load_file(Path::new("/nonexistent/tunneld.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn connect_only_service_loads() {
        let toml = r#"
[[service]]
name = "outbound"
direction = "connect_only"
connect = "127.0.0.1:8443"
cert = "cert.pem"
client = "client"
"#;
        let config = load_str(toml, Path::new("test.toml")).unwrap();
        assert_eq!(config.services[0].direction, Direction::ConnectOnly);
        assert!(!config.has_accepting_service());
    }
}
