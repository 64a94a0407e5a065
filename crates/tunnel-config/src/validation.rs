//! Configuration validation logic.
//!
//! Per-field rules for the "configuration error" class: missing required
//! field, bad option value, relative PID path. All of these are
//! parser-time failures the core never has to handle itself.

use crate::errors::ConfigError;
use crate::types::{Configuration, Direction, ServiceDefinition};
use std::collections::HashSet;

pub fn validate(config: &Configuration) -> Result<(), ConfigError> {
    if config.global.debug > 7 {
        return Err(ConfigError::InvalidService {
            name: "<global>".to_string(),
            message: format!("debug level {} out of range 0-7", config.global.debug),
        });
    }

    if let Some(pid) = &config.global.pid
        && !pid.is_absolute()
    {
        return Err(ConfigError::InvalidService {
            name: "<global>".to_string(),
            message: format!(
                "pid path '{}' must be absolute: daemonization changes the meaning of relative paths",
                pid.display()
            ),
        });
    }

    let mut seen = HashSet::new();
    for service in &config.services {
        if !seen.insert(service.name.clone()) {
            return Err(ConfigError::InvalidService {
                name: service.name.clone(),
                message: "duplicate service name".to_string(),
            });
        }
        validate_service(service)?;
    }

    Ok(())
}

fn validate_service(service: &ServiceDefinition) -> Result<(), ConfigError> {
    match service.direction {
        Direction::Accepting => {
            if service.accept.is_none() {
                return Err(ConfigError::MissingField {
                    service: service.name.clone(),
                    field: "accept",
                });
            }
        }
        Direction::ConnectOnly => {
            if service.accept.is_some() {
                return Err(ConfigError::InvalidService {
                    name: service.name.clone(),
                    message: "connect-only services must not set 'accept'".to_string(),
                });
            }
        }
    }

    if service.connect.is_none() && service.exec.is_none() {
        return Err(ConfigError::InvalidService {
            name: service.name.clone(),
            message: "service must set either 'connect' or 'exec'".to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GlobalOptions, TlsRole};
    use std::path::PathBuf;

    fn service(name: &str, direction: Direction, accept: Option<&str>) -> ServiceDefinition {
        ServiceDefinition {
            name: name.to_string(),
            direction,
            accept: accept.map(str::to_string),
            connect: Some("127.0.0.1:9000".to_string()),
            exec: None,
            cert: PathBuf::from("cert.pem"),
            key: None,
            client: TlsRole::Server,
            socket: Default::default(),
        }
    }

    #[test]
    fn accepting_service_without_accept_is_rejected() {
        let svc = service("https", Direction::Accepting, None);
        let err = validate_service(&svc).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingField { field: "accept", .. }
        ));
    }

    #[test]
    fn connect_only_service_with_accept_is_rejected() {
        let svc = service("outbound", Direction::ConnectOnly, Some("0.0.0.0:443"));
        assert!(validate_service(&svc).is_err());
    }

    #[test]
    fn service_without_connect_or_exec_is_rejected() {
        let mut svc = service("https", Direction::Accepting, Some("0.0.0.0:443"));
        svc.connect = None;
        assert!(validate_service(&svc).is_err());
    }

    #[test]
    fn valid_accepting_service_passes() {
        let svc = service("https", Direction::Accepting, Some("0.0.0.0:443"));
        assert!(validate_service(&svc).is_ok());
    }

    #[test]
    fn relative_pid_path_is_rejected() {
        let config = Configuration {
            global: GlobalOptions {
                pid: Some(PathBuf::from("tunneld.pid")),
                ..Default::default()
            },
            services: vec![],
        };
        let err = validate(&config).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidService { .. }));
    }

    #[test]
    fn absolute_pid_path_is_accepted() {
        let config = Configuration {
            global: GlobalOptions {
                pid: Some(PathBuf::from("/var/run/tunneld.pid")),
                ..Default::default()
            },
            services: vec![],
        };
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn duplicate_service_names_are_rejected() {
        let config = Configuration {
            global: GlobalOptions::default(),
            services: vec![
                service("https", Direction::Accepting, Some("0.0.0.0:443")),
                service("https", Direction::Accepting, Some("0.0.0.0:8443")),
            ],
        };
        assert!(validate(&config).is_err());
    }

    #[test]
    fn debug_level_out_of_range_is_rejected() {
        let config = Configuration {
            global: GlobalOptions {
                debug: 9,
                ..Default::default()
            },
            services: vec![],
        };
        assert!(validate(&config).is_err());
    }
}
