//! Secure channel factory: the TLS record layer itself is treated as an
//! external collaborator behind a trait boundary.
//!
//! `SecureChannelFactory` is the abstract collaborator; `RustlsChannelFactory`
//! is the concrete reference implementation, adapted from `kild-daemon`'s
//! `load_or_generate_cert`/`build_server_config` pair: load
//! an existing PEM cert+key from the service's configured paths, or generate
//! a self-signed pair on first use, then build a `rustls::ServerConfig` with
//! an explicit crypto provider.

use std::fs::{self, File};
use std::io::BufReader;
use std::sync::Arc;

use rcgen::{CertifiedKey, generate_simple_self_signed};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tracing::info;

use crate::errors::TunnelError;
use tunnel_config::ServiceDefinition;

/// Produces a TLS server configuration for a service. Kept behind a trait so
/// the rest of the daemon depends only on "a way to get a `ServerConfig}`",
/// not on `rustls` or `rcgen` directly.
pub trait SecureChannelFactory: Send + Sync {
    fn server_config(&self, service: &ServiceDefinition) -> Result<Arc<rustls::ServerConfig>, TunnelError>;
}

/// Reference implementation backed by `rustls`, `rustls-pemfile` and `rcgen`.
pub struct RustlsChannelFactory;

impl SecureChannelFactory for RustlsChannelFactory {
    fn server_config(&self, service: &ServiceDefinition) -> Result<Arc<rustls::ServerConfig>, TunnelError> {
        let key_path = service.key_path();
        let (certs, key) = load_or_generate_cert(&service.cert, &key_path, &service.name)?;
        build_server_config(certs, key, &service.name)
    }
}

/// Load an existing PEM cert+key pair from `cert_path`/`key_path`, or
/// generate a self-signed pair for `localhost` and write both files.
fn load_or_generate_cert(
    cert_path: &std::path::Path,
    key_path: &std::path::Path,
    service: &str,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), TunnelError> {
    if cert_path.exists() && key_path.exists() {
        let certs = rustls_pemfile::certs(&mut BufReader::new(
            File::open(cert_path).map_err(|e| TunnelError::startup(format!("service '{service}': open cert"), &e))?,
        ))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TunnelError::startup(format!("service '{service}': parse cert"), &e))?;

        let key = rustls_pemfile::private_key(&mut BufReader::new(
            File::open(key_path).map_err(|e| TunnelError::startup(format!("service '{service}': open key"), &e))?,
        ))
        .map_err(|e| TunnelError::startup(format!("service '{service}': parse key"), &e))?
        .ok_or_else(|| TunnelError::Startup {
            context: format!("service '{service}': load key"),
            message: "no private key found in key file".to_string(),
            code: -1,
        })?;

        return Ok((certs, key));
    }

    info!(event = "tls.cert_generating", service = %service, cert_path = %cert_path.display());

    let CertifiedKey { cert, signing_key } = generate_simple_self_signed(vec!["localhost".to_string()])
        .map_err(|e| TunnelError::Startup {
            context: format!("service '{service}': generate self-signed cert"),
            message: e.to_string(),
            code: -1,
        })?;

    if let Some(parent) = cert_path.parent() {
        fs::create_dir_all(parent).map_err(|e| TunnelError::startup(format!("service '{service}': create cert dir"), &e))?;
    }
    // A service with no separate `key` path uses one combined PEM file
    // (cert then key), matching how stunnel treats a bare `cert =` line.
    if cert_path == key_path {
        let combined = format!("{}{}", cert.pem(), signing_key.serialize_pem());
        fs::write(cert_path, combined).map_err(|e| TunnelError::startup(format!("service '{service}': write combined cert+key"), &e))?;
    } else {
        fs::write(cert_path, cert.pem()).map_err(|e| TunnelError::startup(format!("service '{service}': write cert"), &e))?;
        fs::write(key_path, signing_key.serialize_pem()).map_err(|e| TunnelError::startup(format!("service '{service}': write key"), &e))?;
    }

    info!(event = "tls.cert_generated", service = %service, cert_path = %cert_path.display());

    let cert_der = cert.der().clone();
    let key_der = PrivateKeyDer::from(PrivatePkcs8KeyDer::from(signing_key.serialize_der()));
    Ok((vec![cert_der], key_der))
}

fn build_server_config(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    service: &str,
) -> Result<Arc<rustls::ServerConfig>, TunnelError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| TunnelError::Startup {
            context: format!("service '{service}': select TLS protocol versions"),
            message: e.to_string(),
            code: -1,
        })?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| TunnelError::Startup {
            context: format!("service '{service}': install certificate"),
            message: e.to_string(),
            code: -1,
        })?;
    Ok(Arc::new(config))
}
