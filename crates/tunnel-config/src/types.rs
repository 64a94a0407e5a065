//! Service and global configuration types.
//!
//! These are the values `tunneld`'s lifecycle controller treats as an
//! already-parsed, already-validated, immutable snapshot. Nothing in this
//! module is mutated once [`crate::loading::load_file`] returns
//! successfully.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Whether a service binds a local address and awaits inbound connections,
/// or initiates its own outbound connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Accepting,
    ConnectOnly,
}

/// The service's role in the TLS handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsRole {
    Client,
    Server,
}

/// A single socket-option value, tagged by the wire type the option table
/// in `tunneld::socket_options` expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Int(i64),
    Bool(bool),
    /// `(on, seconds)` — `SO_LINGER`-shaped options.
    Linger(bool, i32),
    String(String),
}

/// Per-role socket-option overrides for one service, keyed by option name
/// (e.g. `"SO_REUSEADDR"`, `"TCP_NODELAY"`). Looked up against
/// `tunneld::socket_options::TABLE` when applying.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SocketOptionOverride {
    #[serde(default)]
    pub accept: HashMap<String, OptionValue>,
    #[serde(default)]
    pub local: HashMap<String, OptionValue>,
    #[serde(default)]
    pub remote: HashMap<String, OptionValue>,
}

/// One configured tunnel endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub name: String,
    pub direction: Direction,
    /// Required iff `direction == Accepting`.
    #[serde(default)]
    pub accept: Option<String>,
    /// The remote endpoint the worker connects to. Mutually exclusive with
    /// `exec`, though the parser does not enforce that — it is a worker
    /// concern, out of this core's scope.
    #[serde(default)]
    pub connect: Option<String>,
    /// A local program to run as the plaintext side instead of `connect`.
    #[serde(default)]
    pub exec: Option<String>,
    pub cert: PathBuf,
    /// Defaults to `cert` when absent.
    #[serde(default)]
    pub key: Option<PathBuf>,
    pub client: TlsRole,
    #[serde(default)]
    pub socket: SocketOptionOverride,
}

impl ServiceDefinition {
    pub fn key_path(&self) -> &std::path::Path {
        self.key.as_deref().unwrap_or(&self.cert)
    }
}

/// Process-wide options independent of any single service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalOptions {
    #[serde(default)]
    pub debug: u8,
    #[serde(default)]
    pub foreground: bool,
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub syslog_facility: Option<String>,
    #[serde(default)]
    pub chroot: Option<PathBuf>,
    #[serde(default)]
    pub setuid: Option<String>,
    #[serde(default)]
    pub setgid: Option<String>,
    #[serde(default)]
    pub pid: Option<PathBuf>,
}

impl Default for GlobalOptions {
    fn default() -> Self {
        Self {
            debug: 5,
            foreground: false,
            output: None,
            syslog_facility: None,
            chroot: None,
            setuid: None,
            setgid: None,
            pid: None,
        }
    }
}

/// A fully loaded, validated configuration snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub global: GlobalOptions,
    #[serde(rename = "service", default)]
    pub services: Vec<ServiceDefinition>,
}

impl Configuration {
    pub fn has_accepting_service(&self) -> bool {
        self.services
            .iter()
            .any(|s| s.direction == Direction::Accepting)
    }
}
