//! # tunnel-config
//!
//! Service and global configuration types, TOML loading, and validation for
//! the tunnel daemon. The core (`tunneld`) never parses configuration
//! itself; it consumes the `Configuration` value this crate produces and
//! treats it as immutable for the remainder of the process lifetime.

mod loading;
mod validation;

pub mod errors;
pub mod types;

pub use errors::ConfigError;
pub use types::{
    Configuration, Direction, GlobalOptions, OptionValue, ServiceDefinition, SocketOptionOverride,
    TlsRole,
};

use std::path::Path;

/// Load and validate a configuration file from disk.
pub fn load_file(path: &Path) -> Result<Configuration, ConfigError> {
    loading::load_file(path)
}
