//! Error taxonomy and system-error translation.
//!
//! All error reports funnel through [`TunnelError`] and
//! [`describe_system_error`], which formats `"<context>: <message> (<code>)"`
//! with `<message>` resolved through a platform translation table. Windows
//! socket error codes are looked up in [`WINSOCK_ERRORS`], a static table
//! rather than inline control flow, so the set of known codes stays data
//! instead of buried in a long match arm.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("configuration error: {0}")]
    Config(#[from] tunnel_config::ConfigError),

    #[error("{context}: {message} ({code})")]
    Startup {
        context: String,
        message: String,
        code: i32,
    },

    #[error("terminated by signal")]
    SignalTermination,
}

impl TunnelError {
    /// The process exit code this error maps to: 1 for startup or
    /// configuration failure, 3 for signal-initiated termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            TunnelError::Config(_) | TunnelError::Startup { .. } => 1,
            TunnelError::SignalTermination => 3,
        }
    }

    /// Build a `Startup` error from an I/O failure, resolving the OS error
    /// code through [`describe_system_error`].
    pub fn startup(context: impl Into<String>, source: &io::Error) -> Self {
        let code = source.raw_os_error().unwrap_or(-1);
        TunnelError::Startup {
            context: context.into(),
            message: describe_system_error(code),
            code,
        }
    }
}

/// `(winsock error code, mnemonic)`, sorted by code for binary search.
/// Grounded on `stunnel.c`'s `my_strerror()` switch table (10004-11004),
/// translated into data instead of a long match expression.
const WINSOCK_ERRORS: &[(i32, &str)] = &[
    (10004, "Interrupted system call"),
    (10009, "Bad file number"),
    (10013, "Permission denied"),
    (10014, "Bad address"),
    (10022, "Invalid argument"),
    (10024, "Too many open files"),
    (10035, "Resource temporarily unavailable"),
    (10036, "Operation now in progress"),
    (10048, "Address already in use"),
    (10049, "Cannot assign requested address"),
    (10053, "Software caused connection abort"),
    (10054, "Connection reset by peer"),
    (10055, "No buffer space available"),
    (10057, "Socket is not connected"),
    (10060, "Connection timed out"),
    (10061, "Connection refused"),
    (11001, "Host not found"),
    (11004, "Valid name, no data record of requested type"),
];

/// Resolve a numeric system error code to a human-readable message.
///
/// Codes in the Windows socket-error range are resolved through
/// [`WINSOCK_ERRORS`]; everything else falls through to the platform's
/// generic strerror-equivalent via [`std::io::Error`].
pub fn describe_system_error(code: i32) -> String {
    if let Ok(idx) = WINSOCK_ERRORS.binary_search_by_key(&code, |(c, _)| *c) {
        return WINSOCK_ERRORS[idx].1.to_string();
    }
    io::Error::from_raw_os_error(code).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_winsock_code_resolves_to_mnemonic() {
        assert_eq!(describe_system_error(10061), "Connection refused");
        assert_eq!(describe_system_error(10048), "Address already in use");
    }

    #[test]
    fn unknown_code_falls_through_to_generic_strerror() {
        let message = describe_system_error(libc::EMFILE);
        assert!(!message.is_empty());
    }

    #[test]
    fn startup_error_formats_as_context_message_code() {
        let source = io::Error::from_raw_os_error(libc::EADDRINUSE);
        let err = TunnelError::startup("bind 0.0.0.0:443", &source);
        let rendered = err.to_string();
        assert!(rendered.starts_with("bind 0.0.0.0:443: "));
        assert!(rendered.ends_with(&format!("({})", libc::EADDRINUSE)));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn signal_termination_exits_with_code_3() {
        assert_eq!(TunnelError::SignalTermination.exit_code(), 3);
    }

    #[test]
    fn winsock_table_is_sorted_for_binary_search() {
        let mut codes: Vec<i32> = WINSOCK_ERRORS.iter().map(|(c, _)| *c).collect();
        let sorted = {
            codes.sort_unstable();
            codes
        };
        assert_eq!(
            WINSOCK_ERRORS.iter().map(|(c, _)| *c).collect::<Vec<_>>(),
            sorted
        );
    }
}
