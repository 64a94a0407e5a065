//! Resource prober.
//!
//! Runs once, before binding, and probes the maximum number of open file
//! descriptors via the POSIX resource-limit interface. The derived
//! `max_clients` governs admission control in the accept dispatcher.

use nix::sys::resource::{Resource, getrlimit};
use tracing::info;

/// `max_fds` (0 = unknown/unlimited) and the derived `max_clients`
/// (0 = no limit), both immutable once probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    pub max_fds: u64,
    pub max_clients: u64,
}

impl ResourceLimits {
    /// Query `RLIMIT_NOFILE` and derive `max_clients` from it.
    ///
    /// Falls back to `max_fds = 0` ("unknown") if the limit cannot be read,
    /// or if the kernel reports an unlimited (`RLIM_INFINITY`) soft limit.
    pub fn probe() -> Self {
        let max_fds = match getrlimit(Resource::RLIMIT_NOFILE) {
            Ok((soft, _hard)) if soft != libc::RLIM_INFINITY as u64 => soft,
            _ => 0,
        };
        let limits = Self::from_max_fds(max_fds);
        info!(
            event = "resources.probed",
            max_fds = limits.max_fds,
            max_clients = limits.max_clients
        );
        limits
    }

    /// Build limits from a known `max_fds`, applying the clamp and
    /// derivation formula directly (used by `probe` and by tests, and by
    /// inetd mode which sets a backend-default `max_fds`).
    pub fn from_max_fds(max_fds: u64) -> Self {
        if max_fds == 0 {
            return Self {
                max_fds: 0,
                max_clients: 0,
            };
        }
        let max_fds = max_fds.max(16);
        let max_clients = derive_max_clients(max_fds);
        Self {
            max_fds,
            max_clients,
        }
    }
}

/// `max_clients = max_fds >= 256 ? max_fds * 125/256 : (max_fds - 6)/2`.
/// `max_fds` must already be clamped to at least 16.
fn derive_max_clients(max_fds: u64) -> u64 {
    if max_fds >= 256 {
        max_fds * 125 / 256
    } else {
        (max_fds - 6) / 2
    }
}
