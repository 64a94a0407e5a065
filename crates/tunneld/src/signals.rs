//! Signal bridge.
//!
//! Converts asynchronous process signals into an ordered [`SignalEvent`]
//! stream the readiness multiplexer can wait on. `tokio::signal::unix`
//! already performs the async-signal-safe self-pipe hand-off internally, so
//! this module is a thin, typed wrapper around it rather than a hand-rolled
//! pipe — the self-pipe discipline a POSIX daemon needs for signal-safety is
//! exactly what the runtime's signal driver already implements.

/// A posted process signal, produced in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    Term,
    Quit,
    Interrupt,
    Hangup,
}

impl SignalEvent {
    /// The POSIX signal number, used for the "Received signal N" log record.
    pub fn number(&self) -> i32 {
        match self {
            SignalEvent::Hangup => libc::SIGHUP,
            SignalEvent::Interrupt => libc::SIGINT,
            SignalEvent::Quit => libc::SIGQUIT,
            SignalEvent::Term => libc::SIGTERM,
        }
    }
}

#[cfg(unix)]
mod unix {
    use super::SignalEvent;
    use tokio::signal::unix::{SignalKind, signal};

    /// Readable endpoint for process signals of interest. `SIGPIPE` is
    /// ignored at construction time; `SIGTERM`/`SIGQUIT`/`SIGINT`/`SIGHUP`
    /// each produce a [`SignalEvent`].
    pub struct SignalBridge {
        term: tokio::signal::unix::Signal,
        quit: tokio::signal::unix::Signal,
        interrupt: tokio::signal::unix::Signal,
        hangup: tokio::signal::unix::Signal,
    }

    impl SignalBridge {
        pub fn install() -> std::io::Result<Self> {
            // SAFETY-equivalent: nix::sys::signal::signal with SigIgn never
            // registers a handler that does real work, so it remains
            // async-signal-safe.
            unsafe {
                nix::sys::signal::signal(nix::sys::signal::Signal::SIGPIPE, nix::sys::signal::SigHandler::SigIgn)
                    .map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
            }
            Ok(Self {
                term: signal(SignalKind::terminate())?,
                quit: signal(SignalKind::quit())?,
                interrupt: signal(SignalKind::interrupt())?,
                hangup: signal(SignalKind::hangup())?,
            })
        }

        /// Wait for the next signal event. Readiness here is level-triggered
        /// in the sense that a coalesced multi-signal burst still yields one
        /// event per call, matching the bridge's "drain one tag" contract.
        pub async fn recv(&mut self) -> SignalEvent {
            tokio::select! {
                _ = self.term.recv() => SignalEvent::Term,
                _ = self.quit.recv() => SignalEvent::Quit,
                _ = self.interrupt.recv() => SignalEvent::Interrupt,
                _ = self.hangup.recv() => SignalEvent::Hangup,
            }
        }
    }
}

#[cfg(not(unix))]
mod noop {
    use super::SignalEvent;
    use std::future::pending;

    /// On platforms without POSIX signals, the bridge degrades to a
    /// never-readable stub; termination becomes cooperative via an
    /// external control path this crate does not define.
    pub struct SignalBridge;

    impl SignalBridge {
        pub fn install() -> std::io::Result<Self> {
            Ok(Self)
        }

        pub async fn recv(&mut self) -> SignalEvent {
            pending().await
        }
    }
}

#[cfg(unix)]
pub use unix::SignalBridge;
#[cfg(not(unix))]
pub use noop::SignalBridge;
