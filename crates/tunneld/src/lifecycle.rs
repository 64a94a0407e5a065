//! Lifecycle controller.
//!
//! Owns the initialize -> execute -> shutdown sequence: logging, resource
//! probing, listener construction, privilege drop, daemonization, the
//! readiness-multiplexer main loop, and orderly shutdown on a terminating
//! signal. Grounded on `stunnel.c`'s `main()`/`daemon_loop()` for ordering
//! and on the async structure used throughout this crate: build resources
//! up front, then `tokio::select!`/spawn over everything that can produce
//! work.

use std::sync::Arc;

use tracing::{error, info};

use crate::dispatcher;
use crate::errors::TunnelError;
use crate::listener::{self, Listener};
use crate::logging;
use crate::pid;
use crate::privilege;
use crate::resources::ResourceLimits;
use crate::session::{ClientSession, EchoSessionHandler, SessionHandler};
use crate::signals::SignalBridge;
use crate::tls::{RustlsChannelFactory, SecureChannelFactory};
use crate::worker::{ClientCounter, WorkerSupervisor};
use tunnel_config::{Configuration, Direction};

/// Run the daemon to completion: returns the process exit code (0 clean
/// exit, 1 startup/configuration failure, 3 signal-driven shutdown).
pub async fn run(config: Configuration) -> i32 {
    match run_inner(config).await {
        Ok(()) => 0,
        Err(e) => {
            error!(event = "lifecycle.fatal", error = %e);
            e.exit_code()
        }
    }
}

async fn run_inner(config: Configuration) -> Result<(), TunnelError> {
    let destination = logging::resolve_destination(&config.global);
    logging::init_logging(destination, config.global.debug)
        .map_err(|e| TunnelError::startup("initialize logging", &e))?;
    info!(event = "lifecycle.starting", pid = std::process::id());

    let factory: Arc<dyn SecureChannelFactory> = Arc::new(RustlsChannelFactory);
    let handler: Arc<dyn SessionHandler> = Arc::new(EchoSessionHandler);

    if !config.has_accepting_service() && !config.services.is_empty() {
        return run_inetd(config, factory, handler).await;
    }

    let limits = ResourceLimits::probe();

    // Listeners must be bound before daemonizing and before privilege drop,
    // since binding low ports may need privileges the process sheds later.
    let listeners = listener::build(&config.services, limits.max_fds)?;

    if !config.global.foreground {
        privilege::daemonize()?;
    }
    privilege::drop_privileges(&config.global)?;

    let counter = Arc::new(ClientCounter::new(limits.max_clients));
    let supervisor = Arc::new(WorkerSupervisor::new(counter, handler));

    // Pre-warm TLS server configs so a misconfigured certificate fails at
    // startup rather than on the first connection.
    for listener in &listeners {
        factory.server_config(&listener.service)?;
    }

    spawn_connect_only_services(&config, &supervisor);

    let mut bridge = SignalBridge::install().map_err(|e| TunnelError::startup("install signal bridge", &e))?;

    let result = main_loop(listeners, &supervisor, &mut bridge, limits.max_fds).await;

    if let Some(path) = &config.global.pid {
        pid::remove(path);
    }
    info!(event = "lifecycle.stopped");
    result
}

/// Inetd mode: no service in the configuration accepts inbound connections
/// itself, so a single session runs directly on the process's standard
/// streams, as if an external super-server had already done the accepting.
async fn run_inetd(
    config: Configuration,
    factory: Arc<dyn SecureChannelFactory>,
    handler: Arc<dyn SessionHandler>,
) -> Result<(), TunnelError> {
    let service = config
        .services
        .first()
        .expect("run_inetd is only called with at least one service")
        .clone();

    privilege::drop_privileges(&config.global)?;
    factory.server_config(&service)?;

    info!(event = "lifecycle.inetd_session_started", service = %service.name);
    let session = ClientSession::stdio(service);
    handler
        .handle(session)
        .await
        .map_err(|e| TunnelError::startup("inetd session", &e))?;
    info!(event = "lifecycle.stopped");
    Ok(())
}

/// The readiness multiplexer. Each listener's accept loop runs as its own
/// task so a connection on one service never blocks another's accept
/// queue; the control task only waits on the signal bridge, then aborts
/// every listener task on the way out. `SIGHUP` is treated like `SIGTERM`
/// as a minimally conformant allowance: a full configuration reload is out
/// of scope.
async fn main_loop(
    listeners: Vec<Listener>,
    supervisor: &Arc<WorkerSupervisor>,
    bridge: &mut SignalBridge,
    max_fds: u64,
) -> Result<(), TunnelError> {
    let tasks: Vec<_> = listeners
        .into_iter()
        .map(|listener| {
            let supervisor = supervisor.clone();
            tokio::spawn(async move {
                loop {
                    if let Err(e) =
                        dispatcher::accept_one(&listener.socket, &listener.service, &supervisor, max_fds).await
                    {
                        error!(event = "lifecycle.accept_failed", service = %listener.service.name, error = %e);
                    }
                }
            })
        })
        .collect();

    let event = bridge.recv().await;
    info!(
        event = "lifecycle.signal_received",
        signal = event.number(),
        "received signal {}; terminating",
        event.number()
    );
    for task in &tasks {
        task.abort();
    }
    Err(TunnelError::SignalTermination)
}

/// Connect-only services have no accept loop: each one's single session
/// starts immediately at lifecycle startup, with no accepted descriptor.
fn spawn_connect_only_services(config: &Configuration, supervisor: &Arc<WorkerSupervisor>) {
    for service in &config.services {
        if service.direction != Direction::ConnectOnly {
            continue;
        }
        if !supervisor.counter().try_admit() {
            continue;
        }
        let session = ClientSession::connect_only(service.clone());
        if supervisor.spawn(session).is_err() {
            supervisor.counter().release();
        }
    }
}
