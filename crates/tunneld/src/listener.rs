//! Listener set.
//!
//! For each accepting service: create a stream socket, apply the `accept`
//! role socket options, bind, listen with backlog 5, mark close-on-exec, and
//! switch to non-blocking so it can be handed to `tokio`. An accepting
//! service is instead handed a socket-activated descriptor when the process
//! was started by something that passed one down (`LISTEN_PID`/`LISTEN_FDS`),
//! skipping its own create/bind/listen entirely. Either way, the resulting
//! descriptor must land below the probed `max_fds`, or startup fails.

use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, FromRawFd};

use socket2::{Domain, Socket, Type};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::errors::TunnelError;
use crate::socket_options;
use tunnel_config::ServiceDefinition;

/// Reject a listener descriptor at or above the probed `max_fds`.
/// `max_fds == 0` means "unknown/unlimited", so no bound applies.
fn check_fd_bound(service: &str, fd: i32, max_fds: u64) -> Result<(), TunnelError> {
    if max_fds > 0 && fd as i64 >= max_fds as i64 {
        return Err(TunnelError::Startup {
            context: format!("service '{service}': listener descriptor {fd}"),
            message: format!("at or above the probed descriptor limit ({max_fds})"),
            code: -1,
        });
    }
    Ok(())
}

/// First inherited descriptor number under the systemd socket-activation
/// convention: descriptors 0-2 are stdio, activated sockets start at 3.
const SD_LISTEN_FDS_START: i32 = 3;

/// A bound, listening socket plus the service it serves. Exists only for
/// the lifetime of the process: destroyed at exit, never individually torn
/// down while the daemon runs.
#[derive(Debug)]
pub struct Listener {
    pub service: ServiceDefinition,
    pub socket: TcpListener,
}

/// Build the full listener set for every accepting service in `services`.
/// Descriptors passed down via `LISTEN_PID`/`LISTEN_FDS` are claimed first,
/// in service order; any accepting service left without an inherited
/// descriptor binds its own socket. Bind failure is fatal: the first
/// failure aborts startup and none of the already-built listeners are kept
/// around. A listener whose descriptor lands at or above `max_fds` also
/// fails startup (`max_fds == 0` means no bound is enforced).
pub fn build(services: &[ServiceDefinition], max_fds: u64) -> Result<Vec<Listener>, TunnelError> {
    let accepting: Vec<&ServiceDefinition> = services.iter().filter(|s| s.accept.is_some()).collect();
    let inherited = inherited_fds();

    accepting
        .iter()
        .enumerate()
        .map(|(index, service)| match inherited.get(index) {
            Some(&fd) => adopt_inherited(service, fd, max_fds),
            None => bind_one(service, max_fds),
        })
        .collect()
}

/// Read `LISTEN_PID`/`LISTEN_FDS` and return the inherited descriptor
/// numbers, or an empty list if socket activation was not used for this
/// process. `LISTEN_PID` must name the current process: a daemon that forks
/// (as this one does unless run in the foreground) would otherwise see its
/// parent's now-stale activation environment.
fn inherited_fds() -> Vec<i32> {
    let Ok(listen_pid) = std::env::var("LISTEN_PID") else {
        return Vec::new();
    };
    let Ok(listen_fds) = std::env::var("LISTEN_FDS") else {
        return Vec::new();
    };
    let Ok(listen_pid) = listen_pid.parse::<u32>() else {
        return Vec::new();
    };
    if listen_pid != std::process::id() {
        return Vec::new();
    }
    let Ok(count) = listen_fds.parse::<i32>() else {
        return Vec::new();
    };
    if count <= 0 {
        return Vec::new();
    }
    info!(event = "listener.socket_activation", count);
    (0..count).map(|i| SD_LISTEN_FDS_START + i).collect()
}

/// Adopt an inherited descriptor as this service's listener, skipping
/// create/bind/listen but still marking it non-blocking for `tokio`.
fn adopt_inherited(service: &ServiceDefinition, fd: i32, max_fds: u64) -> Result<Listener, TunnelError> {
    check_fd_bound(&service.name, fd, max_fds)?;
    // SAFETY: `fd` was handed down by the process that exec'd us specifically
    // for socket activation; it is a valid, open, unshared descriptor.
    let std_listener = unsafe { std::net::TcpListener::from_raw_fd(fd) };
    std_listener
        .set_nonblocking(true)
        .map_err(|e| TunnelError::startup(format!("service '{}': set nonblocking", service.name), &e))?;
    let listener = TcpListener::from_std(std_listener)
        .map_err(|e| TunnelError::startup(format!("service '{}': adopt inherited descriptor", service.name), &e))?;
    info!(event = "listener.inherited", service = %service.name, fd);
    Ok(Listener {
        service: service.clone(),
        socket: listener,
    })
}

fn bind_one(service: &ServiceDefinition, max_fds: u64) -> Result<Listener, TunnelError> {
    let accept = service.accept.as_deref().expect("filtered to accepting services");
    let addr: SocketAddr = accept.parse().map_err(|_| TunnelError::Startup {
        context: format!("service '{}': parse accept address", service.name),
        message: format!("'{accept}' is not a valid address"),
        code: -1,
    })?;

    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, None)
        .map_err(|e| TunnelError::startup(format!("service '{}': socket", service.name), &e))?;

    socket_options::apply_all(&socket, service.socket.accept.iter()).map_err(|e| {
        TunnelError::startup(format!("service '{}': apply accept socket options", service.name), &e)
    })?;

    socket
        .bind(&addr.into())
        .map_err(|e| {
            error!(event = "listener.bind_failed", service = %service.name, address = %addr);
            TunnelError::startup(format!("service '{}': bind {addr}", service.name), &e)
        })?;
    socket
        .listen(5)
        .map_err(|e| TunnelError::startup(format!("service '{}': listen", service.name), &e))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| TunnelError::startup(format!("service '{}': set nonblocking", service.name), &e))?;
    socket
        .set_cloexec(true)
        .map_err(|e| TunnelError::startup(format!("service '{}': set close-on-exec", service.name), &e))?;

    check_fd_bound(&service.name, socket.as_raw_fd(), max_fds)?;

    let std_listener: std::net::TcpListener = socket.into();
    let listener = TcpListener::from_std(std_listener)
        .map_err(|e| TunnelError::startup(format!("service '{}': adopt into runtime", service.name), &e))?;

    Ok(Listener {
        service: service.clone(),
        socket: listener,
    })
}
