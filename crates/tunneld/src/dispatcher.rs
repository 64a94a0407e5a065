//! Accept dispatcher.
//!
//! Implements the six-step accept sequence and the accept-error
//! classification table, grounded on `stunnel.c`'s `accept_connection()`
//! (EINTR retried in place, resource-exhaustion errors sleep ~1s before the
//! next attempt, everything else is logged and returned to the caller).

use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::session::ClientSession;
use crate::worker::WorkerSupervisor;
use tunnel_config::ServiceDefinition;

/// Outcome of a single `accept()` attempt, classified by how the errno
/// space groups into retry / back-off / fatal.
enum AcceptOutcome {
    Retry,
    BackOff,
    Fatal(std::io::Error),
}

fn classify(service: &str, err: std::io::Error) -> AcceptOutcome {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::Interrupted => AcceptOutcome::Retry,
        ErrorKind::WouldBlock => AcceptOutcome::Retry,
        _ => match err.raw_os_error() {
            Some(code)
                if code == libc::EMFILE
                    || code == libc::ENFILE
                    || code == libc::ENOBUFS
                    || code == libc::ENOMEM =>
            {
                warn!(event = "dispatcher.accept_resource_exhausted", service = %service, error = %err);
                AcceptOutcome::BackOff
            }
            _ => AcceptOutcome::Fatal(err),
        },
    }
}

/// Run one accept loop iteration for `listener`. Returns `Ok(None)` when the
/// service is at capacity or transiently out of resources (already handled
/// internally); returns `Ok(Some(session))` once a session has been
/// admitted and handed to `supervisor`; returns `Err` only for a fatal,
/// non-recoverable accept failure that the caller should log and move past.
/// `max_fds` is the probed descriptor ceiling (`0` means no bound).
pub async fn accept_one(
    listener: &TcpListener,
    service: &ServiceDefinition,
    supervisor: &WorkerSupervisor,
    max_fds: u64,
) -> std::io::Result<()> {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok((stream, peer)) => (stream, peer),
            Err(e) => match classify(&service.name, e) {
                AcceptOutcome::Retry => continue,
                AcceptOutcome::BackOff => {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
                AcceptOutcome::Fatal(e) => return Err(e),
            },
        };

        info!(event = "dispatcher.accepted", service = %service.name, peer = %peer);

        // Step 2: admission control. Reject immediately without touching
        // num_clients when the service is already at its cap.
        if !supervisor.counter().try_admit() {
            warn!(event = "dispatcher.rejected_at_capacity", service = %service.name, peer = %peer, max = supervisor.counter().max());
            drop(stream);
            continue;
        }

        // Step 3: verify the accepted descriptor itself fits below max_fds.
        // A connection admitted by the client-count cap can still land on a
        // descriptor number at or above the resource ceiling if other fds
        // (listeners, log files, inherited sockets) have consumed the low
        // range; close it, release the slot, and return without processing
        // it further — the caller's own loop will accept the next one.
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let fd = stream.as_raw_fd();
            if max_fds > 0 && fd as i64 >= max_fds as i64 {
                warn!(event = "dispatcher.rejected_fd_limit", service = %service.name, peer = %peer, fd, max_fds);
                drop(stream);
                supervisor.counter().release();
                return Ok(());
            }
        }

        // Step 4: mark non-blocking / close-on-exec. `tokio::net::TcpStream`
        // accepted from a non-blocking listener is already non-blocking;
        // close-on-exec is set explicitly since accept4's CLOEXEC flag is
        // not something the std/tokio layer guarantees portably.
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let fd = stream.as_raw_fd();
            unsafe {
                let flags = libc::fcntl(fd, libc::F_GETFD);
                if flags >= 0 {
                    libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
                }
            }
        }

        // Step 5: allocate the session and hand it to the worker supervisor.
        let session = ClientSession::accepted(service.clone(), stream, peer);
        if supervisor.spawn(session).is_err() {
            error!(event = "dispatcher.spawn_failed", service = %service.name, peer = %peer);
            supervisor.counter().release();
        }

        return Ok(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::EchoSessionHandler;
    use crate::worker::ClientCounter;
    use std::sync::Arc;
    use tokio::net::TcpStream;
    use tunnel_config::{Direction, TlsRole};

    fn service() -> ServiceDefinition {
        ServiceDefinition {
            name: "test".to_string(),
            direction: Direction::Accepting,
            accept: Some("127.0.0.1:0".to_string()),
            connect: None,
            exec: None,
            cert: "cert.pem".into(),
            key: None,
            client: TlsRole::Server,
            socket: Default::default(),
        }
    }

    #[tokio::test]
    async fn accepts_and_admits_a_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let counter = Arc::new(ClientCounter::new(5));
        let supervisor = WorkerSupervisor::new(counter.clone(), Arc::new(EchoSessionHandler));

        let client = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        accept_one(&listener, &service(), &supervisor, 0).await.unwrap();
        let _client = client.await.unwrap();

        assert_eq!(counter.current(), 1);
    }

    #[tokio::test]
    async fn rejects_without_incrementing_when_at_capacity() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let counter = Arc::new(ClientCounter::new(1));
        assert!(counter.try_admit());
        let supervisor = WorkerSupervisor::new(counter.clone(), Arc::new(EchoSessionHandler));

        let client = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        accept_one(&listener, &service(), &supervisor, 0).await.unwrap();
        let _client = client.await.unwrap();

        assert_eq!(counter.current(), 1);
    }

    #[tokio::test]
    async fn zero_max_fds_admits_regardless_of_descriptor_number() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let counter = Arc::new(ClientCounter::new(5));
        let supervisor = WorkerSupervisor::new(counter.clone(), Arc::new(EchoSessionHandler));

        let client = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        accept_one(&listener, &service(), &supervisor, 0).await.unwrap();
        let _client = client.await.unwrap();

        assert_eq!(counter.current(), 1);
    }

    #[tokio::test]
    async fn descriptor_at_or_above_max_fds_is_rejected_and_releases_the_slot() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let counter = Arc::new(ClientCounter::new(5));
        let supervisor = WorkerSupervisor::new(counter.clone(), Arc::new(EchoSessionHandler));

        // Every open fd in a running test process is above 1, so max_fds=1
        // always trips the bound on whatever descriptor gets accepted.
        let client = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        accept_one(&listener, &service(), &supervisor, 1).await.unwrap();
        let _client = client.await.unwrap();

        assert_eq!(counter.current(), 0);
    }
}
