//! Client session and the session-handler boundary: the per-connection
//! byte-shuffling worker loop is treated as an external collaborator.
//!
//! `SessionHandler` is the trait the worker supervisor spawns against;
//! `EchoSessionHandler` is the minimal reference implementation used by
//! tests and as a connectivity smoke test ahead of a real TLS-relaying
//! handler.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use tunnel_config::ServiceDefinition;

/// The local half of a session's plumbing: an accepted socket, nothing yet
/// (a connect-only service dials out inside the handler), or the process's
/// standard streams (inetd mode: one session runs directly on stdio).
pub enum Transport {
    Accepted(TcpStream),
    None,
    Stdio,
}

/// One accepted (or, for connect-only/inetd sessions, synthesized)
/// connection plus the service it belongs to. `peer` is `None` whenever
/// there is no remote socket address to log yet.
pub struct ClientSession {
    pub service: ServiceDefinition,
    pub transport: Transport,
    pub peer: Option<SocketAddr>,
}

impl ClientSession {
    pub fn accepted(service: ServiceDefinition, stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            service,
            transport: Transport::Accepted(stream),
            peer: Some(peer),
        }
    }

    pub fn connect_only(service: ServiceDefinition) -> Self {
        Self {
            service,
            transport: Transport::None,
            peer: None,
        }
    }

    pub fn stdio(service: ServiceDefinition) -> Self {
        Self {
            service,
            transport: Transport::Stdio,
            peer: None,
        }
    }

    /// Peer address formatted for logging, or a placeholder for sessions
    /// with no accepted socket.
    pub fn peer_description(&self) -> String {
        match self.peer {
            Some(addr) => addr.to_string(),
            None => match self.transport {
                Transport::Stdio => "stdio".to_string(),
                _ => "connect-only".to_string(),
            },
        }
    }
}

/// The abstract per-connection worker loop. Given an admitted session, run
/// it to completion. Concrete implementations decide what "processing"
/// means (relay over TLS, echo, proxy to a local exec'd program, ...);
/// the supervisor only needs the `Future` to resolve.
pub trait SessionHandler: Send + Sync {
    fn handle(
        &self,
        session: ClientSession,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = std::io::Result<()>> + Send>>;
}

/// Reference handler: reads whatever the peer sends and writes it back
/// unchanged, then closes. Stands in for a real TLS-relaying handler in
/// tests and as a connectivity smoke test.
pub struct EchoSessionHandler;

impl SessionHandler for EchoSessionHandler {
    fn handle(
        &self,
        session: ClientSession,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = std::io::Result<()>> + Send>> {
        Box::pin(async move {
            match session.transport {
                Transport::None => {
                    debug!(event = "session.connect_only_noop", service = %session.service.name);
                    Ok(())
                }
                Transport::Accepted(stream) => echo_loop(&session.service.name, stream).await,
                Transport::Stdio => {
                    let joined = tokio::io::join(tokio::io::stdin(), tokio::io::stdout());
                    echo_loop(&session.service.name, joined).await
                }
            }
        })
    }
}

async fn echo_loop<S>(service: &str, mut stream: S) -> std::io::Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let mut buf = [0u8; 4096];
    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!(event = "session.read_failed", service = %service, error = %e);
                return Err(e);
            }
        };
        stream.write_all(&buf[..n]).await?;
    }
    debug!(event = "session.closed", service = %service);
    Ok(())
}
