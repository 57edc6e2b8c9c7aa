use log::{debug, error, info};
use std::{
    fmt::{Display, Formatter},
    future::{self, Future},
    io::Result,
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};
use tokio::{net::TcpListener, time::sleep};

use common::proxy::DirectDialer;

use crate::{auth::Authenticator, handler::ConnectionHandler};

/// Pause after a failed accept, e.g. when the process is out of descriptors.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Everything a server needs at construction. Immutable once built.
#[derive(Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub authenticator: Arc<dyn Authenticator>,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            host: host.into(),
            port,
            authenticator,
        }
    }
}

pub struct SocksServer {
    listener: TcpListener,
    handler: ConnectionHandler<DirectDialer>,
}

impl SocksServer {
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        info!("Starting socks server on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            handler: ConnectionHandler::new(config.authenticator, Arc::new(DirectDialer::new())),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn serve(&self) {
        self.serve_until(future::pending()).await
    }

    /// Accepts clients until `shutdown` resolves. Sessions already running
    /// are left to finish on their own.
    pub async fn serve_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!("Serving socks server");
        tokio::pin!(shutdown);
        loop {
            let accepted = tokio::select! {
                _ = &mut shutdown => {
                    info!("Socks server stopped accepting");
                    return;
                }
                accepted = self.listener.accept() => accepted,
            };
            let (stream, peer_addr) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::select! {
                        _ = &mut shutdown => return,
                        _ = sleep(ACCEPT_ERROR_BACKOFF) => continue,
                    }
                }
            };
            info!("Accepted connection from {}", peer_addr);
            let handler = self.handler.clone();
            tokio::spawn(async move {
                match handler.handle(stream, peer_addr).await {
                    Err(e) if e.is_protocol() => info!("Session {} rejected: {}", peer_addr, e),
                    Err(e) => debug!("Session {} ended: {}", peer_addr, e),
                    Ok(_) => {}
                }
            });
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reply {
    Succeeded = 0x00,
    GeneralFailure = 0x01,
    ConnectionNotAllowed = 0x02,
    NetworkUnreachable = 0x03,
    HostUnreachable = 0x04,
    ConnectionRefused = 0x05,
    TTLExpired = 0x06,
    CommandNotSupported = 0x07,
    AddressTypeNotSupported = 0x08,
}

impl Display for Reply {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::GeneralFailure => write!(f, "general failure"),
            Self::ConnectionNotAllowed => write!(f, "connection not allowed"),
            Self::NetworkUnreachable => write!(f, "network unreachable"),
            Self::HostUnreachable => write!(f, "host unreachable"),
            Self::ConnectionRefused => write!(f, "connection refused"),
            Self::TTLExpired => write!(f, "ttl expired"),
            Self::CommandNotSupported => write!(f, "command not supported"),
            Self::AddressTypeNotSupported => write!(f, "address type not supported"),
        }
    }
}
