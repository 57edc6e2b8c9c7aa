use std::{io, net::SocketAddr};

use async_trait::async_trait;
use log::{debug, trace};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};

use crate::net::ConnectTarget;

/// An established outbound connection together with the local address it is
/// bound to. `local_addr` is `None` when the transport cannot report one.
pub struct Outbound<S> {
    pub stream: S,
    pub local_addr: Option<SocketAddr>,
}

/// Opens the outbound side of a proxied connection.
///
/// Implementations may block their own task (name resolution, TCP
/// handshake) but must be safe to share between sessions.
#[async_trait]
pub trait Dialer: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn dial(&self, target: &ConnectTarget) -> io::Result<Outbound<Self::Stream>>;
}

/// Dials targets directly over TCP, resolving domain names with the runtime
/// resolver.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectDialer;

impl DirectDialer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Dialer for DirectDialer {
    type Stream = TcpStream;

    async fn dial(&self, target: &ConnectTarget) -> io::Result<Outbound<TcpStream>> {
        let stream = match target {
            ConnectTarget::SocketAddr(addr) => TcpStream::connect(addr).await?,
            // tries every resolved address in order
            ConnectTarget::DomainName(domain, port) => {
                TcpStream::connect((domain.as_str(), *port)).await?
            }
        };
        let local_addr = match stream.local_addr() {
            Ok(addr) => Some(addr),
            Err(e) => {
                debug!("Cannot read local address of outbound to {}: {}", target, e);
                None
            }
        };
        trace!("Dialed {} from {:?}", target, local_addr);
        Ok(Outbound { stream, local_addr })
    }
}
