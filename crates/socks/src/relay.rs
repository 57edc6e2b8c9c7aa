//! Bidirectional byte relay between a client and its upstream.

use std::{
    fmt::{self, Display},
    future::{self, Future},
    io,
};

use log::trace;
use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const PUMP_BUFFER: usize = 8 * 1024;

/// Which event ended the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// The client stopped sending (EOF or error).
    Client,
    /// The upstream stopped sending (EOF or error).
    Upstream,
    /// An external close signal fired.
    Shutdown,
}

impl Display for RelayEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayEnd::Client => write!(f, "client"),
            RelayEnd::Upstream => write!(f, "upstream"),
            RelayEnd::Shutdown => write!(f, "shutdown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub client_to_upstream: u64,
    pub upstream_to_client: u64,
    pub end: RelayEnd,
}

/// Owns both connections of a session once the handshake succeeded.
///
/// Two pumps copy bytes unchanged, one per direction. The first pump to stop
/// ends the relay and both connections are shut down and dropped together,
/// exactly once, since `run` consumes the relay.
pub struct Relay<C, U> {
    client: C,
    upstream: U,
}

impl<C, U> Relay<C, U>
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(client: C, upstream: U) -> Self {
        Self { client, upstream }
    }

    pub async fn run(self) -> RelayStats {
        self.run_until(future::pending()).await
    }

    /// Relays until either side stops or `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> RelayStats
    where
        F: Future<Output = ()>,
    {
        let (mut client_read, mut client_write) = split(self.client);
        let (mut upstream_read, mut upstream_write) = split(self.upstream);
        let mut client_to_upstream = 0;
        let mut upstream_to_client = 0;

        let end = {
            let outbound = pump(&mut client_read, &mut upstream_write, &mut client_to_upstream);
            let inbound = pump(&mut upstream_read, &mut client_write, &mut upstream_to_client);
            tokio::select! {
                result = outbound => {
                    if let Err(e) = result {
                        trace!("client -> upstream pump failed: {}", e);
                    }
                    RelayEnd::Client
                }
                result = inbound => {
                    if let Err(e) = result {
                        trace!("upstream -> client pump failed: {}", e);
                    }
                    RelayEnd::Upstream
                }
                _ = shutdown => RelayEnd::Shutdown,
            }
        };

        // errors here only mean the other side is already gone
        let _ = client_write.shutdown().await;
        let _ = upstream_write.shutdown().await;

        RelayStats {
            client_to_upstream,
            upstream_to_client,
            end,
        }
    }
}

/// Copies `reader` into `writer` until EOF. Each chunk is fully written
/// before the next read, so a slow writer throttles the reader.
async fn pump<R, W>(reader: &mut R, writer: &mut W, copied: &mut u64) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; PUMP_BUFFER];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        *copied += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::{io::duplex, sync::oneshot, time::timeout};

    const STEP: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn forwards_both_directions_and_closes_client_when_upstream_ends() {
        let (client, mut client_peer) = duplex(64);
        let (upstream, mut upstream_peer) = duplex(64);
        let relay = tokio::spawn(Relay::new(client, upstream).run());

        client_peer.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        upstream_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        upstream_peer.write_all(b"world!").await.unwrap();
        let mut buf = [0u8; 6];
        client_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"world!");

        drop(upstream_peer);
        let mut rest = Vec::new();
        let n = timeout(STEP, client_peer.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);

        let stats = relay.await.unwrap();
        assert_eq!(stats.end, RelayEnd::Upstream);
        assert_eq!(stats.client_to_upstream, 5);
        assert_eq!(stats.upstream_to_client, 6);
    }

    #[tokio::test]
    async fn client_close_closes_upstream() {
        let (client, client_peer) = duplex(64);
        let (upstream, mut upstream_peer) = duplex(64);
        let relay = tokio::spawn(Relay::new(client, upstream).run());

        drop(client_peer);
        let mut rest = Vec::new();
        timeout(STEP, upstream_peer.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap();
        assert!(rest.is_empty());
        assert_eq!(relay.await.unwrap().end, RelayEnd::Client);
    }

    #[tokio::test]
    async fn large_transfer_keeps_order_through_small_pipes() {
        let (client, mut client_peer) = duplex(64);
        let (upstream, mut upstream_peer) = duplex(64);
        let relay = tokio::spawn(Relay::new(client, upstream).run());

        let payload: Vec<u8> = (0..256 * 1024).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();
        let writer = tokio::spawn(async move {
            client_peer.write_all(&payload).await.unwrap();
            client_peer
        });

        let mut received = vec![0u8; expected.len()];
        timeout(STEP, upstream_peer.read_exact(&mut received))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, expected);

        let client_peer = writer.await.unwrap();
        drop(client_peer);
        let stats = relay.await.unwrap();
        assert_eq!(stats.client_to_upstream, expected.len() as u64);
    }

    #[tokio::test]
    async fn external_shutdown_closes_both_sides() {
        let (client, mut client_peer) = duplex(64);
        let (upstream, mut upstream_peer) = duplex(64);
        let (tx, rx) = oneshot::channel::<()>();
        let relay = tokio::spawn(Relay::new(client, upstream).run_until(async {
            let _ = rx.await;
        }));

        tx.send(()).unwrap();
        let mut rest = Vec::new();
        timeout(STEP, client_peer.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap();
        timeout(STEP, upstream_peer.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(relay.await.unwrap().end, RelayEnd::Shutdown);
    }
}
