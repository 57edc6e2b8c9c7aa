//! Per-connection SOCKS5 handshake.
//!
//! [`Handshake`] is the protocol state machine. It never touches a socket:
//! it is fed the bytes read from the client and answers with the next
//! [`Action`]. [`ConnectionHandler`] drives it over a real stream, dials the
//! requested target and hands both connections to the [`Relay`].

use std::{
    fmt::{self, Display},
    io,
    net::SocketAddr,
    sync::Arc,
};

use bytes::Bytes;
use common::{net::ConnectTarget, proxy::Dialer};
use log::{debug, info, trace, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    auth::{AuthMethod, AuthResponse, AuthStatus, Authenticator},
    error::{Result, SocksError},
    framer::Framer,
    relay::{Relay, RelayStats},
    server::Reply,
    socks5::{encode_failure, encode_reply, AuthRequest, ConnectRequest, MethodSelection},
};

const READ_CHUNK: usize = 1024;

/// Handshake progress. Stages only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    AwaitingMethods,
    AwaitingAuth,
    AwaitingRequest,
    Relaying,
    Closed,
}

impl Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::AwaitingMethods => write!(f, "awaiting methods"),
            Stage::AwaitingAuth => write!(f, "awaiting auth"),
            Stage::AwaitingRequest => write!(f, "awaiting request"),
            Stage::Relaying => write!(f, "relaying"),
            Stage::Closed => write!(f, "closed"),
        }
    }
}

/// What the driver must do next.
#[derive(Debug)]
pub enum Action {
    /// Read more bytes from the client and [`Handshake::feed`] them.
    NeedMore,
    /// Write these bytes to the client, then advance again.
    Reply(Vec<u8>),
    /// Open an outbound connection and report the outcome through
    /// [`Handshake::connected`] or [`Handshake::dial_failed`].
    Connect(ConnectTarget),
    /// The handshake is complete; start relaying.
    Relay,
    /// Write `reply` if present, then close the client connection.
    Close {
        reply: Option<Vec<u8>>,
        error: SocksError,
    },
    /// Nothing more may happen on this session.
    Closed,
}

pub struct Handshake {
    peer: SocketAddr,
    stage: Stage,
    framer: Framer,
    authenticator: Arc<dyn Authenticator>,
    method: Option<AuthMethod>,
    authenticated: bool,
    target: Option<ConnectTarget>,
}

impl Handshake {
    pub fn new(peer: SocketAddr, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            peer,
            stage: Stage::AwaitingMethods,
            framer: Framer::new(),
            authenticator,
            method: None,
            authenticated: false,
            target: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn target(&self) -> Option<&ConnectTarget> {
        self.target.as_ref()
    }

    pub fn feed(&mut self, data: &[u8]) {
        if self.stage >= Stage::Relaying {
            trace!("{} ignoring {} bytes while {}", self.peer, data.len(), self.stage);
            return;
        }
        self.framer.feed(data);
    }

    pub fn advance(&mut self) -> Action {
        let result = match self.stage {
            Stage::AwaitingMethods => self.on_methods(),
            Stage::AwaitingAuth => self.on_auth(),
            Stage::AwaitingRequest => self.on_request(),
            Stage::Relaying => return Action::Relay,
            Stage::Closed => return Action::Closed,
        };
        result.unwrap_or_else(|error| {
            let (reply, error) = self.fail(error);
            Action::Close { reply, error }
        })
    }

    /// Records a successful dial and returns the success reply, encoded with
    /// the outbound connection's own bound address.
    pub fn connected(&mut self, bound: Option<SocketAddr>) -> Vec<u8> {
        self.transition(Stage::Relaying);
        encode_reply(Reply::Succeeded, bound)
    }

    pub fn dial_failed(&mut self, source: io::Error) -> (Option<Vec<u8>>, SocksError) {
        let target = self
            .target()
            .map(ToString::to_string)
            .unwrap_or_default();
        self.fail(SocksError::Dial { target, source })
    }

    /// The client went away before the handshake finished.
    pub fn peer_closed(&mut self) -> SocksError {
        let stage = self.stage;
        self.transition(Stage::Closed);
        SocksError::TransportClosed { stage }
    }

    pub fn close(&mut self) {
        self.transition(Stage::Closed);
    }

    /// Bytes the client sent after its request, owed to the upstream.
    pub fn take_early_data(&mut self) -> Bytes {
        self.framer.take_remaining()
    }

    fn on_methods(&mut self) -> Result<Action> {
        let Some(selection) = self.framer.try_extract::<MethodSelection>()? else {
            return Ok(Action::NeedMore);
        };
        trace!("{} offered methods {:?}", self.peer, selection.methods);
        if !selection.offers(AuthMethod::UserPass as u8) {
            return Err(SocksError::NoAcceptableMethods);
        }
        self.method = Some(AuthMethod::UserPass);
        self.transition(Stage::AwaitingAuth);
        Ok(Action::Reply(
            AuthResponse::new(AuthMethod::UserPass).to_bytes().to_vec(),
        ))
    }

    fn on_auth(&mut self) -> Result<Action> {
        let Some(credentials) = self.framer.try_extract::<AuthRequest>()? else {
            return Ok(Action::NeedMore);
        };
        let username = credentials.username_lossy();
        if !self
            .authenticator
            .authenticate(&credentials.username, &credentials.password)
        {
            return Err(SocksError::AuthFailed { username });
        }
        info!(
            "Auth success from {} (username={:?}, method={:?})",
            self.peer, username, self.method
        );
        self.authenticated = true;
        self.transition(Stage::AwaitingRequest);
        Ok(Action::Reply(AuthStatus::Success.to_bytes().to_vec()))
    }

    fn on_request(&mut self) -> Result<Action> {
        if let Some(target) = &self.target {
            return Ok(Action::Connect(target.clone()));
        }
        let Some(request) = self.framer.try_extract::<ConnectRequest>()? else {
            return Ok(Action::NeedMore);
        };
        info!("Request from {}: {}", self.peer, request);
        self.target = Some(request.target.clone());
        Ok(Action::Connect(request.target))
    }

    fn fail(&mut self, error: SocksError) -> (Option<Vec<u8>>, SocksError) {
        let reply = match &error {
            SocksError::NoAcceptableMethods => {
                Some(AuthResponse::new(AuthMethod::NoAcceptable).to_bytes().to_vec())
            }
            SocksError::AuthFailed { username } => {
                info!("Auth failed from {} (username={:?})", self.peer, username);
                Some(AuthStatus::Failure.to_bytes().to_vec())
            }
            error => error.reply().map(encode_failure),
        };
        self.transition(Stage::Closed);
        (reply, error)
    }

    fn transition(&mut self, next: Stage) {
        if self.stage == next && next == Stage::Closed {
            return;
        }
        debug_assert!(next > self.stage, "{} cannot follow {}", next, self.stage);
        trace!("{}: {} -> {}", self.peer, self.stage, next);
        self.stage = next;
    }
}

/// Runs whole client sessions: handshake, dial, relay.
pub struct ConnectionHandler<D> {
    authenticator: Arc<dyn Authenticator>,
    dialer: Arc<D>,
}

impl<D> Clone for ConnectionHandler<D> {
    fn clone(&self) -> Self {
        Self {
            authenticator: Arc::clone(&self.authenticator),
            dialer: Arc::clone(&self.dialer),
        }
    }
}

impl<D: Dialer> ConnectionHandler<D> {
    pub fn new(authenticator: Arc<dyn Authenticator>, dialer: Arc<D>) -> Self {
        Self {
            authenticator,
            dialer,
        }
    }

    /// Serves one client connection to completion. Both the client and the
    /// upstream connection are closed when this returns.
    pub async fn handle<S>(&self, mut stream: S, peer: SocketAddr) -> Result<RelayStats>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut handshake = Handshake::new(peer, Arc::clone(&self.authenticator));
        let mut buf = [0u8; READ_CHUNK];
        let mut pending = None;

        let mut upstream = loop {
            match handshake.advance() {
                Action::NeedMore => {
                    let n = stream.read(&mut buf).await?;
                    if n == 0 {
                        return Err(handshake.peer_closed());
                    }
                    handshake.feed(&buf[..n]);
                }
                Action::Reply(bytes) => stream.write_all(&bytes).await?,
                Action::Connect(target) => match self.dialer.dial(&target).await {
                    Ok(outbound) => {
                        debug!("{} connected to {} from {:?}", peer, target, outbound.local_addr);
                        let reply = handshake.connected(outbound.local_addr);
                        pending = Some(outbound.stream);
                        stream.write_all(&reply).await?;
                    }
                    Err(source) => {
                        warn!("{} cannot connect to {}: {}", peer, target, source);
                        let (reply, error) = handshake.dial_failed(source);
                        return Err(reject(&mut stream, reply, error).await);
                    }
                },
                Action::Relay => match pending.take() {
                    Some(upstream) => break upstream,
                    None => return Err(handshake.peer_closed()),
                },
                Action::Close { reply, error } => {
                    return Err(reject(&mut stream, reply, error).await);
                }
                Action::Closed => return Err(handshake.peer_closed()),
            }
        };

        let early = handshake.take_early_data();
        if !early.is_empty() {
            trace!("{} forwarding {} early bytes", peer, early.len());
            upstream.write_all(&early).await?;
        }

        let stats = Relay::new(stream, upstream).run().await;
        handshake.close();
        debug!(
            "{} relay finished by {}: {} bytes up, {} bytes down",
            peer, stats.end, stats.client_to_upstream, stats.upstream_to_client
        );
        Ok(stats)
    }
}

async fn reject<S>(stream: &mut S, reply: Option<Vec<u8>>, error: SocksError) -> SocksError
where
    S: AsyncWrite + Unpin,
{
    if let Some(reply) = reply {
        // best effort: the client may already be gone
        let _ = stream.write_all(&reply).await;
    }
    let _ = stream.shutdown().await;
    error
}
