use std::{
    fmt::{Display, Formatter},
    net::SocketAddr,
};

/// Destination requested by a client, as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConnectTarget {
    SocketAddr(SocketAddr),
    DomainName(String, u16),
}

impl ConnectTarget {
    pub fn port(&self) -> u16 {
        match self {
            ConnectTarget::SocketAddr(addr) => addr.port(),
            ConnectTarget::DomainName(_, port) => *port,
        }
    }
}

impl Display for ConnectTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectTarget::SocketAddr(addr) => write!(f, "{}", addr),
            ConnectTarget::DomainName(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}

impl From<SocketAddr> for ConnectTarget {
    fn from(addr: SocketAddr) -> Self {
        ConnectTarget::SocketAddr(addr)
    }
}
