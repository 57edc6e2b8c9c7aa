mod address;
mod auth;
pub mod error;
mod framer;
mod handler;
mod relay;
mod server;
mod socks5;

pub use address::{decode_target, encode_target, target_len};
pub use auth::{Authenticator, MultiUserAuthenticator, StaticAuthenticator};
pub use common::{
    net::ConnectTarget,
    proxy::{Dialer, DirectDialer, Outbound},
};
pub use error::{Result, SocksError};
pub use framer::{Decode, Framer};
pub use handler::{Action, ConnectionHandler, Handshake, Stage};
pub use relay::{Relay, RelayEnd, RelayStats};
pub use server::{Reply, ServerConfig, SocksServer};
pub use socks5::{encode_failure, encode_reply, AuthRequest, ConnectRequest, MethodSelection};

/// Protocol version of RFC 1928 messages.
pub const SOCKS5_VERSION: u8 = 0x05;

/// Version of the RFC 1929 username/password subnegotiation.
pub const USERPASS_VERSION: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SocksCommand {
    Connect = 1,
    Bind = 2,
    UdpAssociate = 3,
}

impl TryFrom<u8> for SocksCommand {
    type Error = SocksError;

    fn try_from(command: u8) -> Result<Self> {
        match command {
            1 => Ok(Self::Connect),
            2 => Ok(Self::Bind),
            3 => Ok(Self::UdpAssociate),
            code => Err(SocksError::CommandNotSupported { code }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AddressType {
    Ipv4 = 0x01,
    DomainName = 0x03,
    Ipv6 = 0x04,
}

impl TryFrom<u8> for AddressType {
    type Error = SocksError;

    fn try_from(address_type: u8) -> Result<Self> {
        match address_type {
            1 => Ok(Self::Ipv4),
            3 => Ok(Self::DomainName),
            4 => Ok(Self::Ipv6),
            atype => Err(SocksError::AddrTypeNotSupported { atype }),
        }
    }
}
