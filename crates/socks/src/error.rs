//! Per-session error taxonomy.

use std::io;

use thiserror::Error;

use crate::{handler::Stage, server::Reply};

pub type Result<T> = std::result::Result<T, SocksError>;

#[derive(Error, Debug)]
pub enum SocksError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid version: expected {expected}, got {got}")]
    InvalidVersion { expected: u8, got: u8 },
    #[error("No acceptable authentication methods")]
    NoAcceptableMethods,
    #[error("Authentication failed for user: {username}")]
    AuthFailed { username: String },
    #[error("Command not supported: 0x{code:02x}")]
    CommandNotSupported { code: u8 },
    #[error("Address type not supported: 0x{atype:02x}")]
    AddrTypeNotSupported { atype: u8 },
    #[error("Invalid domain name in request")]
    InvalidDomain,
    #[error("Peer closed the connection while {stage}")]
    TransportClosed { stage: Stage },
    #[error("Cannot connect to {target}: {source}")]
    Dial {
        target: String,
        #[source]
        source: io::Error,
    },
}

impl SocksError {
    /// Reply code written to the client before closing, if the protocol
    /// defines one for this failure.
    pub fn reply(&self) -> Option<Reply> {
        match self {
            SocksError::CommandNotSupported { .. } => Some(Reply::CommandNotSupported),
            SocksError::AddrTypeNotSupported { .. } => Some(Reply::AddressTypeNotSupported),
            SocksError::InvalidDomain | SocksError::Dial { .. } => Some(Reply::ConnectionRefused),
            _ => None,
        }
    }

    /// Protocol-level failures caused by the client rather than the network.
    pub fn is_protocol(&self) -> bool {
        !matches!(
            self,
            SocksError::Io(_) | SocksError::TransportClosed { .. } | SocksError::Dial { .. }
        )
    }
}
