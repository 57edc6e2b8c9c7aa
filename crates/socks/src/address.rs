//! Wire form of SOCKS5 addresses: `ATYP ADDR PORT`.

use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6},
};

use bytes::BufMut;
use common::net::ConnectTarget;

use crate::{
    error::{Result, SocksError},
    AddressType,
};

/// Number of bytes `ADDR PORT` occupies for the given address type, once
/// enough of `src` (the bytes following ATYP) is buffered to tell.
pub fn target_len(atyp: u8, src: &[u8]) -> Result<Option<usize>> {
    let len = match AddressType::try_from(atyp)? {
        AddressType::Ipv4 => 4 + 2,
        AddressType::Ipv6 => 16 + 2,
        AddressType::DomainName => match src.first() {
            Some(&n) => 1 + n as usize + 2,
            None => return Ok(None),
        },
    };
    Ok(Some(len))
}

/// Decodes `ADDR PORT` for the given address type. `src` must hold the
/// whole address; trailing bytes are ignored.
pub fn decode_target(atyp: u8, src: &[u8]) -> Result<ConnectTarget> {
    let len = match target_len(atyp, src)? {
        Some(len) if src.len() >= len => len,
        _ => return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into()),
    };
    let port = u16::from_be_bytes([src[len - 2], src[len - 1]]);

    let target = match AddressType::try_from(atyp)? {
        AddressType::Ipv4 => {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&src[..4]);
            ConnectTarget::SocketAddr(SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::from(octets),
                port,
            )))
        }
        AddressType::Ipv6 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&src[..16]);
            ConnectTarget::SocketAddr(SocketAddr::V6(SocketAddrV6::new(
                Ipv6Addr::from(octets),
                port,
                0,
                0,
            )))
        }
        AddressType::DomainName => {
            let name = &src[1..len - 2];
            if name.is_empty() {
                return Err(SocksError::InvalidDomain);
            }
            let domain = String::from_utf8(name.to_vec()).map_err(|_| SocksError::InvalidDomain)?;
            ConnectTarget::DomainName(domain, port)
        }
    };
    Ok(target)
}

/// Appends `ATYP ADDR PORT` for `target`.
pub fn encode_target<B: BufMut>(target: &ConnectTarget, buf: &mut B) -> Result<()> {
    match target {
        ConnectTarget::SocketAddr(SocketAddr::V4(addr)) => {
            buf.put_u8(AddressType::Ipv4 as u8);
            buf.put_slice(&addr.ip().octets());
            buf.put_u16(addr.port());
        }
        ConnectTarget::SocketAddr(SocketAddr::V6(addr)) => {
            buf.put_u8(AddressType::Ipv6 as u8);
            buf.put_slice(&addr.ip().octets());
            buf.put_u16(addr.port());
        }
        ConnectTarget::DomainName(domain, port) => {
            let len = u8::try_from(domain.len()).map_err(|_| SocksError::InvalidDomain)?;
            buf.put_u8(AddressType::DomainName as u8);
            buf.put_u8(len);
            buf.put_slice(domain.as_bytes());
            buf.put_u16(*port);
        }
    }
    Ok(())
}
