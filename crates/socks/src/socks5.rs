use std::{
    fmt::{self, Display},
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
};

use bytes::BytesMut;
use common::net::ConnectTarget;

use crate::{
    address::{decode_target, encode_target, target_len},
    error::{Result, SocksError},
    framer::Decode,
    server::Reply,
    SocksCommand, SOCKS5_VERSION, USERPASS_VERSION,
};

fn check_version(expected: u8, got: u8) -> Result<()> {
    if got != expected {
        return Err(SocksError::InvalidVersion { expected, got });
    }
    Ok(())
}

/// client method selection message
///
/// ```text
/// +----+----------+----------+
/// |VER | NMETHODS | METHODS  |
/// +----+----------+----------+
/// | 1  |    1     | 1 to 255 |
/// +----+----------+----------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSelection {
    pub methods: Vec<u8>,
}

impl MethodSelection {
    pub fn offers(&self, method: u8) -> bool {
        self.methods.contains(&method)
    }
}

impl Decode for MethodSelection {
    fn decode(src: &[u8]) -> Result<Option<(Self, usize)>> {
        let Some(&version) = src.first() else {
            return Ok(None);
        };
        check_version(SOCKS5_VERSION, version)?;
        let Some(&nmethods) = src.get(1) else {
            return Ok(None);
        };
        let total = 2 + nmethods as usize;
        if src.len() < total {
            return Ok(None);
        }
        let methods = src[2..total].to_vec();
        Ok(Some((MethodSelection { methods }, total)))
    }
}

/// username/password subnegotiation (RFC 1929)
///
/// ```text
/// +----+------+----------+------+----------+
/// |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
/// +----+------+----------+------+----------+
/// | 1  |  1   | 1 to 255 |  1   | 1 to 255 |
/// +----+------+----------+------+----------+
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct AuthRequest {
    pub username: Vec<u8>,
    pub password: Vec<u8>,
}

impl AuthRequest {
    pub fn username_lossy(&self) -> String {
        String::from_utf8_lossy(&self.username).into_owned()
    }
}

impl fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthRequest")
            .field("username", &self.username_lossy())
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Decode for AuthRequest {
    fn decode(src: &[u8]) -> Result<Option<(Self, usize)>> {
        let Some(&version) = src.first() else {
            return Ok(None);
        };
        check_version(USERPASS_VERSION, version)?;
        let Some(&ulen) = src.get(1) else {
            return Ok(None);
        };
        let plen_at = 2 + ulen as usize;
        let Some(&plen) = src.get(plen_at) else {
            return Ok(None);
        };
        let total = plen_at + 1 + plen as usize;
        if src.len() < total {
            return Ok(None);
        }
        let request = AuthRequest {
            username: src[2..plen_at].to_vec(),
            password: src[plen_at + 1..total].to_vec(),
        };
        Ok(Some((request, total)))
    }
}

/// tcp request header after auth
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   | Variable |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
///
/// Only CONNECT decodes successfully; any other command is reported as soon
/// as the CMD byte arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub target: ConnectTarget,
}

impl Decode for ConnectRequest {
    fn decode(src: &[u8]) -> Result<Option<(Self, usize)>> {
        let Some(&version) = src.first() else {
            return Ok(None);
        };
        check_version(SOCKS5_VERSION, version)?;
        let Some(&command) = src.get(1) else {
            return Ok(None);
        };
        if SocksCommand::try_from(command)? != SocksCommand::Connect {
            return Err(SocksError::CommandNotSupported { code: command });
        }
        let Some(&atyp) = src.get(3) else {
            return Ok(None);
        };
        let total = match target_len(atyp, &src[4..])? {
            Some(len) if src.len() >= 4 + len => 4 + len,
            _ => return Ok(None),
        };
        let target = decode_target(atyp, &src[4..total])?;
        Ok(Some((ConnectRequest { target }, total)))
    }
}

impl Display for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CONNECT {}", self.target)
    }
}

/// Server reply to a request. The bound address is reported in its own
/// family; `None` is sent as `0.0.0.0:0`.
pub struct TcpResponseHeader {
    reply: Reply,
    address: Option<SocketAddr>,
}

impl TcpResponseHeader {
    pub fn new(reply: Reply, address: Option<SocketAddr>) -> Self {
        Self { reply, address }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let address = self
            .address
            .unwrap_or(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)));
        let mut buf = BytesMut::with_capacity(3 + 1 + 16 + 2);
        buf.extend_from_slice(&[SOCKS5_VERSION, self.reply as u8, 0x00]);
        // an IP socket address always fits the wire form
        let _ = encode_target(&ConnectTarget::SocketAddr(address), &mut buf);
        buf.to_vec()
    }
}

impl Display for TcpResponseHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address {
            Some(addr) => write!(f, "{} {}", self.reply, addr),
            None => write!(f, "{}", self.reply),
        }
    }
}

pub fn encode_reply(reply: Reply, bound: Option<SocketAddr>) -> Vec<u8> {
    TcpResponseHeader::new(reply, bound).to_bytes()
}

/// Reply used for every failure before the upstream exists.
pub fn encode_failure(reply: Reply) -> Vec<u8> {
    encode_reply(reply, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framer::Framer;

    #[test]
    fn method_selection_needs_nmethods_before_length_is_known() {
        assert_eq!(MethodSelection::decode(&[]).unwrap(), None);
        assert_eq!(MethodSelection::decode(&[5]).unwrap(), None);
        assert_eq!(MethodSelection::decode(&[5, 2, 0]).unwrap(), None);
        let (frame, used) = MethodSelection::decode(&[5, 2, 0, 2, 0xaa]).unwrap().unwrap();
        assert_eq!(used, 4);
        assert!(frame.offers(0x02));
        assert!(!frame.offers(0x01));
    }

    #[test]
    fn method_selection_rejects_version_from_first_byte() {
        assert!(matches!(
            MethodSelection::decode(&[4]),
            Err(SocksError::InvalidVersion { expected: 5, got: 4 })
        ));
    }

    #[test]
    fn auth_request_consumes_exactly_its_fields() {
        for (ulen, plen) in [(1usize, 1usize), (3, 3), (255, 1), (1, 255), (255, 255)] {
            let mut wire = vec![1, ulen as u8];
            wire.extend(std::iter::repeat(b'u').take(ulen));
            wire.push(plen as u8);
            wire.extend(std::iter::repeat(b'p').take(plen));
            let frame_len = wire.len();
            wire.extend_from_slice(&[5, 1, 0]);

            let mut framer = Framer::new();
            framer.feed(&wire);
            let request = framer.try_extract::<AuthRequest>().unwrap().unwrap();
            assert_eq!(frame_len, 2 + ulen + 1 + plen);
            assert_eq!(request.username.len(), ulen);
            assert_eq!(request.password.len(), plen);
            assert_eq!(framer.buffered(), &[5, 1, 0]);
        }
    }

    #[test]
    fn auth_request_waits_on_every_length_dependency() {
        let wire = [1, 3, b'a', b'b', b'c', 3, b'x', b'y', b'z'];
        for cut in 0..wire.len() {
            assert_eq!(AuthRequest::decode(&wire[..cut]).unwrap(), None, "cut {cut}");
        }
        let (request, used) = AuthRequest::decode(&wire).unwrap().unwrap();
        assert_eq!(used, wire.len());
        assert_eq!(request.username, b"abc");
        assert_eq!(request.password, b"xyz");
    }

    #[test]
    fn auth_request_debug_hides_password() {
        let request = AuthRequest {
            username: b"abc".to_vec(),
            password: b"secret".to_vec(),
        };
        let shown = format!("{:?}", request);
        assert!(shown.contains("abc"));
        assert!(!shown.contains("secret"));
    }

    #[test]
    fn auth_request_rejects_wrong_subnegotiation_version() {
        assert!(matches!(
            AuthRequest::decode(&[5]),
            Err(SocksError::InvalidVersion { expected: 1, got: 5 })
        ));
    }

    #[test]
    fn connect_request_decodes_each_address_type() {
        let (request, used) =
            ConnectRequest::decode(&[5, 1, 0, 1, 0x7f, 0, 0, 1, 0x00, 0x50]).unwrap().unwrap();
        assert_eq!(used, 10);
        assert_eq!(request.to_string(), "CONNECT 127.0.0.1:80");

        let mut domain = vec![5, 1, 0, 3, 11];
        domain.extend_from_slice(b"example.com");
        domain.extend_from_slice(&443u16.to_be_bytes());
        let (request, used) = ConnectRequest::decode(&domain).unwrap().unwrap();
        assert_eq!(used, domain.len());
        assert_eq!(
            request.target,
            ConnectTarget::DomainName("example.com".into(), 443)
        );

        let mut v6 = vec![5, 1, 0, 4];
        v6.extend_from_slice(&[0; 15]);
        v6.push(1);
        v6.extend_from_slice(&22u16.to_be_bytes());
        let (request, _) = ConnectRequest::decode(&v6).unwrap().unwrap();
        assert_eq!(request.target.to_string(), "[::1]:22");
    }

    #[test]
    fn connect_request_waits_for_variable_address() {
        let wire = [5, 1, 0, 3, 3, b'a', b'b', b'c', 0, 80];
        for cut in 0..wire.len() {
            assert_eq!(ConnectRequest::decode(&wire[..cut]).unwrap(), None, "cut {cut}");
        }
        assert!(ConnectRequest::decode(&wire).unwrap().is_some());
    }

    #[test]
    fn connect_request_rejects_fixed_fields_early() {
        assert!(matches!(
            ConnectRequest::decode(&[4]),
            Err(SocksError::InvalidVersion { .. })
        ));
        assert!(matches!(
            ConnectRequest::decode(&[5, 3]),
            Err(SocksError::CommandNotSupported { code: 3 })
        ));
        assert!(matches!(
            ConnectRequest::decode(&[5, 2]),
            Err(SocksError::CommandNotSupported { code: 2 })
        ));
        assert!(matches!(
            ConnectRequest::decode(&[5, 1, 0, 5]),
            Err(SocksError::AddrTypeNotSupported { atype: 5 })
        ));
    }

    #[test]
    fn reply_uses_bound_address_family() {
        let v4 = encode_reply(Reply::Succeeded, Some("10.0.0.5:54321".parse().unwrap()));
        assert_eq!(v4, [5, 0, 0, 1, 0x0a, 0, 0, 5, 0xd4, 0x31]);

        let v6 = encode_reply(Reply::Succeeded, Some("[::1]:1080".parse().unwrap()));
        assert_eq!(v6.len(), 4 + 16 + 2);
        assert_eq!(v6[3], 0x04);
        assert_eq!(v6[19], 1);
        assert_eq!(&v6[20..], &1080u16.to_be_bytes());

        assert_eq!(
            encode_reply(Reply::Succeeded, None),
            [5, 0, 0, 1, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn failure_reply_is_fixed_ipv4_any() {
        assert_eq!(
            encode_failure(Reply::AddressTypeNotSupported),
            [5, 8, 0, 1, 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(
            encode_failure(Reply::CommandNotSupported),
            [5, 7, 0, 1, 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(
            encode_failure(Reply::ConnectionRefused),
            [5, 5, 0, 1, 0, 0, 0, 0, 0, 0]
        );
    }
}
