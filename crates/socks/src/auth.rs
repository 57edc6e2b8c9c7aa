use sha2::{Digest, Sha256};
use subtle::{Choice, ConstantTimeEq};

use crate::{SOCKS5_VERSION, USERPASS_VERSION};

/// Reply to the client's method selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AuthResponse {
    pub(crate) method: AuthMethod,
}

impl AuthResponse {
    pub(crate) fn new(method: AuthMethod) -> Self {
        Self { method }
    }

    pub(crate) fn to_bytes(self) -> [u8; 2] {
        [SOCKS5_VERSION, self.method as u8]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum AuthMethod {
    UserPass = 0x02,
    NoAcceptable = 0xff,
}

/// Status of the username/password subnegotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum AuthStatus {
    Success = 0x00,
    Failure = 0x01,
}

impl AuthStatus {
    pub(crate) fn to_bytes(self) -> [u8; 2] {
        [USERPASS_VERSION, self as u8]
    }
}

/// Credential source consulted during username/password subnegotiation.
///
/// Shared read-only between every session.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, username: &[u8], password: &[u8]) -> bool;
}

/// A single configured username/password pair. Only digests are kept.
pub struct StaticAuthenticator {
    username: [u8; 32],
    password: [u8; 32],
}

impl StaticAuthenticator {
    pub fn new(username: impl AsRef<[u8]>, password: impl AsRef<[u8]>) -> Self {
        Self {
            username: digest(username.as_ref()),
            password: digest(password.as_ref()),
        }
    }

    fn matches(&self, username: &[u8; 32], password: &[u8; 32]) -> Choice {
        username[..].ct_eq(&self.username[..]) & password[..].ct_eq(&self.password[..])
    }
}

impl Authenticator for StaticAuthenticator {
    fn authenticate(&self, username: &[u8], password: &[u8]) -> bool {
        self.matches(&digest(username), &digest(password)).into()
    }
}

/// Several accepted username/password pairs. Every pair is compared on each
/// attempt so the time taken does not reveal which one matched.
pub struct MultiUserAuthenticator {
    users: Vec<StaticAuthenticator>,
}

impl MultiUserAuthenticator {
    pub fn new<I, U, P>(users: I) -> Self
    where
        I: IntoIterator<Item = (U, P)>,
        U: AsRef<[u8]>,
        P: AsRef<[u8]>,
    {
        Self {
            users: users
                .into_iter()
                .map(|(user, pass)| StaticAuthenticator::new(user, pass))
                .collect(),
        }
    }
}

impl Authenticator for MultiUserAuthenticator {
    fn authenticate(&self, username: &[u8], password: &[u8]) -> bool {
        let (username, password) = (digest(username), digest(password));
        self.users
            .iter()
            .fold(Choice::from(0), |found, user| {
                found | user.matches(&username, &password)
            })
            .into()
    }
}

/// Fixed-size form of a credential field, so comparisons take the same
/// time whatever the lengths involved.
fn digest(value: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(value));
    out
}
