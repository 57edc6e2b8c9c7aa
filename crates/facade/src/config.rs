//! Startup configuration: command line, environment and an optional JSON file.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::Parser;
use serde::Deserialize;
use socks::{Authenticator, MultiUserAuthenticator, ServerConfig, StaticAuthenticator};
use thiserror::Error;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 1080;
const DEFAULT_USERNAME: &str = "intern";
const DEFAULT_PASSWORD: &str = "password123";

#[derive(Parser, Debug)]
#[command(author, version, about = "SOCKS5 proxy with username/password authentication")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// Username clients must present
    #[arg(short, long, env = "AUTH_USER")]
    pub username: Option<String>,

    /// Password clients must present
    #[arg(long, env = "AUTH_PASS", hide_env_values = true)]
    pub password: Option<String>,

    /// JSON file with host, port and a list of users
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log filter, overrides RUST_LOG
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {}: {}", .path.display(), .source)]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse {}: {}", .path.display(), .source)]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("{field} must be 1 to 255 bytes, got {len}")]
    InvalidCredential { field: &'static str, len: usize },
}

#[derive(Deserialize, Debug, Default)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    users: Vec<User>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Single(User),
    Multi(Vec<User>),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub credentials: Credentials,
}

impl Config {
    /// File values replace the defaults; explicit arguments and environment
    /// variables replace file values.
    pub fn load(args: Args) -> Result<Self, ConfigError> {
        let file = match &args.config {
            Some(path) => read_file(path)?,
            None => FileConfig::default(),
        };

        let host = args
            .host
            .or(file.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = args.port.or(file.port).unwrap_or(DEFAULT_PORT);

        let credentials = if file.users.is_empty() {
            Credentials::Single(User {
                username: args
                    .username
                    .or(file.username)
                    .unwrap_or_else(|| DEFAULT_USERNAME.to_string()),
                password: args
                    .password
                    .or(file.password)
                    .unwrap_or_else(|| DEFAULT_PASSWORD.to_string()),
            })
        } else {
            Credentials::Multi(file.users)
        };

        let config = Config {
            host,
            port,
            credentials,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn users(&self) -> &[User] {
        match &self.credentials {
            Credentials::Single(user) => std::slice::from_ref(user),
            Credentials::Multi(users) => users,
        }
    }

    pub fn authenticator(&self) -> Arc<dyn Authenticator> {
        match &self.credentials {
            Credentials::Single(user) => Arc::new(StaticAuthenticator::new(
                user.username.as_bytes(),
                user.password.as_bytes(),
            )),
            Credentials::Multi(users) => Arc::new(MultiUserAuthenticator::new(
                users
                    .iter()
                    .map(|user| (user.username.as_bytes(), user.password.as_bytes())),
            )),
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig::new(self.host.clone(), self.port, self.authenticator())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for user in self.users() {
            check_field("username", &user.username)?;
            check_field("password", &user.password)?;
        }
        Ok(())
    }
}

// RFC 1929 carries each field behind a one-byte length
fn check_field(field: &'static str, value: &str) -> Result<(), ConfigError> {
    let len = value.len();
    if len == 0 || len > u8::MAX as usize {
        return Err(ConfigError::InvalidCredential { field, len });
    }
    Ok(())
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
