//! Server and client configuration

use crate::connection::ServerTrust;
use crate::error::{Error, Result};
use crate::federation::{PeerAddr, PeerDirectory};
use crate::tls;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 9876;

/// Which server certificates a TLS client accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsTrust {
    /// Verify against the CA certificates in this PEM bundle.
    CaFile(PathBuf),
    /// Accept any certificate. Development only.
    Insecure,
}

impl TlsTrust {
    /// Load the trust anchors this setting names.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the CA bundle cannot be read.
    pub fn load(&self) -> Result<ServerTrust> {
        match self {
            Self::CaFile(path) => Ok(ServerTrust::Roots(tls::load_roots(path)?)),
            Self::Insecure => Ok(ServerTrust::AcceptAny),
        }
    }
}

/// Settings for outbound federation.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub default_port: u16,
    /// Explicit `domain -> host:port` entries.
    pub peers: Vec<(String, PeerAddr)>,
    pub trust: TlsTrust,
    pub timeout: Duration,
}

impl PeerConfig {
    #[must_use]
    pub fn directory(&self) -> PeerDirectory {
        let mut directory = PeerDirectory::new(self.default_port);
        for (domain, addr) in &self.peers {
            directory.insert(domain, addr.clone());
        }
        directory
    }
}

/// Configuration for `quill serve`
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The domain this server owns.
    pub domain: String,
    pub listen_addr: String,
    pub plaintext_addr: Option<String>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub peer: PeerConfig,
    pub shutdown_grace: Duration,
    pub accounts_file: Option<PathBuf>,
}

impl ServerConfig {
    /// Load server configuration from environment variables
    ///
    /// Reads from `.env` file if present. Required variables:
    /// - `QUILL_DOMAIN`
    /// - `QUILL_TLS_CERT` and `QUILL_TLS_KEY`, unless only a plaintext
    ///   listener is configured
    ///
    /// Optional (with defaults):
    /// - `QUILL_LISTEN_ADDR` (default: `0.0.0.0:9876`)
    /// - `QUILL_PLAINTEXT_ADDR` (default: none)
    /// - `QUILL_PEER_PORT` (default: `9876`)
    /// - `QUILL_PEERS` (`domain=host:port,...`)
    /// - `QUILL_PEER_CA` (default: `QUILL_TLS_CERT`)
    /// - `QUILL_PEER_INSECURE` (default: `false`)
    /// - `QUILL_PEER_TIMEOUT_SECS` (default: `10`)
    /// - `QUILL_SHUTDOWN_GRACE_SECS` (default: `5`)
    /// - `QUILL_ACCOUNTS_FILE` (default: none)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for missing or unparseable variables.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// See [`ServerConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let domain = get("QUILL_DOMAIN")
            .ok_or_else(|| Error::Config("QUILL_DOMAIN not set".into()))?
            .to_ascii_lowercase();
        let tls_cert = get("QUILL_TLS_CERT").map(PathBuf::from);
        let tls_key = get("QUILL_TLS_KEY").map(PathBuf::from);
        let plaintext_addr = get("QUILL_PLAINTEXT_ADDR");

        match (&tls_cert, &tls_key) {
            (Some(_), None) => return Err(Error::Config("QUILL_TLS_KEY not set".into())),
            (None, Some(_)) => return Err(Error::Config("QUILL_TLS_CERT not set".into())),
            (None, None) if plaintext_addr.is_none() => {
                return Err(Error::Config(
                    "QUILL_TLS_CERT and QUILL_TLS_KEY not set".into(),
                ));
            }
            _ => {}
        }

        let trust = if parse_or(get("QUILL_PEER_INSECURE"), "QUILL_PEER_INSECURE", false)? {
            TlsTrust::Insecure
        } else {
            get("QUILL_PEER_CA")
                .map(PathBuf::from)
                .or_else(|| tls_cert.clone())
                .map(TlsTrust::CaFile)
                .ok_or_else(|| {
                    Error::Config("QUILL_PEER_CA or QUILL_PEER_INSECURE must be set".into())
                })?
        };

        let peer = PeerConfig {
            default_port: parse_or(get("QUILL_PEER_PORT"), "QUILL_PEER_PORT", DEFAULT_PORT)?,
            peers: get("QUILL_PEERS")
                .map(|v| parse_peers(&v))
                .transpose()?
                .unwrap_or_default(),
            trust,
            timeout: Duration::from_secs(parse_or(
                get("QUILL_PEER_TIMEOUT_SECS"),
                "QUILL_PEER_TIMEOUT_SECS",
                10,
            )?),
        };

        Ok(Self {
            domain,
            listen_addr: get("QUILL_LISTEN_ADDR")
                .unwrap_or_else(|| format!("0.0.0.0:{DEFAULT_PORT}")),
            plaintext_addr,
            tls_cert,
            tls_key,
            peer,
            shutdown_grace: Duration::from_secs(parse_or(
                get("QUILL_SHUTDOWN_GRACE_SECS"),
                "QUILL_SHUTDOWN_GRACE_SECS",
                5,
            )?),
            accounts_file: get("QUILL_ACCOUNTS_FILE").map(PathBuf::from),
        })
    }
}

/// Configuration for the `quill` client commands
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub token: Option<String>,
    pub trust: TlsTrust,
    pub plaintext: bool,
}

impl ClientConfig {
    /// Load client configuration from environment variables
    ///
    /// Reads from `.env` file if present. All variables are optional:
    /// - `QUILL_HOST` (default: `127.0.0.1`)
    /// - `QUILL_PORT` (default: `9876`)
    /// - `QUILL_TOKEN`
    /// - `QUILL_CA` (without it, or with `QUILL_INSECURE=true`, the
    ///   server certificate is not verified)
    /// - `QUILL_PLAINTEXT` (default: `false`)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for unparseable values.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// See [`ClientConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let insecure = parse_or(get("QUILL_INSECURE"), "QUILL_INSECURE", false)?;
        let trust = match get("QUILL_CA") {
            Some(ca) if !insecure => TlsTrust::CaFile(PathBuf::from(ca)),
            _ => TlsTrust::Insecure,
        };

        Ok(Self {
            host: get("QUILL_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_or(get("QUILL_PORT"), "QUILL_PORT", DEFAULT_PORT)?,
            token: get("QUILL_TOKEN"),
            trust,
            plaintext: parse_or(get("QUILL_PLAINTEXT"), "QUILL_PLAINTEXT", false)?,
        })
    }
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.map_or(Ok(default), |v| {
        v.parse()
            .map_err(|e| Error::Config(format!("Invalid {key}: {e}")))
    })
}

/// Parse `domain=host:port` entries separated by commas.
fn parse_peers(value: &str) -> Result<Vec<(String, PeerAddr)>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let invalid = || Error::Config(format!("Invalid QUILL_PEERS entry: {entry:?}"));
            let (domain, target) = entry.split_once('=').ok_or_else(invalid)?;
            let (host, port) = target.trim().rsplit_once(':').ok_or_else(invalid)?;
            let port = port.parse().map_err(|_| invalid())?;
            if domain.trim().is_empty() || host.is_empty() {
                return Err(invalid());
            }
            Ok((
                domain.trim().to_ascii_lowercase(),
                PeerAddr {
                    host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
                    port,
                },
            ))
        })
        .collect()
}
