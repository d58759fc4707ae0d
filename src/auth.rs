//! Session-token and peer-server authentication
//!
//! The server never verifies credentials itself. An [`Authenticator`]
//! turns the token carried in a packet into an [`AuthenticatedIdentity`],
//! which is then passed explicitly to the operations that need it.
//! Peer servers carry no token; they are identified by the client
//! certificate they present, see [`PeerCertificate`].

use crate::error::{Error, Result};
use async_trait::async_trait;
use rustls::client::verify_server_name;
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::server::ParsedCertificate;
use std::collections::HashMap;
use std::sync::RwLock;

/// The stable user identifier behind a verified session token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthenticatedIdentity {
    user_id: String,
}

impl AuthenticatedIdentity {
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

/// Verifies session tokens. Implementations are shared by every
/// connection task and must be safe for concurrent use.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Verify `token` and return the identity it belongs to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthFailed`] when the token is not valid.
    async fn authenticate(&self, token: &str) -> Result<AuthenticatedIdentity>;
}

/// Strip an optional `Bearer ` prefix from a session token.
#[must_use]
pub fn bearer_token(raw: &str) -> &str {
    let raw = raw.trim();
    raw.strip_prefix("Bearer ").map_or(raw, str::trim)
}

/// An authenticator backed by a fixed token table.
///
/// Used for development deployments seeded from an accounts file, and in
/// tests.
#[derive(Debug, Default)]
pub struct StaticTokenAuthenticator {
    tokens: RwLock<HashMap<String, String>>,
}

impl StaticTokenAuthenticator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `token` for `user_id` and return `self` for chaining.
    #[must_use]
    pub fn with_token(self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.insert(token, user_id);
        self
    }

    /// Register `token` for `user_id`, replacing any previous owner.
    pub fn insert(&self, token: impl Into<String>, user_id: impl Into<String>) {
        let mut tokens = self
            .tokens
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        tokens.insert(token.into(), user_id.into());
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<AuthenticatedIdentity> {
        let token = bearer_token(token);
        let tokens = self
            .tokens
            .read()
            .map_err(|_| Error::AuthFailed("token table unavailable".into()))?;

        tokens
            .get(token)
            .map(AuthenticatedIdentity::new)
            .ok_or_else(|| Error::AuthFailed("Invalid or expired session token.".into()))
    }
}

/// The end-entity certificate a peer server presented during the TLS
/// handshake. The listener's client verifier has already accepted it.
#[derive(Debug, Clone)]
pub struct PeerCertificate {
    end_entity: CertificateDer<'static>,
}

impl PeerCertificate {
    #[must_use]
    pub const fn new(end_entity: CertificateDer<'static>) -> Self {
        Self { end_entity }
    }

    /// The leaf certificate of a completed server-side handshake, if the
    /// client presented one.
    #[must_use]
    pub fn from_connection(conn: &rustls::ServerConnection) -> Option<Self> {
        conn.peer_certificates()
            .and_then(|certs| certs.first())
            .map(|cert| Self::new(cert.clone()))
    }

    /// Whether the certificate is issued for `domain`.
    #[must_use]
    pub fn is_valid_for(&self, domain: &str) -> bool {
        let Ok(name) = ServerName::try_from(domain.to_ascii_lowercase()) else {
            return false;
        };
        ParsedCertificate::try_from(&self.end_entity)
            .and_then(|cert| verify_server_name(&cert, &name))
            .is_ok()
    }
}
