//! Error types for quill-server

use crate::protocol::ErrorCode;
use crate::storage::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Unknown packet type: {0}")]
    UnknownType(String),

    #[error("Protocol mismatch: {0}")]
    ProtocolMismatch(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid content type: {0}")]
    InvalidContentType(String),

    #[error("Invalid fetch mode: {0}")]
    InvalidMode(String),

    #[error("Invalid address: {0}")]
    InvalidDomain(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Message {0} already exists")]
    DuplicateMessage(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Peer {peer} unreachable: {reason}")]
    PeerUnreachable { peer: String, reason: String },

    #[error("Peer {peer} rejected the request ({code}): {message}")]
    PeerRejected {
        peer: String,
        code: ErrorCode,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),
}

impl Error {
    /// The wire error code reported to clients for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownType(_) => ErrorCode::UnknownType,
            Self::MalformedPacket(_) | Self::ProtocolMismatch(_) | Self::InvalidPayload(_) => {
                ErrorCode::InvalidPayload
            }
            Self::InvalidContentType(_) => ErrorCode::InvalidContentType,
            Self::InvalidMode(_) => ErrorCode::InvalidMode,
            Self::InvalidDomain(_) => ErrorCode::InvalidDomain,
            Self::AuthFailed(_) | Self::NotAuthenticated => ErrorCode::AuthFailed,
            Self::DuplicateMessage(_) => ErrorCode::DuplicateMessage,
            Self::PeerUnreachable { .. } | Self::PeerRejected { .. } => ErrorCode::DeliveryFailed,
            Self::Storage(_) | Self::Config(_) | Self::Io(_) | Self::Tls(_) => {
                ErrorCode::ServiceError
            }
        }
    }

    /// The message reported to clients. Internal failures are replaced by
    /// a fixed text so backend details stay in the server log.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            Self::Storage(_) | Self::Config(_) | Self::Io(_) | Self::Tls(_) => {
                "The service could not complete the request.".to_string()
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
