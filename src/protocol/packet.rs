//! The packet envelope and its type tag

use crate::error::{Error, Result};
use crate::protocol::payload::{ErrorCode, ErrorResponsePayload, Status};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::fmt;
use tracing::error;

pub const PROTOCOL_NAME: &str = "quill";
pub const PROTOCOL_VERSION: &str = "1.0";

/// The `type` field of a packet.
///
/// Unrecognised tags are kept as [`PacketType::Unknown`] so the
/// dispatcher can answer them with `UNKNOWN_TYPE` instead of dropping
/// the connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PacketType {
    Send,
    Fetch,
    Ping,
    SendResponse,
    FetchResponse,
    ErrorResponse,
    PingResponse,
    Unknown(String),
}

impl PacketType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Send => "SEND",
            Self::Fetch => "FETCH",
            Self::Ping => "PING",
            Self::SendResponse => "SEND_RESPONSE",
            Self::FetchResponse => "FETCH_RESPONSE",
            Self::ErrorResponse => "ERROR_RESPONSE",
            Self::PingResponse => "PING_RESPONSE",
            Self::Unknown(tag) => tag,
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for PacketType {
    fn from(s: &str) -> Self {
        match s {
            "SEND" => Self::Send,
            "FETCH" => Self::Fetch,
            "PING" => Self::Ping,
            "SEND_RESPONSE" => Self::SendResponse,
            "FETCH_RESPONSE" => Self::FetchResponse,
            "ERROR_RESPONSE" => Self::ErrorResponse,
            "PING_RESPONSE" => Self::PingResponse,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl From<String> for PacketType {
    fn from(s: String) -> Self {
        match Self::from(s.as_str()) {
            Self::Unknown(_) => Self::Unknown(s),
            known => known,
        }
    }
}

impl From<PacketType> for String {
    fn from(kind: PacketType) -> Self {
        match kind {
            PacketType::Unknown(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

/// The wire envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Packet {
    pub protocol: String,
    pub version: String,
    #[serde(rename = "type")]
    pub kind: PacketType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: Option<Box<RawValue>>,
}

impl Packet {
    /// Build a packet stamped with the current time.
    pub fn new<T: Serialize>(kind: PacketType, payload: &T) -> Self {
        let payload = match serde_json::value::to_raw_value(payload) {
            Ok(raw) => Some(raw),
            Err(e) => {
                error!(packet_type = %kind, error = %e, "could not serialize packet payload");
                None
            }
        };

        Self {
            protocol: PROTOCOL_NAME.to_string(),
            version: PROTOCOL_VERSION.to_string(),
            kind,
            session_token: None,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// An `ERROR_RESPONSE` packet.
    #[must_use]
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(
            PacketType::ErrorResponse,
            &ErrorResponsePayload {
                status: Status::Error,
                code,
                message: message.into(),
            },
        )
    }

    #[must_use]
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    /// The session token, if one was sent and it is not blank.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.session_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Decode the payload as `T`. A missing or `null` payload decodes
    /// like an empty object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPayload`] when the payload does not match
    /// `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        let raw = match self.payload.as_deref().map(RawValue::get) {
            None | Some("null") => "{}",
            Some(raw) => raw,
        };
        serde_json::from_str(raw)
            .map_err(|e| Error::InvalidPayload(format!("Cannot parse {} payload: {e}", self.kind)))
    }

    /// Check that the packet speaks our protocol with a compatible
    /// major version.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolMismatch`] otherwise.
    pub fn check_protocol(&self) -> Result<()> {
        if !self.protocol.eq_ignore_ascii_case(PROTOCOL_NAME) {
            return Err(Error::ProtocolMismatch(format!(
                "unsupported protocol {:?}",
                self.protocol
            )));
        }
        if major(&self.version) != major(PROTOCOL_VERSION) {
            return Err(Error::ProtocolMismatch(format!(
                "unsupported version {:?}",
                self.version
            )));
        }
        Ok(())
    }
}

fn major(version: &str) -> &str {
    version.split('.').next().unwrap_or_default().trim()
}
