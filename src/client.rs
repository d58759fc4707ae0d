//! Quill protocol client
//!
//! Every call opens a fresh connection, sends one request and reads one
//! response, the same way a peer server delivers a federated message.

use crate::config::ClientConfig;
use crate::connection::{self, decode_response, tls_connector};
use crate::error::Result;
use crate::protocol::{
    FetchPayload, FetchResponsePayload, Packet, PacketType, PingResponsePayload, SendPayload,
    SendResponsePayload,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_rustls::TlsConnector;
use tracing::debug;

/// Client for a single Quill server
pub struct QuillClient {
    config: ClientConfig,
    connector: Option<TlsConnector>,
}

impl QuillClient {
    /// # Errors
    ///
    /// Returns an error if the configured CA bundle cannot be loaded.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let connector = if config.plaintext {
            None
        } else {
            Some(tls_connector(config.trust.load()?, None)?)
        };
        Ok(Self { config, connector })
    }

    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Check that the server answers.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails or the server answers
    /// with an error.
    pub async fn ping(&self) -> Result<PingResponsePayload> {
        self.request(PacketType::Ping, &serde_json::json!({}), PacketType::PingResponse)
            .await
    }

    /// Send a message as the configured account.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails or the server rejects the
    /// message.
    pub async fn send(&self, payload: &SendPayload) -> Result<SendResponsePayload> {
        self.request(PacketType::Send, payload, PacketType::SendResponse)
            .await
    }

    /// Fetch a page of messages.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails or the server rejects the
    /// query.
    pub async fn fetch(&self, payload: &FetchPayload) -> Result<FetchResponsePayload> {
        self.request(PacketType::Fetch, payload, PacketType::FetchResponse)
            .await
    }

    async fn request<P: Serialize + Sync, T: DeserializeOwned>(
        &self,
        kind: PacketType,
        payload: &P,
        expected: PacketType,
    ) -> Result<T> {
        let mut packet = Packet::new(kind, payload);
        if let Some(token) = &self.config.token {
            packet = packet.with_session_token(token.clone());
        }

        let host = self.config.host.as_str();
        let port = self.config.port;
        debug!(packet_type = %packet.kind, host, port, "sending request");

        let response = match &self.connector {
            Some(connector) => {
                let mut stream = connection::connect_tls(connector, host, port).await?;
                connection::exchange(&mut stream, packet).await?
            }
            None => {
                let mut stream = connection::connect_plain(host, port).await?;
                connection::exchange(&mut stream, packet).await?
            }
        };

        decode_response(host, &response, &expected)
    }
}
