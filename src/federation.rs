//! Outbound delivery to peer servers
//!
//! After an internal send the recipients on other domains are grouped
//! by domain and each domain receives exactly one SEND over its own TLS
//! connection, carrying the identifiers this server assigned. There is
//! no retry; failures are reported back to the sender.

use crate::address::Address;
use crate::connection::{self, decode_response};
use crate::error::{Error, Result};
use crate::protocol::{
    AttachmentPayload, BodyPayload, Packet, PacketType, SendOptionsPayload, SendPayload,
    SendResponsePayload,
};
use crate::routing::{SendOutcome, SendRequest};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

/// Delivers a SEND to the server that owns `peer_domain`.
#[async_trait]
pub trait Federation: Send + Sync {
    /// # Errors
    ///
    /// [`Error::PeerUnreachable`] when no answer could be obtained,
    /// [`Error::PeerRejected`] when the peer answered with an error, and
    /// [`Error::ProtocolMismatch`] when the answer is not a
    /// `SEND_RESPONSE`.
    async fn deliver(&self, peer_domain: &str, payload: &SendPayload)
    -> Result<SendResponsePayload>;
}

/// Where a peer server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddr {
    pub host: String,
    pub port: u16,
}

/// Maps domains to peer endpoints. Domains without an explicit entry are
/// dialed by name on the default port.
#[derive(Debug, Clone)]
pub struct PeerDirectory {
    peers: HashMap<String, PeerAddr>,
    default_port: u16,
}

impl PeerDirectory {
    #[must_use]
    pub fn new(default_port: u16) -> Self {
        Self {
            peers: HashMap::new(),
            default_port,
        }
    }

    #[must_use]
    pub fn with_peer(mut self, domain: &str, host: impl Into<String>, port: u16) -> Self {
        self.insert(domain, PeerAddr { host: host.into(), port });
        self
    }

    pub fn insert(&mut self, domain: &str, addr: PeerAddr) {
        self.peers.insert(domain.to_ascii_lowercase(), addr);
    }

    #[must_use]
    pub fn resolve(&self, domain: &str) -> PeerAddr {
        self.peers
            .get(&domain.to_ascii_lowercase())
            .cloned()
            .unwrap_or_else(|| PeerAddr {
                host: domain.to_string(),
                port: self.default_port,
            })
    }
}

/// TLS federation client: one connection, one SEND, one answer.
pub struct FederationClient {
    directory: PeerDirectory,
    connector: TlsConnector,
    timeout: Duration,
}

impl FederationClient {
    #[must_use]
    pub const fn new(directory: PeerDirectory, connector: TlsConnector, timeout: Duration) -> Self {
        Self {
            directory,
            connector,
            timeout,
        }
    }

    async fn round_trip(&self, addr: &PeerAddr, packet: Packet) -> Result<Packet> {
        let mut stream = connection::connect_tls(&self.connector, &addr.host, addr.port).await?;
        connection::exchange(&mut stream, packet).await
    }
}

#[async_trait]
impl Federation for FederationClient {
    async fn deliver(
        &self,
        peer_domain: &str,
        payload: &SendPayload,
    ) -> Result<SendResponsePayload> {
        let addr = self.directory.resolve(peer_domain);
        let unreachable = |reason: String| Error::PeerUnreachable {
            peer: peer_domain.to_string(),
            reason,
        };
        debug!(peer = peer_domain, host = %addr.host, port = addr.port, "delivering to peer");

        let packet = Packet::new(PacketType::Send, payload);
        let response = tokio::time::timeout(self.timeout, self.round_trip(&addr, packet))
            .await
            .map_err(|_| unreachable(format!("no answer within {}s", self.timeout.as_secs())))?
            .map_err(|e| match e {
                Error::MalformedPacket(m) => Error::ProtocolMismatch(m),
                other => unreachable(other.to_string()),
            })?;

        decode_response(peer_domain, &response, &PacketType::SendResponse)
    }
}

/// One outbound SEND for one peer domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundDelivery {
    pub domain: String,
    /// The queued recipients living on `domain`.
    pub recipients: Vec<String>,
    pub payload: SendPayload,
}

/// Group the queued recipients of an internal send by domain.
///
/// Each payload keeps `to` and `cc` whole but only lists the blind
/// copies addressed to that domain.
#[must_use]
pub fn plan_deliveries(request: &SendRequest, outcome: &SendOutcome) -> Vec<OutboundDelivery> {
    let mut by_domain: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for queued in &outcome.queued_for {
        if let Ok(addr) = Address::parse(queued) {
            by_domain
                .entry(addr.domain().to_ascii_lowercase())
                .or_default()
                .push(addr.to_string());
        }
    }

    let strings = |list: &[Address]| list.iter().map(ToString::to_string).collect::<Vec<_>>();

    by_domain
        .into_iter()
        .map(|(domain, recipients)| {
            let payload = SendPayload {
                message_id: Some(outcome.message_id.clone()),
                from: Some(request.from.to_string()),
                to: strings(&request.to),
                cc: strings(&request.cc),
                bcc: request
                    .bcc
                    .iter()
                    .filter(|a| a.is_in(&domain))
                    .map(ToString::to_string)
                    .collect(),
                subject: request.subject.clone(),
                body: BodyPayload::from(request.body.as_slice()),
                attachments: request.attachments.iter().map(AttachmentPayload::from).collect(),
                options: SendOptionsPayload {
                    expires_in_seconds: request.options.expires_in_seconds,
                    one_time: request.options.one_time,
                    thread_id: Some(outcome.thread_id.clone()),
                },
            };
            info!(
                message_id = %outcome.message_id,
                peer = %domain,
                recipients = recipients.len(),
                "planned federated delivery"
            );
            OutboundDelivery {
                domain,
                recipients,
                payload,
            }
        })
        .collect()
}
