//! Request dispatch
//!
//! The [`Dispatcher`] turns one decoded packet into exactly one response
//! packet. It holds no per-connection state, so a single instance is
//! shared by every connection task.

use crate::address::Address;
use crate::auth::{AuthenticatedIdentity, Authenticator, PeerCertificate};
use crate::error::{Error, Result};
use crate::federation::{Federation, OutboundDelivery, plan_deliveries};
use crate::fetch::{FetchEngine, FetchQuery};
use crate::protocol::{
    DeliveryFailure, ErrorCode, FetchPayload, Packet, PacketType, PingResponsePayload, Request,
    SendPayload, SendResponsePayload, Status,
};
use crate::routing::{Direction, MessageRouter, SendOutcome, SendRequest};
use crate::storage::Storage;
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct Dispatcher {
    router: MessageRouter,
    fetcher: FetchEngine,
    storage: Storage,
    auth: Arc<dyn Authenticator>,
    federation: Arc<dyn Federation>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        domain: impl Into<String>,
        storage: Storage,
        auth: Arc<dyn Authenticator>,
        federation: Arc<dyn Federation>,
    ) -> Self {
        Self {
            router: MessageRouter::new(domain, storage.clone()),
            fetcher: FetchEngine::new(storage.clone()),
            storage,
            auth,
            federation,
        }
    }

    #[must_use]
    pub fn domain(&self) -> &str {
        self.router.domain()
    }

    /// Answer one packet from a connection without a peer certificate.
    pub async fn dispatch(&self, packet: Packet) -> Packet {
        self.dispatch_from(packet, None).await
    }

    /// Answer one packet. `peer` is the certificate the connecting server
    /// presented, if any. Failures become `ERROR_RESPONSE` packets.
    pub async fn dispatch_from(&self, packet: Packet, peer: Option<&PeerCertificate>) -> Packet {
        let kind = packet.kind.clone();
        match self.handle(&packet, peer).await {
            Ok(response) => response,
            Err(e) => {
                let code = e.code();
                if code == ErrorCode::ServiceError {
                    error!(packet_type = %kind, error = %e, "request failed");
                } else {
                    debug!(packet_type = %kind, code = %code, error = %e, "request rejected");
                }
                Packet::error(code, e.client_message())
            }
        }
    }

    async fn handle(&self, packet: &Packet, peer: Option<&PeerCertificate>) -> Result<Packet> {
        packet.check_protocol()?;

        let identity = match packet.token() {
            Some(token) => Some(self.auth.authenticate(token).await?),
            None => None,
        };

        match Request::from_packet(packet)? {
            Request::Ping => Ok(Packet::new(
                PacketType::PingResponse,
                &PingResponsePayload {
                    status: Status::Ok,
                    server_time: Utc::now(),
                },
            )),
            Request::Send(payload) => self.send(&payload, identity.as_ref(), peer).await,
            Request::Fetch(payload) => self.fetch(&payload, identity.as_ref()).await,
        }
    }

    async fn send(
        &self,
        payload: &SendPayload,
        identity: Option<&AuthenticatedIdentity>,
        peer: Option<&PeerCertificate>,
    ) -> Result<Packet> {
        let from = self.resolve_sender(payload, identity, peer).await?;
        let request = SendRequest::from_payload(payload, from)?;
        let outcome = self.router.send(&request).await?;

        let failures = if outcome.direction == Direction::Internal && !outcome.queued_for.is_empty()
        {
            self.federate(&request, &outcome).await
        } else {
            Vec::new()
        };

        Ok(Packet::new(
            PacketType::SendResponse,
            &SendResponsePayload {
                status: Status::Ok,
                message_id: outcome.message_id,
                thread_id: outcome.thread_id,
                delivered_to: outcome.delivered_to,
                queued_for: outcome.queued_for,
                failures,
            },
        ))
    }

    /// Work out who a SEND is from.
    ///
    /// An authenticated client always sends as its own account. A packet
    /// without a token is only accepted as a delivery from a peer server:
    /// its sender must live on another domain, and the connection must
    /// carry a client certificate issued for that domain.
    async fn resolve_sender(
        &self,
        payload: &SendPayload,
        identity: Option<&AuthenticatedIdentity>,
        peer: Option<&PeerCertificate>,
    ) -> Result<Address> {
        let claimed = payload
            .from
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty());

        let Some(identity) = identity else {
            let from = Address::parse(claimed.ok_or(Error::NotAuthenticated)?)?;
            if self.router.direction_of(&from) == Direction::Internal {
                return Err(Error::NotAuthenticated);
            }
            return match peer {
                Some(cert) if cert.is_valid_for(from.domain()) => Ok(from),
                Some(_) => Err(Error::AuthFailed(format!(
                    "peer certificate is not issued for {}",
                    from.domain()
                ))),
                None => Err(Error::NotAuthenticated),
            };
        };

        let mail = self
            .storage
            .users
            .find_mail_by_id(identity.user_id())
            .await?
            .ok_or(Error::NotAuthenticated)?;
        let account = Address::parse(&mail)?;

        match claimed {
            None => Ok(account),
            Some(claimed) => {
                let from = Address::parse(claimed)?;
                if from.same_mailbox(&account) {
                    Ok(account)
                } else {
                    Err(Error::InvalidPayload(format!(
                        "sender {from} does not match the authenticated account"
                    )))
                }
            }
        }
    }

    /// Deliver the queued recipients, one concurrent SEND per domain.
    async fn federate(&self, request: &SendRequest, outcome: &SendOutcome) -> Vec<DeliveryFailure> {
        let plans = plan_deliveries(request, outcome);
        let results = join_all(plans.iter().map(|plan| self.deliver(plan))).await;

        plans
            .iter()
            .zip(results)
            .filter_map(|(plan, result)| result.err().map(|e| (plan, e)))
            .flat_map(|(plan, e)| {
                let message = e.to_string();
                plan.recipients.iter().map(move |recipient| DeliveryFailure {
                    recipient: recipient.clone(),
                    code: ErrorCode::DeliveryFailed,
                    message: message.clone(),
                })
            })
            .collect()
    }

    async fn deliver(&self, plan: &OutboundDelivery) -> Result<()> {
        match self.federation.deliver(&plan.domain, &plan.payload).await {
            Ok(response) => {
                info!(
                    peer = %plan.domain,
                    message_id = %response.message_id,
                    delivered = response.delivered_to.len(),
                    "federated delivery accepted"
                );
                Ok(())
            }
            Err(Error::PeerRejected {
                code: ErrorCode::DuplicateMessage,
                ..
            }) => {
                info!(peer = %plan.domain, "peer already holds the message");
                Ok(())
            }
            Err(e) => {
                warn!(peer = %plan.domain, error = %e, "federated delivery failed");
                Err(e)
            }
        }
    }

    async fn fetch(
        &self,
        payload: &FetchPayload,
        identity: Option<&AuthenticatedIdentity>,
    ) -> Result<Packet> {
        let query = FetchQuery::from_payload(payload)?;
        let result = self.fetcher.fetch(&query, identity).await?;
        Ok(Packet::new(PacketType::FetchResponse, &result.to_response()))
    }
}
