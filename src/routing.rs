//! Message routing: internal sends and inbound federated deliveries
//!
//! [`MessageRouter::send`] decides the direction from the sender's
//! domain. Internal sends get server-assigned identifiers and fan out to
//! local inboxes, with foreign recipients reported as queued for
//! federation. External sends are deliveries from a peer server and must
//! carry the identifiers the origin server assigned.

use crate::address::{self, Address};
use crate::error::{Error, Result};
use crate::model::{Attachment, ContentPart, MailboxEntry, Message, MessageOptions};
use crate::protocol::SendPayload;
use crate::storage::{Storage, StoreError};
use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A validated send request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub message_id: Option<String>,
    pub thread_id: Option<String>,
    pub from: Address,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub bcc: Vec<Address>,
    pub subject: String,
    pub body: Vec<ContentPart>,
    pub attachments: Vec<Attachment>,
    pub options: MessageOptions,
}

impl SendRequest {
    /// Validate a wire payload sent by `from`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidPayload`] when there is no recipient or an
    ///   attachment is incomplete
    /// - [`Error::InvalidDomain`] for a malformed address
    /// - [`Error::InvalidContentType`] for an unsupported body part
    pub fn from_payload(payload: &SendPayload, from: Address) -> Result<Self> {
        if payload.to.is_empty() && payload.cc.is_empty() && payload.bcc.is_empty() {
            return Err(Error::InvalidPayload("at least one recipient is required".into()));
        }

        let body = payload
            .body
            .content
            .iter()
            .map(ContentPart::try_from)
            .collect::<Result<Vec<_>>>()?;
        let attachments = payload
            .attachments
            .iter()
            .map(Attachment::try_from)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            message_id: payload.message_id.clone(),
            thread_id: payload.options.thread_id.clone(),
            from,
            to: address::parse_all(&payload.to)?,
            cc: address::parse_all(&payload.cc)?,
            bcc: address::parse_all(&payload.bcc)?,
            subject: payload.subject.clone(),
            body,
            attachments,
            options: MessageOptions {
                expires_in_seconds: payload.options.expires_in_seconds,
                one_time: payload.options.one_time,
            },
        })
    }

    /// Distinct recipients across `to`, `cc` and `bcc`, in that order.
    #[must_use]
    pub fn recipients(&self) -> Vec<&Address> {
        let mut seen: Vec<&Address> = Vec::new();
        for addr in self.to.iter().chain(&self.cc).chain(&self.bcc) {
            if !seen.iter().any(|s| s.same_mailbox(addr)) {
                seen.push(addr);
            }
        }
        seen
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The sender belongs to this server.
    Internal,
    /// A peer server is delivering a message its user sent.
    External,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub message_id: String,
    pub thread_id: String,
    pub direction: Direction,
    pub delivered_to: Vec<String>,
    pub queued_for: Vec<String>,
}

/// Routes messages into local mailboxes.
#[derive(Clone)]
pub struct MessageRouter {
    domain: String,
    storage: Storage,
}

impl MessageRouter {
    #[must_use]
    pub fn new(domain: impl Into<String>, storage: Storage) -> Self {
        Self {
            domain: domain.into(),
            storage,
        }
    }

    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    #[must_use]
    pub fn direction_of(&self, sender: &Address) -> Direction {
        if sender.is_in(&self.domain) {
            Direction::Internal
        } else {
            Direction::External
        }
    }

    /// Persist a message and fan it out to local mailboxes.
    ///
    /// # Errors
    ///
    /// Validation errors for malformed identifiers,
    /// [`Error::DuplicateMessage`] when a federated message was already
    /// stored, and [`Error::Storage`] on backend failure.
    pub async fn send(&self, request: &SendRequest) -> Result<SendOutcome> {
        match self.direction_of(&request.from) {
            Direction::Internal => self.send_internal(request).await,
            Direction::External => self.send_external(request).await,
        }
    }

    async fn send_internal(&self, request: &SendRequest) -> Result<SendOutcome> {
        let message_id = request
            .message_id
            .as_deref()
            .map(|id| canonical_uuid(id, "message ID"))
            .transpose()?
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let thread_id = request
            .thread_id
            .as_deref()
            .map(|id| canonical_uuid(id, "thread ID"))
            .transpose()?
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let message = build_message(request, message_id, thread_id);

        let (local, foreign): (Vec<&Address>, Vec<&Address>) = request
            .recipients()
            .into_iter()
            .partition(|addr| addr.is_in(&self.domain));

        let mut entries = Vec::with_capacity(local.len() + 1);
        entries.push(MailboxEntry::sent(request.from.as_str(), &message));
        entries.extend(
            local
                .iter()
                .map(|addr| MailboxEntry::inbox(addr.as_str(), &message, message.sent_at)),
        );

        self.persist(&message, &entries).await?;

        let outcome = SendOutcome {
            message_id: message.message_id,
            thread_id: message.thread_id,
            direction: Direction::Internal,
            delivered_to: local.iter().map(|a| a.to_string()).collect(),
            queued_for: foreign.iter().map(|a| a.to_string()).collect(),
        };
        info!(
            message_id = %outcome.message_id,
            from = %request.from,
            delivered = outcome.delivered_to.len(),
            queued = outcome.queued_for.len(),
            "internal message stored"
        );
        Ok(outcome)
    }

    async fn send_external(&self, request: &SendRequest) -> Result<SendOutcome> {
        let message_id = request
            .message_id
            .as_deref()
            .ok_or_else(|| Error::InvalidPayload("federated message requires a message_id".into()))
            .and_then(|id| canonical_uuid(id, "message ID"))?;
        let thread_id = request
            .thread_id
            .as_deref()
            .ok_or_else(|| Error::InvalidPayload("federated message requires a thread_id".into()))
            .and_then(|id| canonical_uuid(id, "thread ID"))?;

        if self.storage.messages.exists(&message_id).await? {
            debug!(%message_id, from = %request.from, "federated message already stored");
            return Err(Error::DuplicateMessage(message_id));
        }

        let message = build_message(request, message_id, thread_id);
        let received_at = Utc::now();
        let local: Vec<&Address> = request
            .recipients()
            .into_iter()
            .filter(|addr| addr.is_in(&self.domain))
            .collect();

        let entries: Vec<MailboxEntry> = local
            .iter()
            .map(|addr| MailboxEntry::inbox(addr.as_str(), &message, received_at))
            .collect();

        self.persist(&message, &entries).await?;

        info!(
            message_id = %message.message_id,
            from = %request.from,
            delivered = local.len(),
            "federated message accepted"
        );
        Ok(SendOutcome {
            message_id: message.message_id,
            thread_id: message.thread_id,
            direction: Direction::External,
            delivered_to: local.iter().map(|a| a.to_string()).collect(),
            queued_for: Vec::new(),
        })
    }

    /// Store the message, then its mailbox entries. If the entries cannot
    /// be written the message is deleted again.
    async fn persist(&self, message: &Message, entries: &[MailboxEntry]) -> Result<()> {
        self.storage
            .messages
            .insert(message)
            .await
            .map_err(|e| match e {
                StoreError::Duplicate(id) => Error::DuplicateMessage(id),
                other => Error::Storage(other),
            })?;

        if let Err(e) = self.storage.mailboxes.insert_many(entries).await {
            match self.storage.messages.delete(&message.message_id).await {
                Ok(_) => warn!(
                    message_id = %message.message_id,
                    error = %e,
                    "mailbox write failed, message removed"
                ),
                Err(cleanup) => error!(
                    message_id = %message.message_id,
                    error = %e,
                    cleanup_error = %cleanup,
                    "mailbox write failed, orphaned message left in storage"
                ),
            }
            return Err(e.into());
        }
        Ok(())
    }
}

fn build_message(request: &SendRequest, message_id: String, thread_id: String) -> Message {
    Message {
        message_id,
        thread_id,
        from: request.from.to_string(),
        to: request.to.iter().map(ToString::to_string).collect(),
        cc: request.cc.iter().map(ToString::to_string).collect(),
        bcc: request.bcc.iter().map(ToString::to_string).collect(),
        subject: request.subject.clone(),
        body: request.body.clone(),
        attachments: request.attachments.clone(),
        sent_at: Utc::now(),
        options: request.options.clone(),
    }
}

/// Parse a UUID and return it in lowercase hyphenated form.
fn canonical_uuid(id: &str, what: &str) -> Result<String> {
    Uuid::parse_str(id.trim())
        .map(|uuid| uuid.to_string())
        .map_err(|_| Error::InvalidPayload(format!("invalid {what}: must be a UUID")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::folder::Folder;
    use crate::protocol::{BodyPayload, ContentPartPayload, SendOptionsPayload};
    use crate::storage::{
        MailboxFilter, MailboxStore, MemoryStore, MessageStore, Page, StoreResult,
    };
    use async_trait::async_trait;
    use std::sync::Arc;

    const DOMAIN: &str = "local.domain";

    fn payload(to: &[&str]) -> SendPayload {
        SendPayload {
            to: to.iter().map(ToString::to_string).collect(),
            subject: "Lunch".into(),
            body: BodyPayload {
                content: vec![ContentPartPayload {
                    kind: "text/plain".into(),
                    value: "noon?".into(),
                }],
            },
            ..SendPayload::default()
        }
    }

    fn request(from: &str, payload: &SendPayload) -> SendRequest {
        SendRequest::from_payload(payload, Address::parse(from).unwrap()).unwrap()
    }

    fn router() -> (MessageRouter, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (
            MessageRouter::new(DOMAIN, Storage::from_store(store.clone())),
            store,
        )
    }

    #[test]
    fn rejects_empty_recipient_list() {
        let err = SendRequest::from_payload(
            &payload(&[]),
            Address::parse("alice~local.domain").unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidPayload(_)));
    }

    #[test]
    fn rejects_malformed_recipient() {
        let err = SendRequest::from_payload(
            &payload(&["bob"]),
            Address::parse("alice~local.domain").unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidDomain(_)));
    }

    #[test]
    fn rejects_unknown_content_type() {
        let mut p = payload(&["bob~local.domain"]);
        p.body.content[0].kind = "application/pdf".into();
        let err =
            SendRequest::from_payload(&p, Address::parse("alice~local.domain").unwrap())
                .unwrap_err();
        assert!(matches!(err, Error::InvalidContentType(_)));
    }

    #[test]
    fn recipients_are_distinct() {
        let mut p = payload(&["bob~local.domain", "carol~remote.domain"]);
        p.cc = vec!["bob~LOCAL.domain".into()];
        p.bcc = vec!["dave~local.domain".into()];
        let req = request("alice~local.domain", &p);
        let names: Vec<_> = req.recipients().iter().map(|a| a.local_part()).collect();
        assert_eq!(names, ["bob", "carol", "dave"]);
    }

    #[tokio::test]
    async fn internal_send_fans_out_locally() {
        let (router, store) = router();
        let req = request("alice~local.domain", &payload(&["bob~local.domain"]));

        let outcome = router.send(&req).await.unwrap();
        assert_eq!(outcome.direction, Direction::Internal);
        assert!(Uuid::parse_str(&outcome.message_id).is_ok());
        assert!(Uuid::parse_str(&outcome.thread_id).is_ok());
        assert_eq!(outcome.delivered_to, ["bob~local.domain"]);
        assert!(outcome.queued_for.is_empty());

        let sent = store
            .find(
                &MailboxFilter::folder("alice~local.domain", Folder::Sent),
                Page { offset: 0, limit: 10 },
            )
            .await
            .unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].read);

        let inbox = store
            .find(
                &MailboxFilter::folder("bob~local.domain", Folder::Inbox),
                Page { offset: 0, limit: 10 },
            )
            .await
            .unwrap();
        assert_eq!(inbox.len(), 1);
        assert!(!inbox[0].read);
        assert_eq!(inbox[0].message_id, outcome.message_id);
    }

    #[tokio::test]
    async fn foreign_recipients_are_queued() {
        let (router, store) = router();
        let req = request(
            "alice~local.domain",
            &payload(&["carol~remote.domain", "bob~local.domain"]),
        );
        let outcome = router.send(&req).await.unwrap();
        assert_eq!(outcome.delivered_to, ["bob~local.domain"]);
        assert_eq!(outcome.queued_for, ["carol~remote.domain"]);

        let carol = MailboxFilter::folder("carol~remote.domain", Folder::Inbox);
        assert_eq!(store.count(&carol).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn supplied_ids_are_canonicalized() {
        let (router, _) = router();
        let mut p = payload(&["bob~local.domain"]);
        p.message_id = Some("6F9619FF-8B86-D011-B42D-00C04FC964FF".into());
        let outcome = router.send(&request("alice~local.domain", &p)).await.unwrap();
        assert_eq!(outcome.message_id, "6f9619ff-8b86-d011-b42d-00c04fc964ff");
    }

    #[tokio::test]
    async fn malformed_supplied_id_is_rejected() {
        let (router, _) = router();
        let mut p = payload(&["bob~local.domain"]);
        p.options.thread_id = Some("not-a-uuid".into());
        let err = router
            .send(&request("alice~local.domain", &p))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPayload(_)));
    }

    fn federated(message_id: &str) -> SendPayload {
        SendPayload {
            message_id: Some(message_id.into()),
            options: SendOptionsPayload {
                thread_id: Some(Uuid::new_v4().to_string()),
                ..SendOptionsPayload::default()
            },
            ..payload(&["bob~local.domain", "zed~third.domain"])
        }
    }

    #[tokio::test]
    async fn federated_delivery_is_idempotent() {
        let (router, store) = router();
        let id = Uuid::new_v4().to_string();
        let req = request("carol~remote.domain", &federated(&id));

        let outcome = router.send(&req).await.unwrap();
        assert_eq!(outcome.direction, Direction::External);
        assert_eq!(outcome.message_id, id);
        assert_eq!(outcome.delivered_to, ["bob~local.domain"]);
        assert!(outcome.queued_for.is_empty());

        let err = router.send(&req).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateMessage(dup) if dup == id));

        let bob = MailboxFilter::folder("bob~local.domain", Folder::Inbox);
        assert_eq!(store.count(&bob).await.unwrap(), 1);
        let carol = MailboxFilter::folder("carol~remote.domain", Folder::Sent);
        assert_eq!(store.count(&carol).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn federated_delivery_requires_ids() {
        let (router, _) = router();
        let req = request("carol~remote.domain", &payload(&["bob~local.domain"]));
        let err = router.send(&req).await.unwrap_err();
        assert!(matches!(err, Error::InvalidPayload(_)));
    }

    struct BrokenMailboxes;

    #[async_trait]
    impl MailboxStore for BrokenMailboxes {
        async fn insert_many(&self, _: &[MailboxEntry]) -> StoreResult<()> {
            Err(StoreError::Backend("disk full".into()))
        }

        async fn count(&self, _: &MailboxFilter) -> StoreResult<usize> {
            Ok(0)
        }

        async fn find(&self, _: &MailboxFilter, _: Page) -> StoreResult<Vec<MailboxEntry>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn failed_fanout_removes_message() {
        let store = Arc::new(MemoryStore::new());
        let storage = Storage {
            messages: store.clone(),
            mailboxes: Arc::new(BrokenMailboxes),
            users: store.clone(),
        };
        let router = MessageRouter::new(DOMAIN, storage);
        let id = Uuid::new_v4().to_string();
        let req = request("carol~remote.domain", &federated(&id));

        let err = router.send(&req).await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert!(!store.exists(&id).await.unwrap());
    }
}
