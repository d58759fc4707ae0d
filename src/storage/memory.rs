//! In-memory storage backend

use super::{
    MailboxFilter, MailboxStore, MessageStore, Page, StoreError, StoreResult, UserStore,
};
use crate::address::canonical_mailbox;
use crate::model::{MailboxEntry, Message, User};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Collections {
    messages: HashMap<String, Message>,
    /// Kept in insertion order.
    mailboxes: Vec<MailboxEntry>,
    users: HashMap<String, User>,
}

/// A process-local store implementing every collection trait.
///
/// All collections sit behind one mutex, which is never held across an
/// await point.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Collections>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Collections>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert(&self, message: &Message) -> StoreResult<()> {
        let mut db = self.lock()?;
        if db.messages.contains_key(&message.message_id) {
            return Err(StoreError::Duplicate(message.message_id.clone()));
        }
        db.messages
            .insert(message.message_id.clone(), message.clone());
        Ok(())
    }

    async fn find_by_id(&self, message_id: &str) -> StoreResult<Option<Message>> {
        Ok(self.lock()?.messages.get(message_id).cloned())
    }

    async fn find_by_ids(&self, message_ids: &[String]) -> StoreResult<Vec<Message>> {
        let db = self.lock()?;
        Ok(message_ids
            .iter()
            .filter_map(|id| db.messages.get(id).cloned())
            .collect())
    }

    async fn exists(&self, message_id: &str) -> StoreResult<bool> {
        Ok(self.lock()?.messages.contains_key(message_id))
    }

    async fn delete(&self, message_id: &str) -> StoreResult<bool> {
        Ok(self.lock()?.messages.remove(message_id).is_some())
    }
}

#[async_trait]
impl MailboxStore for MemoryStore {
    async fn insert_many(&self, entries: &[MailboxEntry]) -> StoreResult<()> {
        self.lock()?.mailboxes.extend_from_slice(entries);
        Ok(())
    }

    async fn count(&self, filter: &MailboxFilter) -> StoreResult<usize> {
        Ok(self
            .lock()?
            .mailboxes
            .iter()
            .filter(|e| filter.matches(e))
            .count())
    }

    async fn find(&self, filter: &MailboxFilter, page: Page) -> StoreResult<Vec<MailboxEntry>> {
        let db = self.lock()?;
        // Newest insertion first, then a stable sort so equal timestamps
        // keep that order.
        let mut matching: Vec<&MailboxEntry> =
            db.mailboxes.iter().rev().filter(|e| filter.matches(e)).collect();
        matching.sort_by(|a, b| b.received_at.cmp(&a.received_at));

        Ok(matching
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn insert_if_absent(&self, user: &User) -> StoreResult<bool> {
        let mut db = self.lock()?;
        let mail = canonical_mailbox(&user.quill_mail);
        let taken = db.users.contains_key(&user.users_uid)
            || db
                .users
                .values()
                .any(|u| canonical_mailbox(&u.quill_mail) == mail);
        if taken {
            return Ok(false);
        }
        db.users.insert(user.users_uid.clone(), user.clone());
        Ok(true)
    }

    async fn find_mail_by_id(&self, users_uid: &str) -> StoreResult<Option<String>> {
        Ok(self
            .lock()?
            .users
            .get(users_uid)
            .map(|u| canonical_mailbox(&u.quill_mail)))
    }
}
