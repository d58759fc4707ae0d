//! Storage adapter interface
//!
//! The core talks to storage through three collection-style traits:
//! `messages`, `mailboxes` and `users`. Implementations are shared by
//! every connection task, so they must be safe for concurrent use and
//! enforce their own uniqueness rules (message id, user id, quill mail).
//!
//! [`MemoryStore`] implements all three for development and tests.

mod memory;

pub use memory::MemoryStore;

use crate::address::canonical_mailbox;
use crate::folder::Folder;
use crate::model::{MailboxEntry, Message, User};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("duplicate key: {0}")]
    Duplicate(String),

    #[error("backend failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert a message. Fails with [`StoreError::Duplicate`] when a
    /// message with the same id already exists.
    async fn insert(&self, message: &Message) -> StoreResult<()>;

    async fn find_by_id(&self, message_id: &str) -> StoreResult<Option<Message>>;

    /// Load every message whose id is in `message_ids`, in no particular
    /// order. Unknown ids are ignored.
    async fn find_by_ids(&self, message_ids: &[String]) -> StoreResult<Vec<Message>>;

    async fn exists(&self, message_id: &str) -> StoreResult<bool>;

    /// Remove a message. Returns whether it existed.
    async fn delete(&self, message_id: &str) -> StoreResult<bool>;
}

#[async_trait]
pub trait MailboxStore: Send + Sync {
    async fn insert_many(&self, entries: &[MailboxEntry]) -> StoreResult<()>;

    async fn count(&self, filter: &MailboxFilter) -> StoreResult<usize>;

    /// Entries matching `filter`, newest `received_at` first, with
    /// `page.offset` skipped and at most `page.limit` returned.
    async fn find(&self, filter: &MailboxFilter, page: Page) -> StoreResult<Vec<MailboxEntry>>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert `user` unless its uid or quill mail is taken. Quill mails
    /// are compared in canonical form: the local part is case-sensitive,
    /// the domain is not. Returns whether the user was created.
    async fn insert_if_absent(&self, user: &User) -> StoreResult<bool>;

    /// The quill address registered for `users_uid`, in canonical form.
    async fn find_mail_by_id(&self, users_uid: &str) -> StoreResult<Option<String>>;
}

/// Which of a user's entries a query selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Folder(Folder),
    Thread(String),
}

/// Selects one owner's entries. The owner is held in canonical form, so
/// filters built from `bob~LOCAL.DOMAIN` and `bob~local.domain` agree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxFilter {
    user_id: String,
    selector: Selector,
}

impl MailboxFilter {
    #[must_use]
    pub fn new(user_id: &str, selector: Selector) -> Self {
        Self {
            user_id: canonical_mailbox(user_id),
            selector,
        }
    }

    #[must_use]
    pub fn folder(user_id: &str, folder: Folder) -> Self {
        Self::new(user_id, Selector::Folder(folder))
    }

    #[must_use]
    pub fn thread(user_id: &str, thread_id: impl Into<String>) -> Self {
        Self::new(user_id, Selector::Thread(thread_id.into()))
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    #[must_use]
    pub const fn selector(&self) -> &Selector {
        &self.selector
    }

    #[must_use]
    pub fn matches(&self, entry: &MailboxEntry) -> bool {
        entry.user_id == self.user_id
            && match &self.selector {
                Selector::Folder(folder) => &entry.folder == folder,
                Selector::Thread(thread_id) => &entry.thread_id == thread_id,
            }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

/// Handles to the three collections, cloned into every component that
/// needs storage.
#[derive(Clone)]
pub struct Storage {
    pub messages: Arc<dyn MessageStore>,
    pub mailboxes: Arc<dyn MailboxStore>,
    pub users: Arc<dyn UserStore>,
}

impl Storage {
    /// All three collections backed by one [`MemoryStore`].
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_store(Arc::new(MemoryStore::new()))
    }

    #[must_use]
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: MessageStore + MailboxStore + UserStore + 'static,
    {
        Self {
            messages: store.clone(),
            mailboxes: store.clone(),
            users: store,
        }
    }
}
