//! Thread and folder retrieval
//!
//! A fetch resolves the caller's quill address, counts the matching
//! mailbox entries, loads one page of them newest first and joins the
//! page with the stored messages.

use crate::auth::AuthenticatedIdentity;
use crate::error::{Error, Result};
use crate::folder::Folder;
use crate::model::Message;
use crate::protocol::{FetchPayload, FetchResponsePayload, MessageView, Status};
use crate::storage::{MailboxFilter, Page, Selector, Storage};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Thread,
    Folder,
}

impl FetchMode {
    /// Parse the `mode` field. An empty mode means folder.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMode`] for anything but `thread` or
    /// `folder`.
    pub fn parse(mode: &str) -> Result<Self> {
        let mode = mode.trim();
        if mode.is_empty() || mode.eq_ignore_ascii_case("folder") {
            Ok(Self::Folder)
        } else if mode.eq_ignore_ascii_case("thread") {
            Ok(Self::Thread)
        } else {
            Err(Error::InvalidMode(format!(
                "{mode:?}; must be \"thread\" or \"folder\""
            )))
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Thread => "thread",
            Self::Folder => "folder",
        }
    }
}

impl fmt::Display for FetchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchQuery {
    pub mode: FetchMode,
    pub selector: Selector,
    pub page: Page,
}

impl FetchQuery {
    /// Normalize a wire request. A mode without its parameter selects
    /// the inbox; the limit defaults to [`DEFAULT_LIMIT`] and is capped at
    /// [`MAX_LIMIT`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMode`] for an unknown mode.
    pub fn from_payload(payload: &FetchPayload) -> Result<Self> {
        let mode = FetchMode::parse(&payload.mode)?;
        let non_blank = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let selector = match mode {
            FetchMode::Thread => non_blank(&payload.thread_id).map(Selector::Thread),
            FetchMode::Folder => non_blank(&payload.folder).map(|f| Selector::Folder(f.into())),
        }
        .unwrap_or(Selector::Folder(Folder::Inbox));

        let limit = match payload.limit {
            None | Some(0) => DEFAULT_LIMIT,
            Some(n) => n.min(MAX_LIMIT),
        };

        Ok(Self {
            mode,
            selector,
            page: Page {
                offset: payload.offset.unwrap_or(0),
                limit,
            },
        })
    }
}

/// A message together with the reader's `read` flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    pub message: Message,
    pub read: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    pub mode: FetchMode,
    /// The reader's quill address.
    pub owner: String,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub messages: Vec<FetchedMessage>,
}

impl FetchResult {
    #[must_use]
    pub fn to_response(&self) -> FetchResponsePayload {
        FetchResponsePayload {
            status: Status::Ok,
            mode: self.mode.to_string(),
            messages: self
                .messages
                .iter()
                .map(|m| MessageView::for_reader(&m.message, m.read, &self.owner))
                .collect(),
            total: self.total,
            limit: self.limit,
            offset: self.offset,
        }
    }
}

#[derive(Clone)]
pub struct FetchEngine {
    storage: Storage,
}

impl FetchEngine {
    #[must_use]
    pub const fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Run `query` for `identity`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotAuthenticated`] when there is no identity or
    /// the identity has no account, and [`Error::Storage`] on backend
    /// failure.
    pub async fn fetch(
        &self,
        query: &FetchQuery,
        identity: Option<&AuthenticatedIdentity>,
    ) -> Result<FetchResult> {
        let identity = identity.ok_or(Error::NotAuthenticated)?;
        let owner = self
            .storage
            .users
            .find_mail_by_id(identity.user_id())
            .await?
            .ok_or(Error::NotAuthenticated)?;

        let filter = MailboxFilter::new(&owner, query.selector.clone());
        let total = self.storage.mailboxes.count(&filter).await?;
        let entries = self.storage.mailboxes.find(&filter, query.page).await?;

        let ids: Vec<String> = entries.iter().map(|e| e.message_id.clone()).collect();
        let mut by_id: HashMap<String, Message> = self
            .storage
            .messages
            .find_by_ids(&ids)
            .await?
            .into_iter()
            .map(|m| (m.message_id.clone(), m))
            .collect();

        let messages: Vec<FetchedMessage> = entries
            .iter()
            .filter_map(|entry| {
                let message = by_id.remove(&entry.message_id);
                if message.is_none() {
                    warn!(message_id = %entry.message_id, owner = %owner, "mailbox entry without message");
                }
                message.map(|message| FetchedMessage {
                    message,
                    read: entry.read,
                })
            })
            .collect();

        debug!(
            owner = %owner,
            mode = %query.mode,
            total,
            returned = messages.len(),
            "fetch complete"
        );

        Ok(FetchResult {
            mode: query.mode,
            owner,
            total,
            limit: query.page.limit,
            offset: query.page.offset,
            messages,
        })
    }
}
