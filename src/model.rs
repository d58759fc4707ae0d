//! Stored documents: messages, mailbox entries and users

use crate::address::canonical_mailbox;
use crate::error::{Error, Result};
use crate::folder::Folder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The type of one body part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentType {
    #[serde(rename = "text/plain")]
    PlainText,
    #[serde(rename = "text/html")]
    Html,
}

impl ContentType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PlainText => "text/plain",
            Self::Html => "text/html",
        }
    }

    /// Parse a content type as it appears on the wire.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidContentType`] for anything other than
    /// `text/plain` or `text/html`.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "text/plain" => Ok(Self::PlainText),
            "text/html" => Ok(Self::Html),
            other => Err(Error::InvalidContentType(format!(
                "{other:?}; must be \"text/plain\" or \"text/html\""
            ))),
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One typed piece of a message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentPart {
    pub kind: ContentType,
    pub value: String,
}

/// Where an attachment's bytes live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentContent {
    /// Base64 content carried inside the message.
    Inline(String),
    /// A URL the recipient retrieves the content from.
    Url(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub mimetype: String,
    pub content: AttachmentContent,
}

/// Sender-chosen delivery options stored with the message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageOptions {
    pub expires_in_seconds: Option<u64>,
    pub one_time: bool,
}

/// A persisted message. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub thread_id: String,
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: Vec<ContentPart>,
    pub attachments: Vec<Attachment>,
    pub sent_at: DateTime<Utc>,
    pub options: MessageOptions,
}

/// A user's reference to a [`Message`] in one of their folders.
///
/// `user_id` holds the owner's quill address in canonical form (domain
/// lowercased): remote senders and recipients are only ever known to this
/// server by address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxEntry {
    pub user_id: String,
    pub message_id: String,
    pub thread_id: String,
    pub folder: Folder,
    pub read: bool,
    pub received_at: DateTime<Utc>,
}

impl MailboxEntry {
    /// The sender's copy, already marked read.
    #[must_use]
    pub fn sent(owner: &str, message: &Message) -> Self {
        Self {
            user_id: canonical_mailbox(owner),
            message_id: message.message_id.clone(),
            thread_id: message.thread_id.clone(),
            folder: Folder::Sent,
            read: true,
            received_at: message.sent_at,
        }
    }

    /// A recipient's unread inbox copy.
    #[must_use]
    pub fn inbox(owner: &str, message: &Message, received_at: DateTime<Utc>) -> Self {
        Self {
            user_id: canonical_mailbox(owner),
            message_id: message.message_id.clone(),
            thread_id: message.thread_id.clone(),
            folder: Folder::Inbox,
            read: false,
            received_at,
        }
    }
}

/// A registered account. Created by the account collaborator and only
/// read by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub users_uid: String,
    pub quill_mail: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub last_login: DateTime<Utc>,
}

impl User {
    #[must_use]
    pub fn new(
        users_uid: impl Into<String>,
        quill_mail: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            users_uid: users_uid.into(),
            quill_mail: canonical_mailbox(&quill_mail.into()),
            email: email.into(),
            created_at: now,
            last_login: now,
        }
    }
}
