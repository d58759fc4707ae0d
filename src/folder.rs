//! Mailbox folder types
//!
//! Provides a strongly-typed enum for mailbox folders instead of raw
//! strings. The two folders the server writes to, `inbox` and `sent`,
//! have dedicated variants. Any other name uses the `Custom` variant.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A named partition of a user's mailbox entries.
///
/// # Examples
///
/// ```
/// use quill_server::Folder;
///
/// assert_eq!(Folder::from("INBOX"), Folder::Inbox);
/// assert_eq!(Folder::Sent.as_str(), "sent");
///
/// let custom = Folder::custom("Receipts");
/// assert_eq!(custom.as_str(), "Receipts");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Folder {
    /// Messages received by the user.
    #[default]
    Inbox,
    /// Messages sent by the user.
    Sent,
    /// Any other folder name.
    Custom(String),
}

impl Folder {
    #[must_use]
    pub fn custom(name: impl Into<String>) -> Self {
        Self::from(name.into())
    }

    /// The folder name as stored in mailbox entries.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Inbox => "inbox",
            Self::Sent => "sent",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for Folder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Folder {
    fn from(s: &str) -> Self {
        let name = s.trim();
        if name.eq_ignore_ascii_case("inbox") {
            Self::Inbox
        } else if name.eq_ignore_ascii_case("sent") {
            Self::Sent
        } else {
            Self::Custom(name.to_string())
        }
    }
}

impl From<String> for Folder {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<Folder> for String {
    fn from(folder: Folder) -> Self {
        match folder {
            Folder::Custom(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_names() {
        assert_eq!(Folder::Inbox.as_str(), "inbox");
        assert_eq!(Folder::Sent.as_str(), "sent");
    }

    #[test]
    fn parsing_is_case_insensitive_for_known_folders() {
        assert_eq!(Folder::from("inbox"), Folder::Inbox);
        assert_eq!(Folder::from("Inbox"), Folder::Inbox);
        assert_eq!(Folder::from("SENT"), Folder::Sent);
    }

    #[test]
    fn unknown_becomes_custom() {
        assert_eq!(
            Folder::from("Receipts"),
            Folder::Custom("Receipts".to_string())
        );
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&Folder::Sent).unwrap();
        assert_eq!(json, "\"sent\"");
        let back: Folder = serde_json::from_str("\"INBOX\"").unwrap();
        assert_eq!(back, Folder::Inbox);
    }

    #[test]
    fn default_is_inbox() {
        assert_eq!(Folder::default(), Folder::Inbox);
    }
}
