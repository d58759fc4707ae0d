//! Quill mail addresses
//!
//! A quill address has the form `localpart~domain`. The domain is the
//! text after the last `~` and decides which server owns the mailbox.

use crate::error::{Error, Result};
use std::fmt;

/// A validated `localpart~domain` address.
///
/// # Examples
///
/// ```
/// use quill_server::Address;
///
/// let bob = Address::parse("bob~local.domain").unwrap();
/// assert_eq!(bob.local_part(), "bob");
/// assert_eq!(bob.domain(), "local.domain");
/// assert!(bob.is_in("LOCAL.domain"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    value: String,
    separator: usize,
}

impl Address {
    /// Parse an address, trimming surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDomain`] when there is no `~`, or when the
    /// local part or the domain is empty.
    pub fn parse(input: &str) -> Result<Self> {
        let value = input.trim();
        let separator = value
            .rfind('~')
            .ok_or_else(|| Error::InvalidDomain(format!("{value:?} has no domain")))?;

        if separator == 0 {
            return Err(Error::InvalidDomain(format!("{value:?} has no local part")));
        }
        if separator + 1 == value.len() {
            return Err(Error::InvalidDomain(format!("{value:?} has an empty domain")));
        }

        Ok(Self {
            value: value.to_string(),
            separator,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    #[must_use]
    pub fn local_part(&self) -> &str {
        &self.value[..self.separator]
    }

    #[must_use]
    pub fn domain(&self) -> &str {
        &self.value[self.separator + 1..]
    }

    /// Whether this address belongs to `domain` (ASCII case-insensitive).
    #[must_use]
    pub fn is_in(&self, domain: &str) -> bool {
        self.domain().eq_ignore_ascii_case(domain)
    }

    /// Two addresses name the same mailbox when the local parts match
    /// exactly and the domains match case-insensitively.
    #[must_use]
    pub fn same_mailbox(&self, other: &Self) -> bool {
        self.local_part() == other.local_part() && other.is_in(self.domain())
    }

    /// The address with its domain lowercased. Mailbox owners are stored
    /// and looked up in this form, so two addresses have equal canonical
    /// forms exactly when they are the [`same_mailbox`](Self::same_mailbox).
    #[must_use]
    pub fn canonical(&self) -> String {
        canonical_mailbox(&self.value)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.value
    }
}

/// Lowercase the domain of a `localpart~domain` string, keeping the
/// local part as written. Text without a `~` is only trimmed.
#[must_use]
pub fn canonical_mailbox(raw: &str) -> String {
    let raw = raw.trim();
    match raw.rfind('~') {
        Some(sep) => format!("{}~{}", &raw[..sep], raw[sep + 1..].to_ascii_lowercase()),
        None => raw.to_string(),
    }
}

/// Parse every address in a list, stopping at the first malformed one.
///
/// # Errors
///
/// Returns [`Error::InvalidDomain`] for the first malformed address.
pub fn parse_all(inputs: &[String]) -> Result<Vec<Address>> {
    inputs.iter().map(|s| Address::parse(s)).collect()
}
