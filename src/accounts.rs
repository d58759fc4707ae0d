//! Account seeding for development deployments
//!
//! Accounts are created by an external service in production. For local
//! and test deployments `quill serve` can load a JSON file of accounts
//! and their session tokens:
//!
//! ```json
//! [
//!   {"uid": "u-alice", "quill_mail": "alice~local.domain",
//!    "email": "alice@example.com", "token": "alice-token"}
//! ]
//! ```

use crate::address::Address;
use crate::auth::StaticTokenAuthenticator;
use crate::error::{Error, Result};
use crate::model::User;
use crate::storage::UserStore;
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccountSeed {
    pub uid: String,
    pub quill_mail: String,
    #[serde(default)]
    pub email: String,
    pub token: String,
}

/// Read an accounts file.
///
/// # Errors
///
/// Returns [`Error::Config`] when the file is unreadable or not a JSON
/// array of accounts.
pub async fn load_accounts(path: &Path) -> Result<Vec<AccountSeed>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::Config(format!("Cannot read {}: {e}", path.display())))?;
    serde_json::from_str(&raw)
        .map_err(|e| Error::Config(format!("Invalid accounts file {}: {e}", path.display())))
}

/// Register every account with the user store and its token with the
/// authenticator. Accounts whose uid or address is already taken keep
/// their existing record. Returns how many users were created.
///
/// # Errors
///
/// Returns [`Error::InvalidDomain`] for a malformed `quill_mail` and
/// [`Error::Storage`] on backend failure.
pub async fn seed_accounts(
    seeds: &[AccountSeed],
    users: &dyn UserStore,
    auth: &StaticTokenAuthenticator,
) -> Result<usize> {
    let mut created = 0;
    for seed in seeds {
        let address = Address::parse(&seed.quill_mail)?;
        let user = User::new(seed.uid.as_str(), address.as_str(), seed.email.as_str());
        if users.insert_if_absent(&user).await? {
            created += 1;
        } else {
            warn!(uid = %seed.uid, quill_mail = %address, "account already exists");
        }
        auth.insert(seed.token.as_str(), seed.uid.as_str());
    }
    info!(created, total = seeds.len(), "accounts seeded");
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Authenticator;
    use crate::storage::MemoryStore;

    fn seed(uid: &str, mail: &str, token: &str) -> AccountSeed {
        AccountSeed {
            uid: uid.into(),
            quill_mail: mail.into(),
            email: format!("{uid}@example.com"),
            token: token.into(),
        }
    }

    #[tokio::test]
    async fn seeds_users_and_tokens() {
        let store = MemoryStore::new();
        let auth = StaticTokenAuthenticator::new();
        let created = seed_accounts(
            &[
                seed("u-alice", "alice~local.domain", "t-alice"),
                seed("u-bob", "bob~local.domain", "t-bob"),
                seed("u-alice", "alice2~local.domain", "t-alice2"),
            ],
            &store,
            &auth,
        )
        .await
        .unwrap();

        assert_eq!(created, 2);
        assert_eq!(
            store.find_mail_by_id("u-bob").await.unwrap().as_deref(),
            Some("bob~local.domain")
        );
        assert_eq!(auth.authenticate("t-bob").await.unwrap().user_id(), "u-bob");
    }

    #[tokio::test]
    async fn malformed_address_is_rejected() {
        let store = MemoryStore::new();
        let auth = StaticTokenAuthenticator::new();
        let err = seed_accounts(&[seed("u", "no-domain", "t")], &store, &auth)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDomain(_)));
    }

    #[tokio::test]
    async fn loads_json_file() {
        let path = std::env::temp_dir().join(format!("quill-accounts-{}.json", uuid::Uuid::new_v4()));
        tokio::fs::write(
            &path,
            r#"[{"uid":"u-1","quill_mail":"one~local.domain","token":"t-1"}]"#,
        )
        .await
        .unwrap();

        let seeds = load_accounts(&path).await.unwrap();
        assert_eq!(seeds.len(), 1);
        assert_eq!(seeds[0].quill_mail, "one~local.domain");
        assert!(seeds[0].email.is_empty());

        tokio::fs::write(&path, "{}").await.unwrap();
        assert!(matches!(load_accounts(&path).await, Err(Error::Config(_))));
    }
}
