//! Identity verification
//!
//! Credentials are issued elsewhere. This module only turns a bearer token
//! into one canonical [`IdentityClaim`], which every core operation trusts.

pub mod middleware;

use crate::core::error::{Error, Result};
use crate::core::models::IdentityClaim;
use crate::core::store::sessions::SessionRecord;
use crate::core::store::Store;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Verifies credentials issued by the external token issuer
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<IdentityClaim>;
}

/// Verifies tokens against the `sessions` table the issuer writes into
pub struct SessionVerifier {
    store: Arc<Store>,
}

impl SessionVerifier {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Issuer-side write: record a new session for an existing identity
    pub async fn issue_session(&self, identity_id: &str, ttl: Duration) -> Result<String> {
        if self.store.find_identity(identity_id).await?.is_none() {
            return Err(Error::InvalidUserId(identity_id.to_string()));
        }

        let now = Utc::now();
        let session = SessionRecord {
            token: Uuid::new_v4().to_string(),
            identity_id: identity_id.to_string(),
            created_at: now,
            expires_at: now + ttl,
        };
        self.store.insert_session(&session).await?;

        info!("[Auth] Session issued for {}", identity_id);
        Ok(session.token)
    }

    pub async fn revoke(&self, token: &str) -> Result<bool> {
        self.store.delete_session(token).await
    }
}

#[async_trait]
impl IdentityVerifier for SessionVerifier {
    async fn verify(&self, token: &str) -> Result<IdentityClaim> {
        if token.trim().is_empty() {
            return Err(Error::AuthenticationFailed("missing token"));
        }

        let session = self
            .store
            .find_session(token)
            .await?
            .ok_or(Error::AuthenticationFailed("invalid token"))?;

        if session.expires_at <= Utc::now() {
            warn!("[Auth] Expired session presented for {}", session.identity_id);
            return Err(Error::AuthenticationFailed("expired token"));
        }

        let identity = self
            .store
            .find_identity(&session.identity_id)
            .await?
            .ok_or(Error::AuthenticationFailed("identity no longer exists"))?;

        Ok(IdentityClaim {
            id: identity.id,
            display_name: identity.display_name,
        })
    }
}

/// Extract the token from an `Authorization: Bearer <token>` value
pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::Identity;
    use crate::core::store::test_support::temp_store;

    #[test]
    fn bearer_prefix_is_required() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer   "), None);
    }

    #[tokio::test]
    async fn issued_session_verifies_to_its_identity() {
        let (_dir, store) = temp_store().await;
        let store = Arc::new(store);
        store.upsert_identity(&Identity::new("a", "Alice")).await.unwrap();
        let verifier = SessionVerifier::new(store.clone());

        let token = verifier.issue_session("a", Duration::hours(1)).await.unwrap();
        let claim = verifier.verify(&token).await.unwrap();
        assert_eq!(claim.id, "a");
        assert_eq!(claim.display_name, "Alice");

        assert!(verifier.revoke(&token).await.unwrap());
        assert!(matches!(
            verifier.verify(&token).await,
            Err(Error::AuthenticationFailed(_))
        ));
    }

    #[tokio::test]
    async fn expired_and_unknown_tokens_fail() {
        let (_dir, store) = temp_store().await;
        let store = Arc::new(store);
        store.upsert_identity(&Identity::new("a", "Alice")).await.unwrap();
        let verifier = SessionVerifier::new(store.clone());

        let token = verifier.issue_session("a", Duration::seconds(-5)).await.unwrap();
        assert!(matches!(
            verifier.verify(&token).await,
            Err(Error::AuthenticationFailed("expired token"))
        ));
        assert!(matches!(
            verifier.verify("nope").await,
            Err(Error::AuthenticationFailed("invalid token"))
        ));
        assert!(matches!(
            verifier.issue_session("ghost", Duration::hours(1)).await,
            Err(Error::InvalidUserId(_))
        ));
    }
}
