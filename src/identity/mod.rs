//! Identity and session providers
//!
//! The conversation store scopes every query to the current identity and the
//! session gate decides routing from the presence of a session. Both consult
//! an [`IdentityProvider`] that is constructed explicitly and passed in, so a
//! request handler, a CLI command and a test can each supply their own.

pub mod auth_client;
pub mod pkce;

pub use auth_client::AuthClient;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// An authenticated user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Owner identifier used to scope conversations
    pub user_id: String,
    /// Email address, when the auth service reports one
    #[serde(default)]
    pub email: Option<String>,
}

impl Identity {
    /// Create an identity with no email
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
        }
    }
}

/// A session established with the auth service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Bearer token presented on each request
    pub access_token: String,
    /// User the session belongs to
    pub identity: Identity,
    /// Expiry instant, when known
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Whether the session is still valid at `now`
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::{Duration, Utc};
    /// use parley::identity::{Identity, Session};
    ///
    /// let session = Session {
    ///     access_token: "token".to_string(),
    ///     identity: Identity::new("user-1"),
    ///     expires_at: Some(Utc::now() - Duration::minutes(1)),
    /// };
    /// assert!(!session.is_active_at(Utc::now()));
    /// ```
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires_at| expires_at > now)
    }
}

/// Source of the current identity and session
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The authenticated identity, or `None` when nobody is signed in
    ///
    /// # Errors
    ///
    /// Returns `ProviderUnavailable` when the auth service cannot be reached
    async fn current_identity(&self) -> Result<Option<Identity>>;

    /// The current session, or `None` when there is none or it has expired
    ///
    /// # Errors
    ///
    /// Returns `ProviderUnavailable` when the auth service cannot be reached
    async fn current_session(&self) -> Result<Option<Session>>;
}

/// Fixed identity, for CLI commands and tests
///
/// # Examples
///
/// ```
/// use parley::identity::{IdentityProvider, StaticIdentity};
///
/// # #[tokio::main]
/// # async fn main() -> parley::error::Result<()> {
/// let identity = StaticIdentity::user("local");
/// assert_eq!(identity.current_identity().await?.unwrap().user_id, "local");
///
/// let nobody = StaticIdentity::anonymous();
/// assert!(nobody.current_session().await?.is_none());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    session: Option<Session>,
}

impl StaticIdentity {
    /// A signed-in user with a non-expiring local session
    pub fn user(user_id: impl Into<String>) -> Self {
        Self::from_session(Session {
            access_token: "local".to_string(),
            identity: Identity::new(user_id),
            expires_at: None,
        })
    }

    /// Nobody signed in
    pub fn anonymous() -> Self {
        Self { session: None }
    }

    /// Wrap an explicit session
    pub fn from_session(session: Session) -> Self {
        Self {
            session: Some(session),
        }
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_identity(&self) -> Result<Option<Identity>> {
        Ok(self.current_session().await?.map(|s| s.identity))
    }

    async fn current_session(&self) -> Result<Option<Session>> {
        Ok(self
            .session
            .clone()
            .filter(|session| session.is_active_at(Utc::now())))
    }
}

/// Per-request provider backed by a bearer token and the auth service
///
/// The token is resolved at most once per instance; later calls reuse the
/// result. Failed lookups are not cached.
pub struct BearerIdentity {
    client: Arc<AuthClient>,
    token: Option<String>,
    resolved: OnceCell<Option<Session>>,
}

impl BearerIdentity {
    /// Create a provider for an optional bearer token
    pub fn new(client: Arc<AuthClient>, token: Option<String>) -> Self {
        Self {
            client,
            token: token.filter(|t| !t.trim().is_empty()),
            resolved: OnceCell::new(),
        }
    }
}

#[async_trait]
impl IdentityProvider for BearerIdentity {
    async fn current_identity(&self) -> Result<Option<Identity>> {
        Ok(self.current_session().await?.map(|s| s.identity))
    }

    async fn current_session(&self) -> Result<Option<Session>> {
        let Some(token) = self.token.as_deref() else {
            return Ok(None);
        };

        let session = self
            .resolved
            .get_or_try_init(|| async {
                let identity = self.client.user_for_token(token).await?;
                Ok::<_, anyhow::Error>(identity.map(|identity| Session {
                    access_token: token.to_string(),
                    identity,
                    expires_at: None,
                }))
            })
            .await?;

        Ok(session
            .clone()
            .filter(|session| session.is_active_at(Utc::now())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_static_user_has_identity_and_session() {
        let provider = StaticIdentity::user("u1");
        let identity = provider.current_identity().await.unwrap().unwrap();
        assert_eq!(identity.user_id, "u1");
        assert!(provider.current_session().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_anonymous_has_nothing() {
        let provider = StaticIdentity::anonymous();
        assert!(provider.current_identity().await.unwrap().is_none());
        assert!(provider.current_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_session_is_no_session() {
        let provider = StaticIdentity::from_session(Session {
            access_token: "t".to_string(),
            identity: Identity::new("u1"),
            expires_at: Some(Utc::now() - Duration::seconds(5)),
        });
        assert!(provider.current_session().await.unwrap().is_none());
        assert!(provider.current_identity().await.unwrap().is_none());
    }

    #[test]
    fn test_session_without_expiry_is_active() {
        let session = Session {
            access_token: "t".to_string(),
            identity: Identity::new("u1"),
            expires_at: None,
        };
        assert!(session.is_active_at(Utc::now()));
    }

    #[tokio::test]
    async fn test_bearer_without_token_skips_auth_service() {
        let client = Arc::new(AuthClient::new("http://127.0.0.1:9", "key").unwrap());
        let provider = BearerIdentity::new(client, Some("  ".to_string()));
        assert!(provider.current_session().await.unwrap().is_none());
    }
}
