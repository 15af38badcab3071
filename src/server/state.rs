//! Shared server state

use crate::chat::ChatSession;
use crate::gate::SessionGate;
use crate::identity::{AuthClient, BearerIdentity, IdentityProvider};
use crate::relay::ResponseRelay;
use crate::storage::PersistenceBackend;
use crate::store::ConversationStore;

use axum::http::{header, HeaderMap};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Where a request's identity comes from
#[derive(Clone)]
pub enum IdentitySource {
    /// Resolve the request's bearer token against the auth service
    Auth(Arc<AuthClient>),
    /// Every request gets the same identity (local single-user mode)
    Fixed(Arc<dyn IdentityProvider>),
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn PersistenceBackend>,
    pub relay: ResponseRelay,
    pub identity: IdentitySource,
    pub gate: SessionGate,
    /// Cookie carrying the access token
    pub cookie_name: String,
    /// Post-login landing page
    pub home_path: String,
    /// Login page
    pub login_path: String,
    /// Externally visible base URL for auth callback links
    pub public_url: Option<String>,
    pub in_flight: InFlight,
}

impl AppState {
    /// Access token from the session cookie or an `Authorization: Bearer` header
    pub fn access_token(&self, headers: &HeaderMap) -> Option<String> {
        let from_header = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|v| v.trim().to_string());

        from_header.or_else(|| cookie_value(headers, &self.cookie_name))
    }

    /// Identity provider for one request
    pub fn identity_for(&self, headers: &HeaderMap) -> Arc<dyn IdentityProvider> {
        match &self.identity {
            IdentitySource::Auth(client) => Arc::new(BearerIdentity::new(
                Arc::clone(client),
                self.access_token(headers),
            )),
            IdentitySource::Fixed(provider) => Arc::clone(provider),
        }
    }

    /// The auth service client, when one is configured
    pub fn auth_client(&self) -> Option<&Arc<AuthClient>> {
        match &self.identity {
            IdentitySource::Auth(client) => Some(client),
            IdentitySource::Fixed(_) => None,
        }
    }

    /// Absolute URL of the auth callback
    ///
    /// Uses `server.public_url`, falling back to the request's `Host` header.
    pub fn callback_url(&self, headers: &HeaderMap) -> String {
        let base = match &self.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => {
                let host = headers
                    .get(header::HOST)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("localhost");
                format!("http://{}", host)
            }
        };
        format!("{}/auth/callback", base)
    }

    /// Conversation store scoped to `identity`
    pub fn store(&self, identity: Arc<dyn IdentityProvider>) -> ConversationStore {
        ConversationStore::new(Arc::clone(&self.backend), identity)
    }

    /// Chat session scoped to `identity`
    pub fn chat(&self, identity: Arc<dyn IdentityProvider>) -> ChatSession {
        ChatSession::new(self.store(identity), self.relay.clone())
    }
}

/// Find a cookie by name in the `Cookie` headers
pub(crate) fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

/// Conversations with a reply currently being generated
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    active: Arc<Mutex<HashSet<String>>>,
}

impl InFlight {
    /// Claim a conversation; `None` if a reply is already running for it
    pub fn try_acquire(&self, conversation_id: &str) -> Option<InFlightGuard> {
        let mut active = self.active.lock().ok()?;
        if !active.insert(conversation_id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            active: Arc::clone(&self.active),
            conversation_id: conversation_id.to_string(),
        })
    }

    /// Whether a reply is running for the conversation
    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.active
            .lock()
            .map(|active| active.contains(conversation_id))
            .unwrap_or(false)
    }
}

/// Releases its conversation when dropped
#[derive(Debug)]
pub struct InFlightGuard {
    active: Arc<Mutex<HashSet<String>>>,
    conversation_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&self.conversation_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_in_flight_is_exclusive_until_dropped() {
        let in_flight = InFlight::default();
        let guard = in_flight.try_acquire("c1").unwrap();
        assert!(in_flight.try_acquire("c1").is_none());
        assert!(in_flight.try_acquire("c2").is_some());
        assert!(in_flight.is_active("c1"));

        drop(guard);
        assert!(!in_flight.is_active("c1"));
        assert!(in_flight.try_acquire("c1").is_some());
    }

    #[test]
    fn test_cookie_value_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; parley-access-token=abc123; other=1"),
        );
        assert_eq!(
            cookie_value(&headers, "parley-access-token").as_deref(),
            Some("abc123")
        );
        assert!(cookie_value(&headers, "missing").is_none());
    }

    #[test]
    fn test_callback_url_prefers_public_url() {
        let mut state = crate::server::build_state(
            &crate::config::Config::default(),
            Arc::new(crate::storage::MemoryBackend::new()),
            crate::relay::ResponseRelay::new(Arc::new(
                crate::providers::fake::FakeProvider::new(["x"]),
            )),
        )
        .unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("127.0.0.1:3000"));
        assert_eq!(
            state.callback_url(&headers),
            "http://127.0.0.1:3000/auth/callback"
        );

        state.public_url = Some("https://chat.example.com/".to_string());
        assert_eq!(
            state.callback_url(&headers),
            "https://chat.example.com/auth/callback"
        );
    }

    #[test]
    fn test_empty_cookie_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("parley-access-token="));
        assert!(cookie_value(&headers, "parley-access-token").is_none());
    }
}
