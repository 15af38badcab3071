//! Session gate
//!
//! Decides, per page request, whether to let the request through or redirect
//! it. Requests for protected paths without a session go to the login page
//! with the requested path preserved in `redirectedFrom`; requests for auth
//! pages with a session go to the home page.
//!
//! A failed session lookup counts as "no session", which closes protected
//! paths and leaves every other path open.

use crate::config::RoutesConfig;
use crate::error::Result;
use crate::identity::{IdentityProvider, Session};

/// Outcome of evaluating one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Pass the request through
    Allow,
    /// Redirect to the given location
    Redirect(String),
}

/// Route-level session check
#[derive(Debug, Clone)]
pub struct SessionGate {
    routes: RoutesConfig,
}

/// Whether `path` is `prefix` or lies beneath it
fn under(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/'),
        None => false,
    }
}

/// Percent-encode a path for use as a query value, keeping `/` readable
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            let decoded = urlencoding::decode(segment)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| segment.to_string());
            urlencoding::encode(&decoded).into_owned()
        })
        .collect::<Vec<_>>()
        .join("/")
}

impl SessionGate {
    /// Create a gate for the configured routes
    pub fn new(routes: RoutesConfig) -> Self {
        Self { routes }
    }

    /// Whether `path` needs a session
    pub fn is_protected(&self, path: &str) -> bool {
        self.routes
            .protected_prefixes
            .iter()
            .any(|prefix| under(path, prefix))
    }

    /// Whether `path` is a login or registration page
    pub fn is_auth_path(&self, path: &str) -> bool {
        self.routes.auth_paths.iter().any(|p| under(path, p))
    }

    /// Decide from an already resolved session lookup
    ///
    /// # Examples
    ///
    /// ```
    /// use parley::config::RoutesConfig;
    /// use parley::gate::{GateDecision, SessionGate};
    ///
    /// let gate = SessionGate::new(RoutesConfig::default());
    /// assert_eq!(
    ///     gate.evaluate("/chat", Ok(None)),
    ///     GateDecision::Redirect("/login?redirectedFrom=/chat".to_string())
    /// );
    /// assert_eq!(gate.evaluate("/about", Ok(None)), GateDecision::Allow);
    /// ```
    pub fn evaluate(&self, path: &str, session: Result<Option<Session>>) -> GateDecision {
        let has_session = match session {
            Ok(session) => session.is_some(),
            Err(e) => {
                tracing::warn!(path, "Session lookup failed, treating as signed out: {:#}", e);
                false
            }
        };

        if self.is_protected(path) && !has_session {
            tracing::debug!(path, "Redirecting unauthenticated request to login");
            return GateDecision::Redirect(format!(
                "{}?redirectedFrom={}",
                self.routes.login_path,
                encode_path(path)
            ));
        }

        if self.is_auth_path(path) && has_session {
            tracing::debug!(path, "Redirecting signed-in user away from auth page");
            return GateDecision::Redirect(self.routes.home_path.clone());
        }

        GateDecision::Allow
    }

    /// Look up the session and decide
    pub async fn check(&self, path: &str, identity: &dyn IdentityProvider) -> GateDecision {
        if !self.is_protected(path) && !self.is_auth_path(path) {
            return GateDecision::Allow;
        }
        self.evaluate(path, identity.current_session().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParleyError;
    use crate::identity::{Identity, StaticIdentity};

    fn session() -> Session {
        Session {
            access_token: "token".to_string(),
            identity: Identity::new("u1"),
            expires_at: None,
        }
    }

    fn gate() -> SessionGate {
        SessionGate::new(RoutesConfig::default())
    }

    #[test]
    fn test_protected_without_session_redirects_to_login() {
        assert_eq!(
            gate().evaluate("/chat", Ok(None)),
            GateDecision::Redirect("/login?redirectedFrom=/chat".to_string())
        );
    }

    #[test]
    fn test_auth_path_with_session_redirects_home() {
        assert_eq!(
            gate().evaluate("/login", Ok(Some(session()))),
            GateDecision::Redirect("/chat".to_string())
        );
        assert_eq!(
            gate().evaluate("/register", Ok(Some(session()))),
            GateDecision::Redirect("/chat".to_string())
        );
    }

    #[test]
    fn test_protected_with_session_passes() {
        assert_eq!(gate().evaluate("/chat", Ok(Some(session()))), GateDecision::Allow);
    }

    #[test]
    fn test_nested_protected_path_is_preserved() {
        assert_eq!(
            gate().evaluate("/chat/abc def", Ok(None)),
            GateDecision::Redirect("/login?redirectedFrom=/chat/abc%20def".to_string())
        );
    }

    #[test]
    fn test_prefix_match_respects_segments() {
        let gate = gate();
        assert!(gate.is_protected("/chat"));
        assert!(gate.is_protected("/chat/123"));
        assert!(!gate.is_protected("/chatter"));
        assert!(gate.is_auth_path("/login"));
        assert!(!gate.is_auth_path("/loginx"));
    }

    #[test]
    fn test_lookup_error_fails_closed_on_protected() {
        let err = ParleyError::ProviderUnavailable("down".to_string()).into();
        assert_eq!(
            gate().evaluate("/chat", Err(err)),
            GateDecision::Redirect("/login?redirectedFrom=/chat".to_string())
        );
    }

    #[test]
    fn test_lookup_error_fails_open_elsewhere() {
        let err = ParleyError::ProviderUnavailable("down".to_string()).into();
        assert_eq!(gate().evaluate("/login", Err(err)), GateDecision::Allow);
        let err = ParleyError::ProviderUnavailable("down".to_string()).into();
        assert_eq!(gate().evaluate("/", Err(err)), GateDecision::Allow);
    }

    #[test]
    fn test_auth_path_without_session_passes() {
        assert_eq!(gate().evaluate("/login", Ok(None)), GateDecision::Allow);
    }

    #[tokio::test]
    async fn test_check_with_static_identity() {
        let gate = gate();
        assert_eq!(
            gate.check("/chat", &StaticIdentity::anonymous()).await,
            GateDecision::Redirect("/login?redirectedFrom=/chat".to_string())
        );
        assert_eq!(
            gate.check("/chat", &StaticIdentity::user("u1")).await,
            GateDecision::Allow
        );
    }
}
