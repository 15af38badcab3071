//! Page routes, the session gate middleware and the auth form handlers
//!
//! The pages themselves are placeholders; only their routing matters. The
//! login and register forms post back to the same paths, and every outcome is
//! a redirect carrying `error` or `message` in the query string.

use axum::{
    extract::{Query, Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
    Form,
};
use serde::Deserialize;

use crate::error::{classify, ParleyError};
use crate::gate::GateDecision;
use crate::identity::{pkce, Session};
use crate::server::state::{cookie_value, AppState};

/// Registration page
pub const REGISTER_PATH: &str = "/register";

/// Cookie holding the PKCE verifier between sign-up and the auth callback
pub const VERIFIER_COOKIE: &str = "parley-code-verifier";

/// Lifetime of the verifier cookie; confirmation links older than this fail
const VERIFIER_MAX_AGE_SECS: i64 = 60 * 60 * 24;

/// Character classes a registration password must cover
const MIN_PASSWORD_STRENGTH: usize = 3;

/// Apply the session gate before a page handler runs
pub async fn session_gate(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let identity = state.identity_for(request.headers());
    let path = request.uri().path().to_string();

    match state.gate.check(&path, identity.as_ref()).await {
        GateDecision::Allow => next.run(request).await,
        GateDecision::Redirect(location) => Redirect::to(&location).into_response(),
    }
}

/// `/` sends signed-in users to the app and everyone else to login
pub async fn index(State(state): State<AppState>, headers: axum::http::HeaderMap) -> Redirect {
    let identity = state.identity_for(&headers);
    match identity.current_session().await {
        Ok(Some(_)) => Redirect::to(&state.home_path),
        Ok(None) => Redirect::to(&state.login_path),
        Err(e) => {
            tracing::warn!("Session lookup failed on index: {:#}", e);
            Redirect::to(&state.login_path)
        }
    }
}

pub async fn login_page() -> &'static str {
    "Parley: sign in"
}

pub async fn register_page() -> &'static str {
    "Parley: create an account"
}

pub async fn chat_page() -> &'static str {
    "Parley: chat"
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

fn redirect_with(path: &str, key: &str, message: &str) -> Response {
    Redirect::to(&format!("{}?{}={}", path, key, urlencoding::encode(message))).into_response()
}

fn login_error(state: &AppState, message: &str) -> Response {
    redirect_with(&state.login_path, "error", message)
}

/// Message shown to the user for a failed auth service call
fn auth_failure_message(err: &anyhow::Error) -> String {
    match classify(err) {
        Some(ParleyError::Authentication(message)) => message.clone(),
        Some(ParleyError::ProviderUnavailable(_)) => {
            "Authentication service is unavailable, try again later".to_string()
        }
        _ => err.to_string(),
    }
}

fn session_cookie(state: &AppState, session: &Session) -> String {
    let max_age = session
        .expires_at
        .map(|at| (at - chrono::Utc::now()).num_seconds().max(0))
        .map(|secs| format!("; Max-Age={}", secs))
        .unwrap_or_default();
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax{}",
        state.cookie_name, session.access_token, max_age
    )
}

fn verifier_cookie(verifier: &str, max_age: i64) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        VERIFIER_COOKIE, verifier, max_age
    )
}

/// Only same-site absolute paths are followed after login
fn local_target(target: Option<&str>) -> Option<&str> {
    target.filter(|t| t.starts_with('/') && !t.starts_with("//") && !t.contains('\\'))
}

/// Number of character classes (length, upper, lower, digit, symbol) covered
pub fn password_strength(password: &str) -> usize {
    [
        password.chars().count() >= 8,
        password.chars().any(|c| c.is_ascii_uppercase()),
        password.chars().any(|c| c.is_ascii_lowercase()),
        password.chars().any(|c| c.is_ascii_digit()),
        password.chars().any(|c| !c.is_ascii_alphanumeric()),
    ]
    .iter()
    .filter(|covered| **covered)
    .count()
}

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    #[serde(rename = "redirectedFrom")]
    redirected_from: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    email: String,
    password: String,
}

/// Sign in with email and password
pub async fn login_submit(
    State(state): State<AppState>,
    Query(query): Query<LoginQuery>,
    Form(form): Form<LoginForm>,
) -> Response {
    let Some(client) = state.auth_client() else {
        return login_error(&state, "Authentication is not configured");
    };

    match client.sign_in_with_password(form.email.trim(), &form.password).await {
        Ok(session) => {
            tracing::info!(user_id = %session.identity.user_id, "Signed in with password");
            let target = local_target(query.redirected_from.as_deref())
                .unwrap_or(state.home_path.as_str())
                .to_string();
            (
                [(header::SET_COOKIE, session_cookie(&state, &session))],
                Redirect::to(&target),
            )
                .into_response()
        }
        Err(e) => {
            tracing::warn!("Password sign-in failed: {:#}", e);
            login_error(&state, &auth_failure_message(&e))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterForm {
    email: String,
    password: String,
    confirm_password: String,
    #[serde(default)]
    full_name: Option<String>,
}

/// Create an account
///
/// The confirmation email links back to `/auth/callback`; the PKCE verifier
/// for that link is kept in a cookie until then. When the auth service signs
/// the user in straight away, the session cookie is set instead.
pub async fn register_submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<RegisterForm>,
) -> Response {
    if form.password != form.confirm_password {
        return redirect_with(REGISTER_PATH, "error", "Passwords do not match");
    }
    if password_strength(&form.password) < MIN_PASSWORD_STRENGTH {
        return redirect_with(
            REGISTER_PATH,
            "error",
            "Password is too weak: use at least 8 characters mixing upper case, lower case and digits",
        );
    }

    let Some(client) = state.auth_client() else {
        return redirect_with(REGISTER_PATH, "error", "Authentication is not configured");
    };

    let pair = pkce::generate();
    let full_name = form
        .full_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty());
    let redirect_to = state.callback_url(&headers);

    match client
        .sign_up(
            form.email.trim(),
            &form.password,
            full_name,
            &redirect_to,
            &pair.challenge,
        )
        .await
    {
        Ok(Some(session)) => {
            tracing::info!(user_id = %session.identity.user_id, "Registered and signed in");
            (
                [(header::SET_COOKIE, session_cookie(&state, &session))],
                Redirect::to(&state.home_path),
            )
                .into_response()
        }
        Ok(None) => {
            tracing::info!("Registered; waiting for email confirmation");
            let mut response = redirect_with(
                &state.login_path,
                "message",
                "Account created. Check your email to confirm it.",
            );
            if let Ok(value) =
                verifier_cookie(&pair.verifier, VERIFIER_MAX_AGE_SECS).parse()
            {
                response.headers_mut().insert(header::SET_COOKIE, value);
            }
            response
        }
        Err(e) => {
            tracing::warn!("Sign-up failed: {:#}", e);
            redirect_with(REGISTER_PATH, "error", &auth_failure_message(&e))
        }
    }
}

/// Finish a sign-in started at the auth service
///
/// Exchanges the one-time code together with the verifier cookie set at
/// sign-up, then clears that cookie.
pub async fn auth_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> Response {
    if let Some(error) = params.error {
        let message = params.error_description.unwrap_or(error);
        tracing::warn!("Auth callback returned error: {}", message);
        return login_error(&state, &message);
    }

    let Some(code) = params.code else {
        return Redirect::to(&state.home_path).into_response();
    };

    let Some(client) = state.auth_client() else {
        return login_error(&state, "Authentication is not configured");
    };

    let Some(verifier) = cookie_value(&headers, VERIFIER_COOKIE) else {
        tracing::warn!("Auth callback without a code verifier cookie");
        return login_error(
            &state,
            "Sign-in link must be opened in the browser that requested it",
        );
    };

    let clear_verifier = verifier_cookie("", 0);
    let mut response = match client.exchange_code(&code, &verifier).await {
        Ok(session) => {
            tracing::info!(user_id = %session.identity.user_id, "Signed in via auth callback");
            (
                [(header::SET_COOKIE, session_cookie(&state, &session))],
                Redirect::to(&state.home_path),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!("Code exchange failed: {:#}", e);
            login_error(&state, &auth_failure_message(&e))
        }
    };
    if let Ok(value) = clear_verifier.parse() {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    response
}

/// Clear the session cookie
pub async fn logout(State(state): State<AppState>) -> Response {
    let cookie = format!(
        "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
        state.cookie_name
    );
    ([(header::SET_COOKIE, cookie)], Redirect::to(&state.login_path)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_strength_counts_classes() {
        assert_eq!(password_strength(""), 0);
        assert_eq!(password_strength("abc"), 1);
        assert_eq!(password_strength("abcdefgh"), 2);
        assert_eq!(password_strength("Abcdefg1"), 4);
        assert_eq!(password_strength("Abcdef1!"), 5);
    }

    #[test]
    fn test_local_target_rejects_other_sites() {
        assert_eq!(local_target(Some("/chat/abc")), Some("/chat/abc"));
        assert_eq!(local_target(Some("//evil.example.com")), None);
        assert_eq!(local_target(Some("https://evil.example.com")), None);
        assert_eq!(local_target(Some("/\\evil.example.com")), None);
        assert_eq!(local_target(None), None);
    }

    #[test]
    fn test_verifier_cookie_is_http_only() {
        let cookie = verifier_cookie("abc", 60);
        assert!(cookie.starts_with("parley-code-verifier=abc;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.ends_with("Max-Age=60"));
    }
}
