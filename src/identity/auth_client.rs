//! Client for the hosted auth service
//!
//! Speaks the GoTrue-style REST API:
//!
//! - `GET /auth/v1/user` resolves an access token to a user
//! - `POST /auth/v1/token?grant_type=password` signs in with email and password
//! - `POST /auth/v1/signup` registers an account and starts email confirmation
//! - `POST /auth/v1/token?grant_type=pkce` exchanges the one-time code
//!   delivered to the auth callback, together with its verifier, for a session

use crate::config::AuthConfig;
use crate::error::{ParleyError, Result};
use crate::identity::{Identity, Session};

use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Auth service client
#[derive(Debug, Clone)]
pub struct AuthClient {
    http: Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Serialize)]
struct CodeExchangeRequest<'a> {
    auth_code: &'a str,
    code_verifier: &'a str,
}

#[derive(Debug, Serialize)]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct SignUpRequest<'a> {
    email: &'a str,
    password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<SignUpMetadata<'a>>,
    code_challenge: &'a str,
    code_challenge_method: &'a str,
}

#[derive(Debug, Serialize)]
struct SignUpMetadata<'a> {
    full_name: &'a str,
}

/// Human-readable message from an auth service error body
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            ["msg", "error_description", "message", "error"]
                .iter()
                .find_map(|key| value.get(*key).and_then(|v| v.as_str()).map(String::from))
        })
        .unwrap_or_else(|| body.to_string())
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: UserResponse,
}

impl TokenResponse {
    fn into_session(self, now: DateTime<Utc>) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .or_else(|| {
                self.expires_in
                    .map(|secs| now + chrono::Duration::seconds(secs))
            });

        Session {
            access_token: self.access_token,
            identity: Identity {
                user_id: self.user.id,
                email: self.user.email,
            },
            expires_at,
        }
    }
}

impl AuthClient {
    /// Create a client for the auth service at `base_url`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent(concat!("parley/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ParleyError::Authentication(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    /// Build a client from configuration
    ///
    /// # Errors
    ///
    /// Returns a configuration error when `auth.url` or `auth.api_key` is unset
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| ParleyError::Config("auth.url is not set".to_string()))?;
        let api_key = config
            .api_key
            .as_deref()
            .ok_or_else(|| ParleyError::Config("auth.api_key is not set".to_string()))?;
        Self::new(url, api_key)
    }

    /// Resolve an access token to the user it belongs to
    ///
    /// A rejected token (401/403) yields `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns `ProviderUnavailable` when the service cannot be reached or
    /// answers with any other failure status
    pub async fn user_for_token(&self, access_token: &str) -> Result<Option<Identity>> {
        let resp = self
            .http
            .get(format!("{}/auth/v1/user", self.base_url))
            .bearer_auth(access_token)
            .header("apikey", &self.api_key)
            .send()
            .await
            .map_err(|e| ParleyError::ProviderUnavailable(format!("auth service unreachable: {e}")))?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            tracing::debug!("Auth service rejected access token ({})", status);
            return Ok(None);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ParleyError::ProviderUnavailable(format!(
                "auth service returned {status}: {body}"
            ))
            .into());
        }

        let user: UserResponse = resp.json().await.map_err(|e| {
            ParleyError::ProviderUnavailable(format!("failed to parse user response: {e}"))
        })?;

        Ok(Some(Identity {
            user_id: user.id,
            email: user.email,
        }))
    }

    /// Exchange a one-time auth code and its PKCE verifier for a session
    ///
    /// # Errors
    ///
    /// Returns `Authentication` when the service rejects the code and
    /// `ProviderUnavailable` when it cannot be reached
    pub async fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<Session> {
        self.token_grant(
            "pkce",
            &CodeExchangeRequest {
                auth_code: code,
                code_verifier,
            },
        )
        .await
    }

    /// Sign in with email and password
    ///
    /// # Errors
    ///
    /// Returns `Authentication` with the service's message when the
    /// credentials are rejected and `ProviderUnavailable` when it cannot be
    /// reached
    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session> {
        self.token_grant("password", &PasswordRequest { email, password })
            .await
    }

    /// Register an account
    ///
    /// The confirmation link sent by the auth service lands on `redirect_to`
    /// with a one-time code bound to `code_challenge`. Returns a session only
    /// when the service confirms accounts immediately. `full_name` is stored
    /// as user metadata.
    ///
    /// # Errors
    ///
    /// Returns `Authentication` with the service's message when sign-up is
    /// refused and `ProviderUnavailable` when it cannot be reached
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        full_name: Option<&str>,
        redirect_to: &str,
        code_challenge: &str,
    ) -> Result<Option<Session>> {
        let resp = self
            .http
            .post(format!("{}/auth/v1/signup", self.base_url))
            .query(&[("redirect_to", redirect_to)])
            .header("apikey", &self.api_key)
            .json(&SignUpRequest {
                email,
                password,
                data: full_name.map(|full_name| SignUpMetadata { full_name }),
                code_challenge,
                code_challenge_method: super::pkce::CHALLENGE_METHOD,
            })
            .send()
            .await
            .map_err(|e| ParleyError::ProviderUnavailable(format!("sign-up request failed: {e}")))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            tracing::warn!("Sign-up rejected with {}: {}", status, body);
            return Err(ParleyError::Authentication(error_message(&body)).into());
        }

        let value: serde_json::Value = serde_json::from_str(&body).map_err(|e| {
            ParleyError::Authentication(format!("failed to parse sign-up response: {e}"))
        })?;
        if value.get("access_token").is_none() {
            return Ok(None);
        }
        let token: TokenResponse = serde_json::from_value(value).map_err(|e| {
            ParleyError::Authentication(format!("failed to parse sign-up response: {e}"))
        })?;
        Ok(Some(token.into_session(Utc::now())))
    }

    async fn token_grant(&self, grant_type: &str, body: &impl Serialize) -> Result<Session> {
        let resp = self
            .http
            .post(format!("{}/auth/v1/token", self.base_url))
            .query(&[("grant_type", grant_type)])
            .header("apikey", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ParleyError::ProviderUnavailable(format!("token request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!("{} grant rejected with {}: {}", grant_type, status, body);
            return Err(ParleyError::Authentication(error_message(&body)).into());
        }

        let token: TokenResponse = resp.json().await.map_err(|e| {
            ParleyError::Authentication(format!("failed to parse token response: {e}"))
        })?;

        Ok(token.into_session(Utc::now()))
    }
}
