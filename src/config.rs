//! Configuration management for Parley
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{ParleyError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Main configuration structure for Parley
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Generation provider configuration (Gemini, Ollama)
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Conversation storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Identity/session provider configuration
    #[serde(default)]
    pub auth: AuthConfig,
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Session gate routing rules
    #[serde(default)]
    pub routes: RoutesConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Provider configuration
///
/// Specifies which generation provider to use and its settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Type of provider to use
    #[serde(rename = "type", default = "default_provider_type")]
    pub provider_type: String,

    /// Google Gemini configuration
    #[serde(default)]
    pub gemini: GeminiConfig,

    /// Ollama configuration
    #[serde(default)]
    pub ollama: OllamaConfig,
}

fn default_provider_type() -> String {
    "gemini".to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider_type: default_provider_type(),
            gemini: GeminiConfig::default(),
            ollama: OllamaConfig::default(),
        }
    }
}

/// Google Gemini provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// API key sent as `x-goog-api-key`
    #[serde(default)]
    pub api_key: Option<String>,

    /// API base URL (overridable for tests and proxies)
    #[serde(default = "default_gemini_api_base")]
    pub api_base: String,

    /// Model to stream from
    #[serde(default = "default_gemini_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Top-k sampling
    #[serde(default = "default_top_k")]
    pub top_k: u32,

    /// Nucleus sampling
    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Maximum tokens generated per reply
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

fn default_gemini_api_base() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_gemini_model() -> String {
    "gemini-flash-latest".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_top_k() -> u32 {
    1
}

fn default_top_p() -> f32 {
    1.0
}

fn default_max_output_tokens() -> u32 {
    2048
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_gemini_api_base(),
            model: default_gemini_model(),
            temperature: default_temperature(),
            top_k: default_top_k(),
            top_p: default_top_p(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

/// Ollama provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Ollama server host
    #[serde(default = "default_ollama_host")]
    pub host: String,

    /// Model to use for Ollama
    #[serde(default = "default_ollama_model")]
    pub model: String,
}

fn default_ollama_host() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.2:latest".to_string()
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: default_ollama_host(),
            model: default_ollama_model(),
        }
    }
}

/// Conversation storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path; the platform data directory is used when unset
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

/// Identity/session provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Base URL of the hosted auth service
    #[serde(default)]
    pub url: Option<String>,

    /// Public API key sent as the `apikey` header
    #[serde(default)]
    pub api_key: Option<String>,

    /// Cookie carrying the access token
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    /// Identity used by CLI commands (no auth service round trip)
    #[serde(default)]
    pub local_user: Option<String>,
}

fn default_cookie_name() -> String {
    "parley-access-token".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            cookie_name: default_cookie_name(),
            local_user: None,
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address to listen on
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Externally visible base URL, used to build the auth callback link sent
    /// in confirmation emails. Derived from the request's `Host` when unset.
    #[serde(default)]
    pub public_url: Option<String>,
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_url: None,
        }
    }
}

/// Session gate routing rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutesConfig {
    /// Path prefixes that require a session
    #[serde(default = "default_protected_prefixes")]
    pub protected_prefixes: Vec<String>,

    /// Paths (and their sub-paths) that a signed-in user is bounced away from
    #[serde(default = "default_auth_paths")]
    pub auth_paths: Vec<String>,

    /// Where unauthenticated users are sent
    #[serde(default = "default_login_path")]
    pub login_path: String,

    /// Main application surface
    #[serde(default = "default_home_path")]
    pub home_path: String,
}

fn default_protected_prefixes() -> Vec<String> {
    vec!["/chat".to_string()]
}

fn default_auth_paths() -> Vec<String> {
    vec!["/login".to_string(), "/register".to_string()]
}

fn default_login_path() -> String {
    "/login".to_string()
}

fn default_home_path() -> String {
    "/chat".to_string()
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            protected_prefixes: default_protected_prefixes(),
            auth_paths: default_auth_paths(),
            login_path: default_login_path(),
            home_path: default_home_path(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of the human-readable format
    #[serde(default)]
    pub json: bool,
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// A missing file is not an error: defaults are used and a warning is logged.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ParleyError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| ParleyError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(provider_type) = std::env::var("PARLEY_PROVIDER") {
            self.provider.provider_type = provider_type;
        }

        if let Ok(api_key) = std::env::var("PARLEY_GEMINI_API_KEY") {
            self.provider.gemini.api_key = Some(api_key);
        }

        if let Ok(model) = std::env::var("PARLEY_GEMINI_MODEL") {
            self.provider.gemini.model = model;
        }

        if let Ok(api_base) = std::env::var("PARLEY_GEMINI_API_BASE") {
            self.provider.gemini.api_base = api_base;
        }

        if let Ok(ollama_host) = std::env::var("PARLEY_OLLAMA_HOST") {
            self.provider.ollama.host = ollama_host;
        }

        if let Ok(ollama_model) = std::env::var("PARLEY_OLLAMA_MODEL") {
            self.provider.ollama.model = ollama_model;
        }

        if let Ok(db_path) = std::env::var("PARLEY_DB_PATH") {
            self.storage.db_path = Some(PathBuf::from(db_path));
        }

        if let Ok(url) = std::env::var("PARLEY_AUTH_URL") {
            self.auth.url = Some(url);
        }

        if let Ok(api_key) = std::env::var("PARLEY_AUTH_API_KEY") {
            self.auth.api_key = Some(api_key);
        }

        if let Ok(user) = std::env::var("PARLEY_LOCAL_USER") {
            self.auth.local_user = Some(user);
        }

        if let Ok(bind) = std::env::var("PARLEY_BIND") {
            self.server.bind = bind;
        }

        if let Ok(public_url) = std::env::var("PARLEY_PUBLIC_URL") {
            self.server.public_url = Some(public_url);
        }

        if let Ok(json_logs) = std::env::var("PARLEY_JSON_LOGS") {
            match json_logs.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.logging.json = true,
                "0" | "false" | "no" => self.logging.json = false,
                _ => tracing::warn!("Invalid PARLEY_JSON_LOGS: {}", json_logs),
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }
        if cli.json_logs {
            self.logging.json = true;
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns error if any validation check fails
    pub fn validate(&self) -> Result<()> {
        let valid_providers = ["gemini", "ollama"];
        if !valid_providers.contains(&self.provider.provider_type.as_str()) {
            return Err(ParleyError::Config(format!(
                "Invalid provider type: {}. Must be one of: {}",
                self.provider.provider_type,
                valid_providers.join(", ")
            ))
            .into());
        }

        let gemini = &self.provider.gemini;
        if !(0.0..=2.0).contains(&gemini.temperature) {
            return Err(ParleyError::Config(
                "provider.gemini.temperature must be between 0.0 and 2.0".to_string(),
            )
            .into());
        }

        if gemini.top_p <= 0.0 || gemini.top_p > 1.0 {
            return Err(ParleyError::Config(
                "provider.gemini.top_p must be between 0.0 and 1.0".to_string(),
            )
            .into());
        }

        if gemini.max_output_tokens == 0 {
            return Err(ParleyError::Config(
                "provider.gemini.max_output_tokens must be greater than 0".to_string(),
            )
            .into());
        }

        if self.server.bind.parse::<SocketAddr>().is_err() {
            return Err(ParleyError::Config(format!(
                "server.bind is not a valid socket address: {}",
                self.server.bind
            ))
            .into());
        }

        if let Some(url) = &self.server.public_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ParleyError::Config(format!(
                    "server.public_url must be an http(s) URL: {}",
                    url
                ))
                .into());
            }
        }

        if self.routes.protected_prefixes.is_empty() {
            return Err(ParleyError::Config(
                "routes.protected_prefixes must not be empty".to_string(),
            )
            .into());
        }

        for (name, path) in [
            ("routes.login_path", &self.routes.login_path),
            ("routes.home_path", &self.routes.home_path),
        ] {
            if !path.starts_with('/') {
                return Err(
                    ParleyError::Config(format!("{} must start with '/': {}", name, path)).into(),
                );
            }
        }

        Ok(())
    }
}
