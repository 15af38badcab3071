//! HTTP surface
//!
//! Page routes behind the session gate, the auth callback, and a JSON API for
//! conversations with a server-sent-events endpoint that streams replies.

pub mod api;
pub mod pages;
pub mod state;

pub use state::{AppState, IdentitySource, InFlight};

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::{ParleyError, Result};
use crate::gate::SessionGate;
use crate::identity::{AuthClient, StaticIdentity};
use crate::relay::ResponseRelay;
use crate::storage::PersistenceBackend;

/// Build application state from configuration
///
/// The auth service is used when `auth.url` and `auth.api_key` are both set.
/// Otherwise every request runs as `auth.local_user`, or as nobody.
pub fn build_state(
    config: &Config,
    backend: Arc<dyn PersistenceBackend>,
    relay: ResponseRelay,
) -> Result<AppState> {
    let identity = match (&config.auth.url, &config.auth.api_key, &config.auth.local_user) {
        (Some(_), Some(_), _) => IdentitySource::Auth(Arc::new(AuthClient::from_config(&config.auth)?)),
        (_, _, Some(user)) => {
            tracing::warn!("No auth service configured; serving every request as {}", user);
            IdentitySource::Fixed(Arc::new(StaticIdentity::user(user.clone())))
        }
        _ => {
            tracing::warn!("No auth service or local user configured; all requests are signed out");
            IdentitySource::Fixed(Arc::new(StaticIdentity::anonymous()))
        }
    };

    Ok(AppState {
        backend,
        relay,
        identity,
        gate: SessionGate::new(config.routes.clone()),
        cookie_name: config.auth.cookie_name.clone(),
        home_path: config.routes.home_path.clone(),
        login_path: config.routes.login_path.clone(),
        public_url: config.server.public_url.clone(),
        in_flight: InFlight::default(),
    })
}

/// Create the router
pub fn router(state: AppState) -> Router {
    let pages = Router::new()
        .route("/", get(pages::index))
        .route("/login", get(pages::login_page).post(pages::login_submit))
        .route(
            pages::REGISTER_PATH,
            get(pages::register_page).post(pages::register_submit),
        )
        .route("/chat", get(pages::chat_page))
        .route("/chat/*rest", get(pages::chat_page))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            pages::session_gate,
        ));

    let auth = Router::new()
        .route("/auth/callback", get(pages::auth_callback))
        .route("/logout", get(pages::logout).post(pages::logout));

    let api = Router::new()
        .route(
            "/conversations",
            get(api::list_conversations).post(api::create_conversation),
        )
        .route("/conversations/active", post(api::active_conversation))
        .route(
            "/conversations/:id",
            get(api::get_conversation)
                .patch(api::rename_conversation)
                .delete(api::delete_conversation),
        )
        .route(
            "/conversations/:id/messages",
            get(api::list_messages).post(api::append_message),
        )
        .route("/conversations/:id/reply", post(api::reply));

    Router::new()
        .merge(pages)
        .merge(auth)
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until Ctrl-C
pub async fn serve(state: AppState, bind: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|e| ParleyError::Config(format!("Failed to bind {}: {}", bind, e)))?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
