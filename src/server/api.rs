//! JSON conversation API and the streamed reply endpoint
//!
//! Every route requires a session. Conversations that do not exist and those
//! owned by someone else both answer 404.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::chat::TurnOutcome;
use crate::error::ParleyError;
use crate::identity::IdentityProvider;
use crate::relay::StreamChunk;
use crate::server::state::AppState;
use crate::storage::Role;
use crate::store::{Conversation, ConversationStore, Message};

/// Error response with a JSON `{"error": ...}` body
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn not_found(conversation_id: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("conversation {} not found", conversation_id),
        )
    }

    fn unavailable(what: &str) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, format!("{} failed", what))
    }
}

impl From<&ParleyError> for ApiError {
    fn from(err: &ParleyError) -> Self {
        let status = match err {
            ParleyError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ParleyError::NotFound(_) => StatusCode::NOT_FOUND,
            ParleyError::ConversationBusy(_) => StatusCode::CONFLICT,
            ParleyError::ProviderUnavailable(_) | ParleyError::UpstreamStream(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Resolve the caller, rejecting requests without a session
async fn authenticate(state: &AppState, headers: &HeaderMap) -> ApiResult<Arc<dyn IdentityProvider>> {
    let identity = state.identity_for(headers);
    match identity.current_session().await {
        Ok(Some(_)) => Ok(identity),
        Ok(None) => Err((&ParleyError::Unauthenticated).into()),
        Err(e) => {
            tracing::warn!("Session lookup failed: {:#}", e);
            Err((&ParleyError::Unauthenticated).into())
        }
    }
}

async fn scoped_store(state: &AppState, headers: &HeaderMap) -> ApiResult<ConversationStore> {
    Ok(state.store(authenticate(state, headers).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct TitleRequest {
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct AppendRequest {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ReplyRequest {
    pub prompt: String,
}

#[derive(Debug, Serialize)]
pub struct Created {
    pub id: String,
}

pub async fn list_conversations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<Conversation>>> {
    let store = scoped_store(&state, &headers).await?;
    Ok(Json(store.list_conversations().await))
}

pub async fn create_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<TitleRequest>>,
) -> ApiResult<(StatusCode, Json<Created>)> {
    let store = scoped_store(&state, &headers).await?;
    let title = body.and_then(|Json(b)| b.title);
    let id = store
        .create_conversation(title.as_deref())
        .await
        .ok_or_else(|| ApiError::unavailable("creating conversation"))?;
    Ok((StatusCode::CREATED, Json(Created { id })))
}

pub async fn active_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<TitleRequest>>,
) -> ApiResult<Json<Created>> {
    let store = scoped_store(&state, &headers).await?;
    let title = body.and_then(|Json(b)| b.title);
    let id = store
        .get_or_create_active_conversation(title.as_deref())
        .await
        .ok_or_else(|| ApiError::unavailable("resolving active conversation"))?;
    Ok(Json(Created { id }))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Conversation>> {
    let store = scoped_store(&state, &headers).await?;
    store
        .get_conversation(&id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(&id))
}

pub async fn rename_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<RenameRequest>,
) -> ApiResult<StatusCode> {
    let store = scoped_store(&state, &headers).await?;
    if body.title.trim().is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "title must not be empty"));
    }
    if store.rename_conversation(&id, &body.title).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(&id))
    }
}

pub async fn delete_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let store = scoped_store(&state, &headers).await?;
    let _claim = state
        .in_flight
        .try_acquire(&id)
        .ok_or_else(|| ApiError::from(&ParleyError::ConversationBusy(id.clone())))?;
    if store.delete_conversation(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(&id))
    }
}

pub async fn list_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Message>>> {
    let store = scoped_store(&state, &headers).await?;
    if store.get_conversation(&id).await.is_none() {
        return Err(ApiError::not_found(&id));
    }
    Ok(Json(store.load_messages(&id).await))
}

pub async fn append_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<AppendRequest>,
) -> ApiResult<(StatusCode, Json<Created>)> {
    let store = scoped_store(&state, &headers).await?;
    if store.get_conversation(&id).await.is_none() {
        return Err(ApiError::not_found(&id));
    }
    let message_id = store
        .append_message(&id, body.role, &body.content, body.tokens)
        .await
        .ok_or_else(|| ApiError::unavailable("storing message"))?;
    Ok((StatusCode::CREATED, Json(Created { id: message_id })))
}

/// Events sent on the reply stream
#[derive(Debug)]
enum ReplyEvent {
    Chunk(StreamChunk),
    Done(TurnOutcome),
}

impl ReplyEvent {
    fn into_sse(self) -> Event {
        match self {
            ReplyEvent::Chunk(chunk) => Event::default()
                .event("chunk")
                .data(serde_json::to_string(&chunk).unwrap_or_default()),
            ReplyEvent::Done(TurnOutcome::Completed {
                conversation_id,
                message_id,
                total_tokens,
                tokens_per_second,
                ..
            }) => Event::default().event("done").data(
                json!({
                    "conversationId": conversation_id,
                    "messageId": message_id,
                    "totalTokensSoFar": total_tokens,
                    "tokensPerSecond": tokens_per_second,
                })
                .to_string(),
            ),
            ReplyEvent::Done(TurnOutcome::Failed {
                fallback, error, ..
            }) => Event::default().event("error").data(
                json!({
                    "message": fallback,
                    "error": error,
                })
                .to_string(),
            ),
            ReplyEvent::Done(TurnOutcome::Empty) => Event::default().event("done").data("{}"),
        }
    }
}

/// Generate and store a reply, streaming it as server-sent events
///
/// Only one reply per conversation runs at a time; a second request while one
/// is streaming gets 409. The reply is stored even if the client disconnects.
pub async fn reply(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<ReplyRequest>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let identity = authenticate(&state, &headers).await?;
    if body.prompt.trim().is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "prompt must not be empty"));
    }

    let session = state.chat(identity);
    if session.store().get_conversation(&id).await.is_none() {
        return Err(ApiError::not_found(&id));
    }

    let guard = state
        .in_flight
        .try_acquire(&id)
        .ok_or_else(|| ApiError::from(&ParleyError::ConversationBusy(id.clone())))?;

    let (tx, mut rx) = mpsc::unbounded_channel::<ReplyEvent>();
    tokio::spawn(async move {
        let chunks = tx.clone();
        let outcome = session
            .send(Some(&id), &body.prompt, move |chunk| {
                let _ = chunks.send(ReplyEvent::Chunk(chunk.clone()));
            })
            .await;
        drop(guard);

        match outcome {
            Ok(outcome) => {
                let _ = tx.send(ReplyEvent::Done(outcome));
            }
            Err(e) => {
                tracing::error!(conversation_id = %id, "Reply could not start: {:#}", e);
                let _ = tx.send(ReplyEvent::Done(TurnOutcome::Failed {
                    conversation_id: id,
                    partial: String::new(),
                    fallback: crate::chat::FALLBACK_REPLY,
                    error: format!("{:#}", e),
                }));
            }
        }
    });

    let events = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            yield Ok::<Event, Infallible>(event.into_sse());
        }
    };

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
