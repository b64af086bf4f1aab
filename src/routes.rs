//! REST endpoints for message submission, mute management, and tenant
//! registration.
//!
//! Every endpoint requires the caller's API key in the `Authorization`
//! header; a missing or empty header fails before any business logic.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use rand::Rng;
use rand::distributions::Alphanumeric;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::error::{AuthError, Error, Result};
use crate::model::{ChatMessage, Mute, Tenant, UnmuteRequest};
use crate::mutes::{MuteCache, MuteCoordinator};
use crate::pipeline::AdmissionPipeline;
use crate::registry::TenantRegistry;
use crate::store::Store;

const CREDENTIAL_LEN: usize = 32;

/// Shared state for the chat routes.
#[derive(Clone)]
pub struct ChatRouteState {
    pub pipeline: Arc<AdmissionPipeline>,
    pub coordinator: Arc<MuteCoordinator>,
    pub cache: Arc<MuteCache>,
    pub registry: Arc<TenantRegistry>,
    pub store: Arc<dyn Store>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Validation(_) | Error::Rejected(_) => StatusCode::BAD_REQUEST,
            Error::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Store(_) | Error::Bus(_) | Error::Name(_) | Error::Delivery(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = serde_json::json!({
            "slug": self.code(),
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

fn credential(headers: &HeaderMap) -> Result<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthError::MissingAuthorization.into())
}

/// POST /api/chat/send
///
/// Submit one message. Returns the admitted (name-enriched) message, or a
/// rejection with a stable slug.
async fn send_message(
    State(state): State<ChatRouteState>,
    headers: HeaderMap,
    Json(message): Json<ChatMessage>,
) -> Result<Json<ChatMessage>> {
    let key = credential(&headers)?;
    let admitted = state.pipeline.submit(message, key).await?;
    Ok(Json(admitted))
}

/// POST /api/chat/mute
///
/// Mute a user. Omitting `expires_at` (or citing a rule in the reason)
/// computes the duration from the user's violation history.
async fn create_mute(
    State(state): State<ChatRouteState>,
    headers: HeaderMap,
    Json(mute): Json<Mute>,
) -> Result<Json<Mute>> {
    let key = credential(&headers)?;
    let stored = state.coordinator.mute(mute, key).await?;
    Ok(Json(stored))
}

/// DELETE /api/chat/mute
///
/// Cancel a user's effective mute.
async fn cancel_mute(
    State(state): State<ChatRouteState>,
    headers: HeaderMap,
    Json(request): Json<UnmuteRequest>,
) -> Result<Json<Mute>> {
    let key = credential(&headers)?;
    let canceled = state.coordinator.unmute(request, key).await?;
    Ok(Json(canceled))
}

/// GET /api/chat/mutes
///
/// List the effective mute per user, as enforced right now.
async fn list_mutes(
    State(state): State<ChatRouteState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Mute>>> {
    let key = credential(&headers)?;
    state
        .registry
        .resolve(key)
        .await
        .ok_or(AuthError::UnknownCredential)?;
    let mutes = state.cache.snapshot().await?;
    Ok(Json(mutes))
}

#[derive(serde::Deserialize)]
struct RegisterTenantRequest {
    name: String,
    #[serde(default)]
    webhook_url: Option<String>,
    #[serde(default)]
    webhook_auth: Option<String>,
}

/// POST /api/chat/internal/tenant
///
/// Register a new tenant and hand back its generated API key. The key is
/// returned exactly once; it is not recoverable later.
async fn register_tenant(
    State(state): State<ChatRouteState>,
    headers: HeaderMap,
    Json(request): Json<RegisterTenantRequest>,
) -> Result<Json<Tenant>> {
    credential(&headers)?;
    if state.store.tenant_exists(&request.name).await? {
        return Err(crate::error::ConflictError::TenantExists(request.name).into());
    }

    let key: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CREDENTIAL_LEN)
        .map(char::from)
        .collect();
    let tenant = Tenant {
        id: 0,
        name: request.name,
        credential: key,
        quota: 0,
        webhook_url: request.webhook_url,
        webhook_auth: request.webhook_auth,
    };
    let stored = state.store.insert_tenant(&tenant).await?;
    state.registry.refresh_from(state.store.as_ref()).await?;
    info!(tenant = %stored.name, "Tenant registered");
    Ok(Json(stored))
}

/// GET /health
async fn health() -> &'static str {
    "ok"
}

/// Build the chat REST routes.
pub fn chat_routes(state: ChatRouteState) -> Router {
    Router::new()
        .route("/api/chat/send", post(send_message))
        .route("/api/chat/mute", post(create_mute).delete(cancel_mute))
        .route("/api/chat/mutes", get(list_mutes))
        .route("/api/chat/internal/tenant", post(register_tenant))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
