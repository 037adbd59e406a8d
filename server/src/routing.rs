//! HTTP routing configuration

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use parlor_shared::payloads::{SystemMessagePush, PUSH_SYSTEM_MESSAGE};
use parlor_shared::{unix_millis, Envelope, PROTOCOL_VERSION};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::websocket::ServerState;

/// Create the application router
pub fn create_router(state: Arc<ServerState>) -> Router {
    let cors = build_cors_layer(&state.config.cors_origins);

    let mut router = Router::new()
        .route(&state.config.ws_route, get(crate::websocket::handle_websocket))
        .route("/health", get(health_check))
        .route("/info", get(server_info));

    // Only mount admin endpoints if a token is configured
    if state.config.admin_token.is_some() {
        router = router
            .route("/admin/stats", get(admin_stats))
            .route("/admin/broadcast", post(admin_broadcast));
    }

    router
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Build CORS layer from config. Permissive when no origins are configured.
fn build_cors_layer(origins: &Option<String>) -> CorsLayer {
    match origins {
        Some(list) if !list.is_empty() => {
            let parsed: Vec<_> = list
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            CorsLayer::new().allow_origin(AllowOrigin::list(parsed))
        }
        _ => CorsLayer::permissive(),
    }
}

async fn health_check() -> &'static str {
    "OK"
}

async fn server_info() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "Parlor Server",
        "protocol_version": PROTOCOL_VERSION,
    }))
}

/// Check the bearer token in constant time.
fn authorize(headers: &HeaderMap, state: &ServerState) -> Result<(), StatusCode> {
    let expected = state.config.admin_token.as_deref().ok_or(StatusCode::NOT_FOUND)?;

    let provided = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    use subtle::ConstantTimeEq;
    if expected.as_bytes().ct_eq(provided.as_bytes()).into() {
        Ok(())
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

async fn admin_stats(
    headers: HeaderMap,
    State(state): State<Arc<ServerState>>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    authorize(&headers, &state)?;
    Ok(Json(serde_json::json!({
        "online_users": state.registry.len(),
        "open_connections": state.connection_count(),
        "max_connections": state.config.max_connections,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BroadcastRequest {
    message_body: String,
}

/// Push a system message to every online session. Sessions whose queue is
/// full are skipped rather than waited on.
async fn admin_broadcast(
    headers: HeaderMap,
    State(state): State<Arc<ServerState>>,
    Json(req): Json<BroadcastRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    authorize(&headers, &state)?;
    if req.message_body.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let push = SystemMessagePush {
        message_body: req.message_body,
        time: unix_millis(),
    };
    let envelope = Envelope::new(PUSH_SYSTEM_MESSAGE, &push)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let mut reached = 0usize;
    let mut skipped = 0usize;
    state.registry.for_each(|session| match session.try_send(&envelope) {
        Ok(()) => reached += 1,
        Err(_) => skipped += 1,
    });
    info!("Broadcast reached {} sessions ({} skipped)", reached, skipped);

    Ok(Json(serde_json::json!({
        "reached": reached,
        "skipped": skipped,
    })))
}
