//! HTTP routes for the session relay.
//!
//! Defines the Axum router and application state:
//! - `GET /ws` - WebSocket endpoint for session traffic
//! - `POST /api/sessions` - Allocate a session id ahead of any join
//! - `GET /api/sessions/{id}` - Existence and size of a session
//! - `/health`, `/ready` - Probes (see [`crate::observability`])

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::error;

use crate::actors::registry::SessionRegistryHandle;
use crate::config::Config;
use crate::connection::handle_socket;
use crate::observability::{health_router, HealthState};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Handle to the registry actor.
    pub registry: SessionRegistryHandle,

    /// Service configuration.
    pub config: Config,
}

/// Build the application routes.
///
/// The REST routes get a request timeout; the WebSocket route does not,
/// since the upgraded connection outlives the HTTP exchange.
pub fn build_routes(state: Arc<AppState>, health_state: Arc<HealthState>) -> Router {
    let api_routes = Router::new()
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:session_id", get(session_status))
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .with_state(Arc::clone(&state));

    let ws_routes = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state);

    api_routes
        .merge(ws_routes)
        .merge(health_router(health_state))
        .layer(TraceLayer::new_for_http())
}

/// Response for `GET /api/sessions/{id}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionStatusResponse {
    exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    participant_count: Option<usize>,
}

/// Response for `POST /api/sessions`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionResponse {
    session_id: String,
}

/// Handler for `GET /ws`: upgrade and hand the socket to its task.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let registry = state.registry.clone();
    let buffer = state.config.connection_buffer;
    ws.on_upgrade(move |socket| handle_socket(socket, registry, buffer))
}

/// Handler for `POST /api/sessions`: allocate a session id so a client can
/// share a link before anyone connects.
async fn create_session(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CreateSessionResponse>, StatusCode> {
    let session_id = state.registry.allocate_session().await.map_err(|e| {
        error!(target: "relay.http", error = %e, "Failed to allocate session");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(CreateSessionResponse { session_id }))
}

/// Handler for `GET /api/sessions/{id}`: does it exist and how many seats
/// are taken. Never creates a session.
async fn session_status(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionStatusResponse>, StatusCode> {
    let status = state.registry.session_status(session_id).await.map_err(|e| {
        error!(target: "relay.http", error = %e, "Failed to query session status");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(SessionStatusResponse {
        exists: status.exists,
        participant_count: status.exists.then_some(status.participant_count),
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::util::ServiceExt;

    fn test_app() -> Router {
        let config = Config::from_vars(&std::collections::HashMap::new()).unwrap();
        let registry = SessionRegistryHandle::new(&config);
        let state = Arc::new(AppState { registry, config });
        build_routes(state, Arc::new(HealthState::new()))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn create_session_returns_a_session_id() {
        let app = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/sessions")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let session_id = body.get("sessionId").and_then(|v| v.as_str()).unwrap();
        assert_eq!(session_id.len(), 9);
    }

    #[tokio::test]
    async fn status_of_created_session_reports_zero_participants() {
        let config = Config::from_vars(&std::collections::HashMap::new()).unwrap();
        let registry = SessionRegistryHandle::new(&config);
        let state = Arc::new(AppState {
            registry: registry.clone(),
            config,
        });
        let app = build_routes(state, Arc::new(HealthState::new()));

        let session_id = registry.allocate_session().await.unwrap();
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/sessions/{session_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body.get("exists"), Some(&serde_json::json!(true)));
        assert_eq!(body.get("participantCount"), Some(&serde_json::json!(0)));
    }

    #[tokio::test]
    async fn status_of_unknown_session_omits_participant_count() {
        let app = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/sessions/nosuchid1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body.get("exists"), Some(&serde_json::json!(false)));
        assert!(body.get("participantCount").is_none());
    }

    #[tokio::test]
    async fn health_endpoints_are_mounted() {
        let app = test_app();
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
