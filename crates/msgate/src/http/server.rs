//! HTTP routes over the gateway facade.
//!
//! Handlers are thin: they decode the request, call one [`Gateway`]
//! operation and encode its result. All lifecycle logic lives in the
//! session layer.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, instrument};

use msgate_session::Gateway;

use crate::api::*;
use crate::http::error::ApiError;

/// Shared state handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Facade over the supervisor
    pub gateway: Gateway,
}

impl AppState {
    /// Wrap `gateway` for use as router state.
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }
}

/// Build the router, with a permissive CORS layer when `cors` is set.
pub fn router(state: AppState, cors: bool) -> Router {
    let app = Router::new()
        .route("/", get(banner))
        .route("/health", get(health))
        .route("/sessions", get(list_sessions))
        .route("/sessions/:session_id/status", get(session_status))
        .route("/sessions/:session_id/pairing-code", get(pairing_code))
        .route("/sessions/:session_id/reconnect", post(reconnect))
        .route("/sessions/:session_id/clear", post(clear))
        .route("/messages", post(send_message))
        .with_state(state);

    if cors {
        app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        app
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn banner(State(state): State<AppState>) -> Json<BannerResponse> {
    Json(BannerResponse {
        service: "msgate".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sessions: state.gateway.supervisor().registry().len().await,
    })
}

#[instrument(skip_all)]
async fn list_sessions(State(state): State<AppState>) -> Json<SessionListResponse> {
    let sessions: Vec<SessionSummary> = state
        .gateway
        .list_sessions()
        .await
        .into_iter()
        .map(SessionSummary::from)
        .collect();
    debug!("Listing {} session(s)", sessions.len());

    Json(SessionListResponse {
        count: sessions.len(),
        sessions,
    })
}

#[instrument(skip_all)]
async fn session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    debug!("Status requested for {}", session_id);
    let report = state.gateway.get_status(&session_id).await?;
    Ok(Json(StatusResponse::from(report)))
}

#[instrument(skip_all)]
async fn pairing_code(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<PairingCodeResponse>, ApiError> {
    let pairing_code = state.gateway.get_pairing_code(&session_id).await?;
    Ok(Json(PairingCodeResponse {
        session_id,
        pairing_code,
    }))
}

#[instrument(skip_all)]
async fn reconnect(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<AcceptedResponse>, ApiError> {
    match state.gateway.reconnect(&session_id).await {
        Ok(()) => {}
        // The attempt was made and a retry is scheduled; the request itself was accepted
        Err(msgate_core::Error::TransportFailure { message, .. }) => {
            info!("Reconnect of {} deferred to retry: {}", session_id, message);
        }
        Err(e) => return Err(e.into()),
    }
    Ok(Json(AcceptedResponse::new(session_id)))
}

#[instrument(skip_all)]
async fn clear(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<AcceptedResponse>, ApiError> {
    state.gateway.clear_session(&session_id).await?;
    info!("Cleared session {}", session_id);
    Ok(Json(AcceptedResponse::new(session_id)))
}

#[instrument(skip_all)]
async fn send_message(
    State(state): State<AppState>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Json<SendMessageResponse>, ApiError> {
    let Json(request) = payload?;
    let receipt = state
        .gateway
        .send_message(&request.session_id, &request.recipient, &request.body)
        .await?;
    Ok(Json(SendMessageResponse::from(receipt)))
}
