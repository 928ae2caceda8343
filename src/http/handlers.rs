use super::state::AppState;
use crate::error::SessionError;
use crate::feedback::{score_or_fallback, FeedbackData};
use crate::session::{ConnectionState, LiveSession, SessionConfig, TranscriptEntry};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    /// Optional session ID (if not provided, generate UUID)
    pub session_id: Option<String>,

    #[serde(flatten)]
    pub config: SessionConfig,
}

#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub session_id: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StopSessionResponse {
    pub session_id: String,
    pub status: String,
    pub transcript: Vec<TranscriptEntry>,
    pub feedback: FeedbackData,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}

fn not_found(session_id: &str) -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        format!("Session {} not found", session_id),
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /sessions/start
/// Start a new coaching session
///
/// A session that ended on its own (remote close, transport error) stays
/// registered, with its transcript, until it is stopped. Starting again under
/// its id replaces it; only an active session answers 409.
pub async fn start_session(
    State(state): State<AppState>,
    Json(req): Json<StartSessionRequest>,
) -> impl IntoResponse {
    let session_id = req
        .session_id
        .unwrap_or_else(|| format!("session-{}", uuid::Uuid::new_v4()));

    info!("Starting session: {}", session_id);

    // Hold the write lock across connect so the same id cannot start twice
    let mut sessions = state.sessions.write().await;
    if let Some(existing) = sessions.get(&session_id) {
        if existing.lock().await.state() != ConnectionState::Closed {
            return error_response(
                StatusCode::CONFLICT,
                format!("Session {} already exists", session_id),
            );
        }
        info!("Replacing closed session: {}", session_id);
    }

    let mut session = LiveSession::new(
        session_id.clone(),
        req.config,
        state.config.live_settings(),
        Arc::clone(&state.transport),
        state.config.api_key(),
    );

    match session
        .connect(state.media.media(), state.media.output())
        .await
    {
        Ok(()) => {}
        Err(e @ SessionError::Precondition(_)) => {
            error!("Failed to start session: {}", e);
            return error_response(StatusCode::BAD_REQUEST, e.to_string());
        }
        Err(e) => {
            error!("Failed to start session: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    }

    sessions.insert(session_id.clone(), Arc::new(Mutex::new(session)));

    info!("Session connecting: {}", session_id);

    (
        StatusCode::OK,
        Json(StartSessionResponse {
            session_id: session_id.clone(),
            status: "connecting".to_string(),
            message: format!("Session {} started", session_id),
        }),
    )
        .into_response()
}

/// POST /sessions/stop/:session_id
/// End a session and score its transcript
///
/// Also the way to collect a session that already closed on its own.
pub async fn stop_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    info!("Stopping session: {}", session_id);

    let session = {
        let mut sessions = state.sessions.write().await;
        sessions.remove(&session_id)
    };

    let Some(session) = session else {
        error!("Session {} not found", session_id);
        return not_found(&session_id);
    };

    let (config, transcript) = {
        let mut session = session.lock().await;
        let transcript = session.disconnect().await;
        (session.config().clone(), transcript)
    };

    info!(
        "Session stopped: {} ({} transcript entries)",
        session_id,
        transcript.len()
    );

    let feedback = score_or_fallback(state.scorer.as_deref(), &config, &transcript).await;

    (
        StatusCode::OK,
        Json(StopSessionResponse {
            session_id,
            status: "closed".to_string(),
            transcript,
            feedback,
        }),
    )
        .into_response()
}

/// GET /sessions/:session_id/status
pub async fn get_session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let sessions = state.sessions.read().await;

    match sessions.get(&session_id) {
        Some(session) => {
            let status = session.lock().await.status();
            (StatusCode::OK, Json(status)).into_response()
        }
        None => not_found(&session_id),
    }
}

/// GET /sessions/:session_id/transcript
/// Get the transcript finalized so far
pub async fn get_session_transcript(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let sessions = state.sessions.read().await;

    match sessions.get(&session_id) {
        Some(session) => {
            let transcript = session.lock().await.transcript();
            (StatusCode::OK, Json(transcript)).into_response()
        }
        None => not_found(&session_id),
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
