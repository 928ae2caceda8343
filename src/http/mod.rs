//! HTTP API server for external control
//!
//! This module provides a REST API for controlling coaching sessions:
//! - POST /sessions/start - Start a new session
//! - POST /sessions/stop/:id - End a session and score it
//! - GET /sessions/:id/status - Query session status
//! - GET /sessions/:id/transcript - Get the finalized transcript
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::{AppState, FileMediaProvider, MediaProvider};
