use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of the session connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closed,
}

/// Observable session state for the presentation layer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: String,

    /// Current lifecycle state
    pub state: ConnectionState,

    /// `state == Open`
    pub connected: bool,

    /// `state == Connecting`
    pub connecting: bool,

    /// User-visible error (precondition or transport), if any
    pub error: Option<String>,

    /// Loudness (RMS) of the latest microphone chunk
    pub volume: f32,

    /// When the current connection attempt started
    pub started_at: Option<DateTime<Utc>>,

    /// Playback units queued or playing
    pub scheduled_units: usize,

    /// Finalized transcript entries
    pub transcript_entries: usize,
}

impl SessionStatus {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Default::default()
        }
    }

    pub fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.connected = state == ConnectionState::Open;
        self.connecting = state == ConnectionState::Connecting;
    }
}
