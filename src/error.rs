//! Session error taxonomy.
//!
//! Only `Precondition` and `Transport` ever reach the user; send, decode and
//! playback failures are recovered where they happen and only logged.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Connect attempted without a media source, credential or reachable endpoint
    #[error("Cannot start session: {0}")]
    Precondition(String),

    /// Channel-level failure after connect
    #[error("Connection error: {0}")]
    Transport(String),

    /// A single outbound chunk or frame could not be sent
    #[error("Failed to send media: {0}")]
    SendFailed(String),

    /// An inbound audio payload could not be decoded
    #[error("Failed to decode audio: {0}")]
    Decode(String),

    /// The output device rejected a decoded unit
    #[error("Failed to schedule playback: {0}")]
    Playback(String),
}

impl SessionError {
    /// Whether the error is surfaced as session-level error state
    pub fn is_user_visible(&self) -> bool {
        matches!(self, Self::Precondition(_) | Self::Transport(_))
    }
}
