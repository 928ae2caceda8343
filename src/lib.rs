pub mod audio;
pub mod config;
pub mod error;
pub mod feedback;
pub mod http;
pub mod live;
pub mod session;

pub use audio::{AudioFile, AudioOutput, ClockOutput, FileMediaSource, MediaSource};
pub use config::Config;
pub use error::SessionError;
pub use feedback::{FeedbackData, NatsScorer, SessionScorer};
pub use http::{create_router, AppState};
pub use live::{LiveTransport, NatsTransport};
pub use session::{
    ConnectionState, LiveSession, Role, SessionConfig, SessionDetails, SessionMode, SessionStatus,
    Stance, TranscriptEntry,
};
