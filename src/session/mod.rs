//! Live coaching session management
//!
//! This module provides the `LiveSession` abstraction that manages:
//! - Connection lifecycle (connect, open, disconnect, teardown)
//! - Microphone and camera capture, encoding and sending
//! - Decoding and gapless scheduling of inbound speech
//! - Interruption handling
//! - Transcript accumulation and the observable session status

mod capture;
mod channel;
mod config;
mod controller;
mod playback;
mod stats;
mod transcript;

pub use capture::{CapturePipeline, CaptureStats, SharedMedia, VideoTick};
pub use channel::SessionChannel;
pub use config::{LiveSettings, SessionConfig, SessionDetails, SessionMode, Stance};
pub use controller::LiveSession;
pub use playback::{PlaybackScheduler, ScheduledUnit};
pub use stats::{ConnectionState, SessionStatus};
pub use transcript::{Role, TranscriptAccumulator, TranscriptEntry, TranscriptHistory};
