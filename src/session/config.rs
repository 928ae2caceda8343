use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::audio::codec::OUTPUT_SAMPLE_RATE;

/// Kind of coaching session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    Interview,
    Debate,
}

/// The user's side in a debate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum Stance {
    Pro,
    Con,
}

impl fmt::Display for Stance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stance::Pro => write!(f, "Pro"),
            Stance::Con => write!(f, "Con"),
        }
    }
}

/// Contextual parameters of a session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionDetails {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub stance: Option<Stance>,
    #[serde(default)]
    pub language: Option<String>,
}

/// Configuration for a coaching session (read-only once the session starts)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub mode: SessionMode,
    #[serde(default)]
    pub details: SessionDetails,
}

/// Fixed media parameters of a live session
#[derive(Debug, Clone)]
pub struct LiveSettings {
    /// Live model identifier
    pub model: String,

    /// Prebuilt voice used for synthesized speech
    pub voice: String,

    /// Samples per outbound audio chunk (at 16kHz)
    /// Default: 4096 (~256ms)
    pub chunk_size: usize,

    /// Sample rate of inbound speech
    pub output_sample_rate: u32,

    /// Interval between outbound video frames
    /// Default: 500ms
    pub video_interval: Duration,

    /// Outbound frame width
    pub frame_width: u32,

    /// Outbound frame height
    pub frame_height: u32,

    /// JPEG quality (0.0 to 1.0)
    pub jpeg_quality: f32,

    /// Upper bound on closing the live connection during teardown
    /// Default: 5s
    pub close_timeout: Duration,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash-native-audio-preview-09-2025".to_string(),
            voice: "Kore".to_string(),
            chunk_size: 4096,
            output_sample_rate: OUTPUT_SAMPLE_RATE,
            video_interval: Duration::from_millis(500),
            frame_width: 640,
            frame_height: 480,
            jpeg_quality: 0.6,
            close_timeout: Duration::from_secs(5),
        }
    }
}
