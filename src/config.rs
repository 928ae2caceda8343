use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::session::LiveSettings;

/// Environment variable fallback for the live model credential
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub nats: NatsConfig,
    pub live: LiveConfig,
    #[serde(default)]
    pub media: MediaConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    pub url: String,
    /// Subjects are `{subject_prefix}.{session_id}.{setup|input|server|close}`
    pub subject_prefix: String,
    /// Request/reply subject of the feedback scorer
    pub scoring_subject: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiveConfig {
    pub model: String,
    pub voice: String,
    pub api_key: Option<String>,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub chunk_size: usize,
    pub video_interval_ms: u64,
    pub frame_width: u32,
    pub frame_height: u32,
    pub jpeg_quality: f32,
    pub close_timeout_ms: u64,
    /// Outbound realtime inputs queued per connection before sends are dropped
    pub outbound_buffer: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaConfig {
    pub audio_path: Option<String>,
    pub frame_path: Option<String>,
}

impl Config {
    /// Load `path` (any format the `config` crate knows, optional) over the
    /// defaults, then `LOQA_COACH__SECTION__KEY` environment overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = Self::builder()?
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("LOQA_COACH")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("Failed to load config: {}", path))?;

        settings
            .try_deserialize()
            .context("Failed to parse config")
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        let defaults = LiveSettings::default();

        Ok(config::Config::builder()
            .set_default("service.name", "loqa-coach")?
            .set_default("service.http.bind", "127.0.0.1")?
            .set_default("service.http.port", 3030_i64)?
            .set_default("nats.url", "nats://localhost:4222")?
            .set_default("nats.subject_prefix", "live")?
            .set_default("nats.scoring_subject", "coach.feedback.request")?
            .set_default("live.model", defaults.model)?
            .set_default("live.voice", defaults.voice)?
            .set_default("live.input_sample_rate", 16000_i64)?
            .set_default("live.output_sample_rate", defaults.output_sample_rate as i64)?
            .set_default("live.chunk_size", defaults.chunk_size as i64)?
            .set_default("live.video_interval_ms", defaults.video_interval.as_millis() as i64)?
            .set_default("live.frame_width", defaults.frame_width as i64)?
            .set_default("live.frame_height", defaults.frame_height as i64)?
            .set_default("live.jpeg_quality", defaults.jpeg_quality as f64)?
            .set_default("live.close_timeout_ms", defaults.close_timeout.as_millis() as i64)?
            .set_default("live.outbound_buffer", 64_i64)?)
    }

    /// Defaults only, without file or environment sources
    pub fn defaults() -> Result<Self> {
        Ok(Self::builder()?.build()?.try_deserialize()?)
    }

    /// Media parameters for new sessions
    pub fn live_settings(&self) -> LiveSettings {
        LiveSettings {
            model: self.live.model.clone(),
            voice: self.live.voice.clone(),
            chunk_size: self.live.chunk_size,
            output_sample_rate: self.live.output_sample_rate,
            video_interval: Duration::from_millis(self.live.video_interval_ms),
            frame_width: self.live.frame_width,
            frame_height: self.live.frame_height,
            jpeg_quality: self.live.jpeg_quality,
            close_timeout: Duration::from_millis(self.live.close_timeout_ms),
        }
    }

    /// Live credential from config, falling back to `GEMINI_API_KEY`
    pub fn api_key(&self) -> Option<String> {
        self.live
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|key| !key.trim().is_empty())
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.service.http.bind, self.service.http.port)
    }
}
