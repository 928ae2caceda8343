//! Post-session feedback
//!
//! Once a session ends, the finalized transcript is sent to a scoring model
//! together with the session context. Any scoring failure degrades to a fixed
//! fallback report so that ending a session always yields feedback.

use anyhow::{Context, Result};
use async_nats::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

use crate::session::{SessionConfig, SessionMode, TranscriptEntry};

/// Model used for the post-session analysis
pub const FEEDBACK_MODEL: &str = "gemini-2.5-flash";

/// Structured evaluation of a finished session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackData {
    /// 0-100
    pub visual_score: u32,
    /// 0-100, clarity and fillers
    pub verbal_score: u32,
    /// 0-100, argument strength
    pub content_score: u32,
    pub key_improvements: Vec<String>,
    pub summary: String,
}

impl FeedbackData {
    /// Report used when the analysis could not be produced
    pub fn fallback() -> Self {
        Self {
            visual_score: 0,
            verbal_score: 0,
            content_score: 0,
            key_improvements: vec![
                "Could not generate specific feedback due to an error.".to_string()
            ],
            summary: "Session ended, but detailed analysis failed.".to_string(),
        }
    }
}

/// Scores a finished session
#[async_trait::async_trait]
pub trait SessionScorer: Send + Sync {
    async fn score(&self, config: &SessionConfig, history: &[TranscriptEntry]) -> Result<FeedbackData>;
}

/// Render the transcript as `USER: ...` / `MODEL: ...` lines
pub fn render_transcript(history: &[TranscriptEntry]) -> String {
    history
        .iter()
        .map(|entry| format!("{}: {}", entry.role.label(), entry.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the analysis prompt for a finished session
pub fn build_feedback_prompt(config: &SessionConfig, history: &[TranscriptEntry]) -> String {
    let mode = match config.mode {
        SessionMode::Interview => "interview",
        SessionMode::Debate => "debate",
    };
    let language = config
        .details
        .language
        .as_deref()
        .filter(|l| !l.trim().is_empty())
        .unwrap_or("English");
    let context = serde_json::to_string(&config.details).unwrap_or_else(|_| "{}".to_string());

    format!(
        "Analyze the following transcript of a {mode} session.\n\
         Context: {context}\n\
         Language: {language}\n\
         \n\
         TRANSCRIPT:\n\
         {transcript}\n\
         \n\
         Provide a structured evaluation in JSON format with:\n\
         - visualScore (0-100, estimate based on implicit context or default to 85 if not mentioned)\n\
         - verbalScore (0-100 based on clarity, fillers)\n\
         - contentScore (0-100 based on argument strength)\n\
         - keyImprovements (Array of strings, max 3, in {language})\n\
         - summary (Short paragraph in {language})",
        transcript = render_transcript(history),
    )
}

/// Score the session, or fall back to the fixed report on any error
pub async fn score_or_fallback(
    scorer: Option<&dyn SessionScorer>,
    config: &SessionConfig,
    history: &[TranscriptEntry],
) -> FeedbackData {
    let Some(scorer) = scorer else {
        return FeedbackData::fallback();
    };

    match scorer.score(config, history).await {
        Ok(mut feedback) => {
            feedback.key_improvements.truncate(3);
            feedback
        }
        Err(e) => {
            error!("Feedback generation failed: {:#}", e);
            FeedbackData::fallback()
        }
    }
}

/// Analysis request published to the scoring service
#[derive(Debug, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub model: String,
    pub prompt: String,
    pub response_mime_type: String,
}

/// Scorer that asks a NATS-attached analysis service (request/reply)
pub struct NatsScorer {
    client: Client,
    subject: String,
    timeout: Duration,
}

impl NatsScorer {
    pub async fn connect(url: &str, subject: impl Into<String>) -> Result<Self> {
        info!("Connecting feedback scorer to NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .context("Failed to connect to NATS")?;

        Ok(Self {
            client,
            subject: subject.into(),
            timeout: Duration::from_secs(30),
        })
    }
}

#[async_trait::async_trait]
impl SessionScorer for NatsScorer {
    async fn score(&self, config: &SessionConfig, history: &[TranscriptEntry]) -> Result<FeedbackData> {
        let request = FeedbackRequest {
            model: FEEDBACK_MODEL.to_string(),
            prompt: build_feedback_prompt(config, history),
            response_mime_type: "application/json".to_string(),
        };
        let payload = serde_json::to_vec(&request)?;

        let reply = tokio::time::timeout(
            self.timeout,
            self.client.request(self.subject.clone(), payload.into()),
        )
        .await
        .context("Feedback request timed out")?
        .context("Failed to request feedback")?;

        if reply.payload.is_empty() {
            anyhow::bail!("No feedback generated");
        }

        serde_json::from_slice(&reply.payload).context("Failed to parse feedback")
    }
}
