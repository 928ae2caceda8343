use crate::audio::{AudioOutput, ClockOutput, FileMediaSource, MediaSource};
use crate::config::Config;
use crate::feedback::SessionScorer;
use crate::live::LiveTransport;
use crate::session::LiveSession;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::warn;

/// Supplies devices for new sessions
pub trait MediaProvider: Send + Sync {
    /// Media source for a new session; `None` when no stream is available
    fn media(&self) -> Option<Box<dyn MediaSource>>;

    /// Output device for a new session
    fn output(&self) -> Box<dyn AudioOutput>;
}

/// Serves the configured WAV file (and optional still frame) to every session
pub struct FileMediaProvider {
    audio_path: Option<PathBuf>,
    frame_path: Option<PathBuf>,
}

impl FileMediaProvider {
    pub fn new(audio_path: Option<PathBuf>, frame_path: Option<PathBuf>) -> Self {
        Self {
            audio_path,
            frame_path,
        }
    }
}

impl MediaProvider for FileMediaProvider {
    fn media(&self) -> Option<Box<dyn MediaSource>> {
        let audio_path = self.audio_path.as_ref()?;
        match FileMediaSource::open(audio_path, self.frame_path.as_deref()) {
            Ok(source) => Some(Box::new(source)),
            Err(e) => {
                warn!("Failed to open media source: {:#}", e);
                None
            }
        }
    }

    fn output(&self) -> Box<dyn AudioOutput> {
        Box::new(ClockOutput::new())
    }
}

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Live sessions (session_id → session)
    pub sessions: Arc<RwLock<HashMap<String, Arc<Mutex<LiveSession>>>>>,
    pub config: Arc<Config>,
    pub transport: Arc<dyn LiveTransport>,
    pub media: Arc<dyn MediaProvider>,
    pub scorer: Option<Arc<dyn SessionScorer>>,
}

impl AppState {
    pub fn new(
        config: Config,
        transport: Arc<dyn LiveTransport>,
        media: Arc<dyn MediaProvider>,
        scorer: Option<Arc<dyn SessionScorer>>,
    ) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            config: Arc::new(config),
            transport,
            media,
            scorer,
        }
    }
}
