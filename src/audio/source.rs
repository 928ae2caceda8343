use anyhow::{bail, Context, Result};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::codec::PCM_SAMPLE_RATE;
use super::file::AudioFile;

/// Live audio + video device stream
///
/// Implementations:
/// - `FileMediaSource`: WAV file + optional still JPEG (headless runs, tests)
/// - device-backed adapters supplied by the embedding application
#[async_trait::async_trait]
pub trait MediaSource: Send {
    /// Open the microphone tap
    ///
    /// Returns a receiver yielding fixed windows of `chunk_size` mono samples
    /// at 16kHz. The tap stays active until `stop_audio` is called.
    async fn start_audio(&mut self, chunk_size: usize) -> Result<mpsc::Receiver<Vec<f32>>>;

    /// Close the microphone tap
    async fn stop_audio(&mut self) -> Result<()>;

    /// Current video dimensions; `(0, 0)` until the camera produces frames
    fn video_dimensions(&self) -> (u32, u32);

    /// Grab the current frame downsampled to `width`x`height`, JPEG-compressed at `quality`
    ///
    /// Runs on tokio's blocking pool, so it may block for the whole grab.
    fn capture_frame(&mut self, width: u32, height: u32, quality: f32) -> Result<Vec<u8>>;

    /// Release all device handles
    async fn release(&mut self) -> Result<()>;

    /// Adapter name for logging
    fn name(&self) -> &str;
}

/// Media source replaying a WAV file in real time, with an optional still frame
pub struct FileMediaSource {
    samples: Vec<f32>,
    frame: Option<Vec<u8>>,
    frame_size: (u32, u32),
    pump: Option<JoinHandle<()>>,
    released: bool,
}

impl FileMediaSource {
    /// Load the audio (and optional JPEG still) from disk
    pub fn open(audio_path: impl AsRef<Path>, frame_path: Option<&Path>) -> Result<Self> {
        let audio = AudioFile::open(audio_path)?;
        let samples = audio.to_mono(PCM_SAMPLE_RATE);

        let frame = match frame_path {
            Some(path) => Some(
                std::fs::read(path)
                    .with_context(|| format!("Failed to read frame: {}", path.display()))?,
            ),
            None => None,
        };

        Ok(Self::from_parts(samples, frame))
    }

    /// Build from in-memory 16kHz mono samples and an optional JPEG still
    pub fn from_parts(samples: Vec<f32>, frame: Option<Vec<u8>>) -> Self {
        // The still is served as-is; it is expected to be pre-sized.
        let frame_size = if frame.is_some() { (640, 480) } else { (0, 0) };
        Self {
            samples,
            frame,
            frame_size,
            pump: None,
            released: false,
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.pump.is_some()
    }
}

#[async_trait::async_trait]
impl MediaSource for FileMediaSource {
    async fn start_audio(&mut self, chunk_size: usize) -> Result<mpsc::Receiver<Vec<f32>>> {
        if self.released {
            bail!("Media source already released");
        }
        if self.pump.is_some() {
            bail!("Already capturing");
        }
        if chunk_size == 0 {
            bail!("Chunk size must be positive");
        }

        let (tx, rx) = mpsc::channel(8);
        let samples = self.samples.clone();
        let period = Duration::from_secs_f64(chunk_size as f64 / PCM_SAMPLE_RATE as f64);

        info!(
            "Starting file audio tap ({} samples, {}-sample chunks every {:?})",
            samples.len(),
            chunk_size,
            period
        );

        self.pump = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            for chunk in samples.chunks(chunk_size) {
                ticker.tick().await;
                let mut window = chunk.to_vec();
                window.resize(chunk_size, 0.0);
                if tx.send(window).await.is_err() {
                    break;
                }
            }
            debug!("File audio tap drained");
        }));

        Ok(rx)
    }

    async fn stop_audio(&mut self) -> Result<()> {
        if let Some(pump) = self.pump.take() {
            pump.abort();
            info!("File audio tap stopped");
        }
        Ok(())
    }

    fn video_dimensions(&self) -> (u32, u32) {
        self.frame_size
    }

    fn capture_frame(&mut self, _width: u32, _height: u32, _quality: f32) -> Result<Vec<u8>> {
        match &self.frame {
            Some(frame) => Ok(frame.clone()),
            None => bail!("No video frame available"),
        }
    }

    async fn release(&mut self) -> Result<()> {
        self.stop_audio().await?;
        self.frame = None;
        self.frame_size = (0, 0);
        self.released = true;
        Ok(())
    }

    fn name(&self) -> &str {
        "WAV file"
    }
}
