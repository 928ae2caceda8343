use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::channel::SessionChannel;
use super::config::LiveSettings;
use crate::audio::codec;
use crate::audio::source::MediaSource;
use crate::live::messages::RealtimeInput;

/// Media source shared between the session worker and in-flight frame grabs
pub type SharedMedia = Arc<Mutex<Box<dyn MediaSource>>>;

/// Outcome of one video timer tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoTick {
    /// The camera has not reported dimensions yet; nothing was attempted
    NotReady,
    /// The previous frame is still being captured; this tick was skipped
    Busy,
    /// A frame was handed to the channel
    Sent,
    /// Capture or send failed; the frame was dropped
    Dropped,
}

/// Capture counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStats {
    pub chunks_sent: u64,
    pub chunks_dropped: u64,
    pub frames_sent: u64,
    pub frames_skipped: u64,
    pub frames_busy: u64,
    pub frames_dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    chunks_sent: AtomicU64,
    chunks_dropped: AtomicU64,
    frames_sent: AtomicU64,
    frames_skipped: AtomicU64,
    frames_busy: AtomicU64,
    frames_dropped: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Microphone and camera capture: measure, encode, send, never queue
///
/// Clones share counters, so a frame grab running on another thread reports
/// into the same stats as the session worker.
#[derive(Debug, Clone)]
pub struct CapturePipeline {
    frame_width: u32,
    frame_height: u32,
    jpeg_quality: f32,
    counters: Arc<Counters>,
}

impl CapturePipeline {
    pub fn new(settings: &LiveSettings) -> Self {
        Self {
            frame_width: settings.frame_width,
            frame_height: settings.frame_height,
            jpeg_quality: settings.jpeg_quality,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Process one microphone chunk
    ///
    /// Returns the chunk's loudness, computed whether or not the chunk could
    /// be sent. A chunk that cannot be sent is dropped.
    pub fn handle_audio_chunk(&self, samples: &[f32], channel: &SessionChannel) -> f32 {
        let loudness = codec::rms(samples);

        if !channel.is_open() {
            bump(&self.counters.chunks_dropped);
            return loudness;
        }

        let input = RealtimeInput {
            media: codec::encode_audio(samples),
        };

        match channel.send(input) {
            Ok(()) => bump(&self.counters.chunks_sent),
            Err(e) => {
                bump(&self.counters.chunks_dropped);
                warn!("Error sending audio: {}", e);
            }
        }

        loudness
    }

    /// Capture, encode and send one frame on the calling thread
    pub fn handle_video_tick(&self, source: &mut dyn MediaSource, channel: &SessionChannel) -> VideoTick {
        let (width, height) = source.video_dimensions();
        if width == 0 || height == 0 {
            bump(&self.counters.frames_skipped);
            return VideoTick::NotReady;
        }

        let jpeg = match source.capture_frame(self.frame_width, self.frame_height, self.jpeg_quality) {
            Ok(jpeg) => jpeg,
            Err(e) => {
                bump(&self.counters.frames_dropped);
                warn!("Frame capture error: {:#}", e);
                return VideoTick::Dropped;
            }
        };

        let input = RealtimeInput {
            media: codec::encode_image(&jpeg),
        };

        match channel.send(input) {
            Ok(()) => {
                bump(&self.counters.frames_sent);
                debug!("Sent video frame ({} bytes)", jpeg.len());
                VideoTick::Sent
            }
            Err(e) => {
                bump(&self.counters.frames_dropped);
                warn!("Frame send error: {}", e);
                VideoTick::Dropped
            }
        }
    }

    /// Start a frame grab on the blocking pool and return without waiting
    ///
    /// `in_flight` is the previous grab, if any. While it is still running, or
    /// the media source is otherwise locked, the tick is skipped and `None` is
    /// returned.
    pub fn spawn_video_tick(
        &self,
        media: &SharedMedia,
        channel: &SessionChannel,
        in_flight: Option<&JoinHandle<VideoTick>>,
    ) -> Option<JoinHandle<VideoTick>> {
        if in_flight.is_some_and(|task| !task.is_finished()) {
            return self.skip_busy();
        }

        let Ok(mut source) = Arc::clone(media).try_lock_owned() else {
            return self.skip_busy();
        };

        let (width, height) = source.video_dimensions();
        if width == 0 || height == 0 {
            bump(&self.counters.frames_skipped);
            return None;
        }

        let capture = self.clone();
        let channel = channel.clone();
        Some(tokio::task::spawn_blocking(move || {
            capture.handle_video_tick(&mut **source, &channel)
        }))
    }

    fn skip_busy(&self) -> Option<JoinHandle<VideoTick>> {
        bump(&self.counters.frames_busy);
        debug!("Previous frame still in flight, skipping tick");
        None
    }

    pub fn stats(&self) -> CaptureStats {
        let c = &self.counters;
        CaptureStats {
            chunks_sent: c.chunks_sent.load(Ordering::Relaxed),
            chunks_dropped: c.chunks_dropped.load(Ordering::Relaxed),
            frames_sent: c.frames_sent.load(Ordering::Relaxed),
            frames_skipped: c.frames_skipped.load(Ordering::Relaxed),
            frames_busy: c.frames_busy.load(Ordering::Relaxed),
            frames_dropped: c.frames_dropped.load(Ordering::Relaxed),
        }
    }
}
