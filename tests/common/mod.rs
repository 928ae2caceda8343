// Shared in-memory fakes for session integration tests:
// a scriptable live transport, a media source driven by the test, and an
// output device whose clock only moves when the test says so.

#![allow(dead_code)]

use anyhow::{bail, Result};
use base64::Engine;
use loqa_coach::audio::{AudioOutput, MediaSource, PlaybackBuffer, UnitId};
use loqa_coach::live::{
    ChannelEvent, ConnectionControl, LiveConnection, LiveSetup, LiveTransport, OutboundLink,
    RealtimeInput, ServerMessage,
};
use loqa_coach::session::{LiveSettings, SessionConfig, SessionDetails, SessionMode};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

// ============================================================================
// Transport
// ============================================================================

#[derive(Debug, Clone)]
pub enum OpenMode {
    Accept,
    Fail(String),
    /// `open` never completes
    Hang,
}

/// Remote end of an opened fake connection
pub struct RemoteEnd {
    pub events: mpsc::Sender<ChannelEvent>,
    pub outbound: mpsc::Receiver<RealtimeInput>,
    pub setup: LiveSetup,
    pub api_key: String,
}

impl RemoteEnd {
    pub async fn send(&self, event: ChannelEvent) {
        self.events.send(event).await.unwrap();
    }

    pub async fn message(&self, json: serde_json::Value) {
        let message: ServerMessage = serde_json::from_value(json).unwrap();
        self.send(ChannelEvent::Message(message)).await;
    }
}

pub struct FakeTransport {
    mode: OpenMode,
    stuck_close: bool,
    remotes: mpsc::UnboundedSender<RemoteEnd>,
    pub closes: Arc<AtomicUsize>,
}

impl FakeTransport {
    pub fn new(mode: OpenMode) -> (Arc<Self>, mpsc::UnboundedReceiver<RemoteEnd>) {
        Self::build(mode, false)
    }

    /// Accepts connections whose `close` never completes, like a flush
    /// against a server that went away
    pub fn with_stuck_close() -> (Arc<Self>, mpsc::UnboundedReceiver<RemoteEnd>) {
        Self::build(OpenMode::Accept, true)
    }

    fn build(mode: OpenMode, stuck_close: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<RemoteEnd>) {
        let (remotes, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            mode,
            stuck_close,
            remotes,
            closes: Arc::new(AtomicUsize::new(0)),
        });
        (transport, rx)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

struct FakeControl {
    closes: Arc<AtomicUsize>,
    stuck: bool,
}

#[async_trait::async_trait]
impl ConnectionControl for FakeControl {
    async fn close(&mut self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.stuck {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl LiveTransport for FakeTransport {
    async fn open(&self, _session_id: &str, api_key: &str, setup: &LiveSetup) -> Result<LiveConnection> {
        match &self.mode {
            OpenMode::Accept => {}
            OpenMode::Fail(reason) => bail!("{}", reason),
            OpenMode::Hang => std::future::pending::<()>().await,
        }

        let (events, inbound) = mpsc::channel(64);
        let (outbound, outbound_rx) = OutboundLink::channel(256);

        let _ = self.remotes.send(RemoteEnd {
            events,
            outbound: outbound_rx,
            setup: setup.clone(),
            api_key: api_key.to_string(),
        });

        Ok(LiveConnection {
            outbound,
            inbound,
            control: Box::new(FakeControl {
                closes: Arc::clone(&self.closes),
                stuck: self.stuck_close,
            }),
        })
    }

    fn name(&self) -> &str {
        "fake"
    }
}

// ============================================================================
// Media source
// ============================================================================

#[derive(Clone, Default)]
pub struct MediaProbe {
    pub calls: Arc<Mutex<Vec<&'static str>>>,
    pub audio_tx: Arc<Mutex<Option<mpsc::Sender<Vec<f32>>>>>,
    pub frames: Arc<AtomicUsize>,
}

impl MediaProbe {
    /// Frame grabs started so far
    pub fn frames(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn tap_active(&self) -> bool {
        self.audio_tx.lock().unwrap().is_some()
    }

    pub async fn push_chunk(&self, samples: Vec<f32>) {
        let tx = self.audio_tx.lock().unwrap().clone().expect("audio tap not started");
        tx.send(samples).await.unwrap();
    }
}

pub struct FakeMedia {
    probe: MediaProbe,
    dimensions: (u32, u32),
    frame_delay: Duration,
}

impl FakeMedia {
    pub fn new(dimensions: (u32, u32)) -> (Box<Self>, MediaProbe) {
        Self::with_frame_delay(dimensions, Duration::ZERO)
    }

    /// A camera whose frame grab blocks the calling thread for `delay`
    pub fn slow_camera(delay: Duration) -> (Box<Self>, MediaProbe) {
        Self::with_frame_delay((640, 480), delay)
    }

    fn with_frame_delay(dimensions: (u32, u32), frame_delay: Duration) -> (Box<Self>, MediaProbe) {
        let probe = MediaProbe::default();
        let media = Box::new(Self {
            probe: probe.clone(),
            dimensions,
            frame_delay,
        });
        (media, probe)
    }
}

#[async_trait::async_trait]
impl MediaSource for FakeMedia {
    async fn start_audio(&mut self, _chunk_size: usize) -> Result<mpsc::Receiver<Vec<f32>>> {
        self.probe.calls.lock().unwrap().push("start_audio");
        let (tx, rx) = mpsc::channel(16);
        *self.probe.audio_tx.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn stop_audio(&mut self) -> Result<()> {
        self.probe.calls.lock().unwrap().push("stop_audio");
        self.probe.audio_tx.lock().unwrap().take();
        Ok(())
    }

    fn video_dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    fn capture_frame(&mut self, _width: u32, _height: u32, _quality: f32) -> Result<Vec<u8>> {
        self.probe.frames.fetch_add(1, Ordering::SeqCst);
        if !self.frame_delay.is_zero() {
            std::thread::sleep(self.frame_delay);
        }
        Ok(vec![0xFF, 0xD8, 0xFF, 0xD9])
    }

    async fn release(&mut self) -> Result<()> {
        self.probe.calls.lock().unwrap().push("release");
        Ok(())
    }

    fn name(&self) -> &str {
        "fake"
    }
}

// ============================================================================
// Output device
// ============================================================================

#[derive(Clone, Default)]
pub struct OutputProbe {
    pub now: Arc<Mutex<f64>>,
    /// (id, start_at, duration)
    pub started: Arc<Mutex<Vec<(UnitId, f64, f64)>>>,
    pub stopped: Arc<Mutex<Vec<UnitId>>>,
    pub closed: Arc<Mutex<bool>>,
    pub finished: Arc<Mutex<Option<mpsc::UnboundedSender<UnitId>>>>,
}

impl OutputProbe {
    pub fn set_now(&self, now: f64) {
        *self.now.lock().unwrap() = now;
    }

    pub fn started(&self) -> Vec<(UnitId, f64, f64)> {
        self.started.lock().unwrap().clone()
    }

    pub fn stopped(&self) -> Vec<UnitId> {
        self.stopped.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }

    /// Report a unit as finished, as the device would
    pub fn finish(&self, id: UnitId) {
        if let Some(tx) = self.finished.lock().unwrap().as_ref() {
            let _ = tx.send(id);
        }
    }
}

pub struct FakeOutput {
    probe: OutputProbe,
}

impl FakeOutput {
    pub fn new() -> (Box<Self>, OutputProbe) {
        let probe = OutputProbe::default();
        (Box::new(Self { probe: probe.clone() }), probe)
    }
}

impl AudioOutput for FakeOutput {
    fn open(&mut self, finished: mpsc::UnboundedSender<UnitId>) -> Result<()> {
        *self.probe.finished.lock().unwrap() = Some(finished);
        Ok(())
    }

    fn now(&self) -> f64 {
        *self.probe.now.lock().unwrap()
    }

    fn play(&mut self, id: UnitId, buffer: &PlaybackBuffer, start_at: f64) -> Result<()> {
        self.probe
            .started
            .lock()
            .unwrap()
            .push((id, start_at, buffer.duration()));
        Ok(())
    }

    fn stop(&mut self, id: UnitId) -> Result<()> {
        self.probe.stopped.lock().unwrap().push(id);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        *self.probe.closed.lock().unwrap() = true;
        self.probe.finished.lock().unwrap().take();
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn interview() -> SessionConfig {
    SessionConfig {
        mode: SessionMode::Interview,
        details: SessionDetails {
            role: Some("Backend Engineer".to_string()),
            company: Some("Acme".to_string()),
            ..Default::default()
        },
    }
}

/// Settings with a short video interval so ticks happen quickly
pub fn fast_settings() -> LiveSettings {
    LiveSettings {
        video_interval: Duration::from_millis(20),
        close_timeout: Duration::from_millis(200),
        ..LiveSettings::default()
    }
}

/// Base64 16-bit PCM of `ms` milliseconds of silence at 24kHz
pub fn speech_payload(ms: u32) -> String {
    let bytes = vec![0u8; (24 * ms * 2) as usize];
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn audio_message(ms: u32) -> serde_json::Value {
    serde_json::json!({
        "serverContent": {
            "modelTurn": {
                "parts": [{ "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": speech_payload(ms) } }]
            }
        }
    })
}

/// Poll `condition` until it holds, or panic after two seconds
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
