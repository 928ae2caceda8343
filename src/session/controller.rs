use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::capture::{CapturePipeline, CaptureStats, SharedMedia, VideoTick};
use super::channel::SessionChannel;
use super::config::{LiveSettings, SessionConfig};
use super::playback::PlaybackScheduler;
use super::stats::{ConnectionState, SessionStatus};
use super::transcript::{TranscriptAccumulator, TranscriptEntry, TranscriptHistory};
use crate::audio::output::{AudioOutput, UnitId};
use crate::audio::source::MediaSource;
use crate::error::SessionError;
use crate::live::instruction::system_instruction;
use crate::live::messages::{LiveSetup, ServerMessage};
use crate::live::transport::{ChannelEvent, ConnectionControl, LiveTransport};

/// A live coaching session
///
/// Sequences connect → stream → (interrupt)* → disconnect. Media, playback and
/// transcript state live in a per-connection worker task; this handle owns
/// that task and the finalized transcript history. Dropping the handle tears
/// the worker down.
pub struct LiveSession {
    session_id: String,
    config: SessionConfig,
    settings: LiveSettings,
    transport: Arc<dyn LiveTransport>,
    api_key: Option<String>,
    history: TranscriptHistory,
    status: Arc<watch::Sender<SessionStatus>>,
    worker: Option<Worker>,
}

struct Worker {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<CaptureStats>,
}

impl LiveSession {
    pub fn new(
        session_id: impl Into<String>,
        config: SessionConfig,
        settings: LiveSettings,
        transport: Arc<dyn LiveTransport>,
        api_key: Option<String>,
    ) -> Self {
        let session_id = session_id.into();
        let (status, _) = watch::channel(SessionStatus::new(session_id.clone()));

        Self {
            session_id,
            config,
            settings,
            transport,
            api_key,
            history: TranscriptHistory::new(),
            status: Arc::new(status),
            worker: None,
        }
    }

    /// Start the session
    ///
    /// Fails with `Precondition` when a connection is already in flight, there
    /// is no credential, or there is no media source (checked in that order). Otherwise the session moves to
    /// `Connecting` and the channel is opened in the background; it becomes
    /// `Open` once the remote side acknowledges the setup.
    pub async fn connect(
        &mut self,
        media: Option<Box<dyn MediaSource>>,
        output: Box<dyn AudioOutput>,
    ) -> Result<(), SessionError> {
        match self.state() {
            ConnectionState::Connecting | ConnectionState::Open => {
                return Err(SessionError::Precondition(
                    "Session is already active".to_string(),
                ));
            }
            ConnectionState::Idle | ConnectionState::Closed => {}
        }

        let Some(api_key) = self.api_key.clone().filter(|key| !key.trim().is_empty()) else {
            let err = SessionError::Precondition("API key is missing".to_string());
            self.publish_error(&err);
            return Err(err);
        };

        let Some(media) = media else {
            let err = SessionError::Precondition("Media stream is not ready".to_string());
            self.publish_error(&err);
            return Err(err);
        };

        // A worker that ended on its own (remote close, transport error) is reaped here
        if let Some(worker) = self.worker.take() {
            let _ = worker.task.await;
        }

        info!("Starting live session: {}", self.session_id);

        self.history.reset();
        self.status.send_modify(|s| {
            s.set_state(ConnectionState::Connecting);
            s.error = None;
            s.volume = 0.0;
            s.started_at = Some(Utc::now());
            s.scheduled_units = 0;
            s.transcript_entries = 0;
        });

        let setup = LiveSetup::audio(
            &self.settings.model,
            &self.settings.voice,
            system_instruction(&self.config),
        );

        let engine = SessionEngine::new(
            self.session_id.clone(),
            api_key,
            setup,
            self.settings.clone(),
            Arc::clone(&self.transport),
            media,
            output,
            self.history.clone(),
            Arc::clone(&self.status),
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(engine.run(shutdown_rx));

        self.worker = Some(Worker {
            shutdown: Some(shutdown_tx),
            task,
        });

        Ok(())
    }

    /// End the session and return the finalized transcript
    ///
    /// Valid from any state, including mid-connect. Never fails; calling it
    /// again once closed is a no-op.
    pub async fn disconnect(&mut self) -> Vec<TranscriptEntry> {
        if let Some(mut worker) = self.worker.take() {
            info!("Stopping live session: {}", self.session_id);

            if let Some(shutdown) = worker.shutdown.take() {
                let _ = shutdown.send(());
            }

            match worker.task.await {
                Ok(stats) => info!(
                    "Live session stopped: {} (chunks sent={}, dropped={}, frames sent={}, skipped={}, busy={})",
                    self.session_id,
                    stats.chunks_sent,
                    stats.chunks_dropped,
                    stats.frames_sent,
                    stats.frames_skipped,
                    stats.frames_busy
                ),
                Err(e) => error!("Session worker panicked: {}", e),
            }
        }

        if self.state() != ConnectionState::Closed {
            self.status.send_modify(|s| {
                s.set_state(ConnectionState::Closed);
                s.volume = 0.0;
                s.scheduled_units = 0;
            });
        }

        self.history.snapshot()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    /// Current observable status
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Subscribe to status changes (state, error, loudness)
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Transcript finalized so far
    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.history.snapshot()
    }

    fn publish_error(&self, err: &SessionError) {
        warn!("{}", err);
        let message = err.to_string();
        self.status.send_modify(|s| s.error = Some(message));
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        // The worker runs its own teardown once signalled
        if let Some(mut worker) = self.worker.take() {
            if let Some(shutdown) = worker.shutdown.take() {
                let _ = shutdown.send(());
            }
        }
    }
}

/// Why the event loop stopped
enum StopReason {
    Shutdown,
    RemoteClosed,
    Failed(SessionError),
}

/// Per-connection state, owned by the worker task
///
/// This is the session's single event loop: microphone chunks, video ticks,
/// inbound channel events and playback-finished notifications are handled one
/// at a time, so the playback cursor needs no lock. Frame grabs are the
/// exception: they run detached on the blocking pool, at most one at a time.
struct SessionEngine {
    session_id: String,
    api_key: String,
    setup: LiveSetup,
    settings: LiveSettings,
    transport: Arc<dyn LiveTransport>,
    channel: SessionChannel,
    media: Option<SharedMedia>,
    video_task: Option<JoinHandle<VideoTick>>,
    audio_rx: Option<mpsc::Receiver<Vec<f32>>>,
    video_timer: Option<Interval>,
    capture: CapturePipeline,
    playback: PlaybackScheduler,
    finished_tx: mpsc::UnboundedSender<UnitId>,
    finished_rx: mpsc::UnboundedReceiver<UnitId>,
    transcript: TranscriptAccumulator,
    inbound: Option<mpsc::Receiver<ChannelEvent>>,
    control: Option<Box<dyn ConnectionControl>>,
    status: Arc<watch::Sender<SessionStatus>>,
}

impl SessionEngine {
    #[allow(clippy::too_many_arguments)]
    fn new(
        session_id: String,
        api_key: String,
        setup: LiveSetup,
        settings: LiveSettings,
        transport: Arc<dyn LiveTransport>,
        media: Box<dyn MediaSource>,
        output: Box<dyn AudioOutput>,
        history: TranscriptHistory,
        status: Arc<watch::Sender<SessionStatus>>,
    ) -> Self {
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();

        Self {
            session_id,
            api_key,
            setup,
            capture: CapturePipeline::new(&settings),
            playback: PlaybackScheduler::new(output, settings.output_sample_rate),
            settings,
            transport,
            channel: SessionChannel::new(),
            media: Some(Arc::new(Mutex::new(media))),
            video_task: None,
            audio_rx: None,
            video_timer: None,
            finished_tx,
            finished_rx,
            transcript: TranscriptAccumulator::new(history),
            inbound: None,
            control: None,
            status,
        }
    }

    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) -> CaptureStats {
        let reason = match self.open(&mut shutdown).await {
            Ok(true) => self.event_loop(&mut shutdown).await,
            Ok(false) => StopReason::Shutdown,
            Err(e) => StopReason::Failed(e),
        };

        match &reason {
            StopReason::Shutdown => debug!("Session {} shutting down", self.session_id),
            StopReason::RemoteClosed => info!("Live connection closed: {}", self.session_id),
            StopReason::Failed(e) => error!("Live session {} failed: {}", self.session_id, e),
        }

        let error = match reason {
            StopReason::Failed(e) => Some(e),
            _ => None,
        };

        self.teardown(error).await;
        self.capture.stats()
    }

    /// Open the output device and the channel; `Ok(false)` if cancelled mid-connect
    async fn open(&mut self, shutdown: &mut oneshot::Receiver<()>) -> Result<bool, SessionError> {
        self.playback
            .open(self.finished_tx.clone())
            .map_err(|e| SessionError::Precondition(format!("Audio output unavailable: {:#}", e)))?;

        self.channel.set_state(ConnectionState::Connecting);

        info!(
            "Opening {} channel for session {}",
            self.transport.name(),
            self.session_id
        );

        let transport = Arc::clone(&self.transport);
        let opened = tokio::select! {
            _ = &mut *shutdown => return Ok(false),
            opened = transport.open(&self.session_id, &self.api_key, &self.setup) => opened,
        };

        let connection = opened.map_err(|e| SessionError::Transport(format!("{:#}", e)))?;

        self.channel.attach(connection.outbound);
        self.inbound = Some(connection.inbound);
        self.control = Some(connection.control);

        Ok(true)
    }

    async fn event_loop(&mut self, shutdown: &mut oneshot::Receiver<()>) -> StopReason {
        loop {
            tokio::select! {
                _ = &mut *shutdown => return StopReason::Shutdown,

                event = recv_opt(&mut self.inbound) => match event {
                    Some(event) => {
                        if let Some(reason) = self.handle_channel_event(event).await {
                            return reason;
                        }
                    }
                    None => return StopReason::RemoteClosed,
                },

                chunk = recv_opt(&mut self.audio_rx) => match chunk {
                    Some(chunk) => self.handle_audio_chunk(&chunk),
                    None => {
                        info!("Audio tap ended for session {}", self.session_id);
                        self.audio_rx = None;
                    }
                },

                _ = tick_opt(&mut self.video_timer) => self.handle_video_tick(),

                Some(id) = self.finished_rx.recv() => {
                    self.playback.on_finished(id);
                    self.publish_counts();
                }
            }
        }
    }

    async fn handle_channel_event(&mut self, event: ChannelEvent) -> Option<StopReason> {
        match event {
            ChannelEvent::Open => {
                if self.channel.state() != ConnectionState::Connecting {
                    debug!("Ignoring duplicate open acknowledgment");
                    return None;
                }
                info!("Live connection opened: {}", self.session_id);
                if let Err(e) = self.start_streaming().await {
                    return Some(StopReason::Failed(e));
                }
                None
            }
            ChannelEvent::Message(message) => {
                self.handle_server_message(message);
                None
            }
            ChannelEvent::Closed => Some(StopReason::RemoteClosed),
            ChannelEvent::Error(e) => Some(StopReason::Failed(SessionError::Transport(e))),
        }
    }

    /// Open acknowledged: start the microphone tap and the video timer
    async fn start_streaming(&mut self) -> Result<(), SessionError> {
        let Some(media) = self.media.as_ref() else {
            return Err(SessionError::Precondition("Media stream is not ready".to_string()));
        };
        let mut media = media.lock().await;

        let audio_rx = media
            .start_audio(self.settings.chunk_size)
            .await
            .map_err(|e| SessionError::Precondition(format!("Failed to start microphone: {:#}", e)))?;

        info!(
            "Audio tap started on {} ({}-sample chunks)",
            media.name(),
            self.settings.chunk_size
        );

        let period = self.settings.video_interval;
        let mut timer = tokio::time::interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        drop(media);
        self.audio_rx = Some(audio_rx);
        self.video_timer = Some(timer);

        self.channel.set_state(ConnectionState::Open);
        self.status.send_modify(|s| s.set_state(ConnectionState::Open));

        Ok(())
    }

    fn handle_audio_chunk(&mut self, samples: &[f32]) {
        let volume = self.capture.handle_audio_chunk(samples, &self.channel);
        self.status.send_modify(|s| s.volume = volume);
    }

    fn handle_video_tick(&mut self) {
        let Some(media) = self.media.as_ref() else {
            return;
        };
        if let Some(task) = self
            .capture
            .spawn_video_tick(media, &self.channel, self.video_task.as_ref())
        {
            self.video_task = Some(task);
        }
    }

    fn handle_server_message(&mut self, message: ServerMessage) {
        if let Some(payload) = message.audio_payload() {
            if let Err(e) = self.playback.enqueue(payload) {
                warn!("Error processing audio output: {}", e);
            }
        }

        let Some(content) = message.server_content else {
            self.publish_counts();
            return;
        };

        if content.interrupted {
            self.playback.interrupt();
            self.transcript.discard_output();
        }

        if let Some(input) = &content.input_transcription {
            self.transcript.append_input(&input.text);
        }
        if let Some(output) = &content.output_transcription {
            self.transcript.append_output(&output.text);
        }

        if content.turn_complete {
            let added = self.transcript.complete_turn();
            debug!("Turn complete ({} transcript entries added)", added);
        }

        self.publish_counts();
    }

    fn publish_counts(&self) {
        let scheduled = self.playback.scheduled_len();
        let entries = self.transcript.history().len();
        self.status.send_modify(|s| {
            s.scheduled_units = scheduled;
            s.transcript_entries = entries;
        });
    }

    /// Release everything, in order; each step is attempted regardless of the others
    async fn teardown(&mut self, error: Option<SessionError>) {
        // 1. Video timer
        self.video_timer = None;

        // 2. Microphone tap and device, after any frame grab in flight
        self.audio_rx = None;
        if let Some(task) = self.video_task.take() {
            if let Err(e) = task.await {
                warn!("Frame capture task failed: {}", e);
            }
        }
        if let Some(media) = self.media.take() {
            let mut media = media.lock().await;
            if let Err(e) = media.stop_audio().await {
                warn!("Failed to stop audio tap: {:#}", e);
            }
            if let Err(e) = media.release().await {
                warn!("Failed to release media source: {:#}", e);
            }
        }

        // 3. Playback, hard stop
        self.playback.close();

        // 4. Channel
        self.channel.detach();
        self.inbound = None;
        if let Some(mut control) = self.control.take() {
            match tokio::time::timeout(self.settings.close_timeout, control.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Failed to close live connection: {:#}", e),
                Err(_) => warn!(
                    "Live connection close timed out after {:?}; abandoning it",
                    self.settings.close_timeout
                ),
            }
        }

        // 5. Pending transcript
        let flushed = self.transcript.flush();
        if flushed > 0 {
            debug!("Flushed {} pending transcript entries", flushed);
        }

        let entries = self.transcript.history().len();
        let message = error.map(|e| e.to_string());
        self.status.send_modify(|s| {
            s.set_state(ConnectionState::Closed);
            if message.is_some() {
                s.error = message;
            }
            s.volume = 0.0;
            s.scheduled_units = 0;
            s.transcript_entries = entries;
        });
    }
}

async fn recv_opt<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn tick_opt(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
