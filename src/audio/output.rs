use anyhow::{bail, Result};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use super::codec::PlaybackBuffer;

/// Identifier of one scheduled playback unit
pub type UnitId = u64;

/// Audio output device with its own clock
///
/// The device clock is expressed in seconds since `open`. Buffers are started
/// at absolute clock times; once a buffer has played to its end the device
/// reports its id on the `finished` channel. Stopped buffers are not reported.
pub trait AudioOutput: Send {
    /// Start the device clock
    fn open(&mut self, finished: mpsc::UnboundedSender<UnitId>) -> Result<()>;

    /// Current device clock time in seconds
    fn now(&self) -> f64;

    /// Start `buffer` at clock time `start_at`
    fn play(&mut self, id: UnitId, buffer: &PlaybackBuffer, start_at: f64) -> Result<()>;

    /// Stop a playing or pending buffer immediately
    fn stop(&mut self, id: UnitId) -> Result<()>;

    /// Stop everything and shut the device down
    fn close(&mut self) -> Result<()>;
}

/// Output device emulated on the tokio clock
///
/// Keeps exact device timing (finished notifications fire at
/// `start_at + duration`) without touching audio hardware. Used for headless
/// sessions where speech is consumed through the transcript only.
#[derive(Default)]
pub struct ClockOutput {
    origin: Option<Instant>,
    finished: Option<mpsc::UnboundedSender<UnitId>>,
    timers: HashMap<UnitId, JoinHandle<()>>,
}

impl ClockOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffers currently pending or playing
    pub fn active(&self) -> usize {
        self.timers.values().filter(|t| !t.is_finished()).count()
    }
}

impl AudioOutput for ClockOutput {
    fn open(&mut self, finished: mpsc::UnboundedSender<UnitId>) -> Result<()> {
        self.origin = Some(Instant::now());
        self.finished = Some(finished);
        info!("Clock output opened");
        Ok(())
    }

    fn now(&self) -> f64 {
        self.origin
            .map(|origin| origin.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn play(&mut self, id: UnitId, buffer: &PlaybackBuffer, start_at: f64) -> Result<()> {
        let Some(finished) = self.finished.clone() else {
            bail!("Output device is not open");
        };

        self.timers.retain(|_, timer| !timer.is_finished());

        let end = start_at + buffer.duration();
        let delay = Duration::from_secs_f64((end - self.now()).max(0.0));

        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = finished.send(id);
        });
        self.timers.insert(id, timer);

        Ok(())
    }

    fn stop(&mut self, id: UnitId) -> Result<()> {
        if let Some(timer) = self.timers.remove(&id) {
            timer.abort();
            debug!("Stopped playback unit {}", id);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
        self.finished = None;
        self.origin = None;
        info!("Clock output closed");
        Ok(())
    }
}
