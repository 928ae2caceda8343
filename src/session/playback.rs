//! Playback pipeline: decodes inbound speech and schedules it back-to-back on
//! the output device clock.
//!
//! Every unit starts at `max(cursor, now)` and advances the cursor by its own
//! duration, so units play in arrival order with no gap and no overlap. An
//! interruption hard-stops everything scheduled and resets the cursor, so the
//! next unit is placed relative to the clock at that moment.

use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::audio::codec::{self, PlaybackBuffer};
use crate::audio::output::{AudioOutput, UnitId};
use crate::error::SessionError;

/// A unit placed on the output timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledUnit {
    pub id: UnitId,
    /// Start time on the output clock (seconds)
    pub start: f64,
    /// Duration in seconds
    pub duration: f64,
}

impl ScheduledUnit {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

pub struct PlaybackScheduler {
    output: Box<dyn AudioOutput>,
    output_rate: u32,
    cursor: f64,
    scheduled: HashMap<UnitId, ScheduledUnit>,
    next_id: UnitId,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn AudioOutput>, output_rate: u32) -> Self {
        Self {
            output,
            output_rate,
            cursor: 0.0,
            scheduled: HashMap::new(),
            next_id: 0,
        }
    }

    /// Open the output device; finished units are reported on `finished`
    pub fn open(&mut self, finished: mpsc::UnboundedSender<UnitId>) -> anyhow::Result<()> {
        self.output.open(finished)
    }

    /// Decode an inbound base64 payload and schedule it
    pub fn enqueue(&mut self, payload: &str) -> Result<ScheduledUnit, SessionError> {
        let buffer = codec::decode_audio(payload, self.output_rate)
            .map_err(|e| SessionError::Decode(format!("{:#}", e)))?;
        self.schedule(buffer)
    }

    /// Place a decoded buffer right after everything already scheduled
    pub fn schedule(&mut self, buffer: PlaybackBuffer) -> Result<ScheduledUnit, SessionError> {
        let start = self.cursor.max(self.output.now());
        let id = self.next_id;

        self.output
            .play(id, &buffer, start)
            .map_err(|e| SessionError::Playback(format!("{:#}", e)))?;

        let unit = ScheduledUnit {
            id,
            start,
            duration: buffer.duration(),
        };

        self.next_id += 1;
        self.cursor = unit.end();
        self.scheduled.insert(id, unit);

        debug!(
            "Scheduled unit {} at {:.3}s ({:.3}s, {} queued)",
            id,
            unit.start,
            unit.duration,
            self.scheduled.len()
        );

        Ok(unit)
    }

    /// The output device finished playing a unit
    pub fn on_finished(&mut self, id: UnitId) {
        self.scheduled.remove(&id);
    }

    /// Remote side interrupted: stop everything and restart the timeline
    ///
    /// Returns the number of units stopped.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.stop_all();
        self.cursor = 0.0;
        info!("Playback interrupted ({} units stopped)", stopped);
        stopped
    }

    /// Hard-stop every scheduled unit
    pub fn stop_all(&mut self) -> usize {
        let stopped = self.scheduled.len();
        for (id, _) in self.scheduled.drain() {
            if let Err(e) = self.output.stop(id) {
                warn!("Failed to stop playback unit {}: {}", id, e);
            }
        }
        stopped
    }

    /// Stop everything and shut the output device down
    pub fn close(&mut self) {
        self.stop_all();
        self.cursor = 0.0;
        if let Err(e) = self.output.close() {
            warn!("Failed to close audio output: {}", e);
        }
    }

    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    pub fn scheduled_len(&self) -> usize {
        self.scheduled.len()
    }

    pub fn is_scheduled(&self, id: UnitId) -> bool {
        self.scheduled.contains_key(&id)
    }

    /// Scheduled units ordered by start time
    pub fn scheduled_units(&self) -> Vec<ScheduledUnit> {
        let mut units: Vec<_> = self.scheduled.values().copied().collect();
        units.sort_by(|a, b| a.start.total_cmp(&b.start));
        units
    }
}
