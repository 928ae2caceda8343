use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Speaker of a transcript entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The local participant
    User,
    /// The remote model
    Model,
}

impl Role {
    /// Upper-case speaker label used in rendered transcripts
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Model => "MODEL",
        }
    }
}

/// One finalized utterance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub text: String,
}

impl TranscriptEntry {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }
}

/// Append-only, ordered session history shared with the session owner
#[derive(Debug, Clone, Default)]
pub struct TranscriptHistory {
    entries: Arc<Mutex<Vec<TranscriptEntry>>>,
}

impl TranscriptHistory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TranscriptEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, entry: TranscriptEntry) {
        self.lock().push(entry);
    }

    pub fn snapshot(&self) -> Vec<TranscriptEntry> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Start over for a new connection
    pub(crate) fn reset(&self) {
        self.lock().clear();
    }
}

/// Per-speaker partial transcript buffers, flushed at turn boundaries
#[derive(Debug)]
pub struct TranscriptAccumulator {
    input: String,
    output: String,
    history: TranscriptHistory,
}

impl TranscriptAccumulator {
    pub fn new(history: TranscriptHistory) -> Self {
        Self {
            input: String::new(),
            output: String::new(),
            history,
        }
    }

    /// Append a partial fragment of the user's speech
    pub fn append_input(&mut self, text: &str) {
        self.input.push_str(text);
    }

    /// Append a partial fragment of the model's speech
    pub fn append_output(&mut self, text: &str) {
        self.output.push_str(text);
    }

    /// Drop the model's unfinished utterance (interruption)
    pub fn discard_output(&mut self) {
        if !self.output.is_empty() {
            debug!("Discarding interrupted model utterance ({} chars)", self.output.len());
        }
        self.output.clear();
    }

    /// Finalize the turn: user entry first, then model; blank buffers add nothing
    ///
    /// Returns the number of entries added (0 to 2).
    pub fn complete_turn(&mut self) -> usize {
        let mut added = 0;

        for (role, buffer) in [(Role::User, &mut self.input), (Role::Model, &mut self.output)] {
            if buffer.trim().is_empty() {
                continue;
            }
            self.history.push(TranscriptEntry::new(role, std::mem::take(buffer)));
            added += 1;
        }

        added
    }

    /// Flush pending content on a clean close
    pub fn flush(&mut self) -> usize {
        self.complete_turn()
    }

    pub fn pending_input(&self) -> &str {
        &self.input
    }

    pub fn pending_output(&self) -> &str {
        &self.output
    }

    pub fn history(&self) -> &TranscriptHistory {
        &self.history
    }
}
