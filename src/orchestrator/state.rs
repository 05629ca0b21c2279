//! Flash session state and stage tracking.
//!
//! **Architecture**:
//! - `FlashStage`: the fixed stage order plus the `Failed` sink
//! - `FlashSession`: the live session, mutated only by the orchestrator
//! - `FlashSnapshot`: immutable copy handed to callers

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::FlashError;
use crate::models::{LogLevel, SessionLogEntry};

/// Flash stage enumeration - discrete states in the flash lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashStage {
    /// Stage 1: device connectivity check
    Preparing,

    /// Stage 2: best-effort erase of the configured partitions
    Erasing,

    /// Stage 3: image integrity checks and flash commands
    Flashing,

    /// Stage 4: connectivity re-check and reboot
    Verifying,

    Completed,

    Failed,
}

impl FlashStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlashStage::Preparing => "preparing",
            FlashStage::Erasing => "erasing",
            FlashStage::Flashing => "flashing",
            FlashStage::Verifying => "verifying",
            FlashStage::Completed => "completed",
            FlashStage::Failed => "failed",
        }
    }

    /// All valid transitions FROM this stage.
    ///
    /// Terminal stages have none; a new run starts from a reset session.
    pub fn valid_next_stages(&self) -> Vec<FlashStage> {
        match self {
            FlashStage::Preparing => vec![FlashStage::Erasing, FlashStage::Failed],
            FlashStage::Erasing => vec![FlashStage::Flashing, FlashStage::Failed],
            FlashStage::Flashing => vec![FlashStage::Verifying, FlashStage::Failed],
            FlashStage::Verifying => vec![FlashStage::Completed, FlashStage::Failed],
            FlashStage::Completed => vec![],
            FlashStage::Failed => vec![],
        }
    }

    pub fn can_transition_to(&self, next: FlashStage) -> bool {
        self.valid_next_stages().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FlashStage::Completed | FlashStage::Failed)
    }
}

impl fmt::Display for FlashStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The state of one flash run.
#[derive(Debug, Clone)]
pub struct FlashSession {
    pub stage: FlashStage,

    /// Overall progress (0-100), never decreases within a run
    pub progress: u32,

    /// Append-only session log
    pub log: Vec<SessionLogEntry>,

    /// Message of the fatal error, if the run failed
    pub error: Option<String>,

    pub started_at: Option<DateTime<Local>>,

    /// Bumped by every reset; a run holding an older value is stale
    pub generation: u64,
}

impl Default for FlashSession {
    fn default() -> Self {
        FlashSession {
            stage: FlashStage::Preparing,
            progress: 0,
            log: Vec::new(),
            error: None,
            started_at: None,
            generation: 0,
        }
    }
}

impl FlashSession {
    /// Start over at Preparing with an empty log; returns the new generation.
    pub fn reset(&mut self) -> u64 {
        self.stage = FlashStage::Preparing;
        self.progress = 0;
        self.log.clear();
        self.error = None;
        self.started_at = Some(Local::now());
        self.generation = self.generation.wrapping_add(1);
        self.generation
    }

    pub fn transition_to(&mut self, next: FlashStage) -> Result<(), FlashError> {
        if !self.stage.can_transition_to(next) {
            return Err(FlashError::InvalidTransition {
                from: self.stage,
                to: next,
            });
        }
        self.stage = next;
        Ok(())
    }

    /// Raise progress to `percent`. Lower values are ignored and 100 is held
    /// back until the session is Completed. Returns the stored value.
    pub fn set_progress(&mut self, percent: u32) -> u32 {
        let cap = if self.stage == FlashStage::Completed { 100 } else { 99 };
        self.progress = self.progress.max(percent.min(cap));
        self.progress
    }

    pub fn push_log(&mut self, level: LogLevel, message: impl Into<String>) -> SessionLogEntry {
        let entry = SessionLogEntry::new(level, message);
        self.log.push(entry.clone());
        entry
    }

    /// Record the fatal error and move to Failed.
    pub fn record_error(&mut self, error: String) -> Result<(), FlashError> {
        self.error = Some(error);
        self.transition_to(FlashStage::Failed)
    }

    pub fn snapshot(&self) -> FlashSnapshot {
        FlashSnapshot {
            stage: self.stage,
            progress: self.progress,
            log: self.log.clone(),
            error: self.error.clone(),
            started_at: self.started_at,
        }
    }
}

/// Immutable view of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlashSnapshot {
    pub stage: FlashStage,
    pub progress: u32,
    pub log: Vec<SessionLogEntry>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Local>>,
}

impl FlashSnapshot {
    pub fn entries_at(&self, level: LogLevel) -> impl Iterator<Item = &SessionLogEntry> {
        self.log.iter().filter(move |entry| entry.level == level)
    }
}
