//! Event log sink — bounded, ordered history of rendered progress entries.
//!
//! DESIGN
//! ======
//! The router only keeps the latest progress snapshot. The log is the one
//! observer that needs history, so it subscribes to the router's ordered
//! event stream and appends one entry per update. The ring holds the most
//! recent [`MAX_ENTRIES`]; older entries are evicted from the front.
//!
//! Category precedence (first match wins):
//! fallback → gemini → success → error → agent → info.

#[cfg(test)]
#[path = "progress_log_test.rs"]
mod tests;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use time::OffsetDateTime;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::net::message::{PROGRESS_COMPLETE, ProgressUpdate};
use crate::net::router::MessageRouter;

pub const MAX_ENTRIES: usize = 20;

const SUCCESS_MARKERS: &[&str] = &["✅", "completed"];
const ERROR_MARKERS: &[&str] = &["❌", "failed"];

const STARTING_MESSAGE: &str = "Starting generation…";
const FINISHED_MESSAGE: &str = "Generation completed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryCategory {
    Info,
    Agent,
    Fallback,
    Gemini,
    Success,
    Error,
}

impl EntryCategory {
    /// Classify a progress update by its facets and text markers.
    #[must_use]
    pub fn classify(update: &ProgressUpdate) -> Self {
        let lower = update.message.to_lowercase();
        let has = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));

        if update.facets.fallback_active {
            Self::Fallback
        } else if update.facets.gemini_active {
            Self::Gemini
        } else if has(SUCCESS_MARKERS) {
            Self::Success
        } else if has(ERROR_MARKERS) {
            Self::Error
        } else if update.facets.agent_active {
            Self::Agent
        } else {
            Self::Info
        }
    }

    #[must_use]
    pub fn glyph(self) -> &'static str {
        match self {
            Self::Info => "ℹ️",
            Self::Agent => "🧠",
            Self::Fallback => "🏠",
            Self::Gemini => "🤖",
            Self::Success => "✅",
            Self::Error => "❌",
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Agent => "agent",
            Self::Fallback => "fallback",
            Self::Gemini => "gemini",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEntry {
    pub id: u64,
    pub timestamp: OffsetDateTime,
    pub category: EntryCategory,
    /// Message prefixed with the category glyph.
    pub text: String,
    pub progress: Option<i32>,
    pub step: Option<String>,
}

impl ProgressEntry {
    /// Wall-clock `HH:MM:SS` for display.
    #[must_use]
    pub fn display_time(&self) -> String {
        format!("{:02}:{:02}:{:02}", self.timestamp.hour(), self.timestamp.minute(), self.timestamp.second())
    }
}

/// Bounded ring of rendered progress entries in receipt order.
#[derive(Debug)]
pub struct EventLog {
    entries: VecDeque<ProgressEntry>,
    capacity: usize,
    next_id: u64,
    generating: bool,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(MAX_ENTRIES)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self { entries: VecDeque::with_capacity(capacity + 1), capacity: capacity.max(1), next_id: 1, generating: false }
    }

    /// Append one entry for an inbound progress update.
    pub fn record(&mut self, update: &ProgressUpdate) -> &ProgressEntry {
        let category = EntryCategory::classify(update);
        self.push(category, &update.message, update.progress, update.step.clone())
    }

    /// Track the generation-active flag and emit the derived lifecycle entries.
    ///
    /// Starting with an empty log seeds a "starting" entry at progress 0.
    /// Stopping with a non-empty log whose last entry did not reach 100
    /// appends a completion entry.
    pub fn set_generating(&mut self, active: bool) {
        let was = std::mem::replace(&mut self.generating, active);
        if active && !was && self.entries.is_empty() {
            self.push(EntryCategory::Info, STARTING_MESSAGE, Some(0), None);
        } else if !active && was {
            let finished = self.entries.back().is_none_or(|e| e.progress == Some(PROGRESS_COMPLETE));
            if !finished {
                self.push(EntryCategory::Success, FINISHED_MESSAGE, Some(PROGRESS_COMPLETE), None);
            }
        }
    }

    #[must_use]
    pub fn is_generating(&self) -> bool {
        self.generating
    }

    pub fn entries(&self) -> impl Iterator<Item = &ProgressEntry> {
        self.entries.iter()
    }

    #[must_use]
    pub fn last(&self) -> Option<&ProgressEntry> {
        self.entries.back()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn push(&mut self, category: EntryCategory, message: &str, progress: Option<i32>, step: Option<String>) -> &ProgressEntry {
        let entry = ProgressEntry {
            id: self.next_id,
            timestamp: OffsetDateTime::now_utc(),
            category,
            text: format!("{} {message}", category.glyph()),
            progress,
            step,
        };
        self.next_id += 1;
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        &self.entries[self.entries.len() - 1]
    }
}

/// Spawn the task that feeds every routed progress update into `log`.
///
/// The task ends when the router is dropped.
pub fn spawn_log_sink(router: &MessageRouter, log: Arc<Mutex<EventLog>>) -> JoinHandle<()> {
    let mut events = router.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(update) => {
                    let mut log = log.lock().unwrap_or_else(PoisonError::into_inner);
                    let entry = log.record(&update);
                    tracing::debug!(id = entry.id, category = entry.category.as_str(), "progress entry appended");
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event log fell behind; progress updates skipped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
