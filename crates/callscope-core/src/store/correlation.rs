//! Session correlation index
//!
//! Maps a session key to what is known about the call: when it was first
//! seen, how many events it produced, and whether any of them carried
//! audio. Updated on every accepted ingest; cleared only by a wipe.

use crate::event::Event;
use serde::Serialize;
use std::collections::HashMap;

/// Maximum anomaly lines kept per session
const MAX_ANOMALIES: usize = 32;

/// Coarse call outcome derived from the events seen so far
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionStatus {
    Active,
    Completed,
    Failed,
}

/// Correlation index entry for one session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionRecord {
    /// Session correlation key
    pub key: String,
    /// Timestamp of the first event carrying this key
    pub first_seen: String,
    /// Timestamp of the latest event carrying this key
    pub last_seen: String,
    /// Events counted under this key since the last wipe
    pub event_count: u64,
    /// Set once any event carries an audio payload; never cleared
    pub has_reconstructable_audio: bool,
    pub status: SessionStatus,
    /// "[SEVERITY] message" lines for ERROR/FATAL events
    pub anomalies: Vec<String>,
    #[serde(skip)]
    touched: u64,
}

/// Incrementally maintained session index
#[derive(Debug, Default)]
pub struct CorrelationIndex {
    records: HashMap<String, SessionRecord>,
    clock: u64,
}

impl CorrelationIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one accepted event. Events without a key are ignored.
    pub fn on_event(&mut self, event: &Event) {
        let Some(key) = event.session_key() else {
            return;
        };

        self.clock += 1;
        let record = self
            .records
            .entry(key.to_string())
            .or_insert_with(|| SessionRecord {
                key: key.to_string(),
                first_seen: event.timestamp.clone(),
                last_seen: event.timestamp.clone(),
                event_count: 0,
                has_reconstructable_audio: false,
                status: SessionStatus::Active,
                anomalies: Vec::new(),
                touched: 0,
            });

        record.event_count += 1;
        record.last_seen = event.timestamp.clone();
        record.touched = self.clock;
        if event.has_audio() {
            record.has_reconstructable_audio = true;
        }

        if event.severity.is_failure() {
            record.status = SessionStatus::Failed;
            if record.anomalies.len() < MAX_ANOMALIES {
                record
                    .anomalies
                    .push(format!("[{}] {}", event.severity, event.message));
            }
        } else if record.status != SessionStatus::Failed
            && (event.kind == "CALL_TERMINATED" || event.kind == "BYE")
        {
            record.status = SessionStatus::Completed;
        }
    }

    /// Records ordered by last touch, most recently touched last
    pub fn records(&self) -> Vec<&SessionRecord> {
        let mut records: Vec<&SessionRecord> = self.records.values().collect();
        records.sort_by_key(|r| r.touched);
        records
    }

    /// Look up one session
    pub fn get(&self, key: &str) -> Option<&SessionRecord> {
        self.records.get(key)
    }

    /// Number of known sessions
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no session has been seen
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Forget every session
    pub fn clear(&mut self) {
        self.records.clear();
        self.clock = 0;
    }
}
