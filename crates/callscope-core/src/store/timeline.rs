//! Causality timeline of one session

use crate::event::Event;
use serde::Serialize;
use std::sync::Arc;

/// One step of a session's journey
#[derive(Debug, Clone, Serialize)]
pub struct TimelineEntry {
    pub sequence: u64,
    /// Milliseconds since the first step, when both timestamps parse
    pub offset_ms: Option<i64>,
    pub kind: String,
    pub source: String,
    pub severity: String,
    pub message: String,
    pub tags: Vec<String>,
}

/// Non-noise events of `key` in ingestion order, timed from the first one
pub fn session_timeline<'a, I>(events: I, key: &str) -> Vec<TimelineEntry>
where
    I: IntoIterator<Item = &'a Arc<Event>>,
{
    let journey: Vec<&Arc<Event>> = events
        .into_iter()
        .filter(|e| e.session_key() == Some(key) && !e.is_media_noise())
        .collect();

    let Some(first) = journey.first().copied() else {
        return Vec::new();
    };

    journey
        .iter()
        .map(|e| TimelineEntry {
            sequence: e.seq(),
            offset_ms: e.offset_ms_from(first),
            kind: e.kind.clone(),
            source: e.source().to_string(),
            severity: e.severity.label().to_string(),
            message: e.message.clone(),
            tags: e.tags.clone(),
        })
        .collect()
}
