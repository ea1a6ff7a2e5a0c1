//! Filter pipeline deriving the visible view
//!
//! Pure function of the stored events and the current view controls.
//! Predicates run in a fixed order and short-circuit; survivors keep their
//! ingestion order.

use crate::event::{Event, Severity};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Presentation-owned view settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewControls {
    /// Restrict the view to one session; overrides noise suppression
    #[serde(default)]
    pub session_lock: Option<String>,
    /// Hide raw media-packet events when no session is locked
    #[serde(default)]
    pub hide_noise: bool,
    /// Minimum severity shown (`None` shows everything)
    #[serde(default)]
    pub severity_floor: Option<Severity>,
    /// Case-insensitive substring over the full event
    #[serde(default)]
    pub search_text: String,
}

impl ViewControls {
    /// True when every event passes
    pub fn is_identity(&self) -> bool {
        self.session_lock.is_none()
            && !self.hide_noise
            && self.severity_floor.is_none()
            && self.search_text.is_empty()
    }

    /// Compile the controls into a reusable predicate
    pub fn matcher(&self) -> Matcher<'_> {
        Matcher {
            controls: self,
            needle: self.search_text.to_lowercase(),
        }
    }
}

/// Controls with the search text pre-folded
#[derive(Debug)]
pub struct Matcher<'a> {
    controls: &'a ViewControls,
    needle: String,
}

impl Matcher<'_> {
    /// Whether one event survives every predicate
    pub fn matches(&self, event: &Event) -> bool {
        let controls = self.controls;

        if let Some(lock) = controls.session_lock.as_deref() {
            if event.session_key() != Some(lock) {
                return false;
            }
        } else if controls.hide_noise && event.is_media_noise() {
            return false;
        }

        if let Some(floor) = controls.severity_floor {
            if event.severity < floor {
                return false;
            }
        }

        if !self.needle.is_empty() && !event.searchable_text().contains(&self.needle) {
            return false;
        }

        true
    }
}

/// Recompute the filtered view from the full event sequence
pub fn recompute<'a, I>(events: I, controls: &ViewControls) -> Vec<Arc<Event>>
where
    I: IntoIterator<Item = &'a Arc<Event>>,
{
    if controls.is_identity() {
        return events.into_iter().cloned().collect();
    }
    let matcher = controls.matcher();
    events
        .into_iter()
        .filter(|e| matcher.matches(e))
        .cloned()
        .collect()
}
