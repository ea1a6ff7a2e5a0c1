//! Console state with a single mutation entry point
//!
//! Every change to the event store, the view controls, or the selection
//! goes through [`Console::dispatch`]. Each action runs to completion and
//! reports whether the presentation layer should refresh.

use crate::config::CoreConfig;
use crate::event::{Event, Severity};
use crate::store::correlation::SessionRecord;
use crate::store::events::EventStore;
use crate::store::filter::{recompute, ViewControls};
use crate::store::timeline::{session_timeline, TimelineEntry};
use serde::Serialize;
use std::sync::Arc;

/// Mutations accepted by the console
#[derive(Debug, Clone)]
pub enum Action {
    /// Append one event from the transport
    Ingest(Event),
    SetPaused(bool),
    TogglePause,
    SetHideNoise(bool),
    ToggleNoise,
    SetSearch(String),
    /// `None` shows every severity
    SetSeverityFloor(Option<Severity>),
    LockSession(String),
    Unlock,
    /// Select an event by sequence (`None` clears)
    Select(Option<u64>),
    /// Drop every event, session, lock and selection
    Wipe,
    /// One-second tick: roll the events-per-interval counter; renders only
    /// when the rate moved
    Tick,
}

/// Point-in-time console summary
#[derive(Debug, Clone, Serialize)]
pub struct ConsoleStatus {
    pub total: usize,
    pub capacity: usize,
    pub fill_percent: u8,
    pub visible: usize,
    pub sessions: usize,
    pub events_per_second: u64,
    pub paused: bool,
    pub evicted: u64,
    pub controls: ViewControls,
    pub selection: Option<u64>,
}

/// Event store, view controls, selection, and the cached filtered view
#[derive(Debug)]
pub struct Console {
    store: EventStore,
    controls: ViewControls,
    selection: Option<u64>,
    filtered: Vec<Arc<Event>>,
    events_per_interval: u64,
}

impl Console {
    /// Empty console with default controls
    pub fn new(config: &CoreConfig) -> Self {
        Self::with_controls(config, ViewControls::default())
    }

    /// Empty console with initial controls
    pub fn with_controls(config: &CoreConfig, controls: ViewControls) -> Self {
        Self {
            store: EventStore::new(config.max_events),
            controls,
            selection: None,
            filtered: Vec::new(),
            events_per_interval: 0,
        }
    }

    /// Apply one action. Returns whether a re-render is warranted.
    pub fn dispatch(&mut self, action: Action) -> bool {
        match action {
            Action::Ingest(event) => self.ingest(event),
            Action::SetPaused(paused) => {
                self.store.set_paused(paused);
                true
            }
            Action::TogglePause => {
                let paused = !self.store.is_paused();
                self.store.set_paused(paused);
                true
            }
            Action::SetHideNoise(hide) => {
                self.controls.hide_noise = hide;
                self.refresh_view()
            }
            Action::ToggleNoise => {
                self.controls.hide_noise = !self.controls.hide_noise;
                self.refresh_view()
            }
            Action::SetSearch(text) => {
                self.controls.search_text = text.to_lowercase();
                self.refresh_view()
            }
            Action::SetSeverityFloor(floor) => {
                self.controls.severity_floor = floor;
                self.refresh_view()
            }
            Action::LockSession(key) => {
                self.controls.session_lock = Some(key);
                self.refresh_view()
            }
            Action::Unlock => {
                self.controls.session_lock = None;
                self.refresh_view()
            }
            Action::Select(sequence) => {
                self.selection = sequence;
                true
            }
            Action::Wipe => {
                self.store.wipe();
                self.controls.session_lock = None;
                self.selection = None;
                self.filtered.clear();
                true
            }
            Action::Tick => {
                let rate = self.store.take_interval_count();
                let changed = rate != self.events_per_interval;
                self.events_per_interval = rate;
                changed
            }
        }
    }

    /// Replace all view controls at once
    pub fn set_controls(&mut self, controls: ViewControls) -> bool {
        self.controls = ViewControls {
            search_text: controls.search_text.to_lowercase(),
            ..controls
        };
        self.refresh_view()
    }

    fn ingest(&mut self, event: Event) -> bool {
        if !self.store.ingest(event) {
            return false;
        }

        // Predicates are per-event, so the view can be maintained
        // incrementally: drop evicted entries, then test the newcomer.
        if let Some(oldest) = self.store.oldest_sequence() {
            let evicted = self.filtered.partition_point(|e| e.seq() < oldest);
            if evicted > 0 {
                self.filtered.drain(..evicted);
            }
        }
        if let Some(newest) = self.store.iter().next_back() {
            if self.controls.matcher().matches(newest) {
                self.filtered.push(Arc::clone(newest));
            }
        }
        true
    }

    fn refresh_view(&mut self) -> bool {
        self.filtered = recompute(self.store.iter(), &self.controls);
        true
    }

    /// The authoritative store
    pub fn store(&self) -> &EventStore {
        &self.store
    }

    /// Current view controls
    pub fn controls(&self) -> &ViewControls {
        &self.controls
    }

    /// Current filtered view, in ingestion order
    pub fn filtered(&self) -> &[Arc<Event>] {
        &self.filtered
    }

    /// Newest `limit` entries of the filtered view, in ingestion order
    pub fn view_tail(&self, limit: usize) -> Vec<Arc<Event>> {
        let start = self.filtered.len().saturating_sub(limit);
        self.filtered[start..].to_vec()
    }

    /// Selected event sequence
    pub fn selection(&self) -> Option<u64> {
        self.selection
    }

    /// Selected event, if still stored
    pub fn selected_event(&self) -> Option<&Arc<Event>> {
        self.selection.and_then(|seq| self.store.get(seq))
    }

    /// Events accepted during the last completed interval
    pub fn events_per_interval(&self) -> u64 {
        self.events_per_interval
    }

    /// Sessions, most recently touched last
    pub fn sessions(&self) -> Vec<SessionRecord> {
        self.store.sessions().records().into_iter().cloned().collect()
    }

    /// Timeline of one session
    pub fn timeline(&self, key: &str) -> Vec<TimelineEntry> {
        session_timeline(self.store.iter(), key)
    }

    /// Events an export should cover.
    ///
    /// With a session locked this is every stored event of that session,
    /// noise included; otherwise it is the filtered view.
    pub fn export_set(&self) -> Vec<Arc<Event>> {
        match self.controls.session_lock.as_deref() {
            Some(lock) => self
                .store
                .iter()
                .filter(|e| e.session_key() == Some(lock))
                .cloned()
                .collect(),
            None => self.filtered.clone(),
        }
    }

    /// Summary for status endpoints
    pub fn status(&self) -> ConsoleStatus {
        ConsoleStatus {
            total: self.store.len(),
            capacity: self.store.capacity(),
            fill_percent: self.store.fill_percent(),
            visible: self.filtered.len(),
            sessions: self.store.sessions().len(),
            events_per_second: self.events_per_interval,
            paused: self.store.is_paused(),
            evicted: self.store.evicted(),
            controls: self.controls.clone(),
            selection: self.selection,
        }
    }
}
