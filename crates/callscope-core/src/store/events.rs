//! Capacity-bounded event store
//!
//! Holds the authoritative, ingestion-ordered working set. Overflow evicts
//! the oldest events in a single batch; nothing is ever mutated in place.

use super::correlation::CorrelationIndex;
use crate::event::{Event, MAX_SUPPLIED_SEQUENCE};
use std::collections::VecDeque;
use std::sync::Arc;

/// Authoritative event sequence plus its correlation index
#[derive(Debug)]
pub struct EventStore {
    /// Stored events, oldest first
    events: VecDeque<Arc<Event>>,
    /// Session index updated on every accepted ingest
    index: CorrelationIndex,
    /// Maximum number of stored events
    capacity: usize,
    /// Next sequence to assign
    next_sequence: u64,
    /// Drop incoming events while set
    paused: bool,
    /// Events accepted since the last tick
    interval_count: u64,
    /// Events dropped because the store was paused
    dropped_paused: u64,
    /// Events evicted by overflow since the last wipe
    evicted: u64,
}

impl EventStore {
    /// Create an empty store holding at most `capacity` events
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity.min(crate::DEFAULT_MAX_EVENTS)),
            index: CorrelationIndex::new(),
            capacity,
            next_sequence: 0,
            paused: false,
            interval_count: 0,
            dropped_paused: 0,
            evicted: 0,
        }
    }

    /// Ingest one event.
    ///
    /// Returns `true` when the event was accepted (a re-render is warranted),
    /// `false` when it was dropped because the store is paused.
    pub fn ingest(&mut self, event: Event) -> bool {
        if !self.accept(event) {
            return false;
        }
        self.evict_overflow();
        true
    }

    /// Ingest several events, evicting overflow once at the end.
    ///
    /// Returns how many were accepted.
    pub fn ingest_batch<I>(&mut self, events: I) -> usize
    where
        I: IntoIterator<Item = Event>,
    {
        let mut accepted = 0;
        for event in events {
            if self.accept(event) {
                accepted += 1;
            }
        }
        self.evict_overflow();
        accepted
    }

    fn accept(&mut self, mut event: Event) -> bool {
        if self.paused {
            self.dropped_paused += 1;
            return false;
        }

        // A supplied sequence is honoured only if it keeps the order strict
        // and leaves room for the ones after it
        let sequence = match event.sequence {
            Some(s) if s >= self.next_sequence && s <= MAX_SUPPLIED_SEQUENCE => s,
            _ => self.next_sequence,
        };
        event.sequence = Some(sequence);
        self.next_sequence = sequence + 1;

        self.index.on_event(&event);
        self.events.push_back(Arc::new(event));
        self.interval_count += 1;
        true
    }

    fn evict_overflow(&mut self) {
        if self.events.len() > self.capacity {
            let excess = self.events.len() - self.capacity;
            self.events.drain(..excess);
            self.evicted += excess as u64;
        }
    }

    /// Clear every event and session, and restart sequencing
    pub fn wipe(&mut self) {
        self.events.clear();
        self.index.clear();
        self.next_sequence = 0;
        self.interval_count = 0;
        self.evicted = 0;
    }

    /// Pause or resume ingestion
    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Whether ingestion is paused
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Read-only copy of the event sequence, oldest first
    pub fn snapshot(&self) -> Vec<Arc<Event>> {
        self.events.iter().cloned().collect()
    }

    /// Iterate stored events, oldest first
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Arc<Event>> + ExactSizeIterator {
        self.events.iter()
    }

    /// Find an event by sequence
    pub fn get(&self, sequence: u64) -> Option<&Arc<Event>> {
        let idx = self
            .events
            .binary_search_by_key(&sequence, |e| e.seq())
            .ok()?;
        self.events.get(idx)
    }

    /// Sequence of the oldest stored event
    pub fn oldest_sequence(&self) -> Option<u64> {
        self.events.front().map(|e| e.seq())
    }

    /// Number of stored events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True when the store holds no events
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Maximum number of stored events
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fill level in percent
    pub fn fill_percent(&self) -> u8 {
        ((self.events.len() * 100) / self.capacity) as u8
    }

    /// Session index
    pub fn sessions(&self) -> &CorrelationIndex {
        &self.index
    }

    /// Events evicted by overflow since the last wipe
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Events dropped while paused
    pub fn dropped_paused(&self) -> u64 {
        self.dropped_paused
    }

    /// Read and reset the events-per-interval counter.
    ///
    /// Called by the host's one-second ticker.
    pub fn take_interval_count(&mut self) -> u64 {
        std::mem::take(&mut self.interval_count)
    }
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new(crate::DEFAULT_MAX_EVENTS)
    }
}
