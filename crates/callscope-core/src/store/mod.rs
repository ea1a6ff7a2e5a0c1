//! Event storage and the views derived from it
//!
//! - Bounded, ingestion-ordered event store ([`events`])
//! - Session correlation index ([`correlation`])
//! - Filter pipeline for the visible view ([`filter`])
//! - Per-session causality timeline ([`timeline`])

pub mod correlation;
pub mod events;
pub mod filter;
pub mod timeline;
