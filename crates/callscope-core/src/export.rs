//! Exports of the current working set
//!
//! - Raw: the events verbatim as pretty JSON, media payloads included
//! - Report: a markdown digest meant for pasting into a ticket or an
//!   assistant, with media noise elided and messages shortened
//!
//! Both put the events in chronological order by source timestamp first.

use crate::event::Event;
use chrono::{DateTime, Utc};
use std::fmt::Write;
use std::sync::Arc;

/// Longest message kept in a report line
pub const REPORT_MESSAGE_LIMIT: usize = 200;

/// Context printed in the report header
#[derive(Debug, Clone)]
pub struct ReportMeta {
    pub node_name: String,
    /// Locked session, or `None` for the global stream
    pub session: Option<String>,
    pub generated_at: DateTime<Utc>,
}

impl ReportMeta {
    pub fn new(node_name: impl Into<String>, session: Option<String>) -> Self {
        Self {
            node_name: node_name.into(),
            session,
            generated_at: Utc::now(),
        }
    }
}

/// Which export flavour a download carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Raw,
    Report,
}

/// Download file name, e.g. `callscope_call-1_edge-01_2024-05-01T10-00-00_evidence.json`
pub fn export_file_name(meta: &ReportMeta, kind: ExportKind) -> String {
    let stamp = meta.generated_at.format("%Y-%m-%dT%H-%M-%S");
    let scope = meta.session.as_deref().unwrap_or("global");
    let suffix = match kind {
        ExportKind::Raw => "evidence.json",
        ExportKind::Report => "report.md",
    };
    format!("callscope_{}_{}_{}_{}", sanitize(scope), sanitize(&meta.node_name), stamp, suffix)
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect()
}

/// Stable chronological order; unparseable timestamps sort first
fn chronological(events: &[Arc<Event>]) -> Vec<&Event> {
    let mut ordered: Vec<&Event> = events.iter().map(|e| e.as_ref()).collect();
    ordered.sort_by_key(|e| e.parsed_timestamp());
    ordered
}

/// Pretty JSON array of the events, nothing removed
pub fn export_raw(events: &[Arc<Event>]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&chronological(events))
}

/// Markdown timeline report
pub fn export_report(events: &[Arc<Event>], meta: &ReportMeta) -> String {
    let ordered: Vec<&Event> = chronological(events)
        .into_iter()
        .filter(|e| !e.is_media_noise())
        .collect();
    let base = ordered.first().copied();

    let mut out = String::new();
    let _ = writeln!(out, "# Callscope Session Report");
    let _ = writeln!(out, "Generated: {}", meta.generated_at.to_rfc3339());
    let _ = writeln!(out, "Node: {}", meta.node_name);
    let _ = writeln!(out, "Session: {}", meta.session.as_deref().unwrap_or("Global Stream"));
    let _ = writeln!(out, "Events: {}", ordered.len());
    out.push('\n');
    out.push_str("## Timeline\n```log\n");
    for event in &ordered {
        let offset = base
            .and_then(|b| event.offset_ms_from(b))
            .map(|ms| format!("+{ms}ms"))
            .unwrap_or_else(|| "+?ms".to_string());
        let _ = writeln!(
            out,
            "[{}] {} | {} -> {}: {}",
            offset,
            event.severity.label(),
            event.source(),
            event.kind,
            clean_message(&event.message)
        );
    }
    out.push_str("```\n\n");
    out.push_str("## Review Notes\n");
    out.push_str(
        "Look for anomalies, latency gaps between steps, and SIP protocol errors. \
         WARN and ERROR lines are the first place to start.\n",
    );
    out
}

/// Single-line message cut at [`REPORT_MESSAGE_LIMIT`] characters
fn clean_message(message: &str) -> String {
    let flat: String = message
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    if flat.chars().count() > REPORT_MESSAGE_LIMIT {
        let mut cut: String = flat.chars().take(REPORT_MESSAGE_LIMIT).collect();
        cut.push_str("...");
        cut
    } else {
        flat
    }
}
