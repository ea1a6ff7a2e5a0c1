//! Telemetry event model and inbound message decoding
//!
//! Events arrive as JSON records, one per transport message. The handful of
//! attributes the core inspects (session key, RTP sequence, payload type,
//! audio payload) are typed fields; everything else rides along untouched
//! in an opaque map so raw exports stay verbatim.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Session key value that upstream emits when no call is known
pub const UNKNOWN_SESSION: &str = "unknown";

/// Event kind reserved for raw, unprocessed media packets
pub const RTP_PACKET: &str = "RTP_PACKET";

/// Attribute carrying the SIP Call-ID (fallback session key)
pub const CALL_ID_ATTR: &str = "sip.call_id";
/// Attribute carrying the RTP packet sequence number
pub const RTP_SEQUENCE_ATTR: &str = "rtp.sequence";
/// Attribute carrying the RTP payload type code
pub const PAYLOAD_TYPE_ATTR: &str = "rtp.payload_type";
/// Attribute carrying base64-encoded companded audio
pub const AUDIO_ATTR: &str = "rtp.audio_b64";

/// Largest sender-supplied `_idx` honoured. Senders emit JSON numbers, so
/// the bound is the largest integer a double holds exactly; beyond it the
/// value could neither be trusted nor followed by another sequence.
pub const MAX_SUPPLIED_SEQUENCE: u64 = (1 << 53) - 1;

/// Attribute keys that may hold a Call-ID when `trace_id` is missing
const CALL_ID_CANDIDATES: [&str; 4] = [CALL_ID_ATTR, "call_id", "Call-ID", "callid"];

/// Errors produced while decoding an inbound message
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Malformed event JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Event kind is empty")]
    MissingKind,
}

/// Event severity, ordered DEBUG < INFO < WARN < ERROR < FATAL
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Debug,
    Info,
    #[serde(alias = "WARNING")]
    Warn,
    Error,
    Fatal,
}

impl Severity {
    /// Upper-case wire label
    pub fn label(self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }

    /// ERROR and FATAL
    pub fn is_failure(self) -> bool {
        self >= Severity::Error
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Severity::Debug),
            "INFO" => Ok(Severity::Info),
            "WARN" | "WARNING" => Ok(Severity::Warn),
            "ERROR" => Ok(Severity::Error),
            "FATAL" => Ok(Severity::Fatal),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// Originating component of an event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Service name (e.g. "media-service")
    #[serde(rename = "service.name", default)]
    pub service_name: String,
    /// Host the service runs on
    #[serde(rename = "host.name", default, skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
    /// Remaining resource fields, kept verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Event attributes with the fields the core inspects pulled out.
///
/// Deserialization goes through [`Attributes::insert`], so a known key with
/// an unexpected shape is kept in `other` instead of failing the record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Map<String, Value>")]
pub struct Attributes {
    #[serde(rename = "sip.call_id", default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(rename = "rtp.sequence", default, skip_serializing_if = "Option::is_none")]
    pub rtp_sequence: Option<u64>,
    #[serde(rename = "rtp.payload_type", default, skip_serializing_if = "Option::is_none")]
    pub payload_type: Option<u32>,
    #[serde(rename = "rtp.audio_b64", default, skip_serializing_if = "Option::is_none")]
    pub audio_b64: Option<String>,
    /// Everything else
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl Attributes {
    /// Insert an attribute, routing known keys into their typed slots.
    ///
    /// A known key whose value has the wrong shape lands in `other`.
    pub fn insert(&mut self, key: String, value: Value) {
        match key.as_str() {
            CALL_ID_ATTR => {
                if let Some(s) = value.as_str() {
                    self.call_id = Some(s.to_string());
                    return;
                }
            }
            RTP_SEQUENCE_ATTR => {
                if let Some(n) = value.as_u64() {
                    self.rtp_sequence = Some(n);
                    return;
                }
            }
            PAYLOAD_TYPE_ATTR => {
                if let Some(pt) = value.as_u64().and_then(|n| u32::try_from(n).ok()) {
                    self.payload_type = Some(pt);
                    return;
                }
            }
            AUDIO_ATTR => {
                if let Some(s) = value.as_str() {
                    self.audio_b64 = Some(s.to_string());
                    return;
                }
            }
            _ => {}
        }
        self.other.insert(key, value);
    }

    /// String value of an attribute, typed or opaque
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match key {
            CALL_ID_ATTR => self.call_id.as_deref(),
            AUDIO_ATTR => self.audio_b64.as_deref(),
            _ => self.other.get(key).and_then(Value::as_str),
        }
    }

    /// Whether the attribute is present at all
    pub fn contains_key(&self, key: &str) -> bool {
        match key {
            CALL_ID_ATTR => self.call_id.is_some(),
            RTP_SEQUENCE_ATTR => self.rtp_sequence.is_some(),
            PAYLOAD_TYPE_ATTR => self.payload_type.is_some(),
            AUDIO_ATTR => self.audio_b64.is_some(),
            _ => self.other.contains_key(key),
        }
    }
}

/// One observed telemetry occurrence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Ingestion sequence, the only ordering key. Assigned by the store.
    #[serde(
        rename = "_idx",
        default,
        deserialize_with = "lenient_sequence",
        skip_serializing_if = "Option::is_none"
    )]
    pub sequence: Option<u64>,
    /// Source timestamp (RFC 3339), informational only
    #[serde(rename = "ts")]
    pub timestamp: String,
    pub severity: Severity,
    #[serde(default)]
    pub resource: Resource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Event type tag (e.g. "SIP_INVITE", "RTP_PACKET")
    #[serde(rename = "event")]
    pub kind: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub attributes: Attributes,
    /// Classification labels
    #[serde(rename = "smart_tags", default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Unrecognized top-level fields (schema version, tenant, span id, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl From<Map<String, Value>> for Attributes {
    fn from(map: Map<String, Value>) -> Self {
        let mut attributes = Attributes::default();
        for (key, value) in map {
            attributes.insert(key, value);
        }
        attributes
    }
}

/// Accept integer or float `_idx` values up to [`MAX_SUPPLIED_SEQUENCE`].
///
/// Floats have their fraction dropped. Negative, non-finite, out-of-range
/// and non-numeric values become `None`, and the store assigns a sequence.
fn lenient_sequence<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| {
                n.as_f64()
                    .filter(|f| f.is_finite() && *f >= 0.0 && *f <= MAX_SUPPLIED_SEQUENCE as f64)
                    .map(|f| f.trunc() as u64)
            })
            .filter(|s| *s <= MAX_SUPPLIED_SEQUENCE),
        _ => None,
    }))
}

impl Event {
    /// Build an event stamped with the current time
    pub fn new(
        severity: Severity,
        source: impl Into<String>,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            sequence: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
            severity,
            resource: Resource {
                service_name: source.into(),
                ..Resource::default()
            },
            trace_id: None,
            kind: kind.into(),
            message: message.into(),
            attributes: Attributes::default(),
            tags: Vec::new(),
            extra: Map::new(),
        }
    }

    /// Set the trace (session) id
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Replace the timestamp
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }

    /// Add one attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Attach an RTP audio payload
    pub fn with_audio(mut self, rtp_sequence: u64, payload_type: u8, audio_b64: impl Into<String>) -> Self {
        self.attributes.rtp_sequence = Some(rtp_sequence);
        self.attributes.payload_type = Some(payload_type.into());
        self.attributes.audio_b64 = Some(audio_b64.into());
        self
    }

    /// Ingestion sequence (0 before the store has assigned one)
    pub fn seq(&self) -> u64 {
        self.sequence.unwrap_or(0)
    }

    /// Originating component name
    pub fn source(&self) -> &str {
        &self.resource.service_name
    }

    /// Session correlation key: `trace_id`, else the SIP Call-ID attribute.
    ///
    /// Empty values and the "unknown" sentinel count as no key.
    pub fn session_key(&self) -> Option<&str> {
        self.trace_id
            .as_deref()
            .or(self.attributes.call_id.as_deref())
            .filter(|k| !k.is_empty() && *k != UNKNOWN_SESSION)
    }

    /// Raw per-packet media event (suppressible noise)
    pub fn is_media_noise(&self) -> bool {
        self.kind == RTP_PACKET
    }

    /// Carries a non-empty audio payload attribute
    pub fn has_audio(&self) -> bool {
        self.attributes
            .audio_b64
            .as_deref()
            .is_some_and(|b64| !b64.is_empty())
    }

    /// Parsed source timestamp
    pub fn parsed_timestamp(&self) -> Option<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc3339(&self.timestamp).ok()
    }

    /// Milliseconds between `base` and this event's timestamp
    pub fn offset_ms_from(&self, base: &Event) -> Option<i64> {
        let base = base.parsed_timestamp()?;
        let ts = self.parsed_timestamp()?;
        Some((ts - base).num_milliseconds())
    }

    /// Lower-cased JSON rendering of every field, used by text search
    pub fn searchable_text(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_default()
            .to_lowercase()
    }

    fn add_tag(&mut self, tag: &str) {
        if !self.tags.iter().any(|t| t == tag) {
            self.tags.push(tag.to_string());
        }
    }

    /// Normalize a freshly decoded record.
    ///
    /// Unpacks structured JSON messages into attributes, adopts a Call-ID as
    /// the trace id when none was sent, and derives classification tags.
    pub fn enrich(&mut self) {
        if self.message.trim_start().starts_with('{') {
            if let Ok(parsed) = serde_json::from_str::<Map<String, Value>>(&self.message) {
                let mut promoted: Option<String> = None;
                for (key, value) in parsed {
                    match key.as_str() {
                        "msg" | "message" => {
                            if let Some(s) = value.as_str() {
                                promoted = Some(s.to_string());
                            }
                        }
                        "level" | "severity" => {}
                        _ => self.attributes.insert(key, value),
                    }
                }
                if let Some(message) = promoted {
                    self.message = message;
                }
            }
        }

        if self.trace_id.is_none() {
            self.trace_id = CALL_ID_CANDIDATES
                .iter()
                .filter_map(|key| self.attributes.get_str(key))
                .find(|v| !v.is_empty() && *v != "null")
                .map(str::to_string);
        }

        let service = self.resource.service_name.to_lowercase();
        let message = self.message.to_lowercase();

        if service.contains("postgres") || service.contains("db") || service.contains("mongo") {
            self.add_tag("DB");
            if message.contains("checkpoint") {
                self.severity = Severity::Info;
                self.kind = "DB_CHECKPOINT".to_string();
            }
        }

        if service.contains("sbc")
            || service.contains("kamailio")
            || self.attributes.contains_key("sip.method")
        {
            self.add_tag("SIP");
        }

        if service.contains("media")
            || service.contains("rtp")
            || self.attributes.contains_key(PAYLOAD_TYPE_ATTR)
        {
            self.add_tag("RTP");
        }

        if message.contains("timeout") || message.contains("refused") || message.contains("reset") {
            self.add_tag("NET");
        }
    }
}

/// Decode one inbound transport message into an enriched event
pub fn decode_message(text: &str) -> Result<Event, DecodeError> {
    let mut event: Event = serde_json::from_str(text)?;
    if event.kind.trim().is_empty() {
        return Err(DecodeError::MissingKind);
    }
    event.enrich();
    Ok(event)
}
