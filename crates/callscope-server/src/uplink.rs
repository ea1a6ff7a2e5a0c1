//! Uplink to the upstream telemetry stream
//!
//! Holds a WebSocket connection to the telemetry service, decodes every
//! frame into an [`Event`], and queues it on the store actor. Malformed
//! frames are dropped with a debug log. When the connection fails or
//! closes, the client waits `reconnect_delay` and dials again, forever.

use crate::StoreHandle;
use callscope_core::{decode_message, Event};
use futures_util::StreamExt;
use std::time::Duration;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;

/// Uplink settings
#[derive(Clone, Debug)]
pub struct UplinkConfig {
    /// `ws://` or `wss://` address of the telemetry stream
    pub url: String,
    /// Pause between connection attempts
    pub reconnect_delay: Duration,
}

impl UplinkConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_delay: Duration::from_millis(3000),
        }
    }
}

/// How a connection ended
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    /// Remote closed or the stream errored; reconnect
    Disconnected,
    /// The store actor is gone; stop for good
    StoreGone,
}

/// Decode one frame. Control frames and malformed payloads yield `None`.
pub(crate) fn decode_frame(msg: &Message) -> Option<Event> {
    let text = match msg {
        Message::Text(text) => text.as_str(),
        Message::Binary(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!(error = %e, "Dropping non-UTF-8 frame");
                return None;
            }
        },
        _ => return None,
    };
    match decode_message(text) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::debug!(error = %e, "Dropping malformed message");
            None
        }
    }
}

/// Run the uplink until the store actor goes away.
///
/// `connected` follows the connection state so the presentation layer can
/// show it.
pub async fn run_uplink(config: UplinkConfig, store: StoreHandle, connected: watch::Sender<bool>) {
    let mut attempt: u64 = 0;
    loop {
        attempt += 1;
        tracing::debug!(url = %config.url, attempt, "Connecting uplink");

        match tokio_tungstenite::connect_async(config.url.as_str()).await {
            Ok((stream, _response)) => {
                tracing::info!(url = %config.url, "Uplink connected");
                attempt = 0;
                let _ = connected.send(true);

                let (_write, mut read) = stream.split();
                let end = pump(&mut read, &store).await;

                let _ = connected.send(false);
                if end == SessionEnd::StoreGone {
                    tracing::info!("Store stopped, closing uplink");
                    return;
                }
                tracing::warn!(url = %config.url, "Uplink lost, retrying");
            }
            Err(e) => {
                if attempt == 1 {
                    tracing::warn!(url = %config.url, error = %e, "Uplink connect failed, retrying");
                } else {
                    tracing::debug!(url = %config.url, error = %e, attempt, "Uplink connect failed");
                }
            }
        }

        tokio::time::sleep(config.reconnect_delay).await;
    }
}

async fn pump<S>(read: &mut S, store: &StoreHandle) -> SessionEnd
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(frame) = read.next().await {
        let msg = match frame {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(error = %e, "Uplink read error");
                return SessionEnd::Disconnected;
            }
        };
        if matches!(msg, Message::Close(_)) {
            return SessionEnd::Disconnected;
        }
        if let Some(event) = decode_frame(&msg) {
            if store.ingest(event).await.is_err() {
                return SessionEnd::StoreGone;
            }
        }
    }
    SessionEnd::Disconnected
}

#[cfg(test)]
mod tests {
    use super::*;
    use callscope_core::{CoreConfig, ViewControls};

    const RECORD: &str = r#"{"ts":"2024-05-01T10:00:00Z","severity":"INFO","resource":{"service.name":"sbc"},"event":"SIP_INVITE","message":"invite","attributes":{"sip.call_id":"c-1"}}"#;

    #[test]
    fn test_decode_text_frame() {
        let event = decode_frame(&Message::text(RECORD)).unwrap();
        assert_eq!(event.kind, "SIP_INVITE");
        assert_eq!(event.session_key(), Some("c-1"));
    }

    #[test]
    fn test_decode_binary_frame() {
        let event = decode_frame(&Message::binary(RECORD.as_bytes().to_vec()));
        assert!(event.is_some());
        assert!(decode_frame(&Message::binary(vec![0xFF, 0xFE])).is_none());
    }

    #[test]
    fn test_malformed_and_control_frames_dropped() {
        assert!(decode_frame(&Message::text("{not json")).is_none());
        assert!(decode_frame(&Message::text(r#"{"event":""}"#)).is_none());
        assert!(decode_frame(&Message::Ping(Vec::new().into())).is_none());
    }

    #[tokio::test]
    async fn test_pump_ingests_until_close() {
        let store = StoreHandle::spawn(CoreConfig::default(), ViewControls::default());
        let frames = vec![
            Ok(Message::text(RECORD)),
            Ok(Message::text("garbage")),
            Ok(Message::text(RECORD)),
            Ok(Message::Close(None)),
            Ok(Message::text(RECORD)),
        ];
        let mut stream = futures_util::stream::iter(frames);
        assert_eq!(pump(&mut stream, &store).await, SessionEnd::Disconnected);
        assert_eq!(store.status().await.unwrap().total, 2);
    }

    #[tokio::test]
    async fn test_uplink_reports_disconnected_while_unreachable() {
        let store = StoreHandle::spawn(CoreConfig::default(), ViewControls::default());
        let (tx, rx) = watch::channel(false);
        let config = UplinkConfig {
            url: "ws://127.0.0.1:9/stream".to_string(),
            reconnect_delay: Duration::from_millis(10),
        };
        let task = tokio::spawn(run_uplink(config, store, tx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!*rx.borrow());
        task.abort();
    }
}
