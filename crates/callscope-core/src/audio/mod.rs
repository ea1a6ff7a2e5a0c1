//! Call audio reconstruction and playback
//!
//! - Packet selection, reordering, decoding and the exclusive playback
//!   state machine ([`engine`])
//! - Audio outputs the engine hands finished buffers to ([`sink`])

pub mod engine;
pub mod sink;
