//! Speech transport backends.
//!
//! A backend is the capability set `{resume, pause, listen, say,
//! is_viable}` over one ingress/egress modality. The three concrete
//! backends live behind the [`Backend`] sum type so the multiplexer can
//! hold a heterogeneous priority list without trait objects or shared
//! ownership.

mod forwarder;
mod text_line;
mod voice;

pub use forwarder::NetForwarder;
pub use text_line::TextLine;
pub use voice::{VoiceBackend, VoiceOptions};

use serde::{Deserialize, Serialize};

use crate::bridge::EventBridge;
use crate::storage::OutputStorage;
use crate::Result;

/// The modality a backend exposes upward, published by the multiplexer and
/// queried by the bus via `GET_METHOD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Method {
    /// Line-oriented text in and out.
    Text = 0,
    /// Spoken audio in and out.
    Voice = 1,
}

impl Method {
    /// Decode the atomic representation; anything unknown reads as voice,
    /// the startup default.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Method::Text,
            _ => Method::Voice,
        }
    }
}

/// One concrete speech backend.
#[derive(Debug)]
pub enum Backend {
    /// Line-oriented text client (a connected CLI).
    TextLine(TextLine),
    /// Text forwarded to an external networked agent.
    NetForwarder(NetForwarder),
    /// Local audio device with cloud transcription and synthesis.
    Voice(Box<VoiceBackend>),
}

impl Backend {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Backend::TextLine(_) => "text-line",
            Backend::NetForwarder(_) => "net-forwarder",
            Backend::Voice(_) => "voice",
        }
    }

    /// The modality this backend exposes.
    pub fn method(&self) -> Method {
        match self {
            Backend::TextLine(_) | Backend::NetForwarder(_) => Method::Text,
            Backend::Voice(_) => Method::Voice,
        }
    }

    /// Whether the backend can currently both ingest and egress.
    /// Re-evaluated every multiplexer tick.
    pub fn is_viable(&self) -> bool {
        match self {
            Backend::TextLine(b) => b.is_viable(),
            Backend::NetForwarder(b) => b.is_viable(),
            Backend::Voice(b) => b.is_viable(),
        }
    }

    /// Become the active backend.
    pub fn resume(&mut self) {
        match self {
            Backend::TextLine(b) => b.resume(),
            Backend::NetForwarder(b) => b.resume(),
            Backend::Voice(b) => b.resume(),
        }
    }

    /// Stop being the active backend.
    pub fn pause(&mut self) {
        match self {
            Backend::TextLine(b) => b.pause(),
            Backend::NetForwarder(b) => b.pause(),
            Backend::Voice(b) => b.pause(),
        }
    }

    /// One ingress tick: drain the transport, publish received input.
    pub fn listen(&mut self, bridge: &EventBridge) -> Result<()> {
        match self {
            Backend::TextLine(b) => b.listen(bridge),
            Backend::NetForwarder(b) => b.listen(bridge),
            Backend::Voice(b) => b.listen(bridge),
        }
    }

    /// One egress tick: drain output storage toward the transport.
    pub fn say(&mut self, storage: &OutputStorage, bridge: &EventBridge) -> Result<()> {
        match self {
            Backend::TextLine(b) => b.say(storage, bridge),
            Backend::NetForwarder(b) => b.say(storage, bridge),
            Backend::Voice(b) => b.say(storage, bridge),
        }
    }

    /// Drop buffered ingress after a bus reset.
    pub fn reset(&mut self) {
        match self {
            Backend::TextLine(b) => b.reset(),
            Backend::NetForwarder(b) => b.reset(),
            Backend::Voice(b) => b.reset(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_atomic_round_trip() {
        assert_eq!(Method::from_u8(Method::Text as u8), Method::Text);
        assert_eq!(Method::from_u8(Method::Voice as u8), Method::Voice);
        assert_eq!(Method::from_u8(99), Method::Voice);
    }

    #[test]
    fn test_method_wire_form() {
        assert_eq!(serde_json::to_string(&Method::Text).unwrap(), "\"text\"");
        assert_eq!(serde_json::to_string(&Method::Voice).unwrap(), "\"voice\"");
    }
}
