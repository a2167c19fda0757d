//! Event-bus wire form and transport.
//!
//! The assistant runtime is an external collaborator; the service only
//! defines the event vocabulary and a line-oriented JSON transport for it:
//! inbound events are read from stdin, one JSON object per line, and
//! outbound events are written to stdout the same way. End of input is the
//! runtime telling the service to shut down cleanly.

use std::io::{BufRead, Write};
use std::sync::Mutex;
use std::thread::JoinHandle;

use serde::{Deserialize, Serialize};

use crate::backend::Method;
use crate::{Error, Result};

/// Events the runtime sends to the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    /// Speak (or forward) a string.
    SayStringRequest {
        /// The text to perform.
        text: String,
        /// Bus-assigned utterance id, echoed on the acknowledgement.
        string_id: u32,
        /// Bus correlation id, echoed on the acknowledgement.
        group_id: u32,
    },
    /// Is any backend able to listen right now?
    ListenAvailRequest,
    /// Is any backend able to speak right now?
    SayAvailRequest,
    /// Drop pending output and ingress, reload configuration.
    ResetRequest,
    /// Which modality is input arriving through?
    ListenGetMethod,
    /// Which modality is output leaving through?
    SayGetMethod,
}

/// Events the service publishes to the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// One chunk of a received utterance, more to follow.
    ListenStringUnfinished {
        /// Utterance identifier shared by all chunks.
        string_id: u32,
        /// Ascending chunk index starting at 0.
        part_index: u32,
        /// The chunk text.
        text: String,
    },
    /// The final chunk of a received utterance.
    ListenStringEnd {
        /// Utterance identifier shared by all chunks.
        string_id: u32,
        /// Ascending chunk index starting at 0.
        part_index: u32,
        /// The chunk text.
        text: String,
    },
    /// An outbound utterance was delivered.
    SayStringPerformed {
        /// The utterance that was performed.
        string_id: u32,
        /// The correlation id it arrived with.
        group_id: u32,
    },
    /// Answer to [`InboundEvent::ListenAvailRequest`].
    ListenAvailResponse {
        /// Whether any viable backend exists.
        available: bool,
    },
    /// Answer to [`InboundEvent::SayAvailRequest`].
    SayAvailResponse {
        /// Whether any viable backend exists.
        available: bool,
    },
    /// Answer to [`InboundEvent::ListenGetMethod`].
    ListenMethodResponse {
        /// The published method tag.
        method: Method,
    },
    /// Answer to [`InboundEvent::SayGetMethod`].
    SayMethodResponse {
        /// The published method tag.
        method: Method,
    },
}

/// Where outbound events go. Backends reach the bus only through this
/// seam, which keeps them testable without a runtime on the other side.
pub trait EventSink: Send + Sync {
    /// Deliver one event. Failures surface as [`Error::EventEmitFailed`];
    /// the corresponding input or acknowledgement is lost, not retried.
    fn emit(&self, event: &OutboundEvent) -> Result<()>;
}

/// JSON-lines bus transport over stdio.
///
/// A reader thread parses stdin into [`InboundEvent`]s and forwards them on
/// a channel; the sender half is dropped at EOF, so the consumer observes a
/// disconnect and can shut down. Outbound events are serialized to stdout
/// under a mutex, one object per line.
pub struct StdioBus {
    writer: Mutex<Box<dyn Write + Send>>,
    /// The stdin reader. Never joined: it may be parked in a blocking read
    /// that only ends at process exit, and it owns nothing that needs
    /// teardown.
    _reader: Option<JoinHandle<()>>,
}

impl StdioBus {
    /// Spawn the stdin reader and return the bus plus the inbound channel.
    pub fn spawn() -> Result<(Self, crossbeam_channel::Receiver<InboundEvent>)> {
        let (tx, rx) = crossbeam_channel::unbounded();

        let reader = std::thread::Builder::new()
            .name("bus-reader".to_string())
            .spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    let line = match line {
                        Ok(line) => line,
                        Err(e) => {
                            tracing::error!(error = %e, "bus read failed");
                            break;
                        }
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<InboundEvent>(&line) {
                        Ok(event) => {
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "ignoring unparseable bus event");
                        }
                    }
                }
                // Dropping tx disconnects the channel: clean shutdown.
            })
            .map_err(Error::Spawn)?;

        let bus = Self {
            writer: Mutex::new(Box::new(std::io::stdout())),
            _reader: Some(reader),
        };
        Ok((bus, rx))
    }

    /// A bus writing to an arbitrary sink, for tests.
    pub fn with_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
            _reader: None,
        }
    }
}

impl EventSink for StdioBus {
    fn emit(&self, event: &OutboundEvent) -> Result<()> {
        let line = serde_json::to_string(event)
            .map_err(|e| Error::EventEmitFailed(e.to_string()))?;

        let mut writer = self.writer.lock().unwrap();
        writeln!(writer, "{line}").map_err(|e| Error::EventEmitFailed(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| Error::EventEmitFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_event_wire_form() {
        let event: InboundEvent = serde_json::from_str(
            r#"{"type":"say_string_request","text":"hi","string_id":5,"group_id":42}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            InboundEvent::SayStringRequest {
                text: "hi".to_string(),
                string_id: 5,
                group_id: 42,
            }
        );

        let event: InboundEvent =
            serde_json::from_str(r#"{"type":"listen_get_method"}"#).unwrap();
        assert_eq!(event, InboundEvent::ListenGetMethod);
    }

    #[test]
    fn test_outbound_event_wire_form() {
        let json = serde_json::to_string(&OutboundEvent::ListenStringEnd {
            string_id: 3,
            part_index: 0,
            text: "hello".to_string(),
        })
        .unwrap();
        assert_eq!(
            json,
            r#"{"type":"listen_string_end","string_id":3,"part_index":0,"text":"hello"}"#
        );

        let json = serde_json::to_string(&OutboundEvent::SayMethodResponse {
            method: Method::Voice,
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"say_method_response","method":"voice"}"#);
    }

    #[test]
    fn test_emit_writes_one_line_per_event() {
        #[derive(Clone)]
        struct SharedBuf(std::sync::Arc<Mutex<Vec<u8>>>);
        impl Write for SharedBuf {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let buf = SharedBuf(std::sync::Arc::new(Mutex::new(Vec::new())));
        let bus = StdioBus::with_writer(Box::new(buf.clone()));

        bus.emit(&OutboundEvent::SayStringPerformed {
            string_id: 1,
            group_id: 2,
        })
        .unwrap();
        bus.emit(&OutboundEvent::ListenAvailResponse { available: true })
            .unwrap();

        let written = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("say_string_performed"));
        assert!(lines[1].contains("listen_avail_response"));
    }
}
