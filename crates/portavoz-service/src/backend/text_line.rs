//! Line-oriented text backend.
//!
//! The simplest backend: a message stream on the CLI channel carrying
//! `STRING` frames both ways. Every received string becomes one published
//! input; every queued utterance is sent as-is and acknowledged
//! immediately; there is nothing asynchronous about delivering text.

use std::path::Path;

use portavoz_proto::{OpCode, parse_string, string_message};
use portavoz_stream::{MessageStream, Role, StreamConfig};

use crate::bridge::EventBridge;
use crate::storage::OutputStorage;
use crate::Result;

/// Text backend over the CLI message stream channel.
#[derive(Debug)]
pub struct TextLine {
    stream: MessageStream,
}

impl TextLine {
    /// Bind the text-line channel socket and start its worker.
    pub fn new(socket_path: &Path) -> Result<Self> {
        let stream = MessageStream::open(StreamConfig::new(socket_path, Role::Server))?;
        Ok(Self { stream })
    }

    /// Viable whenever a client is connected.
    pub fn is_viable(&self) -> bool {
        self.stream.connected()
    }

    /// Nothing to arm: the stream worker runs regardless.
    pub fn resume(&mut self) {
        tracing::debug!("text-line backend resumed");
    }

    /// Nothing to stop either; the connection stays up while paused.
    pub fn pause(&mut self) {
        tracing::debug!("text-line backend paused");
    }

    /// Publish every received string with a fresh id.
    pub fn listen(&mut self, bridge: &EventBridge) -> Result<()> {
        while let Some(message) = self.stream.try_recv() {
            if OpCode::of(&message) != OpCode::String {
                continue;
            }
            match parse_string(&message) {
                Ok(text) => {
                    if let Err(e) = bridge.publish_input(&text) {
                        tracing::error!(error = %e, "failed to publish text input");
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "discarding undecodable string message");
                }
            }
        }
        Ok(())
    }

    /// Send queued utterances in order, acknowledging each as performed.
    pub fn say(&mut self, storage: &OutputStorage, bridge: &EventBridge) -> Result<()> {
        while storage.available() && self.stream.connected() {
            let utterance = storage.pop()?;
            self.stream.send(string_message(&utterance.text))?;
            if let Err(e) = bridge.acknowledge_output(utterance.string_id, utterance.group_id) {
                tracing::error!(
                    string_id = utterance.string_id,
                    error = %e,
                    "failed to acknowledge performed output"
                );
            }
        }
        Ok(())
    }

    /// Drop buffered ingress.
    pub fn reset(&mut self) {
        self.stream.clear_recv(None);
    }
}
