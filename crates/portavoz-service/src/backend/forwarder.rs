//! Net forwarder backend.
//!
//! Text relayed to an external networked agent over its own message stream
//! channel. Shape and wire use are the same as the text-line backend; the
//! difference is viability: the forwarder tracks when text last arrived
//! and stops being viable after a configured quiet period, so a dead or
//! disinterested remote agent hands control back to another backend.

use std::path::Path;
use std::time::{Duration, Instant};

use portavoz_proto::{OpCode, parse_string, string_message};
use portavoz_stream::{MessageStream, Role, StreamConfig};

use crate::bridge::EventBridge;
use crate::storage::OutputStorage;
use crate::Result;

/// Text forwarding backend with ingress-freshness viability.
#[derive(Debug)]
pub struct NetForwarder {
    stream: MessageStream,
    receive_timeout: Duration,
    last_ingress: Option<Instant>,
}

impl NetForwarder {
    /// Bind the forwarding channel socket and start its worker.
    pub fn new(socket_path: &Path, receive_timeout: Duration) -> Result<Self> {
        let stream = MessageStream::open(StreamConfig::new(socket_path, Role::Server))?;
        Ok(Self {
            stream,
            receive_timeout,
            last_ingress: None,
        })
    }

    /// Viable while connected and the remote agent has either queued text
    /// waiting or sent some within the receive timeout.
    pub fn is_viable(&self) -> bool {
        if !self.stream.connected() {
            return false;
        }
        if self.stream.inbound_available() {
            return true;
        }
        self.last_ingress
            .is_some_and(|t| t.elapsed() <= self.receive_timeout)
    }

    /// Nothing to arm: the stream worker runs regardless.
    pub fn resume(&mut self) {
        tracing::debug!("net-forwarder backend resumed");
    }

    /// Nothing to stop either; the connection stays up while paused.
    pub fn pause(&mut self) {
        tracing::debug!("net-forwarder backend paused");
    }

    /// Publish received strings and refresh the ingress timestamp.
    pub fn listen(&mut self, bridge: &EventBridge) -> Result<()> {
        while let Some(message) = self.stream.try_recv() {
            if OpCode::of(&message) != OpCode::String {
                continue;
            }
            match parse_string(&message) {
                Ok(text) => {
                    self.last_ingress = Some(Instant::now());
                    if let Err(e) = bridge.publish_input(&text) {
                        tracing::error!(error = %e, "failed to publish forwarded input");
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "discarding undecodable string message");
                }
            }
        }
        Ok(())
    }

    /// Forward queued utterances in order, acknowledging each.
    pub fn say(&mut self, storage: &OutputStorage, bridge: &EventBridge) -> Result<()> {
        while storage.available() && self.stream.connected() {
            let utterance = storage.pop()?;
            self.stream.send(string_message(&utterance.text))?;
            if let Err(e) = bridge.acknowledge_output(utterance.string_id, utterance.group_id) {
                tracing::error!(
                    string_id = utterance.string_id,
                    error = %e,
                    "failed to acknowledge forwarded output"
                );
            }
        }
        Ok(())
    }

    /// Drop buffered ingress and the freshness mark.
    pub fn reset(&mut self) {
        self.stream.clear_recv(None);
        self.last_ingress = None;
    }
}
