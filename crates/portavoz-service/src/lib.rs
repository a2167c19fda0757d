//! Speech I/O mediator service.
//!
//! The service sits between a structured event bus (the personal-assistant
//! runtime) and one of several speech transport backends. Outgoing
//! utterances arrive from the bus, are queued in the [`OutputStorage`], and
//! are delivered through whichever backend is currently viable; incoming
//! utterances are published back to the bus as chunked string events with
//! stable, strictly increasing identifiers.
//!
//! Module map:
//!
//! - [`storage`] - thread-safe FIFO of pending outbound utterances
//! - [`bus`] - the event-bus wire form and the stdio transport
//! - [`bridge`] - translation between bus events and core data
//! - [`backend`] - the three concrete backends behind one capability set
//! - [`mux`] - the method multiplexer driving the per-tick listen/say cycle

pub mod backend;
pub mod bridge;
pub mod bus;
pub mod mux;
pub mod storage;

pub use backend::{Backend, Method};
pub use bridge::EventBridge;
pub use bus::{EventSink, InboundEvent, OutboundEvent, StdioBus};
pub use mux::MethodMultiplexer;
pub use storage::OutputStorage;

/// One outbound utterance as handed over by the event bus.
///
/// `string_id` names the utterance; `group_id` is an opaque bus correlation
/// value echoed back on the performed acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    /// The text to speak or forward.
    pub text: String,
    /// Bus-assigned utterance identifier.
    pub string_id: u32,
    /// Bus correlation identifier, echoed on the acknowledgement.
    pub group_id: u32,
}

/// Errors produced by the service core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The output storage had nothing to pop.
    #[error("no output string available")]
    Empty,

    /// An outbound event could not be delivered to the bus.
    #[error("event emit failed: {0}")]
    EventEmitFailed(String),

    /// A backend lost its transport mid-operation.
    #[error("stream disconnected: {0}")]
    StreamDisconnected(String),

    /// Message stream setup or operation failed.
    #[error(transparent)]
    Stream(#[from] portavoz_stream::Error),

    /// A provider call failed.
    #[error(transparent)]
    Provider(#[from] portavoz_provider::Error),

    /// The multiplexer worker could not be started.
    #[error("failed to spawn worker: {0}")]
    Spawn(std::io::Error),
}

/// Convenience result type for service operations.
pub type Result<T> = std::result::Result<T, Error>;
