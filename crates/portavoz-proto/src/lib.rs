//! Wire protocol for the portavoz message stream.
//!
//! This crate implements the two layers that sit between a raw local byte
//! stream and the typed messages the service exchanges with its peers:
//!
//! - **Packet layer** ([`packet`]): fixed 256-byte packets carrying message
//!   fragments on one of two labeled logical streams (`SPEECH`, `COMMAND`).
//!   Fragmenting per stream lets a short command overtake a long audio
//!   message on the same connection.
//! - **Framing layer** ([`framer`]): splits an outbound message into packets
//!   ([`packetize`], [`Lane`]) and reassembles inbound packets back into
//!   complete messages ([`Reassembler`]).
//! - **Opcode layer** ([`opcode`]): typed wrappers over reassembled message
//!   payloads: UTF-8 strings, PCM16 audio blocks, the audio format
//!   descriptor, and zero-body lifecycle signals.
//!
//! All multi-byte wire fields are little-endian.

mod framer;
mod opcode;
mod packet;

pub use framer::{Lane, Message, Reassembler, packetize};
pub use opcode::{AudioFormat, OpCode, audio_message, command_message, parse_audio, parse_audio_format, parse_string, string_message};
pub use packet::{HEADER_SIZE, PACKET_SIZE, PAYLOAD_MAX, Packet, PacketKind, StreamId};

/// Upper bound on a single reassembled message. Anything larger is treated
/// as a protocol violation rather than an allocation request.
pub const MESSAGE_SIZE_MAX: usize = 16 * 1024 * 1024;

/// Errors produced by the packet and opcode codecs.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A caller-supplied value was rejected before touching the wire.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A 256-byte buffer did not decode into a well-formed packet.
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    /// Too many protocol violations accumulated on one connection.
    #[error("decoder fault after {0} protocol violations")]
    DecoderFault(u32),

    /// A reassembled message body did not match its opcode's layout.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

/// Convenience result type for codec operations.
pub type Result<T> = std::result::Result<T, Error>;
