//! Fixed-size wire packets.
//!
//! Every unit on the socket is exactly [`PACKET_SIZE`] bytes:
//!
//! ```text
//! offset  size  field
//!  0       1    stream_id    (0 = SPEECH, 1 = COMMAND)
//!  1       1    packet_type  (0 = START, 1 = CONT, 2 = END, 3 = SINGLE)
//!  2       2    payload_len  (little-endian, <= 252)
//!  4     252    payload      (zero-padded tail)
//! ```
//!
//! A `payload_len` of zero is valid and carries a zero-byte fragment.

use byteorder::{ByteOrder, LittleEndian};

use crate::{Error, Result};

/// Total size of one wire packet in bytes.
pub const PACKET_SIZE: usize = 256;

/// Size of the packet header (stream id, type, payload length).
pub const HEADER_SIZE: usize = 4;

/// Maximum payload bytes one packet can carry.
pub const PAYLOAD_MAX: usize = PACKET_SIZE - HEADER_SIZE;

/// Logical stream label multiplexed over one connection.
///
/// Streams reassemble independently: a long `Speech` message does not block
/// delivery of `Command` messages interleaved with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StreamId {
    /// Voice audio and strings.
    Speech = 0,
    /// Start recording, playback finished, liveness.
    Command = 1,
}

impl StreamId {
    /// Number of defined logical streams.
    pub const COUNT: usize = 2;

    /// Decode a stream id byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(StreamId::Speech),
            1 => Some(StreamId::Command),
            _ => None,
        }
    }

    /// Index into per-stream state tables.
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Position of a packet within a fragmented message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    /// First packet of a multi-packet message.
    Start = 0,
    /// Middle packet of a multi-packet message.
    Cont = 1,
    /// Last packet of a multi-packet message.
    End = 2,
    /// Complete message in one packet.
    Single = 3,
}

impl PacketKind {
    /// Decode a packet type byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PacketKind::Start),
            1 => Some(PacketKind::Cont),
            2 => Some(PacketKind::End),
            3 => Some(PacketKind::Single),
            _ => None,
        }
    }
}

/// One decoded wire packet.
#[derive(Debug, Clone)]
pub struct Packet {
    stream: StreamId,
    kind: PacketKind,
    len: u16,
    payload: [u8; PAYLOAD_MAX],
}

impl Packet {
    /// Build a packet from a payload fragment.
    ///
    /// Fails with `InvalidArgument` if the fragment exceeds [`PAYLOAD_MAX`].
    pub fn new(stream: StreamId, kind: PacketKind, fragment: &[u8]) -> Result<Self> {
        if fragment.len() > PAYLOAD_MAX {
            return Err(Error::InvalidArgument(format!(
                "fragment of {} bytes exceeds packet payload capacity {}",
                fragment.len(),
                PAYLOAD_MAX
            )));
        }

        let mut payload = [0u8; PAYLOAD_MAX];
        payload[..fragment.len()].copy_from_slice(fragment);

        Ok(Self {
            stream,
            kind,
            len: fragment.len() as u16,
            payload,
        })
    }

    /// The logical stream this packet belongs to.
    pub fn stream(&self) -> StreamId {
        self.stream
    }

    /// The packet's position within its message.
    pub fn kind(&self) -> PacketKind {
        self.kind
    }

    /// The carried payload fragment, without padding.
    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.len as usize]
    }

    /// Serialize into the 256-byte wire form.
    pub fn to_bytes(&self) -> [u8; PACKET_SIZE] {
        let mut buf = [0u8; PACKET_SIZE];
        buf[0] = self.stream as u8;
        buf[1] = self.kind as u8;
        LittleEndian::write_u16(&mut buf[2..4], self.len);
        buf[HEADER_SIZE..].copy_from_slice(&self.payload);
        buf
    }

    /// Decode a 256-byte wire buffer.
    ///
    /// Rejects unknown stream ids, unknown packet types, and payload lengths
    /// above [`PAYLOAD_MAX`]; the connection owning the buffer must be
    /// closed on rejection.
    pub fn from_bytes(buf: &[u8; PACKET_SIZE]) -> Result<Self> {
        let stream = StreamId::from_u8(buf[0])
            .ok_or_else(|| Error::MalformedPacket(format!("unknown stream id {}", buf[0])))?;
        let kind = PacketKind::from_u8(buf[1])
            .ok_or_else(|| Error::MalformedPacket(format!("unknown packet type {}", buf[1])))?;
        let len = LittleEndian::read_u16(&buf[2..4]);

        if len as usize > PAYLOAD_MAX {
            return Err(Error::MalformedPacket(format!(
                "payload length {len} exceeds {PAYLOAD_MAX}"
            )));
        }

        let mut payload = [0u8; PAYLOAD_MAX];
        payload.copy_from_slice(&buf[HEADER_SIZE..]);

        Ok(Self {
            stream,
            kind,
            len,
            payload,
        })
    }
}
