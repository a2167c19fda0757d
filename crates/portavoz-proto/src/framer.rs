//! Message fragmentation and reassembly.
//!
//! Outbound, a message is cut into [`PAYLOAD_MAX`]-byte fragments: one
//! `SINGLE` packet if it fits, otherwise `START`, `CONT`..., `END`.
//! [`packetize`] produces the whole sequence at once; [`Lane`] produces it
//! incrementally so a writer can park on a would-block socket and retry the
//! same packet later without losing its place.
//!
//! Inbound, the [`Reassembler`] keeps one buffer per logical stream and
//! emits a [`Message`] whenever a `SINGLE` or `END` packet completes one.
//! Out-of-sequence packets discard the affected stream's buffer; a
//! connection that keeps violating the sequence is reported as a decoder
//! fault so the owner can drop it.

use crate::packet::{PAYLOAD_MAX, Packet, PacketKind, StreamId};
use crate::{Error, MESSAGE_SIZE_MAX, Result};

/// Consecutive protocol violations tolerated before the decoder gives up
/// on the connection.
const VIOLATION_LIMIT: u32 = 8;

/// A complete reassembled message on one logical stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// The stream the message arrived on.
    pub stream: StreamId,
    /// The message payload (opcode byte followed by the body).
    pub payload: Vec<u8>,
}

/// Split a whole message into its packet sequence.
pub fn packetize(stream: StreamId, payload: &[u8]) -> Vec<Packet> {
    if payload.len() <= PAYLOAD_MAX {
        // Infallible: the fragment is within capacity by construction.
        return vec![Packet::new(stream, PacketKind::Single, payload).unwrap()];
    }

    let mut packets = Vec::with_capacity(payload.len().div_ceil(PAYLOAD_MAX));
    let mut chunks = payload.chunks(PAYLOAD_MAX).peekable();
    let mut first = true;

    while let Some(chunk) = chunks.next() {
        let kind = if first {
            PacketKind::Start
        } else if chunks.peek().is_some() {
            PacketKind::Cont
        } else {
            PacketKind::End
        };
        first = false;
        packets.push(Packet::new(stream, kind, chunk).unwrap());
    }

    packets
}

/// Incremental per-stream writer state: one in-flight message, cut into
/// packets on demand.
///
/// The owning writer drives it with [`Lane::next_packet`] / [`Lane::advance`]
/// so that a packet refused by the socket (would-block) is retried verbatim
/// on the next cycle. `advance` must only be called after the packet
/// returned by `next_packet` was fully written.
#[derive(Debug)]
pub struct Lane {
    stream: StreamId,
    message: Vec<u8>,
    offset: usize,
    started: bool,
}

impl Lane {
    /// Create an idle lane for one logical stream.
    pub fn new(stream: StreamId) -> Self {
        Self {
            stream,
            message: Vec::new(),
            offset: 0,
            started: false,
        }
    }

    /// True when no message is in flight.
    pub fn is_idle(&self) -> bool {
        self.message.is_empty()
    }

    /// Load the next message. Fails if a message is still in flight.
    pub fn load(&mut self, message: Vec<u8>) -> Result<()> {
        if !self.is_idle() {
            return Err(Error::InvalidArgument(format!(
                "lane {:?} is occupied",
                self.stream
            )));
        }
        self.message = message;
        self.offset = 0;
        self.started = false;
        Ok(())
    }

    /// Drop the in-flight message, if any.
    pub fn clear(&mut self) {
        self.message.clear();
        self.offset = 0;
        self.started = false;
    }

    /// Build the packet for the current position, or `None` when idle.
    pub fn next_packet(&self) -> Option<Packet> {
        if self.is_idle() {
            return None;
        }

        let remaining = &self.message[self.offset..];
        let (kind, fragment) = if remaining.len() > PAYLOAD_MAX {
            let kind = if self.started {
                PacketKind::Cont
            } else {
                PacketKind::Start
            };
            (kind, &remaining[..PAYLOAD_MAX])
        } else {
            let kind = if self.started {
                PacketKind::End
            } else {
                PacketKind::Single
            };
            (kind, remaining)
        };

        Some(Packet::new(self.stream, kind, fragment).unwrap())
    }

    /// Mark the packet from [`Lane::next_packet`] as written and move on.
    pub fn advance(&mut self) {
        if self.is_idle() {
            return;
        }

        let remaining = self.message.len() - self.offset;
        if remaining > PAYLOAD_MAX {
            self.offset += PAYLOAD_MAX;
            self.started = true;
        } else {
            self.clear();
        }
    }
}

/// Per-stream state of the inbound decoder.
#[derive(Debug, Default)]
struct StreamBuffer {
    /// Accumulated fragments; `None` while no message is in progress.
    partial: Option<Vec<u8>>,
}

/// Inbound packet decoder with independent per-stream reassembly.
#[derive(Debug)]
pub struct Reassembler {
    buffers: [StreamBuffer; StreamId::COUNT],
    violations: u32,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reassembler {
    /// Create a fresh decoder with empty buffers.
    pub fn new() -> Self {
        Self {
            buffers: Default::default(),
            violations: 0,
        }
    }

    /// Drop all partial state. Called when a connection is replaced so the
    /// next client starts from a clean sequence.
    pub fn reset(&mut self) {
        for buffer in &mut self.buffers {
            buffer.partial = None;
        }
        self.violations = 0;
    }

    /// Feed one packet. Returns a completed message if this packet finished
    /// one, or a [`Error::DecoderFault`] once the connection has violated
    /// the protocol too often.
    pub fn push(&mut self, packet: &Packet) -> Result<Option<Message>> {
        let stream = packet.stream();
        let index = stream.index();

        match packet.kind() {
            PacketKind::Single => {
                if self.buffers[index].partial.take().is_some() {
                    // A message was cut off mid-sequence.
                    self.violation(stream, "SINGLE while a message was in progress")?;
                }
                self.completed();
                Ok(Some(Message {
                    stream,
                    payload: packet.payload().to_vec(),
                }))
            }
            PacketKind::Start => {
                if self.buffers[index].partial.take().is_some() {
                    self.violation(stream, "START while a message was in progress")?;
                }
                self.buffers[index].partial = Some(packet.payload().to_vec());
                Ok(None)
            }
            PacketKind::Cont => {
                match self.buffers[index].partial.take() {
                    Some(mut partial) => {
                        partial.extend_from_slice(packet.payload());
                        if partial.len() > MESSAGE_SIZE_MAX {
                            self.violation(stream, "message exceeds size limit")?;
                        } else {
                            self.buffers[index].partial = Some(partial);
                        }
                        Ok(None)
                    }
                    None => {
                        self.violation(stream, "CONT without START")?;
                        Ok(None)
                    }
                }
            }
            PacketKind::End => {
                match self.buffers[index].partial.take() {
                    Some(mut partial) => {
                        partial.extend_from_slice(packet.payload());
                        if partial.len() > MESSAGE_SIZE_MAX {
                            self.violation(stream, "message exceeds size limit")?;
                            return Ok(None);
                        }
                        self.completed();
                        Ok(Some(Message {
                            stream,
                            payload: partial,
                        }))
                    }
                    None => {
                        self.violation(stream, "END without START")?;
                        Ok(None)
                    }
                }
            }
        }
    }

    /// True while a message is partially assembled on any stream.
    pub fn has_partial(&self) -> bool {
        self.buffers.iter().any(|b| b.partial.is_some())
    }

    fn completed(&mut self) {
        self.violations = 0;
    }

    fn violation(&mut self, stream: StreamId, _reason: &str) -> Result<()> {
        self.buffers[stream.index()].partial = None;
        self.violations += 1;
        if self.violations >= VIOLATION_LIMIT {
            return Err(Error::DecoderFault(self.violations));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(reassembler: &mut Reassembler, packets: &[Packet]) -> Vec<Message> {
        packets
            .iter()
            .filter_map(|p| reassembler.push(p).unwrap())
            .collect()
    }

    #[test]
    fn test_single_packet_message() {
        let packets = packetize(StreamId::Command, b"ok");
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].kind(), PacketKind::Single);

        let mut reassembler = Reassembler::new();
        let messages = feed_all(&mut reassembler, &packets);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload, b"ok");
        assert_eq!(messages[0].stream, StreamId::Command);
    }

    #[test]
    fn test_multi_packet_message() {
        let payload: Vec<u8> = (0..1000).map(|i| (i % 251) as u8).collect();
        let packets = packetize(StreamId::Speech, &payload);

        assert_eq!(packets[0].kind(), PacketKind::Start);
        assert_eq!(packets.last().unwrap().kind(), PacketKind::End);
        assert!(
            packets[1..packets.len() - 1]
                .iter()
                .all(|p| p.kind() == PacketKind::Cont)
        );

        let mut reassembler = Reassembler::new();
        let messages = feed_all(&mut reassembler, &packets);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload, payload);
    }

    #[test]
    fn test_exact_boundary_is_single() {
        let payload = vec![7u8; PAYLOAD_MAX];
        let packets = packetize(StreamId::Speech, &payload);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].kind(), PacketKind::Single);
    }

    #[test]
    fn test_one_past_boundary_is_start_end() {
        let payload = vec![7u8; PAYLOAD_MAX + 1];
        let packets = packetize(StreamId::Speech, &payload);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].kind(), PacketKind::Start);
        assert_eq!(packets[1].kind(), PacketKind::End);
        assert_eq!(packets[1].payload().len(), 1);
    }

    #[test]
    fn test_streams_reassemble_independently() {
        let speech: Vec<u8> = vec![1u8; PAYLOAD_MAX * 3];
        let command = b"cmd".to_vec();

        let speech_packets = packetize(StreamId::Speech, &speech);
        let command_packets = packetize(StreamId::Command, &command);

        // Command message lands between speech fragments.
        let mut reassembler = Reassembler::new();
        let mut messages = Vec::new();
        for (i, packet) in speech_packets.iter().enumerate() {
            if i == 1
                && let Some(m) = reassembler.push(&command_packets[0]).unwrap()
            {
                messages.push(m);
            }
            if let Some(m) = reassembler.push(packet).unwrap() {
                messages.push(m);
            }
        }

        // The command message completed first even though the speech
        // message started first.
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].stream, StreamId::Command);
        assert_eq!(messages[0].payload, command);
        assert_eq!(messages[1].stream, StreamId::Speech);
        assert_eq!(messages[1].payload, speech);
    }

    #[test]
    fn test_cont_without_start_discarded() {
        let payload = vec![0u8; PAYLOAD_MAX * 2 + 1];
        let packets = packetize(StreamId::Speech, &payload);

        let mut reassembler = Reassembler::new();
        // Skip the START; CONT and END must not produce a message.
        assert!(reassembler.push(&packets[1]).unwrap().is_none());
        assert!(reassembler.push(&packets[2]).unwrap().is_none());

        // A fresh message afterwards still works.
        let ok = packetize(StreamId::Speech, b"fresh");
        assert_eq!(
            reassembler.push(&ok[0]).unwrap().unwrap().payload,
            b"fresh"
        );
    }

    #[test]
    fn test_single_mid_sequence_discards_partial() {
        let long = vec![0u8; PAYLOAD_MAX + 1];
        let long_packets = packetize(StreamId::Speech, &long);
        let single = packetize(StreamId::Speech, b"s");

        let mut reassembler = Reassembler::new();
        assert!(reassembler.push(&long_packets[0]).unwrap().is_none());

        // The SINGLE itself is self-contained and is still delivered.
        let message = reassembler.push(&single[0]).unwrap().unwrap();
        assert_eq!(message.payload, b"s");

        // The partial START was discarded: its END is now a violation.
        assert!(reassembler.push(&long_packets[1]).unwrap().is_none());
    }

    #[test]
    fn test_repeated_violations_fault() {
        let payload = vec![0u8; PAYLOAD_MAX + 1];
        let packets = packetize(StreamId::Speech, &payload);

        let mut reassembler = Reassembler::new();
        let mut fault = None;
        for _ in 0..VIOLATION_LIMIT {
            match reassembler.push(&packets[1]) {
                Ok(_) => {}
                Err(e) => {
                    fault = Some(e);
                    break;
                }
            }
        }
        assert!(matches!(fault, Some(Error::DecoderFault(_))));
    }

    #[test]
    fn test_reset_clears_partial() {
        let payload = vec![0u8; PAYLOAD_MAX + 1];
        let packets = packetize(StreamId::Speech, &payload);

        let mut reassembler = Reassembler::new();
        assert!(reassembler.push(&packets[0]).unwrap().is_none());
        assert!(reassembler.has_partial());

        reassembler.reset();
        assert!(!reassembler.has_partial());

        // After reset the dangling END is a violation, not a message.
        assert!(reassembler.push(&packets[1]).unwrap().is_none());
    }

    #[test]
    fn test_lane_produces_same_packets_as_packetize() {
        let payload: Vec<u8> = (0..(PAYLOAD_MAX * 2 + 37)).map(|i| i as u8).collect();
        let expected = packetize(StreamId::Speech, &payload);

        let mut lane = Lane::new(StreamId::Speech);
        lane.load(payload).unwrap();

        let mut produced = Vec::new();
        while let Some(packet) = lane.next_packet() {
            produced.push(packet);
            lane.advance();
        }

        assert_eq!(produced.len(), expected.len());
        for (a, b) in produced.iter().zip(expected.iter()) {
            assert_eq!(a.kind(), b.kind());
            assert_eq!(a.payload(), b.payload());
        }
        assert!(lane.is_idle());
    }

    #[test]
    fn test_lane_retries_packet_until_advanced() {
        let mut lane = Lane::new(StreamId::Command);
        lane.load(b"retry me".to_vec()).unwrap();

        let first = lane.next_packet().unwrap();
        let second = lane.next_packet().unwrap();
        assert_eq!(first.payload(), second.payload());
        assert_eq!(first.kind(), second.kind());

        lane.advance();
        assert!(lane.next_packet().is_none());
    }

    #[test]
    fn test_lane_rejects_load_while_occupied() {
        let mut lane = Lane::new(StreamId::Command);
        lane.load(b"one".to_vec()).unwrap();
        assert!(lane.load(b"two".to_vec()).is_err());
    }
}
