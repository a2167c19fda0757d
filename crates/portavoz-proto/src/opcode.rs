//! Typed opcode frames.
//!
//! A reassembled message payload is an opcode frame: one tag byte followed
//! by an opcode-specific body.
//!
//! | opcode | body |
//! |---|---|
//! | `Hello` | empty; liveness, delays the idle timeout |
//! | `String` | UTF-8 bytes |
//! | `Audio` | N × i16 little-endian mono PCM |
//! | `PlaybackFinished` | empty |
//! | `StartRecording` / `StopRecording` | empty |
//! | `AudioFormat` | 16 bytes: four little-endian u32 |

use byteorder::{ByteOrder, LittleEndian};

use crate::packet::StreamId;
use crate::{Error, Result};

/// First-byte tag of a message payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// Unrecognized tag; carried so receivers can skip it.
    Unknown = 0,
    /// Liveness signal, empty body.
    Hello = 1,
    /// UTF-8 text for input or output.
    String = 2,
    /// PCM16 mono audio, recorded or to play.
    Audio = 3,
    /// The device finished playing the enqueued audio.
    PlaybackFinished = 4,
    /// Tell the device to start capturing.
    StartRecording = 5,
    /// Tell the device to stop capturing.
    StopRecording = 6,
    /// Device capture/playback format descriptor.
    AudioFormat = 7,
}

impl OpCode {
    /// Decode a tag byte. Unrecognized values map to [`OpCode::Unknown`].
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => OpCode::Hello,
            2 => OpCode::String,
            3 => OpCode::Audio,
            4 => OpCode::PlaybackFinished,
            5 => OpCode::StartRecording,
            6 => OpCode::StopRecording,
            7 => OpCode::AudioFormat,
            _ => OpCode::Unknown,
        }
    }

    /// The opcode of a message payload, or `Unknown` for an empty one.
    pub fn of(message: &[u8]) -> Self {
        message.first().map_or(OpCode::Unknown, |&b| Self::from_u8(b))
    }

    /// The logical stream messages with this opcode travel on. Bulk speech
    /// data gets its own lane so control messages are never stuck behind it.
    pub fn stream(self) -> StreamId {
        match self {
            OpCode::String | OpCode::Audio => StreamId::Speech,
            _ => StreamId::Command,
        }
    }
}

/// Build a `String` message from text.
pub fn string_message(text: &str) -> Vec<u8> {
    let mut message = Vec::with_capacity(1 + text.len());
    message.push(OpCode::String as u8);
    message.extend_from_slice(text.as_bytes());
    message
}

/// Extract the text of a `String` message.
pub fn parse_string(message: &[u8]) -> Result<String> {
    expect_opcode(message, OpCode::String)?;
    String::from_utf8(message[1..].to_vec())
        .map_err(|e| Error::InvalidPayload(format!("string body is not UTF-8: {e}")))
}

/// Build an `Audio` message from mono PCM16 samples.
pub fn audio_message(samples: &[i16]) -> Vec<u8> {
    let mut message = vec![0u8; 1 + samples.len() * 2];
    message[0] = OpCode::Audio as u8;
    LittleEndian::write_i16_into(samples, &mut message[1..]);
    message
}

/// Extract the samples of an `Audio` message, converting to native byte
/// order on big-endian hosts.
pub fn parse_audio(message: &[u8]) -> Result<Vec<i16>> {
    expect_opcode(message, OpCode::Audio)?;
    let body = &message[1..];
    if body.len() % 2 != 0 {
        return Err(Error::InvalidPayload(format!(
            "audio body of {} bytes is not a whole number of samples",
            body.len()
        )));
    }

    let mut samples = vec![0i16; body.len() / 2];
    LittleEndian::read_i16_into(body, &mut samples);
    Ok(samples)
}

/// Build a zero-body message for a lifecycle opcode.
pub fn command_message(opcode: OpCode) -> Vec<u8> {
    vec![opcode as u8]
}

/// Capture and playback parameters announced by the audio device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Sample rate the device records at.
    pub record_hz: u32,
    /// Samples per recorded audio block.
    pub record_frame_samples: u32,
    /// Sample rate the device plays at.
    pub playback_hz: u32,
    /// Samples per playback audio block.
    pub playback_frame_samples: u32,
}

impl AudioFormat {
    /// Body size of an `AudioFormat` frame.
    pub const BODY_SIZE: usize = 16;

    /// Build an `AudioFormat` message.
    pub fn to_message(self) -> Vec<u8> {
        let mut message = vec![0u8; 1 + Self::BODY_SIZE];
        message[0] = OpCode::AudioFormat as u8;
        LittleEndian::write_u32(&mut message[1..5], self.record_hz);
        LittleEndian::write_u32(&mut message[5..9], self.record_frame_samples);
        LittleEndian::write_u32(&mut message[9..13], self.playback_hz);
        LittleEndian::write_u32(&mut message[13..17], self.playback_frame_samples);
        message
    }
}

/// Extract the descriptor of an `AudioFormat` message. The body must be
/// exactly [`AudioFormat::BODY_SIZE`] bytes.
pub fn parse_audio_format(message: &[u8]) -> Result<AudioFormat> {
    expect_opcode(message, OpCode::AudioFormat)?;
    let body = &message[1..];
    if body.len() != AudioFormat::BODY_SIZE {
        return Err(Error::InvalidPayload(format!(
            "audio format body is {} bytes, expected {}",
            body.len(),
            AudioFormat::BODY_SIZE
        )));
    }

    Ok(AudioFormat {
        record_hz: LittleEndian::read_u32(&body[0..4]),
        record_frame_samples: LittleEndian::read_u32(&body[4..8]),
        playback_hz: LittleEndian::read_u32(&body[8..12]),
        playback_frame_samples: LittleEndian::read_u32(&body[12..16]),
    })
}

fn expect_opcode(message: &[u8], expected: OpCode) -> Result<()> {
    if message.is_empty() {
        return Err(Error::InvalidPayload("empty message".into()));
    }
    let actual = OpCode::of(message);
    if actual != expected {
        return Err(Error::InvalidPayload(format!(
            "expected {expected:?} frame, got {actual:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_round_trip() {
        let message = string_message("guten tag");
        assert_eq!(OpCode::of(&message), OpCode::String);
        assert_eq!(parse_string(&message).unwrap(), "guten tag");
    }

    #[test]
    fn test_empty_string_allowed() {
        let message = string_message("");
        assert_eq!(message.len(), 1);
        assert_eq!(parse_string(&message).unwrap(), "");
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let message = vec![OpCode::String as u8, 0xFF, 0xFE];
        assert!(matches!(
            parse_string(&message),
            Err(Error::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_audio_round_trip() {
        let samples = vec![0i16, 1, -1, i16::MAX, i16::MIN, 12345];
        let message = audio_message(&samples);
        assert_eq!(message.len(), 1 + samples.len() * 2);
        assert_eq!(parse_audio(&message).unwrap(), samples);
    }

    #[test]
    fn test_audio_wire_is_little_endian() {
        let message = audio_message(&[0x0102]);
        assert_eq!(&message[1..], &[0x02, 0x01]);
    }

    #[test]
    fn test_audio_odd_body_rejected() {
        let message = vec![OpCode::Audio as u8, 1, 2, 3];
        assert!(matches!(
            parse_audio(&message),
            Err(Error::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_command_messages_are_one_byte() {
        for opcode in [
            OpCode::Hello,
            OpCode::PlaybackFinished,
            OpCode::StartRecording,
            OpCode::StopRecording,
        ] {
            let message = command_message(opcode);
            assert_eq!(message.len(), 1);
            assert_eq!(OpCode::of(&message), opcode);
        }
    }

    #[test]
    fn test_audio_format_round_trip() {
        let format = AudioFormat {
            record_hz: 16000,
            record_frame_samples: 2048,
            playback_hz: 22050,
            playback_frame_samples: 4096,
        };
        let message = format.to_message();
        assert_eq!(message.len(), 17);
        assert_eq!(parse_audio_format(&message).unwrap(), format);
    }

    #[test]
    fn test_audio_format_wrong_size_rejected() {
        let message = vec![OpCode::AudioFormat as u8; 10];
        assert!(matches!(
            parse_audio_format(&message),
            Err(Error::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_stream_classification() {
        assert_eq!(OpCode::String.stream(), StreamId::Speech);
        assert_eq!(OpCode::Audio.stream(), StreamId::Speech);
        assert_eq!(OpCode::Hello.stream(), StreamId::Command);
        assert_eq!(OpCode::StartRecording.stream(), StreamId::Command);
        assert_eq!(OpCode::PlaybackFinished.stream(), StreamId::Command);
        assert_eq!(OpCode::AudioFormat.stream(), StreamId::Command);
        assert_eq!(OpCode::Unknown.stream(), StreamId::Command);
    }

    #[test]
    fn test_unknown_opcode_byte() {
        assert_eq!(OpCode::from_u8(200), OpCode::Unknown);
        assert_eq!(OpCode::of(&[]), OpCode::Unknown);
    }
}
