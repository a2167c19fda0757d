//! Voice backend.
//!
//! Exchanges PCM blocks with a local audio-device process over the voice
//! message stream channel and drives the record → transcribe → synthesize
//! → playback pipeline against the cloud provider.
//!
//! Silence is not measured from PCM energy: the device applies its own
//! voice-activity detection and simply stops sending `AUDIO` blocks, so a
//! recording ends when no audio has arrived for the configured timeout.
//! The trigger gate decides whether the accumulated recording may be
//! dispatched to the remote transcriber at all; gated-off recordings are
//! discarded locally.
//!
//! Playback acknowledgement is deferred: the utterance counts as performed
//! only when the device reports `PLAYBACK_FINISHED`, at which point the
//! pipeline hands back to recording.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use portavoz_audio::{AudioTrack, RateConverter, TriggerGate};
use portavoz_proto::{
    AudioFormat, OpCode, audio_message, command_message, parse_audio, parse_audio_format,
};
use portavoz_provider::{SpeechProvider, VoiceGender};
use portavoz_stream::{MessageStream, Role, StreamConfig};

use crate::bridge::EventBridge;
use crate::storage::OutputStorage;
use crate::Result;

/// Default block size assumed until the device announces its format.
const DEFAULT_FRAME_SAMPLES: u32 = 2048;

/// Confirmation tone parameters: a short 880 Hz beep.
const TONE_HZ: f32 = 880.0;
const TONE_DURATION_MS: u32 = 150;
const TONE_AMPLITUDE: f32 = 0.25;
const TONE_FADE_MS: u32 = 5;

/// Voice pipeline configuration.
#[derive(Debug, Clone)]
pub struct VoiceOptions {
    /// Socket path of the audio device channel.
    pub socket_path: PathBuf,
    /// Sample rate the transcriber expects; device audio is converted to it.
    pub recording_hz: u32,
    /// Sample rate synthesis is requested at.
    pub playback_hz: u32,
    /// Inbound-audio inactivity gap that ends a recording.
    pub recording_timeout: Duration,
    /// Seconds of audio the record buffer holds.
    pub record_storage_secs: u32,
    /// Language code passed to the provider.
    pub language_code: String,
    /// Synthesis voice gender.
    pub voice_gender: VoiceGender,
}

/// Pipeline state per utterance cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VoiceState {
    /// Not capturing; waiting to be (re)armed.
    Idle,
    /// Accumulating inbound audio.
    Recording,
    /// Audio stopped arriving; waiting out the silence gap.
    SilenceHold,
    /// Synthesis sent to the device; waiting for playback to finish.
    Playing,
}

/// Audio in/out over a message stream plus STT/TTS dispatch.
pub struct VoiceBackend {
    stream: MessageStream,
    provider: Arc<dyn SpeechProvider>,
    options: VoiceOptions,

    /// Device capture/playback parameters; configured rates until the
    /// device announces otherwise.
    device_format: AudioFormat,
    /// Record buffer at the transcriber rate. Fixed capacity: overflow
    /// drops samples, it does not abort the session.
    record: AudioTrack,
    /// Device-rate to transcriber-rate conversion, reset per cycle.
    converter: RateConverter,
    gate: TriggerGate,

    state: VoiceState,
    last_audio: Instant,
    /// `(string_id, group_id)` to acknowledge when playback finishes;
    /// `None` while playing the trigger tone.
    playing_ack: Option<(u32, u32)>,
    play_trigger_sound: bool,
    playback_started: Instant,
}

impl std::fmt::Debug for VoiceBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceBackend")
            .field("state", &self.state)
            .field("connected", &self.stream.connected())
            .finish()
    }
}

impl VoiceBackend {
    /// Bind the voice channel socket and start its worker.
    pub fn new(
        options: VoiceOptions,
        provider: Arc<dyn SpeechProvider>,
        gate: TriggerGate,
    ) -> Result<Self> {
        let stream = MessageStream::open(StreamConfig::new(&options.socket_path, Role::Server))?;

        let record = AudioTrack::new(
            options.recording_hz,
            DEFAULT_FRAME_SAMPLES as usize,
            options.record_storage_secs,
            false,
        );

        let device_format = AudioFormat {
            record_hz: options.recording_hz,
            record_frame_samples: DEFAULT_FRAME_SAMPLES,
            playback_hz: options.playback_hz,
            playback_frame_samples: DEFAULT_FRAME_SAMPLES,
        };

        Ok(Self {
            stream,
            provider,
            options,
            device_format,
            record,
            converter: RateConverter::new(),
            gate,
            state: VoiceState::Idle,
            last_audio: Instant::now(),
            playing_ack: None,
            play_trigger_sound: false,
            playback_started: Instant::now(),
        })
    }

    /// Viable while the device is connected and the provider has its
    /// credentials.
    pub fn is_viable(&self) -> bool {
        self.stream.connected() && self.provider.is_available()
    }

    /// Arm the device and start a recording session.
    pub fn resume(&mut self) {
        tracing::debug!("voice backend resumed");
        self.begin_recording();
    }

    /// Stop the device and drop all session state. An utterance that was
    /// mid-playback stays unacknowledged.
    pub fn pause(&mut self) {
        tracing::debug!("voice backend paused");
        if self.stream.connected()
            && let Err(e) = self.stream.send(command_message(OpCode::StopRecording))
        {
            tracing::warn!(error = %e, "failed to send stop-recording");
        }
        self.abort_session();
        self.gate.reset();
    }

    /// One ingress tick.
    pub fn listen(&mut self, bridge: &EventBridge) -> Result<()> {
        if !self.stream.connected() {
            if self.state != VoiceState::Idle {
                tracing::warn!("audio stream lost, aborting voice session");
                self.abort_session();
            }
            return Ok(());
        }

        let mut got_audio = false;

        while let Some(message) = self.stream.try_recv() {
            match OpCode::of(&message) {
                OpCode::Audio => match parse_audio(&message) {
                    Ok(samples) => {
                        got_audio = true;
                        self.ingest_audio(&samples);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "discarding undecodable audio block");
                    }
                },
                OpCode::AudioFormat => match parse_audio_format(&message) {
                    Ok(format) => {
                        tracing::info!(
                            record_hz = format.record_hz,
                            playback_hz = format.playback_hz,
                            "audio device announced format"
                        );
                        self.device_format = format;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "discarding undecodable format descriptor");
                    }
                },
                OpCode::PlaybackFinished => self.playback_finished(bridge),
                opcode => {
                    tracing::debug!(?opcode, "ignoring message on voice channel");
                }
            }
        }

        match self.state {
            VoiceState::Idle if got_audio => {
                // The device is capturing even though we never armed it;
                // take the audio rather than fight it.
                self.state = VoiceState::Recording;
            }
            VoiceState::Recording if !got_audio && !self.record.is_empty() => {
                tracing::debug!("audio stopped arriving, holding for silence gap");
                self.state = VoiceState::SilenceHold;
            }
            VoiceState::SilenceHold => {
                if got_audio {
                    self.state = VoiceState::Recording;
                } else if self.last_audio.elapsed() >= self.options.recording_timeout {
                    self.finish_recording(bridge);
                }
            }
            _ => {}
        }

        Ok(())
    }

    /// One egress tick.
    pub fn say(&mut self, storage: &OutputStorage, bridge: &EventBridge) -> Result<()> {
        if !self.stream.connected() || self.state == VoiceState::Playing {
            return Ok(());
        }

        if self.play_trigger_sound {
            self.play_trigger_sound = false;
            let tone = trigger_tone(self.device_format.playback_hz);
            self.start_playback(tone, None)?;
            return Ok(());
        }

        if !storage.available() {
            if self.state == VoiceState::Idle {
                // Input was delivered and nothing is waiting to be said:
                // hand back to recording.
                self.begin_recording();
            }
            return Ok(());
        }

        let utterance = storage.pop()?;
        match self.provider.synthesize(
            &utterance.text,
            &self.options.language_code,
            self.options.voice_gender,
            self.options.playback_hz,
        ) {
            Ok(block) => {
                let samples = if block.sample_rate_hz == self.device_format.playback_hz {
                    block.samples
                } else {
                    let mut converter = RateConverter::new();
                    match converter.convert(
                        &block.samples,
                        block.sample_rate_hz,
                        self.device_format.playback_hz,
                    ) {
                        Ok(samples) => samples,
                        Err(e) => {
                            tracing::error!(
                                string_id = utterance.string_id,
                                error = %e,
                                "dropped say string: playback conversion failed"
                            );
                            self.begin_recording();
                            return Ok(());
                        }
                    }
                };
                self.start_playback(samples, Some((utterance.string_id, utterance.group_id)))?;
            }
            Err(e) => {
                // No acknowledgement: the bus will see the request as
                // never performed. A failed synthesis always lands back in
                // recording, whatever state the cycle was in.
                tracing::warn!(
                    string_id = utterance.string_id,
                    error = %e,
                    "dropped say string: synthesis failed"
                );
                self.begin_recording();
            }
        }

        Ok(())
    }

    /// Drop buffered ingress after a bus reset.
    pub fn reset(&mut self) {
        self.stream.clear_recv(None);
        self.record.clear();
        self.converter.reset();
    }

    /// Feed one inbound audio block: trigger matching, rate conversion,
    /// record accumulation.
    fn ingest_audio(&mut self, samples: &[i16]) {
        if self.gate.observe(samples, self.device_format.record_hz) {
            tracing::info!("wake phrase recognized, opening recognition window");
            self.play_trigger_sound = true;
        } else {
            // Ongoing speech keeps an open window open.
            self.gate.refresh();
        }

        let converted;
        let samples = if self.device_format.record_hz == self.options.recording_hz {
            samples
        } else {
            match self.converter.convert(
                samples,
                self.device_format.record_hz,
                self.options.recording_hz,
            ) {
                Ok(c) => {
                    converted = c;
                    converted.as_slice()
                }
                Err(e) => {
                    tracing::warn!(error = %e, "discarding unconvertible audio block");
                    return;
                }
            }
        };

        self.record.push(samples);
        self.last_audio = Instant::now();
    }

    /// The silence gap elapsed: close the cycle and maybe transcribe.
    fn finish_recording(&mut self, bridge: &EventBridge) {
        let block = self.record.to_block();

        // Cycle boundary: the buffer and converter state never carry over.
        self.record.clear();
        self.converter.reset();
        self.last_audio = Instant::now();

        if !self.gate.is_open() {
            tracing::debug!(
                samples = block.len(),
                "discarding recording outside the recognition window"
            );
            self.state = VoiceState::Recording;
            return;
        }

        match self.provider.transcribe(&block, &self.options.language_code) {
            Ok(text) if text.is_empty() => {
                tracing::debug!("transcription returned nothing usable");
                self.state = VoiceState::Recording;
            }
            Ok(text) => {
                match bridge.publish_input(&text) {
                    Ok(string_id) => {
                        tracing::debug!(string_id, chars = text.len(), "published voice input");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to publish voice input");
                    }
                }
                self.state = VoiceState::Idle;
            }
            Err(e) => {
                tracing::warn!(error = %e, "transcription failed, resuming recording");
                self.state = VoiceState::Recording;
            }
        }
    }

    /// The device finished playing: acknowledge and hand back to listening.
    fn playback_finished(&mut self, bridge: &EventBridge) {
        if self.state != VoiceState::Playing {
            tracing::debug!("spurious playback-finished ignored");
            return;
        }

        if let Some((string_id, group_id)) = self.playing_ack.take()
            && let Err(e) = bridge.acknowledge_output(string_id, group_id)
        {
            tracing::error!(string_id, error = %e, "failed to acknowledge performed output");
        }

        // Time spent speaking must not consume the recognition window.
        self.gate.extend_by(self.playback_started.elapsed());
        self.begin_recording();
    }

    /// Ship audio to the device, frame by frame, and wait for playback.
    fn start_playback(&mut self, samples: Vec<i16>, ack: Option<(u32, u32)>) -> Result<()> {
        self.stream.send(command_message(OpCode::StopRecording))?;

        let frame = self.device_format.playback_frame_samples.max(1) as usize;
        for chunk in samples.chunks(frame) {
            self.stream.send(audio_message(chunk))?;
        }

        self.playing_ack = ack;
        self.playback_started = Instant::now();
        self.state = VoiceState::Playing;
        Ok(())
    }

    /// Arm the device and open a fresh recording session.
    fn begin_recording(&mut self) {
        if let Err(e) = self.stream.send(command_message(OpCode::StartRecording)) {
            tracing::warn!(error = %e, "failed to send start-recording");
        }
        self.record.clear();
        self.converter.reset();
        self.last_audio = Instant::now();
        self.state = VoiceState::Recording;
    }

    /// Forget the current session without acknowledging anything.
    fn abort_session(&mut self) {
        self.record.clear();
        self.converter.reset();
        self.playing_ack = None;
        self.play_trigger_sound = false;
        self.state = VoiceState::Idle;
    }
}

/// The wake confirmation beep, generated at the device playback rate with
/// short fades so it does not click.
fn trigger_tone(sample_rate_hz: u32) -> Vec<i16> {
    let total = (sample_rate_hz * TONE_DURATION_MS / 1000) as usize;
    let fade = ((sample_rate_hz * TONE_FADE_MS / 1000) as usize).max(1);

    (0..total)
        .map(|i| {
            let t = i as f32 / sample_rate_hz as f32;
            let envelope = if i < fade {
                i as f32 / fade as f32
            } else if i >= total - fade {
                (total - i) as f32 / fade as f32
            } else {
                1.0
            };
            let v = (2.0 * std::f32::consts::PI * TONE_HZ * t).sin();
            (v * envelope * TONE_AMPLITUDE * 32767.0) as i16
        })
        .collect()
}
