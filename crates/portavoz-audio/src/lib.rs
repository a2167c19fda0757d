//! PCM plumbing for the portavoz voice pipeline.
//!
//! This crate provides:
//!
//! - [`PcmBlock`]: a mono PCM16 buffer tagged with its sample rate
//! - [`AudioTrack`]: a chunked accumulation buffer for recording and
//!   synthesis sessions
//! - [`RateConverter`]: a stateful windowed-sinc polyphase resampler with
//!   resettable session state
//! - [`TriggerGate`]: a time-windowed enable flag driven by a pluggable
//!   wake-phrase matcher

mod resample;
mod track;
mod trigger;

pub use resample::RateConverter;
pub use track::AudioTrack;
pub use trigger::{EnergyMatcher, TriggerGate, TriggerMatcher};

/// A block of signed 16-bit mono PCM at a known sample rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmBlock {
    /// The samples, one channel.
    pub samples: Vec<i16>,
    /// Samples per second.
    pub sample_rate_hz: u32,
}

impl PcmBlock {
    /// Create a block from samples and their rate.
    pub fn new(samples: Vec<i16>, sample_rate_hz: u32) -> Self {
        Self {
            samples,
            sample_rate_hz,
        }
    }

    /// An empty block at the given rate.
    pub fn empty(sample_rate_hz: u32) -> Self {
        Self::new(Vec::new(), sample_rate_hz)
    }

    /// Number of samples in the block.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when the block holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback duration of the block.
    pub fn duration(&self) -> std::time::Duration {
        if self.sample_rate_hz == 0 {
            return std::time::Duration::ZERO;
        }
        std::time::Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate_hz as f64)
    }
}

/// Errors produced by audio buffering and conversion.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A caller-supplied value was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Convenience result type for audio operations.
pub type Result<T> = std::result::Result<T, Error>;
