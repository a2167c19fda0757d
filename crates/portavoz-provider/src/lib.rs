//! Remote transcription and synthesis providers.
//!
//! The voice backend delegates all speech recognition and synthesis to a
//! cloud service through the [`SpeechProvider`] trait: two synchronous
//! calls, no streaming, no local models. [`GoogleCloud`] implements the
//! trait against the Google Cloud Speech / Text-to-Speech REST APIs.
//!
//! Provider calls are the only unbounded-duration blocking operations in
//! the service; they run on whichever worker invoked them and hold no
//! locks while doing so.

mod google;

pub use google::GoogleCloud;

use portavoz_audio::PcmBlock;

/// Synthesized voice gender requested from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceGender {
    /// Female synthesis voice (configuration value 0).
    Female,
    /// Male synthesis voice (any other configuration value).
    Male,
}

impl VoiceGender {
    /// Map the numeric configuration value.
    pub fn from_config(value: u32) -> Self {
        if value == 0 {
            VoiceGender::Female
        } else {
            VoiceGender::Male
        }
    }
}

/// A remote transcription and synthesis service.
pub trait SpeechProvider: Send + Sync {
    /// Transcribe a block of mono PCM16.
    ///
    /// Returns the highest-confidence transcript across all result
    /// segments and alternatives, or the empty string when the service
    /// recognized nothing. Empty audio fails with `InvalidArgument`
    /// before any network traffic.
    fn transcribe(&self, audio: &PcmBlock, language_code: &str) -> Result<String>;

    /// Synthesize text into mono PCM16 at `target_hz`.
    ///
    /// If the service yields a different rate, the adapter resamples.
    /// Empty text fails with `InvalidArgument` before any network traffic.
    fn synthesize(
        &self,
        text: &str,
        language_code: &str,
        gender: VoiceGender,
        target_hz: u32,
    ) -> Result<PcmBlock>;

    /// True when the ambient credential material required by the provider
    /// is present. Checked every multiplexer tick as part of the voice
    /// backend's viability.
    fn is_available(&self) -> bool;
}

/// Errors produced by provider calls.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A caller-supplied value was rejected before touching the network.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The service could not be reached or refused the request.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The service answered with something the adapter cannot use.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

/// Convenience result type for provider operations.
pub type Result<T> = std::result::Result<T, Error>;
