//! Google Cloud Speech / Text-to-Speech REST adapter.
//!
//! Both operations use the v1 REST surface with an API key taken from the
//! process environment (`GOOGLE_API_KEY`). Audio crosses the wire as
//! base64 LINEAR16; the synthesis response arrives in a WAV container that
//! is unwrapped with `hound` before resampling to the requested rate.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use byteorder::{ByteOrder, LittleEndian};
use serde::Deserialize;

use portavoz_audio::{PcmBlock, RateConverter};

use crate::{Error, Result, SpeechProvider, VoiceGender};

/// Environment variable holding the API key.
const API_KEY_ENV: &str = "GOOGLE_API_KEY";

const SPEECH_ENDPOINT: &str = "https://speech.googleapis.com/v1/speech:recognize";
const TTS_ENDPOINT: &str = "https://texttospeech.googleapis.com/v1/text:synthesize";

/// Google Cloud speech provider.
pub struct GoogleCloud {
    client: reqwest::blocking::Client,
}

impl Default for GoogleCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl GoogleCloud {
    /// Create the adapter. Credentials are resolved per call, so a key
    /// exported after startup is picked up without a restart.
    pub fn new() -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
        }
    }

    fn api_key(&self) -> Option<String> {
        std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty())
    }

    fn post(&self, endpoint: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let key = self
            .api_key()
            .ok_or_else(|| Error::Unavailable(format!("{API_KEY_ENV} is not set")))?;

        let response = self
            .client
            .post(format!("{endpoint}?key={key}"))
            .json(body)
            .send()
            .map_err(|e| Error::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().unwrap_or_default();
            return Err(Error::Unavailable(format!(
                "service returned {status}: {text}"
            )));
        }

        response
            .json()
            .map_err(|e| Error::InvalidResponse(e.to_string()))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecognizeResponse {
    #[serde(default)]
    results: Vec<RecognizeResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecognizeResult {
    #[serde(default)]
    alternatives: Vec<RecognizeAlternative>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecognizeAlternative {
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    confidence: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeResponse {
    #[serde(default)]
    audio_content: String,
}

/// Global argmax over confidence across all result segments. The empty
/// string means the service returned no alternative at all.
fn select_transcript(response: &RecognizeResponse) -> String {
    let mut best_confidence = f32::NEG_INFINITY;
    let mut best = String::new();

    for result in &response.results {
        for alternative in &result.alternatives {
            if alternative.confidence > best_confidence {
                best_confidence = alternative.confidence;
                best = alternative.transcript.clone();
            }
        }
    }

    best
}

/// Unwrap the LINEAR16 synthesis payload into samples and their rate.
///
/// The REST endpoint wraps LINEAR16 in a WAV container; raw PCM (as the
/// gRPC surface returns it) is accepted too and assumed to be at
/// `assumed_hz`.
fn decode_linear16(bytes: &[u8], assumed_hz: u32) -> Result<PcmBlock> {
    if bytes.starts_with(b"RIFF") {
        let reader = hound::WavReader::new(std::io::Cursor::new(bytes))
            .map_err(|e| Error::InvalidResponse(format!("bad WAV container: {e}")))?;
        let spec = reader.spec();
        if spec.channels != 1 {
            return Err(Error::InvalidResponse(format!(
                "expected mono synthesis audio, got {} channels",
                spec.channels
            )));
        }
        let samples: std::result::Result<Vec<i16>, _> =
            reader.into_samples::<i16>().collect();
        let samples =
            samples.map_err(|e| Error::InvalidResponse(format!("bad WAV samples: {e}")))?;
        return Ok(PcmBlock::new(samples, spec.sample_rate));
    }

    if bytes.len() % 2 != 0 {
        return Err(Error::InvalidResponse(
            "PCM payload is not a whole number of samples".into(),
        ));
    }
    let mut samples = vec![0i16; bytes.len() / 2];
    LittleEndian::read_i16_into(bytes, &mut samples);
    Ok(PcmBlock::new(samples, assumed_hz))
}

impl SpeechProvider for GoogleCloud {
    fn transcribe(&self, audio: &PcmBlock, language_code: &str) -> Result<String> {
        if audio.is_empty() {
            return Err(Error::InvalidArgument("no audio to transcribe".into()));
        }

        let mut bytes = vec![0u8; audio.samples.len() * 2];
        LittleEndian::write_i16_into(&audio.samples, &mut bytes);

        let request = serde_json::json!({
            "config": {
                "encoding": "LINEAR16",
                "sampleRateHertz": audio.sample_rate_hz,
                "languageCode": language_code,
                "audioChannelCount": 1,
                "profanityFilter": true,
            },
            "audio": {
                "content": BASE64.encode(&bytes),
            },
        });

        let response: RecognizeResponse =
            serde_json::from_value(self.post(SPEECH_ENDPOINT, &request)?)
                .map_err(|e| Error::InvalidResponse(e.to_string()))?;

        let transcript = select_transcript(&response);
        tracing::debug!(
            chars = transcript.len(),
            segments = response.results.len(),
            "transcription complete"
        );
        Ok(transcript)
    }

    fn synthesize(
        &self,
        text: &str,
        language_code: &str,
        gender: VoiceGender,
        target_hz: u32,
    ) -> Result<PcmBlock> {
        if text.is_empty() {
            return Err(Error::InvalidArgument("no text to synthesize".into()));
        }

        let ssml_gender = match gender {
            VoiceGender::Female => "FEMALE",
            VoiceGender::Male => "MALE",
        };

        let request = serde_json::json!({
            "input": { "text": text },
            "voice": {
                "languageCode": language_code,
                "ssmlGender": ssml_gender,
            },
            "audioConfig": {
                "audioEncoding": "LINEAR16",
                "sampleRateHertz": target_hz,
            },
        });

        let response: SynthesizeResponse =
            serde_json::from_value(self.post(TTS_ENDPOINT, &request)?)
                .map_err(|e| Error::InvalidResponse(e.to_string()))?;

        let bytes = BASE64
            .decode(&response.audio_content)
            .map_err(|e| Error::InvalidResponse(format!("bad base64 audio: {e}")))?;
        if bytes.is_empty() {
            return Err(Error::InvalidResponse("empty synthesis audio".into()));
        }

        let block = decode_linear16(&bytes, target_hz)?;

        // The service usually honors sampleRateHertz, but re-express the
        // block at the requested rate when it does not.
        if block.sample_rate_hz != target_hz {
            let mut converter = RateConverter::new();
            let samples = converter
                .convert(&block.samples, block.sample_rate_hz, target_hz)
                .map_err(|e| Error::InvalidResponse(e.to_string()))?;
            return Ok(PcmBlock::new(samples, target_hz));
        }

        Ok(block)
    }

    fn is_available(&self) -> bool {
        self.api_key().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_transcript_argmax_across_segments() {
        let response: RecognizeResponse = serde_json::from_value(serde_json::json!({
            "results": [
                { "alternatives": [
                    { "transcript": "low", "confidence": 0.3 },
                    { "transcript": "high", "confidence": 0.95 },
                ]},
                { "alternatives": [
                    { "transcript": "middle", "confidence": 0.7 },
                ]},
            ]
        }))
        .unwrap();

        assert_eq!(select_transcript(&response), "high");
    }

    #[test]
    fn test_select_transcript_empty_results() {
        let response = RecognizeResponse::default();
        assert_eq!(select_transcript(&response), "");
    }

    #[test]
    fn test_select_transcript_missing_confidence_defaults_zero() {
        let response: RecognizeResponse = serde_json::from_value(serde_json::json!({
            "results": [
                { "alternatives": [ { "transcript": "unscored" } ] },
            ]
        }))
        .unwrap();

        // A lone zero-confidence alternative still beats "nothing".
        assert_eq!(select_transcript(&response), "unscored");
    }

    #[test]
    fn test_transcribe_empty_audio_rejected() {
        let provider = GoogleCloud::new();
        let audio = PcmBlock::empty(16000);
        assert!(matches!(
            provider.transcribe(&audio, "en"),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_synthesize_empty_text_rejected() {
        let provider = GoogleCloud::new();
        assert!(matches!(
            provider.synthesize("", "en", VoiceGender::Female, 16000),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_gender_mapping() {
        assert_eq!(VoiceGender::from_config(0), VoiceGender::Female);
        assert_eq!(VoiceGender::from_config(1), VoiceGender::Male);
        assert_eq!(VoiceGender::from_config(42), VoiceGender::Male);
    }

    #[test]
    fn test_decode_linear16_wav_container() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for s in [0i16, 100, -100, 32000] {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }

        let block = decode_linear16(cursor.get_ref(), 16000).unwrap();
        assert_eq!(block.sample_rate_hz, 22050);
        assert_eq!(block.samples, vec![0, 100, -100, 32000]);
    }

    #[test]
    fn test_decode_linear16_raw_pcm() {
        // 0x0102 little-endian.
        let block = decode_linear16(&[0x02, 0x01], 16000).unwrap();
        assert_eq!(block.sample_rate_hz, 16000);
        assert_eq!(block.samples, vec![0x0102]);
    }

    #[test]
    fn test_decode_linear16_odd_length_rejected() {
        assert!(decode_linear16(&[1, 2, 3], 16000).is_err());
    }
}
