//! Service configuration.
//!
//! The configuration file is TOML, loaded once at startup and reloaded on a
//! bus reset request. Every option has a default; missing sections or keys
//! keep their defaults, unknown keys are warned about and ignored, and a
//! key of the wrong type is a hard error (an invalid configuration at
//! startup is fatal).
//!
//! ```toml
//! [service]
//! method_wait_ms = 100
//! socket_dir = "/tmp/portavoz"
//!
//! [voice]
//! socket_path = "/tmp/portavoz/portavoz_voice.sock"
//! recording_hz = 16000
//! playback_hz = 16000
//! recording_timeout_s = 3
//! record_storage_secs = 5
//! provider = "google"
//!
//! [provider]
//! language_code = "en"
//! voice_gender = 0
//!
//! [text]
//! socket_path = "/tmp/portavoz/portavoz_text.sock"
//! receive_timeout_s = 30
//!
//! [trigger]
//! enabled = false
//! keyphrase = ""
//! timeout_s = 30
//! ```

use std::path::{Path, PathBuf};

use toml::Value;

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration '{path}': {source}")]
    ReadFile {
        /// Path of the file that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A recognized key holds a value of the wrong type or range.
    #[error("invalid value for '{key}': {reason}")]
    InvalidValue {
        /// The `section.key` path of the offending option.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Convenience result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Multiplexer and socket-directory options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSection {
    /// Multiplexer tick cadence in milliseconds.
    pub method_wait_ms: u32,
    /// Directory the per-channel sockets live in.
    pub socket_dir: PathBuf,
}

/// Voice backend options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceSection {
    /// Socket path of the audio device channel.
    pub socket_path: PathBuf,
    /// Sample rate the transcriber expects.
    pub recording_hz: u32,
    /// Sample rate synthesis is produced at.
    pub playback_hz: u32,
    /// Inbound-audio inactivity gap that ends a recording, in seconds.
    pub recording_timeout_s: u32,
    /// Seconds of audio the record buffer holds before dropping input.
    pub record_storage_secs: u32,
    /// Provider identifier; "google" is the only one currently known.
    pub provider: String,
}

/// Provider voice options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSection {
    /// BCP-47 language code passed to the provider.
    pub language_code: String,
    /// Synthesis voice gender: 0 female, anything else male.
    pub voice_gender: u32,
}

/// Net-forwarder text channel options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSection {
    /// Socket path of the text forwarding channel.
    pub socket_path: PathBuf,
    /// Ingress silence after which the forwarder stops being viable.
    pub receive_timeout_s: u32,
}

/// Wake-phrase trigger gate options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerSection {
    /// Gate the transcription path behind the wake phrase.
    pub enabled: bool,
    /// The wake phrase the matcher listens for.
    pub keyphrase: String,
    /// Seconds the gate stays open after a match.
    pub timeout_s: u32,
}

/// The complete service configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// `[service]` options.
    pub service: ServiceSection,
    /// `[voice]` options.
    pub voice: VoiceSection,
    /// `[provider]` options.
    pub provider: ProviderSection,
    /// `[text]` options.
    pub text: TextSection,
    /// `[trigger]` options.
    pub trigger: TriggerSection,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service: ServiceSection {
                method_wait_ms: 100,
                socket_dir: PathBuf::from("/tmp/portavoz"),
            },
            voice: VoiceSection {
                socket_path: PathBuf::from("/tmp/portavoz/portavoz_voice.sock"),
                recording_hz: 16000,
                playback_hz: 16000,
                recording_timeout_s: 3,
                record_storage_secs: 5,
                provider: "google".to_string(),
            },
            provider: ProviderSection {
                language_code: "en".to_string(),
                voice_gender: 0,
            },
            text: TextSection {
                socket_path: PathBuf::from("/tmp/portavoz/portavoz_text.sock"),
                receive_timeout_s: 30,
            },
            trigger: TriggerSection {
                enabled: false,
                keyphrase: String::new(),
                timeout_s: 30,
            },
        }
    }
}

impl ServiceConfig {
    /// Load configuration from a TOML file, starting from the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string, starting from the defaults.
    pub fn from_toml(content: &str) -> Result<Self> {
        let root: Value = content.parse()?;
        let mut config = Self::default();

        let Some(table) = root.as_table() else {
            return Ok(config);
        };

        for (section, value) in table {
            let Some(entries) = value.as_table() else {
                tracing::warn!(section = %section, "ignoring non-table configuration entry");
                continue;
            };

            match section.as_str() {
                "service" => {
                    for (key, value) in entries {
                        match key.as_str() {
                            "method_wait_ms" => {
                                config.service.method_wait_ms = read_u32(section, key, value)?;
                            }
                            "socket_dir" => {
                                config.service.socket_dir = read_path(section, key, value)?;
                            }
                            _ => warn_unknown(section, key),
                        }
                    }
                }
                "voice" => {
                    for (key, value) in entries {
                        match key.as_str() {
                            "socket_path" => {
                                config.voice.socket_path = read_path(section, key, value)?;
                            }
                            "recording_hz" => {
                                config.voice.recording_hz = read_u32(section, key, value)?;
                            }
                            "playback_hz" => {
                                config.voice.playback_hz = read_u32(section, key, value)?;
                            }
                            "recording_timeout_s" => {
                                config.voice.recording_timeout_s = read_u32(section, key, value)?;
                            }
                            "record_storage_secs" => {
                                config.voice.record_storage_secs = read_u32(section, key, value)?;
                            }
                            "provider" => {
                                config.voice.provider = read_string(section, key, value)?;
                            }
                            _ => warn_unknown(section, key),
                        }
                    }
                }
                "provider" => {
                    for (key, value) in entries {
                        match key.as_str() {
                            "language_code" => {
                                config.provider.language_code = read_string(section, key, value)?;
                            }
                            "voice_gender" => {
                                config.provider.voice_gender = read_u32(section, key, value)?;
                            }
                            _ => warn_unknown(section, key),
                        }
                    }
                }
                "text" => {
                    for (key, value) in entries {
                        match key.as_str() {
                            "socket_path" => {
                                config.text.socket_path = read_path(section, key, value)?;
                            }
                            "receive_timeout_s" => {
                                config.text.receive_timeout_s = read_u32(section, key, value)?;
                            }
                            _ => warn_unknown(section, key),
                        }
                    }
                }
                "trigger" => {
                    for (key, value) in entries {
                        match key.as_str() {
                            "enabled" => {
                                config.trigger.enabled = read_bool(section, key, value)?;
                            }
                            "keyphrase" => {
                                config.trigger.keyphrase = read_string(section, key, value)?;
                            }
                            "timeout_s" => {
                                config.trigger.timeout_s = read_u32(section, key, value)?;
                            }
                            _ => warn_unknown(section, key),
                        }
                    }
                }
                _ => {
                    tracing::warn!(section = %section, "ignoring unknown configuration section");
                }
            }
        }

        Ok(config)
    }
}

fn warn_unknown(section: &str, key: &str) {
    tracing::warn!(key = %format!("{section}.{key}"), "ignoring unknown configuration key");
}

fn read_u32(section: &str, key: &str, value: &Value) -> Result<u32> {
    let integer = value.as_integer().ok_or_else(|| ConfigError::InvalidValue {
        key: format!("{section}.{key}"),
        reason: format!("expected an integer, got {}", value.type_str()),
    })?;
    u32::try_from(integer).map_err(|_| ConfigError::InvalidValue {
        key: format!("{section}.{key}"),
        reason: format!("{integer} is out of range"),
    })
}

fn read_string(section: &str, key: &str, value: &Value) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ConfigError::InvalidValue {
            key: format!("{section}.{key}"),
            reason: format!("expected a string, got {}", value.type_str()),
        })
}

fn read_path(section: &str, key: &str, value: &Value) -> Result<PathBuf> {
    read_string(section, key, value).map(PathBuf::from)
}

fn read_bool(section: &str, key: &str, value: &Value) -> Result<bool> {
    value.as_bool().ok_or_else(|| ConfigError::InvalidValue {
        key: format!("{section}.{key}"),
        reason: format!("expected a boolean, got {}", value.type_str()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.service.method_wait_ms, 100);
        assert_eq!(config.voice.recording_hz, 16000);
        assert_eq!(config.voice.recording_timeout_s, 3);
        assert_eq!(config.provider.language_code, "en");
        assert_eq!(config.text.receive_timeout_s, 30);
        assert!(!config.trigger.enabled);
    }

    #[test]
    fn test_full_file() {
        let config = ServiceConfig::from_toml(
            r#"
            [service]
            method_wait_ms = 50
            socket_dir = "/run/portavoz"

            [voice]
            socket_path = "/run/portavoz/voice.sock"
            recording_hz = 44100
            playback_hz = 22050
            recording_timeout_s = 5
            record_storage_secs = 10
            provider = "google"

            [provider]
            language_code = "de"
            voice_gender = 1

            [text]
            socket_path = "/run/portavoz/text.sock"
            receive_timeout_s = 60

            [trigger]
            enabled = true
            keyphrase = "hey portavoz"
            timeout_s = 15
            "#,
        )
        .unwrap();

        assert_eq!(config.service.method_wait_ms, 50);
        assert_eq!(config.service.socket_dir, PathBuf::from("/run/portavoz"));
        assert_eq!(config.voice.recording_hz, 44100);
        assert_eq!(config.voice.playback_hz, 22050);
        assert_eq!(config.voice.record_storage_secs, 10);
        assert_eq!(config.provider.language_code, "de");
        assert_eq!(config.provider.voice_gender, 1);
        assert_eq!(config.text.receive_timeout_s, 60);
        assert!(config.trigger.enabled);
        assert_eq!(config.trigger.keyphrase, "hey portavoz");
        assert_eq!(config.trigger.timeout_s, 15);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = ServiceConfig::from_toml(
            r#"
            [voice]
            recording_hz = 8000
            "#,
        )
        .unwrap();

        assert_eq!(config.voice.recording_hz, 8000);
        // Everything else untouched.
        assert_eq!(config.voice.playback_hz, 16000);
        assert_eq!(config.service.method_wait_ms, 100);
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let config = ServiceConfig::from_toml(
            r#"
            [service]
            method_wait_ms = 25
            not_a_real_option = "whatever"

            [mystery_section]
            foo = 1
            "#,
        )
        .unwrap();

        assert_eq!(config.service.method_wait_ms, 25);
    }

    #[test]
    fn test_wrong_type_is_fatal() {
        let result = ServiceConfig::from_toml(
            r#"
            [voice]
            recording_hz = "fast"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_negative_integer_is_fatal() {
        let result = ServiceConfig::from_toml(
            r#"
            [voice]
            recording_timeout_s = -3
            "#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_missing_file_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = ServiceConfig::load(dir.path().join("nope.toml"));
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("speech.toml");
        std::fs::write(&path, "[provider]\nlanguage_code = \"fr\"\n").unwrap();

        let config = ServiceConfig::load(&path).unwrap();
        assert_eq!(config.provider.language_code, "fr");
    }

    #[test]
    fn test_garbage_is_parse_error() {
        assert!(matches!(
            ServiceConfig::from_toml("== not toml =="),
            Err(ConfigError::Parse(_))
        ));
    }
}
