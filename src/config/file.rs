//! TOML configuration file loading
//!
//! Supports `~/.config/cadence/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::PathBuf;

use serde::Deserialize;

use crate::voice::TtsProvider;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct CadenceConfigFile {
    /// Agent endpoint configuration
    #[serde(default)]
    pub agent: AgentFileConfig,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Streaming pipeline tunables
    #[serde(default)]
    pub pipeline: PipelineFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Agent endpoint configuration
#[derive(Debug, Default, Deserialize)]
pub struct AgentFileConfig {
    /// Base URL of an OpenAI-compatible API (e.g. "http://localhost:11434/v1")
    pub base_url: Option<String>,

    /// Bearer token for the agent endpoint
    pub api_key: Option<String>,

    /// Model identifier
    pub model: Option<String>,

    pub system_prompt: Option<String>,

    /// Conversation identifier used for history
    pub conversation_id: Option<String>,

    /// Reply spoken when the agent's stream fails
    pub fallback_reply: Option<String>,

    /// Connect timeout in seconds
    pub connect_timeout_secs: Option<u64>,

    /// Messages of history kept per conversation
    pub max_history: Option<usize>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Enable voice input/output
    pub enabled: Option<bool>,

    /// Seconds recorded per utterance
    pub record_secs: Option<u64>,

    /// Input device name; the host default when unset
    pub input_device: Option<String>,

    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// Spoken language hint (e.g. "zh")
    pub stt_language: Option<String>,

    /// Override for the transcription API base URL
    pub stt_base_url: Option<String>,

    /// "openai" or "elevenlabs"
    pub tts_provider: Option<TtsProvider>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "alloy")
    pub tts_voice: Option<String>,

    /// Override for the speech API base URL
    pub tts_base_url: Option<String>,

    /// Speaking rate adjustment in percent
    pub rate: Option<i32>,

    /// Pitch adjustment in Hz
    pub pitch: Option<i32>,

    /// Volume adjustment in percent
    pub volume: Option<i32>,
}

/// Streaming pipeline configuration
#[derive(Debug, Default, Deserialize)]
pub struct PipelineFileConfig {
    pub dequeue_timeout_secs: Option<u64>,
    pub min_segment_chars: Option<usize>,
    pub max_segment_chars: Option<usize>,
    pub synthesis_attempts: Option<u32>,
    pub synthesis_retry_delay_ms: Option<u64>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub elevenlabs: Option<String>,
}

/// Load the TOML config file from `CADENCE_CONFIG` or the standard path
///
/// Returns `CadenceConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> CadenceConfigFile {
    let Some(path) = config_file_path() else {
        return CadenceConfigFile::default();
    };

    if !path.exists() {
        return CadenceConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                CadenceConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            CadenceConfigFile::default()
        }
    }
}

/// Return the config file path: `$CADENCE_CONFIG` or `~/.config/cadence/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CADENCE_CONFIG") {
        return Some(PathBuf::from(path));
    }

    directories::BaseDirs::new().map(|d| d.config_dir().join("cadence").join("config.toml"))
}
