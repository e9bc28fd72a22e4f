//! Configuration management for Cadence

pub mod file;

use std::time::Duration;

use crate::pipeline::{DEFAULT_FALLBACK_REPLY, PipelineConfig, SegmenterConfig};
use crate::voice::{RetryPolicy, TtsProvider, VoiceParams};
use crate::{Error, Result};

use file::CadenceConfigFile;

const DEFAULT_AGENT_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful voice assistant. Answer in short, \
    natural spoken sentences without markdown, lists or code.";

/// Cadence configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Agent endpoint
    pub agent: AgentConfig,

    /// Voice configuration
    pub voice: VoiceConfig,

    /// Streaming pipeline tunables
    pub pipeline: PipelineConfig,

    /// Synthesis retry policy
    pub retry: RetryPolicy,

    /// API keys
    pub api_keys: ApiKeys,
}

/// Agent endpoint configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Base URL of an OpenAI-compatible API
    pub base_url: String,

    /// Bearer token; falls back to the `OpenAI` key
    pub api_key: Option<String>,

    pub model: String,

    pub system_prompt: String,

    /// Conversation identifier; a fresh one per process unless configured
    pub conversation_id: String,

    /// Connect timeout for agent requests
    pub connect_timeout: Duration,

    /// Messages of history kept per conversation
    pub max_history: usize,
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Enable voice input/output
    pub enabled: bool,

    /// Length of each recording
    pub record_duration: Duration,

    /// Input device name; the host default when `None`
    pub input_device: Option<String>,

    /// STT model (e.g. "whisper-1")
    pub stt_model: String,

    /// Spoken language hint for transcription
    pub stt_language: Option<String>,

    /// Override for the transcription API base URL
    pub stt_base_url: Option<String>,

    pub tts_provider: TtsProvider,

    /// TTS model (e.g. "tts-1")
    pub tts_model: String,

    /// Override for the speech API base URL
    pub tts_base_url: Option<String>,

    /// Voice and prosody for synthesis
    pub params: VoiceParams,
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (for Whisper and TTS)
    pub openai: Option<String>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<String>,
}

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if the resulting settings are inconsistent
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::resolve(fc, |key| std::env::var(key).ok())
    }

    /// Layer `env` over a parsed config file over defaults
    ///
    /// # Errors
    ///
    /// Returns error if the resulting settings are inconsistent
    pub fn resolve(fc: CadenceConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        // API keys (env > toml > None)
        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY").or(fc.api_keys.openai),
            elevenlabs: env("ELEVENLABS_API_KEY").or(fc.api_keys.elevenlabs),
        };

        let agent = AgentConfig {
            base_url: env("CADENCE_AGENT_URL")
                .or(fc.agent.base_url)
                .unwrap_or_else(|| DEFAULT_AGENT_URL.to_string()),
            api_key: env("CADENCE_AGENT_API_KEY")
                .or(fc.agent.api_key)
                .or_else(|| api_keys.openai.clone()),
            model: env("CADENCE_MODEL")
                .or(fc.agent.model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            system_prompt: fc
                .agent
                .system_prompt
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            conversation_id: fc
                .agent
                .conversation_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            connect_timeout: Duration::from_secs(fc.agent.connect_timeout_secs.unwrap_or(30)),
            max_history: fc.agent.max_history.unwrap_or(15),
        };

        let defaults = VoiceParams::default();
        let voice = VoiceConfig {
            enabled: fc.voice.enabled.unwrap_or(true),
            record_duration: Duration::from_secs(
                env("CADENCE_RECORD_SECS")
                    .and_then(|s| s.parse().ok())
                    .or(fc.voice.record_secs)
                    .unwrap_or(15),
            ),
            input_device: env("CADENCE_INPUT_DEVICE").or(fc.voice.input_device),
            stt_model: env("CADENCE_STT_MODEL")
                .or(fc.voice.stt_model)
                .unwrap_or_else(|| "whisper-1".to_string()),
            stt_language: fc.voice.stt_language,
            stt_base_url: fc.voice.stt_base_url,
            tts_provider: fc.voice.tts_provider.unwrap_or_default(),
            tts_model: env("CADENCE_TTS_MODEL")
                .or(fc.voice.tts_model)
                .unwrap_or_else(|| "tts-1".to_string()),
            tts_base_url: fc.voice.tts_base_url,
            params: VoiceParams {
                voice: env("CADENCE_TTS_VOICE")
                    .or(fc.voice.tts_voice)
                    .unwrap_or(defaults.voice),
                rate: fc.voice.rate.unwrap_or(defaults.rate),
                pitch: fc.voice.pitch.unwrap_or(defaults.pitch),
                volume: fc.voice.volume.unwrap_or(defaults.volume),
            },
        };

        let segmenter_defaults = SegmenterConfig::default();
        let pipeline = PipelineConfig {
            dequeue_timeout: Duration::from_secs(fc.pipeline.dequeue_timeout_secs.unwrap_or(15)),
            segmenter: SegmenterConfig {
                min_chars: fc
                    .pipeline
                    .min_segment_chars
                    .unwrap_or(segmenter_defaults.min_chars),
                max_chars: fc
                    .pipeline
                    .max_segment_chars
                    .unwrap_or(segmenter_defaults.max_chars),
            },
            fallback_reply: fc
                .agent
                .fallback_reply
                .unwrap_or_else(|| DEFAULT_FALLBACK_REPLY.to_string()),
            ..PipelineConfig::default()
        };

        let retry = RetryPolicy::new(
            fc.pipeline.synthesis_attempts.unwrap_or(2),
            Duration::from_millis(fc.pipeline.synthesis_retry_delay_ms.unwrap_or(1000)),
        );

        let config = Self {
            agent,
            voice,
            pipeline,
            retry,
            api_keys,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let seg = self.pipeline.segmenter;
        if seg.min_chars >= seg.max_chars {
            return Err(Error::Config(format!(
                "min_segment_chars ({}) must be below max_segment_chars ({})",
                seg.min_chars, seg.max_chars
            )));
        }
        if self.pipeline.dequeue_timeout.is_zero() {
            return Err(Error::Config(
                "dequeue_timeout_secs must be positive".to_string(),
            ));
        }
        if self.voice.record_duration.is_zero() {
            return Err(Error::Config("record_secs must be positive".to_string()));
        }
        Ok(())
    }

    /// Key for the configured TTS provider
    #[must_use]
    pub fn tts_api_key(&self) -> Option<&str> {
        match self.voice.tts_provider {
            TtsProvider::OpenAI => self.api_keys.openai.as_deref(),
            TtsProvider::ElevenLabs => self.api_keys.elevenlabs.as_deref(),
        }
    }
}
