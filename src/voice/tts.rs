//! Text-to-speech (TTS) processing

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::{AudioClip, RetryPolicy};
use crate::pipeline::Sentence;
use crate::{Error, Result};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ELEVENLABS_BASE_URL: &str = "https://api.elevenlabs.io/v1";

/// Voice and prosody settings applied to every sentence of a turn
///
/// Adjustments are relative: `rate` and `volume` in percent, `pitch` in Hz.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceParams {
    pub voice: String,
    pub rate: i32,
    pub pitch: i32,
    pub volume: i32,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            voice: "alloy".to_string(),
            rate: 0,
            pitch: 0,
            volume: 0,
        }
    }
}

impl VoiceParams {
    /// Speaking speed multiplier, clamped to the range speech APIs accept
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn speed(&self) -> f32 {
        (1.0 + self.rate as f32 / 100.0).clamp(0.25, 4.0)
    }

    /// Linear playback gain
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn gain(&self) -> f32 {
        (1.0 + self.volume as f32 / 100.0).max(0.0)
    }
}

/// One sentence with the settings to speak it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisJob {
    pub sentence: Sentence,
    pub params: VoiceParams,
}

impl SynthesisJob {
    /// Text handed to the backend
    #[must_use]
    pub fn text(&self) -> &str {
        self.sentence.speakable()
    }
}

/// A service that turns text into encoded audio
#[async_trait]
pub trait SynthesisBackend: Send + Sync {
    /// Synthesize one job, returning encoded audio bytes
    ///
    /// # Errors
    ///
    /// Returns error if the request fails
    async fn synthesize(&self, job: &SynthesisJob) -> Result<Vec<u8>>;
}

/// TTS provider backend
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsProvider {
    #[default]
    OpenAI,
    ElevenLabs,
}

impl std::str::FromStr for TtsProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "elevenlabs" => Ok(Self::ElevenLabs),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }
}

/// Synthesizes speech through a hosted HTTP API
pub struct HttpSynthesizer {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    provider: TtsProvider,
}

impl HttpSynthesizer {
    /// Create a synthesizer for `provider`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(provider: TtsProvider, api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            let name = match provider {
                TtsProvider::OpenAI => "OpenAI",
                TtsProvider::ElevenLabs => "ElevenLabs",
            };
            return Err(Error::Config(format!("{name} API key required for TTS")));
        }

        let base_url = match provider {
            TtsProvider::OpenAI => OPENAI_BASE_URL,
            TtsProvider::ElevenLabs => ELEVENLABS_BASE_URL,
        };

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            base_url: base_url.to_string(),
            provider,
        })
    }

    /// Point the synthesizer at a compatible server
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Synthesize using `OpenAI` TTS
    async fn synthesize_openai(&self, job: &SynthesisJob) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let request = TtsRequest {
            model: &self.model,
            input: job.text(),
            voice: &job.params.voice,
            speed: job.params.speed(),
        };

        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }

    /// Synthesize using ElevenLabs TTS
    ///
    /// The voice id comes from the job; speed and pitch are not supported.
    async fn synthesize_elevenlabs(&self, job: &SynthesisJob) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let url = format!("{}/text-to-speech/{}", self.base_url, job.params.voice);

        let request = ElevenLabsRequest {
            text: job.text(),
            model_id: &self.model,
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("ElevenLabs TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }
}

#[async_trait]
impl SynthesisBackend for HttpSynthesizer {
    async fn synthesize(&self, job: &SynthesisJob) -> Result<Vec<u8>> {
        match self.provider {
            TtsProvider::OpenAI => self.synthesize_openai(job).await,
            TtsProvider::ElevenLabs => self.synthesize_elevenlabs(job).await,
        }
    }
}

/// Wraps a backend with the retry policy
///
/// Never fails: once every attempt is used up it returns an empty clip, which
/// playback treats as "skip this sentence".
#[derive(Clone)]
pub struct SpeechSynthesizer {
    backend: Arc<dyn SynthesisBackend>,
    policy: RetryPolicy,
}

impl SpeechSynthesizer {
    #[must_use]
    pub fn new(backend: Arc<dyn SynthesisBackend>, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Synthesize a sentence, retrying on failure
    pub async fn synthesize(&self, sentence: &Sentence, params: &VoiceParams) -> AudioClip {
        let job = SynthesisJob {
            sentence: sentence.clone(),
            params: params.clone(),
        };

        let mut attempt = 1;
        loop {
            match self.backend.synthesize(&job).await {
                Ok(bytes) if !bytes.is_empty() => {
                    tracing::debug!(attempt, bytes = bytes.len(), "sentence synthesized");
                    return AudioClip::new(bytes);
                }
                Ok(_) => {
                    tracing::warn!(attempt, sentence = %job.text(), "synthesis returned no audio");
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, sentence = %job.text(), "synthesis failed");
                }
            }

            if !self.policy.allows_retry_after(attempt) {
                tracing::error!(
                    attempts = attempt,
                    sentence = %job.text(),
                    "giving up on sentence"
                );
                return AudioClip::empty();
            }

            tokio::time::sleep(self.policy.delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;

    /// Fails a fixed number of times, then returns audio
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl SynthesisBackend for Flaky {
        async fn synthesize(&self, _job: &SynthesisJob) -> Result<Vec<u8>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(Error::Tts("unavailable".into()))
            } else {
                Ok(vec![1, 2, 3])
            }
        }
    }

    struct Silent;

    #[async_trait]
    impl SynthesisBackend for Silent {
        async fn synthesize(&self, _job: &SynthesisJob) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    fn sentence() -> Sentence {
        Sentence::new("你好。").unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn retries_once_then_succeeds() {
        let backend = Arc::new(Flaky {
            failures: 1,
            calls: AtomicU32::new(0),
        });
        let synth = SpeechSynthesizer::new(backend.clone(), RetryPolicy::default());

        let started = tokio::time::Instant::now();
        let clip = synth.synthesize(&sentence(), &VoiceParams::default()).await;

        assert_eq!(clip.data(), &[1, 2, 3]);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_attempts_yield_empty_clip() {
        let backend = Arc::new(Flaky {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let synth = SpeechSynthesizer::new(backend.clone(), RetryPolicy::default());

        let clip = synth.synthesize(&sentence(), &VoiceParams::default()).await;

        assert!(clip.is_empty());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_audio_counts_as_failure() {
        let synth = SpeechSynthesizer::new(Arc::new(Silent), RetryPolicy::default());
        let clip = synth.synthesize(&sentence(), &VoiceParams::default()).await;
        assert!(clip.is_empty());
    }

    #[test]
    fn prosody_maps_to_speed_and_gain() {
        let params = VoiceParams {
            rate: 50,
            volume: -50,
            ..VoiceParams::default()
        };
        assert!((params.speed() - 1.5).abs() < f32::EPSILON);
        assert!((params.gain() - 0.5).abs() < f32::EPSILON);

        let extreme = VoiceParams {
            rate: -100,
            volume: -200,
            ..VoiceParams::default()
        };
        assert!((extreme.speed() - 0.25).abs() < f32::EPSILON);
        assert!(extreme.gain().abs() < f32::EPSILON);
    }

    #[test]
    fn provider_parses_case_insensitively() {
        assert_eq!("OpenAI".parse::<TtsProvider>().unwrap(), TtsProvider::OpenAI);
        assert_eq!(
            "elevenlabs".parse::<TtsProvider>().unwrap(),
            TtsProvider::ElevenLabs
        );
        assert!("festival".parse::<TtsProvider>().is_err());
    }

    #[test]
    fn missing_key_is_a_config_error() {
        let result = HttpSynthesizer::new(TtsProvider::OpenAI, String::new(), "tts-1".into());
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
