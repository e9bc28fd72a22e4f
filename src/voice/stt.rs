//! Speech-to-text (STT) processing

use std::path::Path;

use async_trait::async_trait;

use super::{PcmBuffer, SAMPLE_RATE};
use crate::{Error, Result};

/// Frames fed to the recognizer per call
pub const CHUNK_FRAMES: usize = 4000;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// A streaming speech recognizer fed 16 kHz mono 16-bit chunks
#[async_trait]
pub trait Recognizer: Send {
    /// Feed one chunk of samples
    ///
    /// Returns true when an utterance has closed and [`Recognizer::result`]
    /// holds its text.
    ///
    /// # Errors
    ///
    /// Returns error if the recognizer fails
    async fn accept_waveform(&mut self, chunk: &[i16]) -> Result<bool>;

    /// Text of the utterance that just closed
    fn result(&mut self) -> String;

    /// Text of whatever audio has not yet been returned
    ///
    /// # Errors
    ///
    /// Returns error if the recognizer fails
    async fn final_result(&mut self) -> Result<String>;

    /// Drop any partial state before a new recording
    fn reset(&mut self);
}

/// Turns recorded WAV files into text
pub struct SpeechTranscriber {
    recognizer: Box<dyn Recognizer>,
}

impl SpeechTranscriber {
    #[must_use]
    pub fn new(recognizer: Box<dyn Recognizer>) -> Self {
        Self { recognizer }
    }

    /// Transcribe a 16 kHz mono 16-bit WAV file
    ///
    /// Returns an empty string when nothing was recognized.
    ///
    /// # Errors
    ///
    /// Returns error if the file is not 16 kHz mono 16-bit PCM or the
    /// recognizer fails
    pub async fn transcribe(&mut self, wav: &Path) -> Result<String> {
        let mut reader = hound::WavReader::open(wav)?;
        let spec = reader.spec();

        if spec.channels != 1
            || spec.bits_per_sample != 16
            || spec.sample_format != hound::SampleFormat::Int
        {
            return Err(Error::Stt(
                "audio file must be WAV format mono PCM".to_string(),
            ));
        }
        if spec.sample_rate != SAMPLE_RATE {
            return Err(Error::Stt(format!(
                "expected {SAMPLE_RATE} Hz audio, got {}",
                spec.sample_rate
            )));
        }

        let samples = reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()?;

        tracing::debug!(
            path = %wav.display(),
            samples = samples.len(),
            "starting transcription"
        );
        self.transcribe_samples(&samples).await
    }

    /// Transcribe a buffer that was never staged to disk
    ///
    /// # Errors
    ///
    /// Returns error if the recognizer fails
    pub async fn transcribe_pcm(&mut self, pcm: &PcmBuffer) -> Result<String> {
        if pcm.sample_rate() != SAMPLE_RATE {
            return Err(Error::Stt(format!(
                "expected {SAMPLE_RATE} Hz audio, got {}",
                pcm.sample_rate()
            )));
        }
        self.transcribe_samples(pcm.samples()).await
    }

    async fn transcribe_samples(&mut self, samples: &[i16]) -> Result<String> {
        self.recognizer.reset();

        let mut pieces = Vec::new();
        for chunk in samples.chunks(CHUNK_FRAMES) {
            if self.recognizer.accept_waveform(chunk).await? {
                pieces.push(self.recognizer.result());
            }
        }
        pieces.push(self.recognizer.final_result().await?);

        let text = join_pieces(&pieces);
        if text.is_empty() {
            tracing::debug!("nothing recognized");
        } else {
            tracing::info!(transcript = %text, "transcription complete");
        }
        Ok(text)
    }
}

/// Join non-empty pieces with single spaces
fn join_pieces(pieces: &[String]) -> String {
    pieces
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Response from OpenAI Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Recognizer backed by the Whisper transcription API
///
/// Whisper is not incremental, so chunks are buffered and the whole
/// recording is sent when the final result is requested.
pub struct WhisperRecognizer {
    client: reqwest::Client,
    api_key: String,
    model: String,
    language: Option<String>,
    base_url: String,
    pending: Vec<i16>,
}

impl WhisperRecognizer {
    /// Create a Whisper recognizer
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: String, model: String, language: Option<String>) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for Whisper".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            language,
            base_url: OPENAI_BASE_URL.to_string(),
            pending: Vec::new(),
        })
    }

    /// Point the recognizer at a compatible server
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn transcribe_whisper(&self, audio: Vec<u8>) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse response");
            e
        })?;

        Ok(result.text)
    }
}

#[async_trait]
impl Recognizer for WhisperRecognizer {
    async fn accept_waveform(&mut self, chunk: &[i16]) -> Result<bool> {
        self.pending.extend_from_slice(chunk);
        Ok(false)
    }

    fn result(&mut self) -> String {
        String::new()
    }

    async fn final_result(&mut self) -> Result<String> {
        if self.pending.is_empty() {
            return Ok(String::new());
        }

        let pcm = PcmBuffer::new(std::mem::take(&mut self.pending), SAMPLE_RATE);
        self.transcribe_whisper(pcm.to_wav()?).await
    }

    fn reset(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_non_empty_pieces_with_spaces() {
        let pieces = vec![
            "hello".to_string(),
            String::new(),
            "  world ".to_string(),
            " ".to_string(),
        ];
        assert_eq!(join_pieces(&pieces), "hello world");
        assert_eq!(join_pieces(&[]), "");
    }

    #[test]
    fn whisper_requires_api_key() {
        let result = WhisperRecognizer::new(String::new(), "whisper-1".into(), None);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn whisper_buffers_until_final() {
        let mut recognizer =
            WhisperRecognizer::new("key".into(), "whisper-1".into(), None).unwrap();

        assert!(!recognizer.accept_waveform(&[1, 2, 3]).await.unwrap());
        assert_eq!(recognizer.pending.len(), 3);

        recognizer.reset();
        assert!(recognizer.pending.is_empty());
        assert_eq!(recognizer.final_result().await.unwrap(), "");
    }
}
