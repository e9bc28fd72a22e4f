//! The voice assistant loop
//!
//! Each turn records an utterance, transcribes it, streams the agent's reply
//! through the pipeline and speaks it. Failures end the turn, never the loop.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream;
use tokio::sync::watch;

use crate::agent::{ChatCompletionsSource, TurnSource, TurnStream};
use crate::config::Config;
use crate::pipeline::{PipelineConfig, Sentence, StopSignal, StreamOrchestrator, TurnReport};
use crate::voice::{
    AudioCapture, AudioPlayback, ClipPlayer, HttpSynthesizer, Microphone, SpeechSynthesizer,
    SpeechTranscriber, VoiceParams, WhisperRecognizer,
};
use crate::{Error, Result};

/// Pause after a failed turn before listening again
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Where the assistant is in its loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssistantState {
    Idle,
    Listening,
    Streaming,
    Done,
}

/// Which audio devices to open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceIo {
    /// No audio at all
    TextOnly,
    /// Speak replies but take typed input
    Speak,
    /// Record and speak
    Converse,
}

impl VoiceIo {
    const fn speaks(self) -> bool {
        matches!(self, Self::Speak | Self::Converse)
    }

    const fn listens(self) -> bool {
        matches!(self, Self::Converse)
    }
}

struct SpeechOutput {
    synthesizer: SpeechSynthesizer,
    player: Box<dyn ClipPlayer>,
}

struct SpeechInput {
    microphone: Box<dyn Microphone>,
    transcriber: SpeechTranscriber,
}

/// Voice front end for one conversation
pub struct Assistant {
    source: Arc<dyn TurnSource>,
    params: VoiceParams,
    pipeline: PipelineConfig,
    conversation_id: String,
    record_duration: Duration,
    output: Option<SpeechOutput>,
    input: Option<SpeechInput>,
    stop: StopSignal,
    state: watch::Sender<AssistantState>,
}

impl Assistant {
    /// Create a text-only assistant over `source`
    #[must_use]
    pub fn new(source: Arc<dyn TurnSource>) -> Self {
        let (state, _) = watch::channel(AssistantState::Idle);
        Self {
            source,
            params: VoiceParams::default(),
            pipeline: PipelineConfig::default(),
            conversation_id: uuid::Uuid::new_v4().to_string(),
            record_duration: Duration::from_secs(15),
            output: None,
            input: None,
            stop: StopSignal::new(),
            state,
        }
    }

    /// Build an assistant from configuration, opening the requested devices
    ///
    /// # Errors
    ///
    /// Returns error if a required API key is missing or a device cannot be
    /// opened
    pub fn from_config(config: &Config, io: VoiceIo) -> Result<Self> {
        let source = Arc::new(ChatCompletionsSource::new(&config.agent)?);

        let mut assistant = Self::new(source)
            .with_params(config.voice.params.clone())
            .with_pipeline(config.pipeline.clone())
            .with_conversation_id(config.agent.conversation_id.clone())
            .with_record_duration(config.voice.record_duration);

        if io.speaks() {
            let mut backend = HttpSynthesizer::new(
                config.voice.tts_provider,
                config.tts_api_key().unwrap_or_default().to_string(),
                config.voice.tts_model.clone(),
            )?;
            if let Some(url) = &config.voice.tts_base_url {
                backend = backend.with_base_url(url.clone());
            }

            let player = AudioPlayback::new()?;
            assistant = assistant.with_output(
                SpeechSynthesizer::new(Arc::new(backend), config.retry),
                Box::new(player),
            );
        }

        if io.listens() {
            let mut recognizer = WhisperRecognizer::new(
                config.api_keys.openai.clone().unwrap_or_default(),
                config.voice.stt_model.clone(),
                config.voice.stt_language.clone(),
            )?;
            if let Some(url) = &config.voice.stt_base_url {
                recognizer = recognizer.with_base_url(url.clone());
            }

            let microphone = AudioCapture::new(config.voice.input_device.clone())?;
            assistant = assistant.with_input(
                Box::new(microphone),
                SpeechTranscriber::new(Box::new(recognizer)),
            );
        }

        tracing::info!(
            conversation_id = %assistant.conversation_id,
            speaks = io.speaks(),
            listens = io.listens(),
            "assistant ready"
        );
        Ok(assistant)
    }

    #[must_use]
    pub fn with_output(mut self, synthesizer: SpeechSynthesizer, player: Box<dyn ClipPlayer>) -> Self {
        self.output = Some(SpeechOutput {
            synthesizer,
            player,
        });
        self
    }

    #[must_use]
    pub fn with_input(mut self, microphone: Box<dyn Microphone>, transcriber: SpeechTranscriber) -> Self {
        self.input = Some(SpeechInput {
            microphone,
            transcriber,
        });
        self
    }

    #[must_use]
    pub fn with_params(mut self, params: VoiceParams) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    #[must_use]
    pub fn with_conversation_id(mut self, conversation_id: String) -> Self {
        self.conversation_id = conversation_id;
        self
    }

    #[must_use]
    pub const fn with_record_duration(mut self, record_duration: Duration) -> Self {
        self.record_duration = record_duration;
        self
    }

    /// Share a stop signal, e.g. one raised by Ctrl-C
    #[must_use]
    pub fn with_stop(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    #[must_use]
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    #[must_use]
    pub fn state(&self) -> watch::Receiver<AssistantState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Listen and answer until the stop signal is raised
    ///
    /// # Errors
    ///
    /// Returns error if no microphone or speaker is configured
    pub async fn run(&mut self) -> Result<()> {
        if self.input.is_none() || self.output.is_none() {
            return Err(Error::Config(
                "voice loop needs both a microphone and a speaker".to_string(),
            ));
        }

        tracing::info!(
            record_secs = self.record_duration.as_secs(),
            "listening; press Ctrl-C to stop"
        );

        while !self.stop.is_raised() {
            match self.listen_once().await {
                Ok(Some(report)) => {
                    if let Some(error) = &report.device_error {
                        tracing::error!(error = %error, "turn abandoned");
                        tokio::time::sleep(ERROR_BACKOFF).await;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(error = %e, "turn failed");
                    self.state.send_replace(AssistantState::Idle);
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            }
        }

        self.state.send_replace(AssistantState::Idle);
        tracing::info!("voice loop stopped");
        Ok(())
    }

    /// Record one utterance and answer it aloud
    ///
    /// Returns `None` when nothing was recognized.
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if recording fails and `Error::Config` if no
    /// microphone is configured
    pub async fn listen_once(&mut self) -> Result<Option<TurnReport>> {
        let input = self
            .input
            .as_mut()
            .ok_or_else(|| Error::Config("no microphone configured".to_string()))?;

        self.state.send_replace(AssistantState::Listening);
        let pcm = input.microphone.capture(self.record_duration).await?;
        let staged = pcm.stage()?;
        let text = input.transcriber.transcribe(staged.path()).await?;
        drop(staged);

        if text.is_empty() {
            tracing::warn!("no speech recognized");
            self.state.send_replace(AssistantState::Idle);
            return Ok(None);
        }

        tracing::info!(user = %text, "heard");
        self.chat(&text).await.map(Some)
    }

    /// Answer typed or transcribed text aloud
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if no speaker is configured
    pub async fn chat(&mut self, text: &str) -> Result<TurnReport> {
        if self.output.is_none() {
            return Err(Error::Config("no speaker configured".to_string()));
        }

        let turn = self.open_turn(text).await;
        let orchestrator = StreamOrchestrator::new(self.pipeline.clone(), &self.stop);

        self.state.send_replace(AssistantState::Streaming);
        let report = match self.output.as_mut() {
            Some(output) => {
                orchestrator
                    .run(
                        turn,
                        &output.synthesizer,
                        &self.params,
                        output.player.as_mut(),
                    )
                    .await
            }
            None => TurnReport::default(),
        };
        self.finish(&report);

        Ok(report)
    }

    /// Answer text without audio, handing each sentence to `on_sentence`
    pub async fn chat_text(
        &self,
        text: &str,
        on_sentence: impl FnMut(&Sentence) + Send,
    ) -> TurnReport {
        let turn = self.open_turn(text).await;
        let orchestrator = StreamOrchestrator::new(self.pipeline.clone(), &self.stop);

        self.state.send_replace(AssistantState::Streaming);
        let report = orchestrator.run_text(turn, on_sentence).await;
        self.finish(&report);

        report
    }

    /// Start a turn; a refused request becomes a stream that fails at once so
    /// the fallback reply is still spoken
    async fn open_turn(&self, text: &str) -> TurnStream {
        match self.source.stream_turn(&self.conversation_id, text).await {
            Ok(turn) => turn,
            Err(e) => {
                tracing::error!(error = %e, "could not start turn");
                stream::iter(vec![Err(e)]).boxed()
            }
        }
    }

    fn finish(&self, report: &TurnReport) {
        self.state.send_replace(AssistantState::Done);
        tracing::info!(
            reply = %report.reply,
            played = report.sentences_played,
            skipped = report.synthesis_failures,
            stalls = report.stalls,
            cancelled = report.cancelled,
            "turn complete"
        );
    }
}
