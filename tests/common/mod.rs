//! Shared test doubles for the agent, synthesis and audio seams

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, stream};

use cadence::agent::{TurnChunk, TurnSource, TurnStream};
use cadence::pipeline::Sentence;
use cadence::voice::{
    AudioClip, ClipPlayer, Microphone, PcmBuffer, Recognizer, SynthesisBackend, SynthesisJob,
    VoiceParams,
};
use cadence::{Error, Result};

/// One scripted step of an agent reply
#[derive(Debug, Clone)]
pub enum Step {
    /// Wait, then yield a delta
    Delta(Duration, String),
    /// Wait, then yield a snapshot of the full reply so far
    Snapshot(Duration, String),
    /// Wait, then fail the stream
    Fail(Duration, String),
}

impl Step {
    pub fn delta(text: &str) -> Self {
        Self::Delta(Duration::ZERO, text.to_string())
    }

    pub fn delta_after(delay: Duration, text: &str) -> Self {
        Self::Delta(delay, text.to_string())
    }
}

/// Replays the same scripted reply for every turn
#[derive(Default)]
pub struct ScriptedSource {
    steps: Vec<Step>,
    refuse: bool,
    turns: Mutex<Vec<(String, String)>>,
}

impl ScriptedSource {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            ..Self::default()
        }
    }

    /// A source whose turns fail to start at all
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    /// `(conversation_id, user_text)` of every turn started
    pub fn turns(&self) -> Vec<(String, String)> {
        self.turns.lock().unwrap().clone()
    }
}

#[async_trait]
impl TurnSource for ScriptedSource {
    async fn stream_turn(&self, conversation_id: &str, user_text: &str) -> Result<TurnStream> {
        self.turns
            .lock()
            .unwrap()
            .push((conversation_id.to_string(), user_text.to_string()));

        if self.refuse {
            return Err(Error::Agent("connection refused".to_string()));
        }

        let stream = stream::iter(self.steps.clone()).then(|step| async move {
            match step {
                Step::Delta(delay, text) => {
                    tokio::time::sleep(delay).await;
                    Ok(TurnChunk::Delta(text))
                }
                Step::Snapshot(delay, text) => {
                    tokio::time::sleep(delay).await;
                    Ok(TurnChunk::Snapshot(text))
                }
                Step::Fail(delay, message) => {
                    tokio::time::sleep(delay).await;
                    Err(Error::Stream(message))
                }
            }
        });

        Ok(stream.boxed())
    }
}

/// Synthesis backend that "encodes" text as its UTF-8 bytes
///
/// Latency and failures are configured per sentence text.
#[derive(Default)]
pub struct ScriptedBackend {
    latency: HashMap<String, Duration>,
    always_fail: Vec<String>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_latency(mut self, text: &str, latency: Duration) -> Self {
        self.latency.insert(text.to_string(), latency);
        self
    }

    #[must_use]
    pub fn failing_on(mut self, text: &str) -> Self {
        self.always_fail.push(text.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SynthesisBackend for ScriptedBackend {
    async fn synthesize(&self, job: &SynthesisJob) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(latency) = self.latency.get(job.text()) {
            tokio::time::sleep(*latency).await;
        }
        if self.always_fail.iter().any(|t| t == job.text()) {
            return Err(Error::Tts("synthesis unavailable".to_string()));
        }
        Ok(job.text().as_bytes().to_vec())
    }
}

/// Records the text and gain of every clip it is asked to play
#[derive(Clone, Default)]
pub struct RecordingPlayer {
    played: Arc<Mutex<Vec<String>>>,
    gains: Arc<Mutex<Vec<f32>>>,
    device_fails_after: Option<usize>,
}

impl RecordingPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with a device error once `plays` clips have been played
    pub fn device_fails_after(plays: usize) -> Self {
        Self {
            device_fails_after: Some(plays),
            ..Self::default()
        }
    }

    pub fn played(&self) -> Vec<String> {
        self.played.lock().unwrap().clone()
    }

    pub fn gains(&self) -> Vec<f32> {
        self.gains.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClipPlayer for RecordingPlayer {
    async fn play(&mut self, clip: &AudioClip, params: &VoiceParams) -> Result<()> {
        let mut played = self.played.lock().unwrap();
        if self.device_fails_after.is_some_and(|n| played.len() >= n) {
            return Err(Error::Device("output stream closed".to_string()));
        }
        played.push(String::from_utf8_lossy(clip.data()).into_owned());
        self.gains.lock().unwrap().push(params.gain());
        Ok(())
    }
}

/// Recognizer that closes an utterance every `every` chunks
pub struct ScriptedRecognizer {
    every: usize,
    utterances: Vec<String>,
    tail: String,
    chunk_sizes: Arc<Mutex<Vec<usize>>>,
    resets: Arc<AtomicUsize>,
    fed: usize,
    closed: usize,
}

impl ScriptedRecognizer {
    pub fn new(every: usize, utterances: &[&str], tail: &str) -> Self {
        Self {
            every,
            utterances: utterances.iter().map(ToString::to_string).collect(),
            tail: tail.to_string(),
            chunk_sizes: Arc::default(),
            resets: Arc::default(),
            fed: 0,
            closed: 0,
        }
    }

    /// Sizes of every chunk fed so far
    pub fn chunk_sizes(&self) -> Arc<Mutex<Vec<usize>>> {
        Arc::clone(&self.chunk_sizes)
    }

    pub fn resets(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.resets)
    }
}

#[async_trait]
impl Recognizer for ScriptedRecognizer {
    async fn accept_waveform(&mut self, chunk: &[i16]) -> Result<bool> {
        self.chunk_sizes.lock().unwrap().push(chunk.len());
        self.fed += 1;
        Ok(self.fed % self.every == 0 && self.closed < self.utterances.len())
    }

    fn result(&mut self) -> String {
        let text = self.utterances[self.closed].clone();
        self.closed += 1;
        text
    }

    async fn final_result(&mut self) -> Result<String> {
        Ok(self.tail.clone())
    }

    fn reset(&mut self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
        self.fed = 0;
        self.closed = 0;
    }
}

/// Microphone that returns the same buffer every time
pub struct FixedMicrophone {
    pcm: PcmBuffer,
    captures: Arc<AtomicUsize>,
}

impl FixedMicrophone {
    pub fn new(pcm: PcmBuffer) -> Self {
        Self {
            pcm,
            captures: Arc::default(),
        }
    }

    pub fn captures(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.captures)
    }
}

#[async_trait]
impl Microphone for FixedMicrophone {
    async fn capture(&mut self, _max_duration: Duration) -> Result<PcmBuffer> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        Ok(self.pcm.clone())
    }
}

/// Texts of sentences, for comparisons
pub fn texts(sentences: &[Sentence]) -> Vec<String> {
    sentences.iter().map(|s| s.as_str().to_string()).collect()
}
