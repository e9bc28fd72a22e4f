//! Producer/consumer coordination for one streamed turn

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{
    DeltaTracker, Dequeue, PipelineConfig, PipelineState, SegmenterConfig, Sentence,
    SentenceSegmenter, SentenceSender, StopSignal, synthesis_queue,
};
use crate::agent::TurnStream;
use crate::voice::{ClipPlayer, SpeechSynthesizer, VoiceParams};

/// What happened during one turn
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnReport {
    /// Full reply text, or the fallback reply if the stream failed
    pub reply: String,
    pub sentences_enqueued: usize,
    /// Sentences that were played (or delivered, for text turns)
    pub sentences_played: usize,
    /// Sentences skipped because synthesis produced no audio
    pub synthesis_failures: usize,
    /// Clips that could not be decoded
    pub playback_failures: usize,
    /// Dequeue timeouts while the producer was still running
    pub stalls: u32,
    pub cancelled: bool,
    pub stream_failed: bool,
    /// Set when the output device failed and the turn was abandoned
    pub device_error: Option<String>,
}

/// Where dequeued sentences go
enum Sink<'a> {
    Speech {
        synthesizer: &'a SpeechSynthesizer,
        params: &'a VoiceParams,
        player: &'a mut dyn ClipPlayer,
    },
    Text(&'a mut (dyn FnMut(&Sentence) + Send)),
}

/// Runs one turn: a producer task segments the reply stream while the
/// caller's task synthesizes and plays sentences in order
pub struct StreamOrchestrator {
    config: PipelineConfig,
    stop: StopSignal,
    state: Arc<watch::Sender<PipelineState>>,
}

impl StreamOrchestrator {
    /// Create an orchestrator for one turn
    ///
    /// The turn stops when `stop` (or any of its ancestors) is raised.
    #[must_use]
    pub fn new(config: PipelineConfig, stop: &StopSignal) -> Self {
        let (state, _) = watch::channel(PipelineState::Producing);
        Self {
            config,
            stop: stop.child(),
            state: Arc::new(state),
        }
    }

    /// Watch the pipeline state
    #[must_use]
    pub fn state(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    /// Stop signal local to this turn
    #[must_use]
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Speak the reply as it streams in
    pub async fn run(
        self,
        turn: TurnStream,
        synthesizer: &SpeechSynthesizer,
        params: &VoiceParams,
        player: &mut dyn ClipPlayer,
    ) -> TurnReport {
        let sink = Sink::Speech {
            synthesizer,
            params,
            player,
        };
        self.drive(turn, sink).await
    }

    /// Hand each sentence to `on_sentence` as soon as it is segmented
    pub async fn run_text(
        self,
        turn: TurnStream,
        mut on_sentence: impl FnMut(&Sentence) + Send,
    ) -> TurnReport {
        self.drive(turn, Sink::Text(&mut on_sentence)).await
    }

    async fn drive(self, turn: TurnStream, mut sink: Sink<'_>) -> TurnReport {
        let (tx, mut rx) = synthesis_queue();
        self.state.send_replace(PipelineState::Producing);

        let producer: JoinHandle<ProducerOutcome> = tokio::spawn(produce(
            turn,
            tx,
            self.config.segmenter,
            self.config.fallback_reply.clone(),
            self.stop.clone(),
            Arc::clone(&self.state),
        ));

        let started = Instant::now();
        let mut report = TurnReport::default();
        let mut dequeued = String::new();
        let mut dequeued_count = 0;
        let mut stalls_in_row = 0;

        loop {
            if self.stop.is_raised() {
                report.cancelled = true;
                break;
            }

            match rx.pop(self.config.dequeue_timeout).await {
                Dequeue::Item(sentence) => {
                    stalls_in_row = 0;
                    dequeued_count += 1;
                    dequeued.push_str(sentence.as_str());

                    if self.stop.is_raised() {
                        report.cancelled = true;
                        break;
                    }

                    match &mut sink {
                        Sink::Text(on_sentence) => {
                            (*on_sentence)(&sentence);
                            report.sentences_played += 1;
                        }
                        Sink::Speech {
                            synthesizer,
                            params,
                            player,
                        } => {
                            let clip = synthesizer.synthesize(&sentence, params).await;
                            if clip.is_empty() {
                                tracing::warn!(sentence = %sentence, "skipping sentence without audio");
                                report.synthesis_failures += 1;
                                continue;
                            }

                            match player.play(&clip, params).await {
                                Ok(()) => report.sentences_played += 1,
                                Err(e) if e.is_device() => {
                                    tracing::error!(error = %e, "output device failed, abandoning turn");
                                    report.device_error = Some(e.to_string());
                                    self.stop.raise();
                                    break;
                                }
                                Err(e) => {
                                    tracing::warn!(error = %e, sentence = %sentence, "could not play clip");
                                    report.playback_failures += 1;
                                }
                            }
                        }
                    }
                }
                Dequeue::Closed => break,
                Dequeue::Timeout => {
                    // A finished producer has dropped its sender, so the next
                    // pop drains what is left and then reports Closed
                    if producer.is_finished() {
                        continue;
                    }

                    report.stalls += 1;
                    stalls_in_row += 1;
                    if stalls_in_row >= self.config.stall_warn_after {
                        tracing::warn!(
                            stalls = stalls_in_row,
                            elapsed_secs = started.elapsed().as_secs(),
                            "reply stream stalled"
                        );
                    } else {
                        tracing::debug!(stalls = stalls_in_row, "waiting on reply stream");
                    }
                }
            }
        }

        if report.cancelled || report.device_error.is_some() {
            producer.abort();
        }

        match producer.await {
            Ok(outcome) => {
                report.reply = outcome.reply;
                report.sentences_enqueued = outcome.sentences_enqueued;
                report.stream_failed = outcome.stream_failed;
                report.cancelled |= outcome.cancelled;
            }
            Err(e) => {
                if !e.is_cancelled() {
                    tracing::error!(error = %e, "producer task failed");
                }
                report.reply = dequeued;
                report.sentences_enqueued = dequeued_count + rx.len();
            }
        }

        self.state.send_replace(PipelineState::Done);
        tracing::debug!(
            enqueued = report.sentences_enqueued,
            played = report.sentences_played,
            failures = report.synthesis_failures,
            stalls = report.stalls,
            cancelled = report.cancelled,
            elapsed_ms = started.elapsed().as_millis(),
            "turn finished"
        );

        report
    }
}

struct ProducerOutcome {
    reply: String,
    sentences_enqueued: usize,
    stream_failed: bool,
    cancelled: bool,
}

/// Read the reply stream, segment it and queue sentences
///
/// Dropping `tx` on return closes the queue.
async fn produce(
    mut turn: TurnStream,
    tx: SentenceSender,
    segmenter: SegmenterConfig,
    fallback_reply: String,
    stop: StopSignal,
    state: Arc<watch::Sender<PipelineState>>,
) -> ProducerOutcome {
    let mut tracker = DeltaTracker::new();
    let mut segmenter = SentenceSegmenter::new(segmenter);
    let mut enqueued = 0;
    let mut stream_failed = false;
    let mut cancelled = false;

    let mut enqueue = |sentence: Sentence| {
        tracing::debug!(sentence = %sentence, "sentence queued");
        if tx.push(sentence) {
            enqueued += 1;
        }
    };

    loop {
        if stop.is_raised() {
            cancelled = true;
            break;
        }

        let Some(item) = turn.next().await else {
            break;
        };

        match item {
            Ok(chunk) => {
                let Some(delta) = tracker.observe(chunk) else {
                    continue;
                };
                for sentence in segmenter.accumulate(&delta) {
                    enqueue(sentence);
                }
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    received_chars = tracker.text().chars().count(),
                    "reply stream failed"
                );
                stream_failed = true;
                break;
            }
        }
    }

    let reply = if stream_failed {
        let dropped = segmenter.discard();
        tracing::debug!(dropped = %dropped, "speaking fallback reply");
        if let Some(sentence) = Sentence::new(fallback_reply.trim()) {
            enqueue(sentence);
        }
        fallback_reply
    } else if cancelled {
        segmenter.discard();
        tracker.into_text()
    } else {
        if let Some(sentence) = segmenter.flush() {
            enqueue(sentence);
        }
        tracker.into_text()
    };

    state.send_replace(PipelineState::Draining);

    ProducerOutcome {
        reply,
        sentences_enqueued: enqueued,
        stream_failed,
        cancelled,
    }
}
