//! Streaming pipeline integration tests
//!
//! Agent, synthesis and playback are replaced by scripted doubles; time is
//! driven by tokio's paused clock.

use std::sync::Arc;
use std::time::Duration;

use cadence::agent::TurnSource;
use cadence::pipeline::{DEFAULT_FALLBACK_REPLY, PipelineConfig, PipelineState, StopSignal};
use cadence::voice::{RetryPolicy, SpeechSynthesizer, SynthesisBackend, VoiceParams};
use cadence::{Assistant, AssistantState, StreamOrchestrator, TurnReport};

mod common;

use common::{RecordingPlayer, ScriptedBackend, ScriptedSource, Step};

const FIRST: &str = "今天天气非常好，适合出去走走！";
const SECOND: &str = "我们可以去公园看看花开了没有。";
const THIRD: &str = "记得带上水和一把伞哦。";

fn three_sentences() -> Vec<Step> {
    vec![Step::delta(FIRST), Step::delta(SECOND), Step::delta(THIRD)]
}

async fn speak(
    source: &ScriptedSource,
    backend: ScriptedBackend,
    player: &mut RecordingPlayer,
    stop: &StopSignal,
) -> (TurnReport, Arc<ScriptedBackend>) {
    let backend = Arc::new(backend);
    let synthesizer = SpeechSynthesizer::new(
        Arc::clone(&backend) as Arc<dyn SynthesisBackend>,
        RetryPolicy::default(),
    );
    let turn = source.stream_turn("conv", "hello").await.unwrap();
    let orchestrator = StreamOrchestrator::new(PipelineConfig::default(), stop);

    let report = orchestrator
        .run(turn, &synthesizer, &VoiceParams::default(), player)
        .await;
    (report, backend)
}

#[tokio::test(start_paused = true)]
async fn test_playback_keeps_segmentation_order_under_uneven_latency() {
    let source = ScriptedSource::new(three_sentences());
    let backend = ScriptedBackend::new()
        .with_latency(FIRST, Duration::from_secs(3))
        .with_latency(THIRD, Duration::from_millis(10));
    let mut player = RecordingPlayer::new();

    let (report, _) = speak(&source, backend, &mut player, &StopSignal::new()).await;

    assert_eq!(player.played(), vec![FIRST, SECOND, THIRD]);
    assert_eq!(report.sentences_enqueued, 3);
    assert_eq!(report.sentences_played, 3);
    assert_eq!(report.reply, format!("{FIRST}{SECOND}{THIRD}"));
    assert!(!report.cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_failed_sentence_is_skipped_after_retries() {
    let source = ScriptedSource::new(three_sentences());
    let backend = ScriptedBackend::new().failing_on(SECOND);
    let mut player = RecordingPlayer::new();

    let (report, backend) = speak(&source, backend, &mut player, &StopSignal::new()).await;

    assert_eq!(player.played(), vec![FIRST, THIRD]);
    assert_eq!(report.synthesis_failures, 1);
    assert_eq!(report.sentences_played, 2);
    // one call each for the good sentences, two for the failing one
    assert_eq!(backend.calls(), 4);
}

#[tokio::test]
async fn test_empty_reply_finishes_without_speaking() {
    let source = ScriptedSource::new(Vec::new());
    let mut player = RecordingPlayer::new();

    let (report, backend) = tokio::time::timeout(
        Duration::from_secs(5),
        speak(&source, ScriptedBackend::new(), &mut player, &StopSignal::new()),
    )
    .await
    .expect("empty turn must terminate");

    assert!(player.played().is_empty());
    assert_eq!(report.sentences_enqueued, 0);
    assert_eq!(report.reply, "");
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_whitespace_reply_is_not_spoken() {
    let source = ScriptedSource::new(vec![Step::delta("  \n ")]);
    let mut player = RecordingPlayer::new();

    let (report, _) = speak(
        &source,
        ScriptedBackend::new(),
        &mut player,
        &StopSignal::new(),
    )
    .await;

    assert!(player.played().is_empty());
    assert_eq!(report.sentences_enqueued, 0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_agent_counts_stalls_and_still_finishes() {
    let source = ScriptedSource::new(vec![
        Step::delta(FIRST),
        Step::delta_after(Duration::from_secs(35), THIRD),
    ]);
    let mut player = RecordingPlayer::new();

    let (report, _) = speak(
        &source,
        ScriptedBackend::new(),
        &mut player,
        &StopSignal::new(),
    )
    .await;

    assert_eq!(report.stalls, 2);
    assert_eq!(player.played(), vec![FIRST, THIRD]);
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_chunks_are_spoken_once() {
    let source = ScriptedSource::new(vec![
        Step::Snapshot(Duration::ZERO, FIRST.to_string()),
        Step::Snapshot(Duration::ZERO, format!("{FIRST}{SECOND}")),
        Step::Snapshot(Duration::ZERO, format!("{FIRST}{SECOND}")),
    ]);
    let mut player = RecordingPlayer::new();

    let (report, _) = speak(
        &source,
        ScriptedBackend::new(),
        &mut player,
        &StopSignal::new(),
    )
    .await;

    assert_eq!(player.played(), vec![FIRST, SECOND]);
    assert_eq!(report.sentences_enqueued, 2);
}

#[tokio::test(start_paused = true)]
async fn test_stream_failure_speaks_fallback_and_drops_partial_text() {
    let source = ScriptedSource::new(vec![
        Step::delta(FIRST),
        Step::delta("然后我们"),
        Step::Fail(Duration::from_millis(100), "connection reset".to_string()),
    ]);
    let mut player = RecordingPlayer::new();

    let (report, _) = speak(
        &source,
        ScriptedBackend::new(),
        &mut player,
        &StopSignal::new(),
    )
    .await;

    assert_eq!(player.played(), vec![FIRST, DEFAULT_FALLBACK_REPLY]);
    assert!(report.stream_failed);
    assert_eq!(report.reply, DEFAULT_FALLBACK_REPLY);
}

#[tokio::test(start_paused = true)]
async fn test_stop_signal_cancels_turn_between_sentences() {
    let source = ScriptedSource::new(vec![
        Step::delta(FIRST),
        Step::delta_after(Duration::from_secs(5), SECOND),
        Step::delta_after(Duration::from_secs(5), THIRD),
    ]);
    let backend = ScriptedBackend::new().with_latency(FIRST, Duration::from_secs(1));
    let mut player = RecordingPlayer::new();
    let stop = StopSignal::new();

    let raiser = stop.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        raiser.raise();
    });

    let (report, backend) = speak(&source, backend, &mut player, &stop).await;

    assert!(report.cancelled);
    assert_eq!(player.played(), vec![FIRST]);
    assert_eq!(backend.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_device_error_abandons_only_this_turn() {
    let source = ScriptedSource::new(three_sentences());
    let mut player = RecordingPlayer::device_fails_after(1);
    let stop = StopSignal::new();

    let (report, backend) = speak(&source, ScriptedBackend::new(), &mut player, &stop).await;

    assert!(report.device_error.is_some());
    assert_eq!(player.played(), vec![FIRST]);
    // the third sentence is never synthesized
    assert_eq!(backend.calls(), 2);
    assert!(!stop.is_raised());
}

#[tokio::test(start_paused = true)]
async fn test_orchestrator_state_reaches_done() {
    let source = ScriptedSource::new(three_sentences());
    let turn = source.stream_turn("conv", "hello").await.unwrap();
    let orchestrator = StreamOrchestrator::new(PipelineConfig::default(), &StopSignal::new());
    let state = orchestrator.state();

    let mut delivered = Vec::new();
    let report = orchestrator
        .run_text(turn, |sentence| delivered.push(sentence.as_str().to_string()))
        .await;

    assert_eq!(*state.borrow(), PipelineState::Done);
    assert_eq!(delivered, vec![FIRST, SECOND, THIRD]);
    assert_eq!(report.sentences_played, 3);
}

#[tokio::test(start_paused = true)]
async fn test_refused_turn_speaks_fallback() {
    let source = Arc::new(ScriptedSource::refusing());
    let player = RecordingPlayer::new();
    let synthesizer = SpeechSynthesizer::new(Arc::new(ScriptedBackend::new()), RetryPolicy::default());

    let mut assistant = Assistant::new(Arc::clone(&source) as Arc<dyn TurnSource>)
        .with_conversation_id("conv-1".to_string())
        .with_output(synthesizer, Box::new(player.clone()));
    let state = assistant.state();

    let report = assistant.chat("你好").await.unwrap();

    assert!(report.stream_failed);
    assert_eq!(player.played(), vec![DEFAULT_FALLBACK_REPLY]);
    assert_eq!(source.turns(), vec![("conv-1".to_string(), "你好".to_string())]);
    assert_eq!(*state.borrow(), AssistantState::Done);
}

#[tokio::test(start_paused = true)]
async fn test_volume_reaches_the_player_with_each_clip() {
    let source = Arc::new(ScriptedSource::new(vec![Step::delta(FIRST), Step::delta(SECOND)]));
    let player = RecordingPlayer::new();
    let params = VoiceParams {
        volume: -50,
        ..VoiceParams::default()
    };

    let mut assistant = Assistant::new(source)
        .with_params(params)
        .with_output(
            SpeechSynthesizer::new(Arc::new(ScriptedBackend::new()), RetryPolicy::default()),
            Box::new(player.clone()),
        );

    assistant.chat("出门吗").await.unwrap();

    assert_eq!(player.played(), vec![FIRST, SECOND]);
    assert_eq!(player.gains(), vec![0.5, 0.5]);
}

#[tokio::test]
async fn test_chat_without_speaker_is_a_config_error() {
    let source = Arc::new(ScriptedSource::new(three_sentences()));
    let mut assistant = Assistant::new(source);

    let result = assistant.chat("hi").await;
    assert!(matches!(result, Err(cadence::Error::Config(_))));
}
