use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cadence::pipeline::Sentence;
use cadence::voice::{
    AudioCapture, AudioPlayback, ClipPlayer, HttpSynthesizer, Microphone, SpeechSynthesizer,
    input_device_names,
};
use cadence::{Assistant, Config, StopSignal, VoiceIo};

/// Cadence - talk to a streaming chat agent
#[derive(Parser)]
#[command(name = "cadence", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Listen and answer aloud until Ctrl-C (default)
    Listen,
    /// Send one message and stream the reply
    Chat {
        /// Message text
        text: String,
        /// Speak the reply as well as printing it
        #[arg(long)]
        voice: bool,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "你好！这是语音合成的测试。")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,cadence=info",
        1 => "info,cadence=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command.unwrap_or(Command::Listen) {
        Command::Listen => listen().await,
        Command::Chat { text, voice } => chat(&text, voice).await,
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestSpeaker => test_speaker().await,
        Command::TestTts { text } => test_tts(&text).await,
    }
}

/// Run the voice loop until interrupted
async fn listen() -> anyhow::Result<()> {
    let config = Config::load()?;
    tracing::debug!(base_url = %config.agent.base_url, model = %config.agent.model, "loaded configuration");

    if !config.voice.enabled {
        anyhow::bail!("voice is disabled in the config file; use `cadence chat` instead");
    }

    let stop = StopSignal::new();
    let mut assistant = Assistant::from_config(&config, VoiceIo::Converse)?.with_stop(stop.clone());

    // Ctrl-C raises the stop signal; the loop winds down at its next check
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, stopping after the current step");
            stop.raise();
        }
    });

    assistant.run().await?;
    Ok(())
}

/// Send one message, printing sentences as they are segmented
async fn chat(text: &str, voice: bool) -> anyhow::Result<()> {
    let config = Config::load()?;

    if voice {
        let mut assistant = Assistant::from_config(&config, VoiceIo::Speak)?;
        let report = assistant.chat(text).await?;
        println!("{}", report.reply);
        return Ok(());
    }

    let assistant = Assistant::from_config(&config, VoiceIo::TextOnly)?;
    let report = assistant
        .chat_text(text, |sentence: &Sentence| {
            print!("{}", sentence.as_str());
            let _ = std::io::stdout().flush();
        })
        .await;
    println!();

    if report.stream_failed {
        anyhow::bail!("agent stream failed");
    }
    Ok(())
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    let config = Config::load()?;

    println!("Input devices:");
    for name in input_device_names()? {
        println!("  {name}");
    }
    println!();

    println!("Recording for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new(config.voice.input_device.clone())?;
    let pcm = capture.capture(Duration::from_secs(duration)).await?;

    println!("Sample rate: {} Hz", pcm.sample_rate());
    println!("Recorded: {:.1}s", pcm.duration().as_secs_f32());
    println!("Peak: {:.4}", pcm.peak());

    println!("\n---");
    if pcm.peak() > 0.01 {
        println!("Your mic is working!");
    } else {
        println!("The recording is silent, check:");
        println!("  1. Is your mic plugged in?");
        println!("  2. Run: pactl info | grep 'Default Source'");
        println!("  3. Run: arecord -l (to list devices)");
        println!("  4. Set voice.input_device in the config file");
    }

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let mut playback = AudioPlayback::new()?;

    let sample_rate = playback.sample_rate();
    let frequency = 440.0_f32;
    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);
    playback.play_samples(samples, 1.0).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// Synthesize and play one sentence
async fn test_tts(text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let config = Config::load()?;
    let mut backend = HttpSynthesizer::new(
        config.voice.tts_provider,
        config.tts_api_key().unwrap_or_default().to_string(),
        config.voice.tts_model.clone(),
    )?;
    if let Some(url) = &config.voice.tts_base_url {
        backend = backend.with_base_url(url.clone());
    }
    let synthesizer = SpeechSynthesizer::new(Arc::new(backend), config.retry);

    let sentence =
        Sentence::new(text).ok_or_else(|| anyhow::anyhow!("nothing to say: text is empty"))?;

    println!("Synthesizing speech...");
    let clip = synthesizer
        .synthesize(&sentence, &config.voice.params)
        .await;
    if clip.is_empty() {
        anyhow::bail!("TTS synthesis failed after {} attempts", config.retry.attempts);
    }
    println!("Got {} bytes of {:?} audio", clip.data().len(), clip.format());

    println!("Playing audio...");
    let mut playback = AudioPlayback::new()?;
    playback.play(&clip, &config.voice.params).await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}
