//! Audio playback to speakers

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};

use super::{AudioClip, VoiceParams};
use crate::{Error, Result};

/// Preferred sample rate for playback (matches common TTS output)
const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Frames per resampler block
const RESAMPLE_CHUNK: usize = 1024;

/// Something that can play a clip to completion
///
/// Calls are strictly serial: `play` returns only once the clip has finished,
/// so the next clip can never overlap it.
#[async_trait]
pub trait ClipPlayer: Send {
    /// Play a clip at the volume in `params`, returning when it has finished
    ///
    /// An empty clip returns immediately.
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if the output device is unusable and
    /// `Error::Audio` if the clip cannot be decoded
    async fn play(&mut self, clip: &AudioClip, params: &VoiceParams) -> Result<()>;
}

/// Plays audio to the default output device
pub struct AudioPlayback {
    config: StreamConfig,
}

impl AudioPlayback {
    /// Create a new audio playback instance on the default output device
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Device("no output device available".to_string()))?;

        let config = output_config(&device)?;

        tracing::debug!(
            device = %device.name().unwrap_or_default(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self { config })
    }

    /// Output sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    /// Play raw mono samples already at the output rate, scaled by `gain`
    ///
    /// # Errors
    ///
    /// Returns error if playback fails
    pub async fn play_samples(&mut self, mut samples: Vec<f32>, gain: f32) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        apply_gain(&mut samples, gain);
        let config = self.config.clone();

        tokio::task::spawn_blocking(move || play_samples_blocking(&config, samples))
            .await
            .map_err(|e| Error::Device(format!("playback task failed: {e}")))?
    }
}

#[async_trait]
impl ClipPlayer for AudioPlayback {
    async fn play(&mut self, clip: &AudioClip, params: &VoiceParams) -> Result<()> {
        if clip.is_empty() {
            return Ok(());
        }

        let decoded = clip.decode()?;
        let samples = resample(&decoded.samples, decoded.sample_rate, self.sample_rate())?;
        tracing::debug!(
            format = ?clip.format(),
            from_rate = decoded.sample_rate,
            samples = samples.len(),
            gain = params.gain(),
            "playing clip"
        );

        self.play_samples(samples, params.gain()).await
    }
}

/// Pick an output config at 24 kHz (mono, then stereo), falling back to the
/// device default
fn output_config(device: &Device) -> Result<StreamConfig> {
    let supports = |channels: u16| {
        device.supported_output_configs().ok()?.find(|c| {
            c.channels() == channels
                && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
        })
    };

    if let Some(supported) = supports(1).or_else(|| supports(2)) {
        return Ok(supported
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config());
    }

    device
        .default_output_config()
        .map(|c| c.config())
        .map_err(|e| Error::Device(format!("no suitable output config found: {e}")))
}

/// Play samples in a blocking manner
fn play_samples_blocking(config: &StreamConfig, samples: Vec<f32>) -> Result<()> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Device("no output device".to_string()))?;

    let channels = usize::from(config.channels);
    let sample_count = samples.len();
    let finished = Arc::new(AtomicBool::new(false));
    let finished_clone = Arc::clone(&finished);

    let mut position = 0usize;
    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    let sample = if let Some(&s) = samples.get(position) {
                        position += 1;
                        s
                    } else {
                        finished_clone.store(true, Ordering::Release);
                        0.0
                    };
                    frame.fill(sample);
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Device(e.to_string()))?;

    stream.play().map_err(|e| Error::Device(e.to_string()))?;

    let duration_ms = (sample_count as u64 * 1000) / u64::from(config.sample_rate.0.max(1));

    // Poll for completion with timeout
    let start = Instant::now();
    let timeout = Duration::from_millis(duration_ms + 500);

    while !finished.load(Ordering::Acquire) {
        if start.elapsed() > timeout {
            tracing::warn!(elapsed_ms = start.elapsed().as_millis(), "playback overran");
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    // Let the device drain its last buffer
    std::thread::sleep(Duration::from_millis(100));

    drop(stream);
    tracing::debug!(samples = sample_count, "playback complete");

    Ok(())
}

/// Scale samples by `gain`, clipping to the valid range
fn apply_gain(samples: &mut [f32], gain: f32) {
    if (gain - 1.0).abs() < f32::EPSILON {
        return;
    }
    for sample in samples {
        *sample = (*sample * gain).clamp(-1.0, 1.0);
    }
}

/// Resample mono audio using rubato
///
/// The final partial block is zero-padded and the output trimmed to the
/// expected length.
#[allow(clippy::cast_possible_truncation)]
pub(super) fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    if from_rate == to_rate || from_rate == 0 || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, RESAMPLE_CHUNK, 2, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let input: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();
    let mut output = Vec::new();

    for chunk in input.chunks(RESAMPLE_CHUNK) {
        let mut block = chunk.to_vec();
        block.resize(RESAMPLE_CHUNK, 0.0);
        let result = resampler
            .process(&[block], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend_from_slice(&result[0]);
    }

    let expected = (samples.len() as u64 * u64::from(to_rate) / u64::from(from_rate)) as usize;
    output.truncate(expected);

    Ok(output.iter().map(|&s| s as f32).collect())
}

#[cfg(test)]
mod tests {
    use cpal::BufferSize;

    use super::*;

    fn offline_player() -> AudioPlayback {
        AudioPlayback {
            config: StreamConfig {
                channels: 1,
                sample_rate: SampleRate(PLAYBACK_SAMPLE_RATE),
                buffer_size: BufferSize::Default,
            },
        }
    }

    #[tokio::test]
    async fn empty_clip_is_a_no_op() {
        let mut player = offline_player();
        assert!(
            player
                .play(&AudioClip::empty(), &VoiceParams::default())
                .await
                .is_ok()
        );
        assert!(player.play_samples(Vec::new(), 1.0).await.is_ok());
    }

    #[test]
    fn same_rate_passes_through() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(resample(&samples, 24000, 24000).unwrap(), samples);
    }

    #[test]
    fn downsampling_halves_length() {
        let samples = vec![0.0f32; 4800];
        let out = resample(&samples, 48000, 24000).unwrap();
        assert_eq!(out.len(), 2400);
    }

    #[test]
    fn short_input_is_padded_not_dropped() {
        let samples = vec![0.0f32; 300];
        let out = resample(&samples, 16000, 24000).unwrap();
        assert_eq!(out.len(), 450);
    }

    #[test]
    fn gain_scales_and_clips() {
        let mut samples = vec![0.25, -0.75, 0.5];
        apply_gain(&mut samples, 2.0);
        assert_eq!(samples, vec![0.5, -1.0, 1.0]);
    }
}
