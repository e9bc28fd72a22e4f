//! Audio capture from microphone

use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};
use tempfile::NamedTempFile;

use super::clip::downmix;
use super::playback::resample;
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Recorded 16-bit mono PCM
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PcmBuffer {
    samples: Vec<i16>,
    sample_rate: u32,
}

impl PcmBuffer {
    #[must_use]
    pub const fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Quantize f32 samples in `[-1.0, 1.0]`
    #[must_use]
    pub fn from_f32(samples: &[f32], sample_rate: u32) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let samples = samples
            .iter()
            .map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16)
            .collect();
        Self::new(samples, sample_rate)
    }

    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Recorded length
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }

    /// Peak absolute level in `[0.0, 1.0]`
    #[must_use]
    pub fn peak(&self) -> f32 {
        self.samples
            .iter()
            .map(|&s| f32::from(s).abs() / 32768.0)
            .fold(0.0, f32::max)
    }

    /// Encode as a WAV container
    ///
    /// # Errors
    ///
    /// Returns error if WAV encoding fails
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
            for &sample in &self.samples {
                writer.write_sample(sample)?;
            }
            writer.finalize()?;
        }

        Ok(cursor.into_inner())
    }

    /// Write the buffer to a temporary WAV file
    ///
    /// The file is deleted when the returned handle is dropped.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be created or written
    pub fn stage(&self) -> Result<StagedWav> {
        let mut file = tempfile::Builder::new()
            .prefix("cadence-")
            .suffix(".wav")
            .tempfile()?;
        file.write_all(&self.to_wav()?)?;
        file.flush()?;

        tracing::debug!(path = %file.path().display(), "staged recording");
        Ok(StagedWav { file })
    }
}

/// A WAV file on disk that lives as long as this handle
#[derive(Debug)]
pub struct StagedWav {
    file: NamedTempFile,
}

impl StagedWav {
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Records fixed-length utterances
#[async_trait]
pub trait Microphone: Send {
    /// Record for `max_duration` and return 16 kHz mono PCM
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if the input device cannot be used
    async fn capture(&mut self, max_duration: Duration) -> Result<PcmBuffer>;
}

/// Captures audio from an input device
///
/// Devices that cannot record 16 kHz mono directly are recorded at their
/// default config, then downmixed and resampled.
pub struct AudioCapture {
    device_name: Option<String>,
    config: StreamConfig,
}

impl AudioCapture {
    /// Create a capture for the named input device, or the host default
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new(device_name: Option<String>) -> Result<Self> {
        let device = open_input_device(device_name.as_deref())?;
        let config = input_config(&device)?;

        tracing::debug!(
            device = %device.name().unwrap_or_default(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            "audio capture initialized"
        );

        Ok(Self {
            device_name,
            config,
        })
    }

    /// Get the sample rate of captured buffers
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

#[async_trait]
impl Microphone for AudioCapture {
    async fn capture(&mut self, max_duration: Duration) -> Result<PcmBuffer> {
        let device_name = self.device_name.clone();
        let config = self.config.clone();

        let raw = tokio::task::spawn_blocking(move || {
            record_blocking(device_name.as_deref(), &config, max_duration)
        })
        .await
        .map_err(|e| Error::Device(format!("capture task failed: {e}")))??;

        let mono = downmix(raw.into_iter(), usize::from(self.config.channels));
        let samples = resample(&mono, self.config.sample_rate.0, SAMPLE_RATE)?;
        let buffer = PcmBuffer::from_f32(&samples, SAMPLE_RATE);

        tracing::debug!(
            secs = buffer.duration().as_secs_f32(),
            peak = buffer.peak(),
            "capture complete"
        );
        Ok(buffer)
    }
}

/// Names of the host's input devices
///
/// # Errors
///
/// Returns error if the host cannot enumerate devices
pub fn input_device_names() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| Error::Device(e.to_string()))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

fn open_input_device(name: Option<&str>) -> Result<Device> {
    let host = cpal::default_host();

    match name {
        Some(name) => host
            .input_devices()
            .map_err(|e| Error::Device(e.to_string()))?
            .find(|d| d.name().is_ok_and(|n| n == name))
            .ok_or_else(|| Error::Device(format!("input device not found: {name}"))),
        None => host
            .default_input_device()
            .ok_or_else(|| Error::Device("no input device available".to_string())),
    }
}

/// Prefer 16 kHz mono, otherwise the device default
fn input_config(device: &Device) -> Result<StreamConfig> {
    let speech = device
        .supported_input_configs()
        .map_err(|e| Error::Device(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        });

    if let Some(supported) = speech {
        return Ok(supported.with_sample_rate(SampleRate(SAMPLE_RATE)).config());
    }

    device
        .default_input_config()
        .map(|c| c.config())
        .map_err(|e| Error::Device(format!("no suitable input config found: {e}")))
}

/// Record interleaved samples for `duration`
fn record_blocking(
    device_name: Option<&str>,
    config: &StreamConfig,
    duration: Duration,
) -> Result<Vec<f32>> {
    let device = open_input_device(device_name)?;
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&buffer);

    let stream = device
        .build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if let Ok(mut buf) = sink.lock() {
                    buf.extend_from_slice(data);
                }
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Device(e.to_string()))?;

    stream.play().map_err(|e| Error::Device(e.to_string()))?;
    tracing::debug!(secs = duration.as_secs_f32(), "audio capture started");

    std::thread::sleep(duration);
    drop(stream);

    let samples = buffer
        .lock()
        .map(|mut buf| std::mem::take(&mut *buf))
        .unwrap_or_default();
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantizes_and_clamps() {
        let pcm = PcmBuffer::from_f32(&[0.0, 1.0, -1.0, 2.0], SAMPLE_RATE);
        assert_eq!(pcm.samples(), &[0, 32767, -32767, 32767]);
    }

    #[test]
    fn duration_follows_sample_rate() {
        let pcm = PcmBuffer::new(vec![0; 8000], SAMPLE_RATE);
        assert_eq!(pcm.duration(), Duration::from_millis(500));
        assert_eq!(PcmBuffer::default().duration(), Duration::ZERO);
    }

    #[test]
    fn wav_is_16k_mono_16bit() {
        let pcm = PcmBuffer::new(vec![1, -1, 300], SAMPLE_RATE);
        let wav = pcm.to_wav().unwrap();

        let reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, SAMPLE_RATE);
        assert_eq!(spec.bits_per_sample, 16);
        let samples: Vec<i16> = reader.into_samples().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![1, -1, 300]);
    }

    #[test]
    fn staged_file_is_removed_on_drop() {
        let pcm = PcmBuffer::new(vec![0; 160], SAMPLE_RATE);
        let staged = pcm.stage().unwrap();
        let path = staged.path().to_path_buf();

        assert!(path.exists());
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("wav"));
        drop(staged);
        assert!(!path.exists());
    }

    #[test]
    fn peak_reports_loudest_sample() {
        let pcm = PcmBuffer::new(vec![100, -16384, 8192], SAMPLE_RATE);
        assert!((pcm.peak() - 0.5).abs() < f32::EPSILON);
    }
}
