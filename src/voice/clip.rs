//! Encoded audio clips and decoding to mono samples

use std::io::Cursor;

use crate::{Error, Result};

/// Container format of an encoded clip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Mp3,
    Wav,
}

impl AudioFormat {
    /// Sniff the format from the leading bytes; anything without a RIFF
    /// header is treated as MP3
    #[must_use]
    pub fn detect(data: &[u8]) -> Self {
        if data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WAVE" {
            Self::Wav
        } else {
            Self::Mp3
        }
    }
}

/// Synthesized audio waiting to be played
///
/// An empty clip means synthesis produced nothing; playing it is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    data: Vec<u8>,
    format: AudioFormat,
}

/// Decoded mono samples in `[-1.0, 1.0]`
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioClip {
    /// Wrap encoded bytes, detecting the format
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        let format = AudioFormat::detect(&data);
        Self { data, format }
    }

    /// The "no audio" clip
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            data: Vec::new(),
            format: AudioFormat::Mp3,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub const fn format(&self) -> AudioFormat {
        self.format
    }

    /// Decode to mono f32 samples at the clip's native rate
    ///
    /// # Errors
    ///
    /// Returns error if the payload cannot be decoded
    pub fn decode(&self) -> Result<DecodedAudio> {
        if self.is_empty() {
            return Ok(DecodedAudio {
                samples: Vec::new(),
                sample_rate: 0,
            });
        }

        match self.format {
            AudioFormat::Mp3 => decode_mp3(&self.data),
            AudioFormat::Wav => decode_wav(&self.data),
        }
    }
}

/// Decode MP3 bytes to mono f32 samples
fn decode_mp3(mp3_data: &[u8]) -> Result<DecodedAudio> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or_default();
                let channels = frame.channels.max(1);
                samples.extend(downmix(
                    frame.data.iter().map(|&s| f32::from(s) / 32768.0),
                    channels,
                ));
            }
            Err(minimp3::Error::Eof) => break,
            Err(minimp3::Error::SkippedData) => {}
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    if samples.is_empty() {
        return Err(Error::Audio("MP3 payload has no frames".to_string()));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

/// Decode WAV bytes to mono f32 samples
#[allow(clippy::cast_precision_loss)]
fn decode_wav(wav_data: &[u8]) -> Result<DecodedAudio> {
    let mut reader = hound::WavReader::new(Cursor::new(wav_data))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    Ok(DecodedAudio {
        samples: downmix(interleaved.into_iter(), channels),
        sample_rate: spec.sample_rate,
    })
}

/// Average interleaved channels into one
pub(super) fn downmix(samples: impl Iterator<Item = f32>, channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.collect();
    }

    let interleaved: Vec<f32> = samples.collect();
    #[allow(clippy::cast_precision_loss)]
    let divisor = channels as f32;
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / divisor)
        .collect()
}
