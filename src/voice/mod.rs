//! Voice processing module
//!
//! Handles audio capture, transcription, synthesis and playback.

mod capture;
mod clip;
mod playback;
mod retry;
mod stt;
mod tts;

pub use capture::{
    AudioCapture, Microphone, PcmBuffer, SAMPLE_RATE, StagedWav, input_device_names,
};
pub use clip::{AudioClip, AudioFormat, DecodedAudio};
pub use playback::{AudioPlayback, ClipPlayer};
pub use retry::RetryPolicy;
pub use stt::{CHUNK_FRAMES, Recognizer, SpeechTranscriber, WhisperRecognizer};
pub use tts::{
    HttpSynthesizer, SpeechSynthesizer, SynthesisBackend, SynthesisJob, TtsProvider, VoiceParams,
};
