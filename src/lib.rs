//! Cadence - streaming voice front end for chat agents
//!
//! Cadence records an utterance, transcribes it, streams the agent's reply
//! and speaks it sentence by sentence while the agent is still generating.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  Microphone → Transcriber → TurnSource (agent, SSE)  │
//! └──────────────────────────┬───────────────────────────┘
//!                            │ text deltas
//! ┌──────────────────────────▼───────────────────────────┐
//! │  producer task: DeltaTracker → SentenceSegmenter     │
//! └──────────────────────────┬───────────────────────────┘
//!                            │ synthesis queue (FIFO)
//! ┌──────────────────────────▼───────────────────────────┐
//! │  consumer: SpeechSynthesizer (retry) → ClipPlayer    │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod agent;
pub mod assistant;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod voice;

pub use assistant::{Assistant, AssistantState, VoiceIo};
pub use config::Config;
pub use error::{Error, Result};
pub use pipeline::{PipelineConfig, PipelineState, StopSignal, StreamOrchestrator, TurnReport};
