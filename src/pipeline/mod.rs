//! Streaming reply pipeline
//!
//! A producer task turns the agent's reply stream into sentences and queues
//! them; the caller's task synthesizes and plays them one at a time, in the
//! order they were segmented.

mod delta;
mod orchestrator;
mod queue;
mod segmenter;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub use delta::DeltaTracker;
pub use orchestrator::{StreamOrchestrator, TurnReport};
pub use queue::{Dequeue, SentenceReceiver, SentenceSender, synthesis_queue};
pub use segmenter::{
    MAX_SEGMENT_CHARS, MIN_SEGMENT_CHARS, SegmenterConfig, Sentence, SentenceSegmenter,
};

/// Reply spoken when the agent's stream fails part way through
pub const DEFAULT_FALLBACK_REPLY: &str = "抱歉，我在处理您的问题时遇到了一些困难。";

/// Progress of one streamed turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// The reply stream is still being read
    Producing,
    /// The stream has ended and the buffer was flushed; the queue may still
    /// hold sentences
    Draining,
    /// The queue is empty and the producer has exited
    Done,
}

/// Cooperative cancellation flag
///
/// Cloning shares the flag. A child is raised by its own `raise` or by any
/// ancestor's, but raising a child leaves the ancestors untouched.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
    ancestors: Vec<Arc<AtomicBool>>,
}

impl StopSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A signal that also observes this one
    #[must_use]
    pub fn child(&self) -> Self {
        let mut ancestors = self.ancestors.clone();
        ancestors.push(Arc::clone(&self.flag));
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            ancestors,
        }
    }

    pub fn raise(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.ancestors.iter().any(|a| a.load(Ordering::SeqCst))
    }
}

/// Tunables for one streamed turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// How long the consumer waits on an empty queue before checking on the
    /// producer
    pub dequeue_timeout: Duration,
    pub segmenter: SegmenterConfig,
    /// Spoken in place of the rest of the reply when the stream fails
    pub fallback_reply: String,
    /// Consecutive stalls before a warning is logged
    pub stall_warn_after: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dequeue_timeout: Duration::from_secs(15),
            segmenter: SegmenterConfig::default(),
            fallback_reply: DEFAULT_FALLBACK_REPLY.to_string(),
            stall_warn_after: 2,
        }
    }
}
