//! Ordered hand-off between sentence production and synthesis

use std::time::Duration;

use tokio::sync::mpsc;

use super::Sentence;

/// Create an unbounded FIFO queue of sentences
#[must_use]
pub fn synthesis_queue() -> (SentenceSender, SentenceReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SentenceSender { tx }, SentenceReceiver { rx })
}

/// Producer half of the synthesis queue
///
/// Dropping every sender closes the queue once it has been drained.
#[derive(Debug, Clone)]
pub struct SentenceSender {
    tx: mpsc::UnboundedSender<Sentence>,
}

impl SentenceSender {
    /// Push a sentence onto the back of the queue
    ///
    /// Returns false if the consumer is gone; the sentence is dropped.
    pub fn push(&self, sentence: Sentence) -> bool {
        self.tx.send(sentence).is_ok()
    }

    /// Whether the consumer half has been dropped
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Outcome of a dequeue with timeout
#[derive(Debug, PartialEq, Eq)]
pub enum Dequeue {
    /// Next sentence in segmentation order
    Item(Sentence),
    /// Nothing arrived within the timeout
    Timeout,
    /// Every sender is gone and the queue is empty
    Closed,
}

/// Consumer half of the synthesis queue
#[derive(Debug)]
pub struct SentenceReceiver {
    rx: mpsc::UnboundedReceiver<Sentence>,
}

impl SentenceReceiver {
    /// Wait up to `timeout` for the next sentence
    pub async fn pop(&mut self, timeout: Duration) -> Dequeue {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(sentence)) => Dequeue::Item(sentence),
            Ok(None) => Dequeue::Closed,
            Err(_) => Dequeue::Timeout,
        }
    }

    /// Number of sentences waiting
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether no sentences are waiting
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
