//! Sentence segmentation for streamed replies
//!
//! Text deltas are buffered until a speakable sentence can be cut off the
//! front of the buffer. Strong terminators close a sentence; long runs with no
//! terminator fall back to the last comma inside the maximum window.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Buffer length (in characters) that must be exceeded before cutting
pub const MIN_SEGMENT_CHARS: usize = 10;

/// Buffer length (in characters) at which the comma fallback applies
pub const MAX_SEGMENT_CHARS: usize = 40;

/// Shortest prefix closed by a run of strong terminators
#[allow(clippy::expect_used)]
static STRONG_SPAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^。！？!?~～]*[。！？!?~～]+").expect("strong terminator pattern is valid")
});

/// Commas accepted by the length fallback
const COMMAS: [char; 2] = [',', '，'];

/// A complete unit of text destined for speech synthesis
///
/// Never empty. Once built it is only read, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence(String);

impl Sentence {
    /// Wrap text as a sentence, rejecting empty input
    #[must_use]
    pub fn new(text: impl Into<String>) -> Option<Self> {
        let text = text.into();
        if text.is_empty() { None } else { Some(Self(text)) }
    }

    /// The sentence text exactly as it was segmented
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The sentence text without surrounding whitespace
    #[must_use]
    pub fn speakable(&self) -> &str {
        self.0.trim()
    }

    /// Length in characters
    #[must_use]
    pub fn char_len(&self) -> usize {
        self.0.chars().count()
    }
}

impl fmt::Display for Sentence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Sentence> for String {
    fn from(sentence: Sentence) -> Self {
        sentence.0
    }
}

/// Segmentation thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmenterConfig {
    /// Cut only while the buffer holds more characters than this
    pub min_chars: usize,
    /// Fall back to a comma cut once the buffer holds this many characters
    pub max_chars: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            min_chars: MIN_SEGMENT_CHARS,
            max_chars: MAX_SEGMENT_CHARS,
        }
    }
}

/// Buffers text deltas and emits complete sentences
///
/// Emitted sentences concatenated in order, followed by the pending buffer,
/// always equal the text accumulated so far.
#[derive(Debug, Default)]
pub struct SentenceSegmenter {
    config: SegmenterConfig,
    pending: String,
}

impl SentenceSegmenter {
    /// Create a segmenter with the given thresholds
    #[must_use]
    pub const fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            pending: String::new(),
        }
    }

    /// Append a delta and return every sentence it completes
    pub fn accumulate(&mut self, delta: &str) -> Vec<Sentence> {
        self.pending.push_str(delta);

        let mut sentences = Vec::new();
        while self.pending.chars().count() > self.config.min_chars {
            let Some(end) = self.strong_cut().or_else(|| self.comma_cut()) else {
                break;
            };

            let rest = self.pending.split_off(end);
            let text = std::mem::replace(&mut self.pending, rest);
            if let Some(sentence) = Sentence::new(text) {
                sentences.push(sentence);
            }
        }

        sentences
    }

    /// Emit whatever is left as a final sentence, trimmed
    ///
    /// Returns `None` when the remainder is empty or only whitespace. The
    /// buffer is cleared either way.
    pub fn flush(&mut self) -> Option<Sentence> {
        let rest = std::mem::take(&mut self.pending);
        Sentence::new(rest.trim())
    }

    /// Drop the pending buffer without emitting it
    pub fn discard(&mut self) -> String {
        std::mem::take(&mut self.pending)
    }

    /// Text not yet emitted
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Byte offset just past the first strong-terminator run
    fn strong_cut(&self) -> Option<usize> {
        STRONG_SPAN.find(&self.pending).map(|m| m.end())
    }

    /// Byte offset just past the last comma within the maximum window
    fn comma_cut(&self) -> Option<usize> {
        let max = self.config.max_chars;
        if self.pending.chars().count() < max {
            return None;
        }

        let window_end = self
            .pending
            .char_indices()
            .nth(max)
            .map_or(self.pending.len(), |(idx, _)| idx);

        self.pending[..window_end]
            .char_indices()
            .rev()
            .find(|(_, c)| COMMAS.contains(c))
            .map(|(idx, c)| idx + c.len_utf8())
    }
}
