//! Normalizes agent output into true deltas

use crate::agent::TurnChunk;

/// Tracks the cumulative reply text and turns snapshots into deltas
///
/// Sources may send the full text so far (snapshots) or just the new part.
/// Snapshots are diffed against the length already seen; a repeated or
/// shorter snapshot is a zero-length delta.
#[derive(Debug, Default)]
pub struct DeltaTracker {
    text: String,
}

impl DeltaTracker {
    /// Create an empty tracker
    #[must_use]
    pub const fn new() -> Self {
        Self {
            text: String::new(),
        }
    }

    /// Record a chunk and return the new text it carries, if any
    pub fn observe(&mut self, chunk: TurnChunk) -> Option<String> {
        let delta = match chunk {
            TurnChunk::Delta(delta) => delta,
            TurnChunk::Snapshot(snapshot) => {
                let seen = self.text.len();
                if snapshot.len() <= seen {
                    return None;
                }
                if !snapshot.is_char_boundary(seen) {
                    tracing::warn!(
                        seen_bytes = seen,
                        snapshot_bytes = snapshot.len(),
                        "snapshot diverges from text already seen, dropping it"
                    );
                    return None;
                }
                snapshot[seen..].to_string()
            }
        };

        if delta.is_empty() {
            return None;
        }

        self.text.push_str(&delta);
        Some(delta)
    }

    /// Cumulative text observed so far
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Consume the tracker, returning the cumulative text
    #[must_use]
    pub fn into_text(self) -> String {
        self.text
    }
}
