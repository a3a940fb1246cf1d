use serde::{Deserialize, Serialize};

/// A sentence-aligned span of a document body.
///
/// `text` is the stop-word-filtered working text; the offsets are byte positions in the
/// unfiltered body it was cut from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
}

impl Chunk {
    pub fn new(text: impl Into<String>, start_offset: usize, end_offset: usize) -> Self {
        Self {
            text: text.into(),
            start_offset,
            end_offset,
        }
    }

    /// Whitespace-delimited word count of the working text.
    pub fn token_count(&self) -> usize {
        self.text.split_whitespace().count()
    }

    /// Ledger key for this chunk within `document`.
    pub fn chunk_id(&self, document: &str) -> String {
        format!("{document}-{}-{}", self.start_offset, self.end_offset)
    }

    /// Block marker inserted into the source document after the chunk.
    pub fn marker(&self) -> String {
        format!("^{}-{}", self.start_offset, self.end_offset)
    }

    /// Wiki link pointing at the chunk's marker inside `document`.
    pub fn anchor(&self, document: &str) -> String {
        format!("[[{document}#{}]]", self.marker())
    }
}
