//! Sentence-aligned chunking with offsets into the unfiltered text.
//!
//! Sentences are located by forward search from the end of the previous match, so a
//! sentence that repeats earlier in the text is never matched twice. Stop words are
//! stripped from each chunk's working text only; offsets always describe the original
//! span.
//!
//! Merging is tail-biased: an undersized chunk keeps absorbing sentences even past
//! `max_tokens`, so the last chunk of a document may exceed the maximum rather than be
//! emitted below the minimum.

use common::storage::types::chunk::Chunk;
use tracing::{debug, warn};
use unicode_segmentation::UnicodeSegmentation;

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "nor", "in", "on", "at", "to", "for", "of", "with",
    "by", "from", "is", "are", "was", "were", "be", "been", "being", "am", "have", "has",
    "had", "do", "does", "did", "will", "would", "could", "should", "may", "might", "shall",
    "can", "this", "that", "these", "those", "it", "its", "i", "me", "he", "him", "she",
    "they", "them", "we", "us", "you", "his", "her", "their", "my", "your", "our", "not",
    "so", "if", "as", "up", "out", "about", "into", "over", "than", "then", "just", "also",
    "very", "there", "here", "what", "which", "who", "whom", "when", "where", "how", "why",
];

/// Splits `text` into chunks of roughly `min_tokens..=max_tokens` working-text tokens.
pub fn chunk(text: &str, max_tokens: usize, min_tokens: usize) -> Vec<Chunk> {
    let sentences = locate_sentences(text);
    debug!(sentences = sentences.len(), "sentences located");
    merge_chunks(sentences, max_tokens, min_tokens)
}

/// Inserts a `^start-end` marker after each chunk, last chunk first so earlier offsets
/// stay valid while inserting.
pub fn annotate(original: &str, chunks: &[Chunk]) -> String {
    let mut ordered: Vec<&Chunk> = chunks.iter().collect();
    ordered.sort_by(|a, b| b.end_offset.cmp(&a.end_offset));

    let mut annotated = original.to_string();
    for chunk in ordered {
        if chunk.end_offset > annotated.len() || !annotated.is_char_boundary(chunk.end_offset) {
            warn!(
                start = chunk.start_offset,
                end = chunk.end_offset,
                "chunk offset does not fall on a character boundary; marker skipped"
            );
            continue;
        }
        annotated.insert_str(chunk.end_offset, &format!("\n\n{}\n\n", chunk.marker()));
    }
    annotated
}

fn locate_sentences(text: &str) -> Vec<Chunk> {
    let mut cursor = 0usize;
    let mut located = Vec::new();

    for raw in text.unicode_sentences() {
        let sentence = raw.trim();
        if sentence.is_empty() {
            continue;
        }

        let Some(found) = text.get(cursor..).and_then(|rest| rest.find(sentence)) else {
            debug!(sentence, "sentence not found after cursor; skipping");
            continue;
        };

        let start = cursor.saturating_add(found);
        let end = start.saturating_add(sentence.len());
        cursor = end;

        located.push(Chunk::new(strip_stop_words(sentence), start, end));
    }

    located
}

fn strip_stop_words(sentence: &str) -> String {
    sentence
        .split_whitespace()
        .filter(|word| !is_stopword(word))
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_stopword(word: &str) -> bool {
    let bare = word
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();
    !bare.is_empty() && STOPWORDS.contains(&bare.as_str())
}

fn merge_chunks(pieces: Vec<Chunk>, max_tokens: usize, min_tokens: usize) -> Vec<Chunk> {
    let mut merged = Vec::new();
    let mut current: Option<Chunk> = None;

    for piece in pieces {
        let Some(mut open) = current.take() else {
            current = Some(piece);
            continue;
        };

        let open_tokens = open.token_count();
        let combined_tokens = open_tokens.saturating_add(piece.token_count());

        if combined_tokens > max_tokens && open_tokens >= min_tokens {
            merged.push(open);
            current = Some(piece);
            continue;
        }

        extend(&mut open, piece);
        current = Some(open);
    }

    if let Some(open) = current {
        if !open.text.is_empty() {
            merged.push(open);
        }
    }

    merged
}

fn extend(open: &mut Chunk, piece: Chunk) {
    if open.text.is_empty() {
        open.text = piece.text;
    } else if !piece.text.is_empty() {
        open.text.push(' ');
        open.text.push_str(&piece.text);
    }
    open.end_offset = piece.end_offset;
}
