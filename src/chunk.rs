//! Sentence-overlap text chunker.
//!
//! Splits document text into [`Chunk`]s of at most `chunk_size` characters,
//! measured as the sum of the sentence lengths in the chunk. Sentence
//! boundaries follow the Unicode sentence-boundary rules (UAX #29).
//!
//! When a sentence would push the running chunk past `chunk_size`, the chunk
//! is closed and the next one is seeded with the last `overlap` *sentences*
//! of the closed chunk, followed by the sentence that overflowed. A single
//! sentence longer than `chunk_size` is kept whole.

use unicode_segmentation::UnicodeSegmentation;

use crate::error::{RagError, RagResult};
use crate::models::Chunk;

/// Chunking parameters, usually taken from `[chunking]`.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size,
            overlap,
        }
    }

    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        chunk_text(text, self.chunk_size, self.overlap)
    }

    /// Chunk raw bytes, rejecting content that is not valid UTF-8.
    pub fn chunk_bytes(&self, bytes: &[u8]) -> RagResult<Vec<Chunk>> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| RagError::InvalidInput(format!("text is not valid UTF-8: {}", e)))?;
        Ok(self.chunk(text))
    }
}

/// Split `text` into trimmed, non-empty sentences in document order.
pub fn split_sentences(text: &str) -> Vec<&str> {
    text.split_sentence_bounds()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Split text into overlapping sentence chunks.
/// Returns chunks with contiguous ordinals starting at 0, or nothing for
/// blank input.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    let sentences = split_sentences(text);
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0usize;

    for sentence in sentences {
        let sentence_len = sentence.chars().count();

        if current_len + sentence_len > chunk_size && !current.is_empty() {
            chunks.push(make_chunk(chunks.len(), &current));

            let keep_from = current.len().saturating_sub(overlap);
            current.drain(..keep_from);
            current.push(sentence);
            current_len = current.iter().map(|s| s.chars().count()).sum();
        } else {
            current.push(sentence);
            current_len += sentence_len;
        }
    }

    // Flush remaining
    if !current.is_empty() {
        chunks.push(make_chunk(chunks.len(), &current));
    }

    chunks
}

fn make_chunk(ordinal: usize, sentences: &[&str]) -> Chunk {
    Chunk {
        ordinal,
        text: sentences.join(" "),
        char_len: sentences.iter().map(|s| s.chars().count()).sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(chunks: &[Chunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.text.as_str()).collect()
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        assert!(chunk_text("", 100, 1).is_empty());
        assert!(chunk_text("   \n\t ", 100, 1).is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunk_text("Alpha is first. Beta is second. Gamma is third.", 1000, 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].ordinal, 0);
        assert_eq!(chunks[0].text, "Alpha is first. Beta is second. Gamma is third.");
    }

    #[test]
    fn test_overlap_carries_trailing_sentence() {
        let chunks = chunk_text("One. Two. Three. Four.", 10, 1);
        assert_eq!(texts(&chunks), vec!["One. Two.", "Two. Three.", "Three. Four."]);
    }

    #[test]
    fn test_zero_overlap_partitions_sentences() {
        let chunks = chunk_text("One. Two. Three. Four.", 10, 0);
        assert_eq!(texts(&chunks), vec!["One. Two.", "Three.", "Four."]);
    }

    #[test]
    fn test_long_sentence_is_not_truncated() {
        let long = "This single sentence is far longer than the limit.";
        let text = format!("Short. {}", long);
        let chunks = chunk_text(&text, 5, 0);
        assert_eq!(texts(&chunks), vec!["Short.", long]);
        assert!(chunks[1].char_len > 5);
    }

    #[test]
    fn test_overlap_larger_than_chunk_keeps_whole_chunk() {
        let chunks = chunk_text("Aa. Bb. Cc.", 6, 10);
        // Every previous sentence is carried forward.
        assert_eq!(texts(&chunks), vec!["Aa. Bb.", "Aa. Bb. Cc."]);
    }

    #[test]
    fn test_ordinals_contiguous() {
        let text = (0..40)
            .map(|i| format!("Sentence number {}.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = chunk_text(&text, 60, 1);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.ordinal, i, "Ordinal mismatch at position {}", i);
        }
    }

    #[test]
    fn test_chunks_cover_all_sentences_in_order() {
        let text = (0..25)
            .map(|i| format!("Fact {} is recorded here.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let original = split_sentences(&text);

        for (size, overlap) in [(30, 0), (50, 1), (80, 2), (120, 3)] {
            let chunks = chunk_text(&text, size, overlap);
            let mut seen: Vec<&str> = Vec::new();
            for c in &chunks {
                for s in split_sentences(&c.text) {
                    if seen.last() != Some(&s) && !seen.contains(&s) {
                        seen.push(s);
                    }
                }
            }
            assert_eq!(seen, original, "size={} overlap={}", size, overlap);
        }
    }

    #[test]
    fn test_each_chunk_starts_with_previous_tail() {
        let text = (0..30)
            .map(|i| format!("Item {} ok.", i))
            .collect::<Vec<_>>()
            .join(" ");

        for overlap in 0..4 {
            let chunks = chunk_text(&text, 40, overlap);
            for pair in chunks.windows(2) {
                let prev = split_sentences(&pair[0].text);
                let next = split_sentences(&pair[1].text);
                let carried = overlap.min(prev.len());
                assert_eq!(
                    &next[..carried],
                    &prev[prev.len() - carried..],
                    "overlap={}",
                    overlap
                );
            }
        }
    }

    #[test]
    fn test_size_bound_without_overlap() {
        let text = (0..30)
            .map(|i| format!("Row {} holds data.", i))
            .collect::<Vec<_>>()
            .join(" ");
        for c in chunk_text(&text, 45, 0) {
            assert!(c.char_len <= 45, "chunk too long: {:?}", c);
        }
    }

    #[test]
    fn test_default_settings_stay_within_chunk_size() {
        let cfg = crate::config::ChunkingConfig::default();
        let text = (0..200)
            .map(|i| format!("Sentence {:03} carries some filler text.", i))
            .collect::<Vec<_>>()
            .join(" ");

        let chunks = Chunker::new(cfg.chunk_size, cfg.overlap).chunk(&text);
        assert!(chunks.len() < 20, "too many chunks: {}", chunks.len());
        for c in &chunks {
            assert!(c.char_len <= cfg.chunk_size, "chunk {} has {} chars", c.ordinal, c.char_len);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha. Beta. Gamma. Delta. Epsilon.";
        assert_eq!(chunk_text(text, 12, 1), chunk_text(text, 12, 1));
    }

    #[test]
    fn test_chunk_bytes_rejects_invalid_utf8() {
        let chunker = Chunker::new(100, 1);
        let err = chunker.chunk_bytes(&[0x66, 0x6f, 0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, RagError::InvalidInput(_)));
        assert_eq!(chunker.chunk_bytes(b"Hi there.").unwrap().len(), 1);
    }
}
