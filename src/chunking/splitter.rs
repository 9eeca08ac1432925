//! Length-bounded recursive splitting with a sliding character overlap.
//!
//! `semchunk` picks the boundaries (paragraphs, then sentences, then words) under a budget of
//! `chunk_size - overlap` characters. The tail of each piece is then prepended to the next one,
//! so every returned string stays within `chunk_size` characters.

use semchunk_rs::Chunker;
use std::sync::Arc;

use super::ChunkingError;

type LengthCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

fn char_counter() -> LengthCounter {
    Arc::new(|segment: &str| segment.chars().count())
}

/// Character-bounded splitter shared by the chunker and map-reduce windows.
#[derive(Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    overlap: usize,
    counter: LengthCounter,
}

impl std::fmt::Debug for TextSplitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextSplitter")
            .field("chunk_size", &self.chunk_size)
            .field("overlap", &self.overlap)
            .finish()
    }
}

impl TextSplitter {
    /// Splitter producing pieces of at most `chunk_size` characters with `overlap` shared.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, ChunkingError> {
        if chunk_size == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }
        if overlap >= chunk_size {
            return Err(ChunkingError::OverlapTooLarge {
                chunk_size,
                overlap,
            });
        }
        Ok(Self {
            chunk_size,
            overlap,
            counter: char_counter(),
        })
    }

    /// Upper bound on the length of every piece.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Length of `text` as the splitter measures it.
    pub fn measure(&self, text: &str) -> usize {
        self.counter.as_ref()(text)
    }

    /// Split `text`; returns an empty vector for blank input.
    pub fn split(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let counter = self.counter.clone();
        let chunker = Chunker::new(
            self.chunk_size - self.overlap,
            Box::new(move |segment: &str| counter.as_ref()(segment)),
        );
        let base_chunks = chunker
            .chunk(text)
            .into_iter()
            .filter(|piece| !piece.trim().is_empty())
            .collect();
        apply_overlap(base_chunks, self.chunk_size, self.overlap, &self.counter)
    }
}

/// Prepend a length-limited tail of the previous piece to each following piece.
fn apply_overlap(
    chunks: Vec<String>,
    chunk_size: usize,
    overlap: usize,
    counter: &LengthCounter,
) -> Vec<String> {
    if overlap == 0 || chunks.len() < 2 {
        return chunks;
    }

    let mut overlapped = Vec::with_capacity(chunks.len());
    let mut previous: Option<String> = None;
    for current in chunks {
        match &previous {
            None => overlapped.push(current.clone()),
            Some(prev) => overlapped.push(build_overlapped_chunk(
                prev, &current, overlap, chunk_size, counter,
            )),
        }
        previous = Some(current);
    }
    overlapped
}

fn build_overlapped_chunk(
    previous: &str,
    current: &str,
    overlap: usize,
    chunk_size: usize,
    counter: &LengthCounter,
) -> String {
    let tail = tail_within(previous, overlap, counter);
    let mut combined = String::with_capacity(tail.len() + current.len() + 1);

    if !tail.is_empty() {
        combined.push_str(tail);
        if !ends_with_whitespace(tail) && !starts_with_whitespace(current) {
            combined.push(' ');
        }
    }

    combined.push_str(current);
    trim_front_to_budget(&combined, chunk_size, counter)
}

/// Longest suffix of `text` within `limit`, starting on a character boundary.
fn tail_within<'a>(text: &'a str, limit: usize, counter: &LengthCounter) -> &'a str {
    if limit == 0 {
        return "";
    }
    let trimmed = text.trim_start();
    if counter.as_ref()(trimmed) <= limit {
        return trimmed;
    }
    for (offset, _) in text.char_indices().skip(1) {
        let candidate = text[offset..].trim_start();
        if counter.as_ref()(candidate) <= limit {
            return candidate;
        }
    }
    ""
}

fn trim_front_to_budget(text: &str, budget: usize, counter: &LengthCounter) -> String {
    if counter.as_ref()(text) <= budget {
        return text.to_string();
    }
    for (offset, _) in text.char_indices().skip(1) {
        let candidate = text[offset..].trim_start();
        if counter.as_ref()(candidate) <= budget {
            return candidate.to_string();
        }
    }
    String::new()
}

fn starts_with_whitespace(text: &str) -> bool {
    text.chars().next().is_some_and(char::is_whitespace)
}

fn ends_with_whitespace(text: &str) -> bool {
    text.chars().next_back().is_some_and(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_text(words: usize) -> String {
        (0..words)
            .map(|i| format!("word{i}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn pieces_respect_character_budget() {
        let splitter = TextSplitter::new(120, 20).expect("splitter");
        let text = long_text(200);
        let pieces = splitter.split(&text);
        assert!(pieces.len() > 1);
        for piece in &pieces {
            assert!(piece.chars().count() <= 120, "piece too long: {}", piece.len());
        }
    }

    #[test]
    fn adjacent_pieces_share_overlap() {
        let splitter = TextSplitter::new(60, 15).expect("splitter");
        let pieces = splitter.split(&long_text(60));
        for pair in pieces.windows(2) {
            let tail_word = pair[0]
                .split_whitespace()
                .last()
                .expect("previous piece has words");
            assert!(
                pair[1].contains(tail_word),
                "{:?} should repeat the tail of {:?}",
                pair[1],
                pair[0]
            );
        }
    }

    #[test]
    fn multibyte_text_is_measured_in_characters() {
        let splitter = TextSplitter::new(40, 5).expect("splitter");
        let text = "información migratoria según la ley ".repeat(20);
        for piece in splitter.split(&text) {
            assert!(piece.chars().count() <= 40);
        }
    }

    #[test]
    fn blank_input_yields_nothing() {
        let splitter = TextSplitter::new(10, 0).expect("splitter");
        assert!(splitter.split("   \n ").is_empty());
    }

    #[test]
    fn short_text_is_returned_whole() {
        let splitter = TextSplitter::new(100, 10).expect("splitter");
        assert_eq!(splitter.split("A short sentence."), vec!["A short sentence."]);
    }

    #[test]
    fn rejects_invalid_budgets() {
        assert!(matches!(
            TextSplitter::new(0, 0),
            Err(ChunkingError::InvalidChunkSize)
        ));
        assert!(matches!(
            TextSplitter::new(10, 10),
            Err(ChunkingError::OverlapTooLarge { .. })
        ));
    }
}
