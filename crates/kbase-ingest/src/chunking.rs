//! Text chunking with char-accurate locators.
//!
//! Windows of at most `chunk_size` chars, cut at the strongest boundary in
//! the back half of the window (paragraph, line, sentence, word), with
//! `chunk_overlap` chars carried into the next window.

/// Default window in chars.
pub const DEFAULT_CHUNK_SIZE: usize = 512;
/// Default overlap between consecutive chunks.
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

/// A chunk with its position in the source text. Offsets count chars, not bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub text: String,
    pub chunk_index: usize,
    pub char_start: usize,
    pub char_end: usize,
}

/// Boundary-aware chunker.
pub struct RecursiveChunker {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    separators: Vec<&'static str>,
}

impl RecursiveChunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(2);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size / 4),
            separators: vec!["\n\n", "\n", "。", "！", "？", ". ", "! ", "? ", "；", "; ", " "],
        }
    }

    pub fn chunk(&self, text: &str) -> Vec<TextChunk> {
        let chars: Vec<char> = text.chars().collect();
        let n = chars.len();
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < n {
            while start < n && chars[start].is_whitespace() {
                start += 1;
            }
            if start >= n {
                break;
            }

            let hard_end = (start + self.chunk_size).min(n);
            let end = if hard_end == n {
                n
            } else {
                self.find_break(&chars, start, hard_end)
            };

            let mut trimmed_end = end;
            while trimmed_end > start && chars[trimmed_end - 1].is_whitespace() {
                trimmed_end -= 1;
            }
            chunks.push(TextChunk {
                text: chars[start..trimmed_end].iter().collect(),
                chunk_index: chunks.len(),
                char_start: start,
                char_end: trimmed_end,
            });

            if end >= n {
                break;
            }
            let next = end.saturating_sub(self.chunk_overlap);
            start = if next > start { next } else { end };
        }
        chunks
    }

    /// Position just past the strongest separator in `[start + size/2, hard_end]`.
    fn find_break(&self, chars: &[char], start: usize, hard_end: usize) -> usize {
        let min_end = start + self.chunk_size / 2;
        for sep in &self.separators {
            let sep: Vec<char> = sep.chars().collect();
            let lower = min_end.max(start + sep.len());
            let mut end = hard_end;
            while end >= lower {
                if chars[end - sep.len()..end] == sep[..] {
                    return end;
                }
                end -= 1;
            }
        }
        hard_end
    }
}

impl Default for RecursiveChunker {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
    }
}
