//! Splits the memory document into overlapping chunks for embedding.
//!
//! Sizes are counted in characters. Cuts prefer a line break, then any
//! whitespace, within the last stretch of each window, and never land
//! inside a UTF-8 sequence.

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

/// How far back from a window's end to look for a natural break.
const BOUNDARY_SEARCH: usize = 100;

#[derive(Debug, Clone)]
pub struct TextChunker {
    chunk_size: usize,
    overlap: usize,
}

impl Default for TextChunker {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl TextChunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            overlap,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Split `text` into trimmed, non-empty chunks in document order.
    pub fn split(&self, text: &str) -> Vec<String> {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }

        let chars: Vec<(usize, char)> = text.char_indices().collect();
        let total = chars.len();
        let byte_at = |index: usize| chars.get(index).map_or(text.len(), |(byte, _)| *byte);

        if total <= self.chunk_size {
            return vec![text.to_owned()];
        }

        let mut chunks = Vec::new();
        let mut start = 0;
        loop {
            let mut end = (start + self.chunk_size).min(total);
            if end < total {
                end = self.break_before(&chars, start, end);
            }

            let piece = text[byte_at(start)..byte_at(end)].trim();
            if !piece.is_empty() {
                chunks.push(piece.to_owned());
            }
            if end >= total {
                break;
            }

            let mut next = end.saturating_sub(self.overlap).max(start + 1);
            // Start the overlap on a word.
            if !chars[next - 1].1.is_whitespace()
                && let Some(offset) = chars[next..end].iter().position(|(_, c)| c.is_whitespace())
            {
                next += offset + 1;
            }
            start = next.min(end);
        }
        chunks
    }

    /// Char index just after the best break in `(start, end]`.
    fn break_before(&self, chars: &[(usize, char)], start: usize, end: usize) -> usize {
        let floor = end.saturating_sub(BOUNDARY_SEARCH).max(start + 1);
        let window = &chars[floor..end];
        let newline = window.iter().rposition(|(_, c)| *c == '\n');
        let space = window.iter().rposition(|(_, c)| c.is_whitespace());
        match newline.or(space) {
            Some(offset) => floor + offset + 1,
            None => end,
        }
    }
}
