//! Bounded buffer of recent program output.

use std::collections::VecDeque;

/// Character budget used when the config does not set one.
pub const DEFAULT_OUTPUT_BUDGET_CHARS: usize = 20_000;

/// Keeps the most recent `budget` characters of output. Older text is dropped
/// silently, cutting the oldest chunk on a character boundary when needed.
#[derive(Debug)]
pub struct OutputBuffer {
    chunks: VecDeque<String>,
    chars: usize,
    budget: usize,
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_BUDGET_CHARS)
    }
}

impl OutputBuffer {
    pub fn new(budget: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            chars: 0,
            budget,
        }
    }

    pub fn push(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.chars += text.chars().count();
        self.chunks.push_back(text.to_string());
        self.trim();
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.chars = 0;
    }

    /// Number of characters currently held.
    pub fn len_chars(&self) -> usize {
        self.chars
    }

    pub fn contents(&self) -> String {
        self.chunks.iter().map(String::as_str).collect()
    }

    fn trim(&mut self) {
        while self.chars > self.budget {
            let excess = self.chars - self.budget;
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            let front_chars = front.chars().count();
            if front_chars <= excess {
                self.chars -= front_chars;
                self.chunks.pop_front();
                continue;
            }
            let cut = front
                .char_indices()
                .nth(excess)
                .map_or(front.len(), |(offset, _)| offset);
            front.drain(..cut);
            self.chars -= excess;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_everything_within_budget() {
        let mut buffer = OutputBuffer::new(10);
        buffer.push("abc");
        buffer.push("def");
        assert_eq!(buffer.contents(), "abcdef");
        assert_eq!(buffer.len_chars(), 6);
    }

    #[test]
    fn drops_oldest_output_first() {
        let mut buffer = OutputBuffer::new(5);
        buffer.push("abc");
        buffer.push("defg");
        assert_eq!(buffer.contents(), "cdefg");
        buffer.push("hijklmn");
        assert_eq!(buffer.contents(), "jklmn");
        assert_eq!(buffer.len_chars(), 5);
    }

    #[test]
    fn cuts_on_char_boundaries() {
        let mut buffer = OutputBuffer::new(3);
        buffer.push("αβγδ");
        assert_eq!(buffer.contents(), "βγδ");
    }

    #[test]
    fn clear_resets_length() {
        let mut buffer = OutputBuffer::new(3);
        buffer.push("xyz");
        buffer.clear();
        assert_eq!(buffer.contents(), "");
        assert_eq!(buffer.len_chars(), 0);
    }
}
