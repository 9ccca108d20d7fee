//! Token units used to measure chunk size and overlap.
//!
//! A [`Tokenizer`] reports the byte offsets at which tokens start. Token
//! `i` spans from its start up to the start of token `i + 1` (the last
//! token runs to the end of the text), so any token window maps onto an
//! exact byte range of the source and windows can be sliced without
//! losing or duplicating characters.
//!
//! The default [`HeuristicTokenizer`] uses the 4 chars ≈ 1 token
//! approximation; callers that embed with a real model should plug in a
//! tokenizer matching that model.

/// Splits text into token spans.
pub trait Tokenizer: Send + Sync {
    /// Short identifier, used in logs and stats.
    fn name(&self) -> &str;

    /// Byte offsets of every token start, strictly increasing.
    ///
    /// The first offset is always `0` for non-empty text. Every offset
    /// must lie on a UTF-8 char boundary.
    fn token_starts(&self, text: &str) -> Vec<usize>;

    /// Number of tokens in `text`.
    fn count(&self, text: &str) -> usize {
        self.token_starts(text).len()
    }
}

/// One token per Unicode scalar value.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharTokenizer;

impl Tokenizer for CharTokenizer {
    fn name(&self) -> &str {
        "chars"
    }

    fn token_starts(&self, text: &str) -> Vec<usize> {
        text.char_indices().map(|(i, _)| i).collect()
    }

    fn count(&self, text: &str) -> usize {
        text.chars().count()
    }
}

/// One token per whitespace-delimited word.
///
/// Leading whitespace belongs to the first token; whitespace following a
/// word belongs to that word.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordTokenizer;

impl Tokenizer for WordTokenizer {
    fn name(&self) -> &str {
        "words"
    }

    fn token_starts(&self, text: &str) -> Vec<usize> {
        let mut starts = Vec::new();
        let mut prev_ws = true;
        for (i, ch) in text.char_indices() {
            let ws = ch.is_whitespace();
            if !ws && prev_ws {
                starts.push(i);
            }
            prev_ws = ws;
        }
        match starts.first() {
            Some(&0) => {}
            Some(_) => starts[0] = 0,
            None if !text.is_empty() => starts.push(0),
            None => {}
        }
        starts
    }
}

/// Fixed-width approximation: every `chars_per_token` chars form a token.
#[derive(Debug, Clone, Copy)]
pub struct HeuristicTokenizer {
    chars_per_token: usize,
}

impl HeuristicTokenizer {
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }
}

impl Default for HeuristicTokenizer {
    fn default() -> Self {
        Self::new(4)
    }
}

impl Tokenizer for HeuristicTokenizer {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn token_starts(&self, text: &str) -> Vec<usize> {
        text.char_indices()
            .enumerate()
            .filter(|(n, _)| n % self.chars_per_token == 0)
            .map(|(_, (i, _))| i)
            .collect()
    }
}
