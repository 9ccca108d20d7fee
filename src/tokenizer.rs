//! Tokenizer selection.
//!
//! `chunking.tokenizer` picks how chunk size and overlap are counted. The
//! `hf` option loads a HuggingFace `tokenizer.json` and needs the
//! `hf-tokenizer` feature.

use anyhow::{bail, Result};
use std::sync::Arc;

use ragloom_core::tokenizer::{CharTokenizer, HeuristicTokenizer, Tokenizer, WordTokenizer};

use crate::config::ChunkingConfig;

pub fn build_tokenizer(config: &ChunkingConfig) -> Result<Arc<dyn Tokenizer>> {
    match config.tokenizer.as_str() {
        "heuristic" => Ok(Arc::new(HeuristicTokenizer::default())),
        "chars" => Ok(Arc::new(CharTokenizer)),
        "words" => Ok(Arc::new(WordTokenizer)),
        "hf" => {
            let Some(path) = config.tokenizer_path.as_deref() else {
                bail!("chunking.tokenizer_path must be set when tokenizer is 'hf'");
            };
            hf::load(path)
        }
        other => bail!("Unknown tokenizer: {}", other),
    }
}

#[cfg(feature = "hf-tokenizer")]
mod hf {
    use anyhow::{anyhow, Result};
    use std::path::Path;
    use std::sync::Arc;
    use tracing::warn;

    use ragloom_core::tokenizer::{HeuristicTokenizer, Tokenizer};

    /// Token starts taken from a HuggingFace tokenizer's byte offsets.
    pub struct HfTokenizer {
        inner: tokenizers::Tokenizer,
    }

    impl Tokenizer for HfTokenizer {
        fn name(&self) -> &str {
            "hf"
        }

        fn token_starts(&self, text: &str) -> Vec<usize> {
            let encoding = match self.inner.encode(text, false) {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "tokenizer failed, falling back to heuristic");
                    return HeuristicTokenizer::default().token_starts(text);
                }
            };
            let mut starts: Vec<usize> = Vec::with_capacity(encoding.len());
            for &(start, _) in encoding.get_offsets() {
                if start < text.len()
                    && text.is_char_boundary(start)
                    && starts.last().map_or(true, |&last| start > last)
                {
                    starts.push(start);
                }
            }
            match starts.first() {
                Some(&0) => {}
                Some(_) => starts.insert(0, 0),
                None if !text.is_empty() => starts.push(0),
                None => {}
            }
            starts
        }
    }

    pub fn load(path: &Path) -> Result<Arc<dyn Tokenizer>> {
        let inner = tokenizers::Tokenizer::from_file(path)
            .map_err(|e| anyhow!("Failed to load tokenizer {}: {}", path.display(), e))?;
        Ok(Arc::new(HfTokenizer { inner }))
    }
}

#[cfg(not(feature = "hf-tokenizer"))]
mod hf {
    use anyhow::{bail, Result};
    use std::path::Path;
    use std::sync::Arc;

    use ragloom_core::tokenizer::Tokenizer;

    pub fn load(_path: &Path) -> Result<Arc<dyn Tokenizer>> {
        bail!("tokenizer 'hf' requires building with the 'hf-tokenizer' feature")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builds_named_tokenizers() {
        for name in ["heuristic", "chars", "words"] {
            let config = ChunkingConfig {
                tokenizer: name.to_string(),
                ..ChunkingConfig::default()
            };
            assert_eq!(build_tokenizer(&config).unwrap().name(), name);
        }
    }

    #[test]
    fn test_hf_without_path_fails() {
        let config = ChunkingConfig {
            tokenizer: "hf".to_string(),
            ..ChunkingConfig::default()
        };
        assert!(build_tokenizer(&config).is_err());
    }
}
