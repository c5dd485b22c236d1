//! Token counting.

use tiktoken_rs::{cl100k_base, CoreBPE};
use tracing::warn;

/// Counts language-model tokens in a piece of text. Must be pure.
pub trait TokenCounter: Send + Sync + 'static {
    fn count_tokens(&self, text: &str) -> u64;
}

/// Exact counts using the `cl100k_base` encoding.
pub struct Cl100kTokenCounter {
    bpe: CoreBPE,
}

impl Cl100kTokenCounter {
    /// Load the encoding.
    pub fn new() -> Result<Self, String> {
        let bpe = cl100k_base().map_err(|e| e.to_string())?;
        Ok(Self { bpe })
    }
}

impl TokenCounter for Cl100kTokenCounter {
    fn count_tokens(&self, text: &str) -> u64 {
        self.bpe.encode_with_special_tokens(text).len() as u64
    }
}

/// Rough counts (one token per four characters) for when no encoding is available.
#[derive(Debug, Default, Clone, Copy)]
pub struct EstimatingTokenCounter;

impl TokenCounter for EstimatingTokenCounter {
    fn count_tokens(&self, text: &str) -> u64 {
        if text.is_empty() {
            return 0;
        }
        let chars = text.chars().count() as u64;
        (chars / 4).max(1)
    }
}

/// The exact counter, or the estimating one if the encoding fails to load.
pub fn default_counter() -> Box<dyn TokenCounter> {
    match Cl100kTokenCounter::new() {
        Ok(counter) => Box::new(counter),
        Err(e) => {
            warn!(error = %e, "Failed to load cl100k_base, estimating token counts");
            Box::new(EstimatingTokenCounter)
        }
    }
}
