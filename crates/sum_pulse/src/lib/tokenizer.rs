//! Model-specific token counting.

use another_tiktoken_rs::CoreBPE;

use crate::error::TokenizerError;

pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Vec<usize>;

    fn decode(&self, tokens: &[usize]) -> Result<String, TokenizerError>;

    fn count_tokens(&self, text: &str) -> usize {
        self.encode(text).len()
    }
}

impl<T: Tokenizer + ?Sized> Tokenizer for &T {
    fn encode(&self, text: &str) -> Vec<usize> {
        (**self).encode(text)
    }

    fn decode(&self, tokens: &[usize]) -> Result<String, TokenizerError> {
        (**self).decode(tokens)
    }

    fn count_tokens(&self, text: &str) -> usize {
        (**self).count_tokens(text)
    }
}

/// BPE tokenizer matching an OpenAI model.
pub struct TiktokenTokenizer {
    model: String,
    bpe: CoreBPE,
}

impl std::fmt::Debug for TiktokenTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiktokenTokenizer")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl TiktokenTokenizer {
    /// Resolves the encoding for `model`, falling back to `cl100k_base` for
    /// model names the encoding table does not know yet.
    pub fn for_model(model: &str) -> Result<Self, TokenizerError> {
        let bpe = match another_tiktoken_rs::get_bpe_from_model(model) {
            Ok(bpe) => bpe,
            Err(e) => {
                tracing::debug!(model, error = %e, "No dedicated encoding, using cl100k_base");
                another_tiktoken_rs::cl100k_base().map_err(|e| TokenizerError::UnsupportedModel {
                    model: model.into(),
                    message: e.to_string(),
                })?
            }
        };

        Ok(Self {
            model: model.into(),
            bpe,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn encode(&self, text: &str) -> Vec<usize> {
        self.bpe.encode_with_special_tokens(text)
    }

    fn decode(&self, tokens: &[usize]) -> Result<String, TokenizerError> {
        self.bpe
            .decode(tokens.to_vec())
            .map_err(|e| TokenizerError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let tokenizer = TiktokenTokenizer::for_model("gpt-4").unwrap();
        let text = "The quick brown fox jumps over the lazy dog.";
        let tokens = tokenizer.encode(text);
        assert!(!tokens.is_empty());
        assert_eq!(tokenizer.count_tokens(text), tokens.len());
        assert_eq!(tokenizer.decode(&tokens).unwrap(), text);
    }

    #[test]
    fn test_unknown_model_falls_back() {
        let tokenizer = TiktokenTokenizer::for_model("some-future-model").unwrap();
        assert_eq!(tokenizer.model(), "some-future-model");
        assert!(tokenizer.count_tokens("hello world") > 0);
    }
}
