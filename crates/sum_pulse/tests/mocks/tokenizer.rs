use sum_pulse::{tokenizer::Tokenizer, TokenizerError};

/// One token per whitespace-separated word.
#[derive(Clone, Copy, Default)]
pub struct MockTokenizer;

impl Tokenizer for MockTokenizer {
    fn encode(&self, text: &str) -> Vec<usize> {
        text.split_whitespace().map(str::len).collect()
    }

    fn decode(&self, tokens: &[usize]) -> Result<String, TokenizerError> {
        Ok(tokens.iter().map(|len| "w".repeat(*len)).collect::<Vec<_>>().join(" "))
    }
}
