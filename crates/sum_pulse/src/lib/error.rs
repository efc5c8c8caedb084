use std::{fmt, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::{segmenter::DocumentFailure, types::RunId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SegmentationError {
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    #[error("input looks like binary data, not text")]
    BinaryContent,
    #[error("input is not valid UTF-8: {message}")]
    InvalidUtf8 { message: String },
    #[error("token-based segmentation requires a tokenizer")]
    MissingTokenizer,
}

/// Failure of a single LLM request.
///
/// Serializable so failed chunks survive in a cached [`crate::types::RunResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LlmRequestError {
    #[error("authentication failed: {message}")]
    Authentication { message: String },
    #[error("rate limited: {message}")]
    RateLimit { message: String },
    #[error("network error: {message}")]
    Network { message: String },
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("malformed response: {message}")]
    MalformedResponse { message: String },
    #[error("output cut off at max_tokens")]
    Truncated,
    #[error("summarization task failed: {message}")]
    Internal { message: String },
}

impl LlmRequestError {
    /// Whether re-issuing the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimit { .. } | Self::Network { .. })
    }

    /// Whether the error invalidates every request of the run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetPhase {
    Recursive,
    Final,
}

impl fmt::Display for BudgetPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recursive => f.write_str("recursive"),
            Self::Final => f.write_str("final"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum BudgetExceeded {
    #[error(
        "recursive pass: chunk {chunk_id} needs {prompt_tokens} prompt + {max_tokens} completion \
         tokens, exceeding the {context_window}-token context window"
    )]
    Recursive {
        chunk_id: usize,
        prompt_tokens: usize,
        max_tokens: usize,
        context_window: usize,
    },
    #[error(
        "final pass: {chunk_count} chunks x {max_tokens_rec} + {max_tokens_final} = {total} \
         tokens, exceeding the {context_window}-token context window"
    )]
    Final {
        chunk_count: usize,
        max_tokens_rec: usize,
        max_tokens_final: usize,
        total: usize,
        context_window: usize,
    },
}

impl BudgetExceeded {
    pub fn phase(&self) -> BudgetPhase {
        match self {
            Self::Recursive { .. } => BudgetPhase::Recursive,
            Self::Final { .. } => BudgetPhase::Final,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReductionPassError {
    #[error("final summary skipped: chunks {failed:?} have no summary")]
    IncompleteChunks { failed: Vec<usize> },
    #[error("final summary request failed: {error}")]
    Request { error: LlmRequestError },
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("run {run_id} aborted: authentication failed on chunk {chunk_id}: {message}")]
    Authentication {
        run_id: RunId,
        chunk_id: usize,
        message: String,
    },
    #[error("run {run_id} was cancelled")]
    Cancelled { run_id: RunId },
}

#[derive(Debug, thiserror::Error)]
pub enum TokenizerError {
    #[error("no tokenizer available for model `{model}`: {message}")]
    UnsupportedModel { model: String, message: String },
    #[error("failed to decode tokens: {0}")]
    Decode(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("unknown model `{0}`")]
    UnknownModel(String),
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("none of the {} documents could be segmented", .0.len())]
    Segmentation(Vec<DocumentFailure>),
    #[error("run blocked before dispatch: {0}")]
    Budget(#[from] BudgetExceeded),
    #[error(transparent)]
    Run(#[from] RunError),
}
