use std::{
    fmt,
    ops::{Add, AddAssign},
};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    error::{LlmRequestError, ReductionPassError, SegmentationError},
    estimator::round_price,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LanguageFamily {
    Latin,
    EastAsian,
    Other,
}

/// Unit a chunk's `size` is measured in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeUnit {
    Words,
    Characters,
    Tokens,
}

/// One input document as handed over by a file reader or transcript source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub filename: String,
    pub text: String,
}

impl Document {
    pub fn new(filename: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            text: text.into(),
        }
    }

    /// Rejects payloads that are not UTF-8 text.
    pub fn from_bytes(filename: impl Into<String>, bytes: Vec<u8>) -> Result<Self, SegmentationError> {
        let text = String::from_utf8(bytes).map_err(|e| SegmentationError::InvalidUtf8 {
            message: e.utf8_error().to_string(),
        })?;
        if text.contains('\0') {
            return Err(SegmentationError::BinaryContent);
        }
        Ok(Self::new(filename, text))
    }
}

/// A bounded slice of one document, sent to the LLM as a single request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    id: usize,
    source_id: usize,
    content: String,
    size: usize,
    unit: SizeUnit,
    language_family: LanguageFamily,
}

impl Chunk {
    pub fn new(
        id: usize,
        source_id: usize,
        content: impl Into<String>,
        size: usize,
        unit: SizeUnit,
        language_family: LanguageFamily,
    ) -> Self {
        Self {
            id,
            source_id,
            content: content.into(),
            size,
            unit,
            language_family,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn source_id(&self) -> usize {
        self.source_id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn unit(&self) -> SizeUnit {
        self.unit
    }

    pub fn language_family(&self) -> LanguageFamily {
        self.language_family
    }

    pub(crate) fn renumbered(self, id: usize) -> Self {
        Self { id, ..self }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    Error,
}

impl FinishReason {
    /// Maps an OpenAI-style `finish_reason` string. Only `length` marks a
    /// truncated generation; other terminal reasons count as a normal stop.
    pub fn from_provider(reason: Option<&str>) -> Self {
        match reason {
            Some("length") => Self::Length,
            Some("error") => Self::Error,
            _ => Self::Stop,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt: usize,
    pub completion: usize,
    pub cached: usize,
}

impl TokenUsage {
    pub fn new(prompt: usize, completion: usize) -> Self {
        Self {
            prompt,
            completion,
            cached: 0,
        }
    }

    pub fn total(&self) -> usize {
        self.prompt + self.completion
    }
}

impl Add for TokenUsage {
    type Output = TokenUsage;

    fn add(self, rhs: Self) -> Self::Output {
        TokenUsage {
            prompt: self.prompt + rhs.prompt,
            completion: self.completion + rhs.completion,
            cached: self.cached + rhs.cached,
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// The LLM's answer for one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkSummary {
    pub chunk_id: usize,
    pub source_id: usize,
    pub content: String,
    pub finish_reason: FinishReason,
    pub token_usage: TokenUsage,
    pub price: f64,
}

impl ChunkSummary {
    pub fn is_truncated(&self) -> bool {
        self.finish_reason == FinishReason::Length
    }
}

/// Output of the reduction pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalSummary {
    pub content: String,
    pub finish_reason: FinishReason,
    pub token_usage: TokenUsage,
    pub price: f64,
}

impl FinalSummary {
    pub fn is_truncated(&self) -> bool {
        self.finish_reason == FinishReason::Length
    }
}

/// A per-chunk problem: either a failed request or a truncation warning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkError {
    pub chunk_id: usize,
    pub source_id: usize,
    pub error: LlmRequestError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub u64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Partial,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub run_id: Option<RunId>,
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    pub fn is_done(&self) -> bool {
        self.completed >= self.total
    }
}

/// Outcome of one summarization run.
///
/// `chunk_summaries` and `failures` are always ordered by `chunk_id`,
/// never by completion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: RunId,
    pub status: RunStatus,
    pub chunk_summaries: Vec<ChunkSummary>,
    pub failures: Vec<ChunkError>,
    pub final_summary: Option<FinalSummary>,
    pub final_error: Option<ReductionPassError>,
    pub total_price: f64,
    pub total_tokens: usize,
}

impl RunResult {
    pub(crate) fn from_parts(
        run_id: RunId,
        chunk_summaries: Vec<ChunkSummary>,
        failures: Vec<ChunkError>,
        final_summary: Option<FinalSummary>,
        final_error: Option<ReductionPassError>,
    ) -> Self {
        let chunk_summaries = chunk_summaries
            .into_iter()
            .sorted_by_key(|s| s.chunk_id)
            .collect::<Vec<_>>();
        let failures = failures
            .into_iter()
            .sorted_by_key(|f| f.chunk_id)
            .collect::<Vec<_>>();

        let status = match (chunk_summaries.is_empty(), failures.is_empty()) {
            (_, true) => RunStatus::Completed,
            (true, false) => RunStatus::Failed,
            (false, false) => RunStatus::Partial,
        };

        let total_tokens = chunk_summaries
            .iter()
            .map(|s| s.token_usage.total())
            .chain(final_summary.iter().map(|f| f.token_usage.total()))
            .sum();
        let total_price = round_price(
            chunk_summaries
                .iter()
                .map(|s| s.price)
                .chain(final_summary.iter().map(|f| f.price))
                .sum(),
        );

        Self {
            run_id,
            status,
            chunk_summaries,
            failures,
            final_summary,
            final_error,
            total_price,
            total_tokens,
        }
    }

    /// Truncation warnings for chunks whose output hit `max_tokens`.
    pub fn warnings(&self) -> Vec<ChunkError> {
        self.chunk_summaries
            .iter()
            .filter(|s| s.is_truncated())
            .map(|s| ChunkError {
                chunk_id: s.chunk_id,
                source_id: s.source_id,
                error: LlmRequestError::Truncated,
            })
            .collect()
    }

    pub fn failed_chunk_ids(&self) -> Vec<usize> {
        self.failures.iter().map(|f| f.chunk_id).collect()
    }

    /// Builds the result that supersedes this one once a failed chunk has
    /// been retried successfully. The final summary is carried over as is.
    pub fn with_retry(self, summary: ChunkSummary) -> Self {
        let Self {
            run_id,
            mut chunk_summaries,
            failures,
            final_summary,
            final_error,
            ..
        } = self;

        let failures = failures
            .into_iter()
            .filter(|f| f.chunk_id != summary.chunk_id)
            .collect();
        chunk_summaries.retain(|s| s.chunk_id != summary.chunk_id);
        chunk_summaries.push(summary);

        Self::from_parts(run_id, chunk_summaries, failures, final_summary, final_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(chunk_id: usize, text: &str, reason: FinishReason) -> ChunkSummary {
        ChunkSummary {
            chunk_id,
            source_id: 0,
            content: text.into(),
            finish_reason: reason,
            token_usage: TokenUsage::new(10, 5),
            price: 0.000_001,
        }
    }

    fn failure(chunk_id: usize) -> ChunkError {
        ChunkError {
            chunk_id,
            source_id: 0,
            error: LlmRequestError::RateLimit {
                message: "429".into(),
            },
        }
    }

    #[test]
    fn test_from_parts_sorts_by_chunk_id_and_totals() {
        let result = RunResult::from_parts(
            RunId(1),
            vec![
                summary(2, "c", FinishReason::Stop),
                summary(0, "a", FinishReason::Stop),
                summary(1, "b", FinishReason::Stop),
            ],
            vec![],
            None,
            None,
        );

        let ids = result.chunk_summaries.iter().map(|s| s.chunk_id).collect::<Vec<_>>();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.total_tokens, 45);
        assert_eq!(result.total_price, 0.000_003);
    }

    #[test]
    fn test_status_reflects_failures() {
        let partial = RunResult::from_parts(
            RunId(1),
            vec![summary(0, "a", FinishReason::Stop)],
            vec![failure(1)],
            None,
            None,
        );
        assert_eq!(partial.status, RunStatus::Partial);
        assert_eq!(partial.failed_chunk_ids(), vec![1]);

        let failed = RunResult::from_parts(RunId(1), vec![], vec![failure(0)], None, None);
        assert_eq!(failed.status, RunStatus::Failed);
    }

    #[test]
    fn test_warnings_flag_truncated_chunks_only() {
        let result = RunResult::from_parts(
            RunId(1),
            vec![
                summary(0, "a", FinishReason::Stop),
                summary(1, "b", FinishReason::Length),
            ],
            vec![],
            None,
            None,
        );
        let warnings = result.warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].chunk_id, 1);
        assert_eq!(warnings[0].error, LlmRequestError::Truncated);
    }

    #[test]
    fn test_with_retry_replaces_failure_and_keeps_order() {
        let result = RunResult::from_parts(
            RunId(4),
            vec![summary(0, "a", FinishReason::Stop), summary(2, "c", FinishReason::Stop)],
            vec![failure(1)],
            None,
            None,
        );

        let retried = result.with_retry(summary(1, "b", FinishReason::Stop));
        assert_eq!(retried.status, RunStatus::Completed);
        assert!(retried.failures.is_empty());
        let texts = retried
            .chunk_summaries
            .iter()
            .map(|s| s.content.as_str())
            .collect::<Vec<_>>();
        assert_eq!(texts, vec!["a", "b", "c"]);
        assert_eq!(retried.run_id, RunId(4));
    }

    #[test]
    fn test_document_from_bytes_rejects_binary() {
        assert!(matches!(
            Document::from_bytes("a.bin", vec![0xff, 0xfe, 0x00]),
            Err(SegmentationError::InvalidUtf8 { .. })
        ));
        assert_eq!(
            Document::from_bytes("a.bin", b"abc\0def".to_vec()),
            Err(SegmentationError::BinaryContent)
        );
        let doc = Document::from_bytes("a.txt", b"hello".to_vec()).unwrap();
        assert_eq!(doc.text, "hello");
    }

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(FinishReason::from_provider(Some("length")), FinishReason::Length);
        assert_eq!(FinishReason::from_provider(Some("stop")), FinishReason::Stop);
        assert_eq!(FinishReason::from_provider(Some("content_filter")), FinishReason::Stop);
        assert_eq!(FinishReason::from_provider(None), FinishReason::Stop);
    }
}
