pub mod assembler;
pub mod cache;
pub mod config;
mod error;
pub mod estimator;
mod llm;
mod orchestrator;
mod processor;
pub mod segmenter;
pub mod tokenizer;
pub mod tracing;
pub mod types;

pub use error::{
    BudgetExceeded, BudgetPhase, ConfigError, LlmRequestError, PipelineError, ReductionPassError,
    RunError, SegmentationError, TokenizerError,
};
pub use llm::openai;
pub use llm::summarizer::{Completion, CompletionRequest, Pass, Summarizer};
pub use orchestrator::{builder::OrchestratorBuilder, ledger::RunLedger, SummarizationOrchestrator};
pub use processor::{builder::SummaryProcessorBuilder, Preflight, RunReport, SummaryProcessor};
