use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::{
    config::RunConfig,
    error::LlmRequestError,
    types::{FinishReason, TokenUsage},
};

/// Which phase of a run a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pass {
    /// One request per chunk.
    Recursive,
    /// The reduction over every chunk summary.
    Final,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub pass: Pass,
    pub system_persona: String,
    pub user_content: String,
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
}

impl CompletionRequest {
    pub fn for_pass(config: &RunConfig, pass: Pass, user_content: impl Into<String>) -> Self {
        let (system_persona, max_tokens) = match pass {
            Pass::Recursive => (&config.persona_rec, config.max_tokens_rec),
            Pass::Final => (&config.persona_final, config.max_tokens_final),
        };

        Self {
            pass,
            system_persona: system_persona.clone(),
            user_content: user_content.into(),
            model: config.model.clone(),
            max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
            frequency_penalty: config.frequency_penalty,
            presence_penalty: config.presence_penalty,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub finish_reason: FinishReason,
    pub usage: TokenUsage,
}

/// An LLM completion backend.
pub trait Summarizer {
    fn complete(
        &self,
        request: CompletionRequest,
    ) -> impl Future<Output = Result<Completion, LlmRequestError>> + Send;
}

impl<T: Summarizer + Send + Sync> Summarizer for std::sync::Arc<T> {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmRequestError> {
        (**self).complete(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_picks_persona_and_limit_per_pass() {
        let config = RunConfig {
            persona_rec: "chunk persona".into(),
            persona_final: "final persona".into(),
            max_tokens_rec: 111,
            max_tokens_final: 222,
            ..Default::default()
        };

        let rec = CompletionRequest::for_pass(&config, Pass::Recursive, "text");
        assert_eq!(rec.system_persona, "chunk persona");
        assert_eq!(rec.max_tokens, 111);
        assert_eq!(rec.user_content, "text");

        let fin = CompletionRequest::for_pass(&config, Pass::Final, "A B");
        assert_eq!(fin.system_persona, "final persona");
        assert_eq!(fin.max_tokens, 222);
        assert_eq!(fin.model, config.model);
    }
}
