use reqwest::StatusCode;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::Deserialize;

use crate::{
    error::LlmRequestError,
    llm::summarizer::{Completion, CompletionRequest, Summarizer},
    types::{FinishReason, TokenUsage},
};

/// Chat-completions client for the OpenAI API and compatible servers.
#[derive(Clone)]
pub struct OpenAIClient {
    client: ClientWithMiddleware,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for OpenAIClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl OpenAIClient {
    pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Self::build_client(0),
            api_key: api_key.into(),
            base_url: Self::DEFAULT_BASE_URL.into(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Retries transient failures (timeouts, 5xx, 429) with exponential
    /// backoff. With 0 retries every failure reaches the caller.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.client = Self::build_client(max_retries);
        self
    }

    fn build_client(max_retries: u32) -> ClientWithMiddleware {
        let builder = ClientBuilder::new(reqwest::Client::new());
        if max_retries == 0 {
            return builder.build();
        }

        let policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);
        builder
            .with(RetryTransientMiddleware::new_with_policy(policy))
            .build()
    }

    pub async fn send_completion_request(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, LlmRequestError> {
        let body = serde_json::json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "top_p": request.top_p,
            "frequency_penalty": request.frequency_penalty,
            "presence_penalty": request.presence_penalty,
            "messages": [
                {
                    "role": "system",
                    "content": request.system_persona
                },
                {
                    "role": "user",
                    "content": request.user_content
                }
            ]
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Failed to make http request"))
            .map_err(|e| LlmRequestError::Network {
                message: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let message = resp.text().await.unwrap_or_default();
            return Err(error_for_status(status, message));
        }

        resp.json::<CompletionResponse>()
            .await
            .map_err(|e| LlmRequestError::MalformedResponse {
                message: e.to_string(),
            })
    }
}

/// Maps a non-success HTTP status onto the request error taxonomy.
pub fn error_for_status(status: StatusCode, message: String) -> LlmRequestError {
    match status.as_u16() {
        401 | 403 => LlmRequestError::Authentication { message },
        429 => LlmRequestError::RateLimit { message },
        500..=599 => LlmRequestError::Network {
            message: format!("{status}: {message}"),
        },
        status => LlmRequestError::Api { status, message },
    }
}

#[derive(Debug, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub id: Option<String>,
    pub choices: Vec<CompletionChoice>,
    #[serde(default)]
    pub usage: Option<CompletionUsage>,
}

#[derive(Debug, Deserialize)]
pub struct CompletionChoice {
    pub index: u32,
    pub message: CompletionMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CompletionMessage {
    pub role: String,
    pub content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CompletionUsage {
    #[serde(default)]
    pub prompt_tokens: usize,
    #[serde(default)]
    pub completion_tokens: usize,
    #[serde(default)]
    pub prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PromptTokensDetails {
    #[serde(default)]
    pub cached_tokens: usize,
}

impl TryFrom<CompletionResponse> for Completion {
    type Error = LlmRequestError;

    fn try_from(response: CompletionResponse) -> Result<Self, Self::Error> {
        let usage = response.usage.unwrap_or_default();
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmRequestError::MalformedResponse {
                message: "No choices in response".into(),
            })?;
        let text = choice
            .message
            .content
            .ok_or_else(|| LlmRequestError::MalformedResponse {
                message: "No content in response".into(),
            })?;

        Ok(Completion {
            text,
            finish_reason: FinishReason::from_provider(choice.finish_reason.as_deref()),
            usage: TokenUsage {
                prompt: usage.prompt_tokens,
                completion: usage.completion_tokens,
                cached: usage
                    .prompt_tokens_details
                    .map(|d| d.cached_tokens)
                    .unwrap_or_default(),
            },
        })
    }
}

impl Summarizer for OpenAIClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmRequestError> {
        let response = self
            .send_completion_request(&request)
            .await
            .inspect_err(|e| tracing::error!(error = %e, pass = ?request.pass, "Failed to complete request"))?;

        Completion::try_from(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            error_for_status(StatusCode::UNAUTHORIZED, "bad key".into()),
            LlmRequestError::Authentication { .. }
        ));
        assert!(matches!(
            error_for_status(StatusCode::TOO_MANY_REQUESTS, "slow".into()),
            LlmRequestError::RateLimit { .. }
        ));
        assert!(matches!(
            error_for_status(StatusCode::BAD_GATEWAY, "".into()),
            LlmRequestError::Network { .. }
        ));
        assert_eq!(
            error_for_status(StatusCode::BAD_REQUEST, "nope".into()),
            LlmRequestError::Api {
                status: 400,
                message: "nope".into()
            }
        );
    }

    #[test]
    fn test_response_parsing_with_cached_tokens() {
        let raw = r#"{
            "id": "chatcmpl-1",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "A short summary."},
                "finish_reason": "length"
            }],
            "usage": {
                "prompt_tokens": 120,
                "completion_tokens": 30,
                "prompt_tokens_details": {"cached_tokens": 64}
            }
        }"#;
        let response: CompletionResponse = serde_json::from_str(raw).unwrap();
        let completion = Completion::try_from(response).unwrap();

        assert_eq!(completion.text, "A short summary.");
        assert_eq!(completion.finish_reason, FinishReason::Length);
        assert_eq!(
            completion.usage,
            TokenUsage {
                prompt: 120,
                completion: 30,
                cached: 64
            }
        );
    }

    #[test]
    fn test_response_without_choices_is_malformed() {
        let response: CompletionResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(matches!(
            Completion::try_from(response),
            Err(LlmRequestError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let client = OpenAIClient::new("sk-test").with_base_url("http://localhost:8080/v1/");
        assert_eq!(client.base_url, "http://localhost:8080/v1");
    }
}
