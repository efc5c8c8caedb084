use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use sum_pulse::{
    types::{FinishReason, TokenUsage},
    Completion, CompletionRequest, LlmRequestError, Pass, Summarizer,
};

/// Scripted completion backend keyed by request content.
///
/// Unscripted content is answered with `summary of <content>`.
#[derive(Clone, Default)]
pub struct MockSummarizer {
    default_response: Option<String>,
    responses: HashMap<String, String>,
    latencies: HashMap<String, Duration>,
    finish_reasons: HashMap<String, FinishReason>,
    /// content -> (error, remaining failures)
    failures: Arc<Mutex<HashMap<String, (LlmRequestError, usize)>>>,
    pub calls: Arc<Mutex<Vec<CompletionRequest>>>,
    pub in_flight: Arc<AtomicUsize>,
    pub max_in_flight: Arc<AtomicUsize>,
}

impl MockSummarizer {
    pub fn new(summary: &str) -> Self {
        Self {
            default_response: Some(summary.to_string()),
            ..Default::default()
        }
    }

    pub fn echo() -> Self {
        Self::default()
    }

    pub fn respond(mut self, content: &str, response: &str) -> Self {
        self.responses.insert(content.into(), response.into());
        self
    }

    pub fn delay(mut self, content: &str, latency: Duration) -> Self {
        self.latencies.insert(content.into(), latency);
        self
    }

    pub fn finish(mut self, content: &str, reason: FinishReason) -> Self {
        self.finish_reasons.insert(content.into(), reason);
        self
    }

    pub fn fail(self, content: &str, error: LlmRequestError) -> Self {
        self.fail_times(content, error, usize::MAX)
    }

    pub fn fail_times(self, content: &str, error: LlmRequestError, times: usize) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(content.into(), (error, times));
        self
    }

    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, pass: Pass) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.pass == pass)
            .count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn scripted_failure(&self, content: &str) -> Option<LlmRequestError> {
        let mut failures = self.failures.lock().unwrap();
        let (error, remaining) = failures.get_mut(content)?;
        if *remaining == 0 {
            return None;
        }
        *remaining = remaining.saturating_sub(1);
        Some(error.clone())
    }
}

impl Summarizer for MockSummarizer {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmRequestError> {
        self.calls.lock().unwrap().push(request.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let latency = self.latencies.get(&request.user_content).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(error) = self.scripted_failure(&request.user_content) {
            return Err(error);
        }

        let text = self
            .responses
            .get(&request.user_content)
            .cloned()
            .or_else(|| self.default_response.clone())
            .unwrap_or_else(|| format!("summary of {}", request.user_content));
        let finish_reason = self
            .finish_reasons
            .get(&request.user_content)
            .copied()
            .unwrap_or(FinishReason::Stop);
        let usage = TokenUsage::new(
            request.user_content.split_whitespace().count(),
            text.split_whitespace().count(),
        );

        Ok(Completion {
            text,
            finish_reason,
            usage,
        })
    }
}
