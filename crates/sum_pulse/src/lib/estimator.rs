//! Token and cost pre-flight.
//!
//! Everything here runs before a single request is sent: the estimate is
//! shown to the user and the budget check blocks runs that a model's
//! context window cannot hold.

use serde::Serialize;

use crate::{
    config::{ModelPricing, RunConfig},
    error::BudgetExceeded,
    tokenizer::Tokenizer,
    types::{Chunk, TokenUsage},
};

const PRICE_SCALE: f64 = 1_000_000.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenEstimate {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// Rounds a dollar amount to 6 decimal places.
pub fn round_price(price: f64) -> f64 {
    (price * PRICE_SCALE).round() / PRICE_SCALE
}

/// Predicts the tokens a run will consume, assuming every request uses its
/// full `max_tokens` allowance.
pub fn estimate<T: Tokenizer + ?Sized>(
    chunks: &[Chunk],
    config: &RunConfig,
    tokenizer: &T,
) -> TokenEstimate {
    let prompt_tokens = chunks
        .iter()
        .map(|c| tokenizer.count_tokens(c.content()))
        .sum::<usize>();

    let mut completion_tokens = chunks.len() * config.max_tokens_rec;
    if config.final_summary && !chunks.is_empty() {
        completion_tokens += config.max_tokens_final;
    }

    TokenEstimate {
        prompt_tokens,
        completion_tokens,
        total_tokens: prompt_tokens + completion_tokens,
    }
}

/// Checks both passes against `context_window`.
///
/// The recursive pass is bounded by its largest chunk; the final pass by the
/// concatenation of every chunk summary plus its own output allowance.
pub fn check_budget<T: Tokenizer + ?Sized>(
    chunks: &[Chunk],
    config: &RunConfig,
    tokenizer: &T,
    context_window: usize,
) -> Result<(), BudgetExceeded> {
    let largest = chunks
        .iter()
        .map(|c| (c.id(), tokenizer.count_tokens(c.content())))
        .fold(None, |largest: Option<(usize, usize)>, (id, tokens)| match largest {
            Some((_, max)) if max >= tokens => largest,
            _ => Some((id, tokens)),
        });

    if let Some((chunk_id, prompt_tokens)) = largest {
        if prompt_tokens + config.max_tokens_rec > context_window {
            return Err(BudgetExceeded::Recursive {
                chunk_id,
                prompt_tokens,
                max_tokens: config.max_tokens_rec,
                context_window,
            });
        }
    }

    if config.final_summary && !chunks.is_empty() {
        let total = chunks.len() * config.max_tokens_rec + config.max_tokens_final;
        if total > context_window {
            return Err(BudgetExceeded::Final {
                chunk_count: chunks.len(),
                max_tokens_rec: config.max_tokens_rec,
                max_tokens_final: config.max_tokens_final,
                total,
                context_window,
            });
        }
    }

    Ok(())
}

pub fn exceeds_budget<T: Tokenizer + ?Sized>(
    chunks: &[Chunk],
    config: &RunConfig,
    tokenizer: &T,
    context_window: usize,
) -> bool {
    check_budget(chunks, config, tokenizer, context_window).is_err()
}

/// Dollar cost of one request.
///
/// Cached prompt tokens are left out of the input charge when the model has
/// a cached-token rate.
pub fn calculate_price(usage: &TokenUsage, pricing: &ModelPricing) -> f64 {
    let billed_prompt = match pricing.cached {
        Some(_) if usage.cached > 0 => usage.prompt.saturating_sub(usage.cached),
        _ => usage.prompt,
    };

    round_price(
        (billed_prompt as f64 * pricing.input + usage.completion as f64 * pricing.output)
            / PRICE_SCALE,
    )
}

/// Upper-bound price quote for an estimate.
pub fn estimate_price(estimate: &TokenEstimate, pricing: &ModelPricing) -> f64 {
    calculate_price(
        &TokenUsage::new(estimate.prompt_tokens, estimate.completion_tokens),
        pricing,
    )
}
