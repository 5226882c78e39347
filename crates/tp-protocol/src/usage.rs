//! Token accounting and cost estimation.

use serde::{Deserialize, Serialize};

/// USD per million tokens.
const INPUT_PRICE: f64 = 3.00;
const OUTPUT_PRICE: f64 = 15.00;
const CACHE_READ_PRICE: f64 = 0.30;
const CACHE_CREATION_PRICE: f64 = 3.75;

/// Running token totals for a conversation. Only ever grows until `clear`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(rename = "total_input_tokens", default)]
    pub input_tokens: u64,
    #[serde(rename = "total_output_tokens", default)]
    pub output_tokens: u64,
    #[serde(rename = "cache_creation_tokens", default)]
    pub cache_creation_tokens: u64,
    #[serde(rename = "cache_read_tokens", default)]
    pub cache_read_tokens: u64,
}

impl TokenUsage {
    pub fn new(input: u64, output: u64, cache_creation: u64, cache_read: u64) -> Self {
        Self {
            input_tokens: input,
            output_tokens: output,
            cache_creation_tokens: cache_creation,
            cache_read_tokens: cache_read,
        }
    }

    /// Add one model call's usage to the totals.
    pub fn record(&mut self, call: &TokenUsage) {
        self.input_tokens += call.input_tokens;
        self.output_tokens += call.output_tokens;
        self.cache_creation_tokens += call.cache_creation_tokens;
        self.cache_read_tokens += call.cache_read_tokens;
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn stats(&self) -> UsageStats {
        let per_million = |tokens: u64, price: f64| tokens as f64 / 1_000_000.0 * price;
        let input_cost = per_million(self.input_tokens, INPUT_PRICE);
        let output_cost = per_million(self.output_tokens, OUTPUT_PRICE);
        let cache_cost = per_million(self.cache_read_tokens, CACHE_READ_PRICE);
        let cache_creation_cost = per_million(self.cache_creation_tokens, CACHE_CREATION_PRICE);

        UsageStats {
            total_input_tokens: self.input_tokens,
            total_output_tokens: self.output_tokens,
            total_tokens: self.total_tokens(),
            cache_creation_tokens: self.cache_creation_tokens,
            cache_read_tokens: self.cache_read_tokens,
            cache_savings_tokens: self.cache_read_tokens,
            estimated_cost_usd: round4(input_cost + output_cost + cache_cost + cache_creation_cost),
            input_cost_usd: round4(input_cost),
            output_cost_usd: round4(output_cost),
            cache_cost_usd: round4(cache_cost),
            cache_creation_cost_usd: round4(cache_creation_cost),
        }
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Derived usage report with cost estimates rounded to 4 decimals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_savings_tokens: u64,
    pub estimated_cost_usd: f64,
    pub input_cost_usd: f64,
    pub output_cost_usd: f64,
    pub cache_cost_usd: f64,
    pub cache_creation_cost_usd: f64,
}
