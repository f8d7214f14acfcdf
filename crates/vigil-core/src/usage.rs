//! Token usage and cost types (§3 Session Item, §4.B Derived-Metadata Engine).

use serde::{Deserialize, Serialize};

/// Token usage extracted from a single transcript record's `usage` block
/// (§4.B "Extract usage"). `message_id` drives cost-dedup (§8 law 4): two
/// items sharing a non-null `message_id` are replays of the same turn.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    /// Identifier correlating usage blocks that are replays of one turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Input tokens for this record.
    pub input_tokens: u64,
    /// Output tokens generated for this record.
    pub output_tokens: u64,
    /// Tokens read from prompt cache.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u64>,
    /// 5-minute TTL cache creation tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_creation_5m_tokens: Option<u64>,
    /// 1-hour TTL cache creation tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_creation_1h_tokens: Option<u64>,
}

impl TokenUsage {
    /// Sum of all four token categories on this record (§4.B "Compute context usage").
    #[must_use]
    pub fn context_usage(&self) -> u64 {
        self.input_tokens
            + self.output_tokens
            + self.cache_read_tokens.unwrap_or(0)
            + self.cache_creation_5m_tokens.unwrap_or(0)
            + self.cache_creation_1h_tokens.unwrap_or(0)
    }
}

/// Cost in USD for a single transcript record, or an aggregate over many (§3).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cost {
    /// Input-token cost.
    pub input_cost: f64,
    /// Output-token cost.
    pub output_cost: f64,
    /// Total cost (input + output, plus any cache-category costs folded in).
    pub total: f64,
}

impl Cost {
    /// The zero cost, used when a record carries no usage block or its
    /// `message_id` has already been seen in this session (§4.B, §8 law 4).
    #[must_use]
    pub const fn zero() -> Self {
        Self {
            input_cost: 0.0,
            output_cost: 0.0,
            total: 0.0,
        }
    }

    /// Combine two costs (used when summing item costs into a session's
    /// `self_cost`, or children's `total_cost` into a parent's
    /// `subagents_cost`, §3 invariants).
    #[must_use]
    pub fn add(self, other: Self) -> Self {
        Self {
            input_cost: self.input_cost + other.input_cost,
            output_cost: self.output_cost + other.output_cost,
            total: self.total + other.total,
        }
    }
}

/// Per-million-token price rates for one model (external collaborator's
/// model-price schedule, §4.B "Compute cost").
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelRates {
    /// USD per million input tokens.
    pub input_per_million: f64,
    /// USD per million output tokens.
    pub output_per_million: f64,
    /// USD per million cache-read tokens, if the schedule prices it separately.
    #[serde(default)]
    pub cache_read_per_million: f64,
    /// USD per million 5-minute cache-creation tokens.
    #[serde(default)]
    pub cache_creation_5m_per_million: f64,
    /// USD per million 1-hour cache-creation tokens.
    #[serde(default)]
    pub cache_creation_1h_per_million: f64,
}

impl ModelRates {
    /// Price a single record's usage against this schedule (§4.B).
    #[must_use]
    pub fn price(&self, usage: &TokenUsage) -> Cost {
        let million = 1_000_000.0;
        #[allow(clippy::cast_precision_loss)]
        let input_cost = (usage.input_tokens as f64 / million) * self.input_per_million;
        #[allow(clippy::cast_precision_loss)]
        let output_cost = (usage.output_tokens as f64 / million) * self.output_per_million;
        #[allow(clippy::cast_precision_loss)]
        let cache_read_cost = (usage.cache_read_tokens.unwrap_or(0) as f64 / million)
            * self.cache_read_per_million;
        #[allow(clippy::cast_precision_loss)]
        let cache_5m_cost = (usage.cache_creation_5m_tokens.unwrap_or(0) as f64 / million)
            * self.cache_creation_5m_per_million;
        #[allow(clippy::cast_precision_loss)]
        let cache_1h_cost = (usage.cache_creation_1h_tokens.unwrap_or(0) as f64 / million)
            * self.cache_creation_1h_per_million;
        Cost {
            input_cost,
            output_cost,
            total: input_cost + output_cost + cache_read_cost + cache_5m_cost + cache_1h_cost,
        }
    }
}
