//! Thread-safe per-agent token/cost accounting (§4.2).

use std::sync::Mutex;

use crate::RawUsage;

/// Approximate USD price per million tokens, `(input, output)`.
fn pricing(model: &str) -> (f64, f64) {
    match model {
        "claude-opus" => (15.0, 75.0),
        "claude-sonnet" => (3.0, 15.0),
        "claude-haiku" => (0.80, 4.0),
        _ => (3.0, 15.0),
    }
}

/// A point-in-time read of a [`TokenTracker`]'s counters.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct UsageSnapshot {
    /// Cumulative input tokens.
    pub input_tokens: u64,
    /// Cumulative output tokens.
    pub output_tokens: u64,
    /// Approximate cumulative cost in USD.
    pub cost_usd: f64,
}

/// Sums input/output tokens for one agent and exposes approximate cost via
/// a pricing table indexed by model name. Safe to share across the thread
/// reading an `AgentRunner`'s event stream and the thread aggregating to
/// session level.
pub struct TokenTracker {
    model: String,
    state: Mutex<UsageSnapshot>,
}

impl TokenTracker {
    /// Build a tracker priced against `model`.
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            state: Mutex::new(UsageSnapshot::default()),
        }
    }

    /// Record one event's usage, if any.
    pub fn record(&self, usage: Option<RawUsage>) {
        let Some(usage) = usage else { return };
        let (input_price, output_price) = pricing(&self.model);
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.input_tokens += usage.input_tokens;
        state.output_tokens += usage.output_tokens;
        state.cost_usd += (usage.input_tokens as f64 / 1_000_000.0) * input_price
            + (usage.output_tokens as f64 / 1_000_000.0) * output_price;
    }

    /// Read the current counters.
    #[must_use]
    pub fn snapshot(&self) -> UsageSnapshot {
        *self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_usage_and_computes_cost() {
        let tracker = TokenTracker::new("claude-sonnet");
        tracker.record(Some(RawUsage {
            input_tokens: 1_000_000,
            output_tokens: 1_000_000,
        }));
        let snap = tracker.snapshot();
        assert_eq!(snap.input_tokens, 1_000_000);
        assert_eq!(snap.output_tokens, 1_000_000);
        assert!((snap.cost_usd - 18.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_falls_back_to_sonnet_pricing() {
        let tracker = TokenTracker::new("some-future-model");
        tracker.record(Some(RawUsage {
            input_tokens: 1_000_000,
            output_tokens: 0,
        }));
        assert!((tracker.snapshot().cost_usd - 3.0).abs() < 1e-9);
    }

    #[test]
    fn none_usage_is_a_no_op() {
        let tracker = TokenTracker::new("claude-opus");
        tracker.record(None);
        assert_eq!(tracker.snapshot(), UsageSnapshot::default());
    }
}
