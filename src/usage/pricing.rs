//! Model pricing table and cost estimation.
//!
//! Prices are USD per million tokens. The table is static configuration;
//! an unrecognized model id falls back to the default row so a cost is
//! always computable.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::usage::counters::UsageCounters;

/// Exchange rate applied when the upstream currency lookup fails.
pub const FALLBACK_EXCHANGE_RATE: f64 = 150.0;

/// Model id whose rates apply when the active model is unrecognized.
pub const DEFAULT_RATE_MODEL: &str = "gpt-realtime-2025-08-28";

/// Per-million-token prices for one model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelRates {
    pub input: f64,
    pub cached_input: f64,
    pub output: f64,
}

static BUILTIN_RATES: Lazy<HashMap<&'static str, ModelRates>> = Lazy::new(|| {
    HashMap::from([
        (
            "gpt-realtime-2025-08-28",
            ModelRates { input: 32.0, cached_input: 0.50, output: 64.0 },
        ),
        (
            "gpt-realtime-mini-2025-10-06",
            ModelRates { input: 10.0, cached_input: 0.30, output: 20.0 },
        ),
    ])
});

/// Mapping from model identifier to per-million-token prices.
#[derive(Debug, Clone)]
pub struct RateTable {
    rates: HashMap<String, ModelRates>,
    default_model: String,
}

impl Default for RateTable {
    fn default() -> Self {
        Self {
            rates: BUILTIN_RATES.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            default_model: DEFAULT_RATE_MODEL.to_string(),
        }
    }
}

impl RateTable {
    /// Build a table from explicit rows; `default_model` must be one of them.
    pub fn new(rates: HashMap<String, ModelRates>, default_model: impl Into<String>) -> Self {
        let default_model = default_model.into();
        debug_assert!(rates.contains_key(&default_model));
        Self { rates, default_model }
    }

    /// Rates for `model`, or the default row when the model is unrecognized.
    pub fn rates_for(&self, model: &str) -> ModelRates {
        self.rates
            .get(model)
            .or_else(|| self.rates.get(&self.default_model))
            .copied()
            .unwrap_or(ModelRates { input: 0.0, cached_input: 0.0, output: 0.0 })
    }

    /// Estimated cost in USD for the accumulated usage of one call.
    ///
    /// Cached input tokens are billed at the cached rate; the remainder of
    /// the input at the full rate. Never negative for non-negative counts.
    pub fn estimate_cost(&self, usage: &UsageCounters, model: &str) -> f64 {
        let rates = self.rates_for(model);
        let cached = usage.input_token_details.cached_tokens;
        let non_cached = usage.input_tokens.saturating_sub(cached);

        (non_cached as f64 * rates.input
            + cached as f64 * rates.cached_input
            + usage.output_tokens as f64 * rates.output)
            / 1_000_000.0
    }
}

/// Final cost figures reported in the end-of-call summary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostEstimate {
    /// Cost in the rate table's currency (USD).
    pub usd: f64,
    /// Cost converted with the session's exchange rate (JPY).
    pub converted: f64,
}

impl CostEstimate {
    /// Derive the estimate from counters, the rate table, and a conversion rate.
    pub fn compute(usage: &UsageCounters, model: &str, table: &RateTable, exchange_rate: f64) -> Self {
        let usd = table.estimate_cost(usage, model);
        Self { usd, converted: usd * exchange_rate }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::counters::InputTokenDetails;

    fn usage(input: u64, cached: u64, output: u64) -> UsageCounters {
        UsageCounters {
            total_tokens: input + output,
            input_tokens: input,
            output_tokens: output,
            input_token_details: InputTokenDetails { cached_tokens: cached, ..Default::default() },
            ..Default::default()
        }
    }

    #[test]
    fn test_reference_cost_vector() {
        // 1000 input (200 cached), 500 output at 32/0.50/64 per 1M:
        // (800*32 + 200*0.50 + 500*64) / 1e6 = 0.0577
        let table = RateTable::default();
        let cost = table.estimate_cost(&usage(1000, 200, 500), "gpt-realtime-2025-08-28");
        assert!((cost - 0.0577).abs() < 1e-12, "cost was {}", cost);
    }

    #[test]
    fn test_zero_usage_costs_zero() {
        let table = RateTable::default();
        assert_eq!(table.estimate_cost(&UsageCounters::default(), "gpt-realtime-2025-08-28"), 0.0);
    }

    #[test]
    fn test_unknown_model_uses_default_row() {
        let table = RateTable::default();
        let u = usage(1000, 200, 500);
        let unknown = table.estimate_cost(&u, "some-future-model");
        let default = table.estimate_cost(&u, DEFAULT_RATE_MODEL);
        assert_eq!(unknown, default);
    }

    #[test]
    fn test_mini_model_row() {
        let table = RateTable::default();
        // (800*10 + 200*0.30 + 500*20) / 1e6 = 0.01806
        let cost = table.estimate_cost(&usage(1000, 200, 500), "gpt-realtime-mini-2025-10-06");
        assert!((cost - 0.01806).abs() < 1e-12, "cost was {}", cost);
    }

    #[test]
    fn test_monotonic_in_each_count() {
        let table = RateTable::default();
        let base = table.estimate_cost(&usage(1000, 200, 500), DEFAULT_RATE_MODEL);
        assert!(table.estimate_cost(&usage(1001, 200, 500), DEFAULT_RATE_MODEL) >= base);
        // One more cached token (cached tokens are part of the input count).
        assert!(table.estimate_cost(&usage(1001, 201, 500), DEFAULT_RATE_MODEL) >= base);
        assert!(table.estimate_cost(&usage(1000, 200, 501), DEFAULT_RATE_MODEL) >= base);
        assert!(table.estimate_cost(&usage(1000, 2000, 500), DEFAULT_RATE_MODEL) >= 0.0);
    }

    #[test]
    fn test_cached_exceeding_input_clamps() {
        // Non-cached input clamps at zero rather than going negative.
        let table = RateTable::default();
        let cost = table.estimate_cost(&usage(100, 500, 0), DEFAULT_RATE_MODEL);
        let expected = 500.0 * 0.50 / 1_000_000.0;
        assert!((cost - expected).abs() < 1e-12);
    }

    #[test]
    fn test_cost_estimate_conversion() {
        let table = RateTable::default();
        let est = CostEstimate::compute(&usage(1000, 200, 500), DEFAULT_RATE_MODEL, &table, 150.0);
        assert!((est.usd - 0.0577).abs() < 1e-12);
        assert!((est.converted - 8.655).abs() < 1e-9);
    }

    #[test]
    fn test_fallback_exchange_rate() {
        assert_eq!(FALLBACK_EXCHANGE_RATE, 150.0);
    }
}
