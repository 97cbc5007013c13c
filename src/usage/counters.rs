//! Session token-usage counters.
//!
//! Counters are cumulative for one call: each completed-response usage block
//! is merged additively, fields never decrease, and a new call starts from
//! zero. The same shape deserializes the per-response usage block embedded
//! in `response.done` events, where absent fields are treated as zero.

use serde::{Deserialize, Serialize};

/// Input token breakdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputTokenDetails {
    #[serde(default)]
    pub cached_tokens: u64,
    #[serde(default)]
    pub text_tokens: u64,
    #[serde(default)]
    pub audio_tokens: u64,
}

/// Output token breakdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputTokenDetails {
    #[serde(default)]
    pub text_tokens: u64,
    #[serde(default)]
    pub audio_tokens: u64,
}

/// Cumulative token usage for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounters {
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub input_token_details: InputTokenDetails,
    #[serde(default)]
    pub output_token_details: OutputTokenDetails,
}

impl UsageCounters {
    /// Zero all counters (a new call starts here).
    pub fn reset(&mut self) {
        *self = UsageCounters::default();
    }

    /// Add every field of `block` into `self`. Never subtracts.
    pub fn merge(&mut self, block: &UsageCounters) {
        self.total_tokens = self.total_tokens.saturating_add(block.total_tokens);
        self.input_tokens = self.input_tokens.saturating_add(block.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(block.output_tokens);

        let i = &mut self.input_token_details;
        i.cached_tokens = i.cached_tokens.saturating_add(block.input_token_details.cached_tokens);
        i.text_tokens = i.text_tokens.saturating_add(block.input_token_details.text_tokens);
        i.audio_tokens = i.audio_tokens.saturating_add(block.input_token_details.audio_tokens);

        let o = &mut self.output_token_details;
        o.text_tokens = o.text_tokens.saturating_add(block.output_token_details.text_tokens);
        o.audio_tokens = o.audio_tokens.saturating_add(block.output_token_details.audio_tokens);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(total: u64, input: u64, output: u64, cached: u64) -> UsageCounters {
        UsageCounters {
            total_tokens: total,
            input_tokens: input,
            output_tokens: output,
            input_token_details: InputTokenDetails {
                cached_tokens: cached,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_merge_is_fieldwise_sum() {
        let blocks = [block(100, 60, 40, 10), block(50, 30, 20, 5), block(7, 4, 3, 0)];
        let mut counters = UsageCounters::default();
        for b in &blocks {
            counters.merge(b);
        }
        assert_eq!(counters.total_tokens, 157);
        assert_eq!(counters.input_tokens, 94);
        assert_eq!(counters.output_tokens, 63);
        assert_eq!(counters.input_token_details.cached_tokens, 15);
    }

    #[test]
    fn test_merge_order_independent() {
        let a = block(100, 60, 40, 10);
        let b = block(50, 30, 20, 5);

        let mut ab = UsageCounters::default();
        ab.merge(&a);
        ab.merge(&b);

        let mut ba = UsageCounters::default();
        ba.merge(&b);
        ba.merge(&a);

        assert_eq!(ab, ba);
    }

    #[test]
    fn test_merge_never_decreases() {
        let mut counters = block(100, 60, 40, 10);
        counters.merge(&UsageCounters::default());
        assert_eq!(counters.input_tokens, 60);
    }

    #[test]
    fn test_reset_zeroes_everything() {
        let mut counters = block(100, 60, 40, 10);
        counters.reset();
        assert_eq!(counters, UsageCounters::default());
    }

    #[test]
    fn test_absent_fields_parse_as_zero() {
        let parsed: UsageCounters =
            serde_json::from_str(r#"{"input_tokens": 12, "input_token_details": {"cached_tokens": 3}}"#)
                .unwrap();
        assert_eq!(parsed.input_tokens, 12);
        assert_eq!(parsed.input_token_details.cached_tokens, 3);
        assert_eq!(parsed.output_tokens, 0);
        assert_eq!(parsed.output_token_details.audio_tokens, 0);
    }
}
