//! Per-category retry budgets for provider calls.

use crate::llm::LlmErrorCategory;
use std::time::Duration;

/// Upper bound on a provider-suggested wait.
const MAX_RETRY_AFTER_SECS: u64 = 300;
const BACKOFF_MULTIPLIER: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryRule {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub exponential: bool,
}

impl RetryRule {
    /// Wait before retry number `attempt` (1-based). A provider hint wins
    /// over the computed backoff.
    pub fn delay(&self, attempt: u32, retry_after_secs: Option<u64>) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        if let Some(secs) = retry_after_secs.filter(|s| *s > 0) {
            return Duration::from_secs(secs.min(MAX_RETRY_AFTER_SECS));
        }
        if self.exponential {
            let factor = BACKOFF_MULTIPLIER.saturating_pow(attempt.saturating_sub(1));
            self.base_delay.saturating_mul(factor)
        } else {
            self.base_delay
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub network: RetryRule,
    pub api: RetryRule,
    pub empty_response: RetryRule,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            network: RetryRule {
                max_retries: 3,
                base_delay: Duration::from_secs(2),
                exponential: true,
            },
            api: RetryRule {
                max_retries: 2,
                base_delay: Duration::from_secs(5),
                exponential: true,
            },
            empty_response: RetryRule {
                max_retries: 1,
                base_delay: Duration::from_secs(1),
                exponential: false,
            },
        }
    }
}

impl RetryPolicy {
    /// Same budgets, no waiting.
    pub fn immediate() -> Self {
        let mut policy = Self::default();
        policy.network.base_delay = Duration::ZERO;
        policy.api.base_delay = Duration::ZERO;
        policy.empty_response.base_delay = Duration::ZERO;
        policy
    }

    /// `None` for categories that are never retried.
    pub fn rule_for(&self, category: LlmErrorCategory) -> Option<RetryRule> {
        match category {
            LlmErrorCategory::Network => Some(self.network),
            LlmErrorCategory::Api => Some(self.api),
            LlmErrorCategory::EmptyResponse => Some(self.empty_response),
            LlmErrorCategory::Generation | LlmErrorCategory::Infrastructure => None,
        }
    }
}
