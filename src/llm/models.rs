use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// API usage information from the LLM provider.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
    /// Actual cost in USD as reported by the provider.
    /// The provider returns this as `total_cost` in the usage object.
    #[serde(default, alias = "total_cost")]
    pub cost: Option<f64>,
}

impl Usage {
    /// Get the actual cost for this usage from the provider.
    /// Returns the cost reported by the provider, or 0.0 if not available.
    pub fn cost(&self) -> f64 {
        self.cost.unwrap_or(0.0)
    }

    pub fn with_cost(cost: f64) -> Self {
        Usage {
            cost: Some(cost),
            ..Usage::default()
        }
    }
}

/// Merge two optional `Usage` values, summing their token counts and costs.
pub fn merge_usage(primary: Option<Usage>, secondary: Option<Usage>) -> Option<Usage> {
    match (primary, secondary) {
        (Some(p), Some(s)) => Some(Usage {
            prompt_tokens: p.prompt_tokens + s.prompt_tokens,
            completion_tokens: p.completion_tokens + s.completion_tokens,
            total_tokens: p.total_tokens + s.total_tokens,
            cost: match (p.cost, s.cost) {
                (Some(pc), Some(sc)) => Some(pc + sc),
                (Some(pc), None) => Some(pc),
                (None, Some(sc)) => Some(sc),
                (None, None) => None,
            },
        }),
        (Some(p), None) => Some(p),
        (None, Some(s)) => Some(s),
        (None, None) => None,
    }
}

/// Index of the model to try after `current` in an ordered fallback chain.
pub fn next_fallback(models: &[String], current: usize) -> Option<usize> {
    let next = current.checked_add(1)?;
    (next < models.len()).then_some(next)
}

/// Additive usage counter shared by every repair loop in a selector run.
#[derive(Debug, Default)]
pub struct CostLedger {
    total: Mutex<Option<Usage>>,
}

impl CostLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, usage: Option<&Usage>) {
        let Some(usage) = usage else {
            return;
        };
        let mut total = self.total.lock().unwrap_or_else(|e| e.into_inner());
        *total = merge_usage(total.take(), Some(usage.clone()));
    }

    pub fn snapshot(&self) -> Option<Usage> {
        self.total.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn total_cost(&self) -> f64 {
        self.snapshot().map(|u| u.cost()).unwrap_or(0.0)
    }
}
