use serde::{Deserialize, Serialize};

/// Lower bounds (events per CPU percent) of each tier, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierBreakpoints {
    #[serde(default = "default_top")]
    pub top: f64,
    #[serde(default = "default_exceptional")]
    pub exceptional: f64,
    #[serde(default = "default_fast")]
    pub fast: f64,
    #[serde(default = "default_moderate")]
    pub moderate: f64,
    #[serde(default = "default_slow")]
    pub slow: f64,
    #[serde(default = "default_very_slow")]
    pub very_slow: f64,
}

fn default_top() -> f64 {
    15_000.0
}

fn default_exceptional() -> f64 {
    5_000.0
}

fn default_fast() -> f64 {
    300.0
}

fn default_moderate() -> f64 {
    150.0
}

fn default_slow() -> f64 {
    50.0
}

fn default_very_slow() -> f64 {
    3.0
}

impl Default for TierBreakpoints {
    fn default() -> Self {
        Self {
            top: default_top(),
            exceptional: default_exceptional(),
            fast: default_fast(),
            moderate: default_moderate(),
            slow: default_slow(),
            very_slow: default_very_slow(),
        }
    }
}

/// Discrete performance label, ordered worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceTier {
    Critical,
    VerySlow,
    Slow,
    Moderate,
    Fast,
    Exceptional,
    Top,
}

impl PerformanceTier {
    /// Bounds are inclusive: exactly `fast` events/CPU% is `Fast`.
    pub fn classify(events_per_cpu_percent: f64, breakpoints: &TierBreakpoints) -> Self {
        let v = events_per_cpu_percent;
        if v.is_nan() {
            PerformanceTier::Critical
        } else if v >= breakpoints.top {
            PerformanceTier::Top
        } else if v >= breakpoints.exceptional {
            PerformanceTier::Exceptional
        } else if v >= breakpoints.fast {
            PerformanceTier::Fast
        } else if v >= breakpoints.moderate {
            PerformanceTier::Moderate
        } else if v >= breakpoints.slow {
            PerformanceTier::Slow
        } else if v >= breakpoints.very_slow {
            PerformanceTier::VerySlow
        } else {
            PerformanceTier::Critical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PerformanceTier::Top => "top",
            PerformanceTier::Exceptional => "exceptional",
            PerformanceTier::Fast => "fast",
            PerformanceTier::Moderate => "moderate",
            PerformanceTier::Slow => "slow",
            PerformanceTier::VerySlow => "very_slow",
            PerformanceTier::Critical => "critical",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            PerformanceTier::Top => "String operations only, near engine ceiling",
            PerformanceTier::Exceptional => "Very light parsing",
            PerformanceTier::Fast => "Fit for high-volume pipelines",
            PerformanceTier::Moderate => "Acceptable for most sources",
            PerformanceTier::Slow => "Heavy parsing functions on the hot path",
            PerformanceTier::VerySlow => "Likely regex-bound",
            PerformanceTier::Critical => "Unusable at volume",
        }
    }
}

impl std::fmt::Display for PerformanceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
