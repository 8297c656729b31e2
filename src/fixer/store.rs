use super::rules::FixRule;
use crate::error_code::ErrorCode;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct LearnedPattern {
    pub error_code: ErrorCode,
    /// The failing construct this pattern was synthesized from.
    pub construct: String,
    pub rule: FixRule,
    pub learned_at: DateTime<Utc>,
}

/// Append-only store of learned rules, keyed by error code.
///
/// One instance is shared by every repair loop in a process through an
/// `Arc`. Nothing is persisted; each process starts empty.
#[derive(Debug, Default)]
pub struct PatternStore {
    patterns: Mutex<HashMap<ErrorCode, Vec<LearnedPattern>>>,
}

impl PatternStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule unless one for the same construct already exists.
    /// Returns whether the store grew.
    pub fn learn(&self, error_code: ErrorCode, construct: &str, rule: FixRule) -> bool {
        let mut patterns = self.patterns.lock().unwrap_or_else(|e| e.into_inner());
        let entries = patterns.entry(error_code).or_default();
        if entries.iter().any(|p| p.construct == construct) {
            return false;
        }
        entries.push(LearnedPattern {
            error_code,
            construct: construct.to_string(),
            rule,
            learned_at: Utc::now(),
        });
        true
    }

    pub fn rules_for(&self, error_code: ErrorCode) -> Vec<FixRule> {
        self.patterns
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&error_code)
            .map(|entries| entries.iter().map(|p| p.rule.clone()).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.patterns
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<LearnedPattern> {
        let patterns = self.patterns.lock().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<LearnedPattern> = patterns.values().flatten().cloned().collect();
        all.sort_by_key(|p| p.learned_at);
        all
    }
}
