use crate::error_code::ErrorCode;
use crate::fixer::diagnostic_source_lines;
use crate::util::truncate;
use regex::Regex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::OnceLock;

const CONTEXT_RECORDS: usize = 3;
const CONTEXT_PATTERNS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationRecord {
    pub iteration_number: usize,
    /// `None` when the iteration validated or generation itself failed.
    pub error_code: Option<ErrorCode>,
    pub fix_applied: bool,
    pub reason: Option<String>,
}

impl IterationRecord {
    pub fn new(
        iteration_number: usize,
        error_code: Option<ErrorCode>,
        fix_applied: bool,
        reason: &str,
    ) -> Self {
        Self {
            iteration_number,
            error_code,
            fix_applied,
            reason: Some(reason.to_string()),
        }
    }
}

/// Watches the most recent `window` failure codes.
#[derive(Debug, Clone)]
pub struct CycleDetector {
    window: usize,
    recent: VecDeque<ErrorCode>,
}

impl CycleDetector {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            recent: VecDeque::with_capacity(window),
        }
    }

    /// True while the last `window` observed codes are all identical.
    pub fn observe(&mut self, code: ErrorCode) -> bool {
        if self.recent.len() == self.window {
            self.recent.pop_front();
        }
        self.recent.push_back(code);
        self.recent.len() == self.window && self.recent.iter().all(|c| *c == code)
    }
}

fn backtick_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"`([^`\n]+)`").ok()).as_ref()
}

/// Constructs to warn the model about after a cycle: quoted source lines,
/// then backticked snippets, else the code and first error line.
pub fn failed_patterns_from(error_message: &str, error_code: ErrorCode) -> Vec<String> {
    let mut patterns = diagnostic_source_lines(error_message);
    if let Some(re) = backtick_regex() {
        for caps in re.captures_iter(error_message) {
            let snippet = caps[1].trim().to_string();
            if !snippet.is_empty() && !patterns.contains(&snippet) {
                patterns.push(snippet);
            }
        }
    }
    if patterns.is_empty() {
        let first_line = error_message
            .lines()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("no error text");
        patterns.push(format!("{}: {}", error_code, truncate(first_line.trim(), 160)));
    }
    patterns
}

/// Summary of recent attempts for a repair prompt.
pub fn build_repair_context(records: &[IterationRecord], failed_patterns: &[String]) -> String {
    if records.is_empty() && failed_patterns.is_empty() {
        return "First iteration attempt.".to_string();
    }

    let mut out = String::new();
    let recent = &records[records.len().saturating_sub(CONTEXT_RECORDS)..];
    if !recent.is_empty() {
        out.push_str("Recent attempts:\n");
        for record in recent {
            out.push_str(&format!(
                "- Iteration {}: {} ({}{})\n",
                record.iteration_number,
                record
                    .error_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "no error code".to_string()),
                record.reason.as_deref().unwrap_or("unknown"),
                if record.fix_applied { ", fix applied" } else { "" }
            ));
        }
    }

    if !failed_patterns.is_empty() {
        out.push_str("Patterns that already failed; do not use them again:\n");
        for pattern in &failed_patterns[failed_patterns.len().saturating_sub(CONTEXT_PATTERNS)..] {
            out.push_str(&format!("- {pattern}\n"));
        }
    }

    if let Some(code) = repeating_code(recent) {
        out.push_str(&format!(
            "Warning: {code} keeps repeating. Change the approach instead of patching the same construct.\n"
        ));
    }
    out.push_str("Generate different solution than previous attempts.");
    out
}

fn repeating_code(recent: &[IterationRecord]) -> Option<ErrorCode> {
    let first = recent.first()?.error_code?;
    (recent.len() >= 2 && recent.iter().all(|r| r.error_code == Some(first))).then_some(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(n: usize, code: ErrorCode, reason: &str) -> IterationRecord {
        IterationRecord::new(n, Some(code), reason == "llm_repair", reason)
    }

    #[test]
    fn detector_slides_over_the_last_window() {
        let mut detector = CycleDetector::new(3);
        assert!(!detector.observe(ErrorCode::Syntax));
        assert!(!detector.observe(ErrorCode::Syntax));
        assert!(!detector.observe(ErrorCode::UnhandledFallible));
        assert!(!detector.observe(ErrorCode::UnhandledFallible));
        assert!(detector.observe(ErrorCode::UnhandledFallible));
        // Still cycling while the same code keeps coming back.
        assert!(detector.observe(ErrorCode::UnhandledFallible));
        assert!(!detector.observe(ErrorCode::Syntax));
        assert!(!detector.observe(ErrorCode::UnhandledFallible));
    }

    #[test]
    fn first_iteration_context() {
        assert_eq!(build_repair_context(&[], &[]), "First iteration attempt.");
    }

    #[test]
    fn context_keeps_last_three_records_and_warns_on_repeats() {
        let records = vec![
            record(1, ErrorCode::Syntax, "llm_repair"),
            record(2, ErrorCode::UnhandledFallible, "llm_repair"),
            record(3, ErrorCode::UnhandledFallible, "local_fix"),
            record(4, ErrorCode::UnhandledFallible, "llm_repair"),
        ];
        let context = build_repair_context(&records, &[]);
        assert!(!context.contains("Iteration 1:"));
        assert!(context.contains("Iteration 2: E103 (llm_repair, fix applied)"));
        assert!(context.contains("Warning: E103 keeps repeating"));
        assert!(context.ends_with("Generate different solution than previous attempts."));
    }

    #[test]
    fn context_lists_only_recent_failed_patterns() {
        let patterns: Vec<String> = (1..=7).map(|i| format!("pattern {i}")).collect();
        let context = build_repair_context(&[], &patterns);
        assert!(!context.contains("pattern 2\n"));
        assert!(context.contains("pattern 3"));
        assert!(context.contains("pattern 7"));
        assert!(!context.contains("Warning"));
    }

    #[test]
    fn failed_patterns_prefer_quoted_source() {
        let msg = "error[E103]: unhandled fallible assignment\n  ┌─ :2:1\n  │\n2 │ .ts = parse_timestamp(.t, \"%s\")\n  │ ^^^ this expression can fail `parse_timestamp(.t, \"%s\")`";
        let patterns = failed_patterns_from(msg, ErrorCode::UnhandledFallible);
        assert_eq!(patterns[0], ".ts = parse_timestamp(.t, \"%s\")");
        assert_eq!(patterns[1], "parse_timestamp(.t, \"%s\")");

        let fallback = failed_patterns_from("PROCESSING: engine processed 0 events", ErrorCode::Unknown);
        assert_eq!(fallback, vec!["UNKNOWN: PROCESSING: engine processed 0 events"]);
    }
}
