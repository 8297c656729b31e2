//! Free, deterministic repairs for known compiler errors.
//!
//! `LocalFixer` maps an error message to its code, applies the built-in
//! rules for that code plus anything learned earlier in the process, and
//! reports `None` when nothing changed. A `None` is the normal outcome for
//! errors it has no rule for.

pub mod rules;
pub mod store;

use crate::error_code::{extract_error_code, ErrorCode};
use regex::Regex;
use rules::{seed_rules, FixRule, LineEdit, Matcher, Rewrite};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use store::PatternStore;
use tracing::debug;

/// Passes over the code before giving up on reaching a fixed point.
const MAX_PASSES: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct LocalFix {
    pub code: String,
    pub error_code: ErrorCode,
    pub rules_applied: Vec<String>,
}

pub struct LocalFixer {
    seeds: HashMap<ErrorCode, Vec<FixRule>>,
    store: Arc<PatternStore>,
}

impl LocalFixer {
    pub fn new(store: Arc<PatternStore>) -> Self {
        Self {
            seeds: seed_rules(),
            store,
        }
    }

    pub fn store(&self) -> &Arc<PatternStore> {
        &self.store
    }

    pub fn fix_locally(&self, code: &str, error_message: &str) -> Option<String> {
        self.apply(code, error_message).map(|fix| fix.code)
    }

    /// Learn from the error text, then rewrite. `None` when the code is unchanged.
    pub fn apply(&self, code: &str, error_message: &str) -> Option<LocalFix> {
        let error_code = extract_error_code(error_message);
        for (construct, rule) in synthesize_patterns(error_code, error_message) {
            if self.store.learn(error_code, &construct, rule) {
                debug!(%error_code, construct = %construct, "learned local fix pattern");
            }
        }

        let mut rules = self.seeds.get(&error_code).cloned().unwrap_or_default();
        rules.extend(self.store.rules_for(error_code));
        if rules.is_empty() {
            return None;
        }

        let (fixed, applied) = apply_rules(code, &rules);
        if applied.is_empty() || fixed == code {
            return None;
        }
        debug!(%error_code, rules = ?applied, "local fix applied");
        Some(LocalFix {
            code: fixed,
            error_code,
            rules_applied: applied,
        })
    }
}

/// One rule per line per pass, first match wins; passes repeat until stable.
fn apply_rules(code: &str, rules: &[FixRule]) -> (String, Vec<String>) {
    let mut lines: Vec<String> = code.split('\n').map(str::to_string).collect();
    let mut applied = Vec::new();

    for _ in 0..MAX_PASSES {
        let mut changed = false;
        let mut next = Vec::with_capacity(lines.len());
        for line in lines {
            if line.trim_start().starts_with('#') {
                next.push(line);
                continue;
            }
            let edit = rules
                .iter()
                .find_map(|rule| match rule.apply(&line) {
                    LineEdit::Unchanged => None,
                    edit => Some((rule.name.clone(), edit)),
                });
            match edit {
                Some((name, LineEdit::Replace(new_line))) => {
                    applied.push(name);
                    changed = true;
                    next.push(new_line);
                }
                Some((name, LineEdit::Drop)) => {
                    applied.push(name);
                    changed = true;
                }
                _ => next.push(line),
            }
        }
        lines = next;
        if !changed {
            break;
        }
    }

    (lines.join("\n"), applied)
}

fn diagnostic_line_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*\d+\s*│\s?(.+)$").ok()).as_ref()
}

fn backtick_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"`([^`]+)`").ok()).as_ref()
}

/// Source lines quoted in a compiler diagnostic (`12 │ code`).
pub(crate) fn diagnostic_source_lines(error_message: &str) -> Vec<String> {
    let Some(re) = diagnostic_line_regex() else {
        return Vec::new();
    };
    error_message
        .lines()
        .filter_map(|l| re.captures(l))
        .map(|caps| caps[1].trim().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}

/// Derive new rules from the failing construct named in an error message.
fn synthesize_patterns(error_code: ErrorCode, error_message: &str) -> Vec<(String, FixRule)> {
    let mut learned = Vec::new();
    match error_code {
        ErrorCode::Syntax if error_message.to_lowercase().contains("unexpected") => {
            for line in diagnostic_source_lines(error_message) {
                if line.contains("return") && !line.starts_with('#') {
                    let rule = FixRule::new(
                        "learned_comment_out",
                        Matcher::Line(line.clone()),
                        Rewrite::CommentOut,
                    );
                    learned.push((line, rule));
                }
            }
        }
        ErrorCode::UnhandledFallible => {
            let Some(re) = backtick_regex() else {
                return learned;
            };
            for caps in re.captures_iter(error_message) {
                let expr = caps[1].trim().to_string();
                if !expr.ends_with(')') || expr.contains("??") {
                    continue;
                }
                let fallback = if expr.starts_with("split(") {
                    "[]"
                } else if expr.starts_with("parse_") || expr.starts_with("to_") {
                    "null"
                } else {
                    continue;
                };
                let wrapped = format!("({expr} ?? {fallback})");
                let rule = FixRule::new(
                    "learned_wrap_fallible",
                    Matcher::Contains(expr.clone()),
                    Rewrite::Literal {
                        from: expr.clone(),
                        to: wrapped.clone(),
                    },
                )
                .unless(wrapped)
                .unless(format!("{expr} ??"));
                learned.push((expr, rule));
            }
        }
        _ => {}
    }
    learned
}

#[cfg(test)]
mod tests;
