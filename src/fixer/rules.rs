//! Line-level rewrite rules.
//!
//! A rule is a trigger plus a rewrite. Rules for one error code are kept in
//! order and the first rule that changes a line wins for that line.

use crate::error_code::ErrorCode;
use regex::Regex;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub enum Matcher {
    /// Regex that must match somewhere in the line.
    Pattern(Regex),
    /// Literal substring.
    Contains(String),
    /// Trimmed line equals this text.
    Line(String),
}

impl Matcher {
    pub fn matches(&self, line: &str) -> bool {
        match self {
            Matcher::Pattern(re) => re.is_match(line),
            Matcher::Contains(needle) => line.contains(needle.as_str()),
            Matcher::Line(text) => line.trim() == text,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Rewrite {
    /// Replace the first regex match using a `${n}` template. Needs a `Pattern` trigger.
    Substitute(String),
    /// Replace the first literal occurrence of `from`.
    Literal { from: String, to: String },
    CommentOut,
    DropLine,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEdit {
    Unchanged,
    Replace(String),
    Drop,
}

#[derive(Debug, Clone)]
pub struct FixRule {
    pub name: String,
    pub trigger: Matcher,
    /// Skip lines already containing any of these.
    pub unless: Vec<String>,
    pub rewrite: Rewrite,
}

impl FixRule {
    pub fn new(name: impl Into<String>, trigger: Matcher, rewrite: Rewrite) -> Self {
        Self {
            name: name.into(),
            trigger,
            unless: Vec::new(),
            rewrite,
        }
    }

    pub fn unless(mut self, text: impl Into<String>) -> Self {
        self.unless.push(text.into());
        self
    }

    pub fn apply(&self, line: &str) -> LineEdit {
        if self.unless.iter().any(|guard| line.contains(guard.as_str())) {
            return LineEdit::Unchanged;
        }
        if !self.trigger.matches(line) {
            return LineEdit::Unchanged;
        }
        let rewritten = match &self.rewrite {
            Rewrite::Substitute(template) => match &self.trigger {
                Matcher::Pattern(re) => re.replacen(line, 1, template.as_str()).into_owned(),
                _ => return LineEdit::Unchanged,
            },
            Rewrite::Literal { from, to } => line.replacen(from.as_str(), to, 1),
            Rewrite::CommentOut => {
                let indent_len = line.len() - line.trim_start().len();
                format!("{}# {}", &line[..indent_len], line.trim_start())
            }
            Rewrite::DropLine => return LineEdit::Drop,
        };
        if rewritten == line {
            LineEdit::Unchanged
        } else {
            LineEdit::Replace(rewritten)
        }
    }
}

fn pattern(name: &str, re: &str, rewrite: Rewrite) -> Option<FixRule> {
    Regex::new(re)
        .ok()
        .map(|re| FixRule::new(name, Matcher::Pattern(re), rewrite))
}

fn substitute(name: &str, re: &str, template: &str) -> Option<FixRule> {
    pattern(name, re, Rewrite::Substitute(template.to_string()))
}

/// Function names models tend to invent, mapped to the real ones.
const FUNCTION_ALIASES: &[(&str, &str)] = &[
    ("lowercase", "downcase"),
    ("to_lower", "downcase"),
    ("uppercase", "upcase"),
    ("to_upper", "upcase"),
    ("trim", "strip_whitespace"),
    ("strip", "strip_whitespace"),
    ("len", "length"),
    ("startswith", "starts_with"),
    ("endswith", "ends_with"),
    ("to_str", "to_string"),
];

/// Built-in rules, in priority order per error code.
pub fn seed_rules() -> HashMap<ErrorCode, Vec<FixRule>> {
    let mut table: HashMap<ErrorCode, Vec<FixRule>> = HashMap::new();

    table.insert(
        ErrorCode::UnnecessaryCoalesce,
        [
            substitute("split_default_array", r"(split\([^()]*\))\s*\?\?\s*\[\]", "${1}"),
            substitute(
                "string_fn_default_string",
                r#"((?:string!|to_string|upcase|downcase|strip_whitespace)\([^()]*\))\s*\?\?\s*"""#,
                "${1}",
            ),
            substitute(
                "predicate_default_bool",
                r"((?:contains|starts_with|ends_with)\([^()]*\))\s*\?\?\s*(?:false|true)\b",
                "${1}",
            ),
            substitute(
                "exists_default",
                r"(exists\([^()]*\))\s*\?\?\s*(?:false|null)\b",
                "${1}",
            ),
            substitute("length_default", r"(length\([^()]*\))\s*\?\?\s*\d+", "${1}"),
            substitute("field_default_null", r"(\.[A-Za-z_][\w.]*)\s*\?\?\s*null\b", "${1}"),
        ]
        .into_iter()
        .flatten()
        .collect(),
    );

    table.insert(
        ErrorCode::UnhandledFallible,
        [
            substitute(
                "split_assignment_default",
                r"^(\s*\.?[\w.]+\s*=\s*split\([^?]*\))\s*$",
                "${1} ?? []",
            ),
            substitute(
                "parse_assignment_default",
                r"^(\s*\.?[\w.]+\s*=\s*(?:parse_json|parse_timestamp|parse_syslog|parse_key_value|parse_int|to_int|to_float)\([^?]*\))\s*$",
                "${1} ?? null",
            ),
        ]
        .into_iter()
        .flatten()
        .collect(),
    );

    table.insert(
        ErrorCode::UndefinedFunction,
        FUNCTION_ALIASES
            .iter()
            .filter_map(|(bad, good)| {
                substitute(
                    &format!("alias_{bad}"),
                    &format!(r"\b{bad}\("),
                    &format!("{good}("),
                )
            })
            .collect(),
    );

    table.insert(
        ErrorCode::FalliblePredicate,
        [substitute(
            "wrap_fallible_predicate",
            r"^(\s*\}?\s*(?:else\s+)?if\s+)((?:parse_\w+|to_\w+|contains|starts_with|ends_with)\([^{]*\))(\s*\{)",
            "${1}(${2} ?? false)${3}",
        )]
        .into_iter()
        .flatten()
        .collect(),
    );

    table.insert(
        ErrorCode::AbortInInfallible,
        [
            pattern("drop_abort_statement", r"^\s*abort\b", Rewrite::DropLine),
            substitute("empty_abort_block", r"\{\s*abort\s*\}", "{}"),
        ]
        .into_iter()
        .flatten()
        .collect(),
    );

    table.insert(
        ErrorCode::Syntax,
        [
            pattern("comment_bare_return", r"^\s*return\b", Rewrite::CommentOut),
            substitute(
                "negative_last_index",
                r"\[length\(\w+\)\s*-\s*1\]",
                "[-1]",
            ),
        ]
        .into_iter()
        .flatten()
        .collect(),
    );

    table
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule_named(code: ErrorCode, name: &str) -> FixRule {
        seed_rules()
            .remove(&code)
            .unwrap()
            .into_iter()
            .find(|r| r.name == name)
            .unwrap()
    }

    #[test]
    fn every_seed_pattern_compiles() {
        let table = seed_rules();
        assert_eq!(table[&ErrorCode::UnnecessaryCoalesce].len(), 6);
        assert_eq!(table[&ErrorCode::UnhandledFallible].len(), 2);
        assert_eq!(table[&ErrorCode::UndefinedFunction].len(), FUNCTION_ALIASES.len());
        assert_eq!(table[&ErrorCode::FalliblePredicate].len(), 1);
        assert_eq!(table[&ErrorCode::AbortInInfallible].len(), 2);
        assert_eq!(table[&ErrorCode::Syntax].len(), 2);
    }

    #[test]
    fn substitute_removes_redundant_coalesce() {
        let rule = rule_named(ErrorCode::UnnecessaryCoalesce, "split_default_array");
        assert_eq!(
            rule.apply(r#"parts = split(.message, " ") ?? []"#),
            LineEdit::Replace(r#"parts = split(.message, " ")"#.to_string())
        );
    }

    #[test]
    fn comment_out_keeps_indentation() {
        let rule = rule_named(ErrorCode::Syntax, "comment_bare_return");
        assert_eq!(
            rule.apply("    return ."),
            LineEdit::Replace("    # return .".to_string())
        );
    }

    #[test]
    fn unless_guard_blocks_reapplication() {
        let rule = FixRule::new(
            "wrap",
            Matcher::Contains("split(.a)".into()),
            Rewrite::Literal {
                from: "split(.a)".into(),
                to: "(split(.a) ?? [])".into(),
            },
        )
        .unless("(split(.a) ?? [])");
        let LineEdit::Replace(once) = rule.apply("x = split(.a)") else {
            panic!("expected rewrite");
        };
        assert_eq!(once, "x = (split(.a) ?? [])");
        assert_eq!(rule.apply(&once), LineEdit::Unchanged);
    }

    #[test]
    fn predicate_wrap_handles_else_if() {
        let rule = rule_named(ErrorCode::FalliblePredicate, "wrap_fallible_predicate");
        assert_eq!(
            rule.apply("} else if contains(.message, \"sshd\") {"),
            LineEdit::Replace("} else if (contains(.message, \"sshd\") ?? false) {".to_string())
        );
    }

    #[test]
    fn drop_line_for_abort() {
        let rule = rule_named(ErrorCode::AbortInInfallible, "drop_abort_statement");
        assert_eq!(rule.apply("  abort"), LineEdit::Drop);
        assert_eq!(rule.apply(".aborted = true"), LineEdit::Unchanged);
    }
}
