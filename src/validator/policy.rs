//! Static policy checks that never touch the engine.

use crate::error_code::{FIELD_CONFLICT_PREFIX, REJECTED_PREFIX};
use anyhow::Context;
use regex::Regex;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

#[derive(Debug, Clone, Default)]
pub struct ConstructPolicy {
    rejected: Vec<(String, Option<Regex>)>,
    preferred: Vec<String>,
    reserved_fields: BTreeSet<String>,
}

impl ConstructPolicy {
    pub fn new(rejected: &[String], preferred: &[String], reserved_fields: &[String]) -> Self {
        let rejected = rejected
            .iter()
            .map(|name| {
                let re = Regex::new(&format!(r"\b{}!?\s*\(", regex::escape(name))).ok();
                (name.clone(), re)
            })
            .collect();
        Self {
            rejected,
            preferred: preferred.to_vec(),
            reserved_fields: reserved_fields
                .iter()
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .collect(),
        }
    }

    /// Rejected functions called anywhere outside comments, in configured order.
    pub fn find_rejected(&self, code: &str) -> Vec<String> {
        let stripped: Vec<&str> = code.lines().map(strip_comment).collect();
        self.rejected
            .iter()
            .filter(|(name, re)| match re {
                Some(re) => stripped.iter().any(|line| re.is_match(line)),
                None => stripped.iter().any(|line| line.contains(&format!("{name}("))),
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn rejection_message(&self, found: &[String]) -> String {
        format!(
            "{} VRL contains regex functions: {}. Regex matching is too slow for this pipeline. Use instead: {}",
            REJECTED_PREFIX,
            found.join(", "),
            self.preferred.join(", ")
        )
    }

    pub fn has_reserved_fields(&self) -> bool {
        !self.reserved_fields.is_empty()
    }

    /// Assigned paths that collide with reserved output fields.
    pub fn find_field_conflicts(&self, code: &str) -> Vec<String> {
        let Some(re) = assignment_regex() else {
            return Vec::new();
        };
        let mut conflicts = Vec::new();
        let mut seen = BTreeSet::new();
        for line in code.lines().map(strip_comment) {
            for caps in re.captures_iter(line) {
                let field = caps[1].to_string();
                if !seen.insert(field.clone()) {
                    continue;
                }
                if let Some(conflict) = self.conflict_for(&field) {
                    conflicts.push(conflict);
                }
            }
        }
        conflicts
    }

    fn conflict_for(&self, field: &str) -> Option<String> {
        if self.reserved_fields.contains(field) {
            return Some(format!("{field} (reserved)"));
        }
        let field_parts: Vec<&str> = field.split('.').collect();
        for reserved in self.reserved_fields.iter().filter(|r| r.contains('.')) {
            let reserved_parts: Vec<&str> = reserved.split('.').collect();
            if field_parts.len() == 1 && field_parts[0] == reserved_parts[0] {
                return Some(format!("{field} (conflicts with nested reserved field: {reserved})"));
            }
            if field_parts.len() >= reserved_parts.len()
                && field_parts[..reserved_parts.len()] == reserved_parts[..]
            {
                return Some(format!("{field} (inside reserved field: {reserved})"));
            }
        }
        None
    }

    pub fn conflict_message(conflicts: &[String]) -> String {
        format!(
            "{} VRL writes reserved fields: {}. Rename these outputs.",
            FIELD_CONFLICT_PREFIX,
            conflicts.join("; ")
        )
    }
}

fn assignment_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|[^\w.!=<>])\.(\w+(?:\.\w+)*)\s*=[^=]").ok())
        .as_ref()
}

/// Drop a trailing `#` comment, ignoring `#` inside string literals.
/// Quoted strings use `"`; raw, string and timestamp literals use
/// `r'..'`, `s'..'` and `t'..'`.
pub(crate) fn strip_comment(line: &str) -> &str {
    let mut delimiter: Option<char> = None;
    let mut escaped = false;
    let mut prev: Option<char> = None;
    for (idx, ch) in line.char_indices() {
        match delimiter {
            Some(close) => {
                if ch == '\\' {
                    escaped = !escaped;
                } else {
                    if ch == close && !escaped {
                        delimiter = None;
                    }
                    escaped = false;
                }
            }
            None => match ch {
                '"' => delimiter = Some('"'),
                '\'' if matches!(prev, Some('r' | 's' | 't')) => delimiter = Some('\''),
                '#' => return &line[..idx],
                _ => {}
            },
        }
        prev = Some(ch);
    }
    line
}

/// Read reserved field names from a CSV file with a `column` header.
pub fn load_reserved_fields_csv(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read reserved fields from {}", path.display()))?;
    let mut lines = content.lines();
    let header = lines.next().unwrap_or_default();
    let column = header
        .split(',')
        .position(|h| h.trim().trim_matches('"').trim_start_matches('\u{feff}') == "column")
        .with_context(|| format!("{} has no 'column' header", path.display()))?;
    Ok(lines
        .filter_map(|line| line.split(',').nth(column))
        .map(|cell| cell.trim().trim_matches('"').to_string())
        .filter(|cell| !cell.is_empty())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn policy(reserved: &[&str]) -> ConstructPolicy {
        let rejected: Vec<String> = ["parse_regex", "parse_regex_all", "match", "match_array", "to_regex"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let preferred: Vec<String> = ["contains", "split"].iter().map(|s| s.to_string()).collect();
        let reserved: Vec<String> = reserved.iter().map(|s| s.to_string()).collect();
        ConstructPolicy::new(&rejected, &preferred, &reserved)
    }

    #[test]
    fn detects_calls_and_bang_calls() {
        let p = policy(&[]);
        assert_eq!(
            p.find_rejected(". |= parse_regex!(.message, r'^(?P<a>\\w+)')"),
            vec!["parse_regex"]
        );
        assert_eq!(
            p.find_rejected("if match(.message, r'sshd') { .x = 1 }\n.y = match_array(.t, [r'a'])"),
            vec!["match", "match_array"]
        );
    }

    #[test]
    fn ignores_comments_and_lookalikes() {
        let p = policy(&[]);
        assert!(p.find_rejected("# parse_regex(.message) is too slow").is_empty());
        assert!(p.find_rejected(".matched = my_match(.a)").is_empty());
        assert!(p
            .find_rejected(".note = \"# not a comment\" # match(.a)")
            .is_empty());
    }

    #[test]
    fn rejection_message_names_functions_and_alternatives() {
        let p = policy(&[]);
        let msg = p.rejection_message(&["parse_regex".to_string()]);
        assert!(msg.starts_with("REJECTED:"));
        assert!(msg.contains("parse_regex"));
        assert!(msg.contains("Use instead: contains, split"));
    }

    #[test]
    fn strip_comment_respects_strings() {
        assert_eq!(strip_comment(".a = \"x#y\" # note"), ".a = \"x#y\" ");
        assert_eq!(strip_comment("# all comment"), "");
        assert_eq!(strip_comment(".a = \"esc \\\" # still string\""), ".a = \"esc \\\" # still string\"");
        assert_eq!(strip_comment(".a = r'x#y' # note"), ".a = r'x#y' ");
    }

    #[test]
    fn raw_string_hash_does_not_hide_later_calls() {
        let found = policy(&[]).find_rejected(r#"parts = split(.message, r'#') ?? []; .m = parse_regex!(.message, r'x')"#);
        assert_eq!(found, vec!["parse_regex".to_string()]);
    }

    #[test]
    fn field_conflicts_cover_exact_and_nested() {
        let p = policy(&["timestamp", "tags.collector.host"]);
        let conflicts = p.find_field_conflicts(
            ".timestamp = now()\n.tags = {}\n.tags.collector.host.name = \"a\"\n.ok = .timestamp == 1",
        );
        assert_eq!(conflicts.len(), 3);
        assert!(conflicts[0].starts_with("timestamp"));
        assert!(conflicts[1].contains("nested reserved field"));
        assert!(conflicts[2].contains("inside reserved field"));
    }

    #[test]
    fn comparisons_are_not_assignments() {
        let p = policy(&["timestamp"]);
        assert!(p.find_field_conflicts("if .timestamp == null { .x = 1 }").is_empty());
    }

    #[test]
    fn loads_reserved_fields_from_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("common_header.csv");
        fs::write(&path, "\u{feff}column,type,comment\ntimestamp,DateTime,event time\n\"tags.host\",String,\n").unwrap();
        let fields = load_reserved_fields_csv(&path).unwrap();
        assert_eq!(fields, vec!["timestamp", "tags.host"]);
    }
}
