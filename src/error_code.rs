//! Error-code taxonomy for validation failures.
//!
//! Compiler diagnostics carry `error[E###]` tags; policy and engine failures
//! carry a fixed message prefix. Everything else is `Unknown` and can only
//! be repaired by the LLM.

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

pub const REJECTED_PREFIX: &str = "REJECTED:";
pub const FIELD_CONFLICT_PREFIX: &str = "FIELD_CONFLICT:";
pub const SYNTAX_PREFIX: &str = "SYNTAX:";
pub const PROCESSING_PREFIX: &str = "PROCESSING:";
pub const TIMEOUT_PREFIX: &str = "TIMEOUT:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// E103: fallible call result used without handling the error.
    UnhandledFallible,
    /// E105: call to a function that does not exist.
    UndefinedFunction,
    /// E110: fallible expression used as an `if` predicate.
    FalliblePredicate,
    /// E203: generic syntax error.
    Syntax,
    /// E620: `abort` used where the program must be infallible.
    AbortInInfallible,
    /// E651: `??` applied to an infallible expression.
    UnnecessaryCoalesce,
    /// Any other compiler code.
    Compiler(u16),
    RejectedConstruct,
    FieldConflict,
    Timeout,
    Unknown,
}

impl ErrorCode {
    pub fn from_number(n: u16) -> Self {
        match n {
            103 => ErrorCode::UnhandledFallible,
            105 => ErrorCode::UndefinedFunction,
            110 => ErrorCode::FalliblePredicate,
            203 => ErrorCode::Syntax,
            620 => ErrorCode::AbortInInfallible,
            651 => ErrorCode::UnnecessaryCoalesce,
            other => ErrorCode::Compiler(other),
        }
    }

    pub fn number(self) -> Option<u16> {
        match self {
            ErrorCode::UnhandledFallible => Some(103),
            ErrorCode::UndefinedFunction => Some(105),
            ErrorCode::FalliblePredicate => Some(110),
            ErrorCode::Syntax => Some(203),
            ErrorCode::AbortInInfallible => Some(620),
            ErrorCode::UnnecessaryCoalesce => Some(651),
            ErrorCode::Compiler(n) => Some(n),
            _ => None,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ErrorCode::UnhandledFallible => "unhandled fallible operation",
            ErrorCode::UndefinedFunction => "undefined function",
            ErrorCode::FalliblePredicate => "fallible predicate",
            ErrorCode::Syntax => "syntax error",
            ErrorCode::AbortInInfallible => "abort in infallible context",
            ErrorCode::UnnecessaryCoalesce => "redundant error coalescing",
            ErrorCode::Compiler(_) => "compiler error",
            ErrorCode::RejectedConstruct => "rejected construct",
            ErrorCode::FieldConflict => "reserved field conflict",
            ErrorCode::Timeout => "engine timeout",
            ErrorCode::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.number() {
            Some(n) => write!(f, "E{n}"),
            None => f.write_str(match self {
                ErrorCode::RejectedConstruct => "REJECTED",
                ErrorCode::FieldConflict => "FIELD_CONFLICT",
                ErrorCode::Timeout => "TIMEOUT",
                _ => "UNKNOWN",
            }),
        }
    }
}

impl FromStr for ErrorCode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some(n) = trimmed
            .strip_prefix('E')
            .and_then(|digits| digits.parse::<u16>().ok())
        {
            return Ok(ErrorCode::from_number(n));
        }
        Ok(match trimmed {
            "REJECTED" => ErrorCode::RejectedConstruct,
            "FIELD_CONFLICT" => ErrorCode::FieldConflict,
            "TIMEOUT" => ErrorCode::Timeout,
            _ => ErrorCode::Unknown,
        })
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(raw.parse::<ErrorCode>().unwrap_or(ErrorCode::Unknown))
    }
}

fn error_tag_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"error\[E(\d+)\]").ok()).as_ref()
}

/// Classify a validation error message.
pub fn extract_error_code(message: &str) -> ErrorCode {
    if let Some(caps) = error_tag_regex().and_then(|re| re.captures(message)) {
        if let Ok(n) = caps[1].parse::<u16>() {
            return ErrorCode::from_number(n);
        }
    }

    let trimmed = message.trim_start();
    if trimmed.starts_with(REJECTED_PREFIX) || trimmed.starts_with("PERFORMANCE") {
        return ErrorCode::RejectedConstruct;
    }
    if trimmed.starts_with(FIELD_CONFLICT_PREFIX) {
        return ErrorCode::FieldConflict;
    }
    if trimmed.starts_with(TIMEOUT_PREFIX) {
        return ErrorCode::Timeout;
    }

    let lower = message.to_lowercase();
    if lower.contains("syntax") {
        ErrorCode::Syntax
    } else if lower.contains("coalescing") {
        ErrorCode::UnnecessaryCoalesce
    } else if lower.contains("fallible") {
        ErrorCode::UnhandledFallible
    } else {
        ErrorCode::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_tagged_compiler_codes() {
        let msg = "error[E651]: unnecessary error coalescing operation\n  ┌─ :2:9";
        assert_eq!(extract_error_code(msg), ErrorCode::UnnecessaryCoalesce);
        assert_eq!(
            extract_error_code("SYNTAX: error[E103]: unhandled fallible assignment"),
            ErrorCode::UnhandledFallible
        );
        assert_eq!(
            extract_error_code("error[E999]: something new"),
            ErrorCode::Compiler(999)
        );
    }

    #[test]
    fn prefixes_classify_policy_and_timeout_failures() {
        assert_eq!(
            extract_error_code("REJECTED: VRL contains regex functions: parse_regex"),
            ErrorCode::RejectedConstruct
        );
        assert_eq!(
            extract_error_code("FIELD_CONFLICT: host (reserved)"),
            ErrorCode::FieldConflict
        );
        assert_eq!(
            extract_error_code("TIMEOUT: engine exceeded 30s"),
            ErrorCode::Timeout
        );
    }

    #[test]
    fn falls_back_to_message_keywords() {
        assert_eq!(extract_error_code("Syntax problem near '}'"), ErrorCode::Syntax);
        assert_eq!(
            extract_error_code("needless coalescing"),
            ErrorCode::UnnecessaryCoalesce
        );
        assert_eq!(
            extract_error_code("expression is fallible"),
            ErrorCode::UnhandledFallible
        );
        assert_eq!(extract_error_code("engine exploded"), ErrorCode::Unknown);
    }

    #[test]
    fn display_and_parse_agree() {
        for code in [
            ErrorCode::UnhandledFallible,
            ErrorCode::Syntax,
            ErrorCode::Compiler(412),
            ErrorCode::RejectedConstruct,
            ErrorCode::FieldConflict,
            ErrorCode::Timeout,
            ErrorCode::Unknown,
        ] {
            assert_eq!(code.to_string().parse::<ErrorCode>().ok(), Some(code));
        }
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&ErrorCode::AbortInInfallible).unwrap();
        assert_eq!(json, "\"E620\"");
        let back: ErrorCode = serde_json::from_str("\"TIMEOUT\"").unwrap();
        assert_eq!(back, ErrorCode::Timeout);
    }
}
