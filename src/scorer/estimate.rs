//! Static throughput estimate from the functions a program calls.

use super::tier::{PerformanceTier, TierBreakpoints};
use crate::validator::policy::strip_comment;
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

/// Rough events/CPU% each function sustains on its own.
const FUNCTION_RATES: &[(&str, f64)] = &[
    ("contains", 400.0),
    ("split", 380.0),
    ("length", 380.0),
    ("slice", 370.0),
    ("upcase", 350.0),
    ("downcase", 350.0),
    ("starts_with", 320.0),
    ("ends_with", 320.0),
    ("to_string", 280.0),
    ("to_bool", 260.0),
    ("to_int", 250.0),
    ("to_float", 240.0),
    ("parse_json", 180.0),
    ("parse_syslog", 150.0),
    ("parse_timestamp", 120.0),
    ("md5", 100.0),
    ("sha2", 90.0),
    ("capture", 12.0),
    ("match", 10.0),
    ("parse_regex", 8.0),
    ("parse_regex_all", 5.0),
];

/// Scale of the harmonic combination.
const ESTIMATE_SCALE: f64 = 1000.0;
/// Assumed for programs that call none of the known functions.
const PLAIN_ASSIGNMENT_RATE: f64 = 300.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StaticEstimate {
    pub events_per_cpu_percent: f64,
    /// Function name and number of lines calling it.
    pub calls: Vec<(String, usize)>,
    pub tier: PerformanceTier,
}

fn call_matchers() -> &'static [(&'static str, f64, Regex)] {
    static MATCHERS: OnceLock<Vec<(&'static str, f64, Regex)>> = OnceLock::new();
    MATCHERS.get_or_init(|| {
        FUNCTION_RATES
            .iter()
            .filter_map(|(name, rate)| {
                Regex::new(&format!(r"\b{name}!?\s*\("))
                    .ok()
                    .map(|re| (*name, *rate, re))
            })
            .collect()
    })
}

/// Sum of inverse rates over every (line, function) call site, scaled back
/// into events/CPU%. Never below 1.
pub fn estimate_performance(code: &str, breakpoints: &TierBreakpoints) -> StaticEstimate {
    let mut inverse_total = 0.0;
    let mut calls: Vec<(String, usize)> = Vec::new();

    for line in code.lines() {
        let line = strip_comment(line);
        if line.trim().is_empty() {
            continue;
        }
        for (name, rate, re) in call_matchers() {
            if !re.is_match(line) {
                continue;
            }
            inverse_total += 1.0 / rate;
            match calls.iter_mut().find(|(n, _)| n.as_str() == *name) {
                Some((_, count)) => *count += 1,
                None => calls.push((name.to_string(), 1)),
            }
        }
    }

    let events_per_cpu_percent = if inverse_total > 0.0 {
        (ESTIMATE_SCALE / inverse_total).round().max(1.0)
    } else {
        PLAIN_ASSIGNMENT_RATE
    };
    StaticEstimate {
        events_per_cpu_percent,
        calls,
        tier: PerformanceTier::classify(events_per_cpu_percent, breakpoints),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimate(code: &str) -> StaticEstimate {
        estimate_performance(code, &TierBreakpoints::default())
    }

    #[test]
    fn plain_assignments_use_the_default_rate() {
        let e = estimate(".source = \"sshd\"\n# parse_regex(.message, r'x')");
        assert_eq!(e.events_per_cpu_percent, 300.0);
        assert!(e.calls.is_empty());
        assert_eq!(e.tier, PerformanceTier::Fast);
    }

    #[test]
    fn string_ops_beat_regex() {
        let fast = estimate("parts = split!(.message, \" \")\n.user = parts[5]");
        let slow = estimate(". |= parse_regex!(.message, r'^(?P<user>\\S+)')");
        assert!(fast.events_per_cpu_percent > slow.events_per_cpu_percent);
        assert_eq!(fast.events_per_cpu_percent, 380_000.0);
        assert_eq!(slow.events_per_cpu_percent, 8_000.0);
    }

    #[test]
    fn rates_combine_harmonically() {
        let e = estimate("a = contains(.m, \"x\")\nb = contains(.m, \"y\")");
        assert_eq!(e.events_per_cpu_percent, 200_000.0);
        assert_eq!(e.calls, vec![("contains".to_string(), 2)]);
    }

    #[test]
    fn regex_all_is_not_counted_as_parse_regex() {
        let e = estimate("x = parse_regex_all!(.m, r'a')");
        assert_eq!(e.calls, vec![("parse_regex_all".to_string(), 1)]);
    }
}
