use super::CandidateStrategy;
use crate::sample::{render_samples, Sample};
use crate::util::truncate;

const GENERATION_SAMPLE_CHARS: usize = 6000;
const REPAIR_SAMPLE_CHARS: usize = 2000;
const STRATEGY_SAMPLE_CHARS: usize = 3000;

pub const SYSTEM_PROMPT: &str = r#"You write Vector Remap Language (VRL) programs that parse raw log events.

Rules:
- Extract only data that is visible in the event. Never invent fields such as device types or severities that the log does not carry.
- Never use regex functions (parse_regex, parse_regex_all, match, match_array, to_regex). Use contains, split, starts_with, ends_with, slice, upcase and downcase.
- Add `?? <fallback>` only to fallible calls. Infallible calls with a fallback do not compile.
- Guard fallible predicates: `if (contains(s, "x") ?? false) { ... }`.
- Never use `abort` or `return`.
- Convert the message once: `msg = to_string(.message) ?? ""` and work on `msg`.

Answer with the complete program in one ```vrl fenced block and nothing else."#;

pub fn generation_prompt(
    samples: &[Sample],
    strategy: Option<&CandidateStrategy>,
    baseline: Option<&str>,
) -> String {
    let mut prompt = String::from(
        "Write a VRL program that parses these events. Each line is one event as JSON; the raw log line is in .message.\n\n",
    );
    prompt.push_str(&render_samples(samples, GENERATION_SAMPLE_CHARS));
    prompt.push_str("\n\n");

    if let Some(strategy) = strategy {
        prompt.push_str(&format!(
            "Strategy: {} ({})\nApproach: {}\n\n",
            strategy.name, strategy.description, strategy.approach
        ));
    }
    if let Some(baseline) = baseline.filter(|b| !b.trim().is_empty()) {
        prompt.push_str(
            "This program already works on similar data. Keep its field names where they apply:\n```vrl\n",
        );
        prompt.push_str(baseline.trim());
        prompt.push_str("\n```\n\n");
    }
    prompt.push_str("Return only the program in a ```vrl fenced block.");
    prompt
}

pub fn repair_prompt(
    code: &str,
    error_message: &str,
    samples: Option<&[Sample]>,
    history_context: Option<&str>,
) -> String {
    let mut prompt = format!(
        "This VRL program fails validation.\n\nError:\n{}\n\nProgram:\n```vrl\n{}\n```\n\n",
        truncate(error_message.trim(), 3000),
        code.trim()
    );
    if let Some(context) = history_context.filter(|c| !c.trim().is_empty()) {
        prompt.push_str("Repair history:\n");
        prompt.push_str(context.trim());
        prompt.push_str("\n\n");
    }
    if let Some(samples) = samples.filter(|s| !s.is_empty()) {
        prompt.push_str("Sample events:\n");
        prompt.push_str(&render_samples(samples, REPAIR_SAMPLE_CHARS));
        prompt.push_str("\n\n");
    }
    prompt.push_str(
        "Fix this error without reintroducing earlier ones. Return the complete corrected program in a ```vrl fenced block.",
    );
    prompt
}

pub fn strategy_prompt(samples: &[Sample], count: usize) -> String {
    format!(
        "Propose {count} different ways to write a fast VRL parser for these events. \
         Regex functions are not allowed.\n\n{}\n\n\
         Answer with a JSON array of objects with the keys \"name\" (snake_case), \
         \"description\" and \"approach\". No other text.",
        render_samples(samples, STRATEGY_SAMPLE_CHARS)
    )
}

/// Program text from a model answer: the first fenced block, preferring
/// ```vrl, or the whole answer when it has no fences.
pub fn extract_code(response: &str) -> Option<String> {
    let trimmed = response.trim();
    let body = if trimmed.contains("```") {
        fenced_block(trimmed)?
    } else {
        trimmed
    };
    let body = body.trim();
    (!body.is_empty()).then(|| body.to_string())
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```vrl").or_else(|| text.find("```"))?;
    let after_open = &text[start + 3..];
    let body_start = after_open.find('\n').map(|i| i + 1)?;
    let body = &after_open[body_start..];
    let end = body.find("```").unwrap_or(body.len());
    Some(&body[..end])
}

/// Extract a JSON fragment between matching delimiters
fn extract_json_fragment(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (start <= end).then(|| &text[start..=end])
}

/// Strategies from a model answer. Malformed entries are skipped.
pub fn parse_strategies(response: &str) -> Vec<CandidateStrategy> {
    let Some(fragment) = extract_json_fragment(response, '[', ']') else {
        return Vec::new();
    };
    let Ok(items) = serde_json::from_str::<Vec<serde_json::Value>>(fragment) else {
        return Vec::new();
    };
    items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<CandidateStrategy>(item).ok())
        .filter_map(|mut s| {
            s.name = normalize_name(&s.name);
            (!s.name.is_empty()).then_some(s)
        })
        .collect()
}

fn normalize_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_vrl_fence_over_other_fences() {
        let response = "Here you go:\n```json\n{}\n```\n```vrl\n.a = 1\n.b = 2\n```\nDone.";
        assert_eq!(extract_code(response).as_deref(), Some(".a = 1\n.b = 2"));
    }

    #[test]
    fn unfenced_answer_is_taken_whole_and_empty_fence_is_none() {
        assert_eq!(extract_code("  .a = 1\n").as_deref(), Some(".a = 1"));
        assert_eq!(extract_code("```vrl\n\n```"), None);
        assert_eq!(extract_code("```vrl"), None);
    }

    #[test]
    fn unterminated_fence_keeps_the_rest() {
        assert_eq!(extract_code("```\n.a = 1").as_deref(), Some(".a = 1"));
    }

    #[test]
    fn generation_prompt_carries_strategy_and_baseline() {
        let samples = vec![Sample::message("Dec 10 06:55:46 LabSZ sshd[24200]: ok")];
        let strategy = CandidateStrategy::new("split_based_tokenizer", "tokens", "split on spaces");
        let prompt = generation_prompt(&samples, Some(&strategy), Some(".host = \"x\""));
        assert!(prompt.contains("LabSZ"));
        assert!(prompt.contains("split_based_tokenizer"));
        assert!(prompt.contains(".host = \"x\""));
    }

    #[test]
    fn repair_prompt_includes_error_and_history() {
        let prompt = repair_prompt(
            ".a = parse_json(.m)",
            "error[E103]: unhandled fallible assignment",
            None,
            Some("Iteration 1: E103"),
        );
        assert!(prompt.contains("error[E103]"));
        assert!(prompt.contains("Iteration 1: E103"));
        assert!(!prompt.contains("Sample events"));
    }

    #[test]
    fn parses_and_normalizes_strategies() {
        let response = r#"Sure:
[{"name": "String Ops Only", "description": "d", "approach": "a"},
 {"description": "missing name"},
 {"name": "split-based", "approach": "b"}]"#;
        let strategies = parse_strategies(response);
        let names: Vec<&str> = strategies.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["string_ops_only", "split_based"]);
        assert_eq!(strategies[1].description, "");
        assert!(parse_strategies("no json here").is_empty());
    }
}
