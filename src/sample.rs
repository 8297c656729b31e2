//! Input log samples.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

/// One opaque input record. Non-object input is wrapped as `{"message": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sample(Value);

impl Sample {
    pub fn new(value: Value) -> Self {
        match value {
            Value::Object(_) => Sample(value),
            other => {
                let message = match other {
                    Value::String(s) => Value::String(s),
                    v => Value::String(v.to_string()),
                };
                let mut map = Map::new();
                map.insert("message".to_string(), message);
                Sample(Value::Object(map))
            }
        }
    }

    /// Parse one line of input: JSON objects are kept, anything else becomes a message.
    pub fn from_line(line: &str) -> Self {
        match serde_json::from_str::<Value>(line) {
            Ok(value @ Value::Object(_)) => Sample(value),
            _ => Sample::message(line),
        }
    }

    pub fn message(text: &str) -> Self {
        Sample::new(Value::String(text.to_string()))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Compact single-line JSON, the framing the engine's file source reads.
    pub fn to_json_line(&self) -> String {
        self.0.to_string()
    }
}

/// Load samples from a JSON array file or a JSON-lines / plain-text file.
pub fn load_samples(path: &Path) -> anyhow::Result<Vec<Sample>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read samples from {}", path.display()))?;
    Ok(parse_samples(&content))
}

pub fn parse_samples(content: &str) -> Vec<Sample> {
    let trimmed = content.trim_start();
    if trimmed.starts_with('[') {
        if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(trimmed) {
            return items.into_iter().map(Sample::new).collect();
        }
    }
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(Sample::from_line)
        .collect()
}

/// Render samples as JSON lines, stopping once `max_chars` would be exceeded.
pub fn render_samples(samples: &[Sample], max_chars: usize) -> String {
    let mut out = String::new();
    for sample in samples {
        let line = sample.to_json_line();
        if !out.is_empty() && out.len() + line.len() + 1 > max_chars {
            break;
        }
        out.push_str(&line);
        out.push('\n');
    }
    out
}

/// Repeat the pool until `size` samples are produced.
pub fn cycle_to_batch(samples: &[Sample], size: usize) -> Vec<Sample> {
    if samples.is_empty() {
        return Vec::new();
    }
    samples.iter().cycle().take(size).cloned().collect()
}
