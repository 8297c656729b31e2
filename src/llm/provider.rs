use super::models::Usage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Raw provider answer. Content checks happen in the generator.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: Option<Usage>,
    pub model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmErrorCategory {
    /// Connection, DNS, or timeout problems.
    Network,
    /// Rate limits, overload, and provider 5xx.
    Api,
    /// Empty or near-empty content.
    EmptyResponse,
    /// The model answered but the answer is unusable.
    Generation,
    /// Auth, configuration, or other problems retrying cannot fix.
    Infrastructure,
}

impl LlmErrorCategory {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            LlmErrorCategory::Network | LlmErrorCategory::Api | LlmErrorCategory::EmptyResponse
        )
    }
}

impl fmt::Display for LlmErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LlmErrorCategory::Network => "network",
            LlmErrorCategory::Api => "api",
            LlmErrorCategory::EmptyResponse => "empty_response",
            LlmErrorCategory::Generation => "generation",
            LlmErrorCategory::Infrastructure => "infrastructure",
        })
    }
}

#[derive(Debug, Clone, Error)]
#[error("{category} error: {message}")]
pub struct LlmError {
    pub category: LlmErrorCategory,
    pub message: String,
    /// Provider-suggested wait before retrying, in seconds.
    pub retry_after_secs: Option<u64>,
}

impl LlmError {
    pub fn new(category: LlmErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            retry_after_secs: None,
        }
    }

    /// Build an error whose category is inferred from its text.
    pub fn classified(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(classify_error_message(&message), message)
    }
}

/// Infer a category from free-form error text.
pub fn classify_error_message(message: &str) -> LlmErrorCategory {
    let lower = message.to_lowercase();
    let has_any = |words: &[&str]| words.iter().any(|w| lower.contains(w));

    if has_any(&["unauthorized", "invalid api key", "invalid key", "forbidden", "authentication"]) {
        return LlmErrorCategory::Infrastructure;
    }
    if has_any(&["connection", "timeout", "timed out", "network", "dns", "resolve", "unreachable"]) {
        return LlmErrorCategory::Network;
    }
    if has_any(&["rate limit", "quota", "overloaded", "service unavailable", "server error"]) {
        return LlmErrorCategory::Api;
    }
    if has_any(&["config", "not found", "missing", "permission", "access denied"]) {
        return LlmErrorCategory::Infrastructure;
    }
    LlmErrorCategory::Generation
}

const MIN_CONTENT_CHARS: usize = 10;

const PROVIDER_ERROR_PHRASES: &[&str] = &[
    "error occurred",
    "rate limited",
    "quota exceeded",
    "authentication failed",
    "service unavailable",
];

/// Sanity-check response content. Short or provider-error text is an
/// `EmptyResponse`, which the generator retries on a fallback model.
pub fn check_response_content(content: &str) -> Result<(), LlmError> {
    let trimmed = content.trim();
    if trimmed.chars().count() < MIN_CONTENT_CHARS {
        return Err(LlmError::new(
            LlmErrorCategory::EmptyResponse,
            format!("response too short ({} chars)", trimmed.chars().count()),
        ));
    }
    let lower = trimmed.to_lowercase();
    if let Some(phrase) = PROVIDER_ERROR_PHRASES.iter().find(|p| lower.contains(*p)) {
        if trimmed.len() < 200 {
            return Err(LlmError::new(
                LlmErrorCategory::EmptyResponse,
                format!("provider error text in response: {phrase}"),
            ));
        }
    }
    Ok(())
}

/// The single logical operation the core needs from a model provider.
pub trait LlmProvider: Send + Sync {
    fn complete<'a>(
        &'a self,
        model: &'a str,
        messages: &'a [ChatMessage],
        max_tokens: u32,
        temperature: f32,
    ) -> BoxFuture<'a, Result<Completion, LlmError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_provider_failures() {
        assert_eq!(
            classify_error_message("Could not connect: connection refused"),
            LlmErrorCategory::Network
        );
        assert_eq!(
            classify_error_message("Rate limit exceeded, retry after 4 seconds"),
            LlmErrorCategory::Api
        );
        assert_eq!(
            classify_error_message("401 Unauthorized"),
            LlmErrorCategory::Infrastructure
        );
        assert_eq!(
            classify_error_message("model config missing"),
            LlmErrorCategory::Infrastructure
        );
        assert_eq!(
            classify_error_message("model produced gibberish"),
            LlmErrorCategory::Generation
        );
    }

    #[test]
    fn short_content_is_empty_response() {
        let err = check_response_content("  ok ").unwrap_err();
        assert_eq!(err.category, LlmErrorCategory::EmptyResponse);
        assert!(check_response_content(". = parse_json!(.message)").is_ok());
    }

    #[test]
    fn provider_error_phrase_is_rejected() {
        let err = check_response_content("Sorry, an error occurred. Please retry.").unwrap_err();
        assert_eq!(err.category, LlmErrorCategory::EmptyResponse);
    }

    #[test]
    fn chat_message_serializes_lowercase_role() {
        let json = serde_json::to_string(&ChatMessage::user("hi")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"hi"}"#);
    }
}
