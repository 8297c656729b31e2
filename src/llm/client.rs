//! HTTP client for OpenAI-compatible chat completion endpoints.
//!
//! One request per `complete` call. Retry and model fallback live in the
//! generator, which decides per error category.

use super::models::Usage;
use super::provider::{
    BoxFuture, ChatMessage, Completion, LlmError, LlmErrorCategory, LlmProvider,
};
use crate::config::LlmConfig;
use crate::error::ForgeError;
use crate::util::truncate;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Maximum length for error content in error messages
const MAX_ERROR_CONTENT_LEN: usize = 200;

/// Sanitize API response content for error messages to prevent credential leakage.
fn sanitize_api_response(content: &str) -> String {
    const SECRET_PATTERNS: &[&str] = &[
        "api_key",
        "apikey",
        "secret",
        "password",
        "credential",
        "bearer",
        "sk-",
    ];

    let truncated = truncate(content, MAX_ERROR_CONTENT_LEN);
    let lower = truncated.to_lowercase();
    if SECRET_PATTERNS.iter().any(|p| lower.contains(p)) {
        return "(response details redacted - may contain sensitive data)".to_string();
    }
    truncated
}

/// Extract a retry-after hint like "retry after 12 seconds" from a response body.
pub(crate) fn parse_retry_after(text: &str) -> Option<u64> {
    let text_lower = text.to_lowercase();
    let pos = text_lower.find("retry")?;
    text_lower[pos..]
        .split_whitespace()
        .skip(1)
        .take(5)
        .filter_map(|word| {
            word.trim_matches(|c: char| !c.is_numeric())
                .parse::<u64>()
                .ok()
        })
        .find(|secs| *secs > 0 && *secs < 300)
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    /// Content can be null in some API responses (e.g., when refusal or error occurs)
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

/// Some providers report upstream failures inside a 200 response.
#[derive(Deserialize)]
struct ProviderErrorBody {
    error: ProviderApiError,
}

#[derive(Deserialize)]
struct ProviderApiError {
    message: String,
    #[serde(default)]
    code: Option<i32>,
}

pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
}

impl OpenAiCompatibleClient {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self, ForgeError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ForgeError::Infrastructure(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            http,
            url: url.into(),
            api_key: api_key.into(),
        })
    }

    /// Build a client from config; a missing API key is an infrastructure error.
    pub fn from_config(config: &LlmConfig) -> Result<Self, ForgeError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                ForgeError::Infrastructure(format!(
                    "No API key configured. Set {} to continue.",
                    config.api_key_env
                ))
            })?;
        Self::new(
            config.base_url.clone(),
            api_key,
            Duration::from_secs(config.request_timeout_secs.max(1)),
        )
    }

    async fn send(
        &self,
        model: &str,
        messages: &[ChatMessage],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<Completion, LlmError> {
        let request = ChatRequest {
            model,
            messages,
            max_tokens,
            temperature,
            stream: false,
        };

        let response = self
            .http
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(map_transport_error)?;

        if !status.is_success() {
            return Err(status_error(status.as_u16(), &text));
        }

        if let Ok(err_resp) = serde_json::from_str::<ProviderErrorBody>(&text) {
            let code = err_resp.error.code.unwrap_or(500);
            let mut err = status_error(
                u16::try_from(code).unwrap_or(500),
                &err_resp.error.message,
            );
            err.message = format!("Provider error: {}", truncate(&err_resp.error.message, 200));
            return Err(err);
        }

        let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
            LlmError::new(
                LlmErrorCategory::Generation,
                format!(
                    "Failed to parse provider response: {}\n{}",
                    e,
                    sanitize_api_response(&text)
                ),
            )
        })?;

        let choice = parsed.choices.into_iter().next();
        if let Some(refusal) = choice.as_ref().and_then(|c| c.message.refusal.as_ref()) {
            return Err(LlmError::new(
                LlmErrorCategory::Generation,
                format!("Request was refused: {}", truncate(refusal, 200)),
            ));
        }

        Ok(Completion {
            text: choice.and_then(|c| c.message.content).unwrap_or_default(),
            usage: parsed.usage,
            model: model.to_string(),
        })
    }
}

impl LlmProvider for OpenAiCompatibleClient {
    fn complete<'a>(
        &'a self,
        model: &'a str,
        messages: &'a [ChatMessage],
        max_tokens: u32,
        temperature: f32,
    ) -> BoxFuture<'a, Result<Completion, LlmError>> {
        Box::pin(self.send(model, messages, max_tokens, temperature))
    }
}

fn map_transport_error(err: reqwest::Error) -> LlmError {
    if err.is_timeout() {
        LlmError::new(LlmErrorCategory::Network, "LLM request timed out")
    } else if err.is_connect() {
        LlmError::new(
            LlmErrorCategory::Network,
            "Could not connect to the LLM provider. Check your network.",
        )
    } else if err.is_builder() {
        LlmError::new(LlmErrorCategory::Infrastructure, err.to_string())
    } else {
        LlmError::classified(err.to_string())
    }
}

/// Map a non-success HTTP status to an error category.
pub(crate) fn status_error(status: u16, body: &str) -> LlmError {
    match status {
        429 => LlmError {
            category: LlmErrorCategory::Api,
            message: "Rate limited by the LLM provider".to_string(),
            retry_after_secs: parse_retry_after(body),
        },
        500..=599 => LlmError::new(
            LlmErrorCategory::Api,
            format!(
                "Provider server error ({}). The service may be temporarily unavailable.",
                status
            ),
        ),
        401 | 403 => LlmError::new(
            LlmErrorCategory::Infrastructure,
            "Invalid or unauthorized API key",
        ),
        _ => LlmError::new(
            LlmErrorCategory::Infrastructure,
            format!("API error {}: {}", status, sanitize_api_response(body)),
        ),
    }
}
