//! LLM-backed code generation.
//!
//! A [`Generator`] owns one conversation: the seed generation and every
//! repair for a candidate go through the same bounded history, so the
//! model sees what it already tried. Provider failures are retried per
//! category (see [`retry`]); the caller only ever sees
//! [`ForgeError::Infrastructure`] or [`ForgeError::Generation`].

pub mod prompts;
pub mod retry;

use crate::config::GenerationConfig;
use crate::error::{ForgeError, ForgeResult};
use crate::error_code::{extract_error_code, ErrorCode};
use crate::llm::provider::{check_response_content, BoxFuture};
use crate::llm::{
    merge_usage, next_fallback, ChatMessage, ConversationHistory, LlmError, LlmErrorCategory,
    LlmProvider, Usage,
};
use crate::sample::Sample;
use retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const SIMPLIFY_STRATEGY_NAME: &str = "anti_cyclical_simple";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandidateStrategy {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub approach: String,
}

impl CandidateStrategy {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        approach: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            approach: approach.into(),
        }
    }

    /// Override used after a cycle is detected.
    pub fn simplify() -> Self {
        Self::new(
            SIMPLIFY_STRATEGY_NAME,
            "Ultra-simple VRL to break error cycles",
            "Minimal logic, avoid complex patterns that failed before",
        )
    }

    pub fn is_simplify(&self) -> bool {
        self.name == SIMPLIFY_STRATEGY_NAME
    }

    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(
                "string_ops_only",
                "Pure string functions",
                "contains, starts_with and slice on the message; no parsers",
            ),
            Self::new(
                "split_based_tokenizer",
                "Positional tokens",
                "split the message on delimiters and index into the parts",
            ),
            Self::new(
                "hybrid_structured",
                "Structured parsers where the format allows",
                "parse_syslog or parse_key_value first, string functions for the rest",
            ),
        ]
    }

    /// Exactly `count` strategies with unique names: `planned` first, then
    /// the defaults, cycling with a numeric suffix when more are needed.
    pub fn fill_to(planned: Vec<Self>, count: usize) -> Vec<Self> {
        let mut out: Vec<Self> = Vec::with_capacity(count);
        for strategy in planned {
            if out.len() == count {
                break;
            }
            if !out.iter().any(|s| s.name == strategy.name) {
                out.push(strategy);
            }
        }
        let defaults = Self::defaults();
        let mut round = 1;
        while out.len() < count {
            for base in &defaults {
                if out.len() == count {
                    break;
                }
                let mut strategy = base.clone();
                if round > 1 {
                    strategy.name = format!("{}_{}", base.name, round);
                }
                if !out.iter().any(|s| s.name == strategy.name) {
                    out.push(strategy);
                }
            }
            round += 1;
        }
        out
    }
}

/// Code plus the usage spent producing it.
#[derive(Debug, Clone, PartialEq)]
pub struct Generated {
    pub code: String,
    pub usage: Option<Usage>,
}

pub trait CodeGenerator: Send + Sync {
    fn generate<'a>(
        &'a self,
        samples: &'a [Sample],
        strategy: Option<&'a CandidateStrategy>,
        baseline: Option<&'a str>,
    ) -> BoxFuture<'a, ForgeResult<Generated>>;

    fn repair<'a>(
        &'a self,
        code: &'a str,
        error_message: &'a str,
        samples: Option<&'a [Sample]>,
        history_context: Option<&'a str>,
    ) -> BoxFuture<'a, ForgeResult<Generated>>;
}

/// Builds one generator per candidate so conversations never mix.
pub trait GeneratorFactory: Send + Sync {
    fn create(&self, strategy: &CandidateStrategy) -> Arc<dyn CodeGenerator>;
}

impl<F> GeneratorFactory for F
where
    F: Fn(&CandidateStrategy) -> Arc<dyn CodeGenerator> + Send + Sync,
{
    fn create(&self, strategy: &CandidateStrategy) -> Arc<dyn CodeGenerator> {
        self(strategy)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub iterations: usize,
    pub usage: Option<Usage>,
    pub total_cost: f64,
    pub conversation_messages: usize,
    pub error_codes_seen: Vec<ErrorCode>,
}

struct SessionState {
    history: ConversationHistory,
    iterations: usize,
    usage: Option<Usage>,
    error_codes_seen: Vec<ErrorCode>,
}

pub struct Generator {
    provider: Arc<dyn LlmProvider>,
    models: Vec<String>,
    settings: GenerationConfig,
    retry: RetryPolicy,
    session_id: Uuid,
    state: Mutex<SessionState>,
}

impl Generator {
    pub fn new(provider: Arc<dyn LlmProvider>, models: Vec<String>, settings: GenerationConfig) -> Self {
        let mut history = ConversationHistory::new(settings.history_turns);
        history.set_system(prompts::SYSTEM_PROMPT);
        Self {
            provider,
            models,
            settings,
            retry: RetryPolicy::default(),
            session_id: Uuid::new_v4(),
            state: Mutex::new(SessionState {
                history,
                iterations: 0,
                usage: None,
                error_codes_seen: Vec::new(),
            }),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn summary(&self) -> SessionSummary {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        SessionSummary {
            session_id: self.session_id,
            iterations: state.iterations,
            usage: state.usage.clone(),
            total_cost: state.usage.as_ref().map(Usage::cost).unwrap_or(0.0),
            conversation_messages: state.history.len(),
            error_codes_seen: state.error_codes_seen.clone(),
        }
    }

    /// Ask the model for `count` distinct strategies. Unusable answers fall
    /// back to the built-in set; only infrastructure failures are errors.
    pub async fn plan_strategies(
        &self,
        samples: &[Sample],
        count: usize,
    ) -> ForgeResult<(Vec<CandidateStrategy>, Option<Usage>)> {
        let messages = vec![
            ChatMessage::system(prompts::SYSTEM_PROMPT),
            ChatMessage::user(prompts::strategy_prompt(samples, count)),
        ];
        let planned = match self
            .complete_with_retry(&messages, self.settings.generation_temperature)
            .await
        {
            Ok((text, usage)) => (prompts::parse_strategies(&text), usage),
            Err(err) if err.is_infrastructure() => return Err(err),
            Err(err) => {
                warn!(error = %err, "strategy planning failed; using built-in strategies");
                (Vec::new(), None)
            }
        };
        let (strategies, usage) = planned;
        if strategies.len() < count {
            debug!(planned = strategies.len(), count, "filling strategies from defaults");
        }
        Ok((CandidateStrategy::fill_to(strategies, count), usage))
    }

    fn record_turn(&self, prompt: String, code: &str, usage: Option<&Usage>, error_code: Option<ErrorCode>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.history.push_turn(prompt, format!("```vrl\n{code}\n```"));
        state.iterations += 1;
        if let Some(usage) = usage {
            state.usage = merge_usage(state.usage.take(), Some(usage.clone()));
        }
        if let Some(code) = error_code {
            if !state.error_codes_seen.contains(&code) {
                state.error_codes_seen.push(code);
            }
        }
    }

    fn messages_for(&self, prompt: &str) -> Vec<ChatMessage> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .history
            .messages_for(prompt)
    }

    async fn complete_code(
        &self,
        prompt: String,
        temperature: f32,
        error_code: Option<ErrorCode>,
    ) -> ForgeResult<Generated> {
        let messages = self.messages_for(&prompt);
        let (text, usage) = self.complete_with_retry(&messages, temperature).await?;
        let code = prompts::extract_code(&text)
            .ok_or_else(|| ForgeError::Generation("response contained no VRL code".to_string()))?;
        self.record_turn(prompt, &code, usage.as_ref(), error_code);
        Ok(Generated { code, usage })
    }

    /// One logical completion. Retries per category, moving down the model
    /// chain on empty answers, and merges usage across attempts.
    async fn complete_with_retry(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> ForgeResult<(String, Option<Usage>)> {
        let mut model_idx = 0;
        let mut attempts: HashMap<LlmErrorCategory, u32> = HashMap::new();
        let mut usage: Option<Usage> = None;

        loop {
            let model = self
                .models
                .get(model_idx)
                .ok_or_else(|| ForgeError::Config("no LLM models configured".to_string()))?;
            let result = self
                .provider
                .complete(model, messages, self.settings.max_tokens, temperature)
                .await;

            let err = match result {
                Ok(completion) => {
                    usage = merge_usage(usage, completion.usage.clone());
                    match check_response_content(&completion.text) {
                        Ok(()) => return Ok((completion.text, usage)),
                        Err(err) => err,
                    }
                }
                Err(err) => err,
            };

            let Some(rule) = self.retry.rule_for(err.category) else {
                return Err(terminal_error(err));
            };
            let attempt = attempts.entry(err.category).or_insert(0);
            *attempt += 1;
            if *attempt > rule.max_retries {
                return Err(exhausted_error(err, rule.max_retries));
            }
            if err.category == LlmErrorCategory::EmptyResponse {
                if let Some(next) = next_fallback(&self.models, model_idx) {
                    model_idx = next;
                }
            }
            let delay = rule.delay(*attempt, err.retry_after_secs);
            warn!(
                category = %err.category,
                attempt = *attempt,
                max_retries = rule.max_retries,
                model = %self.models.get(model_idx).map(String::as_str).unwrap_or_default(),
                delay_ms = delay.as_millis() as u64,
                error = %err.message,
                "retrying LLM call"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

fn terminal_error(err: LlmError) -> ForgeError {
    match err.category {
        LlmErrorCategory::Generation => ForgeError::Generation(err.message),
        _ => ForgeError::Infrastructure(err.to_string()),
    }
}

fn exhausted_error(err: LlmError, retries: u32) -> ForgeError {
    match err.category {
        LlmErrorCategory::EmptyResponse => {
            ForgeError::Generation(format!("{} (after {} retries)", err.message, retries))
        }
        _ => ForgeError::Infrastructure(format!("{} (after {} retries)", err, retries)),
    }
}

impl CodeGenerator for Generator {
    fn generate<'a>(
        &'a self,
        samples: &'a [Sample],
        strategy: Option<&'a CandidateStrategy>,
        baseline: Option<&'a str>,
    ) -> BoxFuture<'a, ForgeResult<Generated>> {
        Box::pin(async move {
            if samples.is_empty() {
                return Err(ForgeError::Config("generation needs at least one sample".to_string()));
            }
            info!(
                session = %self.session_id,
                strategy = strategy.map(|s| s.name.as_str()).unwrap_or("default"),
                "generating VRL"
            );
            let prompt = prompts::generation_prompt(samples, strategy, baseline);
            self.complete_code(prompt, self.settings.generation_temperature, None)
                .await
        })
    }

    fn repair<'a>(
        &'a self,
        code: &'a str,
        error_message: &'a str,
        samples: Option<&'a [Sample]>,
        history_context: Option<&'a str>,
    ) -> BoxFuture<'a, ForgeResult<Generated>> {
        Box::pin(async move {
            let error_code = extract_error_code(error_message);
            info!(session = %self.session_id, %error_code, "requesting LLM repair");
            let prompt = prompts::repair_prompt(code, error_message, samples, history_context);
            self.complete_code(prompt, self.settings.repair_temperature, Some(error_code))
                .await
        })
    }
}
