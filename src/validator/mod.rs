//! Candidate validation.
//!
//! Checks run cheapest first and stop at the first failure:
//! reserved-field conflicts, rejected constructs, compile, then a real run
//! over a handful of samples. Each step can be switched off, and a switched
//! off step passes.

pub mod checker;
pub mod policy;
pub mod runner;

pub use checker::{first_error_line, CheckResult, Checker, VectorChecker};
pub use policy::{load_reserved_fields_csv, ConstructPolicy};
pub use runner::{MeasuredRun, RunOutput, Runner, VectorRunner};

use crate::config::ValidationConfig;
use crate::error::ForgeResult;
use crate::error_code::{
    extract_error_code, ErrorCode, PROCESSING_PREFIX, SYNTAX_PREFIX, TIMEOUT_PREFIX,
};
use crate::sample::Sample;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationOutcome {
    pub passed: bool,
    pub error_message: Option<String>,
    pub error_code: Option<ErrorCode>,
}

impl ValidationOutcome {
    pub fn pass() -> Self {
        Self {
            passed: true,
            error_message: None,
            error_code: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        let message = message.into();
        let code = extract_error_code(&message);
        Self {
            passed: false,
            error_message: Some(message),
            error_code: Some(code),
        }
    }

    /// Error text for logs and prompts; empty on success.
    pub fn message(&self) -> &str {
        self.error_message.as_deref().unwrap_or_default()
    }
}

/// Seam the repair loop validates through. Blocking; async callers wrap it
/// in `spawn_blocking`.
pub trait CodeValidator: Send + Sync {
    fn validate(&self, code: &str, samples: Option<&[Sample]>) -> ForgeResult<ValidationOutcome>;
}

pub struct Validator {
    settings: ValidationConfig,
    policy: ConstructPolicy,
    checker: Option<Arc<dyn Checker>>,
    runner: Option<Arc<dyn Runner>>,
}

impl Validator {
    pub fn new(
        settings: ValidationConfig,
        checker: Option<Arc<dyn Checker>>,
        runner: Option<Arc<dyn Runner>>,
    ) -> Self {
        let mut reserved = settings.reserved_fields.clone();
        if let Some(path) = settings.reserved_fields_csv.as_deref() {
            match load_reserved_fields_csv(path) {
                Ok(fields) => reserved.extend(fields),
                Err(err) => warn!(error = %err, "reserved field list unavailable"),
            }
        }
        let policy = ConstructPolicy::new(
            &settings.rejected_functions,
            &settings.preferred_functions,
            &reserved,
        );
        Self {
            settings,
            policy,
            checker,
            runner,
        }
    }

    pub fn settings(&self) -> &ValidationConfig {
        &self.settings
    }

    fn check_field_conflicts(&self, code: &str) -> Option<ValidationOutcome> {
        if !self.settings.field_conflict_check || !self.policy.has_reserved_fields() {
            return None;
        }
        let conflicts = self.policy.find_field_conflicts(code);
        (!conflicts.is_empty())
            .then(|| ValidationOutcome::fail(ConstructPolicy::conflict_message(&conflicts)))
    }

    fn check_rejected_constructs(&self, code: &str) -> Option<ValidationOutcome> {
        if !self.settings.rejected_construct_check {
            return None;
        }
        let found = self.policy.find_rejected(code);
        (!found.is_empty()).then(|| ValidationOutcome::fail(self.policy.rejection_message(&found)))
    }

    fn check_compiles(&self, code: &str) -> ForgeResult<Option<ValidationOutcome>> {
        let Some(checker) = self.checker.as_ref().filter(|_| self.settings.checker_enabled) else {
            return Ok(None);
        };
        let result = checker.compile(code)?;
        if result.ok {
            return Ok(None);
        }
        let text = result.error_text.unwrap_or_default();
        let message = if result.timed_out {
            format!("{TIMEOUT_PREFIX} {text}")
        } else {
            format!("{SYNTAX_PREFIX} {}", first_error_line(&text))
        };
        Ok(Some(ValidationOutcome::fail(message)))
    }

    fn check_runs(&self, code: &str, samples: Option<&[Sample]>) -> ForgeResult<Option<ValidationOutcome>> {
        let Some(runner) = self.runner.as_ref().filter(|_| self.settings.runner_enabled) else {
            return Ok(None);
        };
        let Some(samples) = samples.filter(|s| !s.is_empty()) else {
            return Ok(None);
        };
        let limit = self.settings.sample_limit.max(1).min(samples.len());
        let output = runner.execute(code, &samples[..limit])?;

        if let Some(text) = output.error_text {
            return Ok(Some(ValidationOutcome::fail(format!("{PROCESSING_PREFIX} {text}"))));
        }
        if output.records_out == 0 {
            let message = if output.timed_out {
                format!(
                    "{TIMEOUT_PREFIX} engine produced no events within {}s",
                    self.settings.timeout().as_secs()
                )
            } else {
                format!("{PROCESSING_PREFIX} engine processed 0 events")
            };
            return Ok(Some(ValidationOutcome::fail(message)));
        }
        Ok(None)
    }
}

impl CodeValidator for Validator {
    fn validate(&self, code: &str, samples: Option<&[Sample]>) -> ForgeResult<ValidationOutcome> {
        if let Some(outcome) = self.check_field_conflicts(code) {
            debug!(error = outcome.message(), "field conflict");
            return Ok(outcome);
        }
        if let Some(outcome) = self.check_rejected_constructs(code) {
            debug!(error = outcome.message(), "rejected construct");
            return Ok(outcome);
        }
        if let Some(outcome) = self.check_compiles(code)? {
            debug!(error = outcome.message(), "compile check failed");
            return Ok(outcome);
        }
        if let Some(outcome) = self.check_runs(code, samples)? {
            debug!(error = outcome.message(), "engine run failed");
            return Ok(outcome);
        }
        Ok(ValidationOutcome::pass())
    }
}
