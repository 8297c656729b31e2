//! The validate/repair state machine for one candidate.
//!
//! Exactly one seed generation, then up to `max_iterations` validation
//! passes. Between passes the loop tries, in order: a simplify regeneration
//! when the last `cycle_window` failures share an error code, the free
//! [`LocalFixer`], and finally an LLM repair. With `fix_on_failure` off the
//! first failed validation ends the loop. Infrastructure errors abort the
//! loop; everything else stays inside it.

pub mod history;

pub use history::{build_repair_context, failed_patterns_from, CycleDetector, IterationRecord};

use crate::config::GenerationConfig;
use crate::error::{ForgeError, ForgeResult};
use crate::error_code::ErrorCode;
use crate::fixer::LocalFixer;
use crate::generator::{CandidateStrategy, CodeGenerator, Generated};
use crate::llm::{merge_usage, CostLedger, Usage};
use crate::sample::Sample;
use crate::validator::{CodeValidator, ValidationOutcome};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepairReport {
    /// Last code validated; the working program when `success`.
    pub code: String,
    pub success: bool,
    pub iterations: usize,
    pub records: Vec<IterationRecord>,
    pub failed_patterns: Vec<String>,
    pub last_error: Option<String>,
    pub last_error_code: Option<ErrorCode>,
    pub usage: Option<Usage>,
}

impl RepairReport {
    pub fn total_cost(&self) -> f64 {
        self.usage.as_ref().map(Usage::cost).unwrap_or(0.0)
    }
}

enum Pending {
    Code(String),
    Simplify,
}

pub struct ErrorRepairLoop {
    generator: Arc<dyn CodeGenerator>,
    validator: Arc<dyn CodeValidator>,
    fixer: Arc<LocalFixer>,
    settings: GenerationConfig,
    ledger: Option<Arc<CostLedger>>,
}

impl ErrorRepairLoop {
    pub fn new(
        generator: Arc<dyn CodeGenerator>,
        validator: Arc<dyn CodeValidator>,
        fixer: Arc<LocalFixer>,
        settings: GenerationConfig,
    ) -> Self {
        Self {
            generator,
            validator,
            fixer,
            settings,
            ledger: None,
        }
    }

    /// Also record every call's usage in a shared ledger.
    pub fn with_ledger(mut self, ledger: Arc<CostLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    fn account(&self, total: &mut Option<Usage>, generated: &Generated) {
        if let Some(ledger) = &self.ledger {
            ledger.record(generated.usage.as_ref());
        }
        *total = merge_usage(total.take(), generated.usage.clone());
    }

    async fn validate(&self, code: &str, samples: &Arc<[Sample]>) -> ForgeResult<ValidationOutcome> {
        let validator = self.validator.clone();
        let code = code.to_string();
        let samples = samples.clone();
        tokio::task::spawn_blocking(move || validator.validate(&code, Some(&samples[..])))
            .await
            .map_err(|e| ForgeError::Infrastructure(format!("validation task failed: {e}")))?
    }

    pub async fn run(
        &self,
        samples: &[Sample],
        strategy: Option<&CandidateStrategy>,
        baseline: Option<&str>,
    ) -> ForgeResult<RepairReport> {
        let strategy_name = strategy.map(|s| s.name.as_str()).unwrap_or("default");
        let shared: Arc<[Sample]> = samples.to_vec().into();
        let simplify = CandidateStrategy::simplify();
        let max_iterations = self.settings.max_iterations.max(1);

        let mut usage: Option<Usage> = None;
        let mut records: Vec<IterationRecord> = Vec::new();
        let mut failed_patterns: Vec<String> = Vec::new();
        let mut detector = CycleDetector::new(self.settings.cycle_window);
        let mut last_code = String::new();
        let mut last_error: Option<String> = None;
        let mut last_error_code: Option<ErrorCode> = None;

        let mut pending = match self.generator.generate(samples, strategy, baseline).await {
            Ok(generated) => {
                self.account(&mut usage, &generated);
                Pending::Code(generated.code)
            }
            Err(err) if err.is_infrastructure() => return Err(err),
            Err(err) => {
                warn!(strategy = strategy_name, error = %err, "seed generation unusable; simplifying");
                last_error = Some(err.to_string());
                Pending::Simplify
            }
        };

        for iteration in 1..=max_iterations {
            let code = match std::mem::replace(&mut pending, Pending::Simplify) {
                Pending::Code(code) => code,
                Pending::Simplify => match self.generator.generate(samples, Some(&simplify), None).await {
                    Ok(generated) => {
                        self.account(&mut usage, &generated);
                        generated.code
                    }
                    Err(err) if err.is_infrastructure() => return Err(err),
                    Err(err) => {
                        warn!(strategy = strategy_name, iteration, error = %err, "simplify generation unusable");
                        records.push(IterationRecord::new(iteration, None, false, "generation_error"));
                        last_error = Some(err.to_string());
                        last_error_code = None;
                        continue;
                    }
                },
            };

            let outcome = self.validate(&code, &shared).await?;
            last_code = code;
            if outcome.passed {
                records.push(IterationRecord::new(iteration, None, false, "validated"));
                info!(strategy = strategy_name, iteration, "candidate validated");
                return Ok(RepairReport {
                    code: last_code,
                    success: true,
                    iterations: iteration,
                    records,
                    failed_patterns,
                    last_error: None,
                    last_error_code: None,
                    usage,
                });
            }

            let message = outcome.message().to_string();
            let error_code = outcome.error_code.unwrap_or(ErrorCode::Unknown);
            debug!(strategy = strategy_name, iteration, %error_code, error = %message, "validation failed");
            last_error = Some(message.clone());
            last_error_code = Some(error_code);

            if iteration == max_iterations {
                records.push(IterationRecord::new(iteration, Some(error_code), false, "exhausted"));
                break;
            }
            if !self.settings.fix_on_failure {
                records.push(IterationRecord::new(iteration, Some(error_code), false, "fixing_disabled"));
                break;
            }

            if detector.observe(error_code) {
                for pattern in failed_patterns_from(&message, error_code) {
                    if !failed_patterns.contains(&pattern) {
                        failed_patterns.push(pattern);
                    }
                }
                records.push(IterationRecord::new(iteration, Some(error_code), false, "cycle_detected"));
                warn!(strategy = strategy_name, iteration, %error_code, "error cycle detected; simplifying");
                pending = Pending::Simplify;
                continue;
            }

            if let Some(fixed) = self.fixer.fix_locally(&last_code, &message) {
                debug!(strategy = strategy_name, iteration, %error_code, "local fix applied");
                records.push(IterationRecord::new(iteration, Some(error_code), true, "local_fix"));
                pending = Pending::Code(fixed);
                continue;
            }

            let context = build_repair_context(&records, &failed_patterns);
            match self
                .generator
                .repair(&last_code, &message, Some(samples), Some(&context))
                .await
            {
                Ok(generated) => {
                    self.account(&mut usage, &generated);
                    records.push(IterationRecord::new(iteration, Some(error_code), true, "llm_repair"));
                    pending = Pending::Code(generated.code);
                }
                Err(err) if err.is_infrastructure() => return Err(err),
                Err(err) => {
                    warn!(strategy = strategy_name, iteration, error = %err, "repair unusable; simplifying");
                    records.push(IterationRecord::new(iteration, Some(error_code), false, "generation_error"));
                    pending = Pending::Simplify;
                }
            }
        }

        info!(
            strategy = strategy_name,
            iterations = records.len(),
            last_error_code = ?last_error_code,
            "loop ended without a valid program"
        );
        Ok(RepairReport {
            code: last_code,
            success: false,
            iterations: records.len(),
            records,
            failed_patterns,
            last_error,
            last_error_code,
            usage,
        })
    }
}
