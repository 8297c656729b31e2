//! Runs one repair loop per strategy and picks the fastest valid program.
//!
//! Repair loops run concurrently under a semaphore sized by
//! [`ConcurrencyConfig::worker_count`](crate::config::ConcurrencyConfig::worker_count).
//! Scoring happens afterwards, one candidate at a time, so measurement runs
//! never compete for CPU. A candidate whose loop or measurement hits an
//! infrastructure error is kept as unavailable and can never win.

use crate::config::{GenerationConfig, OptimizeFor, PerformanceConfig};
use crate::error::{ForgeError, ForgeResult};
use crate::fixer::LocalFixer;
use crate::generator::{CandidateStrategy, GeneratorFactory};
use crate::llm::CostLedger;
use crate::repair::{ErrorRepairLoop, IterationRecord, RepairReport};
use crate::sample::Sample;
use crate::scorer::{PerformanceMeasurement, PerformanceScorer, PerformanceTier};
use crate::util::truncate;
use crate::validator::CodeValidator;
use anyhow::Context;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

const FAILURE_REASON_CHARS: usize = 300;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub strategy: CandidateStrategy,
    pub code: String,
    pub is_valid: bool,
    /// Set when infrastructure failures left the candidate unjudged.
    pub unavailable: bool,
    pub history: Vec<IterationRecord>,
    /// Only set on valid candidates.
    pub measurement: Option<PerformanceMeasurement>,
    pub total_cost: f64,
    pub iterations: usize,
    pub last_error: Option<String>,
}

impl Candidate {
    fn from_report(strategy: CandidateStrategy, report: RepairReport) -> Self {
        let total_cost = report.total_cost();
        Self {
            strategy,
            code: report.code,
            is_valid: report.success,
            unavailable: false,
            history: report.records,
            measurement: None,
            total_cost,
            iterations: report.iterations,
            last_error: report.last_error,
        }
    }

    fn unavailable(strategy: CandidateStrategy, error: String) -> Self {
        Self {
            strategy,
            code: String::new(),
            is_valid: false,
            unavailable: true,
            history: Vec::new(),
            measurement: None,
            total_cost: 0.0,
            iterations: 0,
            last_error: Some(error),
        }
    }

    fn mark_unavailable(&mut self, error: String) {
        self.unavailable = true;
        self.measurement = None;
        self.last_error = Some(error);
    }

    pub fn summary(&self) -> CandidateSummary {
        CandidateSummary {
            strategy: self.strategy.name.clone(),
            valid: self.is_valid,
            unavailable: self.unavailable,
            iterations: self.iterations,
            cost: self.total_cost,
            performance_index: self.measurement.as_ref().map(|m| m.performance_index),
            events_per_cpu_percent: self.measurement.as_ref().map(|m| m.events_per_cpu_percent),
            tier: self.measurement.as_ref().map(|m| m.tier),
            failure_reason: self
                .last_error
                .as_deref()
                .filter(|_| !self.is_valid || self.unavailable)
                .map(|e| truncate(e, FAILURE_REASON_CHARS)),
        }
    }
}

/// One row of the candidate table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateSummary {
    pub strategy: String,
    pub valid: bool,
    pub unavailable: bool,
    pub iterations: usize,
    pub cost: f64,
    pub performance_index: Option<u64>,
    pub events_per_cpu_percent: Option<f64>,
    pub tier: Option<PerformanceTier>,
    pub failure_reason: Option<String>,
}

/// Result of a selector run. `NoWinner` is an expected outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Winner {
        winner: Box<Candidate>,
        candidates: Vec<CandidateSummary>,
        total_cost: f64,
    },
    NoWinner {
        candidates: Vec<CandidateSummary>,
        total_cost: f64,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectionReport<'a> {
    pub generated_at: DateTime<Utc>,
    pub winner: Option<&'a Candidate>,
    pub candidates: &'a [CandidateSummary],
    pub total_cost: f64,
}

impl Selection {
    pub fn winner(&self) -> Option<&Candidate> {
        match self {
            Selection::Winner { winner, .. } => Some(&**winner),
            Selection::NoWinner { .. } => None,
        }
    }

    pub fn candidates(&self) -> &[CandidateSummary] {
        match self {
            Selection::Winner { candidates, .. } | Selection::NoWinner { candidates, .. } => {
                candidates
            }
        }
    }

    pub fn total_cost(&self) -> f64 {
        match self {
            Selection::Winner { total_cost, .. } | Selection::NoWinner { total_cost, .. } => {
                *total_cost
            }
        }
    }

    pub fn report(&self) -> SelectionReport<'_> {
        SelectionReport {
            generated_at: Utc::now(),
            winner: self.winner(),
            candidates: self.candidates(),
            total_cost: self.total_cost(),
        }
    }

    /// Writes `report.json`, plus `parser.vrl` when there is a winner.
    /// Returns the files written.
    pub fn write_outputs(&self, dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
        let mut written = Vec::new();

        if let Some(winner) = self.winner() {
            let parser = dir.join("parser.vrl");
            let mut code = winner.code.clone();
            if !code.ends_with('\n') {
                code.push('\n');
            }
            std::fs::write(&parser, code)
                .with_context(|| format!("Failed to write {}", parser.display()))?;
            written.push(parser);
        }

        let report = dir.join("report.json");
        let json = serde_json::to_string_pretty(&self.report())?;
        std::fs::write(&report, json)
            .with_context(|| format!("Failed to write {}", report.display()))?;
        written.push(report);
        Ok(written)
    }
}

fn ranking_key_cmp(a: &Candidate, b: &Candidate, optimize_for: OptimizeFor) -> Ordering {
    let (Some(ma), Some(mb)) = (&a.measurement, &b.measurement) else {
        return a.measurement.is_some().cmp(&b.measurement.is_some());
    };
    let by_throughput = || {
        ma.events_per_second
            .partial_cmp(&mb.events_per_second)
            .unwrap_or(Ordering::Equal)
    };
    let primary = match optimize_for {
        OptimizeFor::Throughput => by_throughput(),
        OptimizeFor::CpuEfficiency => ma.performance_index.cmp(&mb.performance_index),
        OptimizeFor::Balanced => ma
            .performance_index
            .cmp(&mb.performance_index)
            .then_with(by_throughput),
    };
    // Cheaper wins a tie.
    primary.then_with(|| {
        b.total_cost
            .partial_cmp(&a.total_cost)
            .unwrap_or(Ordering::Equal)
    })
}

/// Index of the best measured candidate; the earliest wins a full tie.
pub fn rank_candidates(candidates: &[Candidate], optimize_for: OptimizeFor) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (idx, candidate) in candidates.iter().enumerate() {
        if !candidate.is_valid || candidate.measurement.is_none() {
            continue;
        }
        best = match best {
            Some(current)
                if ranking_key_cmp(candidate, &candidates[current], optimize_for)
                    != Ordering::Greater =>
            {
                Some(current)
            }
            _ => Some(idx),
        };
    }
    best
}

pub struct CandidateSelector {
    generators: Arc<dyn GeneratorFactory>,
    validator: Arc<dyn CodeValidator>,
    fixer: Arc<LocalFixer>,
    scorer: Arc<dyn PerformanceScorer>,
    generation: GenerationConfig,
    performance: PerformanceConfig,
    workers: usize,
    ledger: Arc<CostLedger>,
}

impl CandidateSelector {
    pub fn new(
        generators: Arc<dyn GeneratorFactory>,
        validator: Arc<dyn CodeValidator>,
        fixer: Arc<LocalFixer>,
        scorer: Arc<dyn PerformanceScorer>,
        generation: GenerationConfig,
        performance: PerformanceConfig,
        workers: usize,
    ) -> Self {
        Self {
            generators,
            validator,
            fixer,
            scorer,
            generation,
            performance,
            workers: workers.max(1),
            ledger: Arc::new(CostLedger::new()),
        }
    }

    /// Share a ledger with other spenders, e.g. strategy planning.
    pub fn with_ledger(mut self, ledger: Arc<CostLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn ledger(&self) -> &Arc<CostLedger> {
        &self.ledger
    }

    pub async fn select(
        &self,
        strategies: &[CandidateStrategy],
        samples: &[Sample],
        baseline: Option<&str>,
    ) -> ForgeResult<Selection> {
        if samples.is_empty() {
            return Err(ForgeError::Config("no samples to generate from".into()));
        }
        let shared: Arc<[Sample]> = samples.to_vec().into();
        info!(
            candidates = strategies.len(),
            workers = self.workers,
            "starting candidate generation"
        );

        let mut candidates = self.run_loops(strategies, &shared, baseline).await?;
        self.score_valid(&mut candidates, &shared).await;

        let total_cost = self.ledger.total_cost();
        if total_cost > self.performance.cost_threshold {
            warn!(
                total_cost,
                threshold = self.performance.cost_threshold,
                "LLM spend exceeded the cost threshold"
            );
        }
        let summaries: Vec<CandidateSummary> = candidates.iter().map(Candidate::summary).collect();
        let best = rank_candidates(&candidates, self.performance.optimize_for);
        let Some(best) = best else {
            warn!(candidates = candidates.len(), "no candidate validated");
            return Ok(Selection::NoWinner {
                candidates: summaries,
                total_cost,
            });
        };

        let winner = candidates.swap_remove(best);
        info!(
            strategy = %winner.strategy.name,
            index = winner.measurement.as_ref().map(|m| m.performance_index),
            cost = winner.total_cost,
            "selected winner"
        );
        Ok(Selection::Winner {
            winner: Box::new(winner),
            candidates: summaries,
            total_cost,
        })
    }

    /// One loop per strategy, at most `workers` in flight. Results keep the
    /// strategy order; a loop that fails outright yields an unavailable
    /// candidate.
    async fn run_loops(
        &self,
        strategies: &[CandidateStrategy],
        samples: &Arc<[Sample]>,
        baseline: Option<&str>,
    ) -> ForgeResult<Vec<Candidate>> {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut handles = Vec::with_capacity(strategies.len());

        for strategy in strategies {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| ForgeError::Infrastructure(format!("worker pool closed: {e}")))?;
            let repair_loop = ErrorRepairLoop::new(
                self.generators.create(strategy),
                self.validator.clone(),
                self.fixer.clone(),
                self.generation.clone(),
            )
            .with_ledger(self.ledger.clone());
            let task_strategy = strategy.clone();
            let samples = samples.clone();
            let baseline = baseline.map(str::to_string);

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                repair_loop
                    .run(&samples, Some(&task_strategy), baseline.as_deref())
                    .await
            }));
        }

        let results = join_all(handles).await;
        Ok(strategies
            .iter()
            .zip(results)
            .map(|(strategy, result)| match result {
                Ok(Ok(report)) => Candidate::from_report(strategy.clone(), report),
                Ok(Err(err)) => {
                    warn!(strategy = %strategy.name, error = %err, "candidate unavailable");
                    Candidate::unavailable(strategy.clone(), err.to_string())
                }
                Err(err) => {
                    warn!(strategy = %strategy.name, error = %err, "candidate task failed");
                    Candidate::unavailable(strategy.clone(), format!("candidate task failed: {err}"))
                }
            })
            .collect())
    }

    /// A candidate that cannot be measured stays valid but unranked.
    async fn score_valid(&self, candidates: &mut [Candidate], samples: &Arc<[Sample]>) {
        for candidate in candidates.iter_mut().filter(|c| c.is_valid) {
            let scorer = self.scorer.clone();
            let code = candidate.code.clone();
            let samples = samples.clone();
            match tokio::task::spawn_blocking(move || scorer.score(&code, &samples)).await {
                Ok(Ok(measurement)) => candidate.measurement = Some(measurement),
                Ok(Err(err)) => {
                    warn!(strategy = %candidate.strategy.name, error = %err, "measurement failed");
                    candidate.mark_unavailable(err.to_string());
                }
                Err(err) => {
                    warn!(strategy = %candidate.strategy.name, error = %err, "scoring task failed");
                    candidate.mark_unavailable(format!("scoring task failed: {err}"));
                }
            }
        }
    }
}
