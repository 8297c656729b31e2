//! Throughput and CPU measurement of validated programs.
//!
//! A candidate runs against a fixed batch of events while the engine process
//! is sampled. Wall time minus the calibrated engine startup gives
//! events/second; dividing by mean CPU percent gives events/CPU%, which the
//! calibration multiplier turns into a machine-independent performance index.

pub mod calibration;
pub mod estimate;
pub mod tier;

pub use calibration::Calibration;
pub use estimate::{estimate_performance, StaticEstimate};
pub use tier::{PerformanceTier, TierBreakpoints};

use crate::config::PerformanceConfig;
use crate::error::{ForgeError, ForgeResult};
use crate::sample::{cycle_to_batch, Sample};
use crate::validator::{MeasuredRun, Runner};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Floor for the processing window after startup is subtracted.
const MIN_PROCESSING: Duration = Duration::from_millis(100);
/// Floor for the CPU divisor.
const MIN_CPU_PERCENT: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementSource {
    Engine,
    /// No engine available; numbers come from [`estimate_performance`].
    Estimate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceMeasurement {
    pub events_per_second: f64,
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub events_per_cpu_percent: f64,
    /// Derived from throughput, not a measured percentile.
    pub p99_latency_ms: f64,
    pub error_count: usize,
    pub performance_index: u64,
    pub tier: PerformanceTier,
    pub source: MeasurementSource,
    pub estimated_events_per_cpu_percent: f64,
}

/// `round(events_per_cpu_percent * multiplier)`, never negative.
pub fn performance_index(events_per_cpu_percent: f64, cpu_multiplier: f64) -> u64 {
    let index = (events_per_cpu_percent * cpu_multiplier).round();
    if index.is_finite() && index > 0.0 {
        index as u64
    } else {
        0
    }
}

fn p99_latency_ms(events_per_second: f64) -> f64 {
    if events_per_second > 0.0 {
        1000.0 / events_per_second * 100.0
    } else {
        0.0
    }
}

/// Turn one sampled engine run into a measurement.
pub fn measurement_from_run(
    run: &MeasuredRun,
    calibration: &Calibration,
    breakpoints: &TierBreakpoints,
) -> PerformanceMeasurement {
    let processing = run
        .elapsed
        .saturating_sub(calibration.engine_startup)
        .max(MIN_PROCESSING);
    let events_per_second = run.records_out as f64 / processing.as_secs_f64();
    let cpu_percent = run.avg_cpu();
    let events_per_cpu_percent = events_per_second / cpu_percent.max(MIN_CPU_PERCENT);

    PerformanceMeasurement {
        events_per_second,
        cpu_percent,
        memory_mb: run.avg_mem_mb(),
        events_per_cpu_percent,
        p99_latency_ms: p99_latency_ms(events_per_second),
        error_count: run.records_in.saturating_sub(run.records_out),
        performance_index: performance_index(events_per_cpu_percent, calibration.cpu_multiplier),
        tier: PerformanceTier::classify(events_per_cpu_percent, breakpoints),
        source: MeasurementSource::Engine,
        estimated_events_per_cpu_percent: 0.0,
    }
}

/// Stand-in measurement when no engine can be run.
pub fn measurement_from_estimate(
    estimate: &StaticEstimate,
    calibration: &Calibration,
) -> PerformanceMeasurement {
    let epc = estimate.events_per_cpu_percent;
    PerformanceMeasurement {
        events_per_second: epc,
        cpu_percent: 0.0,
        memory_mb: 0.0,
        events_per_cpu_percent: epc,
        p99_latency_ms: p99_latency_ms(epc),
        error_count: 0,
        performance_index: performance_index(epc, calibration.cpu_multiplier),
        tier: estimate.tier,
        source: MeasurementSource::Estimate,
        estimated_events_per_cpu_percent: epc,
    }
}

/// Scores one validated program. Synchronous: callers that must not block
/// wrap it in `spawn_blocking`.
pub trait PerformanceScorer: Send + Sync {
    fn score(&self, code: &str, samples: &[Sample]) -> ForgeResult<PerformanceMeasurement>;
}

pub struct CandidateScorer {
    runner: Option<Arc<dyn Runner>>,
    calibration: Calibration,
    settings: PerformanceConfig,
}

impl CandidateScorer {
    pub fn new(
        runner: Option<Arc<dyn Runner>>,
        calibration: Calibration,
        settings: PerformanceConfig,
    ) -> Self {
        Self {
            runner,
            calibration,
            settings,
        }
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }
}

impl PerformanceScorer for CandidateScorer {
    fn score(&self, code: &str, samples: &[Sample]) -> ForgeResult<PerformanceMeasurement> {
        let estimate = estimate_performance(code, &self.settings.tier_breakpoints);
        let Some(runner) = self.runner.as_ref() else {
            debug!(epc = estimate.events_per_cpu_percent, "no engine; using static estimate");
            return Ok(measurement_from_estimate(&estimate, &self.calibration));
        };
        if samples.is_empty() {
            return Err(ForgeError::Config("cannot score without samples".into()));
        }

        let batch = cycle_to_batch(samples, self.settings.batch_size.max(1));
        let run =
            runner.execute_under_measurement(code, &batch, self.settings.measurement_timeout())?;
        if let Some(error) = &run.error_text {
            debug!(error = %error, "engine reported errors during measurement");
        }

        let mut measurement =
            measurement_from_run(&run, &self.calibration, &self.settings.tier_breakpoints);
        measurement.estimated_events_per_cpu_percent = estimate.events_per_cpu_percent;
        info!(
            events = run.records_out,
            batch = batch.len(),
            eps = measurement.events_per_second.round(),
            cpu = measurement.cpu_percent,
            epc = measurement.events_per_cpu_percent.round(),
            index = measurement.performance_index,
            tier = %measurement.tier,
            timed_out = run.timed_out,
            "measured candidate"
        );
        Ok(measurement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::RunOutput;
    use std::sync::Mutex;

    /// Replays one measured run and remembers the batch size it was given.
    struct MeasuringRunner {
        run: MeasuredRun,
        batch_seen: Mutex<Option<usize>>,
    }

    impl MeasuringRunner {
        fn new(run: MeasuredRun) -> Arc<Self> {
            Arc::new(Self {
                run,
                batch_seen: Mutex::new(None),
            })
        }
    }

    impl Runner for MeasuringRunner {
        fn execute(&self, _code: &str, _samples: &[Sample]) -> ForgeResult<RunOutput> {
            unreachable!("scoring always measures")
        }

        fn execute_under_measurement(
            &self,
            _code: &str,
            samples: &[Sample],
            _budget: Duration,
        ) -> ForgeResult<MeasuredRun> {
            *self.batch_seen.lock().unwrap() = Some(samples.len());
            Ok(self.run.clone())
        }
    }

    fn run(records_out: usize, elapsed_secs: u64, cpu: f64) -> MeasuredRun {
        MeasuredRun {
            records_in: 10_000,
            records_out,
            elapsed: Duration::from_secs(elapsed_secs),
            cpu_samples: vec![cpu, cpu],
            mem_samples_mb: vec![40.0, 60.0],
            timed_out: false,
            error_text: None,
        }
    }

    #[test]
    fn index_scales_by_multiplier() {
        assert_eq!(performance_index(1000.0, 2.0), 2000);
        assert_eq!(performance_index(150.5, 1.0), 151);
        assert_eq!(performance_index(-3.0, 1.0), 0);
        assert_eq!(performance_index(f64::NAN, 1.0), 0);
    }

    #[test]
    fn index_is_monotonic_in_events_per_cpu() {
        let mut last = 0;
        for epc in [0.0, 0.4, 0.6, 10.0, 299.5, 300.0, 15_000.0] {
            let index = performance_index(epc, 3.7);
            assert!(index >= last);
            last = index;
        }
    }

    #[test]
    fn scorer_reports_calibrated_index() {
        let runner = MeasuringRunner::new(run(10_000, 2, 10.0));
        let scorer = CandidateScorer::new(
            Some(runner.clone() as Arc<dyn Runner>),
            Calibration::fixed(2.0, Duration::from_secs(1)),
            PerformanceConfig::default(),
        );
        let samples = vec![Sample::message("a"), Sample::message("b")];

        let m = scorer.score(".a = 1", &samples).unwrap();
        // 10000 events over 1s after startup, at 10% CPU.
        assert_eq!(m.events_per_second, 10_000.0);
        assert_eq!(m.events_per_cpu_percent, 1_000.0);
        assert_eq!(m.performance_index, 2_000);
        assert_eq!(m.tier, PerformanceTier::Fast);
        assert_eq!(m.memory_mb, 50.0);
        assert_eq!(m.error_count, 0);
        assert!((m.p99_latency_ms - 10.0).abs() < 1e-9);
        assert_eq!(m.source, MeasurementSource::Engine);
        assert_eq!(*runner.batch_seen.lock().unwrap(), Some(10_000));
    }

    #[test]
    fn startup_longer_than_run_is_floored() {
        let m = measurement_from_run(
            &run(50, 1, 0.0),
            &Calibration::fixed(1.0, Duration::from_secs(5)),
            &TierBreakpoints::default(),
        );
        assert!((m.events_per_second - 500.0).abs() < 1e-6);
        // CPU divisor floors at 0.1%.
        assert!((m.events_per_cpu_percent - 5_000.0).abs() < 1e-6);
        assert_eq!(m.error_count, 9_950);
    }

    #[test]
    fn silent_engine_scores_zero() {
        let m = measurement_from_run(
            &run(0, 3, 12.0),
            &Calibration::fixed(1.0, Duration::from_secs(1)),
            &TierBreakpoints::default(),
        );
        assert_eq!(m.performance_index, 0);
        assert_eq!(m.p99_latency_ms, 0.0);
        assert_eq!(m.tier, PerformanceTier::Critical);
    }

    #[test]
    fn missing_engine_falls_back_to_estimate() {
        let scorer = CandidateScorer::new(
            None,
            Calibration::fixed(1.0, Duration::from_secs(1)),
            PerformanceConfig::default(),
        );
        let m = scorer.score(".a = 1", &[]).unwrap();
        assert_eq!(m.source, MeasurementSource::Estimate);
        assert_eq!(m.events_per_cpu_percent, 300.0);
        assert_eq!(m.performance_index, 300);
        assert_eq!(m.tier, PerformanceTier::Fast);
    }

    #[test]
    fn engine_scoring_needs_samples() {
        let scorer = CandidateScorer::new(
            Some(MeasuringRunner::new(run(1, 1, 1.0)) as Arc<dyn Runner>),
            Calibration::fixed(1.0, Duration::ZERO),
            PerformanceConfig::default(),
        );
        assert!(matches!(scorer.score(".a = 1", &[]), Err(ForgeError::Config(_))));
    }
}
