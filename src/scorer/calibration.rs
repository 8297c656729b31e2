//! Hardware normalization, measured once per process.

use crate::config::PerformanceConfig;
use crate::sample::Sample;
use crate::validator::Runner;
use serde::Serialize;
use std::hint::black_box;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub const MIN_MULTIPLIER: f64 = 0.1;
pub const MAX_MULTIPLIER: f64 = 10.0;

const BENCHMARK_LINE: &str =
    "Dec 10 06:55:46 LabSZ sshd[24200]: Invalid user test from 192.168.1.100 port 22";
const MIN_STARTUP: Duration = Duration::from_millis(100);
const DEFAULT_STARTUP: Duration = Duration::from_secs(1);
const PASSTHROUGH_PROGRAM: &str = ".";

static GLOBAL: OnceLock<Calibration> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Calibration {
    /// Clamped to `[MIN_MULTIPLIER, MAX_MULTIPLIER]`.
    pub cpu_multiplier: f64,
    /// Subtracted from every measured run's wall time.
    #[serde(with = "secs_f64")]
    pub engine_startup: Duration,
}

mod secs_f64 {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

impl Calibration {
    pub fn fixed(cpu_multiplier: f64, engine_startup: Duration) -> Self {
        Self {
            cpu_multiplier: clamp_multiplier(cpu_multiplier),
            engine_startup,
        }
    }

    /// Benchmark this machine and time an engine passthrough run.
    pub fn measure(runner: Option<&dyn Runner>, settings: &PerformanceConfig) -> Self {
        let ops_per_sec = benchmark_ops_per_sec(settings.benchmark_iterations);
        let cpu_multiplier = multiplier_for(ops_per_sec, settings.baseline_ops_per_sec);
        let engine_startup = match runner {
            Some(runner) => measure_engine_startup(runner),
            None => DEFAULT_STARTUP,
        };
        info!(
            ops_per_sec = ops_per_sec.round(),
            cpu_multiplier,
            startup_secs = engine_startup.as_secs_f64(),
            "calibrated scoring"
        );
        Self {
            cpu_multiplier,
            engine_startup,
        }
    }

    /// Process-wide calibration; the first caller pays for the measurement.
    pub fn global(runner: Option<&dyn Runner>, settings: &PerformanceConfig) -> &'static Calibration {
        GLOBAL.get_or_init(|| Self::measure(runner, settings))
    }
}

pub fn clamp_multiplier(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(MIN_MULTIPLIER, MAX_MULTIPLIER)
    } else {
        MAX_MULTIPLIER
    }
}

/// Baseline rate divided by the measured rate, clamped.
pub fn multiplier_for(ops_per_sec: f64, baseline_ops_per_sec: f64) -> f64 {
    if ops_per_sec <= 0.0 {
        return 1.0;
    }
    clamp_multiplier(baseline_ops_per_sec / ops_per_sec)
}

/// String work shaped like a typical parser: split, search, case, slice.
pub fn benchmark_ops_per_sec(iterations: u32) -> f64 {
    let iterations = iterations.max(1);
    let start = Instant::now();
    for _ in 0..iterations {
        let line = black_box(BENCHMARK_LINE);
        let parts: Vec<&str> = line.split(' ').collect();
        let found = line.contains("Invalid");
        let upper = line.to_uppercase();
        let head = &line[..10];
        black_box((parts, found, upper, head));
    }
    let secs = start.elapsed().as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    f64::from(iterations) / secs
}

fn measure_engine_startup(runner: &dyn Runner) -> Duration {
    let probe = [Sample::message("startup")];
    match runner.execute(PASSTHROUGH_PROGRAM, &probe) {
        Ok(out) if out.error_text.is_none() && !out.timed_out => out.elapsed.max(MIN_STARTUP),
        Ok(out) => {
            warn!(
                error = out.error_text.as_deref().unwrap_or("timed out"),
                "startup probe failed; assuming default startup time"
            );
            DEFAULT_STARTUP
        }
        Err(e) => {
            warn!(error = %e, "startup probe failed; assuming default startup time");
            DEFAULT_STARTUP
        }
    }
}
