//! Runs a program inside a real single-threaded engine pipeline.
//!
//! Each run gets its own temp directory holding the input events, a JSON
//! pipeline config, the engine's data dir and the output file. The engine
//! never exits on its own once it is tailing a file, so the run ends when
//! every event has come out, when output stops growing, or at the budget.

use crate::config::{PerformanceConfig, ValidationConfig};
use crate::error::{ForgeError, ForgeResult};
use crate::sample::Sample;
use crate::util::{join_reader, spawn_reader, tail_chars, truncate};
use serde_json::{json, Value};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq)]
pub struct RunOutput {
    pub records_out: usize,
    /// Engine diagnostics when the run was rejected.
    pub error_text: Option<String>,
    pub timed_out: bool,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasuredRun {
    pub records_in: usize,
    pub records_out: usize,
    pub elapsed: Duration,
    /// Process CPU percent per sampling tick.
    pub cpu_samples: Vec<f64>,
    pub mem_samples_mb: Vec<f64>,
    pub timed_out: bool,
    pub error_text: Option<String>,
}

impl MeasuredRun {
    pub fn avg_cpu(&self) -> f64 {
        mean(&self.cpu_samples)
    }

    pub fn avg_mem_mb(&self) -> f64 {
        mean(&self.mem_samples_mb)
    }

    pub fn peak_mem_mb(&self) -> f64 {
        self.mem_samples_mb.iter().copied().fold(0.0, f64::max)
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Executes a program against events.
///
/// As with [`Checker`](super::Checker), `Err` means the engine could not be
/// run at all. A rejected program is reported through `error_text`.
pub trait Runner: Send + Sync {
    fn execute(&self, code: &str, samples: &[Sample]) -> ForgeResult<RunOutput>;

    fn execute_under_measurement(
        &self,
        code: &str,
        samples: &[Sample],
        budget: Duration,
    ) -> ForgeResult<MeasuredRun>;
}

pub struct VectorRunner {
    binary: String,
    timeout: Duration,
    sample_interval: Duration,
    idle_window: Duration,
}

impl VectorRunner {
    pub fn new(binary: impl Into<String>, timeout: Duration, sample_interval: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
            sample_interval,
            idle_window: Duration::from_secs(1),
        }
    }

    pub fn from_config(validation: &ValidationConfig, performance: &PerformanceConfig) -> Self {
        Self::new(
            validation.vector_binary.clone(),
            validation.timeout(),
            performance.sample_interval(),
        )
    }

    fn run_pipeline(
        &self,
        code: &str,
        samples: &[Sample],
        budget: Duration,
        measure: bool,
    ) -> ForgeResult<MeasuredRun> {
        let expected = samples.len();
        if expected == 0 {
            return Ok(MeasuredRun {
                error_text: Some("no input events".to_string()),
                ..MeasuredRun::default()
            });
        }

        let dir = tempfile::Builder::new()
            .prefix("vrl-forge-run-")
            .tempdir()
            .map_err(ForgeError::infrastructure)?;
        let input = dir.path().join("input.jsonl");
        let output = dir.path().join("output.jsonl");
        let data_dir = dir.path().join("data");
        let config_path = dir.path().join("pipeline.json");

        fs::create_dir_all(&data_dir).map_err(ForgeError::infrastructure)?;
        let mut body = String::with_capacity(expected * 128);
        for sample in samples {
            body.push_str(&sample.to_json_line());
            body.push('\n');
        }
        fs::write(&input, body).map_err(ForgeError::infrastructure)?;
        let config = pipeline_config(&input, &output, &data_dir, code);
        let rendered = serde_json::to_vec_pretty(&config).map_err(ForgeError::infrastructure)?;
        fs::write(&config_path, rendered).map_err(ForgeError::infrastructure)?;

        let mut child = Command::new(&self.binary)
            .arg("--config")
            .arg(&config_path)
            .arg("--threads")
            .arg("1")
            .arg("--quiet")
            .env("VECTOR_DATA_DIR", &data_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    ForgeError::Infrastructure(format!("'{}' binary not found on PATH", self.binary))
                } else {
                    ForgeError::Infrastructure(format!("failed to start '{}': {}", self.binary, e))
                }
            })?;
        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);

        let start = Instant::now();
        let mut sampler = measure.then(|| ResourceSampler::new(child.id()));
        let mut next_sample = start + self.sample_interval;
        let mut last_count = 0;
        let mut last_progress = start;
        let mut finished_at = None;
        let mut exit_status = None;
        let mut timed_out = false;

        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    exit_status = Some(status);
                    break;
                }
                Ok(None) => {}
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ForgeError::infrastructure(e));
                }
            }

            let count = count_lines(&output);
            if count != last_count {
                last_count = count;
                last_progress = Instant::now();
            }
            if count >= expected {
                finished_at = Some(start.elapsed());
                break;
            }
            if count > 0 && last_progress.elapsed() >= self.idle_window {
                finished_at = Some(last_progress.duration_since(start));
                break;
            }
            if start.elapsed() >= budget {
                timed_out = true;
                break;
            }

            if let Some(sampler) = sampler.as_mut() {
                if Instant::now() >= next_sample {
                    sampler.sample();
                    next_sample += self.sample_interval;
                }
            }
            thread::sleep(POLL_INTERVAL);
        }

        if exit_status.is_none() {
            let _ = child.kill();
            let _ = child.wait();
        }
        let stderr = join_reader(stderr);
        let stdout = join_reader(stdout);
        let records_out = count_lines(&output);
        let elapsed = finished_at.unwrap_or_else(|| start.elapsed());

        let log = if stderr.trim().is_empty() { stdout } else { stderr };
        let error_text = match exit_status {
            Some(status) if records_out < expected => Some(
                engine_error_text(&log).unwrap_or_else(|| format!("engine exited early ({status})")),
            ),
            _ => None,
        };
        let (cpu_samples, mem_samples_mb) = sampler.map(ResourceSampler::finish).unwrap_or_default();

        debug!(
            records_in = expected,
            records_out,
            elapsed_ms = elapsed.as_millis() as u64,
            timed_out,
            "engine run finished"
        );

        Ok(MeasuredRun {
            records_in: expected,
            records_out,
            elapsed,
            cpu_samples,
            mem_samples_mb,
            timed_out,
            error_text,
        })
    }
}

impl Runner for VectorRunner {
    fn execute(&self, code: &str, samples: &[Sample]) -> ForgeResult<RunOutput> {
        let run = self.run_pipeline(code, samples, self.timeout, false)?;
        Ok(RunOutput {
            records_out: run.records_out,
            error_text: run.error_text,
            timed_out: run.timed_out,
            elapsed: run.elapsed,
        })
    }

    fn execute_under_measurement(
        &self,
        code: &str,
        samples: &[Sample],
        budget: Duration,
    ) -> ForgeResult<MeasuredRun> {
        self.run_pipeline(code, samples, budget, true)
    }
}

/// File source, JSON flatten, drop-empty filter, the program, JSON file sink.
pub fn pipeline_config(input: &Path, output: &Path, data_dir: &Path, code: &str) -> Value {
    json!({
        "data_dir": data_dir,
        "sources": {
            "samples": {
                "type": "file",
                "include": [input],
                "read_from": "beginning",
                "ignore_checkpoints": true
            }
        },
        "transforms": {
            "flatten": {
                "type": "remap",
                "inputs": ["samples"],
                "source": ". = parse_json(.message) ?? {}"
            },
            "non_empty": {
                "type": "filter",
                "inputs": ["flatten"],
                "condition": "!is_empty(.)"
            },
            "parser": {
                "type": "remap",
                "inputs": ["non_empty"],
                "source": code
            }
        },
        "sinks": {
            "out": {
                "type": "file",
                "inputs": ["parser"],
                "path": output,
                "encoding": { "codec": "json" }
            }
        }
    })
}

fn count_lines(path: &Path) -> usize {
    fs::read(path)
        .map(|bytes| bytes.iter().filter(|&&b| b == b'\n').count())
        .unwrap_or(0)
}

/// The engine's diagnostic block, starting at the first coded compiler error
/// when there is one.
pub fn engine_error_text(log: &str) -> Option<String> {
    let lines: Vec<&str> = log.lines().collect();
    let start = lines
        .iter()
        .position(|l| l.contains("error[E"))
        .or_else(|| lines.iter().position(|l| l.to_lowercase().contains("error")));
    match start {
        Some(idx) => {
            let block: Vec<&str> = lines[idx..].iter().take(30).copied().collect();
            Some(truncate(&block.join("\n"), 4000))
        }
        None if !log.trim().is_empty() => Some(tail_chars(log.trim(), 2000)),
        None => None,
    }
}

struct ResourceSampler {
    system: System,
    pid: Pid,
    cpu: Vec<f64>,
    mem_mb: Vec<f64>,
}

impl ResourceSampler {
    fn new(pid: u32) -> Self {
        let mut sampler = Self {
            system: System::new(),
            pid: Pid::from_u32(pid),
            cpu: Vec::new(),
            mem_mb: Vec::new(),
        };
        // CPU usage is a delta between refreshes; prime the first one.
        sampler.refresh();
        sampler
    }

    fn refresh(&mut self) {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::nothing().with_cpu().with_memory(),
        );
    }

    fn sample(&mut self) {
        self.refresh();
        if let Some(process) = self.system.process(self.pid) {
            self.cpu.push(f64::from(process.cpu_usage()));
            self.mem_mb.push(process.memory() as f64 / (1024.0 * 1024.0));
        }
    }

    fn finish(self) -> (Vec<f64>, Vec<f64>) {
        (self.cpu, self.mem_mb)
    }
}
