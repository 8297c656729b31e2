//! Configuration for vrl-forge
//!
//! Stored as TOML in ~/.config/vrl-forge/config.toml. Every field has a
//! default, so a partial file (or none at all) is a valid configuration.

mod defaults;

use crate::scorer::tier::TierBreakpoints;
use defaults::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Consecutive identical error codes that count as a cycle.
    #[serde(default = "default_cycle_window")]
    pub cycle_window: usize,
    #[serde(default = "default_true")]
    pub fix_on_failure: bool,
    #[serde(default = "default_generation_temperature")]
    pub generation_temperature: f32,
    #[serde(default = "default_repair_temperature")]
    pub repair_temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_candidate_count")]
    pub candidate_count: usize,
    /// Conversation turns kept verbatim before older ones are compressed.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            cycle_window: default_cycle_window(),
            fix_on_failure: true,
            generation_temperature: default_generation_temperature(),
            repair_temperature: default_repair_temperature(),
            max_tokens: default_max_tokens(),
            candidate_count: default_candidate_count(),
            history_turns: default_history_turns(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_true")]
    pub checker_enabled: bool,
    #[serde(default = "default_true")]
    pub runner_enabled: bool,
    #[serde(default = "default_true")]
    pub rejected_construct_check: bool,
    #[serde(default = "default_true")]
    pub field_conflict_check: bool,
    #[serde(default = "default_validation_timeout_secs")]
    pub timeout_secs: u64,
    /// Samples handed to the engine during validation.
    #[serde(default = "default_sample_limit")]
    pub sample_limit: usize,
    #[serde(default = "default_rejected_functions")]
    pub rejected_functions: Vec<String>,
    #[serde(default = "default_preferred_functions")]
    pub preferred_functions: Vec<String>,
    #[serde(default)]
    pub reserved_fields: Vec<String>,
    #[serde(default)]
    pub reserved_fields_csv: Option<PathBuf>,
    #[serde(default = "default_vector_binary")]
    pub vector_binary: String,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            checker_enabled: true,
            runner_enabled: true,
            rejected_construct_check: true,
            field_conflict_check: true,
            timeout_secs: default_validation_timeout_secs(),
            sample_limit: default_sample_limit(),
            rejected_functions: default_rejected_functions(),
            preferred_functions: default_preferred_functions(),
            reserved_fields: Vec::new(),
            reserved_fields_csv: None,
            vector_binary: default_vector_binary(),
        }
    }
}

impl ValidationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Ranking key used when picking a winner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizeFor {
    Throughput,
    CpuEfficiency,
    #[default]
    Balanced,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_measurement_timeout_secs")]
    pub measurement_timeout_secs: u64,
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
    #[serde(default = "default_baseline_ops_per_sec")]
    pub baseline_ops_per_sec: f64,
    #[serde(default = "default_benchmark_iterations")]
    pub benchmark_iterations: u32,
    #[serde(default = "default_cost_threshold")]
    pub cost_threshold: f64,
    #[serde(default)]
    pub optimize_for: OptimizeFor,
    #[serde(default)]
    pub tier_breakpoints: TierBreakpoints,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            measurement_timeout_secs: default_measurement_timeout_secs(),
            sample_interval_ms: default_sample_interval_ms(),
            baseline_ops_per_sec: default_baseline_ops_per_sec(),
            benchmark_iterations: default_benchmark_iterations(),
            cost_threshold: default_cost_threshold(),
            optimize_for: OptimizeFor::default(),
            tier_breakpoints: TierBreakpoints::default(),
        }
    }
}

impl PerformanceConfig {
    pub fn measurement_timeout(&self) -> Duration {
        Duration::from_secs(self.measurement_timeout_secs.max(1))
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms.max(10))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Environment variable holding the API key. The key itself is never stored.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Ordered model chain; the first entry is the primary.
    #[serde(default = "default_models")]
    pub models: Vec<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            models: default_models(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    #[serde(default)]
    pub max_workers: Option<usize>,
    #[serde(default = "default_worker_cap")]
    pub worker_cap: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_workers: None,
            worker_cap: default_worker_cap(),
        }
    }
}

impl ConcurrencyConfig {
    /// Worker pool size: the override if given, else core count capped at `worker_cap`.
    pub fn worker_count(&self) -> usize {
        match self.max_workers {
            Some(n) => n.max(1),
            None => {
                let cores = std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1);
                cores.min(self.worker_cap.max(1)).max(1)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    fn sanitize(&mut self) {
        self.generation.max_iterations = self.generation.max_iterations.max(1);
        self.generation.cycle_window = self.generation.cycle_window.max(1);
        self.generation.candidate_count = self.generation.candidate_count.max(1);
        self.performance.batch_size = self.performance.batch_size.max(1);
        if self.performance.baseline_ops_per_sec <= 0.0 {
            self.performance.baseline_ops_per_sec = default_baseline_ops_per_sec();
        }
        self.llm.models.retain(|m| !m.trim().is_empty());
        if self.llm.models.is_empty() {
            self.llm.models = default_models();
        }
    }

    /// Get the config directory path
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("vrl-forge"))
    }

    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.toml"))
    }

    /// Load from `path`, else the user config file, else defaults.
    ///
    /// A corrupt file is preserved next to the original and defaults are used.
    pub fn load(path: Option<&Path>) -> Self {
        let path = path.map(Path::to_path_buf).or_else(Self::config_path);
        if let Some(path) = path {
            if let Ok(content) = fs::read_to_string(&path) {
                match Self::from_toml(&content) {
                    Ok(config) => return config,
                    Err(err) => {
                        preserve_corrupt_config(&path, &content);
                        warn!(
                            path = %path.display(),
                            error = %err,
                            "config file was corrupted; a backup was saved and defaults were loaded"
                        );
                    }
                }
            }
        }
        Self::default()
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        let mut config: Config = toml::from_str(content)?;
        config.sanitize();
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        use anyhow::Context;
        let mut sanitized = self.clone();
        sanitized.sanitize();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let content = toml::to_string_pretty(&sanitized).context("Failed to serialize config")?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("toml.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_file_yields_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.generation.max_iterations, 10);
        assert_eq!(config.generation.cycle_window, 3);
        assert_eq!(config.validation.timeout_secs, 30);
        assert_eq!(config.performance.batch_size, 10_000);
        assert_eq!(config.validation.rejected_functions.len(), 5);
        assert_eq!(config.performance.optimize_for, OptimizeFor::Balanced);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml(
            r#"
            [generation]
            max_iterations = 4

            [performance]
            optimize_for = "throughput"

            [performance.tier_breakpoints]
            fast = 250.0
            "#,
        )
        .unwrap();
        assert_eq!(config.generation.max_iterations, 4);
        assert_eq!(config.generation.cycle_window, 3);
        assert_eq!(config.performance.optimize_for, OptimizeFor::Throughput);
        assert_eq!(config.performance.tier_breakpoints.fast, 250.0);
        assert_eq!(config.performance.tier_breakpoints.top, 15_000.0);
    }

    #[test]
    fn sanitize_clamps_degenerate_values() {
        let config = Config::from_toml(
            r#"
            [generation]
            max_iterations = 0
            cycle_window = 0

            [llm]
            models = ["  "]
            "#,
        )
        .unwrap();
        assert_eq!(config.generation.max_iterations, 1);
        assert_eq!(config.generation.cycle_window, 1);
        assert!(!config.llm.models.is_empty());
    }

    #[test]
    fn corrupt_file_is_preserved_and_defaults_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "generation = [not toml").unwrap();
        let config = Config::load(Some(&path));
        assert_eq!(config.generation.max_iterations, 10);
        assert!(dir.path().join("config.toml.corrupt").exists());
    }

    #[test]
    fn save_then_load_keeps_overrides() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.validation.sample_limit = 9;
        config.save(&path).unwrap();
        let loaded = Config::load(Some(&path));
        assert_eq!(loaded.validation.sample_limit, 9);
    }

    #[test]
    fn worker_count_respects_override_floor() {
        let config = ConcurrencyConfig {
            max_workers: Some(0),
            worker_cap: 8,
        };
        assert_eq!(config.worker_count(), 1);
        let capped = ConcurrencyConfig {
            max_workers: None,
            worker_cap: 1,
        };
        assert_eq!(capped.worker_count(), 1);
    }
}
