pub(super) fn default_max_iterations() -> usize {
    10
}

pub(super) fn default_cycle_window() -> usize {
    3
}

pub(super) fn default_true() -> bool {
    true
}

pub(super) fn default_generation_temperature() -> f32 {
    0.3
}

pub(super) fn default_repair_temperature() -> f32 {
    0.2
}

pub(super) fn default_max_tokens() -> u32 {
    8_000
}

pub(super) fn default_candidate_count() -> usize {
    3
}

pub(super) fn default_history_turns() -> usize {
    8
}

pub(super) fn default_validation_timeout_secs() -> u64 {
    30
}

pub(super) fn default_sample_limit() -> usize {
    5
}

pub(super) fn default_rejected_functions() -> Vec<String> {
    ["parse_regex", "parse_regex_all", "match", "match_array", "to_regex"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub(super) fn default_preferred_functions() -> Vec<String> {
    ["contains", "split", "upcase", "downcase", "starts_with", "ends_with"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub(super) fn default_vector_binary() -> String {
    "vector".to_string()
}

pub(super) fn default_batch_size() -> usize {
    10_000
}

pub(super) fn default_measurement_timeout_secs() -> u64 {
    60
}

pub(super) fn default_sample_interval_ms() -> u64 {
    200
}

pub(super) fn default_baseline_ops_per_sec() -> f64 {
    500_000.0
}

pub(super) fn default_benchmark_iterations() -> u32 {
    100_000
}

pub(super) fn default_cost_threshold() -> f64 {
    5.0
}

pub(super) fn default_base_url() -> String {
    "https://openrouter.ai/api/v1/chat/completions".to_string()
}

pub(super) fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}

pub(super) fn default_models() -> Vec<String> {
    ["anthropic/claude-sonnet-4", "openai/gpt-4.1", "google/gemini-2.5-pro"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub(super) fn default_request_timeout_secs() -> u64 {
    60
}

pub(super) fn default_worker_cap() -> usize {
    8
}

pub(super) fn default_log_level() -> String {
    "info".to_string()
}
