//! Pipeline configuration
//!
//! Built once at process start and handed to each component constructor.
//! Every section has serde defaults so a partial TOML file is valid.

use crate::error::ConfigError;
use acp_content::CacheSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the model API key
pub const ENV_API_KEY: &str = "ACP_MODEL_API_KEY";
/// Environment variable overriding the model endpoint
pub const ENV_ENDPOINT: &str = "ACP_MODEL_ENDPOINT";

/// Longest accepted expiry or idle window (one year)
pub const MAX_TTL_SECS: u64 = 365 * 24 * 60 * 60;
/// Longest accepted model-call budget (ten minutes)
pub const MAX_TIMEOUT_MS: u64 = 10 * 60 * 1_000;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub model: ModelConfig,
    pub transform: TransformConfig,
    pub gate: GateConfig,
    pub batch: BatchPolicy,
    pub evaluation: EvaluationConfig,
    pub reports: ReportConfig,
    pub sessions: SessionConfig,
    pub expansions: ExpansionConfig,
}

impl PipelineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from TOML text without touching the environment
    ///
    /// # Errors
    /// Parse failures and out-of-range values
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file, then apply environment overrides
    ///
    /// # Errors
    /// I/O, parse and validation failures
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Overlay credentials from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Overlay credentials from an arbitrary lookup
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(ENV_API_KEY).filter(|k| !k.trim().is_empty()) {
            self.model.api_key = Some(key);
        }
        if let Some(endpoint) = lookup(ENV_ENDPOINT).filter(|e| !e.trim().is_empty()) {
            self.model.endpoint = endpoint;
        }
    }

    /// Check value ranges
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] naming the first offending field
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, message: &str| {
            Err(ConfigError::Invalid {
                field,
                message: message.to_string(),
            })
        };

        if !(0.0..=1.0).contains(&self.evaluation.sample_rate) {
            return invalid("evaluation.sample_rate", "must be within 0.0..=1.0");
        }
        if self.batch.transform_count_threshold == 0 {
            return invalid("batch.transform_count_threshold", "must be at least 1");
        }
        if self.batch.time_threshold_ms == 0 {
            return invalid("batch.time_threshold_ms", "must be positive");
        }
        if self.gate.min_length_ratio_rewrite <= 0.0 || self.gate.min_length_ratio_expand <= 0.0 {
            return invalid("gate.min_length_ratio_*", "must be positive");
        }
        if self.gate.max_length_ratio <= self.gate.min_length_ratio_expand {
            return invalid("gate.max_length_ratio", "must exceed the expand minimum");
        }
        if self.reports.default_limit == 0 || self.reports.default_limit > self.reports.max_limit {
            return invalid("reports.default_limit", "must be within 1..=max_limit");
        }

        let timeouts = [
            ("transform.timeout_ms", self.transform.timeout_ms),
            ("gate.llm_timeout_ms", self.gate.llm_timeout_ms),
            ("evaluation.timeout_ms", self.evaluation.timeout_ms),
        ];
        for (field, ms) in timeouts {
            if !(1..=MAX_TIMEOUT_MS).contains(&ms) {
                return invalid(field, "must be within 1..=600000 milliseconds");
            }
        }

        let ttls = [
            ("sessions.ttl_secs", Some(self.sessions.ttl_secs)),
            ("sessions.idle_timeout_secs", Some(self.sessions.idle_timeout_secs)),
            ("reports.ttl_secs", self.reports.ttl_secs),
            ("expansions.cache_ttl_secs", Some(self.expansions.cache_ttl_secs)),
        ];
        for (field, secs) in ttls {
            if secs.is_some_and(|s| !(1..=MAX_TTL_SECS).contains(&s)) {
                return invalid(field, "must be within 1..=31536000 seconds");
            }
        }
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn with_model(mut self, model: ModelConfig) -> Self {
        self.model = model;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_batch_policy(mut self, batch: BatchPolicy) -> Self {
        self.batch = batch;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_sample_rate(mut self, rate: f64) -> Self {
        self.evaluation.sample_rate = rate;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_evaluation_enabled(mut self, enabled: bool) -> Self {
        self.evaluation.enabled = enabled;
        self
    }

    /// Disable the LLM coherence tier of the gate
    #[inline]
    #[must_use]
    pub fn with_skip_llm_gate(mut self, skip: bool) -> Self {
        self.gate.skip_llm_gate = skip;
        self
    }
}

/// Model endpoint and per-task model names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// OpenAI-compatible chat completions endpoint
    pub endpoint: String,
    /// Bearer token; absent means "not configured"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub transform_model: String,
    pub gate_model: String,
    pub evaluation_model: String,
    pub max_tokens: u32,
}

impl ModelConfig {
    #[inline]
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: None,
            transform_model: "gpt-4o-mini".to_string(),
            gate_model: "gpt-4o-mini".to_string(),
            evaluation_model: "gpt-4o".to_string(),
            max_tokens: 1_024,
        }
    }
}

/// Transform service limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Shortest passage worth transforming, in characters
    pub min_content_chars: usize,
    pub timeout_ms: u64,
    pub temperature: f32,
}

impl TransformConfig {
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            min_content_chars: 20,
            timeout_ms: 30_000,
            temperature: 0.9,
        }
    }
}

/// Quality gate thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Disable the LLM tier entirely
    pub skip_llm_gate: bool,
    /// LLM tier budget
    pub llm_timeout_ms: u64,
    /// Minimum transformed/original length ratio for expansions
    pub min_length_ratio_expand: f64,
    /// Minimum transformed/original length ratio for rewrites
    pub min_length_ratio_rewrite: f64,
    /// Upper bound for either kind
    pub max_length_ratio: f64,
    /// Longest run of one repeated token before output counts as runaway
    pub max_repeat_run: usize,
    /// Allowed drop in Latin-script letter share against the original
    pub max_script_drift: f64,
}

impl GateConfig {
    #[inline]
    #[must_use]
    pub fn llm_timeout(&self) -> Duration {
        Duration::from_millis(self.llm_timeout_ms)
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            skip_llm_gate: false,
            llm_timeout_ms: 300,
            min_length_ratio_expand: 1.1,
            min_length_ratio_rewrite: 0.5,
            max_length_ratio: 6.0,
            max_repeat_run: 4,
            max_script_drift: 0.3,
        }
    }
}

/// Batch trigger thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchPolicy {
    /// Transformations since the last batch that force a new one
    pub transform_count_threshold: usize,
    /// Elapsed time since the last batch that forces a new one
    pub time_threshold_ms: u64,
}

impl BatchPolicy {
    #[must_use]
    pub const fn new(transform_count_threshold: usize, time_threshold_ms: u64) -> Self {
        Self {
            transform_count_threshold,
            time_threshold_ms,
        }
    }
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self::new(10, 300_000)
    }
}

/// Sampled rubric evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub enabled: bool,
    /// Probability a triggered batch is scored
    pub sample_rate: f64,
    pub timeout_ms: u64,
}

impl EvaluationConfig {
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_rate: 0.15,
            timeout_ms: 60_000,
        }
    }
}

/// Report persistence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Report expiry; `None` keeps reports until evicted externally
    pub ttl_secs: Option<u64>,
    pub default_limit: usize,
    pub max_limit: usize,
}

impl ReportConfig {
    #[must_use]
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }

    /// Resolve a requested listing size against the defaults and cap
    #[must_use]
    pub fn clamp_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit)
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            ttl_secs: Some(30 * 24 * 60 * 60),
            default_limit: 50,
            max_limit: 100,
        }
    }
}

/// Session persistence and expiry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Snapshot expiry, also how long an ended id stays rejected
    pub ttl_secs: u64,
    /// Silence after which a tracked session is ended by the idle sweep
    pub idle_timeout_secs: u64,
}

impl SessionConfig {
    #[inline]
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    #[inline]
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 24 * 60 * 60,
            idle_timeout_secs: 24 * 60 * 60,
        }
    }
}

/// Pre-generated expansion data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpansionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_path: Option<PathBuf>,
    pub cache_capacity: u64,
    pub cache_ttl_secs: u64,
}

impl ExpansionConfig {
    #[must_use]
    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            max_capacity: self.cache_capacity,
            ttl: Duration::from_secs(self.cache_ttl_secs),
        }
    }
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        let cache = CacheSettings::default();
        Self {
            manifest_path: None,
            cache_capacity: cache.max_capacity,
            cache_ttl_secs: cache.ttl.as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_documented_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.batch.transform_count_threshold, 10);
        assert_eq!(config.batch.time_threshold_ms, 300_000);
        assert!((config.evaluation.sample_rate - 0.15).abs() < f64::EPSILON);
        assert_eq!(config.transform.min_content_chars, 20);
        assert_eq!(config.gate.llm_timeout_ms, 300);
        assert_eq!(config.sessions.ttl_secs, 86_400);
        assert_eq!(config.sessions.idle_timeout_secs, 86_400);
        assert!(config.validate().is_ok());
        assert!(!config.model.is_configured());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [batch]
            transform_count_threshold = 3

            [gate]
            skip_llm_gate = true
            "#,
        )
        .unwrap();

        assert_eq!(config.batch.transform_count_threshold, 3);
        assert_eq!(config.batch.time_threshold_ms, 300_000);
        assert!(config.gate.skip_llm_gate);
        assert_eq!(config.reports.max_limit, 100);
    }

    #[test]
    fn out_of_range_sample_rate_is_rejected() {
        let err = PipelineConfig::from_toml_str("[evaluation]\nsample_rate = 1.5\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "evaluation.sample_rate",
                ..
            }
        ));
    }

    #[test]
    fn unbounded_ttls_are_rejected() {
        let huge = u64::MAX / 2;
        for (section, key, field) in [
            ("expansions", "cache_ttl_secs", "expansions.cache_ttl_secs"),
            ("reports", "ttl_secs", "reports.ttl_secs"),
            ("sessions", "ttl_secs", "sessions.ttl_secs"),
            ("sessions", "idle_timeout_secs", "sessions.idle_timeout_secs"),
        ] {
            for value in [0, huge] {
                let text = format!("[{section}]\n{key} = {value}\n");
                let err = PipelineConfig::from_toml_str(&text).unwrap_err();
                assert!(
                    matches!(err, ConfigError::Invalid { field: f, .. } if f == field),
                    "{text} gave {err}"
                );
            }
        }
    }

    #[test]
    fn zero_and_unbounded_timeouts_are_rejected() {
        for (section, key, field) in [
            ("transform", "timeout_ms", "transform.timeout_ms"),
            ("gate", "llm_timeout_ms", "gate.llm_timeout_ms"),
            ("evaluation", "timeout_ms", "evaluation.timeout_ms"),
        ] {
            for value in [0, MAX_TIMEOUT_MS + 1] {
                let text = format!("[{section}]\n{key} = {value}\n");
                let err = PipelineConfig::from_toml_str(&text).unwrap_err();
                assert!(
                    matches!(err, ConfigError::Invalid { field: f, .. } if f == field),
                    "{text} gave {err}"
                );
            }
        }
    }

    #[test]
    fn reports_may_keep_no_expiry() {
        let mut config = PipelineConfig::default();
        config.reports.ttl_secs = None;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_credentials_only() {
        let env: HashMap<&str, &str> = [
            (ENV_API_KEY, "sk-test"),
            (ENV_ENDPOINT, "http://localhost:9000/v1/chat/completions"),
        ]
        .into_iter()
        .collect();

        let mut config = PipelineConfig::default();
        config.apply_overrides_from(|k| env.get(k).map(ToString::to_string));

        assert!(config.model.is_configured());
        assert_eq!(config.model.endpoint, "http://localhost:9000/v1/chat/completions");
        assert_eq!(config.model.transform_model, ModelConfig::default().transform_model);
    }

    #[test]
    fn blank_env_does_not_configure() {
        let mut config = PipelineConfig::default();
        config.apply_overrides_from(|_| Some("  ".to_string()));
        assert!(!config.model.is_configured());
    }

    #[test]
    fn listing_limit_is_clamped() {
        let reports = ReportConfig::default();
        assert_eq!(reports.clamp_limit(None), 50);
        assert_eq!(reports.clamp_limit(Some(500)), 100);
        assert_eq!(reports.clamp_limit(Some(0)), 1);
    }
}
