//! Runtime configuration
//!
//! Every retry cap, backoff base, and timeout in the core reads from
//! one [`RuntimeConfig`] — there is a single source of truth for the
//! numbers. Values come from defaults layered with recognised
//! environment options.
//!
//! # Recognised environment options
//!
//! | Variable | Effect | Default |
//! |----------|--------|---------|
//! | `GOMIND_MODE` | `api`, `worker`, or empty = both | both |
//! | `GOMIND_SEMANTIC_RETRY_ENABLED` | Layer-4 on/off | `true` |
//! | `GOMIND_SEMANTIC_RETRY_MAX_ATTEMPTS` | Layer-4 attempt cap | `2` |
//! | `GOMIND_LLM_DEBUG_ENABLED` | capture LLM prompt/response pairs | `false` |
//! | `GOMIND_LLM_DEBUG_TTL` | capture TTL, seconds | `3600` |
//! | `GOMIND_LLM_DEBUG_ERROR_TTL` | capture TTL for failed calls, seconds | `86400` |
//! | `WORKER_COUNT` | task worker pool size | `3` |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | telemetry egress | unset |

use config::{Config, Environment};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Which roles this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// HTTP ingestion only.
    Api,
    /// Task workers only.
    Worker,
    /// Both in one process.
    #[default]
    Both,
}

impl RunMode {
    /// Whether the HTTP surface should be served.
    pub fn serves_api(&self) -> bool {
        matches!(self, RunMode::Api | RunMode::Both)
    }

    /// Whether the worker pool should run.
    pub fn runs_workers(&self) -> bool {
        matches!(self, RunMode::Worker | RunMode::Both)
    }
}

/// Configuration load failure.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("config error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Every tunable of the core, with its documented default.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Process role selection (`GOMIND_MODE`).
    pub mode: RunMode,

    // -- planner -----------------------------------------------------------
    /// Re-prompt budget when the oracle emits an invalid plan.
    pub planner_max_attempts: u32,
    /// Sampling temperature for structured planner output.
    pub planner_temperature: f32,
    /// Completion token budget for planner calls.
    pub planner_max_tokens: u32,
    /// Whether a zero-step plan is accepted (else `InvalidInput`).
    pub allow_empty_plans: bool,

    // -- recovery ----------------------------------------------------------
    /// Layer-4 enabled (`GOMIND_SEMANTIC_RETRY_ENABLED`).
    pub semantic_retry_enabled: bool,
    /// Layer-4 attempt cap (`GOMIND_SEMANTIC_RETRY_MAX_ATTEMPTS`).
    pub semantic_retry_max_attempts: u32,
    /// Mechanical retry attempt cap.
    pub mechanical_max_attempts: u32,
    /// Mechanical backoff base.
    pub mechanical_backoff_base: Duration,
    /// Oracle retry attempt cap (planner and resolver layers).
    pub oracle_max_attempts: u32,

    // -- timeouts ----------------------------------------------------------
    /// Per-capability-call timeout.
    pub call_timeout: Duration,
    /// Per-step timeout.
    pub step_timeout: Duration,
    /// Whole-plan timeout.
    pub plan_timeout: Duration,
    /// Per-task handler timeout.
    pub handler_timeout: Duration,

    // -- executor ----------------------------------------------------------
    /// Bound on concurrently running steps per plan.
    pub max_parallel_steps: usize,

    // -- registry / catalog ------------------------------------------------
    /// TTL for registry entries; renewal runs at ttl/3.
    pub registry_ttl: Duration,
    /// Catalog full-relist reconciliation interval.
    pub catalog_relist_interval: Duration,

    // -- task subsystem ----------------------------------------------------
    /// Worker pool size (`WORKER_COUNT`).
    pub worker_count: usize,
    /// Bounded blocking wait for one dequeue.
    pub dequeue_wait: Duration,
    /// Worker heartbeat interval onto the task record.
    pub heartbeat_interval: Duration,
    /// Grace period before the janitor requeues a stale running task.
    pub janitor_grace: Duration,
    /// Janitor sweep interval.
    pub janitor_interval: Duration,
    /// In-flight drain budget on shutdown.
    pub shutdown_budget: Duration,

    // -- observability -----------------------------------------------------
    /// LLM prompt/response capture (`GOMIND_LLM_DEBUG_ENABLED`).
    pub llm_debug_enabled: bool,
    /// Capture TTL for successful calls (`GOMIND_LLM_DEBUG_TTL`).
    pub llm_debug_ttl: Duration,
    /// Capture TTL for failed calls (`GOMIND_LLM_DEBUG_ERROR_TTL`).
    pub llm_debug_error_ttl: Duration,
    /// OTLP endpoint (`OTEL_EXPORTER_OTLP_ENDPOINT`).
    pub otlp_endpoint: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::Both,
            planner_max_attempts: 2,
            planner_temperature: 0.2,
            planner_max_tokens: 2048,
            allow_empty_plans: true,
            semantic_retry_enabled: true,
            semantic_retry_max_attempts: 2,
            mechanical_max_attempts: 3,
            mechanical_backoff_base: Duration::from_millis(250),
            oracle_max_attempts: 3,
            call_timeout: Duration::from_secs(60),
            step_timeout: Duration::from_secs(120),
            plan_timeout: Duration::from_secs(300),
            handler_timeout: Duration::from_secs(600),
            max_parallel_steps: 8,
            registry_ttl: Duration::from_secs(30),
            catalog_relist_interval: Duration::from_secs(60),
            worker_count: 3,
            dequeue_wait: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(5),
            janitor_grace: Duration::from_secs(30),
            janitor_interval: Duration::from_secs(10),
            shutdown_budget: Duration::from_secs(60),
            llm_debug_enabled: false,
            llm_debug_ttl: Duration::from_secs(3600),
            llm_debug_error_ttl: Duration::from_secs(86_400),
            otlp_endpoint: None,
        }
    }
}

/// Raw environment projection; everything optional, strings as found.
#[derive(Debug, Deserialize, Default)]
struct EnvOverrides {
    gomind_mode: Option<String>,
    gomind_semantic_retry_enabled: Option<bool>,
    gomind_semantic_retry_max_attempts: Option<u32>,
    gomind_llm_debug_enabled: Option<bool>,
    gomind_llm_debug_ttl: Option<u64>,
    gomind_llm_debug_error_ttl: Option<u64>,
    worker_count: Option<usize>,
    otel_exporter_otlp_endpoint: Option<String>,
}

impl RuntimeConfig {
    /// Load defaults layered with the recognised environment options.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env: EnvOverrides = Config::builder()
            .add_source(Environment::default().try_parsing(true))
            .build()?
            .try_deserialize()
            .unwrap_or_default();
        Self::default().apply(env)
    }

    fn apply(mut self, env: EnvOverrides) -> Result<Self, ConfigError> {
        if let Some(mode) = env.gomind_mode {
            self.mode = match mode.to_ascii_lowercase().as_str() {
                "api" => RunMode::Api,
                "worker" => RunMode::Worker,
                "" => RunMode::Both,
                other => {
                    return Err(ConfigError::InvalidValue {
                        key: "GOMIND_MODE".into(),
                        reason: format!("expected 'api', 'worker', or empty, got '{other}'"),
                    });
                }
            };
        }
        if let Some(enabled) = env.gomind_semantic_retry_enabled {
            self.semantic_retry_enabled = enabled;
        }
        if let Some(attempts) = env.gomind_semantic_retry_max_attempts {
            self.semantic_retry_max_attempts = attempts;
        }
        if let Some(enabled) = env.gomind_llm_debug_enabled {
            self.llm_debug_enabled = enabled;
        }
        if let Some(secs) = env.gomind_llm_debug_ttl {
            self.llm_debug_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env.gomind_llm_debug_error_ttl {
            self.llm_debug_error_ttl = Duration::from_secs(secs);
        }
        if let Some(count) = env.worker_count {
            if count == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "WORKER_COUNT".into(),
                    reason: "must be at least 1".into(),
                });
            }
            self.worker_count = count;
        }
        if let Some(endpoint) = env.otel_exporter_otlp_endpoint {
            if !endpoint.is_empty() {
                self.otlp_endpoint = Some(endpoint);
            }
        }
        Ok(self)
    }

    /// Registry renewal interval (ttl / 3).
    pub fn registry_renew_interval(&self) -> Duration {
        self.registry_ttl / 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.worker_count, 3);
        assert_eq!(cfg.semantic_retry_max_attempts, 2);
        assert!(cfg.semantic_retry_enabled);
        assert_eq!(cfg.call_timeout, Duration::from_secs(60));
        assert_eq!(cfg.step_timeout, Duration::from_secs(120));
        assert_eq!(cfg.plan_timeout, Duration::from_secs(300));
        assert_eq!(cfg.handler_timeout, Duration::from_secs(600));
        assert_eq!(cfg.mechanical_backoff_base, Duration::from_millis(250));
    }

    #[test]
    fn mode_strings_map_to_roles() {
        let cfg = RuntimeConfig::default()
            .apply(EnvOverrides {
                gomind_mode: Some("worker".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(cfg.mode, RunMode::Worker);
        assert!(!cfg.mode.serves_api());
        assert!(cfg.mode.runs_workers());

        let cfg = RuntimeConfig::default()
            .apply(EnvOverrides {
                gomind_mode: Some(String::new()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(cfg.mode, RunMode::Both);
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let err = RuntimeConfig::default()
            .apply(EnvOverrides {
                gomind_mode: Some("hybrid".into()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let err = RuntimeConfig::default()
            .apply(EnvOverrides {
                worker_count: Some(0),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn semantic_retry_overrides_apply() {
        let cfg = RuntimeConfig::default()
            .apply(EnvOverrides {
                gomind_semantic_retry_enabled: Some(false),
                gomind_semantic_retry_max_attempts: Some(5),
                ..Default::default()
            })
            .unwrap();
        assert!(!cfg.semantic_retry_enabled);
        assert_eq!(cfg.semantic_retry_max_attempts, 5);
    }

    #[test]
    fn renew_interval_is_a_third_of_ttl() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.registry_renew_interval(), Duration::from_secs(10));
    }
}
