//! Engine configuration loading from environment variables.
//!
//! All values are loaded from `DEFERRED_*` environment variables with
//! sensible defaults. Invalid values fall back to defaults without crashing;
//! `validate_env` reports them for the CLI.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `DEFERRED_DEFAULT_CONTEXT` | chained | Context used when `execute` is given `Default` |
//! | `DEFERRED_MAX_PARALLELISM` | worker threads | Ring slots for chained dispatch (0 = unbounded) |
//! | `DEFERRED_MAX_REQUEST_AGE` | 0 | Ticks before a started request is forced (0 = off) |
//! | `DEFERRED_WORKER_THREADS` | 0 | Worker pool size (0 = auto) |
//! | `DEFERRED_SHUTDOWN_TIMEOUT` | 600 | Max seconds from shutdown request to termination |
//! | `DEFERRED_LOG_LEVEL` | info | `EnvFilter` directive |
//! | `DEFERRED_LOG_FORMAT` | json | `json` or `pretty` |

use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::request::ExecutionContext;
use crate::telemetry::{LogConfig, LogFormat};

pub const ENV_DEFAULT_CONTEXT: &str = "DEFERRED_DEFAULT_CONTEXT";
pub const ENV_MAX_PARALLELISM: &str = "DEFERRED_MAX_PARALLELISM";
pub const ENV_MAX_REQUEST_AGE: &str = "DEFERRED_MAX_REQUEST_AGE";
pub const ENV_WORKER_THREADS: &str = "DEFERRED_WORKER_THREADS";
pub const ENV_SHUTDOWN_TIMEOUT: &str = "DEFERRED_SHUTDOWN_TIMEOUT";
pub const ENV_LOG_LEVEL: &str = "DEFERRED_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "DEFERRED_LOG_FORMAT";

const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 600;
const MAX_WORKER_THREADS: usize = 1024;

/// Process-wide engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub default_context: ExecutionContext,
    /// Ring size for chained dispatch. `None` follows the worker count.
    pub max_parallelism: Option<usize>,
    /// Default age threshold in ticks; 0 disables aging.
    pub max_request_age: u64,
    /// Worker pool threads; 0 picks the number of CPUs.
    pub worker_threads: usize,
    pub shutdown_timeout: Duration,
    pub log: LogConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_context: ExecutionContext::Chained,
            max_parallelism: None,
            max_request_age: 0,
            worker_threads: 0,
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            log: LogConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Worker count after resolving 0 to the CPU count.
    pub fn resolved_worker_threads(&self) -> usize {
        match self.worker_threads {
            0 => num_cpus::get().max(1),
            n => n,
        }
    }

    pub fn resolved_max_parallelism(&self) -> usize {
        self.max_parallelism.unwrap_or_else(|| self.resolved_worker_threads())
    }

    /// Serializable summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            default_context: self.default_context,
            max_parallelism: self.resolved_max_parallelism(),
            max_request_age: self.max_request_age,
            worker_threads: self.resolved_worker_threads(),
            shutdown_timeout_secs: self.shutdown_timeout.as_secs(),
            log_level: self.log.level.clone(),
            log_format: self.log.format,
        }
    }
}

/// Effective engine configuration summary.
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub default_context: ExecutionContext,
    pub max_parallelism: usize,
    pub max_request_age: u64,
    pub worker_threads: usize,
    pub shutdown_timeout_secs: u64,
    pub log_level: String,
    pub log_format: LogFormat,
}

/// An environment value that was present but could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigIssue {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse an env var with `FromStr`, returning `None` on missing or invalid.
fn parse_env<T: FromStr>(key: &str) -> Option<T> {
    env_value(key).and_then(|v| v.trim().parse::<T>().ok())
}

fn parse_usize(key: &str, default: usize) -> usize {
    parse_env(key).unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    parse_env(key).unwrap_or(default)
}

/// `Default` is not a usable default context.
fn parse_default_context() -> ExecutionContext {
    match parse_env::<ExecutionContext>(ENV_DEFAULT_CONTEXT) {
        Some(ExecutionContext::Default) | None => ExecutionContext::Chained,
        Some(context) => context,
    }
}

fn load_log_config() -> LogConfig {
    LogConfig {
        format: parse_env(ENV_LOG_FORMAT).unwrap_or_default(),
        level: env_value(ENV_LOG_LEVEL).unwrap_or_else(|| "info".to_string()),
        output_path: None,
    }
}

/// Load all configuration from environment variables.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> EngineConfig {
    let worker_threads = parse_usize(ENV_WORKER_THREADS, 0).min(MAX_WORKER_THREADS);
    let max_parallelism = parse_env::<usize>(ENV_MAX_PARALLELISM).map(|n| n.min(MAX_WORKER_THREADS));
    let shutdown_secs = parse_u64(ENV_SHUTDOWN_TIMEOUT, DEFAULT_SHUTDOWN_TIMEOUT_SECS).max(1);

    EngineConfig {
        default_context: parse_default_context(),
        max_parallelism,
        max_request_age: parse_u64(ENV_MAX_REQUEST_AGE, 0),
        worker_threads,
        shutdown_timeout: Duration::from_secs(shutdown_secs),
        log: load_log_config(),
    }
}

fn check<T: FromStr>(key: &'static str, issues: &mut Vec<ConfigIssue>, what: &str) {
    if let Some(value) = env_value(key) {
        if value.trim().parse::<T>().is_err() {
            issues.push(ConfigIssue {
                key,
                value,
                reason: format!("expected {what}"),
            });
        }
    }
}

/// Report environment values that `load` would silently ignore.
pub fn validate_env() -> Vec<ConfigIssue> {
    let mut issues = Vec::new();
    check::<ExecutionContext>(ENV_DEFAULT_CONTEXT, &mut issues, "immediate, frame-boundary, worker-pool or chained");
    check::<usize>(ENV_MAX_PARALLELISM, &mut issues, "a non-negative integer");
    check::<u64>(ENV_MAX_REQUEST_AGE, &mut issues, "a tick count");
    check::<usize>(ENV_WORKER_THREADS, &mut issues, "a thread count");
    check::<u64>(ENV_SHUTDOWN_TIMEOUT, &mut issues, "seconds");
    check::<LogFormat>(ENV_LOG_FORMAT, &mut issues, "json or pretty");

    if env_value(ENV_DEFAULT_CONTEXT).as_deref().map(str::trim) == Some("default") {
        issues.push(ConfigIssue {
            key: ENV_DEFAULT_CONTEXT,
            value: "default".to_string(),
            reason: "the default context must name a concrete strategy".to_string(),
        });
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Serialize env-mutating tests to avoid cross-test pollution.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        ENV_DEFAULT_CONTEXT,
        ENV_MAX_PARALLELISM,
        ENV_MAX_REQUEST_AGE,
        ENV_WORKER_THREADS,
        ENV_SHUTDOWN_TIMEOUT,
        ENV_LOG_LEVEL,
        ENV_LOG_FORMAT,
    ];

    fn clear_env_vars() {
        for k in ENV_KEYS {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn test_defaults_are_sensible() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let cfg = load();
        assert_eq!(cfg.default_context, ExecutionContext::Chained);
        assert_eq!(cfg.max_parallelism, None);
        assert_eq!(cfg.max_request_age, 0);
        assert_eq!(cfg.worker_threads, 0);
        assert_eq!(cfg.shutdown_timeout.as_secs(), 600);
        assert_eq!(cfg.log.format, LogFormat::Json);
        assert_eq!(cfg.resolved_max_parallelism(), cfg.resolved_worker_threads());
    }

    #[test]
    fn test_env_vars_override_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var(ENV_DEFAULT_CONTEXT, "worker-pool");
        std::env::set_var(ENV_MAX_PARALLELISM, "0");
        std::env::set_var(ENV_MAX_REQUEST_AGE, "3");
        std::env::set_var(ENV_WORKER_THREADS, "4");
        std::env::set_var(ENV_LOG_FORMAT, "pretty");
        let cfg = load();
        assert_eq!(cfg.default_context, ExecutionContext::WorkerPool);
        assert_eq!(cfg.resolved_max_parallelism(), 0);
        assert_eq!(cfg.max_request_age, 3);
        assert_eq!(cfg.resolved_worker_threads(), 4);
        assert_eq!(cfg.log.format, LogFormat::Pretty);
        clear_env_vars();
    }

    #[test]
    fn test_invalid_env_falls_back_to_default() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var(ENV_DEFAULT_CONTEXT, "fibers");
        std::env::set_var(ENV_MAX_REQUEST_AGE, "soon");
        std::env::set_var(ENV_SHUTDOWN_TIMEOUT, "0");
        let cfg = load();
        assert_eq!(cfg.default_context, ExecutionContext::Chained);
        assert_eq!(cfg.max_request_age, 0);
        assert_eq!(cfg.shutdown_timeout.as_secs(), 1, "timeout has a floor");

        let issues = validate_env();
        let keys: Vec<_> = issues.iter().map(|i| i.key).collect();
        assert!(keys.contains(&ENV_DEFAULT_CONTEXT));
        assert!(keys.contains(&ENV_MAX_REQUEST_AGE));
        assert!(!keys.contains(&ENV_SHUTDOWN_TIMEOUT));
        clear_env_vars();
    }

    #[test]
    fn test_default_context_cannot_be_default() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var(ENV_DEFAULT_CONTEXT, "default");
        assert_eq!(load().default_context, ExecutionContext::Chained);
        assert_eq!(validate_env().len(), 1);
        clear_env_vars();
    }

    #[test]
    fn test_effective_config_serializes() {
        let cfg = EngineConfig {
            worker_threads: 2,
            ..Default::default()
        };
        let json = serde_json::to_value(cfg.effective_config()).unwrap();
        assert_eq!(json["default_context"], "chained");
        assert_eq!(json["max_parallelism"], 2);
        assert_eq!(json["log_format"], "json");
    }
}
