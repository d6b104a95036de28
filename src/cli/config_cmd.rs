//! Config CLI subcommands: show, defaults, validate.
//!
//! These read configuration straight from the environment; no coordinator is
//! started.

use crate::config::{self, EffectiveConfig, EngineConfig};

/// Print effective config as key-value pairs to stdout.
pub fn run_show(json: bool) {
    let cfg = config::load().effective_config();
    print_config(&cfg, json);
}

/// Print default config values (no env overrides) to stdout.
pub fn run_defaults(json: bool) {
    let cfg = EngineConfig::default().effective_config();
    print_config(&cfg, json);
}

/// Report environment values that would be ignored.
///
/// Returns 0 if valid, 1 if any issues are found.
pub fn run_validate() -> i32 {
    let issues = config::validate_env();
    for issue in &issues {
        eprintln!("WARNING: {}={:?}: {}", issue.key, issue.value, issue.reason);
    }

    let cfg = config::load().effective_config();
    let mut warnings = issues.len();
    if cfg.max_parallelism > cfg.worker_threads {
        eprintln!(
            "WARNING: {} ({}) exceeds worker threads ({}); chained dispatch cannot use the extra slots",
            config::ENV_MAX_PARALLELISM,
            cfg.max_parallelism,
            cfg.worker_threads
        );
        warnings += 1;
    }

    if warnings == 0 {
        println!("Configuration is valid.");
        0
    } else {
        1
    }
}

fn print_config(cfg: &EffectiveConfig, json: bool) {
    if json {
        match serde_json::to_string_pretty(cfg) {
            Ok(out) => println!("{out}"),
            Err(e) => eprintln!("Failed to serialize config: {e}"),
        }
        return;
    }
    for (key, value) in config_lines(cfg) {
        println!("{key}={value}");
    }
}

fn config_lines(cfg: &EffectiveConfig) -> Vec<(&'static str, String)> {
    let format = match cfg.log_format {
        crate::telemetry::LogFormat::Json => "json",
        crate::telemetry::LogFormat::Pretty => "pretty",
    };
    vec![
        (config::ENV_DEFAULT_CONTEXT, cfg.default_context.to_string()),
        (config::ENV_MAX_PARALLELISM, cfg.max_parallelism.to_string()),
        (config::ENV_MAX_REQUEST_AGE, cfg.max_request_age.to_string()),
        (config::ENV_WORKER_THREADS, cfg.worker_threads.to_string()),
        (config::ENV_SHUTDOWN_TIMEOUT, cfg.shutdown_timeout_secs.to_string()),
        (config::ENV_LOG_LEVEL, cfg.log_level.clone()),
        (config::ENV_LOG_FORMAT, format.to_string()),
    ]
}
