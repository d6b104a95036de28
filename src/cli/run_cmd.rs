//! `run`: drive a coordinator from a fixed-rate tokio loop.
//!
//! Issues a few demo requests per frame, spread across every execution
//! context, until the frame limit is reached or ctrl-c arrives. Exits once
//! the coordinator terminates and prints its final stats as JSON.

use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;

use crate::config;
use crate::lifecycle::Coordinator;
use crate::pool::PooledRequest;
use crate::request::{ExecutionContext, Outcome};
use crate::telemetry;

const CONTEXTS: [ExecutionContext; 4] = [
    ExecutionContext::Immediate,
    ExecutionContext::FrameBoundary,
    ExecutionContext::WorkerPool,
    ExecutionContext::Chained,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Stop after this many frames; run until interrupted if unset.
    pub frames: Option<u64>,
    pub requests_per_frame: usize,
    pub callables_per_request: usize,
    pub tick_interval: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            frames: None,
            requests_per_frame: 4,
            callables_per_request: 8,
            tick_interval: Duration::from_millis(16),
        }
    }
}

impl RunOptions {
    /// Parse `--frames N`, `--requests-per-frame K`, `--callables N` and
    /// `--tick-ms MS`.
    pub fn parse(args: &[String]) -> Result<Self, String> {
        let mut options = Self::default();
        let mut iter = args.iter();
        while let Some(flag) = iter.next() {
            let mut value = |name: &str| -> Result<u64, String> {
                let raw = iter.next().ok_or_else(|| format!("{name} requires a value"))?;
                raw.parse::<u64>().map_err(|_| format!("{name}: invalid number {raw:?}"))
            };
            match flag.as_str() {
                "--frames" => options.frames = Some(value("--frames")?),
                "--requests-per-frame" => options.requests_per_frame = value("--requests-per-frame")? as usize,
                "--callables" => options.callables_per_request = value("--callables")?.max(1) as usize,
                "--tick-ms" => options.tick_interval = Duration::from_millis(value("--tick-ms")?.max(1)),
                other => return Err(format!("unknown option: {other}")),
            }
        }
        Ok(options)
    }
}

#[derive(Debug, Default)]
struct Checksum {
    value: u64,
}

fn issue(coordinator: &Coordinator, serial: usize, options: &RunOptions) -> Option<PooledRequest<Checksum>> {
    let request = match coordinator.create_request::<Checksum>() {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(error = %e, "demo request not created");
            return None;
        }
    };

    for part in 0..options.callables_per_request as u64 {
        let enqueued = request.enqueue(move |r| {
            let sum: u64 = (part * 1_000..(part + 1) * 1_000).map(|n| n.wrapping_mul(n)).sum();
            let mut data = r.data();
            data.value = data.value.wrapping_add(sum);
            Outcome::Completed
        });
        if let Err(e) = enqueued {
            tracing::warn!(error = %e, "enqueue rejected");
        }
    }

    let context = CONTEXTS[serial % CONTEXTS.len()];
    if let Err(e) = request.execute(context) {
        tracing::warn!(error = %e, context = %context, "execute failed");
    }
    Some(request)
}

/// Run the demo loop. Returns the process exit code.
pub async fn run(options: RunOptions) -> i32 {
    let config = config::load();
    if let Err(e) = telemetry::init_logging(&config.log) {
        eprintln!("Logging init failed: {e}");
    }
    telemetry::describe_metrics();

    let coordinator = match Coordinator::new(config) {
        Ok(coordinator) => coordinator,
        Err(e) => {
            tracing::error!(error = %e, "failed to start coordinator");
            return 1;
        }
    };

    let interrupt = coordinator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received");
            interrupt.shutdown();
        }
    });

    let mut interval = tokio::time::interval(options.tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last = Instant::now();
    let mut live: Vec<PooledRequest<Checksum>> = Vec::new();
    let mut serial = 0usize;

    loop {
        interval.tick().await;
        let now = Instant::now();
        let dt = now.duration_since(last).as_secs_f64();
        last = now;

        if options.frames.is_some_and(|limit| coordinator.frame_count() >= limit) {
            coordinator.shutdown();
        }

        if coordinator.shutdown_requested() {
            for request in &live {
                request.complete();
            }
            live.clear();
        } else {
            for _ in 0..options.requests_per_frame {
                live.extend(issue(&coordinator, serial, &options));
                serial += 1;
            }
        }

        // Completed requests go back to the pool.
        live.retain(|request| !request.completed());

        if coordinator.tick(dt).is_terminated() {
            break;
        }
    }

    match serde_json::to_string_pretty(&coordinator.stats()) {
        Ok(stats) => println!("{stats}"),
        Err(e) => eprintln!("Failed to serialize stats: {e}"),
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_defaults() {
        assert_eq!(RunOptions::parse(&[]).unwrap(), RunOptions::default());
    }

    #[test]
    fn test_parse_flags() {
        let options = RunOptions::parse(&args(&["--frames", "120", "--requests-per-frame", "2", "--tick-ms", "5"])).unwrap();
        assert_eq!(options.frames, Some(120));
        assert_eq!(options.requests_per_frame, 2);
        assert_eq!(options.tick_interval, Duration::from_millis(5));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(RunOptions::parse(&args(&["--frames"])).is_err());
        assert!(RunOptions::parse(&args(&["--frames", "many"])).is_err());
        assert!(RunOptions::parse(&args(&["--turbo"])).is_err());
    }
}
