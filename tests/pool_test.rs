//! Integration tests for request recycling.

use std::sync::Arc;
use std::thread;

use deferred_runtime::{Coordinator, EngineConfig, ExecutionContext, Outcome};

#[derive(Debug, Default, PartialEq)]
struct Report {
    name: String,
    lines: Vec<String>,
}

fn coordinator() -> Coordinator {
    Coordinator::new(EngineConfig {
        worker_threads: 2,
        ..Default::default()
    })
    .unwrap()
}

#[test]
fn test_dispose_returns_instance_and_reuse_takes_it() {
    let coord = coordinator();
    assert_eq!(coord.idle_requests::<Report>(), 0);

    let request = coord.create_request::<Report>().unwrap();
    request.data().name = "first".into();
    request.enqueue(|r| {
        r.data().lines.push("written".into());
        Outcome::Completed
    })
    .unwrap();
    request.execute(ExecutionContext::WorkerPool).unwrap();
    request.complete();
    let first_id = request.id();
    let original = request.handle();

    let before = coord.idle_requests::<Report>();
    request.dispose();
    assert_eq!(coord.idle_requests::<Report>(), before + 1);

    let reused = coord.create_request::<Report>().unwrap();
    assert_eq!(coord.idle_requests::<Report>(), before);
    assert!(reused.ptr_eq(&original));
    assert_ne!(reused.id(), first_id);
    assert_eq!(*reused.data(), Report::default());
    assert_eq!(reused.result_count(), 0);
    assert!(!reused.started());
    assert!(!reused.is_disposed());
}

#[test]
fn test_drop_disposes_exactly_once() {
    let coord = coordinator();
    let request = coord.create_request::<u32>().unwrap();
    request.execute(ExecutionContext::Immediate).unwrap();
    let handle = request.handle();

    drop(request);
    assert!(handle.is_disposed());
    assert_eq!(coord.idle_requests::<u32>(), 1);
    assert_eq!(coord.stats().requests_recycled, 1);
}

#[test]
fn test_undisposed_request_counts_as_outstanding() {
    let coord = coordinator();
    let kept = coord.create_request::<u32>().unwrap();
    {
        let _short = coord.create_request::<u32>().unwrap();
    }
    let stats = coord.stats();
    assert_eq!(stats.outstanding, 1);
    assert_eq!(stats.requests_created, 2);
    drop(kept);
    assert_eq!(coord.stats().outstanding, 0);
}

#[test]
fn test_concurrent_checkout_and_dispose() {
    let coord = Arc::new(coordinator());
    let workers: Vec<_> = (0..8)
        .map(|_| {
            let coord = coord.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    let request = coord.create_request::<Vec<u8>>().unwrap();
                    request
                        .enqueue(|r| {
                            r.data().push(1);
                            Outcome::Completed
                        })
                        .unwrap();
                    request.execute(ExecutionContext::Immediate).unwrap();
                    assert_eq!(r_len(&request), 1);
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }

    let stats = coord.stats();
    assert_eq!(stats.requests_created, 1600);
    assert_eq!(stats.outstanding, 0);
    assert!(coord.idle_requests::<Vec<u8>>() <= 8);
    assert_eq!(coord.tracked_requests(), 0);
}

fn r_len(request: &deferred_runtime::Request<Vec<u8>>) -> usize {
    request.data().len()
}
