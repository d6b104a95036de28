//! Integration tests for request dispatch and completion.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use deferred_runtime::{Coordinator, EngineConfig, EngineError, ExecutionContext, Outcome};

const ALL_CONTEXTS: [ExecutionContext; 4] = [
    ExecutionContext::Immediate,
    ExecutionContext::FrameBoundary,
    ExecutionContext::WorkerPool,
    ExecutionContext::Chained,
];

fn coordinator() -> Coordinator {
    Coordinator::new(EngineConfig {
        worker_threads: 4,
        ..Default::default()
    })
    .unwrap()
}

#[test]
fn test_immediate_completes_on_return() {
    let coord = coordinator();
    for n in 0..6 {
        let request = coord.create_request::<u32>().unwrap();
        for _ in 0..n {
            request.enqueue(|_| Outcome::Completed).unwrap();
        }
        request.execute(ExecutionContext::Immediate).unwrap();

        assert!(request.completed(), "n = {n}");
        assert_eq!(request.result_count(), n);
        assert_eq!(request.in_flight(), 0);
    }
}

#[test]
fn test_immediate_runs_in_enqueue_order() {
    let coord = coordinator();
    let request = coord.create_request::<Vec<usize>>().unwrap();
    for i in 0..10 {
        request
            .enqueue(move |r| {
                r.data().push(i);
                Outcome::Completed
            })
            .unwrap();
    }
    request.execute(ExecutionContext::Immediate).unwrap();
    assert_eq!(*request.data(), (0..10).collect::<Vec<_>>());
}

#[test]
fn test_empty_request_is_trivially_complete() {
    let coord = coordinator();
    for context in ALL_CONTEXTS {
        let request = coord.create_request::<u32>().unwrap();
        request.execute(context).unwrap();
        assert!(request.started());
        assert!(request.completed());
        assert_eq!(request.result_count(), 0);
    }
}

#[test]
fn test_every_context_completes_with_all_results() {
    let coord = coordinator();
    for context in ALL_CONTEXTS {
        let ran = Arc::new(AtomicUsize::new(0));
        let request = coord.create_request::<u32>().unwrap();
        for _ in 0..7 {
            let ran = ran.clone();
            request
                .enqueue(move |_| {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Outcome::Completed
                })
                .unwrap();
        }
        request.execute(context).unwrap();
        request.complete();

        assert!(request.completed(), "{context}");
        assert_eq!(request.result_count(), 7, "{context}");
        assert!(request.results().iter().all(|r| r.is_completed()));
        assert_eq!(ran.load(Ordering::SeqCst), 7, "{context}");
        assert!(!request.error());
    }
}

#[test]
fn test_worker_pool_five_callables() {
    let coord = coordinator();
    let request = coord.create_request::<u32>().unwrap();
    for _ in 0..5 {
        request.enqueue(|_| Outcome::Completed).unwrap();
    }
    request.execute(ExecutionContext::WorkerPool).unwrap();
    request.complete();

    assert!(!request.error());
    assert!(request.completed());
    assert_eq!(request.results().len(), 5);
}

#[test]
fn test_parallel_callables_share_payload() {
    let coord = coordinator();
    for context in [ExecutionContext::WorkerPool, ExecutionContext::Chained] {
        let request = coord.create_request::<u64>().unwrap();
        for i in 1..=100u64 {
            request
                .enqueue(move |r| {
                    *r.data() += i;
                    Outcome::Completed
                })
                .unwrap();
        }
        request.execute(context).unwrap();
        request.complete();
        assert_eq!(*request.data(), 5050, "{context}");
    }
}

#[test]
fn test_frame_boundary_waits_for_tick() {
    let coord = coordinator();
    let request = coord.create_request::<Vec<u8>>().unwrap();
    for i in 0..3u8 {
        request
            .enqueue(move |r| {
                r.data().push(i);
                Outcome::Completed
            })
            .unwrap();
    }
    request.execute(ExecutionContext::FrameBoundary).unwrap();

    assert!(request.started());
    assert!(!request.completed());
    assert_eq!(request.in_flight(), 3);

    coord.tick(0.016);
    assert!(request.completed());
    assert_eq!(*request.data(), vec![0, 1, 2]);
}

#[test]
fn test_complete_runs_pending_frame_boundary_batch_once() {
    let coord = coordinator();
    let ran = Arc::new(AtomicUsize::new(0));
    let request = coord.create_request::<u32>().unwrap();
    let counter = ran.clone();
    request
        .enqueue(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Outcome::Completed
        })
        .unwrap();
    request.execute(ExecutionContext::FrameBoundary).unwrap();
    request.complete();
    assert!(request.completed());

    coord.tick(0.016);
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert_eq!(request.result_count(), 1);
}

#[test]
fn test_error_result_does_not_stop_siblings() {
    let coord = coordinator();
    let request = coord.create_request::<u32>().unwrap();
    request.enqueue(|_| Outcome::Completed).unwrap();
    request.enqueue(|_| Outcome::Error).unwrap();
    request.enqueue(|_| Outcome::Completed).unwrap();
    request.execute(ExecutionContext::WorkerPool).unwrap();
    request.complete();

    assert!(request.error());
    assert!(request.completed(), "error results still carry the completed bit");
    assert_eq!(request.result_count(), 3);
}

#[test]
fn test_explicit_error_flag() {
    let coord = coordinator();
    let request = coord.create_request::<u32>().unwrap();
    request.enqueue(|r| {
        r.set_error();
        Outcome::Completed
    })
    .unwrap();
    request.execute(ExecutionContext::Immediate).unwrap();

    assert!(request.error());
    assert!(request.results().iter().all(|r| !r.is_error()));
}

#[test]
fn test_panicking_callable_is_recorded_as_error() {
    let coord = coordinator();
    for context in ALL_CONTEXTS {
        let request = coord.create_request::<u32>().unwrap();
        request.enqueue(|_| panic!("callable failed")).unwrap();
        request.enqueue(|_| Outcome::Completed).unwrap();
        request.execute(context).unwrap();
        request.complete();

        assert!(request.completed(), "{context}");
        assert!(request.error(), "{context}");
        assert_eq!(request.result_count(), 2);
        assert_eq!(request.in_flight(), 0);
    }
    assert!(coord.stats().callable_failures >= 4);
}

#[test]
fn test_none_outcome_is_recorded_as_error() {
    let coord = coordinator();
    let request = coord.create_request::<u32>().unwrap();
    request.enqueue(|_| Outcome::None).unwrap();
    request.execute(ExecutionContext::Immediate).unwrap();

    assert!(request.completed());
    assert_eq!(request.results(), vec![Outcome::Error]);
}

#[test]
fn test_enqueue_after_dispatch_is_rejected() {
    let coord = coordinator();
    let request = coord.create_request::<u32>().unwrap();
    request.enqueue(|_| Outcome::Completed).unwrap();
    request.execute(ExecutionContext::FrameBoundary).unwrap();

    let err = request.enqueue(|_| Outcome::Completed).unwrap_err();
    assert!(matches!(err, EngineError::AlreadyDispatched { id } if id == request.id()));
    request.complete();
    assert_eq!(request.result_count(), 1);
}

#[test]
fn test_default_context_follows_configuration() {
    let coord = Coordinator::new(EngineConfig {
        worker_threads: 2,
        default_context: ExecutionContext::FrameBoundary,
        ..Default::default()
    })
    .unwrap();

    let request = coord.create_request::<u32>().unwrap();
    request.enqueue(|_| Outcome::Completed).unwrap();
    request.execute_default().unwrap();
    assert_eq!(request.context(), ExecutionContext::FrameBoundary);

    coord.set_default_context(ExecutionContext::Immediate).unwrap();
    let second = coord.create_request::<u32>().unwrap();
    second.enqueue(|_| Outcome::Completed).unwrap();
    second.execute(ExecutionContext::Default).unwrap();
    assert_eq!(second.context(), ExecutionContext::Immediate);
    assert!(second.completed());

    request.complete();
}

#[test]
fn test_chained_off_owner_thread_runs_after_tick() {
    let coord = coordinator();
    let request = coord.create_request::<u32>().unwrap();
    for _ in 0..4 {
        request
            .enqueue(|r| {
                *r.data() += 1;
                Outcome::Completed
            })
            .unwrap();
    }

    let remote = request.handle();
    thread::spawn(move || remote.execute(ExecutionContext::Chained))
        .join()
        .unwrap()
        .unwrap();
    assert!(request.started());

    // The batch is scheduled by the owner thread at the start of the tick.
    coord.tick(0.016);
    request.complete();
    assert!(request.completed());
    assert_eq!(*request.data(), 4);
}

#[test]
fn test_chained_off_owner_thread_complete_does_not_wait_for_tick() {
    let coord = coordinator();
    let request = coord.create_request::<u32>().unwrap();
    request.enqueue(|_| Outcome::Completed).unwrap();
    request.enqueue(|_| Outcome::Completed).unwrap();

    let remote = request.handle();
    let results = thread::spawn(move || {
        remote.execute(ExecutionContext::Chained).unwrap();
        remote.complete();
        remote.result_count()
    })
    .join()
    .unwrap();

    assert_eq!(results, 2);
    assert!(request.completed());
    // The queued main-thread action finds nothing left to dispatch.
    coord.tick(0.016);
    assert_eq!(request.result_count(), 2);
}

#[test]
fn test_execute_after_shutdown_request_is_forced_immediate() {
    let coord = coordinator();
    let request = coord.create_request::<u32>().unwrap();
    request.enqueue(|_| Outcome::Completed).unwrap();

    coord.shutdown();
    request.execute(ExecutionContext::WorkerPool).unwrap();
    assert_eq!(request.context(), ExecutionContext::Immediate);
    assert!(request.completed());
}

#[test]
fn test_complete_joins_blocked_worker_callable() {
    let coord = coordinator();
    let (tx, rx) = mpsc::channel::<()>();
    let request = coord.create_request::<u32>().unwrap();
    request
        .enqueue(move |_| {
            rx.recv_timeout(Duration::from_secs(5)).ok();
            Outcome::Completed
        })
        .unwrap();
    request.execute(ExecutionContext::WorkerPool).unwrap();
    assert!(!request.completed());

    let releaser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        tx.send(()).ok();
    });
    request.complete();
    assert!(request.completed());
    assert_eq!(request.result_count(), 1);
    releaser.join().unwrap();
}

#[test]
fn test_dont_care_reports_completed() {
    let coord = coordinator();
    let request = coord.create_request::<String>().unwrap();
    request.enqueue(deferred_runtime::dont_care).unwrap();
    request.execute(ExecutionContext::Immediate).unwrap();
    assert_eq!(request.results(), vec![Outcome::Completed]);
}
