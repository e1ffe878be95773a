//! Retry-queue scheduler behavior: retry/poison routing, backoff timing,
//! concurrency bound, panic isolation, progress reporting.

use atg_processing::scheduler::{
    ManualClock, RetryQueueScheduler, SchedulerConfig, SchedulerProgress, WorkOutcome,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn config(max_workers: usize, max_retries: u32) -> SchedulerConfig {
    SchedulerConfig {
        max_workers,
        max_retries,
        base_delay: Duration::from_millis(100),
        poll_interval: Duration::from_millis(10),
        log_every: 50,
    }
}

fn manual(config: SchedulerConfig) -> (RetryQueueScheduler<ManualClock>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    (RetryQueueScheduler::with_clock(config, clock.clone()), clock)
}

#[tokio::test]
async fn test_always_failing_item_poisoned_after_max_retries() {
    let (scheduler, _clock) = manual(config(2, 3));
    let attempts: Arc<Mutex<HashMap<&'static str, u32>>> = Arc::default();

    let seen = attempts.clone();
    let report = scheduler
        .run(
            vec!["ok", "broken"],
            move |item, _attempt| {
                *seen.lock().entry(item).or_insert(0) += 1;
                async move {
                    if item == "broken" {
                        WorkOutcome::retry("store unavailable")
                    } else {
                        WorkOutcome::Success
                    }
                }
            },
            None,
        )
        .await;

    assert_eq!(attempts.lock()["broken"], 3);
    assert_eq!(attempts.lock()["ok"], 1);
    assert_eq!(report.processed, 2);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.poisoned.len(), 1);
    assert_eq!(report.poisoned[0].item, "broken");
    assert_eq!(report.poisoned[0].attempts, 3);
    assert_eq!(report.poisoned[0].reason, "store unavailable");
    assert_eq!(report.success_rate, 50.0);
}

#[tokio::test]
async fn test_backoff_doubles_between_attempts() {
    let (scheduler, clock) = manual(config(1, 4));
    let times = Arc::new(Mutex::new(Vec::new()));

    let recorder = times.clone();
    let worker_clock = clock.clone();
    let report = scheduler
        .run(
            vec![1u32],
            move |_item, _attempt| {
                recorder.lock().push(worker_clock.elapsed());
                async { WorkOutcome::retry("nope") }
            },
            None,
        )
        .await;

    let times = times.lock().clone();
    let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(
        gaps,
        vec![
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(400),
        ]
    );
    assert_eq!(report.poisoned.len(), 1);
    assert_eq!(report.poisoned[0].attempts, 4);
}

#[tokio::test]
async fn test_transient_failure_recovers_within_budget() {
    let (scheduler, _clock) = manual(config(3, 3));

    let report = scheduler
        .run(
            vec!["a", "b", "c"],
            |item, attempt| async move {
                if item == "b" && attempt < 3 {
                    WorkOutcome::retry("timeout")
                } else {
                    WorkOutcome::Success
                }
            },
            None,
        )
        .await;

    assert_eq!(report.processed, 3);
    assert_eq!(report.succeeded, 3);
    assert!(report.poisoned.is_empty());
    assert_eq!(report.success_rate, 100.0);
}

#[tokio::test]
async fn test_fatal_outcome_does_not_consume_retries() {
    let (scheduler, clock) = manual(config(2, 5));
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = calls.clone();
    let report = scheduler
        .run(
            vec!["invalid"],
            move |_item, _attempt| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { WorkOutcome::fatal("missing fields: location") }
            },
            None,
        )
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.poisoned.len(), 1);
    assert_eq!(report.poisoned[0].attempts, 1);
    assert!(clock.sleeps().is_empty());
}

#[tokio::test]
async fn test_concurrency_never_exceeds_max_workers() {
    let scheduler = RetryQueueScheduler::new(SchedulerConfig {
        base_delay: Duration::from_millis(1),
        ..config(4, 3)
    });
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let (cur, max) = (current.clone(), peak.clone());
    let report = scheduler
        .run(
            (0..24).collect::<Vec<u32>>(),
            move |item, attempt| {
                let cur = cur.clone();
                let max = max.clone();
                async move {
                    let now = cur.fetch_add(1, Ordering::SeqCst) + 1;
                    max.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(3)).await;
                    cur.fetch_sub(1, Ordering::SeqCst);
                    // every third item fails once to mix in retries
                    if item % 3 == 0 && attempt == 1 {
                        WorkOutcome::retry("flaky")
                    } else {
                        WorkOutcome::Success
                    }
                }
            },
            None,
        )
        .await;

    assert_eq!(report.succeeded, 24);
    assert!(peak.load(Ordering::SeqCst) <= 4);
    assert!(peak.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_panicking_worker_is_treated_as_retryable() {
    let (scheduler, _clock) = manual(config(2, 3));

    let report = scheduler
        .run(
            vec!["boom", "fine"],
            |item, attempt| async move {
                if item == "boom" && attempt == 1 {
                    panic!("worker exploded");
                }
                WorkOutcome::Success
            },
            None,
        )
        .await;

    assert_eq!(report.processed, 2);
    assert_eq!(report.succeeded, 2);
    assert!(report.poisoned.is_empty());
}

#[tokio::test]
async fn test_panic_reason_reported_when_exhausted() {
    let (scheduler, _clock) = manual(config(1, 2));

    let report = scheduler
        .run(
            vec![7u8],
            |_item, _attempt| async move {
                if true {
                    panic!("always broken");
                }
                WorkOutcome::Success
            },
            None,
        )
        .await;

    assert_eq!(report.poisoned.len(), 1);
    assert!(report.poisoned[0].reason.contains("always broken"));
}

#[tokio::test]
async fn test_progress_callback_after_each_completion() {
    let (scheduler, _clock) = manual(config(2, 3));
    let snapshots: Mutex<Vec<SchedulerProgress>> = Mutex::new(Vec::new());
    let record = |p: &SchedulerProgress| snapshots.lock().push(*p);

    let report = scheduler
        .run(
            vec![1, 2, 3],
            |item, attempt| async move {
                if item == 2 && attempt == 1 {
                    WorkOutcome::retry("once")
                } else {
                    WorkOutcome::Success
                }
            },
            Some(&record),
        )
        .await;

    let snapshots = snapshots.lock();
    // three successes plus one requeue
    assert_eq!(snapshots.len(), 4);
    assert_eq!(snapshots.last().unwrap().processed, 3);
    assert_eq!(snapshots.last().unwrap().succeeded, 3);
    assert!(snapshots.iter().any(|s| s.retrying == 1));
    assert_eq!(report.processed, 3);
}
