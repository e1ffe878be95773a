//! Bounded-concurrency retry-queue scheduler
//!
//! ```text
//!   main queue (attempt 1) ──┐
//!                            ├──► in flight (≤ max_workers) ──► Success
//!   retry queue ─────────────┘          │
//!   (ordered by not_before)             ├──► Retry, attempt < max_retries
//!          ▲                            │      └─► retry queue, not_before = now + base·2^(attempt-1)
//!          └────────────────────────────┤
//!                                       ├──► Retry, attempts exhausted ─► poison list
//!                                       └──► Fatal ─────────────────────► poison list
//! ```
//!
//! The control loop owns every queue. Workers only see their item and its
//! attempt number and report a [`WorkOutcome`]; a panicking worker counts as a
//! retryable failure and never reaches the loop.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio::time::Instant;

// ============================================================================
// Time
// ============================================================================

/// Source of time for backoff decisions
#[async_trait]
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;

    async fn sleep_until(&self, deadline: Instant);

    async fn sleep(&self, duration: Duration) {
        let deadline = self.now() + duration;
        self.sleep_until(deadline).await;
    }
}

/// Tokio's clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}

/// Virtual clock: sleeping jumps straight to the deadline
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }

    /// Time elapsed on the virtual clock
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }

    /// Every sleep requested so far
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }

    async fn sleep_until(&self, deadline: Instant) {
        {
            let mut offset = self.offset.lock();
            let now = self.origin + *offset;
            let wait = deadline.saturating_duration_since(now);
            self.sleeps.lock().push(wait);
            *offset += wait;
        }
        tokio::task::yield_now().await;
    }
}

// ============================================================================
// Configuration & Outcomes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub max_workers: usize,
    /// Total attempts per item, including the first
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Idle wait when nothing is runnable and no retry is scheduled
    pub poll_interval: Duration,
    /// Info log every N processed items; 0 disables it
    pub log_every: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: 5,
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            poll_interval: Duration::from_millis(500),
            log_every: 50,
        }
    }
}

impl SchedulerConfig {
    /// Wait before the attempt after `attempt`: `base_delay * 2^(attempt-1)`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

/// Result of one worker attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    Success,
    /// Failed; try again if the retry budget allows
    Retry(String),
    /// Failed in a way no retry can fix
    Fatal(String),
}

impl WorkOutcome {
    pub fn retry(reason: impl std::fmt::Display) -> Self {
        WorkOutcome::Retry(reason.to_string())
    }

    pub fn fatal(reason: impl std::fmt::Display) -> Self {
        WorkOutcome::Fatal(reason.to_string())
    }
}

/// An item that will not be attempted again in this run
#[derive(Debug, Clone, PartialEq)]
pub struct PoisonedItem<T> {
    pub item: T,
    pub attempts: u32,
    pub reason: String,
}

/// Running totals, reported after every completion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerProgress {
    pub processed: usize,
    pub succeeded: usize,
    pub poisoned: usize,
    pub in_flight: usize,
    pub queued: usize,
    pub retrying: usize,
}

#[derive(Debug, Clone)]
pub struct SchedulerReport<T> {
    pub processed: usize,
    pub succeeded: usize,
    pub poisoned: Vec<PoisonedItem<T>>,
    pub success_rate: f64,
}

pub type ProgressFn<'a> = &'a (dyn Fn(&SchedulerProgress) + Send + Sync);

// ============================================================================
// Scheduler
// ============================================================================

pub struct RetryQueueScheduler<C: Clock = SystemClock> {
    config: SchedulerConfig,
    clock: Arc<C>,
}

impl RetryQueueScheduler<SystemClock> {
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }
}

impl<C: Clock> RetryQueueScheduler<C> {
    pub fn with_clock(config: SchedulerConfig, clock: Arc<C>) -> Self {
        Self { config, clock }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run every item to a terminal state.
    ///
    /// `worker` is called with the item and its attempt number (starting at 1).
    pub async fn run<T, F, Fut>(
        &self,
        items: Vec<T>,
        worker: F,
        progress: Option<ProgressFn<'_>>,
    ) -> SchedulerReport<T>
    where
        T: Clone + Send + 'static,
        F: Fn(T, u32) -> Fut + Send + Sync,
        Fut: Future<Output = WorkOutcome> + Send + 'static,
    {
        let max_workers = self.config.max_workers.max(1);
        let max_retries = self.config.max_retries.max(1);
        let total = items.len();

        let mut queue: VecDeque<T> = items.into();
        let mut retries: BTreeMap<(Instant, u64), (T, u32)> = BTreeMap::new();
        let mut in_flight: HashMap<u64, (T, u32)> = HashMap::new();
        let mut tasks: JoinSet<(u64, WorkOutcome)> = JoinSet::new();
        let mut poisoned: Vec<PoisonedItem<T>> = Vec::new();
        let mut next_id: u64 = 0;
        let mut processed = 0usize;
        let mut succeeded = 0usize;

        tracing::info!(total, max_workers, max_retries, "scheduler started");

        let mut spawn = |tasks: &mut JoinSet<(u64, WorkOutcome)>,
                         in_flight: &mut HashMap<u64, (T, u32)>,
                         item: T,
                         attempt: u32| {
            let id = next_id;
            next_id += 1;
            let work = worker(item.clone(), attempt);
            in_flight.insert(id, (item, attempt));
            tasks.spawn(async move {
                let outcome = match tokio::spawn(work).await {
                    Ok(outcome) => outcome,
                    Err(err) if err.is_panic() => {
                        WorkOutcome::Retry(format!("worker panicked: {}", panic_message(err)))
                    }
                    Err(err) => WorkOutcome::Retry(format!("worker aborted: {err}")),
                };
                (id, outcome)
            });
        };

        loop {
            if queue.is_empty() && retries.is_empty() && tasks.is_empty() {
                break;
            }

            while tasks.len() < max_workers {
                let Some(item) = queue.pop_front() else { break };
                spawn(&mut tasks, &mut in_flight, item, 1);
            }

            let now = self.clock.now();
            while tasks.len() < max_workers {
                let eligible = retries
                    .first_key_value()
                    .map_or(false, |((not_before, _), _)| *not_before <= now);
                if !eligible {
                    break;
                }
                if let Some((_, (item, attempt))) = retries.pop_first() {
                    spawn(&mut tasks, &mut in_flight, item, attempt);
                }
            }

            if tasks.is_empty() {
                match retries.keys().next() {
                    Some((not_before, _)) => self.clock.sleep_until(*not_before).await,
                    None => self.clock.sleep(self.config.poll_interval).await,
                }
                continue;
            }

            let (id, outcome) = match tasks.join_next().await {
                Some(Ok(done)) => done,
                Some(Err(err)) => {
                    tracing::error!(error = %err, "scheduler lost track of a worker task");
                    continue;
                }
                None => continue,
            };
            let Some((item, attempt)) = in_flight.remove(&id) else {
                continue;
            };

            match outcome {
                WorkOutcome::Success => {
                    processed += 1;
                    succeeded += 1;
                }
                WorkOutcome::Retry(reason) if attempt < max_retries => {
                    let delay = self.config.backoff(attempt);
                    let not_before = self.clock.now() + delay;
                    tracing::debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "requeueing failed item"
                    );
                    retries.insert((not_before, id), (item, attempt + 1));
                }
                WorkOutcome::Retry(reason) | WorkOutcome::Fatal(reason) => {
                    processed += 1;
                    tracing::warn!(attempts = attempt, reason = %reason, "item poisoned");
                    poisoned.push(PoisonedItem {
                        item,
                        attempts: attempt,
                        reason,
                    });
                }
            }

            if let Some(report) = progress {
                report(&SchedulerProgress {
                    processed,
                    succeeded,
                    poisoned: poisoned.len(),
                    in_flight: tasks.len(),
                    queued: queue.len(),
                    retrying: retries.len(),
                });
            }
            if self.config.log_every > 0 && processed > 0 && processed % self.config.log_every == 0
            {
                tracing::info!(
                    processed,
                    total,
                    succeeded,
                    poisoned = poisoned.len(),
                    "scheduler progress"
                );
            }
        }

        // tasks whose join failed never reported back
        for (_, (item, attempt)) in in_flight.drain() {
            processed += 1;
            poisoned.push(PoisonedItem {
                item,
                attempts: attempt,
                reason: "worker task lost".to_string(),
            });
        }

        let success_rate = succeeded as f64 / processed.max(1) as f64 * 100.0;
        tracing::info!(
            processed,
            succeeded,
            poisoned = poisoned.len(),
            success_rate,
            "scheduler finished"
        );

        SchedulerReport {
            processed,
            succeeded,
            poisoned,
            success_rate,
        }
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    let payload = err.into_panic();
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}
