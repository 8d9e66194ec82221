//! Bounded write scheduler
//!
//! Producers hand [`WriteJob`]s to [`WriteScheduler::submit`] at whatever rate
//! they read rows. Jobs wait in a FIFO backlog and are executed by at most
//! `limit` workers. A worker keeps pulling jobs from the backlog until it
//! is empty and only then gives its slot back, so the number of files open
//! at once never exceeds the limit no matter how fast jobs arrive.
//!
//! [`WriteScheduler::barrier`] waits until the backlog is empty and no
//! worker is running, including jobs submitted after the barrier was
//! requested, and hands back the outcomes recorded so far.

use crate::storage::{JobWriter, WriteJob, WriteSummary};
use dme_common::{ExtractError, Result};
use futures::FutureExt;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

/// Default number of concurrent writes
pub const DEFAULT_WRITE_LIMIT: usize = 100;

pub struct WriteScheduler {
    shared: Arc<Shared>,
    runtime: Handle,
}

struct Shared {
    limit: usize,
    writer: Arc<dyn JobWriter>,
    state: Mutex<State>,
    /// Queued jobs plus live workers; zero means settled.
    outstanding: watch::Sender<usize>,
}

#[derive(Default)]
struct State {
    backlog: VecDeque<WriteJob>,
    active_workers: usize,
    summary: WriteSummary,
}

impl WriteScheduler {
    /// Create a scheduler running at most `limit` writes at a time.
    ///
    /// Must be called from within a tokio runtime; workers are spawned onto
    /// that runtime.
    pub fn new(limit: usize, writer: Arc<dyn JobWriter>) -> Result<Self> {
        if limit == 0 {
            return Err(ExtractError::config("write limit must be at least 1"));
        }

        let runtime = Handle::try_current().map_err(|e| {
            ExtractError::Runtime(format!("Write scheduler needs a tokio runtime: {}", e))
        })?;

        let (outstanding, _) = watch::channel(0);

        Ok(Self {
            shared: Arc::new(Shared {
                limit,
                writer,
                state: Mutex::new(State::default()),
                outstanding,
            }),
            runtime,
        })
    }

    /// Number of workers currently holding a slot
    pub fn active_workers(&self) -> usize {
        self.shared.lock().active_workers
    }

    /// Number of jobs waiting for a worker
    pub fn queued(&self) -> usize {
        self.shared.lock().backlog.len()
    }

    /// Queue a job. Never blocks; starts a worker if a slot is free.
    pub fn submit(&self, job: WriteJob) {
        let start_worker = {
            let mut state = self.shared.lock();
            state.backlog.push_back(job);

            let free_slot = state.active_workers < self.shared.limit;
            if free_slot {
                state.active_workers += 1;
            }
            self.shared.publish(&state);
            free_slot
        };

        if start_worker {
            self.runtime.spawn(run_worker(Arc::clone(&self.shared)));
        }
    }

    /// Wait until every submitted job has finished, then take the outcomes
    /// recorded since the previous barrier.
    ///
    /// Outcomes are handed out once. When two barriers resolve together the
    /// first to take the summary gets every outcome and the other an empty
    /// summary.
    pub async fn barrier(&self) -> Result<WriteSummary> {
        let mut outstanding = self.shared.outstanding.subscribe();
        outstanding
            .wait_for(|count| *count == 0)
            .await
            .map_err(|e| ExtractError::Runtime(format!("Write scheduler closed: {}", e)))?;

        let summary = std::mem::take(&mut self.shared.lock().summary);
        debug!(
            written = summary.written,
            failed = summary.failures.len(),
            "Write barrier reached"
        );
        Ok(summary)
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &State) {
        self.outstanding
            .send_replace(state.backlog.len() + state.active_workers);
    }

    /// Take the next job, or give the worker slot back if there is none.
    fn claim(&self, state: &mut State) -> Option<WriteJob> {
        let next = state.backlog.pop_front();
        if next.is_none() {
            state.active_workers -= 1;
        }
        self.publish(state);
        next
    }
}

async fn run_worker(shared: Arc<Shared>) {
    let mut next = {
        let mut state = shared.lock();
        shared.claim(&mut state)
    };

    while let Some(job) = next {
        let path = job.path();
        let outcome = AssertUnwindSafe(shared.writer.write(&job))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(ExtractError::Runtime("writer panicked".to_string())));

        match &outcome {
            Ok(()) => trace!(path = %path.display(), "Wrote file"),
            Err(e) => warn!(path = %path.display(), error = %e, "Write failed"),
        }

        next = {
            let mut state = shared.lock();
            state.summary.record(path, outcome);
            shared.claim(&mut state)
        };
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Records how many writes overlap and fails any file named "fail-*".
    #[derive(Default)]
    struct TrackingWriter {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        completed: AtomicUsize,
    }

    #[async_trait]
    impl JobWriter for TrackingWriter {
        async fn write(&self, job: &WriteJob) -> Result<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(1)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.completed.fetch_add(1, Ordering::SeqCst);

            if job.file_name().starts_with("fail-") {
                Err(ExtractError::InvalidPath(job.file_name().to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn job(name: &str) -> WriteJob {
        WriteJob::new("/unused", format!("{}.json", name), json!({}))
    }

    #[tokio::test]
    async fn test_zero_limit_rejected() {
        let writer = Arc::new(TrackingWriter::default());
        assert!(matches!(
            WriteScheduler::new(0, writer),
            Err(ExtractError::Config(_))
        ));
    }

    #[test]
    fn test_requires_runtime() {
        let writer = Arc::new(TrackingWriter::default());
        assert!(matches!(
            WriteScheduler::new(1, writer),
            Err(ExtractError::Runtime(_))
        ));
    }

    #[tokio::test]
    async fn test_barrier_on_idle_scheduler() {
        let scheduler = WriteScheduler::new(4, Arc::new(TrackingWriter::default())).unwrap();
        let summary = scheduler.barrier().await.unwrap();
        assert_eq!(summary.total(), 0);
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_limit() {
        let writer = Arc::new(TrackingWriter::default());
        let scheduler = WriteScheduler::new(3, writer.clone()).unwrap();

        for i in 0..50 {
            scheduler.submit(job(&i.to_string()));
        }
        assert!(scheduler.active_workers() <= 3);

        let summary = scheduler.barrier().await.unwrap();
        assert_eq!(summary.written, 50);
        assert!(writer.peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(scheduler.active_workers(), 0);
        assert_eq!(scheduler.queued(), 0);
    }

    #[tokio::test]
    async fn test_failures_are_reported_not_fatal() {
        let writer = Arc::new(TrackingWriter::default());
        let scheduler = WriteScheduler::new(2, writer.clone()).unwrap();

        scheduler.submit(job("fail-first"));
        for i in 0..5 {
            scheduler.submit(job(&i.to_string()));
        }
        scheduler.submit(job("fail-last"));

        let summary = scheduler.barrier().await.unwrap();
        assert_eq!(summary.written, 5);
        assert_eq!(summary.failures.len(), 2);
        assert!(summary
            .failures
            .iter()
            .all(|f| f.path.to_string_lossy().contains("fail-")));
        assert_eq!(writer.completed.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn test_barrier_after_concurrent_producer() {
        let writer = Arc::new(TrackingWriter::default());
        let scheduler = Arc::new(WriteScheduler::new(1, writer.clone()).unwrap());
        scheduler.submit(job("early"));

        let producer = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move {
                for i in 0..10 {
                    scheduler.submit(job(&format!("late-{}", i)));
                    tokio::task::yield_now().await;
                }
            })
        };

        producer.await.unwrap();
        let summary = scheduler.barrier().await.unwrap();
        assert_eq!(summary.written, 11);
        assert_eq!(writer.completed.load(Ordering::SeqCst), 11);
    }

    /// Holds every write until a permit is released.
    struct GatedWriter {
        gate: tokio::sync::Semaphore,
    }

    #[async_trait]
    impl JobWriter for GatedWriter {
        async fn write(&self, _job: &WriteJob) -> Result<()> {
            self.gate.acquire().await.unwrap().forget();
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_pending_barrier_waits_for_later_submissions() {
        let writer = Arc::new(GatedWriter {
            gate: tokio::sync::Semaphore::new(0),
        });
        let scheduler = Arc::new(WriteScheduler::new(1, writer.clone()).unwrap());
        scheduler.submit(job("early"));

        let barrier = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.barrier().await })
        };
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!barrier.is_finished());

        for i in 0..5 {
            scheduler.submit(job(&format!("late-{}", i)));
        }
        tokio::task::yield_now().await;
        assert!(!barrier.is_finished());

        writer.gate.add_permits(6);
        let summary = barrier.await.unwrap().unwrap();
        assert_eq!(summary.written, 6);
        assert_eq!(scheduler.queued(), 0);
    }

    #[tokio::test]
    async fn test_barrier_drains_summary() {
        let scheduler = WriteScheduler::new(2, Arc::new(TrackingWriter::default())).unwrap();
        scheduler.submit(job("a"));
        assert_eq!(scheduler.barrier().await.unwrap().written, 1);

        scheduler.submit(job("b"));
        scheduler.submit(job("c"));
        assert_eq!(scheduler.barrier().await.unwrap().written, 2);
    }

    #[tokio::test]
    async fn test_concurrent_barriers_hand_out_outcomes_once() {
        let writer = Arc::new(TrackingWriter::default());
        let scheduler = Arc::new(WriteScheduler::new(2, writer).unwrap());
        for i in 0..8 {
            scheduler.submit(job(&i.to_string()));
        }

        let first = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.barrier().await })
        };
        let second = scheduler.barrier().await.unwrap();
        let first = first.await.unwrap().unwrap();

        assert_eq!(first.written + second.written, 8);
        assert!(first.written == 0 || second.written == 0);
    }

    struct PanickingWriter;

    #[async_trait]
    impl JobWriter for PanickingWriter {
        async fn write(&self, job: &WriteJob) -> Result<()> {
            if job.file_name() == "boom.json" {
                panic!("disk on fire");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_panicking_write_becomes_failure() {
        let scheduler = WriteScheduler::new(1, Arc::new(PanickingWriter)).unwrap();
        scheduler.submit(job("boom"));
        scheduler.submit(job("fine"));

        let summary = scheduler.barrier().await.unwrap();
        assert_eq!(summary.written, 1);
        assert_eq!(summary.failures.len(), 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_bound_and_barrier_hold(jobs in 0usize..120, limit in 1usize..12) {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(4)
                .enable_time()
                .build()
                .unwrap();

            let (summary, peak) = runtime.block_on(async {
                let writer = Arc::new(TrackingWriter::default());
                let scheduler = WriteScheduler::new(limit, writer.clone()).unwrap();
                for i in 0..jobs {
                    let name = if i % 7 == 3 { format!("fail-{}", i) } else { i.to_string() };
                    scheduler.submit(job(&name));
                }
                let summary = scheduler.barrier().await.unwrap();
                (summary, writer.peak.load(Ordering::SeqCst))
            });

            prop_assert!(peak <= limit);
            prop_assert_eq!(summary.total(), jobs);
            prop_assert_eq!(summary.failures.len(), (0..jobs).filter(|i| i % 7 == 3).count());
        }
    }
}
