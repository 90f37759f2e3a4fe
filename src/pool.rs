//! Bounded-concurrency ingestion pool.
//!
//! A fixed set of tokio tasks drains a bounded `mpsc` queue. Each worker runs
//! the whole [`Transform`] for one record at a time. [`IngestPool::dispatch`]
//! waits for queue space, which is the backpressure that keeps a fast record
//! source from buffering the whole input in memory.
//!
//! All counters live in one mutex-guarded struct updated when an item
//! reaches a terminal state; [`IngestPool::join`] waits on a `Notify` until
//! every dispatched item has finished.

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::FutureExt;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use crate::models::RawRecord;
use crate::pipeline::Outcome;

/// Window over which [`PoolStats::ops_per_sec`] is measured.
pub const RATE_WINDOW: Duration = Duration::from_secs(10);

/// The unit of work every worker runs. Must never panic on bad input;
/// a panic is caught and counted as an error anyway.
#[async_trait]
pub trait Transform: Send + Sync {
    async fn run(&self, record: &RawRecord) -> Outcome;
}

/// One queued record. Consumed by exactly one worker, never requeued.
#[derive(Debug)]
pub struct WorkItem {
    pub seq: u64,
    pub record: RawRecord,
}

/// Point-in-time view of the pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PoolStats {
    pub dispatched: u64,
    pub completed: u64,
    pub skipped: u64,
    pub errors: u64,
    pub in_flight: u64,
    /// Terminal items per second over the last [`RATE_WINDOW`].
    pub ops_per_sec: f64,
}

impl PoolStats {
    /// Items that reached a terminal state.
    pub fn finished(&self) -> u64 {
        self.completed + self.skipped + self.errors
    }
}

struct Counters {
    dispatched: u64,
    completed: u64,
    skipped: u64,
    errors: u64,
    in_flight: u64,
    started: Instant,
    recent: VecDeque<Instant>,
}

impl Counters {
    fn new() -> Self {
        Self {
            dispatched: 0,
            completed: 0,
            skipped: 0,
            errors: 0,
            in_flight: 0,
            started: Instant::now(),
            recent: VecDeque::new(),
        }
    }

    fn finished(&self) -> u64 {
        self.completed + self.skipped + self.errors
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.recent.front() {
            if now.duration_since(*front) > RATE_WINDOW {
                self.recent.pop_front();
            } else {
                break;
            }
        }
    }

    fn snapshot(&mut self) -> PoolStats {
        let now = Instant::now();
        self.prune(now);
        // Young pools measure over their lifetime, not the full window
        let window = now.duration_since(self.started).min(RATE_WINDOW).as_secs_f64();
        let ops_per_sec = if window > 0.0 {
            self.recent.len() as f64 / window
        } else {
            0.0
        };
        PoolStats {
            dispatched: self.dispatched,
            completed: self.completed,
            skipped: self.skipped,
            errors: self.errors,
            in_flight: self.in_flight,
            ops_per_sec,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Terminal {
    Completed,
    Skipped,
    Failed,
}

struct Shared {
    counters: Mutex<Counters>,
    drained: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn started(&self) {
        self.lock().in_flight += 1;
    }

    fn finished(&self, terminal: Terminal) {
        let mut c = self.lock();
        c.in_flight = c.in_flight.saturating_sub(1);
        match terminal {
            Terminal::Completed => c.completed += 1,
            Terminal::Skipped => c.skipped += 1,
            Terminal::Failed => c.errors += 1,
        }
        let now = Instant::now();
        c.recent.push_back(now);
        c.prune(now);
        let drained = c.finished() >= c.dispatched;
        drop(c);
        if drained {
            self.drained.notify_waiters();
        }
    }
}

/// Fixed-size worker pool over a bounded queue.
pub struct IngestPool {
    sender: Option<mpsc::Sender<WorkItem>>,
    workers: Vec<JoinHandle<()>>,
    shared: Arc<Shared>,
    next_seq: u64,
}

impl IngestPool {
    /// Spawn `workers` tasks sharing a queue of `queue_depth` slots.
    /// Must be called inside a tokio runtime.
    pub fn new(transform: Arc<dyn Transform>, workers: usize, queue_depth: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<WorkItem>(queue_depth.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let shared = Arc::new(Shared {
            counters: Mutex::new(Counters::new()),
            drained: Notify::new(),
        });

        let workers = (0..workers.max(1))
            .map(|worker_id| {
                let receiver = receiver.clone();
                let transform = transform.clone();
                let shared = shared.clone();
                tokio::spawn(worker_loop(worker_id, receiver, transform, shared))
            })
            .collect();

        Self {
            sender: Some(sender),
            workers,
            shared,
            next_seq: 0,
        }
    }

    /// Queue one record. Waits while the queue is full.
    pub async fn dispatch(&mut self, record: RawRecord) -> Result<()> {
        let Some(sender) = self.sender.as_ref() else {
            bail!("ingest pool is shut down");
        };
        let Ok(permit) = sender.reserve().await else {
            bail!("ingest workers have exited");
        };
        self.next_seq += 1;
        // Count before the item becomes visible to workers so join() can
        // never observe it finished but not dispatched.
        self.shared.lock().dispatched += 1;
        permit.send(WorkItem {
            seq: self.next_seq,
            record,
        });
        Ok(())
    }

    pub fn stats(&self) -> PoolStats {
        self.shared.lock().snapshot()
    }

    /// Wait until every dispatched item is terminal and return the final
    /// counters. The pool stays usable afterwards.
    pub async fn join(&self) -> PoolStats {
        loop {
            let notified = self.shared.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut c = self.shared.lock();
                if c.finished() >= c.dispatched {
                    return c.snapshot();
                }
            }
            notified.await;
        }
    }

    /// Close the queue, drain it and stop the workers.
    pub async fn shutdown(mut self) -> PoolStats {
        self.sender.take();
        for handle in self.workers.drain(..) {
            if let Err(e) = handle.await {
                tracing::error!("ingest worker terminated abnormally: {}", e);
            }
        }
        self.shared.lock().snapshot()
    }
}

async fn worker_loop(
    worker_id: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<WorkItem>>>,
    transform: Arc<dyn Transform>,
    shared: Arc<Shared>,
) {
    loop {
        let item = {
            let mut rx = receiver.lock().await;
            rx.recv().await
        };
        let Some(item) = item else { break };

        shared.started();
        let result = AssertUnwindSafe(transform.run(&item.record))
            .catch_unwind()
            .await;

        let terminal = match result {
            Ok(Outcome::Completed) => Terminal::Completed,
            Ok(Outcome::Skipped(_)) => Terminal::Skipped,
            Ok(Outcome::Failed(cause)) => {
                tracing::error!(
                    worker = worker_id,
                    seq = item.seq,
                    id = %item.record.id,
                    "Failed to process {}: {}",
                    item.record.title,
                    cause
                );
                Terminal::Failed
            }
            Err(_) => {
                tracing::error!(
                    worker = worker_id,
                    seq = item.seq,
                    id = %item.record.id,
                    "Failed to process {}: transform panicked",
                    item.record.title
                );
                Terminal::Failed
            }
        };
        shared.finished(terminal);
    }
    tracing::debug!(worker = worker_id, "ingest worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::SkipReason;
    use crate::pipeline::HardFailure;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(id: u64) -> RawRecord {
        RawRecord {
            id: id.to_string(),
            title: format!("movie {}", id),
            poster_path: None,
            backdrop_path: None,
            overview: None,
            release_date: None,
            popularity: None,
            imdb_id: None,
        }
    }

    /// Completes ids divisible by 3 as skips, by 5 as failures, the rest ok.
    struct ByModulo {
        delay: Duration,
    }

    #[async_trait]
    impl Transform for ByModulo {
        async fn run(&self, record: &RawRecord) -> Outcome {
            tokio::time::sleep(self.delay).await;
            let id: u64 = record.id.parse().unwrap();
            if id % 3 == 0 {
                Outcome::Skipped(SkipReason::MissingPoster)
            } else if id % 5 == 0 {
                Outcome::Failed(HardFailure::Persistence("boom".into()))
            } else {
                Outcome::Completed
            }
        }
    }

    #[tokio::test]
    async fn join_returns_final_counts() {
        let mut pool = IngestPool::new(
            Arc::new(ByModulo {
                delay: Duration::from_millis(2),
            }),
            3,
            2,
        );
        for id in 1..=30 {
            pool.dispatch(record(id)).await.unwrap();
        }
        let stats = pool.join().await;
        // 10 multiples of 3; multiples of 5 not of 3: 5,10,20,25
        assert_eq!(stats.dispatched, 30);
        assert_eq!(stats.skipped, 10);
        assert_eq!(stats.errors, 4);
        assert_eq!(stats.completed, 16);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.finished(), 30);

        let after = pool.shutdown().await;
        assert_eq!(after.finished(), 30);
    }

    #[tokio::test]
    async fn join_on_empty_pool_returns_immediately() {
        let pool = IngestPool::new(
            Arc::new(ByModulo {
                delay: Duration::ZERO,
            }),
            2,
            2,
        );
        let stats = pool.join().await;
        assert_eq!(stats, PoolStats::default());
    }

    struct Panics;

    #[async_trait]
    impl Transform for Panics {
        async fn run(&self, record: &RawRecord) -> Outcome {
            if record.id == "2" {
                panic!("bad record");
            }
            Outcome::Completed
        }
    }

    #[tokio::test]
    async fn panicking_item_counts_as_error() {
        let mut pool = IngestPool::new(Arc::new(Panics), 1, 1);
        for id in 1..=3 {
            pool.dispatch(record(id)).await.unwrap();
        }
        let stats = pool.join().await;
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.errors, 1);
    }

    struct Concurrency {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Transform for Concurrency {
        async fn run(&self, _record: &RawRecord) -> Outcome {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Outcome::Completed
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_is_bounded_by_worker_count() {
        let transform = Arc::new(Concurrency {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let mut pool = IngestPool::new(transform.clone(), 3, 1);
        for id in 1..=20 {
            pool.dispatch(record(id)).await.unwrap();
        }
        pool.join().await;
        assert!(transform.peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(transform.current.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dispatch_after_shutdown_is_refused() {
        let mut pool = IngestPool::new(
            Arc::new(ByModulo {
                delay: Duration::ZERO,
            }),
            1,
            1,
        );
        pool.sender.take();
        assert!(pool.dispatch(record(1)).await.is_err());
        assert_eq!(pool.stats().dispatched, 0);
    }
    #[tokio::test]
    async fn refused_dispatch_leaves_counters_untouched() {
        let mut pool = IngestPool::new(
            Arc::new(ByModulo {
                delay: Duration::ZERO,
            }),
            2,
            1,
        );
        pool.dispatch(record(1)).await.unwrap();
        let before = pool.join().await;
        assert_eq!(before.dispatched, 1);

        // Dropping every worker drops the receiver and closes the queue
        for handle in pool.workers.drain(..) {
            handle.abort();
            let _ = handle.await;
        }
        assert!(pool.dispatch(record(2)).await.is_err());
        let after = pool.stats();
        assert_eq!(after.dispatched, 1);
        assert_eq!(after.finished(), 1);
    }
}
