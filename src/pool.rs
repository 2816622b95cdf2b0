// 🧵 Worker Pool - sizing, execution and progress for the batch jobs
//
// Sizing is a pure function of (work items, available parallelism) so it can
// be tested without touching the machine. Execution runs on a dedicated rayon
// pool; a small counting semaphore bounds the heavier transaction queries.

use parking_lot::{Condvar, Mutex};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

/// Upper bound on pool threads; Windows cannot wait on more than 64 handles
/// and a few are reserved by the runtime.
pub const HARD_THREAD_CAP: usize = 61;

// ============================================================================
// SIZING
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSizing {
    pub min_workers: usize,
    pub max_workers: usize,
    pub per_cpu: usize,
}

impl PoolSizing {
    /// Registration run: 2 .. 61, two per core, never more than files
    pub fn registration() -> Self {
        PoolSizing {
            min_workers: 2,
            max_workers: HARD_THREAD_CAP,
            per_cpu: 2,
        }
    }

    /// Investor export: at least 16 (I/O bound), two per core
    pub fn export() -> Self {
        PoolSizing {
            min_workers: 16,
            max_workers: HARD_THREAD_CAP,
            per_cpu: 2,
        }
    }

    /// Worker count for `items` units of work.
    ///
    /// Never exceeds the item count or the hard cap; one item (or none)
    /// always gets a single worker.
    pub fn size(&self, items: usize, parallelism: usize) -> usize {
        if items <= 1 {
            return 1;
        }
        let cap = self.max_workers.clamp(1, HARD_THREAD_CAP);
        let scaled = parallelism.max(1).saturating_mul(self.per_cpu.max(1));
        let floor = self.min_workers.min(cap).min(items);
        scaled.min(cap).min(items).max(floor).max(1)
    }

    /// `size` with an explicit override taking precedence.
    pub fn resolve(&self, requested: Option<usize>, items: usize, parallelism: usize) -> usize {
        match requested {
            Some(n) => n.clamp(1, HARD_THREAD_CAP).min(items.max(1)),
            None => self.size(items, parallelism),
        }
    }
}

/// Secondary limit for transaction queries: a third of the workers, 6 .. 24.
pub fn transaction_slots(workers: usize, requested: Option<usize>) -> usize {
    match requested {
        Some(n) => n.max(1),
        None => (workers / 3).clamp(6, 24),
    }
}

pub fn available_parallelism() -> usize {
    num_cpus::get().max(1)
}

// ============================================================================
// POOL
// ============================================================================

pub struct WorkerPool {
    pool: ThreadPool,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize, name: &str) -> Result<Self, rayon::ThreadPoolBuildError> {
        let prefix = name.to_string();
        let pool = ThreadPoolBuilder::new()
            .num_threads(size)
            .thread_name(move |i| format!("{}-{}", prefix, i))
            .build()?;
        Ok(WorkerPool { pool, size })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Apply `f` to every item on the pool; results keep input order.
    pub fn map<T, R, F>(&self, items: Vec<T>, f: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync + Send,
    {
        self.pool
            .install(|| items.into_par_iter().with_max_len(1).map(f).collect())
    }
}

// ============================================================================
// LIMITER
// ============================================================================

/// Counting semaphore
pub struct Limiter {
    available: Mutex<usize>,
    released: Condvar,
}

pub struct Permit<'a> {
    limiter: &'a Limiter,
}

impl Limiter {
    pub fn new(slots: usize) -> Self {
        Limiter {
            available: Mutex::new(slots.max(1)),
            released: Condvar::new(),
        }
    }

    pub fn acquire(&self) -> Permit<'_> {
        let mut available = self.available.lock();
        while *available == 0 {
            self.released.wait(&mut available);
        }
        *available -= 1;
        Permit { limiter: self }
    }

    pub fn available(&self) -> usize {
        *self.available.lock()
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        *self.limiter.available.lock() += 1;
        self.limiter.released.notify_one();
    }
}

// ============================================================================
// PROGRESS
// ============================================================================

/// Shared completion counter with elapsed / remaining estimates
pub struct Progress {
    total: usize,
    done: AtomicUsize,
    started: Instant,
    log_every: usize,
}

impl Progress {
    pub fn new(total: usize, log_every: usize) -> Self {
        Progress {
            total,
            done: AtomicUsize::new(0),
            started: Instant::now(),
            log_every: log_every.max(1),
        }
    }

    /// Count one finished item; logs every `log_every` items and at the end.
    pub fn tick(&self, label: &str) -> usize {
        let done = self.done.fetch_add(1, Ordering::SeqCst) + 1;
        if done % self.log_every == 0 || done == self.total {
            let elapsed = self.started.elapsed();
            info!(
                "进度 {}/{} | 已用 {} | 预计剩余 {} | {}",
                done,
                self.total,
                format_clock(elapsed),
                format_clock(estimate_remaining(elapsed, done, self.total)),
                label
            );
        }
        done
    }

    pub fn done(&self) -> usize {
        self.done.load(Ordering::SeqCst)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Linear extrapolation from the average time per finished item
pub fn estimate_remaining(elapsed: Duration, done: usize, total: usize) -> Duration {
    if done == 0 || done >= total {
        return Duration::ZERO;
    }
    elapsed.mul_f64((total - done) as f64 / done as f64)
}

/// mm:ss, minutes growing past 59 for long runs
pub fn format_clock(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}
