//! A minimal background task bus for periodic trims.
//!
//! [`crate::tiered::TieredCache`] needs *some* scheduler to exist — it
//! posts its hard/weak trim tasks at construction time and must be able to
//! cancel them on `release()` — but the concrete bus implementation is an
//! external collaborator the core does not otherwise care about. This
//! module defines the minimal [`Scheduler`] trait the cache programs
//! against, plus one real implementation, [`ThreadScheduler`], built the
//! way this crate's ancestry already runs its own concurrency tests: plain
//! `std::thread`s (see `scoped_threadpool`-based concurrent tests
//! elsewhere in this crate), not an async runtime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// A handle to a task posted via [`Scheduler::post_delayed`], used only to
/// cancel it.
#[derive(Debug)]
pub struct TaskHandle {
    cancelled: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl TaskHandle {
    fn noop() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(true)),
            join: None,
        }
    }
}

/// A background bus that can run a task once after a delay, and cancel it.
///
/// Implementations must serialize repeated firings of the same logical
/// task with respect to each other (the tiered cache relies on "exactly
/// one instance of each trim task in flight at any time") and must permit
/// `post_delayed` to be called again from inside a running task —
/// `TieredCache`'s trim tasks reschedule themselves this way.
pub trait Scheduler: Send + Sync {
    /// Posts `task` to run once, after `delay`, on `bus`. Returns a handle
    /// that can be passed to [`Scheduler::cancel`].
    fn post_delayed(&self, bus: &str, delay: Duration, task: Box<dyn FnMut() + Send>) -> TaskHandle;

    /// Cancels a previously posted task. A task already running when
    /// cancelled is allowed to finish; it simply will not be rescheduled
    /// (cancellation only prevents rescheduling when the task itself reads
    /// the handle it was given — see [`ThreadScheduler`]).
    fn cancel(&self, handle: TaskHandle);
}

/// A `Scheduler` backed by one dedicated OS thread per posted task.
///
/// Each call to `post_delayed` spawns a thread that sleeps for `delay`,
/// then — unless cancelled in the meantime — runs the task once. Recurring
/// behavior is achieved by having the task closure itself call
/// `post_delayed` again near the end of its own body to queue the next
/// run, rather than this scheduler looping internally. This keeps "exactly
/// one instance in flight" trivially true (the next run is never posted
/// until the current one's body has returned) and keeps the dependency
/// stack free of an async runtime.
#[derive(Debug, Default)]
pub struct ThreadScheduler;

impl ThreadScheduler {
    /// Creates a new thread-backed scheduler.
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for ThreadScheduler {
    fn post_delayed(&self, bus: &str, delay: Duration, mut task: Box<dyn FnMut() + Send>) -> TaskHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let cancelled_for_thread = Arc::clone(&cancelled);
        let bus = bus.to_owned();
        let join = std::thread::Builder::new()
            .name(format!("tiercache-{bus}"))
            .spawn(move || {
                std::thread::sleep(delay);
                if cancelled_for_thread.load(Ordering::Acquire) {
                    tracing::debug!(bus, "scheduled task cancelled before it ran");
                    return;
                }
                task();
            })
            .expect("failed to spawn background scheduler thread");
        TaskHandle {
            cancelled,
            join: Some(join),
        }
    }

    fn cancel(&self, handle: TaskHandle) {
        handle.cancelled.store(true, Ordering::Release);
        if let Some(join) = handle.join {
            // Don't block the caller (often holding TieredCache's write
            // lock during `release()`) on a sleeping thread; it will wake,
            // observe the cancellation flag, and exit on its own.
            drop(join);
        }
    }
}

impl Default for TaskHandle {
    fn default() -> Self {
        Self::noop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[test]
    fn posted_task_runs_after_delay() {
        let scheduler = ThreadScheduler::new();
        let ran = Arc::new(AtomicU32::new(0));
        let ran_for_task = Arc::clone(&ran);
        let _handle = scheduler.post_delayed(
            "test",
            Duration::from_millis(10),
            Box::new(move || {
                ran_for_task.fetch_add(1, Ordering::SeqCst);
            }),
        );
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancelled_task_does_not_run() {
        let scheduler = ThreadScheduler::new();
        let ran = Arc::new(AtomicU32::new(0));
        let ran_for_task = Arc::clone(&ran);
        let handle = scheduler.post_delayed(
            "test",
            Duration::from_millis(50),
            Box::new(move || {
                ran_for_task.fetch_add(1, Ordering::SeqCst);
            }),
        );
        scheduler.cancel(handle);
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
