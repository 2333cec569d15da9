//! Cancellable one-shot timers.
//!
//! The persistence layer only ever needs "run this after a delay unless I
//! change my mind", so the port is a single `schedule` call returning a
//! [`TimerHandle`]. Two implementations:
//! - [`TokioScheduler`] for real programs
//! - [`ManualScheduler`] for deterministic virtual-time tests

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use crate::clock::{duration_ms, Clock, ManualClock};
use crate::sync::lock;

/// Work run when a timer fires
pub type TimerTask = Box<dyn FnOnce() + Send + 'static>;

/// Handle to a scheduled task. Cancelling is idempotent.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    abort: Option<AbortHandle>,
}

impl TimerHandle {
    fn new(cancelled: Arc<AtomicBool>, abort: Option<AbortHandle>) -> Self {
        Self { cancelled, abort }
    }

    /// Prevent the task from running if it has not fired yet
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Trait abstracting delayed execution for testability
pub trait Scheduler: Send + Sync {
    /// Run `task` once after `delay`, unless the returned handle is cancelled first
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle;
}

/// Scheduler backed by a tokio runtime
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    runtime: Handle,
}

impl TokioScheduler {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Use the runtime of the calling context, if there is one
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);

        let join = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if !flag.load(Ordering::SeqCst) {
                task();
            }
        });

        TimerHandle::new(cancelled, Some(join.abort_handle()))
    }
}

struct ScheduledTask {
    due_ms: i64,
    seq: u64,
    cancelled: Arc<AtomicBool>,
    task: TimerTask,
}

/// Virtual-time scheduler driven by [`ManualScheduler::advance`].
///
/// Shares a [`ManualClock`] so that timestamps taken inside a firing task
/// equal the task's due time.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    clock: ManualClock,
    queue: Arc<Mutex<Vec<ScheduledTask>>>,
    next_seq: Arc<AtomicU64>,
}

impl ManualScheduler {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            queue: Arc::new(Mutex::new(Vec::new())),
            next_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    /// Number of scheduled tasks that have neither fired nor been cancelled
    pub fn pending(&self) -> usize {
        lock(&self.queue)
            .iter()
            .filter(|t| !t.cancelled.load(Ordering::SeqCst))
            .count()
    }

    /// Move time forward by `by`, running every task that comes due on the way.
    ///
    /// Tasks run in due-time order (ties in scheduling order) with the clock
    /// set to each task's due time; tasks scheduled by a running task are
    /// eligible within the same advance. Returns the number of tasks run.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.clock.now_ms().saturating_add(duration_ms(by));
        let mut ran = 0;

        loop {
            let next = {
                let mut queue = lock(&self.queue);
                queue.retain(|t| !t.cancelled.load(Ordering::SeqCst));
                let position = queue
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.due_ms <= target)
                    .min_by_key(|(_, t)| (t.due_ms, t.seq))
                    .map(|(i, _)| i);
                position.map(|i| queue.remove(i))
            };

            let Some(scheduled) = next else { break };
            if scheduled.due_ms > self.clock.now_ms() {
                self.clock.set(scheduled.due_ms);
            }
            if !scheduled.cancelled.load(Ordering::SeqCst) {
                (scheduled.task)();
                ran += 1;
            }
        }

        if target > self.clock.now_ms() {
            self.clock.set(target);
        }
        ran
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let scheduled = ScheduledTask {
            due_ms: self.clock.now_ms().saturating_add(duration_ms(delay)),
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            cancelled: Arc::clone(&cancelled),
            task,
        };
        lock(&self.queue).push(scheduled);
        TimerHandle::new(cancelled, None)
    }
}
