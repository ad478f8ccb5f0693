//! Scheduler Bridge Types
//!
//! The reconciler does not own a timer or a task heap. It talks to a
//! cooperative task scheduler through [`TaskScheduler`]:
//!
//! - [`TaskScheduler::schedule`] queues a [`RootTask`] at a priority and hands
//!   back a cancellable [`TaskHandle`].
//! - The embedder pulls runnable tasks with [`TaskScheduler::pop_ready`] and
//!   passes them to the reconciler. A task that returns a continuation is
//!   re-armed on the same handle with [`TaskScheduler::continue_with`].
//! - [`TaskScheduler::should_yield`] is polled between units of work.
//!
//! Tasks are plain data rather than closures so the scheduler can live inside
//! the reconciler without borrowing it.
//!
//! [`ManualScheduler`] is a deterministic implementation with a virtual clock.

pub mod manual;

pub use manual::{ManualScheduler, SchedulerTimeouts, YieldPolicy};

use std::fmt;

use crate::reconciler::RootId;

/// Milliseconds on the scheduler's clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Build a timestamp from milliseconds.
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// Milliseconds since the clock's origin.
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// `self + ms`, clamped at the end of the clock.
    pub fn saturating_add(self, ms: u64) -> Self {
        Self(self.0.saturating_add(ms))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Priority levels understood by the task scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SchedulerPriority {
    Immediate,
    UserBlocking,
    Normal,
    Low,
    Idle,
}

/// Handle to a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(u64);

impl TaskHandle {
    /// Wrap a raw handle value.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw handle value.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Work the reconciler asks the scheduler to run later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootTask {
    /// Render (or resume rendering) the root's next lanes.
    PerformConcurrentWork(RootId),
    /// Run the passive effects left by the root's last commit.
    FlushPassiveEffects(RootId),
}

/// A task handed back to the embedder for execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyTask {
    pub handle: TaskHandle,
    pub task: RootTask,
    /// `true` when the task's deadline passed before it got to run.
    pub did_timeout: bool,
}

/// Contract between the reconciler and a cooperative task scheduler.
pub trait TaskScheduler {
    /// Queue `task` at `priority`.
    fn schedule(&mut self, priority: SchedulerPriority, task: RootTask) -> TaskHandle;

    /// Drop a queued task. Unknown or finished handles are ignored.
    fn cancel(&mut self, handle: TaskHandle);

    /// `true` when the current task should hand control back.
    fn should_yield(&self) -> bool;

    /// Current time.
    fn now(&self) -> Timestamp;

    /// Take the most urgent runnable task, if any.
    fn pop_ready(&mut self) -> Option<ReadyTask>;

    /// Re-arm `handle` with a continuation at its original priority and
    /// deadline.
    fn continue_with(&mut self, handle: TaskHandle, task: RootTask);
}
