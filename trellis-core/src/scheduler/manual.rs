//! Manual Scheduler
//!
//! A deterministic [`TaskScheduler`] driven entirely by its embedder: time
//! only moves when [`ManualScheduler::advance`] is called, and the yield
//! predicate follows a fixed [`YieldPolicy`].
//!
//! # Ordering
//!
//! Every task gets a deadline of `now + timeout(priority)` when scheduled.
//! Tasks run in deadline order, ties broken by scheduling order, so an
//! immediate task (negative timeout) always runs before anything queued
//! earlier at a lower priority. A task whose deadline has passed is handed
//! out with `did_timeout` set.

use std::cell::Cell;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use super::{ReadyTask, RootTask, SchedulerPriority, TaskHandle, TaskScheduler, Timestamp};

/// Per-priority task timeouts in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerTimeouts {
    pub immediate: i64,
    pub user_blocking: i64,
    pub normal: i64,
    pub low: i64,
    pub idle: i64,
}

impl SchedulerTimeouts {
    /// Timeout for `priority`.
    pub fn for_priority(&self, priority: SchedulerPriority) -> i64 {
        match priority {
            SchedulerPriority::Immediate => self.immediate,
            SchedulerPriority::UserBlocking => self.user_blocking,
            SchedulerPriority::Normal => self.normal,
            SchedulerPriority::Low => self.low,
            SchedulerPriority::Idle => self.idle,
        }
    }
}

impl Default for SchedulerTimeouts {
    fn default() -> Self {
        Self {
            immediate: -1,
            user_blocking: 250,
            normal: 5_000,
            low: 10_000,
            // Max 31-bit integer; idle work effectively never times out.
            idle: 1_073_741_823,
        }
    }
}

/// When [`ManualScheduler::should_yield`] answers `true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YieldPolicy {
    /// Never yield; every task runs to completion.
    Never,
    /// Yield at the first poll.
    Always,
    /// Allow this many polls per task invocation, then yield.
    AfterPolls(u32),
}

#[derive(Debug, Clone, Copy)]
struct QueuedTask {
    handle: TaskHandle,
    priority: SchedulerPriority,
    deadline: i64,
    task: RootTask,
}

/// Deterministic task scheduler with a virtual clock.
#[derive(Debug)]
pub struct ManualScheduler {
    now: u64,
    timeouts: SchedulerTimeouts,
    policy: YieldPolicy,
    polls: Cell<u32>,
    next_id: u64,
    order: BinaryHeap<Reverse<(i64, u64)>>,
    tasks: HashMap<u64, QueuedTask>,
    running: Option<QueuedTask>,
}

impl ManualScheduler {
    /// Create a scheduler at time zero that never yields.
    pub fn new() -> Self {
        Self::with_timeouts(SchedulerTimeouts::default())
    }

    /// Create a scheduler with custom per-priority timeouts.
    pub fn with_timeouts(timeouts: SchedulerTimeouts) -> Self {
        Self {
            now: 0,
            timeouts,
            policy: YieldPolicy::Never,
            polls: Cell::new(0),
            next_id: 1,
            order: BinaryHeap::new(),
            tasks: HashMap::new(),
            running: None,
        }
    }

    /// Change the yield policy.
    pub fn set_yield_policy(&mut self, policy: YieldPolicy) {
        self.policy = policy;
    }

    /// Move the clock forward.
    pub fn advance(&mut self, ms: u64) {
        self.now = self.now.saturating_add(ms);
    }

    /// Number of queued tasks (cancelled tasks excluded).
    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// `true` when nothing is queued.
    pub fn is_idle(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Queued tasks in the order they would run.
    pub fn queued(&self) -> Vec<(TaskHandle, SchedulerPriority, RootTask)> {
        let mut queued: Vec<_> = self.tasks.values().copied().collect();
        queued.sort_by_key(|t| (t.deadline, t.handle));
        queued
            .into_iter()
            .map(|t| (t.handle, t.priority, t.task))
            .collect()
    }

    fn push(&mut self, task: QueuedTask) {
        self.order.push(Reverse((task.deadline, task.handle.raw())));
        self.tasks.insert(task.handle.raw(), task);
    }
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScheduler for ManualScheduler {
    fn schedule(&mut self, priority: SchedulerPriority, task: RootTask) -> TaskHandle {
        let handle = TaskHandle::from_raw(self.next_id);
        self.next_id += 1;
        let deadline = self.now as i64 + self.timeouts.for_priority(priority);
        trace!(?handle, ?priority, ?task, deadline, "task scheduled");
        self.push(QueuedTask {
            handle,
            priority,
            deadline,
            task,
        });
        handle
    }

    fn cancel(&mut self, handle: TaskHandle) {
        self.tasks.remove(&handle.raw());
        if self.running.is_some_and(|t| t.handle == handle) {
            self.running = None;
        }
    }

    fn should_yield(&self) -> bool {
        let polls = self.polls.get() + 1;
        self.polls.set(polls);
        match self.policy {
            YieldPolicy::Never => false,
            YieldPolicy::Always => true,
            YieldPolicy::AfterPolls(budget) => polls > budget,
        }
    }

    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.now)
    }

    fn pop_ready(&mut self) -> Option<ReadyTask> {
        while let Some(Reverse((_, raw))) = self.order.pop() {
            // Cancelled tasks leave stale heap entries behind.
            let Some(task) = self.tasks.remove(&raw) else {
                continue;
            };
            self.polls.set(0);
            self.running = Some(task);
            return Some(ReadyTask {
                handle: task.handle,
                task: task.task,
                did_timeout: task.deadline <= self.now as i64,
            });
        }
        None
    }

    fn continue_with(&mut self, handle: TaskHandle, task: RootTask) {
        match self.running.take() {
            Some(mut running) if running.handle == handle => {
                running.task = task;
                self.push(running);
            }
            other => {
                self.running = other;
                warn!(?handle, "continuation for a task that is not running");
            }
        }
    }
}
