//! Reconciler
//!
//! The [`Reconciler`] owns every piece of engine state: the host, the task
//! scheduler, the node arena, the roots, and the render session in
//! progress. Nothing is global, so several reconcilers can coexist.
//!
//! # Entry points and the sync flush
//!
//! Public entry points (`update_container`, `batched_updates`,
//! `run_next_task`) end at a *microtask boundary*: pending dispatches are
//! drained and, unless a batch is still open, roots with sync work are
//! rendered and committed before control returns to the caller.
//!
//! # Dispatches
//!
//! State dispatchers push into a shared inbox instead of reaching into the
//! reconciler. Draining the inbox attaches lanes to the target node and its
//! root and schedules the root. While a render session is underway the
//! updates themselves are held back and only appended to their queues when
//! the session ends, so the tree being rendered never observes them
//! half-applied.

pub mod root;
mod work_loop;

pub use root::{RootId, RootLaneSnapshot, RootState, SessionState};

pub(crate) use root::Root;

use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::commit::PendingPassive;
use crate::config::ReconcilerConfig;
use crate::error::{Diagnostics, Invariant, ReconcileError, Result};
use crate::host::HostConfig;
use crate::lane::{Lanes, PriorityContext};
use crate::queue::inbox::{QueuedUpdate, UpdateInbox};
use crate::queue::update::QueuedQueueUpdate;
use crate::queue::{Update, UpdateQueue};
use crate::scheduler::{ManualScheduler, RootTask, TaskScheduler};
use crate::tree::{Element, NodeArena, NodeId, NodeKind, NodeProps, WorkNode};

/// A render that has started and not yet committed.
#[derive(Debug)]
pub(crate) struct RenderSession {
    pub(crate) root: RootId,
    pub(crate) lanes: Lanes,
    /// Work-in-progress root node.
    pub(crate) wip_root: NodeId,
    /// Next node to begin, or `None` once the walk is complete.
    pub(crate) next_unit: Option<NodeId>,
    /// Lanes of updates that arrived for this root mid-render.
    pub(crate) interleaved_lanes: Lanes,
}

/// The reconciliation engine.
pub struct Reconciler<H: HostConfig, S: TaskScheduler = ManualScheduler> {
    pub(crate) host: H,
    pub(crate) scheduler: S,
    pub(crate) config: ReconcilerConfig,
    pub(crate) arena: NodeArena<H>,
    pub(crate) roots: IndexMap<RootId, Root<H>>,
    next_root: u32,
    pub(crate) session: Option<RenderSession>,
    /// Dispatches drained during a session, waiting for it to end.
    pub(crate) held_updates: Vec<Box<dyn QueuedUpdate>>,
    pub(crate) inbox: UpdateInbox,
    pub(crate) priority: PriorityContext,
    /// Roots with sync work, flushed at the next microtask boundary.
    pub(crate) sync_queue: Vec<RootId>,
    batch_depth: u32,
    pub(crate) pending_passive: Option<PendingPassive>,
    pub(crate) diagnostics: Diagnostics,
}

impl<H: HostConfig, S: TaskScheduler> Reconciler<H, S> {
    /// Create a reconciler with the default configuration.
    pub fn new(host: H, scheduler: S) -> Self {
        Self::build(host, scheduler, ReconcilerConfig::default())
    }

    /// Create a reconciler with a validated configuration.
    pub fn with_config(host: H, scheduler: S, config: ReconcilerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(host, scheduler, config))
    }

    fn build(host: H, scheduler: S, config: ReconcilerConfig) -> Self {
        Self {
            host,
            scheduler,
            config,
            arena: NodeArena::new(),
            roots: IndexMap::new(),
            next_root: 0,
            session: None,
            held_updates: Vec::new(),
            inbox: UpdateInbox::default(),
            priority: PriorityContext::new(),
            sync_queue: Vec::new(),
            batch_depth: 0,
            pending_passive: None,
            diagnostics: Diagnostics::default(),
        }
    }

    /// Attach a new, empty root to `container`.
    pub fn create_container(&mut self, container: H::Instance) -> RootId {
        let id = RootId::from_raw(self.next_root);
        self.next_root += 1;

        let mut node = WorkNode::new(NodeKind::HostRoot, NodeProps::None, None);
        node.instance = Some(container.clone());
        node.root = Some(id);
        node.root_queue = Some(UpdateQueue::new(RootState::default()));
        node.root_state = Some(RootState::default());
        let current = self.arena.alloc(node);

        self.roots.insert(id, Root::new(container, current));
        debug!(root = %id, "created root");
        id
    }

    /// Request that `root` render `element`. Returns the lane the update was
    /// tagged with.
    ///
    /// The lane comes from the priority context: an explicit override, else
    /// the event being dispatched, else the default lane. Sync updates are
    /// committed before this returns unless a batch is open.
    pub fn update_container(&mut self, element: Element, root: RootId) -> Result<Lanes> {
        let current = self
            .roots
            .get(&root)
            .map(|r| r.current)
            .ok_or(ReconcileError::UnknownRoot(root))?;
        let shared = self.arena[current]
            .root_queue
            .as_ref()
            .map(|queue| queue.shared().clone())
            .ok_or(ReconcileError::UnknownRoot(root))?;

        let lane = self.priority.request_update_lane();
        debug!(root = %root, ?lane, "update container");
        self.inbox.push(Box::new(QueuedQueueUpdate::new(
            current,
            shared,
            Update::patch(lane, RootState { element }),
        )));
        self.process_dispatches();
        self.microtask_boundary();
        Ok(lane)
    }

    /// Run `f` with the sync flush deferred until the outermost batch ends.
    pub fn batched_updates<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.batch_depth += 1;
        let result = f(self);
        self.batch_depth -= 1;
        self.process_dispatches();
        self.microtask_boundary();
        result
    }

    /// Shared update-priority context. Clones observe the same scopes.
    pub fn priority_context(&self) -> &PriorityContext {
        &self.priority
    }

    /// Drain the dispatch inbox.
    pub fn process_dispatches(&mut self) {
        loop {
            let drained = self.inbox.drain();
            if drained.is_empty() {
                break;
            }
            for update in drained {
                self.dispatch_update(update);
            }
        }
    }

    fn dispatch_update(&mut self, mut update: Box<dyn QueuedUpdate>) {
        let target = update.target();
        let lane = update.lane();
        let Some(node) = self.arena.get(target) else {
            debug!(node = %target, ?lane, "dropping update for a collected node");
            return;
        };

        let alternate = node.alternate.filter(|alt| self.arena.contains(*alt));
        let idle = node.lanes.is_empty()
            && alternate.map_or(true, |alternate| self.arena[alternate].lanes.is_empty());
        if idle && update.try_eager_bailout() {
            trace!(node = %target, "update bailed out eagerly");
            return;
        }

        let Some(root_id) = self.root_of(target) else {
            debug!(node = %target, ?lane, "dropping update for a detached node");
            return;
        };

        self.arena[target].lanes |= lane;
        if let Some(alternate) = alternate {
            self.arena[alternate].lanes |= lane;
        }
        if let Some(root) = self.roots.get_mut(&root_id) {
            root.lanes.mark_updated(lane);
        }

        match self.session.as_mut() {
            Some(session) => {
                if session.root == root_id {
                    session.interleaved_lanes |= lane;
                }
                self.held_updates.push(update);
            }
            None => self.finish_queued_update(update),
        }
        self.ensure_root_is_scheduled(root_id);
    }

    /// Append an update to its queue and mark its lane along the path to
    /// the root.
    fn finish_queued_update(&mut self, update: Box<dyn QueuedUpdate>) {
        let target = update.target();
        let lane = update.lane();
        update.enqueue();
        self.mark_update_lane_from_node_to_root(target, lane);
    }

    pub(crate) fn finish_held_updates(&mut self) {
        for update in std::mem::take(&mut self.held_updates) {
            self.finish_queued_update(update);
        }
    }

    fn mark_update_lane_from_node_to_root(&mut self, node: NodeId, lane: Lanes) {
        let Some(source) = self.arena.get_mut(node) else {
            return;
        };
        source.lanes |= lane;
        if let Some(alternate) = source.alternate {
            if let Some(alternate) = self.arena.get_mut(alternate) {
                alternate.lanes |= lane;
            }
        }

        let ancestors: Vec<NodeId> = self.arena.ancestors(node).collect();
        for ancestor in ancestors {
            let entry = &mut self.arena[ancestor];
            entry.child_lanes |= lane;
            if let Some(alternate) = entry.alternate {
                if let Some(alternate) = self.arena.get_mut(alternate) {
                    alternate.child_lanes |= lane;
                }
            }
        }
    }

    fn root_of(&self, node: NodeId) -> Option<RootId> {
        std::iter::once(node)
            .chain(self.arena.ancestors(node))
            .find_map(|id| {
                let entry = &self.arena[id];
                (entry.kind == NodeKind::HostRoot).then_some(entry.root).flatten()
            })
    }

    /// Drain dispatches and, outside of a batch, flush sync work.
    fn microtask_boundary(&mut self) {
        self.process_dispatches();
        if self.batch_depth == 0 {
            self.flush_sync_work();
        }
    }

    /// Render and commit every root with sync work, including sync work
    /// scheduled by those commits.
    pub fn flush_sync_work(&mut self) {
        let limit = self.config.max_sync_flush_passes;
        let mut passes = 0;
        loop {
            self.process_dispatches();
            if self.sync_queue.is_empty() {
                break;
            }
            if passes >= limit {
                self.diagnostics.report(Invariant::SyncFlushLimit { passes });
                break;
            }
            passes += 1;
            for root in std::mem::take(&mut self.sync_queue) {
                self.perform_sync_work_on_root(root);
            }
        }
    }

    /// Run the most urgent scheduled task. Returns `false` when nothing was
    /// runnable.
    pub fn run_next_task(&mut self) -> bool {
        self.microtask_boundary();
        let Some(ready) = self.scheduler.pop_ready() else {
            return false;
        };
        trace!(handle = ?ready.handle, task = ?ready.task, did_timeout = ready.did_timeout, "running task");

        match ready.task {
            RootTask::PerformConcurrentWork(root) => {
                if let Some(continuation) =
                    self.perform_concurrent_work_on_root(root, ready.handle, ready.did_timeout)
                {
                    self.scheduler.continue_with(ready.handle, continuation);
                }
            }
            RootTask::FlushPassiveEffects(root) => {
                if let Some(root) = self.roots.get_mut(&root) {
                    root.passive_scheduled = false;
                }
                self.flush_passive_effects();
            }
        }
        self.microtask_boundary();
        true
    }

    /// Run tasks until the scheduler has nothing runnable. Returns the
    /// number of tasks run.
    pub fn run_until_idle(&mut self) -> usize {
        let mut ran = 0;
        while self.run_next_task() {
            ran += 1;
        }
        ran
    }

    /// Lane bookkeeping of `root`.
    pub fn root_lanes(&self, root: RootId) -> Option<RootLaneSnapshot> {
        self.roots.get(&root).map(|r| RootLaneSnapshot {
            pending: r.lanes.pending(),
            expired: r.lanes.expired(),
            callback_priority: r.callback_priority,
        })
    }

    pub fn session_state(&self) -> SessionState {
        match &self.session {
            Some(session) => SessionState::InProgress {
                root: session.root,
                lanes: session.lanes,
            },
            None => SessionState::Idle,
        }
    }

    /// Drain the invariant violations reported so far.
    pub fn take_diagnostics(&mut self) -> Vec<Invariant> {
        self.diagnostics.take()
    }

    /// The container `root` renders into.
    pub fn container(&self, root: RootId) -> Option<&H::Instance> {
        self.roots.get(&root).map(|r| &r.container)
    }

    /// Number of live work nodes across all roots.
    pub fn live_nodes(&self) -> usize {
        self.arena.len()
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    /// Free nodes that no tree or session can reach anymore.
    pub(crate) fn collect_garbage(&mut self) {
        let mut live: Vec<NodeId> = self.roots.values().map(|root| root.current).collect();
        if let Some(session) = &self.session {
            live.push(session.wip_root);
        }
        self.arena.collect_garbage(&live);
    }
}

impl<H: HostConfig, S: TaskScheduler> std::fmt::Debug for Reconciler<H, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("roots", &self.roots.len())
            .field("live_nodes", &self.arena.len())
            .field("session", &self.session)
            .field("sync_queue", &self.sync_queue)
            .finish_non_exhaustive()
    }
}
