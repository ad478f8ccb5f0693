//! Work Loop
//!
//! Root scheduling and the render loop. A root has at most one planned
//! piece of work: a scheduler task for concurrent lanes or an entry in the
//! sync queue for the sync lane. Renders run unit by unit over the session's
//! work-in-progress tree and commit once the walk is complete.

use tracing::{debug, trace};

use super::{Reconciler, RenderSession, RootId};
use crate::host::HostConfig;
use crate::lane::{includes_blocking_lane, lanes_to_event_priority, Lanes};
use crate::scheduler::{RootTask, TaskHandle, TaskScheduler};
use crate::tree::{NodeProps, RenderContext};

impl<H: HostConfig, S: TaskScheduler> Reconciler<H, S> {
    /// Lanes of the session underway on `root`, if any.
    fn in_progress_lanes(&self, root: RootId) -> Lanes {
        match &self.session {
            Some(session) if session.root == root => session.lanes,
            _ => Lanes::NONE,
        }
    }

    /// Make sure the root's most urgent pending work has a callback, reusing
    /// the existing one when it was planned for the same lane.
    pub(crate) fn ensure_root_is_scheduled(&mut self, root_id: RootId) {
        let now = self.scheduler.now();
        let in_progress = self.in_progress_lanes(root_id);
        let Some(root) = self.roots.get_mut(&root_id) else {
            return;
        };

        root.lanes.mark_starved_lanes_as_expired(now, &self.config);
        let next = root.lanes.next_lanes(in_progress);

        if next.is_empty() {
            if let Some(handle) = root.callback.take() {
                self.scheduler.cancel(handle);
            }
            root.callback_priority = Lanes::NONE;
            self.sync_queue.retain(|queued| *queued != root_id);
            return;
        }

        let new_priority = next.highest_priority_lane();
        if new_priority == root.callback_priority {
            trace!(root = %root_id, lane = ?new_priority, "reusing scheduled work");
            return;
        }

        if let Some(handle) = root.callback.take() {
            self.scheduler.cancel(handle);
        }

        if new_priority == Lanes::SYNC {
            if !self.sync_queue.contains(&root_id) {
                self.sync_queue.push(root_id);
            }
        } else {
            self.sync_queue.retain(|queued| *queued != root_id);
            let priority = lanes_to_event_priority(next).scheduler_priority();
            let handle = self
                .scheduler
                .schedule(priority, RootTask::PerformConcurrentWork(root_id));
            root.callback = Some(handle);
        }
        root.callback_priority = new_priority;
        debug!(root = %root_id, lanes = ?next, "scheduled root");
    }

    /// Body of a `PerformConcurrentWork` task. Returns the continuation to
    /// re-arm when the render yielded and this task still owns the root.
    pub(crate) fn perform_concurrent_work_on_root(
        &mut self,
        root_id: RootId,
        handle: TaskHandle,
        did_timeout: bool,
    ) -> Option<RootTask> {
        self.flush_passive_effects();
        // The flush may have rescheduled the root under another task.
        if self.roots.get(&root_id)?.callback != Some(handle) {
            trace!(root = %root_id, ?handle, "stale render task");
            return None;
        }

        let now = self.scheduler.now();
        let in_progress = self.in_progress_lanes(root_id);
        let root = self.roots.get_mut(&root_id)?;
        root.lanes.mark_starved_lanes_as_expired(now, &self.config);
        let lanes = root.lanes.next_lanes(in_progress);
        if lanes.is_empty() {
            self.ensure_root_is_scheduled(root_id);
            return None;
        }

        let time_slice = !includes_blocking_lane(lanes, &self.config)
            && !root.lanes.includes_expired_lane(lanes)
            && !did_timeout;
        if self.render_root(root_id, lanes, time_slice) {
            self.commit_session();
        }

        self.ensure_root_is_scheduled(root_id);
        match self.roots.get(&root_id) {
            Some(root) if root.callback == Some(handle) => {
                trace!(root = %root_id, "render yielded");
                Some(RootTask::PerformConcurrentWork(root_id))
            }
            _ => None,
        }
    }

    /// Render and commit the sync lane of `root_id` without yielding.
    pub(crate) fn perform_sync_work_on_root(&mut self, root_id: RootId) {
        self.flush_passive_effects();
        let in_progress = self.in_progress_lanes(root_id);
        let Some(root) = self.roots.get(&root_id) else {
            return;
        };
        let lanes = root.lanes.next_lanes(in_progress);
        if !lanes.contains(Lanes::SYNC) {
            self.ensure_root_is_scheduled(root_id);
            return;
        }

        self.render_root(root_id, lanes, false);
        self.commit_session();
        self.ensure_root_is_scheduled(root_id);
    }

    /// Render `lanes` of `root_id`, resuming the session when it matches.
    /// Returns `true` when the walk is complete.
    fn render_root(&mut self, root_id: RootId, lanes: Lanes, time_slice: bool) -> bool {
        let resumable = matches!(
            &self.session,
            Some(session) if session.root == root_id && session.lanes == lanes
        );
        if resumable {
            trace!(root = %root_id, ?lanes, "resuming render");
        } else {
            self.prepare_fresh_stack(root_id, lanes);
        }
        self.work_loop(time_slice)
    }

    /// Drop any session underway and start a new one from the root's
    /// current tree.
    fn prepare_fresh_stack(&mut self, root_id: RootId, lanes: Lanes) {
        if let Some(previous) = self.session.take() {
            debug!(
                root = %previous.root,
                lanes = ?previous.lanes,
                "discarding interrupted render"
            );
            self.collect_garbage();
        }
        self.finish_held_updates();

        let Some(current) = self.roots.get(&root_id).map(|root| root.current) else {
            return;
        };
        let wip_root = self.arena.create_work_in_progress(current, NodeProps::None);
        debug!(root = %root_id, ?lanes, "starting render");
        self.session = Some(RenderSession {
            root: root_id,
            lanes,
            wip_root,
            next_unit: Some(wip_root),
            interleaved_lanes: Lanes::NONE,
        });
    }

    /// Walk the session's tree. With `time_slice` set, the scheduler is
    /// asked before every unit whether to yield.
    fn work_loop(&mut self, time_slice: bool) -> bool {
        let Some((wip_root, lanes, mut next)) = self
            .session
            .as_ref()
            .map(|session| (session.wip_root, session.lanes, session.next_unit))
        else {
            return false;
        };

        let mut units = 0usize;
        let mut ctx = RenderContext {
            arena: &mut self.arena,
            host: &mut self.host,
            render_lanes: lanes,
            inbox: &self.inbox,
            priority: &self.priority,
            diagnostics: &mut self.diagnostics,
        };
        while let Some(unit) = next {
            if time_slice && self.scheduler.should_yield() {
                break;
            }
            next = match ctx.perform_unit_of_work(unit) {
                Some(child) => Some(child),
                None => ctx.complete_unit_of_work(unit, wip_root),
            };
            units += 1;
        }
        trace!(units, complete = next.is_none(), "work loop paused");

        if let Some(session) = self.session.as_mut() {
            session.next_unit = next;
        }
        next.is_none()
    }

    /// Commit the finished session, if there is one.
    fn commit_session(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        if session.next_unit.is_some() {
            self.session = Some(session);
            return;
        }
        self.finish_held_updates();
        self.commit_root(
            session.root,
            session.wip_root,
            session.lanes,
            session.interleaved_lanes,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryHost;
    use crate::reconciler::SessionState;
    use crate::scheduler::{ManualScheduler, YieldPolicy};
    use crate::tree::Element;

    fn concurrent() -> (Reconciler<MemoryHost>, RootId) {
        let mut host = MemoryHost::new();
        let container = host.create_container();
        let config = crate::ReconcilerConfig {
            concurrent_by_default: true,
            ..Default::default()
        };
        let mut reconciler =
            Reconciler::with_config(host, ManualScheduler::new(), config).expect("valid config");
        let root = reconciler.create_container(container);
        (reconciler, root)
    }

    fn wide_tree(n: usize) -> Element {
        Element::host("ul")
            .children((0..n).map(|i| Element::host("li").key(i.to_string()).build()))
            .build()
    }

    #[test]
    fn yielded_render_resumes_on_the_same_task() {
        let (mut reconciler, root) = concurrent();
        reconciler.scheduler_mut().set_yield_policy(YieldPolicy::AfterPolls(2));
        reconciler.update_container(wide_tree(6), root).expect("root exists");

        assert!(reconciler.run_next_task());
        assert_eq!(
            reconciler.session_state(),
            SessionState::InProgress { root, lanes: Lanes::DEFAULT }
        );
        assert_eq!(reconciler.scheduler().pending_tasks(), 1);

        reconciler.scheduler_mut().set_yield_policy(YieldPolicy::Never);
        reconciler.run_until_idle();
        assert_eq!(reconciler.session_state(), SessionState::Idle);
        let container = *reconciler.container(root).expect("root exists");
        assert_eq!(reconciler.host().children(container).len(), 1);
    }

    #[test]
    fn equal_priority_update_reuses_the_callback() {
        let (mut reconciler, root) = concurrent();
        reconciler.update_container(wide_tree(1), root).expect("root exists");
        reconciler.update_container(wide_tree(2), root).expect("root exists");
        assert_eq!(reconciler.scheduler().pending_tasks(), 1);
    }

    #[test]
    fn sync_update_replaces_a_concurrent_callback() {
        let (mut reconciler, root) = concurrent();
        reconciler.update_container(wide_tree(1), root).expect("root exists");
        assert_eq!(reconciler.scheduler().pending_tasks(), 1);

        let priority = reconciler.priority_context().clone();
        priority.with_update_priority(Lanes::SYNC, || {
            reconciler.update_container(wide_tree(3), root).expect("root exists");
        });

        // The default-lane update rendered together with the sync one is
        // still pending because it was skipped.
        let lanes = reconciler.root_lanes(root).expect("root exists");
        assert_eq!(lanes.pending, Lanes::DEFAULT);
        reconciler.run_until_idle();
        let container = *reconciler.container(root).expect("root exists");
        let ul = reconciler.host().children(container)[0];
        // Root updates replace the element, so the later sync one wins.
        assert_eq!(reconciler.host().children(ul).len(), 3);
    }
}
