//! Passive Effects
//!
//! Passive effects run after the commit that produced them, in their own
//! scheduler task, or earlier when the next render or commit needs a clean
//! slate. All cleanups run before any effect body: first those of deleted
//! subtrees, then those of effects about to re-run, children before parents.

use tracing::{debug, trace};

use super::CommitContext;
use crate::host::HostConfig;
use crate::lane::{lanes_to_event_priority, Lanes};
use crate::reconciler::Reconciler;
use crate::scheduler::TaskScheduler;
use crate::tree::{EffectFlags, HookFlags, NodeId, NodeKind};

impl<H: HostConfig, S: TaskScheduler> Reconciler<H, S> {
    /// Run the passive effects of the last commit. Returns `false` when
    /// there were none.
    ///
    /// Updates dispatched from the effects are tagged with the committed
    /// lanes' event priority, but never anything more urgent than the
    /// default lane.
    pub fn flush_passive_effects(&mut self) -> bool {
        let Some(pending) = self.pending_passive.take() else {
            return false;
        };
        debug!(root = %pending.root, lanes = ?pending.lanes, "flushing passive effects");

        let event_lane = lanes_to_event_priority(pending.lanes).lane();
        let lane = if event_lane < Lanes::DEFAULT {
            Lanes::DEFAULT
        } else {
            event_lane
        };
        let previous = self.priority.set_update_priority(lane);

        for destroy in pending.unmount_destroys {
            destroy();
        }
        if self.arena.contains(pending.finished) {
            let mut ctx = CommitContext::new(&mut self.arena, &mut self.host);
            ctx.commit_passive_unmount_effects(pending.finished);
            ctx.commit_passive_mount_effects(pending.finished);
        }

        self.priority.set_update_priority(previous);
        self.process_dispatches();
        true
    }
}

impl<H: HostConfig> CommitContext<'_, H> {
    fn passive_children(&mut self, id: NodeId) -> Vec<NodeId> {
        if self.arena[id].subtree_flags.contains(EffectFlags::PASSIVE) {
            self.adopt_children(id)
        } else {
            Vec::new()
        }
    }

    fn has_passive_work(&self, id: NodeId) -> bool {
        let node = &self.arena[id];
        node.kind == NodeKind::FunctionComponent && node.flags.contains(EffectFlags::PASSIVE)
    }

    pub(crate) fn commit_passive_unmount_effects(&mut self, id: NodeId) {
        for child in self.passive_children(id) {
            self.commit_passive_unmount_effects(child);
        }
        if !self.has_passive_work(id) {
            return;
        }
        for effect in self.arena[id].effects.iter().filter(|e| e.fires_in(HookFlags::PASSIVE)) {
            if let Some(destroy) = effect.take_destroy() {
                trace!(node = %id, "passive cleanup");
                destroy();
            }
        }
    }

    pub(crate) fn commit_passive_mount_effects(&mut self, id: NodeId) {
        for child in self.passive_children(id) {
            self.commit_passive_mount_effects(child);
        }
        if !self.has_passive_work(id) {
            return;
        }
        for effect in self.arena[id]
            .effects
            .iter_mut()
            .filter(|e| e.fires_in(HookFlags::PASSIVE))
        {
            effect.run_create();
        }
    }
}
