//! Commit Phase
//!
//! Applies a finished work-in-progress tree to the host and swaps it in as
//! the root's current tree. Commit is not interruptible and runs in three
//! passes over the subtrees whose flags ask for it:
//!
//! 1. **Mutation**: deletions, placements, host property and text updates,
//!    ref detachment, layout-effect cleanups.
//! 2. **Layout**: layout-effect bodies and ref attachment, run after the
//!    host reflects the new tree.
//! 3. **Passive**: effect cleanups and bodies, deferred to a separate
//!    scheduler task (see [`passive`]).
//!
//! Updates dispatched during the mutation and layout passes are tagged with
//! the sync lane.

mod passive;

use tracing::{debug, trace};

use crate::host::HostConfig;
use crate::lane::Lanes;
use crate::reconciler::{Reconciler, RootId};
use crate::scheduler::{RootTask, SchedulerPriority, TaskScheduler};
use crate::tree::{Destroy, EffectFlags, ElementType, HookFlags, NodeArena, NodeId, NodeKind};

/// Passive work left behind by the last commit.
pub(crate) struct PendingPassive {
    pub(crate) root: RootId,
    pub(crate) finished: NodeId,
    pub(crate) lanes: Lanes,
    /// Cleanups of passive effects in deleted subtrees.
    pub(crate) unmount_destroys: Vec<Destroy>,
}

impl std::fmt::Debug for PendingPassive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingPassive")
            .field("root", &self.root)
            .field("finished", &self.finished)
            .field("lanes", &self.lanes)
            .field("unmount_destroys", &self.unmount_destroys.len())
            .finish()
    }
}

/// Borrowed state for one commit pass.
pub(crate) struct CommitContext<'a, H: HostConfig> {
    arena: &'a mut NodeArena<H>,
    host: &'a mut H,
    /// Passive cleanups collected from deleted subtrees.
    passive_destroys: Vec<Destroy>,
}

impl<H: HostConfig, S: TaskScheduler> Reconciler<H, S> {
    /// Commit the finished tree rooted at `finished`.
    pub(crate) fn commit_root(
        &mut self,
        root_id: RootId,
        finished: NodeId,
        lanes: Lanes,
        interleaved: Lanes,
    ) {
        self.flush_passive_effects();

        let node = &self.arena[finished];
        let remaining = node.lanes | node.child_lanes | interleaved;
        let has_passive = (node.flags | node.subtree_flags).intersects(EffectFlags::PASSIVE_MASK);
        let has_effects = (node.flags | node.subtree_flags)
            .intersects(EffectFlags::MUTATION_MASK | EffectFlags::LAYOUT_MASK);

        let Some(root) = self.roots.get_mut(&root_id) else {
            return;
        };
        debug!(root = %root_id, ?lanes, ?remaining, has_effects, has_passive, "committing");
        root.lanes.mark_finished(remaining);
        if let Some(handle) = root.callback.take() {
            self.scheduler.cancel(handle);
        }
        root.callback_priority = Lanes::NONE;

        if has_passive {
            self.pending_passive = Some(PendingPassive {
                root: root_id,
                finished,
                lanes,
                unmount_destroys: Vec::new(),
            });
            if !root.passive_scheduled {
                root.passive_scheduled = true;
                self.scheduler
                    .schedule(SchedulerPriority::Normal, RootTask::FlushPassiveEffects(root_id));
            }
        }

        let previous = self.priority.set_update_priority(Lanes::SYNC);
        let mut ctx = CommitContext::new(&mut self.arena, &mut self.host);
        ctx.commit_mutation_effects(finished);
        root.current = finished;
        ctx.commit_layout_effects(finished);
        let destroys = ctx.into_passive_destroys();
        self.priority.set_update_priority(previous);

        if !destroys.is_empty() {
            match self.pending_passive.as_mut() {
                Some(pending) => pending.unmount_destroys.extend(destroys),
                None => destroys.into_iter().for_each(|destroy| destroy()),
            }
        }

        self.collect_garbage();
        self.ensure_root_is_scheduled(root_id);
        self.process_dispatches();
    }
}

impl<'a, H: HostConfig> CommitContext<'a, H> {
    pub(crate) fn new(arena: &'a mut NodeArena<H>, host: &'a mut H) -> Self {
        Self {
            arena,
            host,
            passive_destroys: Vec::new(),
        }
    }

    pub(crate) fn into_passive_destroys(self) -> Vec<Destroy> {
        self.passive_destroys
    }

    fn current_of(&self, id: NodeId) -> Option<NodeId> {
        self.arena[id]
            .alternate
            .filter(|current| self.arena.contains(*current))
    }

    /// Children of `id`, re-pointing each one's parent at `id` on the way.
    fn adopt_children(&mut self, id: NodeId) -> Vec<NodeId> {
        let children: Vec<NodeId> = self.arena.children(id).collect();
        for child in &children {
            self.arena[*child].parent = Some(id);
        }
        children
    }

    // ------------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------------

    fn commit_mutation_effects(&mut self, id: NodeId) {
        let deletions = std::mem::take(&mut self.arena[id].deletions);
        if !deletions.is_empty() {
            let host_parent = self.nearest_host_container(id);
            for deleted in deletions {
                self.commit_deletion(host_parent.as_ref(), deleted);
            }
        }

        if self.arena[id].flags.contains(EffectFlags::CONTENT_RESET) {
            if let Some(instance) = self.arena[id].instance.clone() {
                trace!(node = %id, "resetting text content");
                self.host.reset_text_content(&instance);
            }
            self.arena[id].flags.remove(EffectFlags::CONTENT_RESET);
        }

        if self.arena[id].subtree_flags.intersects(EffectFlags::MUTATION_MASK) {
            for child in self.adopt_children(id) {
                self.commit_mutation_effects(child);
            }
        }

        if self.arena[id].flags.contains(EffectFlags::PLACEMENT) {
            self.commit_placement(id);
            self.arena[id].flags.remove(EffectFlags::PLACEMENT);
        }

        let current = self.current_of(id);
        let node = &mut self.arena[id];
        match node.kind {
            NodeKind::FunctionComponent if node.flags.contains(EffectFlags::UPDATE) => {
                for effect in node.effects.iter().filter(|e| e.fires_in(HookFlags::LAYOUT)) {
                    if let Some(destroy) = effect.take_destroy() {
                        destroy();
                    }
                }
            }
            NodeKind::HostComponent => {
                let flags = node.flags;
                let patch = node.update_payload.take();
                let instance = node.instance.clone();
                let kind = match &node.ty {
                    Some(ElementType::Host(kind)) => Some(kind.clone()),
                    _ => None,
                };

                if flags.contains(EffectFlags::REF) {
                    if let Some(node_ref) = current.and_then(|c| self.arena[c].node_ref.clone()) {
                        node_ref.detach();
                    }
                }
                if flags.contains(EffectFlags::UPDATE) {
                    if let (Some(patch), Some(instance), Some(kind)) = (patch, instance, kind) {
                        trace!(node = %id, ?patch, "applying patch");
                        self.host.apply_patch(&instance, &kind, patch);
                    }
                }
            }
            NodeKind::HostText if node.flags.contains(EffectFlags::UPDATE) => {
                let new_text = node.memoized_props.as_text().cloned();
                let instance = node.instance.clone();
                let old_text = current.and_then(|c| self.arena[c].memoized_props.as_text().cloned());
                if let (Some(instance), Some(new_text)) = (instance, new_text) {
                    let old_text = old_text.as_deref().unwrap_or("");
                    self.host.commit_text_update(&instance, old_text, &new_text);
                }
            }
            _ => {}
        }
    }

    /// Host instance children of `id` attach to: `id` itself when it is a
    /// host component or root, else its nearest such ancestor.
    fn nearest_host_container(&self, id: NodeId) -> Option<H::Instance> {
        std::iter::once(id)
            .chain(self.arena.ancestors(id))
            .find(|ancestor| {
                matches!(
                    self.arena[*ancestor].kind,
                    NodeKind::HostComponent | NodeKind::HostRoot
                )
            })
            .and_then(|ancestor| self.arena[ancestor].instance.clone())
    }

    fn commit_deletion(&mut self, host_parent: Option<&H::Instance>, id: NodeId) {
        trace!(node = %id, name = self.arena[id].name(), "deleting");
        let node = &self.arena[id];
        match node.kind {
            NodeKind::HostComponent | NodeKind::HostText => {
                let instance = node.instance.clone();
                if let Some(node_ref) = node.node_ref.clone() {
                    node_ref.detach();
                }
                // Nested host nodes leave with this one; only refs and
                // effects below still need their cleanup.
                for child in self.adopt_children(id) {
                    self.commit_deletion(None, child);
                }
                if let (Some(parent), Some(instance)) = (host_parent, instance) {
                    self.host.remove_child(parent, &instance);
                }
            }
            NodeKind::FunctionComponent => {
                for effect in &node.effects {
                    let Some(destroy) = effect.take_destroy() else {
                        continue;
                    };
                    if effect.tag.contains(HookFlags::LAYOUT) {
                        destroy();
                    } else {
                        self.passive_destroys.push(destroy);
                    }
                }
                for child in self.adopt_children(id) {
                    self.commit_deletion(host_parent, child);
                }
            }
            NodeKind::HostRoot => {
                for child in self.adopt_children(id) {
                    self.commit_deletion(host_parent, child);
                }
            }
        }
    }

    fn commit_placement(&mut self, id: NodeId) {
        let Some(parent) = self.host_parent(id) else {
            return;
        };
        let before = self.host_sibling(id);
        trace!(node = %id, name = self.arena[id].name(), "placing");
        self.insert_or_append(id, before.as_ref(), &parent);
    }

    fn is_host_parent(&self, id: NodeId) -> bool {
        matches!(self.arena[id].kind, NodeKind::HostComponent | NodeKind::HostRoot)
    }

    fn host_parent(&self, id: NodeId) -> Option<H::Instance> {
        self.arena
            .ancestors(id)
            .find(|ancestor| self.is_host_parent(*ancestor))
            .and_then(|ancestor| self.arena[ancestor].instance.clone())
    }

    /// First host instance after `id` among its host siblings that is
    /// already in place. New nodes are inserted before it.
    fn host_sibling(&mut self, id: NodeId) -> Option<H::Instance> {
        let mut node = id;
        'siblings: loop {
            while self.arena[node].sibling.is_none() {
                match self.arena[node].parent {
                    Some(parent) if !self.is_host_parent(parent) => node = parent,
                    _ => return None,
                }
            }

            let parent = self.arena[node].parent;
            let sibling = self.arena[node].sibling?;
            self.arena[sibling].parent = parent;
            node = sibling;

            while !self.arena[node].is_host() {
                // A node that is itself being placed cannot anchor others.
                if self.arena[node].flags.contains(EffectFlags::PLACEMENT) {
                    continue 'siblings;
                }
                let Some(child) = self.arena[node].child else {
                    continue 'siblings;
                };
                self.arena[child].parent = Some(node);
                node = child;
            }

            if !self.arena[node].flags.contains(EffectFlags::PLACEMENT) {
                return self.arena[node].instance.clone();
            }
        }
    }

    fn insert_or_append(&mut self, id: NodeId, before: Option<&H::Instance>, parent: &H::Instance) {
        let node = &self.arena[id];
        if node.is_host() {
            let Some(instance) = node.instance.clone() else {
                return;
            };
            match before {
                Some(before) => self.host.insert_before(parent, &instance, before),
                None => self.host.append_child(parent, &instance),
            }
            return;
        }
        for child in self.adopt_children(id) {
            self.insert_or_append(child, before, parent);
        }
    }

    // ------------------------------------------------------------------------
    // Layout
    // ------------------------------------------------------------------------

    fn commit_layout_effects(&mut self, id: NodeId) {
        if self.arena[id].subtree_flags.intersects(EffectFlags::LAYOUT_MASK) {
            for child in self.adopt_children(id) {
                self.commit_layout_effects(child);
            }
        }

        let node = &mut self.arena[id];
        match node.kind {
            NodeKind::FunctionComponent if node.flags.contains(EffectFlags::UPDATE) => {
                for effect in node.effects.iter_mut().filter(|e| e.fires_in(HookFlags::LAYOUT)) {
                    effect.run_create();
                }
            }
            NodeKind::HostComponent if node.flags.contains(EffectFlags::REF) => {
                if let (Some(node_ref), Some(instance)) = (&node.node_ref, &node.instance) {
                    node_ref.attach(Box::new(instance.clone()));
                }
            }
            _ => {}
        }
    }
}
