//! Node Arena
//!
//! All work nodes of all roots live in one generational arena. Links between
//! nodes (parent, child, sibling, alternate) are [`NodeId`]s, never
//! references, so both buffers of a tree can point at each other freely.
//!
//! Nothing is freed eagerly. After each commit the reconciler runs
//! [`NodeArena::collect_garbage`], which keeps every node reachable from a
//! live tree (plus the alternates of those nodes) and frees the rest:
//! deleted subtrees, and nodes built by renders that were thrown away.
//!
//! Indexing (`arena[id]`) is only used on ids read from the links of a tree
//! that is being rendered or committed, or from a root's current pointer.
//! Collection only runs between renders, after those trees were marked, so
//! such ids are always live. Ids that can outlive their node, such as the
//! targets of state dispatches, go through [`NodeArena::get`] and are dropped
//! when stale.

use std::ops::{Index, IndexMut};

use tracing::trace;

use super::node::{EffectFlags, NodeId, NodeProps, WorkNode};
use crate::host::HostConfig;

struct Entry<H: HostConfig> {
    generation: u32,
    node: Option<WorkNode<H>>,
}

/// Generational storage for work nodes.
pub(crate) struct NodeArena<H: HostConfig> {
    entries: Vec<Entry<H>>,
    free: Vec<u32>,
    live: usize,
}

impl<H: HostConfig> NodeArena<H> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    /// Store `node` and return its handle.
    pub(crate) fn alloc(&mut self, node: WorkNode<H>) -> NodeId {
        self.live += 1;
        match self.free.pop() {
            Some(index) => {
                let entry = &mut self.entries[index as usize];
                entry.node = Some(node);
                NodeId::from_raw_parts(index, entry.generation)
            }
            None => {
                let index = self.entries.len() as u32;
                self.entries.push(Entry {
                    generation: 0,
                    node: Some(node),
                });
                NodeId::from_raw_parts(index, 0)
            }
        }
    }

    fn free(&mut self, index: usize) {
        let entry = &mut self.entries[index];
        if entry.node.take().is_some() {
            entry.generation = entry.generation.wrapping_add(1);
            self.free.push(index as u32);
            self.live -= 1;
        }
    }

    /// `true` when `id` refers to a live node.
    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    pub(crate) fn get(&self, id: NodeId) -> Option<&WorkNode<H>> {
        self.entries
            .get(id.index())
            .filter(|entry| entry.generation == id.generation())
            .and_then(|entry| entry.node.as_ref())
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut WorkNode<H>> {
        self.entries
            .get_mut(id.index())
            .filter(|entry| entry.generation == id.generation())
            .and_then(|entry| entry.node.as_mut())
    }

    /// Number of live nodes.
    pub(crate) fn len(&self) -> usize {
        self.live
    }

    /// Borrow two distinct nodes mutably at once.
    pub(crate) fn pair_mut(&mut self, a: NodeId, b: NodeId) -> (&mut WorkNode<H>, &mut WorkNode<H>) {
        assert_ne!(a.index(), b.index(), "pair_mut on a single node");
        let (low, high, swapped) = if a.index() < b.index() {
            (a, b, false)
        } else {
            (b, a, true)
        };
        let (head, tail) = self.entries.split_at_mut(high.index());
        let first = live_node(&mut head[low.index()], low);
        let second = live_node(&mut tail[0], high);
        if swapped {
            (second, first)
        } else {
            (first, second)
        }
    }

    /// Walk from `id` to the root of its tree.
    pub(crate) fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let mut next = self.get(id).and_then(|node| node.parent);
        std::iter::from_fn(move || {
            let current = next.filter(|parent| self.contains(*parent))?;
            next = self.get(current).and_then(|node| node.parent);
            Some(current)
        })
    }

    /// Children of `id`, first to last.
    pub(crate) fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let mut next = self.get(id).and_then(|node| node.child);
        std::iter::from_fn(move || {
            let current = next.filter(|child| self.contains(*child))?;
            next = self.get(current).and_then(|node| node.sibling);
            Some(current)
        })
    }

    /// Fork (or refresh) the work-in-progress buffer of `current`.
    ///
    /// An existing alternate is reused with its side-effect bookkeeping
    /// reset; otherwise a new node is allocated and linked both ways. Either
    /// way the copy starts with current's children, lanes, state and
    /// stateful slots. Effects are copied inert: they keep their cleanup
    /// cell but will not run again unless the next render re-arms them.
    pub(crate) fn create_work_in_progress(&mut self, current: NodeId, pending_props: NodeProps) -> NodeId {
        let existing = self[current].alternate.filter(|alternate| self.contains(*alternate));
        let wip = match existing {
            Some(wip) => {
                let node = &mut self[wip];
                node.pending_props = pending_props;
                node.flags = EffectFlags::empty();
                node.subtree_flags = EffectFlags::empty();
                node.deletions.clear();
                wip
            }
            None => {
                let source = &self[current];
                let mut node = WorkNode::new(source.kind, pending_props, source.key.clone());
                node.root = source.root;
                node.alternate = Some(current);
                let wip = self.alloc(node);
                self[current].alternate = Some(wip);
                wip
            }
        };

        let (source, node) = self.pair_mut(current, wip);
        node.ty = source.ty.clone();
        node.instance = source.instance.clone();
        node.lanes = source.lanes;
        node.child_lanes = source.child_lanes;
        node.child = source.child;
        node.sibling = source.sibling;
        node.index = source.index;
        node.memoized_props = source.memoized_props.clone();
        node.root_queue = source.root_queue.clone();
        node.root_state = source.root_state.clone();
        node.hooks = source.hooks.clone();
        node.effects = source.effects.iter().map(|effect| effect.inert_copy()).collect();
        node.update_payload = None;
        node.node_ref = source.node_ref.clone();
        wip
    }

    /// Free every node not reachable from `roots` through child and sibling
    /// links. Alternates of reachable nodes are kept as well. Returns the
    /// number of nodes freed.
    pub(crate) fn collect_garbage(&mut self, roots: &[NodeId]) -> usize {
        let mut marked = vec![false; self.entries.len()];
        let mut stack: Vec<NodeId> = roots.to_vec();

        while let Some(id) = stack.pop() {
            let Some(node) = self.get(id) else {
                continue;
            };
            if std::mem::replace(&mut marked[id.index()], true) {
                continue;
            }
            if let Some(alternate) = node.alternate.filter(|alt| self.contains(*alt)) {
                marked[alternate.index()] = true;
            }
            stack.extend(node.child);
            stack.extend(node.sibling);
        }

        let before = self.live;
        for (index, keep) in marked.into_iter().enumerate() {
            if !keep {
                self.free(index);
            }
        }
        let freed = before - self.live;
        if freed > 0 {
            trace!(freed, live = self.live, "collected work nodes");
        }
        freed
    }
}

fn live_node<H: HostConfig>(entry: &mut Entry<H>, id: NodeId) -> &mut WorkNode<H> {
    match entry.node.as_mut() {
        Some(node) if entry.generation == id.generation() => node,
        _ => panic!("stale node handle {id}"),
    }
}

impl<H: HostConfig> Index<NodeId> for NodeArena<H> {
    type Output = WorkNode<H>;

    fn index(&self, id: NodeId) -> &Self::Output {
        match self.get(id) {
            Some(node) => node,
            None => panic!("stale node handle {id}"),
        }
    }
}

impl<H: HostConfig> IndexMut<NodeId> for NodeArena<H> {
    fn index_mut(&mut self, id: NodeId) -> &mut Self::Output {
        match self.get_mut(id) {
            Some(node) => node,
            None => panic!("stale node handle {id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryHost;
    use crate::tree::NodeKind;

    fn leaf() -> WorkNode<MemoryHost> {
        WorkNode::new(NodeKind::HostText, NodeProps::Text("x".into()), None)
    }

    #[test]
    fn freed_slots_are_reused_with_a_new_generation() {
        let mut arena = NodeArena::<MemoryHost>::new();
        let first = arena.alloc(leaf());
        assert_eq!(arena.collect_garbage(&[]), 1);
        assert!(!arena.contains(first));

        let second = arena.alloc(leaf());
        assert_eq!(first.index(), second.index());
        assert_ne!(first.generation(), second.generation());
        assert!(arena.get(first).is_none());
    }

    #[test]
    fn garbage_collection_keeps_reachable_nodes_and_their_alternates() {
        let mut arena = NodeArena::<MemoryHost>::new();
        let root = arena.alloc(WorkNode::new(NodeKind::HostRoot, NodeProps::None, None));
        let child = arena.alloc(leaf());
        let orphan = arena.alloc(leaf());
        arena[root].child = Some(child);
        arena[child].parent = Some(root);

        let wip_root = arena.create_work_in_progress(root, NodeProps::None);
        assert_eq!(arena[wip_root].child, Some(child));

        assert_eq!(arena.collect_garbage(&[root]), 1);
        assert!(arena.contains(wip_root));
        assert!(arena.contains(child));
        assert!(!arena.contains(orphan));
    }

    #[test]
    fn work_in_progress_is_reused_and_reset() {
        let mut arena = NodeArena::<MemoryHost>::new();
        let current = arena.alloc(leaf());
        let wip = arena.create_work_in_progress(current, NodeProps::Text("y".into()));
        arena[wip].flags = EffectFlags::UPDATE;

        let again = arena.create_work_in_progress(current, NodeProps::Text("z".into()));
        assert_eq!(again, wip);
        assert!(arena[again].flags.is_empty());
        assert_eq!(arena[again].alternate, Some(current));
        assert_eq!(arena[current].alternate, Some(again));
    }

    #[test]
    #[should_panic(expected = "stale node handle")]
    fn indexing_a_collected_node_panics() {
        let mut arena = NodeArena::<MemoryHost>::new();
        let node = arena.alloc(leaf());
        arena.collect_garbage(&[]);
        let _ = &arena[node];
    }

    #[test]
    fn walks_stop_at_collected_nodes() {
        let mut arena = NodeArena::<MemoryHost>::new();
        let root = arena.alloc(WorkNode::new(NodeKind::HostRoot, NodeProps::None, None));
        let child = arena.alloc(leaf());
        arena[root].child = Some(child);
        arena[child].parent = Some(root);
        let orphan = arena.alloc(leaf());
        arena[orphan].parent = Some(root);

        assert_eq!(arena.collect_garbage(&[orphan]), 2);
        assert_eq!(arena.ancestors(orphan).count(), 0);
        assert!(arena.get(child).is_none());
    }

    #[test]
    fn ancestors_walk_to_the_root() {
        let mut arena = NodeArena::<MemoryHost>::new();
        let root = arena.alloc(WorkNode::new(NodeKind::HostRoot, NodeProps::None, None));
        let mid = arena.alloc(leaf());
        let low = arena.alloc(leaf());
        arena[mid].parent = Some(root);
        arena[low].parent = Some(mid);

        assert_eq!(arena.ancestors(low).collect::<Vec<_>>(), vec![mid, root]);
    }
}
