//! Child Reconciliation
//!
//! Diffs the children an element describes against the current children of
//! a node and produces the work-in-progress child list. Matching is by key
//! (or position when unkeyed) and element type; matched nodes are reused,
//! everything else is created fresh.
//!
//! # Lists
//!
//! A first pass walks both lists in step while keys agree. When they
//! diverge, the remaining current children are indexed by key and looked up
//! one by one. A reused child whose old position is left of the last child
//! that stayed put is marked for placement; the others stay where they are.
//! Moving the last item of `[A, B, C, D]` to the front therefore moves A, B
//! and C rather than D.
//!
//! Side effects (placement and deletion) are only tracked when the parent
//! already exists on screen. A freshly mounted subtree is inserted in one go
//! by its top-most new node.

use indexmap::IndexMap;

use super::arena::NodeArena;
use super::element::{flatten_children, Element, ElementNode, ElementType, Key};
use super::node::{EffectFlags, NodeId, NodeKind, NodeProps, WorkNode};
use crate::host::HostConfig;
use crate::lane::Lanes;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ChildKey {
    Explicit(Key),
    Index(usize),
}

pub(crate) struct ChildReconciler<'c, H: HostConfig> {
    arena: &'c mut NodeArena<H>,
    track_side_effects: bool,
}

impl<'c, H: HostConfig> ChildReconciler<'c, H> {
    pub(crate) fn new(arena: &'c mut NodeArena<H>, track_side_effects: bool) -> Self {
        Self {
            arena,
            track_side_effects,
        }
    }

    /// Reconcile the children of `parent` and return the new first child.
    pub(crate) fn reconcile(
        &mut self,
        parent: NodeId,
        current_first: Option<NodeId>,
        children: &Element,
        lanes: Lanes,
    ) -> Option<NodeId> {
        match children {
            Element::Node(element) => {
                let child = self.reconcile_single_element(parent, current_first, element, lanes);
                Some(self.place_single_child(child))
            }
            Element::Text(text) => {
                let child = self.reconcile_single_text(parent, current_first, text, lanes);
                Some(self.place_single_child(child))
            }
            Element::List(items) => {
                self.reconcile_children_array(parent, current_first, &flatten_children(items), lanes)
            }
            Element::Empty => {
                self.delete_remaining_children(parent, current_first);
                None
            }
        }
    }

    fn delete_child(&mut self, parent: NodeId, child: NodeId) {
        if !self.track_side_effects {
            return;
        }
        let node = &mut self.arena[parent];
        node.deletions.push(child);
        node.flags |= EffectFlags::CHILD_DELETION;
    }

    fn delete_remaining_children(&mut self, parent: NodeId, first: Option<NodeId>) {
        if !self.track_side_effects {
            return;
        }
        let mut next = first;
        while let Some(child) = next {
            next = self.arena[child].sibling;
            self.delete_child(parent, child);
        }
    }

    /// Fork `current` for reuse at a new position.
    fn use_node(&mut self, current: NodeId, props: NodeProps, parent: NodeId) -> NodeId {
        let wip = self.arena.create_work_in_progress(current, props);
        let node = &mut self.arena[wip];
        node.index = 0;
        node.sibling = None;
        node.parent = Some(parent);
        wip
    }

    fn place_child(&mut self, child: NodeId, last_placed_index: usize, new_index: usize) -> usize {
        self.arena[child].index = new_index;
        if !self.track_side_effects {
            return last_placed_index;
        }
        let old_index = self.arena[child]
            .alternate
            .and_then(|current| self.arena.get(current))
            .map(|current| current.index);
        match old_index {
            Some(old_index) if old_index >= last_placed_index => old_index,
            // Moved left, or newly inserted.
            _ => {
                self.arena[child].flags |= EffectFlags::PLACEMENT;
                last_placed_index
            }
        }
    }

    fn place_single_child(&mut self, child: NodeId) -> NodeId {
        if self.track_side_effects && self.arena[child].alternate.is_none() {
            self.arena[child].flags |= EffectFlags::PLACEMENT;
        }
        child
    }

    fn create_from_element(&mut self, parent: NodeId, element: &ElementNode, lanes: Lanes) -> NodeId {
        let kind = match element.ty {
            ElementType::Host(_) => NodeKind::HostComponent,
            ElementType::Component(_) => NodeKind::FunctionComponent,
        };
        let mut node = WorkNode::new(kind, NodeProps::Element(element.props.clone()), element.key.clone());
        node.ty = Some(element.ty.clone());
        node.node_ref = element.node_ref.clone();
        node.lanes = lanes;
        node.parent = Some(parent);
        self.arena.alloc(node)
    }

    fn create_text(&mut self, parent: NodeId, text: &str, lanes: Lanes) -> NodeId {
        let mut node = WorkNode::new(NodeKind::HostText, NodeProps::Text(text.into()), None);
        node.lanes = lanes;
        node.parent = Some(parent);
        self.arena.alloc(node)
    }

    fn reconcile_single_element(
        &mut self,
        parent: NodeId,
        current_first: Option<NodeId>,
        element: &ElementNode,
        lanes: Lanes,
    ) -> NodeId {
        let mut next = current_first;
        while let Some(child) = next {
            let current = &self.arena[child];
            next = current.sibling;
            if current.key != element.key {
                self.delete_child(parent, child);
                continue;
            }
            if current.ty.as_ref() == Some(&element.ty) {
                self.delete_remaining_children(parent, next);
                let reused = self.use_node(child, NodeProps::Element(element.props.clone()), parent);
                self.arena[reused].node_ref = element.node_ref.clone();
                return reused;
            }
            // Same key, different type: nothing further down can match.
            self.delete_remaining_children(parent, Some(child));
            break;
        }
        self.create_from_element(parent, element, lanes)
    }

    fn reconcile_single_text(
        &mut self,
        parent: NodeId,
        current_first: Option<NodeId>,
        text: &str,
        lanes: Lanes,
    ) -> NodeId {
        if let Some(first) = current_first {
            if self.arena[first].kind == NodeKind::HostText {
                let rest = self.arena[first].sibling;
                self.delete_remaining_children(parent, rest);
                return self.use_node(first, NodeProps::Text(text.into()), parent);
            }
        }
        self.delete_remaining_children(parent, current_first);
        self.create_text(parent, text, lanes)
    }

    fn update_text(&mut self, parent: NodeId, current: Option<NodeId>, text: &str, lanes: Lanes) -> NodeId {
        match current {
            Some(current) if self.arena[current].kind == NodeKind::HostText => {
                self.use_node(current, NodeProps::Text(text.into()), parent)
            }
            _ => self.create_text(parent, text, lanes),
        }
    }

    fn update_element(
        &mut self,
        parent: NodeId,
        current: Option<NodeId>,
        element: &ElementNode,
        lanes: Lanes,
    ) -> NodeId {
        match current {
            Some(current) if self.arena[current].ty.as_ref() == Some(&element.ty) => {
                let reused = self.use_node(current, NodeProps::Element(element.props.clone()), parent);
                self.arena[reused].node_ref = element.node_ref.clone();
                reused
            }
            _ => self.create_from_element(parent, element, lanes),
        }
    }

    /// Reuse `old` for `child` when their keys agree. `None` means the keys
    /// diverged and the in-step walk has to stop.
    fn update_slot(
        &mut self,
        parent: NodeId,
        old: Option<NodeId>,
        child: &Element,
        lanes: Lanes,
    ) -> Option<NodeId> {
        let old_key = old.and_then(|old| self.arena[old].key.clone());
        match child {
            Element::Text(text) if old_key.is_none() => Some(self.update_text(parent, old, text, lanes)),
            Element::Node(element) if element.key == old_key => {
                Some(self.update_element(parent, old, element, lanes))
            }
            _ => None,
        }
    }

    fn create_child(&mut self, parent: NodeId, child: &Element, lanes: Lanes) -> Option<NodeId> {
        match child {
            Element::Text(text) => Some(self.create_text(parent, text, lanes)),
            Element::Node(element) => Some(self.create_from_element(parent, element, lanes)),
            Element::Empty | Element::List(_) => None,
        }
    }

    fn map_remaining_children(&self, first: Option<NodeId>) -> IndexMap<ChildKey, NodeId> {
        let mut existing = IndexMap::new();
        let mut next = first;
        while let Some(child) = next {
            let node = &self.arena[child];
            let key = match &node.key {
                Some(key) => ChildKey::Explicit(key.clone()),
                None => ChildKey::Index(node.index),
            };
            existing.insert(key, child);
            next = node.sibling;
        }
        existing
    }

    fn update_from_map(
        &mut self,
        existing: &IndexMap<ChildKey, NodeId>,
        parent: NodeId,
        new_index: usize,
        child: &Element,
        lanes: Lanes,
    ) -> Option<NodeId> {
        match child {
            Element::Text(text) => {
                let matched = existing.get(&ChildKey::Index(new_index)).copied();
                Some(self.update_text(parent, matched, text, lanes))
            }
            Element::Node(element) => {
                let key = match &element.key {
                    Some(key) => ChildKey::Explicit(key.clone()),
                    None => ChildKey::Index(new_index),
                };
                let matched = existing.get(&key).copied();
                Some(self.update_element(parent, matched, element, lanes))
            }
            Element::Empty | Element::List(_) => None,
        }
    }

    fn link(&mut self, first: &mut Option<NodeId>, previous: &mut Option<NodeId>, child: NodeId) {
        match *previous {
            Some(previous) => self.arena[previous].sibling = Some(child),
            None => *first = Some(child),
        }
        *previous = Some(child);
    }

    fn reconcile_children_array(
        &mut self,
        parent: NodeId,
        current_first: Option<NodeId>,
        children: &[Element],
        lanes: Lanes,
    ) -> Option<NodeId> {
        let mut first: Option<NodeId> = None;
        let mut previous: Option<NodeId> = None;
        let mut old_child = current_first;
        let mut last_placed_index = 0;
        let mut new_index = 0;

        // In-step pass.
        while let Some(old) = old_child {
            if new_index >= children.len() {
                break;
            }
            let (matched, next_old) = if self.arena[old].index > new_index {
                (None, Some(old))
            } else {
                (Some(old), self.arena[old].sibling)
            };
            let Some(child) = self.update_slot(parent, matched, &children[new_index], lanes) else {
                old_child = matched.or(next_old);
                break;
            };
            if let Some(matched) = matched {
                if self.track_side_effects && self.arena[child].alternate.is_none() {
                    // Same slot, but the old node could not be reused.
                    self.delete_child(parent, matched);
                }
            }
            last_placed_index = self.place_child(child, last_placed_index, new_index);
            self.link(&mut first, &mut previous, child);
            old_child = next_old;
            new_index += 1;
        }

        if new_index == children.len() {
            self.delete_remaining_children(parent, old_child);
            return first;
        }

        if old_child.is_none() {
            // Only insertions left.
            for (index, element) in children.iter().enumerate().skip(new_index) {
                if let Some(child) = self.create_child(parent, element, lanes) {
                    last_placed_index = self.place_child(child, last_placed_index, index);
                    self.link(&mut first, &mut previous, child);
                }
            }
            return first;
        }

        let mut existing = self.map_remaining_children(old_child);
        for (index, element) in children.iter().enumerate().skip(new_index) {
            let Some(child) = self.update_from_map(&existing, parent, index, element, lanes) else {
                continue;
            };
            if self.track_side_effects && self.arena[child].alternate.is_some() {
                let key = match &self.arena[child].key {
                    Some(key) => ChildKey::Explicit(key.clone()),
                    None => ChildKey::Index(index),
                };
                existing.shift_remove(&key);
            }
            last_placed_index = self.place_child(child, last_placed_index, index);
            self.link(&mut first, &mut previous, child);
        }

        if self.track_side_effects {
            for leftover in existing.into_values() {
                self.delete_child(parent, leftover);
            }
        }
        first
    }
}
