//! Complete Phase
//!
//! Runs on the way back up: prepares host instances and bubbles lanes and
//! flags into the parent.

use std::sync::Arc;

use super::element::{ElementType, NodeRef, Props};
use super::node::{EffectFlags, NodeId, NodeKind};
use super::RenderContext;
use crate::host::HostConfig;
use crate::lane::Lanes;

impl<H: HostConfig> RenderContext<'_, H> {
    pub(crate) fn complete_work(&mut self, wip: NodeId) {
        let current = self.current_of(wip);
        match self.arena[wip].kind {
            NodeKind::HostComponent => self.complete_host_component(current, wip),
            NodeKind::HostText => self.complete_host_text(current, wip),
            NodeKind::HostRoot | NodeKind::FunctionComponent => {}
        }
        self.bubble_properties(current, wip);
    }

    fn complete_host_component(&mut self, current: Option<NodeId>, wip: NodeId) {
        let node = &self.arena[wip];
        let props = node.pending_props.as_props().cloned().unwrap_or_default();
        let kind = match &node.ty {
            Some(ElementType::Host(kind)) => Arc::clone(kind),
            _ => Arc::from(""),
        };

        match (current, node.instance.clone()) {
            (Some(current), Some(instance)) => {
                let old = self.arena[current]
                    .memoized_props
                    .as_props()
                    .cloned()
                    .unwrap_or_default();
                if !Props::ptr_eq(&old, &props) {
                    if let Some(patch) = self.host.diff_props(&instance, &kind, &old, &props) {
                        let node = &mut self.arena[wip];
                        node.update_payload = Some(patch);
                        node.flags |= EffectFlags::UPDATE;
                    }
                }
            }
            _ => {
                let instance = self.host.create_instance(&kind, &props);
                self.append_all_children(&instance, wip);
                self.host.finalize_initial_children(&instance, &kind, &props);
                self.arena[wip].instance = Some(instance);
            }
        }

        let previous_ref = current.and_then(|current| self.arena[current].node_ref.clone());
        let node = &mut self.arena[wip];
        let ref_changed = match (&previous_ref, &node.node_ref) {
            (None, None) => false,
            (Some(a), Some(b)) => !NodeRef::ptr_eq(a, b),
            _ => current.is_some() || node.node_ref.is_some(),
        };
        if ref_changed {
            node.flags |= EffectFlags::REF;
        }
    }

    fn complete_host_text(&mut self, current: Option<NodeId>, wip: NodeId) {
        let text = self.arena[wip]
            .pending_props
            .as_text()
            .cloned()
            .unwrap_or_else(|| Arc::from(""));

        match (current, self.arena[wip].instance.is_some()) {
            (Some(current), true) => {
                let unchanged = self.arena[current].memoized_props.as_text() == Some(&text);
                if !unchanged {
                    self.arena[wip].flags |= EffectFlags::UPDATE;
                }
            }
            _ => {
                let instance = self.host.create_text_instance(&text);
                self.arena[wip].instance = Some(instance);
            }
        }
    }

    /// Attach the top-most host instances below `wip` to `parent`.
    fn append_all_children(&mut self, parent: &H::Instance, wip: NodeId) {
        let mut next = self.arena[wip].child;
        while let Some(id) = next {
            let node = &self.arena[id];
            if node.is_host() {
                if let Some(instance) = node.instance.clone() {
                    self.host.append_initial_child(parent, &instance);
                }
            } else if let Some(child) = node.child {
                self.arena[child].parent = Some(id);
                next = Some(child);
                continue;
            }

            let mut climb = id;
            loop {
                if climb == wip {
                    return;
                }
                if let Some(sibling) = self.arena[climb].sibling {
                    next = Some(sibling);
                    break;
                }
                match self.arena[climb].parent {
                    Some(parent) if parent != wip => climb = parent,
                    _ => return,
                }
            }
        }
    }

    fn bubble_properties(&mut self, current: Option<NodeId>, wip: NodeId) {
        // Children reused wholesale from current still carry flags from
        // their last commit. Only their lanes count.
        let did_bail_out = current.is_some_and(|current| self.arena[current].child == self.arena[wip].child);

        let children: Vec<NodeId> = self.arena.children(wip).collect();
        let mut child_lanes = Lanes::NONE;
        let mut subtree_flags = EffectFlags::empty();
        for child in children {
            let node = &mut self.arena[child];
            child_lanes |= node.lanes | node.child_lanes;
            if !did_bail_out {
                subtree_flags |= node.subtree_flags | node.flags;
            }
            node.parent = Some(wip);
        }

        let node = &mut self.arena[wip];
        node.child_lanes = child_lanes;
        node.subtree_flags |= subtree_flags;
    }
}
