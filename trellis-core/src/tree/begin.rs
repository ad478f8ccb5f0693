//! Begin Phase
//!
//! Renders a single node on the way down the tree.

use std::sync::Arc;

use tracing::{trace, warn};

use super::child::ChildReconciler;
use super::element::{Element, ElementType, Props};
use super::hooks::{HookStrategy, Hooks};
use super::node::{EffectFlags, NodeId, NodeKind};
use super::RenderContext;
use crate::host::HostConfig;
use crate::lane::Lanes;

impl<H: HostConfig> RenderContext<'_, H> {
    pub(crate) fn begin_work(&mut self, wip: NodeId) -> Option<NodeId> {
        let current = self.current_of(wip);

        if let Some(current) = current {
            let unchanged = self.arena[current]
                .memoized_props
                .same(&self.arena[wip].pending_props);
            if unchanged && !self.arena[wip].lanes.intersects(self.render_lanes) {
                return self.bailout_on_already_finished_work(wip);
            }
        }

        self.arena[wip].lanes = Lanes::NONE;
        match self.arena[wip].kind {
            NodeKind::HostRoot => self.update_host_root(current, wip),
            NodeKind::HostComponent => self.update_host_component(current, wip),
            NodeKind::HostText => None,
            NodeKind::FunctionComponent => self.update_function_component(current, wip),
        }
    }

    fn bailout_on_already_finished_work(&mut self, wip: NodeId) -> Option<NodeId> {
        if !self.arena[wip].child_lanes.intersects(self.render_lanes) {
            trace!(node = %wip, "subtree has no work, skipping");
            return None;
        }
        self.clone_child_nodes(wip);
        self.arena[wip].child
    }

    /// Give every child of `wip` its own work-in-progress buffer so the walk
    /// can descend without touching the current tree.
    fn clone_child_nodes(&mut self, wip: NodeId) {
        let Some(first) = self.arena[wip].child else {
            return;
        };
        let props = self.arena[first].pending_props.clone();
        let mut new_child = self.arena.create_work_in_progress(first, props);
        self.arena[wip].child = Some(new_child);
        self.arena[new_child].parent = Some(wip);

        let mut current_child = first;
        while let Some(next) = self.arena[current_child].sibling {
            current_child = next;
            let props = self.arena[next].pending_props.clone();
            let new_sibling = self.arena.create_work_in_progress(next, props);
            self.arena[new_child].sibling = Some(new_sibling);
            self.arena[new_sibling].parent = Some(wip);
            new_child = new_sibling;
        }
        self.arena[new_child].sibling = None;
    }

    fn reconcile_children(&mut self, current: Option<NodeId>, wip: NodeId, children: &Element) {
        let current_first = current.and_then(|current| self.arena[current].child);
        let first = ChildReconciler::new(self.arena, current.is_some()).reconcile(
            wip,
            current_first,
            children,
            self.render_lanes,
        );
        self.arena[wip].child = first;
    }

    fn update_host_root(&mut self, current: Option<NodeId>, wip: NodeId) -> Option<NodeId> {
        let render_lanes = self.render_lanes;
        let processed = match current {
            Some(current) => {
                let (current_node, node) = self.arena.pair_mut(current, wip);
                node.root_queue
                    .as_mut()
                    .map(|queue| queue.process(render_lanes, current_node.root_queue.as_mut()))
            }
            None => self.arena[wip]
                .root_queue
                .as_mut()
                .map(|queue| queue.process(render_lanes, None)),
        };

        let node = &mut self.arena[wip];
        if let Some(processed) = processed {
            node.lanes |= processed.residual_lanes;
            node.root_state = Some(processed.state);
        }
        let children = node
            .root_state
            .as_ref()
            .map(|state| state.element.clone())
            .unwrap_or_default();

        self.reconcile_children(current, wip, &children);
        self.arena[wip].child
    }

    fn update_host_component(&mut self, current: Option<NodeId>, wip: NodeId) -> Option<NodeId> {
        let node = &self.arena[wip];
        let props = node.pending_props.as_props().cloned().unwrap_or_default();
        let kind = match &node.ty {
            Some(ElementType::Host(kind)) => Arc::clone(kind),
            _ => Arc::from(""),
        };

        // Text-only children are host content, not child nodes.
        let children = if self.host.should_set_text_content(&kind, &props) {
            Element::Empty
        } else {
            let had_text = current
                .and_then(|current| self.arena[current].memoized_props.as_props())
                .is_some_and(|old| self.host.should_set_text_content(&kind, old));
            if had_text {
                self.arena[wip].flags |= EffectFlags::CONTENT_RESET;
            }
            props.children().clone()
        };
        self.reconcile_children(current, wip, &children);
        self.arena[wip].child
    }

    fn update_function_component(&mut self, current: Option<NodeId>, wip: NodeId) -> Option<NodeId> {
        let Some(ElementType::Component(component)) = self.arena[wip].ty.clone() else {
            return None;
        };
        let props: Props = self.arena[wip].pending_props.as_props().cloned().unwrap_or_default();

        let mut current_slots = match current {
            Some(current) => std::mem::take(&mut self.arena[current].hooks),
            None => Vec::new(),
        };
        let strategy = if current_slots.is_empty() {
            HookStrategy::Mount
        } else {
            HookStrategy::Update
        };
        trace!(node = %wip, component = component.name(), ?strategy, "rendering component");

        let (children, output) = {
            let mut hooks = Hooks::new(
                strategy,
                wip,
                component.name(),
                self.render_lanes,
                &mut current_slots,
                self.inbox,
                self.priority,
            );
            let children = component.render(&mut hooks, &props);
            (children, hooks.finish())
        };
        if let Some(current) = current {
            self.arena[current].hooks = current_slots;
        }

        if !output.violations.is_empty() {
            warn!(
                node = %wip,
                component = component.name(),
                violations = output.violations.len(),
                "stateful slots rebuilt after a shape change"
            );
            self.diagnostics.extend(output.violations);
        }
        let node = &mut self.arena[wip];
        node.hooks = output.slots;
        node.effects = output.effects;
        node.flags |= output.flags;
        node.lanes |= output.residual_lanes;

        self.reconcile_children(current, wip, &children);
        self.arena[wip].child
    }
}
