//! Work Tree
//!
//! The tree side of the reconciler: elements describing what to render,
//! work nodes holding what was rendered, and the two per-node steps of the
//! render phase.
//!
//! # Render phase
//!
//! The work loop drives a depth-first walk over the work-in-progress tree:
//!
//! 1. `begin_work` renders one node (runs a component, processes the root
//!    queue, or reads host props) and reconciles its children. Nodes with
//!    nothing to do at the render lanes bail out and reuse their subtree.
//! 2. `complete_work` runs on the way back up. It creates or diffs host
//!    instances and bubbles lanes and effect flags into the parent.
//!
//! Both steps only touch the work-in-progress buffer and the host's
//! render-phase methods, so a render can be dropped at any unit boundary.

pub mod element;
pub mod hooks;
pub mod node;

pub(crate) mod arena;
mod begin;
mod child;
mod complete;

pub use element::{Component, Element, ElementBuilder, ElementNode, ElementType, Key, NodeRef, Props, RenderFn};
pub use hooks::{Deps, Destroy, HookFlags, HookStrategy, Hooks, RefHandle};
pub use node::{EffectFlags, NodeId, NodeKind};

pub(crate) use arena::NodeArena;
pub(crate) use node::{NodeProps, WorkNode};

use crate::error::Diagnostics;
use crate::host::HostConfig;
use crate::lane::{Lanes, PriorityContext};
use crate::queue::inbox::UpdateInbox;

/// Everything one render-phase step needs, borrowed from the reconciler.
pub(crate) struct RenderContext<'a, H: HostConfig> {
    pub(crate) arena: &'a mut NodeArena<H>,
    pub(crate) host: &'a mut H,
    pub(crate) render_lanes: Lanes,
    pub(crate) inbox: &'a UpdateInbox,
    pub(crate) priority: &'a PriorityContext,
    pub(crate) diagnostics: &'a mut Diagnostics,
}

impl<H: HostConfig> RenderContext<'_, H> {
    /// The current buffer of `wip`, if it has been committed before.
    pub(crate) fn current_of(&self, wip: NodeId) -> Option<NodeId> {
        self.arena[wip]
            .alternate
            .filter(|current| self.arena.contains(*current))
    }

    /// Render one node and return its first child, if there is more work
    /// below it.
    pub(crate) fn perform_unit_of_work(&mut self, wip: NodeId) -> Option<NodeId> {
        let next = self.begin_work(wip);
        let node = &mut self.arena[wip];
        node.memoized_props = node.pending_props.clone();
        next
    }

    /// Complete `wip` and its ancestors until one has an unvisited sibling.
    /// Returns that sibling, or `None` once `stop_at` is complete.
    pub(crate) fn complete_unit_of_work(&mut self, wip: NodeId, stop_at: NodeId) -> Option<NodeId> {
        let mut completed = wip;
        loop {
            self.complete_work(completed);
            if completed == stop_at {
                return None;
            }
            let node = &self.arena[completed];
            if let Some(sibling) = node.sibling {
                return Some(sibling);
            }
            completed = node.parent?;
        }
    }
}
