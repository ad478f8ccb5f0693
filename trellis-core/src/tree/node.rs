//! Work Nodes
//!
//! A work node is one unit of the tree: a root, a host element, a text
//! leaf, or a function component. Every node that has committed at least
//! once exists in two buffers, `current` (what the host shows) and the
//! work-in-progress copy being rendered. The two point at each other
//! through `alternate`.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use smallvec::SmallVec;

use super::element::{ElementType, Key, NodeRef, Props};
use super::hooks::{EffectRecord, HookSlot};
use crate::host::HostConfig;
use crate::lane::Lanes;
use crate::queue::UpdateQueue;
use crate::reconciler::{RootId, RootState};

/// Handle to a node in the arena.
///
/// The generation distinguishes a live node from an earlier node that
/// occupied the same slot, so a handle kept by a state dispatcher after its
/// node was collected is detected instead of aliasing a stranger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    pub(crate) const fn from_raw_parts(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index in the arena.
    pub fn index(self) -> usize {
        self.index as usize
    }

    /// Generation of the slot when this handle was issued.
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// What a work node stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// The top of a tree, attached to a host container.
    HostRoot,
    /// A host element such as `"div"`.
    HostComponent,
    /// A text leaf.
    HostText,
    /// A function component.
    FunctionComponent,
}

bitflags! {
    /// Side effects a node needs at commit time.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EffectFlags: u16 {
        /// Insert or move the node's host instances.
        const PLACEMENT = 1 << 0;
        /// Apply a prop patch, update text, or run layout effects.
        const UPDATE = 1 << 1;
        /// One or more children are listed in `deletions`.
        const CHILD_DELETION = 1 << 2;
        /// The ref binding changed.
        const REF = 1 << 3;
        /// Passive effects are waiting to run.
        const PASSIVE = 1 << 4;
        /// Host text content must be cleared before children are placed.
        const CONTENT_RESET = 1 << 5;

        // Phase masks
        const MUTATION_MASK = Self::PLACEMENT.bits()
            | Self::UPDATE.bits()
            | Self::CHILD_DELETION.bits()
            | Self::REF.bits()
            | Self::CONTENT_RESET.bits();
        const LAYOUT_MASK = Self::UPDATE.bits() | Self::REF.bits();
        const PASSIVE_MASK = Self::PASSIVE.bits() | Self::CHILD_DELETION.bits();
    }
}

/// Pending or memoized input of a node.
#[derive(Debug, Clone, Default)]
pub(crate) enum NodeProps {
    #[default]
    None,
    Element(Props),
    Text(Arc<str>),
}

impl NodeProps {
    /// `true` when both sides are the same input. Element props compare by
    /// identity, text by value.
    pub(crate) fn same(&self, other: &NodeProps) -> bool {
        match (self, other) {
            (NodeProps::None, NodeProps::None) => true,
            (NodeProps::Element(a), NodeProps::Element(b)) => Props::ptr_eq(a, b),
            (NodeProps::Text(a), NodeProps::Text(b)) => a == b,
            _ => false,
        }
    }

    pub(crate) fn as_props(&self) -> Option<&Props> {
        match self {
            NodeProps::Element(props) => Some(props),
            _ => None,
        }
    }

    pub(crate) fn as_text(&self) -> Option<&Arc<str>> {
        match self {
            NodeProps::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// One node of a tree, in one of its two buffers.
pub(crate) struct WorkNode<H: HostConfig> {
    pub(crate) kind: NodeKind,
    pub(crate) key: Option<Key>,
    /// Element type for host and component nodes.
    pub(crate) ty: Option<ElementType>,
    /// Host instance (or, for the root, the container).
    pub(crate) instance: Option<H::Instance>,
    /// Owning root, set on root nodes only.
    pub(crate) root: Option<RootId>,

    pub(crate) parent: Option<NodeId>,
    pub(crate) child: Option<NodeId>,
    pub(crate) sibling: Option<NodeId>,
    /// Position among the parent's children.
    pub(crate) index: usize,

    pub(crate) pending_props: NodeProps,
    pub(crate) memoized_props: NodeProps,

    /// Root nodes only.
    pub(crate) root_queue: Option<UpdateQueue<RootState>>,
    pub(crate) root_state: Option<RootState>,

    /// Stateful slots of a function component, in call order.
    pub(crate) hooks: Vec<HookSlot>,
    /// Effects produced by the latest render.
    pub(crate) effects: Vec<EffectRecord>,
    /// Prop patch computed at completion, applied at commit.
    pub(crate) update_payload: Option<H::Patch>,

    pub(crate) flags: EffectFlags,
    pub(crate) subtree_flags: EffectFlags,
    pub(crate) deletions: SmallVec<[NodeId; 2]>,

    /// Lanes of updates targeting this node.
    pub(crate) lanes: Lanes,
    /// Union of lanes pending anywhere below this node.
    pub(crate) child_lanes: Lanes,

    pub(crate) alternate: Option<NodeId>,
    pub(crate) node_ref: Option<NodeRef>,
}

impl<H: HostConfig> WorkNode<H> {
    pub(crate) fn new(kind: NodeKind, pending_props: NodeProps, key: Option<Key>) -> Self {
        Self {
            kind,
            key,
            ty: None,
            instance: None,
            root: None,
            parent: None,
            child: None,
            sibling: None,
            index: 0,
            pending_props,
            memoized_props: NodeProps::None,
            root_queue: None,
            root_state: None,
            hooks: Vec::new(),
            effects: Vec::new(),
            update_payload: None,
            flags: EffectFlags::empty(),
            subtree_flags: EffectFlags::empty(),
            deletions: SmallVec::new(),
            lanes: Lanes::NONE,
            child_lanes: Lanes::NONE,
            alternate: None,
            node_ref: None,
        }
    }

    /// Display name used in logs and diagnostics.
    pub(crate) fn name(&self) -> &str {
        match (&self.ty, self.kind) {
            (Some(ElementType::Host(kind)), _) => kind,
            (Some(ElementType::Component(component)), _) => component.name(),
            (None, NodeKind::HostRoot) => "root",
            (None, NodeKind::HostText) => "#text",
            (None, _) => "?",
        }
    }

    /// `true` for nodes that own a host instance.
    pub(crate) fn is_host(&self) -> bool {
        matches!(self.kind, NodeKind::HostComponent | NodeKind::HostText)
    }
}

impl<H: HostConfig> fmt::Debug for WorkNode<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkNode")
            .field("kind", &self.kind)
            .field("name", &self.name())
            .field("key", &self.key)
            .field("flags", &self.flags)
            .field("lanes", &self.lanes)
            .field("child_lanes", &self.child_lanes)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_cover_their_phases() {
        assert!(EffectFlags::MUTATION_MASK.contains(EffectFlags::PLACEMENT));
        assert!(EffectFlags::LAYOUT_MASK.contains(EffectFlags::REF));
        assert!(!EffectFlags::LAYOUT_MASK.contains(EffectFlags::PASSIVE));
        assert!(EffectFlags::PASSIVE_MASK.contains(EffectFlags::CHILD_DELETION));
    }

    #[test]
    fn text_props_compare_by_value_and_element_props_by_identity() {
        let a = NodeProps::Text("x".into());
        assert!(a.same(&NodeProps::Text("x".into())));

        let props = Props::default();
        let same = NodeProps::Element(props.clone());
        assert!(same.same(&NodeProps::Element(props)));
        assert!(!same.same(&NodeProps::Element(Props::default())));
    }
}
