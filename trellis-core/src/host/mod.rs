//! Host Interface
//!
//! The reconciler never touches a rendering surface directly. Everything it
//! needs from one goes through [`HostConfig`]: creating instances, diffing
//! props into a patch during render, and applying structural changes and
//! patches during commit.
//!
//! Render-phase methods (`create_*`, `append_initial_child`,
//! `finalize_initial_children`, `diff_props`) may run for work that is later
//! thrown away, so they must not affect anything the user can observe.
//! Commit-phase methods run exactly once per committed change.
//!
//! [`MemoryHost`] is an in-memory implementation that records every call.

pub mod memory;

pub use memory::{HostOp, Journal, MemoryHost, MemoryNodeId, MemoryPatch};

use std::fmt;

use crate::tree::{Element, Props};

/// A rendering surface.
pub trait HostConfig {
    /// Handle to a node owned by the host. Root containers use the same
    /// type.
    type Instance: Clone + fmt::Debug + Send + Sync + 'static;

    /// A computed prop change, produced at render time and applied at
    /// commit time.
    type Patch: fmt::Debug;

    /// Create the instance of a host element.
    fn create_instance(&mut self, kind: &str, props: &Props) -> Self::Instance;

    /// Create a text instance.
    fn create_text_instance(&mut self, text: &str) -> Self::Instance;

    /// Attach a child to a parent that has not been inserted yet.
    fn append_initial_child(&mut self, parent: &Self::Instance, child: &Self::Instance) {
        self.append_child(parent, child);
    }

    /// Called once a new instance has all its initial children.
    fn finalize_initial_children(&mut self, _instance: &Self::Instance, _kind: &str, _props: &Props) {}

    /// Append `child` as the last child of `parent`, moving it if it is
    /// already attached somewhere.
    fn append_child(&mut self, parent: &Self::Instance, child: &Self::Instance);

    /// Insert `child` into `parent` right before `before`.
    fn insert_before(&mut self, parent: &Self::Instance, child: &Self::Instance, before: &Self::Instance);

    fn remove_child(&mut self, parent: &Self::Instance, child: &Self::Instance);

    /// Compute the change between two prop sets, or `None` when nothing the
    /// host cares about differs.
    fn diff_props(&self, instance: &Self::Instance, kind: &str, old: &Props, new: &Props) -> Option<Self::Patch>;

    fn apply_patch(&mut self, instance: &Self::Instance, kind: &str, patch: Self::Patch);

    fn commit_text_update(&mut self, instance: &Self::Instance, old: &str, new: &str);

    /// Clear the text content of an element that is switching to child
    /// nodes. Runs before any of the new children are placed, so patches
    /// never need to clear text themselves.
    fn reset_text_content(&mut self, instance: &Self::Instance);

    /// `true` when the host renders the element's children itself, as text
    /// content, so no child nodes are built for them.
    fn should_set_text_content(&self, _kind: &str, props: &Props) -> bool {
        matches!(props.children(), Element::Text(_))
    }
}
