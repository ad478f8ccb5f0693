//! Roots
//!
//! A root ties a host container to a tree of work nodes and owns the lane
//! bookkeeping for that tree.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::host::HostConfig;
use crate::lane::{Lanes, RootLanes};
use crate::queue::Mergeable;
use crate::scheduler::TaskHandle;
use crate::tree::{Element, NodeId};

/// Handle to a root created with
/// [`Reconciler::create_container`](super::Reconciler::create_container).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RootId(u32);

impl RootId {
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for RootId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "root#{}", self.0)
    }
}

/// State held by the root node: the element rendered into the container.
#[derive(Debug, Clone, Default)]
pub struct RootState {
    pub element: Element,
}

impl Mergeable for RootState {
    fn merge(&self, patch: &Self) -> Self {
        patch.clone()
    }
}

pub(crate) struct Root<H: HostConfig> {
    pub(crate) container: H::Instance,
    /// Root node of the committed tree.
    pub(crate) current: NodeId,
    pub(crate) lanes: RootLanes,
    /// Scheduled render task, if any. Sync work has no task; it sits in the
    /// sync queue instead.
    pub(crate) callback: Option<TaskHandle>,
    /// Lane the scheduled work was planned for.
    pub(crate) callback_priority: Lanes,
    /// A passive-effect flush task is queued for this root.
    pub(crate) passive_scheduled: bool,
}

impl<H: HostConfig> Root<H> {
    pub(crate) fn new(container: H::Instance, current: NodeId) -> Self {
        Self {
            container,
            current,
            lanes: RootLanes::new(),
            callback: None,
            callback_priority: Lanes::NONE,
            passive_scheduled: false,
        }
    }
}

/// Snapshot of a root's lane bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootLaneSnapshot {
    pub pending: Lanes,
    pub expired: Lanes,
    /// Lane of the work currently planned for this root.
    pub callback_priority: Lanes,
}

/// Where the render phase currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No render is underway.
    Idle,
    /// A render was started and yielded before finishing.
    InProgress { root: RootId, lanes: Lanes },
}
