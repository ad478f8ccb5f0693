//! Update Inbox
//!
//! Dispatchers live outside the reconciler (in event handlers, effects,
//! or embedder code) and cannot borrow it. They push type-erased
//! [`QueuedUpdate`]s into a shared [`UpdateInbox`]; the reconciler drains it
//! at its next entry point, runs the eager bail-out check, marks lanes and
//! schedules work.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::lane::Lanes;
use crate::tree::NodeId;

/// A requested update waiting to be attached to its queue.
pub(crate) trait QueuedUpdate: Send {
    /// Node whose state the update targets.
    fn target(&self) -> NodeId;

    fn lane(&self) -> Lanes;

    /// Compute the update eagerly. Returns `true` when it would not change
    /// the state and can be dropped.
    fn try_eager_bailout(&mut self) -> bool;

    /// Append the update to its queue's pending list.
    fn enqueue(self: Box<Self>);
}

/// Shared buffer of requested updates.
#[derive(Clone, Default)]
pub(crate) struct UpdateInbox {
    queued: Arc<Mutex<Vec<Box<dyn QueuedUpdate>>>>,
}

impl UpdateInbox {
    pub(crate) fn push(&self, update: Box<dyn QueuedUpdate>) {
        self.queued.lock().push(update);
    }

    /// Take everything queued so far, oldest first.
    pub(crate) fn drain(&self) -> Vec<Box<dyn QueuedUpdate>> {
        std::mem::take(&mut *self.queued.lock())
    }
}

impl std::fmt::Debug for UpdateInbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateInbox")
            .field("queued", &self.queued.lock().len())
            .finish()
    }
}
