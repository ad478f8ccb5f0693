//! Root Update Queue
//!
//! The queue behind a root's state. Payloads are either a value, shallow
//! merged into the previous state through [`Mergeable`], or a function of
//! the previous state.
//!
//! The pending list is shared between the two buffers of the owning node.
//! [`UpdateQueue::process`] splices it onto both buffers' base lists before
//! walking, so a render that is thrown away never loses an update.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::inbox::QueuedUpdate;
use super::{merge_updates, LaneTagged};
use crate::lane::Lanes;
use crate::tree::NodeId;

/// State that knows how to absorb a value payload.
pub trait Mergeable: Clone {
    /// Combine the previous state with a value payload.
    fn merge(&self, patch: &Self) -> Self;
}

impl Mergeable for String {
    fn merge(&self, patch: &Self) -> Self {
        patch.clone()
    }
}

impl Mergeable for serde_json::Value {
    /// Objects are merged key by key (one level deep); anything else is
    /// replaced.
    fn merge(&self, patch: &Self) -> Self {
        match (self, patch) {
            (serde_json::Value::Object(prev), serde_json::Value::Object(next)) => {
                let mut merged = prev.clone();
                for (key, value) in next {
                    merged.insert(key.clone(), value.clone());
                }
                serde_json::Value::Object(merged)
            }
            _ => patch.clone(),
        }
    }
}

/// What an update does to the state.
pub enum Payload<S> {
    /// Merge this value into the previous state.
    Patch(S),
    /// Compute the next state from the previous one.
    Reduce(Arc<dyn Fn(&S) -> S + Send + Sync>),
}

impl<S: Clone> Clone for Payload<S> {
    fn clone(&self) -> Self {
        match self {
            Payload::Patch(value) => Payload::Patch(value.clone()),
            Payload::Reduce(f) => Payload::Reduce(Arc::clone(f)),
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for Payload<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Patch(value) => f.debug_tuple("Patch").field(value).finish(),
            Payload::Reduce(_) => f.write_str("Reduce(..)"),
        }
    }
}

/// A lane-tagged state change.
#[derive(Debug)]
pub struct Update<S> {
    lane: Lanes,
    payload: Payload<S>,
}

impl<S: Clone> Clone for Update<S> {
    fn clone(&self) -> Self {
        Self {
            lane: self.lane,
            payload: self.payload.clone(),
        }
    }
}

impl<S> Update<S> {
    /// An update that merges `value` into the state.
    pub fn patch(lane: Lanes, value: S) -> Self {
        Self {
            lane,
            payload: Payload::Patch(value),
        }
    }

    /// An update that maps the previous state to the next one.
    pub fn reduce(lane: Lanes, f: impl Fn(&S) -> S + Send + Sync + 'static) -> Self {
        Self {
            lane,
            payload: Payload::Reduce(Arc::new(f)),
        }
    }

    pub fn payload(&self) -> &Payload<S> {
        &self.payload
    }
}

impl<S: Mergeable> Update<S> {
    /// Apply this update on top of `prev`.
    pub fn apply(&self, prev: &S) -> S {
        match &self.payload {
            Payload::Patch(value) => prev.merge(value),
            Payload::Reduce(f) => f(prev),
        }
    }
}

impl<S: Clone> LaneTagged for Update<S> {
    fn lane(&self) -> Lanes {
        self.lane
    }

    fn with_lane(&self, lane: Lanes) -> Self {
        Self {
            lane,
            payload: self.payload.clone(),
        }
    }
}

/// Pending updates shared by both buffers of a node.
pub struct SharedQueue<S> {
    pending: Arc<Mutex<Vec<Update<S>>>>,
}

impl<S> SharedQueue<S> {
    fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Append an update at the tail.
    pub fn push(&self, update: Update<S>) {
        self.pending.lock().push(update);
    }

    /// Remove and return every pending update, oldest first.
    pub fn take(&self) -> Vec<Update<S>> {
        std::mem::take(&mut *self.pending.lock())
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<S> Clone for SharedQueue<S> {
    fn clone(&self) -> Self {
        Self {
            pending: Arc::clone(&self.pending),
        }
    }
}

impl<S> fmt::Debug for SharedQueue<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedQueue")
            .field("pending", &self.len())
            .finish()
    }
}

/// Result of [`UpdateQueue::process`].
#[derive(Debug, Clone)]
pub struct Processed<S> {
    /// The realized state for this render.
    pub state: S,
    /// Lanes of updates that were deferred.
    pub residual_lanes: Lanes,
}

/// One buffer's view of a root-state queue.
///
/// Cloning keeps the pending list shared; the base list and base state are
/// copied, which is how the work-in-progress buffer forks from current.
#[derive(Debug)]
pub struct UpdateQueue<S> {
    base_state: S,
    base_updates: Vec<Update<S>>,
    shared: SharedQueue<S>,
}

impl<S: Clone> Clone for UpdateQueue<S> {
    fn clone(&self) -> Self {
        Self {
            base_state: self.base_state.clone(),
            base_updates: self.base_updates.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<S: Mergeable> UpdateQueue<S> {
    /// Create a queue whose state starts at `base_state`.
    pub fn new(base_state: S) -> Self {
        Self {
            base_state,
            base_updates: Vec::new(),
            shared: SharedQueue::new(),
        }
    }

    pub fn base_state(&self) -> &S {
        &self.base_state
    }

    /// Updates carried over from earlier renders.
    pub fn base_updates(&self) -> &[Update<S>] {
        &self.base_updates
    }

    pub fn shared(&self) -> &SharedQueue<S> {
        &self.shared
    }

    /// Append an update to the shared pending list.
    pub fn enqueue(&self, update: Update<S>) {
        self.shared.push(update);
    }

    /// Splice pending updates into the base list and realize the state for
    /// `render_lanes`.
    ///
    /// `current` is the other buffer's queue. It receives the pending updates
    /// as well so they survive if this render is discarded.
    pub fn process(
        &mut self,
        render_lanes: Lanes,
        current: Option<&mut UpdateQueue<S>>,
    ) -> Processed<S> {
        let pending = self.shared.take();
        if !pending.is_empty() {
            if let Some(current) = current {
                current.base_updates.extend(pending.iter().cloned());
            }
            self.base_updates.extend(pending);
        }

        let merged = merge_updates(&self.base_state, &self.base_updates, render_lanes, |state, update| {
            update.apply(state)
        });
        trace!(
            applied = self.base_updates.len() - merged.carried.len(),
            carried = merged.carried.len(),
            residual = ?merged.skipped_lanes,
            "processed update queue"
        );

        self.base_state = merged.base_state;
        self.base_updates = merged.carried;
        Processed {
            state: merged.state,
            residual_lanes: merged.skipped_lanes,
        }
    }
}

/// A queue update travelling through the inbox to the node that owns the
/// queue.
pub(crate) struct QueuedQueueUpdate<S> {
    target: NodeId,
    shared: SharedQueue<S>,
    update: Update<S>,
}

impl<S> QueuedQueueUpdate<S> {
    pub(crate) fn new(target: NodeId, shared: SharedQueue<S>, update: Update<S>) -> Self {
        Self {
            target,
            shared,
            update,
        }
    }
}

impl<S: Send + 'static> QueuedUpdate for QueuedQueueUpdate<S> {
    fn target(&self) -> NodeId {
        self.target
    }

    fn lane(&self) -> Lanes {
        self.update.lane
    }

    fn try_eager_bailout(&mut self) -> bool {
        false
    }

    fn enqueue(self: Box<Self>) {
        let this = *self;
        this.shared.push(this.update);
    }
}
