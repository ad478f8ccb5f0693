//! Stateful Slot Queues
//!
//! Each `use_state` / `use_reducer` slot owns a [`HookQueue`] shared by both
//! buffers of its node and by every [`Dispatch`] handed to user code.
//!
//! # Eager bail-out
//!
//! When the owning node has no pending lanes, a dispatched action is reduced
//! immediately against the last rendered state. If the result equals that
//! state the update is dropped and nothing is scheduled. Otherwise the
//! computed value rides along on the update and the render-time walk reuses
//! it.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::inbox::{QueuedUpdate, UpdateInbox};
use super::LaneTagged;
use crate::lane::{Lanes, PriorityContext};
use crate::tree::NodeId;

/// Reducer driving a stateful slot.
pub type Reducer<S, A> = Arc<dyn Fn(&S, &A) -> S + Send + Sync>;

/// Action type of `use_state` slots.
pub enum StateAction<S> {
    /// Replace the state.
    Set(S),
    /// Compute the next state from the previous one.
    Update(Arc<dyn Fn(&S) -> S + Send + Sync>),
}

impl<S: Clone> Clone for StateAction<S> {
    fn clone(&self) -> Self {
        match self {
            StateAction::Set(value) => StateAction::Set(value.clone()),
            StateAction::Update(f) => StateAction::Update(Arc::clone(f)),
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for StateAction<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateAction::Set(value) => f.debug_tuple("Set").field(value).finish(),
            StateAction::Update(_) => f.write_str("Update(..)"),
        }
    }
}

/// The reducer behind `use_state`.
pub fn basic_state_reducer<S: Clone>(state: &S, action: &StateAction<S>) -> S {
    match action {
        StateAction::Set(value) => value.clone(),
        StateAction::Update(f) => f(state),
    }
}

/// A lane-tagged action on a stateful slot.
pub struct HookUpdate<S, A> {
    lane: Lanes,
    action: A,
    eager_state: Option<S>,
}

impl<S: Clone, A: Clone> Clone for HookUpdate<S, A> {
    fn clone(&self) -> Self {
        Self {
            lane: self.lane,
            action: self.action.clone(),
            eager_state: self.eager_state.clone(),
        }
    }
}

impl<S: fmt::Debug, A: fmt::Debug> fmt::Debug for HookUpdate<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookUpdate")
            .field("lane", &self.lane)
            .field("action", &self.action)
            .field("eager_state", &self.eager_state)
            .finish()
    }
}

impl<S, A> HookUpdate<S, A> {
    pub fn new(lane: Lanes, action: A) -> Self {
        Self {
            lane,
            action,
            eager_state: None,
        }
    }

    pub fn action(&self) -> &A {
        &self.action
    }

    /// State computed at dispatch time, if the eager path ran.
    pub fn eager_state(&self) -> Option<&S> {
        self.eager_state.as_ref()
    }

    /// Apply this update on top of `prev`, reusing the eager result when
    /// one is cached.
    pub fn apply(&self, prev: &S, reducer: &Reducer<S, A>) -> S
    where
        S: Clone,
    {
        match &self.eager_state {
            Some(eager) => eager.clone(),
            None => reducer(prev, &self.action),
        }
    }
}

impl<S: Clone, A: Clone> LaneTagged for HookUpdate<S, A> {
    fn lane(&self) -> Lanes {
        self.lane
    }

    fn with_lane(&self, lane: Lanes) -> Self {
        Self {
            lane,
            action: self.action.clone(),
            eager_state: self.eager_state.clone(),
        }
    }
}

/// Queue shared by both buffers of a stateful slot.
pub struct HookQueue<S, A> {
    node: NodeId,
    pending: Vec<HookUpdate<S, A>>,
    reducer: Reducer<S, A>,
    last_rendered_state: S,
}

impl<S, A> HookQueue<S, A> {
    pub(crate) fn new(node: NodeId, reducer: Reducer<S, A>, initial: S) -> Self {
        Self {
            node,
            pending: Vec::new(),
            reducer,
            last_rendered_state: initial,
        }
    }

    /// Node the slot belongs to.
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn last_rendered_state(&self) -> &S {
        &self.last_rendered_state
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn take_pending(&mut self) -> Vec<HookUpdate<S, A>> {
        std::mem::take(&mut self.pending)
    }

    /// Record what the latest render produced and with which reducer.
    pub(crate) fn rendered(&mut self, reducer: Reducer<S, A>, state: S) {
        self.reducer = reducer;
        self.last_rendered_state = state;
    }
}

pub(crate) type SharedHookQueue<S, A> = Arc<Mutex<HookQueue<S, A>>>;

/// Handle that requests updates on a stateful slot.
///
/// Dispatching never touches the tree directly: the action is tagged with a
/// lane from the [`PriorityContext`] and left in the reconciler's inbox.
pub struct Dispatch<S, A> {
    queue: SharedHookQueue<S, A>,
    inbox: UpdateInbox,
    priority: PriorityContext,
}

impl<S, A> Clone for Dispatch<S, A> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            inbox: self.inbox.clone(),
            priority: self.priority.clone(),
        }
    }
}

impl<S, A> fmt::Debug for Dispatch<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatch")
            .field("node", &self.queue.lock().node)
            .finish_non_exhaustive()
    }
}

impl<S, A> Dispatch<S, A>
where
    S: Clone + PartialEq + Send + 'static,
    A: Clone + Send + 'static,
{
    pub(crate) fn new(queue: SharedHookQueue<S, A>, inbox: UpdateInbox, priority: PriorityContext) -> Self {
        Self {
            queue,
            inbox,
            priority,
        }
    }

    /// Request `action` at the lane of the current priority context.
    pub fn dispatch(&self, action: A) {
        let lane = self.priority.request_update_lane();
        let node = self.queue.lock().node;
        self.inbox.push(Box::new(HookDispatch {
            node,
            queue: Arc::clone(&self.queue),
            update: HookUpdate::new(lane, action),
        }));
    }

    /// Node the slot belongs to.
    pub fn node(&self) -> NodeId {
        self.queue.lock().node
    }
}

impl<S> Dispatch<S, StateAction<S>>
where
    S: Clone + PartialEq + Send + 'static,
{
    /// Replace the state.
    pub fn set(&self, value: S) {
        self.dispatch(StateAction::Set(value));
    }

    /// Derive the next state from the previous one.
    pub fn update(&self, f: impl Fn(&S) -> S + Send + Sync + 'static) {
        self.dispatch(StateAction::Update(Arc::new(f)));
    }
}

struct HookDispatch<S, A> {
    node: NodeId,
    queue: SharedHookQueue<S, A>,
    update: HookUpdate<S, A>,
}

impl<S, A> QueuedUpdate for HookDispatch<S, A>
where
    S: Clone + PartialEq + Send + 'static,
    A: Send + 'static,
{
    fn target(&self) -> NodeId {
        self.node
    }

    fn lane(&self) -> Lanes {
        self.update.lane
    }

    fn try_eager_bailout(&mut self) -> bool {
        let queue = self.queue.lock();
        let eager = (queue.reducer)(&queue.last_rendered_state, &self.update.action);
        let unchanged = eager == queue.last_rendered_state;
        self.update.eager_state = Some(eager);
        unchanged
    }

    fn enqueue(self: Box<Self>) {
        let HookDispatch { queue, update, .. } = *self;
        queue.lock().pending.push(update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::merge_updates;

    fn counter_queue() -> SharedHookQueue<i32, StateAction<i32>> {
        Arc::new(Mutex::new(HookQueue::new(
            NodeId::from_raw_parts(0, 0),
            Arc::new(basic_state_reducer),
            1,
        )))
    }

    #[test]
    fn identity_update_bails_out_eagerly() {
        let queue = counter_queue();
        let mut queued = HookDispatch {
            node: NodeId::from_raw_parts(0, 0),
            queue: Arc::clone(&queue),
            update: HookUpdate::new(Lanes::DEFAULT, StateAction::Update(Arc::new(|n: &i32| *n))),
        };
        assert!(queued.try_eager_bailout());
    }

    #[test]
    fn eager_result_is_reused_by_the_walk() {
        let queue = counter_queue();
        let mut queued = HookDispatch {
            node: NodeId::from_raw_parts(0, 0),
            queue: Arc::clone(&queue),
            update: HookUpdate::new(Lanes::DEFAULT, StateAction::Set(7)),
        };
        assert!(!queued.try_eager_bailout());
        assert_eq!(queued.update.eager_state(), Some(&7));

        Box::new(queued).enqueue();
        let pending = queue.lock().take_pending();
        // A reducer that would give a different answer is not consulted.
        let reducer: Reducer<i32, StateAction<i32>> = Arc::new(|_, _| -1);
        let merged = merge_updates(&1, &pending, Lanes::DEFAULT, |s, u| u.apply(s, &reducer));
        assert_eq!(merged.state, 7);
    }

    #[test]
    fn dispatch_tags_updates_with_context_lane() {
        let inbox = UpdateInbox::default();
        let priority = PriorityContext::new();
        let dispatch = Dispatch::new(counter_queue(), inbox.clone(), priority.clone());

        dispatch.set(2);
        priority.with_update_priority(Lanes::SYNC, || dispatch.update(|n| n + 1));

        let lanes: Vec<_> = inbox.drain().iter().map(|u| u.lane()).collect();
        assert_eq!(lanes, vec![Lanes::DEFAULT, Lanes::SYNC]);
    }
}
