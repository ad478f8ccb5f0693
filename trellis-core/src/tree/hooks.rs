//! Stateful Slots
//!
//! Function components keep state in an ordered list of slots, one per hook
//! call. A render runs with one of two strategies:
//!
//! - [`HookStrategy::Mount`] creates fresh slots.
//! - [`HookStrategy::Update`] walks the slots of the current buffer in call
//!   order and derives new ones from them.
//!
//! The strategy is chosen once per render from whether the node has a
//! current buffer with slots. A component that changes the number or kind of
//! its hook calls between renders is reported as an [`Invariant`] and the
//! offending slot is rebuilt as if mounting.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use parking_lot::Mutex;
use serde_json::Value;

use super::node::{EffectFlags, NodeId};
use crate::error::Invariant;
use crate::lane::{Lanes, PriorityContext};
use crate::queue::hook::SharedHookQueue;
use crate::queue::inbox::UpdateInbox;
use crate::queue::{basic_state_reducer, merge_updates, Dispatch, HookQueue, HookUpdate, Reducer, StateAction};

bitflags! {
    /// Classification of an effect record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct HookFlags: u8 {
        /// The effect must run at this commit.
        const HAS_EFFECT = 1 << 0;
        /// Runs synchronously after mutation.
        const LAYOUT = 1 << 1;
        /// Runs after the commit, in a separate task.
        const PASSIVE = 1 << 2;
    }
}

/// Cleanup returned by an effect.
pub type Destroy = Box<dyn FnOnce() + Send>;

/// Dependency list of an effect. `None` re-runs the effect on every render.
pub type Deps = Option<Vec<Value>>;

type EffectCreate = Box<dyn FnOnce() -> Option<Destroy> + Send>;
pub(crate) type DestroyCell = Arc<Mutex<Option<Destroy>>>;

/// How a render treats stateful slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStrategy {
    Mount,
    Update,
}

/// An effect produced by a render.
pub(crate) struct EffectRecord {
    pub(crate) tag: HookFlags,
    create: Option<EffectCreate>,
    destroy: DestroyCell,
}

impl EffectRecord {
    /// Same record without its create function. Used when a buffer is
    /// forked: the cleanup cell is shared, the effect does not run again.
    pub(crate) fn inert_copy(&self) -> Self {
        Self {
            tag: self.tag,
            create: None,
            destroy: Arc::clone(&self.destroy),
        }
    }

    /// `true` when this record must fire for a commit in `phase`.
    pub(crate) fn fires_in(&self, phase: HookFlags) -> bool {
        self.create.is_some() && self.tag.contains(HookFlags::HAS_EFFECT | phase)
    }

    /// Take the cleanup out of its cell.
    pub(crate) fn take_destroy(&self) -> Option<Destroy> {
        self.destroy.lock().take()
    }

    /// Run the create function and store whatever cleanup it returns.
    pub(crate) fn run_create(&mut self) {
        if let Some(create) = self.create.take() {
            let destroy = create();
            *self.destroy.lock() = destroy;
        }
    }
}

impl fmt::Debug for EffectRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectRecord")
            .field("tag", &self.tag)
            .field("armed", &self.create.is_some())
            .finish()
    }
}

/// Handle to a mutable value that survives re-renders.
pub struct RefHandle<T> {
    cell: Arc<Mutex<T>>,
}

impl<T> Clone for RefHandle<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T: Clone> RefHandle<T> {
    pub fn get(&self) -> T {
        self.cell.lock().clone()
    }
}

impl<T> RefHandle<T> {
    pub fn set(&self, value: T) {
        *self.cell.lock() = value;
    }

    /// Run `f` with mutable access to the value.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.cell.lock())
    }
}

impl<T: fmt::Debug> fmt::Debug for RefHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RefHandle").field(&*self.cell.lock()).finish()
    }
}

pub(crate) trait StateSlot: Send + Sync {
    fn clone_box(&self) -> Box<dyn StateSlot>;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

struct ReducerSlot<S, A> {
    base_state: S,
    base_queue: Vec<HookUpdate<S, A>>,
    queue: SharedHookQueue<S, A>,
}

impl<S, A> StateSlot for ReducerSlot<S, A>
where
    S: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
{
    fn clone_box(&self) -> Box<dyn StateSlot> {
        Box::new(ReducerSlot {
            base_state: self.base_state.clone(),
            base_queue: self.base_queue.clone(),
            queue: Arc::clone(&self.queue),
        })
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Clone)]
pub(crate) struct EffectSlot {
    tag: HookFlags,
    deps: Deps,
    destroy: DestroyCell,
}

/// One stateful slot.
pub(crate) enum HookSlot {
    State(Box<dyn StateSlot>),
    Effect(EffectSlot),
    Ref(Arc<dyn Any + Send + Sync>),
}

impl HookSlot {
    fn kind(&self) -> &'static str {
        match self {
            HookSlot::State(_) => "state",
            HookSlot::Effect(_) => "effect",
            HookSlot::Ref(_) => "ref",
        }
    }
}

impl Clone for HookSlot {
    fn clone(&self) -> Self {
        match self {
            HookSlot::State(slot) => HookSlot::State(slot.clone_box()),
            HookSlot::Effect(slot) => HookSlot::Effect(slot.clone()),
            HookSlot::Ref(cell) => HookSlot::Ref(Arc::clone(cell)),
        }
    }
}

impl fmt::Debug for HookSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// What a component render left behind.
pub(crate) struct HookOutput {
    pub(crate) slots: Vec<HookSlot>,
    pub(crate) effects: Vec<EffectRecord>,
    pub(crate) flags: EffectFlags,
    /// Lanes of state updates skipped by this render.
    pub(crate) residual_lanes: Lanes,
    pub(crate) violations: Vec<Invariant>,
}

/// The hook API handed to a component's render function.
pub struct Hooks<'a> {
    strategy: HookStrategy,
    node: NodeId,
    component: &'a str,
    render_lanes: Lanes,
    /// Slots of the current buffer. Empty when mounting.
    current: &'a mut [HookSlot],
    slots: Vec<HookSlot>,
    effects: Vec<EffectRecord>,
    flags: EffectFlags,
    residual_lanes: Lanes,
    inbox: &'a UpdateInbox,
    priority: &'a PriorityContext,
    violations: Vec<Invariant>,
}

impl<'a> Hooks<'a> {
    pub(crate) fn new(
        strategy: HookStrategy,
        node: NodeId,
        component: &'a str,
        render_lanes: Lanes,
        current: &'a mut [HookSlot],
        inbox: &'a UpdateInbox,
        priority: &'a PriorityContext,
    ) -> Self {
        Self {
            strategy,
            node,
            component,
            render_lanes,
            current,
            slots: Vec::new(),
            effects: Vec::new(),
            flags: EffectFlags::empty(),
            residual_lanes: Lanes::NONE,
            inbox,
            priority,
            violations: Vec::new(),
        }
    }

    pub fn strategy(&self) -> HookStrategy {
        self.strategy
    }

    /// Lanes the current render is working on.
    pub fn render_lanes(&self) -> Lanes {
        self.render_lanes
    }

    /// The update-priority context, for `start_transition` and friends.
    pub fn priority(&self) -> &PriorityContext {
        self.priority
    }

    /// A state slot updated by replacing or deriving the value.
    pub fn use_state<S>(&mut self, initial: S) -> (S, Dispatch<S, StateAction<S>>)
    where
        S: Clone + PartialEq + Send + Sync + 'static,
    {
        self.reducer_slot(Arc::new(basic_state_reducer::<S>), initial)
    }

    /// A state slot updated through `reducer`.
    pub fn use_reducer<S, A>(
        &mut self,
        reducer: impl Fn(&S, &A) -> S + Send + Sync + 'static,
        initial: S,
    ) -> (S, Dispatch<S, A>)
    where
        S: Clone + PartialEq + Send + Sync + 'static,
        A: Clone + Send + Sync + 'static,
    {
        self.reducer_slot(Arc::new(reducer), initial)
    }

    /// An effect run after the commit has been painted.
    pub fn use_effect(&mut self, deps: Deps, create: impl FnOnce() -> Option<Destroy> + Send + 'static) {
        self.effect_slot(EffectFlags::PASSIVE, HookFlags::PASSIVE, deps, Box::new(create));
    }

    /// An effect run synchronously right after mutation.
    pub fn use_layout_effect(
        &mut self,
        deps: Deps,
        create: impl FnOnce() -> Option<Destroy> + Send + 'static,
    ) {
        self.effect_slot(EffectFlags::UPDATE, HookFlags::LAYOUT, deps, Box::new(create));
    }

    /// A mutable cell that keeps its identity across renders.
    pub fn use_ref<T: Send + 'static>(&mut self, initial: impl FnOnce() -> T) -> RefHandle<T> {
        let index = self.slots.len();
        let existing = match self.current.get(index) {
            Some(HookSlot::Ref(cell)) => Arc::clone(cell).downcast::<Mutex<T>>().ok(),
            _ => None,
        };
        let cell = match existing {
            Some(cell) => cell,
            None => {
                self.note_kind_mismatch(index);
                Arc::new(Mutex::new(initial()))
            }
        };
        self.slots.push(HookSlot::Ref(cell.clone() as Arc<dyn Any + Send + Sync>));
        RefHandle { cell }
    }

    fn reducer_slot<S, A>(&mut self, reducer: Reducer<S, A>, initial: S) -> (S, Dispatch<S, A>)
    where
        S: Clone + PartialEq + Send + Sync + 'static,
        A: Clone + Send + Sync + 'static,
    {
        let index = self.slots.len();
        let previous = match self.current.get_mut(index) {
            Some(HookSlot::State(slot)) => slot.as_any_mut().downcast_mut::<ReducerSlot<S, A>>(),
            _ => None,
        };

        let (state, slot) = match previous {
            Some(previous) => {
                let queue = Arc::clone(&previous.queue);
                let pending = queue.lock().take_pending();
                // Pending updates move onto the current buffer's base list so
                // a discarded render does not lose them.
                previous.base_queue.extend(pending);

                let merged = merge_updates(
                    &previous.base_state,
                    &previous.base_queue,
                    self.render_lanes,
                    |state, update| update.apply(state, &reducer),
                );
                self.residual_lanes |= merged.skipped_lanes;
                queue.lock().rendered(Arc::clone(&reducer), merged.state.clone());
                (
                    merged.state,
                    ReducerSlot {
                        base_state: merged.base_state,
                        base_queue: merged.carried,
                        queue,
                    },
                )
            }
            None => {
                self.note_kind_mismatch(index);
                let queue = Arc::new(Mutex::new(HookQueue::new(self.node, reducer, initial.clone())));
                (
                    initial.clone(),
                    ReducerSlot {
                        base_state: initial,
                        base_queue: Vec::new(),
                        queue,
                    },
                )
            }
        };

        let dispatch = Dispatch::new(Arc::clone(&slot.queue), self.inbox.clone(), self.priority.clone());
        self.slots.push(HookSlot::State(Box::new(slot)));
        (state, dispatch)
    }

    fn effect_slot(&mut self, node_flags: EffectFlags, tag: HookFlags, deps: Deps, create: EffectCreate) {
        let index = self.slots.len();
        let previous = match self.current.get(index) {
            Some(HookSlot::Effect(slot)) if slot.tag == tag => Some(slot),
            _ => None,
        };

        let (destroy, unchanged) = match previous {
            Some(previous) => (
                Arc::clone(&previous.destroy),
                deps.is_some() && previous.deps == deps,
            ),
            None => {
                self.note_kind_mismatch(index);
                (Arc::new(Mutex::new(None)), false)
            }
        };

        if unchanged {
            self.effects.push(EffectRecord {
                tag,
                create: None,
                destroy: Arc::clone(&destroy),
            });
        } else {
            self.flags |= node_flags;
            self.effects.push(EffectRecord {
                tag: tag | HookFlags::HAS_EFFECT,
                create: Some(create),
                destroy: Arc::clone(&destroy),
            });
        }
        self.slots.push(HookSlot::Effect(EffectSlot { tag, deps, destroy }));
    }

    /// Called when the slot at `index` had to be created from scratch. Only
    /// a problem when updating and the current buffer had a slot there.
    fn note_kind_mismatch(&mut self, index: usize) {
        if self.strategy == HookStrategy::Update && index < self.current.len() {
            self.violations.push(Invariant::SlotKindMismatch {
                component: self.component.to_owned(),
                index,
            });
        }
    }

    pub(crate) fn finish(mut self) -> HookOutput {
        if self.strategy == HookStrategy::Update && self.slots.len() != self.current.len() {
            self.violations.push(Invariant::SlotCountMismatch {
                component: self.component.to_owned(),
                expected: self.current.len(),
                found: self.slots.len(),
            });
        }
        HookOutput {
            slots: self.slots,
            effects: self.effects,
            flags: self.flags,
            residual_lanes: self.residual_lanes,
            violations: self.violations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::inbox::QueuedUpdate;
    use serde_json::json;

    struct Harness {
        inbox: UpdateInbox,
        priority: PriorityContext,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                inbox: UpdateInbox::default(),
                priority: PriorityContext::new(),
            }
        }

        fn render(
            &self,
            current: &mut [HookSlot],
            body: impl FnOnce(&mut Hooks<'_>),
        ) -> HookOutput {
            let strategy = if current.is_empty() {
                HookStrategy::Mount
            } else {
                HookStrategy::Update
            };
            let mut hooks = Hooks::new(
                strategy,
                NodeId::from_raw_parts(0, 0),
                "Test",
                Lanes::DEFAULT,
                current,
                &self.inbox,
                &self.priority,
            );
            body(&mut hooks);
            hooks.finish()
        }
    }

    #[test]
    fn state_survives_between_renders() {
        let harness = Harness::new();
        let mut first = harness.render(&mut [], |hooks| {
            let (count, set) = hooks.use_state(1);
            assert_eq!(count, 1);
            set.set(5);
        });

        // Deliver the queued update straight to its slot.
        for update in harness.inbox.drain() {
            update.enqueue();
        }

        let second = harness.render(&mut first.slots, |hooks| {
            let (count, _) = hooks.use_state(1);
            assert_eq!(count, 5);
        });
        assert!(second.violations.is_empty());
    }

    #[test]
    fn effects_with_equal_deps_are_not_rearmed() {
        let harness = Harness::new();
        let mut first = harness.render(&mut [], |hooks| {
            hooks.use_effect(Some(vec![json!(1)]), || None);
        });
        assert!(first.flags.contains(EffectFlags::PASSIVE));
        assert!(first.effects[0].fires_in(HookFlags::PASSIVE));

        let same = harness.render(&mut first.slots, |hooks| {
            hooks.use_effect(Some(vec![json!(1)]), || None);
        });
        assert!(same.flags.is_empty());
        assert!(!same.effects[0].fires_in(HookFlags::PASSIVE));

        let changed = harness.render(&mut first.slots, |hooks| {
            hooks.use_effect(Some(vec![json!(2)]), || None);
        });
        assert!(changed.effects[0].fires_in(HookFlags::PASSIVE));
    }

    #[test]
    fn changing_hook_order_is_reported() {
        let harness = Harness::new();
        let mut first = harness.render(&mut [], |hooks| {
            hooks.use_state(0u8);
            hooks.use_ref(|| 0u8);
        });

        let second = harness.render(&mut first.slots, |hooks| {
            hooks.use_ref(|| 0u8);
        });
        assert!(second
            .violations
            .iter()
            .any(|v| matches!(v, Invariant::SlotKindMismatch { index: 0, .. })));
        assert!(second
            .violations
            .iter()
            .any(|v| matches!(v, Invariant::SlotCountMismatch { expected: 2, found: 1, .. })));
    }

    #[test]
    fn refs_keep_identity() {
        let harness = Harness::new();
        let mut first = harness.render(&mut [], |hooks| {
            hooks.use_ref(|| 1u32).set(9);
        });
        harness.render(&mut first.slots, |hooks| {
            assert_eq!(hooks.use_ref(|| 1u32).get(), 9);
        });
    }
}
