//! Event Priorities
//!
//! Coarse priority classes sit between lanes and the task scheduler. The
//! input layer reports one of four event priorities, updates are tagged with
//! the matching lane, and a pending lane set is mapped back to an event
//! priority to pick a scheduler priority.
//!
//! [`PriorityContext`] is the update-priority context: an explicit override
//! (set around commits, transitions, or any caller-chosen scope), then the
//! priority of the event currently being dispatched, then the default lane.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use super::{next_retry_lane, next_transition_lane, Lanes};
use crate::scheduler::SchedulerPriority;

/// Priority class of the input event that triggered an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventPriority {
    /// Discrete input such as a click or key press.
    Discrete,
    /// Continuous input such as a drag or scroll.
    Continuous,
    /// Everything without a more specific class.
    Default,
    /// Background work.
    Idle,
}

impl EventPriority {
    /// The lane updates of this class are tagged with.
    pub fn lane(self) -> Lanes {
        match self {
            EventPriority::Discrete => Lanes::SYNC,
            EventPriority::Continuous => Lanes::INPUT_CONTINUOUS,
            EventPriority::Default => Lanes::DEFAULT,
            EventPriority::Idle => Lanes::IDLE,
        }
    }

    /// Scheduler priority used for callbacks rendering this class of work.
    pub fn scheduler_priority(self) -> SchedulerPriority {
        match self {
            EventPriority::Discrete => SchedulerPriority::Immediate,
            EventPriority::Continuous => SchedulerPriority::UserBlocking,
            EventPriority::Default => SchedulerPriority::Normal,
            EventPriority::Idle => SchedulerPriority::Idle,
        }
    }

    fn from_lane(lane: Lanes) -> Option<Self> {
        [
            EventPriority::Discrete,
            EventPriority::Continuous,
            EventPriority::Default,
            EventPriority::Idle,
        ]
        .into_iter()
        .find(|priority| priority.lane() == lane)
    }
}

/// `true` when `priority`'s lane is strictly more urgent than `lane`.
fn is_higher_event_priority(priority: EventPriority, lane: Lanes) -> bool {
    !lane.is_empty() && priority.lane() < lane
}

/// Classify a lane set by its most urgent lane.
pub fn lanes_to_event_priority(lanes: Lanes) -> EventPriority {
    let lane = lanes.highest_priority_lane();
    if !is_higher_event_priority(EventPriority::Discrete, lane) {
        return EventPriority::Discrete;
    }
    if !is_higher_event_priority(EventPriority::Continuous, lane) {
        return EventPriority::Continuous;
    }
    if lane.intersects(Lanes::NON_IDLE) {
        return EventPriority::Default;
    }
    EventPriority::Idle
}

#[derive(Debug)]
struct PriorityCells {
    /// Explicit override; zero when unset.
    update: AtomicU32,
    /// Lane of the event being dispatched; zero outside of events.
    event: AtomicU32,
    next_transition: AtomicU32,
    next_retry: AtomicU32,
}

/// Shared update-priority context.
///
/// Cloning is cheap and every clone observes the same priorities, so state
/// dispatchers captured by components see the scope they are called in.
#[derive(Debug, Clone)]
pub struct PriorityContext {
    cells: Arc<PriorityCells>,
}

impl PriorityContext {
    /// Create a context with no override and no active event.
    pub fn new() -> Self {
        Self {
            cells: Arc::new(PriorityCells {
                update: AtomicU32::new(0),
                event: AtomicU32::new(0),
                next_transition: AtomicU32::new(Lanes::TRANSITION_1.bits()),
                next_retry: AtomicU32::new(Lanes::RETRY_1.bits()),
            }),
        }
    }

    /// The explicit update-priority override, or an empty set when unset.
    pub fn current_update_priority(&self) -> Lanes {
        Lanes::from_bits_retain(self.cells.update.load(Ordering::Relaxed))
    }

    /// Replace the override and return the previous one.
    pub fn set_update_priority(&self, lane: Lanes) -> Lanes {
        Lanes::from_bits_retain(self.cells.update.swap(lane.bits(), Ordering::Relaxed))
    }

    /// Run `f` with `lane` as the explicit override, restoring the previous
    /// override afterwards.
    pub fn with_update_priority<R>(&self, lane: Lanes, f: impl FnOnce() -> R) -> R {
        let previous = self.set_update_priority(lane);
        let result = f();
        self.set_update_priority(previous);
        result
    }

    /// Run `f` as the handler of an input event of the given class.
    pub fn with_event_priority<R>(&self, priority: EventPriority, f: impl FnOnce() -> R) -> R {
        let previous = self
            .cells
            .event
            .swap(priority.lane().bits(), Ordering::Relaxed);
        let result = f();
        self.cells.event.store(previous, Ordering::Relaxed);
        result
    }

    /// Priority of the event currently being dispatched, if any.
    pub fn current_event_priority(&self) -> Option<EventPriority> {
        let lane = Lanes::from_bits_retain(self.cells.event.load(Ordering::Relaxed));
        EventPriority::from_lane(lane)
    }

    /// Run `f` with updates tagged by a freshly claimed transition lane.
    pub fn start_transition<R>(&self, f: impl FnOnce() -> R) -> R {
        let lane = self.claim_next_transition_lane();
        self.with_update_priority(lane, f)
    }

    /// Lane for an update requested right now.
    pub fn request_update_lane(&self) -> Lanes {
        let update = self.current_update_priority();
        if !update.is_empty() {
            return update;
        }
        self.current_event_priority()
            .unwrap_or(EventPriority::Default)
            .lane()
    }

    /// Hand out the next transition lane, rotating through the class.
    pub fn claim_next_transition_lane(&self) -> Lanes {
        claim(&self.cells.next_transition, next_transition_lane)
    }

    /// Hand out the next retry lane, rotating through the class.
    pub fn claim_next_retry_lane(&self) -> Lanes {
        claim(&self.cells.next_retry, next_retry_lane)
    }
}

fn claim(cell: &AtomicU32, advance: fn(Lanes) -> Lanes) -> Lanes {
    let lane = Lanes::from_bits_retain(cell.load(Ordering::Relaxed));
    cell.store(advance(lane).bits(), Ordering::Relaxed);
    lane
}

impl Default for PriorityContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lanes_map_to_event_priorities() {
        assert_eq!(lanes_to_event_priority(Lanes::SYNC), EventPriority::Discrete);
        assert_eq!(
            lanes_to_event_priority(Lanes::INPUT_CONTINUOUS_HYDRATION),
            EventPriority::Continuous
        );
        assert_eq!(
            lanes_to_event_priority(Lanes::INPUT_CONTINUOUS | Lanes::DEFAULT),
            EventPriority::Continuous
        );
        assert_eq!(lanes_to_event_priority(Lanes::TRANSITION_4), EventPriority::Default);
        assert_eq!(lanes_to_event_priority(Lanes::RETRY_2), EventPriority::Default);
        assert_eq!(lanes_to_event_priority(Lanes::IDLE), EventPriority::Idle);
    }

    #[test]
    fn scheduler_priorities_follow_event_classes() {
        assert_eq!(
            EventPriority::Discrete.scheduler_priority(),
            SchedulerPriority::Immediate
        );
        assert_eq!(
            EventPriority::Idle.scheduler_priority(),
            SchedulerPriority::Idle
        );
    }

    #[test]
    fn override_beats_event_beats_default() {
        let ctx = PriorityContext::new();
        assert_eq!(ctx.request_update_lane(), Lanes::DEFAULT);

        ctx.with_event_priority(EventPriority::Continuous, || {
            assert_eq!(ctx.request_update_lane(), Lanes::INPUT_CONTINUOUS);
            ctx.with_update_priority(Lanes::SYNC, || {
                assert_eq!(ctx.request_update_lane(), Lanes::SYNC);
            });
            assert_eq!(ctx.request_update_lane(), Lanes::INPUT_CONTINUOUS);
        });

        assert_eq!(ctx.current_event_priority(), None);
    }

    #[test]
    fn transitions_claim_rotating_lanes() {
        let ctx = PriorityContext::new();
        let first = ctx.start_transition(|| ctx.request_update_lane());
        let second = ctx.start_transition(|| ctx.request_update_lane());
        assert_eq!(first, Lanes::TRANSITION_1);
        assert_eq!(second, Lanes::TRANSITION_2);
        assert_eq!(ctx.current_update_priority(), Lanes::NONE);
    }
}
