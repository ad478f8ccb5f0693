//! Lane Model
//!
//! Lanes are the priority space of the reconciler. Every update is tagged
//! with exactly one lane; roots and nodes track *sets* of lanes to know what
//! work is still outstanding.
//!
//! # Ordering
//!
//! A lane is one bit of a 31-bit mask. Bit position is priority: bit 0 (the
//! sync lane) is the most urgent, bit 30 (offscreen) the least. Operations on
//! lane sets are pure bit arithmetic, which keeps batching and priority
//! comparisons O(1).
//!
//! # Starvation
//!
//! [`RootLanes`] keeps a per-lane expiration timestamp. Lanes that stay
//! pending past their deadline are moved into the expired set, and a render
//! over an expired lane refuses to time-slice.

pub mod priority;

pub use priority::{
    lanes_to_event_priority, EventPriority, PriorityContext,
};

use bitflags::bitflags;
use tracing::error;

use crate::config::ReconcilerConfig;
use crate::error::Invariant;
use crate::scheduler::Timestamp;

/// Number of lanes in a [`Lanes`] mask.
pub const TOTAL_LANES: usize = 31;

bitflags! {
    /// A set of lanes. A single lane is a set with exactly one bit.
    ///
    /// Lower bits are higher priority. The composite constants
    /// ([`Lanes::TRANSITIONS`], [`Lanes::RETRIES`], [`Lanes::NON_IDLE`])
    /// name whole lane classes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct Lanes: u32 {
        const SYNC = 1 << 0;

        const INPUT_CONTINUOUS_HYDRATION = 1 << 1;
        const INPUT_CONTINUOUS = 1 << 2;

        const DEFAULT_HYDRATION = 1 << 3;
        const DEFAULT = 1 << 4;

        const TRANSITION_HYDRATION = 1 << 5;
        const TRANSITION_1 = 1 << 6;
        const TRANSITION_2 = 1 << 7;
        const TRANSITION_3 = 1 << 8;
        const TRANSITION_4 = 1 << 9;
        const TRANSITION_5 = 1 << 10;
        const TRANSITION_6 = 1 << 11;
        const TRANSITION_7 = 1 << 12;
        const TRANSITION_8 = 1 << 13;
        const TRANSITION_9 = 1 << 14;
        const TRANSITION_10 = 1 << 15;
        const TRANSITION_11 = 1 << 16;
        const TRANSITION_12 = 1 << 17;
        const TRANSITION_13 = 1 << 18;
        const TRANSITION_14 = 1 << 19;
        const TRANSITION_15 = 1 << 20;
        const TRANSITION_16 = 1 << 21;

        const RETRY_1 = 1 << 22;
        const RETRY_2 = 1 << 23;
        const RETRY_3 = 1 << 24;
        const RETRY_4 = 1 << 25;
        const RETRY_5 = 1 << 26;

        const SELECTIVE_HYDRATION = 1 << 27;

        const IDLE_HYDRATION = 1 << 28;
        const IDLE = 1 << 29;

        const OFFSCREEN = 1 << 30;

        // Lane classes
        const TRANSITIONS = 0xFFFF << 6;
        const RETRIES = 0b1_1111 << 22;
        const NON_IDLE = (1 << 28) - 1;
        /// Lanes that render without time-slicing unless concurrent-by-default
        /// is configured.
        const BLOCKING = Self::INPUT_CONTINUOUS_HYDRATION.bits()
            | Self::INPUT_CONTINUOUS.bits()
            | Self::DEFAULT_HYDRATION.bits()
            | Self::DEFAULT.bits();
    }
}

impl Default for Lanes {
    fn default() -> Self {
        Self::NONE
    }
}

impl Lanes {
    /// The empty lane set.
    pub const NONE: Self = Self::empty();

    /// Isolate the highest-priority (lowest) bit of the set.
    pub fn highest_priority_lane(self) -> Lanes {
        Self::from_bits_retain(self.bits() & self.bits().wrapping_neg())
    }

    /// Bit index of the highest set bit. Only meaningful for non-empty sets.
    pub fn index(self) -> usize {
        31 - self.bits().leading_zeros() as usize
    }

    /// Iterate over the individual lanes of this set, most urgent first.
    pub fn iter_lanes(self) -> impl Iterator<Item = Lanes> {
        let mut rest = self.bits();
        std::iter::from_fn(move || {
            if rest == 0 {
                return None;
            }
            let bit = rest & rest.wrapping_neg();
            rest &= !bit;
            Some(Lanes::from_bits_retain(bit))
        })
    }
}

/// `true` when every lane of `subset` is also in `set`.
pub fn is_subset_of_lanes(set: Lanes, subset: Lanes) -> bool {
    set & subset == subset
}

/// Union of two lane sets.
pub fn merge_lanes(a: Lanes, b: Lanes) -> Lanes {
    a | b
}

/// `set` without any lane of `subset`.
pub fn remove_lanes(set: Lanes, subset: Lanes) -> Lanes {
    set & !subset
}

/// Lanes present in both sets.
pub fn intersect_lanes(a: Lanes, b: Lanes) -> Lanes {
    a & b
}

/// `true` when the two sets share at least one lane.
pub fn includes_some_lane(a: Lanes, b: Lanes) -> bool {
    a.intersects(b)
}

/// Widen the most urgent lane of `lanes` to its whole lane class.
///
/// All transition lanes are selected together, as are all retry lanes, so a
/// single render batches every pending update of that class.
pub fn highest_priority_lanes(lanes: Lanes) -> Lanes {
    let lane = lanes.highest_priority_lane();
    if lane.is_empty() {
        return Lanes::NONE;
    }
    if Lanes::TRANSITIONS.contains(lane) {
        return lanes & Lanes::TRANSITIONS;
    }
    if Lanes::RETRIES.contains(lane) {
        return lanes & Lanes::RETRIES;
    }
    let singles = [
        Lanes::SYNC,
        Lanes::INPUT_CONTINUOUS_HYDRATION,
        Lanes::INPUT_CONTINUOUS,
        Lanes::DEFAULT_HYDRATION,
        Lanes::DEFAULT,
        Lanes::TRANSITION_HYDRATION,
        Lanes::SELECTIVE_HYDRATION,
        Lanes::IDLE_HYDRATION,
        Lanes::IDLE,
        Lanes::OFFSCREEN,
    ];
    if singles.contains(&lane) {
        return lane;
    }
    let violation = Invariant::UnmatchedLanes(lanes.bits());
    error!(%violation, "falling back to the raw lane set");
    lanes
}

/// `true` when `lanes` contains a lane that must render without yielding.
pub fn includes_blocking_lane(lanes: Lanes, config: &ReconcilerConfig) -> bool {
    if config.concurrent_by_default {
        return false;
    }
    lanes.intersects(Lanes::BLOCKING)
}

/// `true` when `lanes` contains only idle-class work.
pub fn includes_only_idle(lanes: Lanes) -> bool {
    !lanes.is_empty() && !lanes.intersects(Lanes::NON_IDLE)
}

/// Deadline for a lane that becomes pending at `now`, or `None` for lanes
/// that never expire.
pub fn compute_expiration_time(
    lane: Lanes,
    now: Timestamp,
    config: &ReconcilerConfig,
) -> Option<Timestamp> {
    let urgent = Lanes::SYNC | Lanes::INPUT_CONTINUOUS_HYDRATION | Lanes::INPUT_CONTINUOUS;
    let normal = Lanes::DEFAULT_HYDRATION
        | Lanes::DEFAULT
        | Lanes::TRANSITION_HYDRATION
        | Lanes::TRANSITIONS;

    if urgent.contains(lane) {
        Some(now.saturating_add(config.input_timeout_ms))
    } else if normal.contains(lane) {
        Some(now.saturating_add(config.default_timeout_ms))
    } else {
        None
    }
}

/// Rotate to the transition lane after `current`, wrapping at the end of
/// the class.
pub fn next_transition_lane(current: Lanes) -> Lanes {
    let next = Lanes::from_bits_retain(current.bits() << 1);
    if Lanes::TRANSITIONS.contains(next) && !next.is_empty() {
        next
    } else {
        Lanes::TRANSITION_1
    }
}

/// Rotate to the retry lane after `current`, wrapping at the end of the
/// class.
pub fn next_retry_lane(current: Lanes) -> Lanes {
    let next = Lanes::from_bits_retain(current.bits() << 1);
    if Lanes::RETRIES.contains(next) && !next.is_empty() {
        next
    } else {
        Lanes::RETRY_1
    }
}

/// Build a per-lane table with every entry set to `initial`.
pub fn create_lane_map<T: Clone>(initial: T) -> Vec<T> {
    vec![initial; TOTAL_LANES]
}

/// Lane bookkeeping owned by a root: what is pending, what has starved,
/// and when each pending lane expires.
#[derive(Debug, Clone)]
pub struct RootLanes {
    pending: Lanes,
    expired: Lanes,
    expiration_times: Vec<Option<Timestamp>>,
}

impl RootLanes {
    /// Create bookkeeping with nothing pending.
    pub fn new() -> Self {
        Self {
            pending: Lanes::NONE,
            expired: Lanes::NONE,
            expiration_times: create_lane_map(None),
        }
    }

    /// Lanes with outstanding work.
    pub fn pending(&self) -> Lanes {
        self.pending
    }

    /// Lanes that waited past their deadline.
    pub fn expired(&self) -> Lanes {
        self.expired
    }

    /// Deadline of a single lane, if starvation tracking has assigned one.
    pub fn expiration_time(&self, lane: Lanes) -> Option<Timestamp> {
        if lane.is_empty() {
            return None;
        }
        self.expiration_times[lane.index()]
    }

    /// Record that an update landed on `lane`.
    pub fn mark_updated(&mut self, lane: Lanes) {
        self.pending |= lane;
    }

    /// Assign deadlines to newly pending lanes and move elapsed lanes into
    /// the expired set.
    pub fn mark_starved_lanes_as_expired(&mut self, now: Timestamp, config: &ReconcilerConfig) {
        for lane in self.pending.iter_lanes() {
            let index = lane.index();
            match self.expiration_times[index] {
                None => {
                    self.expiration_times[index] = compute_expiration_time(lane, now, config);
                }
                Some(deadline) if deadline <= now => {
                    self.expired |= lane;
                }
                Some(_) => {}
            }
        }
    }

    /// Pick the lanes the next render should work on.
    ///
    /// `in_progress` is the lane set of a render session already underway on
    /// this root. It is kept unless the newly computed set is strictly more
    /// urgent, so a render is never restarted at an equal or lower priority.
    pub fn next_lanes(&self, in_progress: Lanes) -> Lanes {
        if self.pending.is_empty() {
            return Lanes::NONE;
        }
        let next = highest_priority_lanes(self.pending);

        if !in_progress.is_empty() && in_progress != next {
            let next_lane = next.highest_priority_lane();
            let in_progress_lane = in_progress.highest_priority_lane();
            if next_lane >= in_progress_lane {
                return in_progress;
            }
        }
        next
    }

    /// `true` when `lanes` intersects the expired set.
    pub fn includes_expired_lane(&self, lanes: Lanes) -> bool {
        self.expired.intersects(lanes)
    }

    /// Settle bookkeeping after a commit: only `remaining` stays pending.
    pub fn mark_finished(&mut self, remaining: Lanes) {
        let no_longer_pending = self.pending & !remaining;
        self.pending = remaining;
        self.expired &= remaining;
        for lane in no_longer_pending.iter_lanes() {
            self.expiration_times[lane.index()] = None;
        }
    }
}

impl Default for RootLanes {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn config() -> ReconcilerConfig {
        ReconcilerConfig::default()
    }

    #[test]
    fn constants_cover_thirty_one_disjoint_bits() {
        let named = Lanes::SYNC
            | Lanes::INPUT_CONTINUOUS_HYDRATION
            | Lanes::INPUT_CONTINUOUS
            | Lanes::DEFAULT_HYDRATION
            | Lanes::DEFAULT
            | Lanes::TRANSITION_HYDRATION
            | Lanes::TRANSITIONS
            | Lanes::RETRIES
            | Lanes::SELECTIVE_HYDRATION
            | Lanes::IDLE_HYDRATION
            | Lanes::IDLE
            | Lanes::OFFSCREEN;
        assert_eq!(named.bits().count_ones() as usize, TOTAL_LANES);
        assert_eq!(Lanes::TRANSITIONS.bits().count_ones(), 16);
        assert_eq!(Lanes::RETRIES.bits().count_ones(), 5);
        assert!(!Lanes::NON_IDLE.contains(Lanes::IDLE));
    }

    #[test]
    fn transitions_are_selected_as_a_group() {
        let pending = Lanes::TRANSITION_2 | Lanes::TRANSITION_5 | Lanes::IDLE;
        assert_eq!(
            highest_priority_lanes(pending),
            Lanes::TRANSITION_2 | Lanes::TRANSITION_5
        );
        assert_eq!(highest_priority_lanes(Lanes::DEFAULT | Lanes::TRANSITION_1), Lanes::DEFAULT);
        assert_eq!(highest_priority_lanes(Lanes::NONE), Lanes::NONE);
    }

    #[test]
    fn expiration_classes() {
        let now = Timestamp::from_millis(1_000);
        let cfg = config();
        assert_eq!(
            compute_expiration_time(Lanes::SYNC, now, &cfg),
            Some(Timestamp::from_millis(1_250))
        );
        assert_eq!(
            compute_expiration_time(Lanes::TRANSITION_3, now, &cfg),
            Some(Timestamp::from_millis(6_000))
        );
        assert_eq!(compute_expiration_time(Lanes::RETRY_1, now, &cfg), None);
        assert_eq!(compute_expiration_time(Lanes::IDLE, now, &cfg), None);
    }

    #[test]
    fn starved_lanes_expire_after_deadline() {
        let cfg = config();
        let mut lanes = RootLanes::new();
        lanes.mark_updated(Lanes::DEFAULT);
        lanes.mark_updated(Lanes::IDLE);

        lanes.mark_starved_lanes_as_expired(Timestamp::from_millis(0), &cfg);
        assert_eq!(lanes.expired(), Lanes::NONE);
        assert_eq!(
            lanes.expiration_time(Lanes::DEFAULT),
            Some(Timestamp::from_millis(5_000))
        );

        lanes.mark_starved_lanes_as_expired(Timestamp::from_millis(5_000), &cfg);
        assert_eq!(lanes.expired(), Lanes::DEFAULT);
        assert!(lanes.includes_expired_lane(Lanes::DEFAULT | Lanes::SYNC));

        lanes.mark_finished(Lanes::IDLE);
        assert_eq!(lanes.pending(), Lanes::IDLE);
        assert_eq!(lanes.expired(), Lanes::NONE);
        assert_eq!(lanes.expiration_time(Lanes::DEFAULT), None);
    }

    #[test]
    fn in_progress_lanes_win_unless_strictly_more_urgent() {
        let mut lanes = RootLanes::new();
        lanes.mark_updated(Lanes::TRANSITION_1);
        lanes.mark_updated(Lanes::IDLE);

        // Idle work does not interrupt a transition render.
        assert_eq!(lanes.next_lanes(Lanes::TRANSITION_1), Lanes::TRANSITION_1);

        lanes.mark_updated(Lanes::SYNC);
        assert_eq!(lanes.next_lanes(Lanes::TRANSITION_1), Lanes::SYNC);
        assert_eq!(lanes.next_lanes(Lanes::NONE), Lanes::SYNC);
    }

    #[test]
    fn transition_and_retry_lanes_rotate() {
        assert_eq!(next_transition_lane(Lanes::TRANSITION_1), Lanes::TRANSITION_2);
        assert_eq!(next_transition_lane(Lanes::TRANSITION_16), Lanes::TRANSITION_1);
        assert_eq!(next_retry_lane(Lanes::RETRY_5), Lanes::RETRY_1);
    }

    #[test]
    fn blocking_lanes_respect_configuration() {
        let mut cfg = config();
        assert!(includes_blocking_lane(Lanes::DEFAULT, &cfg));
        assert!(!includes_blocking_lane(Lanes::TRANSITION_1, &cfg));
        cfg.concurrent_by_default = true;
        assert!(!includes_blocking_lane(Lanes::DEFAULT, &cfg));
    }

    fn any_lanes() -> impl Strategy<Value = Lanes> {
        (0u32..(1 << 31)).prop_map(Lanes::from_bits_retain)
    }

    proptest! {
        #[test]
        fn highest_priority_lane_is_lowest_set_bit(bits in 1u32..(1 << 31)) {
            let lanes = Lanes::from_bits_retain(bits);
            let lane = lanes.highest_priority_lane();
            prop_assert_eq!(lane.bits().count_ones(), 1);
            prop_assert_eq!(lane.bits().trailing_zeros(), bits.trailing_zeros());
            prop_assert!(is_subset_of_lanes(lanes, lane));
        }

        #[test]
        fn merge_and_remove_algebra(a in any_lanes(), b in any_lanes()) {
            let merged = merge_lanes(a, b);
            prop_assert!(is_subset_of_lanes(merged, a));
            prop_assert!(is_subset_of_lanes(merged, b));
            prop_assert!(!includes_some_lane(remove_lanes(merged, b), b));
            prop_assert_eq!(intersect_lanes(merged, a), a);
        }

        #[test]
        fn iter_lanes_reassembles_the_set(lanes in any_lanes()) {
            let rebuilt = lanes.iter_lanes().fold(Lanes::NONE, merge_lanes);
            prop_assert_eq!(rebuilt, lanes);
        }
    }
}
