//! Update Queues
//!
//! State owners (the root and every stateful slot) receive lane-tagged
//! updates through a shared pending list. At render time the pending list is
//! spliced onto the owner's base list and walked with [`merge_updates`]:
//!
//! - updates whose lane is part of the render are applied;
//! - the rest are carried forward, together with zero-lane replays of every
//!   applied update that came after the first skipped one, so the next
//!   render replays them in their original order on top of the snapshot
//!   taken at the first skip.
//!
//! Two flavors share the walk:
//!
//! - [`update`]: root state, with value payloads shallow-merged.
//! - [`hook`]: stateful slots, driven by a reducer and able to bail out of
//!   no-op updates eagerly.

pub mod hook;
pub(crate) mod inbox;
pub mod update;

pub use hook::{basic_state_reducer, Dispatch, HookQueue, HookUpdate, Reducer, StateAction};
pub use update::{Mergeable, Payload, Processed, SharedQueue, Update, UpdateQueue};

use crate::lane::{is_subset_of_lanes, Lanes};

/// An update that carries a lane and can be cloned with another lane.
pub trait LaneTagged: Clone {
    /// The lane the update was requested at.
    fn lane(&self) -> Lanes;

    /// Copy of the update tagged with `lane`.
    fn with_lane(&self, lane: Lanes) -> Self;
}

/// Outcome of walking a base list at some render lanes.
#[derive(Debug, Clone)]
pub struct Merged<S, U> {
    /// State after applying every included update.
    pub state: S,
    /// State the carried list must be replayed on top of.
    pub base_state: S,
    /// Deferred updates plus zero-lane replays, in original order.
    pub carried: Vec<U>,
    /// Union of the lanes of deferred updates.
    pub skipped_lanes: Lanes,
}

/// Walk `updates` on top of `base_state`, applying those included in
/// `render_lanes` and carrying the rest forward.
pub fn merge_updates<S, U>(
    base_state: &S,
    updates: &[U],
    render_lanes: Lanes,
    mut apply: impl FnMut(&S, &U) -> S,
) -> Merged<S, U>
where
    S: Clone,
    U: LaneTagged,
{
    let mut state = base_state.clone();
    let mut new_base_state: Option<S> = None;
    let mut carried = Vec::new();
    let mut skipped_lanes = Lanes::NONE;

    for update in updates {
        let lane = update.lane();
        if !is_subset_of_lanes(render_lanes, lane) {
            if new_base_state.is_none() {
                new_base_state = Some(state.clone());
            }
            carried.push(update.clone());
            skipped_lanes |= lane;
        } else {
            if new_base_state.is_some() {
                // Already applied now, but must replay after the skipped
                // updates next time. The empty lane is a subset of any set.
                carried.push(update.with_lane(Lanes::NONE));
            }
            state = apply(&state, update);
        }
    }

    let base_state = new_base_state.unwrap_or_else(|| state.clone());
    Merged {
        state,
        base_state,
        carried,
        skipped_lanes,
    }
}
