//! Errors and Diagnostics
//!
//! Two kinds of failure exist:
//!
//! - [`ReconcileError`] is returned to callers for requests the engine cannot
//!   honour (an unknown root, a bad configuration).
//! - [`Invariant`] describes an integration bug detected mid-render, such as
//!   a component calling hooks in a different order. These are never
//!   returned; they are logged and collected in [`Diagnostics`] while the
//!   engine continues with a fallback.

use thiserror::Error;
use tracing::error;

use crate::reconciler::RootId;

/// Errors returned by the public API.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("root {0:?} does not exist")]
    UnknownRoot(RootId),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

/// Result alias for the public API.
pub type Result<T, E = ReconcileError> = std::result::Result<T, E>;

/// An invariant the engine expected to hold but found broken.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Invariant {
    #[error("no lane class matched the non-empty mask {0:#033b}")]
    UnmatchedLanes(u32),

    #[error("component `{component}` used {found} stateful slots, previous render used {expected}")]
    SlotCountMismatch {
        component: String,
        expected: usize,
        found: usize,
    },

    #[error("stateful slot {index} of component `{component}` changed kind between renders")]
    SlotKindMismatch { component: String, index: usize },

    #[error("sync work was still queued after {passes} flush passes")]
    SyncFlushLimit { passes: u32 },
}

/// Collected invariant violations.
#[derive(Debug, Default)]
pub struct Diagnostics {
    reported: Vec<Invariant>,
}

impl Diagnostics {
    /// Log and record a violation.
    pub fn report(&mut self, violation: Invariant) {
        error!(%violation, "invariant violated");
        self.reported.push(violation);
    }

    /// Record every violation from `violations`.
    pub fn extend(&mut self, violations: impl IntoIterator<Item = Invariant>) {
        for violation in violations {
            self.report(violation);
        }
    }

    /// Drain what has been recorded so far.
    pub fn take(&mut self) -> Vec<Invariant> {
        std::mem::take(&mut self.reported)
    }

    pub fn is_empty(&self) -> bool {
        self.reported.is_empty()
    }
}
