//! Trellis Core
//!
//! This crate provides a concurrent, priority-based reconciliation engine
//! for retained UI trees. It implements:
//!
//! - Lane-based priorities with starvation tracking
//! - Update queues that rebase skipped work in order
//! - Stateful component slots (state, reducers, effects, refs)
//! - An interruptible render phase over double-buffered work nodes
//! - A three-pass commit with layout and passive effects
//!
//! The engine never touches a real UI. Host operations go through
//! [`HostConfig`], and time slicing goes through a cooperative
//! [`TaskScheduler`]. [`MemoryHost`] and [`ManualScheduler`] are in-memory,
//! deterministic implementations of both.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `lane`: priority lanes, root lane bookkeeping, the priority context
//! - `queue`: lane-aware update queues for roots and stateful slots
//! - `tree`: elements, work nodes, slots, and the render phase
//! - `commit`: the mutation, layout, and passive passes
//! - `reconciler`: roots, scheduling, and the work loop
//! - `scheduler`: the task scheduler contract and a manual implementation
//! - `host`: the host contract and an in-memory host
//!
//! # Example
//!
//! ```rust
//! use trellis_core::{Element, ManualScheduler, MemoryHost, Reconciler};
//!
//! let mut host = MemoryHost::new();
//! let container = host.create_container();
//! let mut reconciler = Reconciler::new(host, ManualScheduler::new());
//! let root = reconciler.create_container(container);
//!
//! let app = Element::host("ul")
//!     .child(Element::host("li").key("a").text("first"))
//!     .child(Element::host("li").key("b").text("second"))
//!     .build();
//! reconciler.update_container(app, root).unwrap();
//! reconciler.run_until_idle();
//!
//! assert_eq!(
//!     reconciler.host().render_to_string(container),
//!     "<ul><li>first</li><li>second</li></ul>"
//! );
//! ```

mod commit;
pub mod config;
pub mod error;
pub mod host;
pub mod lane;
pub mod queue;
pub mod reconciler;
pub mod scheduler;
pub mod tree;

pub use config::ReconcilerConfig;
pub use error::{Diagnostics, Invariant, ReconcileError, Result};
pub use host::{HostConfig, HostOp, Journal, MemoryHost, MemoryNodeId};
pub use lane::{EventPriority, Lanes, PriorityContext};
pub use queue::{Dispatch, StateAction};
pub use reconciler::{Reconciler, RootId, RootLaneSnapshot, RootState, SessionState};
pub use scheduler::{ManualScheduler, RootTask, SchedulerPriority, TaskScheduler, YieldPolicy};
pub use tree::{Component, Deps, Destroy, Element, Hooks, NodeRef, Props, RefHandle};
