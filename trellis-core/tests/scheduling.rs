//! Integration Tests for Scheduling
//!
//! These tests drive the reconciler through the manual scheduler to check
//! time slicing, interruption, starvation and lane selection.

use std::sync::Arc;

use parking_lot::Mutex;
use trellis_core::{
    Component, Dispatch, Element, EventPriority, Invariant, Lanes, ManualScheduler, MemoryHost,
    MemoryNodeId, Reconciler, ReconcilerConfig, RootId, SchedulerPriority, SessionState,
    StateAction, YieldPolicy,
};

fn setup(config: ReconcilerConfig) -> (Reconciler<MemoryHost>, RootId, MemoryNodeId) {
    let mut host = MemoryHost::new();
    let container = host.create_container();
    let mut reconciler =
        Reconciler::with_config(host, ManualScheduler::new(), config).expect("valid config");
    let root = reconciler.create_container(container);
    (reconciler, root, container)
}

fn concurrent() -> ReconcilerConfig {
    ReconcilerConfig {
        concurrent_by_default: true,
        ..Default::default()
    }
}

fn list(n: usize) -> Element {
    Element::host("ol")
        .children((0..n).map(|i| Element::host("li").key(i.to_string()).text(i.to_string()).build()))
        .build()
}

/// Test that a render yielding at every poll makes no progress until its
/// lane expires, then finishes in one go.
#[test]
fn starved_lane_renders_without_yielding() {
    let (mut reconciler, root, container) = setup(concurrent());
    reconciler.scheduler_mut().set_yield_policy(YieldPolicy::Always);
    reconciler.update_container(list(3), root).expect("root exists");

    for _ in 0..3 {
        assert!(reconciler.run_next_task());
        assert_eq!(
            reconciler.session_state(),
            SessionState::InProgress { root, lanes: Lanes::DEFAULT }
        );
    }
    assert_eq!(reconciler.host().render_to_string(container), "");

    reconciler.scheduler_mut().advance(5_000);
    assert!(reconciler.run_next_task());

    assert_eq!(reconciler.session_state(), SessionState::Idle);
    assert_eq!(
        reconciler.host().render_to_string(container),
        "<ol><li>0</li><li>1</li><li>2</li></ol>"
    );
    assert_eq!(
        reconciler.root_lanes(root).map(|lanes| lanes.expired),
        Some(Lanes::NONE)
    );
}

/// Test that a sync update discards a yielded default render, commits first,
/// and the default update is rebased on top of it afterwards.
#[test]
fn sync_update_interrupts_concurrent_render() {
    let (mut reconciler, root, container) = setup(concurrent());
    reconciler.scheduler_mut().set_yield_policy(YieldPolicy::AfterPolls(2));
    reconciler.update_container(list(5), root).expect("root exists");
    assert!(reconciler.run_next_task());
    assert!(matches!(reconciler.session_state(), SessionState::InProgress { .. }));

    let priority = reconciler.priority_context().clone();
    priority.with_update_priority(Lanes::SYNC, || {
        reconciler
            .update_container(Element::host("p").text("urgent").build(), root)
            .expect("root exists");
    });

    assert_eq!(reconciler.session_state(), SessionState::Idle);
    assert_eq!(reconciler.host().render_to_string(container), "<p>urgent</p>");
    let lanes = reconciler.root_lanes(root).expect("root exists");
    assert_eq!(lanes.pending, Lanes::DEFAULT);
    assert_eq!(reconciler.scheduler().pending_tasks(), 1);

    reconciler.scheduler_mut().set_yield_policy(YieldPolicy::Never);
    reconciler.run_until_idle();
    // The default update is replayed first, then the sync one on top.
    assert_eq!(reconciler.host().render_to_string(container), "<p>urgent</p>");
    assert_eq!(
        reconciler.root_lanes(root).map(|lanes| lanes.pending),
        Some(Lanes::NONE)
    );
}

/// Test that updates arriving mid-render are held until the render ends.
#[test]
fn interleaved_update_waits_for_the_session() {
    let (mut reconciler, root, container) = setup(concurrent());
    let setter: Arc<Mutex<Option<Dispatch<String, StateAction<String>>>>> = Arc::default();
    let exposed = setter.clone();
    let label = Component::new("Label", move |hooks, _props| {
        let (text, set_text) = hooks.use_state(String::from("first"));
        *exposed.lock() = Some(set_text);
        Element::host("b").text(text).build()
    });
    let app = || {
        Element::host("main")
            .child(Element::component(&label))
            .child(list(4))
            .build()
    };

    reconciler.update_container(app(), root).expect("root exists");
    reconciler.run_until_idle();
    assert_eq!(
        reconciler.host().render_to_string(container),
        "<main><b>first</b><ol><li>0</li><li>1</li><li>2</li><li>3</li></ol></main>"
    );

    // Start a yielding render, then dispatch into a node it already passed.
    reconciler.scheduler_mut().set_yield_policy(YieldPolicy::AfterPolls(4));
    // Root, main, Label and its text are rendered before the first yield.
    reconciler.update_container(app(), root).expect("root exists");
    assert!(reconciler.run_next_task());
    assert!(matches!(reconciler.session_state(), SessionState::InProgress { .. }));

    setter.lock().as_ref().expect("rendered").set("second".into());
    reconciler.process_dispatches();
    assert!(matches!(reconciler.session_state(), SessionState::InProgress { .. }));

    reconciler.scheduler_mut().set_yield_policy(YieldPolicy::Never);
    reconciler.run_until_idle();
    assert!(reconciler
        .host()
        .render_to_string(container)
        .starts_with("<main><b>second</b>"));
    assert_eq!(reconciler.session_state(), SessionState::Idle);
}

/// Test that the lane of an update follows the event being dispatched.
#[test]
fn event_priority_selects_lane_and_task_priority() {
    let (mut reconciler, root, container) = setup(ReconcilerConfig::default());
    let priority = reconciler.priority_context().clone();

    let lane = priority.with_event_priority(EventPriority::Continuous, || {
        reconciler.update_container(list(1), root).expect("root exists")
    });
    assert_eq!(lane, Lanes::INPUT_CONTINUOUS);
    let queued = reconciler.scheduler().queued();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].1, SchedulerPriority::UserBlocking);
    reconciler.run_until_idle();

    let lane = priority.with_event_priority(EventPriority::Discrete, || {
        reconciler.update_container(list(2), root).expect("root exists")
    });
    assert_eq!(lane, Lanes::SYNC);
    assert!(reconciler.scheduler().is_idle());
    assert_eq!(
        reconciler.host().render_to_string(container),
        "<ol><li>0</li><li>1</li></ol>"
    );
}

/// Test that transitions claim rotating lanes and render at normal priority.
#[test]
fn transitions_use_their_own_lanes() {
    let (mut reconciler, root, container) = setup(ReconcilerConfig::default());
    let priority = reconciler.priority_context().clone();

    let lane = priority.start_transition(|| {
        reconciler.update_container(list(2), root).expect("root exists")
    });
    assert_eq!(lane, Lanes::TRANSITION_1);
    let snapshot = reconciler.root_lanes(root).expect("root exists");
    assert_eq!(snapshot.pending, Lanes::TRANSITION_1);
    assert_eq!(snapshot.callback_priority, Lanes::TRANSITION_1);
    assert_eq!(reconciler.scheduler().queued()[0].1, SchedulerPriority::Normal);

    let next = priority.start_transition(|| {
        reconciler.update_container(list(3), root).expect("root exists")
    });
    assert_eq!(next, Lanes::TRANSITION_2);

    reconciler.run_until_idle();
    assert_eq!(
        reconciler.host().render_to_string(container),
        "<ol><li>0</li><li>1</li><li>2</li></ol>"
    );
}

/// Test that a default update interrupts a yielded transition render, which
/// then restarts with the default update rebased under it.
#[test]
fn default_update_interrupts_transition() {
    let (mut reconciler, root, container) = setup(concurrent());
    let appender: Arc<Mutex<Option<Dispatch<String, String>>>> = Arc::default();
    let exposed = appender.clone();
    let log = Component::new("Log", move |hooks, _props| {
        let (log, append) =
            hooks.use_reducer(|log: &String, entry: &String| format!("{log}{entry}"), String::new());
        *exposed.lock() = Some(append);
        Element::host("b").text(format!("[{log}]")).build()
    });
    let app = Element::host("main")
        .child(list(6))
        .child(Element::component(&log))
        .build();
    reconciler.update_container(app, root).expect("root exists");
    reconciler.run_until_idle();
    let append = appender.lock().clone().expect("rendered");

    let priority = reconciler.priority_context().clone();
    priority.start_transition(|| append.dispatch("T".into()));
    reconciler.process_dispatches();
    reconciler.scheduler_mut().set_yield_policy(YieldPolicy::AfterPolls(2));
    assert!(reconciler.run_next_task());
    assert_eq!(
        reconciler.session_state(),
        SessionState::InProgress { root, lanes: Lanes::TRANSITION_1 }
    );

    append.dispatch("D".into());
    reconciler.process_dispatches();
    assert_eq!(
        reconciler.root_lanes(root).map(|lanes| lanes.callback_priority),
        Some(Lanes::DEFAULT)
    );

    // The default render discards the transition session and commits alone.
    reconciler.scheduler_mut().set_yield_policy(YieldPolicy::Never);
    assert!(reconciler.run_next_task());
    assert!(reconciler.host().render_to_string(container).ends_with("<b>[D]</b></main>"));
    assert_eq!(
        reconciler.root_lanes(root).map(|lanes| lanes.pending),
        Some(Lanes::TRANSITION_1)
    );

    reconciler.run_until_idle();
    assert!(reconciler.host().render_to_string(container).ends_with("<b>[TD]</b></main>"));
    assert_eq!(reconciler.session_state(), SessionState::Idle);
}

/// Test that a dispatch to an unmounted, collected component is dropped.
#[test]
fn dispatch_to_collected_node_is_dropped() {
    let (mut reconciler, root, container) = setup(ReconcilerConfig::default());
    let setter: Arc<Mutex<Option<Dispatch<i32, StateAction<i32>>>>> = Arc::default();
    let exposed = setter.clone();
    let counter = Component::new("Counter", move |hooks, _props| {
        let (count, set_count) = hooks.use_state(0);
        *exposed.lock() = Some(set_count);
        Element::text(count.to_string())
    });

    reconciler
        .update_container(Element::component(&counter).build(), root)
        .expect("root exists");
    reconciler.run_until_idle();
    let set_count = setter.lock().clone().expect("rendered");

    // Unmounting commits, and every commit reclaims unreachable nodes.
    reconciler
        .update_container(Element::host("p").text("gone").build(), root)
        .expect("root exists");
    reconciler.run_until_idle();
    let live = reconciler.live_nodes();

    set_count.set(7);
    reconciler.process_dispatches();

    assert!(reconciler.scheduler().is_idle());
    assert_eq!(
        reconciler.root_lanes(root).map(|lanes| lanes.pending),
        Some(Lanes::NONE)
    );
    assert_eq!(reconciler.run_until_idle(), 0);
    assert_eq!(reconciler.host().render_to_string(container), "<p>gone</p>");
    assert_eq!(reconciler.live_nodes(), live);
}

/// Test that a layout effect that keeps scheduling sync work is cut off.
#[test]
fn runaway_sync_work_is_reported() {
    let config = ReconcilerConfig {
        max_sync_flush_passes: 3,
        ..Default::default()
    };
    let (mut reconciler, root, _) = setup(config);
    let app = Component::new("Runaway", |hooks, _props| {
        let (count, set_count) = hooks.use_state(0u64);
        hooks.use_layout_effect(None, move || {
            set_count.update(|n| n + 1);
            None
        });
        Element::text(count.to_string())
    });

    let priority = reconciler.priority_context().clone();
    priority.with_update_priority(Lanes::SYNC, || {
        reconciler
            .update_container(Element::component(&app).build(), root)
            .expect("root exists");
    });

    assert_eq!(
        reconciler.take_diagnostics(),
        [Invariant::SyncFlushLimit { passes: 3 }]
    );
}
