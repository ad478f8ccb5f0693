//! Integration Tests for Rendering
//!
//! These tests drive full render and commit cycles against the in-memory
//! host and check both the resulting markup and the host calls made.

use trellis_core::{
    Element, HostOp, Lanes, ManualScheduler, MemoryHost, MemoryNodeId, NodeRef, Reconciler,
    ReconcileError, ReconcilerConfig, RootId,
};

fn setup() -> (Reconciler<MemoryHost>, RootId, MemoryNodeId) {
    let mut host = MemoryHost::new();
    let container = host.create_container();
    let mut reconciler = Reconciler::new(host, ManualScheduler::new());
    let root = reconciler.create_container(container);
    (reconciler, root, container)
}

/// Render `element` at the default lane and run every task.
fn render(reconciler: &mut Reconciler<MemoryHost>, root: RootId, element: Element) {
    reconciler.update_container(element, root).expect("root exists");
    reconciler.run_until_idle();
}

fn keyed_list(keys: &[&str]) -> Element {
    Element::host("ul")
        .children(
            keys.iter()
                .map(|key| Element::host("li").key(*key).text(*key).build()),
        )
        .build()
}

fn placements(ops: &[HostOp]) -> usize {
    ops.iter()
        .filter(|op| matches!(op, HostOp::AppendChild { .. } | HostOp::InsertBefore { .. }))
        .count()
}

/// Test that a first render builds the tree off-screen and attaches it once.
#[test]
fn initial_mount_attaches_tree_once() {
    let (mut reconciler, root, container) = setup();
    let journal = reconciler.host().journal();

    render(
        &mut reconciler,
        root,
        Element::host("div")
            .attr("id", "app")
            .child(Element::host("h1").text("Title"))
            .child(Element::host("p").text("body"))
            .build(),
    );

    assert_eq!(
        reconciler.host().render_to_string(container),
        r#"<div id="app"><h1>Title</h1><p>body</p></div>"#
    );
    let into_container = journal
        .snapshot()
        .iter()
        .filter(|op| match op {
            HostOp::AppendChild { parent, .. } | HostOp::InsertBefore { parent, .. } => {
                *parent == container
            }
            _ => false,
        })
        .count();
    assert_eq!(into_container, 1);
}

/// Test that moving the last keyed child to the front moves the others.
#[test]
fn keyed_reorder_reuses_instances() {
    let (mut reconciler, root, container) = setup();
    render(&mut reconciler, root, keyed_list(&["a", "b", "c", "d"]));
    let journal = reconciler.host().journal();
    journal.take();

    render(&mut reconciler, root, keyed_list(&["d", "a", "b", "c"]));

    assert_eq!(
        reconciler.host().render_to_string(container),
        "<ul><li>d</li><li>a</li><li>b</li><li>c</li></ul>"
    );
    let ops = journal.take();
    assert!(!ops.iter().any(|op| matches!(op, HostOp::CreateInstance { .. })));
    // `d` keeps its place; a, b and c move behind it.
    assert_eq!(placements(&ops), 3);
}

/// Test that a dropped keyed child is removed and nothing else moves.
#[test]
fn removed_child_is_detached() {
    let (mut reconciler, root, container) = setup();
    render(&mut reconciler, root, keyed_list(&["a", "b", "c"]));
    let journal = reconciler.host().journal();
    journal.take();

    render(&mut reconciler, root, keyed_list(&["a", "c"]));

    assert_eq!(
        reconciler.host().render_to_string(container),
        "<ul><li>a</li><li>c</li></ul>"
    );
    let ops = journal.take();
    let removed = ops
        .iter()
        .filter(|op| matches!(op, HostOp::RemoveChild { .. }))
        .count();
    assert_eq!(removed, 1);
    assert_eq!(placements(&ops), 0);
}

/// Test that a changed attribute is applied as a patch to the same instance.
#[test]
fn attribute_change_patches_in_place() {
    let (mut reconciler, root, container) = setup();
    render(&mut reconciler, root, Element::host("div").attr("class", "a").build());
    let div = reconciler.host().children(container)[0];
    let journal = reconciler.host().journal();
    journal.take();

    render(&mut reconciler, root, Element::host("div").attr("class", "b").build());

    assert_eq!(reconciler.host().children(container), &[div]);
    assert_eq!(
        reconciler.host().attr(div, "class"),
        Some(&serde_json::json!("b"))
    );
    let ops = journal.take();
    assert!(matches!(ops.as_slice(), [HostOp::ApplyPatch { id, .. }] if *id == div));
}

/// Test that same keys in the same order with new props only patch.
#[test]
fn same_keys_with_new_props_only_patch() {
    let (mut reconciler, root, _) = setup();
    let styled = |class: &str| {
        Element::host("ul")
            .children(["a", "b", "c", "d"].iter().map(|key| {
                Element::host("li").key(*key).attr("class", class).build()
            }))
            .build()
    };
    render(&mut reconciler, root, styled("old"));
    let journal = reconciler.host().journal();
    journal.take();

    render(&mut reconciler, root, styled("new"));

    let ops = journal.take();
    let patches = ops
        .iter()
        .filter(|op| matches!(op, HostOp::ApplyPatch { .. }))
        .count();
    assert_eq!(patches, 4);
    assert_eq!(placements(&ops), 0);
    assert!(!ops.iter().any(|op| matches!(op, HostOp::RemoveChild { .. })));
}

/// Test that a text child updates its content without being recreated.
#[test]
fn text_update_commits_in_place() {
    let (mut reconciler, root, container) = setup();
    render(&mut reconciler, root, Element::text("hello"));
    let journal = reconciler.host().journal();
    journal.take();

    render(&mut reconciler, root, Element::text("world"));

    assert_eq!(reconciler.host().render_to_string(container), "world");
    let ops = journal.take();
    assert!(matches!(
        ops.as_slice(),
        [HostOp::CommitText { text, .. }] if text == "world"
    ));
}

/// Test that text content is cleared before children replacing it are
/// placed.
#[test]
fn text_content_resets_before_children_are_placed() {
    let (mut reconciler, root, container) = setup();
    render(&mut reconciler, root, Element::host("div").text("loading").build());
    let div = reconciler.host().children(container)[0];
    let journal = reconciler.host().journal();
    journal.take();

    render(
        &mut reconciler,
        root,
        Element::host("div").child(Element::host("span").text("ready")).build(),
    );

    assert_eq!(
        reconciler.host().render_to_string(container),
        "<div><span>ready</span></div>"
    );
    let ops = journal.take();
    let reset = ops
        .iter()
        .position(|op| matches!(op, HostOp::ResetText { id } if *id == div))
        .expect("text content reset");
    let placed = ops
        .iter()
        .position(|op| matches!(op, HostOp::AppendChild { parent, .. } if *parent == div))
        .expect("span placed");
    assert!(reset < placed);
    assert!(!ops.iter().any(|op| matches!(op, HostOp::ApplyPatch { .. })));
}

/// Test that a change of element type replaces the subtree.
#[test]
fn type_change_replaces_subtree() {
    let (mut reconciler, root, container) = setup();
    render(&mut reconciler, root, Element::host("div").text("x").build());
    let old = reconciler.host().children(container)[0];

    render(&mut reconciler, root, Element::host("span").text("x").build());

    assert_eq!(reconciler.host().render_to_string(container), "<span>x</span>");
    assert_eq!(reconciler.host().parent(old), None);
}

/// Test that a node ref follows the instance through mount and removal.
#[test]
fn node_ref_tracks_instance() {
    let (mut reconciler, root, container) = setup();
    let node_ref = NodeRef::new();

    render(&mut reconciler, root, Element::host("canvas").node_ref(&node_ref).build());
    let canvas = reconciler.host().children(container)[0];
    assert_eq!(node_ref.get::<MemoryNodeId>(), Some(canvas));

    render(&mut reconciler, root, Element::Empty);
    assert!(!node_ref.is_attached());
    assert_eq!(reconciler.host().render_to_string(container), "");
}

/// Test that old buffers are collected instead of piling up.
#[test]
fn repeated_updates_keep_node_count_bounded() {
    let (mut reconciler, root, _) = setup();
    for round in 0..20 {
        let keys = if round % 2 == 0 { ["a", "b", "c"] } else { ["c", "b", "a"] };
        render(&mut reconciler, root, keyed_list(&keys));
    }
    // Root, list and three items, each with at most two buffers.
    assert!(reconciler.live_nodes() <= 10, "live nodes: {}", reconciler.live_nodes());
}

/// Test that roots render independently into their own containers.
#[test]
fn roots_are_independent() {
    let (mut reconciler, first, first_container) = setup();
    let second_container = reconciler.host_mut().create_container();
    let second = reconciler.create_container(second_container);

    reconciler
        .update_container(Element::host("a").build(), first)
        .expect("root exists");
    reconciler
        .update_container(Element::host("b").build(), second)
        .expect("root exists");
    reconciler.run_until_idle();

    assert_eq!(reconciler.host().render_to_string(first_container), "<a/>");
    assert_eq!(reconciler.host().render_to_string(second_container), "<b/>");
    assert_eq!(
        reconciler.root_lanes(second).map(|lanes| lanes.pending),
        Some(Lanes::NONE)
    );
}

/// Test that configuration is validated before a reconciler is built.
#[test]
fn invalid_config_is_rejected() {
    let config = ReconcilerConfig {
        max_sync_flush_passes: 0,
        ..Default::default()
    };
    let err = Reconciler::with_config(MemoryHost::new(), ManualScheduler::new(), config)
        .unwrap_err();
    assert!(matches!(err, ReconcileError::InvalidConfig(_)));

    let config = ReconcilerConfig::from_json(r#"{ "default_timeout_ms": 1000 }"#)
        .expect("valid config");
    assert!(Reconciler::with_config(MemoryHost::new(), ManualScheduler::new(), config).is_ok());
}
