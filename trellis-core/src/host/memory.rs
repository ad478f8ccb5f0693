//! In-Memory Host
//!
//! A [`HostConfig`] backed by a plain node table. Every call that reaches
//! the host is appended to a shared [`Journal`], which makes commit order
//! observable: embedders and tests can push their own markers into the same
//! journal from effects and see exactly where they land relative to host
//! mutations.

use std::fmt::{self, Write as _};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::HostConfig;
use crate::tree::{Element, Props};

/// Handle to a node of a [`MemoryHost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemoryNodeId(u32);

impl MemoryNodeId {
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for MemoryNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Attribute changes between two prop sets.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MemoryPatch {
    /// Attributes added or changed, with their new value.
    pub set: Vec<(String, Value)>,
    /// Attributes that disappeared.
    pub removed: Vec<String>,
    /// New text content, when it changed. Clearing goes through
    /// [`HostConfig::reset_text_content`] instead.
    pub text: Option<String>,
}

/// One recorded host call, or a caller-supplied marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HostOp {
    CreateInstance { id: MemoryNodeId, kind: String },
    CreateText { id: MemoryNodeId, text: String },
    AppendChild { parent: MemoryNodeId, child: MemoryNodeId },
    InsertBefore { parent: MemoryNodeId, child: MemoryNodeId, before: MemoryNodeId },
    RemoveChild { parent: MemoryNodeId, child: MemoryNodeId },
    ApplyPatch { id: MemoryNodeId, patch: MemoryPatch },
    CommitText { id: MemoryNodeId, text: String },
    ResetText { id: MemoryNodeId },
    Marker { label: String },
}

impl HostOp {
    /// `true` for operations that change what is attached to the tree.
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            HostOp::CreateInstance { .. } | HostOp::CreateText { .. } | HostOp::Marker { .. }
        )
    }
}

/// Shared, append-only log of host operations.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    ops: Arc<Mutex<Vec<HostOp>>>,
}

impl Journal {
    pub fn record(&self, op: HostOp) {
        self.ops.lock().push(op);
    }

    /// Append a caller-supplied marker.
    pub fn mark(&self, label: impl Into<String>) {
        self.record(HostOp::Marker { label: label.into() });
    }

    /// Everything recorded so far.
    pub fn snapshot(&self) -> Vec<HostOp> {
        self.ops.lock().clone()
    }

    /// Drain the journal.
    pub fn take(&self) -> Vec<HostOp> {
        std::mem::take(&mut *self.ops.lock())
    }

    /// Labels of the markers recorded so far, in order.
    pub fn markers(&self) -> Vec<String> {
        self.ops
            .lock()
            .iter()
            .filter_map(|op| match op {
                HostOp::Marker { label } => Some(label.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ops.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
enum MemoryContent {
    Container,
    Element {
        kind: String,
        attrs: IndexMap<String, Value>,
        text: Option<String>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct MemoryNode {
    content: MemoryContent,
    parent: Option<MemoryNodeId>,
    children: Vec<MemoryNodeId>,
}

/// An in-memory rendering surface.
#[derive(Debug, Default)]
pub struct MemoryHost {
    nodes: Vec<MemoryNode>,
    journal: Journal,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty container to render a root into.
    pub fn create_container(&mut self) -> MemoryNodeId {
        self.push(MemoryContent::Container)
    }

    /// A handle to the journal. All clones share the same log.
    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    /// Children of `id`, in order.
    pub fn children(&self, id: MemoryNodeId) -> &[MemoryNodeId] {
        self.node(id).map(|node| node.children.as_slice()).unwrap_or(&[])
    }

    pub fn parent(&self, id: MemoryNodeId) -> Option<MemoryNodeId> {
        self.node(id).and_then(|node| node.parent)
    }

    /// Value of an attribute of an element node.
    pub fn attr(&self, id: MemoryNodeId, name: &str) -> Option<&Value> {
        match self.node(id).map(|node| &node.content) {
            Some(MemoryContent::Element { attrs, .. }) => attrs.get(name),
            _ => None,
        }
    }

    /// Number of nodes ever created, including the container.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Serialize the children of `container` as markup.
    pub fn render_to_string(&self, container: MemoryNodeId) -> String {
        let mut out = String::new();
        for child in self.children(container) {
            self.write_node(*child, &mut out);
        }
        out
    }

    fn write_node(&self, id: MemoryNodeId, out: &mut String) {
        let Some(node) = self.node(id) else {
            return;
        };
        match &node.content {
            MemoryContent::Container => {
                for child in &node.children {
                    self.write_node(*child, out);
                }
            }
            MemoryContent::Text(text) => out.push_str(text),
            MemoryContent::Element { kind, attrs, text } => {
                let _ = write!(out, "<{kind}");
                for (name, value) in attrs {
                    match value {
                        Value::String(s) => {
                            let _ = write!(out, " {name}=\"{s}\"");
                        }
                        other => {
                            let _ = write!(out, " {name}={other}");
                        }
                    }
                }
                if text.is_none() && node.children.is_empty() {
                    out.push_str("/>");
                    return;
                }
                out.push('>');
                if let Some(text) = text {
                    out.push_str(text);
                }
                for child in &node.children {
                    self.write_node(*child, out);
                }
                let _ = write!(out, "</{kind}>");
            }
        }
    }

    fn push(&mut self, content: MemoryContent) -> MemoryNodeId {
        let id = MemoryNodeId(self.nodes.len() as u32);
        self.nodes.push(MemoryNode {
            content,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    fn node(&self, id: MemoryNodeId) -> Option<&MemoryNode> {
        self.nodes.get(id.0 as usize)
    }

    fn node_mut(&mut self, id: MemoryNodeId) -> Option<&mut MemoryNode> {
        self.nodes.get_mut(id.0 as usize)
    }

    fn detach(&mut self, child: MemoryNodeId) {
        let Some(parent) = self.node_mut(child).and_then(|node| node.parent.take()) else {
            return;
        };
        if let Some(parent) = self.node_mut(parent) {
            parent.children.retain(|id| *id != child);
        }
    }

    fn insert_at(&mut self, parent: MemoryNodeId, child: MemoryNodeId, before: Option<MemoryNodeId>) {
        self.detach(child);
        if let Some(node) = self.node_mut(child) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.node_mut(parent) {
            let position = before
                .and_then(|before| node.children.iter().position(|id| *id == before))
                .unwrap_or(node.children.len());
            node.children.insert(position, child);
        }
    }
}

fn text_content(props: &Props) -> Option<String> {
    match props.children() {
        Element::Text(text) => Some(text.to_string()),
        _ => None,
    }
}

impl HostConfig for MemoryHost {
    type Instance = MemoryNodeId;
    type Patch = MemoryPatch;

    fn create_instance(&mut self, kind: &str, props: &Props) -> MemoryNodeId {
        let id = self.push(MemoryContent::Element {
            kind: kind.to_owned(),
            attrs: props.attrs().clone(),
            text: text_content(props),
        });
        self.journal.record(HostOp::CreateInstance {
            id,
            kind: kind.to_owned(),
        });
        id
    }

    fn create_text_instance(&mut self, text: &str) -> MemoryNodeId {
        let id = self.push(MemoryContent::Text(text.to_owned()));
        self.journal.record(HostOp::CreateText {
            id,
            text: text.to_owned(),
        });
        id
    }

    fn append_child(&mut self, parent: &MemoryNodeId, child: &MemoryNodeId) {
        self.insert_at(*parent, *child, None);
        self.journal.record(HostOp::AppendChild {
            parent: *parent,
            child: *child,
        });
    }

    fn insert_before(&mut self, parent: &MemoryNodeId, child: &MemoryNodeId, before: &MemoryNodeId) {
        self.insert_at(*parent, *child, Some(*before));
        self.journal.record(HostOp::InsertBefore {
            parent: *parent,
            child: *child,
            before: *before,
        });
    }

    fn remove_child(&mut self, parent: &MemoryNodeId, child: &MemoryNodeId) {
        if self.parent(*child) == Some(*parent) {
            self.detach(*child);
        }
        self.journal.record(HostOp::RemoveChild {
            parent: *parent,
            child: *child,
        });
    }

    fn diff_props(&self, _instance: &MemoryNodeId, _kind: &str, old: &Props, new: &Props) -> Option<MemoryPatch> {
        let mut patch = MemoryPatch::default();
        for (name, value) in new.attrs() {
            if old.get(name) != Some(value) {
                patch.set.push((name.clone(), value.clone()));
            }
        }
        for name in old.attrs().keys() {
            if new.get(name).is_none() {
                patch.removed.push(name.clone());
            }
        }
        let new_text = text_content(new);
        if new_text.is_some() && text_content(old) != new_text {
            patch.text = new_text;
        }

        if patch.set.is_empty() && patch.removed.is_empty() && patch.text.is_none() {
            None
        } else {
            Some(patch)
        }
    }

    fn apply_patch(&mut self, instance: &MemoryNodeId, _kind: &str, patch: MemoryPatch) {
        if let Some(MemoryNode {
            content: MemoryContent::Element { attrs, text, .. },
            ..
        }) = self.node_mut(*instance)
        {
            for (name, value) in &patch.set {
                attrs.insert(name.clone(), value.clone());
            }
            for name in &patch.removed {
                attrs.shift_remove(name);
            }
            if let Some(next) = &patch.text {
                *text = Some(next.clone());
            }
        }
        self.journal.record(HostOp::ApplyPatch { id: *instance, patch });
    }

    fn commit_text_update(&mut self, instance: &MemoryNodeId, _old: &str, new: &str) {
        if let Some(MemoryNode {
            content: MemoryContent::Text(text),
            ..
        }) = self.node_mut(*instance)
        {
            *text = new.to_owned();
        }
        self.journal.record(HostOp::CommitText {
            id: *instance,
            text: new.to_owned(),
        });
    }

    fn reset_text_content(&mut self, instance: &MemoryNodeId) {
        if let Some(MemoryNode {
            content: MemoryContent::Element { text, .. },
            ..
        }) = self.node_mut(*instance)
        {
            *text = None;
        }
        self.journal.record(HostOp::ResetText { id: *instance });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(attrs: &[(&str, Value)], children: Element) -> Props {
        Props::new(
            attrs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            children,
        )
    }

    #[test]
    fn renders_markup_with_text_content() {
        let mut host = MemoryHost::new();
        let container = host.create_container();
        let div = host.create_instance("div", &props(&[("id", json!("main"))], Element::Empty));
        let p = host.create_instance("p", &props(&[], Element::text("hi")));
        host.append_initial_child(&div, &p);
        host.append_child(&container, &div);

        assert_eq!(host.render_to_string(container), r#"<div id="main"><p>hi</p></div>"#);
    }

    #[test]
    fn insert_before_moves_an_attached_child() {
        let mut host = MemoryHost::new();
        let container = host.create_container();
        let a = host.create_text_instance("a");
        let b = host.create_text_instance("b");
        host.append_child(&container, &a);
        host.append_child(&container, &b);
        host.insert_before(&container, &b, &a);

        assert_eq!(host.render_to_string(container), "ba");
        assert_eq!(host.children(container), &[b, a]);
    }

    #[test]
    fn diff_reports_changed_removed_and_text() {
        let host = MemoryHost::new();
        let old = props(&[("a", json!(1)), ("b", json!(2))], Element::text("x"));
        let new = props(&[("a", json!(1)), ("c", json!(3))], Element::Empty);

        let patch = host
            .diff_props(&MemoryNodeId(0), "div", &old, &new)
            .expect("props differ");
        assert_eq!(patch.set, vec![("c".to_string(), json!(3))]);
        assert_eq!(patch.removed, vec!["b".to_string()]);
        // Dropping text content is a reset, not part of the patch.
        assert_eq!(patch.text, None);

        let retext = props(&[("a", json!(1))], Element::text("y"));
        let patch = host
            .diff_props(&MemoryNodeId(0), "div", &old, &retext)
            .expect("text differs");
        assert_eq!(patch.text.as_deref(), Some("y"));

        assert!(host.diff_props(&MemoryNodeId(0), "div", &old, &old.clone()).is_none());
    }

    #[test]
    fn journal_is_shared_and_serializable() {
        let mut host = MemoryHost::new();
        let journal = host.journal();
        host.create_text_instance("t");
        journal.mark("after");

        let ops = host.journal().snapshot();
        assert_eq!(ops.len(), 2);
        assert_eq!(journal.markers(), vec!["after".to_string()]);
        let encoded = serde_json::to_value(&ops[1]).expect("serializable");
        assert_eq!(encoded, json!({ "op": "marker", "label": "after" }));
    }
}
