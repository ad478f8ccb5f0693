//! Elements
//!
//! Elements are the immutable description of what a tree should look like.
//! Components return them, the root holds one, and the child reconciler
//! diffs them against the current work nodes.
//!
//! Props are reference counted. Two work nodes whose props point at the same
//! allocation are considered unchanged, which is what lets an untouched
//! subtree bail out of rendering.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;

use super::hooks::Hooks;

/// Identity key of an element among its siblings.
pub type Key = Arc<str>;

/// Render function of a [`Component`].
pub type RenderFn = dyn Fn(&mut Hooks<'_>, &Props) -> Element + Send + Sync;

/// Description of a subtree.
#[derive(Clone, Debug, Default)]
pub enum Element {
    /// Renders nothing.
    #[default]
    Empty,
    /// A text leaf.
    Text(Arc<str>),
    /// A host element or a component.
    Node(ElementNode),
    /// A list of siblings. Nested lists are flattened.
    List(Vec<Element>),
}

impl Element {
    /// Start building a host element of the given kind.
    pub fn host(kind: impl Into<Arc<str>>) -> ElementBuilder {
        ElementBuilder::new(ElementType::Host(kind.into()))
    }

    /// Start building an element rendered by `component`.
    pub fn component(component: &Component) -> ElementBuilder {
        ElementBuilder::new(ElementType::Component(component.clone()))
    }

    /// A text leaf.
    pub fn text(text: impl Into<Arc<str>>) -> Element {
        Element::Text(text.into())
    }

    /// A list of siblings.
    pub fn list(items: impl IntoIterator<Item = Element>) -> Element {
        Element::List(items.into_iter().collect())
    }

    /// `true` for [`Element::Empty`].
    pub fn is_empty(&self) -> bool {
        matches!(self, Element::Empty)
    }
}

impl From<&str> for Element {
    fn from(text: &str) -> Self {
        Element::Text(text.into())
    }
}

impl From<String> for Element {
    fn from(text: String) -> Self {
        Element::Text(text.into())
    }
}

impl From<ElementBuilder> for Element {
    fn from(builder: ElementBuilder) -> Self {
        builder.build()
    }
}

impl<T: Into<Element>> From<Option<T>> for Element {
    fn from(element: Option<T>) -> Self {
        element.map_or(Element::Empty, Into::into)
    }
}

/// A host element or component element.
#[derive(Clone, Debug)]
pub struct ElementNode {
    pub ty: ElementType,
    pub key: Option<Key>,
    pub props: Props,
    pub node_ref: Option<NodeRef>,
}

/// What an element renders as.
#[derive(Clone, Debug, PartialEq)]
pub enum ElementType {
    /// A host node of the given kind, e.g. `"div"`.
    Host(Arc<str>),
    /// A function component.
    Component(Component),
}

/// A function component.
///
/// Two components are the same type only if they share the same render
/// function allocation, so clone a `Component` rather than rebuilding it.
#[derive(Clone)]
pub struct Component {
    name: Arc<str>,
    render: Arc<RenderFn>,
}

impl Component {
    pub fn new(
        name: impl Into<Arc<str>>,
        render: impl Fn(&mut Hooks<'_>, &Props) -> Element + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            render: Arc::new(render),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn render(&self, hooks: &mut Hooks<'_>, props: &Props) -> Element {
        (self.render)(hooks, props)
    }
}

impl PartialEq for Component {
    fn eq(&self, other: &Self) -> bool {
        Arc::as_ptr(&self.render) as *const () == Arc::as_ptr(&other.render) as *const ()
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Component").field(&self.name).finish()
    }
}

#[derive(Debug, Default)]
struct PropsInner {
    attrs: IndexMap<String, Value>,
    children: Element,
}

/// Attributes and children of an element.
#[derive(Clone, Default)]
pub struct Props {
    inner: Arc<PropsInner>,
}

impl Props {
    pub fn new(attrs: IndexMap<String, Value>, children: Element) -> Self {
        Self {
            inner: Arc::new(PropsInner { attrs, children }),
        }
    }

    pub fn attrs(&self) -> &IndexMap<String, Value> {
        &self.inner.attrs
    }

    /// Value of a single attribute.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.inner.attrs.get(name)
    }

    pub fn children(&self) -> &Element {
        &self.inner.children
    }

    /// `true` when both point at the same allocation.
    pub fn ptr_eq(a: &Props, b: &Props) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl fmt::Debug for Props {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Props")
            .field("attrs", &self.inner.attrs)
            .field("children", &self.inner.children)
            .finish()
    }
}

/// A binding that receives the host instance of the element it is attached
/// to once that element commits.
#[derive(Clone, Default)]
pub struct NodeRef {
    slot: Arc<Mutex<Option<Box<dyn Any + Send>>>>,
}

impl NodeRef {
    pub fn new() -> Self {
        Self::default()
    }

    /// The attached instance, if any and if it is a `T`.
    pub fn get<T: Clone + 'static>(&self) -> Option<T> {
        self.slot
            .lock()
            .as_ref()
            .and_then(|instance| instance.downcast_ref::<T>())
            .cloned()
    }

    pub fn is_attached(&self) -> bool {
        self.slot.lock().is_some()
    }

    pub(crate) fn attach(&self, instance: Box<dyn Any + Send>) {
        *self.slot.lock() = Some(instance);
    }

    pub(crate) fn detach(&self) {
        *self.slot.lock() = None;
    }

    pub(crate) fn ptr_eq(a: &NodeRef, b: &NodeRef) -> bool {
        Arc::ptr_eq(&a.slot, &b.slot)
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef")
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Builder for [`ElementNode`]s.
#[derive(Debug)]
pub struct ElementBuilder {
    ty: ElementType,
    key: Option<Key>,
    attrs: IndexMap<String, Value>,
    children: Option<Element>,
    node_ref: Option<NodeRef>,
}

impl ElementBuilder {
    fn new(ty: ElementType) -> Self {
        Self {
            ty,
            key: None,
            attrs: IndexMap::new(),
            children: None,
            node_ref: None,
        }
    }

    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    /// Append one child. A second child turns the children into a list.
    pub fn child(mut self, child: impl Into<Element>) -> Self {
        let child = child.into();
        self.children = Some(match self.children.take() {
            None => child,
            Some(Element::List(mut items)) => {
                items.push(child);
                Element::List(items)
            }
            Some(first) => Element::List(vec![first, child]),
        });
        self
    }

    /// Append children as a list, even when there is only one.
    pub fn children(mut self, children: impl IntoIterator<Item = Element>) -> Self {
        let mut items = match self.children.take() {
            None => Vec::new(),
            Some(Element::List(items)) => items,
            Some(first) => vec![first],
        };
        items.extend(children);
        self.children = Some(Element::List(items));
        self
    }

    /// Make the element's only child a text leaf.
    pub fn text(mut self, text: impl Into<Arc<str>>) -> Self {
        self.children = Some(Element::Text(text.into()));
        self
    }

    pub fn node_ref(mut self, node_ref: &NodeRef) -> Self {
        self.node_ref = Some(node_ref.clone());
        self
    }

    pub fn build(self) -> Element {
        Element::Node(ElementNode {
            ty: self.ty,
            key: self.key,
            props: Props::new(self.attrs, self.children.unwrap_or_default()),
            node_ref: self.node_ref,
        })
    }
}

/// Flatten nested lists so every entry is a single sibling.
pub(crate) fn flatten_children(items: &[Element]) -> Vec<Element> {
    let mut flat = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Element::List(nested) => flat.extend(flatten_children(nested)),
            other => flat.push(other.clone()),
        }
    }
    flat
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_children_into_a_list() {
        let element = Element::host("ul")
            .child(Element::host("li").text("a"))
            .child(Element::host("li").text("b"))
            .build();

        let Element::Node(node) = element else {
            panic!("expected a node");
        };
        assert!(matches!(node.props.children(), Element::List(items) if items.len() == 2));
    }

    #[test]
    fn components_compare_by_render_function() {
        let a = Component::new("A", |_, _| Element::Empty);
        let b = Component::new("A", |_, _| Element::Empty);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn nested_lists_flatten() {
        let items = vec![
            Element::text("a"),
            Element::list([Element::text("b"), Element::list([Element::text("c")])]),
        ];
        assert_eq!(flatten_children(&items).len(), 3);
    }

    #[test]
    fn node_ref_downcasts_attached_instance() {
        let node_ref = NodeRef::new();
        node_ref.attach(Box::new(7usize));
        assert_eq!(node_ref.get::<usize>(), Some(7));
        assert_eq!(node_ref.get::<u32>(), None);
        node_ref.detach();
        assert!(!node_ref.is_attached());
    }
}
