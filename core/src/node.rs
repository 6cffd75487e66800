//! The virtual node model and the [`h`] builder.
//!
//! A [`Node`] is plain data describing what should be rendered. Elements are
//! built with [`h`] and its chained setters:
//!
//! ```
//! use arbor_core::h;
//!
//! let tree = h("div").attr("class", "c").child("Hello").child(h("br")).child(" World");
//! ```

use std::{fmt, rc::Rc};

use crate::{
    component::{AsyncComponent, Stateful, Stateless},
    value::{Attributes, Value, format_number},
};

/// Handle to a live node owned by a renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Creates a new [`NodeId`] from the raw index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the raw index backing this identifier.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// A renderable tree description.
#[derive(Debug, Clone, Default)]
pub enum Node {
    /// Renders nothing.
    #[default]
    Empty,
    /// A run of text.
    Text(String),
    /// An element or component.
    Element(Box<Element>),
    /// A sequence of nodes, flattened during normalization.
    List(Vec<Node>),
}

impl Node {
    /// Creates a text node.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Collects nodes into a [`Node::List`].
    pub fn list<I, N>(nodes: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<Self>,
    {
        Self::List(nodes.into_iter().map(Into::into).collect())
    }

    /// Returns `true` if the node renders nothing once flattened.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(text) => text.is_empty(),
            Self::Element(_) => false,
            Self::List(nodes) => nodes.iter().all(Self::is_empty),
        }
    }
}

impl From<Element> for Node {
    fn from(element: Element) -> Self {
        Self::Element(Box::new(element))
    }
}

impl From<String> for Node {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Node {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<&String> for Node {
    fn from(text: &String) -> Self {
        Self::Text(text.clone())
    }
}

macro_rules! impl_number {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Node {
                fn from(value: $ty) -> Self {
                    Self::Text(value.to_string())
                }
            }
        )*
    };
}

impl_number!(i32, i64, u32, u64, usize);

impl From<f64> for Node {
    fn from(value: f64) -> Self {
        Self::Text(format_number(value))
    }
}

impl From<bool> for Node {
    fn from(_: bool) -> Self {
        Self::Empty
    }
}

impl From<()> for Node {
    fn from((): ()) -> Self {
        Self::Empty
    }
}

impl<T: Into<Self>> From<Option<T>> for Node {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Empty, Into::into)
    }
}

impl<T: Into<Self>> From<Vec<T>> for Node {
    fn from(nodes: Vec<T>) -> Self {
        Self::list(nodes)
    }
}

/// What an [`Element`] renders as.
#[derive(Clone)]
pub enum Kind {
    /// A host tag such as `div`.
    Tag(String),
    /// A function inlined during normalization.
    Stateless(Stateless),
    /// A component backed by a resumable routine.
    Stateful(Stateful),
    /// A component that resolves asynchronously on the server.
    Async(AsyncComponent),
}

impl fmt::Debug for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tag(tag) => f.debug_tuple("Tag").field(tag).finish(),
            Self::Stateless(c) => f.debug_tuple("Stateless").field(&c.name()).finish(),
            Self::Stateful(c) => f.debug_tuple("Stateful").field(&c.name()).finish(),
            Self::Async(c) => f.debug_tuple("Async").field(&c.name()).finish(),
        }
    }
}

impl From<&str> for Kind {
    fn from(tag: &str) -> Self {
        Self::Tag(tag.to_owned())
    }
}

impl From<String> for Kind {
    fn from(tag: String) -> Self {
        Self::Tag(tag)
    }
}

impl From<Stateless> for Kind {
    fn from(component: Stateless) -> Self {
        Self::Stateless(component)
    }
}

impl From<Stateful> for Kind {
    fn from(component: Stateful) -> Self {
        Self::Stateful(component)
    }
}

impl From<AsyncComponent> for Kind {
    fn from(component: AsyncComponent) -> Self {
        Self::Async(component)
    }
}

impl From<&Stateful> for Kind {
    fn from(component: &Stateful) -> Self {
        Self::Stateful(component.clone())
    }
}

impl From<&Stateless> for Kind {
    fn from(component: &Stateless) -> Self {
        Self::Stateless(component.clone())
    }
}

impl From<&AsyncComponent> for Kind {
    fn from(component: &AsyncComponent) -> Self {
        Self::Async(component.clone())
    }
}

/// Identity used to match elements across renders.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key(pub String);

impl Key {
    /// Borrows the key text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Key {
    fn from(key: &str) -> Self {
        Self(key.to_owned())
    }
}

impl From<String> for Key {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<i32> for Key {
    fn from(key: i32) -> Self {
        Self(key.to_string())
    }
}

impl From<i64> for Key {
    fn from(key: i64) -> Self {
        Self(key.to_string())
    }
}

impl From<usize> for Key {
    fn from(key: usize) -> Self {
        Self(key.to_string())
    }
}

/// Token gating re-rendering of a subtree.
///
/// List tokens compare element by element, other tokens compare as values.
#[derive(Debug, Clone, PartialEq)]
pub struct Memo(pub Value);

impl Memo {
    /// Wraps a token value.
    pub fn new(value: impl Into<Value>) -> Self {
        Self(value.into())
    }
}

/// Callback receiving the live node after it is patched, and `None` when it is torn down.
#[derive(Clone)]
pub struct NodeRef(Rc<dyn Fn(Option<NodeId>)>);

impl NodeRef {
    /// Wraps a callback.
    pub fn new(f: impl Fn(Option<NodeId>) + 'static) -> Self {
        Self(Rc::new(f))
    }

    /// Invokes the callback.
    pub fn call(&self, node: Option<NodeId>) {
        (self.0)(node);
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NodeRef(..)")
    }
}

/// An element or component description.
#[derive(Debug, Clone)]
pub struct Element {
    /// Tag or component.
    pub kind: Kind,
    /// Attributes, or arguments for components.
    pub attrs: Attributes,
    /// Child nodes.
    pub children: Vec<Node>,
    /// Identity for keyed matching.
    pub key: Option<Key>,
    /// Leaves the children of the live node untouched.
    pub skip: bool,
    /// Re-render gate.
    pub memo: Option<Memo>,
    /// Invoked with the live node after patching.
    pub node_ref: Option<NodeRef>,
}

/// Starts building an element of the given kind.
pub fn h(kind: impl Into<Kind>) -> Element {
    Element {
        kind: kind.into(),
        attrs: Attributes::new(),
        children: Vec::new(),
        key: None,
        skip: false,
        memo: None,
        node_ref: None,
    }
}

impl Element {
    /// Sets an attribute (or component argument).
    ///
    /// `key` and `skip` are routed to their directives instead.
    #[must_use]
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        let value = value.into();
        match name.as_str() {
            "key" => self.key = value.to_attribute().map(Key),
            "skip" => self.skip = value.is_truthy(),
            _ => self.attrs.insert(name, value),
        }
        self
    }

    /// Assigns a property on the live node instead of an attribute.
    #[must_use]
    pub fn set(mut self, property: &str, value: impl Into<Value>) -> Self {
        self.attrs.insert(format!("set:{property}"), value);
        self
    }

    /// Appends a child.
    #[must_use]
    pub fn child(mut self, child: impl Into<Node>) -> Self {
        self.children.push(child.into());
        self
    }

    /// Appends several children.
    #[must_use]
    pub fn children<I, N>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<Node>,
    {
        self.children.extend(children.into_iter().map(Into::into));
        self
    }

    /// Sets the matching key.
    #[must_use]
    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Marks the element's children as externally managed.
    #[must_use]
    pub const fn skip(mut self, skip: bool) -> Self {
        self.skip = skip;
        self
    }

    /// Sets the memo token.
    #[must_use]
    pub fn memo(mut self, memo: impl Into<Value>) -> Self {
        self.memo = Some(Memo::new(memo));
        self
    }

    /// Registers a ref callback.
    #[must_use]
    pub fn node_ref(mut self, node_ref: impl Fn(Option<NodeId>) + 'static) -> Self {
        self.node_ref = Some(NodeRef::new(node_ref));
        self
    }

    /// Returns the tag for host elements.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        match &self.kind {
            Kind::Tag(tag) => Some(tag),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_routes_directives() {
        let element = h("li").attr("key", 7).attr("skip", true).attr("class", "x");

        assert_eq!(element.key, Some(Key::from("7")));
        assert!(element.skip);
        assert_eq!(element.attrs.len(), 1);
    }

    #[test]
    fn set_prefixes_property_names() {
        let element = h("input").set("value", "abc");
        assert_eq!(element.attrs.get("set:value"), Some(&Value::from("abc")));
    }

    #[test]
    fn conversions_discard_booleans_and_none() {
        assert!(Node::from(true).is_empty());
        assert!(Node::from(None::<&str>).is_empty());
        assert!(matches!(Node::from(3.0), Node::Text(ref t) if t == "3"));
        assert!(!Node::from(vec![Node::Empty, Node::from("x")]).is_empty());
    }
}
