//! Flattening of [`Node`] trees into renderable sequences.
//!
//! Normalization turns an arbitrary tree into a flat list of text runs and host
//! element descriptors. Nested lists are flattened, empty values dropped,
//! adjacent text merged and stateless components called and spliced in place.
//! Stateful components are not run here: they become a host [`Descriptor`]
//! carrying a [`Mount`] that the renderer drives.

use tracing::trace;

use crate::{
    component::{Args, AsyncComponent, Stateful},
    config::Config,
    error::Result,
    node::{Element, Key, Kind, Memo, Node, NodeRef},
    value::Attributes,
};

/// One entry of a normalized sequence.
#[derive(Debug, Clone)]
pub enum Normalized {
    /// A coalesced, non-empty text run.
    Text(String),
    /// A host element.
    Element(Descriptor),
    /// An async component, rendered by the server only.
    Async(AsyncComponent, Args),
}

/// A host element ready to be reconciled.
#[derive(Debug, Clone)]
pub struct Descriptor {
    /// Host tag.
    pub tag: String,
    /// Attributes, including `set:` properties.
    pub attrs: Attributes,
    /// Children, normalized when the renderer descends.
    pub children: Vec<Node>,
    /// Matching key.
    pub key: Option<Key>,
    /// Leaves the live children untouched.
    pub skip: bool,
    /// Re-render gate.
    pub memo: Option<Memo>,
    /// Ref callback.
    pub node_ref: Option<NodeRef>,
    /// Component hosted by this element.
    pub mount: Option<Mount>,
}

impl Descriptor {
    /// Explicit namespace from the `xmlns` attribute.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.attrs.get("xmlns").and_then(|value| value.as_str())
    }
}

/// Binding between a host element and the stateful component it renders.
#[derive(Debug, Clone)]
pub struct Mount {
    /// The component definition.
    pub component: Stateful,
    /// Arguments for this render.
    pub args: Args,
    /// Whether the parent render should advance the instance.
    pub render: bool,
}

/// Normalizes `node` into text runs and element descriptors.
///
/// # Errors
///
/// Returns the first error raised by a stateless component.
pub fn normalize(node: Node, config: &Config) -> Result<Vec<Normalized>> {
    let mut normalizer = Normalizer {
        config,
        out: Vec::new(),
        text: String::new(),
    };
    normalizer.push(node)?;
    normalizer.flush_text();
    Ok(normalizer.out)
}

/// Normalizes a list of children.
///
/// # Errors
///
/// Returns the first error raised by a stateless component.
pub fn normalize_children(children: Vec<Node>, config: &Config) -> Result<Vec<Normalized>> {
    normalize(Node::List(children), config)
}

struct Normalizer<'a> {
    config: &'a Config,
    out: Vec<Normalized>,
    text: String,
}

impl Normalizer<'_> {
    fn push(&mut self, node: Node) -> Result<()> {
        match node {
            Node::Empty => {}
            Node::Text(text) => self.text.push_str(&text),
            Node::List(nodes) => {
                for node in nodes {
                    self.push(node)?;
                }
            }
            Node::Element(element) => self.element(*element)?,
        }
        Ok(())
    }

    fn flush_text(&mut self) {
        if !self.text.is_empty() {
            self.out.push(Normalized::Text(std::mem::take(&mut self.text)));
        }
    }

    fn element(&mut self, element: Element) -> Result<()> {
        let Element {
            kind,
            attrs,
            children,
            key,
            skip,
            memo,
            node_ref,
        } = element;

        match kind {
            Kind::Tag(tag) => {
                self.flush_text();
                self.out.push(Normalized::Element(Descriptor {
                    tag,
                    attrs,
                    children,
                    key,
                    skip,
                    memo,
                    node_ref,
                    mount: None,
                }));
            }
            Kind::Stateless(component) => {
                trace!(component = component.name(), "inlining stateless component");
                let args = Args::new(attrs, Node::List(children));
                let rendered = component.call(&args)?;
                self.push(rendered)?;
            }
            Kind::Stateful(component) => {
                self.flush_text();
                let (attrs, args) = split_arguments(&component, attrs);
                let tag = component
                    .is()
                    .map_or_else(|| self.config.default_tag.clone(), str::to_owned);
                self.out.push(Normalized::Element(Descriptor {
                    tag,
                    attrs,
                    children: Vec::new(),
                    key,
                    skip: true,
                    memo,
                    node_ref,
                    mount: Some(Mount {
                        component,
                        args: Args::new(args, Node::List(children)),
                        render: !skip,
                    }),
                }));
            }
            Kind::Async(component) => {
                self.flush_text();
                self.out.push(Normalized::Async(
                    component,
                    Args::new(attrs, Node::List(children)),
                ));
            }
        }
        Ok(())
    }
}

/// Splits a component element's attributes into host attributes and arguments.
fn split_arguments(component: &Stateful, attrs: Attributes) -> (Attributes, Attributes) {
    let mut host = component.attrs().clone();
    let mut args = component.args().clone();
    for (name, value) in attrs {
        if let Some(attr) = name.strip_prefix("attr:") {
            host.insert(attr, value);
        } else if name.starts_with("set:") {
            host.insert(name, value);
        } else {
            let arg = name.strip_prefix("arg:").unwrap_or(&name);
            args.insert(arg, value);
        }
    }
    (host, args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        component::{Stateless, render_loop},
        node::h,
        value::Value,
    };

    fn texts(items: &[Normalized]) -> Vec<String> {
        items
            .iter()
            .map(|item| match item {
                Normalized::Text(text) => format!("text:{text}"),
                Normalized::Element(d) => format!("<{}>", d.tag),
                Normalized::Async(c, _) => format!("async:{}", c.name()),
            })
            .collect()
    }

    #[test]
    fn flattens_and_coalesces_text() {
        let tree = Node::list([
            Node::from("a"),
            Node::from(vec![Node::from(1), Node::Empty, Node::from(true)]),
            h("br").into(),
            Node::from("b"),
            Node::from(vec!["c", "d"]),
        ]);

        let out = normalize(tree, &Config::default()).expect("normalize");
        assert_eq!(texts(&out), ["text:a1", "<br>", "text:bcd"]);
    }

    #[test]
    fn stateless_output_is_spliced_into_surrounding_text() {
        let name = Stateless::new("Name", |args: &Args| {
            args.str("first").unwrap_or_default().to_owned()
        });
        let tree = Node::list([
            Node::from("Hi "),
            h(name).attr("first", "Ada").into(),
            Node::from("!"),
        ]);

        let out = normalize(tree, &Config::default()).expect("normalize");
        assert_eq!(texts(&out), ["text:Hi Ada!"]);
    }

    #[test]
    fn empty_strings_vanish() {
        let out = normalize(Node::from(vec!["", ""]), &Config::default()).expect("normalize");
        assert!(out.is_empty());
    }

    #[test]
    fn stateful_becomes_host_descriptor() {
        let component = Stateful::builder("Card", |_| render_loop(|_| Ok(Node::Empty)))
            .attr("role", "region")
            .arg("size", 1)
            .build()
            .expect("valid");

        let tree = h(component)
            .attr("attr:id", "main")
            .set("hidden", true)
            .attr("title", "T")
            .attr("arg:size", 2)
            .key("k")
            .child("body");

        let out = normalize(tree.into(), &Config::default()).expect("normalize");
        let Some(Normalized::Element(descriptor)) = out.first() else {
            panic!("expected a host element");
        };

        assert_eq!(descriptor.tag, "div");
        assert!(descriptor.skip);
        assert_eq!(descriptor.key, Some(Key::from("k")));
        assert_eq!(descriptor.attrs.get("role"), Some(&Value::from("region")));
        assert_eq!(descriptor.attrs.get("id"), Some(&Value::from("main")));
        assert!(descriptor.attrs.contains("set:hidden"));
        assert!(!descriptor.attrs.contains("title"));

        let mount = descriptor.mount.as_ref().expect("mount");
        assert!(mount.render);
        assert_eq!(mount.args.str("title"), Some("T"));
        assert_eq!(mount.args.int("size"), Some(2));
        assert!(matches!(mount.args.children(), Node::List(c) if c.len() == 1));
    }

    #[test]
    fn stateful_uses_is_and_configured_default() {
        let plain = Stateful::builder("Plain", |_| render_loop(|_| Ok(Node::Empty)))
            .build()
            .expect("valid");
        let custom = Stateful::builder("Custom", |_| render_loop(|_| Ok(Node::Empty)))
            .is("section")
            .build()
            .expect("valid");
        let config = Config {
            default_tag: "x-host".to_owned(),
            ..Config::default()
        };

        let out = normalize(Node::list([h(plain), h(custom)]), &config).expect("normalize");
        assert_eq!(texts(&out), ["<x-host>", "<section>"]);
    }

    #[test]
    fn stateless_errors_propagate() {
        let failing = Stateless::fallible("Failing", |_| Err(crate::Error::msg("nope")));
        assert!(normalize(h(failing).into(), &Config::default()).is_err());
    }
}
