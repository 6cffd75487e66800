//! Markup emission.

use arbor_core::{
    Attributes, Config, Node, Value, h,
    markup::{escape, is_void},
};

use crate::resolve::{Frame, Hole, Resolved};

/// Writes resolved nodes as markup. Holes are written as their placeholder.
pub(crate) fn to_string(nodes: &[Resolved], config: &Config) -> String {
    let mut out = String::new();
    write_all(nodes, config, &mut out);
    out
}

fn write_all(nodes: &[Resolved], config: &Config, out: &mut String) {
    for node in nodes {
        match node {
            Resolved::Text(text) => out.push_str(&escape(text)),
            Resolved::Element(Frame {
                tag,
                attrs,
                children,
                skip,
            }) => write_element(tag, attrs, children, *skip, config, out),
            Resolved::Hole(Hole { id, fallback, .. }) => {
                let attrs = placeholder_attrs(config, id);
                write_element("div", &attrs, fallback, false, config, out);
            }
        }
    }
}

fn write_element(
    tag: &str,
    attrs: &Attributes,
    children: &[Resolved],
    skip: bool,
    config: &Config,
    out: &mut String,
) {
    out.push('<');
    out.push_str(tag);
    for (name, value) in attrs.iter() {
        if name.starts_with("set:") {
            continue;
        }
        if matches!(value, Value::Bool(true)) {
            out.push(' ');
            out.push_str(name);
        } else if let Some(text) = value.to_attribute() {
            out.push(' ');
            out.push_str(name);
            out.push_str("=\"");
            out.push_str(&escape(&text));
            out.push('"');
        }
    }
    out.push('>');
    if is_void(tag) {
        return;
    }
    if !skip {
        write_all(children, config, out);
    }
    out.push_str("</");
    out.push_str(tag);
    out.push('>');
}

fn placeholder_attrs(config: &Config, id: &str) -> Attributes {
    [(config.placeholder_attribute.as_str(), id)]
        .into_iter()
        .collect()
}

/// Converts resolved nodes back into a tree the client can render.
pub(crate) fn into_node(nodes: Vec<Resolved>, config: &Config) -> Node {
    Node::List(into_nodes(nodes, config))
}

fn into_nodes(nodes: Vec<Resolved>, config: &Config) -> Vec<Node> {
    nodes
        .into_iter()
        .map(|node| match node {
            Resolved::Text(text) => Node::Text(text),
            Resolved::Element(frame) => {
                let mut element = h(frame.tag);
                element.attrs = frame.attrs;
                element.skip = frame.skip;
                element.children = into_nodes(frame.children, config);
                element.into()
            }
            Resolved::Hole(hole) => {
                let mut element = h("div");
                element.attrs = placeholder_attrs(config, &hole.id);
                element.children = into_nodes(hole.fallback, config);
                element.into()
            }
        })
        .collect()
}
