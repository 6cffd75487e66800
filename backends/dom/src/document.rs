//! In-memory document the runtime renders into.
//!
//! Nodes live in an arena addressed by [`NodeId`]. Slots of discarded nodes
//! are never reused, so a stale id can always be detected.

use std::collections::HashMap;

use arbor_core::{
    Error, NodeId, Result, Value,
    markup::{escape, is_void},
};

/// Properties that cannot be assigned on an element.
const READ_ONLY_PROPERTIES: [&str; 6] = [
    "tagName",
    "nodeName",
    "nodeType",
    "parentNode",
    "childNodes",
    "namespaceURI",
];

/// A structural or attribute change recorded by the [`Document`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// An element was created.
    CreateElement(NodeId),
    /// A text node was created.
    CreateText(NodeId),
    /// Text content changed.
    SetText(NodeId),
    /// An attribute was written.
    SetAttribute(NodeId, String),
    /// An attribute was removed.
    RemoveAttribute(NodeId, String),
    /// A property was assigned.
    SetProperty(NodeId, String),
    /// A node was inserted or moved under `parent`.
    Insert {
        /// New parent.
        parent: NodeId,
        /// Inserted node.
        node: NodeId,
    },
    /// A node was removed from `parent`.
    Remove {
        /// Former parent.
        parent: NodeId,
        /// Removed node.
        node: NodeId,
    },
}

#[derive(Debug)]
struct ElementData {
    tag: String,
    namespace: Option<String>,
    attributes: Vec<(String, String)>,
    properties: HashMap<String, Value>,
}

#[derive(Debug)]
enum NodeKind {
    Element(ElementData),
    Text(String),
}

#[derive(Debug)]
struct NodeData {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    kind: NodeKind,
}

/// Arena backed document tree rooted at a `body` element.
#[derive(Debug)]
pub struct Document {
    nodes: Vec<Option<NodeData>>,
    body: NodeId,
    focused: Option<NodeId>,
    /// `None` while recording is off.
    mutations: Option<Vec<Mutation>>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Creates a document containing an empty `body`.
    #[must_use]
    pub fn new() -> Self {
        let body = NodeData {
            parent: None,
            children: Vec::new(),
            kind: NodeKind::Element(ElementData {
                tag: "body".to_owned(),
                namespace: None,
                attributes: Vec::new(),
                properties: HashMap::new(),
            }),
        };
        Self {
            nodes: vec![Some(body)],
            body: NodeId::new(0),
            focused: None,
            mutations: None,
        }
    }

    /// The root element.
    #[must_use]
    pub const fn body(&self) -> NodeId {
        self.body
    }

    fn data(&self, id: NodeId) -> Result<&NodeData> {
        self.nodes
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or(Error::StaleNode(id))
    }

    fn data_mut(&mut self, id: NodeId) -> Result<&mut NodeData> {
        self.nodes
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(Error::StaleNode(id))
    }

    fn element_mut(&mut self, id: NodeId) -> Result<&mut ElementData> {
        match &mut self.data_mut(id)?.kind {
            NodeKind::Element(element) => Ok(element),
            NodeKind::Text(_) => Err(Error::StaleNode(id)),
        }
    }

    fn element(&self, id: NodeId) -> Option<&ElementData> {
        match &self.data(id).ok()?.kind {
            NodeKind::Element(element) => Some(element),
            NodeKind::Text(_) => None,
        }
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        self.nodes.push(Some(NodeData {
            parent: None,
            children: Vec::new(),
            kind,
        }));
        id
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Creates a detached element.
    pub fn create_element(&mut self, tag: &str, namespace: Option<&str>) -> NodeId {
        let id = self.push(NodeKind::Element(ElementData {
            tag: tag.to_owned(),
            namespace: namespace.map(str::to_owned),
            attributes: Vec::new(),
            properties: HashMap::new(),
        }));
        self.record(Mutation::CreateElement(id));
        id
    }

    /// Creates a detached text node.
    pub fn create_text(&mut self, text: &str) -> NodeId {
        let id = self.push(NodeKind::Text(text.to_owned()));
        self.record(Mutation::CreateText(id));
        id
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Returns `true` if `id` has not been discarded.
    #[must_use]
    pub fn exists(&self, id: NodeId) -> bool {
        self.data(id).is_ok()
    }

    /// Returns `true` for element nodes.
    #[must_use]
    pub fn is_element(&self, id: NodeId) -> bool {
        self.element(id).is_some()
    }

    /// Returns `true` for text nodes.
    #[must_use]
    pub fn is_text(&self, id: NodeId) -> bool {
        self.text(id).is_some()
    }

    /// Tag name of an element.
    #[must_use]
    pub fn tag(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|element| element.tag.as_str())
    }

    /// Namespace of an element. `None` is the HTML namespace.
    #[must_use]
    pub fn namespace(&self, id: NodeId) -> Option<&str> {
        self.element(id)
            .and_then(|element| element.namespace.as_deref())
    }

    /// Content of a text node.
    #[must_use]
    pub fn text(&self, id: NodeId) -> Option<&str> {
        match &self.data(id).ok()?.kind {
            NodeKind::Text(text) => Some(text),
            NodeKind::Element(_) => None,
        }
    }

    /// Concatenated text of the subtree.
    #[must_use]
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        if let Some(text) = self.text(id) {
            out.push_str(text);
        }
        for &child in self.children(id) {
            self.collect_text(child, out);
        }
    }

    /// Parent of a node.
    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.data(id).ok()?.parent
    }

    /// Children of a node.
    #[must_use]
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.data(id).map_or(&[], |data| data.children.as_slice())
    }

    /// First child of a node.
    #[must_use]
    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.children(id).first().copied()
    }

    /// The node following `id` under the same parent.
    #[must_use]
    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let siblings = self.children(self.parent(id)?);
        let index = siblings.iter().position(|&child| child == id)?;
        siblings.get(index + 1).copied()
    }

    /// Returns `true` if `node` is `ancestor` or one of its descendants.
    #[must_use]
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut cursor = Some(node);
        while let Some(id) = cursor {
            if id == ancestor {
                return true;
            }
            cursor = self.parent(id);
        }
        false
    }

    /// Returns `true` if the node is attached under `body`.
    #[must_use]
    pub fn is_connected(&self, id: NodeId) -> bool {
        self.exists(id) && self.contains(self.body, id)
    }

    /// Number of ancestors between the node and its root.
    #[must_use]
    pub fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut cursor = self.parent(id);
        while let Some(parent) = cursor {
            depth += 1;
            cursor = self.parent(parent);
        }
        depth
    }

    // ========================================================================
    // Structure
    // ========================================================================

    fn detach(&mut self, id: NodeId) -> Result<Option<NodeId>> {
        let parent = self.data(id)?.parent;
        if let Some(parent) = parent {
            self.data_mut(parent)?.children.retain(|&child| child != id);
            self.data_mut(id)?.parent = None;
        }
        Ok(parent)
    }

    /// Appends `node` as the last child of `parent`, moving it if attached elsewhere.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleNode`] if either node is unknown.
    pub fn append_child(&mut self, parent: NodeId, node: NodeId) -> Result<()> {
        self.insert_before(parent, node, None)
    }

    /// Inserts `node` before `reference` under `parent`, or appends it when
    /// `reference` is `None` or not a child of `parent`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleNode`] if either node is unknown.
    pub fn insert_before(
        &mut self,
        parent: NodeId,
        node: NodeId,
        reference: Option<NodeId>,
    ) -> Result<()> {
        self.data(parent)?;
        self.detach(node)?;
        let children = &mut self.data_mut(parent)?.children;
        let index = reference
            .and_then(|reference| children.iter().position(|&child| child == reference))
            .unwrap_or(children.len());
        children.insert(index, node);
        self.data_mut(node)?.parent = Some(parent);
        self.record(Mutation::Insert { parent, node });
        Ok(())
    }

    /// Detaches `node` from `parent`. The node stays usable until discarded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleNode`] if either node is unknown.
    pub fn remove_child(&mut self, parent: NodeId, node: NodeId) -> Result<()> {
        if self.data(node)?.parent == Some(parent) {
            self.detach(node)?;
            self.record(Mutation::Remove { parent, node });
        }
        Ok(())
    }

    /// Frees a detached subtree. Its ids become stale.
    pub fn discard(&mut self, id: NodeId) {
        let children = self
            .data(id)
            .map(|data| data.children.clone())
            .unwrap_or_default();
        for child in children {
            self.discard(child);
        }
        if let Some(slot) = self.nodes.get_mut(id.index()) {
            *slot = None;
        }
        if self.focused == Some(id) {
            self.focused = None;
        }
    }

    /// Removes every child of `parent` and frees them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleNode`] if `parent` is unknown.
    pub fn clear(&mut self, parent: NodeId) -> Result<()> {
        for child in self.data(parent)?.children.clone() {
            self.remove_child(parent, child)?;
            self.discard(child);
        }
        Ok(())
    }

    // ========================================================================
    // Content
    // ========================================================================

    /// Replaces the content of a text node.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleNode`] if `id` is not a text node.
    pub fn set_text(&mut self, id: NodeId, text: &str) -> Result<()> {
        match &mut self.data_mut(id)?.kind {
            NodeKind::Text(current) => {
                text.clone_into(current);
                self.record(Mutation::SetText(id));
                Ok(())
            }
            NodeKind::Element(_) => Err(Error::StaleNode(id)),
        }
    }

    /// Reads an attribute.
    #[must_use]
    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id)?
            .attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// All attributes in insertion order.
    #[must_use]
    pub fn attributes(&self, id: NodeId) -> Vec<(&str, &str)> {
        self.element(id)
            .map(|element| {
                element
                    .attributes
                    .iter()
                    .map(|(n, v)| (n.as_str(), v.as_str()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Writes an attribute.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleNode`] if `id` is not an element.
    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) -> Result<()> {
        let element = self.element_mut(id)?;
        if let Some(slot) = element.attributes.iter_mut().find(|(n, _)| n == name) {
            value.clone_into(&mut slot.1);
        } else {
            element.attributes.push((name.to_owned(), value.to_owned()));
        }
        self.record(Mutation::SetAttribute(id, name.to_owned()));
        Ok(())
    }

    /// Removes an attribute if present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleNode`] if `id` is not an element.
    pub fn remove_attribute(&mut self, id: NodeId, name: &str) -> Result<()> {
        let element = self.element_mut(id)?;
        let before = element.attributes.len();
        element.attributes.retain(|(n, _)| n != name);
        if element.attributes.len() != before {
            self.record(Mutation::RemoveAttribute(id, name.to_owned()));
        }
        Ok(())
    }

    /// Reads a property.
    #[must_use]
    pub fn property(&self, id: NodeId, name: &str) -> Option<&Value> {
        self.element(id)?.properties.get(name)
    }

    /// Assigns a property.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReadOnlyProperty`] for structural properties and
    /// [`Error::StaleNode`] if `id` is not an element.
    pub fn set_property(&mut self, id: NodeId, name: &str, value: Value) -> Result<()> {
        if READ_ONLY_PROPERTIES.contains(&name) {
            return Err(Error::ReadOnlyProperty(name.to_owned()));
        }
        self.element_mut(id)?
            .properties
            .insert(name.to_owned(), value);
        self.record(Mutation::SetProperty(id, name.to_owned()));
        Ok(())
    }

    // ========================================================================
    // Focus and queries
    // ========================================================================

    /// Focuses an element.
    pub fn focus(&mut self, id: NodeId) {
        if self.is_element(id) {
            self.focused = Some(id);
        }
    }

    /// Clears focus.
    pub fn blur(&mut self) {
        self.focused = None;
    }

    /// The focused element, if it is still connected.
    #[must_use]
    pub fn active_element(&self) -> Option<NodeId> {
        self.focused.filter(|&id| self.is_connected(id))
    }

    /// First connected element, in document order, whose attribute `name` equals `value`.
    #[must_use]
    pub fn query_attribute(&self, name: &str, value: &str) -> Option<NodeId> {
        let mut stack = vec![self.body];
        while let Some(id) = stack.pop() {
            if self.attribute(id, name) == Some(value) {
                return Some(id);
            }
            stack.extend(self.children(id).iter().rev());
        }
        None
    }

    /// Elements with the given tag under `root`, in document order.
    #[must_use]
    pub fn elements_by_tag(&self, root: NodeId, tag: &str) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if self.tag(id) == Some(tag) {
                found.push(id);
            }
            stack.extend(self.children(id).iter().rev());
        }
        found
    }

    // ========================================================================
    // Serialization
    // ========================================================================

    /// Markup of the node's children.
    #[must_use]
    pub fn inner_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        for &child in self.children(id) {
            self.write_html(child, &mut out);
        }
        out
    }

    /// Markup of the node itself.
    #[must_use]
    pub fn outer_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_html(id, &mut out);
        out
    }

    fn write_html(&self, id: NodeId, out: &mut String) {
        let Ok(data) = self.data(id) else {
            return;
        };
        match &data.kind {
            NodeKind::Text(text) => out.push_str(&escape(text)),
            NodeKind::Element(element) => {
                out.push('<');
                out.push_str(&element.tag);
                for (name, value) in &element.attributes {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    out.push_str(&escape(value));
                    out.push('"');
                }
                out.push('>');
                if is_void(&element.tag) {
                    return;
                }
                for &child in &data.children {
                    self.write_html(child, out);
                }
                out.push_str("</");
                out.push_str(&element.tag);
                out.push('>');
            }
        }
    }

    /// Turns the mutation log on or off. Turning it off drops what was recorded.
    pub fn record_mutations(&mut self, enabled: bool) {
        match (enabled, self.mutations.is_some()) {
            (true, false) => self.mutations = Some(Vec::new()),
            (false, true) => self.mutations = None,
            _ => {}
        }
    }

    /// Returns `true` if mutations are being recorded.
    #[must_use]
    pub const fn is_recording(&self) -> bool {
        self.mutations.is_some()
    }

    /// Drains the mutation log. Always empty while recording is off.
    pub fn take_mutations(&mut self) -> Vec<Mutation> {
        self.mutations.as_mut().map(std::mem::take).unwrap_or_default()
    }

    fn record(&mut self, mutation: Mutation) {
        if let Some(log) = &mut self.mutations {
            log.push(mutation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_with_list() -> (Document, NodeId, [NodeId; 3]) {
        let mut doc = Document::new();
        let list = doc.create_element("ul", None);
        doc.append_child(doc.body(), list).expect("append");
        let items = ["a", "b", "c"].map(|text| {
            let li = doc.create_element("li", None);
            let t = doc.create_text(text);
            doc.append_child(li, t).expect("append");
            doc.append_child(list, li).expect("append");
            li
        });
        (doc, list, items)
    }

    #[test]
    fn insert_before_moves_existing_nodes() {
        let (mut doc, list, [a, b, c]) = doc_with_list();

        doc.insert_before(list, c, Some(a)).expect("move");

        assert_eq!(doc.children(list), &[c, a, b]);
        assert_eq!(doc.next_sibling(a), Some(b));
        assert_eq!(doc.inner_html(list), "<li>c</li><li>a</li><li>b</li>");
    }

    #[test]
    fn discarded_nodes_become_stale() {
        let (mut doc, list, [_, b, _]) = doc_with_list();

        doc.remove_child(list, b).expect("remove");
        assert!(doc.exists(b));
        assert!(!doc.is_connected(b));

        doc.discard(b);
        assert!(!doc.exists(b));
        assert!(matches!(
            doc.set_attribute(b, "x", "y"),
            Err(Error::StaleNode(_))
        ));
    }

    #[test]
    fn structural_properties_are_read_only() {
        let (mut doc, list, _) = doc_with_list();

        assert!(matches!(
            doc.set_property(list, "tagName", Value::from("x")),
            Err(Error::ReadOnlyProperty(_))
        ));
        doc.set_property(list, "value", Value::from(3))
            .expect("assignable");
        assert_eq!(doc.property(list, "value"), Some(&Value::from(3)));
    }

    #[test]
    fn contains_is_ancestor_or_self() {
        let (doc, list, [a, ..]) = doc_with_list();

        assert!(doc.contains(list, a));
        assert!(doc.contains(a, a));
        assert!(!doc.contains(a, list));
        assert_eq!(doc.depth(a), 2);
    }

    #[test]
    fn query_finds_first_in_document_order() {
        let (mut doc, _, [a, b, _]) = doc_with_list();
        doc.set_attribute(b, "data-ssr", "1").expect("set");
        doc.set_attribute(a, "data-ssr", "1").expect("set");

        assert_eq!(doc.query_attribute("data-ssr", "1"), Some(a));
        assert_eq!(doc.query_attribute("data-ssr", "2"), None);
    }

    #[test]
    fn mutations_are_recorded() {
        let mut doc = Document::new();
        doc.record_mutations(true);
        let p = doc.create_element("p", None);
        doc.append_child(doc.body(), p).expect("append");
        doc.set_attribute(p, "class", "x").expect("set");
        doc.remove_attribute(p, "missing").expect("remove");

        assert_eq!(
            doc.take_mutations(),
            vec![
                Mutation::CreateElement(p),
                Mutation::Insert {
                    parent: doc.body(),
                    node: p
                },
                Mutation::SetAttribute(p, "class".to_owned()),
            ]
        );
        assert!(doc.take_mutations().is_empty());
    }

    #[test]
    fn nothing_is_recorded_by_default() {
        let mut doc = Document::new();
        assert!(!doc.is_recording());
        for n in 0..100 {
            let p = doc.create_element("p", None);
            doc.append_child(doc.body(), p).expect("append");
            doc.set_attribute(p, "n", &n.to_string()).expect("set");
        }
        assert!(doc.take_mutations().is_empty());

        doc.record_mutations(true);
        let p = doc.create_element("p", None);
        assert_eq!(doc.take_mutations(), [Mutation::CreateElement(p)]);

        doc.set_attribute(p, "class", "x").expect("set");
        doc.record_mutations(false);
        assert!(doc.take_mutations().is_empty());
    }
}
