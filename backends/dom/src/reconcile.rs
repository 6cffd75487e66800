//! Reconciliation of normalized sequences against live children.
//!
//! The walk keeps a cursor on the first live child not yet consumed. Each
//! item claims a node at or after the cursor (text nodes by kind, elements by
//! tag, key and component identity), or creates one. Claimed nodes are moved
//! in front of the cursor; whatever remains after the last item is torn down
//! and removed.

use arbor_core::{
    Attributes, Descriptor, Error, Node, NodeId, Normalized, Result, SVG_NAMESPACE, Value,
    normalize::normalize_children,
};
use tracing::{debug, trace};

use crate::runtime::Runtime;

impl Runtime {
    /// Reconciles the children of `parent` against `nodes`.
    pub(crate) fn patch_children(&mut self, parent: NodeId, nodes: Vec<Node>) -> Result<()> {
        let items = normalize_children(nodes, &self.config)?;
        self.reconcile(parent, items)
    }

    fn reconcile(&mut self, parent: NodeId, items: Vec<Normalized>) -> Result<()> {
        let mut cursor = self.document.first_child(parent);
        for item in items {
            match item {
                Normalized::Text(text) => {
                    let node = self.claim_text(cursor, &text)?;
                    cursor = self.place(parent, node, cursor)?;
                }
                Normalized::Element(descriptor) => {
                    let node = self.claim_element(parent, cursor, &descriptor);
                    cursor = self.place(parent, node, cursor)?;
                    self.patch_element(node, descriptor)?;
                }
                Normalized::Async(component, _) => {
                    return Err(Error::AsyncComponent {
                        name: component.name().to_owned(),
                    });
                }
            }
        }
        self.remove_from(parent, cursor)
    }

    fn claim_text(&mut self, cursor: Option<NodeId>, text: &str) -> Result<NodeId> {
        let mut candidate = cursor;
        while let Some(node) = candidate {
            if let Some(differs) = self.document.text(node).map(|current| current != text) {
                if differs {
                    self.document.set_text(node, text)?;
                }
                return Ok(node);
            }
            candidate = self.document.next_sibling(node);
        }
        let node = self.document.create_text(text);
        trace!(?node, "created text node");
        Ok(node)
    }

    fn claim_element(
        &mut self,
        parent: NodeId,
        cursor: Option<NodeId>,
        descriptor: &Descriptor,
    ) -> NodeId {
        let mut candidate = cursor;
        while let Some(node) = candidate {
            if self.document.tag(node) == Some(descriptor.tag.as_str())
                && self.same_identity(node, descriptor)
            {
                // Nodes without a key adopt the descriptor's.
                let meta = self.meta.entry(node).or_default();
                if meta.key.is_none() {
                    meta.key.clone_from(&descriptor.key);
                }
                if meta.key == descriptor.key {
                    return node;
                }
            }
            candidate = self.document.next_sibling(node);
        }

        let namespace = descriptor
            .namespace()
            .map(str::to_owned)
            .or_else(|| (descriptor.tag == "svg").then(|| SVG_NAMESPACE.to_owned()))
            .or_else(|| self.document.namespace(parent).map(str::to_owned));
        let node = self
            .document
            .create_element(&descriptor.tag, namespace.as_deref());
        self.meta.entry(node).or_default().key.clone_from(&descriptor.key);
        trace!(?node, tag = %descriptor.tag, "created element");
        node
    }

    /// Hosts only match descriptors mounting the same component. Plain nodes
    /// can be adopted as hosts, which is how server markup is taken over.
    fn same_identity(&self, node: NodeId, descriptor: &Descriptor) -> bool {
        let instance = self.instance(node).filter(|instance| !instance.is_disposed());
        match (instance, &descriptor.mount) {
            (Some(instance), Some(mount)) => instance.is_instance_of(&mount.component),
            (Some(_), None) => false,
            (None, _) => true,
        }
    }

    /// Moves `node` in front of `cursor` and returns the next cursor.
    ///
    /// A node holding focus stays put: the siblings between the cursor and the
    /// node are moved after it instead.
    fn place(
        &mut self,
        parent: NodeId,
        node: NodeId,
        cursor: Option<NodeId>,
    ) -> Result<Option<NodeId>> {
        if Some(node) == cursor {
            return Ok(self.document.next_sibling(node));
        }
        let holds_focus = self
            .document
            .active_element()
            .is_some_and(|active| self.document.contains(node, active));

        if holds_focus && cursor.is_some() && self.document.parent(node) == Some(parent) {
            let mut between = Vec::new();
            let mut sibling = cursor;
            while let Some(current) = sibling.filter(|&current| current != node) {
                between.push(current);
                sibling = self.document.next_sibling(current);
            }
            let anchor = self.document.next_sibling(node);
            trace!(?node, moved = between.len(), "keeping focused node in place");
            for sibling in between {
                self.document.insert_before(parent, sibling, anchor)?;
            }
        } else {
            trace!(?node, ?cursor, "inserting node");
            self.document.insert_before(parent, node, cursor)?;
        }
        Ok(cursor)
    }

    fn patch_element(&mut self, node: NodeId, descriptor: Descriptor) -> Result<()> {
        let Descriptor {
            attrs,
            children,
            skip,
            memo,
            node_ref,
            mount,
            ..
        } = descriptor;

        let meta = self.meta.entry(node).or_default();
        if let Some(memo) = memo {
            if meta.memo.as_ref() == Some(&memo) {
                trace!(?node, "memo unchanged, skipping subtree");
                return Ok(());
            }
            meta.memo = Some(memo);
        }
        let previous = meta.cache.take();
        let previous = previous.unwrap_or_else(|| self.live_attributes(node));
        self.patch_attributes(node, &previous, &attrs)?;

        let meta = self.meta.entry(node).or_default();
        meta.cache = Some(attrs);
        meta.node_ref.clone_from(&node_ref);

        if !skip {
            self.patch_children(node, children)?;
        }
        match mount {
            Some(mount) => self.bind(node, mount),
            None => {
                if let Some(node_ref) = node_ref {
                    node_ref.call(Some(node));
                }
                Ok(())
            }
        }
    }

    fn live_attributes(&self, node: NodeId) -> Attributes {
        self.document.attributes(node).into_iter().collect()
    }

    fn patch_attributes(
        &mut self,
        node: NodeId,
        previous: &Attributes,
        next: &Attributes,
    ) -> Result<()> {
        for (name, value) in previous.iter() {
            if name == "xmlns" || next.contains(name) {
                continue;
            }
            if matches!(value, Value::Any(_)) {
                self.document.set_property(node, name, Value::Null)?;
            } else {
                self.apply_attribute(node, name, &Value::Null)?;
            }
        }
        for (name, value) in next.iter() {
            if name != "xmlns" && previous.get(name) != Some(value) {
                self.apply_attribute(node, name, value)?;
            }
        }
        Ok(())
    }

    fn apply_attribute(&mut self, node: NodeId, name: &str, value: &Value) -> Result<()> {
        if let Some(property) = name.strip_prefix("set:") {
            return match self.document.set_property(node, property, value.clone()) {
                Err(Error::ReadOnlyProperty(_)) => {
                    debug!(?node, property, "property is read-only, writing the attribute");
                    self.write_attribute(node, property, value)
                }
                result => result,
            };
        }
        if matches!(value, Value::Any(_)) {
            return self.document.set_property(node, name, value.clone());
        }
        self.write_attribute(node, name, value)
    }

    fn write_attribute(&mut self, node: NodeId, name: &str, value: &Value) -> Result<()> {
        match value.to_attribute() {
            None => self.document.remove_attribute(node, name),
            Some(text) if self.document.attribute(node, name) == Some(text.as_str()) => Ok(()),
            Some(text) => self.document.set_attribute(node, name, &text),
        }
    }

    /// Tears down and removes `cursor` and every sibling after it.
    ///
    /// All nodes are removed even if a teardown fails; the first error is returned.
    fn remove_from(&mut self, parent: NodeId, cursor: Option<NodeId>) -> Result<()> {
        let mut first_error = None;
        let mut cursor = cursor;
        while let Some(node) = cursor {
            cursor = self.document.next_sibling(node);
            if let Err(error) = self.teardown(node) {
                first_error.get_or_insert(error);
            }
            self.document.remove_child(parent, node)?;
            trace!(?node, "removed node");
            self.forget(node);
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Disposes instances and clears refs in the subtree, parents first.
    fn teardown(&mut self, root: NodeId) -> Result<()> {
        let mut first_error = None;
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if let Err(error) = self.terminate(node) {
                first_error.get_or_insert(error);
            }
            if let Some(node_ref) = self.meta.get(&node).and_then(|meta| meta.node_ref.clone()) {
                node_ref.call(None);
            }
            stack.extend(self.document.children(node).iter().rev());
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Drops the side-table entries of a detached subtree and frees it.
    fn forget(&mut self, root: NodeId) {
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            self.meta.remove(&node);
            stack.extend_from_slice(self.document.children(node));
        }
        self.document.discard(root);
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use arbor_core::{Stateful, h, render_loop};

    use crate::document::Mutation;

    use super::*;

    fn rendered(tree: impl Into<Node>) -> (Runtime, NodeId) {
        let mut rt = Runtime::new();
        let body = rt.document().body();
        rt.render(tree, body).expect("render");
        (rt, body)
    }

    #[test]
    fn attributes_follow_value_rules() {
        let (rt, body) = rendered(
            h("input")
                .attr("disabled", true)
                .attr("hidden", false)
                .attr("value", 3)
                .attr("title", Value::Null),
        );
        assert_eq!(rt.document().inner_html(body), r#"<input disabled="" value="3">"#);
    }

    #[test]
    fn removed_attributes_are_cleared() {
        let (mut rt, body) = rendered(h("a").attr("href", "/x").attr("class", "c"));
        rt.render(h("a").attr("class", "c"), body).expect("render");
        assert_eq!(rt.document().inner_html(body), r#"<a class="c"></a>"#);
    }

    #[test]
    fn properties_fall_back_to_attributes_when_read_only() {
        let (rt, body) = rendered(h("p").set("value", 7).set("tagName", "x"));
        let p = rt.document().children(body)[0];
        assert_eq!(rt.document().property(p, "value"), Some(&Value::from(7)));
        assert_eq!(rt.document().attribute(p, "tagName"), Some("x"));
    }

    #[test]
    fn keyed_children_move_instead_of_rebuilding() {
        let list = |keys: &[&str]| {
            h("ul").children(keys.iter().map(|&k| h("li").key(k).child(k)))
        };
        let (mut rt, body) = rendered(list(&["a", "b", "c"]));
        let ul = rt.document().children(body)[0];
        let before = rt.document().children(ul).to_vec();

        rt.document_mut().record_mutations(true);
        rt.render(list(&["c", "a", "b"]), body).expect("render");

        let after = rt.document().children(ul).to_vec();
        assert_eq!(after, [before[2], before[0], before[1]]);
        assert!(
            rt.document_mut()
                .take_mutations()
                .iter()
                .all(|m| matches!(m, Mutation::Insert { .. }))
        );
    }

    #[test]
    fn focused_node_is_not_moved() {
        let list = |keys: &[&str]| h("div").children(keys.iter().map(|&k| h("input").key(k)));
        let (mut rt, body) = rendered(list(&["a", "b", "c"]));
        let div = rt.document().children(body)[0];
        let c = rt.document().children(div)[2];
        rt.document_mut().focus(c);

        rt.document_mut().record_mutations(true);
        rt.render(list(&["c", "a", "b"]), body).expect("render");

        assert_eq!(rt.document().children(div)[0], c);
        assert!(
            !rt.document_mut()
                .take_mutations()
                .contains(&Mutation::Insert { parent: div, node: c })
        );
        assert_eq!(rt.document().active_element(), Some(c));
    }

    #[test]
    fn untouched_nodes_adopt_keys_and_attributes() {
        let mut rt = Runtime::new();
        let body = rt.document().body();
        rt.document_mut()
            .set_inner_html(body, r#"<p class="old" id="p">x</p>"#)
            .expect("markup");
        let p = rt.document().children(body)[0];

        rt.render(h("p").key("k").attr("id", "p"), body).expect("render");
        assert_eq!(rt.document().children(body)[0], p);
        assert_eq!(rt.document().inner_html(body), r#"<p id="p"></p>"#);
    }

    #[test]
    fn svg_children_inherit_the_namespace() {
        let (rt, body) = rendered(h("svg").child(h("circle")));
        let circle = rt.document().elements_by_tag(body, "circle")[0];
        assert_eq!(rt.document().namespace(circle), Some(SVG_NAMESPACE));
    }

    #[test]
    fn refs_see_mount_and_removal() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        let (mut rt, body) = rendered(h("b").node_ref(move |node| log.borrow_mut().push(node)));
        let b = rt.document().children(body)[0];

        rt.render(Node::Empty, body).expect("render");
        assert_eq!(*seen.borrow(), [Some(b), None]);
        assert!(!rt.document().exists(b));
    }

    #[test]
    fn different_components_do_not_share_hosts() {
        let a = Stateful::builder("A", |_| render_loop(|_| Ok(Node::from("a"))))
            .build()
            .expect("valid component");
        let b = Stateful::builder("B", |_| render_loop(|_| Ok(Node::from("b"))))
            .build()
            .expect("valid component");

        let (mut rt, body) = rendered(h(&a));
        let first = rt.document().children(body)[0];
        rt.render(h(&b), body).expect("render");
        let second = rt.document().children(body)[0];

        assert_ne!(first, second);
        assert!(!rt.document().exists(first));
        assert_eq!(rt.document().inner_html(body), "<div>b</div>");
    }

    #[test]
    fn async_components_are_rejected() {
        let slow = arbor_core::AsyncComponent::future("Slow", |_| async { Ok(Node::Empty) });
        let mut rt = Runtime::new();
        let body = rt.document().body();
        assert!(matches!(
            rt.render(h(slow), body),
            Err(Error::AsyncComponent { name }) if name == "Slow"
        ));
    }
}
