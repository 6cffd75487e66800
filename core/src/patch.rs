//! Wire format for streamed patches.
//!
//! Trees travel as JSON: `null` for nothing, strings and numbers for text,
//! arrays for lists and objects with a `nodeName` for elements. Directive keys
//! (`key`, `skip`, `children`) are recognised, every other entry is an
//! attribute. Components and opaque values cannot cross the wire.

use std::fmt;

use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{self, IgnoredAny, MapAccess, SeqAccess, Visitor},
    ser::{self, SerializeMap},
};

use crate::{
    error::Result,
    node::{Element, Key, Kind, Memo, Node, h},
    value::{Attributes, Value, format_number},
};

/// A rendered fragment addressed to a placeholder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patch {
    /// Hierarchical placeholder id such as `"3"` or `"3:1"`.
    pub id: String,
    /// Tree to render into the placeholder, or island arguments when `src` is set.
    #[serde(default)]
    pub h: Node,
    /// Module to load and render with `h` as its arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    /// `false` while more patches for the same id will follow.
    #[serde(default = "done_default")]
    pub done: bool,
}

const fn done_default() -> bool {
    true
}

impl Patch {
    /// A final patch rendering `h`.
    #[must_use]
    pub fn new(id: impl Into<String>, h: impl Into<Node>) -> Self {
        Self {
            id: id.into(),
            h: h.into(),
            src: None,
            done: true,
        }
    }

    /// Sets the island module.
    #[must_use]
    pub fn with_src(mut self, src: impl Into<String>) -> Self {
        self.src = Some(src.into());
        self
    }

    /// Marks whether this is the last patch for its id.
    #[must_use]
    pub const fn with_done(mut self, done: bool) -> Self {
        self.done = done;
        self
    }

    /// Returns `true` if this patch targets a placeholder nested inside `id`.
    #[must_use]
    pub fn is_descendant_of(&self, id: &str) -> bool {
        self.id
            .strip_prefix(id)
            .is_some_and(|rest| rest.starts_with(':'))
    }

    /// Decodes a patch.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MalformedPatch`] if `json` is not a valid patch.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Encodes the patch.
    ///
    /// # Errors
    ///
    /// Fails if the tree contains components.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Encodes the patch as an inline script pushing it onto `window[global]`.
    ///
    /// # Errors
    ///
    /// Fails if the tree contains components.
    pub fn to_script(&self, global: &str) -> Result<String> {
        let json = self.to_json()?.replace('<', "\\u003c");
        Ok(format!("<script>window.{global}?.push({json})</script>"))
    }
}

// ============================================================================
// Value
// ============================================================================

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null | Self::Any(_) => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Float(f) => serializer.serialize_f64(*f),
            Self::Str(s) => serializer.serialize_str(s),
            Self::List(items) => serializer.collect_seq(items),
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an attribute value")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Int(v))
    }

    #[allow(clippy::cast_precision_loss)]
    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        Ok(i64::try_from(v).map_or(Value::Float(v as f64), Value::Int))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::Str(v.to_owned()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::Str(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::List(items))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

// ============================================================================
// Node
// ============================================================================

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Empty => serializer.serialize_unit(),
            Self::Text(text) => serializer.serialize_str(text),
            Self::List(nodes) => serializer.collect_seq(nodes),
            Self::Element(element) => element.serialize(serializer),
        }
    }
}

impl Serialize for Element {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let Kind::Tag(tag) = &self.kind else {
            return Err(ser::Error::custom(format_args!(
                "{:?} cannot be sent as a patch",
                self.kind
            )));
        };
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("nodeName", tag)?;
        for (name, value) in self.attrs.iter() {
            if name.starts_with("set:") || matches!(value, Value::Any(_)) {
                continue;
            }
            map.serialize_entry(name, value)?;
        }
        if let Some(key) = &self.key {
            map.serialize_entry("key", key.as_str())?;
        }
        if self.skip {
            map.serialize_entry("skip", &true)?;
        }
        if let Some(Memo(memo)) = &self.memo {
            map.serialize_entry("memo", memo)?;
        }
        if !self.children.is_empty() {
            map.serialize_entry("children", &self.children)?;
        }
        map.end()
    }
}

struct NodeVisitor;

impl<'de> Visitor<'de> for NodeVisitor {
    type Value = Node;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("null, text, a list of nodes or an element object")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Node, E> {
        Ok(Node::Empty)
    }

    fn visit_none<E: de::Error>(self) -> Result<Node, E> {
        Ok(Node::Empty)
    }

    fn visit_bool<E: de::Error>(self, _: bool) -> Result<Node, E> {
        Ok(Node::Empty)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Node, E> {
        Ok(Node::Text(v.to_string()))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Node, E> {
        Ok(Node::Text(v.to_string()))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Node, E> {
        Ok(Node::Text(format_number(v)))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Node, E> {
        Ok(Node::Text(v.to_owned()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Node, E> {
        Ok(Node::Text(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Node, A::Error> {
        let mut nodes = Vec::new();
        while let Some(node) = seq.next_element()? {
            nodes.push(node);
        }
        Ok(Node::List(nodes))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Node, A::Error> {
        let mut tag = None;
        let mut attrs = Attributes::new();
        let mut children = Node::Empty;
        let mut key = None;
        let mut skip = false;
        let mut memo = None;

        while let Some(name) = map.next_key::<String>()? {
            match name.as_str() {
                "nodeName" => tag = Some(map.next_value::<String>()?),
                "children" => children = map.next_value()?,
                "key" => key = map.next_value::<Value>()?.to_attribute().map(Key),
                "skip" => skip = map.next_value::<Value>()?.is_truthy(),
                "memo" => memo = Some(Memo(map.next_value()?)),
                "ref" => {
                    map.next_value::<IgnoredAny>()?;
                }
                _ => {
                    let value = map.next_value::<Value>()?;
                    attrs.insert(name, value);
                }
            }
        }

        let tag = tag.ok_or_else(|| de::Error::missing_field("nodeName"))?;
        let mut element = h(tag).skip(skip);
        element.attrs = attrs;
        element.key = key;
        element.memo = memo;
        element.children = match children {
            Node::Empty => Vec::new(),
            Node::List(nodes) => nodes,
            other => vec![other],
        };
        Ok(element.into())
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(NodeVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, component::Stateless};

    #[test]
    fn decodes_element_objects() {
        let patch = Patch::from_json(
            r#"{"id":"1:0","h":{"nodeName":"p","class":"x","key":3,"children":["Hi ",{"nodeName":"b","children":"there"}]},"done":false}"#,
        )
        .expect("valid patch");

        assert_eq!(patch.id, "1:0");
        assert!(!patch.done);
        let Node::Element(element) = &patch.h else {
            panic!("expected element");
        };
        assert_eq!(element.tag(), Some("p"));
        assert_eq!(element.key, Some(Key::from("3")));
        assert_eq!(element.attrs.get("class"), Some(&Value::from("x")));
        assert_eq!(element.children.len(), 2);
    }

    #[test]
    fn done_defaults_to_true_and_h_to_empty() {
        let patch = Patch::from_json(r#"{"id":"0"}"#).expect("valid patch");
        assert!(patch.done);
        assert!(patch.h.is_empty());
        assert!(patch.src.is_none());
    }

    #[test]
    fn malformed_payloads_are_errors() {
        assert!(matches!(
            Patch::from_json(r#"{"h":"x"}"#),
            Err(Error::MalformedPatch(_))
        ));
        assert!(matches!(
            Patch::from_json(r#"{"id":"0","h":{"class":"no tag"}}"#),
            Err(Error::MalformedPatch(_))
        ));
    }

    #[test]
    fn encoding_skips_properties_and_opaque_values() {
        let tree = h("button")
            .attr("type", "button")
            .set("onclick", Value::any(1_u8))
            .attr("data-x", Value::any(2_u8))
            .child("Go");
        let json = Patch::new("2", tree).to_json().expect("encodes");

        assert_eq!(
            json,
            r#"{"id":"2","h":{"nodeName":"button","type":"button","children":["Go"]},"done":true}"#
        );
    }

    #[test]
    fn components_cannot_be_encoded() {
        let component = Stateless::new("C", |_: &crate::component::Args| "x");
        assert!(Patch::new("0", h(component)).to_json().is_err());
    }

    #[test]
    fn script_cannot_close_itself() {
        let script = Patch::new("0", "</script>")
            .to_script("$stream")
            .expect("encodes");

        assert!(script.starts_with("<script>window.$stream?.push("));
        assert!(!script.contains("</script><"));
        assert_eq!(script.matches("</script>").count(), 1);
    }

    #[test]
    fn descendant_ids() {
        let patch = Patch::new("3:1", Node::Empty);
        assert!(patch.is_descendant_of("3"));
        assert!(!patch.is_descendant_of("31"));
        assert!(!Patch::new("31:0", Node::Empty).is_descendant_of("3"));
    }
}
