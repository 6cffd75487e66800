//! Loading markup into a [`Document`].
//!
//! A small tolerant parser for the markup arbor emits: elements, quoted or
//! bare attributes, character references, void elements and raw-text
//! `script`/`style` bodies. Unknown end tags are ignored and unclosed elements
//! are closed at the end of input.

use arbor_core::{NodeId, Result, SVG_NAMESPACE, markup::is_void};

use crate::document::Document;

impl Document {
    /// Replaces the children of `parent` with the parsed `markup`.
    ///
    /// Nodes created this way carry no render metadata, like server-rendered
    /// markup in a browser. The runtime adopts them on the next render.
    ///
    /// # Errors
    ///
    /// Returns [`arbor_core::Error::StaleNode`] if `parent` is unknown.
    pub fn set_inner_html(&mut self, parent: NodeId, markup: &str) -> Result<()> {
        self.clear(parent)?;
        Parser {
            document: self,
            stack: vec![parent],
        }
        .parse(markup)
    }
}

struct Parser<'a> {
    document: &'a mut Document,
    stack: Vec<NodeId>,
}

impl Parser<'_> {
    fn top(&self) -> NodeId {
        self.stack[self.stack.len() - 1]
    }

    fn parse(mut self, mut rest: &str) -> Result<()> {
        while !rest.is_empty() {
            rest = if let Some(after) = rest.strip_prefix("</") {
                self.end_tag(after)
            } else if rest.starts_with('<')
                && rest[1..].starts_with(|c: char| c.is_ascii_alphabetic())
            {
                self.start_tag(&rest[1..])?
            } else {
                let first = rest.chars().next().map_or(1, char::len_utf8);
                let end = rest[first..].find('<').map_or(rest.len(), |i| i + first);
                self.text(&rest[..end])?;
                &rest[end..]
            };
        }
        Ok(())
    }

    fn text(&mut self, raw: &str) -> Result<()> {
        let text = decode(raw);
        let parent = self.top();
        if let Some(&last) = self.document.children(parent).last() {
            if let Some(existing) = self.document.text(last) {
                let merged = format!("{existing}{text}");
                return self.document.set_text(last, &merged);
            }
        }
        let node = self.document.create_text(&text);
        self.document.append_child(parent, node)
    }

    fn end_tag<'s>(&mut self, after: &'s str) -> &'s str {
        let Some(end) = after.find('>') else {
            return "";
        };
        let name = after[..end].trim().to_ascii_lowercase();
        if let Some(index) = self
            .stack
            .iter()
            .skip(1)
            .rposition(|&node| self.document.tag(node) == Some(name.as_str()))
        {
            self.stack.truncate(index + 1);
        }
        &after[end + 1..]
    }

    fn start_tag<'s>(&mut self, source: &'s str) -> Result<&'s str> {
        let name_end = source
            .find(|c: char| c.is_whitespace() || c == '/' || c == '>')
            .unwrap_or(source.len());
        let tag = source[..name_end].to_ascii_lowercase();
        let mut rest = &source[name_end..];

        let parent = self.top();
        let namespace = if tag == "svg" {
            Some(SVG_NAMESPACE.to_owned())
        } else {
            self.document.namespace(parent).map(str::to_owned)
        };
        let element = self.document.create_element(&tag, namespace.as_deref());
        self.document.append_child(parent, element)?;

        let mut self_closing = false;
        loop {
            rest = rest.trim_start();
            if let Some(after) = rest.strip_prefix("/>") {
                self_closing = true;
                rest = after;
                break;
            }
            if let Some(after) = rest.strip_prefix('>') {
                rest = after;
                break;
            }
            if rest.is_empty() {
                break;
            }
            if let Some(after) = rest.strip_prefix('/') {
                rest = after;
                continue;
            }
            let (name, value, after) = attribute(rest);
            self.document.set_attribute(element, &name, &value)?;
            rest = after;
        }

        if is_void(&tag) || self_closing {
            return Ok(rest);
        }
        if tag == "script" || tag == "style" {
            let close = format!("</{tag}");
            let end = rest.find(&close).unwrap_or(rest.len());
            if end > 0 {
                let text = self.document.create_text(&rest[..end]);
                self.document.append_child(element, text)?;
            }
            rest = &rest[end..];
            return Ok(rest
                .find('>')
                .map_or("", |gt| &rest[gt + 1..]));
        }
        self.stack.push(element);
        Ok(rest)
    }
}

fn attribute(source: &str) -> (String, String, &str) {
    let name_end = source
        .find(|c: char| c.is_whitespace() || c == '=' || c == '>' || c == '/')
        .unwrap_or(source.len())
        .max(source.chars().next().map_or(0, char::len_utf8));
    let name = source[..name_end].to_ascii_lowercase();
    let rest = source[name_end..].trim_start();
    let Some(rest) = rest.strip_prefix('=') else {
        return (name, String::new(), rest);
    };
    let rest = rest.trim_start();
    let (raw, after) = match rest.chars().next() {
        Some(quote @ ('"' | '\'')) => {
            let body = &rest[1..];
            let end = body.find(quote).unwrap_or(body.len());
            (&body[..end], body.get(end + 1..).unwrap_or(""))
        }
        _ => {
            let end = rest
                .find(|c: char| c.is_whitespace() || c == '>')
                .unwrap_or(rest.len());
            (&rest[..end], &rest[end..])
        }
    };
    (name, decode(raw), after)
}

/// Decodes character references.
fn decode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        rest = &rest[start..];
        let decoded = rest.find(';').and_then(|end| {
            let entity = &rest[1..end];
            let c = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some('\u{a0}'),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .map_or_else(
                        || entity.strip_prefix('#').and_then(|n| n.parse().ok()),
                        |hex| u32::from_str_radix(hex, 16).ok(),
                    )
                    .and_then(char::from_u32),
            }?;
            Some((c, end))
        });
        if let Some((c, end)) = decoded {
            out.push(c);
            rest = &rest[end + 1..];
        } else {
            out.push('&');
            rest = &rest[1..];
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_markup() {
        let mut doc = Document::new();
        let body = doc.body();
        doc.set_inner_html(body, r#"<div class="c">Hello<br> World</div><p id=x>&#60;ok&#62;</p>"#)
            .expect("parse");

        assert_eq!(
            doc.inner_html(body),
            r#"<div class="c">Hello<br> World</div><p id="x">&#60;ok&#62;</p>"#
        );
        let p = doc.elements_by_tag(body, "p")[0];
        assert_eq!(doc.text_content(p), "<ok>");
    }

    #[test]
    fn scripts_keep_raw_text() {
        let mut doc = Document::new();
        let body = doc.body();
        doc.set_inner_html(body, "<script>push({\"a\":\"<b>\"})</script><i>x</i>")
            .expect("parse");

        let script = doc.elements_by_tag(body, "script")[0];
        assert_eq!(doc.text_content(script), "push({\"a\":\"<b>\"})");
        assert_eq!(doc.elements_by_tag(body, "i").len(), 1);
    }

    #[test]
    fn boolean_attributes_and_svg_namespace() {
        let mut doc = Document::new();
        let body = doc.body();
        doc.set_inner_html(body, "<input disabled><svg><circle r='1'/></svg>")
            .expect("parse");

        let input = doc.elements_by_tag(body, "input")[0];
        assert_eq!(doc.attribute(input, "disabled"), Some(""));
        let circle = doc.elements_by_tag(body, "circle")[0];
        assert_eq!(doc.namespace(circle), Some(SVG_NAMESPACE));
        assert_eq!(doc.attribute(circle, "r"), Some("1"));
    }

    #[test]
    fn stray_characters_are_text() {
        let mut doc = Document::new();
        let body = doc.body();
        doc.set_inner_html(body, "a < b & c</nope>").expect("parse");

        assert_eq!(doc.text_content(body), "a < b & c");
        assert_eq!(doc.children(body).len(), 1);
    }
}
