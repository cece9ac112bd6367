//! Arena-backed XML tree for SPL documents.
//!
//! quick-xml is a pull parser; the section parsers need to revisit nodes
//! (discovery first, content later), so the event stream is folded into
//! a flat `Vec` of nodes addressed by [`NodeId`]. Element and attribute
//! names are stored without their namespace prefix. Character data is kept
//! as `#text` nodes so mixed content keeps its document order.

use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;

use crate::error::ParseError;

const TEXT_NODE: &str = "#text";

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// Collapse whitespace runs to single spaces and trim the ends.
pub fn normalize_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

/// Index of a node inside an [`XmlTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Default)]
pub struct XmlNode {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    /// Raw character data; only set on `#text` nodes.
    pub text: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct XmlTree {
    nodes: Vec<XmlNode>,
}

impl XmlNode {
    pub fn is_text(&self) -> bool {
        self.name == TEXT_NODE
    }
}

/// Append character data to the open element, merging with a preceding text node.
fn push_text(nodes: &mut Vec<XmlNode>, parent: NodeId, text: &str) {
    if let Some(&last) = nodes[parent.0].children.last() {
        if nodes[last.0].is_text() {
            nodes[last.0].text.push_str(text);
            return;
        }
    }
    if text.trim().is_empty() {
        return;
    }
    let id = NodeId(nodes.len());
    nodes.push(XmlNode {
        name: TEXT_NODE.to_string(),
        text: text.to_string(),
        parent: Some(parent),
        ..Default::default()
    });
    nodes[parent.0].children.push(id);
}

fn local_name(raw: &[u8]) -> String {
    let name = String::from_utf8_lossy(raw);
    match name.rsplit_once(':') {
        Some((_, local)) => local.to_string(),
        None => name.into_owned(),
    }
}

fn element_node(e: &BytesStart<'_>, parent: Option<NodeId>) -> XmlNode {
    let mut attributes = Vec::new();
    for attr in e.attributes().flatten() {
        let key = local_name(attr.key.as_ref());
        // xmlns declarations are not data
        if key == "xmlns" || attr.key.as_ref().starts_with(b"xmlns:") {
            continue;
        }
        let value = attr
            .unescape_value()
            .map(|v| v.to_string())
            .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
        attributes.push((key, value));
    }

    XmlNode {
        name: local_name(e.name().as_ref()),
        attributes,
        parent,
        ..Default::default()
    }
}

/// Resolve `&name;` references that quick-xml reports separately from text.
fn resolve_reference(name: &str) -> Option<String> {
    match name {
        "amp" => Some("&".into()),
        "lt" => Some("<".into()),
        "gt" => Some(">".into()),
        "quot" => Some("\"".into()),
        "apos" => Some("'".into()),
        _ => {
            let digits = name.strip_prefix('#')?;
            let code = match digits.strip_prefix('x').or_else(|| digits.strip_prefix('X')) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => digits.parse().ok()?,
            };
            char::from_u32(code).map(String::from)
        }
    }
}

impl XmlTree {
    /// Parse an XML string into an arena tree.
    pub fn parse(xml: &str) -> Result<Self, ParseError> {
        let mut reader = Reader::from_str(xml);

        let mut nodes: Vec<XmlNode> = Vec::new();
        let mut stack: Vec<NodeId> = Vec::new();
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Eof) => break,
                Ok(Event::Start(ref e)) => {
                    let id = NodeId(nodes.len());
                    let parent = stack.last().copied();
                    nodes.push(element_node(e, parent));
                    if let Some(parent) = parent {
                        nodes[parent.0].children.push(id);
                    }
                    stack.push(id);
                }
                // Self-closing tags like <id root="..."/>
                Ok(Event::Empty(ref e)) => {
                    let id = NodeId(nodes.len());
                    let parent = stack.last().copied();
                    nodes.push(element_node(e, parent));
                    if let Some(parent) = parent {
                        nodes[parent.0].children.push(id);
                    }
                }
                Ok(Event::End(_)) => {
                    stack.pop();
                }
                Ok(Event::Text(ref t)) => {
                    if let Some(&current) = stack.last() {
                        push_text(&mut nodes, current, &String::from_utf8_lossy(t));
                    }
                }
                Ok(Event::CData(ref t)) => {
                    if let Some(&current) = stack.last() {
                        push_text(&mut nodes, current, &String::from_utf8_lossy(t));
                    }
                }
                Ok(Event::GeneralRef(ref r)) => {
                    if let Some(&current) = stack.last() {
                        let name = String::from_utf8_lossy(r);
                        if let Some(resolved) = resolve_reference(&name) {
                            push_text(&mut nodes, current, &resolved);
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    return Err(ParseError::Xml {
                        position: reader.buffer_position() as u64,
                        message: e.to_string(),
                    });
                }
            }
            buf.clear();
        }

        if let Some(&open) = stack.last() {
            return Err(ParseError::Xml {
                position: reader.buffer_position() as u64,
                message: format!("unclosed element <{}>", nodes[open.0].name),
            });
        }
        if nodes.is_empty() {
            return Err(ParseError::EmptyDocument);
        }

        Ok(Self { nodes })
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &XmlNode {
        &self.nodes[id.0]
    }

    pub fn name(&self, id: NodeId) -> &str {
        &self.nodes[id.0].name
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn attr(&self, id: NodeId, key: &str) -> Option<&str> {
        self.nodes[id.0]
            .attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Attribute value, with empty strings treated as absent.
    pub fn attr_owned(&self, id: NodeId, key: &str) -> Option<String> {
        self.attr(id, key)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    /// Element children, text nodes skipped.
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes[id.0]
            .children
            .iter()
            .copied()
            .filter(move |c| !self.nodes[c.0].is_text())
    }

    pub fn children_named<'a>(&'a self, id: NodeId, name: &'a str) -> impl Iterator<Item = NodeId> + 'a {
        self.children(id).filter(move |&c| self.nodes[c.0].name == name)
    }

    /// First direct child with the given local name.
    pub fn child(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.children_named(id, name).next()
    }

    /// Follow a chain of child names, taking the first match at each step.
    pub fn path(&self, id: NodeId, names: &[&str]) -> Option<NodeId> {
        names.iter().try_fold(id, |node, name| self.child(node, name))
    }

    /// Normalized text of a child element, `None` when missing or blank.
    pub fn child_text(&self, id: NodeId, name: &str) -> Option<String> {
        let child = self.child(id, name)?;
        let text = self.text_content(child);
        (!text.is_empty()).then_some(text)
    }

    /// Text of the node and all descendants in document order, whitespace normalized.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        normalize_whitespace(&out)
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        let node = &self.nodes[id.0];
        if node.is_text() {
            out.push_str(&node.text);
            return;
        }
        // element boundaries separate words
        out.push(' ');
        for &child in &node.children {
            self.collect_text(child, out);
        }
        out.push(' ');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_elements() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<document xmlns="urn:hl7-org:v3">
    <id root="A"/>
    <component>
        <section><title>One</title></section>
    </component>
</document>"#;

        let tree = XmlTree::parse(xml).unwrap();
        let root = tree.root();
        assert_eq!(tree.name(root), "document");
        assert!(tree.node(root).attributes.is_empty());
        assert_eq!(tree.attr(tree.child(root, "id").unwrap(), "root"), Some("A"));

        let section = tree.path(root, &["component", "section"]).unwrap();
        assert_eq!(tree.child_text(section, "title").as_deref(), Some("One"));
        assert_eq!(tree.parent(section), tree.child(root, "component"));
    }

    #[test]
    fn test_prefixed_names_are_local() {
        let xml = r#"<v3:document xmlns:v3="urn:hl7-org:v3" xmlns:xsi="x"><v3:title xsi:type="ST">T</v3:title></v3:document>"#;
        let tree = XmlTree::parse(xml).unwrap();
        let title = tree.child(tree.root(), "title").unwrap();
        assert_eq!(tree.attr(title, "type"), Some("ST"));
        assert_eq!(tree.text_content(title), "T");
    }

    #[test]
    fn test_entities_and_mixed_text() {
        let xml = r#"<text><paragraph>Take <content>one</content> tablet &amp; water &#65;</paragraph></text>"#;
        let tree = XmlTree::parse(xml).unwrap();
        assert_eq!(tree.text_content(tree.root()), "Take one tablet & water A");
        // text nodes are not element children
        assert_eq!(tree.children(tree.root()).count(), 1);
    }

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("  a \n\t b  "), "a b");
    }

    #[test]
    fn test_malformed_xml_is_error() {
        let err = XmlTree::parse("<document><section></document>").unwrap_err();
        assert!(matches!(err, ParseError::Xml { .. }));
    }

    #[test]
    fn test_empty_input_is_error() {
        assert!(matches!(XmlTree::parse("   ").unwrap_err(), ParseError::EmptyDocument));
    }

    #[test]
    fn test_resolve_reference() {
        assert_eq!(resolve_reference("lt").as_deref(), Some("<"));
        assert_eq!(resolve_reference("#x41").as_deref(), Some("A"));
        assert_eq!(resolve_reference("nbsp"), None);
    }
}
