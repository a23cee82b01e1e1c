//! Forgiving HTML parsing for portal pages.
//!
//! The portal serves markup that is close to, but not quite, well-formed
//! XML: void elements without closing tags, stray end tags, HTML entities.
//! This module walks quick-xml events into an owned [`Node`] tree and keeps
//! going where a strict parser would stop. All lookups return `Option` so
//! absent elements are an ordinary branch for callers.

use quick_xml::events::Event;
use quick_xml::Reader;

/// Maximum element nesting honored while building the tree. Deeper elements
/// are attached as leaves instead of recursing further.
const MAX_DEPTH: usize = 256;

/// HTML elements that never carry children and close implicitly.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Markup that could not be tokenized at all.
#[derive(Debug)]
pub struct MarkupError(pub String);

impl std::fmt::Display for MarkupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "markup parse failed: {}", self.0)
    }
}

impl std::error::Error for MarkupError {}

/// One element in the parsed tree.
#[derive(Debug, Clone)]
pub struct Node {
    /// Tag name, ASCII-lowercased.
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
    /// Direct text fragments, already trimmed and entity-decoded.
    pub texts: Vec<String>,
}

impl Node {
    fn new(tag: String, attrs: Vec<(String, String)>) -> Self {
        Self {
            tag,
            attrs,
            children: Vec::new(),
            texts: Vec::new(),
        }
    }

    /// Attribute value by name, if present.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Whether the space-separated `class` attribute contains `class_name`.
    pub fn has_class(&self, class_name: &str) -> bool {
        self.attr("class")
            .map(|c| c.split_whitespace().any(|part| part == class_name))
            .unwrap_or(false)
    }

    /// First descendant with the given tag, depth-first in document order.
    pub fn find(&self, tag: &str) -> Option<&Node> {
        for child in &self.children {
            if child.tag == tag {
                return Some(child);
            }
            if let Some(found) = child.find(tag) {
                return Some(found);
            }
        }
        None
    }

    /// First descendant carrying the given class.
    pub fn find_by_class(&self, class_name: &str) -> Option<&Node> {
        for child in &self.children {
            if child.has_class(class_name) {
                return Some(child);
            }
            if let Some(found) = child.find_by_class(class_name) {
                return Some(found);
            }
        }
        None
    }

    /// All descendants carrying the given class, in document order.
    pub fn find_all_by_class<'a>(&'a self, class_name: &str) -> Vec<&'a Node> {
        let mut out = Vec::new();
        self.collect_by_class(class_name, &mut out);
        out
    }

    fn collect_by_class<'a>(&'a self, class_name: &str, out: &mut Vec<&'a Node>) {
        for child in &self.children {
            if child.has_class(class_name) {
                out.push(child);
            }
            child.collect_by_class(class_name, out);
        }
    }

    /// Concatenated text of this node and all descendants, single-spaced.
    pub fn text(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        self.collect_text(&mut parts);
        parts.join(" ").trim().to_string()
    }

    fn collect_text(&self, parts: &mut Vec<String>) {
        for t in &self.texts {
            if !t.is_empty() {
                parts.push(t.clone());
            }
        }
        for child in &self.children {
            child.collect_text(parts);
        }
    }
}

/// Parses markup into a synthetic root node holding the top-level elements.
///
/// Unknown entities fall back to their raw text; stray end tags are dropped;
/// void elements close implicitly. Only a tokenizer-level failure is an
/// error.
pub fn parse(html: &str) -> Result<Node, MarkupError> {
    let mut reader = Reader::from_reader(html.as_bytes());
    reader.config_mut().trim_text(true);
    reader.config_mut().check_end_names = false;
    reader.config_mut().allow_unmatched_ends = true;

    let mut stack: Vec<Node> = vec![Node::new("#root".to_string(), Vec::new())];
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let tag = tag_name(e.name().as_ref());
                let attrs = read_attrs(&e);
                if VOID_ELEMENTS.contains(&tag.as_str()) || stack.len() >= MAX_DEPTH {
                    attach(&mut stack, Node::new(tag, attrs));
                } else {
                    stack.push(Node::new(tag, attrs));
                }
            }
            Ok(Event::Empty(e)) => {
                let tag = tag_name(e.name().as_ref());
                let attrs = read_attrs(&e);
                attach(&mut stack, Node::new(tag, attrs));
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(t.as_ref()).into_owned());
                let text = text.trim().to_string();
                if !text.is_empty() {
                    if let Some(top) = stack.last_mut() {
                        top.texts.push(text);
                    }
                }
            }
            Ok(Event::CData(t)) => {
                let text = String::from_utf8_lossy(t.as_ref()).trim().to_string();
                if !text.is_empty() {
                    if let Some(top) = stack.last_mut() {
                        top.texts.push(text);
                    }
                }
            }
            Ok(Event::End(e)) => {
                let tag = tag_name(e.name().as_ref());
                close_tag(&mut stack, &tag);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(MarkupError(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    // Unwind elements left open at end of input.
    while stack.len() > 1 {
        if let Some(done) = stack.pop() {
            attach(&mut stack, done);
        }
    }

    stack
        .pop()
        .ok_or_else(|| MarkupError("empty parse stack".to_string()))
}

fn tag_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).to_ascii_lowercase()
}

fn read_attrs(e: &quick_xml::events::BytesStart<'_>) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    for attr in e.attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_ascii_lowercase();
        let value = attr
            .unescape_value()
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
        attrs.push((key, value));
    }
    attrs
}

fn attach(stack: &mut Vec<Node>, node: Node) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
    }
}

/// Closes the innermost open element with a matching tag, attaching any
/// elements opened after it on the way. A close with no matching open tag
/// is a stray and is ignored.
fn close_tag(stack: &mut Vec<Node>, tag: &str) {
    let Some(pos) = stack.iter().rposition(|n| n.tag == tag) else {
        return;
    };
    if pos == 0 {
        // Never close the synthetic root.
        return;
    }
    while stack.len() > pos {
        if let Some(done) = stack.pop() {
            attach(stack, done);
        }
    }
}
