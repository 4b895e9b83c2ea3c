//! Minimal element model used by the selector resolver.
//!
//! `DomElement` is the capability the resolver needs from a node. Two
//! implementations live here: `ElementRef`, a node of the in-memory
//! `Document`, and `LineageNode`, a level of an `ElementLineage` streamed by a
//! page host.

use retrace_common::protocol::{ElementLineage, ElementSnapshot};
use std::collections::BTreeMap;
use thiserror::Error;

pub trait DomElement: Sized {
    /// Lowercase tag name.
    fn tag_name(&self) -> String;

    fn attribute(&self, name: &str) -> Option<String>;

    /// True for the document's root body element.
    fn is_root_body(&self) -> bool;

    fn parent_element(&self) -> Option<Self>;

    fn previous_element_sibling(&self) -> Option<Self>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
struct Node {
    tag: String,
    attributes: BTreeMap<String, String>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    value: String,
}

/// Arena-backed element tree with an `html > (head, body)` skeleton.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    html: NodeId,
    body: NodeId,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        let mut doc = Self {
            nodes: vec![Node {
                tag: "html".into(),
                attributes: BTreeMap::new(),
                parent: None,
                children: Vec::new(),
                value: String::new(),
            }],
            html: NodeId(0),
            body: NodeId(0),
        };
        doc.create_element(doc.html, "head");
        doc.body = doc.create_element(doc.html, "body");
        doc
    }

    pub fn html(&self) -> NodeId {
        self.html
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    /// Append a new element as the last child of `parent`.
    pub fn create_element(&mut self, parent: NodeId, tag: &str) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            tag: tag.to_ascii_lowercase(),
            attributes: BTreeMap::new(),
            parent: Some(parent),
            children: Vec::new(),
            value: String::new(),
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Append a new element with attributes in one call.
    pub fn append(&mut self, parent: NodeId, tag: &str, attributes: &[(&str, &str)]) -> NodeId {
        let id = self.create_element(parent, tag);
        for (name, value) in attributes {
            self.set_attribute(id, name, value);
        }
        id
    }

    /// Insert a new element before `reference` under the same parent.
    pub fn insert_before(&mut self, reference: NodeId, tag: &str) -> Option<NodeId> {
        let parent = self.nodes[reference.0].parent?;
        let id = self.create_element(parent, tag);
        let children = &mut self.nodes[parent.0].children;
        children.pop();
        let pos = children.iter().position(|c| *c == reference)?;
        children.insert(pos, id);
        Some(id)
    }

    /// Detach `node` (and its subtree) from the document.
    pub fn remove(&mut self, node: NodeId) {
        if let Some(parent) = self.nodes[node.0].parent.take() {
            self.nodes[parent.0].children.retain(|c| *c != node);
        }
    }

    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) {
        self.nodes[node.0]
            .attributes
            .insert(name.to_ascii_lowercase(), value.to_string());
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        self.nodes[node.0].attributes.get(name).map(String::as_str)
    }

    pub fn set_value(&mut self, node: NodeId, value: &str) {
        self.nodes[node.0].value = value.to_string();
    }

    pub fn value(&self, node: NodeId) -> &str {
        &self.nodes[node.0].value
    }

    pub fn tag(&self, node: NodeId) -> &str {
        &self.nodes[node.0].tag
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.0].parent
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        &self.nodes[node.0].children
    }

    pub fn element(&self, node: NodeId) -> ElementRef<'_> {
        ElementRef { doc: self, node }
    }

    fn previous_sibling(&self, node: NodeId) -> Option<NodeId> {
        let parent = self.nodes[node.0].parent?;
        let siblings = &self.nodes[parent.0].children;
        let pos = siblings.iter().position(|c| *c == node)?;
        pos.checked_sub(1).map(|p| siblings[p])
    }

    /// Connected elements in document (pre-order) order.
    pub fn elements(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![self.html];
        while let Some(node) = stack.pop() {
            out.push(node);
            for child in self.nodes[node.0].children.iter().rev() {
                stack.push(*child);
            }
        }
        out
    }

    /// Snapshot the chain from `node` up to the body, as a page host would.
    pub fn lineage(&self, node: NodeId) -> ElementLineage {
        let mut levels = Vec::new();
        let mut cur = Some(node);
        while let Some(n) = cur {
            let data = &self.nodes[n.0];
            let mut preceding = Vec::new();
            let mut sib = self.previous_sibling(n);
            while let Some(s) = sib {
                preceding.push(self.nodes[s.0].tag.to_ascii_uppercase());
                sib = self.previous_sibling(s);
            }
            levels.push(ElementSnapshot {
                tag: data.tag.to_ascii_uppercase(),
                id: data.attributes.get("id").cloned(),
                name: data.attributes.get("name").cloned(),
                class: data.attributes.get("class").cloned(),
                is_body: n == self.body,
                preceding,
            });
            if n == self.body || n == self.html {
                break;
            }
            cur = data.parent;
        }
        ElementLineage::new(levels)
    }

    /// First connected element, in document order, matching `selector`.
    pub fn query_selector(&self, selector: &str) -> Result<Option<NodeId>, SelectorParseError> {
        let complex = parse_selector(selector)?;
        Ok(self
            .elements()
            .into_iter()
            .find(|n| self.matches_complex(*n, &complex, complex.len() - 1)))
    }

    pub fn query_selector_all(&self, selector: &str) -> Result<Vec<NodeId>, SelectorParseError> {
        let complex = parse_selector(selector)?;
        Ok(self
            .elements()
            .into_iter()
            .filter(|n| self.matches_complex(*n, &complex, complex.len() - 1))
            .collect())
    }

    fn matches_complex(&self, node: NodeId, parts: &[(Combinator, Compound)], idx: usize) -> bool {
        let (combinator, compound) = &parts[idx];
        if !self.matches_compound(node, compound) {
            return false;
        }
        if idx == 0 {
            return true;
        }
        match combinator {
            Combinator::Child => match self.nodes[node.0].parent {
                Some(p) => self.matches_complex(p, parts, idx - 1),
                None => false,
            },
            Combinator::Descendant => {
                let mut cur = self.nodes[node.0].parent;
                while let Some(p) = cur {
                    if self.matches_complex(p, parts, idx - 1) {
                        return true;
                    }
                    cur = self.nodes[p.0].parent;
                }
                false
            }
        }
    }

    fn matches_compound(&self, node: NodeId, compound: &Compound) -> bool {
        let data = &self.nodes[node.0];
        if let Some(tag) = &compound.tag
            && *tag != data.tag
        {
            return false;
        }
        if let Some(id) = &compound.id
            && data.attributes.get("id") != Some(id)
        {
            return false;
        }
        if !compound.classes.is_empty() {
            let class_attr = data.attributes.get("class").map(String::as_str).unwrap_or("");
            let have: Vec<&str> = class_attr.split_whitespace().collect();
            if !compound.classes.iter().all(|c| have.contains(&c.as_str())) {
                return false;
            }
        }
        for (name, value) in &compound.attributes {
            if data.attributes.get(name) != Some(value) {
                return false;
            }
        }
        if let Some(k) = compound.nth_of_type {
            let ordinal = nth_of_type(&self.element(node));
            if ordinal != k {
                return false;
            }
        }
        true
    }
}

/// 1-based position among preceding siblings sharing the tag name.
pub fn nth_of_type<E: DomElement>(element: &E) -> usize {
    let tag = element.tag_name();
    let mut nth = 1;
    let mut sib = element.previous_element_sibling();
    while let Some(s) = sib {
        if s.tag_name() == tag {
            nth += 1;
        }
        sib = s.previous_element_sibling();
    }
    nth
}

#[derive(Debug, Clone, Copy)]
pub struct ElementRef<'a> {
    doc: &'a Document,
    node: NodeId,
}

impl ElementRef<'_> {
    pub fn id(&self) -> NodeId {
        self.node
    }
}

impl DomElement for ElementRef<'_> {
    fn tag_name(&self) -> String {
        self.doc.nodes[self.node.0].tag.clone()
    }

    fn attribute(&self, name: &str) -> Option<String> {
        self.doc.attribute(self.node, name).map(str::to_string)
    }

    fn is_root_body(&self) -> bool {
        self.node == self.doc.body
    }

    fn parent_element(&self) -> Option<Self> {
        self.doc.parent(self.node).map(|node| ElementRef {
            doc: self.doc,
            node,
        })
    }

    fn previous_element_sibling(&self) -> Option<Self> {
        self.doc.previous_sibling(self.node).map(|node| ElementRef {
            doc: self.doc,
            node,
        })
    }
}

/// A position inside an `ElementLineage`.
///
/// Sibling positions only know their tag name, which is all the structural
/// resolver asks of them.
#[derive(Debug, Clone, Copy)]
pub struct LineageNode<'a> {
    lineage: &'a ElementLineage,
    level: usize,
    sibling: Option<usize>,
}

impl<'a> LineageNode<'a> {
    /// The event target, if the lineage is non-empty.
    pub fn target(lineage: &'a ElementLineage) -> Option<Self> {
        if lineage.is_empty() {
            return None;
        }
        Some(Self {
            lineage,
            level: 0,
            sibling: None,
        })
    }

    fn snapshot(&self) -> &'a ElementSnapshot {
        &self.lineage.levels[self.level]
    }
}

impl DomElement for LineageNode<'_> {
    fn tag_name(&self) -> String {
        match self.sibling {
            Some(i) => self.snapshot().preceding[i].to_ascii_lowercase(),
            None => self.snapshot().tag.to_ascii_lowercase(),
        }
    }

    fn attribute(&self, name: &str) -> Option<String> {
        if self.sibling.is_some() {
            return None;
        }
        let snap = self.snapshot();
        match name {
            "id" => snap.id.clone(),
            "name" => snap.name.clone(),
            "class" => snap.class.clone(),
            _ => None,
        }
    }

    fn is_root_body(&self) -> bool {
        self.sibling.is_none() && self.snapshot().is_body
    }

    fn parent_element(&self) -> Option<Self> {
        let level = self.level + 1;
        if level >= self.lineage.levels.len() {
            return None;
        }
        Some(Self {
            lineage: self.lineage,
            level,
            sibling: None,
        })
    }

    fn previous_element_sibling(&self) -> Option<Self> {
        let next = self.sibling.map(|i| i + 1).unwrap_or(0);
        if next >= self.snapshot().preceding.len() {
            return None;
        }
        Some(Self {
            lineage: self.lineage,
            level: self.level,
            sibling: Some(next),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid selector '{selector}': {reason}")]
pub struct SelectorParseError {
    pub selector: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Child,
    Descendant,
}

#[derive(Debug, Clone, Default)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attributes: Vec<(String, String)>,
    nth_of_type: Option<usize>,
}

/// Parse the selector subset the resolver emits: tag, `#id`, `.class`,
/// `[attr="v"]`, `:nth-of-type(k)`, joined by ` > ` or whitespace.
fn parse_selector(selector: &str) -> Result<Vec<(Combinator, Compound)>, SelectorParseError> {
    let err = |reason: &str| SelectorParseError {
        selector: selector.to_string(),
        reason: reason.to_string(),
    };

    let chars: Vec<char> = selector.trim().chars().collect();
    let mut parts = Vec::new();
    let mut pending = Combinator::Descendant;
    let mut i = 0;

    while i < chars.len() {
        // combinators
        let mut saw_space = false;
        while i < chars.len() && chars[i].is_whitespace() {
            saw_space = true;
            i += 1;
        }
        if i < chars.len() && chars[i] == '>' {
            if parts.is_empty() {
                return Err(err("leading combinator"));
            }
            pending = Combinator::Child;
            i += 1;
            while i < chars.len() && chars[i].is_whitespace() {
                i += 1;
            }
        } else if saw_space && parts.is_empty() {
            return Err(err("leading whitespace"));
        }
        if i >= chars.len() {
            return Err(err("dangling combinator"));
        }

        let mut compound = Compound::default();
        let mut empty = true;
        while i < chars.len() && !chars[i].is_whitespace() && chars[i] != '>' {
            empty = false;
            match chars[i] {
                '#' => {
                    let (ident, next) = read_ident(&chars, i + 1);
                    if ident.is_empty() {
                        return Err(err("empty id"));
                    }
                    compound.id = Some(ident);
                    i = next;
                }
                '.' => {
                    let (ident, next) = read_ident(&chars, i + 1);
                    if ident.is_empty() {
                        return Err(err("empty class"));
                    }
                    compound.classes.push(ident);
                    i = next;
                }
                '[' => {
                    let (name, value, next) = read_attribute(&chars, i + 1)
                        .ok_or_else(|| err("malformed attribute"))?;
                    compound.attributes.push((name, value));
                    i = next;
                }
                ':' => {
                    let (pseudo, next) = read_ident(&chars, i + 1);
                    if pseudo != "nth-of-type" || chars.get(next) != Some(&'(') {
                        return Err(err("unsupported pseudo-class"));
                    }
                    let close = chars[next..]
                        .iter()
                        .position(|c| *c == ')')
                        .map(|p| p + next)
                        .ok_or_else(|| err("unterminated :nth-of-type"))?;
                    let arg: String = chars[next + 1..close].iter().collect();
                    let k = arg
                        .trim()
                        .parse::<usize>()
                        .map_err(|_| err("bad :nth-of-type index"))?;
                    compound.nth_of_type = Some(k);
                    i = close + 1;
                }
                '*' => i += 1,
                _ => {
                    let (ident, next) = read_ident(&chars, i);
                    if ident.is_empty() {
                        return Err(err("unexpected character"));
                    }
                    compound.tag = Some(ident.to_ascii_lowercase());
                    i = next;
                }
            }
        }
        if empty {
            return Err(err("empty compound selector"));
        }
        let combinator = if parts.is_empty() {
            Combinator::Descendant
        } else {
            pending
        };
        parts.push((combinator, compound));
        pending = Combinator::Descendant;
    }

    if parts.is_empty() {
        return Err(err("empty selector"));
    }
    Ok(parts)
}

fn read_ident(chars: &[char], start: usize) -> (String, usize) {
    let mut i = start;
    while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '-' || chars[i] == '_') {
        i += 1;
    }
    (chars[start..i].iter().collect(), i)
}

fn read_attribute(chars: &[char], start: usize) -> Option<(String, String, usize)> {
    let (name, mut i) = read_ident(chars, start);
    if name.is_empty() || chars.get(i) != Some(&'=') {
        return None;
    }
    i += 1;
    let quote = *chars.get(i)?;
    let value;
    if quote == '"' || quote == '\'' {
        let close = chars[i + 1..].iter().position(|c| *c == quote)? + i + 1;
        value = chars[i + 1..close].iter().collect();
        i = close + 1;
    } else {
        let (raw, next) = read_ident(chars, i);
        value = raw;
        i = next;
    }
    if chars.get(i) != Some(&']') {
        return None;
    }
    Some((name.to_ascii_lowercase(), value, i + 1))
}
