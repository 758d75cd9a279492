use std::collections::{HashMap, HashSet};
use std::error::Error as StdError;
use std::fmt;

use unicode_normalization::UnicodeNormalization;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    HtmlParse(String),
    Runtime(String),
    SelectorNotFound(String),
    UnsupportedSelector(String),
    InvalidRegistry(Vec<FeedViolation>),
    FeedIndexOutOfRange {
        index: usize,
        feed_count: usize,
    },
    UnknownFeedUrl(String),
    LoadTimedOut {
        feed_index: usize,
    },
    AssertionFailed {
        selector: String,
        expected: String,
        actual: String,
        dom_snippet: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HtmlParse(msg) => write!(f, "html parse error: {msg}"),
            Self::Runtime(msg) => write!(f, "runtime error: {msg}"),
            Self::SelectorNotFound(selector) => write!(f, "selector not found: {selector}"),
            Self::UnsupportedSelector(selector) => write!(f, "unsupported selector: {selector}"),
            Self::InvalidRegistry(violations) => {
                write!(f, "invalid feed registry: ")?;
                for (idx, violation) in violations.iter().enumerate() {
                    if idx > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{violation}")?;
                }
                Ok(())
            }
            Self::FeedIndexOutOfRange { index, feed_count } => write!(
                f,
                "feed index out of range: {index} (registry has {feed_count} feeds)"
            ),
            Self::UnknownFeedUrl(url) => write!(f, "no fixture registered for feed url: {url}"),
            Self::LoadTimedOut { feed_index } => write!(
                f,
                "feed load never completed: feed_index={feed_index}, task queue drained"
            ),
            Self::AssertionFailed {
                selector,
                expected,
                actual,
                dom_snippet,
            } => write!(
                f,
                "assertion failed for {selector}: expected {expected}, actual {actual}, snippet {dom_snippet}"
            ),
        }
    }
}

impl StdError for Error {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct NodeId(usize);

#[derive(Debug, Clone)]
enum NodeType {
    Document,
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    node_type: NodeType,
}

#[derive(Debug, Clone)]
struct Element {
    tag_name: String,
    attrs: HashMap<String, String>,
}

#[derive(Debug, Clone)]
struct Dom {
    nodes: Vec<Node>,
    root: NodeId,
    id_index: HashMap<String, NodeId>,
}

const DUMP_STACK_RED_ZONE: usize = 64 * 1024;
const DUMP_STACK_SIZE: usize = 1024 * 1024;

impl Dom {
    fn new() -> Self {
        let root = Node {
            parent: None,
            children: Vec::new(),
            node_type: NodeType::Document,
        };
        Self {
            nodes: vec![root],
            root: NodeId(0),
            id_index: HashMap::new(),
        }
    }

    fn create_node(&mut self, parent: Option<NodeId>, node_type: NodeType) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent,
            children: Vec::new(),
            node_type,
        });
        if let Some(parent_id) = parent {
            self.nodes[parent_id.0].children.push(id);
        }
        id
    }

    fn create_element(
        &mut self,
        parent: NodeId,
        tag_name: String,
        attrs: HashMap<String, String>,
    ) -> NodeId {
        let element = Element { tag_name, attrs };
        let id = self.create_node(Some(parent), NodeType::Element(element));
        if let Some(id_attr) = self
            .element(id)
            .and_then(|element| element.attrs.get("id").cloned())
        {
            self.id_index.insert(id_attr, id);
        }
        id
    }

    fn create_text(&mut self, parent: NodeId, text: String) -> NodeId {
        self.create_node(Some(parent), NodeType::Text(text))
    }

    fn element(&self, node_id: NodeId) -> Option<&Element> {
        match &self.nodes[node_id.0].node_type {
            NodeType::Element(element) => Some(element),
            _ => None,
        }
    }

    fn element_mut(&mut self, node_id: NodeId) -> Option<&mut Element> {
        match &mut self.nodes[node_id.0].node_type {
            NodeType::Element(element) => Some(element),
            _ => None,
        }
    }

    fn tag_name(&self, node_id: NodeId) -> Option<&str> {
        self.element(node_id).map(|e| e.tag_name.as_str())
    }

    fn parent(&self, node_id: NodeId) -> Option<NodeId> {
        self.nodes[node_id.0].parent
    }

    fn by_id(&self, id: &str) -> Option<NodeId> {
        self.id_index.get(id).copied()
    }

    fn attr(&self, node_id: NodeId, name: &str) -> Option<String> {
        self.element(node_id)
            .and_then(|element| element.attrs.get(name).cloned())
    }

    fn text_content(&self, node_id: NodeId) -> String {
        match &self.nodes[node_id.0].node_type {
            NodeType::Document | NodeType::Element(_) => {
                let mut out = String::new();
                for child in &self.nodes[node_id.0].children {
                    out.push_str(&self.text_content(*child));
                }
                out
            }
            NodeType::Text(text) => text.clone(),
        }
    }

    fn set_text_content(&mut self, node_id: NodeId, value: &str) -> Result<()> {
        if self.element(node_id).is_none() {
            return Err(Error::Runtime(
                "text content target is not an element".into(),
            ));
        }
        self.clear_children(node_id);
        if !value.is_empty() {
            self.create_text(node_id, value.to_string());
        }
        Ok(())
    }

    fn clear_children(&mut self, node_id: NodeId) {
        let old_children = std::mem::take(&mut self.nodes[node_id.0].children);
        for child in old_children {
            self.nodes[child.0].parent = None;
        }
    }

    fn dump_node(&self, node_id: NodeId) -> String {
        stacker::maybe_grow(DUMP_STACK_RED_ZONE, DUMP_STACK_SIZE, || {
            self.dump_node_impl(node_id)
        })
    }

    fn dump_node_impl(&self, node_id: NodeId) -> String {
        match &self.nodes[node_id.0].node_type {
            NodeType::Document => {
                let mut out = String::new();
                for child in &self.nodes[node_id.0].children {
                    out.push_str(&self.dump_node(*child));
                }
                out
            }
            NodeType::Text(text) => text.clone(),
            NodeType::Element(element) => {
                let mut out = String::new();
                out.push('<');
                out.push_str(&element.tag_name);
                let mut attrs: Vec<_> = element.attrs.iter().collect();
                attrs.sort_by(|a, b| a.0.cmp(b.0));
                for (k, v) in attrs {
                    out.push(' ');
                    out.push_str(k);
                    out.push_str("=\"");
                    out.push_str(v);
                    out.push('"');
                }
                out.push('>');
                for child in &self.nodes[node_id.0].children {
                    out.push_str(&self.dump_node(*child));
                }
                out.push_str("</");
                out.push_str(&element.tag_name);
                out.push('>');
                out
            }
        }
    }

    fn dump_children(&self, node_id: NodeId) -> String {
        let mut out = String::new();
        for child in &self.nodes[node_id.0].children {
            out.push_str(&self.dump_node(*child));
        }
        out
    }

    fn class_contains(&self, node_id: NodeId, class_name: &str) -> Result<bool> {
        let element = self
            .element(node_id)
            .ok_or_else(|| Error::Runtime("class target is not an element".into()))?;
        Ok(has_class(element, class_name))
    }

    fn class_add(&mut self, node_id: NodeId, class_name: &str) -> Result<()> {
        let element = self
            .element_mut(node_id)
            .ok_or_else(|| Error::Runtime("class target is not an element".into()))?;
        let mut classes = class_tokens(element.attrs.get("class").map(String::as_str));
        if !classes.iter().any(|name| name == class_name) {
            classes.push(class_name.to_string());
        }
        set_class_attr(element, &classes);
        Ok(())
    }

    fn class_remove(&mut self, node_id: NodeId, class_name: &str) -> Result<()> {
        let element = self
            .element_mut(node_id)
            .ok_or_else(|| Error::Runtime("class target is not an element".into()))?;
        let mut classes = class_tokens(element.attrs.get("class").map(String::as_str));
        classes.retain(|name| name != class_name);
        set_class_attr(element, &classes);
        Ok(())
    }

    fn class_toggle(&mut self, node_id: NodeId, class_name: &str) -> Result<bool> {
        let has = self.class_contains(node_id, class_name)?;
        if has {
            self.class_remove(node_id, class_name)?;
            Ok(false)
        } else {
            self.class_add(node_id, class_name)?;
            Ok(true)
        }
    }

    fn query_selector(&self, selector: &str) -> Result<Option<NodeId>> {
        let all = self.query_selector_all(selector)?;
        Ok(all.into_iter().next())
    }

    fn query_selector_all(&self, selector: &str) -> Result<Vec<NodeId>> {
        let groups = parse_selector_groups(selector)?;

        if groups.len() == 1 && groups[0].len() == 1 {
            if let Some(id) = groups[0][0].step.id_only() {
                return Ok(self.by_id(id).into_iter().collect());
            }
        }

        let mut ids = Vec::new();
        self.collect_elements_dfs(self.root, &mut ids);
        Ok(self.match_candidates(&groups, ids))
    }

    fn query_selector_all_from(&self, root: NodeId, selector: &str) -> Result<Vec<NodeId>> {
        let groups = parse_selector_groups(selector)?;

        let mut ids = Vec::new();
        self.collect_elements_descendants_dfs(root, &mut ids);
        Ok(self.match_candidates(&groups, ids))
    }

    fn match_candidates(
        &self,
        groups: &[Vec<SelectorPart>],
        candidates: Vec<NodeId>,
    ) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        let mut matched = Vec::new();
        for candidate in candidates {
            if groups
                .iter()
                .any(|steps| self.matches_selector_chain(candidate, steps))
                && seen.insert(candidate)
            {
                matched.push(candidate);
            }
        }
        matched
    }

    fn collect_elements_dfs(&self, node_id: NodeId, out: &mut Vec<NodeId>) {
        if matches!(self.nodes[node_id.0].node_type, NodeType::Element(_)) {
            out.push(node_id);
        }
        for child in &self.nodes[node_id.0].children {
            self.collect_elements_dfs(*child, out);
        }
    }

    fn collect_elements_descendants_dfs(&self, node_id: NodeId, out: &mut Vec<NodeId>) {
        for child in &self.nodes[node_id.0].children {
            self.collect_elements_dfs(*child, out);
        }
    }

    fn matches_selector_chain(&self, node_id: NodeId, steps: &[SelectorPart]) -> bool {
        if steps.is_empty() {
            return false;
        }
        if !self.matches_step(node_id, &steps[steps.len() - 1].step) {
            return false;
        }

        let mut current = node_id;
        for idx in (1..steps.len()).rev() {
            let prev_step = &steps[idx - 1].step;
            let combinator = steps[idx]
                .combinator
                .unwrap_or(SelectorCombinator::Descendant);

            let matched = match combinator {
                SelectorCombinator::Child => {
                    let Some(parent) = self.parent(current) else {
                        return false;
                    };
                    if self.matches_step(parent, prev_step) {
                        Some(parent)
                    } else {
                        None
                    }
                }
                SelectorCombinator::Descendant => {
                    let mut cursor = self.parent(current);
                    let mut found = None;
                    while let Some(parent) = cursor {
                        if self.matches_step(parent, prev_step) {
                            found = Some(parent);
                            break;
                        }
                        cursor = self.parent(parent);
                    }
                    found
                }
            };

            let Some(matched) = matched else {
                return false;
            };
            current = matched;
        }

        true
    }

    fn matches_step(&self, node_id: NodeId, step: &SelectorStep) -> bool {
        let Some(element) = self.element(node_id) else {
            return false;
        };

        if let Some(tag) = &step.tag {
            if !element.tag_name.eq_ignore_ascii_case(tag) {
                return false;
            }
        }

        if let Some(id) = &step.id {
            if element.attrs.get("id") != Some(id) {
                return false;
            }
        }

        step.classes
            .iter()
            .all(|class_name| has_class(element, class_name))
    }

    fn find_ancestor_with_attr(&self, node_id: NodeId, attr_name: &str) -> Option<NodeId> {
        let mut cursor = Some(node_id);
        while let Some(current) = cursor {
            if self
                .element(current)
                .map(|element| element.attrs.contains_key(attr_name))
                .unwrap_or(false)
            {
                return Some(current);
            }
            cursor = self.parent(current);
        }
        None
    }
}

fn has_class(element: &Element, class_name: &str) -> bool {
    element
        .attrs
        .get("class")
        .map(|classes| classes.split_whitespace().any(|c| c == class_name))
        .unwrap_or(false)
}

fn class_tokens(class_attr: Option<&str>) -> Vec<String> {
    class_attr
        .map(|value| {
            value
                .split_whitespace()
                .filter(|token| !token.is_empty())
                .map(ToOwned::to_owned)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default()
}

fn set_class_attr(element: &mut Element, classes: &[String]) {
    if classes.is_empty() {
        element.attrs.remove("class");
    } else {
        element.attrs.insert("class".to_string(), classes.join(" "));
    }
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    let mut it = value.chars();
    let mut out = String::new();
    for _ in 0..max_chars {
        let Some(ch) = it.next() else {
            return out;
        };
        out.push(ch);
    }
    if it.next().is_some() {
        out.push_str("...");
    }
    out
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct SelectorStep {
    tag: Option<String>,
    universal: bool,
    id: Option<String>,
    classes: Vec<String>,
}

impl SelectorStep {
    fn id_only(&self) -> Option<&str> {
        if !self.universal && self.tag.is_none() && self.classes.is_empty() {
            self.id.as_deref()
        } else {
            None
        }
    }

    fn is_empty(&self) -> bool {
        !self.universal && self.tag.is_none() && self.id.is_none() && self.classes.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SelectorCombinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SelectorPart {
    step: SelectorStep,
    // Relation to previous (left) selector part.
    combinator: Option<SelectorCombinator>,
}

fn parse_selector_groups(selector: &str) -> Result<Vec<Vec<SelectorPart>>> {
    let mut parsed = Vec::new();
    for group in selector.split(',') {
        let group = group.trim();
        if group.is_empty() {
            return Err(Error::UnsupportedSelector(selector.into()));
        }
        parsed.push(parse_selector_chain(group)?);
    }
    if parsed.is_empty() {
        return Err(Error::UnsupportedSelector(selector.into()));
    }
    Ok(parsed)
}

fn parse_selector_chain(selector: &str) -> Result<Vec<SelectorPart>> {
    let tokens = tokenize_selector(selector)?;
    let mut steps = Vec::new();
    let mut pending_combinator: Option<SelectorCombinator> = None;

    for token in tokens {
        if token == ">" {
            if pending_combinator.is_some() || steps.is_empty() {
                return Err(Error::UnsupportedSelector(selector.into()));
            }
            pending_combinator = Some(SelectorCombinator::Child);
            continue;
        }

        let step = parse_selector_step(&token)?;
        let combinator = if steps.is_empty() {
            None
        } else {
            Some(
                pending_combinator
                    .take()
                    .unwrap_or(SelectorCombinator::Descendant),
            )
        };
        steps.push(SelectorPart { step, combinator });
    }

    if steps.is_empty() || pending_combinator.is_some() {
        return Err(Error::UnsupportedSelector(selector.into()));
    }

    Ok(steps)
}

fn tokenize_selector(selector: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();

    for ch in selector.chars() {
        match ch {
            '>' => {
                if !current.trim().is_empty() {
                    tokens.push(current.trim().to_string());
                }
                current.clear();
                tokens.push(">".to_string());
            }
            ch if ch.is_ascii_whitespace() => {
                if !current.trim().is_empty() {
                    tokens.push(current.trim().to_string());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    if !current.trim().is_empty() {
        tokens.push(current.trim().to_string());
    }
    if tokens.is_empty() {
        return Err(Error::UnsupportedSelector(selector.into()));
    }
    Ok(tokens)
}

fn parse_selector_step(token: &str) -> Result<SelectorStep> {
    let mut step = SelectorStep::default();
    let mut chars = token.chars().peekable();

    if chars.peek() == Some(&'*') {
        chars.next();
        step.universal = true;
    } else if chars
        .peek()
        .map(|ch| ch.is_ascii_alphanumeric() || *ch == '-' || *ch == '_')
        .unwrap_or(false)
    {
        let mut tag = String::new();
        while let Some(ch) = chars.peek() {
            if ch.is_ascii_alphanumeric() || *ch == '-' || *ch == '_' {
                tag.push(*ch);
                chars.next();
            } else {
                break;
            }
        }
        step.tag = Some(tag.to_ascii_lowercase());
    }

    while let Some(ch) = chars.next() {
        match ch {
            '#' | '.' => {
                let mut name = String::new();
                while let Some(next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || *next == '-' || *next == '_' {
                        name.push(*next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if name.is_empty() {
                    return Err(Error::UnsupportedSelector(token.into()));
                }
                if ch == '#' {
                    if step.id.is_some() {
                        return Err(Error::UnsupportedSelector(token.into()));
                    }
                    step.id = Some(name);
                } else {
                    step.classes.push(name);
                }
            }
            _ => return Err(Error::UnsupportedSelector(token.into())),
        }
    }

    if step.is_empty() {
        return Err(Error::UnsupportedSelector(token.into()));
    }
    Ok(step)
}

fn parse_html(html: &str) -> Result<Dom> {
    let mut dom = Dom::new();

    let mut stack = vec![dom.root];
    let bytes = html.as_bytes();
    let mut i = 0usize;

    while i < bytes.len() {
        if starts_with_at(bytes, i, b"<!--") {
            if let Some(end) = find_subslice(bytes, i + 4, b"-->") {
                i = end + 3;
            } else {
                return Err(Error::HtmlParse("unclosed HTML comment".into()));
            }
            continue;
        }

        if bytes[i] == b'<' {
            if starts_with_at(bytes, i, b"</") {
                let (tag, next) = parse_end_tag(html, i)?;
                i = next;

                while stack.len() > 1 {
                    let top = *stack
                        .last()
                        .ok_or_else(|| Error::HtmlParse("invalid stack state".into()))?;
                    let top_tag = dom.tag_name(top).unwrap_or("");
                    stack.pop();
                    if top_tag.eq_ignore_ascii_case(&tag) {
                        break;
                    }
                }
                continue;
            }

            let (tag, attrs, self_closing, next) = parse_start_tag(html, i)?;
            i = next;

            if tag.eq_ignore_ascii_case("script") {
                return Err(Error::HtmlParse(
                    "script elements are not supported in page markup".into(),
                ));
            }

            let parent = *stack
                .last()
                .ok_or_else(|| Error::HtmlParse("missing parent element".into()))?;
            let node = dom.create_element(parent, tag.clone(), attrs);

            if !self_closing && !is_void_tag(&tag) {
                stack.push(node);
            }
            continue;
        }

        let text_start = i;
        while i < bytes.len() && bytes[i] != b'<' {
            i += 1;
        }

        if let Some(text) = html.get(text_start..i) {
            if !text.is_empty() {
                let parent = *stack
                    .last()
                    .ok_or_else(|| Error::HtmlParse("missing parent element".into()))?;
                dom.create_text(parent, text.to_string());
            }
        }
    }

    Ok(dom)
}

fn parse_start_tag(
    html: &str,
    at: usize,
) -> Result<(String, HashMap<String, String>, bool, usize)> {
    let bytes = html.as_bytes();
    let mut i = at;
    if bytes.get(i) != Some(&b'<') {
        return Err(Error::HtmlParse("expected '<'".into()));
    }
    i += 1;

    skip_ws(bytes, &mut i);
    let tag_start = i;
    while i < bytes.len() && is_tag_char(bytes[i]) {
        i += 1;
    }

    let tag = html
        .get(tag_start..i)
        .ok_or_else(|| Error::HtmlParse("invalid tag name".into()))?
        .to_ascii_lowercase();

    if tag.is_empty() {
        return Err(Error::HtmlParse("empty tag name".into()));
    }

    let mut attrs = HashMap::new();
    let mut self_closing = false;

    loop {
        skip_ws(bytes, &mut i);
        if i >= bytes.len() {
            return Err(Error::HtmlParse("unclosed start tag".into()));
        }

        if bytes[i] == b'>' {
            i += 1;
            break;
        }

        if bytes[i] == b'/' && i + 1 < bytes.len() && bytes[i + 1] == b'>' {
            self_closing = true;
            i += 2;
            break;
        }

        let name_start = i;
        while i < bytes.len() && is_attr_name_char(bytes[i]) {
            i += 1;
        }

        let name = html
            .get(name_start..i)
            .ok_or_else(|| Error::HtmlParse("invalid attribute name".into()))?
            .to_ascii_lowercase();

        if name.is_empty() {
            return Err(Error::HtmlParse("invalid attribute name".into()));
        }

        skip_ws(bytes, &mut i);

        let value = if i < bytes.len() && bytes[i] == b'=' {
            i += 1;
            skip_ws(bytes, &mut i);
            parse_attr_value(html, bytes, &mut i)?
        } else {
            "true".to_string()
        };

        attrs.insert(name, value);
    }

    Ok((tag, attrs, self_closing, i))
}

fn parse_end_tag(html: &str, at: usize) -> Result<(String, usize)> {
    let bytes = html.as_bytes();
    let mut i = at;

    if !(bytes.get(i) == Some(&b'<') && bytes.get(i + 1) == Some(&b'/')) {
        return Err(Error::HtmlParse("expected end tag".into()));
    }
    i += 2;
    skip_ws(bytes, &mut i);

    let tag_start = i;
    while i < bytes.len() && is_tag_char(bytes[i]) {
        i += 1;
    }

    let tag = html
        .get(tag_start..i)
        .ok_or_else(|| Error::HtmlParse("invalid end tag".into()))?
        .to_ascii_lowercase();

    while i < bytes.len() && bytes[i] != b'>' {
        i += 1;
    }
    if i >= bytes.len() {
        return Err(Error::HtmlParse("unclosed end tag".into()));
    }

    Ok((tag, i + 1))
}

fn parse_attr_value(html: &str, bytes: &[u8], i: &mut usize) -> Result<String> {
    if *i >= bytes.len() {
        return Err(Error::HtmlParse("missing attribute value".into()));
    }

    if bytes[*i] == b'\'' || bytes[*i] == b'"' {
        let quote = bytes[*i];
        *i += 1;
        let start = *i;
        while *i < bytes.len() && bytes[*i] != quote {
            *i += 1;
        }
        if *i >= bytes.len() {
            return Err(Error::HtmlParse("unclosed attribute value".into()));
        }
        let value = html
            .get(start..*i)
            .ok_or_else(|| Error::HtmlParse("invalid attribute value".into()))?
            .to_string();
        *i += 1;
        return Ok(value);
    }

    let start = *i;
    while *i < bytes.len() && !bytes[*i].is_ascii_whitespace() && bytes[*i] != b'>' {
        *i += 1;
    }
    Ok(html
        .get(start..*i)
        .ok_or_else(|| Error::HtmlParse("invalid attribute value".into()))?
        .to_string())
}

fn is_void_tag(tag: &str) -> bool {
    matches!(
        tag,
        "area"
            | "base"
            | "br"
            | "col"
            | "embed"
            | "hr"
            | "img"
            | "input"
            | "link"
            | "meta"
            | "param"
            | "source"
            | "track"
            | "wbr"
    )
}

fn starts_with_at(bytes: &[u8], at: usize, needle: &[u8]) -> bool {
    bytes.len() >= at + needle.len() && &bytes[at..at + needle.len()] == needle
}

fn find_subslice(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || bytes.len() < needle.len() {
        return None;
    }
    (from..=bytes.len() - needle.len()).find(|&idx| &bytes[idx..idx + needle.len()] == needle)
}

fn skip_ws(bytes: &[u8], i: &mut usize) {
    while *i < bytes.len() && bytes[*i].is_ascii_whitespace() {
        *i += 1;
    }
}

fn is_tag_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_'
}

fn is_attr_name_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' || byte == b':'
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedField {
    Url,
    Name,
}

impl fmt::Display for FeedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url => write!(f, "url"),
            Self::Name => write!(f, "name"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedViolation {
    EmptyRegistry,
    EmptyField { index: usize, field: FeedField },
    SuspectUrl { index: usize, url: String },
}

impl fmt::Display for FeedViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRegistry => write!(f, "feed registry has no entries"),
            Self::EmptyField { index, field } => {
                write!(f, "feed {index} has an empty {field}")
            }
            Self::SuspectUrl { index, url } => {
                write!(
                    f,
                    "feed {index} url does not look like an http(s) url: {url}"
                )
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedDescriptor {
    pub url: String,
    pub name: String,
}

impl FeedDescriptor {
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedRegistry {
    feeds: Vec<FeedDescriptor>,
}

const URL_SHAPE_PATTERN: &str = r"^https?://[^\s/$.?#][^\s]*$";

impl FeedRegistry {
    pub fn new(feeds: Vec<FeedDescriptor>) -> Self {
        Self { feeds }
    }

    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&FeedDescriptor> {
        self.feeds.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeedDescriptor> {
        self.feeds.iter()
    }

    pub fn validate(&self) -> Vec<FeedViolation> {
        let mut violations = Vec::new();
        if self.feeds.is_empty() {
            violations.push(FeedViolation::EmptyRegistry);
        }
        for (index, feed) in self.feeds.iter().enumerate() {
            if feed.url.is_empty() {
                violations.push(FeedViolation::EmptyField {
                    index,
                    field: FeedField::Url,
                });
            }
            if feed.name.is_empty() {
                violations.push(FeedViolation::EmptyField {
                    index,
                    field: FeedField::Name,
                });
            }
        }
        violations
    }

    pub fn lint_urls(&self) -> Result<Vec<FeedViolation>> {
        let pattern = fancy_regex::Regex::new(URL_SHAPE_PATTERN)
            .map_err(|err| Error::Runtime(format!("invalid url lint pattern: {err}")))?;

        let mut violations = Vec::new();
        for (index, feed) in self.feeds.iter().enumerate() {
            if feed.url.is_empty() {
                continue;
            }
            let matches = pattern
                .is_match(&feed.url)
                .map_err(|err| Error::Runtime(format!("url lint failed: {err}")))?;
            if !matches {
                violations.push(FeedViolation::SuspectUrl {
                    index,
                    url: feed.url.clone(),
                });
            }
        }
        Ok(violations)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    pub snippet: String,
}

impl FeedEntry {
    pub fn new(
        title: impl Into<String>,
        link: impl Into<String>,
        snippet: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            link: link.into(),
            snippet: snippet.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct FeedFixture {
    entries: Vec<FeedEntry>,
    latency_ms: i64,
}

#[derive(Debug, Clone, Default)]
pub struct FeedServer {
    fixtures: HashMap<String, FeedFixture>,
}

impl FeedServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_feed(&mut self, url: impl Into<String>, latency_ms: i64, entries: Vec<FeedEntry>) {
        self.fixtures.insert(
            url.into(),
            FeedFixture {
                entries,
                latency_ms: latency_ms.max(0),
            },
        );
    }

    pub fn with_sample_entries(registry: &FeedRegistry) -> Self {
        let mut server = Self::new();
        for (index, feed) in registry.iter().enumerate() {
            let entries = (1..=2 + index % 3)
                .map(|n| {
                    FeedEntry::new(
                        format!("{} item {n}", feed.name),
                        format!("{}/items/{n}", feed.url),
                        format!("Summary {n} from {}", feed.name),
                    )
                })
                .collect();
            server.add_feed(feed.url.clone(), 10 + 5 * index as i64, entries);
        }
        server
    }

    fn fetch(&self, url: &str) -> Result<&FeedFixture> {
        self.fixtures
            .get(url)
            .ok_or_else(|| Error::UnknownFeedUrl(url.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentSnapshot(String);

impl ContentSnapshot {
    fn new(raw: &str) -> Self {
        Self(raw.nfc().collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    ToggleMenu,
    SelectFeed,
}

#[derive(Debug, Clone)]
struct Listener {
    action: Action,
}

#[derive(Debug, Default, Clone)]
struct ListenerStore {
    map: HashMap<NodeId, HashMap<String, Vec<Listener>>>,
}

impl ListenerStore {
    fn add(&mut self, node_id: NodeId, event: String, listener: Listener) {
        self.map
            .entry(node_id)
            .or_default()
            .entry(event)
            .or_default()
            .push(listener);
    }

    fn get(&self, node_id: NodeId, event: &str) -> Vec<Listener> {
        self.map
            .get(&node_id)
            .and_then(|events| events.get(event))
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
struct EventState {
    event_type: String,
    target: NodeId,
    current_target: NodeId,
}

impl EventState {
    fn new(event_type: &str, target: NodeId) -> Self {
        Self {
            event_type: event_type.to_string(),
            target,
            current_target: target,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskKind {
    FinishLoad { request_id: u64, feed_index: usize },
}

#[derive(Debug, Clone)]
struct ScheduledTask {
    id: i64,
    due_at: i64,
    order: i64,
    kind: TaskKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTimer {
    pub id: i64,
    pub due_at: i64,
    pub order: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoadHandle {
    request_id: u64,
    feed_index: usize,
}

impl LoadHandle {
    pub fn feed_index(&self) -> usize {
        self.feed_index
    }
}

#[derive(Debug, Clone, Copy)]
struct PageHandles {
    body: NodeId,
    menu_icon: NodeId,
    feed_list: NodeId,
    header_title: NodeId,
    feed_container: NodeId,
}

const PAGE_MARKUP: &str = r##"
<body class="menu-hidden">
  <div class="slide-menu">
    <ul class="feed-list"></ul>
  </div>
  <div class="header">
    <a href="#" class="menu-icon-link"><img src="img/menu.svg" alt="menu icon"></a>
    <h1 class="header-title">Feeds</h1>
  </div>
  <div class="feed"></div>
</body>
"##;

const MENU_HIDDEN_CLASS: &str = "menu-hidden";
const FEED_INDEX_ATTR: &str = "data-feed-index";

#[derive(Debug)]
pub struct Harness {
    dom: Dom,
    listeners: ListenerStore,
    page: PageHandles,
    registry: FeedRegistry,
    server: FeedServer,
    task_queue: Vec<ScheduledTask>,
    now_ms: i64,
    timer_step_limit: usize,
    next_timer_id: i64,
    next_task_order: i64,
    next_request_id: u64,
    completed_loads: HashSet<u64>,
    trace: bool,
    trace_events: bool,
    trace_timers: bool,
    trace_loads: bool,
    trace_logs: Vec<String>,
    trace_log_limit: usize,
    trace_to_stderr: bool,
}

impl Harness {
    pub fn feed_reader(registry: FeedRegistry, server: FeedServer) -> Result<Self> {
        let violations = registry.validate();
        if !violations.is_empty() {
            return Err(Error::InvalidRegistry(violations));
        }

        let dom = parse_html(PAGE_MARKUP)?;
        let page = resolve_page_handles(&dom)?;
        let mut harness = Self {
            dom,
            listeners: ListenerStore::default(),
            page,
            registry,
            server,
            task_queue: Vec::new(),
            now_ms: 0,
            timer_step_limit: 10_000,
            next_timer_id: 1,
            next_task_order: 0,
            next_request_id: 1,
            completed_loads: HashSet::new(),
            trace: false,
            trace_events: true,
            trace_timers: true,
            trace_loads: true,
            trace_logs: Vec::new(),
            trace_log_limit: 10_000,
            trace_to_stderr: true,
        };

        harness.render_feed_menu();
        harness.bind_page_handlers();
        Ok(harness)
    }

    pub fn registry(&self) -> &FeedRegistry {
        &self.registry
    }

    fn render_feed_menu(&mut self) {
        let feeds: Vec<(usize, String, String)> = self
            .registry
            .iter()
            .enumerate()
            .map(|(index, feed)| (index, feed.url.clone(), feed.name.clone()))
            .collect();

        for (index, url, name) in feeds {
            let item = self
                .dom
                .create_element(self.page.feed_list, "li".into(), HashMap::new());
            let link = self.dom.create_element(
                item,
                "a".into(),
                HashMap::from([
                    ("href".to_string(), url),
                    (FEED_INDEX_ATTR.to_string(), index.to_string()),
                ]),
            );
            self.dom.create_text(link, name);
        }
    }

    fn bind_page_handlers(&mut self) {
        self.listeners.add(
            self.page.menu_icon,
            "click".into(),
            Listener {
                action: Action::ToggleMenu,
            },
        );
        // Feed selection is delegated: one listener on the list hears
        // clicks bubbling up from the per-feed links.
        self.listeners.add(
            self.page.feed_list,
            "click".into(),
            Listener {
                action: Action::SelectFeed,
            },
        );
    }

    pub fn click(&mut self, selector: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        self.dispatch_event(target, "click")?;
        Ok(())
    }

    pub fn click_nth(&mut self, selector: &str, index: usize) -> Result<()> {
        let matches = self.dom.query_selector_all(selector)?;
        let target = matches
            .get(index)
            .copied()
            .ok_or_else(|| Error::SelectorNotFound(format!("{selector} (match {index})")))?;
        self.dispatch_event(target, "click")?;
        Ok(())
    }

    fn dispatch_event(&mut self, target: NodeId, event_type: &str) -> Result<EventState> {
        let mut event = EventState::new(event_type, target);

        let mut path = Vec::new();
        let mut cursor = Some(target);
        while let Some(node) = cursor {
            path.push(node);
            cursor = self.dom.parent(node);
        }

        // Target phase, then bubble toward the root.
        for node in path {
            event.current_target = node;
            self.invoke_listeners(node, &event)?;
        }

        self.trace_event_line(format!(
            "[event] done {} target={} now_ms={}",
            event.event_type,
            self.event_node_label(event.target),
            self.now_ms
        ));
        Ok(event)
    }

    fn invoke_listeners(&mut self, node_id: NodeId, event: &EventState) -> Result<()> {
        let listeners = self.listeners.get(node_id, &event.event_type);
        for listener in listeners {
            self.trace_event_line(format!(
                "[event] {} target={} current={} action={:?}",
                event.event_type,
                self.event_node_label(event.target),
                self.event_node_label(event.current_target),
                listener.action
            ));
            self.apply_action(listener.action, event)?;
        }
        Ok(())
    }

    fn apply_action(&mut self, action: Action, event: &EventState) -> Result<()> {
        match action {
            Action::ToggleMenu => {
                let hidden = self.dom.class_toggle(self.page.body, MENU_HIDDEN_CLASS)?;
                self.trace_event_line(format!("[event] menu hidden={hidden}"));
                Ok(())
            }
            Action::SelectFeed => {
                let Some(link) = self
                    .dom
                    .find_ancestor_with_attr(event.target, FEED_INDEX_ATTR)
                else {
                    return Ok(());
                };
                let raw = self.dom.attr(link, FEED_INDEX_ATTR).unwrap_or_default();
                let index: usize = raw.parse().map_err(|_| {
                    Error::Runtime(format!("malformed {FEED_INDEX_ATTR} attribute: {raw}"))
                })?;
                self.schedule_load(index)?;
                self.dom.class_add(self.page.body, MENU_HIDDEN_CLASS)?;
                Ok(())
            }
        }
    }

    pub fn load_feed(&mut self, index: usize) -> Result<LoadHandle> {
        self.schedule_load(index)
    }

    pub fn load_feed_detached(&mut self, index: usize) -> Result<()> {
        self.schedule_load(index)?;
        Ok(())
    }

    fn schedule_load(&mut self, index: usize) -> Result<LoadHandle> {
        let feed = self
            .registry
            .get(index)
            .ok_or_else(|| Error::FeedIndexOutOfRange {
                index,
                feed_count: self.registry.len(),
            })?;
        let url = feed.url.clone();
        let latency_ms = self.server.fetch(&url)?.latency_ms;

        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let id = self.next_timer_id;
        self.next_timer_id += 1;
        let order = self.next_task_order;
        self.next_task_order += 1;
        let due_at = self.now_ms.saturating_add(latency_ms);

        self.task_queue.push(ScheduledTask {
            id,
            due_at,
            order,
            kind: TaskKind::FinishLoad {
                request_id,
                feed_index: index,
            },
        });
        self.trace_load_line(format!(
            "[load] request feed={index} url={url} due_at={due_at} now_ms={}",
            self.now_ms
        ));

        Ok(LoadHandle {
            request_id,
            feed_index: index,
        })
    }

    fn finish_load(&mut self, request_id: u64, feed_index: usize) -> Result<()> {
        if self.completed_loads.contains(&request_id) {
            return Err(Error::Runtime(format!(
                "feed load completed twice: request_id={request_id}, feed_index={feed_index}"
            )));
        }

        let feed = self
            .registry
            .get(feed_index)
            .ok_or_else(|| Error::FeedIndexOutOfRange {
                index: feed_index,
                feed_count: self.registry.len(),
            })?
            .clone();
        let fixture = self.server.fetch(&feed.url)?.clone();

        self.dom
            .set_text_content(self.page.header_title, &feed.name)?;
        self.dom.clear_children(self.page.feed_container);
        for entry in &fixture.entries {
            let link = self.dom.create_element(
                self.page.feed_container,
                "a".into(),
                HashMap::from([
                    ("class".to_string(), "entry-link".to_string()),
                    ("href".to_string(), entry.link.clone()),
                ]),
            );
            let article = self.dom.create_element(
                link,
                "article".into(),
                HashMap::from([("class".to_string(), "entry".to_string())]),
            );
            let title = self
                .dom
                .create_element(article, "h2".into(), HashMap::new());
            self.dom.create_text(title, entry.title.clone());
            let snippet = self
                .dom
                .create_element(article, "p".into(), HashMap::new());
            self.dom.create_text(snippet, entry.snippet.clone());
        }

        self.completed_loads.insert(request_id);
        self.trace_load_line(format!(
            "[load] done feed={feed_index} url={} entries={} now_ms={}",
            feed.url,
            fixture.entries.len(),
            self.now_ms
        ));
        Ok(())
    }

    pub fn is_load_complete(&self, handle: LoadHandle) -> bool {
        self.completed_loads.contains(&handle.request_id)
    }

    pub fn await_load(&mut self, handle: LoadHandle) -> Result<()> {
        let mut steps = 0usize;
        while !self.is_load_complete(handle) {
            steps += 1;
            if steps > self.timer_step_limit {
                return Err(self.timer_step_limit_error(self.timer_step_limit, steps, None));
            }
            if !self.run_next_timer()? {
                return Err(Error::LoadTimedOut {
                    feed_index: handle.feed_index,
                });
            }
        }
        self.trace_load_line(format!(
            "[load] await feed={} steps={steps} now_ms={}",
            handle.feed_index, self.now_ms
        ));
        Ok(())
    }

    pub fn now_ms(&self) -> i64 {
        self.now_ms
    }

    pub fn advance_time(&mut self, delta_ms: i64) -> Result<()> {
        if delta_ms < 0 {
            return Err(Error::Runtime(
                "advance_time requires non-negative milliseconds".into(),
            ));
        }
        let from = self.now_ms;
        self.now_ms = self.now_ms.saturating_add(delta_ms);
        let ran = self.run_due_timers_internal()?;
        self.trace_timer_line(format!(
            "[timer] advance delta_ms={} from={} to={} ran_due={}",
            delta_ms, from, self.now_ms, ran
        ));
        Ok(())
    }

    pub fn advance_time_to(&mut self, target_ms: i64) -> Result<()> {
        if target_ms < self.now_ms {
            return Err(Error::Runtime(format!(
                "advance_time_to requires target >= now_ms (target={target_ms}, now_ms={})",
                self.now_ms
            )));
        }
        let from = self.now_ms;
        self.now_ms = target_ms;
        let ran = self.run_due_timers_internal()?;
        self.trace_timer_line(format!(
            "[timer] advance_to from={} to={} ran_due={}",
            from, self.now_ms, ran
        ));
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        let from = self.now_ms;
        let ran = self.run_timer_queue(None, true)?;
        self.trace_timer_line(format!(
            "[timer] flush from={} to={} ran={}",
            from, self.now_ms, ran
        ));
        Ok(())
    }

    pub fn run_next_timer(&mut self) -> Result<bool> {
        let Some(next_idx) = self.next_task_index(None) else {
            self.trace_timer_line("[timer] run_next none".into());
            return Ok(false);
        };

        let task = self.task_queue.remove(next_idx);
        if task.due_at > self.now_ms {
            self.now_ms = task.due_at;
        }
        self.execute_timer_task(task)?;
        Ok(true)
    }

    pub fn run_due_timers(&mut self) -> Result<usize> {
        let ran = self.run_due_timers_internal()?;
        self.trace_timer_line(format!(
            "[timer] run_due now_ms={} ran={}",
            self.now_ms, ran
        ));
        Ok(ran)
    }

    fn run_due_timers_internal(&mut self) -> Result<usize> {
        self.run_timer_queue(Some(self.now_ms), false)
    }

    fn run_timer_queue(&mut self, due_limit: Option<i64>, advance_clock: bool) -> Result<usize> {
        let mut steps = 0usize;
        while let Some(next_idx) = self.next_task_index(due_limit) {
            steps += 1;
            if steps > self.timer_step_limit {
                return Err(self.timer_step_limit_error(self.timer_step_limit, steps, due_limit));
            }
            let task = self.task_queue.remove(next_idx);
            if advance_clock && task.due_at > self.now_ms {
                self.now_ms = task.due_at;
            }
            self.execute_timer_task(task)?;
        }
        Ok(steps)
    }

    fn timer_step_limit_error(
        &self,
        max_steps: usize,
        steps: usize,
        due_limit: Option<i64>,
    ) -> Error {
        let due_limit_desc = due_limit
            .map(|value| value.to_string())
            .unwrap_or_else(|| "none".into());

        let next_task_desc = self
            .next_task_index(due_limit)
            .and_then(|idx| self.task_queue.get(idx))
            .map(|task| format!("id={},due_at={},order={}", task.id, task.due_at, task.order))
            .unwrap_or_else(|| "none".into());

        Error::Runtime(format!(
            "flush exceeded max task steps (possible load loop): limit={max_steps}, steps={steps}, now_ms={}, due_limit={}, pending_tasks={}, next_task={}",
            self.now_ms,
            due_limit_desc,
            self.task_queue.len(),
            next_task_desc
        ))
    }

    fn next_task_index(&self, due_limit: Option<i64>) -> Option<usize> {
        self.task_queue
            .iter()
            .enumerate()
            .filter(|(_, task)| {
                if let Some(limit) = due_limit {
                    task.due_at <= limit
                } else {
                    true
                }
            })
            .min_by_key(|(_, task)| (task.due_at, task.order))
            .map(|(idx, _)| idx)
    }

    fn execute_timer_task(&mut self, task: ScheduledTask) -> Result<()> {
        self.trace_timer_line(format!(
            "[timer] run id={} due_at={} now_ms={}",
            task.id, task.due_at, self.now_ms
        ));
        match task.kind {
            TaskKind::FinishLoad {
                request_id,
                feed_index,
            } => self.finish_load(request_id, feed_index),
        }
    }

    pub fn pending_timers(&self) -> Vec<PendingTimer> {
        let mut timers = self
            .task_queue
            .iter()
            .map(|task| PendingTimer {
                id: task.id,
                due_at: task.due_at,
                order: task.order,
            })
            .collect::<Vec<_>>();
        timers.sort_by_key(|timer| (timer.due_at, timer.order));
        timers
    }

    pub fn clear_all_timers(&mut self) -> usize {
        let cleared = self.task_queue.len();
        self.task_queue.clear();
        self.trace_timer_line(format!("[timer] clear_all cleared={cleared}"));
        cleared
    }

    pub fn set_timer_step_limit(&mut self, max_steps: usize) -> Result<()> {
        if max_steps == 0 {
            return Err(Error::Runtime(
                "set_timer_step_limit requires at least 1 step".into(),
            ));
        }
        self.timer_step_limit = max_steps;
        Ok(())
    }

    pub fn feed_snapshot(&self) -> ContentSnapshot {
        ContentSnapshot::new(&self.dom.dump_children(self.page.feed_container))
    }

    pub fn count_within(&self, selector: &str, descendant: &str) -> Result<usize> {
        let root = self.select_one(selector)?;
        Ok(self.dom.query_selector_all_from(root, descendant)?.len())
    }

    pub fn assert_exists(&self, selector: &str) -> Result<()> {
        let _ = self.select_one(selector)?;
        Ok(())
    }

    pub fn assert_text(&self, selector: &str, expected: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        let actual = self.dom.text_content(target);
        if actual != expected {
            return Err(Error::AssertionFailed {
                selector: selector.to_string(),
                expected: expected.to_string(),
                actual,
                dom_snippet: self.node_snippet(target),
            });
        }
        Ok(())
    }

    pub fn assert_has_class(&self, selector: &str, class_name: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        if !self.dom.class_contains(target, class_name)? {
            return Err(Error::AssertionFailed {
                selector: selector.to_string(),
                expected: format!("class {class_name}"),
                actual: self
                    .dom
                    .attr(target, "class")
                    .unwrap_or_else(|| "(no class)".into()),
                dom_snippet: self.node_snippet(target),
            });
        }
        Ok(())
    }

    pub fn assert_lacks_class(&self, selector: &str, class_name: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        if self.dom.class_contains(target, class_name)? {
            return Err(Error::AssertionFailed {
                selector: selector.to_string(),
                expected: format!("no class {class_name}"),
                actual: self
                    .dom
                    .attr(target, "class")
                    .unwrap_or_else(|| "(no class)".into()),
                dom_snippet: self.node_snippet(target),
            });
        }
        Ok(())
    }

    pub fn assert_entry_count_at_least(&self, min: usize) -> Result<()> {
        let actual = self
            .dom
            .query_selector_all_from(self.page.feed_container, ".entry")?
            .len();
        if actual < min {
            return Err(Error::AssertionFailed {
                selector: ".feed .entry".to_string(),
                expected: format!(">= {min} entries"),
                actual: actual.to_string(),
                dom_snippet: self.node_snippet(self.page.feed_container),
            });
        }
        Ok(())
    }

    pub fn assert_feed_changed(&self, before: &ContentSnapshot) -> Result<()> {
        let current = self.feed_snapshot();
        if current == *before {
            return Err(Error::AssertionFailed {
                selector: ".feed".to_string(),
                expected: "content different from captured snapshot".to_string(),
                actual: truncate_chars(current.as_str(), 200),
                dom_snippet: self.node_snippet(self.page.feed_container),
            });
        }
        Ok(())
    }

    pub fn dump_dom(&self, selector: &str) -> Result<String> {
        let target = self.select_one(selector)?;
        Ok(self.dom.dump_node(target))
    }

    fn select_one(&self, selector: &str) -> Result<NodeId> {
        self.dom
            .query_selector(selector)?
            .ok_or_else(|| Error::SelectorNotFound(selector.to_string()))
    }

    fn node_snippet(&self, node_id: NodeId) -> String {
        truncate_chars(&self.dom.dump_node(node_id), 200)
    }

    fn event_node_label(&self, node_id: NodeId) -> String {
        let Some(element) = self.dom.element(node_id) else {
            return "(document)".into();
        };
        let mut label = element.tag_name.clone();
        if let Some(id) = element.attrs.get("id") {
            label.push('#');
            label.push_str(id);
        }
        if let Some(classes) = element.attrs.get("class") {
            for class in classes.split_whitespace() {
                label.push('.');
                label.push_str(class);
            }
        }
        label
    }

    pub fn enable_trace(&mut self, enabled: bool) {
        self.trace = enabled;
    }

    pub fn take_trace_logs(&mut self) -> Vec<String> {
        std::mem::take(&mut self.trace_logs)
    }

    pub fn set_trace_stderr(&mut self, enabled: bool) {
        self.trace_to_stderr = enabled;
    }

    pub fn set_trace_events(&mut self, enabled: bool) {
        self.trace_events = enabled;
    }

    pub fn set_trace_timers(&mut self, enabled: bool) {
        self.trace_timers = enabled;
    }

    pub fn set_trace_loads(&mut self, enabled: bool) {
        self.trace_loads = enabled;
    }

    pub fn set_trace_log_limit(&mut self, max_entries: usize) -> Result<()> {
        if max_entries == 0 {
            return Err(Error::Runtime(
                "set_trace_log_limit requires at least 1 entry".into(),
            ));
        }
        self.trace_log_limit = max_entries;
        while self.trace_logs.len() > self.trace_log_limit {
            self.trace_logs.remove(0);
        }
        Ok(())
    }

    fn trace_event_line(&mut self, line: String) {
        if self.trace && self.trace_events {
            self.trace_line(line);
        }
    }

    fn trace_timer_line(&mut self, line: String) {
        if self.trace && self.trace_timers {
            self.trace_line(line);
        }
    }

    fn trace_load_line(&mut self, line: String) {
        if self.trace && self.trace_loads {
            self.trace_line(line);
        }
    }

    fn trace_line(&mut self, line: String) {
        if self.trace {
            if self.trace_to_stderr {
                eprintln!("{line}");
            }
            if self.trace_logs.len() >= self.trace_log_limit {
                self.trace_logs.remove(0);
            }
            self.trace_logs.push(line);
        }
    }
}

fn resolve_page_handles(dom: &Dom) -> Result<PageHandles> {
    let select = |selector: &str| -> Result<NodeId> {
        dom.query_selector(selector)?
            .ok_or_else(|| Error::SelectorNotFound(selector.to_string()))
    };
    Ok(PageHandles {
        body: select("body")?,
        menu_icon: select(".menu-icon-link")?,
        feed_list: select(".feed-list")?,
        header_title: select(".header-title")?,
        feed_container: select(".feed")?,
    })
}
