//! Namespace-tolerant XML document tree.
//!
//! Bulletin feeds are inconsistent about prefixes: the storm element may be
//! `<nhc:Cyclone>` with a declared namespace, `<nhc:Cyclone>` with no
//! declaration at all, or a bare `<Cyclone>`. The tree keeps the raw prefix and
//! the resolved namespace URI (when one was declared) for every element, and
//! lookups walk an ordered list of [`TagCandidate`]s.

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::NsReader;
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum FeedParseError {
    #[error("malformed xml at byte {position}: {source}")]
    Xml {
        position: u64,
        #[source]
        source: quick_xml::Error,
    },
    #[error("document has no root element")]
    Empty,
    #[error("unexpected end of document inside <{0}>")]
    Unclosed(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlElement {
    pub prefix: Option<String>,
    pub local_name: String,
    /// Resolved from `xmlns`/`xmlns:*` declarations in scope, if any.
    pub namespace: Option<String>,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
    text: String,
}

impl XmlElement {
    /// `prefix:local` or just `local`.
    pub fn qualified_name(&self) -> String {
        match &self.prefix {
            Some(p) => format!("{p}:{}", self.local_name),
            None => self.local_name.clone(),
        }
    }

    /// All text and CDATA below this element, in document order.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        out.push_str(&self.text);
        for c in &self.children {
            c.collect_text(out);
        }
    }

    /// Depth-first search over descendants (not `self`).
    pub fn find_descendant(&self, candidate: &TagCandidate<'_>) -> Option<&XmlElement> {
        for c in &self.children {
            if candidate.matches(c) {
                return Some(c);
            }
            if let Some(hit) = c.find_descendant(candidate) {
                return Some(hit);
            }
        }
        None
    }

    /// Every descendant whose local name equals `local`, in document order.
    pub fn descendants_named<'a>(&'a self, local: &str, out: &mut Vec<&'a XmlElement>) {
        for c in &self.children {
            if c.local_name == local {
                out.push(c);
            }
            c.descendants_named(local, out);
        }
    }
}

/// One way of spelling a tag. Lookups try candidates in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagCandidate<'a> {
    /// Matches when the local name agrees and either the resolved namespace is
    /// `uri` or the raw prefix is `prefix` (undeclared prefixes are common).
    Namespaced {
        prefix: &'a str,
        uri: &'a str,
        local: &'a str,
    },
    /// Matches on local name alone, whatever the prefix.
    Bare(&'a str),
}

impl TagCandidate<'_> {
    pub fn matches(&self, el: &XmlElement) -> bool {
        match *self {
            TagCandidate::Namespaced { prefix, uri, local } => {
                el.local_name == local
                    && (el.namespace.as_deref() == Some(uri) || el.prefix.as_deref() == Some(prefix))
            }
            TagCandidate::Bare(local) => el.local_name == local,
        }
    }
}

/// Try each candidate in turn against the descendants of `parent`.
pub fn lookup<'e>(parent: &'e XmlElement, candidates: &[TagCandidate<'_>]) -> Option<&'e XmlElement> {
    candidates.iter().find_map(|c| parent.find_descendant(c))
}

/// Trimmed text of the first element matched by `candidates`, or `""`.
pub fn lookup_text(parent: &XmlElement, candidates: &[TagCandidate<'_>]) -> String {
    lookup(parent, candidates)
        .map(|el| el.text_content().trim().to_string())
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedDocument {
    pub root: XmlElement,
    /// Prefix → URI for every declaration seen anywhere in the document.
    pub namespaces: BTreeMap<String, String>,
}

impl FeedDocument {
    pub fn parse(xml: &str) -> Result<Self, FeedParseError> {
        let scrubbed = scrub_html_entities_for_xml(xml);
        let mut reader = NsReader::from_str(&scrubbed);

        let mut stack: Vec<XmlElement> = Vec::new();
        let mut namespaces = BTreeMap::new();
        let mut root: Option<XmlElement> = None;

        loop {
            let (namespace, event) = match reader.read_resolved_event() {
                Ok((resolved, event)) => (resolved_uri(resolved), event),
                Err(source) => {
                    return Err(FeedParseError::Xml {
                        position: reader.buffer_position() as u64,
                        source,
                    })
                }
            };
            match event {
                Event::Start(start) => {
                    stack.push(open_element(&start, namespace, &mut namespaces));
                }
                Event::Empty(start) => {
                    let el = open_element(&start, namespace, &mut namespaces);
                    attach(el, &mut stack, &mut root);
                }
                Event::End(_) => {
                    if let Some(el) = stack.pop() {
                        attach(el, &mut stack, &mut root);
                    }
                }
                Event::Text(t) => {
                    if let Some(top) = stack.last_mut() {
                        match t.unescape() {
                            Ok(s) => top.text.push_str(&s),
                            Err(_) => top.text.push_str(&String::from_utf8_lossy(&t)),
                        }
                    }
                }
                Event::CData(c) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if let Some(open) = stack.last() {
            return Err(FeedParseError::Unclosed(open.qualified_name()));
        }
        let root = root.ok_or(FeedParseError::Empty)?;
        Ok(Self { root, namespaces })
    }

    /// All `<item>` elements, in document order.
    pub fn items(&self) -> Vec<&XmlElement> {
        let mut out = Vec::new();
        if self.root.local_name == "item" {
            out.push(&self.root);
        }
        self.root.descendants_named("item", &mut out);
        out
    }
}

fn attach(el: XmlElement, stack: &mut [XmlElement], root: &mut Option<XmlElement>) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(el),
        None => {
            if root.is_none() {
                *root = Some(el);
            }
        }
    }
}

/// Undeclared prefixes resolve to nothing here; the raw prefix kept on the
/// element is what [`TagCandidate::Namespaced`] falls back to.
fn resolved_uri(resolved: ResolveResult<'_>) -> Option<String> {
    match resolved {
        ResolveResult::Bound(ns) => Some(String::from_utf8_lossy(ns.as_ref()).into_owned()),
        ResolveResult::Unbound | ResolveResult::Unknown(_) => None,
    }
}

fn open_element(
    start: &BytesStart<'_>,
    namespace: Option<String>,
    seen: &mut BTreeMap<String, String>,
) -> XmlElement {
    let name = start.name();
    let prefix = name
        .prefix()
        .map(|p| String::from_utf8_lossy(p.as_ref()).into_owned());
    let local_name = String::from_utf8_lossy(name.local_name().as_ref()).into_owned();

    let mut attributes = Vec::new();
    for attr in start.attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = match attr.unescape_value() {
            Ok(v) => v.into_owned(),
            Err(_) => String::from_utf8_lossy(&attr.value).into_owned(),
        };
        if let Some(p) = key.strip_prefix("xmlns:") {
            seen.entry(p.to_string()).or_insert_with(|| value.clone());
        }
        attributes.push((key, value));
    }

    XmlElement {
        prefix,
        local_name,
        namespace,
        attributes,
        children: Vec::new(),
        text: String::new(),
    }
}

/// HTML entities show up in descriptions and are not valid XML.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&deg;", "°")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}
