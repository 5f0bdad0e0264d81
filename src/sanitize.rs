//! Turns raw work markup into a well-formed XHTML fragment.
//!
//! The steps run in a fixed order: ruby collapse, gaiji removal, illegal
//! code point strip, then a parse/re-serialize pass that repairs the markup
//! and clears presentational attributes from `p` and `div`. The ruby and
//! gaiji rules are applied again on the parsed tree, so markup the patterns
//! only recognise once it is re-serialized is handled in the same pass.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use scraper::{ElementRef, Html, Node};
use tracing::debug;

/// A best-effort result together with everything that had to be repaired
/// or dropped to produce it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovered<T> {
    pub value: T,
    pub diagnostics: Vec<String>,
}

impl<T> Recovered<T> {
    pub fn clean(value: T) -> Self {
        Self {
            value,
            diagnostics: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Recovered<U> {
        Recovered {
            value: f(self.value),
            diagnostics: self.diagnostics,
        }
    }
}

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

// Raw-text elements are dropped as well: their content is never unescaped by
// the parser, so it could not survive another pass unchanged.
const DROPPED_ELEMENTS: &[&str] = &[
    "script", "style", "template", "xmp", "noembed", "noframes", "iframe", "noscript",
    "plaintext",
];

// The parser swallows one newline right after these start tags.
const LEADING_NEWLINE_ELEMENTS: &[&str] = &["pre", "textarea", "listing"];

const BARE_ELEMENTS: &[&str] = &["p", "div"];

fn ruby_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"<ruby><rb>([^<]+)</rb><rp>\(</rp><rt>[^<]+</rt><rp>\)</rp></ruby>")
            .expect("ruby pattern is valid")
    })
}

fn gaiji_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"<img\s(?:[^>]*\s)?class="gaiji"[^>]*>"#)
            .expect("gaiji pattern is valid")
    })
}

/// Sanitize a raw markup fragment. Never fails; anything that cannot be
/// represented is stripped and reported in the diagnostics.
pub fn sanitize(raw: &str) -> Recovered<String> {
    let collapsed = collapse_ruby(raw);
    let without_gaiji = remove_gaiji(&collapsed);
    let legal = strip_invalid_xml_chars(&without_gaiji);
    let recovered = normalize(&legal);
    if !recovered.is_clean() {
        debug!(
            "Sanitizer repaired {} issue(s) in the source markup",
            recovered.diagnostics.len()
        );
    }
    recovered
}

/// Replace the exact `<ruby><rb>BASE</rb><rp>(</rp><rt>READING</rt><rp>)</rp></ruby>`
/// shape with `BASE`.
pub fn collapse_ruby(content: &str) -> String {
    ruby_pattern().replace_all(content, "$1").into_owned()
}

/// Delete `<img ... class="gaiji" />` glyph substitutes, whether written
/// self-closing or (as the HTML serializer emits them) as a bare start tag.
pub fn remove_gaiji(content: &str) -> String {
    gaiji_pattern().replace_all(content, "").into_owned()
}

pub fn is_xml_char(c: char) -> bool {
    matches!(c, '\t' | '\n' | '\r' | '\u{20}'..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}')
}

/// Remove every code point outside tab, LF, CR, U+0020–U+D7FF and U+E000–U+FFFD.
pub fn strip_invalid_xml_chars(content: &str) -> String {
    content.chars().filter(|&c| is_xml_char(c)).collect()
}

/// Owned copy of the parsed fragment, built fresh instead of mutating the
/// parser's tree.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Fragment {
    Element {
        name: String,
        attrs: Vec<(String, String)>,
        children: Vec<Fragment>,
    },
    Text(String),
}

/// Parse `content` as an HTML fragment and serialize it back as XHTML.
pub fn normalize(content: &str) -> Recovered<String> {
    let html = Html::parse_fragment(content);
    let mut diagnostics: Vec<String> = html
        .errors
        .iter()
        .map(|e| format!("parse: {}", e))
        .collect();

    let root = html.root_element();
    let nodes = copy_children(root, &mut diagnostics);

    let mut out = String::with_capacity(content.len());
    for node in &nodes {
        write_fragment(&mut out, node);
    }

    Recovered {
        value: out,
        diagnostics,
    }
}

fn copy_children(element: ElementRef<'_>, diagnostics: &mut Vec<String>) -> Vec<Fragment> {
    let mut nodes = Vec::new();
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                let text = strip_invalid_xml_chars(text);
                if !text.is_empty() {
                    push_node(&mut nodes, Fragment::Text(text));
                }
            }
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    for node in copy_element(child, diagnostics) {
                        push_node(&mut nodes, node);
                    }
                }
            }
            Node::Comment(_) => diagnostics.push("dropped comment".to_string()),
            Node::Doctype(_) => diagnostics.push("dropped doctype".to_string()),
            Node::ProcessingInstruction(_) => {
                diagnostics.push("dropped processing instruction".to_string())
            }
            _ => {}
        }
    }
    nodes
}

/// Adjacent text nodes are merged so the tree is stable across passes.
fn push_node(nodes: &mut Vec<Fragment>, node: Fragment) {
    if let Fragment::Text(text) = &node {
        if let Some(Fragment::Text(previous)) = nodes.last_mut() {
            previous.push_str(text);
            return;
        }
    }
    nodes.push(node);
}

fn copy_element(element: ElementRef<'_>, diagnostics: &mut Vec<String>) -> Vec<Fragment> {
    let value = element.value();
    let name = value.name();

    if DROPPED_ELEMENTS.contains(&name) {
        diagnostics.push(format!("dropped <{}> element", name));
        return Vec::new();
    }

    let children = copy_children(element, diagnostics);

    if !is_xml_name(name) {
        diagnostics.push(format!("unwrapped element with invalid name \"{}\"", name));
        return children;
    }

    let mut attrs = Vec::new();
    if !BARE_ELEMENTS.contains(&name) {
        let mut seen = HashSet::new();
        for (attr, attr_value) in value.attrs() {
            if !is_xml_name(attr) {
                diagnostics.push(format!("dropped attribute with invalid name \"{}\"", attr));
                continue;
            }
            if !seen.insert(attr) {
                diagnostics.push(format!("dropped duplicate attribute \"{}\" on <{}>", attr, name));
                continue;
            }
            attrs.push((attr.to_string(), strip_invalid_xml_chars(attr_value)));
        }
        attrs.sort();
    }

    if name == "img" && attrs.iter().any(|(attr, value)| attr == "class" && value == "gaiji") {
        return Vec::new();
    }
    if name == "ruby" && attrs.is_empty() {
        if let Some(base) = ruby_base(&children) {
            return vec![Fragment::Text(base.to_string())];
        }
    }

    vec![Fragment::Element {
        name: name.to_string(),
        attrs,
        children,
    }]
}

/// Base text of an attribute-free `rb`, `rp "("`, `rt`, `rp ")"` sequence, the
/// tree form of what [`collapse_ruby`] matches.
fn ruby_base(children: &[Fragment]) -> Option<&str> {
    let [rb, open, rt, close] = children else {
        return None;
    };
    let base = only_text(rb, "rb")?;
    only_text(rt, "rt")?;
    (only_text(open, "rp")? == "(" && only_text(close, "rp")? == ")").then_some(base)
}

fn only_text<'a>(node: &'a Fragment, tag: &str) -> Option<&'a str> {
    match node {
        Fragment::Element {
            name,
            attrs,
            children,
        } if name == tag && attrs.is_empty() => match children.as_slice() {
            [Fragment::Text(text)] => Some(text),
            _ => None,
        },
        _ => None,
    }
}

/// Conservative XML name check; colons are rejected because the fragment
/// declares no prefixes.
fn is_xml_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn write_fragment(out: &mut String, node: &Fragment) {
    match node {
        Fragment::Text(text) => escape_into(out, text, false),
        Fragment::Element {
            name,
            attrs,
            children,
        } => {
            out.push('<');
            out.push_str(name);
            for (attr, value) in attrs {
                out.push(' ');
                out.push_str(attr);
                out.push_str("=\"");
                escape_into(out, value, true);
                out.push('"');
            }
            if VOID_ELEMENTS.contains(&name.as_str()) {
                out.push_str(" />");
                return;
            }
            out.push('>');
            if LEADING_NEWLINE_ELEMENTS.contains(&name.as_str()) {
                if let Some(Fragment::Text(text)) = children.first() {
                    if text.starts_with('\n') {
                        out.push('\n');
                    }
                }
            }
            for child in children {
                write_fragment(out, child);
            }
            out.push_str("</");
            out.push_str(name);
            out.push('>');
        }
    }
}

fn escape_into(out: &mut String, text: &str, attribute: bool) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            // A literal CR would come back as LF.
            '\r' => out.push_str("&#13;"),
            _ => out.push(c),
        }
    }
}

/// Escape text for direct interpolation into an XML template.
pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    escape_into(&mut out, &strip_invalid_xml_chars(text), true);
    out
}
