//! Minimal XML reading for the Cisco IMC API.
//! Responses are flat attribute-carrying elements, so start tags are matched
//! with a regular expression rather than a full parser.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

static START_TAG: OnceLock<Regex> = OnceLock::new();
static ATTRIBUTE: OnceLock<Regex> = OnceLock::new();

fn start_tag() -> &'static Regex {
    START_TAG.get_or_init(|| Regex::new(r"<([A-Za-z_][\w:.-]*)((?:\s[^>]*?)?)/?>").expect("static regex"))
}

fn attribute() -> &'static Regex {
    ATTRIBUTE.get_or_init(|| {
        Regex::new(r#"([A-Za-z_][\w:.-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("static regex")
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// Every start (or self-closing) tag named `name`, in document order.
pub fn elements(doc: &str, name: &str) -> Vec<Element> {
    start_tag()
        .captures_iter(doc)
        .filter(|caps| &caps[1] == name)
        .map(|caps| Element {
            name: caps[1].to_string(),
            attributes: caps
                .get(2)
                .map(|m| parse_attributes(m.as_str()))
                .unwrap_or_default(),
        })
        .collect()
}

/// First element named `name`.
pub fn element(doc: &str, name: &str) -> Option<Element> {
    elements(doc, name).into_iter().next()
}

fn parse_attributes(raw: &str) -> BTreeMap<String, String> {
    attribute()
        .captures_iter(raw)
        .map(|caps| {
            let value = caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str()).unwrap_or("");
            (caps[1].to_string(), unescape(value))
        })
        .collect()
}

pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
