//! Decoding of a single `<page>` record: its title and revision text.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::borrow::Cow;

lazy_static! {
    static ref TITLE_PATTERN: Regex = Regex::new(r"<title>([^<]+)</title>").unwrap();
    static ref TEXT_PATTERN: Regex = Regex::new(r"(?s)(<text[^>]*>)(.*?)(</text>)").unwrap();
    static ref ENTITY_PATTERN: Regex = Regex::new(r"&(lt|gt|amp|quot|apos|#[0-9]+|#x[0-9a-fA-F]+);").unwrap();
}

/// A page record materialized from the dump.
#[derive(Debug, Clone)]
pub struct Page {
    pub title: String,
    /// Revision text with XML entities decoded. Empty for `<text/>`.
    pub text: String,
    xml: String,
}

impl Page {
    pub fn from_bytes(bytes: &[u8]) -> Option<Page> {
        Page::from_xml(String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn from_xml(xml: String) -> Option<Page> {
        let title = TITLE_PATTERN
            .captures(&xml)
            .map(|cap| unescape_xml(&cap[1]).into_owned())?;
        let text = TEXT_PATTERN
            .captures(&xml)
            .map(|cap| unescape_xml(&cap[2]).into_owned())
            .unwrap_or_default();
        Some(Page { title, text, xml })
    }

    pub fn xml(&self) -> &str {
        &self.xml
    }

    /// The page record with its revision text replaced by `text`.
    pub fn with_text(&self, text: &str) -> String {
        let escaped = escape_xml(text);
        TEXT_PATTERN
            .replace(&self.xml, |cap: &Captures| {
                format!("{}{}{}", &cap[1], escaped, &cap[3])
            })
            .into_owned()
    }
}

/// Decode the five named XML entities and numeric character references.
pub fn unescape_xml(s: &str) -> Cow<'_, str> {
    if !s.contains('&') {
        return Cow::Borrowed(s);
    }
    ENTITY_PATTERN.replace_all(s, |cap: &Captures| {
        let name = &cap[1];
        match name {
            "lt" => "<".to_string(),
            "gt" => ">".to_string(),
            "amp" => "&".to_string(),
            "quot" => "\"".to_string(),
            "apos" => "'".to_string(),
            _ => {
                let code = if let Some(hex) = name.strip_prefix("#x") {
                    u32::from_str_radix(hex, 16).ok()
                } else {
                    name[1..].parse::<u32>().ok()
                };
                code.and_then(char::from_u32)
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| cap[0].to_string())
            }
        }
    })
}

pub fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
