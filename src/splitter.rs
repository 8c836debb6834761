//! Carves a page's wikitext into per-language sections.
//!
//! A language section runs from its level-2 heading (`==Finnish==`) to the
//! next level-2 heading or to a `----` rule, whichever comes first.

use crate::error::ExtractError;
use lazy_static::lazy_static;
use regex::Regex;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::{HashMap, HashSet};

lazy_static! {
    static ref LANGUAGE_HEADER: Regex = Regex::new(r"^==\s*([^=]+?)\s*==\s*$").unwrap();
    static ref SECTION_RULE: Regex = Regex::new(r"^----+\s*$").unwrap();
}

/// Language name → section text, in order of first appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LanguageSections {
    sections: Vec<(String, String)>,
}

impl LanguageSections {
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn get(&self, language: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|(name, _)| name == language)
            .map(|(_, text)| text.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.sections.iter().map(|(n, t)| (n.as_str(), t.as_str()))
    }

    /// All kept sections in first-appearance order, one blank line apart.
    pub fn joined(&self) -> String {
        self.sections
            .iter()
            .map(|(_, text)| text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn section_mut(&mut self, language: &str) -> &mut String {
        let pos = match self.sections.iter().position(|(name, _)| name == language) {
            Some(pos) => pos,
            None => {
                self.sections.push((language.to_string(), String::new()));
                self.sections.len() - 1
            }
        };
        &mut self.sections[pos].1
    }
}

impl Serialize for LanguageSections {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.sections.len()))?;
        for (name, text) in &self.sections {
            map.serialize_entry(name, text)?;
        }
        map.end()
    }
}

/// Split `wikitext` into the sections of the languages in `allowed`.
///
/// Heading lines themselves are not part of a section. A language that is
/// re-opened later on the page has its text appended.
pub fn split_languages(wikitext: &str, allowed: &HashSet<String>) -> LanguageSections {
    split_with_headings(wikitext, allowed, false)
}

/// Like [`split_languages`], but each section starts with its heading line
/// (once, at first appearance), ready to be re-emitted as wikitext.
pub fn split_languages_with_headings(
    wikitext: &str,
    allowed: &HashSet<String>,
) -> LanguageSections {
    split_with_headings(wikitext, allowed, true)
}

fn split_with_headings(
    wikitext: &str,
    allowed: &HashSet<String>,
    keep_headings: bool,
) -> LanguageSections {
    let mut sections = LanguageSections::default();
    let mut current: Option<&str> = None;

    for line in wikitext.lines() {
        if let Some(cap) = LANGUAGE_HEADER.captures(line) {
            let name = cap.get(1).map_or("", |m| m.as_str());
            current = allowed.get(name).map(|s| s.as_str());
            if let Some(lang) = current {
                if keep_headings && sections.get(lang).is_none() {
                    let text = sections.section_mut(lang);
                    text.push_str(line);
                    text.push('\n');
                }
            }
        } else if SECTION_RULE.is_match(line) {
            current = None;
        } else if let Some(lang) = current {
            let text = sections.section_mut(lang);
            text.push_str(line);
            text.push('\n');
        }
    }

    sections
}

/// Parse one `title\t{"Language": "text", ...}` line as written by `by-lang`.
pub fn parse_sections_line(
    line: &str,
    line_no: usize,
) -> crate::error::Result<(String, HashMap<String, String>)> {
    let (title, json) = line.split_once('\t').ok_or_else(|| ExtractError::SectionsParse {
        line: line_no,
        reason: "missing tab separator".to_string(),
    })?;
    let sections = serde_json::from_str(json).map_err(|e| ExtractError::SectionsParse {
        line: line_no,
        reason: e.to_string(),
    })?;
    Ok((title.to_string(), sections))
}
