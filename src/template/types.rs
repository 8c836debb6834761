//! The template-type table: which handler renders which template name.
//!
//! Definitions are line-oriented, `name|type|arg1|arg2...`:
//!
//! ```text
//! lit|literal|1
//! bor|aka|borrowed
//! borrowed|borrowed
//! R:SSA|r|Suomen sanojen alkuperä
//! ```

use crate::error::{ExtractError, Result};
use log::warn;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InflectionKind {
    Conjugation,
    Declension,
}

/// One handler kind per variant, each carrying its own typed arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerKind {
    /// Positional args from `start`, then `key=value` pairs, joined by ", ".
    Literal {
        start: usize,
        prepend: Option<String>,
        append: Option<String>,
    },
    Borrowed,
    /// As [`HandlerKind::Borrowed`], prefixed with "calque of ".
    Calque,
    Hyphenation,
    Parenthetical,
    /// Fixed text regardless of arguments.
    Replacement(String),
    /// Re-dispatch under another template name.
    Alias(String),
    Inflection(InflectionKind),
    /// Renders nothing.
    Ignore,
}

impl HandlerKind {
    /// Build a handler from its type tag and the record's extra arguments.
    fn from_record(tag: &str, args: &[&str]) -> std::result::Result<Self, String> {
        let required = |what: &str| {
            args.first()
                .map(|s| s.to_string())
                .ok_or_else(|| format!("type {:?} needs {}", tag, what))
        };
        let optional = |i: usize| {
            args.get(i)
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
        };

        let kind = match tag {
            "lit" | "literal" => {
                let start = match args.first() {
                    Some(s) if !s.is_empty() => s
                        .trim()
                        .parse::<usize>()
                        .map_err(|_| format!("literal start index {:?} is not a number", s))?,
                    _ => 0,
                };
                HandlerKind::Literal {
                    start,
                    prepend: optional(1),
                    append: optional(2),
                }
            }
            "borrowed" => HandlerKind::Borrowed,
            "calque" => HandlerKind::Calque,
            "hyphenation" => HandlerKind::Hyphenation,
            "paren" | "parenthetical" => HandlerKind::Parenthetical,
            "r" | "replace" => HandlerKind::Replacement(required("a replacement text")?),
            "aka" | "alias" => HandlerKind::Alias(required("a target template name")?),
            "conj" | "conjugation" => HandlerKind::Inflection(InflectionKind::Conjugation),
            "decl" | "declension" => HandlerKind::Inflection(InflectionKind::Declension),
            "i" | "ignore" => HandlerKind::Ignore,
            other => return Err(format!("unknown handler type {:?}", other)),
        };
        Ok(kind)
    }
}

/// Template name → handler. Loaded once and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct TemplateTypeTable {
    handlers: HashMap<String, HandlerKind>,
}

impl TemplateTypeTable {
    pub fn get(&self, name: &str) -> Option<&HandlerKind> {
        self.handlers.get(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn insert(&mut self, name: impl Into<String>, kind: HandlerKind) {
        self.handlers.insert(name.into(), kind);
    }

    /// Parse definitions. Blank lines and `#` comments are skipped; a later
    /// record for the same name replaces the earlier one.
    pub fn read_from(reader: impl BufRead) -> Result<Self> {
        let mut table = TemplateTypeTable::default();
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split('|').collect();
            if fields.len() < 2 || fields[0].is_empty() {
                return Err(ExtractError::TypeTable {
                    line: i + 1,
                    reason: format!("expected name|type, got {:?}", line),
                });
            }
            let kind = HandlerKind::from_record(fields[1], &fields[2..])
                .map_err(|reason| ExtractError::TypeTable { line: i + 1, reason })?;
            table.insert(fields[0], kind);
        }
        table.validate_aliases()?;
        Ok(table)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Self::read_from(BufReader::new(file))
    }

    /// Reject alias chains that loop; warn about aliases to undefined names.
    pub fn validate_aliases(&self) -> Result<()> {
        for start in self.handlers.keys() {
            let mut seen = HashSet::new();
            let mut name = start.as_str();
            seen.insert(name);
            while let Some(HandlerKind::Alias(target)) = self.handlers.get(name) {
                if !seen.insert(target.as_str()) {
                    return Err(ExtractError::AliasCycle(start.clone()));
                }
                if !self.handlers.contains_key(target) {
                    warn!("Template {:?} is an alias of undefined {:?}", name, target);
                }
                name = target.as_str();
            }
        }
        Ok(())
    }
}
