//! Template expansion: rewrite innermost `{{...}}` invocations into plain
//! text until a full pass changes nothing.

pub mod handlers;
pub mod inflection;
pub mod invocation;
pub mod types;

use crate::config::EngineConfig;
use crate::error::{ExtractError, HandlerFailure, Result};
use inflection::{call_provider, derive_stem, render_forms, InflectionProvider, NoInflection};
use invocation::{TemplateInvocation, FIELD_SEPARATOR};
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::{Captures, Regex};
use std::collections::BTreeSet;
use std::sync::Arc;
use types::{HandlerKind, TemplateTypeTable};

lazy_static! {
    static ref COMMENT_PATTERN: Regex = Regex::new(r"(?s)<!--.*?-->").unwrap();
    static ref WIKILINK_PATTERN: Regex = Regex::new(r"\[\[([^\[\]]*)\]\]").unwrap();
    static ref TEMPLATE_PATTERN: Regex = Regex::new(r"\{\{([^{}]+)\}\}").unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Preprocessing
// ─────────────────────────────────────────────────────────────────────────────

/// Parsed wikilink: [[target#anchor|display]]. The anchor is dropped.
#[derive(Debug)]
struct Wikilink<'a> {
    target: &'a str,
    display: Option<&'a str>,
}

impl<'a> Wikilink<'a> {
    fn parse(inner: &'a str) -> Self {
        let (link, display) = match inner.split_once('|') {
            Some((link, display)) => (link, Some(display)),
            None => (inner, None),
        };
        let target = link.split_once('#').map_or(link, |(target, _)| target);
        Wikilink { target, display }
    }

    /// Return display text if present, otherwise target
    fn text(&self) -> &'a str {
        self.display.unwrap_or(self.target)
    }
}

pub fn strip_comments(text: &str) -> String {
    COMMENT_PATTERN.replace_all(text, "").into_owned()
}

/// Replace every `[[...]]` link by its display text, innermost first,
/// until none are left.
pub fn collapse_links(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let next = WIKILINK_PATTERN
            .replace_all(&current, |cap: &Captures| {
                Wikilink::parse(cap.get(1).map_or("", |m| m.as_str())).text().to_string()
            })
            .into_owned();
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Distinct innermost template invocations in `text`, truncated to their
/// first `level + 1` fields. Used to find names missing from a type table.
pub fn template_signatures(text: &str, level: usize) -> BTreeSet<Vec<String>> {
    let text = strip_comments(text);
    TEMPLATE_PATTERN
        .captures_iter(&text)
        .map(|cap| {
            FIELD_SEPARATOR
                .split(&cap[1])
                .take(level + 1)
                .map(str::to_string)
                .collect()
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// Expanded text plus what could not be rendered along the way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expansion {
    pub text: String,
    /// Names with no table entry; their fields were passed through.
    pub unresolved: BTreeSet<String>,
    /// Handler calls that rendered as the empty string.
    pub failures: Vec<HandlerFailure>,
    pub passes: usize,
}

impl Expansion {
    fn unresolved(&mut self, name: &str) {
        if self.unresolved.insert(name.to_string()) {
            debug!("Unresolved template {:?}", name);
        }
    }

    fn degrade(&mut self, failure: HandlerFailure) -> String {
        warn!("Rendering nothing for {}", failure);
        self.failures.push(failure);
        String::new()
    }
}

/// Stateless per call; shareable across threads once built.
pub struct TemplateEngine {
    table: TemplateTypeTable,
    config: EngineConfig,
    provider: Arc<dyn InflectionProvider>,
}

impl TemplateEngine {
    pub fn new(table: TemplateTypeTable, config: EngineConfig) -> Self {
        TemplateEngine {
            table,
            config,
            provider: Arc::new(NoInflection),
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn InflectionProvider>) -> Self {
        self.provider = provider;
        self
    }

    pub fn table(&self) -> &TemplateTypeTable {
        &self.table
    }

    /// Strip comments, collapse links, then rewrite templates to a fixed
    /// point. Fails when `max_iterations` passes all changed the text.
    pub fn expand(&self, raw: &str) -> Result<Expansion> {
        let mut expansion = Expansion::default();
        let mut text = collapse_links(&strip_comments(raw));

        for pass in 1..=self.config.max_iterations {
            let next = TEMPLATE_PATTERN
                .replace_all(&text, |cap: &Captures| self.render(&cap[1], &mut expansion))
                .into_owned();
            if next == text {
                expansion.passes = pass;
                expansion.text = text;
                return Ok(expansion);
            }
            text = next;
        }

        Err(ExtractError::NonTerminatingExpansion {
            iterations: self.config.max_iterations,
        })
    }

    fn render(&self, body: &str, expansion: &mut Expansion) -> String {
        let invocation = TemplateInvocation::parse(body, &self.config.ignore_fields);
        self.dispatch(&invocation, expansion, 0)
    }

    fn dispatch(
        &self,
        inv: &TemplateInvocation,
        expansion: &mut Expansion,
        depth: usize,
    ) -> String {
        let kind = match self.table.get(&inv.name) {
            Some(kind) => kind,
            None => {
                expansion.unresolved(&inv.name);
                return inv.passthrough();
            }
        };

        let argument_failure = |reason: String| HandlerFailure::Argument {
            template: inv.name.clone(),
            reason,
        };

        match kind {
            HandlerKind::Literal { start, prepend, append } => {
                handlers::literal(inv, *start, prepend.as_deref(), append.as_deref())
            }
            HandlerKind::Borrowed => handlers::borrowed(inv, "")
                .unwrap_or_else(|reason| expansion.degrade(argument_failure(reason))),
            HandlerKind::Calque => handlers::calque(inv)
                .unwrap_or_else(|reason| expansion.degrade(argument_failure(reason))),
            HandlerKind::Hyphenation => handlers::hyphenation(inv),
            HandlerKind::Parenthetical => handlers::parenthetical(inv),
            HandlerKind::Replacement(text) => text.clone(),
            HandlerKind::Alias(target) => {
                // cycles are rejected when the table is loaded
                if depth > self.table.len() {
                    return expansion.degrade(argument_failure(format!(
                        "alias chain through {:?} too deep",
                        target
                    )));
                }
                self.dispatch(&inv.renamed(target), expansion, depth + 1)
            }
            HandlerKind::Inflection(_) => self.inflect(inv, expansion),
            HandlerKind::Ignore => String::new(),
        }
    }

    fn inflect(&self, inv: &TemplateInvocation, expansion: &mut Expansion) -> String {
        let stem = match derive_stem(&inv.name) {
            Ok(stem) => stem,
            Err(reason) => {
                return expansion.degrade(HandlerFailure::Argument {
                    template: inv.name.clone(),
                    reason,
                })
            }
        };
        let stem = self
            .config
            .stem_overrides
            .get(stem)
            .map(String::as_str)
            .unwrap_or(stem);

        match call_provider(&self.provider, stem, &inv.positional, self.config.provider_timeout) {
            Ok(forms) => render_forms(&forms),
            Err(error) => expansion.degrade(HandlerFailure::Provider {
                template: inv.name.clone(),
                error,
            }),
        }
    }
}
