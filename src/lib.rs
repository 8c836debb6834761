//! Indexing and template expansion for Wiktionary XML dumps.
//!
//! The pipeline runs in four stages:
//!
//! 1. [`scanner`] makes one forward pass over a dump and records each page's
//!    title and byte span, which [`index`] sorts and persists.
//! 2. [`accessor`] reads page records back through the index by seeking.
//! 3. [`splitter`] carves a page's wikitext into per-language sections.
//! 4. [`template`] rewrites `{{...}}` invocations into plain text until
//!    nothing changes, with [`parallel`] driving it over many pages.

pub mod accessor;
pub mod config;
pub mod error;
pub mod index;
pub mod page;
pub mod parallel;
pub mod scanner;
pub mod splitter;
pub mod template;

pub use accessor::{SectionStore, TitleFilter};
pub use config::EngineConfig;
pub use error::{ExtractError, HandlerFailure, ProviderError, Result};
pub use index::{DumpIndex, IndexEntry};
pub use page::Page;
pub use parallel::{ExpandStats, ParallelConfig, SourcePage};
pub use scanner::{scan_dump, ScanStats};
pub use splitter::{split_languages, split_languages_with_headings, LanguageSections};
pub use template::inflection::{InflectionProvider, NoInflection, TableInflection};
pub use template::types::TemplateTypeTable;
pub use template::{Expansion, TemplateEngine};
