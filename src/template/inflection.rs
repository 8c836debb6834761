//! Boundary to the external inflection provider, which maps a stem and
//! template arguments to grammatical form → surface forms.

use crate::error::{ProviderError, Result};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::BufReader;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Form label → surface forms. A missing label means the form does not exist.
pub type InflectionResult = BTreeMap<String, Vec<String>>;

pub trait InflectionProvider: Send + Sync {
    fn inflect(&self, stem: &str, args: &[String]) -> std::result::Result<InflectionResult, ProviderError>;

    /// Whether calls may block long enough to need the engine's timeout.
    fn is_blocking(&self) -> bool {
        true
    }
}

/// Used when no provider is configured; every call fails.
#[derive(Debug, Default)]
pub struct NoInflection;

impl InflectionProvider for NoInflection {
    fn inflect(&self, _stem: &str, _args: &[String]) -> std::result::Result<InflectionResult, ProviderError> {
        Err(ProviderError::Unavailable)
    }

    fn is_blocking(&self) -> bool {
        false
    }
}

/// Precomputed tables keyed by stem, loaded from JSON:
/// `{"sanoa": {"1sg present": ["sanon"], ...}, ...}`.
#[derive(Debug, Default)]
pub struct TableInflection {
    tables: HashMap<String, InflectionResult>,
}

impl TableInflection {
    pub fn new(tables: HashMap<String, InflectionResult>) -> Self {
        TableInflection { tables }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let tables = serde_json::from_reader(BufReader::new(file))?;
        Ok(TableInflection { tables })
    }
}

impl InflectionProvider for TableInflection {
    fn inflect(&self, stem: &str, _args: &[String]) -> std::result::Result<InflectionResult, ProviderError> {
        self.tables
            .get(stem)
            .cloned()
            .ok_or_else(|| ProviderError::NoEntry(stem.to_string()))
    }

    fn is_blocking(&self) -> bool {
        false
    }
}

/// Stem encoded in an inflection template name: the last segment of a name
/// with exactly three hyphen-separated parts (`fi-conj-sanoa` → `sanoa`).
pub fn derive_stem(name: &str) -> std::result::Result<&str, String> {
    let parts: Vec<&str> = name.split('-').collect();
    match parts.as_slice() {
        [_, _, stem] if !stem.is_empty() => Ok(*stem),
        _ => Err(format!(
            "expected a name with three hyphen-separated parts, got {} part(s)",
            parts.len()
        )),
    }
}

/// Call `provider`, giving up after `timeout` when one is set and the
/// provider may block. A timed-out call is left to finish on its own thread.
/// A panicking provider is reported as [`ProviderError::Failed`] on both paths.
pub fn call_provider(
    provider: &Arc<dyn InflectionProvider>,
    stem: &str,
    args: &[String],
    timeout: Option<Duration>,
) -> std::result::Result<InflectionResult, ProviderError> {
    let timeout = match timeout {
        Some(t) if provider.is_blocking() => t,
        _ => {
            return panic::catch_unwind(AssertUnwindSafe(|| provider.inflect(stem, args)))
                .unwrap_or_else(|_| Err(provider_panicked()))
        }
    };

    let (tx, rx) = mpsc::channel();
    let worker = Arc::clone(provider);
    let stem_owned = stem.to_string();
    let args_owned = args.to_vec();
    thread::spawn(move || {
        let _ = tx.send(worker.inflect(&stem_owned, &args_owned));
    });

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(ProviderError::TimedOut(timeout)),
        Err(RecvTimeoutError::Disconnected) => Err(provider_panicked()),
    }
}

fn provider_panicked() -> ProviderError {
    ProviderError::Failed("provider panicked".to_string())
}

/// One `label: form, form` line per label, sorted by label.
pub fn render_forms(result: &InflectionResult) -> String {
    result
        .iter()
        .map(|(label, forms)| format!("{}: {}", label, forms.join(", ")))
        .collect::<Vec<_>>()
        .join("\n")
}
