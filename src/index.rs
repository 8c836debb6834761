//! The persisted page index: one `title\toffset:length` line per page,
//! sorted case-insensitively by title.

use crate::error::{ExtractError, Result};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Byte span of one page record in the dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub title: String,
    pub offset: u64,
    pub length: u64,
}

impl IndexEntry {
    pub fn new(title: impl Into<String>, offset: u64, length: u64) -> Self {
        IndexEntry {
            title: title.into(),
            offset,
            length,
        }
    }

    /// Parse one index line: split on the first tab, then the remainder on ":".
    pub fn parse_line(line: &str, line_no: usize) -> Result<Self> {
        let line = line.trim_end_matches(&['\n', '\r'][..]);
        let (title, span) = line.split_once('\t').ok_or_else(|| ExtractError::IndexParse {
            line: line_no,
            reason: "missing tab separator".to_string(),
        })?;
        let (offset, length) = span.split_once(':').ok_or_else(|| ExtractError::IndexParse {
            line: line_no,
            reason: format!("span {:?} is not offset:length", span),
        })?;
        let parse = |field: &str, what: &str| {
            field.trim().parse::<u64>().map_err(|e| ExtractError::IndexParse {
                line: line_no,
                reason: format!("bad {} {:?}: {}", what, field, e),
            })
        };
        Ok(IndexEntry {
            title: title.to_string(),
            offset: parse(offset, "offset")?,
            length: parse(length, "length")?,
        })
    }
}

impl fmt::Display for IndexEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}:{}", self.title, self.offset, self.length)
    }
}

/// Ordered sequence of index entries. Rebuilt wholesale, never patched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DumpIndex {
    entries: Vec<IndexEntry>,
}

impl DumpIndex {
    /// Build an index from entries in scan order, sorting them by lowercased
    /// title. The sort is stable, so duplicate titles keep their scan order.
    pub fn from_scan(mut entries: Vec<IndexEntry>) -> Self {
        entries.sort_by_cached_key(|e| e.title.to_lowercase());
        DumpIndex { entries }
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, IndexEntry> {
        self.entries.iter()
    }

    pub fn into_entries(self) -> Vec<IndexEntry> {
        self.entries
    }

    /// Read an index in the persisted format. Entries are kept in file order.
    pub fn read_from(reader: impl BufRead) -> Result<Self> {
        let mut entries = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(IndexEntry::parse_line(&line, i + 1)?);
        }
        Ok(DumpIndex { entries })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Self::read_from(BufReader::with_capacity(256 * 1024, file))
    }

    pub fn write_to(&self, mut writer: impl Write) -> Result<()> {
        for entry in &self.entries {
            writeln!(writer, "{}", entry)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Persist to `path` through a temporary sibling that is renamed into
    /// place once fully written, so a failed write never leaves a partial index.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".partial");
        let tmp_path = std::path::PathBuf::from(tmp_name);

        let result = File::create(&tmp_path)
            .map_err(ExtractError::from)
            .and_then(|file| self.write_to(BufWriter::with_capacity(256 * 1024, file)));
        if let Err(e) = result {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

impl<'a> IntoIterator for &'a DumpIndex {
    type Item = &'a IndexEntry;
    type IntoIter = std::slice::Iter<'a, IndexEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
