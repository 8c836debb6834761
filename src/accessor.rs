//! Random access to page records through the index: seek and exact-length
//! reads, never a sequential scan.

use crate::error::{ExtractError, Result};
use crate::index::{DumpIndex, IndexEntry};
use regex::Regex;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use unicode_normalization::UnicodeNormalization;

/// Which index entries a request selects.
#[derive(Debug, Clone)]
pub enum TitleFilter {
    /// Every entry; language filtering happens after splitting.
    All,
    /// Title equal to the given one after NFC normalization.
    Exact(String),
    /// Regular expression anchored at the start of the title.
    Pattern(Regex),
}

impl TitleFilter {
    pub fn exact(title: &str) -> Self {
        TitleFilter::Exact(title.nfc().collect())
    }

    /// Compile `pattern` so that it must match from the first character.
    pub fn pattern(pattern: &str) -> Result<Self> {
        Ok(TitleFilter::Pattern(Regex::new(&format!("^(?:{})", pattern))?))
    }

    pub fn matches(&self, title: &str) -> bool {
        match self {
            TitleFilter::All => true,
            TitleFilter::Exact(wanted) => title.nfc().eq(wanted.chars()),
            TitleFilter::Pattern(re) => re.is_match(title),
        }
    }
}

/// A read handle onto the dump. One handle must not serve concurrent
/// requests; open one store per thread instead.
pub struct SectionStore<R> {
    inner: R,
    file_len: u64,
}

impl SectionStore<File> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        Ok(SectionStore {
            inner: file,
            file_len,
        })
    }
}

impl<R: Read + Seek> SectionStore<R> {
    pub fn new(mut inner: R) -> Result<Self> {
        let file_len = inner.seek(SeekFrom::End(0))?;
        Ok(SectionStore { inner, file_len })
    }

    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    /// Read exactly the bytes recorded for `entry`.
    pub fn read_entry(&mut self, entry: &IndexEntry) -> Result<Vec<u8>> {
        let end = entry.offset.checked_add(entry.length);
        if end.map_or(true, |end| end > self.file_len) {
            return Err(ExtractError::IndexMismatch {
                title: entry.title.clone(),
                offset: entry.offset,
                length: entry.length,
                file_len: self.file_len,
            });
        }
        self.inner.seek(SeekFrom::Start(entry.offset))?;
        let mut buf = vec![0u8; entry.length as usize];
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Iterate over the selected entries of `index`, reading each one.
    /// A failed read is yielded as an error and does not stop the iteration.
    pub fn select<'a>(
        &'a mut self,
        index: &'a DumpIndex,
        filter: &'a TitleFilter,
    ) -> impl Iterator<Item = (&'a IndexEntry, Result<Vec<u8>>)> + 'a {
        index
            .iter()
            .filter(move |entry| filter.matches(&entry.title))
            .map(move |entry| (entry, self.read_entry(entry)))
    }
}
