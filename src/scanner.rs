//! Single forward pass over the dump recording each page's title and byte span.

use crate::error::{ExtractError, Result};
use crate::index::IndexEntry;
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::bytes::Regex;
use std::io::BufRead;
use std::path::Path;

lazy_static! {
    static ref TITLE_TAG: Regex = Regex::new(r"<title>(.+)</title>").unwrap();
}

const PAGE_OPEN: &[u8] = b"<page>";
const PAGE_CLOSE: &[u8] = b"</page>";

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Counters reported after a scan.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanStats {
    pub bytes_read: u64,
    pub pages: usize,
    pub untitled: usize,
    /// Open marker with no close before end of stream; the page is dropped.
    pub truncated: bool,
}

/// Scan `reader` line by line and return one entry per complete page, in
/// scan order. `total_size` drives the progress percentage handed to
/// `progress` each time it increases.
pub fn scan_dump(
    mut reader: impl BufRead,
    total_size: u64,
    mut progress: impl FnMut(u8),
) -> Result<(Vec<IndexEntry>, ScanStats)> {
    let mut entries = Vec::new();
    let mut stats = ScanStats::default();

    let mut title: Option<String> = None;
    let mut page_start: Option<u64> = None;
    let mut current_pos: u64 = 0;
    let mut last_progress: u8 = 0;
    let mut line = Vec::with_capacity(4096);

    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            break;
        }
        let line_start = current_pos;
        current_pos += n as u64;

        if total_size > 0 {
            let percent = ((current_pos.min(total_size) * 100) / total_size) as u8;
            if percent > last_progress {
                last_progress = percent;
                progress(percent);
            }
        }

        match page_start {
            None => {
                if contains(&line, PAGE_OPEN) {
                    page_start = Some(line_start);
                }
            }
            Some(start) if contains(&line, PAGE_CLOSE) => {
                match title.take() {
                    Some(t) => {
                        entries.push(IndexEntry::new(t, start, current_pos - start));
                        stats.pages += 1;
                    }
                    None => {
                        warn!("Page at byte {} has no title; not indexed", start);
                        stats.untitled += 1;
                    }
                }
                page_start = None;
            }
            Some(_) => {
                if title.is_none() {
                    if let Some(cap) = TITLE_TAG.captures(&line) {
                        title = Some(String::from_utf8_lossy(&cap[1]).into_owned());
                    }
                }
            }
        }
    }

    if let Some(start) = page_start {
        warn!(
            "Dump ends inside a page opened at byte {} ({}); page dropped",
            start,
            title.as_deref().unwrap_or("untitled")
        );
        stats.truncated = true;
    }

    stats.bytes_read = current_pos;
    debug!("Scanned {} bytes, {} pages", stats.bytes_read, stats.pages);
    Ok((entries, stats))
}

/// Refuse dumps whose byte offsets would not be seekable.
pub fn check_indexable(path: &Path) -> Result<()> {
    if path.to_string_lossy().ends_with(".bz2") {
        return Err(ExtractError::CompressedDump(path.display().to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = "<mediawiki>\n  <siteinfo>x</siteinfo>\n  <page>\n    <title>cat</title>\n    <revision><text>==English==</text></revision>\n  </page>\n  <page>\n    <title>Dog</title>\n  </page>\n</mediawiki>\n";

    fn scan(text: &str) -> (Vec<IndexEntry>, ScanStats) {
        scan_dump(text.as_bytes(), text.len() as u64, |_| {}).unwrap()
    }

    #[test]
    fn spans_cover_open_to_close_lines() {
        let (entries, stats) = scan(DUMP);
        assert_eq!(stats.pages, 2);
        for entry in &entries {
            let start = entry.offset as usize;
            let page = &DUMP[start..start + entry.length as usize];
            assert!(page.trim_start().starts_with("<page>"));
            assert!(page.trim_end().ends_with("</page>"));
            assert!(page.ends_with('\n'));
        }
        assert_eq!(entries[0].title, "cat");
        assert_eq!(entries[1].title, "Dog");
    }

    #[test]
    fn first_title_wins() {
        let dump = "<page>\n<title>one</title>\n<title>two</title>\n</page>\n";
        let (entries, _) = scan(dump);
        assert_eq!(entries, vec![IndexEntry::new("one", 0, dump.len() as u64)]);
    }

    #[test]
    fn truncated_tail_is_dropped() {
        let dump = "<page>\n<title>a</title>\n</page>\n<page>\n<title>b</title>\n";
        let (entries, stats) = scan(dump);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "a");
        assert!(stats.truncated);
    }

    #[test]
    fn untitled_page_is_skipped() {
        let dump = "<page>\n<ns>0</ns>\n</page>\n<page>\n<title>x</title>\n</page>\n";
        let (entries, stats) = scan(dump);
        assert_eq!(entries.len(), 1);
        assert_eq!(stats.untitled, 1);
        assert_eq!(entries[0].offset, 26);
    }

    #[test]
    fn last_line_without_newline_is_counted() {
        let dump = "<page>\n<title>z</title>\n</page>";
        let (entries, stats) = scan(dump);
        assert_eq!(entries[0].length, dump.len() as u64);
        assert_eq!(stats.bytes_read, dump.len() as u64);
    }

    #[test]
    fn progress_is_monotonic_and_reaches_100() {
        let mut seen = Vec::new();
        scan_dump(DUMP.as_bytes(), DUMP.len() as u64, |p| seen.push(p)).unwrap();
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(seen.last(), Some(&100));
    }

    #[test]
    fn utf8_titles_are_decoded() {
        let dump = "<page>\n<title>käydä</title>\n</page>\n";
        let (entries, _) = scan(dump);
        assert_eq!(entries[0].title, "käydä");
    }

    #[test]
    fn compressed_dump_is_rejected() {
        assert!(check_indexable(Path::new("enwiktionary.xml.bz2")).is_err());
        assert!(check_indexable(Path::new("enwiktionary.xml")).is_ok());
    }
}
