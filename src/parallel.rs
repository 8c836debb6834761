//! Sequential and multi-threaded page expansion.
//!
//! The threaded pipeline has a reader thread feeding pages into a bounded
//! channel, worker threads sharing one engine, and the calling thread
//! writing results back in input order.

use crate::error::Result;
use crate::index::IndexEntry;
use crate::page::Page;
use crate::splitter::{parse_sections_line, split_languages};
use crate::template::{Expansion, TemplateEngine};
use indicatif::ProgressBar;
use log::{debug, warn};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::{BufWriter, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const PAGE_SEPARATOR: &str =
    "---------------------------------------------------------------------------";

/// Configuration for parallel processing
#[derive(Debug, Clone)]
pub struct ParallelConfig {
    /// Number of worker threads
    pub num_workers: usize,
    /// Bound of the page and result channels
    pub channel_buffer: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        let cpus = thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(4);
        Self {
            num_workers: cpus.saturating_sub(1).max(1),
            channel_buffer: 1000,
        }
    }
}

/// One page's language text as handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourcePage {
    Section { title: String, text: String },
    /// The page has no section for the requested language.
    Missing { title: String },
    /// The page could not be read or decoded.
    Unreadable { title: String, error: String },
}

impl SourcePage {
    /// Decode a record read through the index and keep `language`'s section.
    pub fn from_record(entry: &IndexEntry, record: Result<Vec<u8>>, language: &str) -> Self {
        let bytes = match record {
            Ok(bytes) => bytes,
            Err(e) => {
                return SourcePage::Unreadable {
                    title: entry.title.clone(),
                    error: e.to_string(),
                }
            }
        };
        let page = match Page::from_bytes(&bytes) {
            Some(page) => page,
            None => {
                return SourcePage::Unreadable {
                    title: entry.title.clone(),
                    error: "record has no title".to_string(),
                }
            }
        };
        let allowed = HashSet::from([language.to_string()]);
        let sections = split_languages(&page.text, &allowed);
        match sections.get(language) {
            Some(text) => SourcePage::Section {
                title: page.title,
                text: text.to_string(),
            },
            None => SourcePage::Missing { title: page.title },
        }
    }

    /// Take `language`'s text from a `title\t{json}` sections line.
    pub fn from_sections_line(line: &str, line_no: usize, language: &str) -> Self {
        match parse_sections_line(line, line_no) {
            Ok((title, mut sections)) => match sections.remove(language) {
                Some(text) => SourcePage::Section { title, text },
                None => SourcePage::Missing { title },
            },
            Err(e) => SourcePage::Unreadable {
                title: format!("line {}", line_no),
                error: e.to_string(),
            },
        }
    }
}

#[derive(Debug)]
enum Outcome {
    Rendered(Expansion),
    Missing,
    Failed(String),
}

#[derive(Debug)]
struct RenderedPage {
    seq: usize,
    title: String,
    outcome: Outcome,
}

#[derive(Debug, Default)]
pub struct ExpandStats {
    pub pages_read: usize,
    pub rendered: usize,
    pub missing_language: usize,
    pub failed: usize,
    pub degraded_calls: usize,
    pub unresolved: BTreeSet<String>,
    pub elapsed: Duration,
}

fn render_page(engine: &TemplateEngine, seq: usize, page: SourcePage) -> RenderedPage {
    match page {
        SourcePage::Section { title, text } => {
            let outcome = match engine.expand(&text) {
                Ok(expansion) => Outcome::Rendered(expansion),
                Err(e) => Outcome::Failed(e.to_string()),
            };
            RenderedPage { seq, title, outcome }
        }
        SourcePage::Missing { title } => RenderedPage {
            seq,
            title,
            outcome: Outcome::Missing,
        },
        SourcePage::Unreadable { title, error } => RenderedPage {
            seq,
            title,
            outcome: Outcome::Failed(error),
        },
    }
}

/// Write one rendered page and fold it into `stats`.
fn write_page<W: Write>(
    page: RenderedPage,
    stats: &mut ExpandStats,
    writer: &mut W,
) -> std::io::Result<()> {
    stats.pages_read += 1;
    match page.outcome {
        Outcome::Rendered(expansion) => {
            writeln!(writer, "{}\n{}\n{}", page.title, expansion.text, PAGE_SEPARATOR)?;
            stats.rendered += 1;
            stats.degraded_calls += expansion.failures.len();
            stats.unresolved.extend(expansion.unresolved);
        }
        Outcome::Missing => {
            debug!("{}: no section for the requested language", page.title);
            stats.missing_language += 1;
        }
        Outcome::Failed(error) => {
            warn!("{}: {}", page.title, error);
            stats.failed += 1;
        }
    }
    Ok(())
}

fn report(pb: &ProgressBar, stats: &ExpandStats, start_time: Instant) {
    if stats.pages_read % 1000 == 0 {
        let rate = stats.pages_read as f64 / start_time.elapsed().as_secs_f64().max(1e-9);
        pb.set_message(format!(
            "Pages: {} | Rendered: {} | Failed: {} | Rate: {:.0} pg/s",
            stats.pages_read, stats.rendered, stats.failed, rate
        ));
    }
}

/// Expand pages one after another on the calling thread.
pub fn expand_sequential<W: Write>(
    pages: impl IntoIterator<Item = SourcePage>,
    engine: &TemplateEngine,
    writer: W,
    limit: Option<usize>,
    pb: &ProgressBar,
) -> std::io::Result<ExpandStats> {
    let start_time = Instant::now();
    let mut writer = BufWriter::with_capacity(256 * 1024, writer);
    let mut stats = ExpandStats::default();

    for (seq, page) in pages.into_iter().enumerate() {
        if limit.map_or(false, |l| stats.rendered >= l) {
            break;
        }
        write_page(render_page(engine, seq, page), &mut stats, &mut writer)?;
        report(pb, &stats, start_time);
    }

    writer.flush()?;
    stats.elapsed = start_time.elapsed();
    Ok(stats)
}

/// Expand pages on `config.num_workers` threads, writing results in input order.
pub fn expand_pipeline<I, W>(
    pages: I,
    engine: Arc<TemplateEngine>,
    writer: W,
    config: &ParallelConfig,
    limit: Option<usize>,
    pb: &ProgressBar,
) -> std::io::Result<ExpandStats>
where
    I: IntoIterator<Item = SourcePage> + Send + 'static,
    W: Write,
{
    let (page_tx, page_rx): (SyncSender<(usize, SourcePage)>, Receiver<(usize, SourcePage)>) =
        sync_channel(config.channel_buffer);
    let (result_tx, result_rx): (SyncSender<RenderedPage>, Receiver<RenderedPage>) =
        sync_channel(config.channel_buffer);

    let limit_reached = Arc::new(AtomicBool::new(false));
    let start_time = Instant::now();

    // Spawn reader thread
    let reader_limit_flag = Arc::clone(&limit_reached);
    let reader_handle =
        thread::spawn(move || read_pages_to_channel(pages, page_tx, &reader_limit_flag));

    // Spawn worker threads
    let page_rx = Arc::new(Mutex::new(page_rx));
    let worker_handles: Vec<JoinHandle<()>> = (0..config.num_workers.max(1))
        .map(|_| {
            let rx = Arc::clone(&page_rx);
            let tx = result_tx.clone();
            let engine = Arc::clone(&engine);
            let limit_flag = Arc::clone(&limit_reached);
            thread::spawn(move || expand_worker(rx, tx, &engine, &limit_flag))
        })
        .collect();

    // Only workers hold the page receiver, so it disconnects once they exit
    drop(page_rx);
    // Drop extra sender so channel closes when workers finish
    drop(result_tx);

    let written = write_in_order(result_rx, writer, limit, &limit_reached, pb, start_time);

    // Unblock the reader and workers if the writer stopped early
    limit_reached.store(true, Ordering::SeqCst);
    reader_handle.join().ok();
    for handle in worker_handles {
        handle.join().ok();
    }

    let mut stats = written?;
    stats.elapsed = start_time.elapsed();
    Ok(stats)
}

/// Feed numbered pages to the workers until the input ends, the workers are
/// gone, or the writer has raised `limit_reached`.
fn read_pages_to_channel<I>(
    pages: I,
    tx: SyncSender<(usize, SourcePage)>,
    limit_reached: &AtomicBool,
) where
    I: IntoIterator<Item = SourcePage>,
{
    for (seq, page) in pages.into_iter().enumerate() {
        let mut item = (seq, page);
        loop {
            if limit_reached.load(Ordering::Relaxed) {
                return;
            }
            match tx.try_send(item) {
                Ok(()) => break,
                Err(TrySendError::Full(back)) => {
                    item = back;
                    thread::sleep(Duration::from_micros(200));
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

fn expand_worker(
    rx: Arc<Mutex<Receiver<(usize, SourcePage)>>>,
    tx: SyncSender<RenderedPage>,
    engine: &TemplateEngine,
    limit_reached: &AtomicBool,
) {
    loop {
        if limit_reached.load(Ordering::Relaxed) {
            break;
        }

        // Try to get next page from shared receiver
        let item = {
            let lock = rx.lock().ok();
            lock.and_then(|guard| guard.recv().ok())
        };

        match item {
            Some((seq, page)) => {
                if tx.send(render_page(engine, seq, page)).is_err() {
                    break;
                }
            }
            None => break,
        }
    }
}

/// Write results in input order using a streaming reorder buffer: results
/// that arrive ahead of their predecessors wait in a BTreeMap.
fn write_in_order<W: Write>(
    rx: Receiver<RenderedPage>,
    writer: W,
    limit: Option<usize>,
    limit_reached: &AtomicBool,
    pb: &ProgressBar,
    start_time: Instant,
) -> std::io::Result<ExpandStats> {
    let mut writer = BufWriter::with_capacity(256 * 1024, writer);
    let mut stats = ExpandStats::default();
    let mut pending: BTreeMap<usize, RenderedPage> = BTreeMap::new();
    let mut next_expected: usize = 0;

    let limit_hit = |stats: &ExpandStats| limit.map_or(false, |l| stats.rendered >= l);
    if limit_hit(&stats) {
        limit_reached.store(true, Ordering::SeqCst);
        return Ok(stats);
    }

    for result in rx {
        pending.insert(result.seq, result);
        while let Some(ready) = pending.remove(&next_expected) {
            write_page(ready, &mut stats, &mut writer)?;
            report(pb, &stats, start_time);
            next_expected += 1;
            if limit_hit(&stats) {
                limit_reached.store(true, Ordering::SeqCst);
                writer.flush()?;
                return Ok(stats);
            }
        }
    }

    // A worker that died leaves a gap; write what arrived after it in order
    if !pending.is_empty() {
        warn!(
            "No result for page #{}; writing {} later page(s) anyway",
            next_expected,
            pending.len()
        );
    }
    for (_, result) in std::mem::take(&mut pending) {
        write_page(result, &mut stats, &mut writer)?;
        report(pb, &stats, start_time);
        if limit_hit(&stats) {
            break;
        }
    }

    writer.flush()?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::template::types::TemplateTypeTable;

    use crate::error::ExtractError;

    // ─────────────────────────────────────────────────────────────
    // Sources
    // ─────────────────────────────────────────────────────────────

    const RECORD: &str = "  <page>\n    <title>chat</title>\n    <revision><text xml:space=\"preserve\">==English==\n# to talk\n----\n==French==\n# cat &amp; kitten\n</text></revision>\n  </page>\n";

    #[test]
    fn record_keeps_requested_language() {
        let entry = IndexEntry::new("chat", 0, RECORD.len() as u64);
        let page = SourcePage::from_record(&entry, Ok(RECORD.as_bytes().to_vec()), "French");
        assert_eq!(
            page,
            SourcePage::Section { title: "chat".into(), text: "# cat & kitten\n".into() }
        );
    }

    #[test]
    fn record_without_language_is_missing() {
        let entry = IndexEntry::new("chat", 0, RECORD.len() as u64);
        let page = SourcePage::from_record(&entry, Ok(RECORD.as_bytes().to_vec()), "Finnish");
        assert_eq!(page, SourcePage::Missing { title: "chat".into() });
    }

    #[test]
    fn unreadable_record_keeps_index_title() {
        let entry = IndexEntry::new("chat", 10, 5);
        let err = ExtractError::IndexMismatch {
            title: "chat".into(),
            offset: 10,
            length: 5,
            file_len: 12,
        };
        assert!(matches!(
            SourcePage::from_record(&entry, Err(err), "French"),
            SourcePage::Unreadable { title, .. } if title == "chat"
        ));
    }

    #[test]
    fn sections_line_source() {
        let line = r##"koira	{"Finnish":"# dog\n"}"##;
        assert_eq!(
            SourcePage::from_sections_line(line, 1, "Finnish"),
            SourcePage::Section { title: "koira".into(), text: "# dog\n".into() }
        );
        assert_eq!(
            SourcePage::from_sections_line(line, 1, "Swedish"),
            SourcePage::Missing { title: "koira".into() }
        );
        assert!(matches!(
            SourcePage::from_sections_line("garbage", 3, "Finnish"),
            SourcePage::Unreadable { .. }
        ));
    }

    // ─────────────────────────────────────────────────────────────
    // Expansion
    // ─────────────────────────────────────────────────────────────

    fn engine() -> TemplateEngine {
        let table = TemplateTypeTable::read_from("q|paren\ngrow|r|x{{grow}}\n".as_bytes()).unwrap();
        let config = EngineConfig {
            max_iterations: 10,
            ..EngineConfig::default()
        };
        TemplateEngine::new(table, config)
    }

    fn pages(n: usize) -> Vec<SourcePage> {
        (0..n)
            .map(|i| SourcePage::Section {
                title: format!("page{}", i),
                text: format!("{{{{q|fi|{}}}}}", i),
            })
            .collect()
    }

    fn run_sequential(pages: Vec<SourcePage>, limit: Option<usize>) -> (String, ExpandStats) {
        let mut out = Vec::new();
        let stats =
            expand_sequential(pages, &engine(), &mut out, limit, &ProgressBar::hidden()).unwrap();
        (String::from_utf8(out).unwrap(), stats)
    }

    #[test]
    fn sequential_output_format() {
        let (out, stats) = run_sequential(pages(2), None);
        assert_eq!(
            out,
            format!("page0\n(0)\n{sep}\npage1\n(1)\n{sep}\n", sep = PAGE_SEPARATOR)
        );
        assert_eq!(stats.rendered, 2);
    }

    #[test]
    fn failures_do_not_stop_the_batch() {
        let input = vec![
            SourcePage::Section { title: "a".into(), text: "{{grow}}".into() },
            SourcePage::Missing { title: "b".into() },
            SourcePage::Unreadable { title: "c".into(), error: "index/dump mismatch".into() },
            SourcePage::Section { title: "d".into(), text: "{{unknown|x}}".into() },
        ];
        let (out, stats) = run_sequential(input, None);
        assert_eq!(out, format!("d\nunknown|x\n{}\n", PAGE_SEPARATOR));
        assert_eq!(stats.pages_read, 4);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.missing_language, 1);
        assert!(stats.unresolved.contains("unknown"));
    }

    #[test]
    fn sequential_limit() {
        let (out, stats) = run_sequential(pages(5), Some(2));
        assert_eq!(stats.rendered, 2);
        assert!(!out.contains("page2"));
    }

    #[test]
    fn pipeline_preserves_input_order() {
        let mut out = Vec::new();
        let config = ParallelConfig {
            num_workers: 4,
            channel_buffer: 8,
        };
        let stats = expand_pipeline(
            pages(200),
            Arc::new(engine()),
            &mut out,
            &config,
            None,
            &ProgressBar::hidden(),
        )
        .unwrap();
        assert_eq!(stats.rendered, 200);

        let (expected, _) = run_sequential(pages(200), None);
        assert_eq!(String::from_utf8(out).unwrap(), expected);
    }

    #[test]
    fn pipeline_limit_stops_early() {
        let mut out = Vec::new();
        let config = ParallelConfig {
            num_workers: 2,
            channel_buffer: 4,
        };
        let stats = expand_pipeline(
            pages(100),
            Arc::new(engine()),
            &mut out,
            &config,
            Some(3),
            &ProgressBar::hidden(),
        )
        .unwrap();
        assert_eq!(stats.rendered, 3);
        let out = String::from_utf8(out).unwrap();
        assert!(out.starts_with("page0\n"));
        assert!(!out.contains("page3\n"));
    }

    #[test]
    fn pipeline_limit_returns_with_backed_up_input() {
        // Far more pages than both channels hold, so the reader is still
        // blocked on a full channel when the writer stops.
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        thread::spawn(move || {
            let config = ParallelConfig {
                num_workers: 2,
                channel_buffer: 2,
            };
            let mut out = Vec::new();
            let stats = expand_pipeline(
                pages(10_000),
                Arc::new(engine()),
                &mut out,
                &config,
                Some(1),
                &ProgressBar::hidden(),
            );
            done_tx.send((stats, out)).ok();
        });

        let (stats, out) = done_rx
            .recv_timeout(Duration::from_secs(10))
            .expect("pipeline did not shut down after reaching the limit");
        assert_eq!(stats.unwrap().rendered, 1);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            format!("page0\n(0)\n{}\n", PAGE_SEPARATOR)
        );
    }

    #[test]
    fn results_after_a_gap_are_still_written() {
        let (tx, rx) = sync_channel(4);
        for seq in [1, 2] {
            tx.send(render_page(&engine(), seq, pages(3).remove(seq))).unwrap();
        }
        drop(tx);

        let mut out = Vec::new();
        let stats = write_in_order(
            rx,
            &mut out,
            None,
            &AtomicBool::new(false),
            &ProgressBar::hidden(),
            Instant::now(),
        )
        .unwrap();
        assert_eq!(stats.rendered, 2);
        let out = String::from_utf8(out).unwrap();
        assert!(out.starts_with("page1\n"));
        assert!(out.contains("page2\n"));
    }
}
