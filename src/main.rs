use anyhow::{bail, Context, Result};
use bzip2::read::BzDecoder;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use std::collections::{BTreeSet, HashSet};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use wiktionary_extract::parallel::{expand_pipeline, expand_sequential};
use wiktionary_extract::scanner::check_indexable;
use wiktionary_extract::splitter::parse_sections_line;
use wiktionary_extract::template::template_signatures;
use wiktionary_extract::{
    scan_dump, split_languages, split_languages_with_headings, DumpIndex, EngineConfig,
    ExpandStats, Page, ParallelConfig, ScanStats, SectionStore, SourcePage, TableInflection,
    TemplateEngine, TemplateTypeTable, TitleFilter,
};

#[derive(Parser)]
#[command(name = "wiktionary-extract")]
#[command(about = "Index Wiktionary XML dumps, pull out language sections and expand their templates")]
struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode - no logging, progress or statistics
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan an uncompressed dump and write its sorted byte-span index
    Index {
        /// Input XML dump (.xml)
        dump: PathBuf,

        /// Index file to write (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the raw records of pages whose title matches PATTERN
    ByTitle {
        dump: PathBuf,
        index: PathBuf,
        /// Regular expression matched from the start of the title
        pattern: String,

        /// Compare NFC-normalized titles for equality instead
        #[arg(long)]
        exact: bool,
    },

    /// Print `title<TAB>{"Language": "text"}` for pages with a requested language
    ByLang {
        dump: PathBuf,
        index: PathBuf,
        #[arg(required = true)]
        languages: Vec<String>,
    },

    /// Print page records reduced to the requested languages' sections
    FilterLang {
        dump: PathBuf,
        index: PathBuf,
        #[arg(required = true)]
        languages: Vec<String>,
    },

    /// List the distinct innermost template invocations of one language
    Templates {
        /// Sections file as written by by-lang (.jsonl or .jsonl.bz2)
        sections: PathBuf,

        #[arg(short, long)]
        language: String,

        /// Number of fields to keep after the template name
        #[arg(long, default_value_t = 0)]
        level: usize,
    },

    /// Expand the templates of one language's sections into plain text
    Expand(ExpandArgs),
}

#[derive(Args)]
struct ExpandArgs {
    #[arg(short, long)]
    language: String,

    /// Template-type definitions (name|type|arg...)
    #[arg(long)]
    types: PathBuf,

    /// Sections file as written by by-lang (.jsonl or .jsonl.bz2)
    #[arg(long, conflicts_with_all = ["dump", "index"])]
    sections: Option<PathBuf>,

    /// Read pages straight from a dump through its index
    #[arg(long, requires = "index")]
    dump: Option<PathBuf>,

    #[arg(long, requires = "dump")]
    index: Option<PathBuf>,

    /// Engine configuration YAML (default: config/engine.yaml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Inflection tables as JSON: {"stem": {"label": ["form", ...]}}
    #[arg(long)]
    inflections: Option<PathBuf>,

    /// Number of worker threads (1 = sequential, 0 = auto-detect)
    #[arg(short, long, default_value_t = 4)]
    threads: usize,

    /// Channel buffer size for the threaded pipeline
    #[arg(long, default_value_t = 1000)]
    channel_buffer: usize,

    /// Stop after this many rendered pages (for testing)
    #[arg(long)]
    limit: Option<usize>,

    /// Output file (stdout if omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write unresolved template names here instead of stderr
    #[arg(long)]
    unresolved: Option<PathBuf>,
}

fn init_logging(verbose: u8, quiet: bool) {
    let log_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    if !quiet {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
            .init();
    }
}

/// Open a sections file, decompressing `.bz2` on the fly.
fn open_reader(path: &Path) -> Result<Box<dyn BufRead + Send>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let reader: Box<dyn BufRead + Send> = if path.to_string_lossy().ends_with(".bz2") {
        Box::new(BufReader::with_capacity(256 * 1024, BzDecoder::new(file)))
    } else {
        Box::new(BufReader::with_capacity(256 * 1024, file))
    };
    Ok(reader)
}

fn load_index(path: &Path) -> Result<DumpIndex> {
    let index =
        DumpIndex::load(path).with_context(|| format!("Failed to load index {}", path.display()))?;
    info!("Loaded {} index entries from {}", index.len(), path.display());
    Ok(index)
}

fn open_store(path: &Path) -> Result<SectionStore<File>> {
    SectionStore::open(path).with_context(|| format!("Failed to open dump {}", path.display()))
}

fn stdout_writer() -> BufWriter<io::StdoutLock<'static>> {
    BufWriter::with_capacity(256 * 1024, io::stdout().lock())
}

fn progress_bar(quiet: bool) -> Result<ProgressBar> {
    if quiet {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new(100);
    pb.set_style(ProgressStyle::default_bar().template("{bar:40} {pos:>3}% {elapsed}")?);
    Ok(pb)
}

fn spinner(quiet: bool) -> Result<ProgressBar> {
    if quiet {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner} {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(120));
    Ok(pb)
}

// ─────────────────────────────────────────────────────────────────────────────
// Indexing and section access
// ─────────────────────────────────────────────────────────────────────────────

fn run_index(dump: &Path, output: Option<&Path>, quiet: bool) -> Result<()> {
    check_indexable(dump)?;
    let file = File::open(dump).with_context(|| format!("Failed to open dump {}", dump.display()))?;
    let total_size = file.metadata()?.len();
    let reader = BufReader::with_capacity(256 * 1024, file);

    let start_time = Instant::now();
    let pb = progress_bar(quiet)?;
    let (entries, stats) = scan_dump(reader, total_size, |percent| {
        pb.set_position(u64::from(percent));
        debug!("Scanned {}%", percent);
    })?;
    pb.finish_and_clear();

    let index = DumpIndex::from_scan(entries);
    match output {
        Some(path) => {
            index
                .save(path)
                .with_context(|| format!("Failed to write index {}", path.display()))?;
        }
        None => index.write_to(stdout_writer())?,
    }

    if !quiet {
        print_index_stats(&stats, start_time.elapsed());
    }
    Ok(())
}

/// Decode every indexed page; records that cannot be read are logged and skipped.
fn each_page(dump: &Path, index: &Path, mut f: impl FnMut(Page) -> Result<()>) -> Result<()> {
    let index = load_index(index)?;
    let mut store = open_store(dump)?;
    let mut unreadable = 0usize;

    for (entry, record) in store.select(&index, &TitleFilter::All) {
        match record.map(|bytes| Page::from_bytes(&bytes)) {
            Ok(Some(page)) => f(page)?,
            Ok(None) => {
                warn!("{}: record has no title", entry.title);
                unreadable += 1;
            }
            Err(e) => {
                warn!("{}: {}", entry.title, e);
                unreadable += 1;
            }
        }
    }

    if unreadable > 0 {
        warn!("{} page(s) could not be read", unreadable);
    }
    Ok(())
}

fn run_by_title(dump: &Path, index: &Path, pattern: &str, exact: bool) -> Result<()> {
    let index = load_index(index)?;
    let filter = if exact {
        TitleFilter::exact(pattern)
    } else {
        TitleFilter::pattern(pattern)?
    };
    let mut store = open_store(dump)?;
    let mut out = stdout_writer();
    let mut matched = 0usize;

    for (entry, record) in store.select(&index, &filter) {
        match record {
            Ok(bytes) => {
                out.write_all(&bytes)?;
                matched += 1;
            }
            Err(e) => warn!("{}: {}", entry.title, e),
        }
    }

    out.flush()?;
    info!("{} page(s) matched {:?}", matched, pattern);
    Ok(())
}

fn run_by_lang(dump: &Path, index: &Path, languages: &[String]) -> Result<()> {
    let allowed: HashSet<String> = languages.iter().cloned().collect();
    let mut out = stdout_writer();
    let mut written = 0usize;

    each_page(dump, index, |page| {
        let sections = split_languages(&page.text, &allowed);
        if !sections.is_empty() {
            writeln!(out, "{}\t{}", page.title, serde_json::to_string(&sections)?)?;
            written += 1;
        }
        Ok(())
    })?;

    out.flush()?;
    info!("{} page(s) with {}", written, languages.join(", "));
    Ok(())
}

fn run_filter_lang(dump: &Path, index: &Path, languages: &[String]) -> Result<()> {
    let allowed: HashSet<String> = languages.iter().cloned().collect();
    let mut out = stdout_writer();
    let mut written = 0usize;

    each_page(dump, index, |page| {
        let sections = split_languages_with_headings(&page.text, &allowed);
        if !sections.is_empty() {
            out.write_all(page.with_text(&sections.joined()).as_bytes())?;
            written += 1;
        }
        Ok(())
    })?;

    out.flush()?;
    info!("{} page(s) with {}", written, languages.join(", "));
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Templates
// ─────────────────────────────────────────────────────────────────────────────

fn run_templates(sections: &Path, language: &str, level: usize) -> Result<()> {
    let reader = open_reader(sections)?;
    let mut signatures: BTreeSet<Vec<String>> = BTreeSet::new();

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_sections_line(&line, i + 1) {
            Ok((_, sections)) => {
                if let Some(text) = sections.get(language) {
                    signatures.extend(template_signatures(text, level));
                }
            }
            Err(e) => warn!("{}", e),
        }
    }

    let mut out = stdout_writer();
    for signature in &signatures {
        writeln!(out, "{}", signature.join("\t"))?;
    }
    out.flush()?;
    info!("{} distinct template signature(s)", signatures.len());
    Ok(())
}

type PageSource = Box<dyn Iterator<Item = SourcePage> + Send>;

fn sections_source(path: &Path, language: String) -> Result<PageSource> {
    let reader = open_reader(path)?;
    let pages = reader
        .lines()
        .enumerate()
        .filter(|(_, line)| line.as_ref().map_or(true, |l| !l.trim().is_empty()))
        .map(move |(i, line)| match line {
            Ok(line) => SourcePage::from_sections_line(&line, i + 1, &language),
            Err(e) => SourcePage::Unreadable {
                title: format!("line {}", i + 1),
                error: e.to_string(),
            },
        });
    Ok(Box::new(pages))
}

fn dump_source(dump: &Path, index: &Path, language: String) -> Result<PageSource> {
    let index = load_index(index)?;
    let mut store = open_store(dump)?;
    let pages = index.into_entries().into_iter().map(move |entry| {
        let record = store.read_entry(&entry);
        SourcePage::from_record(&entry, record, &language)
    });
    Ok(Box::new(pages))
}

fn build_engine(args: &ExpandArgs) -> Result<TemplateEngine> {
    let config = EngineConfig::resolve(args.config.as_deref())?;
    let table = TemplateTypeTable::load(&args.types).with_context(|| {
        format!("Failed to load template types from {}", args.types.display())
    })?;
    info!("Loaded {} template type(s)", table.len());

    let mut engine = TemplateEngine::new(table, config);
    if let Some(path) = &args.inflections {
        let provider = TableInflection::load(path)
            .with_context(|| format!("Failed to load inflections from {}", path.display()))?;
        engine = engine.with_provider(Arc::new(provider));
    }
    Ok(engine)
}

fn write_unresolved(names: &BTreeSet<String>, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => {
            let mut out = BufWriter::new(File::create(path)?);
            for name in names {
                writeln!(out, "{}", name)?;
            }
            out.flush()?;
        }
        None => {
            for name in names {
                eprintln!("{}", name);
            }
        }
    }
    Ok(())
}

fn run_expand(args: &ExpandArgs, quiet: bool) -> Result<()> {
    let engine = build_engine(args)?;

    let pages = match (&args.sections, &args.dump, &args.index) {
        (Some(sections), _, _) => sections_source(sections, args.language.clone())?,
        (None, Some(dump), Some(index)) => dump_source(dump, index, args.language.clone())?,
        _ => bail!("expand reads from --sections, or from --dump together with --index"),
    };

    let writer: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
        ),
        None => Box::new(io::stdout()),
    };

    let mut config = ParallelConfig::default();
    if args.threads > 0 {
        config.num_workers = args.threads;
    }
    config.channel_buffer = args.channel_buffer;

    let pb = spinner(quiet)?;
    let stats = if config.num_workers <= 1 {
        expand_sequential(pages, &engine, writer, args.limit, &pb)?
    } else {
        expand_pipeline(pages, Arc::new(engine), writer, &config, args.limit, &pb)?
    };
    pb.finish_and_clear();

    write_unresolved(&stats.unresolved, args.unresolved.as_deref())?;
    if !quiet {
        print_expand_stats(&stats, config.num_workers);
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Statistics
// ─────────────────────────────────────────────────────────────────────────────

fn print_index_stats(stats: &ScanStats, elapsed: Duration) {
    eprintln!();
    eprintln!("============================================================");
    eprintln!("Bytes scanned: {}", stats.bytes_read);
    eprintln!("Pages indexed: {}", stats.pages);
    eprintln!("Untitled pages: {}", stats.untitled);
    if stats.truncated {
        eprintln!("Dump ends inside a page; that page was dropped");
    }
    eprintln!("Time: {}m {}s", elapsed.as_secs() / 60, elapsed.as_secs() % 60);
    eprintln!("============================================================");
}

fn print_expand_stats(stats: &ExpandStats, workers: usize) {
    eprintln!();
    eprintln!("============================================================");
    eprintln!("Workers: {}", workers);
    eprintln!("Pages read: {}", stats.pages_read);
    eprintln!("Pages rendered: {}", stats.rendered);
    eprintln!("Without the language: {}", stats.missing_language);
    eprintln!("Failed: {}", stats.failed);
    eprintln!("------------------------------------------------------------");
    eprintln!("Degraded handler calls: {}", stats.degraded_calls);
    eprintln!("Unresolved template names: {}", stats.unresolved.len());
    eprintln!("Time: {}m {}s", stats.elapsed.as_secs() / 60, stats.elapsed.as_secs() % 60);
    eprintln!(
        "Rate: {:.0} pages/sec",
        stats.pages_read as f64 / stats.elapsed.as_secs_f64().max(1e-9)
    );
    eprintln!("============================================================");
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match &cli.command {
        Command::Index { dump, output } => run_index(dump, output.as_deref(), cli.quiet),
        Command::ByTitle {
            dump,
            index,
            pattern,
            exact,
        } => run_by_title(dump, index, pattern, *exact),
        Command::ByLang {
            dump,
            index,
            languages,
        } => run_by_lang(dump, index, languages),
        Command::FilterLang {
            dump,
            index,
            languages,
        } => run_filter_lang(dump, index, languages),
        Command::Templates {
            sections,
            language,
            level,
        } => run_templates(sections, language, *level),
        Command::Expand(args) => run_expand(args, cli.quiet),
    }
}
