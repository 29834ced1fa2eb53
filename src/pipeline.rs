use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::dispatcher::{DispatchStats, Dispatcher};
use crate::error::FetchError;
use crate::fetch::FetchResult;
use crate::frontier::{self, FrontierWriter};
use crate::parser::cards::card_links;
use crate::parser::listing::{self, Extraction, SkipReason};
use crate::parser::CompiledSchema;
use crate::settings::Settings;
use crate::sink::AggregationSink;

pub struct DiscoverReport {
    pub fetch: DispatchStats,
    pub links_found: usize,
    pub appended: usize,
    pub duplicates: usize,
}

/// Walk the index pages and append every card link to the frontier.
pub async fn discover(
    dispatcher: &Dispatcher,
    settings: &Settings,
    schema: &CompiledSchema,
    frontier_path: &Path,
    dedup: bool,
    dry_run: bool,
) -> Result<DiscoverReport> {
    let mut writer = FrontierWriter::open(frontier_path, dedup, dry_run)?;
    let prefix = settings.site.link_prefix.as_str();
    let mut links_found = 0;
    let mut write_error: Option<anyhow::Error> = None;

    let fetch = dispatcher
        .dispatch("discover", settings.index_urls(), |result| match result {
            FetchResult::Success { url, html } => {
                let links = card_links(schema, prefix, &html);
                links_found += links.len();
                if write_error.is_some() {
                    return;
                }
                match writer.append_page(&links) {
                    Ok(n) => info!("{} processed: {} links, {} appended", url, links.len(), n),
                    Err(e) => write_error = Some(e),
                }
            }
            FetchResult::Failure { url, error } => {
                warn!("Failed to crawl {}: {}", url, error);
            }
        })
        .await;

    if let Some(e) = write_error {
        return Err(e);
    }

    Ok(DiscoverReport {
        fetch,
        links_found,
        appended: writer.appended(),
        duplicates: writer.duplicates(),
    })
}

pub struct ExtractOptions {
    pub output: PathBuf,
    pub failed: Option<PathBuf>,
    pub dedup: bool,
    pub dry_run: bool,
}

/// Every frontier URL ends up in exactly one of `extracted`, `skipped` or
/// `failures`.
pub struct ExtractReport {
    pub fetch: DispatchStats,
    pub rows: usize,
    pub extracted: Vec<String>,
    pub skipped: Vec<(String, SkipReason)>,
    pub failures: Vec<(String, FetchError)>,
}

impl ExtractReport {
    pub fn skipped_for(&self, reason: SkipReason) -> usize {
        self.skipped.iter().filter(|(_, r)| *r == reason).count()
    }
}

/// Fetch every frontier URL, extract a record per listing page and write
/// the dataset once all fetches have reported.
pub async fn extract(
    dispatcher: &Dispatcher,
    settings: &Settings,
    schema: &CompiledSchema,
    frontier_path: &Path,
    opts: &ExtractOptions,
) -> Result<ExtractReport> {
    let urls = frontier::read_urls(frontier_path, &settings.site.origin, opts.dedup)?;
    info!("Loaded {} URLs from {}", urls.len(), frontier_path.display());

    let sink = AggregationSink::new();
    let mut extracted = Vec::new();
    let mut skipped = Vec::new();
    let mut failures = Vec::new();

    let fetch = dispatcher
        .dispatch("extract", urls, |result| match result {
            FetchResult::Success { url, html } => match listing::extract(schema, &url, &html) {
                Extraction::Record(record) => {
                    sink.push(record);
                    info!("{} processed", url);
                    extracted.push(url);
                }
                Extraction::Skipped(reason) => {
                    info!("{} fetched, skipped: {}", url, reason.label());
                    skipped.push((url, reason));
                }
            },
            FetchResult::Failure { url, error } => {
                warn!("Crawling {} failed: {}", url, error);
                failures.push((url, error));
            }
        })
        .await;

    let rows = if opts.dry_run {
        let rows = sink.len();
        info!("Dry run: {} rows not written to {}", rows, opts.output.display());
        rows
    } else {
        let rows = sink.flush(&opts.output)?;
        if let Some(path) = &opts.failed {
            write_failed(path, &failures)?;
        }
        rows
    };

    Ok(ExtractReport {
        fetch,
        rows,
        extracted,
        skipped,
        failures,
    })
}

fn write_failed(path: &Path, failures: &[(String, FetchError)]) -> Result<()> {
    let body: String = failures.iter().map(|(url, _)| format!("{}\n", url)).collect();
    std::fs::write(path, body).with_context(|| format!("Failed to write {}", path.display()))
}
