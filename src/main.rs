mod dispatcher;
mod error;
mod fetch;
mod frontier;
mod parser;
mod pipeline;
mod settings;
mod sink;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use indicatif::HumanDuration;

use dispatcher::Dispatcher;
use parser::listing::SkipReason;
use parser::CompiledSchema;
use pipeline::{DiscoverReport, ExtractOptions, ExtractReport};
use settings::{EngineKind, Settings};

#[derive(Parser)]
#[command(name = "listing_harvester", about = "Real-estate listing crawler and attribute extractor")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Settings file (TOML or JSON); missing is fine
    #[arg(long, global = true, default_value = settings::DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Max fetches in flight at once
    #[arg(short = 'c', long, global = true)]
    concurrency: Option<usize>,
    /// Fetch engine
    #[arg(long, global = true, value_enum)]
    engine: Option<EngineKind>,
    /// Ignore robots.txt
    #[arg(long, global = true)]
    no_robots: bool,
    /// Hold new fetches while memory usage is above this percentage (0 disables)
    #[arg(long, global = true)]
    memory_threshold: Option<f64>,
    /// Disable periodic progress telemetry
    #[arg(long, global = true)]
    no_monitor: bool,
    /// Fetch and extract, but write nothing
    #[arg(long, global = true)]
    dry_run: bool,
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk the index pages and append listing links to the frontier
    Discover {
        #[arg(long, default_value = "urls.txt")]
        frontier: PathBuf,
        /// Index pages after the first
        #[arg(short = 'n', long)]
        pages: Option<usize>,
        /// Skip links already in the frontier
        #[arg(long)]
        dedup: bool,
    },
    /// Fetch every frontier URL and write the extracted dataset
    Extract {
        #[arg(long, default_value = "urls.txt")]
        frontier: PathBuf,
        #[arg(short, long, default_value = "data.csv")]
        output: PathBuf,
        /// Also write failed URLs here, one per line
        #[arg(long)]
        failed: Option<PathBuf>,
        /// Fetch each distinct frontier entry once
        #[arg(long)]
        dedup: bool,
    },
    /// Discover, then extract
    Run {
        #[arg(long, default_value = "urls.txt")]
        frontier: PathBuf,
        #[arg(short, long, default_value = "data.csv")]
        output: PathBuf,
        #[arg(short = 'n', long)]
        pages: Option<usize>,
        #[arg(long)]
        failed: Option<PathBuf>,
        #[arg(long)]
        dedup: bool,
    },
    /// Show frontier and dataset counts
    Stats {
        #[arg(long, default_value = "urls.txt")]
        frontier: PathBuf,
        #[arg(short, long, default_value = "data.csv")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.global.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .init();

    let t0 = Instant::now();
    let mut settings = Settings::load(&cli.global.config)?;
    apply_overrides(&mut settings, &cli.global);
    let dry_run = cli.global.dry_run;

    let result = match cli.command {
        Commands::Discover { frontier, pages, dedup } => {
            if let Some(pages) = pages {
                settings.site.index_pages = pages;
            }
            let (dispatcher, schema) = startup(&settings)?;
            println!("Discovering listings on {} index pages...", settings.index_urls().len());
            let report =
                pipeline::discover(&dispatcher, &settings, &schema, &frontier, dedup, dry_run).await?;
            print_discover(&report, &frontier, dry_run);
            Ok(())
        }
        Commands::Extract { frontier, output, failed, dedup } => {
            let (dispatcher, schema) = startup(&settings)?;
            let opts = ExtractOptions { output, failed, dedup, dry_run };
            run_extract(&dispatcher, &settings, &schema, &frontier, &opts).await
        }
        Commands::Run { frontier, output, pages, failed, dedup } => {
            if let Some(pages) = pages {
                settings.site.index_pages = pages;
            }
            let (dispatcher, schema) = startup(&settings)?;

            // Phase 1: Discover
            let t_discover = Instant::now();
            let report =
                pipeline::discover(&dispatcher, &settings, &schema, &frontier, dedup, dry_run).await?;
            print_discover(&report, &frontier, dry_run);
            println!("Discovery took {}", format_duration(t_discover.elapsed()));

            if dry_run {
                println!("Dry run: extraction reads the frontier as it was before discovery.");
            }

            // Phase 2: Fetch and extract
            let opts = ExtractOptions { output, failed, dedup, dry_run };
            run_extract(&dispatcher, &settings, &schema, &frontier, &opts).await
        }
        Commands::Stats { frontier, output } => {
            let f = frontier::stats(&frontier)?;
            println!("Frontier:  {}", frontier.display());
            println!("  Lines:   {}", f.lines);
            println!("  Unique:  {}", f.unique);
            if output.exists() {
                println!("Dataset:   {}", output.display());
                println!("  Rows:    {}", sink::count_rows(&output)?);
            } else {
                println!("Dataset:   {} (not written yet)", output.display());
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn apply_overrides(settings: &mut Settings, args: &GlobalArgs) {
    if let Some(c) = args.concurrency {
        settings.admission.max_concurrent_fetches = c.max(1);
    }
    if let Some(engine) = args.engine {
        settings.fetch.engine = engine;
    }
    if args.no_robots {
        settings.fetch.respect_robots = false;
    }
    if let Some(t) = args.memory_threshold {
        settings.admission.memory_threshold_percent = t;
    }
    if args.no_monitor {
        settings.admission.monitoring_enabled = false;
    }
}

/// Everything that must work before the first fetch. Failures here end the
/// run.
fn startup(settings: &Settings) -> Result<(Dispatcher, CompiledSchema)> {
    let schema = CompiledSchema::compile(&settings.schema)?;
    let engine = fetch::build_engine(&settings.fetch)?;
    Ok((Dispatcher::new(engine, settings.admission.clone()), schema))
}

async fn run_extract(
    dispatcher: &Dispatcher,
    settings: &Settings,
    schema: &CompiledSchema,
    frontier: &Path,
    opts: &ExtractOptions,
) -> Result<()> {
    let t_extract = Instant::now();
    let report = pipeline::extract(dispatcher, settings, schema, frontier, opts).await?;
    if report.fetch.total == 0 {
        println!("No URLs in {}. Run 'discover' first.", frontier.display());
    }
    print_extract(&report, &opts.output, opts.dry_run);
    println!("Extraction took {}", format_duration(t_extract.elapsed()));
    Ok(())
}

fn print_discover(report: &DiscoverReport, frontier: &Path, dry_run: bool) {
    println!(
        "Fetched {} index pages ({} ok, {} errors, peak {} in flight).",
        report.fetch.total, report.fetch.ok, report.fetch.errors, report.fetch.peak_in_flight
    );
    let verb = if dry_run { "would append" } else { "appended" };
    println!(
        "Found {} links, {} {} to {} ({} duplicates skipped).",
        report.links_found,
        verb,
        report.appended,
        frontier.display(),
        report.duplicates
    );
}

fn print_extract(report: &ExtractReport, output: &Path, dry_run: bool) {
    println!(
        "Fetched {} pages ({} ok, {} errors, peak {} in flight).",
        report.fetch.total, report.fetch.ok, report.fetch.errors, report.fetch.peak_in_flight
    );
    println!(
        "Skipped {} pages without a feature list, {} non-listing pages.",
        report.skipped_for(SkipReason::NoFeatureContainer),
        report.skipped_for(SkipReason::MissingDiscriminator)
    );
    let verb = if dry_run { "Would write" } else { "Wrote" };
    println!("{} {} rows to {}.", verb, report.rows, output.display());

    if !report.failures.is_empty() {
        println!("\n--- Failed ---");
        for (url, error) in &report.failures {
            println!("  {}: {}", url, error);
        }
    }
}

/// Seconds with one decimal under a minute, indicatif's wording above.
fn format_duration(d: Duration) -> String {
    if d < Duration::from_secs(60) {
        format!("{:.1}s", d.as_secs_f64())
    } else {
        HumanDuration(d).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_read_naturally() {
        assert_eq!(format_duration(Duration::from_millis(12_340)), "12.3s");
        assert_eq!(format_duration(Duration::ZERO), "0.0s");
        assert!(format_duration(Duration::from_secs(5 * 60)).contains("minute"));
        assert!(format_duration(Duration::from_secs(3 * 3600)).contains("hour"));
    }

    #[test]
    fn flags_override_settings() {
        let cli = Cli::parse_from([
            "listing_harvester",
            "extract",
            "-c",
            "0",
            "--engine",
            "spider",
            "--no-robots",
            "--memory-threshold",
            "75",
            "--no-monitor",
        ]);
        let mut settings = Settings::default();
        apply_overrides(&mut settings, &cli.global);

        assert_eq!(settings.admission.max_concurrent_fetches, 1);
        assert_eq!(settings.fetch.engine, EngineKind::Spider);
        assert!(!settings.fetch.respect_robots);
        assert_eq!(settings.admission.memory_threshold_percent, 75.0);
        assert!(!settings.admission.monitoring_enabled);
    }
}
