use anyhow::{bail, Context, Result};
use catalog_dedupe::progress::{format_duration, Progress};
use catalog_dedupe::safety::validate_output_path;
use catalog_dedupe::{
    find_duplicates_of, group_duplicates_with, similarity_breakdown, CatalogEntry, CatalogStore,
    DuplicateGroup, MatchConfig, MatchProfiles, ParallelScanner, ScanEvent, ScanMode, ScanStats,
    SqliteCatalog,
};
use clap::Parser;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "catalog-dedupe")]
#[command(about = "Find near-duplicate recordings in a music catalog database")]
struct Args {
    /// SQLite catalog with a `tracks` table
    catalog: PathBuf,

    /// JSON file of named match profiles
    #[arg(long)]
    profile_file: Option<PathBuf>,

    /// Profile to use from --profile-file
    #[arg(long, default_value = "default")]
    profile: String,

    /// Compare every pair instead of blocked candidates
    #[arg(long)]
    exhaustive: bool,

    /// Use the streaming scanner and print groups as they form
    #[arg(long)]
    stream: bool,

    #[arg(long, default_value = "0")]
    workers: usize,

    /// Print the field-by-field breakdown for two identity keys and exit
    #[arg(long, num_args = 2, value_names = ["KEY_A", "KEY_B"])]
    explain: Option<Vec<String>>,

    /// List duplicates of one identity key using the store's loose query
    #[arg(long, value_name = "KEY")]
    similar_to: Option<String>,

    /// Write groups and statistics as JSON
    #[arg(long)]
    report: Option<PathBuf>,

    /// Hide progress bars, log progress lines instead
    #[arg(long)]
    log_only: bool,
}

#[derive(Serialize)]
struct Report<'a> {
    catalog: &'a Path,
    cancelled: bool,
    skipped_rows: usize,
    groups: &'a [DuplicateGroup],
    stats: &'a ScanStats,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("catalog_dedupe=info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &Args) -> Result<MatchConfig> {
    match &args.profile_file {
        Some(path) => {
            let profiles = MatchProfiles::from_json_file(path)
                .with_context(|| format!("Failed to load profiles from {}", path.display()))?;
            let config = profiles.get(&args.profile).with_context(|| {
                format!("Available profiles: {}", profiles.names().join(", "))
            })?;
            Ok(config.clone())
        }
        None => Ok(MatchConfig::default()),
    }
}

fn fetch_entry(store: &SqliteCatalog, key: &str) -> Result<CatalogEntry> {
    match store.entry_by_key(key)? {
        Some(entry) => Ok(entry),
        None => bail!("No catalog entry with identity key '{}'", key),
    }
}

fn print_groups(groups: &[DuplicateGroup], entries: &[CatalogEntry]) {
    let by_key: FxHashMap<&str, &CatalogEntry> = entries.iter().map(|e| (e.key.as_str(), e)).collect();
    for group in groups {
        let keeper = group.keeper(entries).map(|e| e.key.as_str());
        println!("\nGroup #{} ({} entries)", group.id, group.len());
        for key in &group.members {
            let marker = if Some(key.as_str()) == keeper { "*" } else { " " };
            match by_key.get(key.as_str()) {
                Some(e) => println!(
                    " {} {} - {} [{}] {}",
                    marker,
                    e.artist,
                    e.title,
                    if e.album.is_empty() { "Unknown" } else { e.album.as_str() },
                    key
                ),
                None => println!(" {} {}", marker, key),
            }
        }
    }
}

fn run_stream(
    entries: &[CatalogEntry],
    config: &MatchConfig,
    mode: ScanMode,
    workers: usize,
    progress: Progress,
) -> Result<(Vec<DuplicateGroup>, ScanStats, bool)> {
    let scanner = ParallelScanner::new(workers).with_mode(mode);
    println!("Streaming scan with {} workers", scanner.workers());

    let pb = progress.bar(0, "Scanning");
    let sink_pb = pb.clone();
    let handle = scanner
        .scan_parallel(entries.to_vec(), config, move |event| match event {
            ScanEvent::Group(group) => {
                sink_pb.println(format!("  found group #{} ({} entries)", group.id, group.len()));
            }
            ScanEvent::Progress {
                batches_done,
                batches_total,
            } => {
                sink_pb.set_length(batches_total as u64);
                sink_pb.set_position(batches_done as u64);
                progress.log("scan", batches_done as u64, batches_total as u64, 100);
            }
            ScanEvent::Completed(_) | ScanEvent::Cancelled(_) => sink_pb.finish_and_clear(),
        })
        .context("Failed to start streaming scan")?;

    let outcome = handle.wait().context("Streaming scan failed")?;
    let cancelled = outcome.is_cancelled();
    let summary = outcome.into_summary();
    Ok((summary.groups, summary.stats, cancelled))
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();
    let progress = Progress::new(args.log_only);

    if args.workers > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.workers)
            .build_global()
            .context("Failed to set thread pool size")?;
    }

    if let Some(report) = &args.report {
        validate_output_path(report, "json", &[&args.catalog])?;
    }

    let config = load_config(&args)?;
    let mode = if args.exhaustive {
        ScanMode::Exhaustive
    } else {
        ScanMode::Blocked
    };

    let start = Instant::now();

    println!("Opening catalog: {:?}", args.catalog);
    let store = SqliteCatalog::open(&args.catalog).context("Failed to open catalog database")?;

    if let Some(keys) = &args.explain {
        let a = fetch_entry(&store, &keys[0])?;
        let b = fetch_entry(&store, &keys[1])?;
        println!("{}", similarity_breakdown(&a, &b, &config));
        return Ok(());
    }

    if let Some(key) = &args.similar_to {
        let target = fetch_entry(&store, key)?;
        let lookup = find_duplicates_of(&target, &store, &config)?;
        println!(
            "{} duplicates of {} ({} loose candidates{})",
            lookup.matches.len(),
            key,
            lookup.stats.candidate_pairs,
            if lookup.stats.store_fallback { ", full-scan fallback" } else { "" }
        );
        for entry in &lookup.matches {
            println!("  {} - {} [{}] {}", entry.artist, entry.title, entry.album, entry.key);
        }
        return Ok(());
    }

    let spinner = progress.spinner("Loading catalog");
    let load = store.all_entries().context("Failed to read catalog entries")?;
    spinner.finish_and_clear();
    println!(
        "Loaded {} entries ({} rows skipped without identity key)",
        load.entries.len(),
        load.skipped_rows
    );

    let (groups, stats, cancelled) = if args.stream {
        run_stream(&load.entries, &config, mode, args.workers, progress)?
    } else {
        let spinner = progress.spinner("Grouping duplicates");
        let report = group_duplicates_with(&load.entries, &config, mode)?;
        spinner.finish_and_clear();
        (report.groups, report.stats, false)
    };

    print_groups(&groups, &load.entries);

    if let Some(path) = &args.report {
        let report = Report {
            catalog: &args.catalog,
            cancelled,
            skipped_rows: load.skipped_rows,
            groups: &groups,
            stats: &stats,
        };
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write report {}", path.display()))?;
        println!("\nReport written to {}", path.display());
    }

    println!("\n{:=<60}", "");
    println!(
        "Duplicate scan {}",
        if cancelled { "cancelled" } else { "complete!" }
    );
    println!("  Entries: {}", stats.entries);
    println!(
        "  Candidate pairs: {} ({:.2}% of all pairs)",
        stats.candidate_pairs,
        stats.reduction_rate()
    );
    println!("  Vetoed by track number: {}", stats.pairs_vetoed);
    println!("  Groups: {} covering {} entries", stats.groups, stats.grouped_entries);
    println!("  Elapsed: {}", format_duration(start.elapsed()));
    println!("{:=<60}", "");

    Ok(())
}
