//! Show how candidate pairs spread across similarity thresholds
//!
//! Usage: tune-thresholds <catalog.sqlite3> [--exhaustive] [--field title|artist|album]

use anyhow::{bail, Context, Result};
use catalog_dedupe::grouping::PreparedCatalog;
use catalog_dedupe::models::validate_entries;
use catalog_dedupe::normalize::NormalizedFields;
use catalog_dedupe::similarity::{levenshtein_percent, percent_similarity};
use catalog_dedupe::{CatalogStore, MatchConfig, ScanMode, SqliteCatalog};
use rayon::prelude::*;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

/// Lower bounds of the reported bands, highest first
const BANDS: [u8; 4] = [95, 90, 85, 80];

#[derive(Clone, Copy)]
enum TunedField {
    Title,
    Artist,
    Album,
}

impl TunedField {
    fn parse(name: &str) -> Result<Self> {
        match name {
            "title" => Ok(TunedField::Title),
            "artist" => Ok(TunedField::Artist),
            "album" => Ok(TunedField::Album),
            other => bail!("Unknown field '{}', expected title, artist or album", other),
        }
    }

    fn value<'a>(&self, norm: &'a NormalizedFields) -> Option<&'a str> {
        match self {
            TunedField::Title => Some(norm.title.as_str()),
            TunedField::Artist => Some(norm.artist.as_str()),
            TunedField::Album => norm.album.as_ref().map(|a| a.as_str()),
        }
    }
}

/// Pair counts per band plus the below-80 remainder.
struct BandCounters {
    bands: [AtomicUsize; 4],
    below: AtomicUsize,
}

impl BandCounters {
    fn new() -> Self {
        Self {
            bands: Default::default(),
            below: AtomicUsize::new(0),
        }
    }

    fn record(&self, score: u8) {
        match BANDS.iter().position(|&lower| score >= lower) {
            Some(i) => self.bands[i].fetch_add(1, Ordering::Relaxed),
            None => self.below.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn load(&self) -> ([usize; 4], usize) {
        let mut out = [0usize; 4];
        for (slot, counter) in out.iter_mut().zip(&self.bands) {
            *slot = counter.load(Ordering::Relaxed);
        }
        (out, self.below.load(Ordering::Relaxed))
    }
}

fn print_table(label: &str, counters: &BandCounters, total: usize) {
    let (bands, below) = counters.load();
    println!("\n=== {} ===", label);
    println!("Band           Count      %");
    println!("─────────────────────────────");
    let mut upper = 100u8;
    for (lower, count) in BANDS.iter().zip(bands) {
        println!(
            "{:>3}-{:<3}%     {:>7}  {:>5.1}%",
            lower,
            upper,
            count,
            100.0 * count as f64 / total.max(1) as f64
        );
        upper = lower - 1;
    }
    println!(
        "  <{:<3}%      {:>7}  {:>5.1}%",
        BANDS[BANDS.len() - 1],
        below,
        100.0 * below as f64 / total.max(1) as f64
    );
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("catalog_dedupe=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: tune-thresholds <catalog.sqlite3> [--exhaustive] [--field title|artist|album]");
        std::process::exit(1);
    }

    let catalog_path = Path::new(&args[1]);
    let mode = if args.iter().any(|a| a == "--exhaustive") {
        ScanMode::Exhaustive
    } else {
        ScanMode::Blocked
    };
    let field = match args.iter().position(|a| a == "--field").and_then(|i| args.get(i + 1)) {
        Some(name) => TunedField::parse(name)?,
        None => TunedField::Title,
    };

    let start = Instant::now();
    let config = MatchConfig::default();

    println!("Loading catalog {}...", catalog_path.display());
    let store = SqliteCatalog::open(catalog_path).context("Failed to open catalog database")?;
    let load = store.all_entries()?;
    validate_entries(&load.entries)?;
    println!(
        "  Loaded {} entries ({} skipped)",
        load.entries.len(),
        load.skipped_rows
    );

    let catalog = PreparedCatalog::prepare(&load.entries, &config, mode);

    println!("\nScoring candidate pairs in parallel...");
    let jaro = BandCounters::new();
    let edit = BandCounters::new();
    let pairs = AtomicUsize::new(0);
    let skipped = AtomicUsize::new(0);

    (0..catalog.len()).into_par_iter().for_each(|anchor| {
        let a = &catalog.normalized[anchor];
        for j in catalog.index.candidates_for(anchor) {
            let b = &catalog.normalized[j];
            let (Some(va), Some(vb)) = (field.value(a), field.value(b)) else {
                skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            };
            pairs.fetch_add(1, Ordering::Relaxed);
            jaro.record(percent_similarity(va, vb));
            edit.record(levenshtein_percent(va, vb));
        }
    });

    let total = pairs.load(Ordering::Relaxed);
    println!(
        "  {} candidate pairs scored, {} without a comparable value",
        total,
        skipped.load(Ordering::Relaxed)
    );

    print_table("JARO-WINKLER", &jaro, total);
    print_table("EDIT DISTANCE", &edit, total);

    println!();
    println!("Elapsed: {:.2}s", start.elapsed().as_secs_f64());

    Ok(())
}
