use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use tunescout::config::AppConfig;
use tunescout::lab::{self, ExampleQuery, CSV_HEADER};
use tunescout::melody::Standardization;
use tunescout::ngram::NGramPruner;
use tunescout::parser::query::{results_to_json, QueryRequest};
use tunescout::preprocess::Preprocessor;
use tunescout::repository::{FileSongRepository, SongRepository, SqliteSongRepository};
use tunescout::search::SearchEngine;
use tunescout::segment::Segmentation;
use tunescout::strategy::list_strategies;

#[derive(Parser)]
#[command(name = "tunescout", version, about = "Query-by-humming melody search")]
struct Cli {
    /// Path to the SQLite song library
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum StandardizationArg {
    #[value(alias = "absolute")]
    Default,
    #[value(alias = "relative")]
    RelativeInterval,
    #[value(alias = "baseline")]
    BaselineInterval,
    #[value(alias = "parsons")]
    ParsonsCode,
}

impl StandardizationArg {
    fn standardization(self) -> Standardization {
        match self {
            Self::Default => Standardization::Default,
            Self::RelativeInterval => Standardization::RelativeInterval,
            Self::BaselineInterval => Standardization::BaselineInterval,
            Self::ParsonsCode => Standardization::ParsonsCode,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum SegmentationArg {
    #[value(alias = "one")]
    OneSegment,
    #[value(alias = "fixed")]
    FixedLength,
}

impl SegmentationArg {
    fn segmentation(self) -> Segmentation {
        match self {
            Self::OneSegment => Segmentation::OneSegment,
            Self::FixedLength => Segmentation::FixedLength,
        }
    }
}

/// Options shared by the commands that run the search engine.
#[derive(clap::Args)]
struct EngineArgs {
    /// Search a song directory instead of the SQLite library
    #[arg(long)]
    library: Option<PathBuf>,

    /// Similarity strategy shortcut (see `strategies`)
    #[arg(short, long)]
    strategy: Option<String>,

    /// Prune candidates by melodic-contour n-grams
    #[arg(long)]
    ngram: bool,

    /// Melody standardization (overrides config)
    #[arg(long, value_enum)]
    standardization: Option<StandardizationArg>,

    /// Track segmentation (overrides config)
    #[arg(long, value_enum)]
    segmentation: Option<SegmentationArg>,

    /// Number of parallel workers (0 = auto-detect from config)
    #[arg(short = 'j', long, default_value = "0")]
    jobs: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Find the songs most similar to a query melody
    Search {
        /// Query JSON file (notes in bars:beats:sixteenths)
        query: PathBuf,

        /// Number of results
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// List the available similarity strategies
    Strategies {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Parse a directory of MIDI/JSON songs into the SQLite library
    Import {
        /// Song directory (defaults to config library_dir)
        dir: Option<PathBuf>,
    },

    /// Show library statistics
    Stats,

    /// Rank the library for labelled example queries and print CSV results
    Bench {
        /// Directory of example query JSON files
        queries: PathBuf,

        /// Evaluate every strategy with every preprocessing pipeline
        #[arg(long)]
        all_combinations: bool,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Cut labelled example queries out of the library for `bench`
    BenchGen {
        /// Output directory for the query JSON files
        out: PathBuf,

        /// Search a song directory instead of the SQLite library
        #[arg(long)]
        library: Option<PathBuf>,

        /// Shuffle seed
        #[arg(long, default_value_t = lab::DEFAULT_SEED)]
        seed: u64,

        /// Query length in 4/4 measures
        #[arg(long, default_value = "2")]
        measures: u32,

        /// Skip windows with fewer notes than this
        #[arg(long, default_value = "4")]
        min_notes: usize,

        /// Keep at most this many queries
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    let config = AppConfig::load();

    // Resolve database path: CLI > config > XDG default
    let db_path = cli
        .db_path
        .or(config.db_path.clone())
        .unwrap_or_else(tunescout::config::default_db_path);

    match cli.command {
        Commands::Search { query, limit, engine } => {
            let json = std::fs::read_to_string(&query)
                .with_context(|| format!("Failed to read query {}", query.display()))?;
            let request = QueryRequest::from_json(&json).context("Invalid query")?;
            let track = request.to_track(config.ppq).context("Invalid query")?;
            let n = limit.unwrap_or(config.results);

            // CLI > query > config
            let shortcut = engine
                .strategy
                .clone()
                .or(request.similarity_strategy.clone())
                .unwrap_or_else(|| config.default_strategy.clone());

            let results = match &engine.library {
                Some(dir) => {
                    let repo = FileSongRepository::new(dir, config.ppq);
                    run_search(repo, &config, &engine, &shortcut, n, track)
                }
                None => {
                    let repo = open_db(&db_path)?;
                    run_search(repo, &config, &engine, &shortcut, n, track)
                }
            }
            .context("Search failed")?;

            println!("{}", results_to_json(&results, config.ppq).context("Failed to encode results")?);
        }

        Commands::Strategies { json } => {
            let strategies = list_strategies();
            if json {
                println!("{}", serde_json::to_string_pretty(&strategies)?);
                return Ok(());
            }
            println!("{:<8} {:<32} {}", "Shortcut", "Name", "Best");
            println!("{}", "-".repeat(50));
            for s in &strategies {
                let best = if s.highest_first { "highest" } else { "lowest" };
                println!("{:<8} {:<32} {}", s.shortcut, s.name, best);
            }
        }

        Commands::Import { dir } => {
            let dir = dir.or(config.library_dir.clone()).ok_or_else(|| {
                anyhow::anyhow!("No song directory. Pass one as an argument or set library_dir in config.")
            })?;
            let db = open_db(&db_path)?;
            let (imported, skipped) = import_songs(&db, &dir, config.ppq).context("Import failed")?;
            println!("Import complete: {} imported, {} skipped", imported, skipped);
        }

        Commands::Stats => {
            let db = open_db(&db_path)?;
            let stats = db.stats().context("Failed to get stats")?;
            println!("Library Statistics");
            println!("==================");
            println!("Songs:   {}", stats.songs);
            println!("Tracks:  {}", stats.tracks);
            println!("Notes:   {}", stats.notes);
            println!();

            if !stats.artists.is_empty() {
                println!("Artists:");
                for (artist, count) in &stats.artists {
                    println!("  {:<30} {}", artist, count);
                }
            }
        }

        Commands::Bench {
            queries,
            all_combinations,
            engine,
        } => {
            let examples = ExampleQuery::load_dir(&queries).context("Failed to load example queries")?;
            if examples.is_empty() {
                println!("No example queries in {}.", queries.display());
                return Ok(());
            }
            let shortcut = engine
                .strategy
                .clone()
                .unwrap_or_else(|| config.default_strategy.clone());

            match (&engine.library, all_combinations) {
                (Some(dir), false) => {
                    let repo = FileSongRepository::new(dir, config.ppq);
                    run_bench(repo, &config, &engine, &shortcut, &examples)
                }
                (None, false) => {
                    let repo = open_db(&db_path)?;
                    run_bench(repo, &config, &engine, &shortcut, &examples)
                }
                (Some(dir), true) => {
                    let repo = FileSongRepository::new(dir, config.ppq);
                    run_sweep(&repo, &config, &engine, &examples)
                }
                (None, true) => {
                    let repo = open_db(&db_path)?;
                    run_sweep(&repo, &config, &engine, &examples)
                }
            }
            .context("Benchmark failed")?;
        }

        Commands::BenchGen {
            out,
            library,
            seed,
            measures,
            min_notes,
            limit,
        } => {
            let window = measures * config.ppq * 4;
            let generated = match &library {
                Some(dir) => lab::generate_queries(&FileSongRepository::new(dir, config.ppq), seed, window),
                None => lab::generate_queries(&open_db(&db_path)?, seed, window),
            }
            .context("Failed to generate queries")?;

            let queries: Vec<ExampleQuery> = generated
                .into_iter()
                .filter(|q| q.track.notes.len() >= min_notes)
                .take(limit.unwrap_or(usize::MAX))
                .collect();
            let paths = lab::write_queries(&out, &queries).context("Failed to write queries")?;
            println!("Wrote {} queries to {}", paths.len(), out.display());
        }
    }

    Ok(())
}

fn open_db(path: &Path) -> Result<SqliteSongRepository> {
    log::info!("Database: {}", path.display());
    SqliteSongRepository::open(path).context("Failed to open database")
}

fn resolve_workers(config: &AppConfig, args: &EngineArgs) -> usize {
    if args.jobs > 0 { args.jobs } else { config.resolve_workers() }
}

fn resolve_pruner(config: &AppConfig, args: &EngineArgs) -> Option<NGramPruner> {
    if args.ngram {
        Some(config.ngram.pruner())
    } else {
        config.pruner()
    }
}

/// Preprocessing pipeline: CLI > config > default
fn resolve_preprocessor(config: &AppConfig, args: &EngineArgs) -> Preprocessor {
    let mut prep = config.preprocess.preprocessor();
    if let Some(s) = args.standardization {
        prep.standardization = s.standardization();
    }
    if let Some(s) = args.segmentation {
        prep.segmentation = s.segmentation();
    }
    prep
}

fn build_engine<R: SongRepository>(
    repo: R,
    config: &AppConfig,
    args: &EngineArgs,
    shortcut: &str,
) -> Result<SearchEngine<R>> {
    Ok(SearchEngine::from_shortcut(repo, shortcut, &config.strategy_options())?
        .with_preprocessor(resolve_preprocessor(config, args))
        .with_pruner(resolve_pruner(config, args))
        .with_workers(resolve_workers(config, args)))
}

fn run_search<R: SongRepository + 'static>(
    repo: R,
    config: &AppConfig,
    args: &EngineArgs,
    shortcut: &str,
    n: usize,
    track: tunescout::song::Track,
) -> Result<Vec<tunescout::song::SearchResult>> {
    let engine = Arc::new(build_engine(repo, config, args, shortcut)?);
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start runtime")?;
    Ok(rt.block_on(engine.find_similar_async(n, track))?)
}

fn run_bench<R: SongRepository>(
    repo: R,
    config: &AppConfig,
    args: &EngineArgs,
    shortcut: &str,
    examples: &[ExampleQuery],
) -> Result<()> {
    let engine = build_engine(repo, config, args, shortcut)?;

    let pb = ProgressBar::new(examples.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
            .progress_chars("#>-"),
    );

    println!("{}", CSV_HEADER);
    let mut found = 0;
    for example in examples {
        let result = lab::evaluate(&engine, example)?;
        if result.result_position == Some(0) {
            found += 1;
        }
        pb.suspend(|| println!("{}", result.to_csv_row()));
        pb.inc(1);
    }
    pb.finish_with_message(format!("{}/{} ranked first", found, examples.len()));
    Ok(())
}

/// Every strategy and pipeline per example. The strategy and preprocessing
/// flags are ignored; pruning and worker flags still apply.
fn run_sweep<R: SongRepository>(
    repo: &R,
    config: &AppConfig,
    args: &EngineArgs,
    examples: &[ExampleQuery],
) -> Result<()> {
    let options = config.strategy_options();
    let pruner = resolve_pruner(config, args);
    let workers = resolve_workers(config, args);

    let pb = ProgressBar::new(examples.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
            .progress_chars("#>-"),
    );

    println!("{}", CSV_HEADER);
    for example in examples {
        pb.set_message(example.name());
        let results = lab::evaluate_all_combinations(repo, example, &options, pruner, workers)?;
        pb.suspend(|| {
            for result in &results {
                println!("{}", result.to_csv_row());
            }
        });
        pb.inc(1);
    }
    pb.finish_with_message("Done");
    Ok(())
}

/// Parse every song under `dir` and store it in the library.
fn import_songs(db: &SqliteSongRepository, dir: &Path, ppq: u32) -> Result<(u64, u64)> {
    const BATCH: usize = 256;

    let source = FileSongRepository::new(dir, ppq);
    let keys = source.list_keys()?;
    log::info!("Importing {} songs from {}", keys.len(), dir.display());

    let pb = ProgressBar::new(keys.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
            .progress_chars("#>-"),
    );

    let mut imported: u64 = 0;
    let mut skipped: u64 = 0;
    let mut batch = Vec::with_capacity(BATCH);

    for key in &keys {
        match source.load_song(key) {
            Ok(song) if song.metadata.is_some() => batch.push(song),
            Ok(_) => {
                log::warn!("Skipping {}: no metadata", key);
                skipped += 1;
            }
            Err(e) => {
                log::warn!("Skipping {}: {}", key, e);
                skipped += 1;
            }
        }
        if batch.len() == BATCH {
            db.insert_many(&batch)?;
            imported += batch.len() as u64;
            batch.clear();
            pb.set_message(format!("{} imported, {} skipped", imported, skipped));
        }
        pb.inc(1);
    }
    db.insert_many(&batch)?;
    imported += batch.len() as u64;

    pb.finish_with_message(format!("Done: {} imported, {} skipped", imported, skipped));
    Ok((imported, skipped))
}
