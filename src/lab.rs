//! Retrieval benchmark over labelled example queries.
//!
//! Each example is a melody fragment cut from a known song. The engine ranks
//! the whole library for it and the lab records where the source song ended
//! up and how long the search took. Example queries themselves are cut from
//! the library with [`generate_queries`].

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use walkdir::WalkDir;

use crate::melody::{MelodyExtraction, Standardization};
use crate::ngram::NGramPruner;
use crate::preprocess::Preprocessor;
use crate::repository::{RepoError, SongRepository};
use crate::search::{SearchEngine, SearchError};
use crate::segment::Segmentation;
use crate::song::{SongMetadata, Track};
use crate::strategy::{StrategyOptions, STRATEGIES};

#[derive(Error, Debug)]
pub enum LabError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid example query {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Repository error: {0}")]
    Repository(#[from] RepoError),
    #[error("Search failed: {0}")]
    Search(#[from] SearchError),
}

pub type Result<T> = std::result::Result<T, LabError>;

pub const CSV_HEADER: &str =
    "duration,extraction,standardization,segmentation,similarity,result_position,query_name";

/// Seed used by `bench-gen` when none is given.
pub const DEFAULT_SEED: u64 = 123;

/// A query fragment labelled with the song it was taken from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExampleQuery {
    pub metadata: SongMetadata,
    pub track: Track,
}

impl ExampleQuery {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|source| LabError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Every `*.json` example directly inside `dir`, in file name order.
    pub fn load_dir(dir: &Path) -> Result<Vec<ExampleQuery>> {
        let mut paths: Vec<PathBuf> = WalkDir::new(dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json")))
            .collect();
        paths.sort();
        paths.iter().map(|p| Self::load(p)).collect()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).map_err(|source| LabError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn name(&self) -> String {
        self.metadata.slug()
    }
}

/// Cut every song of `repo` into `window`-tick fixed-length segments, each
/// labelled with its song, and shuffle them with a generator seeded by `seed`.
///
/// Songs are visited in slug order before shuffling, so the output depends
/// only on the library contents and the seed. Songs without metadata cannot
/// be labelled and are skipped.
pub fn generate_queries<R: SongRepository>(repo: &R, seed: u64, window: u32) -> Result<Vec<ExampleQuery>> {
    let mut songs: Vec<_> = repo
        .get_all_songs()?
        .filter_map(|song| song.metadata.clone().map(|m| (m, song)))
        .collect();
    songs.sort_by_key(|(metadata, _)| metadata.slug());

    let mut queries: Vec<ExampleQuery> = songs
        .iter()
        .flat_map(|(metadata, song)| {
            song.tracks
                .iter()
                .flat_map(|track| Segmentation::FixedLength.segment(track, window))
                .map(|track| ExampleQuery {
                    metadata: metadata.clone(),
                    track,
                })
        })
        .collect();
    log::info!("Cut {} candidate queries from {} songs", queries.len(), songs.len());

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    queries.shuffle(&mut rng);
    Ok(queries)
}

/// Write `queries` into `dir` as numbered JSON files that `load_dir` reads
/// back in the same order.
pub fn write_queries(dir: &Path, queries: &[ExampleQuery]) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    queries
        .iter()
        .enumerate()
        .map(|(i, query)| {
            let path = dir.join(format!("query_{:05}.json", i));
            query.save(&path)?;
            Ok(path)
        })
        .collect()
}


/// Outcome of one example query.
#[derive(Debug, Clone)]
pub struct LabResult {
    pub duration: Duration,
    pub extraction: &'static str,
    pub standardization: &'static str,
    pub segmentation: &'static str,
    pub similarity: &'static str,
    /// Zero-based rank of the source song; `None` if it was not returned.
    pub result_position: Option<usize>,
    pub query_name: String,
}

impl LabResult {
    pub fn to_csv_row(&self) -> String {
        [
            self.duration.as_secs_f64().to_string(),
            self.extraction.to_string(),
            self.standardization.to_string(),
            self.segmentation.to_string(),
            self.similarity.to_string(),
            self.result_position.map(|p| p.to_string()).unwrap_or_default(),
            csv_field(&self.query_name),
        ]
        .join(",")
    }
}

/// Quote a CSV field when it contains a separator, a quote or a line break.
fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Rank the whole library for `query` and locate its source song.
pub fn evaluate<R: SongRepository>(engine: &SearchEngine<R>, query: &ExampleQuery) -> Result<LabResult> {
    let max_results = engine.repository().list_keys()?.len();

    let start = Instant::now();
    let results = engine.find_similar(max_results, &query.track)?;
    let duration = start.elapsed();

    let result_position = results.iter().position(|r| r.metadata.identity() == query.metadata.identity());
    log::debug!("{}: position {:?} in {:?}", query.name(), result_position, duration);

    let prep = engine.preprocessor();
    Ok(LabResult {
        duration,
        extraction: prep.extraction.name(),
        standardization: prep.standardization.name(),
        segmentation: prep.segmentation.name(),
        similarity: engine.strategy().shortcut(),
        result_position,
        query_name: query.name(),
    })
}

/// Every pipeline the lab can build: each extraction, standardization and
/// segmentation combined.
pub fn all_preprocessors() -> Vec<Preprocessor> {
    let mut pipelines = Vec::new();
    for standardization in Standardization::ALL {
        for segmentation in Segmentation::ALL {
            for extraction in MelodyExtraction::ALL {
                pipelines.push(Preprocessor::new(extraction, standardization, segmentation));
            }
        }
    }
    pipelines
}

/// Evaluate `query` once per registered strategy and pipeline, in registry
/// order and then [`all_preprocessors`] order.
pub fn evaluate_all_combinations<R: SongRepository>(
    repo: &R,
    query: &ExampleQuery,
    options: &StrategyOptions,
    pruner: Option<NGramPruner>,
    workers: usize,
) -> Result<Vec<LabResult>> {
    let pipelines = all_preprocessors();
    let mut results = Vec::with_capacity(STRATEGIES.len() * pipelines.len());
    for (_, build) in STRATEGIES {
        for &preprocessor in &pipelines {
            let engine = SearchEngine::new(repo, preprocessor, build(options))
                .with_pruner(pruner)
                .with_workers(workers);
            results.push(evaluate(&engine, query)?);
        }
    }
    Ok(results)
}
