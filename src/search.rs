use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use rayon::prelude::*;
use thiserror::Error;

use crate::ngram::{NGramPruner, QueryFingerprint};
use crate::preprocess::Preprocessor;
use crate::repository::{RepoError, SongRepository};
use crate::song::{SearchResult, Track};
use crate::strategy::{strategy_from_shortcut, SimilarityStrategy, StrategyError, StrategyOptions};

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepoError),
    #[error("Failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("Search task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Ranks the songs of a repository against a query melody.
///
/// Keys are split into `workers` contiguous chunks that are scored in
/// parallel; every chunk is reduced to its own top `n` and the partial
/// rankings are merged. The ranking does not depend on the worker count.
pub struct SearchEngine<R: SongRepository> {
    repository: R,
    preprocessor: Preprocessor,
    strategy: Box<dyn SimilarityStrategy>,
    pruner: Option<NGramPruner>,
    workers: usize,
}

/// Query state shared read-only by every worker.
struct PreparedQuery<'a> {
    track: &'a Track,
    melody: Vec<i32>,
    fingerprint: Option<QueryFingerprint>,
}

impl<R: SongRepository> SearchEngine<R> {
    pub fn new(repository: R, preprocessor: Preprocessor, strategy: Box<dyn SimilarityStrategy>) -> Self {
        Self {
            repository,
            preprocessor,
            strategy,
            pruner: None,
            workers: default_workers(),
        }
    }

    /// Engine with the default preprocessing pipeline and the strategy
    /// registered under `shortcut`.
    pub fn from_shortcut(
        repository: R,
        shortcut: &str,
        options: &StrategyOptions,
    ) -> Result<Self, StrategyError> {
        let strategy = strategy_from_shortcut(shortcut, options)?;
        Ok(Self::new(repository, Preprocessor::default(), strategy))
    }

    pub fn with_preprocessor(mut self, preprocessor: Preprocessor) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    /// Skip candidate segments whose contour n-grams barely overlap the query's.
    pub fn with_pruner(mut self, pruner: Option<NGramPruner>) -> Self {
        self.pruner = pruner;
        self
    }

    /// Worker count; 0 is treated as 1.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    pub fn strategy(&self) -> &dyn SimilarityStrategy {
        self.strategy.as_ref()
    }

    /// Top `n` songs most similar to `query`, best first, at most one
    /// result per (artist, name).
    pub fn find_similar(&self, n: usize, query: &Track) -> Result<Vec<SearchResult>, SearchError> {
        let prepared = PreparedQuery {
            track: query,
            melody: self.preprocessor.prep_track(query),
            fingerprint: self.pruner.map(|p| p.query(query)),
        };

        let keys = self.repository.list_keys()?;
        let chunks = split_chunks(&keys, self.workers);

        log::info!(
            "Searching {} songs with {} workers ({}, n={})",
            keys.len(),
            chunks.len(),
            self.strategy.shortcut(),
            n
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()?;

        let partials: Vec<Vec<SearchResult>> = pool.install(|| {
            chunks
                .par_iter()
                .map(|chunk| self.search_chunk(chunk, &prepared, n))
                .collect()
        });

        let results = merge_results(
            partials.into_iter().flatten().collect(),
            n,
            self.strategy.highest_first(),
        );
        log::info!("Search finished with {} results", results.len());
        Ok(results)
    }

    /// Score every segment of every song in `keys` and keep the local top `n`.
    fn search_chunk(&self, keys: &[String], query: &PreparedQuery<'_>, n: usize) -> Vec<SearchResult> {
        let highest_first = self.strategy.highest_first();
        let mut best: Vec<SearchResult> = Vec::new();

        for key in keys {
            let song = match self.repository.load_song(key) {
                Ok(song) => song,
                Err(e) => {
                    log::warn!("Skipping song {}: {}", key, e);
                    continue;
                }
            };
            let Some(metadata) = &song.metadata else {
                log::debug!("Skipping song {} without metadata", key);
                continue;
            };

            let segments = self.preprocessor.preprocess(
                &song,
                query.track.grid_length,
                query.fingerprint.as_ref(),
            );
            best.extend(segments.into_iter().map(|segment| SearchResult {
                metadata: metadata.clone(),
                similarity: self.strategy.compare(&query.melody, &segment.melody),
                track: segment.track,
            }));

            if best.len() > n {
                best = merge_results(best, n, highest_first);
            }
        }

        merge_results(best, n, highest_first)
    }
}

impl<R: SongRepository + 'static> SearchEngine<R> {
    /// Run [`SearchEngine::find_similar`] on the blocking pool so async
    /// callers are not stalled by the CPU-bound scan.
    pub async fn find_similar_async(
        self: Arc<Self>,
        n: usize,
        query: Track,
    ) -> Result<Vec<SearchResult>, SearchError> {
        tokio::task::spawn_blocking(move || self.find_similar(n, &query)).await?
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Split `keys` into at most `parts` contiguous chunks whose sizes differ by
/// at most one. Empty chunks are not produced.
pub fn split_chunks<T>(keys: &[T], parts: usize) -> Vec<&[T]> {
    let parts = parts.max(1);
    let (base, extra) = (keys.len() / parts, keys.len() % parts);
    let mut chunks = Vec::with_capacity(parts);
    let mut start = 0;
    for i in 0..parts {
        let end = start + base + usize::from(i < extra);
        if end > start {
            chunks.push(&keys[start..end]);
        }
        start = end;
    }
    chunks
}

/// Ranking order: score in the strategy's direction, then name, artist and
/// segment ascending so equal scores always come out the same way.
fn rank_order(a: &SearchResult, b: &SearchResult, highest_first: bool) -> Ordering {
    let by_score = if highest_first {
        b.similarity.total_cmp(&a.similarity)
    } else {
        a.similarity.total_cmp(&b.similarity)
    };
    by_score
        .then_with(|| a.metadata.name.cmp(&b.metadata.name))
        .then_with(|| a.metadata.artist.cmp(&b.metadata.artist))
        .then_with(|| a.track.cmp(&b.track))
}

/// Sort, keep the best result per (artist, name), and truncate to `n`.
pub fn merge_results(mut results: Vec<SearchResult>, n: usize, highest_first: bool) -> Vec<SearchResult> {
    results.sort_by(|a, b| rank_order(a, b, highest_first));
    let mut seen: HashSet<(String, String)> = HashSet::new();
    results
        .into_iter()
        .filter(|r| seen.insert((r.metadata.artist.clone(), r.metadata.name.clone())))
        .take(n)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::melody::{MelodyExtraction, Standardization};
    use crate::ngram::PruneThreshold;
    use crate::repository::Result as RepoResult;
    use crate::segment::Segmentation;
    use crate::song::{Note, Song, SongMetadata};
    use crate::strategy::{Dtw, Lcs};
    use std::collections::BTreeMap;

    /// In-memory corpus. `None` entries fail to load.
    struct MemoryRepository {
        songs: BTreeMap<String, Option<Song>>,
    }

    impl MemoryRepository {
        fn new(entries: Vec<(&str, Option<Song>)>) -> Self {
            Self {
                songs: entries.into_iter().map(|(k, s)| (k.to_string(), s)).collect(),
            }
        }
    }

    impl SongRepository for MemoryRepository {
        fn list_keys(&self) -> RepoResult<Vec<String>> {
            Ok(self.songs.keys().cloned().collect())
        }

        fn load_song(&self, key: &str) -> RepoResult<Song> {
            self.songs
                .get(key)
                .cloned()
                .flatten()
                .ok_or_else(|| RepoError::NotFound(key.to_string()))
        }

        fn insert(&self, _song: &Song) -> RepoResult<()> {
            Ok(())
        }
    }

    fn melody(pitches: &[u8]) -> Track {
        let notes: Vec<Note> = pitches
            .iter()
            .enumerate()
            .map(|(i, &p)| Note::new(i as u32 * 480, 480, p))
            .collect();
        Track::new(notes, pitches.len() as u32 * 480)
    }

    fn song(artist: &str, name: &str, pitches: &[u8]) -> Song {
        Song::new(vec![melody(pitches)], Some(SongMetadata::new(artist, name, 120)))
    }

    fn one_segment() -> Preprocessor {
        Preprocessor::new(
            MelodyExtraction::TopNote,
            Standardization::RelativeInterval,
            Segmentation::OneSegment,
        )
    }

    fn five_songs() -> MemoryRepository {
        MemoryRepository::new(vec![
            ("0", Some(song("A", "Zero", &[60, 62, 64, 65, 67]))),
            ("1", Some(song("B", "One", &[60, 62, 64, 62, 60]))),
            ("2", Some(song("C", "Two", &[60, 60, 60, 60, 60]))),
            ("3", Some(song("D", "Three", &[67, 65, 64, 62, 60]))),
            ("4", Some(song("E", "Four", &[60, 64, 67, 72, 76]))),
        ])
    }

    fn query() -> Track {
        melody(&[60, 62, 64, 65])
    }

    #[test]
    fn test_result_count_is_capped_by_corpus() {
        let engine = SearchEngine::new(five_songs(), one_segment(), Box::new(Lcs)).with_workers(2);
        for (n, expected) in [(2, 2), (3, 3), (5, 5), (6, 5)] {
            let results = engine.find_similar(n, &query()).unwrap();
            assert_eq!(results.len(), expected, "n={n}");
        }
    }

    #[test]
    fn test_best_match_first() {
        let engine = SearchEngine::new(five_songs(), one_segment(), Box::new(Lcs));
        let results = engine.find_similar(3, &query()).unwrap();
        assert_eq!(results[0].metadata.name, "Zero");
        assert_eq!(results[0].similarity, 4.0);
        assert_eq!(results[1].metadata.name, "One");
        assert!(results.windows(2).all(|w| w[0].similarity >= w[1].similarity));
    }

    #[test]
    fn test_distance_strategy_ranks_lowest_first() {
        let engine = SearchEngine::new(five_songs(), one_segment(), Box::new(Dtw));
        let results = engine.find_similar(5, &query()).unwrap();
        assert_eq!(results[0].metadata.name, "Zero");
        assert!(results.windows(2).all(|w| w[0].similarity <= w[1].similarity));
    }

    #[test]
    fn test_worker_count_does_not_change_ranking() {
        let reference = SearchEngine::new(five_songs(), one_segment(), Box::new(Lcs))
            .with_workers(1)
            .find_similar(4, &query())
            .unwrap();
        for workers in [2, 3, 5, 8] {
            let results = SearchEngine::new(five_songs(), one_segment(), Box::new(Lcs))
                .with_workers(workers)
                .find_similar(4, &query())
                .unwrap();
            assert_eq!(results, reference, "workers={workers}");
        }
    }

    #[test]
    fn test_duplicate_songs_are_collapsed() {
        let repo = MemoryRepository::new(vec![
            ("a", Some(song("A", "Same", &[60, 62, 64, 65]))),
            ("b", Some(song("A", "Same", &[60, 62, 64, 65, 67]))),
            ("c", Some(song("B", "Other", &[60, 62]))),
        ]);
        let engine = SearchEngine::new(repo, one_segment(), Box::new(Lcs)).with_workers(3);
        let results = engine.find_similar(5, &query()).unwrap();
        let names: Vec<&str> = results.iter().map(|r| r.metadata.name.as_str()).collect();
        assert_eq!(names, vec!["Same", "Other"]);
    }

    #[test]
    fn test_broken_and_anonymous_songs_are_skipped() {
        let repo = MemoryRepository::new(vec![
            ("good", Some(song("A", "Good", &[60, 62, 64]))),
            ("broken", None),
            ("anon", Some(Song::new(vec![melody(&[60, 62, 64, 65])], None))),
        ]);
        let engine = SearchEngine::new(repo, one_segment(), Box::new(Lcs)).with_workers(2);
        let results = engine.find_similar(10, &query()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].metadata.name, "Good");
    }

    #[test]
    fn test_results_carry_the_matching_segment() {
        // first bar is a drone, the query sits in the second
        let mut notes: Vec<Note> = (0..4).map(|i| Note::new(i * 480, 480, 40)).collect();
        for (i, p) in [60u8, 62, 64, 65].iter().enumerate() {
            notes.push(Note::new(1920 + i as u32 * 480, 480, *p));
        }
        let repo = MemoryRepository::new(vec![(
            "x",
            Some(Song::new(vec![Track::new(notes, 3840)], Some(SongMetadata::new("X", "Two bars", 120)))),
        )]);
        let engine = SearchEngine::new(repo, Preprocessor::default(), Box::new(Lcs)).with_workers(1);
        let results = engine.find_similar(1, &query()).unwrap();
        assert_eq!(results[0].similarity, 4.0);
        assert_eq!(results[0].track.notes[0], Note::new(0, 480, 60));
        assert_eq!(results[0].track.grid_length, 1920);
    }

    #[test]
    fn test_ngram_pruning_filters_unrelated_contours() {
        let long_query = melody(&[60, 62, 64, 65, 67, 69, 71, 72]);
        let repo = MemoryRepository::new(vec![
            ("up", Some(song("A", "Up", &[50, 52, 54, 55, 57, 59, 61, 62]))),
            ("down", Some(song("B", "Down", &[72, 71, 69, 67, 65, 64, 62, 60]))),
        ]);
        let pruner = NGramPruner::new(3, PruneThreshold::Divisor(3));
        let engine = SearchEngine::new(repo, one_segment(), Box::new(Lcs)).with_pruner(Some(pruner));
        let results = engine.find_similar(5, &long_query).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].metadata.name, "Up");
    }

    #[test]
    fn test_ngram_short_query_prunes_every_candidate() {
        let engine = SearchEngine::new(five_songs(), one_segment(), Box::new(Lcs))
            .with_pruner(Some(NGramPruner::default()));
        // four notes cannot form a single 5-gram
        assert!(engine.find_similar(5, &query()).unwrap().is_empty());

        let engine = SearchEngine::new(five_songs(), one_segment(), Box::new(Lcs))
            .with_pruner(Some(NGramPruner::new(5, PruneThreshold::MinCount(0))));
        let results = engine.find_similar(5, &melody(&[62, 64, 66, 67, 69])).unwrap();
        let names: Vec<&str> = results.iter().map(|r| r.metadata.name.as_str()).collect();
        assert_eq!(names, vec!["Zero", "Four"]);
    }

    #[test]
    fn test_from_shortcut() {
        let engine = SearchEngine::from_shortcut(five_songs(), "dtwwin", &StrategyOptions::default()).unwrap();
        assert_eq!(engine.strategy().shortcut(), "dtwwin");
        assert!(matches!(
            SearchEngine::from_shortcut(five_songs(), "bogus", &StrategyOptions::default()),
            Err(StrategyError::UnknownStrategy(_))
        ));
    }

    #[test]
    fn test_split_chunks_balanced() {
        let keys: Vec<u32> = (0..10).collect();
        let sizes: Vec<usize> = split_chunks(&keys, 3).iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![4, 3, 3]);
        assert_eq!(split_chunks(&keys, 3).concat(), keys);
        assert_eq!(split_chunks(&keys[..2], 4).len(), 2);
        assert!(split_chunks::<u32>(&[], 4).is_empty());
        assert_eq!(split_chunks(&keys, 0).len(), 1);
    }

    #[test]
    fn test_merge_tie_break_is_by_name_then_artist() {
        let result = |artist: &str, name: &str, score: f64| SearchResult {
            metadata: SongMetadata::new(artist, name, 120),
            similarity: score,
            track: Track::new(vec![], 0),
        };
        let input = vec![
            result("B", "Song", 2.0),
            result("A", "Song", 2.0),
            result("Z", "Alpha", 2.0),
            result("Q", "Best", 5.0),
        ];
        let merged = merge_results(input.clone(), 10, true);
        let order: Vec<(&str, &str)> = merged.iter().map(|r| r.metadata.identity()).collect();
        assert_eq!(order, vec![("Q", "Best"), ("Z", "Alpha"), ("A", "Song"), ("B", "Song")]);

        let merged = merge_results(input, 2, false);
        let order: Vec<(&str, &str)> = merged.iter().map(|r| r.metadata.identity()).collect();
        assert_eq!(order, vec![("Z", "Alpha"), ("A", "Song")]);
    }

    #[tokio::test]
    async fn test_find_similar_async() {
        let engine = Arc::new(SearchEngine::new(five_songs(), one_segment(), Box::new(Lcs)));
        let results = engine.clone().find_similar_async(2, query()).await.unwrap();
        assert_eq!(results, engine.find_similar(2, &query()).unwrap());
    }
}
