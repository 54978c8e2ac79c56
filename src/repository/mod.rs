//! Song storage backends consumed by the search engine.

pub mod file;
pub mod sqlite;

pub use file::FileSongRepository;
pub use sqlite::SqliteSongRepository;

use crate::song::Song;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepoError {
    #[error("Unknown song format: {0}")]
    UnknownFormat(String),
    #[error("Song not found: {0}")]
    NotFound(String),
    #[error("Song has no metadata")]
    MissingMetadata,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] crate::parser::ParseError),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration failed: {0}")]
    Migration(String),
}

pub type Result<T> = std::result::Result<T, RepoError>;

/// Read access to a song corpus, plus insertion for maintenance paths.
///
/// Implementations must be shareable across worker threads: the search
/// engine calls `load_song` concurrently from every worker.
pub trait SongRepository: Send + Sync {
    /// Keys of every song in the corpus.
    fn list_keys(&self) -> Result<Vec<String>>;

    /// Load one song by key.
    fn load_song(&self, key: &str) -> Result<Song>;

    /// Store a song. Songs without metadata cannot be stored.
    fn insert(&self, song: &Song) -> Result<()>;

    fn insert_many(&self, songs: &[Song]) -> Result<()> {
        songs.iter().try_for_each(|s| self.insert(s))
    }

    /// Every loadable song. Songs that fail to load are logged and skipped.
    fn get_all_songs(&self) -> Result<Box<dyn Iterator<Item = Song> + '_>> {
        let keys = self.list_keys()?;
        Ok(Box::new(keys.into_iter().filter_map(move |key| {
            match self.load_song(&key) {
                Ok(song) => Some(song),
                Err(e) => {
                    log::warn!("Skipping song {}: {}", key, e);
                    None
                }
            }
        })))
    }
}

/// Lets several engines search one repository without cloning it.
impl<R: SongRepository + ?Sized> SongRepository for &R {
    fn list_keys(&self) -> Result<Vec<String>> {
        (**self).list_keys()
    }

    fn load_song(&self, key: &str) -> Result<Song> {
        (**self).load_song(key)
    }

    fn insert(&self, song: &Song) -> Result<()> {
        (**self).insert(song)
    }

    fn insert_many(&self, songs: &[Song]) -> Result<()> {
        (**self).insert_many(songs)
    }
}
