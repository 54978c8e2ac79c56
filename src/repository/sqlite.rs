use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension};

use super::{RepoError, Result, SongRepository};
use crate::song::Song;

/// Songs stored as JSON documents in a SQLite table, keyed by slug.
pub struct SqliteSongRepository {
    conn: Mutex<Connection>,
}

/// Library-wide counts for `stats`.
#[derive(Debug)]
pub struct LibraryStats {
    pub songs: i64,
    pub tracks: i64,
    pub notes: i64,
    pub artists: Vec<(String, i64)>,
}

impl SqliteSongRepository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.init()?;
        Ok(repo)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.init()?;
        Ok(repo)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn init(&self) -> Result<()> {
        let conn = self.conn();
        // WAL mode for concurrent readers during search
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::migrate(&conn)
    }

    fn migrate(conn: &Connection) -> Result<()> {
        let version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if version < 1 {
            Self::migrate_v1(conn)?;
        }

        conn.pragma_update(None, "user_version", 1)?;
        Ok(())
    }

    /// V1: songs as JSON documents with denormalized counts
    fn migrate_v1(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS songs (
                key          TEXT PRIMARY KEY,
                artist       TEXT NOT NULL,
                name         TEXT NOT NULL,
                bpm          INTEGER NOT NULL,
                track_count  INTEGER NOT NULL,
                note_count   INTEGER NOT NULL,
                data         TEXT NOT NULL,
                created_at   TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at   TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_songs_artist ON songs(artist);
            ",
        )
        .map_err(|e| RepoError::Migration(e.to_string()))?;
        Ok(())
    }

    pub fn stats(&self) -> Result<LibraryStats> {
        let conn = self.conn();
        let (songs, tracks, notes): (i64, i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(track_count), 0), COALESCE(SUM(note_count), 0) FROM songs",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let mut stmt = conn.prepare(
            "SELECT artist, COUNT(*) FROM songs
             GROUP BY artist
             ORDER BY COUNT(*) DESC, artist
             LIMIT 20",
        )?;
        let artists: Vec<(String, i64)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(LibraryStats {
            songs,
            tracks,
            notes,
            artists,
        })
    }

    fn upsert(conn: &Connection, song: &Song) -> Result<()> {
        let metadata = song.metadata.as_ref().ok_or(RepoError::MissingMetadata)?;
        let data = serde_json::to_string(song)?;
        conn.execute(
            "INSERT INTO songs (key, artist, name, bpm, track_count, note_count, data, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, datetime('now'))
             ON CONFLICT(key) DO UPDATE SET
                artist = excluded.artist,
                name = excluded.name,
                bpm = excluded.bpm,
                track_count = excluded.track_count,
                note_count = excluded.note_count,
                data = excluded.data,
                updated_at = datetime('now')",
            rusqlite::params![
                metadata.slug(),
                metadata.artist,
                metadata.name,
                metadata.bpm,
                song.tracks.len() as i64,
                song.note_count() as i64,
                data,
            ],
        )?;
        Ok(())
    }
}

impl SongRepository for SqliteSongRepository {
    fn list_keys(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT key FROM songs ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    fn load_song(&self, key: &str) -> Result<Song> {
        let data: Option<String> = self
            .conn()
            .query_row("SELECT data FROM songs WHERE key = ?1", [key], |row| row.get(0))
            .optional()?;
        let data = data.ok_or_else(|| RepoError::NotFound(key.to_string()))?;
        Ok(serde_json::from_str(&data)?)
    }

    fn insert(&self, song: &Song) -> Result<()> {
        Self::upsert(&self.conn(), song)
    }

    /// All songs in one transaction.
    fn insert_many(&self, songs: &[Song]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for song in songs {
            Self::upsert(&tx, song)?;
        }
        tx.commit()?;
        Ok(())
    }
}
