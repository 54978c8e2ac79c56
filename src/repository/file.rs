use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use walkdir::WalkDir;

use super::{RepoError, Result, SongRepository};
use crate::parser::midi::parse_midi;
use crate::song::Song;
use crate::SUPPORTED_EXTENSIONS;

const UNKNOWN_ARTIST: &str = "Unknown artist";
const UNKNOWN_SONG: &str = "Unknown song";

static ARTIST_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*) - (.*)\.[A-Za-z0-9]+$").unwrap());

/// Songs stored as files under a root directory: raw `.mid`/`.midi` files
/// and pre-parsed `.json` documents. Keys are root-relative paths.
pub struct FileSongRepository {
    root: PathBuf,
    ppq: u32,
}

impl FileSongRepository {
    pub fn new(root: impl Into<PathBuf>, ppq: u32) -> Self {
        Self {
            root: root.into(),
            ppq,
        }
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        Some(parts.join("/"))
    }
}

fn extension(key: &str) -> String {
    Path::new(key)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}

fn is_midi(ext: &str) -> bool {
    ext == "mid" || ext == "midi"
}

/// Key without its extension, used to pair a MIDI file with its parsed JSON.
fn stem_key(key: &str) -> &str {
    key.rsplit_once('.').map_or(key, |(stem, _)| stem)
}

/// Artist and song name from a `"{artist} - {name}.{ext}"` file name.
pub fn artist_name_from_path(key: &str) -> (String, String) {
    let file_name = key.rsplit('/').next().unwrap_or(key);
    let caps = ARTIST_NAME_RE.captures(file_name);
    let group = |i: usize, fallback: &str| {
        caps.as_ref()
            .and_then(|c| c.get(i))
            .map(|m| m.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(fallback)
            .to_string()
    };
    (group(1, UNKNOWN_ARTIST), group(2, UNKNOWN_SONG))
}

/// File name for a stored song; path separators in the slug are replaced.
fn file_name_for(slug: &str) -> String {
    format!("{}.json", slug.replace(['/', '\\'], "_"))
}

impl SongRepository for FileSongRepository {
    fn list_keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = Vec::new();
        for entry in WalkDir::new(&self.root)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_lowercase();
            if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
                continue;
            }
            if let Some(key) = self.key_for(path) {
                keys.push(key);
            }
        }

        // A MIDI file that already has a parsed JSON twin is served from the JSON
        let parsed: HashSet<String> = keys
            .iter()
            .filter(|k| extension(k) == "json")
            .map(|k| stem_key(k).to_string())
            .collect();
        keys.retain(|k| !(is_midi(&extension(k)) && parsed.contains(stem_key(k))));
        keys.sort();
        Ok(keys)
    }

    fn load_song(&self, key: &str) -> Result<Song> {
        let ext = extension(key);
        let path = self.root.join(key);
        if is_midi(&ext) {
            let bytes = std::fs::read(&path)?;
            let (artist, name) = artist_name_from_path(key);
            let song = parse_midi(&bytes, &artist, &name, self.ppq)?;
            log::debug!("Parsed file {}", key);
            Ok(song)
        } else if ext == "json" {
            let bytes = std::fs::read(&path)?;
            Ok(serde_json::from_slice(&bytes)?)
        } else {
            Err(RepoError::UnknownFormat(key.to_string()))
        }
    }

    fn insert(&self, song: &Song) -> Result<()> {
        let metadata = song.metadata.as_ref().ok_or(RepoError::MissingMetadata)?;
        std::fs::create_dir_all(&self.root)?;
        let path = self.root.join(file_name_for(&metadata.slug()));
        std::fs::write(&path, serde_json::to_vec(song)?)?;
        Ok(())
    }
}
