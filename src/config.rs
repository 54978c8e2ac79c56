use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;

use crate::melody::{MelodyExtraction, Standardization};
use crate::ngram::{NGramPruner, PruneThreshold, DEFAULT_NGRAM_LENGTH};
use crate::preprocess::Preprocessor;
use crate::segment::Segmentation;
use crate::strategy::{StrategyOptions, DEFAULT_STRATEGY};

/// Application configuration loaded from TOML config file.
/// Every field has a default, so the file is optional.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Song library directory (`.mid`, `.midi`, `.json`), used by `search`
    /// and `import` when no path is given on the command line.
    pub library_dir: Option<PathBuf>,
    /// Custom database path (overrides XDG default).
    pub db_path: Option<PathBuf>,
    /// Number of search workers. 0 = auto-detect (all cores, min 1).
    pub workers: usize,
    /// Ticks per quarter note songs and queries are normalized to.
    pub ppq: u32,
    /// Strategy shortcut used when a query does not name one.
    pub default_strategy: String,
    /// Number of results returned by `search`.
    pub results: usize,
    pub preprocess: PreprocessConfig,
    pub ngram: NGramConfig,
    pub dtw: DtwConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            library_dir: None,
            db_path: None,
            workers: 0,
            ppq: crate::DEFAULT_PPQ,
            default_strategy: DEFAULT_STRATEGY.to_string(),
            results: 10,
            preprocess: PreprocessConfig::default(),
            ngram: NGramConfig::default(),
            dtw: DtwConfig::default(),
        }
    }
}

/// Preprocessing pipeline applied to queries and library tracks alike.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// `default`, `relative_interval`, `baseline_interval` or `parsons_code`.
    pub standardization: Standardization,
    /// `one_segment` or `fixed_length`.
    pub segmentation: Segmentation,
}

impl PreprocessConfig {
    pub fn preprocessor(&self) -> Preprocessor {
        Preprocessor::new(MelodyExtraction::TopNote, self.standardization, self.segmentation)
    }
}

/// Contour n-gram pruning settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NGramConfig {
    pub enabled: bool,
    pub length: usize,
    pub threshold: PruneThreshold,
}

impl Default for NGramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            length: DEFAULT_NGRAM_LENGTH,
            threshold: PruneThreshold::default(),
        }
    }
}

impl NGramConfig {
    pub fn pruner(&self) -> NGramPruner {
        NGramPruner::new(self.length, self.threshold)
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DtwConfig {
    /// Minimum band half-width for windowed DTW.
    pub window: usize,
}

impl Default for DtwConfig {
    fn default() -> Self {
        Self {
            window: StrategyOptions::default().dtw_window,
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/tunescout/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Load config from an explicit path, falling back to defaults on error.
    pub fn load_from(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                return Self::default();
            }
        };
        match toml::from_str::<AppConfig>(&contents) {
            Ok(config) => {
                log::info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                Self::default()
            }
        }
    }

    /// Resolve worker count: 0 → auto-detect (all cores, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .max(1)
        }
    }

    pub fn strategy_options(&self) -> StrategyOptions {
        StrategyOptions {
            dtw_window: self.dtw.window,
        }
    }

    /// The configured pruner, or `None` when n-gram pruning is off.
    pub fn pruner(&self) -> Option<NGramPruner> {
        self.ngram.enabled.then(|| self.ngram.pruner())
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default database path using XDG data directory.
pub fn default_db_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join("tunescout.db")
    } else {
        PathBuf::from("tunescout.db")
    }
}
