pub mod config;
pub mod lab;
pub mod melody;
pub mod ngram;
pub mod parser;
pub mod preprocess;
pub mod repository;
pub mod search;
pub mod segment;
pub mod song;
pub mod strategy;

/// Song file extensions the file repository understands
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mid", "midi", "json"];

/// Application name for XDG paths
pub const APP_NAME: &str = "tunescout";

/// Ticks per quarter note everything is normalized to
pub const DEFAULT_PPQ: u32 = 480;

/// One 4/4 measure at `DEFAULT_PPQ`
pub const MEASURE_LENGTH: u32 = DEFAULT_PPQ * 4;
