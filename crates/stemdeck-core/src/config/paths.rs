//! Standard locations for stemdeck files

use std::path::PathBuf;

/// Directory holding the stemdeck config
///
/// Returns: `{config_dir}/stemdeck`, or `./stemdeck` when the platform has
/// no config directory.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stemdeck")
}

/// Default config file
///
/// Returns: `{config_dir}/stemdeck/config.yaml`
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.yaml")
}

/// Where bounces are written when no directory is given
///
/// Returns: `~/Music/stemdeck-bounces`
pub fn default_bounce_dir() -> PathBuf {
    dirs::audio_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Music")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stemdeck-bounces")
}
