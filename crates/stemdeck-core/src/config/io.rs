//! YAML load/save for any serde type
//!
//! Used for [`StemdeckConfig`](super::StemdeckConfig) and for parameter
//! snapshots. Loading never fails: a missing or broken file yields defaults.
//! Saving writes a sibling temp file and renames it over the target so a
//! crash mid-write cannot leave a truncated file behind.

use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Load a YAML file, falling back to `T::default()`
///
/// A missing file is expected on first run and logged at info level; an
/// unreadable or unparsable file is logged as a warning.
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        log::info!("No config at {:?}, using defaults", path);
        return T::default();
    }

    let parsed = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {:?}", path))
        .and_then(|contents| {
            serde_yaml::from_str::<T>(&contents).with_context(|| format!("Invalid YAML in {:?}", path))
        });

    match parsed {
        Ok(config) => {
            log::info!("Loaded config from {:?}", path);
            config
        }
        Err(e) => {
            log::warn!("{:#}, using defaults", e);
            T::default()
        }
    }
}

/// Write a value as YAML, creating parent directories
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;

    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml).with_context(|| format!("Failed to write {:?}", tmp))?;
    std::fs::rename(&tmp, path).with_context(|| format!("Failed to replace {:?}", path))?;

    log::info!("Saved config to {:?}", path);
    Ok(())
}
