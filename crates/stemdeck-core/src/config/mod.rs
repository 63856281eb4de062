//! Configuration for stemdeck applications
//!
//! A single YAML file holds the engine, recorder and output settings. Every
//! section uses `#[serde(default)]`, so a partial file only overrides the
//! keys it names.
//!
//! # Usage
//!
//! ```ignore
//! use stemdeck_core::config::{default_config_path, load_config, save_config, StemdeckConfig};
//!
//! let path = default_config_path();
//! let config: StemdeckConfig = load_config(&path);
//! save_config(&config, &path)?;
//! ```

mod io;
mod paths;

pub use io::{load_config, save_config};
pub use paths::{default_bounce_dir, default_config_dir, default_config_path};

use serde::{Deserialize, Serialize};

use crate::recorder::BounceFormat;
use crate::types::SAMPLE_RATE;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StemdeckConfig {
    pub engine: EngineConfig,
    pub recorder: RecorderConfig,
    pub output: OutputConfig,
}

/// Audio engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine sample rate in Hz
    /// Default: 48000
    pub sample_rate: u32,

    /// Capacity of the controller-to-render command ring
    /// Default: 1024
    pub command_queue_capacity: usize,

    /// Delay between `play_all` and the shared start instant
    /// Gives every voice's start command time to reach the render thread.
    /// Default: 50 ms
    pub start_lookahead_ms: u64,

    /// Tick of the headless render driver
    /// Default: 10 ms
    pub driver_tick_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            command_queue_capacity: 1024,
            start_lookahead_ms: 50,
            driver_tick_ms: 10,
        }
    }
}

impl EngineConfig {
    /// Start lookahead in seconds
    pub fn start_lookahead_secs(&self) -> f64 {
        self.start_lookahead_ms as f64 / 1000.0
    }
}

/// Bounce settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Extra capture time after the source ends, for effect tails
    /// Default: 500 ms
    pub post_roll_ms: u64,

    /// Output formats in order of preference
    /// Unsupported entries are skipped; 16-bit WAV is the final fallback.
    pub preferred_formats: Vec<BounceFormat>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            post_roll_ms: 500,
            preferred_formats: vec![BounceFormat::Wav24, BounceFormat::Wav16],
        }
    }
}

/// Audio device settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output device name; `None` selects the system default
    pub device: Option<String>,

    /// Requested device buffer size in frames; `None` lets the host decide
    pub buffer_size: Option<u32>,
}
