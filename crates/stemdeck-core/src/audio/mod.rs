//! Device audio output
//!
//! Opens a cpal output stream whose callback owns the engine's
//! [`Renderer`](crate::engine::Renderer). Controllers keep talking to the
//! engine through its [`AudioGraph`](crate::engine::AudioGraph) handle; the
//! stream only pulls rendered audio.
//!
//! # Example Usage
//!
//! ```ignore
//! use stemdeck_core::audio::DeviceLauncher;
//! use stemdeck_core::engine::LazyEngine;
//!
//! let mut engine = LazyEngine::new(DeviceLauncher::new(config.engine, config.output));
//!
//! // From the first user gesture
//! let handle = engine.ensure_started()?;
//! ```

mod device;
mod error;
mod output;

pub use device::{output_devices, OutputDevice};
pub use error::{AudioError, AudioResult};
pub use output::{start_output, DeviceLauncher, OutputStream};
