//! Stemdeck Core - synchronized multi-track playback with per-track signal chains
//!
//! A [`MixSession`] holds one [`TrackVoice`] per stem. Each voice plays a
//! decoded source through its own [`SignalChain`] (pitch shift, mastering
//! EQ, optional parallel effects, output fader) on a shared audio engine, so
//! every stem starts on the same sample and stays in lockstep.
//!
//! The engine is reached only through the [`AudioGraph`](engine::AudioGraph)
//! seam; the [`SoftwareEngine`](engine::SoftwareEngine) renders it either
//! into a cpal device stream ([`audio`]) or on a tokio-paced headless driver.

pub mod audio;
pub mod chain;
pub mod config;
pub mod effect;
pub mod engine;
pub mod error;
pub mod latency;
pub mod loader;
pub mod mastering;
pub mod params;
pub mod recorder;
pub mod session;
pub mod types;
pub mod voice;

pub use chain::SignalChain;
pub use error::{EngineError, LoadError, RecordingError};
pub use latency::LatencyCompensator;
pub use params::{ParameterStore, TrackParams};
pub use recorder::{BounceFormat, RecordedBlob, Recorder};
pub use session::MixSession;
pub use types::*;
pub use voice::{TrackVoice, VoiceState};
