//! cpal output stream driving the software engine
//!
//! ```text
//! ┌──────────────────┐   submit()   ┌─────────────────────┐
//! │   Controllers    │─────────────►│   Command Ring      │
//! │ (voices, chains) │              │  (lock-free SPSC)   │
//! └──────────────────┘              └──────────┬──────────┘
//!         ▲                                    │ pop()
//!         │ Relaxed atomics                    ▼
//! ┌──────────────────┐              ┌─────────────────────┐
//! │  SourceAtomics   │◄─────────────│  cpal Audio Thread  │
//! │   (lock-free)    │  sync writes │  (owns Renderer)    │
//! └──────────────────┘              └─────────────────────┘
//! ```
//!
//! The callback owns the [`Renderer`] outright, so nothing on the audio
//! thread takes a lock.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, Stream, StreamConfig};

use super::device::{default_device, find_device};
use super::error::{AudioError, AudioResult};
use crate::config::{EngineConfig, OutputConfig};
use crate::engine::{EngineHandle, EngineLauncher, Renderer, SoftwareEngine};
use crate::error::EngineResult;

/// Buffer size bounds accepted from the config
const MIN_BUFFER_SIZE: u32 = 64;
const MAX_BUFFER_SIZE: u32 = 8192;

/// A running device stream; drop it to stop audio
pub struct OutputStream {
    _stream: Stream,
    device_name: String,
    sample_rate: u32,
    buffer_size: Option<u32>,
}

impl OutputStream {
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// One-way output latency, if a fixed buffer size was requested
    pub fn latency_ms(&self) -> Option<f32> {
        self.buffer_size
            .map(|frames| frames as f32 / self.sample_rate as f32 * 1000.0)
    }
}

/// Open the configured device and start rendering a new engine into it
///
/// The engine runs at the device's rate, which is the configured rate when
/// the device supports it.
pub fn start_output(
    engine_config: &EngineConfig,
    output: &OutputConfig,
) -> AudioResult<(Arc<SoftwareEngine>, OutputStream)> {
    let device = match &output.device {
        Some(name) => find_device(name)?,
        None => default_device()?,
    };
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    log::info!("Using audio device: {}", device_name);

    let supported = output_config(&device, engine_config.sample_rate)?;
    let sample_rate = supported.sample_rate().0;
    let buffer_size = output
        .buffer_size
        .map(|frames| frames.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE));

    let stream_config = StreamConfig {
        channels: supported.channels(),
        sample_rate: supported.sample_rate(),
        buffer_size: buffer_size.map_or(BufferSize::Default, BufferSize::Fixed),
    };
    log::info!(
        "Audio config: {} channels, {}Hz, buffer {:?}",
        stream_config.channels,
        sample_rate,
        buffer_size
    );

    let engine_config = EngineConfig {
        sample_rate,
        ..engine_config.clone()
    };
    let (engine, renderer) = SoftwareEngine::new(&engine_config);

    let stream = build_stream(&device, &stream_config, renderer)?;
    stream
        .play()
        .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;
    log::info!("Audio stream started");

    Ok((
        engine,
        OutputStream {
            _stream: stream,
            device_name,
            sample_rate,
            buffer_size,
        },
    ))
}

/// Pick an f32 stereo config, at `target_rate` when the device allows it
fn output_config(device: &cpal::Device, target_rate: u32) -> AudioResult<cpal::SupportedStreamConfig> {
    let configs: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?
        .collect();

    let in_range = |c: &cpal::SupportedStreamConfigRange| {
        target_rate >= c.min_sample_rate().0 && target_rate <= c.max_sample_rate().0
    };

    let best = configs
        .iter()
        .filter(|c| c.sample_format() == SampleFormat::F32 && c.channels() >= 2)
        .find(|c| in_range(c))
        .or_else(|| {
            configs
                .iter()
                .find(|c| c.sample_format() == SampleFormat::F32 && c.channels() >= 2)
        })
        .or_else(|| configs.iter().find(|c| c.sample_format() == SampleFormat::F32))
        .ok_or_else(|| AudioError::ConfigError("No f32 output configuration found".to_string()))?;

    let rate = if in_range(best) {
        cpal::SampleRate(target_rate)
    } else {
        let fallback = best.max_sample_rate();
        log::warn!(
            "Audio device doesn't support {}Hz, falling back to {}Hz",
            target_rate,
            fallback.0
        );
        fallback
    };
    Ok(best.clone().with_sample_rate(rate))
}

fn build_stream(device: &cpal::Device, config: &StreamConfig, mut renderer: Renderer) -> AudioResult<Stream> {
    let channels = config.channels as usize;
    device
        .build_output_stream(
            config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                renderer.render_interleaved(data, channels);
            },
            move |err| {
                log::error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))
}

/// Starts device output for [`LazyEngine`](crate::engine::LazyEngine)
#[derive(Debug, Clone, Default)]
pub struct DeviceLauncher {
    engine: EngineConfig,
    output: OutputConfig,
}

impl DeviceLauncher {
    pub fn new(engine: EngineConfig, output: OutputConfig) -> Self {
        Self { engine, output }
    }
}

impl EngineLauncher for DeviceLauncher {
    type Guard = OutputStream;

    fn launch(&mut self) -> EngineResult<(EngineHandle, OutputStream)> {
        let (engine, stream) = start_output(&self.engine, &self.output)?;
        let engine: EngineHandle = engine;
        Ok((engine, stream))
    }
}
