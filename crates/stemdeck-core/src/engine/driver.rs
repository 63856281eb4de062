//! Headless real-time driver
//!
//! Renders the graph on a tokio interval, paced by the tokio clock, with the
//! output discarded. Audio only leaves the engine through capture taps, which
//! is what bounces need when no device is available. Because pacing uses
//! `tokio::time::Instant`, tests running with paused time render exactly as
//! much audio as virtual time has elapsed.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::lifecycle::EngineLauncher;
use super::renderer::Renderer;
use super::software::SoftwareEngine;
use super::EngineHandle;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::types::StereoBuffer;

/// A running headless render loop; dropping it stops rendering
pub struct HeadlessEngine {
    task: JoinHandle<()>,
}

impl HeadlessEngine {
    /// Create a software engine and start driving it on the current runtime
    pub fn spawn(config: &EngineConfig) -> EngineResult<(Arc<SoftwareEngine>, Self)> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| EngineError::StartFailed(e.to_string()))?;

        let (engine, renderer) = SoftwareEngine::new(config);
        let tick = Duration::from_millis(config.driver_tick_ms.max(1));
        let task = runtime.spawn(drive(renderer, tick));

        log::info!("Headless driver started ({} ms tick)", tick.as_millis());
        Ok((engine, Self { task }))
    }

    /// Stop the render loop
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for HeadlessEngine {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn drive(mut renderer: Renderer, tick: Duration) {
    let sample_rate = renderer.sample_rate() as f64;
    let origin = Instant::now();
    let mut scratch = StereoBuffer::default();

    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        let target = (origin.elapsed().as_secs_f64() * sample_rate) as u64;
        let due = target.saturating_sub(renderer.frames_rendered()) as usize;
        if due == 0 {
            continue;
        }

        if scratch.len() != due {
            scratch = StereoBuffer::silence(due);
        }
        renderer.render(&mut scratch);
    }
}

/// Launches a [`HeadlessEngine`] for [`LazyEngine`](super::LazyEngine)
#[derive(Debug, Clone, Default)]
pub struct HeadlessLauncher {
    config: EngineConfig,
}

impl HeadlessLauncher {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

impl EngineLauncher for HeadlessLauncher {
    type Guard = HeadlessEngine;

    fn launch(&mut self) -> EngineResult<(EngineHandle, Self::Guard)> {
        let (engine, guard) = HeadlessEngine::spawn(&self.config)?;
        let engine: EngineHandle = engine;
        Ok((engine, guard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::AudioGraph;

    #[tokio::test(start_paused = true)]
    async fn test_clock_tracks_virtual_time() {
        let (engine, _driver) = HeadlessEngine::spawn(&EngineConfig::default()).unwrap();

        tokio::time::sleep(Duration::from_millis(1000)).await;

        let now = engine.current_time();
        assert!((now - 1.0).abs() < 0.05, "engine time {}", now);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_driver_stops_clock() {
        let (engine, driver) = HeadlessEngine::spawn(&EngineConfig::default()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(driver);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let frozen = engine.current_time();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(engine.current_time(), frozen);
    }

    #[test]
    fn test_spawn_outside_runtime_fails() {
        let result = HeadlessEngine::spawn(&EngineConfig::default());
        assert!(matches!(result, Err(EngineError::StartFailed(_))));
    }
}
