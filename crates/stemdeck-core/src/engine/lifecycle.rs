//! Engine lifecycle - started on the first user gesture, alive until shutdown
//!
//! Platforms commonly refuse to open an audio output before the user has
//! interacted with the application. [`LazyEngine`] therefore stays empty
//! until [`ensure_started`](LazyEngine::ensure_started) is called from a
//! gesture handler. A failed start leaves it empty so the next gesture
//! retries, and the failure is kept as a one-shot notice for the UI.

use super::EngineHandle;
use crate::error::EngineResult;

/// Something that can bring up an engine and keep it running
pub trait EngineLauncher {
    /// Keeps the render loop alive; dropping it stops audio
    type Guard;

    fn launch(&mut self) -> EngineResult<(EngineHandle, Self::Guard)>;
}

/// Lazily started audio engine
pub struct LazyEngine<L: EngineLauncher> {
    launcher: L,
    running: Option<(EngineHandle, L::Guard)>,
    notice: Option<String>,
}

impl<L: EngineLauncher> LazyEngine<L> {
    pub fn new(launcher: L) -> Self {
        Self {
            launcher,
            running: None,
            notice: None,
        }
    }

    /// Start the engine if needed and return its handle
    ///
    /// Call from a user-gesture handler. On failure the error is returned and
    /// also stored as a notice for [`take_notice`](Self::take_notice).
    pub fn ensure_started(&mut self) -> EngineResult<EngineHandle> {
        if let Some((engine, _)) = &self.running {
            return Ok(engine.clone());
        }

        match self.launcher.launch() {
            Ok((engine, guard)) => {
                log::info!("Audio engine started at {} Hz", engine.sample_rate());
                self.notice = None;
                self.running = Some((engine.clone(), guard));
                Ok(engine)
            }
            Err(e) => {
                log::warn!("Audio engine start failed: {}", e);
                self.notice = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Handle to the running engine, if started
    pub fn handle(&self) -> Option<EngineHandle> {
        self.running.as_ref().map(|(engine, _)| engine.clone())
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Take the pending start-failure notice, if any (surfaced once)
    pub fn take_notice(&mut self) -> Option<String> {
        self.notice.take()
    }

    /// Stop the engine; a later gesture may start it again
    pub fn shutdown(&mut self) {
        if self.running.take().is_some() {
            log::info!("Audio engine shut down");
        }
    }
}
