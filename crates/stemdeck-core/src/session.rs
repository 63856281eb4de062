//! Mix session - a set of voices started together on one engine clock
//!
//! `play_all` picks a single start instant slightly in the future and hands
//! the same instant to every voice, so stems start on the same sample
//! regardless of how long the scheduling loop takes. Muted and unsoloed
//! voices are still started; audibility only ever moves their faders.
//!
//! Every chain in a session joins one [`LatencyCompensator`], so a stem
//! whose pitch stage is shifting does not lag behind the others.
//!
//! The session owns the [`ParameterStore`]. Mute and solo toggles write
//! through to it, so reapplying the store never undoes them.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::engine::EngineHandle;
use crate::error::{EngineResult, LoadError};
use crate::latency::LatencyCompensator;
use crate::loader::{join_load, spawn_load, SourceLoader};
use crate::params::ParameterStore;
use crate::types::TrackId;
use crate::voice::{TrackVoice, VoiceState};

/// Whether a voice should be heard given every voice's flags
///
/// With any solo active only soloed, unmuted voices are heard; otherwise
/// every unmuted voice is.
pub fn is_audible(muted: bool, solo: bool, any_solo: bool) -> bool {
    if any_solo {
        solo && !muted
    } else {
        !muted
    }
}

/// Ordered collection of voices sharing one engine
pub struct MixSession {
    engine: EngineHandle,
    compensator: Arc<LatencyCompensator>,
    voices: Vec<TrackVoice>,
    store: ParameterStore,
    is_playing: bool,
    start_timestamp: Option<f64>,
    lookahead: f64,
}

impl MixSession {
    pub fn new(engine: EngineHandle, config: &EngineConfig) -> Self {
        Self {
            compensator: LatencyCompensator::new(engine.clone()),
            engine,
            voices: Vec::new(),
            store: ParameterStore::new(),
            is_playing: false,
            start_timestamp: None,
            lookahead: config.start_lookahead_secs(),
        }
    }

    /// Add an unloaded voice; an existing id is returned unchanged
    ///
    /// A new voice takes its mute and solo flags from the store.
    pub fn add_voice(&mut self, id: TrackId) -> EngineResult<&mut TrackVoice> {
        let index = match self.index_of(id) {
            Some(index) => index,
            None => {
                let mut voice =
                    TrackVoice::with_compensator(id, self.engine.clone(), &self.compensator)?;
                if let Some(params) = self.store.get(id) {
                    voice.set_muted(params.muted);
                    voice.set_solo(params.solo);
                }
                self.voices.push(voice);
                self.voices.len() - 1
            }
        };
        let any_solo = self.any_solo();
        let voice = &mut self.voices[index];
        voice.set_audible(is_audible(voice.is_muted(), voice.is_solo(), any_solo));
        Ok(voice)
    }

    /// Dispose and drop a voice
    pub fn remove_voice(&mut self, id: TrackId) -> bool {
        let Some(index) = self.index_of(id) else {
            return false;
        };
        let mut voice = self.voices.remove(index);
        voice.dispose();
        self.apply_audibility();
        true
    }

    fn index_of(&self, id: TrackId) -> Option<usize> {
        self.voices.iter().position(|v| v.id() == id)
    }

    pub fn voice(&self, id: TrackId) -> Option<&TrackVoice> {
        self.voices.iter().find(|v| v.id() == id)
    }

    pub fn voice_mut(&mut self, id: TrackId) -> Option<&mut TrackVoice> {
        self.voices.iter_mut().find(|v| v.id() == id)
    }

    pub fn voices(&self) -> impl Iterator<Item = &TrackVoice> {
        self.voices.iter()
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    /// Load every track concurrently
    ///
    /// All decodes are started before any is awaited, and each voice is
    /// completed on its own, so a failing stem neither delays nor blocks the
    /// others. Returns the failures; those voices are Ready but silent.
    pub async fn load_all(
        &mut self,
        loader: Arc<dyn SourceLoader>,
        tracks: Vec<(TrackId, String)>,
    ) -> EngineResult<Vec<(TrackId, LoadError)>> {
        let mut pending = Vec::with_capacity(tracks.len());
        for (id, url) in tracks {
            let voice = self.add_voice(id)?;
            if !voice.begin_load() {
                continue;
            }
            let handle = spawn_load(loader.clone(), url.clone());
            pending.push((id, url, handle));
        }

        log::info!("Loading {} tracks", pending.len());
        let mut failures = Vec::new();
        for (id, url, handle) in pending {
            let result = join_load(&url, handle).await;
            let Some(voice) = self.voice_mut(id) else {
                continue;
            };
            if let Err(e) = voice.finish_load(&url, result) {
                failures.push((id, e));
            }
        }

        if !failures.is_empty() {
            log::warn!("{} of {} tracks failed to load", failures.len(), self.voices.len());
        }
        Ok(failures)
    }

    /// Start every voice at one shared instant
    ///
    /// If any voice is still running, every voice is first stopped and
    /// rewound, so all of them restart from 0 together. A voice the engine
    /// refuses does not keep the others from starting; the first error is
    /// returned once every voice has been tried.
    ///
    /// Returns the engine time the voices were scheduled for.
    pub fn play_all(&mut self) -> EngineResult<f64> {
        self.apply_audibility();
        let mut first_error = None;

        if self.voices.iter().any(|v| v.state() == VoiceState::Playing) {
            log::debug!("Restarting running session from the top");
            for voice in &mut self.voices {
                if let Err(e) = voice.stop() {
                    log::error!("{}: stop before restart failed: {}", voice.id(), e);
                    first_error.get_or_insert(e);
                }
            }
        }

        let at = self.engine.current_time() + self.lookahead;
        for voice in &mut self.voices {
            if let Err(e) = voice.play_at(at) {
                log::error!("{}: play failed: {}", voice.id(), e);
                first_error.get_or_insert(e);
            }
        }

        self.is_playing = true;
        self.start_timestamp = Some(at);
        log::info!("Playing {} voices at {:.3}s", self.voices.len(), at);
        match first_error {
            Some(e) => Err(e),
            None => Ok(at),
        }
    }

    /// Stop every voice and rewind
    pub fn stop_all(&mut self) -> EngineResult<()> {
        let mut first_error = None;
        for voice in &mut self.voices {
            if let Err(e) = voice.stop() {
                log::error!("{}: stop failed: {}", voice.id(), e);
                first_error.get_or_insert(e);
            }
        }

        self.is_playing = false;
        self.start_timestamp = None;
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Flip a voice's mute flag; returns the new flag
    pub fn toggle_mute(&mut self, id: TrackId) -> Option<bool> {
        let voice = self.voice_mut(id)?;
        let muted = !voice.is_muted();
        voice.set_muted(muted);
        self.store.set_muted(id, muted);
        self.apply_audibility();
        Some(muted)
    }

    /// Flip a voice's solo flag; returns the new flag
    pub fn toggle_solo(&mut self, id: TrackId) -> Option<bool> {
        let voice = self.voice_mut(id)?;
        let solo = !voice.is_solo();
        voice.set_solo(solo);
        self.store.set_solo(id, solo);
        self.apply_audibility();
        Some(solo)
    }

    fn any_solo(&self) -> bool {
        self.voices.iter().any(|v| v.is_solo())
    }

    /// Audibility of every voice, in session order
    pub fn audibility(&self) -> Vec<(TrackId, bool)> {
        let any_solo = self.any_solo();
        self.voices
            .iter()
            .map(|v| (v.id(), is_audible(v.is_muted(), v.is_solo(), any_solo)))
            .collect()
    }

    /// Push audibility to every fader
    pub fn apply_audibility(&mut self) {
        let any_solo = self.any_solo();
        for voice in &mut self.voices {
            let audible = is_audible(voice.is_muted(), voice.is_solo(), any_solo);
            voice.set_audible(audible);
        }
    }

    /// Parameters every voice is kept in line with
    pub fn store(&self) -> &ParameterStore {
        &self.store
    }

    /// Edit the store; changes reach the voices on the next `apply_store`
    pub fn store_mut(&mut self) -> &mut ParameterStore {
        &mut self.store
    }

    /// Bring every voice in line with the store, then recompute audibility
    ///
    /// Every voice is updated even if one fails; the first error is returned.
    pub fn apply_store(&mut self) -> EngineResult<()> {
        let mut first_error = None;
        for voice in &mut self.voices {
            if let Err(e) = voice.apply(&self.store.params(voice.id())) {
                log::error!("{}: applying parameters failed: {}", voice.id(), e);
                first_error.get_or_insert(e);
            }
        }
        self.apply_audibility();
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Swap in a new store (e.g. one loaded from disk) and apply it
    pub fn replace_store(&mut self, store: ParameterStore) -> EngineResult<()> {
        self.store = store;
        self.apply_store()
    }

    /// Session playhead; the first voice with audio is the clock
    pub fn position(&self) -> f64 {
        self.voices
            .iter()
            .find(|v| v.is_loaded())
            .or_else(|| self.voices.first())
            .map_or(0.0, |v| v.position())
    }

    /// Largest processing latency across the session's chains, in frames
    pub fn latency_frames(&self) -> u32 {
        self.compensator.global_latency()
    }

    /// Longest voice duration
    pub fn duration(&self) -> f64 {
        self.voices.iter().map(|v| v.duration()).fold(0.0, f64::max)
    }

    /// Whether the session is playing
    ///
    /// Cleared by `stop_all`, or once every voice has run out.
    pub fn is_playing(&self) -> bool {
        self.is_playing
            && self
                .voices
                .iter()
                .any(|v| v.state() == VoiceState::Playing)
    }

    /// Engine time of the last `play_all`, while playing
    pub fn start_timestamp(&self) -> Option<f64> {
        if self.is_playing() {
            self.start_timestamp
        } else {
            None
        }
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }
}

impl Drop for MixSession {
    fn drop(&mut self) {
        for voice in &mut self.voices {
            voice.dispose();
        }
    }
}
