//! Track voice - one decoded source, its signal chain and its transport
//!
//! # State machine
//!
//! ```text
//! Unloaded → Loading → Ready ⇄ Playing → Stopped
//!                        ↑                  │
//!                        └──────────────────┘ (Stopped plays like Ready)
//! ```
//!
//! A failed load still ends in `Ready`: the voice is playable but silent, so
//! one broken stem never holds up a session. A non-looping source that runs
//! out returns the voice to `Ready` on its own.
//!
//! # Varispeed and pitch
//!
//! The source plays `playback_rate` times faster, which also raises its pitch
//! by `12·log2(rate)` semitones. The pitch stage cancels that, so the applied
//! shift is always `user_pitch − 12·log2(rate)`.

use std::sync::Arc;

use basedrop::Shared;
use tokio::sync::watch;

use crate::chain::SignalChain;
use crate::effect::EffectKind;
use crate::engine::gc::gc_handle;
use crate::engine::{EngineHandle, GraphEdit, NodeId, NodeSpec, SourceAtomics};
use crate::error::{EngineResult, LoadError, LoadResult};
use crate::latency::LatencyCompensator;
use crate::loader::{load_source, SourceLoader};
use crate::params::{
    clamp_or, TrackParams, MAX_PLAYBACK_RATE, MAX_VOLUME, MIN_PLAYBACK_RATE, USER_PITCH_RANGE,
};
use crate::types::{AudioBuffer, TrackId};

/// Transport state of a voice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    /// No source requested yet
    Unloaded,
    /// Decode in progress; play is ignored
    Loading,
    /// Playable (possibly silent after a failed load)
    Ready,
    Playing,
    /// Stopped by the user; playable like `Ready`
    Stopped,
}

/// Semitones the pitch stage must add to cancel a varispeed rate
pub fn pitch_compensation(playback_rate: f32) -> f32 {
    -12.0 * playback_rate.log2()
}

struct LoadedSource {
    node: NodeId,
    atomics: Arc<SourceAtomics>,
    duration: f64,
}

/// Transport to put back after a bounce
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TransportSnapshot {
    pub playing: bool,
    pub position: f64,
    pub looping: bool,
}

/// One playable track
pub struct TrackVoice {
    id: TrackId,
    engine: EngineHandle,
    chain: SignalChain,
    source: Option<LoadedSource>,
    state: VoiceState,
    playback_rate: f32,
    user_pitch: f32,
    looping: bool,
    volume: f32,
    muted: bool,
    solo: bool,
    audible: bool,
    /// Reported position while not playing; the next start begins here
    rest_position: f64,
    recording: bool,
    /// Bumped on every user stop, so an in-flight bounce can cancel
    stops: watch::Sender<u64>,
}

impl TrackVoice {
    /// Create an unloaded voice with a default chain
    pub fn new(id: TrackId, engine: EngineHandle) -> EngineResult<Self> {
        let chain = SignalChain::new(engine.clone())?;
        Ok(Self::with_chain(id, engine, chain))
    }

    /// Create an unloaded voice whose chain is latency-aligned with the
    /// other chains in `compensator`
    pub fn with_compensator(
        id: TrackId,
        engine: EngineHandle,
        compensator: &Arc<LatencyCompensator>,
    ) -> EngineResult<Self> {
        let chain = SignalChain::with_compensator(engine.clone(), compensator)?;
        Ok(Self::with_chain(id, engine, chain))
    }

    fn with_chain(id: TrackId, engine: EngineHandle, chain: SignalChain) -> Self {
        let (stops, _) = watch::channel(0);

        Self {
            id,
            engine,
            chain,
            source: None,
            state: VoiceState::Unloaded,
            playback_rate: 1.0,
            user_pitch: 0.0,
            looping: false,
            volume: 1.0,
            muted: false,
            solo: false,
            audible: true,
            rest_position: 0.0,
            recording: false,
            stops,
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    // ─────────────────────────────────────────────────────────────────────
    // Loading
    // ─────────────────────────────────────────────────────────────────────

    /// Mark the voice as loading; returns false if it already has a source
    pub fn begin_load(&mut self) -> bool {
        match self.state {
            VoiceState::Unloaded => {
                self.state = VoiceState::Loading;
                true
            }
            VoiceState::Loading => true,
            _ => {
                log::warn!("{}: already loaded, ignoring new load", self.id);
                false
            }
        }
    }

    /// Complete a load with the decoded buffer or the load error
    ///
    /// Either way the voice ends up `Ready`. The error, if any, is returned
    /// here and nowhere else.
    pub fn finish_load(&mut self, url: &str, result: LoadResult<AudioBuffer>) -> LoadResult<()> {
        if self.source.is_some() {
            log::warn!("{}: already loaded, dropping result for {}", self.id, url);
            return Ok(());
        }

        let buffer = match result {
            Ok(buffer) => buffer,
            Err(e) => return self.fail_load(e),
        };

        let duration = buffer.duration_secs();
        let atomics = Arc::new(SourceAtomics::new());
        let spec = NodeSpec::Source {
            buffer: Shared::new(&gc_handle(), buffer),
            atomics: atomics.clone(),
        };
        let engine_err = |e: crate::error::EngineError| LoadError::Engine {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let node = match self.engine.create_node(spec) {
            Ok(node) => node,
            Err(e) => return self.fail_load(engine_err(e)),
        };
        let wired = self.chain.attach_source(node).and_then(|_| {
            self.engine.submit(vec![
                GraphEdit::SetRate {
                    node,
                    rate: self.playback_rate as f64,
                },
                GraphEdit::SetLoop {
                    node,
                    looping: self.looping,
                },
            ])
        });
        if let Err(e) = wired {
            if let Err(detach) = self.chain.detach_source() {
                log::warn!("{}: failed to detach source: {}", self.id, detach);
            }
            if let Err(release) = self.engine.release_node(node) {
                log::warn!("{}: failed to release source: {}", self.id, release);
            }
            return self.fail_load(engine_err(e));
        }

        self.source = Some(LoadedSource {
            node,
            atomics,
            duration,
        });
        self.state = VoiceState::Ready;
        log::info!("{}: ready ({:.2}s)", self.id, duration);
        Ok(())
    }

    fn fail_load(&mut self, error: LoadError) -> LoadResult<()> {
        log::warn!("{}: {}; voice will be silent", self.id, error);
        self.state = VoiceState::Ready;
        Err(error)
    }

    /// Fetch, decode and attach a source
    pub async fn load(&mut self, loader: Arc<dyn SourceLoader>, url: &str) -> LoadResult<()> {
        self.begin_load();
        let result = load_source(loader, url).await;
        self.finish_load(url, result)
    }

    /// Whether a decoded source is attached
    pub fn is_loaded(&self) -> bool {
        self.source.is_some()
    }

    /// Ready but without audio (load failed)
    pub fn is_silent(&self) -> bool {
        self.source.is_none() && !matches!(self.state, VoiceState::Unloaded | VoiceState::Loading)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Transport
    // ─────────────────────────────────────────────────────────────────────

    fn has_ended(&self) -> bool {
        self.source.as_ref().map_or(true, |s| s.atomics.has_ended())
    }

    /// Current state, with a natural end reported as `Ready`
    pub fn state(&self) -> VoiceState {
        if self.state == VoiceState::Playing && self.has_ended() {
            VoiceState::Ready
        } else {
            self.state
        }
    }

    /// Fold a natural end into the stored state
    fn sync(&mut self) {
        if self.state == VoiceState::Playing && self.has_ended() {
            self.state = VoiceState::Ready;
            self.rest_position = 0.0;
        }
    }

    /// Start now; ignored unless `Ready` or `Stopped`
    pub fn play(&mut self) -> EngineResult<()> {
        let now = self.engine.current_time();
        self.play_at(now)
    }

    /// Start at engine time `at` (seconds), sample-exact
    pub fn play_at(&mut self, at: f64) -> EngineResult<()> {
        self.sync();
        if !matches!(self.state, VoiceState::Ready | VoiceState::Stopped) {
            log::debug!("{}: play ignored in {:?}", self.id, self.state);
            return Ok(());
        }

        let Some(source) = &self.source else {
            // Silent voice: goes through the motions without audio
            self.state = VoiceState::Playing;
            return Ok(());
        };

        let node = source.node;
        let offset = self.rest_position;
        let mut edits = vec![
            GraphEdit::SetRate {
                node,
                rate: self.playback_rate as f64,
            },
            GraphEdit::SetLoop {
                node,
                looping: self.looping,
            },
            GraphEdit::Start { node, at, offset },
        ];
        if let Some(envelope) = self.chain.active_envelope() {
            edits.push(GraphEdit::Trigger { node: envelope, at });
        }
        edits.extend(self.envelope_release(at, offset));

        source.atomics.clear_ended();
        source.atomics.set_position(offset);
        self.engine.submit(edits)?;

        self.state = VoiceState::Playing;
        self.rest_position = 0.0;
        log::debug!("{}: playing at {:.3}s from {:.3}s", self.id, at, offset);
        Ok(())
    }

    /// Release event that ends the envelope together with the source
    ///
    /// `offset` is the source position at engine time `at`. The renderer
    /// replaces any pending release for the envelope with this one.
    fn envelope_release(&self, at: f64, offset: f64) -> Option<GraphEdit> {
        if self.looping {
            return None;
        }
        let node = self.chain.active_envelope()?;
        let release = self
            .chain
            .effect(EffectKind::Envelope)
            .and_then(|unit| unit.param("release"))? as f64;
        let remaining = (self.duration() - offset).max(0.0) / self.playback_rate as f64;
        Some(GraphEdit::Release {
            node,
            at: (at + remaining - release).max(at),
        })
    }

    /// Stop and rewind to 0
    pub fn stop(&mut self) -> EngineResult<()> {
        self.sync();
        let was_playing = self.state == VoiceState::Playing;

        let result = match (&self.source, was_playing) {
            (Some(source), true) => self.engine.submit(vec![GraphEdit::Stop { node: source.node }]),
            _ => Ok(()),
        };

        if let Some(source) = &self.source {
            source.atomics.set_position(0.0);
        }
        self.rest_position = 0.0;
        if was_playing {
            self.state = VoiceState::Stopped;
            self.stops.send_modify(|count| *count += 1);
            log::debug!("{}: stopped", self.id);
        }
        result
    }

    /// Move the playhead, clamped to `[0, duration]`
    ///
    /// While playing, the source restarts at the new offset in one batch and
    /// the voice stays `Playing`. Returns the applied position.
    pub fn seek(&mut self, secs: f64) -> EngineResult<f64> {
        self.sync();
        let target = if secs.is_nan() {
            0.0
        } else {
            secs.clamp(0.0, self.duration())
        };

        match &self.source {
            Some(source) if self.state == VoiceState::Playing => {
                let at = self.engine.current_time();
                let mut edits = vec![
                    GraphEdit::Stop { node: source.node },
                    GraphEdit::Start {
                        node: source.node,
                        at,
                        offset: target,
                    },
                ];
                edits.extend(self.envelope_release(at, target));
                source.atomics.clear_ended();
                source.atomics.set_position(target);
                self.engine.submit(edits)?;
            }
            Some(source) => {
                source.atomics.set_position(target);
                self.rest_position = target;
            }
            None => {}
        }
        Ok(target)
    }

    /// Playhead in seconds of source time
    pub fn position(&self) -> f64 {
        match &self.source {
            Some(source) if self.state() == VoiceState::Playing => source.atomics.position(),
            _ => self.rest_position,
        }
    }

    /// Source length in seconds (0 until loaded)
    pub fn duration(&self) -> f64 {
        self.source.as_ref().map_or(0.0, |s| s.duration)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Parameters
    // ─────────────────────────────────────────────────────────────────────

    fn submit_logged(&self, edits: Vec<GraphEdit>) {
        if let Err(e) = self.engine.submit(edits) {
            log::error!("{}: {}", self.id, e);
        }
    }

    /// Set the varispeed rate (0.25-2.0); returns the applied rate
    pub fn set_playback_rate(&mut self, rate: f32) -> f32 {
        self.playback_rate = clamp_or(rate, MIN_PLAYBACK_RATE, MAX_PLAYBACK_RATE, 1.0);
        if let Some(source) = &self.source {
            let mut edits = vec![GraphEdit::SetRate {
                node: source.node,
                rate: self.playback_rate as f64,
            }];
            // The remaining play time changed, so the release moves with it
            if self.state() == VoiceState::Playing {
                let at = self.engine.current_time();
                edits.extend(self.envelope_release(at, source.atomics.position()));
            }
            self.submit_logged(edits);
        }
        self.update_pitch();
        self.playback_rate
    }

    /// Set the user pitch (±12 semitones); returns the applied user pitch
    pub fn set_pitch(&mut self, semitones: f32) -> f32 {
        self.user_pitch = clamp_or(semitones, -USER_PITCH_RANGE, USER_PITCH_RANGE, 0.0);
        self.update_pitch();
        self.user_pitch
    }

    fn update_pitch(&mut self) {
        let target = self.user_pitch + pitch_compensation(self.playback_rate);
        self.chain.set_pitch(target);
    }

    pub fn set_loop(&mut self, looping: bool) {
        self.looping = looping;
        if let Some(source) = &self.source {
            self.submit_logged(vec![GraphEdit::SetLoop {
                node: source.node,
                looping,
            }]);
        }
    }

    /// Set the linear volume (0-2); returns the applied volume
    pub fn set_volume(&mut self, volume: f32) -> f32 {
        self.volume = clamp_or(volume, 0.0, MAX_VOLUME, 1.0);
        self.push_fader();
        self.volume
    }

    /// Set the output pan (-1..1); returns the applied pan
    pub fn set_pan(&mut self, pan: f32) -> f32 {
        self.chain.set_pan(pan)
    }

    /// Make the voice heard or silent through its fader; transport is untouched
    pub fn set_audible(&mut self, audible: bool) {
        self.audible = audible;
        self.push_fader();
    }

    fn push_fader(&mut self) {
        let gain = if self.audible { self.volume } else { 0.0 };
        self.chain.set_output_gain(gain);
    }

    /// Set the mute flag; audibility is recomputed by the owning session
    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    /// Set the solo flag; audibility is recomputed by the owning session
    pub fn set_solo(&mut self, solo: bool) {
        self.solo = solo;
    }

    /// Bring the voice in line with stored parameters
    ///
    /// Effect toggles are applied with a single chain rebuild. Mute and solo
    /// are stored but audibility is left to the session.
    pub fn apply(&mut self, params: &TrackParams) -> EngineResult<()> {
        self.set_playback_rate(params.playback_rate);
        self.set_pitch(params.pitch);
        if params.looping != self.looping {
            self.set_loop(params.looping);
        }
        self.set_volume(params.volume);
        self.set_pan(params.pan);
        self.muted = params.muted;
        self.solo = params.solo;

        let gains = params.mastering_gains();
        self.chain.set_mastering_gains(gains.low, gains.mid, gains.high);

        for kind in EffectKind::OPTIONAL {
            for info in kind.params() {
                let value = params.effect_param(kind, info.name).unwrap_or(info.default);
                self.chain.set_effect_param(kind, info.name, value);
            }
        }
        self.chain.set_effects_enabled(
            EffectKind::OPTIONAL.map(|kind| (kind, params.effect_enabled(kind))),
        )?;
        Ok(())
    }

    pub fn playback_rate(&self) -> f32 {
        self.playback_rate
    }

    /// User pitch, before compensation
    pub fn user_pitch(&self) -> f32 {
        self.user_pitch
    }

    /// Shift the pitch stage currently applies
    pub fn applied_pitch(&self) -> f32 {
        self.chain.pitch()
    }

    pub fn looping(&self) -> bool {
        self.looping
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn is_solo(&self) -> bool {
        self.solo
    }

    pub fn is_audible(&self) -> bool {
        self.audible
    }

    pub fn chain(&self) -> &SignalChain {
        &self.chain
    }

    pub fn chain_mut(&mut self) -> &mut SignalChain {
        &mut self.chain
    }

    // ─────────────────────────────────────────────────────────────────────
    // Bounce support
    // ─────────────────────────────────────────────────────────────────────

    /// Whether a bounce of this voice is running
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub(crate) fn set_recording(&mut self, recording: bool) {
        self.recording = recording;
    }

    pub(crate) fn stop_events(&self) -> watch::Receiver<u64> {
        self.stops.subscribe()
    }

    pub(crate) fn snapshot(&self) -> TransportSnapshot {
        TransportSnapshot {
            playing: self.state() == VoiceState::Playing,
            position: self.position(),
            looping: self.looping,
        }
    }

    /// Put back the loop flag, play state and position of a snapshot
    pub(crate) fn restore(&mut self, snapshot: TransportSnapshot) -> EngineResult<()> {
        self.sync();
        if self.state == VoiceState::Playing {
            self.stop()?;
        }
        self.set_loop(snapshot.looping);
        self.seek(snapshot.position)?;
        if snapshot.playing {
            self.play()?;
        }
        Ok(())
    }

    /// Stop and release every engine resource (idempotent)
    pub fn dispose(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("{}: stop on dispose failed: {}", self.id, e);
        }
        self.chain.dispose();
        if let Some(source) = self.source.take() {
            if let Err(e) = self.engine.release_node(source.node) {
                log::warn!("{}: failed to release source: {}", self.id, e);
            }
        }
    }
}

impl Drop for TrackVoice {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for TrackVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackVoice")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("playback_rate", &self.playback_rate)
            .field("user_pitch", &self.user_pitch)
            .field("looping", &self.looping)
            .field("muted", &self.muted)
            .field("solo", &self.solo)
            .field("audible", &self.audible)
            .finish()
    }
}
