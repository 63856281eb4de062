//! Per-track parameter state
//!
//! The [`ParameterStore`] is the single source of truth for what the UI shows.
//! Gestures write to it, then the owning voice is brought in line with
//! [`TrackVoice::apply`](crate::voice::TrackVoice::apply). Every setter clamps
//! and returns the stored value, so displayed and applied values agree.
//! Writes are plain field assignments: last write wins, reads see it at once.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::{load_config, save_config};
use crate::effect::EffectKind;
use crate::mastering::{EqGains, MasteringPreset, PresetSelection};
use crate::types::TrackId;

/// Slowest playback rate
pub const MIN_PLAYBACK_RATE: f32 = 0.25;
/// Fastest playback rate
pub const MAX_PLAYBACK_RATE: f32 = 2.0;
/// User pitch limit in semitones (either direction)
pub const USER_PITCH_RANGE: f32 = 12.0;
/// Maximum linear volume
pub const MAX_VOLUME: f32 = 2.0;

/// Clamp into `[min, max]`, mapping NaN to `fallback`
pub(crate) fn clamp_or(value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if value.is_nan() {
        fallback
    } else {
        value.clamp(min, max)
    }
}

/// Stored state of one optional effect
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectSettings {
    pub enabled: bool,
    /// Parameter values by name; missing names use the kind's default
    pub params: BTreeMap<String, f32>,
}

/// Everything the user can change about one track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackParams {
    pub playback_rate: f32,
    /// User pitch shift in semitones, before varispeed compensation
    pub pitch: f32,
    pub volume: f32,
    pub pan: f32,
    pub looping: bool,
    pub muted: bool,
    pub solo: bool,
    pub presets: PresetSelection,
    pub effects: BTreeMap<EffectKind, EffectSettings>,
}

impl Default for TrackParams {
    fn default() -> Self {
        Self {
            playback_rate: 1.0,
            pitch: 0.0,
            volume: 1.0,
            pan: 0.0,
            looping: false,
            muted: false,
            solo: false,
            presets: PresetSelection::new(),
            effects: BTreeMap::new(),
        }
    }
}

impl TrackParams {
    pub fn set_playback_rate(&mut self, rate: f32) -> f32 {
        self.playback_rate = clamp_or(rate, MIN_PLAYBACK_RATE, MAX_PLAYBACK_RATE, 1.0);
        self.playback_rate
    }

    pub fn set_pitch(&mut self, semitones: f32) -> f32 {
        self.pitch = clamp_or(semitones, -USER_PITCH_RANGE, USER_PITCH_RANGE, 0.0);
        self.pitch
    }

    pub fn set_volume(&mut self, volume: f32) -> f32 {
        self.volume = clamp_or(volume, 0.0, MAX_VOLUME, 1.0);
        self.volume
    }

    pub fn set_pan(&mut self, pan: f32) -> f32 {
        self.pan = clamp_or(pan, -1.0, 1.0, 0.0);
        self.pan
    }

    /// Mastering EQ gains implied by the preset selection
    pub fn mastering_gains(&self) -> EqGains {
        self.presets.gains()
    }

    pub fn effect_enabled(&self, kind: EffectKind) -> bool {
        self.effects.get(&kind).is_some_and(|e| e.enabled)
    }

    /// Enable or disable an optional effect; always-on stages are ignored
    pub fn set_effect_enabled(&mut self, kind: EffectKind, enabled: bool) -> bool {
        if !kind.is_optional() {
            log::warn!("{} is always on and cannot be toggled", kind.name());
            return false;
        }
        self.effects.entry(kind).or_default().enabled = enabled;
        enabled
    }

    /// Stored value of an effect parameter, or its default
    pub fn effect_param(&self, kind: EffectKind, name: &str) -> Option<f32> {
        let index = kind.param_index(name)?;
        let stored = self
            .effects
            .get(&kind)
            .and_then(|e| e.params.get(name).copied());
        Some(stored.unwrap_or(kind.params()[index].default))
    }

    /// Store an effect parameter; returns the clamped value, `None` if unknown
    pub fn set_effect_param(&mut self, kind: EffectKind, name: &str, value: f32) -> Option<f32> {
        let Some(index) = kind.param_index(name) else {
            log::warn!("{}: unknown parameter '{}'", kind.name(), name);
            return None;
        };
        let applied = kind.params()[index].clamp(value);
        self.effects
            .entry(kind)
            .or_default()
            .params
            .insert(name.to_string(), applied);
        Some(applied)
    }
}

/// Parameter state for every track, keyed by id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterStore {
    tracks: BTreeMap<TrackId, TrackParams>,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored params, if the track has any
    pub fn get(&self, id: TrackId) -> Option<&TrackParams> {
        self.tracks.get(&id)
    }

    /// Stored params or defaults
    pub fn params(&self, id: TrackId) -> TrackParams {
        self.tracks.get(&id).cloned().unwrap_or_default()
    }

    /// Mutable params, created with defaults on first access
    pub fn track_mut(&mut self, id: TrackId) -> &mut TrackParams {
        self.tracks.entry(id).or_default()
    }

    pub fn remove(&mut self, id: TrackId) -> Option<TrackParams> {
        self.tracks.remove(&id)
    }

    pub fn track_ids(&self) -> impl Iterator<Item = TrackId> + '_ {
        self.tracks.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn set_playback_rate(&mut self, id: TrackId, rate: f32) -> f32 {
        self.track_mut(id).set_playback_rate(rate)
    }

    pub fn set_pitch(&mut self, id: TrackId, semitones: f32) -> f32 {
        self.track_mut(id).set_pitch(semitones)
    }

    pub fn set_volume(&mut self, id: TrackId, volume: f32) -> f32 {
        self.track_mut(id).set_volume(volume)
    }

    pub fn set_pan(&mut self, id: TrackId, pan: f32) -> f32 {
        self.track_mut(id).set_pan(pan)
    }

    pub fn set_looping(&mut self, id: TrackId, looping: bool) {
        self.track_mut(id).looping = looping;
    }

    pub fn set_muted(&mut self, id: TrackId, muted: bool) {
        self.track_mut(id).muted = muted;
    }

    pub fn set_solo(&mut self, id: TrackId, solo: bool) {
        self.track_mut(id).solo = solo;
    }

    /// Flip a preset; returns whether it is now selected
    pub fn toggle_preset(&mut self, id: TrackId, preset: MasteringPreset) -> bool {
        self.track_mut(id).presets.toggle(preset)
    }

    pub fn set_effect_enabled(&mut self, id: TrackId, kind: EffectKind, enabled: bool) -> bool {
        self.track_mut(id).set_effect_enabled(kind, enabled)
    }

    pub fn set_effect_param(&mut self, id: TrackId, kind: EffectKind, name: &str, value: f32) -> Option<f32> {
        self.track_mut(id).set_effect_param(kind, name, value)
    }

    /// Load a YAML snapshot; missing or invalid files give an empty store
    pub fn load(path: &Path) -> Self {
        load_config(path)
    }

    /// Save a YAML snapshot
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        save_config(self, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: TrackId = TrackId(1);
    const B: TrackId = TrackId(2);

    #[test]
    fn test_reads_reflect_last_write() {
        let mut store = ParameterStore::new();
        store.set_volume(A, 0.5);
        store.set_volume(A, 0.7);
        store.set_pitch(B, 3.0);

        assert_eq!(store.params(A).volume, 0.7);
        assert_eq!(store.params(A).pitch, 0.0);
        assert_eq!(store.params(B).pitch, 3.0);
    }

    #[test]
    fn test_setters_clamp() {
        let mut store = ParameterStore::new();
        assert_eq!(store.set_playback_rate(A, 5.0), MAX_PLAYBACK_RATE);
        assert_eq!(store.set_playback_rate(A, 0.0), MIN_PLAYBACK_RATE);
        assert_eq!(store.set_playback_rate(A, f32::NAN), 1.0);
        assert_eq!(store.set_pitch(A, -20.0), -USER_PITCH_RANGE);
        assert_eq!(store.set_volume(A, 3.0), MAX_VOLUME);
        assert_eq!(store.set_pan(A, -2.0), -1.0);
        assert_eq!(
            store.set_effect_param(A, EffectKind::Delay, "feedback", 1.0),
            Some(crate::effect::MAX_DELAY_FEEDBACK)
        );
    }

    #[test]
    fn test_effect_params_default_until_written() {
        let mut store = ParameterStore::new();
        let params = store.track_mut(A);
        assert_eq!(params.effect_param(EffectKind::Reverb, "decay"), Some(2.5));
        assert_eq!(params.effect_param(EffectKind::Reverb, "size"), None);

        params.set_effect_param(EffectKind::Reverb, "decay", 4.0);
        assert_eq!(params.effect_param(EffectKind::Reverb, "decay"), Some(4.0));
        assert!(!params.effect_enabled(EffectKind::Reverb));
    }

    #[test]
    fn test_always_on_stages_cannot_be_toggled() {
        let mut store = ParameterStore::new();
        assert!(!store.set_effect_enabled(A, EffectKind::Eq3, true));
        assert!(store.params(A).effects.is_empty());
    }

    #[test]
    fn test_toggle_preset_updates_gains() {
        let mut store = ParameterStore::new();
        assert!(store.toggle_preset(A, MasteringPreset::Warm));
        assert_eq!(store.params(A).mastering_gains(), MasteringPreset::Warm.gains());
        assert!(!store.toggle_preset(A, MasteringPreset::Warm));
        assert_eq!(store.params(A).mastering_gains(), EqGains::FLAT);
    }

    #[test]
    fn test_snapshot_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.yaml");

        let mut store = ParameterStore::new();
        store.set_playback_rate(A, 1.5);
        store.set_solo(B, true);
        store.toggle_preset(A, MasteringPreset::Airy);
        store.set_effect_enabled(A, EffectKind::Chorus, true);
        store.set_effect_param(A, EffectKind::Chorus, "depth", 0.9);

        store.save(&path).unwrap();
        assert_eq!(ParameterStore::load(&path), store);
    }
}
