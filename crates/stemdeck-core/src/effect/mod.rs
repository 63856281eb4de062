//! Effect system - kinds, parameter ranges, processors and controller-side units
//!
//! Every effect exists twice:
//! - An [`EffectUnit`] on the controller side, which owns the parameter values
//!   the UI displays and pushes changes to the engine
//! - A [`Processor`] on the render thread (see [`native`]), which does the DSP
//!
//! Parameters are stored in natural units (seconds, dB, Hz). Out-of-range
//! values are clamped before they are stored, so the displayed value and the
//! applied value never differ.

pub mod native;

use serde::{Deserialize, Serialize};

use crate::engine::{EngineHandle, GraphEdit, NodeId, NodeSpec};
use crate::error::EngineResult;
use crate::types::StereoBuffer;

/// Upper bound for delay feedback (exclusive 0.95 in the public range)
pub const MAX_DELAY_FEEDBACK: f32 = 0.949;

/// Range limits of the applied pitch-shift value in semitones
///
/// The user pitch is limited to one octave, but the applied value also
/// carries varispeed compensation (up to +24 at 0.25x).
pub const PITCH_SHIFT_RANGE: f32 = 36.0;

/// Longest latency difference a compensation delay can absorb (seconds)
pub const MAX_COMPENSATION_SECONDS: f32 = 0.5;

/// Kinds of effect units
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EffectKind {
    /// Output gain and pan
    Gain,
    /// 3-band mastering equalizer
    Eq3,
    /// Pitch shift in semitones
    PitchShift,
    Reverb,
    Delay,
    Distortion,
    Chorus,
    /// Amplitude envelope (ADSR)
    Envelope,
    /// Delay aligning a chain with the slowest chain on the engine
    Compensation,
}

/// Information about an effect parameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamInfo {
    /// Parameter name used by `set_param`
    pub name: &'static str,
    /// Default value
    pub default: f32,
    /// Minimum value
    pub min: f32,
    /// Maximum value
    pub max: f32,
    /// Unit label (e.g., "s", "dB", "Hz")
    pub unit: &'static str,
}

impl ParamInfo {
    const fn new(name: &'static str, default: f32, min: f32, max: f32, unit: &'static str) -> Self {
        Self {
            name,
            default,
            min,
            max,
            unit,
        }
    }

    /// Clamp a value into this parameter's range
    ///
    /// NaN is replaced by the default.
    pub fn clamp(&self, value: f32) -> f32 {
        if value.is_nan() {
            self.default
        } else {
            value.clamp(self.min, self.max)
        }
    }
}

const GAIN_PARAMS: [ParamInfo; 2] = [
    ParamInfo::new("gain", 1.0, 0.0, 2.0, "x"),
    ParamInfo::new("pan", 0.0, -1.0, 1.0, ""),
];

const EQ3_PARAMS: [ParamInfo; 3] = [
    ParamInfo::new("low", 0.0, -20.0, 20.0, "dB"),
    ParamInfo::new("mid", 0.0, -20.0, 20.0, "dB"),
    ParamInfo::new("high", 0.0, -20.0, 20.0, "dB"),
];

const PITCH_PARAMS: [ParamInfo; 1] = [ParamInfo::new(
    "semitones",
    0.0,
    -PITCH_SHIFT_RANGE,
    PITCH_SHIFT_RANGE,
    "st",
)];

const REVERB_PARAMS: [ParamInfo; 2] = [
    ParamInfo::new("decay", 2.5, 0.1, 10.0, "s"),
    ParamInfo::new("wet", 0.35, 0.0, 1.0, ""),
];

const DELAY_PARAMS: [ParamInfo; 3] = [
    ParamInfo::new("time", 0.25, 0.01, 2.0, "s"),
    ParamInfo::new("feedback", 0.4, 0.0, MAX_DELAY_FEEDBACK, ""),
    ParamInfo::new("wet", 0.3, 0.0, 1.0, ""),
];

const DISTORTION_PARAMS: [ParamInfo; 2] = [
    ParamInfo::new("drive", 0.4, 0.0, 1.0, ""),
    ParamInfo::new("wet", 0.5, 0.0, 1.0, ""),
];

const CHORUS_PARAMS: [ParamInfo; 3] = [
    ParamInfo::new("rate", 1.5, 0.1, 10.0, "Hz"),
    ParamInfo::new("depth", 0.5, 0.0, 1.0, ""),
    ParamInfo::new("wet", 0.5, 0.0, 1.0, ""),
];

const ENVELOPE_PARAMS: [ParamInfo; 5] = [
    ParamInfo::new("attack", 0.1, 0.001, 10.0, "s"),
    ParamInfo::new("decay", 0.2, 0.001, 10.0, "s"),
    ParamInfo::new("sustain", 0.8, 0.0, 1.0, ""),
    ParamInfo::new("release", 1.0, 0.001, 10.0, "s"),
    ParamInfo::new("wet", 1.0, 0.0, 1.0, ""),
];

const COMPENSATION_PARAMS: [ParamInfo; 1] = [ParamInfo::new(
    "delay",
    0.0,
    0.0,
    MAX_COMPENSATION_SECONDS,
    "s",
)];

impl EffectKind {
    /// Optional effects, fanned out in parallel from the mastering EQ
    pub const OPTIONAL: [EffectKind; 5] = [
        EffectKind::Reverb,
        EffectKind::Delay,
        EffectKind::Distortion,
        EffectKind::Chorus,
        EffectKind::Envelope,
    ];

    /// Display name
    pub fn name(&self) -> &'static str {
        match self {
            EffectKind::Gain => "Gain",
            EffectKind::Eq3 => "EQ3",
            EffectKind::PitchShift => "Pitch Shift",
            EffectKind::Reverb => "Reverb",
            EffectKind::Delay => "Delay",
            EffectKind::Distortion => "Distortion",
            EffectKind::Chorus => "Chorus",
            EffectKind::Envelope => "Envelope",
            EffectKind::Compensation => "Latency Compensation",
        }
    }

    /// Parameter descriptions for this kind
    pub fn params(&self) -> &'static [ParamInfo] {
        match self {
            EffectKind::Gain => &GAIN_PARAMS,
            EffectKind::Eq3 => &EQ3_PARAMS,
            EffectKind::PitchShift => &PITCH_PARAMS,
            EffectKind::Reverb => &REVERB_PARAMS,
            EffectKind::Delay => &DELAY_PARAMS,
            EffectKind::Distortion => &DISTORTION_PARAMS,
            EffectKind::Chorus => &CHORUS_PARAMS,
            EffectKind::Envelope => &ENVELOPE_PARAMS,
            EffectKind::Compensation => &COMPENSATION_PARAMS,
        }
    }

    /// Index of a parameter by name
    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.params().iter().position(|p| p.name == name)
    }

    /// Default values for every parameter, in order
    pub fn default_values(&self) -> Vec<f32> {
        self.params().iter().map(|p| p.default).collect()
    }

    /// Whether this kind can be toggled on and off by the user
    pub fn is_optional(&self) -> bool {
        Self::OPTIONAL.contains(self)
    }
}

/// Render-side DSP for one effect unit
///
/// Implementations are owned by the render thread and must not allocate in
/// `process`. Parameter indices follow [`EffectKind::params`].
pub trait Processor: Send {
    /// Process a stereo buffer in-place
    fn process(&mut self, buffer: &mut StereoBuffer);

    /// Set a parameter by index (value already clamped by the controller)
    fn set_param(&mut self, index: usize, value: f32);

    /// Clear internal state (delay lines, filter memory, envelope stage)
    fn reset(&mut self);

    /// Start an envelope cycle (no-op for most effects)
    fn trigger(&mut self) {}

    /// Enter the release stage of an envelope (no-op for most effects)
    fn release(&mut self) {}

    /// Processing latency in samples
    fn latency_samples(&self) -> u32 {
        0
    }
}

/// Controller-side effect unit
///
/// Owns the parameter values and the engine node for one processing stage.
/// The engine node is released exactly once, on [`dispose`](Self::dispose)
/// or drop.
pub struct EffectUnit {
    kind: EffectKind,
    enabled: bool,
    values: Vec<f32>,
    node: Option<NodeId>,
    engine: EngineHandle,
}

impl EffectUnit {
    /// Create a unit with default parameters and allocate its engine node
    ///
    /// Optional effects start disabled; structural stages (gain, EQ, pitch)
    /// are always enabled.
    pub fn new(engine: EngineHandle, kind: EffectKind) -> EngineResult<Self> {
        let values = kind.default_values();
        let node = engine.create_node(NodeSpec::Effect {
            kind,
            values: values.clone(),
        })?;

        Ok(Self {
            kind,
            enabled: !kind.is_optional(),
            values,
            node: Some(node),
            engine,
        })
    }

    /// Effect kind
    pub fn kind(&self) -> EffectKind {
        self.kind
    }

    /// Engine node, or `None` once disposed
    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    /// Whether the unit is part of the signal path
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record the enabled flag
    ///
    /// The owning chain picks this up on its next rebuild.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Current value of a parameter by name
    pub fn param(&self, name: &str) -> Option<f32> {
        self.kind.param_index(name).map(|i| self.values[i])
    }

    /// All current parameter values, in [`EffectKind::params`] order
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Parameter names paired with their current values
    pub fn named_values(&self) -> impl Iterator<Item = (&'static str, f32)> + '_ {
        self.kind
            .params()
            .iter()
            .zip(self.values.iter())
            .map(|(info, value)| (info.name, *value))
    }

    /// Set a parameter by name, clamping into range
    ///
    /// Returns the applied value, or `None` for an unknown parameter.
    pub fn set_param(&mut self, name: &str, value: f32) -> Option<f32> {
        let Some(index) = self.kind.param_index(name) else {
            log::warn!("{}: unknown parameter '{}'", self.kind.name(), name);
            return None;
        };
        Some(self.set_param_index(index, value))
    }

    /// Set a parameter by index, clamping into range
    pub(crate) fn set_param_index(&mut self, index: usize, value: f32) -> f32 {
        let applied = self.kind.params()[index].clamp(value);
        if self.values[index] == applied {
            return applied;
        }
        self.values[index] = applied;

        if let Some(node) = self.node {
            if let Err(e) = self.engine.set_param(node, index, applied) {
                log::error!(
                    "{}: failed to push {}={}: {}",
                    self.kind.name(),
                    self.kind.params()[index].name,
                    applied,
                    e
                );
            }
        }
        applied
    }

    /// Clear the processor's internal state
    pub fn reset(&self) -> EngineResult<()> {
        match self.node {
            Some(node) => self.engine.submit(vec![GraphEdit::Reset { node }]),
            None => Ok(()),
        }
    }

    /// Release the engine node (idempotent)
    pub fn dispose(&mut self) {
        if let Some(node) = self.node.take() {
            if let Err(e) = self.engine.release_node(node) {
                log::warn!("{}: failed to release node {:?}: {}", self.kind.name(), node, e);
            }
        }
    }

    /// Whether the engine node has been released
    pub fn is_disposed(&self) -> bool {
        self.node.is_none()
    }
}

impl Drop for EffectUnit {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for EffectUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectUnit")
            .field("kind", &self.kind)
            .field("enabled", &self.enabled)
            .field("values", &self.values)
            .field("node", &self.node)
            .finish()
    }
}
