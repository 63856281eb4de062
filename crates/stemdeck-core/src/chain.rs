//! Per-track signal chain
//!
//! ```text
//!                                        ┌──────────── dry ────────────┐
//! source → pitch → compensation → eq3 ───┼→ reverb ───────────────────→├→ bus → [tap] → fader → out
//!                                        ├→ delay ────────────────────→┤
//!                                        └→ ... (each enabled effect) →┘
//! ```
//!
//! Optional effects are fed in parallel from the mastering EQ and summed with
//! the dry path, so their order does not matter and their wet mixes do not
//! compound. A disabled effect is disconnected; its unit and parameters stay
//! alive so re-enabling restores the same sound.
//!
//! The graph only changes through [`SignalChain::rebuild`], which disconnects
//! every node it owns and reconnects the whole chain in one edit batch. The
//! engine applies that batch between two render quanta, so no quantum ever
//! renders a half-built graph.
//!
//! The compensation stage is driven by the chain's [`LatencyCompensator`]
//! rather than by the user: whenever the pitch stage engages or bypasses the
//! stretcher, the chain reports its new latency and every chain in the group
//! gets its hold-back adjusted.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::effect::native::PitchShiftEffect;
use crate::effect::{EffectKind, EffectUnit};
use crate::engine::{EngineHandle, GraphEdit, NodeId, NodeSpec, DESTINATION};
use crate::error::EngineResult;
use crate::latency::{LatencyCompensator, LatencyMember};
use crate::mastering::EqGains;

/// Processing graph for one track
pub struct SignalChain {
    engine: EngineHandle,
    source: Option<NodeId>,
    pitch: EffectUnit,
    compensation: EffectUnit,
    eq: EffectUnit,
    effects: BTreeMap<EffectKind, EffectUnit>,
    bus: Option<NodeId>,
    tap: Option<NodeId>,
    fader: EffectUnit,
    /// Optional effects wired in by the last successful rebuild
    connected: BTreeSet<EffectKind>,
    /// Latency of the pitch stage while it shifts, in frames
    stretch_latency: u32,
    latency: Option<LatencyMember>,
}

impl SignalChain {
    /// Allocate a chain that compensates only against itself
    pub fn new(engine: EngineHandle) -> EngineResult<Self> {
        let compensator = LatencyCompensator::new(engine.clone());
        Self::with_compensator(engine, &compensator)
    }

    /// Allocate every stage, join `compensator` and wire the (sourceless)
    /// chain to the output
    pub fn with_compensator(
        engine: EngineHandle,
        compensator: &Arc<LatencyCompensator>,
    ) -> EngineResult<Self> {
        let pitch = EffectUnit::new(engine.clone(), EffectKind::PitchShift)?;
        let compensation = EffectUnit::new(engine.clone(), EffectKind::Compensation)?;
        let eq = EffectUnit::new(engine.clone(), EffectKind::Eq3)?;
        let effects = EffectKind::OPTIONAL
            .into_iter()
            .map(|kind| EffectUnit::new(engine.clone(), kind).map(|unit| (kind, unit)))
            .collect::<EngineResult<BTreeMap<_, _>>>()?;
        let bus = engine.create_node(NodeSpec::Bus)?;
        let fader = EffectUnit::new(engine.clone(), EffectKind::Gain)?;
        let stretch_latency = PitchShiftEffect::engaged_latency(engine.sample_rate());

        let mut chain = Self {
            engine,
            source: None,
            pitch,
            latency: compensation.node().map(|node| compensator.join(node)),
            compensation,
            eq,
            effects,
            bus: Some(bus),
            tap: None,
            fader,
            connected: BTreeSet::new(),
            stretch_latency,
        };
        chain.rebuild()?;
        Ok(chain)
    }

    /// Disconnect and reconnect the whole chain as one atomic batch
    ///
    /// Effects that were disconnected before and are enabled now get their
    /// processor state cleared in the same batch, so no stale tail plays.
    pub fn rebuild(&mut self) -> EngineResult<()> {
        self.rebuild_detaching(None)
    }

    /// Rebuild, also cutting the outputs of a node that just left the chain
    fn rebuild_detaching(&mut self, detached: Option<NodeId>) -> EngineResult<()> {
        let (Some(bus), Some(pitch), Some(compensation), Some(eq), Some(fader)) = (
            self.bus,
            self.pitch.node(),
            self.compensation.node(),
            self.eq.node(),
            self.fader.node(),
        ) else {
            log::debug!("rebuild on a disposed chain ignored");
            return Ok(());
        };

        let enabled: Vec<(EffectKind, NodeId)> = self
            .effects
            .iter()
            .filter(|(_, unit)| unit.is_enabled())
            .filter_map(|(kind, unit)| unit.node().map(|node| (*kind, node)))
            .collect();

        let mut edits = Vec::new();

        let owned = self
            .source
            .into_iter()
            .chain([pitch, compensation, eq])
            .chain(self.effects.values().filter_map(EffectUnit::node))
            .chain([bus])
            .chain(self.tap)
            .chain([fader])
            .chain(detached);
        edits.extend(owned.map(|node| GraphEdit::DisconnectAll { node }));

        for (kind, node) in &enabled {
            if !self.connected.contains(kind) {
                edits.push(GraphEdit::Reset { node: *node });
            }
        }

        if let Some(source) = self.source {
            edits.push(GraphEdit::Connect { from: source, to: pitch });
        }
        edits.push(GraphEdit::Connect { from: pitch, to: compensation });
        edits.push(GraphEdit::Connect { from: compensation, to: eq });
        edits.push(GraphEdit::Connect { from: eq, to: bus });
        for (_, node) in &enabled {
            edits.push(GraphEdit::Connect { from: eq, to: *node });
            edits.push(GraphEdit::Connect { from: *node, to: bus });
        }
        match self.tap {
            Some(tap) => {
                edits.push(GraphEdit::Connect { from: bus, to: tap });
                edits.push(GraphEdit::Connect { from: tap, to: fader });
            }
            None => edits.push(GraphEdit::Connect { from: bus, to: fader }),
        }
        edits.push(GraphEdit::Connect { from: fader, to: DESTINATION });

        self.engine.submit(edits)?;

        self.connected = enabled.iter().map(|(kind, _)| *kind).collect();
        log::debug!(
            "Chain rebuilt: {} effect(s) enabled, tap {}",
            self.connected.len(),
            if self.tap.is_some() { "attached" } else { "detached" }
        );
        Ok(())
    }

    /// Enable or disable an optional effect
    ///
    /// Rebuilds only when the flag actually changes. Returns whether it did.
    pub fn set_effect_enabled(&mut self, kind: EffectKind, enabled: bool) -> EngineResult<bool> {
        let Some(unit) = self.effects.get_mut(&kind) else {
            log::warn!("{} is always on and cannot be toggled", kind.name());
            return Ok(false);
        };
        if unit.is_enabled() == enabled {
            return Ok(false);
        }
        unit.set_enabled(enabled);
        self.rebuild()?;
        Ok(true)
    }

    /// Apply several enable flags with at most one rebuild
    pub fn set_effects_enabled(
        &mut self,
        flags: impl IntoIterator<Item = (EffectKind, bool)>,
    ) -> EngineResult<bool> {
        let mut changed = false;
        for (kind, enabled) in flags {
            if let Some(unit) = self.effects.get_mut(&kind) {
                if unit.is_enabled() != enabled {
                    unit.set_enabled(enabled);
                    changed = true;
                }
            }
        }
        if changed {
            self.rebuild()?;
        }
        Ok(changed)
    }

    /// Set a parameter on any stage; returns the clamped value
    pub fn set_effect_param(&mut self, kind: EffectKind, name: &str, value: f32) -> Option<f32> {
        let applied = self.unit_mut(kind)?.set_param(name, value);
        if kind == EffectKind::PitchShift {
            self.report_latency();
        }
        applied
    }

    /// Push new mastering EQ gains (dB); returns the clamped gains
    pub fn set_mastering_gains(&mut self, low: f32, mid: f32, high: f32) -> EqGains {
        EqGains::new(
            self.eq.set_param_index(0, low),
            self.eq.set_param_index(1, mid),
            self.eq.set_param_index(2, high),
        )
    }

    /// Set the applied pitch shift in semitones; returns the clamped value
    pub fn set_pitch(&mut self, semitones: f32) -> f32 {
        let applied = self.pitch.set_param_index(0, semitones);
        self.report_latency();
        applied
    }

    /// Processing latency of this chain, in frames
    ///
    /// Only the pitch stage adds latency, and only while it shifts.
    pub fn latency_frames(&self) -> u32 {
        if PitchShiftEffect::engages(self.pitch()) {
            self.stretch_latency
        } else {
            0
        }
    }

    /// Hold-back currently applied by the compensation stage, in frames
    pub fn compensation_frames(&self) -> u32 {
        self.latency.as_ref().map_or(0, LatencyMember::compensation)
    }

    /// Output latency shared by every chain in the group, in frames
    pub fn aligned_latency_frames(&self) -> u32 {
        self.latency_frames() + self.compensation_frames()
    }

    fn report_latency(&self) {
        if let Some(member) = &self.latency {
            member.set_latency(self.latency_frames());
        }
    }

    /// Set the output fader's linear gain; returns the clamped value
    pub fn set_output_gain(&mut self, gain: f32) -> f32 {
        self.fader.set_param_index(0, gain)
    }

    /// Set the output pan (-1 left .. 1 right); returns the clamped value
    pub fn set_pan(&mut self, pan: f32) -> f32 {
        self.fader.set_param_index(1, pan)
    }

    /// Feed the chain from a source node
    pub fn attach_source(&mut self, node: NodeId) -> EngineResult<()> {
        let previous = self.source.replace(node).filter(|old| *old != node);
        self.rebuild_detaching(previous)
    }

    /// Stop feeding the chain, if it has a source
    pub fn detach_source(&mut self) -> EngineResult<()> {
        match self.source.take() {
            Some(source) => self.rebuild_detaching(Some(source)),
            None => Ok(()),
        }
    }

    /// Insert a capture tap between the summing bus and the fader
    pub fn attach_tap(&mut self, node: NodeId) -> EngineResult<()> {
        let previous = self.tap.replace(node).filter(|old| *old != node);
        self.rebuild_detaching(previous)
    }

    /// Remove the capture tap, if any
    pub fn detach_tap(&mut self) -> EngineResult<()> {
        match self.tap.take() {
            Some(tap) => self.rebuild_detaching(Some(tap)),
            None => Ok(()),
        }
    }

    /// Optional effects currently enabled
    pub fn enabled_effects(&self) -> Vec<EffectKind> {
        self.effects
            .values()
            .filter(|unit| unit.is_enabled())
            .map(EffectUnit::kind)
            .collect()
    }

    /// Unit for a stage
    pub fn effect(&self, kind: EffectKind) -> Option<&EffectUnit> {
        match kind {
            EffectKind::PitchShift => Some(&self.pitch),
            EffectKind::Compensation => Some(&self.compensation),
            EffectKind::Eq3 => Some(&self.eq),
            EffectKind::Gain => Some(&self.fader),
            _ => self.effects.get(&kind),
        }
    }

    fn unit_mut(&mut self, kind: EffectKind) -> Option<&mut EffectUnit> {
        match kind {
            EffectKind::PitchShift => Some(&mut self.pitch),
            // Owned by the latency compensator
            EffectKind::Compensation => None,
            EffectKind::Eq3 => Some(&mut self.eq),
            EffectKind::Gain => Some(&mut self.fader),
            _ => self.effects.get_mut(&kind),
        }
    }

    /// Applied pitch shift in semitones
    pub fn pitch(&self) -> f32 {
        self.pitch.values()[0]
    }

    pub fn mastering_gains(&self) -> EqGains {
        let v = self.eq.values();
        EqGains::new(v[0], v[1], v[2])
    }

    pub fn output_gain(&self) -> f32 {
        self.fader.values()[0]
    }

    pub fn source(&self) -> Option<NodeId> {
        self.source
    }

    pub fn tap(&self) -> Option<NodeId> {
        self.tap
    }

    /// Envelope node when the envelope is enabled
    pub(crate) fn active_envelope(&self) -> Option<NodeId> {
        self.effects
            .get(&EffectKind::Envelope)
            .filter(|unit| unit.is_enabled())
            .and_then(EffectUnit::node)
    }

    /// Release every engine node the chain owns (idempotent)
    ///
    /// The source and tap belong to their owners and are only disconnected.
    pub fn dispose(&mut self) {
        if let Some(bus) = self.bus.take() {
            let mut edits: Vec<GraphEdit> = self
                .source
                .into_iter()
                .chain(self.tap)
                .map(|node| GraphEdit::DisconnectAll { node })
                .collect();
            edits.push(GraphEdit::DisconnectAll { node: bus });
            if let Err(e) = self.engine.submit(edits) {
                log::warn!("Failed to disconnect chain on dispose: {}", e);
            }
            if let Err(e) = self.engine.release_node(bus) {
                log::warn!("Failed to release bus {:?}: {}", bus, e);
            }
        }

        // Leave the group first so nobody pushes to a released node
        self.latency = None;
        self.pitch.dispose();
        self.compensation.dispose();
        self.eq.dispose();
        for unit in self.effects.values_mut() {
            unit.dispose();
        }
        self.fader.dispose();
        self.connected.clear();
    }

    pub fn is_disposed(&self) -> bool {
        self.bus.is_none()
    }
}

impl Drop for SignalChain {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for SignalChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalChain")
            .field("source", &self.source)
            .field("enabled", &self.enabled_effects())
            .field("tap", &self.tap)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
