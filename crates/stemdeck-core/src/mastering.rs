//! Mastering presets for the always-on 3-band EQ
//!
//! Any number of presets may be selected per track. The EQ gains are the
//! per-band arithmetic mean of the selected presets, or flat when none are.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Gains of the mastering EQ in dB
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EqGains {
    pub low: f32,
    pub mid: f32,
    pub high: f32,
}

impl EqGains {
    pub const FLAT: EqGains = EqGains::new(0.0, 0.0, 0.0);

    pub const fn new(low: f32, mid: f32, high: f32) -> Self {
        Self { low, mid, high }
    }

    /// Values in EQ parameter order (low, mid, high)
    pub fn as_array(&self) -> [f32; 3] {
        [self.low, self.mid, self.high]
    }
}

/// Named tonal-balance preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MasteringPreset {
    Warm,
    Bright,
    Punchy,
    Airy,
    Balanced,
}

impl MasteringPreset {
    pub const ALL: [MasteringPreset; 5] = [
        MasteringPreset::Warm,
        MasteringPreset::Bright,
        MasteringPreset::Punchy,
        MasteringPreset::Airy,
        MasteringPreset::Balanced,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            MasteringPreset::Warm => "Warm",
            MasteringPreset::Bright => "Bright",
            MasteringPreset::Punchy => "Punchy",
            MasteringPreset::Airy => "Airy",
            MasteringPreset::Balanced => "Balanced",
        }
    }

    /// Fixed band offsets of this preset
    pub fn gains(&self) -> EqGains {
        match self {
            MasteringPreset::Warm => EqGains::new(3.0, 1.0, -2.0),
            MasteringPreset::Bright => EqGains::new(-1.0, 0.0, 4.0),
            MasteringPreset::Punchy => EqGains::new(4.0, 2.0, 1.0),
            MasteringPreset::Airy => EqGains::new(-2.0, -1.0, 5.0),
            MasteringPreset::Balanced => EqGains::new(1.0, 0.0, 1.0),
        }
    }

    /// Case-insensitive lookup by name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|preset| preset.name().eq_ignore_ascii_case(name))
    }
}

/// Set of selected presets for one track
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PresetSelection {
    selected: BTreeSet<MasteringPreset>,
}

impl PresetSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a preset; selecting it again changes nothing
    pub fn select(&mut self, preset: MasteringPreset) {
        self.selected.insert(preset);
    }

    /// Remove a preset; deselecting an unselected preset changes nothing
    pub fn deselect(&mut self, preset: MasteringPreset) {
        self.selected.remove(&preset);
    }

    /// Flip membership; returns whether the preset is now selected
    pub fn toggle(&mut self, preset: MasteringPreset) -> bool {
        if !self.selected.remove(&preset) {
            self.selected.insert(preset);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, preset: MasteringPreset) -> bool {
        self.selected.contains(&preset)
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = MasteringPreset> + '_ {
        self.selected.iter().copied()
    }

    /// Per-band mean of the selected presets, exactly flat when empty
    pub fn gains(&self) -> EqGains {
        if self.selected.is_empty() {
            return EqGains::FLAT;
        }

        let count = self.selected.len() as f32;
        let sum = self.selected.iter().fold(EqGains::FLAT, |acc, preset| {
            let g = preset.gains();
            EqGains::new(acc.low + g.low, acc.mid + g.mid, acc.high + g.high)
        });
        EqGains::new(sum.low / count, sum.mid / count, sum.high / count)
    }
}

impl FromIterator<MasteringPreset> for PresetSelection {
    fn from_iter<I: IntoIterator<Item = MasteringPreset>>(iter: I) -> Self {
        Self {
            selected: iter.into_iter().collect(),
        }
    }
}
