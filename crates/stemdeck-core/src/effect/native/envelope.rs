//! Amplitude envelope (ADSR)
//!
//! Idle until triggered. A trigger ramps up over `attack`, falls to
//! `sustain` over `decay` and holds; a release fades to silence over
//! `release`. The envelope multiplies the wet signal only.

use super::blend;
use crate::effect::Processor;
use crate::types::StereoBuffer;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Stage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

/// ADSR envelope
///
/// Parameters: attack (s), decay (s), sustain (0-1), release (s), wet (0-1)
pub struct EnvelopeEffect {
    sample_rate: f32,
    attack: f32,
    decay: f32,
    sustain: f32,
    release: f32,
    wet: f32,
    stage: Stage,
    level: f32,
    /// Per-sample level change in the current stage
    slope: f32,
}

impl EnvelopeEffect {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate as f32,
            attack: 0.1,
            decay: 0.2,
            sustain: 0.8,
            release: 1.0,
            wet: 1.0,
            stage: Stage::Idle,
            level: 0.0,
            slope: 0.0,
        }
    }

    fn samples(&self, seconds: f32) -> f32 {
        (seconds * self.sample_rate).max(1.0)
    }

    fn enter(&mut self, stage: Stage) {
        self.stage = stage;
        self.slope = match stage {
            Stage::Attack => (1.0 - self.level) / self.samples(self.attack),
            Stage::Decay => (self.sustain - 1.0) / self.samples(self.decay),
            Stage::Release => -self.level / self.samples(self.release),
            Stage::Idle | Stage::Sustain => 0.0,
        };
    }

    #[inline]
    fn next_level(&mut self) -> f32 {
        match self.stage {
            Stage::Idle => self.level = 0.0,
            Stage::Sustain => self.level = self.sustain,
            Stage::Attack => {
                self.level += self.slope;
                if self.level >= 1.0 {
                    self.level = 1.0;
                    self.enter(Stage::Decay);
                }
            }
            Stage::Decay => {
                self.level += self.slope;
                if self.level <= self.sustain {
                    self.level = self.sustain;
                    self.enter(Stage::Sustain);
                }
            }
            Stage::Release => {
                self.level += self.slope;
                if self.level <= 0.0 {
                    self.level = 0.0;
                    self.enter(Stage::Idle);
                }
            }
        }
        self.level
    }
}

impl Processor for EnvelopeEffect {
    fn process(&mut self, buffer: &mut StereoBuffer) {
        for sample in buffer.iter_mut() {
            let level = self.next_level();
            sample.left = blend(sample.left, sample.left * level, self.wet);
            sample.right = blend(sample.right, sample.right * level, self.wet);
        }
    }

    fn set_param(&mut self, index: usize, value: f32) {
        match index {
            0 => self.attack = value,
            1 => self.decay = value,
            2 => self.sustain = value,
            3 => self.release = value,
            4 => self.wet = value,
            _ => {}
        }
    }

    fn reset(&mut self) {
        self.level = 0.0;
        self.enter(Stage::Idle);
    }

    fn trigger(&mut self) {
        self.enter(Stage::Attack);
    }

    fn release(&mut self) {
        if self.stage != Stage::Idle {
            self.enter(Stage::Release);
        }
    }
}
