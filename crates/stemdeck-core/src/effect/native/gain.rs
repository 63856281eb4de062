//! Gain effect - output fader with balance pan
//!
//! Doubles as the audibility fader of a voice: mute and solo are applied by
//! setting its gain to zero, so changes are ramped to avoid clicks.

use crate::effect::Processor;
use crate::types::StereoBuffer;

/// Ramp length for gain changes (seconds)
const RAMP_SECONDS: f32 = 0.005;

/// Linear parameter ramp
#[derive(Debug, Clone, Copy)]
struct Ramp {
    current: f32,
    target: f32,
    step: f32,
    remaining: u32,
}

impl Ramp {
    fn new(value: f32) -> Self {
        Self {
            current: value,
            target: value,
            step: 0.0,
            remaining: 0,
        }
    }

    fn set(&mut self, target: f32, length: u32) {
        self.target = target;
        if length == 0 {
            self.snap();
            return;
        }
        self.step = (target - self.current) / length as f32;
        self.remaining = length;
    }

    fn snap(&mut self) {
        self.current = self.target;
        self.remaining = 0;
    }

    #[inline]
    fn next(&mut self) -> f32 {
        if self.remaining > 0 {
            self.remaining -= 1;
            self.current = if self.remaining == 0 {
                self.target
            } else {
                self.current + self.step
            };
        }
        self.current
    }
}

/// Gain and pan
///
/// Parameters:
/// - gain: linear multiplier (0.0 = silence, 1.0 = unity, 2.0 = +6dB)
/// - pan: balance (-1.0 = left only, 0.0 = center, 1.0 = right only)
///
/// This effect has zero latency.
pub struct GainEffect {
    gain: f32,
    pan: f32,
    left: Ramp,
    right: Ramp,
    ramp_len: u32,
}

impl GainEffect {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            gain: 1.0,
            pan: 0.0,
            left: Ramp::new(1.0),
            right: Ramp::new(1.0),
            ramp_len: (sample_rate as f32 * RAMP_SECONDS) as u32,
        }
    }

    fn channel_gains(&self) -> (f32, f32) {
        let left = (1.0 - self.pan).min(1.0);
        let right = (1.0 + self.pan).min(1.0);
        (self.gain * left, self.gain * right)
    }

    fn update_targets(&mut self) {
        let (left, right) = self.channel_gains();
        self.left.set(left, self.ramp_len);
        self.right.set(right, self.ramp_len);
    }
}

impl Processor for GainEffect {
    fn process(&mut self, buffer: &mut StereoBuffer) {
        for sample in buffer.iter_mut() {
            sample.left *= self.left.next();
            sample.right *= self.right.next();
        }
    }

    fn set_param(&mut self, index: usize, value: f32) {
        match index {
            0 => self.gain = value,
            1 => self.pan = value.clamp(-1.0, 1.0),
            _ => return,
        }
        self.update_targets();
    }

    fn reset(&mut self) {
        self.left.snap();
        self.right.snap();
    }
}
