//! Soft-clipping distortion

use super::blend;
use crate::effect::Processor;
use crate::types::StereoBuffer;

/// Waveshaping distortion
///
/// Parameters:
/// - drive: 0 leaves the signal linear, 1 is heavy saturation
/// - wet: dry/wet balance
///
/// Curve: `(1 + k) x / (1 + k |x|)` with `k = 2a / (1 - a)`, `a` the drive.
pub struct DistortionEffect {
    k: f32,
    wet: f32,
}

impl DistortionEffect {
    pub fn new() -> Self {
        let mut effect = Self { k: 0.0, wet: 0.5 };
        effect.set_drive(0.4);
        effect
    }

    fn set_drive(&mut self, drive: f32) {
        let a = drive.clamp(0.0, 0.99);
        self.k = 2.0 * a / (1.0 - a);
    }

    #[inline]
    fn shape(&self, x: f32) -> f32 {
        (1.0 + self.k) * x / (1.0 + self.k * x.abs())
    }
}

impl Default for DistortionEffect {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for DistortionEffect {
    fn process(&mut self, buffer: &mut StereoBuffer) {
        for sample in buffer.iter_mut() {
            sample.left = blend(sample.left, self.shape(sample.left), self.wet);
            sample.right = blend(sample.right, self.shape(sample.right), self.wet);
        }
    }

    fn set_param(&mut self, index: usize, value: f32) {
        match index {
            0 => self.set_drive(value),
            1 => self.wet = value,
            _ => {}
        }
    }

    fn reset(&mut self) {
        // Memoryless
    }
}
