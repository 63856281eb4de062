//! Pitch shift via signalsmith-stretch
//!
//! Runs the stretcher at a 1:1 time ratio with a transpose factor, so only
//! pitch changes. At (near) zero semitones the stage is a passthrough and
//! adds no latency.

use signalsmith_stretch::Stretch;

use crate::effect::Processor;
use crate::engine::RENDER_QUANTUM;
use crate::types::StereoBuffer;

/// Number of channels (stereo)
const CHANNELS: u32 = 2;

/// Shifts smaller than this are treated as zero
const MIN_SHIFT: f32 = 1e-3;

/// Pitch shifter
///
/// Parameters:
/// - semitones: applied shift (user pitch plus varispeed compensation)
pub struct PitchShiftEffect {
    stretcher: Stretch,
    semitones: f32,
    /// Interleaved copy of the input, since the stretcher cannot run in-place
    scratch: Vec<f32>,
}

impl PitchShiftEffect {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            stretcher: Stretch::preset_default(CHANNELS, sample_rate),
            semitones: 0.0,
            scratch: vec![0.0; RENDER_QUANTUM * CHANNELS as usize],
        }
    }

    fn is_active(&self) -> bool {
        Self::engages(self.semitones)
    }

    /// Whether a shift of `semitones` runs through the stretcher
    pub fn engages(semitones: f32) -> bool {
        semitones.abs() >= MIN_SHIFT
    }

    /// Latency of an engaged shifter at `sample_rate`, in frames
    ///
    /// Builds a throwaway stretcher, so call it off the render thread.
    pub fn engaged_latency(sample_rate: u32) -> u32 {
        let stretcher = Stretch::preset_default(CHANNELS, sample_rate);
        (stretcher.input_latency() + stretcher.output_latency()) as u32
    }

    /// Currently applied shift in semitones
    pub fn semitones(&self) -> f32 {
        self.semitones
    }
}

impl Processor for PitchShiftEffect {
    fn process(&mut self, buffer: &mut StereoBuffer) {
        if !self.is_active() {
            return;
        }

        let len = buffer.len() * CHANNELS as usize;
        if self.scratch.len() < len {
            self.scratch.resize(len, 0.0);
        }
        self.scratch[..len].copy_from_slice(buffer.as_interleaved());

        let output = buffer.as_interleaved_mut();
        output.fill(0.0);
        self.stretcher.process(&self.scratch[..len], output);
    }

    fn set_param(&mut self, index: usize, value: f32) {
        if index != 0 {
            return;
        }
        let was_active = self.is_active();
        self.semitones = value;
        self.stretcher
            .set_transpose_factor_semitones(self.semitones, None);

        // Entering the active path starts from a clean stretcher
        if self.is_active() && !was_active {
            self.stretcher.reset();
        }
    }

    fn reset(&mut self) {
        self.stretcher.reset();
    }

    fn latency_samples(&self) -> u32 {
        if self.is_active() {
            (self.stretcher.input_latency() + self.stretcher.output_latency()) as u32
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StereoSample;

    #[test]
    fn test_zero_shift_is_passthrough() {
        let mut effect = PitchShiftEffect::new(48000);
        let mut buffer = StereoBuffer::from_vec(vec![StereoSample::new(0.3, -0.3); 128]);
        effect.process(&mut buffer);

        assert!(buffer.iter().all(|s| s.left == 0.3 && s.right == -0.3));
        assert_eq!(effect.latency_samples(), 0);
        assert!(!PitchShiftEffect::engages(0.0005));
        assert!(PitchShiftEffect::engages(-0.5));
    }

    #[test]
    fn test_active_shift_reports_latency() {
        let mut effect = PitchShiftEffect::new(48000);
        effect.set_param(0, -12.0);
        assert_eq!(effect.semitones(), -12.0);
        assert!(effect.latency_samples() > 0);
        assert_eq!(
            effect.latency_samples(),
            PitchShiftEffect::engaged_latency(48000)
        );

        let mut buffer = StereoBuffer::from_vec(vec![StereoSample::mono(0.1); 128]);
        effect.process(&mut buffer);
        assert!(buffer.iter().all(|s| s.left.is_finite()));
    }
}
