//! Native Rust effect processors
//!
//! One processor per [`EffectKind`]. Each is constructed for the engine
//! sample rate with its delay lines and filter state pre-allocated, so
//! `process` never allocates.

mod chorus;
mod compensation;
mod delay;
mod distortion;
mod envelope;
mod eq3;
mod gain;
mod pitch;
mod reverb;

pub use chorus::ChorusEffect;
pub use compensation::CompensationDelay;
pub use delay::DelayEffect;
pub use distortion::DistortionEffect;
pub use envelope::EnvelopeEffect;
pub use eq3::Eq3Effect;
pub use gain::GainEffect;
pub use pitch::PitchShiftEffect;
pub use reverb::ReverbEffect;

use super::{EffectKind, Processor};

/// Build the processor for `kind` with initial parameter values
///
/// Values are applied in [`EffectKind::params`] order, then the processor is
/// reset so smoothed parameters start at their targets.
pub fn build(kind: EffectKind, sample_rate: u32, values: &[f32]) -> Box<dyn Processor> {
    let mut processor: Box<dyn Processor> = match kind {
        EffectKind::Gain => Box::new(GainEffect::new(sample_rate)),
        EffectKind::Eq3 => Box::new(Eq3Effect::new(sample_rate)),
        EffectKind::PitchShift => Box::new(PitchShiftEffect::new(sample_rate)),
        EffectKind::Reverb => Box::new(ReverbEffect::new(sample_rate)),
        EffectKind::Delay => Box::new(DelayEffect::new(sample_rate)),
        EffectKind::Distortion => Box::new(DistortionEffect::new()),
        EffectKind::Chorus => Box::new(ChorusEffect::new(sample_rate)),
        EffectKind::Envelope => Box::new(EnvelopeEffect::new(sample_rate)),
        EffectKind::Compensation => Box::new(CompensationDelay::new(sample_rate)),
    };

    for (index, value) in values.iter().enumerate().take(kind.params().len()) {
        processor.set_param(index, *value);
    }
    processor.reset();
    processor
}

/// Dry/wet blend of one sample
#[inline]
pub(crate) fn blend(dry: f32, wet: f32, amount: f32) -> f32 {
    dry * (1.0 - amount) + wet * amount
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{StereoBuffer, StereoSample};

    #[test]
    fn test_build_every_kind() {
        let kinds = [
            EffectKind::Gain,
            EffectKind::Eq3,
            EffectKind::PitchShift,
            EffectKind::Compensation,
        ]
        .into_iter()
        .chain(EffectKind::OPTIONAL);

        for kind in kinds {
            let mut processor = build(kind, 48000, &kind.default_values());
            let mut buffer = StereoBuffer::from_vec(vec![StereoSample::mono(0.25); 128]);
            processor.process(&mut buffer);
            assert!(
                buffer.iter().all(|s| s.left.is_finite() && s.right.is_finite()),
                "{} produced non-finite output",
                kind.name()
            );
        }
    }

    #[test]
    fn test_blend() {
        assert_eq!(blend(1.0, 0.0, 0.0), 1.0);
        assert_eq!(blend(1.0, 0.0, 1.0), 0.0);
        assert_eq!(blend(1.0, 0.0, 0.25), 0.75);
    }
}
