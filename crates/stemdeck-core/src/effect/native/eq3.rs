//! 3-band mastering equalizer
//!
//! Low shelf at the low crossover, peaking band centred between the
//! crossovers, high shelf at the high crossover (RBJ cookbook biquads).

use crate::effect::Processor;
use crate::types::StereoBuffer;

/// Low/mid crossover (Hz)
pub const LOW_CROSSOVER: f32 = 400.0;
/// Mid/high crossover (Hz)
pub const HIGH_CROSSOVER: f32 = 2500.0;
/// Q for the mid band
const MID_Q: f32 = 0.7;

/// Biquad filter state for one band
#[derive(Debug, Clone, Default)]
struct BiquadState {
    x1_l: f32, x2_l: f32, y1_l: f32, y2_l: f32,
    x1_r: f32, x2_r: f32, y1_r: f32, y2_r: f32,
}

impl BiquadState {
    #[inline]
    fn process(&mut self, input_l: f32, input_r: f32, c: &BiquadCoeffs) -> (f32, f32) {
        let out_l = c.b0 * input_l + c.b1 * self.x1_l + c.b2 * self.x2_l
                  - c.a1 * self.y1_l - c.a2 * self.y2_l;
        self.x2_l = self.x1_l;
        self.x1_l = input_l;
        self.y2_l = self.y1_l;
        self.y1_l = out_l;

        let out_r = c.b0 * input_r + c.b1 * self.x1_r + c.b2 * self.x2_r
                  - c.a1 * self.y1_r - c.a2 * self.y2_r;
        self.x2_r = self.x1_r;
        self.x1_r = input_r;
        self.y2_r = self.y1_r;
        self.y1_r = out_r;

        (out_l, out_r)
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Biquad filter coefficients (normalized by a0)
#[derive(Debug, Clone)]
struct BiquadCoeffs {
    b0: f32, b1: f32, b2: f32,
    a1: f32, a2: f32,
}

impl BiquadCoeffs {
    fn low_shelf(freq: f32, gain_db: f32, sample_rate: f32) -> Self {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / 2.0 * std::f32::consts::SQRT_2;
        let sqrt_a = a.sqrt();

        let a0 = (a + 1.0) + (a - 1.0) * cos_w0 + 2.0 * sqrt_a * alpha;
        Self {
            b0: (a * ((a + 1.0) - (a - 1.0) * cos_w0 + 2.0 * sqrt_a * alpha)) / a0,
            b1: (2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0)) / a0,
            b2: (a * ((a + 1.0) - (a - 1.0) * cos_w0 - 2.0 * sqrt_a * alpha)) / a0,
            a1: (-2.0 * ((a - 1.0) + (a + 1.0) * cos_w0)) / a0,
            a2: ((a + 1.0) + (a - 1.0) * cos_w0 - 2.0 * sqrt_a * alpha) / a0,
        }
    }

    fn peaking(freq: f32, gain_db: f32, q: f32, sample_rate: f32) -> Self {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);

        let a0 = 1.0 + alpha / a;
        Self {
            b0: (1.0 + alpha * a) / a0,
            b1: (-2.0 * cos_w0) / a0,
            b2: (1.0 - alpha * a) / a0,
            a1: (-2.0 * cos_w0) / a0,
            a2: (1.0 - alpha / a) / a0,
        }
    }

    fn high_shelf(freq: f32, gain_db: f32, sample_rate: f32) -> Self {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / 2.0 * std::f32::consts::SQRT_2;
        let sqrt_a = a.sqrt();

        let a0 = (a + 1.0) - (a - 1.0) * cos_w0 + 2.0 * sqrt_a * alpha;
        Self {
            b0: (a * ((a + 1.0) + (a - 1.0) * cos_w0 + 2.0 * sqrt_a * alpha)) / a0,
            b1: (-2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0)) / a0,
            b2: (a * ((a + 1.0) + (a - 1.0) * cos_w0 - 2.0 * sqrt_a * alpha)) / a0,
            a1: (2.0 * ((a - 1.0) - (a + 1.0) * cos_w0)) / a0,
            a2: ((a + 1.0) - (a - 1.0) * cos_w0 - 2.0 * sqrt_a * alpha) / a0,
        }
    }
}

/// Mastering EQ
///
/// Parameters (dB, -20..+20): low, mid, high. Flat (0/0/0) is transparent.
pub struct Eq3Effect {
    sample_rate: f32,
    gains_db: [f32; 3],
    coeffs: [BiquadCoeffs; 3],
    states: [BiquadState; 3],
}

impl Eq3Effect {
    pub fn new(sample_rate: u32) -> Self {
        let sample_rate = sample_rate as f32;
        let mut effect = Self {
            sample_rate,
            gains_db: [0.0; 3],
            coeffs: [
                BiquadCoeffs::low_shelf(LOW_CROSSOVER, 0.0, sample_rate),
                BiquadCoeffs::peaking(Self::mid_frequency(), 0.0, MID_Q, sample_rate),
                BiquadCoeffs::high_shelf(HIGH_CROSSOVER, 0.0, sample_rate),
            ],
            states: Default::default(),
        };
        effect.update_coeffs();
        effect
    }

    /// Geometric mean of the crossovers
    fn mid_frequency() -> f32 {
        (LOW_CROSSOVER * HIGH_CROSSOVER).sqrt()
    }

    fn update_coeffs(&mut self) {
        let sr = self.sample_rate;
        self.coeffs = [
            BiquadCoeffs::low_shelf(LOW_CROSSOVER, self.gains_db[0], sr),
            BiquadCoeffs::peaking(Self::mid_frequency(), self.gains_db[1], MID_Q, sr),
            BiquadCoeffs::high_shelf(HIGH_CROSSOVER, self.gains_db[2], sr),
        ];
    }
}

impl Processor for Eq3Effect {
    fn process(&mut self, buffer: &mut StereoBuffer) {
        for sample in buffer.iter_mut() {
            let (mut l, mut r) = (sample.left, sample.right);
            for (state, coeffs) in self.states.iter_mut().zip(self.coeffs.iter()) {
                (l, r) = state.process(l, r, coeffs);
            }
            sample.left = l;
            sample.right = r;
        }
    }

    fn set_param(&mut self, index: usize, value: f32) {
        if index < 3 && self.gains_db[index] != value {
            self.gains_db[index] = value;
            self.update_coeffs();
        }
    }

    fn reset(&mut self) {
        for state in &mut self.states {
            state.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StereoSample;

    fn sine(freq: f32, len: usize) -> StereoBuffer {
        let samples = (0..len)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * freq * i as f32 / 48000.0;
                StereoSample::mono(phase.sin() * 0.5)
            })
            .collect();
        StereoBuffer::from_vec(samples)
    }

    fn tail_peak(buffer: &StereoBuffer) -> f32 {
        buffer.iter().skip(buffer.len() / 2).map(|s| s.peak()).fold(0.0, f32::max)
    }

    #[test]
    fn test_flat_is_transparent() {
        let mut eq = Eq3Effect::new(48000);
        let mut buffer = sine(1000.0, 4800);
        let reference = buffer.clone();
        eq.process(&mut buffer);

        for (a, b) in buffer.iter().zip(reference.iter()) {
            assert!((a.left - b.left).abs() < 1e-3);
        }
    }

    #[test]
    fn test_low_boost_raises_bass() {
        let mut eq = Eq3Effect::new(48000);
        eq.set_param(0, 12.0);

        let mut buffer = sine(60.0, 9600);
        eq.process(&mut buffer);
        assert!(tail_peak(&buffer) > 1.0, "peak {}", tail_peak(&buffer));
    }

    #[test]
    fn test_high_cut_lowers_treble() {
        let mut eq = Eq3Effect::new(48000);
        eq.set_param(2, -12.0);

        let mut buffer = sine(10000.0, 4800);
        eq.process(&mut buffer);
        assert!(tail_peak(&buffer) < 0.25, "peak {}", tail_peak(&buffer));
    }
}
