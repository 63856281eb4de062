//! Stereo Reverb effect
//!
//! Freeverb-style network: parallel damped comb filters into serial
//! all-pass diffusers. The comb feedback is derived from the requested decay
//! time (RT60), so `decay` is the time for the tail to fall by 60 dB.

use super::blend;
use crate::effect::Processor;
use crate::types::StereoBuffer;

/// Comb filter delay line lengths (in samples at 44.1kHz)
/// These are prime-ish numbers to avoid resonances
const COMB_LENGTHS: [usize; 8] = [1557, 1617, 1491, 1422, 1277, 1356, 1188, 1116];

/// Allpass filter delay line lengths
const ALLPASS_LENGTHS: [usize; 4] = [225, 556, 441, 341];

/// Stereo spread offset for right channel (in samples at 44.1kHz)
const STEREO_SPREAD: usize = 23;

/// High frequency damping in the comb feedback path
const DAMPING: f32 = 0.3;

/// Allpass feedback coefficient
const ALLPASS_FEEDBACK: f32 = 0.5;

/// Gain compensation for comb filter summing
const COMB_GAIN: f32 = 0.2;

/// Keeps the comb network stable for very long decays
const MAX_FEEDBACK: f32 = 0.98;

/// Comb filter for reverb
struct CombFilter {
    buffer: Vec<f32>,
    pos: usize,
    feedback: f32,
    filter_state: f32,
}

impl CombFilter {
    fn new(length: usize) -> Self {
        Self {
            buffer: vec![0.0; length.max(1)],
            pos: 0,
            feedback: 0.0,
            filter_state: 0.0,
        }
    }

    /// Set feedback so the loop decays 60 dB in `decay` seconds
    fn set_decay(&mut self, decay: f32, sample_rate: f32) {
        let loop_secs = self.buffer.len() as f32 / sample_rate;
        self.feedback = 10.0_f32
            .powf(-3.0 * loop_secs / decay.max(0.01))
            .min(MAX_FEEDBACK);
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let output = self.buffer[self.pos];

        // One-pole lowpass filter for damping high frequencies
        self.filter_state = output * (1.0 - DAMPING) + self.filter_state * DAMPING;

        self.buffer[self.pos] = input + self.filter_state * self.feedback;
        self.pos = (self.pos + 1) % self.buffer.len();

        output
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.filter_state = 0.0;
    }
}

/// Allpass filter for diffusion
struct AllpassFilter {
    buffer: Vec<f32>,
    pos: usize,
}

impl AllpassFilter {
    fn new(length: usize) -> Self {
        Self {
            buffer: vec![0.0; length.max(1)],
            pos: 0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let buffered = self.buffer[self.pos];
        let output = -input + buffered;
        self.buffer[self.pos] = input + buffered * ALLPASS_FEEDBACK;
        self.pos = (self.pos + 1) % self.buffer.len();
        output
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
    }
}

/// Freeverb-style stereo reverb
///
/// Parameters:
/// - decay: tail length in seconds (0.1-10)
/// - wet: dry/wet balance
pub struct ReverbEffect {
    sample_rate: f32,
    decay: f32,
    wet: f32,
    combs_l: Vec<CombFilter>,
    combs_r: Vec<CombFilter>,
    allpass_l: Vec<AllpassFilter>,
    allpass_r: Vec<AllpassFilter>,
}

impl ReverbEffect {
    pub fn new(sample_rate: u32) -> Self {
        let sr = sample_rate as f32;
        let scale = |len: usize| (len as f32 * sr / 44100.0) as usize;

        let mut effect = Self {
            sample_rate: sr,
            decay: 2.5,
            wet: 0.35,
            combs_l: COMB_LENGTHS.iter().map(|&len| CombFilter::new(scale(len))).collect(),
            combs_r: COMB_LENGTHS
                .iter()
                .map(|&len| CombFilter::new(scale(len + STEREO_SPREAD)))
                .collect(),
            allpass_l: ALLPASS_LENGTHS.iter().map(|&len| AllpassFilter::new(scale(len))).collect(),
            allpass_r: ALLPASS_LENGTHS
                .iter()
                .map(|&len| AllpassFilter::new(scale(len + STEREO_SPREAD)))
                .collect(),
        };
        effect.update_decay();
        effect
    }

    fn update_decay(&mut self) {
        for comb in self.combs_l.iter_mut().chain(self.combs_r.iter_mut()) {
            comb.set_decay(self.decay, self.sample_rate);
        }
    }
}

impl Processor for ReverbEffect {
    fn process(&mut self, buffer: &mut StereoBuffer) {
        let wet = self.wet;

        for sample in buffer.iter_mut() {
            let input = (sample.left + sample.right) * 0.5;

            let mut out_l = 0.0f32;
            let mut out_r = 0.0f32;
            for comb in &mut self.combs_l {
                out_l += comb.process(input);
            }
            for comb in &mut self.combs_r {
                out_r += comb.process(input);
            }
            out_l *= COMB_GAIN;
            out_r *= COMB_GAIN;

            for ap in &mut self.allpass_l {
                out_l = ap.process(out_l);
            }
            for ap in &mut self.allpass_r {
                out_r = ap.process(out_r);
            }

            sample.left = blend(sample.left, out_l, wet);
            sample.right = blend(sample.right, out_r, wet);
        }
    }

    fn set_param(&mut self, index: usize, value: f32) {
        match index {
            0 => {
                self.decay = value;
                self.update_decay();
            }
            1 => self.wet = value,
            _ => {}
        }
    }

    fn reset(&mut self) {
        for comb in self.combs_l.iter_mut().chain(self.combs_r.iter_mut()) {
            comb.reset();
        }
        for ap in self.allpass_l.iter_mut().chain(self.allpass_r.iter_mut()) {
            ap.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StereoSample;

    fn impulse_energy(decay: f32, skip: usize) -> f32 {
        let mut effect = ReverbEffect::new(48000);
        effect.set_param(0, decay);
        effect.set_param(1, 1.0);

        let mut buffer = StereoBuffer::silence(48000);
        buffer.as_mut_slice()[0] = StereoSample::new(1.0, 1.0);
        effect.process(&mut buffer);
        buffer.iter().skip(skip).map(|s| s.left.abs()).sum()
    }

    #[test]
    fn test_reverb_dry() {
        let mut effect = ReverbEffect::new(48000);
        effect.set_param(1, 0.0);

        let mut buffer = StereoBuffer::silence(64);
        buffer.as_mut_slice()[0] = StereoSample::new(1.0, 1.0);
        effect.process(&mut buffer);

        assert!((buffer[0].left - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_longer_decay_has_longer_tail() {
        let short = impulse_energy(0.2, 24000);
        let long = impulse_energy(5.0, 24000);
        assert!(long > short * 10.0, "short={} long={}", short, long);
    }

    #[test]
    fn test_reverb_reset() {
        let mut effect = ReverbEffect::new(48000);
        effect.set_param(1, 1.0);

        let mut buffer = StereoBuffer::from_vec(vec![StereoSample::mono(1.0); 4096]);
        effect.process(&mut buffer);
        effect.reset();

        let mut buffer = StereoBuffer::silence(64);
        effect.process(&mut buffer);
        assert_eq!(buffer.peak(), 0.0);
    }
}
