//! Feedback echo
//!
//! Stereo delay line with feedback and dry/wet mix.

use super::blend;
use crate::effect::Processor;
use crate::types::StereoBuffer;

/// Maximum delay time in seconds
const MAX_DELAY_SECONDS: f32 = 2.0;

/// Stereo delay line for the delay effect
struct DelayLine {
    buffer_l: Vec<f32>,
    buffer_r: Vec<f32>,
    write_pos: usize,
    delay_samples: usize,
}

impl DelayLine {
    fn new(capacity: usize) -> Self {
        Self {
            buffer_l: vec![0.0; capacity],
            buffer_r: vec![0.0; capacity],
            write_pos: 0,
            delay_samples: 1,
        }
    }

    fn capacity(&self) -> usize {
        self.buffer_l.len()
    }

    fn set_delay_samples(&mut self, samples: usize) {
        self.delay_samples = samples.clamp(1, self.capacity() - 1);
    }

    /// Read from delay line at current position minus delay
    #[inline]
    fn read(&self) -> (f32, f32) {
        let read_pos = if self.write_pos >= self.delay_samples {
            self.write_pos - self.delay_samples
        } else {
            self.capacity() - (self.delay_samples - self.write_pos)
        };
        (self.buffer_l[read_pos], self.buffer_r[read_pos])
    }

    /// Process one sample through the delay with feedback
    #[inline]
    fn process(&mut self, left: f32, right: f32, feedback: f32) -> (f32, f32) {
        let (delayed_l, delayed_r) = self.read();

        self.buffer_l[self.write_pos] = left + delayed_l * feedback;
        self.buffer_r[self.write_pos] = right + delayed_r * feedback;
        self.write_pos = (self.write_pos + 1) % self.capacity();

        (delayed_l, delayed_r)
    }

    fn reset(&mut self) {
        self.buffer_l.fill(0.0);
        self.buffer_r.fill(0.0);
        self.write_pos = 0;
    }
}

/// Stereo delay effect
///
/// Parameters:
/// - time: delay time in seconds (0.01-2.0)
/// - feedback: amount of signal fed back (below 0.95)
/// - wet: dry/wet balance
pub struct DelayEffect {
    sample_rate: f32,
    feedback: f32,
    wet: f32,
    delay_line: DelayLine,
}

impl DelayEffect {
    pub fn new(sample_rate: u32) -> Self {
        let sr = sample_rate as f32;
        let capacity = (sr * MAX_DELAY_SECONDS) as usize + 2;
        let mut effect = Self {
            sample_rate: sr,
            feedback: 0.4,
            wet: 0.3,
            delay_line: DelayLine::new(capacity),
        };
        effect.set_time(0.25);
        effect
    }

    fn set_time(&mut self, seconds: f32) {
        let samples = (seconds * self.sample_rate).round() as usize;
        self.delay_line.set_delay_samples(samples);
    }
}

impl Processor for DelayEffect {
    fn process(&mut self, buffer: &mut StereoBuffer) {
        for sample in buffer.iter_mut() {
            let (delayed_l, delayed_r) =
                self.delay_line
                    .process(sample.left, sample.right, self.feedback);

            sample.left = blend(sample.left, delayed_l, self.wet);
            sample.right = blend(sample.right, delayed_r, self.wet);
        }
    }

    fn set_param(&mut self, index: usize, value: f32) {
        match index {
            0 => self.set_time(value),
            1 => self.feedback = value,
            2 => self.wet = value,
            _ => {}
        }
    }

    fn reset(&mut self) {
        self.delay_line.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StereoSample;

    #[test]
    fn test_echo_arrives_after_delay_time() {
        let mut effect = DelayEffect::new(48000);
        effect.set_param(0, 0.01); // 480 samples
        effect.set_param(1, 0.0);
        effect.set_param(2, 1.0);

        let mut buffer = StereoBuffer::silence(1024);
        buffer.as_mut_slice()[0] = StereoSample::new(1.0, 1.0);
        effect.process(&mut buffer);

        assert_eq!(buffer[0].left, 0.0);
        assert!((buffer[480].left - 1.0).abs() < 1e-6);
        assert_eq!(buffer[960].left, 0.0);
    }

    #[test]
    fn test_feedback_repeats() {
        let mut effect = DelayEffect::new(48000);
        effect.set_param(0, 0.01);
        effect.set_param(1, 0.5);
        effect.set_param(2, 1.0);

        let mut buffer = StereoBuffer::silence(1024);
        buffer.as_mut_slice()[0] = StereoSample::new(1.0, 1.0);
        effect.process(&mut buffer);

        assert!((buffer[960].left - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_delay_reset() {
        let mut effect = DelayEffect::new(48000);
        effect.set_param(2, 1.0);

        let mut buffer = StereoBuffer::from_vec(vec![StereoSample::mono(1.0); 4096]);
        effect.process(&mut buffer);
        effect.reset();

        let mut buffer = StereoBuffer::silence(4096);
        effect.process(&mut buffer);
        assert_eq!(buffer.peak(), 0.0);
    }
}
