//! Latency compensation delay
//!
//! A plain delay that holds a chain back by the difference between the
//! slowest chain's latency and its own, so stems started on the same sample
//! also reach the output on the same sample.

use crate::effect::{Processor, MAX_COMPENSATION_SECONDS};
use crate::types::{StereoBuffer, StereoSample};

/// Ring buffer for the delay
struct DelayLine {
    buffer: Vec<StereoSample>,
    write_pos: usize,
    delay_samples: usize,
}

impl DelayLine {
    fn new(max_samples: usize) -> Self {
        Self {
            buffer: vec![StereoSample::silence(); max_samples.max(1)],
            write_pos: 0,
            delay_samples: 0,
        }
    }

    fn set_delay(&mut self, samples: usize) {
        self.delay_samples = samples.min(self.buffer.len() - 1);
    }

    /// Write one frame and read the frame `delay_samples` behind it
    #[inline]
    fn process(&mut self, input: StereoSample) -> StereoSample {
        self.buffer[self.write_pos] = input;

        let read_pos = if self.write_pos >= self.delay_samples {
            self.write_pos - self.delay_samples
        } else {
            self.buffer.len() - (self.delay_samples - self.write_pos)
        };
        let output = self.buffer[read_pos];

        self.write_pos = (self.write_pos + 1) % self.buffer.len();
        output
    }

    fn clear(&mut self) {
        self.buffer.fill(StereoSample::silence());
        self.write_pos = 0;
    }
}

/// Compensation delay stage
///
/// Parameters:
/// - delay: hold-back in seconds (0 to [`MAX_COMPENSATION_SECONDS`])
///
/// The line keeps recording at zero delay, so a later increase reads real
/// history instead of a gap.
pub struct CompensationDelay {
    sample_rate: f32,
    line: DelayLine,
}

impl CompensationDelay {
    pub fn new(sample_rate: u32) -> Self {
        let capacity = (sample_rate as f32 * MAX_COMPENSATION_SECONDS) as usize + 1;
        Self {
            sample_rate: sample_rate as f32,
            line: DelayLine::new(capacity),
        }
    }

    /// Current delay in frames
    pub fn delay_samples(&self) -> usize {
        self.line.delay_samples
    }
}

impl Processor for CompensationDelay {
    fn process(&mut self, buffer: &mut StereoBuffer) {
        for sample in buffer.iter_mut() {
            *sample = self.line.process(*sample);
        }
    }

    fn set_param(&mut self, index: usize, value: f32) {
        if index == 0 {
            let samples = (value.max(0.0) * self.sample_rate).round() as usize;
            self.line.set_delay(samples);
        }
    }

    fn reset(&mut self) {
        self.line.clear();
    }

    fn latency_samples(&self) -> u32 {
        self.line.delay_samples as u32
    }
}
