//! Stereo chorus
//!
//! A short delay line read at an LFO-modulated offset, with the right
//! channel's LFO a quarter cycle ahead of the left.

use std::f32::consts::{FRAC_PI_2, TAU};

use super::blend;
use crate::effect::Processor;
use crate::types::StereoBuffer;

/// Centre delay (seconds)
const BASE_DELAY: f32 = 0.007;
/// Modulation swing at full depth (seconds)
const MAX_SWING: f32 = 0.005;

/// Chorus
///
/// Parameters:
/// - rate: LFO frequency in Hz
/// - depth: modulation depth (0-1)
/// - wet: dry/wet balance
pub struct ChorusEffect {
    sample_rate: f32,
    rate: f32,
    depth: f32,
    wet: f32,
    phase: f32,
    buffer_l: Vec<f32>,
    buffer_r: Vec<f32>,
    write_pos: usize,
}

impl ChorusEffect {
    pub fn new(sample_rate: u32) -> Self {
        let sr = sample_rate as f32;
        let capacity = ((BASE_DELAY + MAX_SWING) * sr) as usize + 4;
        Self {
            sample_rate: sr,
            rate: 1.5,
            depth: 0.5,
            wet: 0.5,
            phase: 0.0,
            buffer_l: vec![0.0; capacity],
            buffer_r: vec![0.0; capacity],
            write_pos: 0,
        }
    }

    /// Fractional read `delay` samples behind the write head
    #[inline]
    fn read(buffer: &[f32], write_pos: usize, delay: f32) -> f32 {
        let len = buffer.len();
        let pos = write_pos as f32 - delay;
        let pos = if pos < 0.0 { pos + len as f32 } else { pos };
        let index = pos as usize % len;
        let frac = pos - pos.floor();
        let next = (index + 1) % len;
        buffer[index] + (buffer[next] - buffer[index]) * frac
    }
}

impl Processor for ChorusEffect {
    fn process(&mut self, buffer: &mut StereoBuffer) {
        let base = BASE_DELAY * self.sample_rate;
        let swing = MAX_SWING * self.sample_rate * self.depth;
        let increment = TAU * self.rate / self.sample_rate;

        for sample in buffer.iter_mut() {
            self.buffer_l[self.write_pos] = sample.left;
            self.buffer_r[self.write_pos] = sample.right;

            let delay_l = base + swing * self.phase.sin();
            let delay_r = base + swing * (self.phase + FRAC_PI_2).sin();
            let wet_l = Self::read(&self.buffer_l, self.write_pos, delay_l);
            let wet_r = Self::read(&self.buffer_r, self.write_pos, delay_r);

            sample.left = blend(sample.left, wet_l, self.wet);
            sample.right = blend(sample.right, wet_r, self.wet);

            self.write_pos = (self.write_pos + 1) % self.buffer_l.len();
            self.phase += increment;
            if self.phase >= TAU {
                self.phase -= TAU;
            }
        }
    }

    fn set_param(&mut self, index: usize, value: f32) {
        match index {
            0 => self.rate = value,
            1 => self.depth = value,
            2 => self.wet = value,
            _ => {}
        }
    }

    fn reset(&mut self) {
        self.buffer_l.fill(0.0);
        self.buffer_r.fill(0.0);
        self.write_pos = 0;
        self.phase = 0.0;
    }
}
