//! Buffer source node - varispeed playback with sample-exact scheduled start

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use basedrop::Shared;

use crate::types::{AudioBuffer, StereoBuffer, StereoSample};

/// Transport state of a source, shared with its controller
///
/// The render thread publishes the playhead after every quantum and flags a
/// natural end; controllers read these without locking. All operations use
/// `Ordering::Relaxed` since only visibility is needed.
#[derive(Debug)]
pub struct SourceAtomics {
    /// Playhead in seconds of source time (f64 bits)
    position: AtomicU64,
    /// Whether the source is producing audio
    playing: AtomicBool,
    /// Set when a non-looping source ran past its last frame
    ended: AtomicBool,
}

impl SourceAtomics {
    pub fn new() -> Self {
        Self {
            position: AtomicU64::new(0.0_f64.to_bits()),
            playing: AtomicBool::new(false),
            ended: AtomicBool::new(false),
        }
    }

    /// Playhead in seconds (lock-free)
    #[inline]
    pub fn position(&self) -> f64 {
        f64::from_bits(self.position.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set_position(&self, secs: f64) {
        self.position.store(secs.to_bits(), Ordering::Relaxed);
    }

    /// Whether the render thread is currently playing the source
    #[inline]
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    /// Whether the source stopped by reaching its end
    #[inline]
    pub fn has_ended(&self) -> bool {
        self.ended.load(Ordering::Relaxed)
    }

    /// Clear the end flag before a new start
    #[inline]
    pub fn clear_ended(&self) {
        self.ended.store(false, Ordering::Relaxed);
    }

    /// Simulate a natural end without rendering
    #[cfg(test)]
    pub(crate) fn mark_ended(&self) {
        self.playing.store(false, Ordering::Relaxed);
        self.ended.store(true, Ordering::Relaxed);
        self.set_position(0.0);
    }
}

impl Default for SourceAtomics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Transport {
    Idle,
    /// Waiting for the engine clock to reach `start_frame`
    Scheduled { start_frame: u64, offset: f64 },
    Playing,
}

/// Render-side buffer player
///
/// Reads the decoded buffer with linear interpolation. The read step is
/// `rate * source_rate / engine_rate`, so a buffer decoded at a different
/// sample rate still plays at the right speed.
pub(crate) struct SourceNode {
    buffer: Shared<AudioBuffer>,
    atomics: std::sync::Arc<SourceAtomics>,
    engine_rate: f64,
    rate: f64,
    looping: bool,
    transport: Transport,
    /// Read position in source frames
    read_pos: f64,
}

impl SourceNode {
    pub(crate) fn new(
        buffer: Shared<AudioBuffer>,
        atomics: std::sync::Arc<SourceAtomics>,
        engine_rate: u32,
    ) -> Self {
        Self {
            buffer,
            atomics,
            engine_rate: engine_rate as f64,
            rate: 1.0,
            looping: false,
            transport: Transport::Idle,
            read_pos: 0.0,
        }
    }

    fn source_rate(&self) -> f64 {
        self.buffer.sample_rate.max(1) as f64
    }

    fn step(&self) -> f64 {
        self.rate * self.source_rate() / self.engine_rate
    }

    /// Schedule playback at absolute engine frame `start_frame` from `offset` seconds
    pub(crate) fn start(&mut self, start_frame: u64, offset: f64) {
        let offset = (offset.max(0.0) * self.source_rate()).min(self.buffer.len() as f64);
        self.transport = Transport::Scheduled {
            start_frame,
            offset,
        };
        self.atomics.clear_ended();
        self.atomics.set_position(offset / self.source_rate());
    }

    pub(crate) fn stop(&mut self) {
        self.transport = Transport::Idle;
        self.atomics.playing.store(false, Ordering::Relaxed);
    }

    pub(crate) fn set_rate(&mut self, rate: f64) {
        if rate.is_finite() && rate > 0.0 {
            self.rate = rate;
        }
    }

    pub(crate) fn set_loop(&mut self, looping: bool) {
        self.looping = looping;
    }

    /// Render one quantum starting at absolute engine frame `first_frame`
    pub(crate) fn render(&mut self, out: &mut StereoBuffer, first_frame: u64) {
        out.fill_silence();
        if self.transport == Transport::Idle {
            return;
        }

        let step = self.step();
        let frames = self.buffer.frames.as_slice();
        let len = frames.len();
        let mut ended = false;

        for (i, sample) in out.iter_mut().enumerate() {
            if let Transport::Scheduled {
                start_frame,
                offset,
            } = self.transport
            {
                if first_frame + (i as u64) < start_frame {
                    continue;
                }
                self.transport = Transport::Playing;
                self.read_pos = offset;
                self.atomics.playing.store(true, Ordering::Relaxed);
            }

            if self.read_pos >= len as f64 {
                if self.looping && len > 0 {
                    self.read_pos %= len as f64;
                } else {
                    ended = true;
                    break;
                }
            }

            let index = self.read_pos as usize;
            let frac = (self.read_pos - index as f64) as f32;
            let current = frames[index];
            let next = if index + 1 < len {
                frames[index + 1]
            } else if self.looping {
                frames[0]
            } else {
                StereoSample::silence()
            };
            *sample = current.lerp(&next, frac);
            self.read_pos += step;
        }

        // A non-looping source whose last frame was just read ends here too
        if ended
            || (self.transport == Transport::Playing && !self.looping && self.read_pos >= len as f64)
        {
            self.finish();
        }

        if self.transport == Transport::Playing {
            self.atomics.set_position(self.read_pos / self.source_rate());
        }
    }

    fn finish(&mut self) {
        self.transport = Transport::Idle;
        self.read_pos = 0.0;
        self.atomics.set_position(0.0);
        self.atomics.playing.store(false, Ordering::Relaxed);
        self.atomics.ended.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::gc::gc_handle;
    use std::sync::Arc;

    fn ramp(len: usize, sample_rate: u32) -> Shared<AudioBuffer> {
        let frames = (0..len).map(|i| StereoSample::mono(i as f32)).collect();
        Shared::new(
            &gc_handle(),
            AudioBuffer::new(sample_rate, StereoBuffer::from_vec(frames)),
        )
    }

    fn node(len: usize, sample_rate: u32) -> (SourceNode, Arc<SourceAtomics>) {
        let atomics = Arc::new(SourceAtomics::new());
        (
            SourceNode::new(ramp(len, sample_rate), atomics.clone(), 48000),
            atomics,
        )
    }

    #[test]
    fn test_idle_source_is_silent() {
        let (mut source, _) = node(64, 48000);
        let mut out = StereoBuffer::silence(16);
        source.render(&mut out, 0);
        assert_eq!(out.peak(), 0.0);
    }

    #[test]
    fn test_scheduled_start_is_sample_exact() {
        let (mut source, atomics) = node(64, 48000);
        source.start(5, 0.0);

        let mut out = StereoBuffer::silence(16);
        source.render(&mut out, 0);

        assert_eq!(out[4].left, 0.0);
        assert_eq!(out[6].left, 1.0);
        assert_eq!(out[15].left, 10.0);
        assert!(atomics.is_playing());
    }

    #[test]
    fn test_double_rate_reads_every_other_frame() {
        let (mut source, _) = node(64, 48000);
        source.set_rate(2.0);
        source.start(0, 0.0);

        let mut out = StereoBuffer::silence(8);
        source.render(&mut out, 0);
        assert_eq!(out[3].left, 6.0);
    }

    #[test]
    fn test_source_rate_ratio_scales_step() {
        // 24kHz source on a 48kHz engine advances half a frame per output frame
        let (mut source, _) = node(64, 24000);
        source.start(0, 0.0);

        let mut out = StereoBuffer::silence(4);
        source.render(&mut out, 0);
        assert!((out[1].left - 0.5).abs() < 1e-6);
        assert!((out[2].left - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_natural_end_flags_ended() {
        let (mut source, atomics) = node(10, 48000);
        source.start(0, 0.0);

        let mut out = StereoBuffer::silence(16);
        source.render(&mut out, 0);

        assert!(atomics.has_ended());
        assert!(!atomics.is_playing());
        assert_eq!(atomics.position(), 0.0);
        assert_eq!(out[12].left, 0.0);
    }

    #[test]
    fn test_looping_wraps() {
        let (mut source, atomics) = node(10, 48000);
        source.set_loop(true);
        source.start(0, 0.0);

        let mut out = StereoBuffer::silence(16);
        source.render(&mut out, 0);

        assert!(!atomics.has_ended());
        assert_eq!(out[10].left, 0.0);
        assert_eq!(out[13].left, 3.0);
    }

    #[test]
    fn test_start_clears_ended() {
        let (mut source, atomics) = node(4, 48000);
        source.start(0, 0.0);
        let mut out = StereoBuffer::silence(8);
        source.render(&mut out, 0);
        assert!(atomics.has_ended());

        source.start(8, 0.0);
        assert!(!atomics.has_ended());
    }
}
