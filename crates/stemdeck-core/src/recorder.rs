//! Bounce recorder - captures a voice's processed output in real time
//!
//! A bounce plays the track once from the top through its whole chain and
//! copies the summed chain output (ahead of the audibility fader, so muted
//! tracks bounce fine) into a lock-free ring via a tap node. The recorder
//! drains the ring on a timer while it waits, then encodes the captured
//! frames with hound.
//!
//! ```text
//! start ──► wait (sleep until duration/rate + post-roll, draining) ──► finish
//!              │                                                        │
//!              └── voice stopped ──► Cancelled ──► abort ───────────────┴──► voice restored
//! ```

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::RecorderConfig;
use crate::engine::{EngineHandle, GraphEdit, NodeId, NodeSpec};
use crate::error::{RecordingError, RecordingResult};
use crate::types::{StereoSample, TrackId};
use crate::voice::{TrackVoice, TransportSnapshot};

/// Capture ring length in seconds of audio
const RING_SECONDS: usize = 2;

/// How often the capture ring is drained while waiting
const DRAIN_INTERVAL: Duration = Duration::from_millis(50);

/// Output encodings a caller may ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BounceFormat {
    Wav32Float,
    Wav24,
    Wav16,
    Flac,
    Mp3,
}

impl BounceFormat {
    /// Format used when nothing requested is supported
    pub const FALLBACK: BounceFormat = BounceFormat::Wav16;

    /// Whether this build can encode the format
    pub fn is_supported(&self) -> bool {
        matches!(
            self,
            BounceFormat::Wav32Float | BounceFormat::Wav24 | BounceFormat::Wav16
        )
    }

    /// First supported format in preference order, else 16-bit WAV
    pub fn negotiate(preferred: &[BounceFormat]) -> BounceFormat {
        match preferred.iter().copied().find(BounceFormat::is_supported) {
            Some(format) => format,
            None => {
                log::info!(
                    "None of {:?} can be encoded, falling back to {:?}",
                    preferred,
                    Self::FALLBACK
                );
                Self::FALLBACK
            }
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            BounceFormat::Wav32Float | BounceFormat::Wav24 | BounceFormat::Wav16 => "audio/wav",
            BounceFormat::Flac => "audio/flac",
            BounceFormat::Mp3 => "audio/mpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            BounceFormat::Wav32Float | BounceFormat::Wav24 | BounceFormat::Wav16 => "wav",
            BounceFormat::Flac => "flac",
            BounceFormat::Mp3 => "mp3",
        }
    }

    fn wav_spec(&self, sample_rate: u32) -> Option<hound::WavSpec> {
        let (bits_per_sample, sample_format) = match self {
            BounceFormat::Wav32Float => (32, hound::SampleFormat::Float),
            BounceFormat::Wav24 => (24, hound::SampleFormat::Int),
            BounceFormat::Wav16 => (16, hound::SampleFormat::Int),
            BounceFormat::Flac | BounceFormat::Mp3 => return None,
        };
        Some(hound::WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample,
            sample_format,
        })
    }
}

/// An encoded bounce
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedBlob {
    pub track: TrackId,
    pub filename: String,
    pub format: BounceFormat,
    pub sample_rate: u32,
    /// Captured stereo frames
    pub frames: usize,
    pub bytes: Vec<u8>,
}

impl RecordedBlob {
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames as f64 / self.sample_rate as f64
    }

    /// Hand the blob to a sink under its own filename
    pub fn save_to(&self, sink: &dyn BlobSink) -> RecordingResult<PathBuf> {
        sink.save(&self.filename, self.mime_type(), &self.bytes)
    }
}

/// Somewhere to put a finished bounce
pub trait BlobSink: Send + Sync {
    fn save(&self, filename: &str, mime_type: &str, bytes: &[u8]) -> RecordingResult<PathBuf>;
}

/// Writes blobs as files into a directory
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl BlobSink for DirectorySink {
    fn save(&self, filename: &str, mime_type: &str, bytes: &[u8]) -> RecordingResult<PathBuf> {
        std::fs::create_dir_all(&self.dir).map_err(|e| RecordingError::Save(e.to_string()))?;

        let path = self.dir.join(filename);
        let temp = path.with_extension("part");
        std::fs::write(&temp, bytes).map_err(|e| RecordingError::Save(e.to_string()))?;
        std::fs::rename(&temp, &path).map_err(|e| RecordingError::Save(e.to_string()))?;

        log::info!("Saved {} ({}, {} bytes)", path.display(), mime_type, bytes.len());
        Ok(path)
    }
}

/// Encode stereo frames as WAV
pub fn encode_wav(frames: &[StereoSample], sample_rate: u32, format: BounceFormat) -> RecordingResult<Vec<u8>> {
    let format = if format.is_supported() {
        format
    } else {
        BounceFormat::FALLBACK
    };
    let spec = format
        .wav_spec(sample_rate)
        .ok_or_else(|| RecordingError::Encode(format!("{:?} is not a WAV format", format)))?;
    let encode_err = |e: hound::Error| RecordingError::Encode(e.to_string());

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(encode_err)?;
        for frame in frames {
            for sample in [frame.left, frame.right] {
                match format {
                    BounceFormat::Wav32Float => writer.write_sample(sample),
                    BounceFormat::Wav24 => {
                        writer.write_sample((sample.clamp(-1.0, 1.0) * 8388607.0) as i32)
                    }
                    _ => writer.write_sample((sample.clamp(-1.0, 1.0) * 32767.0) as i16),
                }
                .map_err(encode_err)?;
            }
        }
        writer.finalize().map_err(encode_err)?;
    }
    Ok(cursor.into_inner())
}

/// Starts bounces on one engine
pub struct Recorder {
    engine: EngineHandle,
    config: RecorderConfig,
}

impl Recorder {
    pub fn new(engine: EngineHandle, config: RecorderConfig) -> Self {
        Self { engine, config }
    }

    /// Begin capturing `voice`
    ///
    /// The voice is stopped if needed, looping is switched off for the
    /// capture and playback restarts from the top. An empty `formats` uses
    /// the configured preference list.
    pub fn start(&self, voice: &mut TrackVoice, formats: &[BounceFormat]) -> RecordingResult<Bounce> {
        if voice.is_recording() {
            return Err(RecordingError::AlreadyRecording);
        }
        if !voice.is_loaded() {
            return Err(RecordingError::NotReady);
        }

        let format = if formats.is_empty() {
            BounceFormat::negotiate(&self.config.preferred_formats)
        } else {
            BounceFormat::negotiate(formats)
        };
        let snapshot = voice.snapshot();
        let sample_rate = self.engine.sample_rate();

        let (producer, consumer) = rtrb::RingBuffer::new(sample_rate as usize * RING_SECONDS);
        let tap = voice
            .stop()
            .and_then(|()| self.engine.create_node(NodeSpec::Tap { sink: producer }));
        let tap = match tap {
            Ok(tap) => tap,
            Err(e) => {
                log::error!("{}: failed to prepare bounce: {}", voice.id(), e);
                if let Err(restore) = voice.restore(snapshot) {
                    log::warn!("{}: restore failed: {}", voice.id(), restore);
                }
                return Err(e.into());
            }
        };
        let stops = voice.stop_events();

        let mut bounce = Bounce {
            engine: self.engine.clone(),
            track: voice.id(),
            tap,
            consumer,
            captured: Vec::new(),
            format,
            sample_rate,
            deadline: Instant::now(),
            stops,
            snapshot,
        };

        voice.set_recording(true);
        if let Err(e) = bounce.arm(voice) {
            log::error!("{}: failed to start bounce: {}", voice.id(), e);
            if let Err(cleanup) = bounce.cleanup(voice) {
                log::warn!("{}: bounce cleanup failed: {}", voice.id(), cleanup);
            }
            return Err(e);
        }

        let length = voice.duration() / voice.playback_rate() as f64
            + self.config.post_roll_ms as f64 / 1000.0;
        bounce.deadline = Instant::now() + Duration::from_secs_f64(length);
        bounce.captured.reserve((length * sample_rate as f64) as usize);

        log::info!(
            "{}: bouncing {:.2}s as {:?}",
            voice.id(),
            length,
            bounce.format
        );
        Ok(bounce)
    }

    /// Capture a whole bounce and encode it
    pub async fn record_chain_output(
        &self,
        voice: &mut TrackVoice,
        formats: &[BounceFormat],
    ) -> RecordingResult<RecordedBlob> {
        let mut bounce = self.start(voice, formats)?;
        match bounce.wait().await {
            Ok(()) => bounce.finish(voice),
            Err(e) => {
                if let Err(cleanup) = bounce.abort(voice) {
                    log::warn!("{}: bounce cleanup failed: {}", voice.id(), cleanup);
                }
                Err(e)
            }
        }
    }
}

/// A capture in progress
pub struct Bounce {
    engine: EngineHandle,
    track: TrackId,
    tap: NodeId,
    consumer: rtrb::Consumer<StereoSample>,
    captured: Vec<StereoSample>,
    format: BounceFormat,
    sample_rate: u32,
    deadline: Instant,
    stops: watch::Receiver<u64>,
    snapshot: TransportSnapshot,
}

impl Bounce {
    fn arm(&mut self, voice: &mut TrackVoice) -> RecordingResult<()> {
        voice.chain_mut().attach_tap(self.tap)?;
        self.engine.submit(vec![GraphEdit::ArmTap {
            node: self.tap,
            armed: true,
        }])?;
        voice.set_loop(false);
        voice.seek(0.0)?;
        voice.play()?;
        Ok(())
    }

    /// Negotiated output format
    pub fn format(&self) -> BounceFormat {
        self.format
    }

    /// When the capture is complete
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Frames captured so far
    pub fn captured_frames(&self) -> usize {
        self.captured.len()
    }

    fn drain(&mut self) {
        let available = self.consumer.slots();
        if available == 0 {
            return;
        }
        if let Ok(chunk) = self.consumer.read_chunk(available) {
            self.captured.extend(chunk.into_iter());
        }
    }

    /// Wait out the capture without blocking the runtime
    ///
    /// Fails with `Cancelled` if the voice is stopped meanwhile.
    pub async fn wait(&mut self) -> RecordingResult<()> {
        let mut drain = tokio::time::interval(DRAIN_INTERVAL);
        let until = tokio::time::sleep_until(self.deadline);
        tokio::pin!(until);

        loop {
            tokio::select! {
                _ = &mut until => {
                    self.drain();
                    return Ok(());
                }
                _ = drain.tick() => self.drain(),
                _ = self.stops.changed() => {
                    log::warn!("{}: playback stopped during bounce", self.track);
                    return Err(RecordingError::Cancelled);
                }
            }
        }
    }

    /// Detach the tap and put the voice back; the first failure is returned
    fn cleanup(&mut self, voice: &mut TrackVoice) -> RecordingResult<()> {
        self.drain();

        let disarm = self.engine.submit(vec![GraphEdit::ArmTap {
            node: self.tap,
            armed: false,
        }]);
        let detach = voice.chain_mut().detach_tap();
        let release = self.engine.release_node(self.tap);
        voice.set_recording(false);
        let restore = voice.restore(self.snapshot);

        disarm.and(detach).and(release).and(restore)?;
        Ok(())
    }

    /// End the capture, restore the voice and encode
    pub fn finish(mut self, voice: &mut TrackVoice) -> RecordingResult<RecordedBlob> {
        self.cleanup(voice)?;

        let bytes = encode_wav(&self.captured, self.sample_rate, self.format)?;
        let blob = RecordedBlob {
            track: self.track,
            filename: format!("{}-bounce.{}", self.track, self.format.extension()),
            format: self.format,
            sample_rate: self.sample_rate,
            frames: self.captured.len(),
            bytes,
        };
        log::info!(
            "{}: bounce finished ({:.2}s, {} bytes)",
            self.track,
            blob.duration_secs(),
            blob.bytes.len()
        );
        Ok(blob)
    }

    /// Drop the capture and restore the voice
    pub fn abort(mut self, voice: &mut TrackVoice) -> RecordingResult<()> {
        log::info!("{}: bounce aborted", self.track);
        self.cleanup(voice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::MockEngine;
    use crate::types::{AudioBuffer, StereoBuffer};
    use crate::voice::VoiceState;
    use std::sync::Arc;

    fn loaded_voice(engine: &Arc<MockEngine>, secs: usize) -> TrackVoice {
        let mut voice = TrackVoice::new(TrackId(7), engine.handle()).unwrap();
        voice.begin_load();
        voice
            .finish_load("mem://stem", Ok(AudioBuffer::new(48000, StereoBuffer::silence(48000 * secs))))
            .unwrap();
        voice
    }

    fn recorder(engine: &Arc<MockEngine>) -> Recorder {
        Recorder::new(engine.handle(), RecorderConfig::default())
    }

    #[test]
    fn test_negotiate_falls_back_to_wav16() {
        assert_eq!(
            BounceFormat::negotiate(&[BounceFormat::Mp3, BounceFormat::Wav24]),
            BounceFormat::Wav24
        );
        assert_eq!(
            BounceFormat::negotiate(&[BounceFormat::Flac, BounceFormat::Mp3]),
            BounceFormat::Wav16
        );
        assert_eq!(BounceFormat::negotiate(&[]), BounceFormat::Wav16);
    }

    #[test]
    fn test_encode_wav_header() {
        let frames = vec![StereoSample::new(0.5, -0.5); 100];
        for (format, bits) in [
            (BounceFormat::Wav16, 16),
            (BounceFormat::Wav24, 24),
            (BounceFormat::Wav32Float, 32),
        ] {
            let bytes = encode_wav(&frames, 44100, format).unwrap();
            let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
            assert_eq!(reader.spec().channels, 2);
            assert_eq!(reader.spec().sample_rate, 44100);
            assert_eq!(reader.spec().bits_per_sample, bits);
            assert_eq!(reader.duration(), 100);
        }
    }

    #[test]
    fn test_unloaded_voice_is_not_ready() {
        let engine = MockEngine::new();
        let mut voice = TrackVoice::new(TrackId(7), engine.handle()).unwrap();
        let result = recorder(&engine).start(&mut voice, &[]);
        assert!(matches!(result, Err(RecordingError::NotReady)));
        assert!(engine.tap_nodes().is_empty());
    }

    #[tokio::test]
    async fn test_second_bounce_is_rejected() {
        let engine = MockEngine::new();
        let mut voice = loaded_voice(&engine, 1);
        let recorder = recorder(&engine);

        let bounce = recorder.start(&mut voice, &[]).unwrap();
        assert!(voice.is_recording());
        assert!(matches!(
            recorder.start(&mut voice, &[]),
            Err(RecordingError::AlreadyRecording)
        ));
        bounce.abort(&mut voice).unwrap();
        assert!(!voice.is_recording());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounce_captures_and_restores() {
        let engine = MockEngine::new();
        let mut voice = loaded_voice(&engine, 2);
        voice.set_loop(true);
        voice.set_playback_rate(2.0);
        voice.seek(0.5).unwrap();
        let source = engine.source_nodes()[0];

        let recorder = recorder(&engine);
        let mut bounce = recorder.start(&mut voice, &[BounceFormat::Flac]).unwrap();
        assert_eq!(bounce.format(), BounceFormat::Wav16);

        // Capture runs without looping, from the top
        let transport = engine.transport(source).unwrap();
        assert!(!transport.looping);
        assert_eq!(transport.offset, 0.0);

        let tap = engine.tap_nodes()[0];
        assert!(engine.tap_armed(tap));
        assert_eq!(voice.chain().tap(), Some(tap));

        // 2 s at 2x plus 500 ms post-roll
        let expected = Instant::now() + Duration::from_millis(1500);
        assert!(bounce.deadline() <= expected + Duration::from_millis(1));
        assert!(bounce.deadline() + Duration::from_millis(1) >= expected);

        engine.feed_tap(tap, &vec![StereoSample::mono(0.25); 4800]);
        bounce.wait().await.unwrap();
        assert_eq!(bounce.captured_frames(), 4800);

        let blob = bounce.finish(&mut voice).unwrap();
        assert_eq!(blob.frames, 4800);
        assert_eq!(blob.filename, "track-7-bounce.wav");
        assert_eq!(blob.mime_type(), "audio/wav");

        assert!(!engine.is_live(tap));
        assert_eq!(voice.chain().tap(), None);
        assert!(voice.looping());
        assert!(engine.transport(source).unwrap().looping);
        assert_ne!(voice.state(), VoiceState::Playing);
        assert_eq!(voice.position(), 0.5);
    }

    /// Loaded voice looping and playing from 1 s
    fn running_voice(engine: &Arc<MockEngine>) -> TrackVoice {
        let mut voice = loaded_voice(engine, 4);
        voice.set_loop(true);
        voice.seek(1.0).unwrap();
        voice.play().unwrap();
        voice
    }

    fn assert_restored(engine: &MockEngine, voice: &TrackVoice) {
        let transport = engine.transport(engine.source_nodes()[0]).unwrap();
        assert!(transport.playing);
        assert!(transport.looping);
        assert_eq!(transport.offset, 1.0);
        assert!(voice.looping());
        assert_eq!(voice.state(), VoiceState::Playing);
        assert!(!voice.is_recording());
        assert!(engine.tap_nodes().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_arm_restores_voice() {
        let engine = MockEngine::new();
        let mut voice = running_voice(&engine);
        engine.fail_edits(|edit| matches!(edit, GraphEdit::ArmTap { armed: true, .. }));

        let result = recorder(&engine).start(&mut voice, &[]);
        assert_eq!(
            result.err(),
            Some(RecordingError::Engine(crate::error::EngineError::QueueFull))
        );
        assert_restored(&engine, &voice);
        assert_eq!(voice.chain().tap(), None);
    }

    #[tokio::test]
    async fn test_rejected_tap_wiring_restores_voice() {
        let engine = MockEngine::new();
        let mut voice = running_voice(&engine);
        engine.fail_edits(|edit| matches!(edit, GraphEdit::Connect { .. }));

        let result = recorder(&engine).start(&mut voice, &[]);
        assert!(matches!(result, Err(RecordingError::Engine(_))));
        assert_restored(&engine, &voice);

        // Wiring works again once the engine accepts edits
        engine.clear_failures();
        let bounce = recorder(&engine).start(&mut voice, &[]).unwrap();
        bounce.abort(&mut voice).unwrap();
        assert_restored(&engine, &voice);
    }

    #[tokio::test]
    async fn test_rejected_stop_restores_voice() {
        let engine = MockEngine::new();
        let mut voice = running_voice(&engine);
        engine.fail_edits(|edit| matches!(edit, GraphEdit::Stop { .. }));

        let result = recorder(&engine).start(&mut voice, &[]);
        assert!(matches!(result, Err(RecordingError::Engine(_))));
        engine.clear_failures();
        assert_restored(&engine, &voice);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_and_restores() {
        let engine = MockEngine::new();
        let mut voice = loaded_voice(&engine, 4);
        voice.play().unwrap();
        let source = engine.source_nodes()[0];

        let recorder = recorder(&engine);
        let mut bounce = recorder.start(&mut voice, &[]).unwrap();

        let (waited, _) = tokio::join!(bounce.wait(), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            voice.stop().unwrap();
        });
        assert_eq!(waited, Err(RecordingError::Cancelled));

        bounce.abort(&mut voice).unwrap();
        assert!(!voice.is_recording());
        // Was playing before the bounce, so it plays again
        assert_eq!(voice.state(), VoiceState::Playing);
        assert!(engine.transport(source).unwrap().playing);
        assert!(engine.tap_nodes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_chain_output_end_to_end() {
        let engine = MockEngine::new();
        let mut voice = loaded_voice(&engine, 1);

        let blob = recorder(&engine)
            .record_chain_output(&mut voice, &[BounceFormat::Wav24])
            .await
            .unwrap();
        assert_eq!(blob.format, BounceFormat::Wav24);
        assert_eq!(blob.sample_rate, 48000);
        assert!(!voice.is_recording());
    }

    #[test]
    fn test_directory_sink_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path().join("bounces"));
        let bytes = encode_wav(&[StereoSample::silence(); 10], 48000, BounceFormat::Wav16).unwrap();

        let path = sink.save("take.wav", "audio/wav", &bytes).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), bytes);
    }
}
