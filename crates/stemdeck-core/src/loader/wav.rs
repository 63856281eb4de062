//! WAV file loader

use std::path::{Path, PathBuf};

use super::SourceLoader;
use crate::error::{LoadError, LoadResult};
use crate::types::{AudioBuffer, StereoBuffer, StereoSample};

/// Loads WAV files from the local filesystem
///
/// Accepts plain paths and `file://` URLs. Relative paths resolve against
/// `root` when one is set. Mono files are duplicated to both channels; files
/// with more than two channels keep the first two.
#[derive(Debug, Clone, Default)]
pub struct WavFileLoader {
    root: Option<PathBuf>,
}

impl WavFileLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative paths against `root`
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, url: &str) -> PathBuf {
        let path = Path::new(url.strip_prefix("file://").unwrap_or(url));
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl SourceLoader for WavFileLoader {
    fn load(&self, url: &str) -> LoadResult<AudioBuffer> {
        let path = self.resolve(url);
        let reader = hound::WavReader::open(&path).map_err(|e| match e {
            hound::Error::IoError(io) => LoadError::Fetch {
                url: url.to_string(),
                reason: io.to_string(),
            },
            other => LoadError::Decode {
                url: url.to_string(),
                reason: other.to_string(),
            },
        })?;

        let spec = reader.spec();
        let decode_err = |e: hound::Error| LoadError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()
                    .map_err(decode_err)?
            }
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(decode_err)?,
        };

        let channels = spec.channels.max(1) as usize;
        let frames: Vec<StereoSample> = samples
            .chunks_exact(channels)
            .map(|frame| match frame {
                [mono] => StereoSample::mono(*mono),
                [left, right, ..] => StereoSample::new(*left, *right),
                [] => StereoSample::silence(),
            })
            .collect();

        Ok(AudioBuffer::new(spec.sample_rate, StereoBuffer::from_vec(frames)))
    }
}
