//! Source loading
//!
//! Turns a track URL into a decoded [`AudioBuffer`]. Decoding is blocking
//! work, so it runs on tokio's blocking pool; [`spawn_load`] starts it right
//! away, which lets a session start every stem's decode before awaiting any
//! of them.
//!
//! Two loaders are provided:
//! - [`WavFileLoader`] reads WAV files from disk (`file://` URLs or paths)
//! - [`MemoryLoader`] serves pre-registered buffers (tests, generated audio)

mod memory;
mod wav;

pub use memory::MemoryLoader;
pub use wav::WavFileLoader;

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::error::{LoadError, LoadResult};
use crate::types::AudioBuffer;

/// Fetches and decodes a source by URL
pub trait SourceLoader: Send + Sync {
    /// Blocking fetch + decode
    fn load(&self, url: &str) -> LoadResult<AudioBuffer>;
}

/// Start loading `url` on the blocking pool
///
/// Must be called from within a tokio runtime.
pub fn spawn_load(loader: Arc<dyn SourceLoader>, url: String) -> JoinHandle<LoadResult<AudioBuffer>> {
    tokio::task::spawn_blocking(move || {
        log::debug!("Loading {}", url);
        let result = loader.load(&url);
        match &result {
            Ok(buffer) => log::info!(
                "Loaded {} ({:.2}s at {} Hz)",
                url,
                buffer.duration_secs(),
                buffer.sample_rate
            ),
            Err(e) => log::warn!("{}", e),
        }
        result
    })
}

/// Wait for a load started with [`spawn_load`]
pub async fn join_load(url: &str, handle: JoinHandle<LoadResult<AudioBuffer>>) -> LoadResult<AudioBuffer> {
    handle.await.unwrap_or_else(|e| {
        log::error!("Loader task for {} failed: {}", url, e);
        Err(LoadError::Interrupted {
            url: url.to_string(),
        })
    })
}

/// Load one source without blocking the async caller
pub async fn load_source(loader: Arc<dyn SourceLoader>, url: &str) -> LoadResult<AudioBuffer> {
    join_load(url, spawn_load(loader, url.to_string())).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StereoBuffer;

    struct PanickingLoader;

    impl SourceLoader for PanickingLoader {
        fn load(&self, _url: &str) -> LoadResult<AudioBuffer> {
            panic!("decoder crashed");
        }
    }

    #[tokio::test]
    async fn test_load_source_from_memory() {
        let loader = Arc::new(MemoryLoader::new());
        loader.insert("mem://a", AudioBuffer::new(48000, StereoBuffer::silence(480)));

        let buffer = load_source(loader, "mem://a").await.unwrap();
        assert_eq!(buffer.len(), 480);
    }

    #[tokio::test]
    async fn test_panicking_loader_reports_interrupted() {
        let result = load_source(Arc::new(PanickingLoader), "mem://boom").await;
        assert_eq!(
            result.unwrap_err(),
            LoadError::Interrupted {
                url: "mem://boom".to_string()
            }
        );
    }
}
