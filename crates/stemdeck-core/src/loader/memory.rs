//! In-memory source loader

use std::collections::HashMap;
use std::sync::Mutex;

use super::SourceLoader;
use crate::error::{LoadError, LoadResult};
use crate::types::AudioBuffer;

/// Serves buffers registered under a URL
#[derive(Default)]
pub struct MemoryLoader {
    buffers: Mutex<HashMap<String, AudioBuffer>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the buffer served for `url`
    pub fn insert(&self, url: impl Into<String>, buffer: AudioBuffer) {
        self.buffers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(url.into(), buffer);
    }
}

impl SourceLoader for MemoryLoader {
    fn load(&self, url: &str) -> LoadResult<AudioBuffer> {
        self.buffers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(url)
            .cloned()
            .ok_or_else(|| LoadError::Fetch {
                url: url.to_string(),
                reason: "not found".to_string(),
            })
    }
}
