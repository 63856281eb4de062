//! RT-safe garbage collection for decoded source buffers
//!
//! Decoded tracks are shared between a `TrackVoice` and its source node on
//! the render thread through `basedrop::Shared`. When the last reference is
//! dropped on the render thread (node released mid-playback), deallocation
//! is deferred to a background collector instead of running inside the
//! audio callback.
//!
//! ```ignore
//! use basedrop::Shared;
//! use crate::engine::gc::gc_handle;
//!
//! let buffer = Shared::new(&gc_handle(), decoded);
//! ```

use basedrop::{Collector, Handle};
use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

/// How often the collector thread reclaims deferred drops
const COLLECT_INTERVAL: Duration = Duration::from_millis(100);

/// Global handle for creating Shared<T> allocations
static GC_HANDLE: OnceLock<Handle> = OnceLock::new();

/// Spawn the collector thread and return a handle to it
fn init_gc() -> Handle {
    let (tx, rx) = mpsc::channel();

    thread::Builder::new()
        .name("stemdeck-gc".to_string())
        .spawn(move || {
            // Collector is !Sync, so it lives on this thread only
            let mut collector = Collector::new();
            if tx.send(collector.handle()).is_err() {
                return;
            }

            log::info!("Source buffer GC thread started");

            loop {
                collector.collect();
                thread::sleep(COLLECT_INTERVAL);
            }
        })
        .expect("Failed to spawn stemdeck GC thread");

    rx.recv().expect("GC thread exited before sending its handle")
}

/// Get a handle for creating `Shared<T>` allocations
pub fn gc_handle() -> Handle {
    GC_HANDLE.get_or_init(init_gc).clone()
}
