//! Audio engine - graph seam, software renderer and lifecycle
//!
//! Controllers never touch DSP directly. They allocate nodes and submit
//! batches of [`GraphEdit`]s through the [`AudioGraph`] trait; the render
//! thread applies each batch atomically at the next render quantum.

mod command;
mod driver;
pub mod gc;
mod lifecycle;
mod renderer;
mod software;
mod source;

#[cfg(test)]
pub(crate) mod mock;

pub use driver::{HeadlessEngine, HeadlessLauncher};
pub use lifecycle::{EngineLauncher, LazyEngine};
pub use renderer::{Renderer, MAX_NODES, MAX_NODE_OUTPUTS};
pub use software::SoftwareEngine;
pub use source::SourceAtomics;

use std::sync::Arc;

use basedrop::Shared;

use crate::effect::EffectKind;
use crate::error::EngineResult;
use crate::types::{AudioBuffer, StereoSample};

/// Frames rendered per quantum; queued edits take effect on these boundaries
pub const RENDER_QUANTUM: usize = 128;

/// Identifier of a node in the audio graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u64);

/// The engine output; connecting a node here makes it audible
pub const DESTINATION: NodeId = NodeId(0);

/// Description of a node to allocate
pub enum NodeSpec {
    /// A buffer player with varispeed, looping and scheduled start
    Source {
        buffer: Shared<AudioBuffer>,
        atomics: Arc<SourceAtomics>,
    },
    /// An effect processor with initial parameter values
    Effect { kind: EffectKind, values: Vec<f32> },
    /// A summing point with no processing
    Bus,
    /// Passes audio through and copies it into a capture ring while armed
    Tap { sink: rtrb::Producer<StereoSample> },
}

impl std::fmt::Debug for NodeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeSpec::Source { buffer, .. } => f
                .debug_struct("Source")
                .field("frames", &buffer.len())
                .field("sample_rate", &buffer.sample_rate)
                .finish(),
            NodeSpec::Effect { kind, values } => f
                .debug_struct("Effect")
                .field("kind", kind)
                .field("values", values)
                .finish(),
            NodeSpec::Bus => f.write_str("Bus"),
            NodeSpec::Tap { .. } => f.write_str("Tap"),
        }
    }
}

/// One structural or transport change to the graph
///
/// Edits in a batch are applied together before the next quantum renders.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GraphEdit {
    /// Remove every outgoing connection of a node
    DisconnectAll { node: NodeId },
    /// Route a node's output into another node (or [`DESTINATION`])
    Connect { from: NodeId, to: NodeId },
    /// Set an effect parameter by index
    SetParam { node: NodeId, index: usize, value: f32 },
    /// Clear an effect's internal state
    Reset { node: NodeId },
    /// Start a source at engine time `at` (seconds) from `offset` (seconds)
    Start { node: NodeId, at: f64, offset: f64 },
    /// Stop a source immediately
    Stop { node: NodeId },
    /// Change a source's playback rate
    SetRate { node: NodeId, rate: f64 },
    /// Change a source's loop flag
    SetLoop { node: NodeId, looping: bool },
    /// Start an envelope cycle at engine time `at`
    Trigger { node: NodeId, at: f64 },
    /// Enter an envelope's release stage at engine time `at`
    Release { node: NodeId, at: f64 },
    /// Start or stop copying a tap's input into its capture ring
    ArmTap { node: NodeId, armed: bool },
}

/// The audio engine as seen by controllers
///
/// Implemented by [`SoftwareEngine`] and by the recording mock used in tests.
pub trait AudioGraph: Send + Sync {
    /// Engine sample rate in Hz
    fn sample_rate(&self) -> u32;

    /// Engine time in seconds (frames rendered / sample rate)
    fn current_time(&self) -> f64;

    /// Allocate a node; it is silent until connected
    fn create_node(&self, spec: NodeSpec) -> EngineResult<NodeId>;

    /// Apply a batch of edits atomically at the next render quantum
    fn submit(&self, edits: Vec<GraphEdit>) -> EngineResult<()>;

    /// Disconnect and free a node
    fn release_node(&self, node: NodeId) -> EngineResult<()>;

    /// Set a single effect parameter
    fn set_param(&self, node: NodeId, index: usize, value: f32) -> EngineResult<()> {
        self.submit(vec![GraphEdit::SetParam { node, index, value }])
    }
}

/// Shared handle to an engine
pub type EngineHandle = Arc<dyn AudioGraph>;
