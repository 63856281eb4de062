//! Lock-free command queue between controllers and the render thread
//!
//! Controllers push commands through an `rtrb` ring; the renderer drains it
//! at every quantum boundary. Pushing never blocks, so a UI gesture can
//! never stall the audio callback and vice versa.
//!
//! ```ignore
//! let (tx, rx) = command_channel(1024);
//! tx.push(EngineCommand::apply(vec![GraphEdit::Stop { node }]));
//! renderer.process_commands(&mut rx);
//! ```
//!
//! Every payload is a `basedrop::Owned` pointer, so commands stay small and
//! the render thread hands their memory back to the collector when done.

use basedrop::Owned;

use super::gc::gc_handle;
use super::renderer::PreparedNode;
use super::{GraphEdit, NodeId};

/// Commands sent from controllers to the render thread
pub(crate) enum EngineCommand {
    /// Install a node prepared on the controller thread
    AddNode { id: NodeId, node: PreparedNode },
    /// Remove a node and every connection to it
    RemoveNode { id: NodeId },
    /// Apply a batch of edits before rendering the next quantum
    Apply(Owned<Vec<GraphEdit>>),
}

impl EngineCommand {
    /// Wrap a batch for the render thread
    pub(crate) fn apply(edits: Vec<GraphEdit>) -> Self {
        EngineCommand::Apply(Owned::new(&gc_handle(), edits))
    }
}

impl std::fmt::Debug for EngineCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineCommand::AddNode { id, node } => f
                .debug_struct("AddNode")
                .field("id", id)
                .field("node", node)
                .finish(),
            EngineCommand::RemoveNode { id } => {
                f.debug_struct("RemoveNode").field("id", id).finish()
            }
            EngineCommand::Apply(edits) => f.debug_tuple("Apply").field(&edits.len()).finish(),
        }
    }
}

/// Default capacity of the command queue
///
/// Session-wide operations (play_all, apply_store across stems) enqueue one
/// batch per voice, so this leaves ample headroom.
pub(crate) const COMMAND_QUEUE_CAPACITY: usize = 1024;

/// Create a new command channel (producer/consumer pair)
///
/// - Producer: owned by the controller-side engine handle
/// - Consumer: owned by the renderer
pub(crate) fn command_channel(
    capacity: usize,
) -> (rtrb::Producer<EngineCommand>, rtrb::Consumer<EngineCommand>) {
    rtrb::RingBuffer::new(capacity.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_channel_creation() {
        let (mut tx, mut rx) = command_channel(COMMAND_QUEUE_CAPACITY);

        tx.push(EngineCommand::RemoveNode { id: NodeId(3) }).unwrap();

        let cmd = rx.pop().unwrap();
        assert!(matches!(cmd, EngineCommand::RemoveNode { id: NodeId(3) }));
    }

    #[test]
    fn test_command_channel_empty() {
        let (_tx, mut rx) = command_channel(4);
        assert!(rx.pop().is_err());
    }

    #[test]
    fn test_command_size() {
        // Payloads live behind Owned pointers
        let size = std::mem::size_of::<EngineCommand>();
        assert!(size <= 24, "EngineCommand is {} bytes, expected <= 24", size);
    }
}
