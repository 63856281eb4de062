//! Controller side of the software engine

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::command::{command_channel, EngineCommand};
use super::renderer::{PreparedNode, Renderer, MAX_NODES};
use super::{AudioGraph, GraphEdit, NodeId, NodeSpec};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};

/// Pure-Rust implementation of [`AudioGraph`]
///
/// Node allocation and edits are forwarded over the command ring to the
/// paired [`Renderer`]. The producer is behind a mutex because several
/// voices may share the engine; the render thread never touches that lock.
///
/// Live nodes are counted here and capped at [`MAX_NODES`], the size of the
/// renderer's preallocated node table.
pub struct SoftwareEngine {
    sample_rate: u32,
    commands: Mutex<rtrb::Producer<EngineCommand>>,
    next_id: AtomicU64,
    live_nodes: AtomicUsize,
    clock: Arc<AtomicU64>,
}

impl SoftwareEngine {
    /// Create an engine and the renderer that must be driven for it to advance
    pub fn new(config: &EngineConfig) -> (Arc<Self>, Renderer) {
        let (tx, rx) = command_channel(config.command_queue_capacity);
        let clock = Arc::new(AtomicU64::new(0));
        let renderer = Renderer::new(rx, config.sample_rate, clock.clone());

        log::info!(
            "Software engine created: {} Hz, queue capacity {}",
            config.sample_rate,
            config.command_queue_capacity
        );

        let engine = Arc::new(Self {
            sample_rate: config.sample_rate,
            commands: Mutex::new(tx),
            // NodeId(0) is the destination
            next_id: AtomicU64::new(1),
            live_nodes: AtomicUsize::new(0),
            clock,
        });
        (engine, renderer)
    }

    fn send(&self, command: EngineCommand) -> EngineResult<()> {
        let mut tx = self
            .commands
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        tx.push(command).map_err(|_| {
            log::error!("Engine command queue full, render thread not draining");
            EngineError::QueueFull
        })
    }
}

impl AudioGraph for SoftwareEngine {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.clock.load(Ordering::Relaxed) as f64 / self.sample_rate as f64
    }

    fn create_node(&self, spec: NodeSpec) -> EngineResult<NodeId> {
        let reserved = self
            .live_nodes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < MAX_NODES).then_some(live + 1)
            });
        if reserved.is_err() {
            log::error!("Audio graph full, refusing {:?}", spec);
            return Err(EngineError::NodeLimit(MAX_NODES));
        }

        let id = NodeId(self.next_id.fetch_add(1, Ordering::Relaxed));
        log::debug!("create node {:?}: {:?}", id, spec);
        let node = PreparedNode::prepare(spec, self.sample_rate);
        if let Err(e) = self.send(EngineCommand::AddNode { id, node }) {
            self.live_nodes.fetch_sub(1, Ordering::AcqRel);
            return Err(e);
        }
        Ok(id)
    }

    fn submit(&self, edits: Vec<GraphEdit>) -> EngineResult<()> {
        if edits.is_empty() {
            return Ok(());
        }
        self.send(EngineCommand::apply(edits))
    }

    fn release_node(&self, node: NodeId) -> EngineResult<()> {
        log::debug!("release node {:?}", node);
        self.send(EngineCommand::RemoveNode { id: node })?;
        self.live_nodes.fetch_sub(1, Ordering::AcqRel);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::EffectKind;
    use crate::engine::DESTINATION;
    use crate::types::StereoBuffer;

    #[test]
    fn test_clock_follows_renderer() {
        let (engine, mut renderer) = SoftwareEngine::new(&EngineConfig::default());
        assert_eq!(engine.current_time(), 0.0);

        let mut out = StereoBuffer::silence(4800);
        renderer.render(&mut out);
        assert!((engine.current_time() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_node_ids_skip_destination() {
        let (engine, mut renderer) = SoftwareEngine::new(&EngineConfig::default());
        let id = engine.create_node(NodeSpec::Bus).unwrap();
        assert_ne!(id, DESTINATION);

        engine
            .submit(vec![GraphEdit::Connect { from: id, to: DESTINATION }])
            .unwrap();
        renderer.process_commands();
        assert_eq!(renderer.node_count(), 1);
    }

    #[test]
    fn test_queue_full_is_reported() {
        let config = EngineConfig {
            command_queue_capacity: 2,
            ..EngineConfig::default()
        };
        let (engine, _renderer) = SoftwareEngine::new(&config);
        let values = EffectKind::Gain.default_values();
        for _ in 0..2 {
            engine
                .create_node(NodeSpec::Effect {
                    kind: EffectKind::Gain,
                    values: values.clone(),
                })
                .unwrap();
        }
        assert_eq!(
            engine.create_node(NodeSpec::Bus),
            Err(EngineError::QueueFull)
        );
    }

    #[test]
    fn test_node_limit_matches_renderer_table() {
        let (engine, mut renderer) = SoftwareEngine::new(&EngineConfig::default());
        let mut ids = Vec::new();
        while ids.len() < MAX_NODES {
            ids.push(engine.create_node(NodeSpec::Bus).unwrap());
            // Keep the queue drained so only the node cap can refuse
            renderer.process_commands();
        }
        assert_eq!(
            engine.create_node(NodeSpec::Bus),
            Err(EngineError::NodeLimit(MAX_NODES))
        );
        assert_eq!(renderer.node_count(), MAX_NODES);

        engine.release_node(ids[0]).unwrap();
        let id = engine.create_node(NodeSpec::Bus).unwrap();
        renderer.process_commands();
        assert_eq!(renderer.node_count(), MAX_NODES);
        assert!(ids.iter().all(|old| *old != id));
    }
}
