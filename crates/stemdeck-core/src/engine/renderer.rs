//! Render-thread side of the software engine
//!
//! The [`Renderer`] owns every node of the graph. Once per quantum it drains
//! the command queue, fires due envelope events, then walks the nodes in
//! topological order, summing each node's output into the inputs of the
//! nodes it is connected to. Whatever reaches [`DESTINATION`] is the engine
//! output.
//!
//! The render thread neither allocates nor frees. Node state and edit
//! batches arrive as `basedrop::Owned` values built on the controller side,
//! so dropping them here only queues them for the collector thread, and all
//! bookkeeping lives in storage sized for [`MAX_NODES`] up front.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use basedrop::Owned;

use super::command::EngineCommand;
use super::gc::gc_handle;
use super::source::SourceNode;
use super::{GraphEdit, NodeId, NodeSpec, DESTINATION, RENDER_QUANTUM};
use crate::effect::{native, Processor};
use crate::types::{StereoBuffer, StereoSample};

/// Capture point feeding a recorder ring
struct TapNode {
    sink: rtrb::Producer<StereoSample>,
    armed: bool,
}

enum NodeKind {
    Source(SourceNode),
    Effect(Box<dyn Processor>),
    Bus,
    Tap(TapNode),
}

/// Most nodes the renderer holds at once
pub const MAX_NODES: usize = 1024;

/// Most outgoing connections per node; further connects are ignored
pub const MAX_NODE_OUTPUTS: usize = 16;

/// A node built off the render thread, ready to be installed
pub(crate) struct PreparedNode(Owned<NodeSlot>);

impl PreparedNode {
    /// Build the render-side state for `spec`
    ///
    /// Runs on the controller thread so that effect buffers and connection
    /// storage are allocated before the node reaches the render thread.
    pub(crate) fn prepare(spec: NodeSpec, sample_rate: u32) -> Self {
        let kind = match spec {
            NodeSpec::Source { buffer, atomics } => {
                NodeKind::Source(SourceNode::new(buffer, atomics, sample_rate))
            }
            NodeSpec::Effect { kind, values } => {
                NodeKind::Effect(native::build(kind, sample_rate, &values))
            }
            NodeSpec::Bus => NodeKind::Bus,
            NodeSpec::Tap { sink } => NodeKind::Tap(TapNode { sink, armed: false }),
        };
        Self(Owned::new(&gc_handle(), NodeSlot::new(kind)))
    }
}

impl std::fmt::Debug for PreparedNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self.0.kind {
            NodeKind::Source(_) => "Source",
            NodeKind::Effect(_) => "Effect",
            NodeKind::Bus => "Bus",
            NodeKind::Tap(_) => "Tap",
        };
        write!(f, "PreparedNode({})", name)
    }
}

struct NodeSlot {
    kind: NodeKind,
    outputs: Vec<NodeId>,
    input: StereoBuffer,
    output: StereoBuffer,
}

impl NodeSlot {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            outputs: Vec::with_capacity(MAX_NODE_OUTPUTS),
            input: StereoBuffer::with_capacity(RENDER_QUANTUM),
            output: StereoBuffer::with_capacity(RENDER_QUANTUM),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum EventKind {
    Trigger,
    Release,
}

#[derive(Debug, Clone, Copy)]
struct ScheduledEvent {
    node: NodeId,
    frame: u64,
    kind: EventKind,
}

/// Owns and renders the audio graph
///
/// Created by [`SoftwareEngine::new`](super::SoftwareEngine::new) and handed
/// to whatever drives the render loop (device callback or headless driver).
pub struct Renderer {
    /// Live nodes sorted by id
    nodes: Vec<(NodeId, Owned<NodeSlot>)>,
    commands: rtrb::Consumer<EngineCommand>,
    sample_rate: u32,
    frames_rendered: u64,
    clock: Arc<AtomicU64>,
    /// Processing order as indices into `nodes`
    order: Vec<usize>,
    order_dirty: bool,
    indegree: Vec<usize>,
    ready: Vec<usize>,
    /// At most one trigger and one release per node
    events: Vec<ScheduledEvent>,
    mix: StereoBuffer,
}

impl Renderer {
    pub(crate) fn new(
        commands: rtrb::Consumer<EngineCommand>,
        sample_rate: u32,
        clock: Arc<AtomicU64>,
    ) -> Self {
        Self {
            nodes: Vec::with_capacity(MAX_NODES),
            commands,
            sample_rate,
            frames_rendered: 0,
            clock,
            order: Vec::with_capacity(MAX_NODES),
            order_dirty: false,
            indegree: Vec::with_capacity(MAX_NODES),
            ready: Vec::with_capacity(MAX_NODES),
            events: Vec::with_capacity(MAX_NODES * 2),
            mix: StereoBuffer::with_capacity(RENDER_QUANTUM),
        }
    }

    /// Engine sample rate in Hz
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Total frames rendered since creation
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Number of live nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Render `out.len()` frames of engine output
    pub fn render(&mut self, out: &mut StereoBuffer) {
        let total = out.len();
        let mut written = 0;
        while written < total {
            let frames = (total - written).min(RENDER_QUANTUM);
            self.render_quantum(frames);
            out.as_mut_slice()[written..written + frames].copy_from_slice(self.mix.as_slice());
            written += frames;
        }
    }

    /// Render into an interleaved device buffer with `channels` channels
    ///
    /// Mono devices get the average of both sides; channels past the second
    /// are filled with silence.
    pub fn render_interleaved(&mut self, data: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let total = data.len() / channels;
        let mut frame = 0;
        while frame < total {
            let frames = (total - frame).min(RENDER_QUANTUM);
            self.render_quantum(frames);
            for (i, sample) in self.mix.iter().enumerate() {
                let base = (frame + i) * channels;
                let slot = &mut data[base..base + channels];
                if channels == 1 {
                    slot[0] = (sample.left + sample.right) * 0.5;
                } else {
                    slot[0] = sample.left;
                    slot[1] = sample.right;
                    slot[2..].fill(0.0);
                }
            }
            frame += frames;
        }
        let tail = total * channels;
        data[tail..].fill(0.0);
    }

    fn render_quantum(&mut self, frames: usize) {
        self.process_commands();
        self.fire_events(frames);

        if self.order_dirty {
            self.sort_nodes();
        }

        for (_, slot) in self.nodes.iter_mut() {
            slot.input.set_len_from_capacity(frames);
            slot.input.fill_silence();
            slot.output.set_len_from_capacity(frames);
        }
        self.mix.set_len_from_capacity(frames);
        self.mix.fill_silence();

        let first_frame = self.frames_rendered;
        for position in 0..self.order.len() {
            let index = self.order[position];
            let slot: &mut NodeSlot = &mut self.nodes[index].1;

            match &mut slot.kind {
                NodeKind::Source(source) => source.render(&mut slot.output, first_frame),
                NodeKind::Effect(processor) => {
                    slot.output.copy_from(&slot.input);
                    processor.process(&mut slot.output);
                }
                NodeKind::Bus => slot.output.copy_from(&slot.input),
                NodeKind::Tap(tap) => {
                    slot.output.copy_from(&slot.input);
                    if tap.armed {
                        for sample in slot.output.iter() {
                            // A full ring drops the overflow instead of blocking
                            if tap.sink.push(*sample).is_err() {
                                break;
                            }
                        }
                    }
                }
            }

            // Moved out and back so targets can be borrowed; no allocation
            let output = std::mem::take(&mut slot.output);
            let targets = std::mem::take(&mut slot.outputs);
            for target in &targets {
                if *target == DESTINATION {
                    self.mix.add_buffer(&output);
                } else if let Some(dst) = self.index_of(*target) {
                    self.nodes[dst].1.input.add_buffer(&output);
                }
            }
            let slot: &mut NodeSlot = &mut self.nodes[index].1;
            slot.output = output;
            slot.outputs = targets;
        }

        self.frames_rendered += frames as u64;
        self.clock.store(self.frames_rendered, Ordering::Relaxed);
    }

    /// Drain every pending command
    pub(crate) fn process_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            match command {
                EngineCommand::AddNode { id, node } => self.add_node(id, node),
                EngineCommand::RemoveNode { id } => self.remove_node(id),
                EngineCommand::Apply(edits) => {
                    for edit in edits.iter() {
                        self.apply_edit(*edit);
                    }
                }
            }
        }
    }

    fn index_of(&self, id: NodeId) -> Option<usize> {
        self.nodes.binary_search_by_key(&id, |(node, _)| *node).ok()
    }

    fn add_node(&mut self, id: NodeId, node: PreparedNode) {
        if self.nodes.len() == self.nodes.capacity() {
            // The engine caps live nodes, so this only drops a stray node
            return;
        }
        match self.nodes.binary_search_by_key(&id, |(node, _)| *node) {
            Ok(index) => self.nodes[index].1 = node.0,
            Err(index) => self.nodes.insert(index, (id, node.0)),
        }
        self.order_dirty = true;
    }

    fn remove_node(&mut self, id: NodeId) {
        if let Some(index) = self.index_of(id) {
            self.nodes.remove(index);
            for (_, slot) in self.nodes.iter_mut() {
                slot.outputs.retain(|target| *target != id);
            }
            self.events.retain(|event| event.node != id);
            self.order_dirty = true;
        }
    }

    fn frame_at(&self, secs: f64) -> u64 {
        (secs.max(0.0) * self.sample_rate as f64).round() as u64
    }

    fn apply_edit(&mut self, edit: GraphEdit) {
        match edit {
            GraphEdit::DisconnectAll { node } => {
                if let Some(index) = self.index_of(node) {
                    self.nodes[index].1.outputs.clear();
                    self.order_dirty = true;
                }
            }
            GraphEdit::Connect { from, to } => {
                if to != DESTINATION && self.index_of(to).is_none() {
                    return;
                }
                if let Some(index) = self.index_of(from) {
                    let outputs = &mut self.nodes[index].1.outputs;
                    if !outputs.contains(&to) && outputs.len() < MAX_NODE_OUTPUTS {
                        outputs.push(to);
                        self.order_dirty = true;
                    }
                }
            }
            GraphEdit::SetParam { node, index, value } => {
                if let Some(NodeKind::Effect(processor)) = self.kind_mut(node) {
                    processor.set_param(index, value);
                }
            }
            GraphEdit::Reset { node } => {
                if let Some(NodeKind::Effect(processor)) = self.kind_mut(node) {
                    processor.reset();
                }
            }
            GraphEdit::Start { node, at, offset } => {
                let start_frame = self.frame_at(at).max(self.frames_rendered);
                if let Some(NodeKind::Source(source)) = self.kind_mut(node) {
                    source.start(start_frame, offset);
                }
            }
            GraphEdit::Stop { node } => {
                if let Some(NodeKind::Source(source)) = self.kind_mut(node) {
                    source.stop();
                }
            }
            GraphEdit::SetRate { node, rate } => {
                if let Some(NodeKind::Source(source)) = self.kind_mut(node) {
                    source.set_rate(rate);
                }
            }
            GraphEdit::SetLoop { node, looping } => {
                if let Some(NodeKind::Source(source)) = self.kind_mut(node) {
                    source.set_loop(looping);
                }
            }
            GraphEdit::Trigger { node, at } => self.schedule(node, at, EventKind::Trigger),
            GraphEdit::Release { node, at } => self.schedule(node, at, EventKind::Release),
            GraphEdit::ArmTap { node, armed } => {
                if let Some(NodeKind::Tap(tap)) = self.kind_mut(node) {
                    tap.armed = armed;
                }
            }
        }
    }

    fn kind_mut(&mut self, node: NodeId) -> Option<&mut NodeKind> {
        let index = self.index_of(node)?;
        Some(&mut self.nodes[index].1.kind)
    }

    fn schedule(&mut self, node: NodeId, at: f64, kind: EventKind) {
        if self.index_of(node).is_none() {
            return;
        }
        match kind {
            // A new trigger supersedes everything pending from the previous cycle
            EventKind::Trigger => self.events.retain(|event| event.node != node),
            // A rescheduled release replaces the pending one
            EventKind::Release => self
                .events
                .retain(|event| event.node != node || matches!(event.kind, EventKind::Trigger)),
        }
        let frame = self.frame_at(at);
        self.events.push(ScheduledEvent { node, frame, kind });
    }

    /// Fire envelope events due before the end of this quantum
    fn fire_events(&mut self, frames: usize) {
        let end = self.frames_rendered + frames as u64;
        let mut i = 0;
        while i < self.events.len() {
            let event = self.events[i];
            if event.frame >= end {
                i += 1;
                continue;
            }
            self.events.swap_remove(i);
            if let Some(NodeKind::Effect(processor)) = self.kind_mut(event.node) {
                match event.kind {
                    EventKind::Trigger => processor.trigger(),
                    EventKind::Release => processor.release(),
                }
            }
        }
    }

    /// Recompute the processing order (Kahn's algorithm)
    ///
    /// Nodes caught in a cycle are left out and stay silent.
    fn sort_nodes(&mut self) {
        self.indegree.clear();
        self.indegree.resize(self.nodes.len(), 0);
        for (_, slot) in &self.nodes {
            for target in &slot.outputs {
                if let Some(index) = self.index_of(*target) {
                    self.indegree[index] += 1;
                }
            }
        }

        self.order.clear();
        self.ready.clear();
        for (index, count) in self.indegree.iter().enumerate() {
            if *count == 0 {
                self.ready.push(index);
            }
        }

        while let Some(index) = self.ready.pop() {
            self.order.push(index);
            for target in &self.nodes[index].1.outputs {
                if let Ok(next) = self.nodes.binary_search_by_key(target, |(node, _)| *node) {
                    self.indegree[next] -= 1;
                    if self.indegree[next] == 0 {
                        self.ready.push(next);
                    }
                }
            }
        }
        self.order_dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::EffectKind;
    use crate::engine::command::command_channel;
    use crate::engine::gc::gc_handle;
    use crate::engine::SourceAtomics;
    use crate::types::AudioBuffer;
    use basedrop::Shared;

    fn renderer() -> (rtrb::Producer<EngineCommand>, Renderer) {
        let (tx, rx) = command_channel(64);
        (tx, Renderer::new(rx, 48000, Arc::new(AtomicU64::new(0))))
    }

    fn constant_source(value: f32, len: usize) -> NodeSpec {
        let frames = StereoBuffer::from_vec(vec![StereoSample::mono(value); len]);
        NodeSpec::Source {
            buffer: Shared::new(&gc_handle(), AudioBuffer::new(48000, frames)),
            atomics: Arc::new(SourceAtomics::new()),
        }
    }

    fn add(tx: &mut rtrb::Producer<EngineCommand>, id: u64, spec: NodeSpec) {
        tx.push(EngineCommand::AddNode {
            id: NodeId(id),
            node: PreparedNode::prepare(spec, 48000),
        })
        .unwrap();
    }

    fn apply(tx: &mut rtrb::Producer<EngineCommand>, edits: Vec<GraphEdit>) {
        tx.push(EngineCommand::apply(edits)).unwrap();
    }

    #[test]
    fn test_unconnected_source_is_silent() {
        let (mut tx, mut r) = renderer();
        add(&mut tx, 1, constant_source(0.5, 1000));
        apply(&mut tx, vec![GraphEdit::Start { node: NodeId(1), at: 0.0, offset: 0.0 }]);

        let mut out = StereoBuffer::silence(256);
        r.render(&mut out);
        assert_eq!(out.peak(), 0.0);
        assert_eq!(r.frames_rendered(), 256);
    }

    #[test]
    fn test_fan_out_sums_at_bus() {
        let (mut tx, mut r) = renderer();
        add(&mut tx, 1, constant_source(0.25, 1000));
        add(&mut tx, 2, NodeSpec::Bus);
        add(&mut tx, 3, NodeSpec::Bus);
        add(&mut tx, 4, NodeSpec::Bus);
        apply(
            &mut tx,
            vec![
                GraphEdit::Connect { from: NodeId(1), to: NodeId(2) },
                GraphEdit::Connect { from: NodeId(2), to: NodeId(3) },
                GraphEdit::Connect { from: NodeId(2), to: NodeId(4) },
                GraphEdit::Connect { from: NodeId(3), to: NodeId(4) },
                GraphEdit::Connect { from: NodeId(4), to: DESTINATION },
                GraphEdit::Start { node: NodeId(1), at: 0.0, offset: 0.0 },
            ],
        );

        let mut out = StereoBuffer::silence(64);
        r.render(&mut out);
        assert!((out[10].left - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_disconnect_all_silences() {
        let (mut tx, mut r) = renderer();
        add(&mut tx, 1, constant_source(0.5, 10_000));
        apply(
            &mut tx,
            vec![
                GraphEdit::Connect { from: NodeId(1), to: DESTINATION },
                GraphEdit::Start { node: NodeId(1), at: 0.0, offset: 0.0 },
            ],
        );
        let mut out = StereoBuffer::silence(128);
        r.render(&mut out);
        assert!(out.peak() > 0.4);

        apply(&mut tx, vec![GraphEdit::DisconnectAll { node: NodeId(1) }]);
        r.render(&mut out);
        assert_eq!(out.peak(), 0.0);
    }

    #[test]
    fn test_gain_effect_in_path() {
        let (mut tx, mut r) = renderer();
        add(&mut tx, 1, constant_source(1.0, 10_000));
        add(
            &mut tx,
            2,
            NodeSpec::Effect {
                kind: EffectKind::Gain,
                values: vec![0.5, 0.0],
            },
        );
        apply(
            &mut tx,
            vec![
                GraphEdit::Connect { from: NodeId(1), to: NodeId(2) },
                GraphEdit::Connect { from: NodeId(2), to: DESTINATION },
                GraphEdit::Start { node: NodeId(1), at: 0.0, offset: 0.0 },
            ],
        );
        let mut out = StereoBuffer::silence(128);
        r.render(&mut out);
        assert!((out[100].left - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_armed_tap_captures() {
        let (mut tx, mut r) = renderer();
        let (sink, mut ring) = rtrb::RingBuffer::new(1024);
        add(&mut tx, 1, constant_source(0.5, 10_000));
        add(&mut tx, 2, NodeSpec::Tap { sink });
        apply(
            &mut tx,
            vec![
                GraphEdit::Connect { from: NodeId(1), to: NodeId(2) },
                GraphEdit::Start { node: NodeId(1), at: 0.0, offset: 0.0 },
            ],
        );
        let mut out = StereoBuffer::silence(128);
        r.render(&mut out);
        assert_eq!(ring.slots(), 0);

        apply(&mut tx, vec![GraphEdit::ArmTap { node: NodeId(2), armed: true }]);
        r.render(&mut out);
        assert_eq!(ring.slots(), 128);
        assert_eq!(ring.pop().unwrap(), StereoSample::mono(0.5));
    }

    #[test]
    fn test_remove_node_drops_connections() {
        let (mut tx, mut r) = renderer();
        add(&mut tx, 1, constant_source(0.5, 10_000));
        add(&mut tx, 2, NodeSpec::Bus);
        apply(
            &mut tx,
            vec![
                GraphEdit::Connect { from: NodeId(1), to: NodeId(2) },
                GraphEdit::Connect { from: NodeId(2), to: DESTINATION },
                GraphEdit::Start { node: NodeId(1), at: 0.0, offset: 0.0 },
            ],
        );
        let mut out = StereoBuffer::silence(128);
        r.render(&mut out);
        assert!(out.peak() > 0.0);

        tx.push(EngineCommand::RemoveNode { id: NodeId(2) }).unwrap();
        r.render(&mut out);
        assert_eq!(out.peak(), 0.0);
        assert_eq!(r.node_count(), 1);
    }

    fn envelope() -> NodeSpec {
        NodeSpec::Effect {
            kind: EffectKind::Envelope,
            values: EffectKind::Envelope.default_values(),
        }
    }

    fn pending(r: &Renderer, node: u64) -> Vec<(u64, bool)> {
        let mut events: Vec<_> = r
            .events
            .iter()
            .filter(|event| event.node == NodeId(node))
            .map(|event| (event.frame, matches!(event.kind, EventKind::Release)))
            .collect();
        events.sort();
        events
    }

    #[test]
    fn test_release_replaces_pending_release() {
        let (mut tx, mut r) = renderer();
        add(&mut tx, 1, envelope());
        add(&mut tx, 2, envelope());
        apply(
            &mut tx,
            vec![
                GraphEdit::Trigger { node: NodeId(1), at: 1.0 },
                GraphEdit::Release { node: NodeId(1), at: 3.0 },
                GraphEdit::Release { node: NodeId(2), at: 2.0 },
            ],
        );
        r.process_commands();
        apply(&mut tx, vec![GraphEdit::Release { node: NodeId(1), at: 1.5 }]);
        r.process_commands();

        assert_eq!(pending(&r, 1), vec![(48000, false), (72000, true)]);
        assert_eq!(pending(&r, 2), vec![(96000, true)]);
    }

    #[test]
    fn test_trigger_clears_previous_cycle() {
        let (mut tx, mut r) = renderer();
        add(&mut tx, 1, envelope());
        apply(
            &mut tx,
            vec![
                GraphEdit::Trigger { node: NodeId(1), at: 1.0 },
                GraphEdit::Release { node: NodeId(1), at: 3.0 },
                GraphEdit::Trigger { node: NodeId(1), at: 2.0 },
            ],
        );
        r.process_commands();
        assert_eq!(pending(&r, 1), vec![(96000, false)]);
    }

    #[test]
    fn test_events_for_missing_nodes_are_dropped() {
        let (mut tx, mut r) = renderer();
        apply(&mut tx, vec![GraphEdit::Release { node: NodeId(9), at: 1.0 }]);
        r.process_commands();
        assert!(r.events.is_empty());
    }

    #[test]
    fn test_connections_are_capped() {
        let (mut tx, mut r) = renderer();
        add(&mut tx, 1, NodeSpec::Bus);
        let mut edits = Vec::new();
        for id in 2..(MAX_NODE_OUTPUTS as u64 + 3) {
            add(&mut tx, id, NodeSpec::Bus);
            edits.push(GraphEdit::Connect { from: NodeId(1), to: NodeId(id) });
        }
        apply(&mut tx, edits);
        r.process_commands();

        let index = r.index_of(NodeId(1)).unwrap();
        assert_eq!(r.nodes[index].1.outputs.len(), MAX_NODE_OUTPUTS);
        assert_eq!(r.nodes[index].1.outputs.capacity(), MAX_NODE_OUTPUTS);
    }

    #[test]
    fn test_nodes_stay_sorted_and_rendered_in_order() {
        let (mut tx, mut r) = renderer();
        // Installed out of id order, with the chain running high id to low
        add(&mut tx, 7, NodeSpec::Bus);
        add(&mut tx, 3, constant_source(0.25, 10_000));
        add(&mut tx, 5, NodeSpec::Bus);
        apply(
            &mut tx,
            vec![
                GraphEdit::Connect { from: NodeId(3), to: NodeId(7) },
                GraphEdit::Connect { from: NodeId(7), to: NodeId(5) },
                GraphEdit::Connect { from: NodeId(5), to: DESTINATION },
                GraphEdit::Start { node: NodeId(3), at: 0.0, offset: 0.0 },
            ],
        );
        let mut out = StereoBuffer::silence(128);
        r.render(&mut out);

        let ids: Vec<u64> = r.nodes.iter().map(|(id, _)| id.0).collect();
        assert_eq!(ids, vec![3, 5, 7]);
        assert!((out[10].left - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_render_interleaved_stereo() {
        let (mut tx, mut r) = renderer();
        add(&mut tx, 1, constant_source(0.5, 10_000));
        apply(
            &mut tx,
            vec![
                GraphEdit::Connect { from: NodeId(1), to: DESTINATION },
                GraphEdit::Start { node: NodeId(1), at: 0.0, offset: 0.0 },
            ],
        );
        let mut data = vec![1.0_f32; 300 * 2];
        r.render_interleaved(&mut data, 2);
        assert!(data.iter().all(|s| (*s - 0.5).abs() < 1e-6));
        assert_eq!(r.frames_rendered(), 300);
    }
}
