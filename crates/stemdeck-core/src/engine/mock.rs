//! Recording engine for controller tests
//!
//! Keeps a model of the graph (nodes, connections, parameter values, source
//! transport) and every submitted batch, without rendering anything.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{AudioGraph, EngineHandle, GraphEdit, NodeId, NodeSpec, SourceAtomics, DESTINATION};
use crate::effect::EffectKind;
use crate::error::{EngineError, EngineResult};
use crate::types::StereoSample;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct MockTransport {
    pub playing: bool,
    pub rate: f64,
    pub looping: bool,
    pub started_at: f64,
    pub offset: f64,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            playing: false,
            rate: 1.0,
            looping: false,
            started_at: 0.0,
            offset: 0.0,
        }
    }
}

enum MockNode {
    Source {
        atomics: Arc<SourceAtomics>,
        transport: MockTransport,
    },
    Effect(EffectKind),
    Bus,
    Tap {
        sink: rtrb::Producer<StereoSample>,
        armed: bool,
    },
}

/// Decides whether a submitted edit is rejected
type FailurePredicate = Box<dyn Fn(&GraphEdit) -> bool + Send>;

#[derive(Default)]
struct MockState {
    next_id: u64,
    nodes: BTreeMap<NodeId, MockNode>,
    edges: BTreeSet<(NodeId, NodeId)>,
    params: BTreeMap<(NodeId, usize), f32>,
    resets: BTreeMap<NodeId, usize>,
    releases: BTreeMap<NodeId, usize>,
    batches: Vec<Vec<GraphEdit>>,
    time: f64,
    reject: Option<FailurePredicate>,
}

pub(crate) struct MockEngine {
    state: Mutex<MockState>,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState {
                next_id: 1,
                ..MockState::default()
            }),
        })
    }

    pub fn handle(self: &Arc<Self>) -> EngineHandle {
        self.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn set_time(&self, secs: f64) {
        self.lock().time = secs;
    }

    /// Fail every later batch containing an edit matching `predicate`
    ///
    /// A rejected batch fails with `QueueFull` and leaves the model untouched.
    pub fn fail_edits(&self, predicate: impl Fn(&GraphEdit) -> bool + Send + 'static) {
        self.lock().reject = Some(Box::new(predicate));
    }

    pub fn clear_failures(&self) {
        self.lock().reject = None;
    }

    /// Move a source's reported playhead as if it had rendered up to `secs`
    pub fn set_position(&self, node: NodeId, secs: f64) {
        if let Some(MockNode::Source { atomics, .. }) = self.lock().nodes.get(&node) {
            atomics.set_position(secs);
        }
    }

    pub fn last_param(&self, node: NodeId, index: usize) -> Option<f32> {
        self.lock().params.get(&(node, index)).copied()
    }

    pub fn release_count(&self, node: NodeId) -> usize {
        self.lock().releases.get(&node).copied().unwrap_or(0)
    }

    pub fn reset_count(&self, node: NodeId) -> usize {
        self.lock().resets.get(&node).copied().unwrap_or(0)
    }

    pub fn is_live(&self, node: NodeId) -> bool {
        self.lock().nodes.contains_key(&node)
    }

    pub fn connected(&self, from: NodeId, to: NodeId) -> bool {
        self.lock().edges.contains(&(from, to))
    }

    pub fn outputs(&self, node: NodeId) -> Vec<NodeId> {
        self.lock()
            .edges
            .iter()
            .filter(|(from, _)| *from == node)
            .map(|(_, to)| *to)
            .collect()
    }

    /// Whether audio can flow from `from` to `to`
    pub fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        let state = self.lock();
        let mut stack = vec![from];
        let mut seen = BTreeSet::new();
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if !seen.insert(node) {
                continue;
            }
            stack.extend(
                state
                    .edges
                    .iter()
                    .filter(|(f, _)| *f == node)
                    .map(|(_, t)| *t),
            );
        }
        false
    }

    pub fn batch_count(&self) -> usize {
        self.lock().batches.len()
    }

    pub fn batches(&self) -> Vec<Vec<GraphEdit>> {
        self.lock().batches.clone()
    }

    pub fn effect_nodes(&self, kind: EffectKind) -> Vec<NodeId> {
        self.lock()
            .nodes
            .iter()
            .filter(|(_, node)| matches!(node, MockNode::Effect(k) if *k == kind))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn source_nodes(&self) -> Vec<NodeId> {
        self.lock()
            .nodes
            .iter()
            .filter(|(_, node)| matches!(node, MockNode::Source { .. }))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn transport(&self, node: NodeId) -> Option<MockTransport> {
        match self.lock().nodes.get(&node) {
            Some(MockNode::Source { transport, .. }) => Some(*transport),
            _ => None,
        }
    }

    /// Simulate a source reaching its end
    pub fn end_source(&self, node: NodeId) {
        let mut state = self.lock();
        if let Some(MockNode::Source { atomics, transport }) = state.nodes.get_mut(&node) {
            transport.playing = false;
            atomics.mark_ended();
        }
    }

    pub fn tap_nodes(&self) -> Vec<NodeId> {
        self.lock()
            .nodes
            .iter()
            .filter(|(_, node)| matches!(node, MockNode::Tap { .. }))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn tap_armed(&self, node: NodeId) -> bool {
        matches!(self.lock().nodes.get(&node), Some(MockNode::Tap { armed: true, .. }))
    }

    /// Push samples into a tap's capture ring as if they had been rendered
    pub fn feed_tap(&self, node: NodeId, samples: &[StereoSample]) {
        let mut state = self.lock();
        if let Some(MockNode::Tap { sink, armed: true }) = state.nodes.get_mut(&node) {
            for sample in samples {
                if sink.push(*sample).is_err() {
                    break;
                }
            }
        }
    }

    fn apply(state: &mut MockState, edit: &GraphEdit) {
        match *edit {
            GraphEdit::DisconnectAll { node } => state.edges.retain(|(from, _)| *from != node),
            GraphEdit::Connect { from, to } => {
                if to == DESTINATION || state.nodes.contains_key(&to) {
                    state.edges.insert((from, to));
                }
            }
            GraphEdit::SetParam { node, index, value } => {
                state.params.insert((node, index), value);
            }
            GraphEdit::Reset { node } => *state.resets.entry(node).or_default() += 1,
            GraphEdit::Start { node, at, offset } => {
                if let Some(MockNode::Source { atomics, transport }) = state.nodes.get_mut(&node) {
                    transport.playing = true;
                    transport.started_at = at;
                    transport.offset = offset;
                    atomics.clear_ended();
                }
            }
            GraphEdit::Stop { node } => {
                if let Some(MockNode::Source { transport, .. }) = state.nodes.get_mut(&node) {
                    transport.playing = false;
                }
            }
            GraphEdit::SetRate { node, rate } => {
                if let Some(MockNode::Source { transport, .. }) = state.nodes.get_mut(&node) {
                    transport.rate = rate;
                }
            }
            GraphEdit::SetLoop { node, looping } => {
                if let Some(MockNode::Source { transport, .. }) = state.nodes.get_mut(&node) {
                    transport.looping = looping;
                }
            }
            GraphEdit::Trigger { .. } | GraphEdit::Release { .. } => {}
            GraphEdit::ArmTap { node, armed } => {
                if let Some(MockNode::Tap { armed: current, .. }) = state.nodes.get_mut(&node) {
                    *current = armed;
                }
            }
        }
    }
}

impl AudioGraph for MockEngine {
    fn sample_rate(&self) -> u32 {
        48000
    }

    fn current_time(&self) -> f64 {
        self.lock().time
    }

    fn create_node(&self, spec: NodeSpec) -> EngineResult<NodeId> {
        let mut state = self.lock();
        let id = NodeId(state.next_id);
        state.next_id += 1;

        let node = match spec {
            NodeSpec::Source { atomics, .. } => MockNode::Source {
                atomics,
                transport: MockTransport::default(),
            },
            NodeSpec::Effect { kind, values } => {
                for (index, value) in values.into_iter().enumerate() {
                    state.params.insert((id, index), value);
                }
                MockNode::Effect(kind)
            }
            NodeSpec::Bus => MockNode::Bus,
            NodeSpec::Tap { sink } => MockNode::Tap { sink, armed: false },
        };
        state.nodes.insert(id, node);
        Ok(id)
    }

    fn submit(&self, edits: Vec<GraphEdit>) -> EngineResult<()> {
        let mut state = self.lock();
        if let Some(reject) = &state.reject {
            if edits.iter().any(|edit| reject(edit)) {
                return Err(EngineError::QueueFull);
            }
        }
        for edit in &edits {
            Self::apply(&mut state, edit);
        }
        state.batches.push(edits);
        Ok(())
    }

    fn release_node(&self, node: NodeId) -> EngineResult<()> {
        let mut state = self.lock();
        *state.releases.entry(node).or_default() += 1;
        state.nodes.remove(&node);
        state.edges.retain(|(from, to)| *from != node && *to != node);
        Ok(())
    }
}
