//! Latency compensation across every chain on an engine
//!
//! Chains started on the same sample only stay sample-aligned at the output
//! if their processing latencies match. The pitch stage adds the stretcher's
//! latency whenever it shifts and none otherwise, so each chain carries a
//! compensation delay set to (slowest chain's latency − its own latency).
//!
//! Chains join a shared [`LatencyCompensator`] and report their latency
//! whenever it changes; the compensator recomputes the global maximum and
//! pushes new delays to every member in one edit batch.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::engine::{EngineHandle, GraphEdit, NodeId};

struct Member {
    /// Latency the chain reports, in frames
    latency: u32,
    /// The chain's compensation delay node
    delay: NodeId,
    /// Compensation last accepted by the engine, in frames
    applied: u32,
}

#[derive(Default)]
struct State {
    next_key: u64,
    members: BTreeMap<u64, Member>,
    global_max: u32,
}

/// Keeps the compensation delays of a group of chains in step
pub struct LatencyCompensator {
    engine: EngineHandle,
    state: Mutex<State>,
}

impl LatencyCompensator {
    pub fn new(engine: EngineHandle) -> Arc<Self> {
        Arc::new(Self {
            engine,
            state: Mutex::new(State::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a chain's compensation delay node with zero latency
    pub(crate) fn join(self: &Arc<Self>, delay: NodeId) -> LatencyMember {
        let mut state = self.lock();
        let key = state.next_key;
        state.next_key += 1;
        state.members.insert(
            key,
            Member {
                latency: 0,
                delay,
                applied: 0,
            },
        );
        self.recalculate(&mut state);
        LatencyMember {
            key,
            group: self.clone(),
        }
    }

    /// Largest latency reported by any member, in frames
    pub fn global_latency(&self) -> u32 {
        self.lock().global_max
    }

    /// Number of chains in the group
    pub fn len(&self) -> usize {
        self.lock().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().members.is_empty()
    }

    fn set_latency(&self, key: u64, latency: u32) {
        let mut state = self.lock();
        match state.members.get_mut(&key) {
            Some(member) if member.latency != latency => member.latency = latency,
            _ => return,
        }
        self.recalculate(&mut state);
    }

    fn compensation(&self, key: u64) -> u32 {
        self.lock().members.get(&key).map_or(0, |m| m.applied)
    }

    fn leave(&self, key: u64) {
        let mut state = self.lock();
        if state.members.remove(&key).is_some() {
            self.recalculate(&mut state);
        }
    }

    /// Recompute the global maximum and push every changed delay
    fn recalculate(&self, state: &mut State) {
        let old_max = state.global_max;
        state.global_max = state
            .members
            .values()
            .map(|m| m.latency)
            .max()
            .unwrap_or(0);

        if state.global_max != old_max {
            log::info!(
                "[LATENCY] Global max changed: {} -> {} frames",
                old_max,
                state.global_max
            );
        }

        let sample_rate = self.engine.sample_rate() as f32;
        let global_max = state.global_max;
        let changed: Vec<(u64, u32, NodeId)> = state
            .members
            .iter()
            .filter_map(|(key, m)| {
                let target = global_max - m.latency;
                (m.applied != target).then_some((*key, target, m.delay))
            })
            .collect();
        if changed.is_empty() {
            return;
        }

        let edits = changed
            .iter()
            .map(|(_, target, delay)| GraphEdit::SetParam {
                node: *delay,
                index: 0,
                value: *target as f32 / sample_rate,
            })
            .collect();

        // On failure the old values stay recorded, so the next change retries
        if let Err(e) = self.engine.submit(edits) {
            log::error!("[LATENCY] Failed to push compensation delays: {}", e);
            return;
        }
        for (key, target, _) in changed {
            if let Some(member) = state.members.get_mut(&key) {
                member.applied = target;
            }
        }
    }
}

/// A chain's seat in a [`LatencyCompensator`]; leaves the group on drop
pub(crate) struct LatencyMember {
    key: u64,
    group: Arc<LatencyCompensator>,
}

impl LatencyMember {
    /// Report the chain's current latency
    pub fn set_latency(&self, latency: u32) {
        self.group.set_latency(self.key, latency);
    }

    /// Delay currently applied to the chain, in frames
    pub fn compensation(&self) -> u32 {
        self.group.compensation(self.key)
    }
}

impl Drop for LatencyMember {
    fn drop(&mut self) {
        self.group.leave(self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::EffectKind;
    use crate::engine::mock::MockEngine;
    use crate::engine::{AudioGraph, NodeSpec};

    fn delay_node(engine: &Arc<MockEngine>) -> NodeId {
        engine
            .create_node(NodeSpec::Effect {
                kind: EffectKind::Compensation,
                values: vec![0.0],
            })
            .unwrap()
    }

    #[test]
    fn test_slower_member_holds_back_the_rest() {
        let engine = MockEngine::new();
        let group = LatencyCompensator::new(engine.handle());
        let (da, db, dc) = (delay_node(&engine), delay_node(&engine), delay_node(&engine));
        let a = group.join(da);
        let b = group.join(db);
        let c = group.join(dc);

        b.set_latency(4800);
        c.set_latency(1200);

        assert_eq!(group.global_latency(), 4800);
        assert_eq!(a.compensation(), 4800);
        assert_eq!(b.compensation(), 0);
        assert_eq!(c.compensation(), 3600);
        assert_eq!(engine.last_param(da, 0), Some(0.1));
        assert_eq!(engine.last_param(db, 0), Some(0.0));
        assert_eq!(engine.last_param(dc, 0), Some(0.075));
    }

    #[test]
    fn test_changes_go_out_in_one_batch() {
        let engine = MockEngine::new();
        let group = LatencyCompensator::new(engine.handle());
        let members: Vec<_> = (0..4).map(|_| group.join(delay_node(&engine))).collect();

        let before = engine.batch_count();
        members[0].set_latency(2400);
        assert_eq!(engine.batch_count(), before + 1);
        assert_eq!(engine.batches().pop().unwrap().len(), 3);

        // Same latency again changes nothing
        members[0].set_latency(2400);
        assert_eq!(engine.batch_count(), before + 1);
    }

    #[test]
    fn test_leaving_lowers_the_maximum() {
        let engine = MockEngine::new();
        let group = LatencyCompensator::new(engine.handle());
        let da = delay_node(&engine);
        let a = group.join(da);
        let b = group.join(delay_node(&engine));

        b.set_latency(4800);
        assert_eq!(a.compensation(), 4800);

        drop(b);
        assert_eq!(group.len(), 1);
        assert_eq!(group.global_latency(), 0);
        assert_eq!(a.compensation(), 0);
        assert_eq!(engine.last_param(da, 0), Some(0.0));
    }

    #[test]
    fn test_rejected_push_is_retried() {
        let engine = MockEngine::new();
        let group = LatencyCompensator::new(engine.handle());
        let da = delay_node(&engine);
        let a = group.join(da);
        let b = group.join(delay_node(&engine));

        engine.fail_edits(|_| true);
        b.set_latency(4800);
        assert_eq!(a.compensation(), 0);

        engine.clear_failures();
        b.set_latency(4801);
        assert_eq!(a.compensation(), 4801);
        assert_eq!(engine.last_param(da, 0), Some(4801.0 / 48000.0));
    }
}
