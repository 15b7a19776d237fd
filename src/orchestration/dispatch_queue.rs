use std::collections::VecDeque;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::job::RunPriority;

const LANES: usize = 3;

fn lane_of(priority: RunPriority) -> usize {
    priority as usize
}

/// Priority-aware FIFO queue of runnable run ids.
///
/// Three lanes (Instant, Deferred, Normal) scanned in that order; FIFO within
/// a lane. `pop_eligible` lets the dispatcher skip runs whose budgets are
/// saturated without stalling runs behind them — a backlog of one job type
/// must never starve unrelated types.
#[derive(Default)]
pub struct DispatchQueue {
    lanes: Mutex<[VecDeque<Uuid>; LANES]>,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, run_id: Uuid, priority: RunPriority) {
        self.lanes.lock()[lane_of(priority)].push_back(run_id);
    }

    /// Remove and return the first queued run (highest lane first, FIFO
    /// within a lane) for which `eligible` returns true.
    pub fn pop_eligible(&self, mut eligible: impl FnMut(Uuid) -> bool) -> Option<Uuid> {
        let mut lanes = self.lanes.lock();
        for lane in lanes.iter_mut() {
            for index in 0..lane.len() {
                let run_id = lane[index];
                if eligible(run_id) {
                    lane.remove(index);
                    return Some(run_id);
                }
            }
        }
        None
    }

    /// Remove every queued run matching the predicate (expiry sweeps,
    /// shutdown cancellation). Returns the removed ids.
    pub fn drain_where(&self, mut predicate: impl FnMut(Uuid) -> bool) -> Vec<Uuid> {
        let mut lanes = self.lanes.lock();
        let mut drained = Vec::new();
        for lane in lanes.iter_mut() {
            let mut keep = VecDeque::with_capacity(lane.len());
            while let Some(run_id) = lane.pop_front() {
                if predicate(run_id) {
                    drained.push(run_id);
                } else {
                    keep.push_back(run_id);
                }
            }
            *lane = keep;
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.lanes.lock().iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
