use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use plantbridge_core::{NodeId, SubscriptionId, VariableSnapshot};

/// Sampling interval granted to a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sampling {
    /// Delivery period in model ticks, at least 1.
    pub ticks: u64,
    /// The revised interval reported back to the client.
    pub interval_ms: u64,
}

impl Sampling {
    /// Clamp `requested_ms` into `[floor, ceiling]`, then round it up to a
    /// whole number of ticks (at least one).
    pub fn revise(requested_ms: u64, tick: Duration, floor: Duration, ceiling: Duration) -> Self {
        let tick_ms = millis(tick).max(1);
        let floor_ms = millis(floor);
        let wanted = requested_ms.clamp(floor_ms, millis(ceiling).max(floor_ms));
        let ticks = wanted.div_ceil(tick_ms).max(1);
        Self {
            ticks,
            interval_ms: ticks.saturating_mul(tick_ms),
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

pub(crate) struct Subscription {
    pub(crate) id: SubscriptionId,
    pub(crate) nodes: BTreeSet<NodeId>,
    pub(crate) sampling: Sampling,
    pub(crate) last_delivered_tick: u64,
    /// Latest value per node since the last delivery.
    pub(crate) pending: HashMap<NodeId, VariableSnapshot>,
}

impl Subscription {
    pub(crate) fn new(nodes: BTreeSet<NodeId>, sampling: Sampling, current_tick: u64) -> Self {
        Self {
            id: SubscriptionId::new(),
            nodes,
            sampling,
            last_delivered_tick: current_tick,
            pending: HashMap::new(),
        }
    }

    pub(crate) fn is_due(&self, tick: u64) -> bool {
        tick >= self.last_delivered_tick.saturating_add(self.sampling.ticks)
    }
}
