use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use plantbridge_core::{NodeChange, NodeId, Value, VariableSnapshot};
use serde::{Deserialize, Serialize};

use crate::fanout::ChangeListener;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistorySample {
    pub value: Value,
    /// Epoch milliseconds.
    pub ts: i64,
}

/// Rolling in-memory window of the last `capacity` samples per node.
pub struct History {
    capacity: usize,
    buffers: Mutex<HashMap<NodeId, VecDeque<HistorySample>>>,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            buffers: Mutex::new(HashMap::new()),
        }
    }

    /// Seed the window, typically with the initial values at startup.
    pub fn record(&self, snapshot: &VariableSnapshot) {
        self.push(&snapshot.node, snapshot.value.clone(), snapshot.ts);
    }

    /// Oldest first.
    pub fn samples(&self, node: &str) -> Vec<HistorySample> {
        self.buffers
            .lock()
            .get(node)
            .map(|buf| buf.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn push(&self, node: &NodeId, value: Value, ts: i64) {
        let mut buffers = self.buffers.lock();
        let buf = buffers
            .entry(node.clone())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity.min(64)));
        if buf.len() == self.capacity {
            buf.pop_front();
        }
        buf.push_back(HistorySample { value, ts });
    }
}

impl ChangeListener for History {
    fn on_change(&self, change: &NodeChange) {
        self.push(&change.node, change.value.clone(), change.ts_millis());
    }
}
