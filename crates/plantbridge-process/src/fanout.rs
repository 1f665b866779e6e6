use std::sync::Arc;

use parking_lot::RwLock;
use plantbridge_core::NodeChange;

/// Receives model changes on the owner task.
///
/// Implementations run inline with the tick loop, so they must not block:
/// take short locks, enqueue, and return.
pub trait ChangeListener: Send + Sync {
    fn on_change(&self, change: &NodeChange);

    /// Called once after all changes of tick `tick` have been delivered.
    fn on_tick_complete(&self, _tick: u64) {}
}

/// Registered listeners, notified in registration order.
#[derive(Default)]
pub struct ChangeFanout {
    listeners: RwLock<Vec<Arc<dyn ChangeListener>>>,
}

impl ChangeFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn ChangeListener>) {
        self.listeners.write().push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    pub fn publish(&self, changes: &[NodeChange]) {
        if changes.is_empty() {
            return;
        }
        let listeners = self.listeners.read();
        for change in changes {
            for listener in listeners.iter() {
                listener.on_change(change);
            }
        }
    }

    pub fn tick_complete(&self, tick: u64) {
        for listener in self.listeners.read().iter() {
            listener.on_tick_complete(tick);
        }
    }
}
