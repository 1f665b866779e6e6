use plantbridge_core::VariableSnapshot;
use serde::Serialize;

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Explicit,
    IdleTimeout,
    TransportDrop,
    SlowConsumer,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::IdleTimeout => "idle_timeout",
            Self::TransportDrop => "transport_drop",
            Self::SlowConsumer => "slow_consumer",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of handing one notification to a session's outbound path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Queued, but an older notification was dropped to make room.
    Dropped,
    /// The consumer is too slow; the session must be evicted.
    Evict,
}

/// A session's outbound path, normally a gateway client connection.
///
/// Both methods are called while the session table lock is held. They
/// must not block and must not call back into the session manager.
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, notification: &VariableSnapshot) -> Delivery;

    fn closed(&self, reason: CloseReason);
}
