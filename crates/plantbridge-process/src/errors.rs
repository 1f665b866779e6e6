use std::time::Duration;

use plantbridge_core::NodeId;

/// Failures inside the process model and its owner task.
///
/// These never reach clients directly; the address space translates them
/// into `BridgeError`.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("no variable named {0}")]
    UnknownVariable(NodeId),
    #[error("{node}: {detail}")]
    OutOfRange { node: NodeId, detail: String },
    #[error("{0} is not writable")]
    ReadOnly(NodeId),
    #[error("{node}: expected {expected}, got {actual}")]
    TypeMismatch {
        node: NodeId,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("no acknowledgment from model owner within {0:?}")]
    Timeout(Duration),
    #[error("model owner has stopped")]
    OwnerGone,
}
