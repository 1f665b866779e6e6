//! Stable node ids over the process model.

use std::collections::HashMap;
use std::sync::Arc;

use plantbridge_core::{
    BridgeError, NodeId, Value, VariableDescriptor, VariableSnapshot, Violation,
};

use crate::errors::ModelError;
use crate::fanout::{ChangeFanout, ChangeListener};
use crate::owner::ModelHandle;

/// Static registry of exposed nodes plus typed access to their values.
///
/// Cheap to clone. Descriptors never change after startup, so resolving
/// and browsing do not touch the model owner.
#[derive(Clone)]
pub struct AddressSpace {
    nodes: Arc<HashMap<NodeId, VariableDescriptor>>,
    order: Arc<[NodeId]>,
    model: ModelHandle,
    fanout: Arc<ChangeFanout>,
}

impl AddressSpace {
    pub fn new(
        descriptors: Vec<VariableDescriptor>,
        model: ModelHandle,
        fanout: Arc<ChangeFanout>,
    ) -> Self {
        let order: Arc<[NodeId]> = descriptors.iter().map(|d| d.id.clone()).collect();
        let nodes = descriptors.into_iter().map(|d| (d.id.clone(), d)).collect();
        Self {
            nodes: Arc::new(nodes),
            order,
            model,
            fanout,
        }
    }

    pub fn resolve(&self, id: &str) -> Result<&VariableDescriptor, BridgeError> {
        self.nodes
            .get(id)
            .ok_or_else(|| BridgeError::UnknownNode(NodeId::from(id)))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// All descriptors, in plant definition order.
    pub fn browse(&self) -> Vec<VariableDescriptor> {
        self.order
            .iter()
            .filter_map(|id| self.nodes.get(id).cloned())
            .collect()
    }

    pub async fn read(&self, id: &str) -> Result<VariableSnapshot, BridgeError> {
        let descriptor = self.resolve(id)?;
        self.model.read(&descriptor.id).await.map_err(translate)
    }

    pub async fn read_all(&self) -> Result<Vec<VariableSnapshot>, BridgeError> {
        self.model.read_all().await.map_err(translate)
    }

    /// Validate against the descriptor, then hand the write to the model.
    ///
    /// Policy and range are checked here first so obviously bad writes never
    /// occupy the owner's queue; the model re-checks authoritatively.
    pub async fn apply_write(&self, id: &str, value: Value) -> Result<(), BridgeError> {
        let descriptor = self.resolve(id)?;
        if !descriptor.policy.is_writable() {
            return Err(BridgeError::ReadOnly(descriptor.id.clone()));
        }
        descriptor
            .kind
            .validate(&value)
            .map_err(|violation| match violation {
                Violation::TypeMismatch { expected, actual } => BridgeError::TypeMismatch {
                    node: descriptor.id.clone(),
                    expected,
                    actual,
                },
                Violation::OutOfRange(detail) => BridgeError::OutOfRange {
                    node: descriptor.id.clone(),
                    detail,
                },
            })?;
        self.model
            .write(descriptor.id.clone(), value)
            .await
            .map_err(translate)
    }

    /// Register a listener for every published change.
    pub fn on_change(&self, listener: Arc<dyn ChangeListener>) {
        self.fanout.register(listener);
    }
}

fn translate(err: ModelError) -> BridgeError {
    match err {
        ModelError::UnknownVariable(node) => BridgeError::UnknownNode(node),
        ModelError::OutOfRange { node, detail } => BridgeError::OutOfRange { node, detail },
        ModelError::ReadOnly(node) => BridgeError::ReadOnly(node),
        ModelError::TypeMismatch {
            node,
            expected,
            actual,
        } => BridgeError::TypeMismatch {
            node,
            expected,
            actual,
        },
        ModelError::Timeout(d) => BridgeError::WriteTimeout(d),
        ModelError::OwnerGone => BridgeError::Internal("process model is not running".into()),
    }
}
