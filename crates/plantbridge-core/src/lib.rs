pub mod errors;
pub mod ids;
pub mod policy;
pub mod variables;

pub use errors::BridgeError;
pub use ids::{ClientId, NodeId, SessionId, SubscriptionId, TokenId};
pub use policy::SecurityPolicy;
pub use variables::{
    NodeChange, Value, VariableDescriptor, VariableKind, VariableSnapshot, Violation, WritePolicy,
};
