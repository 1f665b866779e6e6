use std::time::Duration;

use crate::ids::{NodeId, SessionId};

/// Client-facing error taxonomy of the bridge.
///
/// Every variant is recoverable at connection or request scope. The wire
/// form is `{code, message}` where `code` comes from [`BridgeError::code`].
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum BridgeError {
    // Address space
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),
    #[error("value for {node} out of range: {detail}")]
    OutOfRange { node: NodeId, detail: String },
    #[error("node {0} is read-only")]
    ReadOnly(NodeId),
    #[error("type mismatch for {node}: expected {expected}, got {actual}")]
    TypeMismatch {
        node: NodeId,
        expected: &'static str,
        actual: &'static str,
    },

    // Security
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("certificate expired: {0}")]
    ExpiredCertificate(String),
    #[error("policy mismatch: requested {requested}, server requires {required}")]
    PolicyMismatch { requested: String, required: String },

    // Session / transport
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),
    #[error("protocol error: {0}")]
    ProtocolError(String),
    #[error("authentication not completed within {0:?}")]
    AuthTimeout(Duration),
    #[error("write not acknowledged within {0:?}")]
    WriteTimeout(Duration),
    #[error("slow consumer evicted")]
    SlowConsumerEvicted,

    #[error("internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Stable wire code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownNode(_) => "UnknownNode",
            Self::OutOfRange { .. } => "OutOfRange",
            Self::ReadOnly(_) => "ReadOnly",
            Self::TypeMismatch { .. } => "TypeMismatch",
            Self::Unauthenticated(_) => "Unauthenticated",
            Self::InvalidCredentials => "InvalidCredentials",
            Self::ExpiredCertificate(_) => "ExpiredCertificate",
            Self::PolicyMismatch { .. } => "PolicyMismatch",
            Self::UnknownSession(_) => "UnknownSession",
            Self::ProtocolError(_) => "ProtocolError",
            Self::AuthTimeout(_) => "AuthTimeout",
            Self::WriteTimeout(_) => "WriteTimeout",
            Self::SlowConsumerEvicted => "SlowConsumerEvicted",
            Self::Internal(_) => "Internal",
        }
    }

    /// HTTP status for the REST surface.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::UnknownNode(_) | Self::UnknownSession(_) => 404,
            Self::OutOfRange { .. } | Self::TypeMismatch { .. } | Self::ProtocolError(_) => 400,
            Self::ReadOnly(_)
            | Self::Unauthenticated(_)
            | Self::InvalidCredentials
            | Self::ExpiredCertificate(_)
            | Self::PolicyMismatch { .. } => 403,
            Self::AuthTimeout(_) | Self::WriteTimeout(_) => 408,
            Self::SlowConsumerEvicted | Self::Internal(_) => 500,
        }
    }

    /// Authentication failures, as opposed to request failures.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::Unauthenticated(_)
                | Self::InvalidCredentials
                | Self::ExpiredCertificate(_)
                | Self::PolicyMismatch { .. }
        )
    }
}
