use chrono::{DateTime, Utc};
use plantbridge_core::{SecurityPolicy, TokenId};
use serde::Serialize;

/// Proof of a successful authentication, bound to one session.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityToken {
    pub id: TokenId,
    /// Trust store name of the token or certificate subject.
    pub principal: String,
    pub policy: SecurityPolicy,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SecurityToken {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.issued_at && now < self.expires_at
    }
}
