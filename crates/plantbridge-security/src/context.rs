//! Session authentication against the trust store.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use plantbridge_core::{BridgeError, NodeId, SecurityPolicy, TokenId};
use tracing::{debug, warn};

use crate::credentials::Credentials;
use crate::token::SecurityToken;
use crate::trust_store::{normalize_fingerprint, TrustStore};

#[derive(Clone, Debug)]
pub struct SecurityConfig {
    pub required_policy: SecurityPolicy,
    pub token_lifetime: Duration,
    /// One fingerprint per line; `#` starts a comment.
    pub revocation_path: Option<PathBuf>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            required_policy: SecurityPolicy::Sign,
            token_lifetime: Duration::from_secs(3600),
            revocation_path: None,
        }
    }
}

/// Validates credentials and issues session tokens.
///
/// Holds only the trust store loaded at startup. Revocation is re-checked
/// on every attempt so that out-of-band rotation takes effect without a
/// restart.
pub struct SecurityContext {
    store: TrustStore,
    config: SecurityConfig,
}

impl SecurityContext {
    pub fn new(store: TrustStore, config: SecurityConfig) -> Self {
        Self { store, config }
    }

    pub fn required_policy(&self) -> SecurityPolicy {
        self.config.required_policy
    }

    pub fn trust_store(&self) -> &TrustStore {
        &self.store
    }

    pub async fn authenticate(&self, credentials: &Credentials) -> Result<SecurityToken, BridgeError> {
        self.authenticate_at(credentials, Utc::now()).await
    }

    pub async fn authenticate_at(
        &self,
        credentials: &Credentials,
        now: DateTime<Utc>,
    ) -> Result<SecurityToken, BridgeError> {
        let required = self.config.required_policy;
        let policy = credentials.requested_policy().unwrap_or(required);
        if !policy.satisfies(required) {
            return Err(BridgeError::PolicyMismatch {
                requested: policy.to_string(),
                required: required.to_string(),
            });
        }

        let fingerprint = credentials
            .fingerprint()
            .ok_or(BridgeError::InvalidCredentials)?;

        if self.is_revoked(&fingerprint).await? {
            warn!(kind = credentials.kind(), "revoked credential presented");
            return Err(BridgeError::InvalidCredentials);
        }

        let (principal, credential_expiry) = match credentials {
            Credentials::Token { .. } => {
                let entry = self
                    .store
                    .token(&fingerprint)
                    .ok_or(BridgeError::InvalidCredentials)?;
                if entry.expires_at.is_some_and(|exp| exp <= now) {
                    debug!(principal = %entry.name, "expired token presented");
                    return Err(BridgeError::InvalidCredentials);
                }
                (entry.name.clone(), entry.expires_at)
            }
            Credentials::Certificate { .. } => {
                let entry = self
                    .store
                    .certificate(&fingerprint)
                    .ok_or(BridgeError::InvalidCredentials)?;
                if entry.not_after <= now {
                    return Err(BridgeError::ExpiredCertificate(entry.subject.clone()));
                }
                (entry.subject.clone(), Some(entry.not_after))
            }
        };

        let lifetime = chrono::Duration::from_std(self.config.token_lifetime)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let mut expires_at = now + lifetime;
        if let Some(limit) = credential_expiry {
            expires_at = expires_at.min(limit);
        }

        debug!(%principal, %policy, "authenticated");
        Ok(SecurityToken {
            id: TokenId::new(),
            principal,
            policy,
            issued_at: now,
            expires_at,
        })
    }

    /// Single global policy: any live token may write. Node-level
    /// permissions are the address space's concern.
    pub fn authorize_write(&self, token: &SecurityToken, node: &NodeId) -> Result<(), BridgeError> {
        self.authorize_write_at(token, node, Utc::now())
    }

    pub fn authorize_write_at(
        &self,
        token: &SecurityToken,
        node: &NodeId,
        now: DateTime<Utc>,
    ) -> Result<(), BridgeError> {
        if token.is_valid_at(now) {
            Ok(())
        } else {
            debug!(node_id = %node, token = %token.id, "write with expired token");
            Err(BridgeError::Unauthenticated("security token expired".into()))
        }
    }

    /// Static list first, then the external file if configured. An
    /// unreadable revocation file denies authentication.
    async fn is_revoked(&self, fingerprint: &str) -> Result<bool, BridgeError> {
        if self.store.is_revoked(fingerprint) {
            return Ok(true);
        }
        let Some(path) = &self.config.revocation_path else {
            return Ok(false);
        };
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(parse_revocation_list(&content).contains(fingerprint)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "revocation list unreadable");
                Err(BridgeError::InvalidCredentials)
            }
        }
    }
}

fn parse_revocation_list(content: &str) -> HashSet<String> {
    content
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default())
        .filter_map(normalize_fingerprint)
        .collect()
}
