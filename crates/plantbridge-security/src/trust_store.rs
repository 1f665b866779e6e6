//! Trust material loaded once at startup.
//!
//! ```json
//! {
//!   "tokens":       [{ "name": "hmi", "sha256": "<hex>", "expiresAt": "2027-01-01T00:00:00Z" }],
//!   "certificates": [{ "subject": "CN=plc-1", "thumbprint": "<hex>", "notAfter": "2027-01-01T00:00:00Z" }],
//!   "revoked":      ["<hex>"]
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum TrustStoreError {
    #[error("failed to read trust store {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse trust store: {0}")]
    Json(#[from] serde_json::Error),
    #[error("trust store contains no tokens or certificates")]
    Empty,
    #[error("invalid fingerprint for {entry}: expected 64 hex chars")]
    InvalidFingerprint { entry: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenEntry {
    pub name: String,
    pub sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateEntry {
    pub subject: String,
    pub thumbprint: String,
    pub not_after: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct TrustStoreFile {
    tokens: Vec<TokenEntry>,
    certificates: Vec<CertificateEntry>,
    revoked: Vec<String>,
}

/// Counts shown by `plantbridge check-trust`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrustSummary {
    pub tokens: usize,
    pub certificates: usize,
    pub revoked: usize,
    pub expired_certificates: usize,
}

/// Pinned credentials, keyed by lowercase hex fingerprint.
#[derive(Debug)]
pub struct TrustStore {
    tokens: HashMap<String, TokenEntry>,
    certificates: HashMap<String, CertificateEntry>,
    revoked: HashSet<String>,
}

impl TrustStore {
    pub fn load(path: &Path) -> Result<Self, TrustStoreError> {
        let content = std::fs::read_to_string(path).map_err(|source| TrustStoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, TrustStoreError> {
        let file: TrustStoreFile = serde_json::from_str(json)?;
        if file.tokens.is_empty() && file.certificates.is_empty() {
            return Err(TrustStoreError::Empty);
        }

        let mut tokens = HashMap::with_capacity(file.tokens.len());
        for entry in file.tokens {
            let fp = normalize_fingerprint(&entry.sha256).ok_or_else(|| {
                TrustStoreError::InvalidFingerprint {
                    entry: entry.name.clone(),
                }
            })?;
            tokens.insert(fp, entry);
        }

        let mut certificates = HashMap::with_capacity(file.certificates.len());
        for entry in file.certificates {
            let fp = normalize_fingerprint(&entry.thumbprint).ok_or_else(|| {
                TrustStoreError::InvalidFingerprint {
                    entry: entry.subject.clone(),
                }
            })?;
            certificates.insert(fp, entry);
        }

        let revoked = file
            .revoked
            .iter()
            .map(String::as_str)
            .filter_map(normalize_fingerprint)
            .collect();

        Ok(Self {
            tokens,
            certificates,
            revoked,
        })
    }

    pub fn token(&self, fingerprint: &str) -> Option<&TokenEntry> {
        self.tokens.get(fingerprint)
    }

    pub fn certificate(&self, fingerprint: &str) -> Option<&CertificateEntry> {
        self.certificates.get(fingerprint)
    }

    pub fn is_revoked(&self, fingerprint: &str) -> bool {
        self.revoked.contains(fingerprint)
    }

    pub fn summary(&self, now: DateTime<Utc>) -> TrustSummary {
        TrustSummary {
            tokens: self.tokens.len(),
            certificates: self.certificates.len(),
            revoked: self.revoked.len(),
            expired_certificates: self
                .certificates
                .values()
                .filter(|c| c.not_after <= now)
                .count(),
        }
    }
}

/// Lowercase a 64-char hex SHA-256, accepting `:` separators.
pub fn normalize_fingerprint(raw: &str) -> Option<String> {
    let hex: String = raw
        .trim()
        .chars()
        .filter(|c| *c != ':')
        .map(|c| c.to_ascii_lowercase())
        .collect();
    (hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit())).then_some(hex)
}
