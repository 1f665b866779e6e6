use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use plantbridge_core::SecurityPolicy;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

/// What a client presents to open a session.
///
/// `policy` is the message-security mode the client asks for; `None` means
/// "whatever the server requires".
#[derive(Clone)]
pub enum Credentials {
    Token {
        secret: SecretString,
        policy: Option<SecurityPolicy>,
    },
    /// PEM text or bare base64 DER.
    Certificate {
        encoded: String,
        policy: Option<SecurityPolicy>,
    },
}

impl Credentials {
    pub fn token(secret: impl Into<String>) -> Self {
        Self::Token {
            secret: SecretString::from(secret.into()),
            policy: None,
        }
    }

    pub fn certificate(encoded: impl Into<String>) -> Self {
        Self::Certificate {
            encoded: encoded.into(),
            policy: None,
        }
    }

    pub fn with_policy(self, requested: SecurityPolicy) -> Self {
        match self {
            Self::Token { secret, .. } => Self::Token {
                secret,
                policy: Some(requested),
            },
            Self::Certificate { encoded, .. } => Self::Certificate {
                encoded,
                policy: Some(requested),
            },
        }
    }

    pub fn requested_policy(&self) -> Option<SecurityPolicy> {
        match self {
            Self::Token { policy, .. } | Self::Certificate { policy, .. } => *policy,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Token { .. } => "token",
            Self::Certificate { .. } => "certificate",
        }
    }

    /// Hex SHA-256 of the token secret or the certificate's DER bytes.
    ///
    /// `None` if a certificate cannot be decoded.
    pub fn fingerprint(&self) -> Option<String> {
        match self {
            Self::Token { secret, .. } => Some(hex_sha256(secret.expose_secret().as_bytes())),
            Self::Certificate { encoded, .. } => decode_certificate(encoded).map(|der| hex_sha256(&der)),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("kind", &self.kind())
            .field("policy", &self.requested_policy())
            .finish()
    }
}

pub fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Decode a PEM block or a bare base64 string into DER bytes.
pub fn decode_certificate(encoded: &str) -> Option<Vec<u8>> {
    let body: String = encoded
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with("-----"))
        .collect();
    if body.is_empty() {
        return None;
    }
    STANDARD.decode(body.as_bytes()).ok()
}
