//! Security context: trust material, credential validation and the single
//! global message-security policy.

pub mod context;
pub mod credentials;
pub mod token;
pub mod trust_store;

pub use context::{SecurityConfig, SecurityContext};
pub use credentials::{decode_certificate, hex_sha256, Credentials};
pub use token::SecurityToken;
pub use trust_store::{TrustStore, TrustStoreError, TrustSummary};
