use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Message security mode negotiated for a session.
///
/// Variants are ordered weakest to strongest, so `requested < required`
/// means the client asked for less than the server mandates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityPolicy {
    None,
    #[default]
    Sign,
    SignAndEncrypt,
}

impl SecurityPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Sign => "sign",
            Self::SignAndEncrypt => "sign_and_encrypt",
        }
    }

    /// Whether a session at this policy satisfies `required`.
    pub fn satisfies(self, required: SecurityPolicy) -> bool {
        self >= required
    }
}

impl fmt::Display for SecurityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "none" => Ok(Self::None),
            "sign" => Ok(Self::Sign),
            "sign_and_encrypt" | "signandencrypt" => Ok(Self::SignAndEncrypt),
            other => Err(format!("unknown security policy: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_by_strength() {
        assert!(SecurityPolicy::None < SecurityPolicy::Sign);
        assert!(SecurityPolicy::Sign < SecurityPolicy::SignAndEncrypt);
        assert!(SecurityPolicy::SignAndEncrypt.satisfies(SecurityPolicy::Sign));
        assert!(!SecurityPolicy::None.satisfies(SecurityPolicy::Sign));
    }

    #[test]
    fn parse_accepts_common_spellings() {
        assert_eq!("sign".parse::<SecurityPolicy>().unwrap(), SecurityPolicy::Sign);
        assert_eq!(
            "Sign-And-Encrypt".parse::<SecurityPolicy>().unwrap(),
            SecurityPolicy::SignAndEncrypt
        );
        assert!("basic128".parse::<SecurityPolicy>().is_err());
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&SecurityPolicy::SignAndEncrypt).unwrap();
        assert_eq!(json, r#""sign_and_encrypt""#);
    }
}
