//! Process variable data model shared by the model, the address space,
//! the session layer and the gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::NodeId;

/// A process value as it appears on the wire.
///
/// Untagged so that JSON `true`, `42.5` and `"auto"` map directly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Float(f64),
    Enum(String),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Float(_) => "float",
            Self::Enum(_) => "enum",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&str> {
        match self {
            Self::Enum(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Enum(v) => f.write_str(v),
        }
    }
}

/// Why a value was refused by a [`VariableKind`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Violation {
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
    OutOfRange(String),
}

/// Semantic type of a variable together with its valid range.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VariableKind {
    Float {
        min: f64,
        max: f64,
        /// Changes smaller than this are neither stored nor published.
        #[serde(default)]
        deadband: f64,
    },
    Bool,
    Enum {
        options: Vec<String>,
    },
}

impl VariableKind {
    pub fn float(min: f64, max: f64) -> Self {
        Self::Float {
            min,
            max,
            deadband: 0.0,
        }
    }

    pub fn enumeration(options: &[&str]) -> Self {
        Self::Enum {
            options: options.iter().map(|o| (*o).to_string()).collect(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Float { .. } => "float",
            Self::Bool => "bool",
            Self::Enum { .. } => "enum",
        }
    }

    /// Check a candidate value against type and range. Non-finite floats
    /// are always out of range.
    pub fn validate(&self, value: &Value) -> Result<(), Violation> {
        match (self, value) {
            (Self::Float { min, max, .. }, Value::Float(v)) => {
                if v.is_finite() && *v >= *min && *v <= *max {
                    Ok(())
                } else {
                    Err(Violation::OutOfRange(format!("{v} not in [{min}, {max}]")))
                }
            }
            (Self::Bool, Value::Bool(_)) => Ok(()),
            (Self::Enum { options }, Value::Enum(v)) => {
                if options.iter().any(|o| o == v) {
                    Ok(())
                } else {
                    Err(Violation::OutOfRange(format!(
                        "'{v}' not one of [{}]",
                        options.join(", ")
                    )))
                }
            }
            (kind, value) => Err(Violation::TypeMismatch {
                expected: kind.type_name(),
                actual: value.type_name(),
            }),
        }
    }

    /// Saturate a simulated value into range. Used for physics outputs,
    /// never for client writes.
    pub fn saturate(&self, value: Value) -> Value {
        match (self, value) {
            (Self::Float { min, max, .. }, Value::Float(v)) => {
                if v.is_nan() {
                    Value::Float(*min)
                } else {
                    Value::Float(v.clamp(*min, *max))
                }
            }
            (_, other) => other,
        }
    }

    /// Whether `next` differs enough from `current` to count as a change.
    pub fn is_change(&self, current: &Value, next: &Value) -> bool {
        match (self, current, next) {
            (Self::Float { deadband, .. }, Value::Float(a), Value::Float(b)) => {
                if *deadband > 0.0 {
                    (a - b).abs() >= *deadband
                } else {
                    a != b
                }
            }
            _ => current != next,
        }
    }
}

/// Whether clients may write a variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WritePolicy {
    ReadOnly,
    ReadWrite,
}

impl WritePolicy {
    pub fn is_writable(self) -> bool {
        matches!(self, Self::ReadWrite)
    }
}

/// Static description of an address-space node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableDescriptor {
    pub id: NodeId,
    pub kind: VariableKind,
    pub policy: WritePolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub description: String,
}

/// Current value of a node with its last-updated time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariableSnapshot {
    pub node: NodeId,
    pub value: Value,
    /// Epoch milliseconds.
    pub ts: i64,
}

/// One published value change.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeChange {
    pub node: NodeId,
    pub value: Value,
    pub timestamp: DateTime<Utc>,
}

impl NodeChange {
    pub fn ts_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    pub fn to_snapshot(&self) -> VariableSnapshot {
        VariableSnapshot {
            node: self.node.clone(),
            value: self.value.clone(),
            ts: self.ts_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_untagged_serde() {
        assert_eq!(serde_json::to_string(&Value::Float(42.0)).unwrap(), "42.0");
        assert_eq!(serde_json::to_string(&Value::Bool(true)).unwrap(), "true");
        let v: Value = serde_json::from_str("42").unwrap();
        assert_eq!(v, Value::Float(42.0));
        let v: Value = serde_json::from_str(r#""auto""#).unwrap();
        assert_eq!(v, Value::Enum("auto".into()));
        let v: Value = serde_json::from_str("false").unwrap();
        assert_eq!(v, Value::Bool(false));
    }

    #[test]
    fn float_range_is_inclusive() {
        let kind = VariableKind::float(0.0, 100.0);
        assert!(kind.validate(&Value::Float(0.0)).is_ok());
        assert!(kind.validate(&Value::Float(100.0)).is_ok());
        assert!(matches!(
            kind.validate(&Value::Float(150.0)),
            Err(Violation::OutOfRange(_))
        ));
        assert!(matches!(
            kind.validate(&Value::Float(-0.5)),
            Err(Violation::OutOfRange(_))
        ));
    }

    #[test]
    fn non_finite_floats_rejected() {
        let kind = VariableKind::float(-1e9, 1e9);
        assert!(kind.validate(&Value::Float(f64::NAN)).is_err());
        assert!(kind.validate(&Value::Float(f64::INFINITY)).is_err());
    }

    #[test]
    fn type_mismatch_reported() {
        let kind = VariableKind::Bool;
        assert_eq!(
            kind.validate(&Value::Float(1.0)),
            Err(Violation::TypeMismatch {
                expected: "bool",
                actual: "float"
            })
        );
    }

    #[test]
    fn enum_options_checked() {
        let kind = VariableKind::enumeration(&["manual", "auto"]);
        assert!(kind.validate(&Value::Enum("auto".into())).is_ok());
        assert!(matches!(
            kind.validate(&Value::Enum("cascade".into())),
            Err(Violation::OutOfRange(_))
        ));
    }

    #[test]
    fn saturate_clamps_only_floats() {
        let kind = VariableKind::float(0.0, 100.0);
        assert_eq!(kind.saturate(Value::Float(130.0)), Value::Float(100.0));
        assert_eq!(kind.saturate(Value::Float(f64::NAN)), Value::Float(0.0));
        assert_eq!(
            VariableKind::Bool.saturate(Value::Bool(true)),
            Value::Bool(true)
        );
    }

    #[test]
    fn deadband_suppresses_small_changes() {
        let kind = VariableKind::Float {
            min: 0.0,
            max: 10.0,
            deadband: 0.5,
        };
        assert!(!kind.is_change(&Value::Float(1.0), &Value::Float(1.2)));
        assert!(kind.is_change(&Value::Float(1.0), &Value::Float(1.5)));
        let exact = VariableKind::float(0.0, 10.0);
        assert!(exact.is_change(&Value::Float(1.0), &Value::Float(1.0001)));
        assert!(!exact.is_change(&Value::Float(1.0), &Value::Float(1.0)));
    }

    #[test]
    fn write_policy_wire_names() {
        assert_eq!(
            serde_json::to_string(&WritePolicy::ReadOnly).unwrap(),
            r#""read-only""#
        );
        assert!(WritePolicy::ReadWrite.is_writable());
        assert!(!WritePolicy::ReadOnly.is_writable());
    }

    #[test]
    fn descriptor_serializes_camel_case() {
        let d = VariableDescriptor {
            id: NodeId::from("heaterPower"),
            kind: VariableKind::float(0.0, 100.0),
            policy: WritePolicy::ReadWrite,
            unit: Some("%".into()),
            description: "Heater output".into(),
        };
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["id"], "heaterPower");
        assert_eq!(json["kind"]["type"], "float");
        assert_eq!(json["kind"]["max"], 100.0);
        assert_eq!(json["policy"], "read-write");
    }
}
