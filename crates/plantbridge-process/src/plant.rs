//! The default heater plant: a single electrically heated vessel.

use plantbridge_core::{Value, VariableDescriptor, VariableKind, WritePolicy};

use crate::model::PlantVariable;
use crate::simulation::HeaterParams;

/// Stable node ids of the heater plant.
pub mod nodes {
    pub const HEATER_POWER: &str = "heaterPower";
    pub const TEMPERATURE: &str = "temperature";
    pub const SETPOINT: &str = "setpoint";
    pub const HEATER_ENABLED: &str = "heaterEnabled";
    pub const CONTROL_MODE: &str = "controlMode";
    pub const AMBIENT_TEMPERATURE: &str = "ambientTemperature";
}

pub const MODE_MANUAL: &str = "manual";
pub const MODE_AUTO: &str = "auto";

/// Temperature changes below this are not published.
const TEMPERATURE_DEADBAND_C: f64 = 0.01;

fn var(
    id: &str,
    kind: VariableKind,
    policy: WritePolicy,
    unit: Option<&str>,
    description: &str,
    initial: Value,
) -> PlantVariable {
    PlantVariable {
        descriptor: VariableDescriptor {
            id: id.into(),
            kind,
            policy,
            unit: unit.map(str::to_string),
            description: description.to_string(),
        },
        initial,
    }
}

pub fn heater_plant(params: &HeaterParams) -> Vec<PlantVariable> {
    vec![
        var(
            nodes::HEATER_POWER,
            VariableKind::float(0.0, 100.0),
            WritePolicy::ReadWrite,
            Some("%"),
            "Heater output power",
            Value::Float(0.0),
        ),
        var(
            nodes::TEMPERATURE,
            VariableKind::Float {
                min: -50.0,
                max: 500.0,
                deadband: TEMPERATURE_DEADBAND_C,
            },
            WritePolicy::ReadOnly,
            Some("°C"),
            "Measured vessel temperature",
            Value::Float(params.ambient_c),
        ),
        var(
            nodes::SETPOINT,
            VariableKind::float(0.0, 300.0),
            WritePolicy::ReadWrite,
            Some("°C"),
            "Temperature setpoint for auto mode",
            Value::Float(60.0),
        ),
        var(
            nodes::HEATER_ENABLED,
            VariableKind::Bool,
            WritePolicy::ReadWrite,
            None,
            "Heater interlock; power has no effect when false",
            Value::Bool(true),
        ),
        var(
            nodes::CONTROL_MODE,
            VariableKind::enumeration(&[MODE_MANUAL, MODE_AUTO]),
            WritePolicy::ReadWrite,
            None,
            "manual: power is operator-set; auto: P-controller tracks setpoint",
            Value::Enum(MODE_MANUAL.to_string()),
        ),
        var(
            nodes::AMBIENT_TEMPERATURE,
            VariableKind::float(-50.0, 60.0),
            WritePolicy::ReadOnly,
            Some("°C"),
            "Ambient temperature around the vessel",
            Value::Float(params.ambient_c),
        ),
    ]
}
