//! The pure process model: variables, the logical clock and one
//! simulation step. No I/O and no locking; the owner task serializes
//! every access.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use plantbridge_core::{
    NodeChange, NodeId, Value, VariableDescriptor, VariableSnapshot, Violation,
};

use crate::errors::ModelError;
use crate::simulation::Simulation;

/// One entry of a plant definition: what the node is and where it starts.
#[derive(Clone, Debug)]
pub struct PlantVariable {
    pub descriptor: VariableDescriptor,
    pub initial: Value,
}

/// A variable with its current value.
#[derive(Clone, Debug)]
pub struct ProcessVariable {
    descriptor: VariableDescriptor,
    value: Value,
    /// Last value handed to listeners; the deadband is measured against it.
    published: Value,
    updated_at: DateTime<Utc>,
}

impl ProcessVariable {
    pub fn descriptor(&self) -> &VariableDescriptor {
        &self.descriptor
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn snapshot(&self) -> VariableSnapshot {
        VariableSnapshot {
            node: self.descriptor.id.clone(),
            value: self.value.clone(),
            ts: self.updated_at.timestamp_millis(),
        }
    }
}

/// Read-only view of the plant handed to a [`Simulation`] step.
pub struct PlantState<'a> {
    vars: &'a [ProcessVariable],
    index: &'a HashMap<NodeId, usize>,
}

impl PlantState<'_> {
    pub fn get(&self, id: &str) -> Option<&Value> {
        self.index.get(id).map(|&i| &self.vars[i].value)
    }

    pub fn float(&self, id: &str) -> Option<f64> {
        self.get(id).and_then(Value::as_f64)
    }

    pub fn flag(&self, id: &str) -> Option<bool> {
        self.get(id).and_then(Value::as_bool)
    }

    pub fn option(&self, id: &str) -> Option<&str> {
        self.get(id).and_then(Value::as_enum)
    }
}

pub struct ProcessModel {
    vars: Vec<ProcessVariable>,
    index: HashMap<NodeId, usize>,
    simulation: Box<dyn Simulation>,
    clock: DateTime<Utc>,
    ticks: u64,
}

impl ProcessModel {
    /// Build a model whose logical clock starts at `epoch`.
    ///
    /// Initial values are saturated into range, and a definition that
    /// repeats a node id keeps the first entry.
    pub fn new(
        definition: Vec<PlantVariable>,
        simulation: Box<dyn Simulation>,
        epoch: DateTime<Utc>,
    ) -> Self {
        let mut vars = Vec::with_capacity(definition.len());
        let mut index = HashMap::with_capacity(definition.len());
        for PlantVariable {
            descriptor,
            initial,
        } in definition
        {
            if index.contains_key(&descriptor.id) {
                tracing::warn!(node_id = %descriptor.id, "duplicate node in plant definition, skipping");
                continue;
            }
            index.insert(descriptor.id.clone(), vars.len());
            let value = descriptor.kind.saturate(initial);
            vars.push(ProcessVariable {
                descriptor,
                published: value.clone(),
                value,
                updated_at: epoch,
            });
        }
        Self {
            vars,
            index,
            simulation,
            clock: epoch,
            ticks: 0,
        }
    }

    pub fn descriptors(&self) -> Vec<VariableDescriptor> {
        self.vars.iter().map(|v| v.descriptor.clone()).collect()
    }

    pub fn variable(&self, id: &str) -> Option<&ProcessVariable> {
        self.index.get(id).map(|&i| &self.vars[i])
    }

    pub fn clock(&self) -> DateTime<Utc> {
        self.clock
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn read(&self, id: &str) -> Result<VariableSnapshot, ModelError> {
        self.variable(id)
            .map(ProcessVariable::snapshot)
            .ok_or_else(|| ModelError::UnknownVariable(NodeId::from(id)))
    }

    pub fn read_all(&self) -> Vec<VariableSnapshot> {
        self.vars.iter().map(ProcessVariable::snapshot).collect()
    }

    /// Apply a client write.
    ///
    /// Nothing is mutated on rejection. On success the timestamp moves to the
    /// current logical time; a change is returned only if the value differs.
    /// Client writes are always published, whatever the deadband.
    pub fn write(&mut self, id: &str, value: Value) -> Result<Option<NodeChange>, ModelError> {
        let node = NodeId::from(id);
        let &idx = self
            .index
            .get(id)
            .ok_or_else(|| ModelError::UnknownVariable(node.clone()))?;
        let var = &mut self.vars[idx];

        if !var.descriptor.policy.is_writable() {
            return Err(ModelError::ReadOnly(node));
        }
        var.descriptor
            .kind
            .validate(&value)
            .map_err(|violation| match violation {
                Violation::TypeMismatch { expected, actual } => ModelError::TypeMismatch {
                    node: node.clone(),
                    expected,
                    actual,
                },
                Violation::OutOfRange(detail) => ModelError::OutOfRange {
                    node: node.clone(),
                    detail,
                },
            })?;

        var.updated_at = self.clock;
        if var.value == value {
            return Ok(None);
        }
        var.value = value.clone();
        var.published = value;
        Ok(Some(NodeChange {
            node,
            value: var.value.clone(),
            timestamp: self.clock,
        }))
    }

    /// Advance the clock by `dt` and run one simulation step.
    ///
    /// Returns at most one change per variable, in definition order. Float
    /// state always follows the simulation; a change is published once it
    /// moves at least the deadband away from the last published value.
    pub fn tick(&mut self, dt: Duration) -> Vec<NodeChange> {
        self.ticks += 1;
        self.clock += chrono::Duration::from_std(dt).unwrap_or_else(|_| chrono::Duration::zero());

        let proposals = {
            let state = PlantState {
                vars: &self.vars,
                index: &self.index,
            };
            self.simulation.step(&state, dt, self.ticks)
        };

        let mut staged: Vec<Option<Value>> = vec![None; self.vars.len()];
        for (id, value) in proposals {
            match self.index.get(&id) {
                Some(&idx) => staged[idx] = Some(value),
                None => tracing::warn!(node_id = %id, "simulation proposed unknown node"),
            }
        }

        let mut changes = Vec::new();
        for (var, next) in self.vars.iter_mut().zip(staged) {
            let Some(next) = next else { continue };
            if next.type_name() != var.descriptor.kind.type_name() {
                tracing::warn!(
                    node_id = %var.descriptor.id,
                    expected = var.descriptor.kind.type_name(),
                    actual = next.type_name(),
                    "simulation produced wrong value type"
                );
                continue;
            }
            let next = var.descriptor.kind.saturate(next);
            if next == var.value {
                continue;
            }
            var.value = next;
            var.updated_at = self.clock;
            if !var.descriptor.kind.is_change(&var.published, &var.value) {
                continue;
            }
            var.published = var.value.clone();
            changes.push(NodeChange {
                node: var.descriptor.id.clone(),
                value: var.value.clone(),
                timestamp: self.clock,
            });
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plant::{heater_plant, nodes};
    use crate::simulation::{HeaterParams, HeaterSimulation, ScriptedSimulation};
    use chrono::TimeZone;

    fn epoch() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
    }

    fn scripted(script: ScriptedSimulation) -> ProcessModel {
        ProcessModel::new(
            heater_plant(&HeaterParams::default()),
            Box::new(script),
            epoch(),
        )
    }

    #[test]
    fn read_unknown_node_fails() {
        let model = scripted(ScriptedSimulation::new());
        assert_eq!(
            model.read("pressure"),
            Err(ModelError::UnknownVariable("pressure".into()))
        );
        assert!(model.read(nodes::HEATER_POWER).is_ok());
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut model = scripted(ScriptedSimulation::new());
        let change = model
            .write(nodes::SETPOINT, Value::Float(75.5))
            .unwrap()
            .unwrap();
        assert_eq!(change.value, Value::Float(75.5));
        assert_eq!(
            model.read(nodes::SETPOINT).unwrap().value,
            Value::Float(75.5)
        );

        model
            .write(nodes::CONTROL_MODE, Value::Enum("auto".into()))
            .unwrap();
        assert_eq!(
            model.read(nodes::CONTROL_MODE).unwrap().value,
            Value::Enum("auto".into())
        );
    }

    #[test]
    fn out_of_range_write_leaves_prior_value() {
        let mut model = scripted(ScriptedSimulation::new());
        model.write(nodes::HEATER_POWER, Value::Float(10.0)).unwrap();
        let err = model
            .write(nodes::HEATER_POWER, Value::Float(150.0))
            .unwrap_err();
        assert!(matches!(err, ModelError::OutOfRange { .. }));
        assert_eq!(
            model.read(nodes::HEATER_POWER).unwrap().value,
            Value::Float(10.0)
        );
    }

    #[test]
    fn read_only_and_type_checks() {
        let mut model = scripted(ScriptedSimulation::new());
        assert_eq!(
            model.write(nodes::TEMPERATURE, Value::Float(30.0)),
            Err(ModelError::ReadOnly(nodes::TEMPERATURE.into()))
        );
        assert!(matches!(
            model.write(nodes::HEATER_ENABLED, Value::Float(1.0)),
            Err(ModelError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn identical_write_emits_no_change() {
        let mut model = scripted(ScriptedSimulation::new());
        assert_eq!(model.write(nodes::HEATER_POWER, Value::Float(0.0)), Ok(None));
    }

    #[test]
    fn tick_advances_logical_clock() {
        let mut model = scripted(ScriptedSimulation::new().at(
            2,
            nodes::HEATER_POWER,
            Value::Float(5.0),
        ));
        assert!(model.tick(Duration::from_millis(100)).is_empty());
        let changes = model.tick(Duration::from_millis(100));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].ts_millis(), 1_700_000_000_200);
        assert_eq!(model.ticks(), 2);
    }

    #[test]
    fn simulation_outputs_are_saturated_and_deduplicated() {
        let mut model = scripted(
            ScriptedSimulation::new()
                .at(1, nodes::HEATER_POWER, Value::Float(20.0))
                .at(1, nodes::HEATER_POWER, Value::Float(130.0)),
        );
        let changes = model.tick(Duration::from_millis(100));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].value, Value::Float(100.0));
    }

    #[test]
    fn deadband_accumulates_small_steps() {
        let mut model = scripted(
            ScriptedSimulation::new()
                .at(1, nodes::TEMPERATURE, Value::Float(20.006))
                .at(2, nodes::TEMPERATURE, Value::Float(20.012)),
        );
        assert!(model.tick(Duration::from_millis(100)).is_empty());
        assert_eq!(
            model.read(nodes::TEMPERATURE).unwrap().value,
            Value::Float(20.006)
        );
        let changes = model.tick(Duration::from_millis(100));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].value, Value::Float(20.012));
    }

    #[test]
    fn heater_tick_is_reproducible() {
        let params = HeaterParams {
            noise_amplitude_c: 0.5,
            noise_seed: 7,
            ..HeaterParams::default()
        };
        let run = || {
            let mut model = ProcessModel::new(
                heater_plant(&params),
                Box::new(HeaterSimulation::new(params.clone())),
                epoch(),
            );
            model.write(nodes::HEATER_POWER, Value::Float(50.0)).unwrap();
            (0..20)
                .flat_map(|_| model.tick(Duration::from_millis(100)))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }
}
