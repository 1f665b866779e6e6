//! Simulation steps that drive the process model.

use std::collections::BTreeMap;
use std::time::Duration;

use plantbridge_core::{NodeId, Value};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::model::PlantState;
use crate::plant::{nodes, MODE_AUTO};

/// One deterministic simulation step.
///
/// Returns proposed values; the model saturates them into range and
/// publishes only actual changes. Any randomness must come from an
/// explicitly seeded source so that runs replay exactly.
pub trait Simulation: Send + 'static {
    fn step(&mut self, state: &PlantState<'_>, dt: Duration, tick: u64) -> Vec<(NodeId, Value)>;
}

/// Heater plant constants.
#[derive(Clone, Debug, PartialEq)]
pub struct HeaterParams {
    pub ambient_c: f64,
    /// First-order thermal time constant.
    pub time_constant_s: f64,
    /// Steady-state temperature rise per percent of heater power.
    pub gain_c_per_pct: f64,
    pub controller_kp: f64,
    pub noise_amplitude_c: f64,
    pub noise_seed: u64,
}

impl Default for HeaterParams {
    fn default() -> Self {
        Self {
            ambient_c: 20.0,
            time_constant_s: 30.0,
            gain_c_per_pct: 2.0,
            controller_kp: 5.0,
            noise_amplitude_c: 0.0,
            noise_seed: 0,
        }
    }
}

/// First-order thermal lag with an optional proportional controller.
pub struct HeaterSimulation {
    params: HeaterParams,
    noise: Option<StdRng>,
}

impl HeaterSimulation {
    pub fn new(params: HeaterParams) -> Self {
        let noise =
            (params.noise_amplitude_c > 0.0).then(|| StdRng::seed_from_u64(params.noise_seed));
        Self { params, noise }
    }
}

impl Simulation for HeaterSimulation {
    fn step(&mut self, state: &PlantState<'_>, dt: Duration, _tick: u64) -> Vec<(NodeId, Value)> {
        let p = &self.params;
        let temperature = state.float(nodes::TEMPERATURE).unwrap_or(p.ambient_c);
        let ambient = state.float(nodes::AMBIENT_TEMPERATURE).unwrap_or(p.ambient_c);
        let enabled = state.flag(nodes::HEATER_ENABLED).unwrap_or(false);
        let mut power = state.float(nodes::HEATER_POWER).unwrap_or(0.0);
        let mut out = Vec::with_capacity(2);

        if state.option(nodes::CONTROL_MODE) == Some(MODE_AUTO) {
            let setpoint = state.float(nodes::SETPOINT).unwrap_or(ambient);
            power = (p.controller_kp * (setpoint - temperature)).clamp(0.0, 100.0);
            out.push((NodeId::from(nodes::HEATER_POWER), Value::Float(power)));
        }

        let effective = if enabled { power } else { 0.0 };
        let target = ambient + p.gain_c_per_pct * effective;
        // Explicit Euler; alpha is capped so a long dt cannot overshoot.
        let alpha = (dt.as_secs_f64() / p.time_constant_s).min(1.0);
        let mut next = temperature + (target - temperature) * alpha;

        if let Some(rng) = self.noise.as_mut() {
            let half = p.noise_amplitude_c / 2.0;
            next += rng.gen_range(-half..=half);
        }

        out.push((NodeId::from(nodes::TEMPERATURE), Value::Float(next)));
        out
    }
}

/// Replays fixed values at fixed ticks. Used for reproducible scenarios.
#[derive(Debug, Default)]
pub struct ScriptedSimulation {
    script: BTreeMap<u64, Vec<(NodeId, Value)>>,
}

impl ScriptedSimulation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `node` to `value` on tick number `tick` (the first tick is 1).
    pub fn at(mut self, tick: u64, node: &str, value: Value) -> Self {
        self.script
            .entry(tick)
            .or_default()
            .push((NodeId::from(node), value));
        self
    }
}

impl Simulation for ScriptedSimulation {
    fn step(&mut self, _state: &PlantState<'_>, _dt: Duration, tick: u64) -> Vec<(NodeId, Value)> {
        self.script.remove(&tick).unwrap_or_default()
    }
}
