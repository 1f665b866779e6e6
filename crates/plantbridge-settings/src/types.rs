//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a
//! partial JSON file only needs the keys it overrides.

use std::path::PathBuf;

use plantbridge_core::SecurityPolicy;
use serde::{Deserialize, Serialize};

/// Root settings for the bridge.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlantSettings {
    pub server: ServerSettings,
    pub model: ModelSettings,
    pub session: SessionSettings,
    pub security: SecuritySettings,
    pub telemetry: TelemetrySettings,
}

/// Gateway network and per-connection limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// HTTP + WebSocket port (`0` = auto-assign).
    pub port: u16,
    /// Time a new socket has to send its `auth` message.
    pub auth_grace_ms: u64,
    /// Bounded outbound queue per client connection.
    pub outbound_queue_capacity: usize,
    /// Window over which queue overflows are counted.
    pub eviction_window_ms: u64,
    /// Overflows within the window that trigger eviction.
    pub eviction_overflow_threshold: u32,
    /// Malformed messages tolerated before the socket is closed.
    pub max_protocol_errors: u32,
    /// WebSocket ping interval.
    pub heartbeat_interval_secs: u64,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8090,
            auth_grace_ms: 5_000,
            outbound_queue_capacity: 256,
            eviction_window_ms: 5_000,
            eviction_overflow_threshold: 32,
            max_protocol_errors: 10,
            heartbeat_interval_secs: 30,
            max_message_size: 64 * 1024,
        }
    }
}

/// Process model owner and simulation parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelSettings {
    /// Fixed simulation period.
    pub tick_interval_ms: u64,
    /// How long a write waits for the owner's acknowledgment.
    pub write_ack_timeout_ms: u64,
    /// Capacity of the owner's command queue.
    pub command_queue_capacity: usize,
    /// Samples kept per node in the rolling history.
    pub history_capacity: usize,
    pub simulation: SimulationSettings,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            write_ack_timeout_ms: 1_000,
            command_queue_capacity: 1_024,
            history_capacity: 600,
            simulation: SimulationSettings::default(),
        }
    }
}

/// Heater plant constants.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SimulationSettings {
    pub ambient_c: f64,
    pub time_constant_s: f64,
    pub gain_c_per_pct: f64,
    pub controller_kp: f64,
    /// Peak-to-peak measurement noise on temperature; `0` disables it.
    pub noise_amplitude_c: f64,
    /// Seed for the noise generator so runs are reproducible.
    pub noise_seed: u64,
}

impl Default for SimulationSettings {
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

/// Session lifecycle settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Sessions without activity for this long are closed.
    pub idle_timeout_secs: u64,
    /// How often the idle sweep runs.
    pub sweep_interval_secs: u64,
    /// Floor for subscription sampling; `None` means one model tick.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_sampling_interval_ms: Option<u64>,
    /// Longer requested intervals are revised down to this.
    pub max_sampling_interval_ms: u64,
    pub max_subscriptions_per_session: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 120,
            sweep_interval_secs: 5,
            min_sampling_interval_ms: None,
            max_sampling_interval_ms: 3_600_000,
            max_subscriptions_per_session: 64,
        }
    }
}

/// Trust material and the mandated message-security policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecuritySettings {
    pub trust_store_path: PathBuf,
    pub required_policy: SecurityPolicy,
    pub token_lifetime_secs: u64,
    /// Optional revocation list, re-read on every authentication attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation_path: Option<PathBuf>,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            trust_store_path: crate::loader::plantbridge_dir().join("trust.json"),
            required_policy: SecurityPolicy::Sign,
            token_lifetime_secs: 3_600,
            revocation_path: None,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelemetrySettings {
    /// Default level; `RUST_LOG` wins when set.
    pub log_level: String,
    /// Persist WARN+ events to SQLite.
    pub log_to_sqlite: bool,
    pub log_db_path: PathBuf,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_to_sqlite: true,
            log_db_path: crate::loader::plantbridge_dir().join("logs.db"),
        }
    }
}

impl PlantSettings {
    /// Reject combinations that would make the runtime misbehave.
    pub fn validate(&self) -> crate::Result<()> {
        use crate::SettingsError::InvalidValue;

        if self.model.tick_interval_ms == 0 {
            return Err(InvalidValue("model.tickIntervalMs must be > 0".into()));
        }
        if self.model.simulation.time_constant_s <= 0.0 {
            return Err(InvalidValue("model.simulation.timeConstantS must be > 0".into()));
        }
        if self.server.outbound_queue_capacity == 0 {
            return Err(InvalidValue("server.outboundQueueCapacity must be > 0".into()));
        }
        if self.model.command_queue_capacity == 0 {
            return Err(InvalidValue("model.commandQueueCapacity must be > 0".into()));
        }
        if self.session.idle_timeout_secs == 0 {
            return Err(InvalidValue("session.idleTimeoutSecs must be > 0".into()));
        }
        if self.session.sweep_interval_secs == 0 {
            return Err(InvalidValue("session.sweepIntervalSecs must be > 0".into()));
        }
        if self.server.heartbeat_interval_secs == 0 {
            return Err(InvalidValue("server.heartbeatIntervalSecs must be > 0".into()));
        }
        let floor = self
            .session
            .min_sampling_interval_ms
            .unwrap_or(self.model.tick_interval_ms);
        if self.session.max_sampling_interval_ms < floor {
            return Err(InvalidValue(format!(
                "session.maxSamplingIntervalMs must be >= {floor}"
            )));
        }
        // One node changing every tick is the slowest steady overflow a
        // stalled subscriber produces; eviction must be reachable from it.
        let ticks_per_window = self.server.eviction_window_ms / self.model.tick_interval_ms;
        if u64::from(self.server.eviction_overflow_threshold) >= ticks_per_window {
            return Err(InvalidValue(format!(
                "server.evictionOverflowThreshold must be < {ticks_per_window} \
                 (model ticks per eviction window)"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = PlantSettings::default();
        assert_eq!(s.server.port, 8090);
        assert_eq!(s.model.tick_interval_ms, 100);
        assert_eq!(s.session.idle_timeout_secs, 120);
        assert_eq!(s.security.required_policy, SecurityPolicy::Sign);
        assert!(s.security.trust_store_path.ends_with("trust.json"));
        assert!(s.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: PlantSettings =
            serde_json::from_str(r#"{"model": {"tickIntervalMs": 50}}"#).unwrap();
        assert_eq!(s.model.tick_interval_ms, 50);
        assert_eq!(s.model.write_ack_timeout_ms, 1_000);
        assert_eq!(s.server.port, 8090);
    }

    #[test]
    fn policy_reads_snake_case() {
        let s: PlantSettings =
            serde_json::from_str(r#"{"security": {"requiredPolicy": "sign_and_encrypt"}}"#)
                .unwrap();
        assert_eq!(s.security.required_policy, SecurityPolicy::SignAndEncrypt);
    }

    #[test]
    fn zero_tick_rejected() {
        let mut s = PlantSettings::default();
        s.model.tick_interval_ms = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn zero_timer_intervals_rejected() {
        let mut s = PlantSettings::default();
        s.server.heartbeat_interval_secs = 0;
        assert!(s.validate().is_err());

        let mut s = PlantSettings::default();
        s.session.sweep_interval_secs = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn unreachable_eviction_threshold_rejected() {
        let mut s = PlantSettings::default();
        s.server.eviction_overflow_threshold = 512;
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("evictionOverflowThreshold"), "{err}");

        s.server.eviction_overflow_threshold = 49;
        assert!(s.validate().is_ok());
        s.server.eviction_overflow_threshold = 50;
        assert!(s.validate().is_err());
    }

    #[test]
    fn sampling_ceiling_below_floor_rejected() {
        let mut s = PlantSettings::default();
        s.session.max_sampling_interval_ms = 50;
        assert!(s.validate().is_err());
        s.session.max_sampling_interval_ms = 100;
        assert!(s.validate().is_ok());
    }
}
