//! # plantbridge
//!
//! Process variable server binary: wires the heater model, security
//! context, session manager and gateway together and serves until a
//! shutdown signal.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use plantbridge_gateway::{ConnectionConfig, GatewayConfig, ShutdownCoordinator};
use plantbridge_process::{
    build_plant, heater_plant, HeaterParams, HeaterSimulation, History, OwnerConfig, ProcessModel,
};
use plantbridge_security::{SecurityConfig, SecurityContext, TrustStore};
use plantbridge_session::{SessionConfig, SessionManager};
use plantbridge_settings::{load_settings, load_settings_from_path, PlantSettings};
use plantbridge_telemetry::{init_telemetry, MetricsRecorder, TelemetryConfig};

/// Process variable server with a realtime WebSocket gateway.
#[derive(Parser, Debug)]
#[command(name = "plantbridge", about = "Process variable server and realtime gateway")]
struct Cli {
    /// Settings file (defaults to ~/.plantbridge/settings.json).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Trust store JSON file.
    #[arg(long)]
    trust_store: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate the trust store, then print a summary.
    CheckTrust,
}

impl Cli {
    /// Command-line flags win over the file and the environment.
    fn apply(&self, settings: &mut PlantSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(path) = &self.trust_store {
            settings.security.trust_store_path.clone_from(path);
        }
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = match &cli.config {
        Some(path) => load_settings_from_path(path),
        None => load_settings(),
    }
    .context("Failed to load settings")?;
    cli.apply(&mut settings);

    if let Some(Command::CheckTrust) = cli.command {
        return check_trust(&settings);
    }

    if settings.telemetry.log_to_sqlite {
        ensure_parent_dir(&settings.telemetry.log_db_path)?;
    }
    let telemetry = init_telemetry(TelemetryConfig {
        log_level: TelemetryConfig::parse_level(&settings.telemetry.log_level),
        module_levels: Vec::new(),
        log_to_sqlite: settings.telemetry.log_to_sqlite,
        log_db_path: settings.telemetry.log_db_path.clone(),
    });

    // Without trust material nobody can authenticate; refuse to start.
    let store = TrustStore::load(&settings.security.trust_store_path).with_context(|| {
        format!(
            "Failed to load trust store: {}",
            settings.security.trust_store_path.display()
        )
    })?;

    run(settings, store, telemetry.metrics()).await
}

fn check_trust(settings: &PlantSettings) -> Result<()> {
    let path = &settings.security.trust_store_path;
    let store = TrustStore::load(path)
        .with_context(|| format!("Failed to load trust store: {}", path.display()))?;
    let summary = store.summary(Utc::now());
    println!("trust store: {}", path.display());
    println!("  tokens:               {}", summary.tokens);
    println!("  certificates:         {}", summary.certificates);
    println!("  expired certificates: {}", summary.expired_certificates);
    println!("  revoked fingerprints: {}", summary.revoked);
    println!("  required policy:      {}", settings.security.required_policy);
    Ok(())
}

async fn run(settings: PlantSettings, store: TrustStore, metrics: Arc<MetricsRecorder>) -> Result<()> {
    let shutdown = ShutdownCoordinator::new();
    let tick_interval = Duration::from_millis(settings.model.tick_interval_ms);

    let sim = &settings.model.simulation;
    let params = HeaterParams {
        ambient_c: sim.ambient_c,
        time_constant_s: sim.time_constant_s,
        gain_c_per_pct: sim.gain_c_per_pct,
        controller_kp: sim.controller_kp,
        noise_amplitude_c: sim.noise_amplitude_c,
        noise_seed: sim.noise_seed,
    };
    let model = ProcessModel::new(
        heater_plant(&params),
        Box::new(HeaterSimulation::new(params)),
        Utc::now(),
    );

    let history = Arc::new(History::new(settings.model.history_capacity));
    for snapshot in model.read_all() {
        history.record(&snapshot);
    }

    let (owner, space) = build_plant(
        model,
        &OwnerConfig {
            tick_interval,
            write_ack_timeout: Duration::from_millis(settings.model.write_ack_timeout_ms),
            command_queue_capacity: settings.model.command_queue_capacity,
        },
    );
    let owner = owner.with_metrics(Arc::clone(&metrics));

    let security = Arc::new(SecurityContext::new(
        store,
        SecurityConfig {
            required_policy: settings.security.required_policy,
            token_lifetime: Duration::from_secs(settings.security.token_lifetime_secs),
            revocation_path: settings.security.revocation_path.clone(),
        },
    ));
    let session_config = SessionConfig {
        idle_timeout: Duration::from_secs(settings.session.idle_timeout_secs),
        sweep_interval: Duration::from_secs(settings.session.sweep_interval_secs),
        tick_interval,
        min_sampling_interval: settings
            .session
            .min_sampling_interval_ms
            .map_or(tick_interval, Duration::from_millis),
        max_sampling_interval: Duration::from_millis(settings.session.max_sampling_interval_ms),
        max_subscriptions_per_session: settings.session.max_subscriptions_per_session,
    };
    let sessions = Arc::new(
        SessionManager::new(security, space.clone(), session_config)
            .with_metrics(Arc::clone(&metrics)),
    );
    space.on_change(sessions.clone());
    space.on_change(history.clone());

    let owner_task = tokio::spawn(owner.run(shutdown.token()));
    let sweep_task = sessions.start_sweep_task(shutdown.token());

    let server = &settings.server;
    let gateway_config = GatewayConfig {
        host: server.host.clone(),
        port: server.port,
        connection: ConnectionConfig {
            outbound_capacity: server.outbound_queue_capacity,
            eviction_window: Duration::from_millis(server.eviction_window_ms),
            eviction_threshold: server.eviction_overflow_threshold,
            auth_grace: Duration::from_millis(server.auth_grace_ms),
            max_protocol_errors: server.max_protocol_errors,
            heartbeat_interval: Duration::from_secs(server.heartbeat_interval_secs),
        },
        max_message_size: server.max_message_size,
    };
    let state = plantbridge_gateway::AppState::new(
        sessions,
        history,
        metrics,
        gateway_config,
        shutdown.token(),
    );
    let handle = plantbridge_gateway::start(state)
        .await
        .context("Failed to start gateway")?;

    tracing::info!(
        port = handle.port(),
        tick_ms = settings.model.tick_interval_ms,
        policy = %settings.security.required_policy,
        "plantbridge ready"
    );

    shutdown.wait_for_signal().await;
    tracing::info!("shutting down");

    let mut tasks = handle.into_tasks();
    tasks.push(owner_task);
    tasks.push(sweep_task);
    shutdown.graceful_shutdown(tasks, None).await;
    Ok(())
}
