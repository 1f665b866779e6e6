//! Single-owner task for the process model.
//!
//! The model is moved into [`ModelOwner::run`] and never shared. Ticks and
//! client commands are serialized on that one task; everything else talks
//! to it through a cloneable [`ModelHandle`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use plantbridge_core::{NodeId, Value, VariableSnapshot};
use plantbridge_telemetry::MetricsRecorder;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::ModelError;
use crate::fanout::ChangeFanout;
use crate::model::ProcessModel;

#[derive(Clone, Debug)]
pub struct OwnerConfig {
    pub tick_interval: Duration,
    pub write_ack_timeout: Duration,
    pub command_queue_capacity: usize,
}

impl Default for OwnerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
            write_ack_timeout: Duration::from_secs(1),
            command_queue_capacity: 1024,
        }
    }
}

enum Command {
    Read {
        node: NodeId,
        reply: oneshot::Sender<Result<VariableSnapshot, ModelError>>,
    },
    ReadAll {
        reply: oneshot::Sender<Vec<VariableSnapshot>>,
    },
    Write {
        node: NodeId,
        value: Value,
        reply: oneshot::Sender<Result<(), ModelError>>,
    },
}

pub struct ModelOwner {
    model: ProcessModel,
    commands: mpsc::Receiver<Command>,
    fanout: Arc<ChangeFanout>,
    tick_interval: Duration,
    metrics: Option<Arc<MetricsRecorder>>,
}

/// Cloneable submit side of the owner's command queue.
#[derive(Clone)]
pub struct ModelHandle {
    commands: mpsc::Sender<Command>,
    write_ack_timeout: Duration,
}

impl ModelOwner {
    pub fn new(
        model: ProcessModel,
        fanout: Arc<ChangeFanout>,
        config: &OwnerConfig,
    ) -> (Self, ModelHandle) {
        let (tx, rx) = mpsc::channel(config.command_queue_capacity.max(1));
        let owner = Self {
            model,
            commands: rx,
            fanout,
            tick_interval: config.tick_interval,
            metrics: None,
        };
        let handle = ModelHandle {
            commands: tx,
            write_ack_timeout: config.write_ack_timeout,
        };
        (owner, handle)
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Tick at the fixed period and serve commands until cancelled.
    ///
    /// Every tick advances the model by exactly one period, regardless of
    /// scheduling jitter, so a run is reproducible from its inputs.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first interval tick completes immediately.
        interval.tick().await;

        let mut commands_open = true;
        info!(
            tick_ms = self.tick_interval.as_millis() as u64,
            "process model owner started"
        );

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = interval.tick() => self.step(),
                cmd = self.commands.recv(), if commands_open => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => {
                        debug!("all model handles dropped; ticking without commands");
                        commands_open = false;
                    }
                },
            }
        }

        info!(ticks = self.model.ticks(), "process model owner stopped");
    }

    fn step(&mut self) {
        let started = Instant::now();
        let changes = self.model.tick(self.tick_interval);
        let tick = self.model.ticks();
        self.fanout.publish(&changes);
        self.fanout.tick_complete(tick);

        if let Some(m) = &self.metrics {
            m.counter_inc("model.ticks", &[], 1);
            m.histogram_observe("model.tick_us", &[], started.elapsed().as_micros() as f64);
        }
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Read { node, reply } => {
                let _ = reply.send(self.model.read(node.as_str()));
            }
            Command::ReadAll { reply } => {
                let _ = reply.send(self.model.read_all());
            }
            Command::Write { node, value, reply } => {
                let result = self.model.write(node.as_str(), value);
                let outcome = match &result {
                    Ok(change) => {
                        if let Some(change) = change {
                            self.fanout.publish(std::slice::from_ref(change));
                        }
                        "ok"
                    }
                    Err(e) => {
                        warn!(node_id = %node, error = %e, "write rejected");
                        "rejected"
                    }
                };
                if let Some(m) = &self.metrics {
                    m.counter_inc("model.writes", &[("result", outcome)], 1);
                }
                if reply.send(result.map(|_| ())).is_err() {
                    debug!(node_id = %node, "write applied after caller stopped waiting");
                }
            }
        }
    }
}

impl ModelHandle {
    pub async fn read(&self, node: &NodeId) -> Result<VariableSnapshot, ModelError> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Read {
            node: node.clone(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ModelError::OwnerGone)?
    }

    pub async fn read_all(&self) -> Result<Vec<VariableSnapshot>, ModelError> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::ReadAll { reply }).await?;
        rx.await.map_err(|_| ModelError::OwnerGone)
    }

    /// Submit a write and wait a bounded time for the owner's verdict.
    ///
    /// A full queue fails immediately with [`ModelError::Timeout`]. Once
    /// queued, a write cannot be withdrawn: if the wait times out, the
    /// owner still applies it when it gets there.
    pub async fn write(&self, node: NodeId, value: Value) -> Result<(), ModelError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .try_send(Command::Write { node, value, reply })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => ModelError::Timeout(self.write_ack_timeout),
                mpsc::error::TrySendError::Closed(_) => ModelError::OwnerGone,
            })?;

        match tokio::time::timeout(self.write_ack_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ModelError::OwnerGone),
            Err(_) => Err(ModelError::Timeout(self.write_ack_timeout)),
        }
    }

    pub fn write_ack_timeout(&self) -> Duration {
        self.write_ack_timeout
    }

    async fn submit(&self, cmd: Command) -> Result<(), ModelError> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| ModelError::OwnerGone)
    }
}
