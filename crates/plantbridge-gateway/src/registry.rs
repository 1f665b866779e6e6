use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use plantbridge_core::ClientId;
use plantbridge_telemetry::MetricsRecorder;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::connection::{ClientConnection, Farewell};

/// Registry of all connected WebSocket clients.
pub struct ClientRegistry {
    clients: DashMap<ClientId, Arc<ClientConnection>>,
    metrics: Arc<MetricsRecorder>,
}

impl ClientRegistry {
    pub fn new(metrics: Arc<MetricsRecorder>) -> Self {
        Self {
            clients: DashMap::new(),
            metrics,
        }
    }

    pub fn register(&self, conn: Arc<ClientConnection>) {
        self.clients.insert(conn.id().clone(), conn);
        self.metrics.counter_inc("gateway.connections.total", &[], 1);
        self.record_active();
    }

    /// Remove a client by ID.
    pub fn unregister(&self, id: &ClientId) -> Option<Arc<ClientConnection>> {
        let removed = self.clients.remove(id).map(|(_, conn)| conn);
        if removed.is_some() {
            self.record_active();
        }
        removed
    }

    /// Number of connected clients.
    pub fn count(&self) -> usize {
        self.clients.len()
    }

    /// Ask every client to close. Connections unregister themselves once
    /// their socket task finishes.
    pub fn close_all(&self, farewell: &Farewell) -> usize {
        self.clients
            .iter()
            .filter(|entry| entry.value().close_with(farewell.clone()))
            .count()
    }

    /// Close clients that haven't answered a ping within `timeout`.
    pub fn cleanup_dead_clients(&self, timeout: Duration) -> usize {
        let dead: Vec<Arc<ClientConnection>> = self
            .clients
            .iter()
            .filter(|entry| entry.value().last_pong_elapsed() > timeout)
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut closed = 0;
        for conn in dead {
            if conn.close_with(Farewell::going_away()) {
                closed += 1;
                tracing::info!(client_id = %conn.id(), "closing unresponsive client");
            }
        }
        closed
    }

    fn record_active(&self) {
        self.metrics
            .gauge_set("gateway.connections.active", &[], self.clients.len() as f64);
    }
}

/// Periodically close clients whose heartbeat went quiet.
pub fn start_cleanup_task(
    registry: Arc<ClientRegistry>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = registry.cleanup_dead_clients(timeout);
                    if removed > 0 {
                        tracing::info!(removed, "dead client cleanup");
                    }
                }
            }
        }
    })
}
