//! Session table and the node → subscription index.
//!
//! Both live under one lock so that closing a session and dispatching a
//! change are atomic with respect to each other: once a session is gone
//! from the index, nothing more is delivered to its sink.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use plantbridge_core::{
    BridgeError, NodeChange, NodeId, SessionId, SubscriptionId, Value, VariableSnapshot,
};
use plantbridge_process::{AddressSpace, ChangeListener};
use plantbridge_security::{SecurityContext, SecurityToken};
use plantbridge_telemetry::MetricsRecorder;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::sink::{CloseReason, Delivery, NotificationSink};
use crate::subscription::{Sampling, Subscription};

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
    /// Model tick period; sampling intervals are whole multiples of it.
    pub tick_interval: Duration,
    pub min_sampling_interval: Duration,
    /// Requests above this are granted this interval instead.
    pub max_sampling_interval: Duration,
    pub max_subscriptions_per_session: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(5),
            tick_interval: Duration::from_millis(100),
            min_sampling_interval: Duration::from_millis(100),
            max_sampling_interval: Duration::from_secs(3600),
            max_subscriptions_per_session: 64,
        }
    }
}

/// What a subscriber is told after `subscribe`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionGrant {
    pub id: SubscriptionId,
    pub revised_interval_ms: u64,
}

/// Read-only view of one session.
#[derive(Clone, Debug)]
pub struct SessionInfo {
    pub id: SessionId,
    pub principal: String,
    pub policy: plantbridge_core::SecurityPolicy,
    pub created_at: chrono::DateTime<Utc>,
    pub subscriptions: usize,
}

struct Session {
    token: SecurityToken,
    created_at: chrono::DateTime<Utc>,
    last_activity: Instant,
    sink: Option<Arc<dyn NotificationSink>>,
    subscriptions: HashMap<SubscriptionId, Subscription>,
}

type SubscriptionRef = (SessionId, SubscriptionId);

#[derive(Default)]
struct SessionTable {
    sessions: HashMap<SessionId, Session>,
    index: HashMap<NodeId, HashSet<SubscriptionRef>>,
    /// Subscriptions holding undelivered values.
    dirty: HashSet<SubscriptionRef>,
}

impl SessionTable {
    fn session_mut(&mut self, id: &SessionId) -> Result<&mut Session, BridgeError> {
        self.sessions
            .get_mut(id)
            .ok_or_else(|| BridgeError::UnknownSession(id.clone()))
    }

    fn unindex(&mut self, session: &SessionId, sub: &Subscription) {
        let key = (session.clone(), sub.id.clone());
        for node in &sub.nodes {
            if let Some(refs) = self.index.get_mut(node) {
                refs.remove(&key);
                if refs.is_empty() {
                    self.index.remove(node);
                }
            }
        }
        self.dirty.remove(&key);
    }

    fn remove_session(&mut self, id: &SessionId) -> Option<Session> {
        let session = self.sessions.remove(id)?;
        for sub in session.subscriptions.values() {
            self.unindex(id, sub);
        }
        Some(session)
    }
}

pub struct SessionManager {
    table: Mutex<SessionTable>,
    security: Arc<SecurityContext>,
    address_space: AddressSpace,
    config: SessionConfig,
    current_tick: AtomicU64,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl SessionManager {
    pub fn new(
        security: Arc<SecurityContext>,
        address_space: AddressSpace,
        config: SessionConfig,
    ) -> Self {
        Self {
            table: Mutex::new(SessionTable::default()),
            security,
            address_space,
            config,
            current_tick: AtomicU64::new(0),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn security(&self) -> &SecurityContext {
        &self.security
    }

    pub fn address_space(&self) -> &AddressSpace {
        &self.address_space
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Open a session for an authenticated token. The session is active
    /// immediately.
    pub fn create_session(
        &self,
        token: SecurityToken,
        sink: Option<Arc<dyn NotificationSink>>,
    ) -> Result<SessionId, BridgeError> {
        if !token.is_valid_at(Utc::now()) {
            return Err(BridgeError::Unauthenticated(
                "security token expired".into(),
            ));
        }
        let id = SessionId::new();
        let principal = token.principal.clone();
        let count = {
            let mut table = self.table.lock();
            table.sessions.insert(
                id.clone(),
                Session {
                    token,
                    created_at: Utc::now(),
                    last_activity: Instant::now(),
                    sink,
                    subscriptions: HashMap::new(),
                },
            );
            table.sessions.len()
        };
        info!(session_id = %id, %principal, "session created");
        self.record_active(count);
        Ok(id)
    }

    /// Close a session and release its subscriptions. Returns false if it
    /// was already gone.
    pub fn close_session(&self, id: &SessionId, reason: CloseReason) -> bool {
        let (closed, count) = {
            let mut table = self.table.lock();
            let closed = match table.remove_session(id) {
                Some(session) => {
                    if let Some(sink) = &session.sink {
                        sink.closed(reason);
                    }
                    true
                }
                None => false,
            };
            (closed, table.sessions.len())
        };
        if closed {
            info!(session_id = %id, %reason, "session closed");
            self.record_closed(reason, count);
        }
        closed
    }

    /// Record activity on a session.
    pub fn touch(&self, id: &SessionId) -> Result<(), BridgeError> {
        self.table.lock().session_mut(id)?.last_activity = Instant::now();
        Ok(())
    }

    pub fn session_count(&self) -> usize {
        self.table.lock().sessions.len()
    }

    pub fn session_info(&self, id: &SessionId) -> Option<SessionInfo> {
        let table = self.table.lock();
        table.sessions.get(id).map(|s| SessionInfo {
            id: id.clone(),
            principal: s.token.principal.clone(),
            policy: s.token.policy,
            created_at: s.created_at,
            subscriptions: s.subscriptions.len(),
        })
    }

    /// Number of distinct sessions subscribed to `node`.
    pub fn subscriber_count(&self, node: &str) -> usize {
        let table = self.table.lock();
        table.index.get(node).map_or(0, |refs| {
            refs.iter()
                .map(|(session, _)| session)
                .collect::<HashSet<_>>()
                .len()
        })
    }

    /// Close every session idle for at least the configured timeout.
    pub fn sweep_idle(&self, now: Instant) -> Vec<SessionId> {
        let (expired, count) = {
            let mut table = self.table.lock();
            let expired: Vec<SessionId> = table
                .sessions
                .iter()
                .filter(|(_, s)| now.saturating_duration_since(s.last_activity) >= self.config.idle_timeout)
                .map(|(id, _)| id.clone())
                .collect();
            for id in &expired {
                if let Some(session) = table.remove_session(id) {
                    if let Some(sink) = &session.sink {
                        sink.closed(CloseReason::IdleTimeout);
                    }
                }
            }
            (expired, table.sessions.len())
        };
        for id in &expired {
            info!(session_id = %id, "session idle, closed");
            self.record_closed(CloseReason::IdleTimeout, count);
        }
        expired
    }

    /// Run [`SessionManager::sweep_idle`] periodically until cancelled.
    pub fn start_sweep_task(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let period = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let closed = manager.sweep_idle(Instant::now());
                        if !closed.is_empty() {
                            debug!(count = closed.len(), "idle sweep closed sessions");
                        }
                    }
                }
            }
        })
    }

    // ── Subscriptions ───────────────────────────────────────────────

    /// Subscribe to `nodes` at roughly `interval_ms`.
    ///
    /// The interval is revised up to a whole number of ticks. An identical
    /// request (same node set, same revised interval) returns the existing
    /// subscription instead of creating a duplicate.
    pub fn subscribe(
        &self,
        session: &SessionId,
        nodes: &[NodeId],
        interval_ms: u64,
    ) -> Result<SubscriptionGrant, BridgeError> {
        if nodes.is_empty() {
            return Err(BridgeError::ProtocolError(
                "subscribe requires at least one node".into(),
            ));
        }
        for node in nodes {
            self.address_space.resolve(node.as_str())?;
        }
        let wanted: BTreeSet<NodeId> = nodes.iter().cloned().collect();
        let sampling = Sampling::revise(
            interval_ms,
            self.config.tick_interval,
            self.config.min_sampling_interval,
            self.config.max_sampling_interval,
        );

        let mut table = self.table.lock();
        let max = self.config.max_subscriptions_per_session;
        let entry = table.session_mut(session)?;
        entry.last_activity = Instant::now();

        if let Some(existing) = entry
            .subscriptions
            .values()
            .find(|s| s.nodes == wanted && s.sampling == sampling)
        {
            return Ok(SubscriptionGrant {
                id: existing.id.clone(),
                revised_interval_ms: sampling.interval_ms,
            });
        }
        if entry.subscriptions.len() >= max {
            return Err(BridgeError::ProtocolError(format!(
                "subscription limit of {max} reached"
            )));
        }

        let sub = Subscription::new(wanted, sampling, self.current_tick.load(Ordering::Acquire));
        let grant = SubscriptionGrant {
            id: sub.id.clone(),
            revised_interval_ms: sampling.interval_ms,
        };
        let nodes: Vec<NodeId> = sub.nodes.iter().cloned().collect();
        entry.subscriptions.insert(sub.id.clone(), sub);
        for node in nodes {
            table
                .index
                .entry(node)
                .or_default()
                .insert((session.clone(), grant.id.clone()));
        }
        debug!(
            session_id = %session,
            subscription = %grant.id,
            interval_ms = grant.revised_interval_ms,
            "subscribed"
        );
        Ok(grant)
    }

    pub fn unsubscribe(
        &self,
        session: &SessionId,
        subscription: &SubscriptionId,
    ) -> Result<(), BridgeError> {
        let mut table = self.table.lock();
        let entry = table.session_mut(session)?;
        entry.last_activity = Instant::now();
        let sub = entry.subscriptions.remove(subscription).ok_or_else(|| {
            BridgeError::ProtocolError(format!("unknown subscription {subscription}"))
        })?;
        table.unindex(session, &sub);
        Ok(())
    }

    // ── Writes ──────────────────────────────────────────────────────

    /// Authorize and apply a client write. Address space errors propagate
    /// unchanged.
    pub async fn request_write(
        &self,
        session: &SessionId,
        node: &NodeId,
        value: Value,
    ) -> Result<(), BridgeError> {
        let token = {
            let mut table = self.table.lock();
            let entry = table.session_mut(session)?;
            entry.last_activity = Instant::now();
            entry.token.clone()
        };
        self.security.authorize_write(&token, node)?;
        self.address_space.apply_write(node.as_str(), value).await
    }

    // ── Dispatch ────────────────────────────────────────────────────

    /// Stage a change for every subscription on its node.
    ///
    /// Touches only the subscriptions indexed under `change.node`.
    pub fn dispatch_change(&self, change: &NodeChange) {
        let mut guard = self.table.lock();
        let table = &mut *guard;
        let Some(refs) = table.index.get(&change.node) else {
            return;
        };
        let snapshot = change.to_snapshot();
        for key in refs {
            let (session_id, sub_id) = key;
            let Some(sub) = table
                .sessions
                .get_mut(session_id)
                .and_then(|s| s.subscriptions.get_mut(sub_id))
            else {
                continue;
            };
            sub.pending.insert(change.node.clone(), snapshot.clone());
            table.dirty.insert(key.clone());
        }
    }

    /// Deliver staged values for every subscription due at `tick`.
    ///
    /// A session receives at most one notification per node per flush even
    /// when several of its subscriptions cover that node. Sinks that report
    /// [`Delivery::Evict`] have their session closed before the lock is
    /// released.
    pub fn flush(&self, tick: u64) {
        self.current_tick.store(tick, Ordering::Release);

        let mut guard = self.table.lock();
        let table = &mut *guard;
        if table.dirty.is_empty() {
            return;
        }

        let mut batches: HashMap<SessionId, BTreeMap<NodeId, VariableSnapshot>> = HashMap::new();
        let mut not_due = Vec::new();
        for key in table.dirty.drain() {
            let Some(sub) = table
                .sessions
                .get_mut(&key.0)
                .and_then(|s| s.subscriptions.get_mut(&key.1))
            else {
                continue;
            };
            if !sub.is_due(tick) {
                not_due.push(key);
                continue;
            }
            sub.last_delivered_tick = tick;
            let batch = batches.entry(key.0.clone()).or_default();
            for (node, snap) in sub.pending.drain() {
                match batch.get(&node) {
                    Some(prev) if prev.ts > snap.ts => {}
                    _ => {
                        batch.insert(node, snap);
                    }
                }
            }
        }
        table.dirty.extend(not_due);

        let mut evicted = Vec::new();
        let mut dropped = 0u64;
        for (session_id, batch) in &batches {
            let Some(sink) = table.sessions.get(session_id).and_then(|s| s.sink.as_ref()) else {
                continue;
            };
            for snap in batch.values() {
                match sink.deliver(snap) {
                    Delivery::Queued => {}
                    Delivery::Dropped => dropped += 1,
                    Delivery::Evict => {
                        evicted.push(session_id.clone());
                        break;
                    }
                }
            }
        }

        for id in &evicted {
            if let Some(session) = table.remove_session(id) {
                if let Some(sink) = &session.sink {
                    sink.closed(CloseReason::SlowConsumer);
                }
            }
        }
        let count = table.sessions.len();
        drop(guard);

        if dropped > 0 {
            debug!(dropped, tick, "outbound queues dropped stale notifications");
        }
        for id in &evicted {
            warn!(session_id = %id, "slow consumer evicted");
            self.record_closed(CloseReason::SlowConsumer, count);
        }
    }

    // ── Metrics ─────────────────────────────────────────────────────

    fn record_active(&self, count: usize) {
        if let Some(m) = &self.metrics {
            m.gauge_set("session.active", &[], count as f64);
        }
    }

    fn record_closed(&self, reason: CloseReason, count: usize) {
        if let Some(m) = &self.metrics {
            m.counter_inc("session.closed", &[("reason", reason.as_str())], 1);
            m.gauge_set("session.active", &[], count as f64);
        }
    }
}

impl ChangeListener for SessionManager {
    fn on_change(&self, change: &NodeChange) {
        self.dispatch_change(change);
    }

    fn on_tick_complete(&self, tick: u64) {
        self.flush(tick);
    }
}
