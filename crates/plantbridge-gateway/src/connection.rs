//! One live WebSocket client.
//!
//! A [`ClientConnection`] is the session's notification sink. Values land in
//! a bounded outbound queue that a dedicated writer task drains, so a slow
//! socket only ever stalls its own writer. When the queue is full the oldest
//! queued value is dropped; too many overflows inside the eviction window
//! evict the client. Acks and errors are never dropped, but a client that
//! lets them pile up past the same capacity is evicted as well.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message as WsMessage, Utf8Bytes, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use plantbridge_core::{BridgeError, ClientId, NodeId, SessionId, Value, VariableSnapshot};
use plantbridge_session::{CloseReason, Delivery, NotificationSink};
use plantbridge_telemetry::MetricsRecorder;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::protocol::{auth_credentials, AckFor, ClientMessage, ServerMessage};
use crate::server::AppState;

/// How long the writer gets to flush its farewell after the reader exits.
const WRITER_DRAIN: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Maximum queued value notifications per client, and separately the
    /// maximum queued acks and errors.
    pub outbound_capacity: usize,
    pub eviction_window: Duration,
    /// Overflows tolerated inside one window before eviction.
    pub eviction_threshold: u32,
    pub auth_grace: Duration,
    pub max_protocol_errors: u32,
    pub heartbeat_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            eviction_window: Duration::from_secs(5),
            eviction_threshold: 32,
            auth_grace: Duration::from_secs(5),
            max_protocol_errors: 10,
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

/// The last frames a closing connection sends.
#[derive(Clone, Debug, PartialEq)]
pub struct Farewell {
    pub code: u16,
    pub reason: &'static str,
    pub error: Option<BridgeError>,
}

impl Farewell {
    pub fn normal() -> Self {
        Self {
            code: close_code::NORMAL,
            reason: "closed",
            error: None,
        }
    }

    pub fn going_away() -> Self {
        Self {
            code: close_code::AWAY,
            reason: "server shutting down",
            error: None,
        }
    }

    fn slow_consumer() -> Self {
        Self::with_error(
            close_code::POLICY,
            "slow consumer",
            BridgeError::SlowConsumerEvicted,
        )
    }

    fn with_error(code: u16, reason: &'static str, error: BridgeError) -> Self {
        Self {
            code,
            reason,
            error: Some(error),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Outbound {
    Value(VariableSnapshot),
    Control(ServerMessage),
}

impl Outbound {
    fn to_json(&self) -> String {
        match self {
            Self::Value(snapshot) => ServerMessage::value(snapshot).to_json(),
            Self::Control(msg) => msg.to_json(),
        }
    }
}

/// Outbound frames in send order. Values and control frames (acks, errors)
/// are counted separately against the same capacity; values overflow by
/// dropping the oldest, control frames are refused.
struct OutboundQueue {
    items: VecDeque<Outbound>,
    values: usize,
    controls: usize,
    capacity: usize,
    window_started: Instant,
    overflows: u32,
}

impl OutboundQueue {
    fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            values: 0,
            controls: 0,
            capacity: capacity.max(1),
            window_started: Instant::now(),
            overflows: 0,
        }
    }

    fn push_value(
        &mut self,
        snapshot: VariableSnapshot,
        now: Instant,
        window: Duration,
        threshold: u32,
    ) -> Delivery {
        if self.values < self.capacity {
            self.items.push_back(Outbound::Value(snapshot));
            self.values += 1;
            return Delivery::Queued;
        }

        if let Some(oldest) = self
            .items
            .iter()
            .position(|item| matches!(item, Outbound::Value(_)))
        {
            self.items.remove(oldest);
        }
        self.items.push_back(Outbound::Value(snapshot));

        if now.duration_since(self.window_started) > window {
            self.window_started = now;
            self.overflows = 0;
        }
        self.overflows += 1;
        if self.overflows > threshold {
            Delivery::Evict
        } else {
            Delivery::Dropped
        }
    }

    /// Returns false, queueing nothing, once `capacity` control frames are
    /// waiting.
    fn push_control(&mut self, msg: ServerMessage) -> bool {
        if self.controls >= self.capacity {
            return false;
        }
        self.items.push_back(Outbound::Control(msg));
        self.controls += 1;
        true
    }

    fn drain(&mut self) -> Vec<Outbound> {
        self.values = 0;
        self.controls = 0;
        self.items.drain(..).collect()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// A connected WebSocket client.
pub struct ClientConnection {
    id: ClientId,
    config: ConnectionConfig,
    queue: Mutex<OutboundQueue>,
    wake: Notify,
    closing: CancellationToken,
    farewell: Mutex<Option<Farewell>>,
    dropped: AtomicU64,
    last_pong: Mutex<Instant>,
    connected_at: Instant,
    metrics: Arc<MetricsRecorder>,
}

impl ClientConnection {
    pub fn new(config: ConnectionConfig, metrics: Arc<MetricsRecorder>) -> Self {
        let now = Instant::now();
        Self {
            id: ClientId::new(),
            queue: Mutex::new(OutboundQueue::new(config.outbound_capacity)),
            config,
            wake: Notify::new(),
            closing: CancellationToken::new(),
            farewell: Mutex::new(None),
            dropped: AtomicU64::new(0),
            last_pong: Mutex::new(now),
            connected_at: now,
            metrics,
        }
    }

    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Queue a control frame (ack or error). A client whose control backlog
    /// is already full is evicted instead.
    pub fn send(&self, msg: ServerMessage) {
        if !self.queue.lock().push_control(msg) {
            warn!(client_id = %self.id, "control backlog full, evicting");
            self.evict();
            return;
        }
        self.wake.notify_one();
    }

    fn evict(&self) {
        if self.close_with(Farewell::slow_consumer()) {
            self.metrics.counter_inc("gateway.evictions", &[], 1);
        }
    }

    /// Begin closing. The first farewell wins; returns false if the
    /// connection was already closing.
    pub fn close_with(&self, farewell: Farewell) -> bool {
        {
            let mut slot = self.farewell.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(farewell);
        }
        self.closing.cancel();
        true
    }

    pub fn is_closing(&self) -> bool {
        self.closing.is_cancelled()
    }

    pub fn record_pong(&self) {
        *self.last_pong.lock() = Instant::now();
    }

    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Value notifications dropped to make room for newer ones.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    pub(crate) fn take_outbound(&self) -> Vec<Outbound> {
        self.queue.lock().drain()
    }

    fn take_farewell(&self) -> Farewell {
        self.farewell.lock().take().unwrap_or_else(Farewell::normal)
    }
}

impl NotificationSink for ClientConnection {
    fn deliver(&self, notification: &VariableSnapshot) -> Delivery {
        if self.is_closing() {
            return Delivery::Queued;
        }
        let delivery = self.queue.lock().push_value(
            notification.clone(),
            Instant::now(),
            self.config.eviction_window,
            self.config.eviction_threshold,
        );
        if delivery != Delivery::Queued {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            self.metrics
                .counter_inc("gateway.notifications.dropped", &[], 1);
        }
        self.wake.notify_one();
        delivery
    }

    fn closed(&self, reason: CloseReason) {
        let farewell = match reason {
            CloseReason::SlowConsumer => return self.evict(),
            CloseReason::IdleTimeout => Farewell::with_error(
                close_code::NORMAL,
                "session idle",
                BridgeError::Unauthenticated("session closed after idle timeout".into()),
            ),
            CloseReason::Explicit | CloseReason::TransportDrop => Farewell::normal(),
        };
        self.close_with(farewell);
    }
}

// ── Socket tasks ────────────────────────────────────────────────────

/// Drive one socket until either side goes away. The caller registers and
/// unregisters the connection.
pub(crate) async fn handle_ws_connection(
    socket: WebSocket,
    conn: Arc<ClientConnection>,
    state: AppState,
) {
    let (ws_tx, mut ws_rx) = socket.split();
    let mut writer = tokio::spawn(write_loop(Arc::clone(&conn), ws_tx));

    let mut inbound = Inbound {
        conn: Arc::clone(&conn),
        state: state.clone(),
        session: None,
        protocol_errors: 0,
    };

    let auth_deadline = tokio::time::sleep(conn.config.auth_grace);
    tokio::pin!(auth_deadline);

    loop {
        let frame = tokio::select! {
            biased;
            () = conn.closing.cancelled() => break,
            () = state.shutdown.cancelled() => {
                conn.close_with(Farewell::going_away());
                break;
            }
            () = &mut auth_deadline, if inbound.session.is_none() => {
                warn!(client_id = %conn.id, "authentication grace period expired");
                conn.close_with(Farewell::with_error(
                    close_code::POLICY,
                    "authentication timeout",
                    BridgeError::AuthTimeout(conn.config.auth_grace),
                ));
                break;
            }
            frame = ws_rx.next() => frame,
        };

        let text = match frame {
            Some(Ok(WsMessage::Text(text))) => text,
            Some(Ok(WsMessage::Pong(_))) => {
                conn.record_pong();
                // A listen-only subscriber stays alive through heartbeats.
                if let Some(id) = &inbound.session {
                    let _ = state.sessions.touch(id);
                }
                continue;
            }
            Some(Ok(WsMessage::Ping(_))) => continue,
            Some(Ok(WsMessage::Binary(_))) => {
                let err = BridgeError::ProtocolError("binary frames are not supported".into());
                if inbound.reject(err) == Flow::Close {
                    break;
                }
                continue;
            }
            Some(Ok(WsMessage::Close(_))) | None => break,
            Some(Err(e)) => {
                debug!(client_id = %conn.id, error = %e, "websocket read failed");
                break;
            }
        };

        let flow = match ClientMessage::parse(text.as_str()) {
            Ok(msg) => inbound.handle(msg).await,
            Err(err) => inbound.reject(err),
        };
        if flow == Flow::Close {
            break;
        }
    }

    // Release the session before the connection object goes away so the
    // index never points at a dead sink.
    if let Some(session) = inbound.session.take() {
        state
            .sessions
            .close_session(&session, CloseReason::TransportDrop);
    }
    conn.close_with(Farewell::normal());
    if tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
        debug!(client_id = %conn.id, "writer did not finish in time, aborting");
        writer.abort();
    }
    info!(
        client_id = %conn.id,
        age_ms = conn.age().as_millis() as u64,
        dropped = conn.dropped_count(),
        "websocket client disconnected"
    );
}

/// Forward queued frames to the socket, ping on the heartbeat interval and
/// send the farewell once the connection starts closing.
async fn write_loop(conn: Arc<ClientConnection>, mut sink: SplitSink<WebSocket, WsMessage>) {
    let mut heartbeat = tokio::time::interval(conn.config.heartbeat_interval);
    heartbeat.tick().await; // consume first immediate tick

    loop {
        tokio::select! {
            biased;
            () = conn.closing.cancelled() => break,
            () = conn.wake.notified() => {
                for item in conn.take_outbound() {
                    if sink.send(WsMessage::Text(item.to_json().into())).await.is_err() {
                        conn.close_with(Farewell::normal());
                        return;
                    }
                }
            }
            _ = heartbeat.tick() => {
                if sink.send(WsMessage::Ping(vec![].into())).await.is_err() {
                    conn.close_with(Farewell::normal());
                    return;
                }
                tracing::trace!(client_id = %conn.id, "sent ping");
            }
        }
    }

    // Pending acks and errors still go out; stale values do not.
    for item in conn.take_outbound() {
        if let Outbound::Control(msg) = item {
            if sink.send(WsMessage::Text(msg.to_json().into())).await.is_err() {
                return;
            }
        }
    }
    let farewell = conn.take_farewell();
    if let Some(err) = &farewell.error {
        let text = ServerMessage::error(err).to_json();
        let _ = sink.send(WsMessage::Text(text.into())).await;
    }
    let _ = sink
        .send(WsMessage::Close(Some(CloseFrame {
            code: farewell.code,
            reason: Utf8Bytes::from_static(farewell.reason),
        })))
        .await;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// Inbound side of one connection: the session it authenticated as and its
/// protocol error count.
struct Inbound {
    conn: Arc<ClientConnection>,
    state: AppState,
    session: Option<SessionId>,
    protocol_errors: u32,
}

impl Inbound {
    async fn handle(&mut self, msg: ClientMessage) -> Flow {
        let reply = match (self.session.clone(), msg) {
            (None, ClientMessage::Auth {
                token,
                certificate,
                policy,
            }) => self.authenticate(token, certificate, policy).await,
            (Some(_), ClientMessage::Auth { .. }) => {
                Err(BridgeError::ProtocolError("already authenticated".into()))
            }
            (session, ClientMessage::Ping) => match session {
                Some(id) => self
                    .state
                    .sessions
                    .touch(&id)
                    .map(|()| ServerMessage::ack(AckFor::Ping)),
                None => Ok(ServerMessage::ack(AckFor::Ping)),
            },
            (session, ClientMessage::Close) => {
                match session {
                    Some(id) => {
                        self.session = None;
                        self.state.sessions.close_session(&id, CloseReason::Explicit);
                    }
                    None => {
                        self.conn.close_with(Farewell::normal());
                    }
                }
                return Flow::Close;
            }
            (None, other) => Err(BridgeError::ProtocolError(format!(
                "authenticate before sending {}",
                other.kind()
            ))),
            (Some(id), ClientMessage::Subscribe { nodes, interval_ms }) => self
                .state
                .sessions
                .subscribe(&id, &nodes, interval_ms)
                .map(|grant| ServerMessage::subscribe_ack(grant.id, grant.revised_interval_ms)),
            (Some(id), ClientMessage::Unsubscribe { subscription }) => self
                .state
                .sessions
                .unsubscribe(&id, &subscription)
                .map(|()| ServerMessage::unsubscribe_ack(subscription)),
            (Some(id), ClientMessage::Write { node, value }) => self.write(&id, node, value).await,
        };

        match reply {
            Ok(msg) => {
                self.conn.send(msg);
                Flow::Continue
            }
            Err(err) => self.reject(err),
        }
    }

    async fn authenticate(
        &mut self,
        token: Option<String>,
        certificate: Option<String>,
        policy: Option<String>,
    ) -> Result<ServerMessage, BridgeError> {
        let credentials = auth_credentials(token, certificate, policy)?;
        let kind = credentials.kind();
        let token = self
            .state
            .sessions
            .security()
            .authenticate(&credentials)
            .await
            .inspect_err(|e| {
                warn!(client_id = %self.conn.id, credential = kind, code = e.code(), "authentication failed");
            })?;
        let sink: Arc<dyn NotificationSink> = self.conn.clone();
        let session = self.state.sessions.create_session(token, Some(sink))?;
        info!(client_id = %self.conn.id, session_id = %session, "client authenticated");
        self.session = Some(session.clone());
        Ok(ServerMessage::auth_ack(session))
    }

    async fn write(
        &self,
        session: &SessionId,
        node: NodeId,
        value: Value,
    ) -> Result<ServerMessage, BridgeError> {
        let started = Instant::now();
        let result = self
            .state
            .sessions
            .request_write(session, &node, value)
            .await;
        self.state.metrics.histogram_observe(
            "gateway.write_ms",
            &[],
            started.elapsed().as_secs_f64() * 1000.0,
        );
        if let Err(e) = &result {
            debug!(session_id = %session, node_id = %node, code = e.code(), "write rejected");
        }
        result.map(|()| ServerMessage::write_ack(node))
    }

    /// Report an error to the client. Protocol and authentication errors
    /// count toward the abuse guard.
    fn reject(&mut self, err: BridgeError) -> Flow {
        self.conn.send(ServerMessage::error(&err));
        if !matches!(err, BridgeError::ProtocolError(_)) && !err.is_auth_failure() {
            return Flow::Continue;
        }
        self.protocol_errors += 1;
        self.state
            .metrics
            .counter_inc("gateway.protocol_errors", &[], 1);
        if self.protocol_errors > self.conn.config.max_protocol_errors {
            warn!(
                client_id = %self.conn.id,
                errors = self.protocol_errors,
                "too many protocol errors, closing"
            );
            self.conn.close_with(Farewell {
                code: close_code::PROTOCOL,
                reason: "too many protocol errors",
                error: None,
            });
            return Flow::Close;
        }
        Flow::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(node: &str, v: f64) -> VariableSnapshot {
        VariableSnapshot {
            node: node.into(),
            value: Value::Float(v),
            ts: v as i64,
        }
    }

    fn connection(capacity: usize, threshold: u32) -> ClientConnection {
        ClientConnection::new(
            ConnectionConfig {
                outbound_capacity: capacity,
                eviction_threshold: threshold,
                eviction_window: Duration::from_secs(5),
                ..ConnectionConfig::default()
            },
            Arc::new(MetricsRecorder::new()),
        )
    }

    fn values(items: &[Outbound]) -> Vec<f64> {
        items
            .iter()
            .filter_map(|item| match item {
                Outbound::Value(s) => s.value.as_f64(),
                Outbound::Control(_) => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn queues_until_capacity() {
        let conn = connection(3, 10);
        for v in 1..=3 {
            assert_eq!(conn.deliver(&snapshot("a", f64::from(v))), Delivery::Queued);
        }
        assert_eq!(conn.queued(), 3);
        assert_eq!(conn.dropped_count(), 0);
    }

    #[tokio::test]
    async fn full_queue_drops_oldest_value() {
        let conn = connection(2, 10);
        conn.deliver(&snapshot("a", 1.0));
        conn.deliver(&snapshot("b", 2.0));
        assert_eq!(conn.deliver(&snapshot("a", 3.0)), Delivery::Dropped);
        assert_eq!(values(&conn.take_outbound()), vec![2.0, 3.0]);
        assert_eq!(conn.dropped_count(), 1);
    }

    #[tokio::test]
    async fn control_frames_are_never_dropped() {
        let conn = connection(1, 10);
        conn.send(ServerMessage::ack(AckFor::Ping));
        conn.deliver(&snapshot("a", 1.0));
        conn.deliver(&snapshot("a", 2.0));
        let items = conn.take_outbound();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], Outbound::Control(ServerMessage::ack(AckFor::Ping)));
        assert_eq!(values(&items), vec![2.0]);
    }

    #[tokio::test]
    async fn draining_frees_capacity() {
        let conn = connection(1, 0);
        assert_eq!(conn.deliver(&snapshot("a", 1.0)), Delivery::Queued);
        conn.take_outbound();
        assert_eq!(conn.deliver(&snapshot("a", 2.0)), Delivery::Queued);
    }

    #[tokio::test]
    async fn repeated_overflow_requests_eviction() {
        let conn = connection(1, 2);
        conn.deliver(&snapshot("a", 0.0));
        assert_eq!(conn.deliver(&snapshot("a", 1.0)), Delivery::Dropped);
        assert_eq!(conn.deliver(&snapshot("a", 2.0)), Delivery::Dropped);
        assert_eq!(conn.deliver(&snapshot("a", 3.0)), Delivery::Evict);
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_window_resets() {
        let conn = connection(1, 1);
        conn.deliver(&snapshot("a", 0.0));
        assert_eq!(conn.deliver(&snapshot("a", 1.0)), Delivery::Dropped);
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(conn.deliver(&snapshot("a", 2.0)), Delivery::Dropped);
        assert_eq!(conn.deliver(&snapshot("a", 3.0)), Delivery::Evict);
    }

    #[tokio::test]
    async fn slow_consumer_close_carries_eviction_error() {
        let metrics = Arc::new(MetricsRecorder::new());
        let conn = ClientConnection::new(ConnectionConfig::default(), Arc::clone(&metrics));
        conn.closed(CloseReason::SlowConsumer);
        assert!(conn.is_closing());
        let farewell = conn.take_farewell();
        assert_eq!(farewell.code, close_code::POLICY);
        assert_eq!(farewell.error, Some(BridgeError::SlowConsumerEvicted));
        assert_eq!(metrics.counter_get("gateway.evictions", &[]), 1);
    }

    #[tokio::test]
    async fn first_farewell_wins() {
        let conn = connection(4, 4);
        assert!(conn.close_with(Farewell::going_away()));
        assert!(!conn.close_with(Farewell::normal()));
        assert_eq!(conn.take_farewell(), Farewell::going_away());
    }

    #[tokio::test]
    async fn deliveries_after_close_are_ignored() {
        let conn = connection(1, 0);
        conn.closed(CloseReason::TransportDrop);
        assert_eq!(conn.deliver(&snapshot("a", 1.0)), Delivery::Queued);
        assert_eq!(conn.queued(), 0);
    }

    #[tokio::test]
    async fn dropped_notifications_are_counted() {
        let metrics = Arc::new(MetricsRecorder::new());
        let conn = ClientConnection::new(
            ConnectionConfig {
                outbound_capacity: 1,
                ..ConnectionConfig::default()
            },
            Arc::clone(&metrics),
        );
        conn.deliver(&snapshot("a", 1.0));
        conn.deliver(&snapshot("a", 2.0));
        conn.deliver(&snapshot("a", 3.0));
        assert_eq!(metrics.counter_get("gateway.notifications.dropped", &[]), 2);
    }

    #[tokio::test]
    async fn control_backlog_is_bounded_and_evicts() {
        let metrics = Arc::new(MetricsRecorder::new());
        let conn = ClientConnection::new(
            ConnectionConfig {
                outbound_capacity: 4,
                ..ConnectionConfig::default()
            },
            Arc::clone(&metrics),
        );
        for _ in 0..10_000 {
            conn.send(ServerMessage::ack(AckFor::Ping));
        }
        assert_eq!(conn.queued(), 4);
        assert!(conn.is_closing());
        assert_eq!(conn.take_farewell(), Farewell::slow_consumer());
        assert_eq!(metrics.counter_get("gateway.evictions", &[]), 1);
    }

    #[tokio::test]
    async fn draining_frees_control_capacity() {
        let conn = connection(2, 10);
        conn.send(ServerMessage::ack(AckFor::Ping));
        conn.send(ServerMessage::ack(AckFor::Ping));
        conn.take_outbound();
        conn.send(ServerMessage::ack(AckFor::Ping));
        conn.send(ServerMessage::ack(AckFor::Ping));
        assert!(!conn.is_closing());
        assert_eq!(conn.queued(), 2);
    }

    /// A stalled client on the default config, subscribed to the whole
    /// heater plant at tick rate, is evicted within a couple of windows.
    #[tokio::test(start_paused = true)]
    async fn default_config_evicts_stalled_plant_subscriber() {
        let conn = ClientConnection::new(
            ConnectionConfig::default(),
            Arc::new(MetricsRecorder::new()),
        );
        let tick = Duration::from_millis(100);
        let mut evicted_after = None;
        'ticks: for n in 0..6_000u32 {
            for node in 0..6 {
                let delivery = conn.deliver(&snapshot(&format!("n{node}"), f64::from(n)));
                if delivery == Delivery::Evict {
                    evicted_after = Some(tick * n);
                    break 'ticks;
                }
            }
            tokio::time::advance(tick).await;
        }
        let evicted_after = evicted_after.expect("stalled client was never evicted");
        assert!(evicted_after <= Duration::from_secs(15), "took {evicted_after:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn default_config_evicts_stalled_single_node_subscriber() {
        let conn = ClientConnection::new(
            ConnectionConfig::default(),
            Arc::new(MetricsRecorder::new()),
        );
        let mut evicted = false;
        for n in 0..6_000u32 {
            if conn.deliver(&snapshot("heaterPower", f64::from(n))) == Delivery::Evict {
                evicted = true;
                break;
            }
            tokio::time::advance(Duration::from_millis(100)).await;
        }
        assert!(evicted);
    }
}
