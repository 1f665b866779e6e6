//! WARN+ events persisted to SQLite, with correlation ids in their own
//! columns so an operator can pull everything one session or node logged.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, Row};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::field::{Field, Visit};
use tracing::{span, Level};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

const SCHEMA: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    CREATE TABLE IF NOT EXISTS logs (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp  TEXT NOT NULL,
        level      TEXT NOT NULL,
        target     TEXT NOT NULL,
        message    TEXT NOT NULL,
        fields     TEXT,
        session_id TEXT,
        node_id    TEXT,
        client_id  TEXT
    );
    CREATE INDEX IF NOT EXISTS logs_by_session ON logs(session_id);
    CREATE INDEX IF NOT EXISTS logs_by_node ON logs(node_id);
    CREATE INDEX IF NOT EXISTS logs_by_time ON logs(timestamp);
";

const COLUMNS: &str =
    "id, timestamp, level, target, message, fields, session_id, node_id, client_id";

const DEFAULT_QUERY_LIMIT: u32 = 100;

/// One persisted event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: i64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    /// Non-correlation event fields as a JSON object.
    pub fields: Option<String>,
    pub session_id: Option<String>,
    pub node_id: Option<String>,
    pub client_id: Option<String>,
}

impl LogRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            timestamp: row.get("timestamp")?,
            level: row.get("level")?,
            target: row.get("target")?,
            message: row.get("message")?,
            fields: row.get("fields")?,
            session_id: row.get("session_id")?,
            node_id: row.get("node_id")?,
            client_id: row.get("client_id")?,
        })
    }
}

/// Filters for [`SqliteLogSink::query`]. Unset fields match everything.
#[derive(Clone, Debug, Default)]
pub struct LogQuery {
    pub level: Option<String>,
    /// Substring of the event target.
    pub target: Option<String>,
    pub session_id: Option<String>,
    pub node_id: Option<String>,
    /// RFC 3339 lower bound, inclusive.
    pub since: Option<String>,
    pub limit: Option<u32>,
}

impl LogQuery {
    fn filters(&self) -> Vec<(&'static str, SqlValue)> {
        let mut filters = Vec::new();
        let mut push = |clause: &'static str, value: Option<String>| {
            if let Some(v) = value {
                filters.push((clause, SqlValue::Text(v)));
            }
        };
        push("level = ?", self.level.clone());
        push("target LIKE ?", self.target.as_ref().map(|t| format!("%{t}%")));
        push("session_id = ?", self.session_id.clone());
        push("node_id = ?", self.node_id.clone());
        push("timestamp >= ?", self.since.clone());
        filters
    }
}

/// SQLite store behind [`SqliteLogLayer`].
pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
    pub fn new(db_path: &Path) -> rusqlite::Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // Errors are swallowed: a failing log sink must not take the gateway down.
    fn insert(&self, entry: &Entry) {
        let conn = self.conn.lock();
        let _ = conn.execute(
            "INSERT INTO logs (timestamp, level, target, message, fields, session_id, node_id, client_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            (
                &entry.timestamp,
                entry.level.as_str(),
                &entry.target,
                &entry.message,
                &entry.fields,
                &entry.ids.session_id,
                &entry.ids.node_id,
                &entry.ids.client_id,
            ),
        );
    }

    /// Newest first.
    pub fn query(&self, q: &LogQuery) -> rusqlite::Result<Vec<LogRecord>> {
        let filters = q.filters();
        let mut sql = format!("SELECT {COLUMNS} FROM logs");
        for (i, (clause, _)) in filters.iter().enumerate() {
            sql.push_str(if i == 0 { " WHERE " } else { " AND " });
            sql.push_str(clause);
        }
        sql.push_str(&format!(
            " ORDER BY id DESC LIMIT {}",
            q.limit.unwrap_or(DEFAULT_QUERY_LIMIT)
        ));

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params_from_iter(filters.into_iter().map(|(_, v)| v)),
            LogRecord::from_row,
        )?;
        rows.collect()
    }

    pub fn count(&self) -> rusqlite::Result<i64> {
        self.conn
            .lock()
            .query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))
    }
}

struct Entry {
    timestamp: String,
    level: Level,
    target: String,
    message: String,
    fields: Option<String>,
    ids: Correlation,
}

/// Correlation ids lifted out of events and spans into their own columns.
#[derive(Clone, Default)]
struct Correlation {
    session_id: Option<String>,
    node_id: Option<String>,
    client_id: Option<String>,
}

impl Correlation {
    fn slot(&mut self, name: &str) -> Option<&mut Option<String>> {
        match name {
            "session_id" => Some(&mut self.session_id),
            "node_id" => Some(&mut self.node_id),
            "client_id" => Some(&mut self.client_id),
            _ => None,
        }
    }

    fn is_empty(&self) -> bool {
        self.session_id.is_none() && self.node_id.is_none() && self.client_id.is_none()
    }

    fn is_complete(&self) -> bool {
        self.session_id.is_some() && self.node_id.is_some() && self.client_id.is_some()
    }

    /// Inner spans win: only empty slots are filled.
    fn inherit(&mut self, outer: &Correlation) {
        for (mine, theirs) in [
            (&mut self.session_id, &outer.session_id),
            (&mut self.node_id, &outer.node_id),
            (&mut self.client_id, &outer.client_id),
        ] {
            if mine.is_none() {
                mine.clone_from(theirs);
            }
        }
    }
}

#[derive(Default)]
struct Fields {
    message: Option<String>,
    extra: Map<String, JsonValue>,
    ids: Correlation,
}

impl Fields {
    fn put(&mut self, field: &Field, value: JsonValue) {
        let name = field.name();
        if name == "message" {
            self.message = Some(match value {
                JsonValue::String(s) => s,
                other => other.to_string(),
            });
            return;
        }
        if let (Some(slot), JsonValue::String(s)) = (self.ids.slot(name), &value) {
            *slot = Some(s.trim_matches('"').to_string());
            return;
        }
        self.extra.insert(name.to_string(), value);
    }
}

impl Visit for Fields {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.put(field, JsonValue::String(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, JsonValue::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.put(field, value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, value.into());
    }
}

/// Tracing layer that hands WARN and ERROR events to a [`SqliteLogSink`].
pub struct SqliteLogLayer {
    sink: Arc<SqliteLogSink>,
}

impl SqliteLogLayer {
    pub fn new(sink: Arc<SqliteLogSink>) -> Self {
        Self { sink }
    }
}

impl<S> Layer<S> for SqliteLogLayer
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut fields = Fields::default();
        attrs.record(&mut fields);
        if fields.ids.is_empty() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(fields.ids);
        }
    }

    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let meta = event.metadata();
        if *meta.level() > Level::WARN {
            return;
        }

        let mut fields = Fields::default();
        event.record(&mut fields);

        if !fields.ids.is_complete() {
            for span in ctx.event_scope(event).into_iter().flatten() {
                if let Some(ids) = span.extensions().get::<Correlation>() {
                    fields.ids.inherit(ids);
                }
            }
        }

        self.sink.insert(&Entry {
            timestamp: Utc::now().to_rfc3339(),
            level: *meta.level(),
            target: meta.target().to_string(),
            message: fields.message.unwrap_or_default(),
            fields: (!fields.extra.is_empty())
                .then(|| serde_json::to_string(&fields.extra).ok())
                .flatten(),
            ids: fields.ids,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn temp_sink() -> (tempfile::TempDir, Arc<SqliteLogSink>) {
        let dir = tempfile::tempdir().unwrap();
        let sink = SqliteLogSink::new(&dir.path().join("logs.db")).unwrap();
        (dir, Arc::new(sink))
    }

    fn insert(sink: &SqliteLogSink, ts: &str, level: Level, message: &str, session: Option<&str>) {
        sink.insert(&Entry {
            timestamp: ts.into(),
            level,
            target: "plantbridge_gateway::connection".into(),
            message: message.into(),
            fields: None,
            ids: Correlation {
                session_id: session.map(Into::into),
                ..Default::default()
            },
        });
    }

    #[test]
    fn query_by_level_and_session() {
        let (_dir, sink) = temp_sink();
        insert(&sink, "2026-10-01T12:00:00Z", Level::WARN, "slow", Some("sess_a"));
        insert(&sink, "2026-10-01T12:00:01Z", Level::ERROR, "evicted", Some("sess_b"));

        let errors = sink
            .query(&LogQuery {
                level: Some("ERROR".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "evicted");

        let a = sink
            .query(&LogQuery {
                session_id: Some("sess_a".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].message, "slow");
    }

    #[test]
    fn query_since_and_limit() {
        let (_dir, sink) = temp_sink();
        for i in 0..10 {
            insert(&sink, &format!("2026-10-01T12:00:{i:02}Z"), Level::WARN, &format!("msg {i}"), None);
        }
        let recent = sink
            .query(&LogQuery {
                limit: Some(3),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].message, "msg 9");

        let since = sink
            .query(&LogQuery {
                since: Some("2026-10-01T12:00:08Z".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(since.len(), 2);
    }

    #[test]
    fn layer_persists_warn_and_above_only() {
        let (_dir, sink) = temp_sink();
        let subscriber = tracing_subscriber::registry().with(SqliteLogLayer::new(sink.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("not persisted");
            tracing::warn!(node_id = "heaterPower", attempts = 3u64, "write rejected");
        });

        let rows = sink.query(&LogQuery::default()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].message, "write rejected");
        assert_eq!(rows[0].node_id.as_deref(), Some("heaterPower"));
        assert!(rows[0].fields.as_deref().unwrap_or("").contains("attempts"));
    }

    #[test]
    fn layer_inherits_ids_from_spans() {
        let (_dir, sink) = temp_sink();
        let subscriber = tracing_subscriber::registry().with(SqliteLogLayer::new(sink.clone()));

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("connection", client_id = "client_1", session_id = "sess_1");
            let _enter = span.enter();
            tracing::error!("socket closed");
        });

        let rows = sink.query(&LogQuery::default()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].client_id.as_deref(), Some("client_1"));
        assert_eq!(rows[0].session_id.as_deref(), Some("sess_1"));
    }
}
