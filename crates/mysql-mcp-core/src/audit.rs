//! Structured audit event model and pluggable sink (C4).
//!
//! Every operation the secure client performs emits exactly one
//! [`AuditEvent`], built through [`AuditEventBuilder`] and delivered to
//! whichever [`Sink`] is attached to the request's [`AuditContext`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of event being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// Reserved for future auth-related events; the stdio transport does not
    /// authenticate the host, but the type is part of the closed set.
    Auth,
    /// A `SELECT`/`SHOW`/`EXPLAIN` style read.
    Query,
    /// `INSERT`/`UPDATE`/`DELETE`.
    Write,
    /// `CREATE`/`DROP`/`ALTER`/`TRUNCATE`.
    Admin,
    /// Guard rejection, gate rejection, or rate-limit exhaustion.
    Security,
    /// Any other terminal failure (timeout, driver error).
    Error,
    /// Pool/connection lifecycle events.
    Connection,
}

/// Coarse SQL operation kind, independent of the backend dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    /// `SELECT`.
    Select,
    /// `INSERT`.
    Insert,
    /// `UPDATE`.
    Update,
    /// `DELETE`.
    Delete,
    /// `CREATE`.
    Create,
    /// `DROP`.
    Drop,
    /// `ALTER`.
    Alter,
    /// `TRUNCATE`.
    Truncate,
    /// `CALL`.
    Call,
    /// Anything not covered above (`SHOW`, `EXPLAIN`, `WITH`, …).
    Other,
}

impl Operation {
    /// Classify the leading keyword of a trimmed, uppercased SQL statement.
    #[must_use]
    pub fn classify(sql: &str) -> Self {
        let upper = sql.trim_start().to_uppercase();
        let first_word = upper.split_whitespace().next().unwrap_or("");
        match first_word {
            "SELECT" => Self::Select,
            "INSERT" => Self::Insert,
            "UPDATE" => Self::Update,
            "DELETE" => Self::Delete,
            "CREATE" => Self::Create,
            "DROP" => Self::Drop,
            "ALTER" => Self::Alter,
            "TRUNCATE" => Self::Truncate,
            "CALL" => Self::Call,
            _ => Self::Other,
        }
    }
}

/// Outcome of the operation the event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Awaiting a terminal outcome; never observed outside the builder.
    Pending,
    /// Completed without error.
    Success,
    /// Completed with an error (timeout, driver failure).
    Error,
    /// Refused before execution (guard, gate, or rate limiter).
    Blocked,
}

/// Severity, independent of `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Routine, successful operations.
    Info,
    /// Blocked or rate-limited operations.
    Warning,
    /// Failed operations (timeout, driver error).
    Error,
    /// Reserved for unrecoverable conditions; not raised by this crate today.
    Critical,
}

/// An open mapping from metadata key to a JSON scalar.
pub type Metadata = HashMap<String, serde_json::Value>;

/// A single structured audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique identifier, assigned by the builder.
    pub id: String,
    /// Wall-clock UTC timestamp, millisecond precision.
    pub timestamp: DateTime<Utc>,
    /// Event category.
    pub event_type: EventType,
    /// SQL operation kind, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
    /// The MCP host identity, if the transport ever attaches one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Target database name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Target table name, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    /// The SQL text, omitted for events that should not echo it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Rows affected/returned, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
    /// Duration in milliseconds.
    pub duration_ms: u64,
    /// Outcome.
    pub status: Status,
    /// Sanitised error message, when `status != success`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    /// Free-form source tag (e.g. the tool name that triggered this event).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Peer address, when the transport exposes one; stdio leaves this unset.
    #[serde(skip_serializing_if = "Option::is_none", rename = "ip")]
    pub ip_address: Option<String>,
    /// Severity.
    pub severity: Severity,
    /// Open metadata mapping.
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub metadata: Metadata,
}

/// Fluent builder for [`AuditEvent`]. `timestamp`, `status = pending`, and
/// `severity = info` are assigned by [`new_event`].
pub struct AuditEventBuilder {
    event: AuditEvent,
}

/// Start building an event of the given type.
#[must_use]
pub fn new_event(event_type: EventType) -> AuditEventBuilder {
    AuditEventBuilder {
        event: AuditEvent {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            operation: None,
            user: None,
            database: None,
            table: None,
            query: None,
            rows_affected: None,
            duration_ms: 0,
            status: Status::Pending,
            error_msg: None,
            source: None,
            ip_address: None,
            severity: Severity::Info,
            metadata: HashMap::new(),
        },
    }
}

impl AuditEventBuilder {
    /// Set the SQL operation kind.
    #[must_use]
    pub fn operation(mut self, operation: Operation) -> Self {
        self.event.operation = Some(operation);
        self
    }

    /// Set the host identity.
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.event.user = Some(user.into());
        self
    }

    /// Set the target database.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.event.database = Some(database.into());
        self
    }

    /// Set the target table.
    #[must_use]
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.event.table = Some(table.into());
        self
    }

    /// Set the SQL text.
    #[must_use]
    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.event.query = Some(query.into());
        self
    }

    /// Set rows affected/returned.
    #[must_use]
    pub fn rows_affected(mut self, rows: u64) -> Self {
        self.event.rows_affected = Some(rows);
        self
    }

    /// Set the duration in milliseconds.
    #[must_use]
    pub fn duration_ms(mut self, duration_ms: u64) -> Self {
        self.event.duration_ms = duration_ms;
        self
    }

    /// Mark the event successful.
    #[must_use]
    pub fn success(mut self) -> Self {
        self.event.status = Status::Success;
        self
    }

    /// Mark the event blocked (guard/gate/rate-limit rejection) and set
    /// `severity` directly. This is meant to be the terminal call in a
    /// chain — unlike `with_error`, it does not lift an existing severity,
    /// it sets the final one, so callers that also call `with_error` (to
    /// record the message) must call `blocked` last.
    #[must_use]
    pub fn blocked(mut self, severity: Severity) -> Self {
        self.event.status = Status::Blocked;
        self.event.severity = severity;
        self
    }

    /// Set `status = error`, lift `severity` to at least `error`, and record
    /// the (already-sanitised) error message.
    #[must_use]
    pub fn with_error(mut self, msg: impl Into<String>) -> Self {
        self.event.status = Status::Error;
        self.event.severity = self.event.severity.max(Severity::Error);
        self.event.error_msg = Some(msg.into());
        self
    }

    /// Set the `source` tag (typically the tool name).
    #[must_use]
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.event.source = Some(source.into());
        self
    }

    /// Attach one metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.event.metadata.insert(key.into(), value.into());
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> AuditEvent {
        self.event
    }
}

/// Error returned by [`Sink`] methods.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// A `None`/null event was passed where a built event was required.
    #[error("nil audit event")]
    NilEvent,
    /// The sink's backing store could not be written to.
    #[error("audit sink write failed: {0}")]
    WriteFailed(String),
}

/// Pluggable audit event destination. Every method must tolerate being
/// called with a well-formed but otherwise arbitrary event; there is no
/// validation step beyond what the builder already guarantees.
pub trait Sink: Send + Sync {
    /// Record a `query`-class event.
    fn log_query(&self, event: &AuditEvent) -> Result<(), SinkError>;
    /// Record a `write`-class event.
    fn log_write(&self, event: &AuditEvent) -> Result<(), SinkError>;
    /// Record an `admin`-class event.
    fn log_admin(&self, event: &AuditEvent) -> Result<(), SinkError>;
    /// Record an `error`-class event.
    fn log_error(&self, event: &AuditEvent) -> Result<(), SinkError>;
    /// Record a `security`-class event (guard/gate/rate-limit rejections).
    fn log_security(&self, event: &AuditEvent) -> Result<(), SinkError>;
    /// Flush and release any resources. Called once at shutdown.
    fn close(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Dispatch `event` to the matching `log_*` method by its `event_type`.
pub fn dispatch(sink: &dyn Sink, event: &AuditEvent) -> Result<(), SinkError> {
    match event.event_type {
        EventType::Query => sink.log_query(event),
        EventType::Write => sink.log_write(event),
        EventType::Admin => sink.log_admin(event),
        EventType::Error => sink.log_error(event),
        EventType::Security => sink.log_security(event),
        EventType::Auth | EventType::Connection => sink.log_query(event),
    }
}

/// Zero-overhead sink; the default when audit logging is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl Sink for NoopSink {
    fn log_query(&self, _event: &AuditEvent) -> Result<(), SinkError> {
        Ok(())
    }
    fn log_write(&self, _event: &AuditEvent) -> Result<(), SinkError> {
        Ok(())
    }
    fn log_admin(&self, _event: &AuditEvent) -> Result<(), SinkError> {
        Ok(())
    }
    fn log_error(&self, _event: &AuditEvent) -> Result<(), SinkError> {
        Ok(())
    }
    fn log_security(&self, _event: &AuditEvent) -> Result<(), SinkError> {
        Ok(())
    }
}

/// In-memory collector; test-only (see design notes on durable sinks).
#[derive(Debug, Default)]
pub struct InMemorySink {
    events: Mutex<Vec<AuditEvent>>,
}

impl InMemorySink {
    /// An empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All events recorded so far, in append order.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().expect("audit sink mutex poisoned").clone()
    }

    /// Discard all recorded events.
    pub fn clear(&self) {
        self.events.lock().expect("audit sink mutex poisoned").clear();
    }

    fn append(&self, event: &AuditEvent) -> Result<(), SinkError> {
        self.events.lock().expect("audit sink mutex poisoned").push(event.clone());
        Ok(())
    }
}

impl Sink for InMemorySink {
    fn log_query(&self, event: &AuditEvent) -> Result<(), SinkError> {
        self.append(event)
    }
    fn log_write(&self, event: &AuditEvent) -> Result<(), SinkError> {
        self.append(event)
    }
    fn log_admin(&self, event: &AuditEvent) -> Result<(), SinkError> {
        self.append(event)
    }
    fn log_error(&self, event: &AuditEvent) -> Result<(), SinkError> {
        self.append(event)
    }
    fn log_security(&self, event: &AuditEvent) -> Result<(), SinkError> {
        self.append(event)
    }
}

/// Durable, append-only file sink: one JSON object per line, behind a single
/// lock, matching the in-memory sink's "single lock, appends only" policy.
/// Production-facing counterpart named by open question 3 in the design
/// notes; the `Sink` interface and event shape are unchanged.
#[derive(Debug)]
pub struct FileSink {
    file: Mutex<std::fs::File>,
}

impl FileSink {
    /// Open (creating if absent) the file at `path` for append, mode `0600`
    /// on Unix. Expected to be called once, at startup, after `LOG_PATH`
    /// resolution has already picked a writable location.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the file cannot be opened.
    pub fn open(path: &std::path::Path) -> std::io::Result<Self> {
        #[cfg(unix)]
        let file = {
            use std::os::unix::fs::OpenOptionsExt;
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .mode(0o600)
                .open(path)?
        };
        #[cfg(not(unix))]
        let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file: Mutex::new(file) })
    }

    fn append(&self, event: &AuditEvent) -> Result<(), SinkError> {
        use std::io::Write;
        let line = serde_json::to_string(event).map_err(|e| SinkError::WriteFailed(e.to_string()))?;
        let mut file = self.file.lock().expect("audit file sink mutex poisoned");
        writeln!(file, "{line}").map_err(|e| SinkError::WriteFailed(e.to_string()))?;
        Ok(())
    }
}

impl Sink for FileSink {
    fn log_query(&self, event: &AuditEvent) -> Result<(), SinkError> {
        self.append(event)
    }
    fn log_write(&self, event: &AuditEvent) -> Result<(), SinkError> {
        self.append(event)
    }
    fn log_admin(&self, event: &AuditEvent) -> Result<(), SinkError> {
        self.append(event)
    }
    fn log_error(&self, event: &AuditEvent) -> Result<(), SinkError> {
        self.append(event)
    }
    fn log_security(&self, event: &AuditEvent) -> Result<(), SinkError> {
        self.append(event)
    }
    fn close(&self) -> Result<(), SinkError> {
        use std::io::Write;
        let mut file = self.file.lock().expect("audit file sink mutex poisoned");
        file.flush().map_err(|e| SinkError::WriteFailed(e.to_string()))
    }
}

/// Carries the sink a request's handler should emit to, so deeply nested
/// code can reach it without threading an explicit parameter through every
/// call. Defaults to [`NoopSink`] when nothing has been attached.
#[derive(Clone)]
pub struct AuditContext {
    sink: Arc<dyn Sink>,
}

impl Default for AuditContext {
    fn default() -> Self {
        Self { sink: Arc::new(NoopSink) }
    }
}

impl AuditContext {
    /// A context with the no-op sink attached.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Attach `sink` to a (possibly default) context, returning the updated one.
#[must_use]
pub fn with_sink(_context: AuditContext, sink: Arc<dyn Sink>) -> AuditContext {
    AuditContext { sink }
}

/// Retrieve the attached sink, or the no-op sink if none was attached.
#[must_use]
pub fn get_sink(context: &AuditContext) -> Arc<dyn Sink> {
    Arc::clone(&context.sink)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_match_contract() {
        let event = new_event(EventType::Query).build();
        assert_eq!(event.status, Status::Pending);
        assert_eq!(event.severity, Severity::Info);
        assert!(event.timestamp <= Utc::now());
    }

    #[test]
    fn with_error_sets_status_and_lifts_severity() {
        let event = new_event(EventType::Query).with_error("boom").build();
        assert_eq!(event.status, Status::Error);
        assert_eq!(event.severity, Severity::Error);
        assert_eq!(event.error_msg.as_deref(), Some("boom"));
    }

    #[test]
    fn operation_classify_covers_common_keywords() {
        assert_eq!(Operation::classify("  select 1"), Operation::Select);
        assert_eq!(Operation::classify("DELETE FROM t"), Operation::Delete);
        assert_eq!(Operation::classify("show tables"), Operation::Other);
    }

    #[test]
    fn blocked_after_with_error_ends_at_the_blocked_severity() {
        let event = new_event(EventType::Security)
            .with_error("rejected by guard")
            .blocked(Severity::Warning)
            .build();
        assert_eq!(event.status, Status::Blocked);
        assert_eq!(event.severity, Severity::Warning);
    }

    #[test]
    fn in_memory_sink_collects_and_clears() {
        let sink = InMemorySink::new();
        let event = new_event(EventType::Security).blocked(Severity::Warning).build();
        dispatch(&sink, &event).expect("dispatch should not fail");
        assert_eq!(sink.events().len(), 1);
        sink.clear();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn noop_sink_never_errors() {
        let sink = NoopSink;
        let event = new_event(EventType::Query).success().build();
        assert!(dispatch(&sink, &event).is_ok());
    }

    #[test]
    fn context_defaults_to_noop_and_can_be_overridden() {
        let ctx = AuditContext::new();
        let event = new_event(EventType::Query).success().build();
        assert!(get_sink(&ctx).log_query(&event).is_ok());

        let memory = Arc::new(InMemorySink::new());
        let ctx = with_sink(ctx, memory.clone());
        get_sink(&ctx).log_query(&event).expect("dispatch should not fail");
        assert_eq!(memory.events().len(), 1);
    }

    #[test]
    fn event_round_trips_through_json() {
        let event = new_event(EventType::Write)
            .operation(Operation::Update)
            .table("users")
            .rows_affected(3)
            .duration_ms(12)
            .success()
            .build();
        let json = serde_json::to_string(&event).expect("serialize");
        let parsed: AuditEvent = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.id, event.id);
        assert_eq!(parsed.table, event.table);
        assert_eq!(parsed.rows_affected, event.rows_affected);
        assert_eq!(parsed.duration_ms, event.duration_ms);
    }

    #[test]
    fn concurrent_appends_to_in_memory_sink_lose_nothing() {
        use std::sync::Arc as StdArc;
        use std::thread;

        let sink = StdArc::new(InMemorySink::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let sink = StdArc::clone(&sink);
            handles.push(thread::spawn(move || {
                for _ in 0..50 {
                    let event = new_event(EventType::Query).success().build();
                    sink.log_query(&event).expect("log_query should not fail");
                }
            }));
        }
        for h in handles {
            h.join().expect("thread panicked");
        }
        assert_eq!(sink.events().len(), 400);
    }
}
