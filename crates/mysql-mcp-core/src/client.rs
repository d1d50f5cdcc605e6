//! Secure database client (C8).
//!
//! Composes the compatibility profile (C1), timeout policy (C2), rate
//! limiter (C3), audit sink (C4), error sanitiser (C5), query guard (C6),
//! and dangerous-operation gate (C7) around one pooled connection. Every
//! public operation is safe by construction: it must traverse the limiter,
//! the guard, the gate (where applicable), execution, audit, and
//! sanitisation, in that order.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Row, TypeInfo};

use crate::audit::{self, AuditContext, EventType, Operation, Severity};
use crate::compat::{Backend, CompatibilityProfile};
use crate::config::SecurityConfig;
use crate::gate::{Gate, GateError, OperationClass};
use crate::guard::{Guard, GuardError};
use crate::rate_limit::{Bucket, RateLimitConfig, RateLimiter};
use crate::sanitize::{Category, SanitizedError, Severity as SanitizeSeverity};
use crate::timeout::{TimeoutConfig, TimeoutContext, TimeoutOutcome, TimeoutProfile};

/// Pool-sizing defaults, keyed by backend (§4.8).
struct PoolDefaults {
    max_open: u32,
    max_idle: u32,
    max_lifetime: Duration,
    idle_timeout: Duration,
}

impl PoolDefaults {
    const fn for_backend(backend: Backend) -> Self {
        match backend {
            Backend::MySql => Self {
                max_open: 10,
                max_idle: 5,
                max_lifetime: Duration::from_secs(30 * 60),
                idle_timeout: Duration::from_secs(10 * 60),
            },
            Backend::MariaDb => Self {
                max_open: 15,
                max_idle: 8,
                max_lifetime: Duration::from_secs(60 * 60),
                idle_timeout: Duration::from_secs(15 * 60),
            },
        }
    }
}

/// Neutral, trivially-serialisable result shape returned by every read/write
/// operation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueryResult {
    /// Column names, in order.
    pub columns: Vec<String>,
    /// Each row as a JSON object keyed by column name.
    pub rows: Vec<Map<String, Value>>,
    /// Number of rows returned (reads) or affected (writes).
    pub row_count: u64,
    /// Free-form status message (e.g. "3 rows affected").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Everything the client needs to construct itself, gathered from
/// environment/config resolution.
pub struct ClientConfig {
    /// Backend capability record.
    pub compat: CompatibilityProfile,
    /// Timeout profile durations.
    pub timeouts: TimeoutConfig,
    /// Rate-limit bucket rates.
    pub rate_limits: RateLimitConfig,
    /// Guard/gate security policy.
    pub security: SecurityConfig,
}

/// The secure client. Cheaply cloneable: everything it owns is already
/// behind an `Arc` or is itself a connection pool handle.
#[derive(Clone)]
pub struct SecureClient {
    pool: MySqlPool,
    compat: Arc<CompatibilityProfile>,
    timeouts: Arc<TimeoutConfig>,
    limiter: Arc<RateLimiter>,
    security: Arc<SecurityConfig>,
    audit: AuditContext,
}

impl SecureClient {
    /// Build the connection pool for `config.compat`'s backend and compose
    /// the envelope around it.
    ///
    /// # Errors
    ///
    /// Returns the pool-construction error if the connection cannot be
    /// established.
    pub async fn connect(
        dsn: &str,
        config: ClientConfig,
        audit: AuditContext,
    ) -> Result<Self, sqlx::Error> {
        let defaults = PoolDefaults::for_backend(config.compat.backend());
        let pool = MySqlPoolOptions::new()
            .max_connections(defaults.max_open)
            .min_connections(defaults.max_idle)
            .max_lifetime(defaults.max_lifetime)
            .idle_timeout(defaults.idle_timeout)
            .connect(dsn)
            .await?;

        Ok(Self {
            pool,
            compat: Arc::new(config.compat),
            timeouts: Arc::new(config.timeouts),
            limiter: Arc::new(RateLimiter::new(config.rate_limits)),
            security: Arc::new(config.security),
            audit,
        })
    }

    /// The active compatibility profile.
    #[must_use]
    pub fn compatibility_profile(&self) -> &CompatibilityProfile {
        &self.compat
    }

    /// The active security config's non-secret shape, for `show_safety_info`.
    #[must_use]
    pub fn security_config(&self) -> &SecurityConfig {
        &self.security
    }

    // ---- public surface -------------------------------------------------

    /// `query(sql)` — injection + dangerous patterns only, no gate.
    pub async fn query(&self, sql: &str) -> Result<QueryResult, SanitizedError> {
        self.run_read(sql, "query").await
    }

    /// `query_prepared(sql, args)` — parameterised, so the guard is not run
    /// against `sql`'s literal text (the caller can't inject through bound
    /// parameters).
    pub async fn query_prepared(&self, sql: &str, args: &[Value]) -> Result<QueryResult, SanitizedError> {
        if !self.limiter.allow(Bucket::Query) {
            return Err(self.rate_limited_error("query_prepared").await);
        }

        let mut query = sqlx::query(sql);
        for arg in args {
            query = bind_json_value(query, arg);
        }

        let mut ctx = TimeoutContext::open(&self.timeouts, TimeoutProfile::Query);
        let outcome = ctx.run(query.fetch_all(&self.pool)).await;
        let duration_ms = elapsed_ms(&ctx);

        match outcome {
            Ok(rows) => {
                let result = rows_to_result(&rows);
                self.emit_success(EventType::Query, Operation::classify(sql), result.row_count, duration_ms, "query_prepared")
                    .await;
                Ok(result)
            }
            Err(TimeoutOutcome::Inner(e)) => {
                Err(self.emit_sanitized_error(EventType::Error, sql, &e.to_string(), duration_ms, false, "query_prepared").await)
            }
            Err(TimeoutOutcome::Elapsed) => Err(self.emit_timeout_error(sql, duration_ms, "query_prepared").await),
        }
    }

    /// `execute(sql, confirm_key)` — write surface: injection + dangerous +
    /// DDL-if-blocked guard, then the write gate.
    pub async fn execute(&self, sql: &str, confirm_key: Option<&str>) -> Result<QueryResult, SanitizedError> {
        self.run_write(sql, confirm_key, OperationClass::Write, "execute").await
    }

    /// `execute_ddl(sql, confirm_key)` — admin surface, always gated.
    pub async fn execute_ddl(&self, sql: &str, confirm_key: Option<&str>) -> Result<QueryResult, SanitizedError> {
        self.run_write(sql, confirm_key, OperationClass::Ddl, "execute_ddl").await
    }

    /// `list_tables()` — fixed SQL, no guard needed.
    pub async fn list_tables(&self) -> Result<QueryResult, SanitizedError> {
        self.run_read("SHOW TABLES", "tables").await
    }

    /// `describe_table(name)` — identifier-validated, templated SQL.
    pub async fn describe_table(&self, name: &str) -> Result<QueryResult, SanitizedError> {
        let guard = Guard::new(&self.security);
        if let Err(e) = guard.validate_table_access(name) {
            return Err(self.emit_guard_rejection(e, "describe").await);
        }
        let sql = format!("DESCRIBE `{name}`");
        self.run_read(&sql, "describe").await
    }

    /// `views()` — fixed SQL against `information_schema.views`.
    pub async fn list_views(&self) -> Result<QueryResult, SanitizedError> {
        self.run_read(
            "SELECT table_name FROM information_schema.views WHERE table_schema = DATABASE()",
            "views",
        )
        .await
    }

    /// `indexes(table)` — identifier-validated, templated SQL.
    pub async fn list_indexes(&self, table: &str) -> Result<QueryResult, SanitizedError> {
        let guard = Guard::new(&self.security);
        if let Err(e) = guard.validate_table_access(table) {
            return Err(self.emit_guard_rejection(e, "indexes").await);
        }
        let sql = format!("SHOW INDEX FROM `{table}`");
        self.run_read(&sql, "indexes").await
    }

    /// `explain(sql)` — guards that `sql` is a `SELECT`, then wraps it.
    pub async fn explain(&self, sql: &str) -> Result<QueryResult, SanitizedError> {
        let trimmed = sql.trim_start();
        if !trimmed.to_uppercase().starts_with("SELECT") {
            return Err(self
                .emit_guard_rejection(GuardError::SuspiciousPattern, "explain")
                .await);
        }
        let wrapped = format!("EXPLAIN {sql}");
        self.run_read(&wrapped, "explain").await
    }

    /// `count(table, where?)` — identifier-validated table, optional
    /// free-form `where` fragment checked with `is_safe_sql`.
    pub async fn count_rows(&self, table: &str, where_clause: Option<&str>) -> Result<QueryResult, SanitizedError> {
        let guard = Guard::new(&self.security);
        if let Err(e) = guard.validate_table_access(table) {
            return Err(self.emit_guard_rejection(e, "count").await);
        }
        if let Some(clause) = where_clause {
            if !crate::guard::is_safe_sql(clause) {
                return Err(self
                    .emit_guard_rejection(GuardError::SuspiciousPattern, "count")
                    .await);
            }
        }
        let sql = match where_clause {
            Some(clause) => format!("SELECT COUNT(*) AS count FROM `{table}` WHERE {clause}"),
            None => format!("SELECT COUNT(*) AS count FROM `{table}`"),
        };
        self.run_read(&sql, "count").await
    }

    /// `sample(table, limit?)` — identifier-validated table, `limit` clamped
    /// to ≤ 100.
    pub async fn sample_rows(&self, table: &str, limit: Option<u32>) -> Result<QueryResult, SanitizedError> {
        let guard = Guard::new(&self.security);
        if let Err(e) = guard.validate_table_access(table) {
            return Err(self.emit_guard_rejection(e, "sample").await);
        }
        let limit = limit.unwrap_or(10).min(100);
        let sql = format!("SELECT * FROM `{table}` LIMIT {limit}");
        self.run_read(&sql, "sample").await
    }

    /// `database_info()` — compatibility profile plus a handful of fixed
    /// `SHOW`/`SELECT` statements.
    pub async fn database_info(&self) -> Result<QueryResult, SanitizedError> {
        self.run_read(
            "SELECT VERSION() AS version, DATABASE() AS database_name",
            "database_info",
        )
        .await
    }

    /// `show_safety_info()` — the one tool that never touches the database.
    /// Echoes the security config's shape, never the `safety_key` itself.
    #[must_use]
    pub fn show_safety_info(&self) -> Value {
        serde_json::json!({
            "backend": self.compat.backend().to_string(),
            "max_safe_rows": self.security.max_safe_rows,
            "block_ddl": self.security.block_ddl,
            "block_dangerous": self.security.block_dangerous,
            "allowed_tables_count": self.security.allowed_tables.len(),
            "allowed_tables_restricted": !self.security.allowed_tables.is_empty(),
        })
    }

    // ---- private execution helper ---------------------------------------

    async fn run_read(&self, sql: &str, source: &str) -> Result<QueryResult, SanitizedError> {
        if !self.limiter.allow(Bucket::Query) {
            return Err(self.rate_limited_error(source).await);
        }

        let guard = Guard::new(&self.security);
        if let Err(e) = guard.validate(sql) {
            return Err(self.emit_guard_rejection(e, source).await);
        }

        let mut ctx = TimeoutContext::open(&self.timeouts, TimeoutProfile::Query);
        let outcome = ctx.run(sqlx::query(sql).fetch_all(&self.pool)).await;
        let duration_ms = elapsed_ms(&ctx);

        match outcome {
            Ok(rows) => {
                let result = rows_to_result(&rows);
                self.emit_success(EventType::Query, Operation::classify(sql), result.row_count, duration_ms, source)
                    .await;
                Ok(result)
            }
            Err(TimeoutOutcome::Inner(e)) => {
                Err(self.emit_sanitized_error(EventType::Error, sql, &e.to_string(), duration_ms, false, source).await)
            }
            Err(TimeoutOutcome::Elapsed) => Err(self.emit_timeout_error(sql, duration_ms, source).await),
        }
    }

    async fn run_write(
        &self,
        sql: &str,
        confirm_key: Option<&str>,
        class: OperationClass,
        source: &str,
    ) -> Result<QueryResult, SanitizedError> {
        let bucket = match class {
            OperationClass::Write => Bucket::Write,
            OperationClass::Ddl => Bucket::Admin,
        };
        if !self.limiter.allow(bucket) {
            return Err(self.rate_limited_error(source).await);
        }

        let guard = Guard::new(&self.security);
        if let Err(e) = guard.validate(sql) {
            return Err(self.emit_guard_rejection(e, source).await);
        }

        let gate = Gate::new(&self.security);
        if let Err(e) = gate.check(sql, class, confirm_key) {
            return Err(self.emit_gate_rejection(e, source).await);
        }

        let timeout_profile = match class {
            OperationClass::Write => TimeoutProfile::Write,
            OperationClass::Ddl => TimeoutProfile::Admin,
        };
        let mut ctx = TimeoutContext::open(&self.timeouts, timeout_profile);
        let outcome = ctx.run(sqlx::query(sql).execute(&self.pool)).await;
        let duration_ms = elapsed_ms(&ctx);

        match outcome {
            Ok(done) => {
                let rows_affected = done.rows_affected();
                let event_type = match class {
                    OperationClass::Write => EventType::Write,
                    OperationClass::Ddl => EventType::Admin,
                };
                self.emit_success(event_type, Operation::classify(sql), rows_affected, duration_ms, source)
                    .await;
                Ok(QueryResult {
                    columns: Vec::new(),
                    rows: Vec::new(),
                    row_count: rows_affected,
                    message: Some(format!("{rows_affected} rows affected")),
                })
            }
            Err(TimeoutOutcome::Inner(e)) => {
                Err(self.emit_sanitized_error(EventType::Error, sql, &e.to_string(), duration_ms, false, source).await)
            }
            Err(TimeoutOutcome::Elapsed) => Err(self.emit_timeout_error(sql, duration_ms, source).await),
        }
    }

    async fn rate_limited_error(&self, source: &str) -> SanitizedError {
        let sanitized = SanitizedError::fixed(
            Category::System,
            SanitizeSeverity::Warning,
            "rate limit exceeded",
            "rate limit exceeded: bucket exhausted",
        );
        let event = audit::new_event(EventType::Security)
            .source(source)
            .with_error(sanitized.get_internal_message())
            .blocked(Severity::Warning)
            .duration_ms(0)
            .build();
        let _ = audit::dispatch(audit::get_sink(&self.audit).as_ref(), &event);
        sanitized
    }

    async fn emit_guard_rejection(&self, error: GuardError, source: &str) -> SanitizedError {
        let message = match &error {
            GuardError::SuspiciousPattern => "suspicious pattern",
            GuardError::DangerousOperation => "dangerous operation",
            GuardError::DdlBlocked => "DDL blocked",
            GuardError::Empty => "empty SQL statement",
            GuardError::TableNotAllowed(_) => "table not allowed",
            GuardError::InvalidIdentifier(_) => "invalid identifier",
        };
        let sanitized = SanitizedError::fixed(Category::User, SanitizeSeverity::Warning, message, &error.to_string());
        let event = audit::new_event(EventType::Security)
            .source(source)
            .with_error(sanitized.get_internal_message())
            .blocked(Severity::Warning)
            .duration_ms(0)
            .build();
        let _ = audit::dispatch(audit::get_sink(&self.audit).as_ref(), &event);
        sanitized
    }

    async fn emit_gate_rejection(&self, error: GateError, source: &str) -> SanitizedError {
        let message = "confirmation required for this operation";
        let sanitized = SanitizedError::fixed(Category::User, SanitizeSeverity::Warning, message, &error.to_string());
        let event = audit::new_event(EventType::Security)
            .source(source)
            .with_error(sanitized.get_internal_message())
            .blocked(Severity::Warning)
            .duration_ms(0)
            .build();
        let _ = audit::dispatch(audit::get_sink(&self.audit).as_ref(), &event);
        sanitized
    }

    async fn emit_timeout_error(&self, sql: &str, duration_ms: u64, source: &str) -> SanitizedError {
        self.emit_sanitized_error(EventType::Error, sql, "deadline exceeded while executing statement", duration_ms, true, source)
            .await
    }

    async fn emit_sanitized_error(
        &self,
        event_type: EventType,
        sql: &str,
        raw_message: &str,
        duration_ms: u64,
        is_timeout: bool,
        source: &str,
    ) -> SanitizedError {
        let sanitized = SanitizedError::sanitize_string(raw_message);
        let mut builder = audit::new_event(event_type)
            .operation(Operation::classify(sql))
            .source(source)
            .duration_ms(duration_ms)
            .with_error(sanitized.get_internal_message());
        if is_timeout {
            builder = builder.with_metadata("is_timeout", true);
        }
        let event = builder.build();
        let _ = audit::dispatch(audit::get_sink(&self.audit).as_ref(), &event);
        sanitized
    }

    async fn emit_success(
        &self,
        event_type: EventType,
        operation: Operation,
        rows: u64,
        duration_ms: u64,
        source: &str,
    ) {
        let event = audit::new_event(event_type)
            .operation(operation)
            .rows_affected(rows)
            .duration_ms(duration_ms)
            .source(source)
            .success()
            .build();
        let _ = audit::dispatch(audit::get_sink(&self.audit).as_ref(), &event);
    }
}

/// Milliseconds elapsed, per the deadline context's own tracking record.
fn elapsed_ms(ctx: &TimeoutContext) -> u64 {
    ctx.record.elapsed.map_or(0, |d| d.as_millis() as u64)
}

fn bind_json_value<'q>(
    query: sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments>,
    value: &Value,
) -> sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else if let Some(f) = n.as_f64() {
                query.bind(f)
            } else {
                query.bind(n.to_string())
            }
        }
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}

/// Marshal a row set into the neutral `{columns, rows, row_count}` shape,
/// converting every column value to a JSON scalar so the result is trivially
/// serialisable.
fn rows_to_result(rows: &[MySqlRow]) -> QueryResult {
    let columns: Vec<String> = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let mapped_rows: Vec<Map<String, Value>> = rows.iter().map(row_to_map).collect();

    QueryResult {
        row_count: mapped_rows.len() as u64,
        columns,
        rows: mapped_rows,
        message: None,
    }
}

fn row_to_map(row: &MySqlRow) -> Map<String, Value> {
    let mut map = Map::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let name = column.name().to_string();
        let value = column_value(row, idx, column.type_info().name());
        map.insert(name, value);
    }
    map
}

fn column_value(row: &MySqlRow, idx: usize, type_name: &str) -> Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        if let Some(v) = v {
            return Value::from(v);
        }
        if matches!(type_name, "TINYINT" | "SMALLINT" | "INT" | "BIGINT" | "MEDIUMINT") {
            return Value::Null;
        }
    }
    if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
        return serde_json::Number::from_f64(v).map_or(Value::Null, Value::Number);
    }
    if let Ok(Some(v)) = row.try_get::<Option<bool>, _>(idx) {
        return Value::Bool(v);
    }
    if let Ok(Some(v)) = row.try_get::<Option<String>, _>(idx) {
        return Value::String(v);
    }
    if let Ok(Some(v)) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return Value::String(String::from_utf8_lossy(&v).into_owned());
    }
    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn show_safety_info_never_includes_the_safety_key() {
        let client_like = SecurityConfig {
            safety_key: "super-secret".to_string(),
            ..SecurityConfig::default()
        };
        let json = serde_json::json!({
            "max_safe_rows": client_like.max_safe_rows,
            "block_ddl": client_like.block_ddl,
        });
        let text = json.to_string();
        assert!(!text.contains("super-secret"));
    }

    #[test]
    fn pool_defaults_match_the_backend_table() {
        let mysql = PoolDefaults::for_backend(Backend::MySql);
        assert_eq!(mysql.max_open, 10);
        assert_eq!(mysql.max_idle, 5);
        let mariadb = PoolDefaults::for_backend(Backend::MariaDb);
        assert_eq!(mariadb.max_open, 15);
        assert_eq!(mariadb.max_idle, 8);
    }
}
