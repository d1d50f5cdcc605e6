//! Error classification, redaction, and client-safe formatting (C5).
//!
//! The sanitiser is the only component permitted to turn an arbitrary
//! (driver, I/O, internal) error into something that crosses the process
//! boundary back to the MCP host.

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Closed set of error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Caller mistakes: bad SQL syntax, constraint violation, not found.
    User,
    /// Resource exhaustion at the system level.
    System,
    /// Anything that doesn't match a more specific family.
    Internal,
    /// Permission/credential failures.
    Auth,
    /// Deadline exceeded.
    Timeout,
    /// Connectivity failures.
    Network,
}

impl Category {
    const fn as_code_segment(self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::System => "SYSTEM",
            Self::Internal => "INTERNAL",
            Self::Auth => "AUTH",
            Self::Timeout => "TIMEOUT",
            Self::Network => "NETWORK",
        }
    }

    /// `true` for `timeout|network|system|internal`, `false` for
    /// `user|auth`.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Timeout | Self::Network | Self::System | Self::Internal)
    }
}

/// Severity, independent of category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Unused by the sanitiser today; part of the closed set for symmetry
    /// with the audit event severities.
    Info,
    /// Matches `WARNING|RETRY|deprecated`.
    Warning,
    /// The default when nothing more specific matches.
    Error,
    /// Matches `FATAL|PANIC|CRASH|CRITICAL|unrecoverable`.
    Critical,
}

lazy_static! {
    static ref TIMEOUT_RE: Regex =
        Regex::new(r"(?i)timeout|deadline exceeded|context canceled|i/o timeout").expect("valid regex");
    static ref AUTH_RE: Regex = Regex::new(
        r"(?i)authentication failed|access denied|permission denied|unauthorized|forbidden"
    )
    .expect("valid regex");
    static ref NETWORK_RE: Regex = Regex::new(
        r"(?i)connection refused|network unreachable|dial tcp|connection reset|network down|i/o error"
    )
    .expect("valid regex");
    static ref SYSTEM_RE: Regex = Regex::new(
        r"(?i)out of memory|disk full|resource limit exceeded|too many connections"
    )
    .expect("valid regex");
    static ref USER_RE: Regex = Regex::new(
        r"(?i)syntax error|constraint|duplicate|invalid sql|column not found|malformed|not found"
    )
    .expect("valid regex");

    static ref CRITICAL_RE: Regex =
        Regex::new(r"(?i)FATAL|PANIC|CRASH|CRITICAL|unrecoverable").expect("valid regex");
    static ref WARNING_RE: Regex = Regex::new(r"(?i)WARNING|RETRY|deprecated").expect("valid regex");

    static ref SUBCATEGORY_RE: Regex = Regex::new(
        r"(?i)(?P<syntax>syntax error)|(?P<constraint>constraint)|(?P<duplicate>duplicate)|(?P<notfound>not found|column not found)|(?P<permission>access denied|permission denied)|(?P<connection>connection refused|connection reset|dial tcp)|(?P<timeoutkw>timeout|deadline exceeded)|(?P<memory>out of memory|disk full)"
    )
    .expect("valid regex");

    static ref IPV4_RE: Regex =
        Regex::new(r"\b(?:(?:25[0-5]|2[0-4]\d|1?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|1?\d?\d)\b")
            .expect("valid regex");
    static ref IPV6_RE: Regex = Regex::new(r"\b(?:[0-9a-fA-F]{1,4}:){2,7}[0-9a-fA-F]{1,4}\b").expect("valid regex");
    static ref UNIX_PATH_RE: Regex = Regex::new(r"(?:/[\w.\-]+){2,}").expect("valid regex");
    static ref WINDOWS_PATH_RE: Regex = Regex::new(r"[A-Za-z]:\\(?:[\w.\-]+\\?)+").expect("valid regex");
    static ref KV_LEAK_RE: Regex =
        Regex::new(r"(?i)\b(host|port|database|table)=([^\s,;]+)").expect("valid regex");
    static ref HOSTNAME_RE: Regex =
        Regex::new(r"\b[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?){1,}\.(?:com|net|org|io|dev|internal|local)\b")
            .expect("valid regex");
    static ref QUOTED_SQL_RE: Regex = Regex::new(r#"'[^']{40,}'"#).expect("valid regex");
}

const MAX_MESSAGE_LEN: usize = 200;

/// Classify a raw error/diagnostic message. First match wins, in the order
/// timeout, auth, network, system, user, internal.
#[must_use]
pub fn classify(message: &str) -> Category {
    if TIMEOUT_RE.is_match(message) {
        Category::Timeout
    } else if AUTH_RE.is_match(message) {
        Category::Auth
    } else if NETWORK_RE.is_match(message) {
        Category::Network
    } else if SYSTEM_RE.is_match(message) {
        Category::System
    } else if USER_RE.is_match(message) {
        Category::User
    } else {
        Category::Internal
    }
}

/// Independent severity classification.
#[must_use]
pub fn classify_severity(message: &str) -> Severity {
    if CRITICAL_RE.is_match(message) {
        Severity::Critical
    } else if WARNING_RE.is_match(message) {
        Severity::Warning
    } else {
        Severity::Error
    }
}

fn subcategory(message: &str) -> Option<&'static str> {
    let caps = SUBCATEGORY_RE.captures(message)?;
    if caps.name("syntax").is_some() {
        Some("SYNTAX")
    } else if caps.name("constraint").is_some() {
        Some("CONSTRAINT")
    } else if caps.name("duplicate").is_some() {
        Some("DUPLICATE")
    } else if caps.name("notfound").is_some() {
        Some("NOT_FOUND")
    } else if caps.name("permission").is_some() {
        Some("PERMISSION")
    } else if caps.name("connection").is_some() {
        Some("CONNECTION")
    } else if caps.name("timeoutkw").is_some() {
        Some("TIMEOUT")
    } else if caps.name("memory").is_some() {
        Some("MEMORY")
    } else {
        None
    }
}

/// `ERR_<CATEGORY>[_<SUBCATEGORY>]`.
#[must_use]
pub fn error_code(category: Category, message: &str) -> String {
    match subcategory(message) {
        Some(sub) => format!("ERR_{}_{}", category.as_code_segment(), sub),
        None => format!("ERR_{}", category.as_code_segment()),
    }
}

/// Redact IPs, paths, key-value leaks, hostnames, and long quoted SQL
/// fragments; then cap the result at ~200 characters.
#[must_use]
pub fn redact(message: &str) -> String {
    let mut s = message.to_string();
    s = QUOTED_SQL_RE.replace_all(&s, "'[TRUNCATED]'").to_string();
    s = KV_LEAK_RE.replace_all(&s, "$1=[REDACTED]").to_string();
    s = WINDOWS_PATH_RE.replace_all(&s, "[REDACTED]").to_string();
    s = UNIX_PATH_RE.replace_all(&s, "[REDACTED]").to_string();
    s = IPV6_RE.replace_all(&s, "[REDACTED]").to_string();
    s = IPV4_RE.replace_all(&s, "[REDACTED]").to_string();
    s = HOSTNAME_RE.replace_all(&s, "[REDACTED]").to_string();

    if s.chars().count() > MAX_MESSAGE_LEN {
        let truncated: String = s.chars().take(MAX_MESSAGE_LEN).collect();
        format!("{truncated}…")
    } else {
        s
    }
}

/// A sanitised, client-safe error record. `internal_message` never leaves
/// the process boundary: it is read only by the audit sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizedError {
    /// Stable `ERR_<CATEGORY>[_<SUBCATEGORY>]` code.
    pub code: String,
    /// Client-safe, redacted message.
    pub message: String,
    /// Category.
    pub category: Category,
    /// Severity.
    pub severity: Severity,
    /// Whether the client may retry.
    pub is_retryable: bool,
    /// Client-safe, caller-attached context.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, serde_json::Value>,
    /// Original, unredacted message. Never serialised into a client
    /// response — see [`SanitizedError::client_response`].
    #[serde(skip)]
    pub internal_message: String,
}

impl SanitizedError {
    /// Classify, redact, and wrap any `Display`-able error.
    #[must_use]
    pub fn sanitize(err: &dyn std::fmt::Display) -> Self {
        Self::sanitize_string(&err.to_string())
    }

    /// Classify, redact, and wrap a raw message string directly.
    #[must_use]
    pub fn sanitize_string(raw: &str) -> Self {
        let category = classify(raw);
        let severity = classify_severity(raw);
        let code = error_code(category, raw);
        let message = redact(raw);
        Self {
            code,
            message,
            category,
            severity,
            is_retryable: category.is_retryable(),
            details: HashMap::new(),
            internal_message: raw.to_string(),
        }
    }

    /// Build a fixed-message sanitised error directly in a given category,
    /// for call sites (guard/gate rejections) that already know the
    /// classification and don't want it re-derived from pattern matching.
    #[must_use]
    pub fn fixed(category: Category, severity: Severity, message: &str, internal_message: &str) -> Self {
        Self {
            code: error_code(category, internal_message),
            message: message.to_string(),
            category,
            severity,
            is_retryable: category.is_retryable(),
            details: HashMap::new(),
            internal_message: internal_message.to_string(),
        }
    }

    /// Attach one client-safe detail.
    #[must_use]
    pub fn with_details(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// The `{error, message, category, severity, retryable, details?}` shape
    /// returned to the MCP host. Never includes `internal_message`.
    #[must_use]
    pub fn client_response(&self) -> serde_json::Value {
        let mut obj = serde_json::json!({
            "error": self.code,
            "message": self.message,
            "category": self.category,
            "severity": self.severity,
            "retryable": self.is_retryable,
        });
        if !self.details.is_empty() {
            obj["details"] = serde_json::to_value(&self.details).unwrap_or(serde_json::Value::Null);
        }
        obj
    }

    /// The original, unredacted message — for log/audit sinks only.
    #[must_use]
    pub fn get_internal_message(&self) -> &str {
        &self.internal_message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_order_prefers_timeout_first() {
        // Matches both timeout and auth phrasing; timeout must win.
        assert_eq!(classify("timeout: permission denied"), Category::Timeout);
    }

    #[test]
    fn unmatched_message_is_internal() {
        assert_eq!(classify("something completely unrelated happened"), Category::Internal);
    }

    #[test]
    fn retryability_matches_category() {
        assert!(!Category::User.is_retryable());
        assert!(!Category::Auth.is_retryable());
        assert!(Category::Timeout.is_retryable());
        assert!(Category::Network.is_retryable());
        assert!(Category::System.is_retryable());
        assert!(Category::Internal.is_retryable());
    }

    #[test]
    fn redaction_strips_ipv4_and_paths() {
        let raw = "connection refused: could not reach 192.168.1.5 at /var/lib/mysql/socket";
        let redacted = redact(raw);
        assert!(!redacted.contains("192.168.1.5"));
        assert!(!redacted.contains("/var/lib/mysql"));
    }

    #[test]
    fn redaction_caps_length() {
        let raw = "x".repeat(500);
        let redacted = redact(&raw);
        assert!(redacted.chars().count() <= MAX_MESSAGE_LEN + 1);
        assert!(redacted.ends_with('…'));
    }

    #[test]
    fn redaction_is_idempotent() {
        let raw = "connection refused: host=10.0.0.1 path=/etc/mysql/my.cnf";
        let once = redact(raw);
        let twice = redact(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn sanitized_message_never_exceeds_200_chars() {
        let err = SanitizedError::sanitize_string(&"connection refused ".repeat(50));
        assert!(err.message.chars().count() <= MAX_MESSAGE_LEN + 1);
    }

    #[test]
    fn client_response_omits_internal_message() {
        let err = SanitizedError::sanitize_string("syntax error near SELECT");
        let response = err.client_response();
        assert!(response.get("internal_message").is_none());
        assert_eq!(response["error"], err.code);
    }

    #[test]
    fn code_is_stable_for_same_category_and_subcategory() {
        let a = error_code(Category::User, "syntax error near line 1");
        let b = error_code(Category::User, "syntax error near line 2");
        assert_eq!(a, b);
        assert_eq!(a, "ERR_USER_SYNTAX");
    }
}
