//! Pattern-based SQL validator (C6).
//!
//! Two pattern families compiled once at module load: injection vectors and
//! destructive operations. This is deliberately a regular-expression
//! ensemble, not a SQL parser — false positives are an acceptable cost for a
//! safety envelope that must not let genuine attacks through uncaught.

use lazy_static::lazy_static;
use regex::Regex;

use crate::config::SecurityConfig;

lazy_static! {
    static ref INJECTION_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)'\s*OR\s*'").expect("valid regex"),
        Regex::new(r#"(?i)"\s*OR\s*""#).expect("valid regex"),
        Regex::new(r"'\s*=\s*'").expect("valid regex"),
        Regex::new(r"\d+\s*=\s*\d+").expect("valid regex"),
        Regex::new(r"--\s*$").expect("valid regex"),
        Regex::new(r";\s*--").expect("valid regex"),
        Regex::new(r"(?s)/\*.*?\*/").expect("valid regex"),
        Regex::new(r"'#").expect("valid regex"),
        Regex::new(r"(?i)UNION\s+(ALL\s+)?SELECT").expect("valid regex"),
        Regex::new(r"(?i)SLEEP\s*\(").expect("valid regex"),
        Regex::new(r"(?i)BENCHMARK\s*\(").expect("valid regex"),
        Regex::new(r"(?i)WAITFOR\s+DELAY").expect("valid regex"),
        Regex::new(r"(?i)information_schema").expect("valid regex"),
        Regex::new(r"(?i)0x[0-9a-f]+").expect("valid regex"),
        Regex::new(r"(?i)CHAR\s*\(").expect("valid regex"),
        Regex::new(r"(?i)CONCAT\s*\(").expect("valid regex"),
        Regex::new(r"(?i)GROUP_CONCAT\s*\(").expect("valid regex"),
        Regex::new(r"(?i)EXTRACTVALUE\s*\(").expect("valid regex"),
        Regex::new(r"(?i)UPDATEXML\s*\(").expect("valid regex"),
        Regex::new(r"(?i)INTO\s+OUTFILE").expect("valid regex"),
        Regex::new(r"(?i)INTO\s+DUMPFILE").expect("valid regex"),
        Regex::new(r"(?i)LOAD_FILE\s*\(").expect("valid regex"),
        Regex::new(r"(?i)LOAD\s+DATA").expect("valid regex"),
    ];

    static ref DANGEROUS_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)DROP\s+DATABASE").expect("valid regex"),
        Regex::new(r"(?i)DROP\s+SCHEMA").expect("valid regex"),
        Regex::new(r"(?i)TRUNCATE\s+TABLE").expect("valid regex"),
        Regex::new(r"(?i)DELETE\s+FROM\s+[A-Za-z_][A-Za-z0-9_]*\s*(;|$)").expect("valid regex"),
        Regex::new(r"(?i)INTO\s+OUTFILE").expect("valid regex"),
        Regex::new(r"(?i)INTO\s+DUMPFILE").expect("valid regex"),
        Regex::new(r"(?i)LOAD_FILE\s*\(").expect("valid regex"),
        Regex::new(r"(?i)LOAD\s+DATA").expect("valid regex"),
    ];

    static ref UPDATE_SET_PATTERN: Regex =
        Regex::new(r"(?i)^UPDATE\s+[A-Za-z_][A-Za-z0-9_]*\s+SET\b").expect("valid regex");

    static ref DDL_PATTERN: Regex =
        Regex::new(r"(?i)^(CREATE|DROP|ALTER|TRUNCATE|RENAME)\b").expect("valid regex");

    static ref IDENTIFIER_RE: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex");

    static ref LINE_COMMENT_RE: Regex = Regex::new(r"(?m)(--|#)[^\n]*$").expect("valid regex");
    static ref BLOCK_COMMENT_RE: Regex = Regex::new(r"(?s)/\*.*?\*/").expect("valid regex");
    static ref WHITESPACE_RE: Regex = Regex::new(r"\s+").expect("valid regex");
}

/// Why [`Guard::validate`] rejected a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    /// The statement was empty after trimming.
    Empty,
    /// Matched an injection pattern. Deliberately opaque: callers must not
    /// echo which pattern matched.
    SuspiciousPattern,
    /// Matched a dangerous-operation pattern.
    DangerousOperation,
    /// Matched the DDL pattern while `block_ddl = true`.
    DdlBlocked,
    /// `validate_table_access` rejected the name.
    TableNotAllowed(String),
    /// The table/column name is not a valid identifier.
    InvalidIdentifier(String),
}

impl std::fmt::Display for GuardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty SQL statement"),
            Self::SuspiciousPattern => write!(f, "suspicious pattern"),
            Self::DangerousOperation => write!(f, "dangerous operation"),
            Self::DdlBlocked => write!(f, "DDL blocked"),
            Self::TableNotAllowed(name) => write!(f, "table not allowed: {name}"),
            Self::InvalidIdentifier(name) => write!(f, "invalid identifier: {name}"),
        }
    }
}

impl std::error::Error for GuardError {}

/// Compiled-pattern SQL validator, parameterised by [`SecurityConfig`].
pub struct Guard<'a> {
    config: &'a SecurityConfig,
}

impl<'a> Guard<'a> {
    /// Borrow the active security config for the lifetime of validation
    /// calls.
    #[must_use]
    pub const fn new(config: &'a SecurityConfig) -> Self {
        Self { config }
    }

    /// Trim, reject empty, then run injection → dangerous → DDL in order,
    /// returning the first failure.
    pub fn validate(&self, sql: &str) -> Result<(), GuardError> {
        let trimmed = sql.trim();
        if trimmed.is_empty() {
            return Err(GuardError::Empty);
        }
        if !is_safe_sql(trimmed) {
            return Err(GuardError::SuspiciousPattern);
        }
        if DANGEROUS_PATTERNS.iter().any(|re| re.is_match(trimmed)) {
            return Err(GuardError::DangerousOperation);
        }
        if is_update_missing_where(trimmed) {
            return Err(GuardError::DangerousOperation);
        }
        if self.config.block_ddl && DDL_PATTERN.is_match(trimmed) {
            return Err(GuardError::DdlBlocked);
        }
        Ok(())
    }

    /// Lower-case and membership-test `name` against the configured
    /// whitelist (empty = permit all); also rejects non-identifiers.
    pub fn validate_table_access(&self, name: &str) -> Result<(), GuardError> {
        if !is_valid_identifier(name) {
            return Err(GuardError::InvalidIdentifier(name.to_string()));
        }
        if self.config.allowed_tables.is_empty() {
            return Ok(());
        }
        let lower = name.to_lowercase();
        if self.config.allowed_tables.iter().any(|t| t.to_lowercase() == lower) {
            Ok(())
        } else {
            Err(GuardError::TableNotAllowed(name.to_string()))
        }
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`, length ≤ 64.
#[must_use]
pub fn is_valid_identifier(name: &str) -> bool {
    name.len() <= 64 && IDENTIFIER_RE.is_match(name)
}

/// Injection patterns only, for free-form fragments like `WHERE` clauses.
#[must_use]
pub fn is_safe_sql(input: &str) -> bool {
    !INJECTION_PATTERNS.iter().any(|re| re.is_match(input))
}

/// `UPDATE <table> SET ...` with no `WHERE` anywhere in the statement. The
/// `regex` crate has no lookaround, so the "and nothing after SET matches
/// WHERE" half of this check is plain string matching, not a pattern.
fn is_update_missing_where(trimmed: &str) -> bool {
    UPDATE_SET_PATTERN.is_match(trimmed) && !trimmed.to_uppercase().contains("WHERE")
}

fn url_decode_one_level(input: &str) -> String {
    input
        .replace("%2e", ".")
        .replace("%2E", ".")
        .replace("%2f", "/")
        .replace("%2F", "/")
        .replace("%5c", "\\")
        .replace("%5C", "\\")
        .replace("%25", "%")
}

/// URL-decode one level (handling `%25` unfolding for double-encoding), then
/// reject `..` traversal, absolute Unix paths, Windows drive prefixes, and
/// UNC prefixes.
#[must_use]
pub fn is_safe_path(path: &str) -> bool {
    let decoded = url_decode_one_level(path);
    if decoded.contains("../") || decoded.contains("..\\") {
        return false;
    }
    if decoded.starts_with('/') {
        return false;
    }
    if decoded.len() >= 2 && decoded.as_bytes()[1] == b':' {
        return false;
    }
    if decoded.starts_with("\\\\") {
        return false;
    }
    true
}

/// Reject shell metacharacters: `;`, `|`, `&`, `` ` ``, `$(`, `${`, `\n`, `\r`.
#[must_use]
pub fn is_safe_command(input: &str) -> bool {
    const FORBIDDEN: &[&str] = &[";", "|", "&", "`", "$(", "${", "\n", "\r"];
    !FORBIDDEN.iter().any(|token| input.contains(token))
}

/// Strip `--`/`#` line comments and `/* … */` block comments, collapse
/// whitespace, and uppercase. Used only by the Dangerous-Operation Gate to
/// classify statements — the Guard must see the original text.
#[must_use]
pub fn strip_comments_for_estimator(sql: &str) -> String {
    let no_line_comments = LINE_COMMENT_RE.replace_all(sql, "");
    let no_block_comments = BLOCK_COMMENT_RE.replace_all(&no_line_comments, " ");
    let collapsed = WHITESPACE_RE.replace_all(&no_block_comments, " ");
    collapsed.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SecurityConfig {
        SecurityConfig::default()
    }

    #[test]
    fn accepts_plain_select() {
        let cfg = config();
        let guard = Guard::new(&cfg);
        assert!(guard.validate("SELECT * FROM users WHERE id = 1").is_ok());
    }

    #[test]
    fn rejects_classic_tautology() {
        let cfg = config();
        let guard = Guard::new(&cfg);
        let result = guard.validate("SELECT * FROM users WHERE id=1 OR 1=1 --");
        assert_eq!(result, Err(GuardError::SuspiciousPattern));
    }

    #[test]
    fn rejects_union_select() {
        let cfg = config();
        let guard = Guard::new(&cfg);
        assert!(guard.validate("SELECT id FROM a UNION SELECT password FROM users").is_err());
    }

    #[test]
    fn rejects_delete_without_where() {
        let cfg = config();
        let guard = Guard::new(&cfg);
        assert_eq!(guard.validate("DELETE FROM users").unwrap_err(), GuardError::DangerousOperation);
    }

    #[test]
    fn accepts_delete_with_where() {
        let cfg = config();
        let guard = Guard::new(&cfg);
        assert!(guard.validate("DELETE FROM users WHERE id = 1").is_ok());
    }

    #[test]
    fn rejects_update_without_where() {
        let cfg = config();
        let guard = Guard::new(&cfg);
        assert_eq!(
            guard.validate("UPDATE users SET status = 'x'").unwrap_err(),
            GuardError::DangerousOperation
        );
    }

    #[test]
    fn accepts_update_with_where() {
        let cfg = config();
        let guard = Guard::new(&cfg);
        assert!(guard.validate("UPDATE users SET status = 'x' WHERE id = 1").is_ok());
    }

    #[test]
    fn ddl_gate_only_applies_when_configured() {
        let mut cfg = config();
        cfg.block_ddl = false;
        let guard = Guard::new(&cfg);
        assert!(guard.validate("CREATE TABLE t (id INT)").is_ok());

        cfg.block_ddl = true;
        let guard = Guard::new(&cfg);
        assert_eq!(guard.validate("CREATE TABLE t (id INT)").unwrap_err(), GuardError::DdlBlocked);
    }

    #[test]
    fn empty_sql_is_rejected() {
        let cfg = config();
        let guard = Guard::new(&cfg);
        assert_eq!(guard.validate("   ").unwrap_err(), GuardError::Empty);
    }

    #[test]
    fn table_whitelist_empty_permits_all() {
        let cfg = config();
        let guard = Guard::new(&cfg);
        assert!(guard.validate_table_access("anything").is_ok());
    }

    #[test]
    fn table_whitelist_enforced_case_insensitively() {
        let mut cfg = config();
        cfg.allowed_tables = vec!["Users".to_string()];
        let guard = Guard::new(&cfg);
        assert!(guard.validate_table_access("users").is_ok());
        assert!(guard.validate_table_access("orders").is_err());
    }

    #[test]
    fn invalid_identifier_is_rejected() {
        let cfg = config();
        let guard = Guard::new(&cfg);
        assert!(guard.validate_table_access("users; DROP TABLE x").is_err());
        assert!(guard.validate_table_access(&"a".repeat(65)).is_err());
    }

    #[test]
    fn is_safe_path_rejects_traversal_and_encoded_traversal() {
        assert!(!is_safe_path("../etc/passwd"));
        assert!(!is_safe_path("%2e%2e/etc/passwd"));
        assert!(!is_safe_path("/etc/passwd"));
        assert!(!is_safe_path("C:\\Windows"));
        assert!(!is_safe_path("\\\\server\\share"));
        assert!(is_safe_path("reports/2024/summary.csv"));
    }

    #[test]
    fn is_safe_command_rejects_shell_metacharacters() {
        assert!(!is_safe_command("ls; rm -rf /"));
        assert!(!is_safe_command("echo $(whoami)"));
        assert!(is_safe_command("plain-value_123"));
    }

    #[test]
    fn strip_comments_keeps_estimator_input_clean() {
        let sql = "UPDATE users SET x=1 -- comment\n/* block */ WHERE id=1";
        let stripped = strip_comments_for_estimator(sql);
        assert!(!stripped.contains("--"));
        assert!(!stripped.contains("/*"));
        assert_eq!(stripped, "UPDATE USERS SET X=1 WHERE ID=1");
    }

    #[test]
    fn guard_sees_original_text_not_stripped_text() {
        // Comment-based obfuscation must still be caught by the guard,
        // which validates the raw string, not the stripped one.
        let cfg = config();
        let guard = Guard::new(&cfg);
        assert!(guard.validate("SELECT * FROM t WHERE 1=1/**/--").is_err());
    }
}
