//! Confirmation-key protocol and row-impact estimator (C7).
//!
//! Applies to `execute` (INSERT/UPDATE/DELETE) and `execute_ddl`
//! (CREATE/DROP/ALTER/TRUNCATE). The estimator is syntactic and pessimistic;
//! it never touches the database (see design notes: a `COUNT(*)` preflight
//! would double round-trips and isn't serialisable with the main statement).

use crate::config::SecurityConfig;
use crate::guard::strip_comments_for_estimator;

/// The class of operation being gated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationClass {
    /// INSERT/UPDATE/DELETE.
    Write,
    /// CREATE/DROP/ALTER/TRUNCATE.
    Ddl,
}

/// Why [`Gate::check`] refused an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    /// `DROP DATABASE`/`DROP SCHEMA`: refused regardless of `confirm_key`.
    UnconditionallyRefused,
    /// Confirmation was required and `confirm_key` was missing or wrong.
    ConfirmationRequired,
}

impl std::fmt::Display for GateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnconditionallyRefused => write!(f, "operation is unconditionally refused"),
            Self::ConfirmationRequired => write!(f, "confirmation required"),
        }
    }
}

impl std::error::Error for GateError {}

/// Estimate the number of rows a (possibly multi-statement) SQL string would
/// affect, never by querying the database.
///
/// Strips comments, uppercases, splits on `;`; for each non-empty statement:
/// `UPDATE`/`DELETE` without ` WHERE ` → `max_safe_rows + 1`; `INSERT` →
/// `1 + count("),(")`; statements containing ` IN (` → comma count within
/// the first `()` group; otherwise → 1. The final estimate is the max over
/// all statements, minimum 1.
#[must_use]
pub fn estimate_row_impact(sql: &str, max_safe_rows: u64) -> u64 {
    let stripped = strip_comments_for_estimator(sql);
    let mut estimate = 1u64;

    for statement in stripped.split(';') {
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }
        let this_estimate = if (statement.starts_with("UPDATE") || statement.starts_with("DELETE"))
            && !statement.contains(" WHERE ")
        {
            max_safe_rows + 1
        } else if statement.starts_with("INSERT") {
            1 + statement.matches("),(").count() as u64
        } else if statement.contains(" IN (") {
            count_in_clause_commas(statement)
        } else {
            1
        };
        estimate = estimate.max(this_estimate);
    }

    estimate.max(1)
}

fn count_in_clause_commas(statement: &str) -> u64 {
    let Some(start) = statement.find('(') else {
        return 1;
    };
    let rest = &statement[start + 1..];
    let Some(end) = rest.find(')') else {
        return 1;
    };
    let group = &rest[..end];
    1 + group.matches(',').count() as u64
}

/// Whether `sql` (uppercased, comment-stripped) is an unconditionally
/// refused `DROP DATABASE`/`DROP SCHEMA` statement.
#[must_use]
pub fn is_unconditionally_refused(sql: &str) -> bool {
    let stripped = strip_comments_for_estimator(sql);
    stripped.contains("DROP DATABASE") || stripped.contains("DROP SCHEMA")
}

/// Constant-time comparison, closing a timing side-channel on the shared
/// secret. `safety_key` is a tripwire, not a cryptographic credential, but
/// the comparison costs nothing to harden.
#[must_use]
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// The confirmation-key and row-impact gate.
pub struct Gate<'a> {
    config: &'a SecurityConfig,
}

impl<'a> Gate<'a> {
    /// Borrow the active security config.
    #[must_use]
    pub const fn new(config: &'a SecurityConfig) -> Self {
        Self { config }
    }

    /// Apply the decision table to `sql` for the given operation class,
    /// checking `confirm_key` when an estimate or class requires it.
    pub fn check(&self, sql: &str, class: OperationClass, confirm_key: Option<&str>) -> Result<u64, GateError> {
        if is_unconditionally_refused(sql) {
            return Err(GateError::UnconditionallyRefused);
        }

        let estimate = estimate_row_impact(sql, self.config.max_safe_rows);
        let requires_confirmation = match class {
            OperationClass::Ddl => true,
            OperationClass::Write => estimate > self.config.max_safe_rows,
        };

        if !requires_confirmation {
            return Ok(estimate);
        }

        let provided = confirm_key.unwrap_or_default();
        if constant_time_eq(provided.as_bytes(), self.config.safety_key.as_bytes()) {
            Ok(estimate)
        } else {
            Err(GateError::ConfirmationRequired)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SecurityConfig {
        SecurityConfig {
            safety_key: "secret".to_string(),
            max_safe_rows: 100,
            ..SecurityConfig::default()
        }
    }

    #[test]
    fn update_without_where_forces_confirmation() {
        let estimate = estimate_row_impact("UPDATE users SET status='x'", 100);
        assert_eq!(estimate, 101);
    }

    #[test]
    fn delete_with_where_is_conservative_estimate_of_one() {
        let estimate = estimate_row_impact("DELETE FROM users WHERE id = 1", 100);
        assert_eq!(estimate, 1);
    }

    #[test]
    fn insert_multi_row_counts_value_groups() {
        let estimate = estimate_row_impact("INSERT INTO t VALUES (1),(2),(3)", 100);
        assert_eq!(estimate, 3);
    }

    #[test]
    fn in_clause_counts_commas_in_first_group() {
        let estimate = estimate_row_impact("DELETE FROM t WHERE id IN (1,2,3,4) ", 100);
        // Contains " WHERE " so the UPDATE/DELETE branch doesn't apply;
        // falls through to the IN-clause branch: 4 items -> 3 commas + 1.
        assert_eq!(estimate, 4);
    }

    #[test]
    fn estimate_never_falls_below_one() {
        assert_eq!(estimate_row_impact("SELECT 1", 100), 1);
        assert_eq!(estimate_row_impact("", 100), 1);
    }

    #[test]
    fn boundary_exactly_max_safe_rows_does_not_require_confirmation() {
        let cfg = config();
        let gate = Gate::new(&cfg);
        // 100 value groups (estimate 100) must not require confirmation.
        let values: Vec<String> = (0..100).map(|i| format!("({i})")).collect();
        let sql = format!("INSERT INTO t VALUES {}", values.join(","));
        assert!(gate.check(&sql, OperationClass::Write, None).is_ok());
    }

    #[test]
    fn boundary_one_over_max_safe_rows_requires_confirmation() {
        let cfg = config();
        let gate = Gate::new(&cfg);
        let values: Vec<String> = (0..101).map(|i| format!("({i})")).collect();
        let sql = format!("INSERT INTO t VALUES {}", values.join(","));
        assert_eq!(gate.check(&sql, OperationClass::Write, None), Err(GateError::ConfirmationRequired));
        assert!(gate.check(&sql, OperationClass::Write, Some("secret")).is_ok());
    }

    #[test]
    fn ddl_always_requires_confirmation_even_for_small_estimate() {
        let cfg = config();
        let gate = Gate::new(&cfg);
        assert_eq!(
            gate.check("CREATE TABLE t (id INT)", OperationClass::Ddl, None),
            Err(GateError::ConfirmationRequired)
        );
        assert!(gate.check("CREATE TABLE t (id INT)", OperationClass::Ddl, Some("secret")).is_ok());
    }

    #[test]
    fn wrong_confirm_key_is_rejected() {
        let cfg = config();
        let gate = Gate::new(&cfg);
        assert_eq!(
            gate.check("CREATE TABLE t (id INT)", OperationClass::Ddl, Some("wrong")),
            Err(GateError::ConfirmationRequired)
        );
    }

    #[test]
    fn drop_database_is_unconditionally_refused() {
        let cfg = config();
        let gate = Gate::new(&cfg);
        assert_eq!(
            gate.check("DROP DATABASE prod", OperationClass::Ddl, Some("secret")),
            Err(GateError::UnconditionallyRefused)
        );
        assert_eq!(
            gate.check("DROP SCHEMA prod", OperationClass::Ddl, Some("secret")),
            Err(GateError::UnconditionallyRefused)
        );
    }
}
