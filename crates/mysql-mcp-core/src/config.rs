//! Security configuration shared by the Guard (C6), Gate (C7), and Secure
//! Database Client (C8). Loaded at construction, immutable at runtime.

/// `{safety_key, max_safe_rows, allowed_tables, block_ddl, block_dangerous}`.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// Shared secret a caller must echo back as `confirm_key` on dangerous
    /// operations. Not a cryptographic credential — see design notes.
    pub safety_key: String,
    /// Row-impact threshold above which a write requires confirmation.
    pub max_safe_rows: u64,
    /// Table whitelist; empty means "permit all".
    pub allowed_tables: Vec<String>,
    /// Whether the DDL gate in the Guard is active.
    pub block_ddl: bool,
    /// Always `true`; kept as a field for parity with the data model rather
    /// than a bare constant, so callers can still observe it via the config
    /// value they already hold.
    pub block_dangerous: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            safety_key: "PRODUCTION_CONFIRMED_2025".to_string(),
            max_safe_rows: 100,
            allowed_tables: Vec::new(),
            block_ddl: true,
            block_dangerous: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_environment_variable_defaults() {
        let cfg = SecurityConfig::default();
        assert_eq!(cfg.safety_key, "PRODUCTION_CONFIRMED_2025");
        assert_eq!(cfg.max_safe_rows, 100);
        assert!(cfg.allowed_tables.is_empty());
        assert!(cfg.block_dangerous);
    }
}
