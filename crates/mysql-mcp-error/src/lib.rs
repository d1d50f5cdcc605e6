//! Error types shared by the `mysql-mcp` workspace.
//!
//! [`RuntimeError`] covers the startup path — configuration resolution and
//! pool construction — that runs before a [`SanitizedError`] exists to carry
//! the failure. Everything past startup produces a `SanitizedError` instead
//! (see `mysql-mcp-core::sanitize`).

/// Configuration resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable was absent and has no default.
    #[error("missing required environment variable: {name}")]
    MissingEnvVar {
        /// The variable name, e.g. `MYSQL_HOST`.
        name: String,
    },
    /// An environment variable was present but could not be parsed.
    #[error("invalid value for {name}: {value}")]
    InvalidValue {
        /// The variable name.
        name: String,
        /// The raw value that failed to parse.
        value: String,
    },
    /// `LOG_PATH` did not resolve inside an allowed directory and no fallback
    /// location was writable either.
    #[error("log path {path} is not writable and no fallback succeeded")]
    LogPathUnwritable {
        /// The path that could not be opened.
        path: String,
    },
}

impl ConfigError {
    /// Stable error code for this variant, independent of message text.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::MissingEnvVar { .. } => "ERR_CONFIG_MISSING_VAR",
            Self::InvalidValue { .. } => "ERR_CONFIG_INVALID_VALUE",
            Self::LogPathUnwritable { .. } => "ERR_CONFIG_LOG_PATH",
        }
    }
}

/// Top-level error returned by the binary's startup path.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Configuration could not be resolved.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The connection pool could not be constructed.
    #[error("database pool error: {0}")]
    Pool(#[from] sqlx::Error),
    /// Anything else that doesn't fit a more specific variant.
    #[error("internal error: {message}")]
    Internal {
        /// Free-form description; never shown to the MCP host, only logged.
        message: String,
    },
}

impl RuntimeError {
    /// Stable error code, mirroring the sanitiser's `ERR_<CATEGORY>` scheme.
    #[must_use]
    pub fn error_code(&self) -> String {
        match self {
            Self::Config(e) => e.error_code().to_string(),
            Self::Pool(_) => "ERR_SYSTEM_POOL".to_string(),
            Self::Internal { .. } => "ERR_INTERNAL".to_string(),
        }
    }
}

impl From<String> for RuntimeError {
    fn from(message: String) -> Self {
        Self::Internal { message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_codes_are_stable() {
        let err = ConfigError::MissingEnvVar {
            name: "MYSQL_HOST".to_string(),
        };
        assert_eq!(err.error_code(), "ERR_CONFIG_MISSING_VAR");
    }

    #[test]
    fn runtime_error_wraps_config_error() {
        let cfg = ConfigError::LogPathUnwritable {
            path: "/root/mysql-mcp.log".to_string(),
        };
        let runtime: RuntimeError = cfg.into();
        assert_eq!(runtime.error_code(), "ERR_CONFIG_LOG_PATH");
    }
}
