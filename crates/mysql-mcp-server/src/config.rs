//! Environment-variable configuration, loaded once at process start.
//!
//! Resolution order per variable: process environment first, then a `.env`
//! file (simple `KEY=VALUE`, no shell interpolation) in the current working
//! directory, then the variable's default. Never panics.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use mysql_mcp_error::ConfigError;

/// The raw environment-variable surface, resolved and validated once.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `DB_TYPE`.
    pub db_type: String,
    /// `MYSQL_HOST`.
    pub host: String,
    /// `MYSQL_PORT`.
    pub port: u16,
    /// `MYSQL_USER`.
    pub user: String,
    /// `MYSQL_PASSWORD`.
    pub password: String,
    /// `MYSQL_DATABASE`.
    pub database: String,
    /// `LOG_PATH`, already validated against the allowed-directory rule.
    pub log_path: PathBuf,
    /// `ALLOWED_TABLES`, comma-split.
    pub allowed_tables: Vec<String>,
    /// `ALLOW_DDL`.
    pub allow_ddl: bool,
    /// `SAFETY_KEY`.
    pub safety_key: String,
    /// `MAX_SAFE_ROWS`.
    pub max_safe_rows: u64,
}

const DEFAULT_LOG_FILE: &str = "mysql-mcp.log";

impl ServerConfig {
    /// Resolve the full environment-variable surface.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if `MYSQL_PORT`/`MAX_SAFE_ROWS` are present
    /// but not numeric, or if `LOG_PATH` cannot be made writable even after
    /// falling back to the default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let dotenv = read_dotenv_file(Path::new(".env"));
        let get = |name: &str| lookup(name, &dotenv);

        let db_type = get("DB_TYPE").unwrap_or_else(|| "mariadb".to_string());
        let host = get("MYSQL_HOST").unwrap_or_default();
        let port = match get("MYSQL_PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|_| ConfigError::InvalidValue {
                name: "MYSQL_PORT".to_string(),
                value: raw,
            })?,
            None => 3306,
        };
        let user = get("MYSQL_USER").unwrap_or_default();
        let password = get("MYSQL_PASSWORD").unwrap_or_default();
        let database = get("MYSQL_DATABASE").unwrap_or_default();

        let allowed_tables = match get("ALLOWED_TABLES") {
            Some(raw) if !raw.trim().is_empty() => {
                raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
            }
            _ => Vec::new(),
        };
        let allow_ddl = get("ALLOW_DDL").is_some_and(|v| v.eq_ignore_ascii_case("true"));
        let safety_key = get("SAFETY_KEY").unwrap_or_else(|| "PRODUCTION_CONFIRMED_2025".to_string());
        let max_safe_rows = match get("MAX_SAFE_ROWS") {
            Some(raw) => raw.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                name: "MAX_SAFE_ROWS".to_string(),
                value: raw,
            })?,
            None => 100,
        };

        let requested_log_path = get("LOG_PATH").unwrap_or_else(|| DEFAULT_LOG_FILE.to_string());
        let log_path = resolve_log_path(&requested_log_path)?;

        Ok(Self {
            db_type,
            host,
            port,
            user,
            password,
            database,
            log_path,
            allowed_tables,
            allow_ddl,
            safety_key,
            max_safe_rows,
        })
    }
}

/// Accept `path` if it resolves inside the current working directory, the
/// system temp directory, or (non-Windows) `/var/log`; otherwise fall back
/// to [`DEFAULT_LOG_FILE`] in the current directory. Returns an error only
/// if even the fallback can't be created.
fn resolve_log_path(path: &str) -> Result<PathBuf, ConfigError> {
    let candidate = PathBuf::from(path);
    if is_allowed_log_directory(&candidate) && touch(&candidate).is_ok() {
        return Ok(candidate);
    }

    let fallback = PathBuf::from(DEFAULT_LOG_FILE);
    if touch(&fallback).is_ok() {
        return Ok(fallback);
    }

    Err(ConfigError::LogPathUnwritable { path: path.to_string() })
}

fn is_allowed_log_directory(path: &Path) -> bool {
    let cwd = std::env::current_dir().unwrap_or_default();
    let temp = std::env::temp_dir();

    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    match dir {
        None => true, // bare filename resolves inside CWD
        Some(dir) => {
            let absolute = if dir.is_absolute() { dir.to_path_buf() } else { cwd.join(dir) };
            absolute.starts_with(&cwd)
                || absolute.starts_with(&temp)
                || (cfg!(not(windows)) && absolute.starts_with("/var/log"))
        }
    }
}

fn touch(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        std::fs::OpenOptions::new().create(true).append(true).mode(0o600).open(path)?;
    }
    #[cfg(not(unix))]
    {
        std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    }
    Ok(())
}

fn lookup(name: &str, dotenv: &HashMap<String, String>) -> Option<String> {
    std::env::var(name).ok().or_else(|| dotenv.get(name).cloned())
}

/// Parse a `.env` file. Missing file is not an error; lines that aren't
/// `KEY=VALUE` (after trimming and stripping `#` comments) are skipped.
fn read_dotenv_file(path: &Path) -> HashMap<String, String> {
    let mut values = HashMap::new();
    let Ok(content) = std::fs::read_to_string(path) else {
        return values;
    };
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            let mut value = value.trim().to_string();
            if (value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\''))
            {
                if value.len() >= 2 {
                    value = value[1..value.len() - 1].to_string();
                }
            }
            if !key.is_empty() {
                values.insert(key.to_string(), value);
            }
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotenv_parses_simple_assignments_and_skips_comments() {
        let dir = std::env::temp_dir().join(format!("mysql-mcp-test-dotenv-{}", std::process::id()));
        std::fs::write(&dir, "# comment\nFOO=bar\nBAZ=\"quoted\"\n\nMALFORMED\n").expect("write temp .env");
        let parsed = read_dotenv_file(&dir);
        assert_eq!(parsed.get("FOO").map(String::as_str), Some("bar"));
        assert_eq!(parsed.get("BAZ").map(String::as_str), Some("quoted"));
        assert!(!parsed.contains_key("MALFORMED"));
        let _ = std::fs::remove_file(&dir);
    }

    #[test]
    fn missing_dotenv_file_yields_empty_map() {
        let parsed = read_dotenv_file(Path::new("/definitely/not/a/real/path/.env"));
        assert!(parsed.is_empty());
    }

    #[test]
    fn bare_filename_is_an_allowed_log_directory() {
        assert!(is_allowed_log_directory(Path::new("mysql-mcp.log")));
    }

    #[test]
    fn absolute_path_outside_allowed_directories_is_rejected() {
        assert!(!is_allowed_log_directory(Path::new("/etc/mysql-mcp.log")));
    }
}
