//! `mysql-mcp-server` binary: exposes a MySQL/MariaDB database as JSON-RPC
//! 2.0 tool invocations over stdio.

mod config;
mod protocol;
mod tools;
mod transport;

use std::sync::Arc;

use mysql_mcp_core::audit::{self, AuditContext, FileSink};
use mysql_mcp_core::{ClientConfig, CompatibilityProfile, RateLimitConfig, SecureClient, SecurityConfig, TimeoutConfig};
use mysql_mcp_error::RuntimeError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mysql_mcp_server=info,mysql_mcp_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("mysql-mcp-server v{}", env!("CARGO_PKG_VERSION"));

    match run().await {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::error!(error = %e, "fatal startup error");
            std::process::exit(1);
        }
    }
}

async fn run() -> Result<(), RuntimeError> {
    let server_config = ServerConfig::from_env()?;
    tracing::info!(
        backend = %server_config.db_type,
        log_path = %server_config.log_path.display(),
        "configuration resolved"
    );

    let sink = FileSink::open(&server_config.log_path)
        .map_err(|e| RuntimeError::Internal { message: format!("audit log open failed: {e}") })?;
    let audit = audit::with_sink(AuditContext::new(), Arc::new(sink));

    let compat = CompatibilityProfile::resolve(&server_config.db_type);
    let dsn = compat.build_dsn(
        &server_config.user,
        &server_config.password,
        &server_config.host,
        server_config.port,
        &server_config.database,
    );

    let security = SecurityConfig {
        safety_key: server_config.safety_key.clone(),
        max_safe_rows: server_config.max_safe_rows,
        allowed_tables: server_config.allowed_tables.clone(),
        block_ddl: !server_config.allow_ddl,
        block_dangerous: true,
    };

    let client_config = ClientConfig {
        compat,
        timeouts: TimeoutConfig::default(),
        rate_limits: RateLimitConfig::default(),
        security,
    };

    let client = SecureClient::connect(&dsn, client_config, audit).await?;
    tracing::info!("connection pool established, entering stdio loop");

    transport::run(Arc::new(client))
        .await
        .map_err(|e| RuntimeError::Internal { message: format!("transport I/O error: {e}") })?;

    tracing::info!("stdin closed, shutting down");
    Ok(())
}
