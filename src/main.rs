//! DB Broker - Main entry point.
//!
//! This process provides MCP (Model Context Protocol) tools for AI assistants
//! to interact with SQLite/PostgreSQL/MySQL/MongoDB/Redis backends through a
//! uniform set of introspection and query tools.

use clap::Parser;
use db_broker::config::{Config, TransportMode};
use db_broker::db::audit::AuditLog;
use db_broker::db::pool::ConnectionManager;
use db_broker::db::retry::{RetryConfig, RetryHandler};
use db_broker::handler::Handler;
use db_broker::transport::{HttpTransport, StdioTransport, Transport};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging (spec.md §6:
/// "a boolean environment variable selects debug-level logging").
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();
    init_tracing(&config);

    let connections = config.load_connections().map_err(|e| {
        eprintln!("Error: {e}");
        eprintln!();
        eprintln!("Usage: db-broker --config <connections.yaml>");
        eprintln!("       db-broker --database <connection_string>");
        eprintln!("       db-broker --database <id>=<connection_string>");
        eprintln!("       db-broker --database <connection_string>?writable=true");
        e
    })?;

    info!(
        transport = %config.transport,
        count = connections.len(),
        "Starting DB broker v{}",
        env!("CARGO_PKG_VERSION")
    );

    let pool = Arc::new(ConnectionManager::new(connections, config.connect_timeout_duration()));
    let audit = Arc::new(AuditLog::new(config.audit_log_path()));
    let retry = RetryHandler::new(RetryConfig::default());
    let handler = Arc::new(Handler::new(pool, audit, retry, config.query_timeout_duration()));

    let result = match config.transport {
        TransportMode::Stdio => {
            info!("Using stdio transport");
            let transport = StdioTransport::new(handler);
            transport.run().await
        }
        TransportMode::Http => {
            info!(
                host = %config.http_host,
                port = config.http_port,
                endpoint = %config.mcp_endpoint,
                "Using HTTP transport"
            );
            let transport = HttpTransport::new(handler, &config.http_host, config.http_port, &config.mcp_endpoint);
            transport.run().await
        }
    };

    if let Err(e) = result {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
