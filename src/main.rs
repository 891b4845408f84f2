use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use psdb_sim::backend::MysqlDialer;
use psdb_sim::config::{ConfigOverrides, ServerConfig};
use psdb_sim::pool::ConnectionPool;
use psdb_sim::proto::psdb::v1alpha1::database_server::DatabaseServer;
use psdb_sim::service::DatabaseService;
use psdb_sim::{proxy, status};
use tonic::transport::Server;

use tracing::info;
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let overrides = ConfigOverrides::parse();
    let config = ServerConfig::load(&overrides).context("failed to load configuration")?;
    init_tracing(&config);
    info!("service config:\n{:?}", config);
    let addr = config
        .bind_addr()
        .context("failed to resolve bind address")?;

    let dialer = Arc::new(MysqlDialer::from_config(&config));
    let pool = ConnectionPool::new(dialer, config.idle_timeout());

    if let Some(proxy_addr) = config.proxy_addr().context("failed to resolve proxy address")? {
        proxy::spawn_tcp_proxy(proxy_addr, config.backend_addr())
            .await
            .context("failed to start MySQL proxy")?;
    }
    if let Some(status_addr) = config
        .status_addr()
        .context("failed to resolve status address")?
    {
        status::spawn_status_server(status_addr, pool.clone());
    }

    let database_service = DatabaseService::new(pool, &config);

    let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<DatabaseServer<DatabaseService>>()
        .await;

    info!(%addr, mysql = %config.backend_addr(), "starting psdb simulator");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("received SIGINT, initiating graceful shutdown");
            }
            _ = terminate => {
                info!("received SIGTERM, initiating graceful shutdown");
            }
        }

        health_reporter
            .set_not_serving::<DatabaseServer<DatabaseService>>()
            .await;

        let _ = shutdown_tx.send(());
    });

    Server::builder()
        .add_service(health_service)
        .add_service(database_service.into_server())
        .serve_with_shutdown(addr, async {
            shutdown_rx.await.ok();
        })
        .await
        .context("gateway server terminated unexpectedly")?;

    info!("server shutdown complete");
    Ok(())
}

fn init_tracing(config: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("debug"));

    if config.log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::CLOSE)
            .init();
    } else {
        tracing_subscriber::fmt()
            .compact()
            .with_env_filter(filter)
            .with_target(false)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::CLOSE)
            .init();
    }
}
