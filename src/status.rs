use std::net::SocketAddr;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::pool::{ConnectionPool, PoolSnapshot};

#[derive(Debug, Serialize)]
pub struct StatusPayload {
    pub generated_at_ms: u64,
    pub pool: PoolSnapshot,
}

pub fn router(pool: ConnectionPool) -> Router {
    Router::new()
        .route("/status.json", get(status_json))
        .with_state(pool)
}

pub fn spawn_status_server(addr: SocketAddr, pool: ConnectionPool) {
    let app = router(pool);

    tokio::spawn(async move {
        match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => {
                if let Err(err) = axum::serve(listener, app).await {
                    tracing::error!(%err, "status server failed");
                }
            }
            Err(err) => {
                tracing::error!(%err, "status server bind failed");
            }
        }
    });

    tracing::info!(%addr, "status server listening");
}

async fn status_json(State(pool): State<ConnectionPool>) -> Json<StatusPayload> {
    Json(StatusPayload {
        generated_at_ms: now_millis(),
        pool: pool.snapshot(),
    })
}

fn now_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
