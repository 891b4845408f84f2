//! Raw MySQL wire passthrough for clients that speak the MySQL protocol
//! directly.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::copy_bidirectional;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, Instrument};

/// Bind `listen` and relay every accepted connection to `upstream`.
pub async fn spawn_tcp_proxy(listen: SocketAddr, upstream: String) -> Result<JoinHandle<()>> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind MySQL proxy on {listen}"))?;
    let local = listener.local_addr().unwrap_or(listen);
    info!(listen = %local, %upstream, "running MySQL proxy");
    Ok(tokio::spawn(accept_loop(listener, Arc::from(upstream))))
}

async fn accept_loop(listener: TcpListener, upstream: Arc<str>) {
    loop {
        match listener.accept().await {
            Ok((client, peer)) => {
                let span = info_span!("mysql_proxy", %peer);
                tokio::spawn(relay(client, upstream.clone()).instrument(span));
            }
            Err(err) => error!(%err, "failed to accept TCP connection"),
        }
    }
}

async fn relay(mut client: TcpStream, upstream: Arc<str>) {
    let started = Instant::now();
    info!("new MySQL connection");

    let mut server = match TcpStream::connect(&*upstream).await {
        Ok(server) => server,
        Err(err) => {
            error!(%err, "failed to connect to MySQL");
            return;
        }
    };

    match copy_bidirectional(&mut client, &mut server).await {
        Ok((to_server, to_client)) => debug!(to_server, to_client, "relay finished"),
        Err(err) => debug!(%err, "relay interrupted"),
    }
    info!(elapsed_ms = started.elapsed().as_millis() as u64, "client disconnected");
}
