use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Address the RPC server binds to.
    pub listen_addr: String,
    pub listen_port: u16,
    /// MySQL host every session connection is dialed against.
    pub mysql_addr: String,
    pub mysql_port: u16,
    /// Dial the backend without a password, ignoring the caller's secret.
    pub mysql_no_pass: bool,
    /// Idle time after which a checked-in connection is closed.
    pub mysql_idle_timeout_ms: u64,
    /// Maximum rows a single query may return.
    pub mysql_max_rows: usize,
    /// Database new sessions are bound to.
    pub mysql_dbname: String,
    /// Port for the raw MySQL TCP passthrough; unset or 0 disables it.
    pub mysql_listen_port: Option<u16>,
    /// Optional per-query execution deadline.
    pub query_timeout_ms: Option<u64>,
    /// Port for the JSON status endpoint; unset disables it.
    pub status_port: Option<u16>,
    pub log_level: String,
    /// Log format: "compact" or "json".
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1".to_string(),
            listen_port: 8080,
            mysql_addr: "127.0.0.1".to_string(),
            mysql_port: 3306,
            mysql_no_pass: false,
            mysql_idle_timeout_ms: 10_000,
            mysql_max_rows: 1000,
            mysql_dbname: "mysql".to_string(),
            mysql_listen_port: None,
            query_timeout_ms: None,
            status_port: None,
            log_level: "debug".to_string(),
            log_format: "compact".to_string(),
        }
    }
}

/// Command-line flags. Any flag given overrides the environment.
#[derive(Debug, Default, Parser)]
#[command(name = "psdb-sim", version, about = "Local simulator of the psdb gateway in front of MySQL")]
pub struct ConfigOverrides {
    #[arg(long)]
    pub listen_addr: Option<String>,
    #[arg(long)]
    pub listen_port: Option<u16>,
    #[arg(long)]
    pub mysql_addr: Option<String>,
    #[arg(long)]
    pub mysql_port: Option<u16>,
    #[arg(long)]
    pub mysql_no_pass: bool,
    #[arg(long)]
    pub mysql_idle_timeout_ms: Option<u64>,
    #[arg(long)]
    pub mysql_max_rows: Option<usize>,
    #[arg(long)]
    pub mysql_dbname: Option<String>,
    #[arg(long)]
    pub mysql_listen_port: Option<u16>,
    #[arg(long)]
    pub log_level: Option<String>,
    #[arg(long)]
    pub log_format: Option<String>,
    #[arg(long)]
    pub status_port: Option<u16>,
    #[arg(long)]
    pub query_timeout_ms: Option<u64>,
}

impl ServerConfig {
    pub fn load(overrides: &ConfigOverrides) -> anyhow::Result<Self> {
        let defaults_json = serde_json::to_string(&Self::default())
            .with_context(|| "failed to serialize defaults")?;
        let int = |v: Option<u64>| v.map(|v| v as i64);
        let settings = config::Config::builder()
            .add_source(
                config::File::from_str(&defaults_json, config::FileFormat::Json).required(false),
            )
            .add_source(config::Environment::with_prefix("PSDB_SIM"))
            .set_override_option("listen_addr", overrides.listen_addr.clone())?
            .set_override_option("listen_port", int(overrides.listen_port.map(u64::from)))?
            .set_override_option("mysql_addr", overrides.mysql_addr.clone())?
            .set_override_option("mysql_port", int(overrides.mysql_port.map(u64::from)))?
            .set_override_option("mysql_no_pass", overrides.mysql_no_pass.then_some(true))?
            .set_override_option("mysql_idle_timeout_ms", int(overrides.mysql_idle_timeout_ms))?
            .set_override_option(
                "mysql_max_rows",
                int(overrides.mysql_max_rows.map(|v| v as u64)),
            )?
            .set_override_option("mysql_dbname", overrides.mysql_dbname.clone())?
            .set_override_option(
                "mysql_listen_port",
                int(overrides.mysql_listen_port.map(u64::from)),
            )?
            .set_override_option("log_level", overrides.log_level.clone())?
            .set_override_option("log_format", overrides.log_format.clone())?
            .set_override_option("status_port", int(overrides.status_port.map(u64::from)))?
            .set_override_option("query_timeout_ms", int(overrides.query_timeout_ms))?
            .build()
            .with_context(|| "failed to load configuration")?;
        let cfg: ServerConfig = settings
            .try_deserialize()
            .with_context(|| "failed to deserialize configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        resolve(&self.listen_addr, self.listen_port)
    }

    /// `host:port` of the MySQL backend.
    pub fn backend_addr(&self) -> String {
        format!("{}:{}", self.mysql_addr, self.mysql_port)
    }

    pub fn proxy_addr(&self) -> anyhow::Result<Option<SocketAddr>> {
        match self.mysql_listen_port.filter(|port| *port > 0) {
            Some(port) => resolve(&self.listen_addr, port).map(Some),
            None => Ok(None),
        }
    }

    pub fn status_addr(&self) -> anyhow::Result<Option<SocketAddr>> {
        match self.status_port {
            Some(port) => resolve(&self.listen_addr, port).map(Some),
            None => Ok(None),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.mysql_idle_timeout_ms)
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.mysql_idle_timeout_ms == 0 {
            anyhow::bail!("mysql_idle_timeout_ms must be greater than zero");
        }
        if self.mysql_max_rows == 0 {
            anyhow::bail!("mysql_max_rows must be greater than zero");
        }
        if !matches!(self.log_format.as_str(), "compact" | "json") {
            anyhow::bail!("log_format must be \"compact\" or \"json\", got {:?}", self.log_format);
        }
        Ok(())
    }
}

fn resolve(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    let addr = format!("{host}:{port}");
    addr.to_socket_addrs()?
        .next()
        .ok_or_else(|| anyhow::anyhow!("unable to resolve address for {addr}"))
}
