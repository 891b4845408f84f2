use std::time::Duration;

use tonic::{Request, Status};
use tracing::{error, info, warn, Span};

use crate::auth::Credentials;
use crate::backend::ResultSet;
use crate::config::ServerConfig;
use crate::error::{BackendError, ServerError};
use crate::pool::{ConnectionPool, PoolKey, PooledConnection};
use crate::proto::psdb::v1alpha1::database_server::DatabaseServer;
use crate::session::Session;
use crate::sql::is_query_filtered;

mod convert;
mod handlers;
#[cfg(test)]
mod tests;

pub use convert::{to_wire_error, to_wire_result};

const AUTHORIZATION_HEADER: &str = "authorization";

/// gRPC front of the gateway: authenticates callers, routes each request to
/// its session's pooled connection and translates the outcome to wire form.
#[derive(Clone)]
pub struct DatabaseService {
    pool: ConnectionPool,
    default_database: String,
    max_rows: usize,
    query_timeout: Option<Duration>,
}

impl DatabaseService {
    pub fn new(pool: ConnectionPool, config: &ServerConfig) -> Self {
        Self {
            pool,
            default_database: config.mysql_dbname.clone(),
            max_rows: config.mysql_max_rows,
            query_timeout: config.query_timeout(),
        }
    }

    pub fn into_server(self) -> DatabaseServer<Self> {
        DatabaseServer::new(self)
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Extract credentials from request metadata and record the caller on
    /// the current span.
    pub(crate) fn authenticate<T>(request: &Request<T>) -> Result<Credentials, Status> {
        let header = request
            .metadata()
            .get(AUTHORIZATION_HEADER)
            .and_then(|value| value.to_str().ok());
        let credentials =
            Credentials::from_authorization(header).map_err(|err| Self::status_from_error(err.into()))?;
        Span::current().record("user", credentials.username());
        Ok(credentials)
    }

    /// Use the client's session, or synthesize one bound to the default
    /// database when the request carries none.
    pub(crate) fn resolve_session(&self, session: Option<Session>) -> Session {
        let client_session = session.is_some();
        let session = session.unwrap_or_else(|| Session::new(&self.default_database));
        let span = Span::current();
        span.record("session_id", session.identity());
        span.record("client_session", client_session);
        session
    }

    pub(crate) async fn checkout(
        &self,
        credentials: &Credentials,
        session: &Session,
    ) -> Result<PooledConnection, Status> {
        let key = PoolKey::new(credentials, session.target(), session.identity());
        self.pool.acquire(key).await.map_err(Self::status_from_error)
    }

    /// Run one query on a checked-out connection, honoring the gateway-only
    /// filter and the configured deadline.
    pub(crate) async fn run_query(
        &self,
        conn: &mut PooledConnection,
        query: &str,
    ) -> Result<ResultSet, BackendError> {
        if is_query_filtered(query) {
            info!(query, "ignored");
            return Ok(ResultSet::default());
        }

        let outcome = match self.query_timeout {
            Some(limit) => tokio::time::timeout(limit, conn.execute(query, self.max_rows))
                .await
                .unwrap_or_else(|_| {
                    Err(BackendError::DeadlineExceeded(format!(
                        "query exceeded timeout of {}ms",
                        limit.as_millis()
                    )))
                }),
            None => conn.execute(query, self.max_rows).await,
        };
        match &outcome {
            Ok(_) => info!("ok"),
            Err(err) => warn!(error = %err, "query failed"),
        }
        outcome
    }

    pub(crate) fn status_from_error(err: ServerError) -> Status {
        match err {
            ServerError::Unauthenticated(e) => {
                error!(error = %e, "unauthenticated");
                Status::unauthenticated(e.to_string())
            }
            ServerError::SessionInUse(session_id) => {
                warn!(%session_id, "session already in use");
                Status::permission_denied(format!("session already in use: {session_id}"))
            }
            ServerError::Backend(BackendError::AccessDenied(msg)) => {
                error!(error = %msg, "unauthenticated");
                Status::unauthenticated(msg)
            }
            ServerError::Backend(e @ BackendError::Connection(_)) => {
                error!(error = %e, "failed to connect");
                Status::unavailable(e.to_string())
            }
            ServerError::Backend(e) => {
                error!(error = %e, "failed to connect");
                Status::unknown(e.to_string())
            }
        }
    }
}
