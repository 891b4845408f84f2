use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio_stream::StreamExt;
use tonic::{Code, Request};

use super::DatabaseService;
use crate::auth::Credentials;
use crate::backend::memory::MemoryDialer;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::pool::{ConnectionPool, PoolKey};
use crate::proto::psdb::v1alpha1::database_server::Database;
use crate::proto::psdb::v1alpha1::{
    CloseSessionRequest, CreateSessionRequest, ExecuteBatchRequest, ExecuteRequest,
    ExecuteResponse, PrepareRequest,
};
use crate::proto::vtrpc;
use crate::session::Session;

fn credentials() -> Credentials {
    Credentials::new("root", "pw")
}

fn service_with(dialer: &MemoryDialer, config: ServerConfig) -> DatabaseService {
    let pool = ConnectionPool::new(Arc::new(dialer.clone()), config.idle_timeout());
    DatabaseService::new(pool, &config)
}

fn service(dialer: &MemoryDialer) -> DatabaseService {
    service_with(dialer, ServerConfig::default())
}

fn authed<T>(message: T) -> Request<T> {
    let mut request = Request::new(message);
    let header = credentials().to_authorization();
    request
        .metadata_mut()
        .insert("authorization", header.parse().expect("ascii header"));
    request
}

async fn create_session(service: &DatabaseService) -> Result<Session> {
    let response = service
        .create_session(authed(CreateSessionRequest { session: None }))
        .await?
        .into_inner();
    response
        .session
        .ok_or_else(|| anyhow!("create session returned no session"))
}

async fn execute(service: &DatabaseService, session: Session, query: &str) -> Result<ExecuteResponse> {
    Ok(service
        .execute(authed(ExecuteRequest {
            session: Some(session),
            query: query.to_string(),
        }))
        .await?
        .into_inner())
}

fn first_cell(response: &ExecuteResponse) -> Option<Vec<u8>> {
    let row = response.result.as_ref()?.rows.first()?;
    Some(row.values.clone())
}

#[tokio::test]
async fn create_session_binds_default_database_and_pools_connection() -> Result<()> {
    let dialer = MemoryDialer::new();
    let service = service(&dialer);

    let response = service
        .create_session(authed(CreateSessionRequest { session: None }))
        .await?
        .into_inner();

    let session = response.session.expect("session");
    assert_eq!(session.target(), "mysql");
    assert!(!session.identity().is_empty());
    assert!(!response.branch.is_empty());
    let user = response.user.expect("user");
    assert_eq!(user.username, "root");
    assert_eq!(user.psid, "planetscale-1");

    let snapshot = service.pool().snapshot();
    assert_eq!(snapshot.total_connections, 1);
    assert_eq!(snapshot.checked_out, 0);
    assert_eq!(dialer.stats().queries(), vec!["USE `mysql`".to_string()]);
    Ok(())
}

#[tokio::test]
async fn missing_or_foreign_credentials_are_unauthenticated() -> Result<()> {
    let dialer = MemoryDialer::new();
    let service = service(&dialer);

    let status = service
        .execute(Request::new(ExecuteRequest {
            session: None,
            query: "SELECT 1".into(),
        }))
        .await
        .err()
        .ok_or_else(|| anyhow!("expected failure"))?;
    assert_eq!(status.code(), Code::Unauthenticated);

    let mut request = Request::new(CreateSessionRequest { session: None });
    request
        .metadata_mut()
        .insert("authorization", "Bearer token".parse()?);
    let status = service
        .create_session(request)
        .await
        .err()
        .ok_or_else(|| anyhow!("expected failure"))?;
    assert_eq!(status.code(), Code::Unauthenticated);
    assert_eq!(dialer.stats().dials(), 0);
    Ok(())
}

#[tokio::test]
async fn backend_access_denied_is_unauthenticated() -> Result<()> {
    let dialer = MemoryDialer::new().deny_user("root");
    let service = service(&dialer);

    let status = service
        .create_session(authed(CreateSessionRequest { session: None }))
        .await
        .err()
        .ok_or_else(|| anyhow!("expected failure"))?;
    assert_eq!(status.code(), Code::Unauthenticated);
    assert!(status.message().contains("Access denied"));
    Ok(())
}

#[tokio::test]
async fn concurrent_use_of_a_session_is_permission_denied() -> Result<()> {
    let dialer = MemoryDialer::new();
    let service = service(&dialer);
    let session = create_session(&service).await?;

    let key = PoolKey::new(&credentials(), session.target(), session.identity());
    let held = service.pool().acquire(key).await?;

    let status = execute(&service, session.clone(), "SELECT 1")
        .await
        .err()
        .and_then(|err| err.downcast::<tonic::Status>().ok())
        .ok_or_else(|| anyhow!("expected status error"))?;
    assert_eq!(status.code(), Code::PermissionDenied);
    assert_eq!(
        status.message(),
        format!("session already in use: {}", session.identity())
    );

    drop(held);
    assert!(execute(&service, session, "SELECT 1").await.is_ok());
    Ok(())
}

#[tokio::test]
async fn session_round_trip_tracks_counters() -> Result<()> {
    let dialer = MemoryDialer::new();
    let service = service(&dialer);
    let session = create_session(&service).await?;
    let identity = session.identity().to_string();

    let created = execute(&service, session, "CREATE TABLE t (id INT)").await?;
    assert!(created.error.is_none());
    let session = created.session.expect("session");

    let inserted = execute(&service, session, "INSERT INTO t VALUES (1)").await?;
    assert!(inserted.error.is_none());
    assert!(inserted.timing >= 0.0);
    let session = inserted.session.expect("session");
    let state = session.vitess_session.as_ref().expect("vitess session");
    assert_eq!(state.last_insert_id, 1);
    assert_eq!(state.row_count, 1);

    let closed = service
        .close_session(authed(CloseSessionRequest {
            session: Some(session),
        }))
        .await?
        .into_inner()
        .session
        .expect("session");
    assert_eq!(closed.identity(), identity);
    let state = closed.vitess_session.as_ref().expect("vitess session");
    assert_eq!(state.last_insert_id, 0);
    assert_eq!(state.row_count, 0);

    assert_eq!(service.pool().snapshot().total_connections, 0);
    assert_eq!(dialer.stats().closes(), 1);
    assert_eq!(dialer.stats().dials(), 1);
    Ok(())
}

#[tokio::test]
async fn execute_without_session_synthesizes_one() -> Result<()> {
    let dialer = MemoryDialer::new();
    let service = service(&dialer);

    let response = service
        .execute(authed(ExecuteRequest {
            session: None,
            query: "SELECT 7".into(),
        }))
        .await?
        .into_inner();
    let session = response.session.as_ref().expect("session");
    assert_eq!(session.target(), "mysql");
    assert!(!session.identity().is_empty());
    assert_eq!(first_cell(&response), Some(b"7".to_vec()));
    Ok(())
}

#[tokio::test]
async fn query_errors_travel_in_the_response() -> Result<()> {
    let dialer = MemoryDialer::new();
    let service = service(&dialer);
    let session = create_session(&service).await?;

    let response = execute(&service, session.clone(), "NOT VALID SQL").await?;
    let error = response.error.expect("embedded error");
    assert_eq!(error.code, vtrpc::Code::Unknown as i32);
    assert!(error.message.contains("errno 1064"));
    assert!(response.result.is_none());
    assert_eq!(
        response.session.as_ref().map(|s| s.identity()),
        Some(session.identity())
    );

    let session = response.session.expect("session");
    let response = execute(&service, session, "SELECT 5").await?;
    assert!(response.error.is_none());
    assert_eq!(first_cell(&response), Some(b"5".to_vec()));
    assert_eq!(dialer.stats().dials(), 1);
    assert_eq!(dialer.stats().closes(), 0);
    Ok(())
}

#[tokio::test]
async fn row_limit_is_enforced() -> Result<()> {
    let dialer = MemoryDialer::new();
    let config = ServerConfig {
        mysql_max_rows: 3,
        ..ServerConfig::default()
    };
    let service = service_with(&dialer, config);
    let session = create_session(&service).await?;

    let response = execute(&service, session, "SELECT * FROM seq").await?;
    let error = response.error.expect("embedded error");
    assert_eq!(error.message, "Row count exceeded 3");
    Ok(())
}

#[tokio::test]
async fn filtered_queries_never_reach_the_backend() -> Result<()> {
    let dialer = MemoryDialer::new();
    let service = service(&dialer);
    let session = create_session(&service).await?;

    for query in ["SET @@boost_cached_queries = true", "USE `app@replica`"] {
        let response = execute(&service, session.clone(), query).await?;
        assert!(response.error.is_none());
        let result = response.result.expect("empty result");
        assert!(result.rows.is_empty());
        assert!(result.fields.is_empty());
    }
    assert_eq!(dialer.stats().queries(), vec!["USE `mysql`".to_string()]);
    Ok(())
}

#[tokio::test]
async fn batch_continues_past_failures() -> Result<()> {
    let dialer = MemoryDialer::new();
    let service = service(&dialer);
    let session = create_session(&service).await?;

    let response = service
        .execute_batch(authed(ExecuteBatchRequest {
            session: Some(session),
            queries: vec![
                "INSERT INTO t VALUES (1)".into(),
                "SELECT 1".into(),
                "INVALID SQL".into(),
                "SELECT 2".into(),
            ],
        }))
        .await?
        .into_inner();

    assert_eq!(response.results.len(), 4);
    assert!(response.results[0].error.is_none());
    assert!(response.results[1].error.is_none());
    assert!(response.results[2].error.is_some());
    assert!(response.results[2].result.is_none());
    let last = response.results[3].result.as_ref().expect("result");
    assert_eq!(last.rows[0].values, b"2".to_vec());

    let state = response
        .session
        .as_ref()
        .and_then(|s| s.vitess_session.as_ref())
        .expect("vitess session");
    assert_eq!(state.found_rows, 1);
    assert_eq!(state.row_count, 0);
    assert_eq!(state.last_insert_id, 0);
    Ok(())
}

#[tokio::test]
async fn stream_execute_sends_the_response_twice() -> Result<()> {
    let dialer = MemoryDialer::new();
    let service = service(&dialer);
    let session = create_session(&service).await?;

    let stream = service
        .stream_execute(authed(ExecuteRequest {
            session: Some(session),
            query: "SELECT 5".into(),
        }))
        .await?
        .into_inner();
    let messages = stream
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;

    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0], messages[1]);
    assert_eq!(first_cell(&messages[0]), Some(b"5".to_vec()));

    tokio::task::yield_now().await;
    assert_eq!(service.pool().snapshot().checked_out, 0);
    Ok(())
}

#[tokio::test]
async fn transaction_state_follows_the_connection() -> Result<()> {
    let dialer = MemoryDialer::new();
    let service = service(&dialer);
    let session = create_session(&service).await?;

    let began = execute(&service, session, "BEGIN").await?;
    let session = began.session.expect("session");
    assert!(session.in_transaction());

    let committed = execute(&service, session, "COMMIT").await?;
    assert!(!committed.session.expect("session").in_transaction());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn slow_queries_hit_the_deadline() -> Result<()> {
    let dialer = MemoryDialer::new();
    let config = ServerConfig {
        query_timeout_ms: Some(1_000),
        ..ServerConfig::default()
    };
    let service = service_with(&dialer, config);
    let session = create_session(&service).await?;

    let response = execute(&service, session, "SELECT SLEEP(10)").await?;
    let error = response.error.expect("embedded error");
    assert_eq!(error.code, vtrpc::Code::DeadlineExceeded as i32);
    Ok(())
}

#[tokio::test]
async fn prepare_is_unimplemented() -> Result<()> {
    let dialer = MemoryDialer::new();
    let service = service(&dialer);

    let status = service
        .prepare(authed(PrepareRequest {
            session: None,
            query: "SELECT ?".into(),
        }))
        .await
        .err()
        .ok_or_else(|| anyhow!("expected failure"))?;
    assert_eq!(status.code(), Code::Unimplemented);
    Ok(())
}

#[tokio::test]
async fn close_without_session_returns_a_fresh_one() -> Result<()> {
    let dialer = MemoryDialer::new();
    let service = service(&dialer);

    let session = service
        .close_session(authed(CloseSessionRequest { session: None }))
        .await?
        .into_inner()
        .session
        .expect("session");
    assert_eq!(session.target(), "mysql");
    assert!(!session.identity().is_empty());
    assert_eq!(dialer.stats().dials(), 0);
    Ok(())
}

#[test]
fn status_mapping_matches_gateway_codes() {
    use crate::error::BackendError;

    let cases = [
        (
            ServerError::SessionInUse("abc".into()),
            Code::PermissionDenied,
        ),
        (
            ServerError::Backend(BackendError::AccessDenied("denied".into())),
            Code::Unauthenticated,
        ),
        (
            ServerError::Backend(BackendError::Connection("refused".into())),
            Code::Unavailable,
        ),
        (
            ServerError::Backend(BackendError::Driver("boom".into())),
            Code::Unknown,
        ),
    ];
    for (err, code) in cases {
        assert_eq!(DatabaseService::status_from_error(err).code(), code);
    }

    let status = DatabaseService::status_from_error(ServerError::SessionInUse("abc".into()));
    assert_eq!(status.message(), "session already in use: abc");
}
