use tonic::{Request, Response, Status};
use tracing::{info, Span};

use crate::pool::PoolKey;
use crate::proto::psdb::v1alpha1::{
    CloseSessionRequest, CloseSessionResponse, CreateSessionRequest, CreateSessionResponse, User,
};
use crate::service::DatabaseService;
use crate::session::{id, Session};

/// Cluster identity reported for every authenticated user.
const USER_PSID: &str = "planetscale-1";

/// Opens a session bound to the default database and proves the caller's
/// credentials by dialing its connection up front. The connection stays
/// pooled for the session's first query.
pub(crate) async fn create_session(
    service: &DatabaseService,
    request: Request<CreateSessionRequest>,
) -> Result<Response<CreateSessionResponse>, Status> {
    let credentials = DatabaseService::authenticate(&request)?;
    let session = Session::new(&service.default_database);
    Span::current().record("session_id", session.identity());

    let conn = service.checkout(&credentials, &session).await?;
    drop(conn);
    info!("ok");

    Ok(Response::new(CreateSessionResponse {
        branch: id::branch_id(),
        user: Some(User {
            username: credentials.username().to_string(),
            psid: USER_PSID.to_string(),
            role: String::new(),
        }),
        session: Some(session),
    }))
}

/// Closes the session's pooled connection and hands back a reset session.
/// A request without a session gets a fresh one.
pub(crate) async fn close_session(
    service: &DatabaseService,
    request: Request<CloseSessionRequest>,
) -> Result<Response<CloseSessionResponse>, Status> {
    let credentials = DatabaseService::authenticate(&request)?;
    let next = match request.into_inner().session {
        Some(session) => {
            Span::current().record("session_id", session.identity());
            let key = PoolKey::new(&credentials, session.target(), session.identity());
            service.pool.close(&key).await;
            session.reset()
        }
        None => Session::new(&service.default_database),
    };
    info!("ok");

    Ok(Response::new(CloseSessionResponse { session: Some(next) }))
}
