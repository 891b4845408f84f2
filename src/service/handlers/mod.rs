use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::{info, instrument};

use super::DatabaseService;
use crate::proto::psdb::v1alpha1::database_server::Database;
use crate::proto::psdb::v1alpha1::{
    CloseSessionRequest, CloseSessionResponse, CreateSessionRequest, CreateSessionResponse,
    ExecuteBatchRequest, ExecuteBatchResponse, ExecuteRequest, ExecuteResponse, PrepareRequest,
    PrepareResponse,
};

mod query;
mod session;

#[tonic::async_trait]
impl Database for DatabaseService {
    type StreamExecuteStream = ReceiverStream<Result<ExecuteResponse, Status>>;

    #[instrument(skip(self, request), fields(method = "CreateSession", user, session_id))]
    async fn create_session(
        &self,
        request: Request<CreateSessionRequest>,
    ) -> Result<Response<CreateSessionResponse>, Status> {
        session::create_session(self, request).await
    }

    #[instrument(
        skip(self, request),
        fields(method = "Execute", user, session_id, client_session, query = %request.get_ref().query)
    )]
    async fn execute(
        &self,
        request: Request<ExecuteRequest>,
    ) -> Result<Response<ExecuteResponse>, Status> {
        query::execute(self, request).await
    }

    #[instrument(
        skip(self, request),
        fields(method = "StreamExecute", user, session_id, client_session, query = %request.get_ref().query)
    )]
    async fn stream_execute(
        &self,
        request: Request<ExecuteRequest>,
    ) -> Result<Response<Self::StreamExecuteStream>, Status> {
        query::stream_execute(self, request).await
    }

    #[instrument(
        skip(self, request),
        fields(method = "ExecuteBatch", user, session_id, client_session, queries = request.get_ref().queries.len())
    )]
    async fn execute_batch(
        &self,
        request: Request<ExecuteBatchRequest>,
    ) -> Result<Response<ExecuteBatchResponse>, Status> {
        query::execute_batch(self, request).await
    }

    #[instrument(skip(self, _request), fields(method = "Prepare"))]
    async fn prepare(
        &self,
        _request: Request<PrepareRequest>,
    ) -> Result<Response<PrepareResponse>, Status> {
        info!("prepare is not supported");
        Err(Status::unimplemented("Prepare is not implemented"))
    }

    #[instrument(skip(self, request), fields(method = "CloseSession", user, session_id))]
    async fn close_session(
        &self,
        request: Request<CloseSessionRequest>,
    ) -> Result<Response<CloseSessionResponse>, Status> {
        session::close_session(self, request).await
    }
}
