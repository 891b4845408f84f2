use std::time::Instant;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::{error, Instrument, Span};

use crate::proto::psdb::v1alpha1::{
    ExecuteBatchRequest, ExecuteBatchResponse, ExecuteRequest, ExecuteResponse,
};
use crate::proto::query::ResultWithError;
use crate::service::convert::to_wire_outcome;
use crate::service::DatabaseService;

/// Identical copies of the response sent on every stream.
const STREAM_MESSAGES: usize = 2;

/// Runs one query on the session's connection. Query failures travel in the
/// response body; only authentication and pool failures become RPC errors.
pub(crate) async fn execute(
    service: &DatabaseService,
    request: Request<ExecuteRequest>,
) -> Result<Response<ExecuteResponse>, Status> {
    let credentials = DatabaseService::authenticate(&request)?;
    let ExecuteRequest { session, query } = request.into_inner();
    let mut session = service.resolve_session(session);
    let mut conn = service.checkout(&credentials, &session).await?;

    let started = Instant::now();
    let outcome = service.run_query(&mut conn, &query).await;
    let timing = started.elapsed();
    drop(conn);

    if let Ok(result) = &outcome {
        session.update(result);
    }
    let (result, error) = to_wire_outcome(outcome);

    Ok(Response::new(ExecuteResponse {
        session: Some(session),
        result,
        error,
        timing: timing.as_secs_f64(),
    }))
}

/// Runs every query in order on one checkout, continuing past failures.
pub(crate) async fn execute_batch(
    service: &DatabaseService,
    request: Request<ExecuteBatchRequest>,
) -> Result<Response<ExecuteBatchResponse>, Status> {
    let credentials = DatabaseService::authenticate(&request)?;
    let ExecuteBatchRequest { session, queries } = request.into_inner();
    let mut session = service.resolve_session(session);
    let mut conn = service.checkout(&credentials, &session).await?;

    let mut results = Vec::with_capacity(queries.len());
    for query in &queries {
        let outcome = service.run_query(&mut conn, query).await;
        if let Ok(result) = &outcome {
            session.update(result);
        }
        let (result, error) = to_wire_outcome(outcome);
        results.push(ResultWithError { error, result });
    }
    drop(conn);

    Ok(Response::new(ExecuteBatchResponse {
        session: Some(session),
        results,
    }))
}

/// Runs one query and streams its response twice. The connection stays
/// checked out until both messages have been handed to the transport.
pub(crate) async fn stream_execute(
    service: &DatabaseService,
    request: Request<ExecuteRequest>,
) -> Result<Response<ReceiverStream<Result<ExecuteResponse, Status>>>, Status> {
    let credentials = DatabaseService::authenticate(&request)?;
    let ExecuteRequest { session, query } = request.into_inner();
    let mut session = service.resolve_session(session);
    let mut conn = service.checkout(&credentials, &session).await?;

    let outcome = service.run_query(&mut conn, &query).await;
    if let Ok(result) = &outcome {
        session.update(result);
    }
    let (result, error) = to_wire_outcome(outcome);
    let message = ExecuteResponse {
        session: Some(session),
        result,
        error,
        timing: 0.0,
    };

    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(
        async move {
            let _checked_out = conn;
            for _ in 0..STREAM_MESSAGES {
                if tx.send(Ok(message.clone())).await.is_err() {
                    error!("send failed");
                    return;
                }
            }
        }
        .instrument(Span::current()),
    );

    Ok(Response::new(ReceiverStream::new(rx)))
}
