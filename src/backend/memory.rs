//! Scripted in-process backend for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Barrier;

use super::{BackendConnection, BackendDialer, Column, ResultSet, SqlType};
use crate::error::BackendError;

#[derive(Debug, Default)]
pub(crate) struct MemoryStats {
    dials: AtomicUsize,
    closes: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl MemoryStats {
    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[derive(Clone, Default)]
pub(crate) struct MemoryDialer {
    stats: Arc<MemoryStats>,
    dial_barrier: Option<Arc<Barrier>>,
    denied_user: Option<String>,
}

impl MemoryDialer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every dial until `parties` dials are in flight.
    pub fn with_dial_barrier(mut self, parties: usize) -> Self {
        self.dial_barrier = Some(Arc::new(Barrier::new(parties)));
        self
    }

    pub fn deny_user(mut self, username: &str) -> Self {
        self.denied_user = Some(username.to_string());
        self
    }

    pub fn stats(&self) -> Arc<MemoryStats> {
        self.stats.clone()
    }
}

#[async_trait]
impl BackendDialer for MemoryDialer {
    async fn dial(
        &self,
        username: &str,
        _secret: &str,
    ) -> Result<Box<dyn BackendConnection>, BackendError> {
        if self.denied_user.as_deref() == Some(username) {
            return Err(BackendError::AccessDenied(format!(
                "Access denied for user '{username}'@'localhost' (using password: YES) (errno 1045) (sqlstate 28000)"
            )));
        }
        if let Some(barrier) = &self.dial_barrier {
            barrier.wait().await;
        }
        let id = self.stats.dials.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(MemoryConnection {
            id,
            stats: self.stats.clone(),
            closed: false,
            next_insert_id: 0,
            in_transaction: false,
        }))
    }
}

struct MemoryConnection {
    id: usize,
    stats: Arc<MemoryStats>,
    closed: bool,
    next_insert_id: u64,
    in_transaction: bool,
}

impl MemoryConnection {
    fn ok(&self, rows_affected: u64, insert_id: u64) -> ResultSet {
        ResultSet {
            rows_affected,
            insert_id,
            in_transaction: self.in_transaction,
            ..ResultSet::default()
        }
    }

    fn single(&self, name: &str, sql_type: SqlType, value: String) -> ResultSet {
        ResultSet {
            columns: vec![Column::new(name, sql_type)],
            rows: vec![vec![Some(value.into_bytes())]],
            in_transaction: self.in_transaction,
            ..ResultSet::default()
        }
    }
}

#[async_trait]
impl BackendConnection for MemoryConnection {
    async fn execute(&mut self, query: &str, max_rows: usize) -> Result<ResultSet, BackendError> {
        if self.closed {
            return Err(BackendError::Connection("connection is closed".to_string()));
        }
        self.stats
            .queries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(query.to_string());

        let normalized = query.trim().trim_end_matches(';').to_ascii_uppercase();
        match normalized.as_str() {
            q if q.starts_with("USE ") => Ok(self.ok(0, 0)),
            "SELECT CONNECTION_ID()" => Ok(self.single(
                "CONNECTION_ID()",
                SqlType::Uint64,
                self.id.to_string(),
            )),
            "SELECT SLEEP(10)" => {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(self.single("SLEEP(10)", SqlType::Int64, "0".to_string()))
            }
            "SELECT NULL" => Ok(ResultSet {
                columns: vec![Column::new("NULL", SqlType::Null)],
                rows: vec![vec![None]],
                in_transaction: self.in_transaction,
                ..ResultSet::default()
            }),
            "SELECT * FROM SEQ" => {
                let rows: Vec<_> = (1..=5)
                    .map(|n: u32| vec![Some(n.to_string().into_bytes())])
                    .collect();
                if rows.len() > max_rows {
                    return Err(BackendError::RowCountExceeded { limit: max_rows });
                }
                Ok(ResultSet {
                    columns: vec![Column::new("n", SqlType::Int32)],
                    rows,
                    in_transaction: self.in_transaction,
                    ..ResultSet::default()
                })
            }
            "BEGIN" => {
                self.in_transaction = true;
                Ok(self.ok(0, 0))
            }
            "COMMIT" | "ROLLBACK" => {
                self.in_transaction = false;
                Ok(self.ok(0, 0))
            }
            q if q.starts_with("CREATE TABLE") => Ok(self.ok(0, 0)),
            q if q.starts_with("INSERT INTO") => {
                self.next_insert_id += 1;
                Ok(self.ok(1, self.next_insert_id))
            }
            q => match q.strip_prefix("SELECT ").map(str::parse::<i64>) {
                Some(Ok(n)) => Ok(self.single(&n.to_string(), SqlType::Int64, n.to_string())),
                _ => Err(BackendError::Server {
                    code: 1064,
                    state: "42000".to_string(),
                    message: format!("You have an error in your SQL syntax near '{query}'"),
                }),
            },
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.stats.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}
