//! Session state carried opaquely by clients between calls.
//!
//! The wire `Session` message is the session record: the gateway never keeps
//! session state of its own, it only stamps fresh sessions, folds query
//! outcomes into them and resets them on close.

pub mod id;

pub use id::SessionId;

use crate::backend::ResultSet;
pub use crate::proto::psdb::v1alpha1::Session;
use crate::proto::query::execute_options::{IncludedFields, Workload};
use crate::proto::query::ExecuteOptions;
use crate::proto::vtgate;

/// DDL strategy advertised on every session.
pub const DDL_STRATEGY: &str = "direct";

impl Session {
    /// Fresh session bound to `target_database`.
    pub fn new(target_database: &str) -> Self {
        Self::with_identity(&SessionId::new(), target_database)
    }

    fn with_identity(id: &SessionId, target_database: &str) -> Self {
        Self {
            signature: id::signature(),
            vitess_session: Some(vtgate::Session {
                target_string: target_database.to_string(),
                options: Some(ExecuteOptions {
                    included_fields: IncludedFields::All as i32,
                    client_found_rows: true,
                    workload: Workload::Unspecified as i32,
                }),
                autocommit: true,
                ddl_strategy: DDL_STRATEGY.to_string(),
                session_uuid: id.to_string(),
                enable_system_settings: true,
                ..Default::default()
            }),
        }
    }

    /// Session id, empty when the embedded state is absent.
    pub fn identity(&self) -> &str {
        self.vitess_session
            .as_ref()
            .map(|s| s.session_uuid.as_str())
            .unwrap_or_default()
    }

    /// Target database, empty when the embedded state is absent.
    pub fn target(&self) -> &str {
        self.vitess_session
            .as_ref()
            .map(|s| s.target_string.as_str())
            .unwrap_or_default()
    }

    pub fn in_transaction(&self) -> bool {
        self.vitess_session
            .as_ref()
            .is_some_and(|s| s.in_transaction)
    }

    /// Fold a query outcome into the session counters.
    ///
    /// Counters are replaced, not accumulated.
    pub fn update(&mut self, result: &ResultSet) {
        let Some(state) = self.vitess_session.as_mut() else {
            return;
        };
        state.last_insert_id = result.insert_id;
        state.in_transaction = result.in_transaction;
        state.found_rows = result.rows.len() as u64;
        state.row_count = i64::try_from(result.rows_affected).unwrap_or(i64::MAX);
    }

    /// Brand-new session with the same id and target but a fresh signature,
    /// default options and zeroed counters.
    pub fn reset(&self) -> Session {
        Self::with_identity(&SessionId::from(self.identity()), self.target())
    }
}
