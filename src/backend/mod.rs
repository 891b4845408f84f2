//! SQL backend seam: dial a connection for a set of credentials, run text
//! queries on it, close it.

pub mod mysql;

#[cfg(test)]
pub(crate) mod memory;

use async_trait::async_trait;

use crate::error::BackendError;

pub use mysql::MysqlDialer;

/// Column value types reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SqlType {
    #[default]
    Null,
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int24,
    Uint24,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float32,
    Float64,
    Timestamp,
    Date,
    Time,
    Datetime,
    Year,
    Decimal,
    Text,
    Blob,
    Varchar,
    Varbinary,
    Char,
    Binary,
    Bit,
    Enum,
    Set,
    Geometry,
    Json,
}

/// Result-set column metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub sql_type: SqlType,
    pub table: String,
    pub org_table: String,
    pub database: String,
    pub org_name: String,
    pub column_length: u32,
    pub charset: u32,
    pub decimals: u32,
    pub flags: u32,
    pub column_type: String,
}

impl Column {
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            ..Self::default()
        }
    }
}

/// Outcome of one successful statement. `None` cells are SQL NULL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Option<Vec<u8>>>>,
    pub rows_affected: u64,
    pub insert_id: u64,
    pub in_transaction: bool,
    pub info: String,
}

#[async_trait]
pub trait BackendDialer: Send + Sync + 'static {
    /// Open a fresh connection authenticated as `username`.
    async fn dial(
        &self,
        username: &str,
        secret: &str,
    ) -> Result<Box<dyn BackendConnection>, BackendError>;
}

#[async_trait]
pub trait BackendConnection: Send + 'static {
    /// Run `query` as plain text, failing with
    /// [`BackendError::RowCountExceeded`] past `max_rows` rows.
    async fn execute(&mut self, query: &str, max_rows: usize) -> Result<ResultSet, BackendError>;

    /// Close the underlying connection. Further queries fail.
    async fn close(&mut self);
}

/// Quote `name` as a MySQL identifier.
pub fn escape_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}
