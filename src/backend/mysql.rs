//! MySQL backend over `mysql_async`'s text protocol.

use async_trait::async_trait;
use mysql_async::consts::{ColumnFlags, ColumnType};
use mysql_async::prelude::*;
use mysql_async::{Conn, OptsBuilder, Row, Value};
use tracing::{debug, instrument};

use super::{BackendConnection, BackendDialer, Column, ResultSet, SqlType};
use crate::config::ServerConfig;
use crate::error::BackendError;
use crate::sql;

const BINARY_CHARSET: u16 = 63;

const ER_DBACCESS_DENIED: u16 = 1044;
const ER_ACCESS_DENIED: u16 = 1045;
const ER_ACCESS_DENIED_NO_PASSWORD: u16 = 1698;
const ER_QUERY_INTERRUPTED: u16 = 1317;
const ER_QUERY_TIMEOUT: u16 = 3024;

// Last-resort match for credential failures reported under other error
// numbers. Breaks on localized servers.
const ACCESS_DENIED_TEXT: &str = "Access denied for user";

/// Dials plain TCP connections to a single MySQL server.
#[derive(Debug, Clone)]
pub struct MysqlDialer {
    host: String,
    port: u16,
    suppress_secret: bool,
}

impl MysqlDialer {
    pub fn new(host: impl Into<String>, port: u16, suppress_secret: bool) -> Self {
        Self {
            host: host.into(),
            port,
            suppress_secret,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(
            config.mysql_addr.clone(),
            config.mysql_port,
            config.mysql_no_pass,
        )
    }
}

#[async_trait]
impl BackendDialer for MysqlDialer {
    #[instrument(skip(self, secret), fields(host = %self.host, port = self.port))]
    async fn dial(
        &self,
        username: &str,
        secret: &str,
    ) -> Result<Box<dyn BackendConnection>, BackendError> {
        let secret = (!self.suppress_secret).then(|| secret.to_string());
        let opts = OptsBuilder::default()
            .ip_or_hostname(self.host.clone())
            .tcp_port(self.port)
            .user(Some(username.to_string()))
            .pass(secret)
            .prefer_socket(false);

        let conn = Conn::new(opts).await.map_err(classify)?;
        debug!(connection_id = conn.id(), "dialed backend");
        Ok(Box::new(MysqlConnection {
            conn: Some(conn),
            in_transaction: false,
        }))
    }
}

struct MysqlConnection {
    conn: Option<Conn>,
    in_transaction: bool,
}

#[async_trait]
impl BackendConnection for MysqlConnection {
    async fn execute(&mut self, query: &str, max_rows: usize) -> Result<ResultSet, BackendError> {
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| BackendError::Connection("connection is closed".to_string()))?;

        let mut result = conn.query_iter(query).await.map_err(classify)?;
        let columns: Vec<Column> = result
            .columns()
            .map(|columns| columns.iter().map(column_from_mysql).collect())
            .unwrap_or_default();
        let rows: Vec<Row> = result.collect().await.map_err(classify)?;
        let rows_affected = result.affected_rows();
        let insert_id = result.last_insert_id().unwrap_or(0);
        let info = result.info().into_owned();
        result.drop_result().await.map_err(classify)?;

        if rows.len() > max_rows {
            return Err(BackendError::RowCountExceeded { limit: max_rows });
        }
        if let Some(open) = sql::transaction_state_after(query) {
            self.in_transaction = open;
        }

        Ok(ResultSet {
            columns,
            rows: rows.iter().map(row_values).collect(),
            rows_affected,
            insert_id,
            in_transaction: self.in_transaction,
            info,
        })
    }

    async fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(err) = conn.disconnect().await {
                debug!(error = %err, "backend disconnect failed");
            }
        }
    }
}

fn row_values(row: &Row) -> Vec<Option<Vec<u8>>> {
    (0..row.len())
        .map(|idx| row.as_ref(idx).and_then(value_bytes))
        .collect()
}

fn value_bytes(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::NULL => None,
        Value::Bytes(bytes) => Some(bytes.clone()),
        other => Some(other.as_sql(true).trim_matches('\'').as_bytes().to_vec()),
    }
}

fn column_from_mysql(column: &mysql_async::Column) -> Column {
    let flags = column.flags();
    Column {
        name: column.name_str().into_owned(),
        sql_type: sql_type_of(column.column_type(), flags, column.character_set()),
        table: column.table_str().into_owned(),
        org_table: column.org_table_str().into_owned(),
        database: column.schema_str().into_owned(),
        org_name: column.org_name_str().into_owned(),
        column_length: column.column_length(),
        charset: u32::from(column.character_set()),
        decimals: u32::from(column.decimals()),
        flags: u32::from(flags.bits()),
        column_type: String::new(),
    }
}

fn sql_type_of(column_type: ColumnType, flags: ColumnFlags, charset: u16) -> SqlType {
    let unsigned = flags.contains(ColumnFlags::UNSIGNED_FLAG);
    let binary = charset == BINARY_CHARSET;
    let pick = |unsigned_type, signed_type| if unsigned { unsigned_type } else { signed_type };

    match column_type {
        ColumnType::MYSQL_TYPE_NULL => SqlType::Null,
        ColumnType::MYSQL_TYPE_TINY => pick(SqlType::Uint8, SqlType::Int8),
        ColumnType::MYSQL_TYPE_SHORT => pick(SqlType::Uint16, SqlType::Int16),
        ColumnType::MYSQL_TYPE_INT24 => pick(SqlType::Uint24, SqlType::Int24),
        ColumnType::MYSQL_TYPE_LONG => pick(SqlType::Uint32, SqlType::Int32),
        ColumnType::MYSQL_TYPE_LONGLONG => pick(SqlType::Uint64, SqlType::Int64),
        ColumnType::MYSQL_TYPE_FLOAT => SqlType::Float32,
        ColumnType::MYSQL_TYPE_DOUBLE => SqlType::Float64,
        ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => SqlType::Decimal,
        ColumnType::MYSQL_TYPE_TIMESTAMP | ColumnType::MYSQL_TYPE_TIMESTAMP2 => SqlType::Timestamp,
        ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE => SqlType::Date,
        ColumnType::MYSQL_TYPE_TIME | ColumnType::MYSQL_TYPE_TIME2 => SqlType::Time,
        ColumnType::MYSQL_TYPE_DATETIME | ColumnType::MYSQL_TYPE_DATETIME2 => SqlType::Datetime,
        ColumnType::MYSQL_TYPE_YEAR => SqlType::Year,
        ColumnType::MYSQL_TYPE_BIT => SqlType::Bit,
        ColumnType::MYSQL_TYPE_JSON => SqlType::Json,
        ColumnType::MYSQL_TYPE_ENUM => SqlType::Enum,
        ColumnType::MYSQL_TYPE_SET => SqlType::Set,
        ColumnType::MYSQL_TYPE_GEOMETRY => SqlType::Geometry,
        ColumnType::MYSQL_TYPE_TINY_BLOB
        | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
        | ColumnType::MYSQL_TYPE_LONG_BLOB
        | ColumnType::MYSQL_TYPE_BLOB => {
            if binary {
                SqlType::Blob
            } else {
                SqlType::Text
            }
        }
        ColumnType::MYSQL_TYPE_VARCHAR | ColumnType::MYSQL_TYPE_VAR_STRING => {
            if binary {
                SqlType::Varbinary
            } else {
                SqlType::Varchar
            }
        }
        ColumnType::MYSQL_TYPE_STRING => {
            if flags.contains(ColumnFlags::ENUM_FLAG) {
                SqlType::Enum
            } else if flags.contains(ColumnFlags::SET_FLAG) {
                SqlType::Set
            } else if binary {
                SqlType::Binary
            } else {
                SqlType::Char
            }
        }
        _ => SqlType::Varbinary,
    }
}

fn classify(err: mysql_async::Error) -> BackendError {
    match err {
        mysql_async::Error::Server(server) => classify_server(server.code, server.state, server.message),
        mysql_async::Error::Io(err) => BackendError::Connection(err.to_string()),
        other => {
            let message = other.to_string();
            if message.contains(ACCESS_DENIED_TEXT) {
                BackendError::AccessDenied(message)
            } else {
                BackendError::Driver(message)
            }
        }
    }
}

fn classify_server(code: u16, state: String, message: String) -> BackendError {
    let rendered = || format!("{message} (errno {code}) (sqlstate {state})");
    match code {
        ER_DBACCESS_DENIED | ER_ACCESS_DENIED | ER_ACCESS_DENIED_NO_PASSWORD => {
            BackendError::AccessDenied(rendered())
        }
        ER_QUERY_INTERRUPTED => BackendError::Canceled(rendered()),
        ER_QUERY_TIMEOUT => BackendError::DeadlineExceeded(rendered()),
        _ if message.contains(ACCESS_DENIED_TEXT) => BackendError::AccessDenied(rendered()),
        _ => BackendError::Server {
            code,
            state,
            message,
        },
    }
}
