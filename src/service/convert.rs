//! Translation of backend outcomes into wire messages.

use crate::backend::{Column, ResultSet, SqlType};
use crate::error::BackendError;
use crate::proto::query::{self, Field, QueryResult, Row};
use crate::proto::vtrpc::{Code, RpcError};

/// Length marker for a NULL cell.
const NULL_LENGTH: i64 = -1;

pub fn to_wire_result(result: ResultSet) -> QueryResult {
    QueryResult {
        fields: result.columns.into_iter().map(to_wire_field).collect(),
        rows_affected: result.rows_affected,
        insert_id: result.insert_id,
        rows: result.rows.into_iter().map(to_wire_row).collect(),
        info: result.info,
        session_state_changes: String::new(),
    }
}

/// `None` in, `None` out.
pub fn to_wire_error(error: Option<&BackendError>) -> Option<RpcError> {
    let error = error?;
    Some(RpcError {
        message: error.to_string(),
        code: error_code(error) as i32,
    })
}

/// Split a query outcome into the (result, error) pair carried by
/// execute responses.
pub(crate) fn to_wire_outcome(
    outcome: Result<ResultSet, BackendError>,
) -> (Option<QueryResult>, Option<RpcError>) {
    match outcome {
        Ok(result) => (Some(to_wire_result(result)), None),
        Err(err) => (None, to_wire_error(Some(&err))),
    }
}

fn error_code(error: &BackendError) -> Code {
    match error {
        BackendError::Canceled(_) => Code::Canceled,
        BackendError::DeadlineExceeded(_) => Code::DeadlineExceeded,
        _ => Code::Unknown,
    }
}

fn to_wire_field(column: Column) -> Field {
    Field {
        name: column.name,
        r#type: wire_type(column.sql_type) as i32,
        table: column.table,
        org_table: column.org_table,
        database: column.database,
        org_name: column.org_name,
        column_length: column.column_length,
        charset: column.charset,
        decimals: column.decimals,
        flags: column.flags,
        column_type: column.column_type,
    }
}

/// Pack a row as per-cell lengths plus concatenated bytes.
fn to_wire_row(cells: Vec<Option<Vec<u8>>>) -> Row {
    let total = cells.iter().flatten().map(Vec::len).sum();
    let mut lengths = Vec::with_capacity(cells.len());
    let mut values = Vec::with_capacity(total);
    for cell in cells {
        match cell {
            Some(bytes) => {
                lengths.push(bytes.len() as i64);
                values.extend_from_slice(&bytes);
            }
            None => lengths.push(NULL_LENGTH),
        }
    }
    Row { lengths, values }
}

fn wire_type(sql_type: SqlType) -> query::Type {
    use query::Type;
    match sql_type {
        SqlType::Null => Type::NullType,
        SqlType::Int8 => Type::Int8,
        SqlType::Uint8 => Type::Uint8,
        SqlType::Int16 => Type::Int16,
        SqlType::Uint16 => Type::Uint16,
        SqlType::Int24 => Type::Int24,
        SqlType::Uint24 => Type::Uint24,
        SqlType::Int32 => Type::Int32,
        SqlType::Uint32 => Type::Uint32,
        SqlType::Int64 => Type::Int64,
        SqlType::Uint64 => Type::Uint64,
        SqlType::Float32 => Type::Float32,
        SqlType::Float64 => Type::Float64,
        SqlType::Timestamp => Type::Timestamp,
        SqlType::Date => Type::Date,
        SqlType::Time => Type::Time,
        SqlType::Datetime => Type::Datetime,
        SqlType::Year => Type::Year,
        SqlType::Decimal => Type::Decimal,
        SqlType::Text => Type::Text,
        SqlType::Blob => Type::Blob,
        SqlType::Varchar => Type::Varchar,
        SqlType::Varbinary => Type::Varbinary,
        SqlType::Char => Type::Char,
        SqlType::Binary => Type::Binary,
        SqlType::Bit => Type::Bit,
        SqlType::Enum => Type::Enum,
        SqlType::Set => Type::Set,
        SqlType::Geometry => Type::Geometry,
        SqlType::Json => Type::Json,
    }
}
