//! Statement execution and row decoding.
//!
//! Statements are sent as bare SQL text with no bind arguments, which keeps
//! them on the simple (text) query protocol: no named prepared statement
//! ever reaches a pooling proxy and every value arrives as text.
//! Columns are decoded by their engine type name; anything without a
//! dedicated mapping falls back to its text form.

use sqlx::mysql::{MySqlConnection, MySqlRow};
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::{Column, ColumnIndex, Decode, Executor, Row as _, Type, TypeInfo};

use common::errors::{AppError, AppResult};
use common::models::{QueryResult, Row, Value};
use common::utils::StatementKind;

/// Executes `sql` on a PostgreSQL connection.
pub async fn execute_postgres(
    conn: &mut PgConnection,
    sql: &str,
    kind: StatementKind,
) -> AppResult<QueryResult> {
    match kind {
        StatementKind::DataReturning => {
            let rows = Executor::fetch_all(&mut *conn, sql)
                .await
                .map_err(execution_error)?;
            Ok(QueryResult::Rows(rows.iter().map(decode_pg_row).collect()))
        }
        StatementKind::NonDataReturning => {
            Executor::execute(&mut *conn, sql)
                .await
                .map_err(execution_error)?;
            Ok(QueryResult::Ack)
        }
    }
}

/// Executes `sql` on a MySQL connection.
///
/// Non-data statements are followed by an explicit `COMMIT` so their effect
/// never depends on the session's autocommit setting.
pub async fn execute_mysql(
    conn: &mut MySqlConnection,
    sql: &str,
    kind: StatementKind,
) -> AppResult<QueryResult> {
    match kind {
        StatementKind::DataReturning => {
            let rows = Executor::fetch_all(&mut *conn, sql)
                .await
                .map_err(execution_error)?;
            Ok(QueryResult::Rows(rows.iter().map(decode_mysql_row).collect()))
        }
        StatementKind::NonDataReturning => {
            let result = Executor::execute(&mut *conn, sql)
                .await
                .map_err(execution_error)?;
            Executor::execute(&mut *conn, "COMMIT")
                .await
                .map_err(execution_error)?;
            tracing::debug!(rows_affected = result.rows_affected(), "Statement committed");
            Ok(QueryResult::Ack)
        }
    }
}

/// Driver error to `AppError`. Database errors carry the server's own
/// message; anything else uses the driver's description.
fn execution_error(err: sqlx::Error) -> AppError {
    match err {
        sqlx::Error::Database(db) => AppError::execution(db.message()),
        other => AppError::execution(other.to_string()),
    }
}

fn decode_pg_row(row: &PgRow) -> Row {
    let mut out = Row::with_capacity(row.len());
    for (index, column) in row.columns().iter().enumerate() {
        out.insert(column.name(), decode_pg_value(row, index, column.type_info().name()));
    }
    out
}

fn decode_pg_value(row: &PgRow, index: usize, type_name: &str) -> Value {
    match type_name {
        "BOOL" => typed(row, index, Value::Bool),
        "INT2" => typed(row, index, |v: i16| Value::Int(v.into())),
        "INT4" => typed(row, index, |v: i32| Value::Int(v.into())),
        "INT8" => typed(row, index, Value::Int),
        "FLOAT4" => typed(row, index, |v: f32| Value::Float(v.into())),
        "FLOAT8" => typed(row, index, Value::Float),
        "NUMERIC" => decimal(row, index),
        "DATE" => typed(row, index, Value::Date),
        "TIME" => typed(row, index, Value::Time),
        "TIMESTAMP" => typed(row, index, Value::DateTime),
        "TIMESTAMPTZ" => typed(row, index, Value::DateTimeTz),
        "BYTEA" => typed(row, index, Value::Bytes),
        _ => text(row, index),
    }
}

fn decode_mysql_row(row: &MySqlRow) -> Row {
    let mut out = Row::with_capacity(row.len());
    for (index, column) in row.columns().iter().enumerate() {
        out.insert(
            column.name(),
            decode_mysql_value(row, index, column.type_info().name()),
        );
    }
    out
}

fn decode_mysql_value(row: &MySqlRow, index: usize, type_name: &str) -> Value {
    match type_name {
        "BOOLEAN" => typed(row, index, Value::Bool),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => typed(row, index, Value::Int),
        name if name.ends_with("UNSIGNED") => typed(row, index, unsigned),
        "FLOAT" => typed(row, index, |v: f32| Value::Float(v.into())),
        "DOUBLE" => typed(row, index, Value::Float),
        "DECIMAL" => decimal(row, index),
        "DATE" => typed(row, index, Value::Date),
        "TIME" => typed(row, index, Value::Time),
        "DATETIME" | "TIMESTAMP" => typed(row, index, Value::DateTime),
        "BINARY" | "VARBINARY" | "BLOB" => typed(row, index, Value::Bytes),
        _ => text(row, index),
    }
}

/// Unsigned values that do not fit an i64 keep their exact digits.
fn unsigned(v: u64) -> Value {
    i64::try_from(v)
        .map(Value::Int)
        .unwrap_or_else(|_| Value::Decimal(v.to_string()))
}

/// Decodes as `T`, falling back to text when the driver refuses the type
/// (out-of-range dates, `infinity` timestamps, negative MySQL times).
fn typed<'r, R, T>(row: &'r R, index: usize, wrap: impl FnOnce(T) -> Value) -> Value
where
    R: sqlx::Row,
    usize: ColumnIndex<R>,
    T: Decode<'r, R::Database> + Type<R::Database>,
    String: Decode<'r, R::Database>,
    Vec<u8>: Decode<'r, R::Database>,
{
    match row.try_get::<Option<T>, _>(index) {
        Ok(Some(v)) => wrap(v),
        Ok(None) => Value::Null,
        Err(_) => text(row, index),
    }
}

fn decimal<'r, R>(row: &'r R, index: usize) -> Value
where
    R: sqlx::Row,
    usize: ColumnIndex<R>,
    String: Decode<'r, R::Database>,
    Vec<u8>: Decode<'r, R::Database>,
{
    match row.try_get_unchecked::<Option<String>, _>(index) {
        Ok(Some(v)) => Value::Decimal(v),
        Ok(None) => Value::Null,
        Err(_) => text(row, index),
    }
}

/// Text form of the value, else its raw bytes, else null.
fn text<'r, R>(row: &'r R, index: usize) -> Value
where
    R: sqlx::Row,
    usize: ColumnIndex<R>,
    String: Decode<'r, R::Database>,
    Vec<u8>: Decode<'r, R::Database>,
{
    if let Ok(v) = row.try_get_unchecked::<Option<String>, _>(index) {
        return v.map(Value::String).unwrap_or(Value::Null);
    }
    match row.try_get_unchecked::<Option<Vec<u8>>, _>(index) {
        Ok(Some(bytes)) => Value::Bytes(bytes),
        Ok(None) => Value::Null,
        Err(e) => {
            tracing::debug!(column = index, error = %e, "Undecodable value; using null");
            Value::Null
        }
    }
}
