use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use sqlx::{postgres::{PgColumn, PgRow}, types::Uuid, Column, Connection, PgConnection, Row};
use tokio_stream::StreamExt as OtherStream;
use tokio_util::sync::CancellationToken;

use super::{with_cancel, CellValue, ColumnMeta, DbAdapter, QueryOutput, RowKey};
use crate::{
  connection::{BackendKind, ConnectionDescriptor},
  error::EngineError,
};

macro_rules! cell {
  ($value:expr) => {
    Ok($value.map(|v| v.to_string()))
  };
}

pub struct PostgresAdapter {
  conn: PgConnection,
  database: String,
}

impl PostgresAdapter {
  pub async fn connect(descriptor: &ConnectionDescriptor) -> Result<Self, EngineError> {
    let conn_str = descriptor.pg_connection_string();
    let conn = PgConnection::connect(&conn_str).await.map_err(|e| EngineError::Connection(e.to_string()))?;
    let database = descriptor.database.clone().unwrap_or_else(|| "postgres".to_string());

    Ok(Self { conn, database })
  }

  async fn fetch_rows(&mut self, sql: &str) -> Result<QueryOutput, EngineError> {
    let mut stream = sqlx::query(sql).fetch(&mut self.conn);

    let mut columns = vec![];
    let mut rows = vec![];
    while let Some(row) = stream.try_next().await.map_err(|e| EngineError::Execution(e.to_string()))? {
      if columns.is_empty() {
        columns = row.columns().iter().map(|c| c.name().to_string()).collect();
      }
      let mut values = Vec::with_capacity(row.columns().len());
      for c in row.columns() {
        values.push(get_pg_value(&row, c)?);
      }
      rows.push(values);
    }

    Ok(QueryOutput::Rows { columns, rows })
  }

  async fn run_statement(&mut self, sql: &str) -> Result<u64, EngineError> {
    let result = sqlx::query(sql).execute(&mut self.conn).await.map_err(|e| EngineError::Execution(e.to_string()))?;
    Ok(result.rows_affected())
  }
}

#[async_trait::async_trait]
impl DbAdapter for PostgresAdapter {
  fn backend(&self) -> BackendKind {
    BackendKind::Postgres
  }

  async fn execute(
    &mut self,
    sql: &str,
    returns_rows: bool,
    cancel: &CancellationToken,
  ) -> Result<QueryOutput, EngineError> {
    if returns_rows {
      with_cancel(cancel, self.fetch_rows(sql)).await
    } else {
      let affected = with_cancel(cancel, self.run_statement(sql)).await?;
      Ok(QueryOutput::Affected(affected))
    }
  }

  async fn table_columns(&mut self, table: &str, schema: Option<&str>) -> Result<Vec<ColumnMeta>, EngineError> {
    let schema = schema.unwrap_or("public");

    let pk_rows = sqlx::query(
      "SELECT kcu.column_name
       FROM information_schema.table_constraints tc
       JOIN information_schema.key_column_usage kcu
         ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema
       WHERE tc.constraint_type = 'PRIMARY KEY' AND tc.table_schema = $1 AND tc.table_name = $2",
    )
    .bind(schema)
    .bind(table)
    .fetch_all(&mut self.conn)
    .await
    .map_err(|e| EngineError::Execution(e.to_string()))?;

    let pk_columns: Vec<String> =
      pk_rows.into_iter().filter_map(|row| row.try_get::<String, _>("column_name").ok()).collect();

    let rows = sqlx::query(
      "SELECT column_name, data_type, is_nullable
       FROM information_schema.columns
       WHERE table_catalog = $1 AND table_schema = $2 AND table_name = $3
       ORDER BY ordinal_position",
    )
    .bind(&self.database)
    .bind(schema)
    .bind(table)
    .fetch_all(&mut self.conn)
    .await
    .map_err(|e| EngineError::Execution(e.to_string()))?;

    let columns: Vec<ColumnMeta> = rows
      .into_iter()
      .filter_map(|row| {
        let name = row.try_get::<String, _>("column_name").ok()?;
        let data_type = row.try_get::<String, _>("data_type").ok()?;
        let is_nullable = row.try_get::<String, _>("is_nullable").ok()? == "YES";
        let is_primary_key = pk_columns.contains(&name);
        Some(ColumnMeta { name, data_type, is_nullable, is_primary_key })
      })
      .collect();

    Ok(columns)
  }

  async fn insert_row(&mut self, table: &str, values: &[(String, CellValue)]) -> Result<u64, EngineError> {
    let sql = insert_statement(table, values);
    self.run_statement(&sql).await
  }

  async fn update_cell(
    &mut self,
    table: &str,
    column: &str,
    value: &CellValue,
    original: &CellValue,
    key: &RowKey,
  ) -> Result<u64, EngineError> {
    let sql = update_statement(table, column, value, original, key);
    self.run_statement(&sql).await
  }

  async fn delete_row(&mut self, table: &str, key: &RowKey) -> Result<u64, EngineError> {
    let sql = delete_statement(table, key);
    self.run_statement(&sql).await
  }
}

// Mutations render values as quoted literals rather than bound parameters: a
// literal stays untyped and coerces to the column's type, while a bound
// parameter arrives typed as text and fails to prepare against an integer
// primary key.
fn quote_literal(value: Option<&str>) -> String {
  match value {
    Some(v) => format!("'{}'", v.replace('\'', "''")),
    None => "NULL".to_string(),
  }
}

fn insert_statement(table: &str, values: &[(String, CellValue)]) -> String {
  let columns: Vec<String> = values.iter().map(|(name, _)| format!("\"{name}\"")).collect();
  let literals: Vec<String> = values.iter().map(|(_, value)| quote_literal(value.as_deref())).collect();
  format!("INSERT INTO {table} ({}) VALUES ({})", columns.join(", "), literals.join(", "))
}

fn update_statement(table: &str, column: &str, value: &CellValue, original: &CellValue, key: &RowKey) -> String {
  let guard = match original {
    Some(original) => format!("\"{column}\" = {}", quote_literal(Some(original))),
    None => format!("\"{column}\" IS NULL"),
  };
  format!(
    "UPDATE {table} SET \"{column}\" = {} WHERE \"{}\" = {} AND {guard}",
    quote_literal(value.as_deref()),
    key.pk_column,
    quote_literal(Some(&key.pk_value)),
  )
}

fn delete_statement(table: &str, key: &RowKey) -> String {
  format!("DELETE FROM {table} WHERE \"{}\" = {}", key.pk_column, quote_literal(Some(&key.pk_value)))
}

fn get_pg_value(row: &PgRow, column: &PgColumn) -> Result<CellValue, EngineError> {
  let column_name = column.name();
  if let Ok(value) = row.try_get(column_name) {
    let value: Option<i16> = value;
    cell!(value)
  } else if let Ok(value) = row.try_get(column_name) {
    let value: Option<i32> = value;
    cell!(value)
  } else if let Ok(value) = row.try_get(column_name) {
    let value: Option<i64> = value;
    cell!(value)
  } else if let Ok(value) = row.try_get(column_name) {
    let value: Option<f64> = value;
    cell!(value)
  } else if let Ok(value) = row.try_get(column_name) {
    let value: Option<rust_decimal::Decimal> = value;
    cell!(value)
  } else if let Ok(value) = row.try_get(column_name) {
    let value: Option<String> = value;
    Ok(value)
  } else if let Ok(value) = row.try_get(column_name) {
    let value: Option<chrono::DateTime<chrono::Utc>> = value;
    cell!(value)
  } else if let Ok(value) = row.try_get(column_name) {
    let value: Option<chrono::DateTime<chrono::Local>> = value;
    cell!(value)
  } else if let Ok(value) = row.try_get(column_name) {
    let value: Option<NaiveDateTime> = value;
    cell!(value)
  } else if let Ok(value) = row.try_get(column_name) {
    let value: Option<NaiveDate> = value;
    cell!(value)
  } else if let Ok(value) = row.try_get(column_name) {
    let value: Option<NaiveTime> = value;
    cell!(value)
  } else if let Ok(value) = row.try_get(column_name) {
    let value: Option<serde_json::Value> = value;
    cell!(value)
  } else if let Ok(value) = row.try_get::<Option<bool>, _>(column_name) {
    let value: Option<bool> = value;
    cell!(value)
  } else if let Ok(value) = row.try_get(column_name) {
    let value: Option<Vec<String>> = value;
    Ok(value.map(|v| v.join(",")))
  } else if let Ok(value) = row.try_get(column_name) {
    let value: Option<Uuid> = value;
    cell!(value)
  } else if let Ok(value) = row.try_get(column_name) {
    let value: Option<&[u8]> = value;
    Ok(value.map(|values| format!("\\x{}", values.iter().map(|v| format!("{v:02x}")).collect::<String>())))
  } else {
    Err(EngineError::Execution(format!("Unknown type for column {column_name}")))
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  fn key() -> RowKey {
    RowKey { pk_column: "id".to_string(), pk_value: "7".to_string() }
  }

  #[test]
  fn update_keys_on_untyped_literals_so_integer_keys_compare() {
    let sql =
      update_statement("users", "name", &Some("O'Brien".to_string()), &Some("Alice".to_string()), &key());
    assert_eq!(sql, "UPDATE users SET \"name\" = 'O''Brien' WHERE \"id\" = '7' AND \"name\" = 'Alice'");
  }

  #[test]
  fn null_original_guards_with_is_null_and_null_value_clears() {
    let sql = update_statement("users", "note", &None, &None, &key());
    assert_eq!(sql, "UPDATE users SET \"note\" = NULL WHERE \"id\" = '7' AND \"note\" IS NULL");
  }

  #[test]
  fn delete_keys_on_the_captured_primary_key() {
    assert_eq!(delete_statement("users", &key()), "DELETE FROM users WHERE \"id\" = '7'");
  }

  #[test]
  fn insert_renders_nulls_and_escapes_quotes() {
    let sql = insert_statement(
      "users",
      &[("id".to_string(), Some("9".to_string())), ("note".to_string(), None)],
    );
    assert_eq!(sql, "INSERT INTO users (\"id\", \"note\") VALUES ('9', NULL)");
  }
}
