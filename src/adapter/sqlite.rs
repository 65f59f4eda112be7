use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use sqlx::{sqlite::{SqliteColumn, SqliteRow}, Column, Connection, Row, SqliteConnection};
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

pub struct SqliteAdapter {
  conn: SqliteConnection,
}

impl SqliteAdapter {
  pub async fn connect(descriptor: &ConnectionDescriptor) -> Result<Self, EngineError> {
    let file = descriptor.file.as_deref().ok_or_else(|| EngineError::Connection("missing SQLite file".to_string()))?;
    let conn = SqliteConnection::connect(&format!("sqlite:{file}"))
      .await
      .map_err(|e| EngineError::Connection(format!("Failed to connect to Sqlite: {e}")))?;

    Ok(Self { conn })
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
        values.push(get_sqlite_value(&row, c)?);
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
impl DbAdapter for SqliteAdapter {
  fn backend(&self) -> BackendKind {
    BackendKind::Sqlite
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

  async fn table_columns(&mut self, table: &str, _schema: Option<&str>) -> Result<Vec<ColumnMeta>, EngineError> {
    let pragma_query = format!("PRAGMA table_info({table})");
    let rows =
      sqlx::query(&pragma_query).fetch_all(&mut self.conn).await.map_err(|e| EngineError::Execution(e.to_string()))?;

    let columns: Vec<ColumnMeta> = rows
      .into_iter()
      .filter_map(|row| {
        let name = row.try_get::<String, _>("name").ok()?;
        let data_type = row.try_get::<String, _>("type").ok()?;
        let not_null = row.try_get::<i32, _>("notnull").ok()?;
        let pk = row.try_get::<i32, _>("pk").ok()?;
        Some(ColumnMeta { name, data_type, is_nullable: not_null == 0, is_primary_key: pk > 0 })
      })
      .collect();

    Ok(columns)
  }

  async fn insert_row(&mut self, table: &str, values: &[(String, CellValue)]) -> Result<u64, EngineError> {
    let columns: Vec<String> = values.iter().map(|(name, _)| format!("\"{name}\"")).collect();
    let placeholders: Vec<&str> = values.iter().map(|_| "?").collect();
    let sql = format!("INSERT INTO {table} ({}) VALUES ({})", columns.join(", "), placeholders.join(", "));

    let mut query = sqlx::query(&sql);
    for (_, value) in values {
      query = query.bind(value.as_deref());
    }
    let result = query.execute(&mut self.conn).await.map_err(|e| EngineError::Execution(e.to_string()))?;
    Ok(result.rows_affected())
  }

  async fn update_cell(
    &mut self,
    table: &str,
    column: &str,
    value: &CellValue,
    original: &CellValue,
    key: &RowKey,
  ) -> Result<u64, EngineError> {
    let guard = match original {
      Some(_) => format!("\"{column}\" = ?"),
      None => format!("\"{column}\" IS NULL"),
    };
    let sql = format!("UPDATE {table} SET \"{column}\" = ? WHERE \"{}\" = ? AND {guard}", key.pk_column);

    let mut query = sqlx::query(&sql).bind(value.as_deref()).bind(key.pk_value.as_str());
    if let Some(original) = original {
      query = query.bind(original.as_str());
    }
    let result = query.execute(&mut self.conn).await.map_err(|e| EngineError::Execution(e.to_string()))?;
    Ok(result.rows_affected())
  }

  async fn delete_row(&mut self, table: &str, key: &RowKey) -> Result<u64, EngineError> {
    let sql = format!("DELETE FROM {table} WHERE \"{}\" = ?", key.pk_column);
    let result = sqlx::query(&sql)
      .bind(key.pk_value.as_str())
      .execute(&mut self.conn)
      .await
      .map_err(|e| EngineError::Execution(e.to_string()))?;
    Ok(result.rows_affected())
  }
}

fn get_sqlite_value(row: &SqliteRow, column: &SqliteColumn) -> Result<CellValue, EngineError> {
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
    let value: Option<String> = value;
    Ok(value)
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
    let value: Option<&[u8]> = value;
    Ok(value.map(|values| format!("\\x{}", values.iter().map(|v| format!("{v:02x}")).collect::<String>())))
  } else {
    Err(EngineError::Execution(format!("Unknown type for column {column_name}")))
  }
}
