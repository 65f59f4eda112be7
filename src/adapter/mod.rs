pub mod postgres;
pub mod servicenow;
pub mod sqlite;

use std::future::Future;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
  connection::{BackendKind, ConnectionDescriptor},
  error::EngineError,
};

/// One fetched or edited cell. `None` is SQL NULL.
pub type CellValue = Option<String>;

/// Column metadata from the backend catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
  pub name: String,
  pub data_type: String,
  pub is_nullable: bool,
  pub is_primary_key: bool,
}

/// What a statement produced: a result set or an affected-row count.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
  Rows { columns: Vec<String>, rows: Vec<Vec<CellValue>> },
  Affected(u64),
}

/// Primary-key bundle captured at fetch time, the sole predicate for row
/// mutations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowKey {
  pub pk_column: String,
  pub pk_value: String,
}

/// Uniform execute/fetch interface over one open backend connection.
///
/// Each execution owns its connection for the duration of the call; there is
/// no pooling or reuse. Placeholder syntax never leaks out of an
/// implementation: callers hand over column/value pairs and the adapter binds
/// them natively (`$N` for Postgres, `?` for SQLite, inline-quoted literals
/// for the REST-backed source).
#[async_trait]
pub trait DbAdapter: Send {
  fn backend(&self) -> BackendKind;

  /// Run one statement. `returns_rows` is the classifier's verdict and
  /// decides whether to fetch a result set or report an affected count.
  /// A raised cancellation token makes the call return `Cancelled` promptly;
  /// whether the backend actually stops mid-statement is best-effort.
  async fn execute(
    &mut self,
    sql: &str,
    returns_rows: bool,
    cancel: &CancellationToken,
  ) -> Result<QueryOutput, EngineError>;

  /// Catalog lookup for the grid's primary-key discovery. An empty result
  /// means the backend cannot answer and the caller falls back to heuristics.
  async fn table_columns(&mut self, table: &str, schema: Option<&str>) -> Result<Vec<ColumnMeta>, EngineError>;

  async fn insert_row(&mut self, table: &str, values: &[(String, CellValue)]) -> Result<u64, EngineError>;

  /// Set a single column on the row identified by `key`. `original` is the
  /// cell's captured fetch-time value and joins the WHERE clause as an
  /// optimistic guard; zero affected rows means the row changed underneath
  /// the edit.
  async fn update_cell(
    &mut self,
    table: &str,
    column: &str,
    value: &CellValue,
    original: &CellValue,
    key: &RowKey,
  ) -> Result<u64, EngineError>;

  async fn delete_row(&mut self, table: &str, key: &RowKey) -> Result<u64, EngineError>;
}

/// Opens adapters for descriptors. The engine holds one factory and connects
/// per execution; tests substitute a scripted implementation.
#[async_trait]
pub trait AdapterFactory: Send + Sync {
  async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<Box<dyn DbAdapter>, EngineError>;
}

/// Factory for the real backends, dispatching on the descriptor's kind.
#[derive(Debug, Default)]
pub struct SqlxAdapterFactory;

#[async_trait]
impl AdapterFactory for SqlxAdapterFactory {
  async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<Box<dyn DbAdapter>, EngineError> {
    match descriptor.backend {
      BackendKind::Postgres => Ok(Box::new(postgres::PostgresAdapter::connect(descriptor).await?)),
      BackendKind::Sqlite => Ok(Box::new(sqlite::SqliteAdapter::connect(descriptor).await?)),
      BackendKind::ServiceNow => Ok(Box::new(servicenow::ServiceNowAdapter::connect(descriptor)?)),
    }
  }
}

/// Race a backend call against the cancellation token so callers return
/// promptly instead of blocking until backend completion.
pub(crate) async fn with_cancel<T, F>(cancel: &CancellationToken, call: F) -> Result<T, EngineError>
where
  F: Future<Output = Result<T, EngineError>>,
{
  tokio::select! {
    biased;
    _ = cancel.cancelled() => Err(EngineError::Cancelled),
    result = call => result,
  }
}
