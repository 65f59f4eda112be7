use thiserror::Error;

/// Failure taxonomy for the execution engine.
///
/// Backend-provided messages are preserved verbatim inside `Connection` and
/// `Execution` so the UI can surface them unchanged. `Cancelled` and
/// `TimedOut` are not failures of the statement itself; they suppress result
/// delivery and map to their own history statuses.
#[derive(Debug, Error)]
pub enum EngineError {
  #[error("connection failed: {0}")]
  Connection(String),

  #[error("{0}")]
  Execution(String),

  #[error("cancelled")]
  Cancelled,

  #[error("timed out after {0}ms")]
  TimedOut(u64),

  #[error("no primary key found for table {table}")]
  MissingPrimaryKey { table: String },

  #[error("row {row} no longer matches its fetched state")]
  StaleEdit { row: usize },

  #[error("no row found in {table} for the captured key")]
  RowNotFound { table: String },

  #[error("statement is empty")]
  EmptyStatement,

  #[error("result set has no editable source table")]
  NoEditableTable,

  #[error("an unsaved new row is already pending")]
  PendingInsertExists,

  #[error("store error: {0}")]
  Store(#[from] sqlx::Error),

  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),
}

impl EngineError {
  /// True for outcomes that end an execution without counting as a failure.
  pub fn is_interruption(&self) -> bool {
    matches!(self, EngineError::Cancelled | EngineError::TimedOut(_))
  }
}
