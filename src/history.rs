use std::{path::Path, str::FromStr, sync::Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteConnectOptions, Row, SqlitePool};
use strum::{Display, EnumString};

use crate::{error::EngineError, event::TaskOutcome};

/// How many recent entries are scanned for duplicate suppression.
const DEDUPE_WINDOW: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum ExecutionStatus {
  Success,
  Failure,
  Cancelled,
  TimedOut,
}

impl From<&TaskOutcome> for ExecutionStatus {
  fn from(outcome: &TaskOutcome) -> Self {
    match outcome {
      TaskOutcome::Succeeded { .. } => ExecutionStatus::Success,
      TaskOutcome::Failed { .. } => ExecutionStatus::Failure,
      TaskOutcome::Cancelled { .. } => ExecutionStatus::Cancelled,
      TaskOutcome::TimedOut { .. } => ExecutionStatus::TimedOut,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
  pub id: i64,
  pub connection_id: String,
  pub query: String,
  pub status: ExecutionStatus,
  pub row_count: i64,
  pub duration_ms: i64,
  pub executed_at: DateTime<Utc>,
}

/// Persistence boundary for executed-query history. One entry is written per
/// terminal transition; the store owns entry lifecycle.
#[async_trait]
pub trait HistoryStore: Send + Sync {
  async fn save_history(
    &self,
    connection_id: &str,
    query: &str,
    status: ExecutionStatus,
    row_count: i64,
    duration_ms: i64,
  ) -> Result<(), EngineError>;

  /// Entries for one connection, newest first.
  async fn get_history(&self, connection_id: &str) -> Result<Vec<HistoryEntry>, EngineError>;

  async fn delete_history(&self, entry_id: i64) -> Result<(), EngineError>;

  async fn delete_all_history(&self, connection_id: &str) -> Result<(), EngineError>;
}

/// SQLite-backed history store. Duplicate query texts within the most recent
/// entries are suppressed and the table is pruned to a retention cap, so the
/// file never grows without bound.
pub struct SqliteHistoryStore {
  pool: SqlitePool,
  retain: u32,
}

impl SqliteHistoryStore {
  pub async fn open(path: &Path, retain: u32) -> Result<Self, EngineError> {
    let options = SqliteConnectOptions::new().filename(path).create_if_missing(true);
    let pool = SqlitePool::connect_with(options).await?;

    sqlx::query(
      "CREATE TABLE IF NOT EXISTS query_history (
         id INTEGER PRIMARY KEY AUTOINCREMENT,
         connection_id TEXT NOT NULL,
         query_text TEXT NOT NULL,
         status TEXT NOT NULL,
         row_count INTEGER NOT NULL DEFAULT 0,
         duration_ms INTEGER NOT NULL DEFAULT 0,
         executed_at TEXT NOT NULL
       )",
    )
    .execute(&pool)
    .await?;

    Ok(Self { pool, retain })
  }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
  async fn save_history(
    &self,
    connection_id: &str,
    query: &str,
    status: ExecutionStatus,
    row_count: i64,
    duration_ms: i64,
  ) -> Result<(), EngineError> {
    let duplicate = sqlx::query(
      "SELECT 1 FROM (
         SELECT query_text, status FROM query_history
         WHERE connection_id = ? ORDER BY id DESC LIMIT ?
       ) WHERE query_text = ? AND status = ?",
    )
    .bind(connection_id)
    .bind(DEDUPE_WINDOW)
    .bind(query)
    .bind(status.to_string())
    .fetch_optional(&self.pool)
    .await?;

    if duplicate.is_none() {
      sqlx::query(
        "INSERT INTO query_history (connection_id, query_text, status, row_count, duration_ms, executed_at)
         VALUES (?, ?, ?, ?, ?, ?)",
      )
      .bind(connection_id)
      .bind(query)
      .bind(status.to_string())
      .bind(row_count)
      .bind(duration_ms)
      .bind(Utc::now().to_rfc3339())
      .execute(&self.pool)
      .await?;
    }

    sqlx::query("DELETE FROM query_history WHERE id NOT IN (SELECT id FROM query_history ORDER BY id DESC LIMIT ?)")
      .bind(i64::from(self.retain))
      .execute(&self.pool)
      .await?;

    Ok(())
  }

  async fn get_history(&self, connection_id: &str) -> Result<Vec<HistoryEntry>, EngineError> {
    let rows = sqlx::query(
      "SELECT id, connection_id, query_text, status, row_count, duration_ms, executed_at
       FROM query_history WHERE connection_id = ? ORDER BY id DESC",
    )
    .bind(connection_id)
    .fetch_all(&self.pool)
    .await?;

    let entries = rows
      .into_iter()
      .filter_map(|row| {
        let status = ExecutionStatus::from_str(&row.try_get::<String, _>("status").ok()?).ok()?;
        let executed_at =
          DateTime::parse_from_rfc3339(&row.try_get::<String, _>("executed_at").ok()?).ok()?.with_timezone(&Utc);
        Some(HistoryEntry {
          id: row.try_get("id").ok()?,
          connection_id: row.try_get("connection_id").ok()?,
          query: row.try_get("query_text").ok()?,
          status,
          row_count: row.try_get("row_count").ok()?,
          duration_ms: row.try_get("duration_ms").ok()?,
          executed_at,
        })
      })
      .collect();

    Ok(entries)
  }

  async fn delete_history(&self, entry_id: i64) -> Result<(), EngineError> {
    sqlx::query("DELETE FROM query_history WHERE id = ?").bind(entry_id).execute(&self.pool).await?;
    Ok(())
  }

  async fn delete_all_history(&self, connection_id: &str) -> Result<(), EngineError> {
    sqlx::query("DELETE FROM query_history WHERE connection_id = ?").bind(connection_id).execute(&self.pool).await?;
    Ok(())
  }
}

/// In-memory store, handy for tests and for running without a data
/// directory.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
  entries: Mutex<Vec<HistoryEntry>>,
  next_id: Mutex<i64>,
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
  async fn save_history(
    &self,
    connection_id: &str,
    query: &str,
    status: ExecutionStatus,
    row_count: i64,
    duration_ms: i64,
  ) -> Result<(), EngineError> {
    let mut next_id = self.next_id.lock().unwrap();
    *next_id += 1;
    self.entries.lock().unwrap().push(HistoryEntry {
      id: *next_id,
      connection_id: connection_id.to_string(),
      query: query.to_string(),
      status,
      row_count,
      duration_ms,
      executed_at: Utc::now(),
    });
    Ok(())
  }

  async fn get_history(&self, connection_id: &str) -> Result<Vec<HistoryEntry>, EngineError> {
    let mut entries: Vec<HistoryEntry> =
      self.entries.lock().unwrap().iter().filter(|e| e.connection_id == connection_id).cloned().collect();
    entries.reverse();
    Ok(entries)
  }

  async fn delete_history(&self, entry_id: i64) -> Result<(), EngineError> {
    self.entries.lock().unwrap().retain(|e| e.id != entry_id);
    Ok(())
  }

  async fn delete_all_history(&self, connection_id: &str) -> Result<(), EngineError> {
    self.entries.lock().unwrap().retain(|e| e.connection_id != connection_id);
    Ok(())
  }
}
