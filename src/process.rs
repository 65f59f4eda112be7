use std::{
  path::Path,
  sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteConnectOptions, Row, SqlitePool};
use strum::{Display, EnumString};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::{adapter::CellValue, error::EngineError, event::EngineEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum ProcessStatus {
  Running,
  Finished,
  Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRecord {
  pub pid: i64,
  pub name: String,
  /// Connection the job ran against, when it had one.
  pub server: Option<String>,
  pub status: ProcessStatus,
  pub detail: Option<String>,
  pub started_at: DateTime<Utc>,
  pub finished_at: Option<DateTime<Utc>>,
}

/// Persistence boundary for long-running background jobs (exports and the
/// like). The engine records lifecycle transitions here; how the records are
/// browsed is the caller's business.
#[async_trait]
pub trait ProcessLog: Send + Sync {
  /// Open a new record in `Running` state and return its pid.
  async fn record_process_started(&self, name: &str, server: Option<&str>) -> Result<i64, EngineError>;

  async fn record_process_finished(&self, pid: i64, detail: &str) -> Result<(), EngineError>;

  async fn record_process_error(&self, pid: i64, message: &str) -> Result<(), EngineError>;

  /// Records newest first, optionally restricted to one server.
  async fn list_processes(&self, server: Option<&str>) -> Result<Vec<ProcessRecord>, EngineError>;
}

pub struct SqliteProcessLog {
  pool: SqlitePool,
}

impl SqliteProcessLog {
  pub async fn open(path: &Path) -> Result<Self, EngineError> {
    let options = SqliteConnectOptions::new().filename(path).create_if_missing(true);
    let pool = SqlitePool::connect_with(options).await?;

    sqlx::query(
      "CREATE TABLE IF NOT EXISTS process_log (
         pid INTEGER PRIMARY KEY AUTOINCREMENT,
         name TEXT NOT NULL,
         server TEXT,
         status TEXT NOT NULL,
         detail TEXT,
         started_at TEXT NOT NULL,
         finished_at TEXT
       )",
    )
    .execute(&pool)
    .await?;

    Ok(Self { pool })
  }

  async fn close_record(&self, pid: i64, status: ProcessStatus, detail: &str) -> Result<(), EngineError> {
    sqlx::query("UPDATE process_log SET status = ?, detail = ?, finished_at = ? WHERE pid = ?")
      .bind(status.to_string())
      .bind(detail)
      .bind(Utc::now().to_rfc3339())
      .bind(pid)
      .execute(&self.pool)
      .await?;
    Ok(())
  }
}

#[async_trait]
impl ProcessLog for SqliteProcessLog {
  async fn record_process_started(&self, name: &str, server: Option<&str>) -> Result<i64, EngineError> {
    let result = sqlx::query("INSERT INTO process_log (name, server, status, started_at) VALUES (?, ?, ?, ?)")
      .bind(name)
      .bind(server)
      .bind(ProcessStatus::Running.to_string())
      .bind(Utc::now().to_rfc3339())
      .execute(&self.pool)
      .await?;
    Ok(result.last_insert_rowid())
  }

  async fn record_process_finished(&self, pid: i64, detail: &str) -> Result<(), EngineError> {
    self.close_record(pid, ProcessStatus::Finished, detail).await
  }

  async fn record_process_error(&self, pid: i64, message: &str) -> Result<(), EngineError> {
    self.close_record(pid, ProcessStatus::Failed, message).await
  }

  async fn list_processes(&self, server: Option<&str>) -> Result<Vec<ProcessRecord>, EngineError> {
    let rows = match server {
      Some(server) => {
        sqlx::query(
          "SELECT pid, name, server, status, detail, started_at, finished_at
           FROM process_log WHERE server = ? ORDER BY pid DESC",
        )
        .bind(server)
        .fetch_all(&self.pool)
        .await?
      },
      None => {
        sqlx::query("SELECT pid, name, server, status, detail, started_at, finished_at FROM process_log ORDER BY pid DESC")
          .fetch_all(&self.pool)
          .await?
      },
    };

    let records = rows
      .into_iter()
      .filter_map(|row| {
        let status = row.try_get::<String, _>("status").ok()?.parse().ok()?;
        let started_at =
          DateTime::parse_from_rfc3339(&row.try_get::<String, _>("started_at").ok()?).ok()?.with_timezone(&Utc);
        let finished_at = row
          .try_get::<Option<String>, _>("finished_at")
          .ok()?
          .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
          .map(|t| t.with_timezone(&Utc));
        Some(ProcessRecord {
          pid: row.try_get("pid").ok()?,
          name: row.try_get("name").ok()?,
          server: row.try_get("server").ok()?,
          status,
          detail: row.try_get("detail").ok()?,
          started_at,
          finished_at,
        })
      })
      .collect();

    Ok(records)
  }
}

/// In-memory log for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryProcessLog {
  records: Mutex<Vec<ProcessRecord>>,
}

#[async_trait]
impl ProcessLog for MemoryProcessLog {
  async fn record_process_started(&self, name: &str, server: Option<&str>) -> Result<i64, EngineError> {
    let mut records = self.records.lock().unwrap();
    let pid = records.len() as i64 + 1;
    records.push(ProcessRecord {
      pid,
      name: name.to_string(),
      server: server.map(str::to_string),
      status: ProcessStatus::Running,
      detail: None,
      started_at: Utc::now(),
      finished_at: None,
    });
    Ok(pid)
  }

  async fn record_process_finished(&self, pid: i64, detail: &str) -> Result<(), EngineError> {
    let mut records = self.records.lock().unwrap();
    if let Some(record) = records.iter_mut().find(|r| r.pid == pid) {
      record.status = ProcessStatus::Finished;
      record.detail = Some(detail.to_string());
      record.finished_at = Some(Utc::now());
    }
    Ok(())
  }

  async fn record_process_error(&self, pid: i64, message: &str) -> Result<(), EngineError> {
    let mut records = self.records.lock().unwrap();
    if let Some(record) = records.iter_mut().find(|r| r.pid == pid) {
      record.status = ProcessStatus::Failed;
      record.detail = Some(message.to_string());
      record.finished_at = Some(Utc::now());
    }
    Ok(())
  }

  async fn list_processes(&self, server: Option<&str>) -> Result<Vec<ProcessRecord>, EngineError> {
    let mut records: Vec<ProcessRecord> = self
      .records
      .lock()
      .unwrap()
      .iter()
      .filter(|r| server.map_or(true, |s| r.server.as_deref() == Some(s)))
      .cloned()
      .collect();
    records.reverse();
    Ok(records)
  }
}

/// Runs one background job at a time, recording its lifecycle in the process
/// log and mirroring the transitions onto the event channel. A second spawn
/// while one job is in flight is rejected rather than queued.
pub struct ProcessMonitor {
  log: Arc<dyn ProcessLog>,
  tx: UnboundedSender<EngineEvent>,
  in_flight: Arc<Mutex<Option<i64>>>,
}

impl ProcessMonitor {
  pub fn new(log: Arc<dyn ProcessLog>, tx: UnboundedSender<EngineEvent>) -> Self {
    Self { log, tx, in_flight: Arc::new(Mutex::new(None)) }
  }

  pub fn is_busy(&self) -> bool {
    self.in_flight.lock().unwrap().is_some()
  }

  /// Spawn `job` as the single background process. The job's Ok value
  /// becomes the finish detail (e.g. "1500 rows written").
  pub async fn spawn<F>(&self, name: &str, server: Option<&str>, job: F) -> Result<i64, EngineError>
  where
    F: std::future::Future<Output = Result<String, EngineError>> + Send + 'static,
  {
    {
      let mut in_flight = self.in_flight.lock().unwrap();
      if in_flight.is_some() {
        return Err(EngineError::Execution("a background process is already running".to_string()));
      }
      // pid is assigned below; reserve the slot first so a racing spawn
      // fails fast.
      *in_flight = Some(0);
    }

    let pid = match self.log.record_process_started(name, server).await {
      Ok(pid) => pid,
      Err(e) => {
        *self.in_flight.lock().unwrap() = None;
        return Err(e);
      },
    };
    *self.in_flight.lock().unwrap() = Some(pid);
    let _ = self.tx.send(EngineEvent::ProcessStarted { pid });

    let log = Arc::clone(&self.log);
    let tx = self.tx.clone();
    let in_flight = Arc::clone(&self.in_flight);
    let name = name.to_string();
    tokio::spawn(async move {
      let result = job.await;
      match result {
        Ok(detail) => {
          debug!(pid, name, "process finished: {detail}");
          let _ = log.record_process_finished(pid, &detail).await;
          let _ = tx.send(EngineEvent::ProcessFinished { pid, detail });
        },
        Err(e) => {
          debug!(pid, name, "process failed: {e}");
          let message = e.to_string();
          let _ = log.record_process_error(pid, &message).await;
          let _ = tx.send(EngineEvent::ProcessFailed { pid, detail: message });
        },
      }
      *in_flight.lock().unwrap() = None;
    });

    Ok(pid)
  }
}

/// Write a result set to `path` as CSV. NULL renders as an empty field.
pub fn export_csv(path: &Path, columns: &[String], rows: &[Vec<CellValue>]) -> Result<String, EngineError> {
  let mut writer = csv::Writer::from_path(path).map_err(|e| EngineError::Execution(e.to_string()))?;
  writer.write_record(columns).map_err(|e| EngineError::Execution(e.to_string()))?;
  for row in rows {
    let record: Vec<&str> = row.iter().map(|cell| cell.as_deref().unwrap_or("")).collect();
    writer.write_record(&record).map_err(|e| EngineError::Execution(e.to_string()))?;
  }
  writer.flush().map_err(|e| EngineError::Execution(e.to_string()))?;
  Ok(format!("{} row(s) written to {}", rows.len(), path.display()))
}
