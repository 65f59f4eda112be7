use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use querydesk::{
    adapter::{AdapterFactory, CellValue, ColumnMeta, DbAdapter, QueryOutput, RowKey},
    connection::{BackendKind, ConnectionDescriptor},
    error::EngineError,
};
use tokio_util::sync::CancellationToken;

/// Shared record of everything the scripted backend was asked to do.
pub type Journal = Arc<Mutex<Vec<String>>>;

/// Factory for scripted adapters: a fixed result set behind an optional
/// delay, with every connect and statement written to a journal.
#[derive(Clone)]
pub struct ScriptedFactory {
    delay: Duration,
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
    affected: u64,
    mutation_affected: u64,
    fail_with: Option<String>,
    catalog: Vec<ColumnMeta>,
    journal: Journal,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self {
            delay: Duration::from_millis(1),
            columns: vec!["id".to_string(), "name".to_string()],
            rows: vec![
                vec![Some("7".to_string()), Some("Alice".to_string())],
                vec![Some("8".to_string()), Some("Bob".to_string())],
            ],
            affected: 1,
            mutation_affected: 1,
            fail_with: None,
            catalog: vec![],
            journal: Arc::new(Mutex::new(vec![])),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_result(mut self, columns: &[&str], rows: Vec<Vec<CellValue>>) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self.rows = rows;
        self
    }

    pub fn with_affected(mut self, affected: u64) -> Self {
        self.affected = affected;
        self
    }

    /// Affected-row count reported for update/delete mutations. Zero
    /// simulates a row changed underneath the edit.
    pub fn with_mutation_affected(mut self, affected: u64) -> Self {
        self.mutation_affected = affected;
        self
    }

    pub fn failing_with(mut self, message: &str) -> Self {
        self.fail_with = Some(message.to_string());
        self
    }

    pub fn with_catalog(mut self, catalog: Vec<ColumnMeta>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn journal(&self) -> Journal {
        Arc::clone(&self.journal)
    }
}

impl Default for ScriptedFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AdapterFactory for ScriptedFactory {
    async fn connect(&self, _descriptor: &ConnectionDescriptor) -> Result<Box<dyn DbAdapter>, EngineError> {
        self.journal.lock().unwrap().push("CONNECT".to_string());
        Ok(Box::new(ScriptedAdapter { script: self.clone() }))
    }
}

pub struct ScriptedAdapter {
    script: ScriptedFactory,
}

#[async_trait]
impl DbAdapter for ScriptedAdapter {
    fn backend(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    async fn execute(
        &mut self,
        sql: &str,
        returns_rows: bool,
        cancel: &CancellationToken,
    ) -> Result<QueryOutput, EngineError> {
        self.script.journal.lock().unwrap().push(format!("EXECUTE {sql}"));
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            _ = tokio::time::sleep(self.script.delay) => {},
        }
        if let Some(message) = &self.script.fail_with {
            return Err(EngineError::Execution(message.clone()));
        }
        if returns_rows {
            Ok(QueryOutput::Rows { columns: self.script.columns.clone(), rows: self.script.rows.clone() })
        } else {
            Ok(QueryOutput::Affected(self.script.affected))
        }
    }

    async fn table_columns(&mut self, table: &str, _schema: Option<&str>) -> Result<Vec<ColumnMeta>, EngineError> {
        self.script.journal.lock().unwrap().push(format!("COLUMNS {table}"));
        Ok(self.script.catalog.clone())
    }

    async fn insert_row(&mut self, table: &str, values: &[(String, CellValue)]) -> Result<u64, EngineError> {
        let rendered: Vec<String> = values
            .iter()
            .map(|(name, value)| format!("{name}={}", value.as_deref().unwrap_or("NULL")))
            .collect();
        self.script.journal.lock().unwrap().push(format!("INSERT {table} ({})", rendered.join(", ")));
        Ok(self.script.mutation_affected)
    }

    async fn update_cell(
        &mut self,
        table: &str,
        column: &str,
        value: &CellValue,
        original: &CellValue,
        key: &RowKey,
    ) -> Result<u64, EngineError> {
        self.script.journal.lock().unwrap().push(format!(
            "UPDATE {table} SET {column}={} WHERE {}={} AND {column} WAS {}",
            value.as_deref().unwrap_or("NULL"),
            key.pk_column,
            key.pk_value,
            original.as_deref().unwrap_or("NULL"),
        ));
        Ok(self.script.mutation_affected)
    }

    async fn delete_row(&mut self, table: &str, key: &RowKey) -> Result<u64, EngineError> {
        self.script.journal.lock().unwrap().push(format!("DELETE {table} WHERE {}={}", key.pk_column, key.pk_value));
        Ok(self.script.mutation_affected)
    }
}
