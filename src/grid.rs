use std::collections::BTreeSet;

use lazy_static::lazy_static;
use regex::Regex;

use crate::{
  adapter::{CellValue, ColumnMeta, DbAdapter, RowKey},
  error::EngineError,
};

lazy_static! {
  static ref FROM_TABLE: Regex = Regex::new(r#"(?i)\bfrom\s+([A-Za-z0-9_."'`\[\]]+)"#).unwrap();
}

/// How many row-level errors a summary message spells out before truncating.
const REPORTED_ERRORS: usize = 5;

/// Source table of a result set, parsed best-effort out of the executed SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableIdentity {
  pub schema: Option<String>,
  pub name: String,
}

impl TableIdentity {
  /// The form used when generating INSERT/UPDATE/DELETE statements.
  pub fn qualified(&self) -> String {
    match &self.schema {
      Some(schema) => format!("{schema}.{}", self.name),
      None => self.name.clone(),
    }
  }
}

/// Pull `schema.table` out of a `FROM <identifier>` clause, stripping quote
/// and bracket characters. `None` disables editing for the result set.
pub fn extract_table(sql: &str) -> Option<TableIdentity> {
  let raw = FROM_TABLE.captures(sql)?.get(1)?.as_str();
  let cleaned: String = raw.chars().filter(|c| !matches!(c, '"' | '\'' | '`' | '[' | ']')).collect();
  let mut parts: Vec<&str> = cleaned.split('.').filter(|p| !p.is_empty()).collect();

  let name = parts.pop()?.to_string();
  if name.is_empty() {
    return None;
  }
  Some(TableIdentity { schema: parts.pop().map(str::to_string), name })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridColumn {
  pub name: String,
  pub data_type: String,
  pub is_primary_key: bool,
}

/// One cell: the displayed value plus the fetch-time snapshot it is diffed
/// against. The snapshot never refreshes mid-session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridCell {
  pub original: CellValue,
  pub current: CellValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridRow {
  pub cells: Vec<GridCell>,
  /// Primary-key bundle captured at fetch time. `None` flags the row as
  /// not safely mutable.
  pub key: Option<RowKey>,
}

/// Outcome of a save-changes pass. Errors are collected, never raised
/// individually, so a batch with a few failures still applies the rest.
#[derive(Debug)]
pub struct SaveReport {
  pub inserted: bool,
  pub updated: usize,
  pub errors: Vec<(usize, EngineError)>,
}

impl SaveReport {
  pub fn summary(&self) -> String {
    if !self.inserted && self.updated == 0 && self.errors.is_empty() {
      return "No changes to save".to_string();
    }
    let mut parts = vec![];
    if self.inserted {
      parts.push("1 row inserted".to_string());
    }
    if self.updated > 0 {
      parts.push(format!("{} cell(s) updated", self.updated));
    }
    if !self.errors.is_empty() {
      let shown: Vec<String> =
        self.errors.iter().take(REPORTED_ERRORS).map(|(row, e)| format!("row {row}: {e}")).collect();
      parts.push(format!("{} failed ({})", self.errors.len(), shown.join("; ")));
    }
    parts.join(", ")
  }
}

#[derive(Debug)]
pub struct DeleteReport {
  pub deleted: usize,
  pub errors: Vec<(usize, EngineError)>,
}

impl DeleteReport {
  pub fn summary(&self) -> String {
    if self.errors.is_empty() {
      return format!("{} row(s) deleted", self.deleted);
    }
    let shown: Vec<String> =
      self.errors.iter().take(REPORTED_ERRORS).map(|(row, e)| format!("row {row}: {e}")).collect();
    format!("{} row(s) deleted, {} failed ({})", self.deleted, self.errors.len(), shown.join("; "))
  }
}

/// Row-indexed, column-indexed editable model over one result set.
#[derive(Debug)]
pub struct GridModel {
  pub table: Option<TableIdentity>,
  pub columns: Vec<GridColumn>,
  rows: Vec<GridRow>,
  modified: BTreeSet<(usize, usize)>,
  pending_insert: Option<usize>,
  pk_index: Option<usize>,
}

/// NULL and the empty string count as the same value, so round-tripped NULLs
/// never show up as phantom edits.
fn values_equal(a: &CellValue, b: &CellValue) -> bool {
  let norm = |v: &CellValue| match v {
    Some(s) if s.is_empty() => None,
    other => other.clone(),
  };
  norm(a) == norm(b)
}

impl GridModel {
  /// Build the model from a fetched result set with heuristic column
  /// metadata; `apply_catalog` upgrades it once real catalog data arrives.
  pub fn from_result(sql: &str, columns: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
    let table = extract_table(sql);
    let pk_index = columns.iter().position(|name| {
      let lower = name.to_lowercase();
      lower.contains("id") || lower.contains("uuid") || lower.contains("pk")
    });

    let grid_columns: Vec<GridColumn> = columns
      .iter()
      .enumerate()
      .map(|(i, name)| GridColumn { name: name.clone(), data_type: String::new(), is_primary_key: Some(i) == pk_index })
      .collect();

    let grid_rows = rows
      .into_iter()
      .map(|values| {
        let key = capture_key_at(&grid_columns, pk_index, &values);
        GridRow { cells: values.into_iter().map(|v| GridCell { original: v.clone(), current: v }).collect(), key }
      })
      .collect();

    Self { table, columns: grid_columns, rows: grid_rows, modified: BTreeSet::new(), pending_insert: None, pk_index }
  }

  /// Replace the heuristic metadata with backend catalog columns and
  /// recapture primary keys from the original fetch snapshots.
  pub fn apply_catalog(&mut self, catalog: &[ColumnMeta]) {
    for column in &mut self.columns {
      if let Some(meta) = catalog.iter().find(|m| m.name == column.name) {
        column.data_type = meta.data_type.clone();
        column.is_primary_key = meta.is_primary_key;
      }
    }

    if let Some(pk) = self.columns.iter().position(|c| c.is_primary_key) {
      self.pk_index = Some(pk);
      for row in &mut self.rows {
        let originals: Vec<CellValue> = row.cells.iter().map(|c| c.original.clone()).collect();
        row.key = capture_key_at(&self.columns, self.pk_index, &originals);
      }
    }
  }

  pub fn row_count(&self) -> usize {
    self.rows.len()
  }

  pub fn row(&self, index: usize) -> Option<&GridRow> {
    self.rows.get(index)
  }

  pub fn pending_insert(&self) -> Option<usize> {
    self.pending_insert
  }

  pub fn modified_coords(&self) -> impl Iterator<Item = &(usize, usize)> {
    self.modified.iter()
  }

  pub fn is_dirty(&self, row: usize, col: usize) -> bool {
    self.modified.contains(&(row, col))
  }

  pub fn has_changes(&self) -> bool {
    self.pending_insert.is_some() || !self.modified.is_empty()
  }

  /// Set a cell's displayed value, maintaining the dirty mark: a cell is
  /// dirty when its current value differs from the fetch-time snapshot, and
  /// reverting it clears the mark.
  pub fn set_cell(&mut self, row: usize, col: usize, value: CellValue) {
    let Some(cell) = self.rows.get_mut(row).and_then(|r| r.cells.get_mut(col)) else {
      return;
    };
    cell.current = value;
    if values_equal(&cell.current, &cell.original) {
      self.modified.remove(&(row, col));
    } else {
      self.modified.insert((row, col));
    }
  }

  /// Append a blank row and mark it as the single pending insert.
  pub fn append_blank_row(&mut self) -> Result<usize, EngineError> {
    if self.pending_insert.is_some() {
      return Err(EngineError::PendingInsertExists);
    }
    let blank = GridRow {
      cells: self.columns.iter().map(|_| GridCell { original: None, current: None }).collect(),
      key: None,
    };
    self.rows.push(blank);
    let index = self.rows.len() - 1;
    self.pending_insert = Some(index);
    Ok(index)
  }

  /// Process the pending insert (first) and then every modified coordinate,
  /// one UPDATE per cell keyed by the row's captured primary key. Per-cell
  /// failures accumulate without aborting the rest; successes advance the
  /// cell's snapshot and clear its dirty mark.
  pub async fn save_changes(&mut self, adapter: &mut dyn DbAdapter) -> Result<SaveReport, EngineError> {
    if !self.has_changes() {
      return Ok(SaveReport { inserted: false, updated: 0, errors: vec![] });
    }
    let table = self.table.clone().ok_or(EngineError::NoEditableTable)?;
    let mut report = SaveReport { inserted: false, updated: 0, errors: vec![] };

    if let Some(insert_row) = self.pending_insert {
      let values: Vec<(String, CellValue)> = self
        .columns
        .iter()
        .zip(&self.rows[insert_row].cells)
        .map(|(column, cell)| {
          // Empty string maps to NULL on insert.
          let value = cell.current.clone().filter(|v| !v.is_empty());
          (column.name.clone(), value)
        })
        .collect();

      match adapter.insert_row(&table.qualified(), &values).await {
        Ok(_) => {
          self.pending_insert = None;
          for (col, cell) in self.rows[insert_row].cells.iter_mut().enumerate() {
            cell.original = cell.current.clone();
            self.modified.remove(&(insert_row, col));
          }
          report.inserted = true;
        },
        Err(e) => report.errors.push((insert_row, e)),
      }
    }

    let coords: Vec<(usize, usize)> = self.modified.iter().copied().collect();
    for (row, col) in coords {
      if Some(row) == self.pending_insert {
        continue; // still buffered, nothing to update yet
      }
      let Some(key) = self.rows[row].key.clone() else {
        report.errors.push((row, EngineError::MissingPrimaryKey { table: table.qualified() }));
        continue;
      };
      let column = self.columns[col].name.clone();
      let cell = &self.rows[row].cells[col];
      let value = cell.current.clone().filter(|v| !v.is_empty());
      let original = cell.original.clone();

      match adapter.update_cell(&table.qualified(), &column, &value, &original, &key).await {
        Ok(0) => report.errors.push((row, EngineError::StaleEdit { row })),
        Ok(_) => {
          let cell = &mut self.rows[row].cells[col];
          cell.original = cell.current.clone();
          self.modified.remove(&(row, col));
          report.updated += 1;
        },
        Err(e) => report.errors.push((row, e)),
      }
    }

    Ok(report)
  }

  /// Delete the given rows, highest index first so remaining indices stay
  /// valid while rows leave the model one by one. Rows without a discoverable
  /// primary key fail with MissingPrimaryKey and are kept.
  pub async fn delete_rows(&mut self, adapter: &mut dyn DbAdapter, indices: &[usize]) -> Result<DeleteReport, EngineError> {
    let table = self.table.clone().ok_or(EngineError::NoEditableTable)?;
    let mut ordered: Vec<usize> = indices.iter().copied().filter(|&i| i < self.rows.len()).collect();
    ordered.sort_unstable_by(|a, b| b.cmp(a));
    ordered.dedup();

    let mut report = DeleteReport { deleted: 0, errors: vec![] };
    for row in ordered {
      if Some(row) == self.pending_insert {
        // Discarding the buffered insert needs no statement.
        self.remove_row(row);
        report.deleted += 1;
        continue;
      }
      let Some(key) = self.rows[row].key.clone() else {
        report.errors.push((row, EngineError::MissingPrimaryKey { table: table.qualified() }));
        continue;
      };
      match adapter.delete_row(&table.qualified(), &key).await {
        Ok(0) => report.errors.push((row, EngineError::StaleEdit { row })),
        Ok(_) => {
          self.remove_row(row);
          report.deleted += 1;
        },
        Err(e) => report.errors.push((row, e)),
      }
    }

    Ok(report)
  }

  fn remove_row(&mut self, row: usize) {
    self.rows.remove(row);
    self.modified = self
      .modified
      .iter()
      .filter(|(r, _)| *r != row)
      .map(|&(r, c)| if r > row { (r - 1, c) } else { (r, c) })
      .collect();
    self.pending_insert = match self.pending_insert {
      Some(p) if p == row => None,
      Some(p) if p > row => Some(p - 1),
      other => other,
    };
  }
}

fn capture_key_at(columns: &[GridColumn], pk_index: Option<usize>, values: &[CellValue]) -> Option<RowKey> {
  let pk = pk_index?;
  let pk_value = values.get(pk)?.clone()?;
  Some(RowKey { pk_column: columns.get(pk)?.name.clone(), pk_value })
}
