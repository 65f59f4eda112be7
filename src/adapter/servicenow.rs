use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{with_cancel, CellValue, ColumnMeta, DbAdapter, QueryOutput, RowKey};
use crate::{
  classify::strip_comments,
  connection::{BackendKind, ConnectionDescriptor},
  error::EngineError,
};

lazy_static! {
  static ref SELECT_SHAPE: Regex =
    Regex::new(r"(?is)^\s*select\s+(?P<fields>.+?)\s+from\s+(?P<table>[A-Za-z0-9_.]+)(?P<rest>.*)$").unwrap();
  static ref WHERE_CLAUSE: Regex =
    Regex::new(r"(?is)\bwhere\s+(?P<cond>.+?)(?:\border\s+by\b|\blimit\b|\boffset\b|;|$)").unwrap();
  static ref LIMIT_CLAUSE: Regex = Regex::new(r"(?i)\blimit\s+(\d+)").unwrap();
  static ref OFFSET_CLAUSE: Regex = Regex::new(r"(?i)\boffset\s+(\d+)").unwrap();
}

/// Adapter for the ServiceNow-style REST source. SQL never reaches a real
/// database here: a narrow SELECT shape is translated onto the table API
/// (`sysparm_query`, `sysparm_limit`, `sysparm_offset`) and row mutations map
/// onto POST/PATCH/DELETE against `/api/now/table/<table>`. Literals are
/// interpolated inline when building query strings; there is no placeholder
/// protocol to bind against.
pub struct ServiceNowAdapter {
  client: reqwest::Client,
  base_url: String,
  username: String,
  password: String,
}

impl ServiceNowAdapter {
  pub fn connect(descriptor: &ConnectionDescriptor) -> Result<Self, EngineError> {
    let base_url = descriptor
      .url
      .as_deref()
      .ok_or_else(|| EngineError::Connection("missing instance URL".to_string()))?
      .trim_end_matches('/')
      .to_string();
    let client = reqwest::Client::builder().build().map_err(|e| EngineError::Connection(e.to_string()))?;

    Ok(Self {
      client,
      base_url,
      username: descriptor.username.clone().unwrap_or_default(),
      password: descriptor.password.clone().unwrap_or_default(),
    })
  }

  fn table_url(&self, table: &str) -> String {
    format!("{}/api/now/table/{table}", self.base_url)
  }

  async fn fetch_table(&self, sql: &str) -> Result<QueryOutput, EngineError> {
    let stripped = strip_comments(sql);
    let caps = SELECT_SHAPE
      .captures(&stripped)
      .ok_or_else(|| EngineError::Execution(format!("unsupported statement for REST source: {}", sql.trim())))?;

    let table = caps["table"].to_string();
    let fields: Vec<String> =
      caps["fields"].split(',').map(|f| f.trim().trim_matches('"').to_string()).filter(|f| !f.is_empty()).collect();
    let rest = &caps["rest"];

    let mut request = self.client.get(self.table_url(&table)).basic_auth(&self.username, Some(&self.password));
    if fields.first().map(String::as_str) != Some("*") {
      request = request.query(&[("sysparm_fields", fields.join(","))]);
    }
    if let Some(cond) = WHERE_CLAUSE.captures(rest).map(|c| c["cond"].trim().to_string()) {
      request = request.query(&[("sysparm_query", sql_condition_to_sysparm(&cond))]);
    }
    if let Some(limit) = LIMIT_CLAUSE.captures(rest).and_then(|c| c[1].parse::<u64>().ok()) {
      request = request.query(&[("sysparm_limit", limit.to_string())]);
    }
    if let Some(offset) = OFFSET_CLAUSE.captures(rest).and_then(|c| c[1].parse::<u64>().ok()) {
      request = request.query(&[("sysparm_offset", offset.to_string())]);
    }

    let response = request.send().await?;
    let status = response.status();
    let body: Value = response.json().await?;
    if !status.is_success() {
      return Err(EngineError::Execution(format!("{status}: {body}")));
    }

    let records = body.get("result").and_then(Value::as_array).cloned().unwrap_or_default();
    let columns: Vec<String> = if fields.first().map(String::as_str) != Some("*") {
      fields
    } else {
      records
        .first()
        .and_then(Value::as_object)
        .map(|obj| obj.keys().cloned().collect())
        .unwrap_or_default()
    };

    let rows = records
      .iter()
      .map(|record| columns.iter().map(|name| record.get(name).map(render_field).unwrap_or(None)).collect())
      .collect();

    Ok(QueryOutput::Rows { columns, rows })
  }

  async fn send_mutation(&self, request: reqwest::RequestBuilder) -> Result<u64, EngineError> {
    let response = request.basic_auth(&self.username, Some(&self.password)).send().await?;
    let status = response.status();
    if status.is_success() {
      Ok(1)
    } else {
      let body = response.text().await.unwrap_or_default();
      Err(EngineError::Execution(format!("{status}: {body}")))
    }
  }

  /// Rows are addressed by sys_id in the REST API; a non-sys_id key is
  /// resolved through one lookup keyed on the captured primary key.
  async fn resolve_sys_id(&self, table: &str, key: &RowKey) -> Result<String, EngineError> {
    if key.pk_column == "sys_id" {
      return Ok(key.pk_value.clone());
    }

    let response = self
      .client
      .get(self.table_url(table))
      .basic_auth(&self.username, Some(&self.password))
      .query(&[
        ("sysparm_query", format!("{}={}", key.pk_column, key.pk_value)),
        ("sysparm_fields", "sys_id".to_string()),
        ("sysparm_limit", "1".to_string()),
      ])
      .send()
      .await?;
    let body: Value = response.json().await?;
    sys_id_from_lookup(&body, table)
  }
}

fn sys_id_from_lookup(body: &Value, table: &str) -> Result<String, EngineError> {
  body
    .get("result")
    .and_then(Value::as_array)
    .and_then(|records| records.first())
    .and_then(|record| record.get("sys_id"))
    .and_then(Value::as_str)
    .map(str::to_string)
    .ok_or_else(|| EngineError::RowNotFound { table: table.to_string() })
}

#[async_trait::async_trait]
impl DbAdapter for ServiceNowAdapter {
  fn backend(&self) -> BackendKind {
    BackendKind::ServiceNow
  }

  async fn execute(
    &mut self,
    sql: &str,
    returns_rows: bool,
    cancel: &CancellationToken,
  ) -> Result<QueryOutput, EngineError> {
    if !returns_rows {
      return Err(EngineError::Execution("the REST source only supports SELECT statements".to_string()));
    }
    with_cancel(cancel, self.fetch_table(sql)).await
  }

  async fn table_columns(&mut self, _table: &str, _schema: Option<&str>) -> Result<Vec<ColumnMeta>, EngineError> {
    // No catalog over the table API; callers fall back to the heuristic
    // primary-key guess, which picks up sys_id.
    Ok(vec![])
  }

  async fn insert_row(&mut self, table: &str, values: &[(String, CellValue)]) -> Result<u64, EngineError> {
    let body: serde_json::Map<String, Value> = values
      .iter()
      .map(|(name, value)| (name.clone(), value.as_deref().map_or(Value::Null, |v| Value::String(v.to_string()))))
      .collect();
    self.send_mutation(self.client.post(self.table_url(table)).json(&body)).await
  }

  async fn update_cell(
    &mut self,
    table: &str,
    column: &str,
    value: &CellValue,
    _original: &CellValue,
    key: &RowKey,
  ) -> Result<u64, EngineError> {
    // The table API has no conditional update, so the optimistic guard the
    // SQL backends apply is not expressible here.
    let sys_id = self.resolve_sys_id(table, key).await?;
    let mut body = serde_json::Map::new();
    body.insert(column.to_string(), value.as_deref().map_or(Value::Null, |v| Value::String(v.to_string())));
    self.send_mutation(self.client.patch(format!("{}/{sys_id}", self.table_url(table))).json(&body)).await
  }

  async fn delete_row(&mut self, table: &str, key: &RowKey) -> Result<u64, EngineError> {
    let sys_id = self.resolve_sys_id(table, key).await?;
    self.send_mutation(self.client.delete(format!("{}/{sys_id}", self.table_url(table)))).await
  }
}

/// Best-effort mapping of a SQL boolean condition to an encoded sysparm
/// query: AND/OR become `^`/`^OR`, `=` survives, quotes are dropped.
fn sql_condition_to_sysparm(cond: &str) -> String {
  let mut out = String::new();
  for (i, clause) in cond.split_whitespace().collect::<Vec<_>>().split(|w| w.eq_ignore_ascii_case("and")).enumerate() {
    if i > 0 {
      out.push('^');
    }
    out.push_str(&clause.join(" ").replace(" = ", "=").replace('\'', ""));
  }
  out
}

fn render_field(value: &Value) -> CellValue {
  match value {
    Value::Null => None,
    Value::String(s) => Some(s.clone()),
    // Reference fields come back as {"value": ..., "link": ...}.
    Value::Object(obj) if obj.contains_key("value") => obj.get("value").and_then(render_field),
    other => Some(other.to_string()),
  }
}
