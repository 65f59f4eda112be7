use serde::{Deserialize, Serialize};
use strum::Display;

/// The closed set of supported backends. Dispatch is always a match on this
/// enum, never a string comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
  Postgres,
  Sqlite,
  ServiceNow,
}

/// Everything needed to open one connection to a backend.
///
/// Descriptors are loaded by the connection registry and never mutated by the
/// engine; executions borrow them read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
  /// Stable identifier, used to key history entries.
  pub id: String,
  /// Display name shown in the UI.
  pub name: String,
  pub backend: BackendKind,
  pub host: Option<String>,
  pub port: Option<u16>,
  pub database: Option<String>,
  pub username: Option<String>,
  pub password: Option<String>,
  /// SQLite database file.
  pub file: Option<String>,
  /// Base URL for the REST-backed source.
  pub url: Option<String>,
  pub sslmode: Option<String>,
}

impl ConnectionDescriptor {
  pub fn postgres(id: impl Into<String>, host: &str, port: u16, database: &str, username: &str, password: &str) -> Self {
    let id = id.into();
    Self {
      name: format!("{username}@{host}/{database}"),
      id,
      backend: BackendKind::Postgres,
      host: Some(host.to_string()),
      port: Some(port),
      database: Some(database.to_string()),
      username: Some(username.to_string()),
      password: Some(password.to_string()),
      file: None,
      url: None,
      sslmode: None,
    }
  }

  pub fn sqlite(id: impl Into<String>, file: &str) -> Self {
    let id = id.into();
    Self {
      name: file.to_string(),
      id,
      backend: BackendKind::Sqlite,
      host: None,
      port: None,
      database: None,
      username: None,
      password: None,
      file: Some(file.to_string()),
      url: None,
      sslmode: None,
    }
  }

  pub fn servicenow(id: impl Into<String>, url: &str, username: &str, password: &str) -> Self {
    let id = id.into();
    Self {
      name: url.to_string(),
      id,
      backend: BackendKind::ServiceNow,
      host: None,
      port: None,
      database: None,
      username: Some(username.to_string()),
      password: Some(password.to_string()),
      file: None,
      url: Some(url.to_string()),
      sslmode: None,
    }
  }

  /// Build a PostgreSQL connection string with CLI > ENV > default priority
  /// already resolved into the descriptor fields. A full connection string in
  /// `url` wins over the individual fields.
  pub fn pg_connection_string(&self) -> String {
    if let Some(url) = &self.url {
      return url.clone();
    }
    let host = self.host.as_deref().unwrap_or("localhost");
    let port = self.port.unwrap_or(5432);
    let username = self.username.as_deref().unwrap_or("postgres");
    let database = self.database.as_deref().unwrap_or("postgres");
    let sslmode = self.sslmode.as_deref().unwrap_or("prefer");

    match self.password.as_deref() {
      Some(password) if !password.is_empty() => {
        format!("postgresql://{username}:{password}@{host}:{port}/{database}?sslmode={sslmode}")
      },
      _ => format!("postgresql://{username}@{host}:{port}/{database}?sslmode={sslmode}"),
    }
  }
}
