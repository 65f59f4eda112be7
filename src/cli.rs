use clap::Parser;

use crate::{
  connection::{BackendKind, ConnectionDescriptor},
  utils::version,
};

#[derive(Parser, Debug)]
#[command(author, version = version(), about)]
pub struct Cli {
  // Database connection options
  #[arg(short('H'), long = "host", value_name = "HOST", help = "Database server host or socket directory")]
  pub host: Option<String>,

  #[arg(short('p'), long = "port", value_name = "PORT", help = "Database server port")]
  pub port: Option<u16>,

  #[arg(short('U'), long = "username", value_name = "USERNAME", help = "Database user name")]
  pub username: Option<String>,

  #[arg(short('d'), long = "dbname", value_name = "DBNAME", help = "Database name to connect to")]
  pub dbname: Option<String>,

  #[arg(long = "connection-string", value_name = "CONNECTION_STRING", help = "Full PostgreSQL connection string")]
  pub connection_string: Option<String>,

  #[arg(
    long = "sslmode",
    value_name = "SSLMODE",
    help = "SSL mode (disable, allow, prefer, require, verify-ca, verify-full)"
  )]
  pub sslmode: Option<String>,

  // SQLite option
  #[arg(short('f'), long = "file", value_name = "FILE", help = "SQLite database file to use")]
  pub filename: Option<String>,

  // REST-backed source option
  #[arg(long = "url", value_name = "URL", help = "Instance URL for a REST table-API source")]
  pub url: Option<String>,

  // Positional database name (psql compatibility)
  #[arg(value_name = "DBNAME", help = "Database name (if not specified with -d)")]
  pub database: Option<String>,

  // Execution options
  #[arg(short('c'), long = "command", value_name = "SQL", help = "Statement to execute")]
  pub command: Option<String>,

  #[arg(long = "limit", value_name = "ROWS", help = "Page size appended to SELECTs (0 disables)")]
  pub limit: Option<u64>,

  #[arg(long = "offset", value_name = "ROWS", help = "Row offset for the first page")]
  pub offset: Option<u64>,

  #[arg(long = "timeout-ms", value_name = "MS", help = "Per-query timeout in milliseconds")]
  pub timeout_ms: Option<u64>,

  #[arg(long = "export", value_name = "FILE", help = "Write the result set to a CSV file")]
  pub export: Option<String>,
}

impl Cli {
  /// Database name, preferring -d/--dbname over the positional argument.
  pub fn get_database_name(&self) -> Option<&String> {
    self.dbname.as_ref().or(self.database.as_ref())
  }

  pub fn backend(&self) -> BackendKind {
    if self.filename.is_some() {
      BackendKind::Sqlite
    } else if self.url.is_some() {
      BackendKind::ServiceNow
    } else {
      BackendKind::Postgres
    }
  }

  /// Resolve a connection descriptor with CLI > ENV > default priority.
  pub fn build_descriptor(&self) -> Result<ConnectionDescriptor, String> {
    match self.backend() {
      BackendKind::Sqlite => {
        let file = self.filename.as_deref().unwrap_or(":memory:");
        Ok(ConnectionDescriptor::sqlite(format!("sqlite:{file}"), file))
      },
      BackendKind::ServiceNow => {
        let url = self.url.as_deref().ok_or("missing --url")?;
        let username =
          self.username.clone().or_else(|| std::env::var("SN_USERNAME").ok()).ok_or("missing REST username")?;
        let password = std::env::var("SN_PASSWORD").unwrap_or_default();
        Ok(ConnectionDescriptor::servicenow(url.to_string(), url, &username, &password))
      },
      BackendKind::Postgres => self.build_pg_descriptor(),
    }
  }

  fn build_pg_descriptor(&self) -> Result<ConnectionDescriptor, String> {
    let env_host = std::env::var("PGHOST").ok();
    let env_port = std::env::var("PGPORT").ok().and_then(|s| s.parse().ok());
    let env_user = std::env::var("PGUSER").ok();
    let env_database = std::env::var("PGDATABASE").ok();
    let env_password = std::env::var("PGPASSWORD").ok();

    let host = self.host.clone().or(env_host).unwrap_or_else(|| "localhost".to_string());
    let port = self.port.or(env_port).unwrap_or(5432);
    let username = self.username.clone().or(env_user).unwrap_or_else(|| "postgres".to_string());
    let database = self.get_database_name().cloned().or(env_database).unwrap_or_else(|| "postgres".to_string());
    let password = env_password.unwrap_or_default();

    let sslmode =
      self.sslmode.clone().or_else(|| std::env::var("PGSSLMODE").ok()).unwrap_or_else(|| "prefer".to_string());
    let valid_sslmodes = ["disable", "allow", "prefer", "require", "verify-ca", "verify-full"];
    if !valid_sslmodes.contains(&sslmode.as_str()) {
      return Err(format!("Invalid SSL mode '{}'. Valid options: {}", sslmode, valid_sslmodes.join(", ")));
    }

    let id =
      self.connection_string.clone().unwrap_or_else(|| format!("postgresql://{username}@{host}:{port}/{database}"));
    let mut descriptor = ConnectionDescriptor::postgres(id, &host, port, &database, &username, &password);
    descriptor.sslmode = Some(sslmode);
    if let Some(conn_str) = &self.connection_string {
      descriptor.url = Some(conn_str.clone());
    }
    Ok(descriptor)
  }
}
