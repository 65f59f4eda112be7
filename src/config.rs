use std::{path::PathBuf, time::Duration};

use color_eyre::eyre::Result;
use serde::Deserialize;

use crate::utils::{get_config_dir, get_data_dir};

const CONFIG_FILE: &str = "config.toml";

/// Engine settings, layered as defaults < config file < environment.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Wall-clock budget for one execution, in milliseconds.
  pub query_timeout_ms: u64,
  /// Rows appended as `LIMIT n` to select-shaped statements. 0 disables
  /// augmentation entirely.
  pub default_limit: u64,
  /// Permits on the shared dispatch semaphore.
  pub max_concurrent_queries: usize,
  /// History rows kept before the oldest are pruned.
  pub history_limit: u32,
}

impl Default for Config {
  fn default() -> Self {
    Self { query_timeout_ms: 300_000, default_limit: 200, max_concurrent_queries: 4, history_limit: 1000 }
  }
}

impl Config {
  pub fn new() -> Result<Self> {
    let defaults = Config::default();
    let config_path = get_config_dir().join(CONFIG_FILE);

    let builder = config::Config::builder()
      .set_default("query_timeout_ms", defaults.query_timeout_ms)?
      .set_default("default_limit", defaults.default_limit)?
      .set_default("max_concurrent_queries", defaults.max_concurrent_queries as u64)?
      .set_default("history_limit", defaults.history_limit)?
      .add_source(config::File::from(config_path).format(config::FileFormat::Toml).required(false))
      .add_source(config::Environment::with_prefix("QUERYDESK"));

    let cfg = builder.build()?.try_deserialize()?;
    Ok(cfg)
  }

  pub fn query_timeout(&self) -> Duration {
    Duration::from_millis(self.query_timeout_ms)
  }

  pub fn history_db_path(&self) -> PathBuf {
    get_data_dir().join("history.db")
  }

  pub fn process_db_path(&self) -> PathBuf {
    get_data_dir().join("process_log.db")
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  #[test]
  fn defaults_are_sane() {
    let config = Config::default();
    assert_eq!(config.query_timeout(), Duration::from_secs(300));
    assert_eq!(config.default_limit, 200);
    assert_eq!(config.max_concurrent_queries, 4);
  }
}
