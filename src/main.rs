use std::{path::Path, sync::Arc};

use clap::Parser;
use color_eyre::eyre::{eyre, Result};
use querydesk::{
  adapter::AdapterFactory,
  classify::StatementKind,
  cli::Cli,
  config::Config,
  coordinator::{TabStatus, Workspace},
  event::EngineEvent,
  grid::GridModel,
  history::{HistoryStore, SqliteHistoryStore},
  plan::{self, PlanNode},
  process::{self, ProcessMonitor, SqliteProcessLog},
  utils::{get_data_dir, initialize_logging, initialize_panic_handler},
  SqlxAdapterFactory,
};

async fn tokio_main() -> Result<()> {
  initialize_logging()?;

  initialize_panic_handler()?;

  let args = Cli::parse();
  let mut config = Config::new()?;
  if let Some(timeout_ms) = args.timeout_ms {
    config.query_timeout_ms = timeout_ms;
  }
  if let Some(limit) = args.limit {
    config.default_limit = limit;
  }

  let descriptor = args.build_descriptor().map_err(|e| eyre!(e))?;
  let sql = args.command.clone().ok_or_else(|| eyre!("no statement given; use -c/--command"))?;

  std::fs::create_dir_all(get_data_dir())?;
  let history: Arc<dyn HistoryStore> =
    Arc::new(SqliteHistoryStore::open(&config.history_db_path(), config.history_limit).await?);
  let factory: Arc<dyn AdapterFactory> = Arc::new(SqlxAdapterFactory);

  let (mut workspace, mut rx) = Workspace::new(&config, factory, history);
  let tab = workspace.add_tab();
  workspace.execute_at(tab, &descriptor, &sql, 0, args.offset.unwrap_or(0))?;

  loop {
    let Some(event) = rx.recv().await else { break };
    if let EngineEvent::QueryProgress { elapsed_ms, .. } = &event {
      eprintln!("Running... {:.1}s", *elapsed_ms as f64 / 1000.0);
    }
    let finished = matches!(event, EngineEvent::QueryFinished { .. });
    workspace.handle_event(&event).await;
    if finished {
      break;
    }
  }

  let is_explain = matches!(workspace.tab(tab).and_then(|s| s.kind()), Some(StatementKind::Explain { .. }));
  match workspace.tab(tab).map(|s| s.status) {
    Some(TabStatus::Succeeded) => {
      if workspace.tab(tab).map_or(false, |s| s.grid.is_some()) {
        workspace.refresh_grid_metadata(tab).await.ok();
      }
      let state = workspace.tab(tab).ok_or_else(|| eyre!("tab state lost"))?;
      match &state.grid {
        Some(grid) if is_explain => print_explain(grid),
        Some(grid) => {
          print!("{}", render_table(grid));
          println!("{} row(s) in {}ms{}", grid.row_count(), state.last_elapsed_ms, if state.has_more { " (more available)" } else { "" });
        },
        None => println!("OK ({}ms)", state.last_elapsed_ms),
      }

      if let Some(export) = &args.export {
        let state = workspace.tab(tab).ok_or_else(|| eyre!("tab state lost"))?;
        if let Some(grid) = &state.grid {
          export_grid(grid, Path::new(export), &descriptor.name, &config, workspace.event_sender(), &mut rx).await?;
        }
      }
    },
    Some(TabStatus::Failed) => {
      let message = workspace.tab(tab).and_then(|s| s.last_error.clone()).unwrap_or_default();
      return Err(eyre!("query failed: {message}"));
    },
    Some(TabStatus::TimedOut) => {
      return Err(eyre!("query timed out after {}ms", config.query_timeout_ms));
    },
    Some(TabStatus::Cancelled) => {
      eprintln!("cancelled");
    },
    _ => {},
  }

  Ok(())
}

fn render_table(grid: &GridModel) -> String {
  let names: Vec<&str> = grid.columns.iter().map(|c| c.name.as_str()).collect();
  let mut widths: Vec<usize> = names.iter().map(|n| n.len()).collect();
  for i in 0..grid.row_count() {
    if let Some(row) = grid.row(i) {
      for (col, cell) in row.cells.iter().enumerate() {
        let len = cell.current.as_deref().unwrap_or("NULL").len();
        if len > widths[col] {
          widths[col] = len;
        }
      }
    }
  }

  let mut out = String::new();
  let header: Vec<String> = names.iter().zip(&widths).map(|(n, w)| format!("{n:<width$}", width = *w)).collect();
  out.push_str(&header.join(" | "));
  out.push('\n');
  out.push_str(&widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("-+-"));
  out.push('\n');
  for i in 0..grid.row_count() {
    if let Some(row) = grid.row(i) {
      let line: Vec<String> =
        row.cells.iter().zip(&widths).map(|(c, w)| format!("{:<width$}", c.current.as_deref().unwrap_or("NULL"), width = *w)).collect();
      out.push_str(&line.join(" | "));
      out.push('\n');
    }
  }
  out
}

/// A JSON-format plan comes back as a single cell; render the enriched tree,
/// falling back to the plain table when the payload doesn't parse.
fn print_explain(grid: &GridModel) {
  let payload = grid.row(0).and_then(|row| row.cells.first()).and_then(|cell| cell.current.clone());
  match payload.as_deref().and_then(plan::parse_plan) {
    Some(tree) => {
      print_plan_node(&tree.root, 0);
      if let Some(total) = tree.execution_time_ms {
        println!("Execution time: {total:.3}ms");
      }
    },
    None => print!("{}", render_table(grid)),
  }
}

fn print_plan_node(node: &PlanNode, depth: usize) {
  let indent = "  ".repeat(depth);
  let mut line = format!("{indent}{}", node.node_type);
  if let Some(cost) = node.total_cost {
    line.push_str(&format!(" cost={cost:.2}"));
  }
  if let (Some(exclusive), Some(inclusive)) = (node.exclusive_time_ms, node.inclusive_time_ms) {
    line.push_str(&format!(" time={exclusive:.3}ms (incl {inclusive:.3}ms)"));
  }
  if let Some(rows) = node.actual_rows.or(node.plan_rows) {
    line.push_str(&format!(" rows={rows}"));
  }
  println!("{line}");
  for child in &node.children {
    print_plan_node(child, depth + 1);
  }
}

async fn export_grid(
  grid: &GridModel,
  path: &Path,
  server: &str,
  config: &Config,
  tx: tokio::sync::mpsc::UnboundedSender<EngineEvent>,
  rx: &mut tokio::sync::mpsc::UnboundedReceiver<EngineEvent>,
) -> Result<()> {
  let log = Arc::new(SqliteProcessLog::open(&config.process_db_path()).await?);
  let monitor = ProcessMonitor::new(log, tx);

  let columns: Vec<String> = grid.columns.iter().map(|c| c.name.clone()).collect();
  let rows: Vec<Vec<querydesk::CellValue>> =
    (0..grid.row_count()).filter_map(|i| grid.row(i)).map(|r| r.cells.iter().map(|c| c.current.clone()).collect()).collect();
  let target = path.to_path_buf();
  monitor.spawn("csv export", Some(server), async move { process::export_csv(&target, &columns, &rows) }).await?;

  loop {
    match rx.recv().await {
      Some(EngineEvent::ProcessFinished { detail, .. }) => {
        println!("{detail}");
        return Ok(());
      },
      Some(EngineEvent::ProcessFailed { detail, .. }) => return Err(eyre!("export failed: {detail}")),
      Some(_) => continue,
      None => return Err(eyre!("event channel closed during export")),
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  if let Err(e) = tokio_main().await {
    eprintln!("{} error: Something went wrong", env!("CARGO_PKG_NAME"));
    Err(e)
  } else {
    Ok(())
  }
}
