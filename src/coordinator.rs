use std::{collections::HashMap, sync::Arc, time::Duration};

use strum::Display;
use tokio::sync::{
  mpsc::{self, UnboundedReceiver, UnboundedSender},
  Semaphore,
};
use tracing::{debug, warn};

use crate::{
  adapter::AdapterFactory,
  classify::{self, StatementKind},
  config::Config,
  connection::ConnectionDescriptor,
  error::EngineError,
  event::{EngineEvent, TabId, TaskId, TaskOutcome},
  grid::{DeleteReport, GridModel, SaveReport},
  history::{ExecutionStatus, HistoryStore},
  task::{self, QuerySpec, TaskHandle},
};

/// Lifecycle of a tab's current (or most recent) execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum TabStatus {
  Idle,
  Submitted,
  Running,
  Succeeded,
  Failed,
  Cancelled,
  TimedOut,
}

impl TabStatus {
  pub fn is_terminal(&self) -> bool {
    matches!(self, TabStatus::Succeeded | TabStatus::Failed | TabStatus::Cancelled | TabStatus::TimedOut)
  }
}

/// Everything the engine tracks for one worksheet tab. At most one execution
/// is tracked at a time; starting a new one supersedes the old.
pub struct TabState {
  pub status: TabStatus,
  pub limit: u64,
  pub offset: u64,
  /// True when the last page came back full, so another page may exist.
  pub has_more: bool,
  pub grid: Option<GridModel>,
  pub last_error: Option<String>,
  pub last_elapsed_ms: u64,
  /// Statement as extracted from the buffer, before LIMIT/OFFSET
  /// augmentation. Re-executed as-is when paging.
  statement: Option<String>,
  kind: Option<StatementKind>,
  descriptor: Option<ConnectionDescriptor>,
  running: Option<TaskHandle>,
}

impl TabState {
  fn new(limit: u64) -> Self {
    Self {
      status: TabStatus::Idle,
      limit,
      offset: 0,
      has_more: false,
      grid: None,
      last_error: None,
      last_elapsed_ms: 0,
      statement: None,
      kind: None,
      descriptor: None,
      running: None,
    }
  }

  pub fn is_running(&self) -> bool {
    self.running.is_some()
  }

  pub fn running_task(&self) -> Option<TaskId> {
    self.running.as_ref().map(|h| h.id())
  }

  pub fn statement(&self) -> Option<&str> {
    self.statement.as_deref()
  }

  pub fn kind(&self) -> Option<&StatementKind> {
    self.kind.as_ref()
  }
}

/// Owns the tabs, dispatches executions, and applies every worker-side
/// completion from the event channel. All mutation of tab state happens on
/// the thread that drains the receiver; workers only ever send messages.
pub struct Workspace {
  factory: Arc<dyn AdapterFactory>,
  history: Arc<dyn HistoryStore>,
  permits: Arc<Semaphore>,
  timeout: Duration,
  default_limit: u64,
  tx: UnboundedSender<EngineEvent>,
  tabs: HashMap<TabId, TabState>,
  next_tab: TabId,
}

impl Workspace {
  pub fn new(
    config: &Config,
    factory: Arc<dyn AdapterFactory>,
    history: Arc<dyn HistoryStore>,
  ) -> (Self, UnboundedReceiver<EngineEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let workspace = Self {
      factory,
      history,
      permits: Arc::new(Semaphore::new(config.max_concurrent_queries)),
      timeout: config.query_timeout(),
      default_limit: config.default_limit,
      tx,
      tabs: HashMap::new(),
      next_tab: 1,
    };
    (workspace, rx)
  }

  /// Sender side of the event channel, for components that report through
  /// the same loop (e.g. the process monitor).
  pub fn event_sender(&self) -> UnboundedSender<EngineEvent> {
    self.tx.clone()
  }

  pub fn add_tab(&mut self) -> TabId {
    let id = self.next_tab;
    self.next_tab += 1;
    self.tabs.insert(id, TabState::new(self.default_limit));
    id
  }

  /// Closing a tab abandons its tracked execution: cancellation is requested
  /// and any late outcome will find no tab to land on.
  pub fn close_tab(&mut self, tab: TabId) {
    if let Some(state) = self.tabs.remove(&tab) {
      if let Some(handle) = state.running {
        handle.cancel();
      }
    }
  }

  pub fn tab(&self, tab: TabId) -> Option<&TabState> {
    self.tabs.get(&tab)
  }

  pub fn tab_mut(&mut self, tab: TabId) -> Option<&mut TabState> {
    self.tabs.get_mut(&tab)
  }

  /// True while any tab has a tracked execution; drives the global cancel
  /// affordance. Recomputed from tab state, never cached.
  pub fn any_running(&self) -> bool {
    self.tabs.values().any(TabState::is_running)
  }

  /// Execute the statement under the cursor in `text` on the given tab.
  /// Pagination resets to the first page.
  pub fn execute(
    &mut self,
    tab: TabId,
    descriptor: &ConnectionDescriptor,
    text: &str,
    cursor: usize,
  ) -> Result<TaskId, EngineError> {
    self.execute_at(tab, descriptor, text, cursor, 0)
  }

  /// Like `execute`, starting from an explicit row offset.
  pub fn execute_at(
    &mut self,
    tab: TabId,
    descriptor: &ConnectionDescriptor,
    text: &str,
    cursor: usize,
    offset: u64,
  ) -> Result<TaskId, EngineError> {
    let statement = classify::statement_at_cursor(text, cursor).ok_or(EngineError::EmptyStatement)?;
    if statement.trim().is_empty() {
      return Err(EngineError::EmptyStatement);
    }
    if let Some(state) = self.tabs.get_mut(&tab) {
      state.offset = offset;
    }
    self.dispatch(tab, descriptor.clone(), statement)
  }

  /// Re-run the tab's last statement one page further on.
  pub fn next_page(&mut self, tab: TabId) -> Result<TaskId, EngineError> {
    self.turn_page(tab, true)
  }

  pub fn prev_page(&mut self, tab: TabId) -> Result<TaskId, EngineError> {
    self.turn_page(tab, false)
  }

  fn turn_page(&mut self, tab: TabId, forward: bool) -> Result<TaskId, EngineError> {
    let state = self.tabs.get_mut(&tab).ok_or(EngineError::EmptyStatement)?;
    let statement = state.statement.clone().ok_or(EngineError::EmptyStatement)?;
    let descriptor = state.descriptor.clone().ok_or(EngineError::EmptyStatement)?;
    if state.limit == 0 {
      return Err(EngineError::Execution("pagination is disabled (limit 0)".to_string()));
    }
    if forward {
      state.offset += state.limit;
    } else {
      state.offset = state.offset.saturating_sub(state.limit);
    }
    self.dispatch(tab, descriptor, statement)
  }

  fn dispatch(&mut self, tab: TabId, descriptor: ConnectionDescriptor, statement: String) -> Result<TaskId, EngineError> {
    let state = self.tabs.entry(tab).or_insert_with(|| TabState::new(self.default_limit));

    let kind = classify::classify(&statement);
    let sql = classify::prepare_for_execution(&statement, &kind, state.limit, state.offset);

    // Supersede: the old task is cancelled and forgotten. Its outcome will
    // carry a stale id and be discarded on arrival.
    if let Some(previous) = state.running.take() {
      debug!(tab, task = %previous.id(), "superseding running execution");
      previous.cancel();
    }

    let handle = task::spawn(
      QuerySpec { tab, descriptor: descriptor.clone(), sql, kind: kind.clone() },
      Arc::clone(&self.factory),
      Arc::clone(&self.permits),
      self.timeout,
      self.tx.clone(),
    );
    let id = handle.id();

    state.status = TabStatus::Submitted;
    state.statement = Some(statement);
    state.kind = Some(kind);
    state.descriptor = Some(descriptor);
    state.running = Some(handle);
    state.last_error = None;

    Ok(id)
  }

  /// Request cancellation of the tab's tracked execution, if any. The status
  /// flips when the task reports its terminal outcome, not here.
  pub fn cancel(&mut self, tab: TabId) {
    if let Some(handle) = self.tabs.get(&tab).and_then(|s| s.running.as_ref()) {
      handle.cancel();
    }
  }

  pub fn cancel_all(&mut self) {
    for state in self.tabs.values() {
      if let Some(handle) = &state.running {
        handle.cancel();
      }
    }
  }

  /// Apply one event from the channel. Returns false when the event was
  /// discarded (unknown tab, or an outcome from a superseded task).
  pub async fn handle_event(&mut self, event: &EngineEvent) -> bool {
    match event {
      EngineEvent::QuerySubmitted { tab, task } => {
        let Some(state) = self.tabs.get_mut(tab) else { return false };
        if state.running_task() != Some(*task) {
          return false;
        }
        state.status = TabStatus::Running;
        true
      },
      EngineEvent::QueryProgress { tab, task, .. } => {
        self.tabs.get(tab).map_or(false, |s| s.running_task() == Some(*task))
      },
      EngineEvent::QueryFinished { tab, task, outcome } => self.apply_outcome(*tab, *task, outcome).await,
      // Process lifecycle events carry no tab state.
      EngineEvent::ProcessStarted { .. } | EngineEvent::ProcessFinished { .. } | EngineEvent::ProcessFailed { .. } => {
        true
      },
    }
  }

  async fn apply_outcome(&mut self, tab: TabId, task: TaskId, outcome: &TaskOutcome) -> bool {
    let Some(state) = self.tabs.get_mut(&tab) else {
      debug!(%task, tab, "discarding outcome for closed tab");
      return false;
    };
    if state.running_task() != Some(task) {
      debug!(%task, tab, "discarding outcome from superseded task");
      return false;
    }
    state.running = None;
    state.last_elapsed_ms = outcome.elapsed_ms();

    match outcome {
      TaskOutcome::Succeeded { columns, rows, .. } => {
        state.status = TabStatus::Succeeded;
        state.last_error = None;
        // EXPLAIN and other row-producing statements land in the grid too;
        // only paginatable SELECTs can have further pages.
        let returns_rows = state.kind.as_ref().map_or(false, StatementKind::returns_rows);
        let select_shaped = state.kind.as_ref().map_or(false, StatementKind::is_select_shaped);
        if returns_rows {
          state.has_more = select_shaped && state.limit > 0 && rows.len() as u64 == state.limit;
          let statement = state.statement.clone().unwrap_or_default();
          state.grid = Some(GridModel::from_result(&statement, columns.clone(), rows.clone()));
        } else {
          state.has_more = false;
          state.grid = None;
        }
      },
      TaskOutcome::Failed { message, .. } => {
        state.status = TabStatus::Failed;
        state.last_error = Some(message.clone());
      },
      TaskOutcome::Cancelled { .. } => {
        state.status = TabStatus::Cancelled;
      },
      TaskOutcome::TimedOut { .. } => {
        state.status = TabStatus::TimedOut;
      },
    }

    if let (Some(descriptor), Some(statement)) = (state.descriptor.clone(), state.statement.clone()) {
      let status = ExecutionStatus::from(outcome);
      let row_count = outcome.row_count() as i64;
      let elapsed = outcome.elapsed_ms() as i64;
      if let Err(e) = self.history.save_history(&descriptor.id, &statement, status, row_count, elapsed).await {
        warn!("failed to record history entry: {e}");
      }
    }

    true
  }

  /// Fetch catalog columns for the tab's grid and upgrade its heuristic
  /// primary-key discovery. A backend that cannot answer leaves the grid
  /// unchanged.
  pub async fn refresh_grid_metadata(&mut self, tab: TabId) -> Result<(), EngineError> {
    let Some(state) = self.tabs.get_mut(&tab) else { return Ok(()) };
    let (Some(grid), Some(descriptor)) = (state.grid.as_mut(), state.descriptor.as_ref()) else {
      return Ok(());
    };
    let Some(table) = grid.table.clone() else { return Ok(()) };

    let mut adapter = self.factory.connect(descriptor).await?;
    let catalog = adapter.table_columns(&table.name, table.schema.as_deref()).await?;
    if !catalog.is_empty() {
      grid.apply_catalog(&catalog);
    }
    Ok(())
  }

  /// Persist the grid's pending insert and modified cells. Connects only
  /// when there is something to write.
  pub async fn save_grid_changes(&mut self, tab: TabId) -> Result<SaveReport, EngineError> {
    let state = self.tabs.get_mut(&tab).ok_or(EngineError::NoEditableTable)?;
    let descriptor = state.descriptor.clone().ok_or(EngineError::NoEditableTable)?;
    let grid = state.grid.as_mut().ok_or(EngineError::NoEditableTable)?;

    if !grid.has_changes() {
      return Ok(SaveReport { inserted: false, updated: 0, errors: vec![] });
    }

    let mut adapter = self.factory.connect(&descriptor).await?;
    grid.save_changes(adapter.as_mut()).await
  }

  pub async fn delete_grid_rows(&mut self, tab: TabId, indices: &[usize]) -> Result<DeleteReport, EngineError> {
    let state = self.tabs.get_mut(&tab).ok_or(EngineError::NoEditableTable)?;
    let descriptor = state.descriptor.clone().ok_or(EngineError::NoEditableTable)?;
    let grid = state.grid.as_mut().ok_or(EngineError::NoEditableTable)?;

    let mut adapter = self.factory.connect(&descriptor).await?;
    grid.delete_rows(adapter.as_mut(), indices).await
  }
}
