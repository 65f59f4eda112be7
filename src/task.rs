use std::{
  sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
  },
  time::{Duration, Instant},
};

use tokio::sync::{mpsc::UnboundedSender, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
  adapter::{AdapterFactory, QueryOutput},
  classify::StatementKind,
  connection::ConnectionDescriptor,
  error::EngineError,
  event::{EngineEvent, TabId, TaskId, TaskOutcome},
};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Progress ticks drive the "Running... N.Ns" label.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Immutable job spec for one execution.
#[derive(Debug, Clone)]
pub struct QuerySpec {
  pub tab: TabId,
  pub descriptor: ConnectionDescriptor,
  pub sql: String,
  pub kind: StatementKind,
}

/// Handle to one in-flight execution. Dropping it does not stop the task;
/// cancellation is explicit and cooperative.
#[derive(Debug)]
pub struct TaskHandle {
  id: TaskId,
  cancel: CancellationToken,
  started_at: Instant,
}

impl TaskHandle {
  pub fn id(&self) -> TaskId {
    self.id
  }

  pub fn started_at(&self) -> Instant {
    self.started_at
  }

  pub fn cancel(&self) {
    self.cancel.cancel();
  }
}

/// Sub-millisecond executions report 1ms, never 0.
pub(crate) fn elapsed_ms(started: Instant) -> u64 {
  let elapsed = started.elapsed();
  let millis = elapsed.as_millis() as u64;
  if millis == 0 && elapsed.as_micros() > 0 {
    1
  } else {
    millis
  }
}

/// Spawn one execution on the worker pool. The task connects, runs the
/// statement, and reports exactly one terminal outcome over `tx`; progress
/// ticks are sent every 100ms until then. The timeout deadline races the
/// statement: when it fires first the task requests cancellation of the
/// backend call and reports `TimedOut` as final — whatever the backend
/// eventually produces is dropped here and never reaches the channel.
pub fn spawn(
  spec: QuerySpec,
  factory: Arc<dyn AdapterFactory>,
  permits: Arc<Semaphore>,
  timeout: Duration,
  tx: UnboundedSender<EngineEvent>,
) -> TaskHandle {
  let id = TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::SeqCst));
  let cancel = CancellationToken::new();
  let handle = TaskHandle { id, cancel: cancel.clone(), started_at: Instant::now() };

  tokio::spawn(run(spec, id, factory, permits, timeout, cancel, tx));

  handle
}

async fn run(
  spec: QuerySpec,
  id: TaskId,
  factory: Arc<dyn AdapterFactory>,
  permits: Arc<Semaphore>,
  timeout: Duration,
  cancel: CancellationToken,
  tx: UnboundedSender<EngineEvent>,
) {
  let started = Instant::now();
  let tab = spec.tab;
  let _ = tx.send(EngineEvent::QuerySubmitted { tab, task: id });

  let returns_rows = spec.kind.returns_rows();
  let work = async {
    let _permit = permits.acquire().await.map_err(|e| EngineError::Execution(e.to_string()))?;
    let mut adapter = factory.connect(&spec.descriptor).await?;
    adapter.execute(&spec.sql, returns_rows, &cancel).await
  };
  tokio::pin!(work);

  let deadline = tokio::time::sleep(timeout);
  tokio::pin!(deadline);
  let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
  ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
  ticker.tick().await; // first tick completes immediately

  let outcome = loop {
    tokio::select! {
      biased;
      _ = cancel.cancelled() => {
        break TaskOutcome::Cancelled { elapsed_ms: elapsed_ms(started) };
      },
      _ = &mut deadline => {
        // Forced cancellation with its own status; the in-flight call is
        // dropped, so no late completion can be delivered for this task.
        cancel.cancel();
        break TaskOutcome::TimedOut { elapsed_ms: elapsed_ms(started) };
      },
      result = &mut work => {
        break match result {
          Ok(QueryOutput::Rows { columns, rows }) => {
            let affected = rows.len() as u64;
            TaskOutcome::Succeeded { columns, rows, affected, elapsed_ms: elapsed_ms(started) }
          },
          Ok(QueryOutput::Affected(affected)) => {
            TaskOutcome::Succeeded { columns: vec![], rows: vec![], affected, elapsed_ms: elapsed_ms(started) }
          },
          Err(EngineError::Cancelled) => TaskOutcome::Cancelled { elapsed_ms: elapsed_ms(started) },
          Err(EngineError::TimedOut(_)) => TaskOutcome::TimedOut { elapsed_ms: elapsed_ms(started) },
          Err(e) => TaskOutcome::Failed { message: e.to_string(), elapsed_ms: elapsed_ms(started) },
        };
      },
      _ = ticker.tick() => {
        let _ = tx.send(EngineEvent::QueryProgress { tab, task: id, elapsed_ms: elapsed_ms(started) });
        continue;
      },
    }
  };

  debug!(task = %id, tab, "execution finished: {outcome:?}");
  let _ = tx.send(EngineEvent::QueryFinished { tab, task: id, outcome });
}
