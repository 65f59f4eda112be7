pub mod scripted;

// Re-export commonly used items
pub use scripted::{Journal, ScriptedFactory};

use std::sync::Arc;

use querydesk::{
    config::Config,
    connection::ConnectionDescriptor,
    coordinator::Workspace,
    event::EngineEvent,
    history::{HistoryStore, MemoryHistoryStore},
};
use tokio::sync::mpsc::UnboundedReceiver;

pub fn test_descriptor() -> ConnectionDescriptor {
    ConnectionDescriptor::sqlite("test-connection", ":memory:")
}

/// Workspace wired to a scripted factory and an in-memory history store. The
/// store is handed back so tests can inspect what got recorded.
pub fn test_workspace(
    factory: ScriptedFactory,
) -> (Workspace, UnboundedReceiver<EngineEvent>, Arc<MemoryHistoryStore>) {
    test_workspace_with_config(factory, Config::default())
}

pub fn test_workspace_with_config(
    factory: ScriptedFactory,
    config: Config,
) -> (Workspace, UnboundedReceiver<EngineEvent>, Arc<MemoryHistoryStore>) {
    let history = Arc::new(MemoryHistoryStore::default());
    let store: Arc<dyn HistoryStore> = history.clone();
    let (workspace, rx) = Workspace::new(&config, Arc::new(factory), store);
    (workspace, rx, history)
}

/// Drive the workspace until the next applied terminal outcome.
pub async fn run_to_completion(workspace: &mut Workspace, rx: &mut UnboundedReceiver<EngineEvent>) {
    loop {
        let event = rx.recv().await.expect("event channel closed before a terminal outcome");
        let applied = workspace.handle_event(&event).await;
        if matches!(event, EngineEvent::QueryFinished { .. }) && applied {
            return;
        }
    }
}
