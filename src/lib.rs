pub mod adapter;
pub mod classify;
pub mod cli;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod grid;
pub mod history;
pub mod plan;
pub mod process;
pub mod task;
pub mod utils;

pub use adapter::{AdapterFactory, CellValue, DbAdapter, QueryOutput, SqlxAdapterFactory};
pub use connection::{BackendKind, ConnectionDescriptor};
pub use coordinator::{TabStatus, Workspace};
pub use error::EngineError;
pub use event::{EngineEvent, TabId, TaskId, TaskOutcome};
