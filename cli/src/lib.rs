//! Library entry point for the agent-detector CLI.
//!
//! Exposes the provider, the task list view and configuration so integration
//! tests can mount views against a mock backend without going through the
//! binary entry point.

pub mod config;
pub mod error;
pub mod logging;
pub mod provider;
pub mod task_list;

pub use config::AppConfig;
pub use error::{CLIError, Result};
pub use logging::{init_logging, LogFormat};
pub use provider::{AppContext, ClientProvider};
pub use task_list::{render_lines, Task, TaskListState, TaskListView, TASKS_QUERY};
