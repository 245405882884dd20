//! Live task list: the subscription consumer for the demo query.

use detector_link::{QueryRef, QueryResult, QuerySubscription};
use serde::{Deserialize, Serialize};

use crate::error::{CLIError, Result};
use crate::provider::AppContext;

/// Function path of the demo query.
pub const TASKS_QUERY: &str = "tasks:get";

/// One record returned by `tasks:get`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    pub text: String,
}

/// What the view currently shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskListState {
    /// No result yet; renders as an empty list.
    Loading,
    Loaded(Vec<Task>),
    Error(String),
}

impl TaskListState {
    pub fn from_result(result: &QueryResult) -> Self {
        match result {
            QueryResult::Absent => TaskListState::Loading,
            QueryResult::Ready(value) => match serde_json::from_value::<Vec<Task>>(value.clone()) {
                Ok(tasks) => TaskListState::Loaded(tasks),
                Err(e) => TaskListState::Error(format!("Unexpected {} result: {}", TASKS_QUERY, e)),
            },
            QueryResult::Failed(failure) => TaskListState::Error(failure.to_string()),
        }
    }

    /// Tasks to display; empty unless loaded.
    pub fn tasks(&self) -> &[Task] {
        match self {
            TaskListState::Loaded(tasks) => tasks,
            _ => &[],
        }
    }
}

/// Render a state as output lines, one task per line.
pub fn render_lines(state: &TaskListState) -> Vec<String> {
    match state {
        TaskListState::Loading => Vec::new(),
        TaskListState::Loaded(tasks) => tasks.iter().map(|task| format!("- {}", task.text)).collect(),
        TaskListState::Error(message) => vec![format!("error: {}", message)],
    }
}

/// Mounted task list bound to the shared connection.
///
/// Unmounting (or dropping) the view releases its subscription.
pub struct TaskListView {
    subscription: QuerySubscription,
    state: TaskListState,
}

impl TaskListView {
    pub fn mount(ctx: &AppContext) -> Result<Self> {
        let subscription = ctx.connection().subscribe(QueryRef::new(TASKS_QUERY))?;
        let state = TaskListState::from_result(&subscription.current());
        tracing::debug!(listener = subscription.id(), "Task list mounted");
        Ok(Self { subscription, state })
    }

    pub fn state(&self) -> &TaskListState {
        &self.state
    }

    pub fn render(&self) -> Vec<String> {
        render_lines(&self.state)
    }

    /// Wait for the next pushed result and apply it.
    pub async fn wait_for_update(&mut self) -> Result<&TaskListState> {
        let result = self
            .subscription
            .next()
            .await
            .ok_or_else(|| CLIError::SubscriptionError("Task subscription ended".to_string()))?;
        self.state = TaskListState::from_result(&result);
        Ok(&self.state)
    }

    pub fn unmount(mut self) {
        self.subscription.close();
        tracing::debug!("Task list unmounted");
    }
}
