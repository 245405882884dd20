//! Agent Detector CLI - live task list for the reactive backend
//!
//! # Usage
//!
//! ```bash
//! # Watch the task list until Ctrl-C
//! AGENT_DETECTOR_BACKEND_URL=https://happy-otter-123.example.cloud agent-detector
//!
//! # Stop after three updates, JSON logs on stderr
//! agent-detector --log-format json watch --max-updates 3
//!
//! # One-shot fetch over HTTP
//! agent-detector query
//! ```

use clap::Parser;
use std::io::Write;

use detector_cli::{
    init_logging, render_lines, ClientProvider, Result, TaskListState, TaskListView, TASKS_QUERY,
};
use detector_link::{QueryRef, QueryResult};

mod args;

use args::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format)?;

    // Fails here, before any view exists, when the backend URL is missing.
    let provider = ClientProvider::from_env()?;

    let outcome = match cli.command() {
        Command::Watch { max_updates } => watch(&provider, max_updates).await,
        Command::Query => query_once(&provider).await,
    };

    provider.shutdown().await;
    outcome
}

async fn watch(provider: &ClientProvider, max_updates: Option<u64>) -> Result<()> {
    let mut view = provider.render(TaskListView::mount)?;
    print_state(view.state())?;

    let mut updates = 0u64;
    while !max_updates.is_some_and(|max| updates >= max) {
        tokio::select! {
            update = view.wait_for_update() => {
                print_state(update?)?;
                updates += 1;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, unmounting task list");
                break;
            }
        }
    }

    view.unmount();
    Ok(())
}

async fn query_once(provider: &ClientProvider) -> Result<()> {
    let ctx = provider.context();
    let value = ctx.connection().query(&QueryRef::new(TASKS_QUERY)).await?;
    print_state(&TaskListState::from_result(&QueryResult::Ready(value)))
}

fn print_state(state: &TaskListState) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    match state {
        TaskListState::Loading => writeln!(stdout, "Tasks: (waiting for backend)")?,
        TaskListState::Loaded(tasks) => writeln!(stdout, "Tasks ({}):", tasks.len())?,
        TaskListState::Error(_) => writeln!(stdout, "Tasks:")?,
    }
    for line in render_lines(state) {
        writeln!(stdout, "{}", line)?;
    }
    stdout.flush()?;
    Ok(())
}
