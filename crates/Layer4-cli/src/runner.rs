//! Run mode - execute one task on real terminals and stream its progress

use anyhow::{anyhow, Result};
use std::sync::Arc;
use termtask_engine::{
    LocalTaskSystemInfo, PtyTerminalService, RunTrigger, Task, TaskCatalog, TaskEvent, TaskExecuteKind, TaskResolver,
    TaskSummary, TerminalService, TerminalTaskSystem, Workspace, WorkspaceFolder,
};
use termtask_foundation::EngineConfig;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Run `label` from `tasks` and wait for it; returns the task's summary
pub async fn run_task(
    config: EngineConfig,
    folder: WorkspaceFolder,
    tasks: Vec<Task>,
    label: &str,
) -> Result<TaskSummary> {
    let catalog = Arc::new(TaskCatalog::new(tasks));
    let task = catalog
        .find(label)
        .ok_or_else(|| anyhow!("No task labelled '{}' in the tasks file", label))?;

    let service = Arc::new(PtyTerminalService::new(config.terminal.clone()));
    let system = TerminalTaskSystem::builder(Arc::clone(&service) as Arc<dyn TerminalService>)
        .with_system_info(Arc::new(LocalTaskSystemInfo::new()))
        .with_workspace(Workspace::single(folder))
        .with_config(config)
        .build();

    let printer = spawn_printer(&system, &service);
    let resolver: Arc<dyn TaskResolver> = catalog;
    let result = system.run(task, resolver, RunTrigger::Command)?;
    if result.kind == TaskExecuteKind::Active {
        info!("Task {} is already running", result.task.label);
    }

    let summary = tokio::select! {
        summary = result.promise.clone() => summary?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, terminating tasks");
            let terminated = system.terminate_all().await;
            debug!("Terminated {} tasks", terminated.len());
            TaskSummary::default()
        }
    };

    // Background dependencies keep their terminals until here
    service.dispose_all();
    printer.abort();
    Ok(summary)
}

/// Print terminal output, engine notices and lifecycle milestones
fn spawn_printer(system: &Arc<TerminalTaskSystem>, service: &Arc<PtyTerminalService>) -> tokio::task::JoinHandle<()> {
    let mut output = service.subscribe_output();
    let mut notices = system.output().subscribe();
    let mut events = system.subscribe();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                line = output.recv() => match line {
                    Ok((id, line)) => println!("[{}] {}", id, line),
                    Err(RecvError::Lagged(n)) => warn!("Dropped {} output lines", n),
                    Err(RecvError::Closed) => break,
                },
                notice = notices.recv() => match notice {
                    Ok(entry) => eprintln!("{}", entry.content),
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                },
                event = events.recv() => match event {
                    Ok(event) => report(&event),
                    Err(RecvError::Lagged(n)) => debug!("Dropped {} task events", n),
                    Err(RecvError::Closed) => break,
                },
            }
        }
    })
}

fn report(event: &TaskEvent) {
    match event {
        TaskEvent::Start { task, terminal_id, .. } => {
            info!("▶ {} (terminal {})", task.qualified_label(), terminal_id);
        }
        TaskEvent::ProcessEnded { task, exit_code, duration, .. } => {
            let code = exit_code.map_or_else(|| "killed".to_string(), |code| code.to_string());
            info!("■ {} exited: {} ({:?})", task.label, code, duration.unwrap_or_default());
        }
        TaskEvent::Inactive { task, .. } if task.is_background() => {
            info!("● {} is watching", task.label);
        }
        TaskEvent::ProblemMatcherFoundErrors { task, .. } => {
            warn!("✗ {} reported problems", task.label);
        }
        TaskEvent::Terminated { task, exit_reason, .. } => {
            info!("{} terminated ({:?})", task.label, exit_reason);
        }
        other => debug!(kind = ?other.kind(), "Task event"),
    }
}
