//! PTY integration tests - real shells through the task system
//!
//! `cargo test -p termtask-engine --test pty_test -- --nocapture`

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;
use termtask_engine::{
    LocalTaskSystemInfo, ProblemMatcherRef, PtyTerminalService, RunTrigger, Task, TaskCatalog, TaskEvent,
    TaskEventKind, TaskExecuteResult, TaskSummary, TerminalService, TerminalTaskSystem, Workspace, WorkspaceFolder,
};
use termtask_foundation::{EngineConfig, TerminalConfig};
use tokio::sync::broadcast;

struct Harness {
    _dir: tempfile::TempDir,
    folder: WorkspaceFolder,
    service: Arc<PtyTerminalService>,
    system: Arc<TerminalTaskSystem>,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let folder = WorkspaceFolder::from_path(dir.path());
    let service = Arc::new(PtyTerminalService::new(TerminalConfig {
        default_shell: Some("/bin/sh".into()),
        ..Default::default()
    }));
    let system = TerminalTaskSystem::builder(Arc::clone(&service) as Arc<dyn TerminalService>)
        .with_system_info(Arc::new(LocalTaskSystemInfo::new()))
        .with_workspace(Workspace::single(folder.clone()))
        .with_config(EngineConfig::new().with_output_debounce(Duration::from_millis(50)))
        .build();
    Harness {
        _dir: dir,
        folder,
        service,
        system,
    }
}

impl Harness {
    fn run(&self, task: Task) -> TaskExecuteResult {
        let task = task.with_folder(self.folder.clone());
        self.system
            .run(task, Arc::new(TaskCatalog::default()), RunTrigger::Command)
            .expect("run is accepted")
    }
}

async fn finish(result: &TaskExecuteResult) -> TaskSummary {
    tokio::time::timeout(Duration::from_secs(20), result.promise.clone())
        .await
        .expect("task finished in time")
        .expect("task succeeded")
}

fn drain<T: Clone>(rx: &mut broadcast::Receiver<T>) -> Vec<T> {
    let mut items = Vec::new();
    while let Ok(item) = rx.try_recv() {
        items.push(item);
    }
    items
}

#[tokio::test]
async fn test_pty_echo() {
    let h = harness();
    let mut output = h.service.subscribe_output();

    let result = h.run(Task::shell("hello", "echo Hello from PTY"));
    let summary = finish(&result).await;
    println!("PTY summary: {:?}", summary);
    assert_eq!(summary.exit_code, Some(0));

    let lines: Vec<String> = drain(&mut output).into_iter().map(|(_, line)| line).collect();
    println!("PTY lines: {:?}", lines);
    assert!(lines.iter().any(|line| line.contains("Executing task: echo Hello from PTY")));
    assert!(lines.iter().any(|line| line.trim() == "Hello from PTY"));

    h.service.dispose_all();
}

#[tokio::test]
async fn test_pty_exit_code_and_reuse() {
    let h = harness();

    let summary = finish(&h.run(Task::shell("fail", "exit 3"))).await;
    assert_eq!(summary.exit_code, Some(3));

    // the idle shared terminal runs the next task
    let summary = finish(&h.run(Task::shell("pass", "true"))).await;
    assert_eq!(summary.exit_code, Some(0));
    assert_eq!(h.service.instances().len(), 1);

    h.service.dispose_all();
}

#[tokio::test]
async fn test_pty_gcc_problems() {
    let h = harness();
    let mut events = h.system.subscribe();

    let task = Task::shell("compile", "printf 'src/main.c:3:1: error: unknown type name\\n'; exit 1")
        .with_problem_matcher(ProblemMatcherRef::Named("$gcc".into()));
    let summary = finish(&h.run(task)).await;
    assert_eq!(summary.exit_code, Some(1));

    let kinds: Vec<TaskEventKind> = drain(&mut events).iter().map(TaskEvent::kind).collect();
    println!("PTY events: {:?}", kinds);
    assert!(kinds.contains(&TaskEventKind::ProblemMatcherFoundErrors));

    h.service.dispose_all();
}

#[tokio::test]
async fn test_pty_terminate() {
    let h = harness();
    let mut events = h.system.subscribe();

    let task = Task::shell("sleeper", "sleep 30");
    let result = h.run(task.clone());
    loop {
        let event = events.recv().await.unwrap();
        if event.kind() == TaskEventKind::ProcessStarted {
            break;
        }
    }

    let terminated = h.system.terminate(&task.with_folder(h.folder.clone())).await;
    assert!(terminated.success);
    let summary = tokio::time::timeout(Duration::from_secs(10), result.promise.clone())
        .await
        .expect("terminated in time")
        .unwrap();
    println!("PTY terminated summary: {:?}", summary);
    assert_eq!(summary.exit_code, None);
}
