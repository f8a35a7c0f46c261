//! Scripted terminal backend shared by the engine tests
//!
//! [`FakeTerminalService`] hands out [`FakeTerminal`]s that play a
//! [`Script`] instead of running a process. Scripts are picked by a
//! substring of the launched command line.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use termtask_engine::terminal::{
    CreateTerminalRequest, ExitReason, ReconnectionProperties, RevealTarget, ShellLaunchConfig, ShellProfile,
    Terminal, TerminalEvent, TerminalId, TerminalService, WaitOnExit,
};
use termtask_engine::{
    ProblemMatcherRef, RunTrigger, Task, TaskCatalog, TaskEvent, TaskEventKind, TaskExecuteResult, TaskResolver,
    TaskResult, TaskSummary, TerminalTaskSystem, Workspace, WorkspaceFolder,
};
use termtask_engine::problem::{BackgroundMatcher, FileLocation, ProblemMatcher, ProblemPattern};
use termtask_foundation::{EngineConfig, Error, Platform, Result};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

// ============================================================================
// Scripts
// ============================================================================

#[derive(Debug, Clone)]
pub enum Step {
    Line(String),
    Sleep(u64),
    Exit(i32),
}

/// Output and exit of one fake process; without an exit it runs until disposed
#[derive(Debug, Clone, Default)]
pub struct Script {
    steps: Vec<Step>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps running until the terminal is disposed
    pub fn hold() -> Self {
        Self::default()
    }

    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.steps.push(Step::Line(line.into()));
        self
    }

    pub fn sleep(mut self, ms: u64) -> Self {
        self.steps.push(Step::Sleep(ms));
        self
    }

    pub fn exit(mut self, code: i32) -> Self {
        self.steps.push(Step::Exit(code));
        self
    }
}

#[derive(Default)]
struct ScriptBook {
    entries: Mutex<Vec<(String, Script)>>,
}

impl ScriptBook {
    /// Replaces an earlier script of the same pattern
    fn add(&self, pattern: &str, script: Script) {
        let mut entries = self.entries.lock();
        match entries.iter_mut().find(|(existing, _)| existing == pattern) {
            Some(entry) => entry.1 = script,
            None => entries.push((pattern.to_string(), script)),
        }
    }

    /// First script whose pattern occurs in the command line; exit 0 otherwise
    fn lookup(&self, config: &ShellLaunchConfig) -> Script {
        let args = config.args.display();
        let executable = config.executable.clone().unwrap_or_default();
        self.entries
            .lock()
            .iter()
            .find(|(pattern, _)| args.contains(pattern.as_str()) || executable.contains(pattern.as_str()))
            .map(|(_, script)| script.clone())
            .unwrap_or_else(|| Script::new().exit(0))
    }
}

// ============================================================================
// FakeTerminal
// ============================================================================

pub struct FakeTerminal {
    id: TerminalId,
    this: Weak<FakeTerminal>,
    events: broadcast::Sender<TerminalEvent>,
    primordial: Mutex<Option<broadcast::Receiver<TerminalEvent>>>,
    config: Mutex<ShellLaunchConfig>,
    running: AtomicBool,
    disposed: AtomicBool,
    custom_pending: AtomicBool,
    exit_reason: Mutex<Option<ExitReason>>,
    buffer: Mutex<Vec<String>>,
    launches: Mutex<Vec<ShellLaunchConfig>>,
    parent: Option<TerminalId>,
    scripts: Arc<ScriptBook>,
}

impl FakeTerminal {
    fn new(
        id: TerminalId,
        config: ShellLaunchConfig,
        parent: Option<TerminalId>,
        scripts: Arc<ScriptBook>,
    ) -> Arc<Self> {
        let (events, primordial) = broadcast::channel(EVENT_CAPACITY);
        Arc::new_cyclic(|this| FakeTerminal {
            id,
            this: this.clone(),
            events,
            primordial: Mutex::new(Some(primordial)),
            config: Mutex::new(config),
            running: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            custom_pending: AtomicBool::new(false),
            exit_reason: Mutex::new(None),
            buffer: Mutex::new(Vec::new()),
            launches: Mutex::new(Vec::new()),
            parent,
            scripts,
        })
    }

    fn start(&self, config: ShellLaunchConfig) {
        self.launches.lock().push(config.clone());
        *self.exit_reason.lock() = None;
        self.running.store(true, Ordering::SeqCst);
        let custom = config.custom_execution;
        let script = self.scripts.lookup(&config);
        *self.config.lock() = config;
        if custom {
            self.custom_pending.store(true, Ordering::SeqCst);
            return;
        }

        let Some(this) = self.this.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            for step in script.steps {
                if !this.running.load(Ordering::SeqCst) {
                    return;
                }
                match step {
                    Step::Line(line) => this.write_line(line),
                    Step::Sleep(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
                    Step::Exit(code) => {
                        this.exit(Some(code));
                        return;
                    }
                }
            }
        });
    }

    /// Print a line as if the process wrote it
    pub fn write_line(&self, line: impl Into<String>) {
        let line = line.into();
        self.buffer.lock().push(line.clone());
        let _ = self.events.send(TerminalEvent::Line(line));
    }

    /// End the running process with `code`
    pub fn exit(&self, code: Option<i32>) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        *self.exit_reason.lock() = Some(ExitReason::Process);
        let _ = self.events.send(TerminalEvent::Exit(code));
        if self.config.lock().wait_on_exit == WaitOnExit::Close {
            self.dispose();
        }
    }

    pub fn launches(&self) -> Vec<ShellLaunchConfig> {
        self.launches.lock().clone()
    }

    pub fn parent(&self) -> Option<TerminalId> {
        self.parent
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Terminal for FakeTerminal {
    fn instance_id(&self) -> TerminalId {
        self.id
    }

    fn process_id(&self) -> Option<u32> {
        self.is_running().then_some(1000 + self.id)
    }

    fn subscribe(&self) -> broadcast::Receiver<TerminalEvent> {
        self.primordial.lock().take().unwrap_or_else(|| self.events.subscribe())
    }

    async fn process_ready(&self) -> Result<()> {
        Ok(())
    }

    async fn reuse_terminal(&self, config: ShellLaunchConfig) -> Result<()> {
        if self.is_disposed() || self.is_running() {
            return Err(Error::Terminal(format!("terminal {} is busy", self.id)));
        }
        self.start(config);
        Ok(())
    }

    fn complete_custom_execution(&self, exit_code: i32) -> Result<()> {
        if !self.custom_pending.swap(false, Ordering::SeqCst) {
            return Err(Error::Terminal("no custom execution is running".into()));
        }
        self.exit(Some(exit_code));
        Ok(())
    }

    fn clear_buffer(&self) {
        self.buffer.lock().clear();
    }

    fn buffer_lines(&self) -> Vec<String> {
        self.buffer.lock().clone()
    }

    fn shell_launch_config(&self) -> ShellLaunchConfig {
        self.config.lock().clone()
    }

    fn set_reconnection_properties(&self, properties: Option<ReconnectionProperties>) {
        self.config.lock().reconnection_properties = properties;
    }

    fn set_wait_on_exit(&self, wait_on_exit: WaitOnExit) {
        self.config.lock().wait_on_exit = wait_on_exit;
    }

    fn exit_reason(&self) -> Option<ExitReason> {
        *self.exit_reason.lock()
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.running.swap(false, Ordering::SeqCst) {
            *self.exit_reason.lock() = Some(ExitReason::User);
        }
        self.custom_pending.store(false, Ordering::SeqCst);
        let _ = self.events.send(TerminalEvent::Disposed);
    }
}

// ============================================================================
// FakeTerminalService
// ============================================================================

#[derive(Default)]
pub struct FakeTerminalService {
    next_id: AtomicU32,
    creations: AtomicUsize,
    terminals: Mutex<Vec<Arc<FakeTerminal>>>,
    scripts: Arc<ScriptBook>,
    fail_creation: AtomicBool,
    reveals: Mutex<Vec<(TerminalId, RevealTarget)>>,
}

impl FakeTerminalService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, pattern: &str, script: Script) {
        self.scripts.add(pattern, script);
    }

    pub fn fail_creation(&self, fail: bool) {
        self.fail_creation.store(fail, Ordering::SeqCst);
    }

    /// Every reveal request, oldest first
    pub fn reveals(&self) -> Vec<(TerminalId, RevealTarget)> {
        self.reveals.lock().clone()
    }

    /// Terminals handed out by `create_terminal`
    pub fn created(&self) -> usize {
        self.creations.load(Ordering::SeqCst)
    }

    pub fn terminal(&self, id: TerminalId) -> Option<Arc<FakeTerminal>> {
        self.terminals.lock().iter().find(|t| t.id == id).cloned()
    }

    /// A terminal that survived a restart: running, with scrollback
    pub fn restore(&self, config: ShellLaunchConfig, scrollback: &[&str]) -> Arc<FakeTerminal> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let terminal = FakeTerminal::new(id, config, None, Arc::clone(&self.scripts));
        terminal.running.store(true, Ordering::SeqCst);
        terminal
            .buffer
            .lock()
            .extend(scrollback.iter().map(|line| line.to_string()));
        self.terminals.lock().push(Arc::clone(&terminal));
        terminal
    }
}

#[async_trait]
impl TerminalService for FakeTerminalService {
    async fn create_terminal(&self, request: CreateTerminalRequest) -> Result<Arc<dyn Terminal>> {
        if self.fail_creation.load(Ordering::SeqCst) {
            return Err(Error::Terminal("no terminal available".into()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.creations.fetch_add(1, Ordering::SeqCst);
        let terminal = FakeTerminal::new(id, request.config.clone(), request.parent, Arc::clone(&self.scripts));
        terminal.start(request.config);
        self.terminals.lock().push(Arc::clone(&terminal));
        Ok(terminal)
    }

    fn instances(&self) -> Vec<Arc<dyn Terminal>> {
        self.terminals
            .lock()
            .iter()
            .filter(|t| !t.is_disposed())
            .map(|t| Arc::clone(t) as Arc<dyn Terminal>)
            .collect()
    }

    fn default_profile(&self, _platform: Platform) -> ShellProfile {
        ShellProfile {
            path: "/bin/bash".to_string(),
            ..Default::default()
        }
    }

    fn reveal(&self, terminal: &Arc<dyn Terminal>, target: RevealTarget) {
        self.reveals.lock().push((terminal.instance_id(), target));
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn folder() -> WorkspaceFolder {
    WorkspaceFolder::from_path("/work/app")
}

pub fn shell(label: &str, command: &str) -> Task {
    Task::shell(label, command).with_folder(folder())
}

pub fn catalog(tasks: Vec<Task>) -> Arc<dyn TaskResolver> {
    Arc::new(TaskCatalog::new(tasks))
}

pub fn system(service: &Arc<FakeTerminalService>) -> Arc<TerminalTaskSystem> {
    let config = EngineConfig::new().with_output_debounce(Duration::from_millis(10));
    TerminalTaskSystem::builder(Arc::clone(service) as Arc<dyn TerminalService>)
        .with_workspace(Workspace::single(folder()))
        .with_config(config)
        .build()
}

pub fn start(system: &TerminalTaskSystem, task: Task, resolver: &Arc<dyn TaskResolver>) -> TaskExecuteResult {
    system
        .run(task, Arc::clone(resolver), RunTrigger::Command)
        .expect("run is accepted")
}

/// Wait for the execution to complete
pub async fn finish(result: &TaskExecuteResult) -> TaskResult<TaskSummary> {
    tokio::time::timeout(Duration::from_secs(5), result.promise.clone())
        .await
        .expect("task finished in time")
}

pub fn drain(events: &mut broadcast::Receiver<TaskEvent>) -> Vec<TaskEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

/// Kinds of the events about the task labelled `label`, in order
pub fn kinds_for(events: &[TaskEvent], label: &str) -> Vec<TaskEventKind> {
    events
        .iter()
        .filter(|event| event.task().is_some_and(|task| task.label == label))
        .map(TaskEvent::kind)
        .collect()
}

/// Receive events until one of `kind` about `label` arrives
pub async fn wait_for(events: &mut broadcast::Receiver<TaskEvent>, label: &str, kind: TaskEventKind) -> TaskEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if event.kind() == kind && event.task().is_some_and(|t| t.label == label) => {
                    return event;
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("event arrived in time")
}

/// Poll `condition` until it holds
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition held in time");
}

/// Watching matcher delimited by `watch: compiling` / `watch: done`
pub fn watch_matcher() -> ProblemMatcherRef {
    ProblemMatcherRef::Inline(Box::new(ProblemMatcher {
        owner: "watch".to_string(),
        source: None,
        severity: None,
        file_location: FileLocation::Absolute,
        file_prefix: None,
        pattern: ProblemPattern {
            regexp: r"^(.*):(\d+):(\d+): error: (.*)$".to_string(),
            file: 1,
            line: Some(2),
            column: Some(3),
            end_line: None,
            end_column: None,
            severity: None,
            code: None,
            message: 4,
        },
        background: Some(BackgroundMatcher {
            active_on_start: false,
            begins_pattern: "watch: compiling".to_string(),
            ends_pattern: "watch: done".to_string(),
        }),
    }))
}
