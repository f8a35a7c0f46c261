//! Terminal task system
//!
//! [`TerminalTaskSystem`] runs tasks inside terminals. It resolves the
//! dependency graph of a task, acquires (or reuses) a terminal, launches the
//! task's shell or process in it, feeds the output through problem
//! collectors and publishes lifecycle [`TaskEvent`]s.
//!
//! ## Structure
//!
//! - `execution`: dependency graph, command execution, the per-run loop
//! - `input`: variable collection/acquisition, matcher resolution
//! - `launch`: shell launch configuration
//! - `reveal`: when to show the terminal or the problems view
//! - `terminals`: terminal acquisition, reuse, reconnection, termination
//!
//! All bookkeeping lives in one [`SystemState`] behind a `parking_lot`
//! mutex. The lock is never held across an `.await` and never while an
//! event is published.

mod execution;
mod input;
mod launch;
mod reveal;
mod terminals;

pub use launch::wait_on_exit_value;

use crate::error::{TaskError, TaskResult};
use crate::event::{TaskEvent, TaskEventKind};
use crate::output::OutputChannel;
use crate::problem::{OwnerProblems, ProblemMatcherRegistry, TaskProblemMonitor};
use crate::resolver::{ConfigurationResolver, DefaultConfigurationResolver, TaskResolver, TaskSystemInfo};
use crate::shell::{ShellCommandLineBuilder, WellKnownCommands};
use crate::task::{Task, Workspace, WorkspaceFolder};
use crate::terminal::{ShellLaunchConfig, Terminal, TerminalId, TerminalService};
use futures::future::{self, BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::AtomicU32;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use termtask_foundation::{EngineConfig, LinkedMap};
use tokio::sync::broadcast;
use tracing::{debug, error, trace};

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    /// `None` when the process was killed or never reported a code
    pub exit_code: Option<i32>,
}

impl TaskSummary {
    pub fn exited(code: i32) -> Self {
        Self { exit_code: Some(code) }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Completion of one execution; cloneable so dependents can join it
pub type ExecutionFuture = Shared<BoxFuture<'static, TaskResult<TaskSummary>>>;

pub(crate) fn ready_summary(summary: TaskSummary) -> ExecutionFuture {
    future::ready(Ok(summary)).boxed().shared()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunTrigger {
    #[default]
    Command,
    /// Rejoin a terminal that survived a restart
    Reconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskExecuteKind {
    Started,
    /// The instance limit was reached; the result joins a live instance
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveTaskInfo {
    pub same: bool,
    pub background: bool,
}

#[derive(Clone)]
pub struct TaskExecuteResult {
    pub kind: TaskExecuteKind,
    pub task: Arc<Task>,
    pub active: Option<ActiveTaskInfo>,
    pub promise: ExecutionFuture,
}

#[derive(Debug, Clone)]
pub struct TerminateResult {
    pub success: bool,
    pub task: Option<Arc<Task>>,
}

impl TerminateResult {
    fn failed() -> Self {
        Self {
            success: false,
            task: None,
        }
    }
}

/// The last run together with everything it resolved; replayed by `rerun`
#[derive(Clone)]
pub struct VerifiedTask {
    pub task: Arc<Task>,
    pub resolver: Arc<dyn TaskResolver>,
    pub trigger: RunTrigger,
    pub resolved_variables: Option<BTreeMap<String, String>>,
    pub workspace_folder: Option<WorkspaceFolder>,
    pub system_info: Option<Arc<dyn TaskSystemInfo>>,
    pub shell_launch_config: Option<ShellLaunchConfig>,
}

impl VerifiedTask {
    fn new(task: Arc<Task>, resolver: Arc<dyn TaskResolver>, trigger: RunTrigger) -> Self {
        Self {
            task,
            resolver,
            trigger,
            resolved_variables: None,
            workspace_folder: None,
            system_info: None,
            shell_launch_config: None,
        }
    }

    /// Variables, folder and launch configuration were all resolved
    pub fn verify(&self) -> bool {
        self.resolved_variables.is_some() && self.workspace_folder.is_some() && self.shell_launch_config.is_some()
    }
}

// ============================================================================
// State
// ============================================================================

struct ActiveTask {
    task: Arc<Task>,
    promise: ExecutionFuture,
    /// Shared by every live instance of the same task identity
    count: Arc<AtomicU32>,
    terminal: Option<Arc<dyn Terminal>>,
    state: Option<TaskEventKind>,
}

#[derive(Clone)]
struct TerminalData {
    terminal: Arc<dyn Terminal>,
    /// Map key of the owning task; common task id for reconnected terminals
    last_task: String,
    task: Option<Arc<Task>>,
    group: Option<String>,
    nonce: Option<String>,
}

#[derive(Default)]
struct SystemState {
    active_tasks: LinkedMap<String, ActiveTask>,
    busy_tasks: HashMap<String, Arc<Task>>,
    task_errors: HashSet<String>,
    /// task map key -> dependency map keys
    task_dependencies: HashMap<String, Vec<String>>,
    terminals: BTreeMap<TerminalId, TerminalData>,
    /// Least recently idle first
    idle_task_terminals: LinkedMap<String, TerminalId>,
    same_task_terminals: HashMap<String, TerminalId>,
    task_start_times: HashMap<TerminalId, Instant>,
    /// Terminals disposed by `terminate`, which reports them itself
    terminating: HashSet<TerminalId>,
    current_task: Option<VerifiedTask>,
    last_task: Option<VerifiedTask>,
    is_rerun: bool,
    has_reconnected: bool,
}

impl SystemState {
    /// Live executions sharing the identity key of `task`
    fn instances(&self, task: &Task) -> Vec<&ActiveTask> {
        let Some(key) = task.key() else {
            return Vec::new();
        };
        self.active_tasks
            .values()
            .filter(|active| active.task.key().as_deref() == Some(key.as_str()))
            .collect()
    }

    /// Remove the entry of `task` unless a newer execution took its key
    fn remove_active_task(&mut self, task: &Arc<Task>) -> bool {
        let key = task.map_key();
        let owned = self
            .active_tasks
            .get(&key)
            .is_some_and(|active| Arc::ptr_eq(&active.task, task));
        if owned {
            self.active_tasks.remove(&key);
        }
        owned
    }

    fn take_duration(&mut self, id: TerminalId) -> Option<Duration> {
        self.task_start_times.remove(&id).map(|start| start.elapsed())
    }

    fn record_dependency(&mut self, task: &Task, dependency: &Task) {
        let dependency_key = dependency.map_key();
        let dependencies = self.task_dependencies.entry(task.map_key()).or_default();
        if !dependencies.contains(&dependency_key) {
            dependencies.push(dependency_key);
        }
    }

    fn has_errors(&self, task: &Task) -> bool {
        let key = task.map_key();
        if self.task_errors.contains(&key) {
            return true;
        }
        self.task_dependencies
            .get(&key)
            .is_some_and(|deps| deps.iter().any(|dep| self.task_errors.contains(dep)))
    }

    fn cleanup_task_tracking(&mut self, task: &Task) {
        let key = task.map_key();
        self.task_errors.remove(&key);
        self.task_dependencies.remove(&key);
    }

    /// Forget a disposed terminal together with everything its task owned
    fn delete_task_and_terminal(&mut self, id: TerminalId) -> Option<TerminalData> {
        let data = self.terminals.remove(&id)?;
        self.same_task_terminals.remove(&data.last_task);
        self.idle_task_terminals.remove(&data.last_task);
        self.active_tasks.remove(&data.last_task);
        self.busy_tasks.remove(&data.last_task);
        Some(data)
    }
}

// ============================================================================
// TerminalTaskSystem
// ============================================================================

pub struct TerminalTaskSystem {
    this: Weak<TerminalTaskSystem>,
    terminal_service: Arc<dyn TerminalService>,
    configuration_resolver: Arc<dyn ConfigurationResolver>,
    system_info: Option<Arc<dyn TaskSystemInfo>>,
    workspace: Workspace,
    matchers: ProblemMatcherRegistry,
    command_line_builder: ShellCommandLineBuilder,
    well_known: WellKnownCommands,
    problem_monitor: TaskProblemMonitor,
    output: Arc<OutputChannel>,
    events: broadcast::Sender<TaskEvent>,
    state: Mutex<SystemState>,
    /// Serializes terminal creation in request order
    creation_queue: tokio::sync::Mutex<()>,
    config: EngineConfig,
}

impl TerminalTaskSystem {
    pub fn builder(terminal_service: Arc<dyn TerminalService>) -> TaskSystemBuilder {
        TaskSystemBuilder::new(terminal_service)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    pub fn output(&self) -> &Arc<OutputChannel> {
        &self.output
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    fn system(&self) -> TaskResult<Arc<Self>> {
        self.this
            .upgrade()
            .ok_or_else(|| TaskError::unknown("The task system is shutting down"))
    }

    // ========================================================================
    // Run
    // ========================================================================

    /// Start `task`, or join a live instance once its instance limit is
    /// reached.
    ///
    /// The execution is registered before this returns, so
    /// [`is_active_sync`](Self::is_active_sync) reflects it immediately.
    /// Must be called inside a tokio runtime.
    pub fn run(&self, task: Task, resolver: Arc<dyn TaskResolver>, trigger: RunTrigger) -> TaskResult<TaskExecuteResult> {
        let system = self.system()?;
        let mut task = task;
        let mut state = self.state.lock();

        let mut instances: Vec<(Arc<Task>, ExecutionFuture, u32)> = if task.is_in_memory() || task.is_empty() {
            Vec::new()
        } else {
            state
                .instances(&task)
                .into_iter()
                .map(|active| {
                    let count = active.count.load(std::sync::atomic::Ordering::SeqCst);
                    (Arc::clone(&active.task), active.promise.clone(), count)
                })
                .collect()
        };
        if let Some(&(_, _, count)) = instances.first() {
            if count > 0 {
                task.instance = count;
            }
        }
        let task = Arc::new(task);
        state.current_task = Some(VerifiedTask::new(Arc::clone(&task), Arc::clone(&resolver), trigger));

        if instances.len() >= task.run_options.instance_limit.max(1) {
            if let Some((active_task, promise, _)) = instances.pop() {
                state.last_task = state.current_task.clone();
                debug!("Task {} is already running {} times", task.label, instances.len() + 1);
                return Ok(TaskExecuteResult {
                    kind: TaskExecuteKind::Active,
                    task: active_task,
                    active: Some(ActiveTaskInfo {
                        same: true,
                        background: task.is_background(),
                    }),
                    promise,
                });
            }
        }

        let promise = system.execute_task(
            &mut state,
            Arc::clone(&task),
            resolver,
            trigger,
            execution::RunContext::default(),
            HashSet::new(),
        );
        drop(state);

        let completion = promise.clone();
        let label = task.label.clone();
        tokio::spawn(async move {
            if let Err(e) = completion.await {
                error!("Task {} failed: {}", label, e);
                system.log(e.message.clone());
            }
            let mut state = system.state.lock();
            state.last_task = state.current_task.clone();
        });

        Ok(TaskExecuteResult {
            kind: TaskExecuteKind::Started,
            task,
            active: None,
            promise,
        })
    }

    /// Rejoin persisted task terminals, then run `task` against them
    pub fn reconnect(&self, task: Task, resolver: Arc<dyn TaskResolver>) -> TaskResult<TaskExecuteResult> {
        self.reconnect_to_terminals();
        self.run(task, resolver, RunTrigger::Reconnect)
    }

    /// Run the last verified task again; `None` when there is none
    pub fn rerun(&self) -> Option<TaskResult<TaskExecuteResult>> {
        let last = {
            let mut state = self.state.lock();
            let last = state.last_task.clone().filter(VerifiedTask::verify)?;
            if !last.task.run_options.reevaluate_on_rerun {
                state.is_rerun = true;
            }
            last
        };

        let result = self.run(Task::clone(&last.task), last.resolver, RunTrigger::Command);
        match (&result, self.system()) {
            (Ok(started), Ok(system)) => {
                let completion = started.promise.clone();
                tokio::spawn(async move {
                    let _ = completion.await;
                    system.state.lock().is_rerun = false;
                });
            }
            _ => self.state.lock().is_rerun = false,
        }
        Some(result)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn is_active(&self) -> bool {
        self.is_active_sync()
    }

    pub fn is_active_sync(&self) -> bool {
        !self.state.lock().active_tasks.is_empty()
    }

    /// No live task asks for confirmation before its terminal closes
    pub fn can_auto_terminate(&self) -> bool {
        self.state
            .lock()
            .active_tasks
            .values()
            .all(|active| !active.task.properties.prompt_on_close)
    }

    pub fn get_active_tasks(&self) -> Vec<Arc<Task>> {
        self.state
            .lock()
            .active_tasks
            .values()
            .map(|active| Arc::clone(&active.task))
            .collect()
    }

    /// Background tasks between a begin and an end pattern, one-shot tasks
    /// while their process runs
    pub fn get_busy_tasks(&self) -> Vec<Arc<Task>> {
        self.state.lock().busy_tasks.values().cloned().collect()
    }

    pub fn get_task_problems(&self, terminal_id: TerminalId) -> Option<BTreeMap<String, OwnerProblems>> {
        self.problem_monitor.get_task_problems(terminal_id)
    }

    pub fn problem_monitor(&self) -> &TaskProblemMonitor {
        &self.problem_monitor
    }

    pub fn get_last_instance(&self, task: &Task) -> Option<Arc<Task>> {
        self.state
            .lock()
            .instances(task)
            .last()
            .map(|active| Arc::clone(&active.task))
    }

    pub fn get_first_instance(&self, task: &Task) -> Option<Arc<Task>> {
        self.state
            .lock()
            .instances(task)
            .first()
            .map(|active| Arc::clone(&active.task))
    }

    /// Terminals whose last task is one of `tasks`
    pub fn get_terminals_for_tasks(&self, tasks: &[Task]) -> Option<Vec<TerminalId>> {
        let state = self.state.lock();
        let mut ids = Vec::new();
        for task in tasks {
            let key = task.map_key();
            ids.extend(
                state
                    .terminals
                    .iter()
                    .filter(|(_, data)| data.last_task == key)
                    .map(|(id, _)| *id),
            );
        }
        (!ids.is_empty()).then_some(ids)
    }

    /// The task running in the terminal, else the last one that ran there
    pub fn get_task_for_terminal(&self, terminal_id: TerminalId) -> Option<Arc<Task>> {
        let state = self.state.lock();
        let running = state.active_tasks.values().find(|active| {
            active
                .terminal
                .as_ref()
                .is_some_and(|terminal| terminal.instance_id() == terminal_id)
        });
        match running {
            Some(active) => Some(Arc::clone(&active.task)),
            None => state.terminals.get(&terminal_id).and_then(|data| data.task.clone()),
        }
    }

    /// Matchers of the task or of one of its dependencies reported errors
    pub fn task_has_errors(&self, task: &Task) -> bool {
        self.state.lock().has_errors(task)
    }

    /// Report the exit of a running custom execution
    pub fn custom_execution_complete(&self, task: &Task, exit_code: i32) -> TaskResult<()> {
        let terminal = self
            .state
            .lock()
            .active_tasks
            .get(&task.map_key())
            .and_then(|active| active.terminal.clone());
        let terminal =
            terminal.ok_or_else(|| TaskError::unknown("Expected to have a terminal for a custom execution task"))?;
        terminal.complete_custom_execution(exit_code)?;
        Ok(())
    }

    /// Well-known command name of `command`, `other` for anything else
    pub fn sanitized_command(&self, command: &str) -> String {
        self.well_known.sanitized(command)
    }

    pub fn last_task(&self) -> Option<VerifiedTask> {
        self.state.lock().last_task.clone()
    }

    pub fn set_last_task(&self, task: Option<VerifiedTask>) {
        self.state.lock().last_task = task;
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Publish `event`; state kinds are recorded on the execution
    fn fire(&self, event: TaskEvent) {
        let kind = event.kind();
        if kind.is_state() {
            if let Some(key) = event.task_key() {
                if let Some(active) = self.state.lock().active_tasks.get_mut(&key) {
                    active.state = Some(kind);
                }
            }
        }
        trace!(?kind, task = ?event.task().map(|t| t.label.as_str()), "Task event");
        let _ = self.events.send(event);
    }

    fn log(&self, message: impl Into<String>) {
        self.output.append_line(message);
    }

    fn update_current_task(&self, update: impl FnOnce(&mut VerifiedTask)) {
        if let Some(current) = self.state.lock().current_task.as_mut() {
            update(current);
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

pub struct TaskSystemBuilder {
    terminal_service: Arc<dyn TerminalService>,
    configuration_resolver: Option<Arc<dyn ConfigurationResolver>>,
    system_info: Option<Arc<dyn TaskSystemInfo>>,
    workspace: Workspace,
    matchers: ProblemMatcherRegistry,
    command_line_builder: ShellCommandLineBuilder,
    well_known: WellKnownCommands,
    config: EngineConfig,
}

impl TaskSystemBuilder {
    pub fn new(terminal_service: Arc<dyn TerminalService>) -> Self {
        Self {
            terminal_service,
            configuration_resolver: None,
            system_info: None,
            workspace: Workspace::default(),
            matchers: ProblemMatcherRegistry::with_builtins(),
            command_line_builder: ShellCommandLineBuilder::default(),
            well_known: WellKnownCommands::default(),
            config: EngineConfig::default(),
        }
    }

    pub fn with_configuration_resolver(mut self, resolver: Arc<dyn ConfigurationResolver>) -> Self {
        self.configuration_resolver = Some(resolver);
        self
    }

    pub fn with_system_info(mut self, system_info: Arc<dyn TaskSystemInfo>) -> Self {
        self.system_info = Some(system_info);
        self
    }

    pub fn with_workspace(mut self, workspace: Workspace) -> Self {
        self.workspace = workspace;
        self
    }

    pub fn with_matchers(mut self, matchers: ProblemMatcherRegistry) -> Self {
        self.matchers = matchers;
        self
    }

    pub fn with_command_line_builder(mut self, builder: ShellCommandLineBuilder) -> Self {
        self.command_line_builder = builder;
        self
    }

    pub fn with_well_known_commands(mut self, commands: WellKnownCommands) -> Self {
        self.well_known = commands;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Arc<TerminalTaskSystem> {
        let (events, _) = broadcast::channel(self.config.event_channel_capacity.max(1));
        let output = Arc::new(OutputChannel::new("Tasks", self.config.output_max_entries));
        let configuration_resolver = self
            .configuration_resolver
            .unwrap_or_else(|| Arc::new(DefaultConfigurationResolver::new()));

        Arc::new_cyclic(|this| TerminalTaskSystem {
            this: this.clone(),
            terminal_service: self.terminal_service,
            configuration_resolver,
            system_info: self.system_info,
            workspace: self.workspace,
            matchers: self.matchers,
            command_line_builder: self.command_line_builder,
            well_known: self.well_known,
            problem_monitor: TaskProblemMonitor::new(),
            output,
            events,
            state: Mutex::new(SystemState::default()),
            creation_queue: tokio::sync::Mutex::new(()),
            config: self.config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskDependency;

    fn folder() -> WorkspaceFolder {
        WorkspaceFolder::from_path("/work/app")
    }

    fn active(task: Task) -> ActiveTask {
        ActiveTask {
            task: Arc::new(task),
            promise: ready_summary(TaskSummary::exited(0)),
            count: Arc::default(),
            terminal: None,
            state: None,
        }
    }

    #[test]
    fn test_summary() {
        assert!(TaskSummary::exited(0).is_success());
        assert!(!TaskSummary::exited(2).is_success());
        assert!(!TaskSummary::default().is_success());
    }

    #[test]
    fn test_instances_share_identity_key() {
        let mut state = SystemState::default();
        let first = Task::shell("build", "make").with_folder(folder());
        let mut second = first.clone();
        second.instance = 1;
        let other = Task::shell("test", "make test").with_folder(folder());
        for task in [first.clone(), second, other] {
            state
                .active_tasks
                .set(task.map_key(), active(task), termtask_foundation::Touch::None);
        }
        assert_eq!(state.instances(&first).len(), 2);
        assert!(state.instances(&Task::shell("lint", "eslint")).is_empty());
    }

    #[test]
    fn test_remove_active_task_checks_owner() {
        let mut state = SystemState::default();
        let task = Task::shell("build", "make").with_folder(folder());
        let entry = active(task.clone());
        let owner = Arc::clone(&entry.task);
        state.active_tasks.set(task.map_key(), entry, termtask_foundation::Touch::None);

        assert!(!state.remove_active_task(&Arc::new(task)));
        assert!(state.remove_active_task(&owner));
        assert!(state.active_tasks.is_empty());
    }

    #[test]
    fn test_errors_propagate_through_dependencies() {
        let mut state = SystemState::default();
        let lib = Task::shell("lib", "make lib").with_folder(folder());
        let app = Task::composite("app", vec![TaskDependency::named("lib")]).with_folder(folder());
        state.record_dependency(&app, &lib);
        state.record_dependency(&app, &lib);
        assert_eq!(state.task_dependencies[&app.map_key()].len(), 1);
        assert!(!state.has_errors(&app));

        state.task_errors.insert(lib.map_key());
        assert!(state.has_errors(&app));
        state.cleanup_task_tracking(&app);
        assert!(state.task_dependencies.is_empty());
    }
}
