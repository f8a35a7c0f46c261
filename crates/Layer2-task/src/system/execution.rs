//! Dependency graph and per-run execution loop

use super::reveal::{self, ExitOutcome};
use super::{
    ready_summary, ExecutionFuture, RunTrigger, SystemState, TaskSummary, TerminalTaskSystem,
};
use crate::error::{TaskError, TaskResult};
use crate::event::TaskEvent;
use crate::problem::{ProblemCollector, ProblemCollectorEvent, StartStopProblemCollector, WatchingProblemCollector};
use crate::resolver::TaskResolver;
use crate::task::{DependsOrder, PanelKind, Task};
use crate::terminal::{Terminal, TerminalEvent, TerminalId};
use crate::variables::{variable_name, VariableResolver};
use futures::future::{join_all, select, Either};
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use termtask_foundation::Touch;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Shared by every execution started from one root `run`
#[derive(Clone, Default)]
pub(super) struct RunContext {
    /// common task id -> execution, so a dependency runs once per graph
    encountered: Arc<Mutex<HashMap<String, ExecutionFuture>>>,
    /// Variables acquired so far; later tasks reuse them
    pub(super) already_resolved: Arc<Mutex<BTreeMap<String, String>>>,
}

/// How the terminal of a run went away
enum TerminalExit {
    Exited(Option<i32>),
    Disposed,
}

impl TerminalExit {
    fn code(&self) -> Option<i32> {
        match self {
            TerminalExit::Exited(code) => *code,
            TerminalExit::Disposed => None,
        }
    }
}

/// Per-run matcher bookkeeping
#[derive(Default)]
struct MatcherProgress {
    /// Open begin patterns; negative when ends outnumber begins
    event_counter: i32,
    result_reported: bool,
}

/// First of `inactive` (the task went idle) and `execution` (it exited)
fn race_inactive(inactive: JoinHandle<Option<TaskSummary>>, execution: ExecutionFuture) -> ExecutionFuture {
    async move {
        match select(inactive, execution).await {
            Either::Left((Ok(Some(summary)), _)) => Ok(summary),
            Either::Left((_, execution)) => execution.await,
            Either::Right((result, inactive)) => {
                inactive.abort();
                result
            }
        }
    }
    .boxed()
    .shared()
}

impl TerminalTaskSystem {
    // ========================================================================
    // Registration
    // ========================================================================

    /// Register an execution of `task` and start it.
    ///
    /// The body only starts once the entry is in the active table, so the
    /// cleanup at its end always finds it.
    pub(super) fn execute_task(
        self: &Arc<Self>,
        state: &mut SystemState,
        task: Arc<Task>,
        resolver: Arc<dyn TaskResolver>,
        trigger: RunTrigger,
        ctx: RunContext,
        live: HashSet<String>,
    ) -> ExecutionFuture {
        let (release, gate) = oneshot::channel::<()>();
        let system = Arc::clone(self);
        let body_task = Arc::clone(&task);
        let handle = tokio::spawn(async move {
            if gate.await.is_err() {
                return Err(TaskError::unknown("Task execution was abandoned before it started"));
            }
            let result = Arc::clone(&system)
                .run_task_body(Arc::clone(&body_task), resolver, trigger, ctx, live)
                .await;
            system.state.lock().remove_active_task(&body_task);
            result
        });

        let label = task.label.clone();
        let promise: ExecutionFuture = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(TaskError::unknown(format!("Task {} aborted: {}", label, e))),
            }
        }
        .boxed()
        .shared();

        let count = state
            .instances(&task)
            .last()
            .map(|active| Arc::clone(&active.count))
            .unwrap_or_default();
        count.fetch_add(1, Ordering::SeqCst);
        state.active_tasks.set(
            task.map_key(),
            super::ActiveTask {
                task,
                promise: promise.clone(),
                count,
                terminal: None,
                state: None,
            },
            Touch::None,
        );
        let _ = release.send(());
        promise
    }

    fn execute_dependency_task(
        self: &Arc<Self>,
        task: Arc<Task>,
        resolver: Arc<dyn TaskResolver>,
        trigger: RunTrigger,
        ctx: RunContext,
        live: HashSet<String>,
    ) -> ExecutionFuture {
        if !task.is_background() {
            let mut state = self.state.lock();
            return self.execute_task(&mut state, task, resolver, trigger, ctx, live);
        }
        let inactive = self.wait_for_inactive(task.map_key());
        let execution = {
            let mut state = self.state.lock();
            self.execute_task(&mut state, task, resolver, trigger, ctx, live)
        };
        race_inactive(inactive, execution)
    }

    /// Resolves with exit code 0 at the next `Inactive` of the task, `None`
    /// when the task ends first
    fn wait_for_inactive(&self, map_key: String) -> JoinHandle<Option<TaskSummary>> {
        let mut events = self.events.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(TaskEvent::Inactive { task, .. }) if task.map_key() == map_key => {
                        return Some(TaskSummary::exited(0));
                    }
                    Ok(TaskEvent::End { task }) if task.map_key() == map_key => return None,
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return None,
                }
            }
        })
    }

    /// What a dependent waits on when the dependency is already running
    fn dependency_promise(&self, active: &super::ActiveTask) -> ExecutionFuture {
        if !active.task.is_background() || active.task.properties.problem_matchers.is_empty() {
            return active.promise.clone();
        }
        if active.state == Some(crate::event::TaskEventKind::Inactive) {
            return ready_summary(TaskSummary::exited(0));
        }
        race_inactive(self.wait_for_inactive(active.task.map_key()), active.promise.clone())
    }

    // ========================================================================
    // Body
    // ========================================================================

    async fn run_task_body(
        self: Arc<Self>,
        task: Arc<Task>,
        resolver: Arc<dyn TaskResolver>,
        trigger: RunTrigger,
        ctx: RunContext,
        live: HashSet<String>,
    ) -> TaskResult<TaskSummary> {
        self.show_load_messages(&task);

        let mut pending: Vec<ExecutionFuture> = Vec::new();
        if !task.properties.depends_on.is_empty() {
            let mut next_live = live;
            next_live.insert(task.common_task_id());
            let sequence = task.properties.depends_order == DependsOrder::Sequence;

            for dependency in &task.properties.depends_on {
                let Some(dependency_task) = resolver.resolve(dependency.uri.as_deref(), &dependency.task).await else {
                    self.log(format!(
                        "Couldn't resolve dependent task '{}' in workspace folder '{}'",
                        dependency.task.name(),
                        dependency.uri.as_deref().unwrap_or_default()
                    ));
                    continue;
                };
                let dependency_task = Arc::new(dependency_task);
                let common_key = dependency_task.common_task_id();
                self.state.lock().record_dependency(&task, &dependency_task);

                let existing = if next_live.contains(&common_key) {
                    self.log(format!(
                        "There is a dependency cycle. See task \"{}\".",
                        dependency_task.qualified_label()
                    ));
                    Some(ready_summary(TaskSummary::exited(0)))
                } else {
                    let encountered = ctx.encountered.lock().get(&common_key).cloned();
                    encountered.or_else(|| {
                        let state = self.state.lock();
                        let running = state
                            .active_tasks
                            .get(&dependency_task.map_key())
                            .or_else(|| state.instances(&dependency_task).pop());
                        running.map(|active| self.dependency_promise(active))
                    })
                };

                let promise = match existing {
                    Some(promise) => promise,
                    None => {
                        self.fire(TaskEvent::DependsOnStarted {
                            task: Arc::clone(&task),
                        });
                        self.execute_dependency_task(
                            dependency_task,
                            Arc::clone(&resolver),
                            trigger,
                            ctx.clone(),
                            next_live.clone(),
                        )
                    }
                };
                ctx.encountered.lock().insert(common_key, promise.clone());
                pending.push(promise.clone());

                if sequence {
                    let summary = promise.await?;
                    if !summary.is_success() {
                        break;
                    }
                }
            }
        }

        for summary in join_all(pending).await {
            let summary = summary?;
            if !summary.is_success() {
                debug!("Dependency of {} finished with {:?}", task.label, summary.exit_code);
                return Ok(summary);
            }
        }

        if task.command().is_none() {
            return Ok(TaskSummary::exited(0));
        }
        let is_rerun = self.state.lock().is_rerun;
        if is_rerun {
            self.reexecute_command(task, trigger, &ctx).await
        } else {
            self.execute_command(task, trigger, &ctx).await
        }
    }

    fn show_load_messages(&self, task: &Task) {
        if task.load_messages.is_empty() {
            return;
        }
        warn!(
            "There are issues with task \"{}\". See the output for more details.",
            task.qualified_label()
        );
        for message in &task.load_messages {
            self.log(message.clone());
        }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    async fn execute_command(
        self: &Arc<Self>,
        task: Arc<Task>,
        trigger: RunTrigger,
        ctx: &RunContext,
    ) -> TaskResult<TaskSummary> {
        let folder = task
            .workspace_folder()
            .cloned()
            .or_else(|| self.workspace.first_folder().cloned());
        let system_info = self.system_info.clone();
        self.update_current_task(|current| {
            current.workspace_folder = folder.clone();
            current.system_info = system_info.clone();
        });

        let mut variables = BTreeSet::new();
        self.collect_task_variables(&mut variables, &task);
        let resolved = self
            .acquire_input(system_info.as_ref(), folder.as_ref(), &task, &variables, ctx)
            .await?;

        match resolved {
            Some(values) if task.has_command() => {
                self.update_current_task(|current| current.resolved_variables = Some(values.clone()));
                let resolver =
                    VariableResolver::new(folder, system_info, values, Some(Arc::clone(&self.configuration_resolver)));
                self.execute_in_terminal(task, trigger, resolver).await
            }
            _ => {
                self.fire(TaskEvent::End { task });
                Ok(TaskSummary::exited(0))
            }
        }
    }

    /// Run with the variables of the last run when they cover this task
    async fn reexecute_command(
        self: &Arc<Self>,
        task: Arc<Task>,
        trigger: RunTrigger,
        ctx: &RunContext,
    ) -> TaskResult<TaskSummary> {
        let last = self.state.lock().last_task.clone();
        let Some(last) = last else {
            return self.execute_command(task, trigger, ctx).await;
        };
        let folder = last.workspace_folder.clone();
        let system_info = last.system_info.clone();
        self.update_current_task(|current| {
            current.workspace_folder = folder.clone();
            current.system_info = system_info.clone();
        });

        let mut variables = BTreeSet::new();
        self.collect_task_variables(&mut variables, &task);
        let known = last.resolved_variables.clone().unwrap_or_default();
        let covered = variables.iter().all(|v| known.contains_key(variable_name(v)));

        let values = if covered {
            trace!("Reusing {} resolved variables for {}", known.len(), task.label);
            Some(known)
        } else {
            self.acquire_input(system_info.as_ref(), folder.as_ref(), &task, &variables, ctx)
                .await?
        };

        match values {
            Some(values) if task.has_command() => {
                self.update_current_task(|current| current.resolved_variables = Some(values.clone()));
                let resolver =
                    VariableResolver::new(folder, system_info, values, Some(Arc::clone(&self.configuration_resolver)));
                self.execute_in_terminal(task, trigger, resolver).await
            }
            _ => {
                self.fire(TaskEvent::End { task });
                Ok(TaskSummary::exited(0))
            }
        }
    }

    // ========================================================================
    // Terminal run
    // ========================================================================

    async fn execute_in_terminal(
        self: &Arc<Self>,
        task: Arc<Task>,
        trigger: RunTrigger,
        resolver: VariableResolver,
    ) -> TaskResult<TaskSummary> {
        let background = task.is_background();
        let matchers = self.resolve_matchers(&resolver, &task).await?;
        let has_matchers = !matchers.is_empty();

        let collector: Arc<dyn ProblemCollector> = if background {
            let watching = WatchingProblemCollector::new(matchers);
            if has_matchers && !watching.is_watching() {
                self.log(format!(
                    "Task {} is a background task but uses a problem matcher without a background pattern",
                    task.qualified_label()
                ));
            }
            watching
        } else {
            StartStopProblemCollector::new(matchers)
        };
        let mut collector_events = collector.subscribe();
        if background {
            collector.about_to_start();
        }

        let folder = resolver.folder().cloned();
        let acquired = self
            .create_terminal(&task, trigger, &resolver, folder.as_ref())
            .await?;
        let terminal = acquired.terminal;
        let mut terminal_events = acquired.events;
        let terminal_id = terminal.instance_id();
        let map_key = task.map_key();

        self.state.lock().task_start_times.insert(terminal_id, Instant::now());
        self.fire(TaskEvent::Start {
            task: Arc::clone(&task),
            terminal_id,
            resolved_variables: resolver.values().clone(),
        });
        self.reveal(&task, &terminal, task.presentation().and_then(reveal::on_start));
        if !background {
            self.state.lock().busy_tasks.insert(map_key.clone(), Arc::clone(&task));
            self.fire(TaskEvent::Active {
                task: Arc::clone(&task),
                terminal_id,
            });
        }
        self.problem_monitor.add_terminal(&terminal, collector.as_ref());

        let mut progress = MatcherProgress::default();
        let debounce = self.config.output_debounce();
        let flush = tokio::time::sleep(debounce);
        tokio::pin!(flush);
        let mut flush_armed = false;

        if background && trigger == RunTrigger::Reconnect {
            let patterns = collector.begin_patterns();
            if !patterns.is_empty() {
                let lines = terminal.buffer_lines();
                let start = lines
                    .iter()
                    .rposition(|line| patterns.iter().any(|p| p.is_match(line)))
                    .unwrap_or(0);
                trace!("Replaying {} buffered lines for {}", lines.len() - start, task.label);
                for line in &lines[start..] {
                    collector.process_line(line);
                }
                flush.as_mut().reset(tokio::time::Instant::now() + debounce);
                flush_armed = true;
            }
        }

        {
            let mut state = self.state.lock();
            match state.active_tasks.get_mut(&map_key) {
                Some(active) => active.terminal = Some(Arc::clone(&terminal)),
                None => warn!("No active tasks found for the terminal."),
            }
        }
        self.fire(TaskEvent::Changed);

        let feed_lines = !background || has_matchers;
        let mut process_started = false;
        let mut ready = terminal.process_ready();
        let mut ready_pending = true;

        let exit = loop {
            tokio::select! {
                biased;
                event = collector_events.recv() => match event {
                    Ok(event) => {
                        self.handle_collector_event(&task, &terminal, collector.as_ref(), &mut progress, &event);
                    }
                    Err(RecvError::Lagged(n)) => debug!("Collector events of {} lagged by {}", task.label, n),
                    Err(RecvError::Closed) => {}
                },
                result = &mut ready, if ready_pending => {
                    ready_pending = false;
                    match result {
                        Ok(()) => {
                            process_started = true;
                            self.fire(TaskEvent::ProcessStarted {
                                task: Arc::clone(&task),
                                terminal_id,
                                process_id: terminal.process_id(),
                            });
                        }
                        Err(e) => debug!("Process of {} never became ready: {}", task.label, e),
                    }
                },
                event = terminal_events.recv() => match event {
                    Ok(TerminalEvent::Line(line)) => {
                        if feed_lines {
                            collector.process_line(&line);
                            flush.as_mut().reset(tokio::time::Instant::now() + debounce);
                            flush_armed = true;
                        }
                    }
                    Ok(TerminalEvent::Exit(code)) => break TerminalExit::Exited(code),
                    Ok(TerminalEvent::Disposed) | Err(RecvError::Closed) => break TerminalExit::Disposed,
                    Err(RecvError::Lagged(n)) => warn!("Terminal {} output lagged by {} events", terminal_id, n),
                },
                () = &mut flush, if flush_armed => {
                    flush_armed = false;
                    collector.force_delivery();
                },
            }
        };
        drop(ready);

        while let Ok(event) = collector_events.try_recv() {
            self.handle_collector_event(&task, &terminal, collector.as_ref(), &mut progress, &event);
        }

        {
            let mut state = self.state.lock();
            if background {
                state.busy_tasks.remove(&map_key);
            }
            state.remove_active_task(&task);
            if matches!(exit, TerminalExit::Exited(_)) && !terminal.is_disposed() {
                record_reusable_terminal(&mut state, &task, terminal_id);
            }
        }
        self.fire(TaskEvent::Changed);

        if !terminal.is_disposed() {
            let outcome = ExitOutcome::of(exit.code(), collector.as_ref());
            let target = task.presentation().and_then(|p| reveal::on_exit(p, background, outcome));
            self.reveal(&task, &terminal, target);
        }
        collector.done();
        collector.dispose();

        if !process_started {
            self.fire(TaskEvent::ProcessStarted {
                task: Arc::clone(&task),
                terminal_id,
                process_id: terminal.process_id(),
            });
        }
        let exit_code = exit.code();
        let duration = self.state.lock().take_duration(terminal_id);
        self.fire(TaskEvent::ProcessEnded {
            task: Arc::clone(&task),
            terminal_id,
            exit_code,
            duration,
        });

        if background {
            for _ in 0..progress.event_counter.max(0) {
                self.fire(TaskEvent::Inactive {
                    task: Arc::clone(&task),
                    terminal_id,
                    duration: None,
                });
            }
        } else {
            self.state.lock().busy_tasks.remove(&map_key);
            self.fire(TaskEvent::Inactive {
                task: Arc::clone(&task),
                terminal_id,
                duration,
            });
            if !progress.result_reported {
                self.report_matcher_result(&task, terminal_id, collector.as_ref());
            }
        }
        self.fire(TaskEvent::End {
            task: Arc::clone(&task),
        });
        if !background {
            self.state.lock().cleanup_task_tracking(&task);
        }

        Ok(TaskSummary { exit_code })
    }

    fn handle_collector_event(
        &self,
        task: &Arc<Task>,
        terminal: &Arc<dyn Terminal>,
        collector: &dyn ProblemCollector,
        progress: &mut MatcherProgress,
        event: &ProblemCollectorEvent,
    ) {
        let terminal_id = terminal.instance_id();
        match (task.is_background(), event) {
            (true, ProblemCollectorEvent::BackgroundProcessingBegins) => {
                progress.event_counter += 1;
                self.state.lock().busy_tasks.insert(task.map_key(), Arc::clone(task));
                if !terminal.is_disposed() {
                    self.fire(TaskEvent::Active {
                        task: Arc::clone(task),
                        terminal_id,
                    });
                }
            }
            (true, ProblemCollectorEvent::BackgroundProcessingEnds) => {
                progress.event_counter -= 1;
                let duration = {
                    let mut state = self.state.lock();
                    state.busy_tasks.remove(&task.map_key());
                    state.take_duration(terminal_id)
                };
                self.fire(TaskEvent::Inactive {
                    task: Arc::clone(task),
                    terminal_id,
                    duration,
                });
                if progress.event_counter == 0 && self.report_matcher_result(task, terminal_id, collector) {
                    self.reveal(task, terminal, task.presentation().and_then(reveal::on_errors));
                }
            }
            (false, ProblemCollectorEvent::BackgroundProcessingBegins) => {
                self.fire(TaskEvent::ProblemMatcherStarted {
                    task: Arc::clone(task),
                    terminal_id,
                });
            }
            (false, ProblemCollectorEvent::BackgroundProcessingEnds) => {
                if !progress.result_reported {
                    progress.result_reported = true;
                    self.report_matcher_result(task, terminal_id, collector);
                }
            }
            _ => {}
        }
    }

    /// `ProblemMatcherFoundErrors` when errors were matched, otherwise
    /// `ProblemMatcherEnded`; returns whether errors were found
    fn report_matcher_result(
        &self,
        task: &Arc<Task>,
        terminal_id: TerminalId,
        collector: &dyn ProblemCollector,
    ) -> bool {
        let found_errors = reveal::found_errors(collector);
        if found_errors {
            self.state.lock().task_errors.insert(task.map_key());
            self.fire(TaskEvent::ProblemMatcherFoundErrors {
                task: Arc::clone(task),
                terminal_id,
            });
        } else {
            let has_errors = self.state.lock().has_errors(task);
            self.fire(TaskEvent::ProblemMatcherEnded {
                task: Arc::clone(task),
                terminal_id,
                has_errors,
            });
        }
        found_errors
    }
}

/// Remember an idle terminal for the next task of the same panel policy
fn record_reusable_terminal(state: &mut SystemState, task: &Task, terminal_id: TerminalId) {
    let map_key = task.map_key();
    match task.presentation().map(|p| p.panel).unwrap_or_default() {
        PanelKind::Dedicated => {
            state.same_task_terminals.insert(map_key, terminal_id);
        }
        PanelKind::Shared => {
            state.idle_task_terminals.set(map_key, terminal_id, Touch::AsOld);
        }
        PanelKind::New => {}
    }
}
