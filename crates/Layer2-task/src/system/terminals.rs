//! Terminal acquisition, reuse, reconnection and termination

use super::launch::{wait_on_exit_value, LaunchContext};
use super::{RunTrigger, TerminalData, TerminalTaskSystem, TerminateResult};
use crate::error::{TaskError, TaskResult};
use crate::event::TaskEvent;
use crate::task::{PanelKind, RuntimeType, Task, WorkspaceFolder};
use crate::terminal::shell_integration::format_message_for_terminal;
use crate::terminal::{
    CreateTerminalRequest, ReconnectionData, ReconnectionProperties, ShellLaunchConfig, Terminal, TerminalEvent,
    TerminalId, TASK_TERMINAL_TYPE,
};
use crate::variables::VariableResolver;
use futures::future::join_all;
use std::sync::Arc;
use termtask_foundation::Platform;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, trace};

/// A terminal ready to run a task, with a receiver subscribed before launch
pub(super) struct AcquiredTerminal {
    pub terminal: Arc<dyn Terminal>,
    pub events: broadcast::Receiver<TerminalEvent>,
}

fn reconnection_properties(task: &Task, group: Option<String>, nonce: Option<String>) -> ReconnectionProperties {
    ReconnectionProperties {
        owner_id: TASK_TERMINAL_TYPE.to_string(),
        data: ReconnectionData {
            last_task: task.common_task_id(),
            group,
            label: task.label.clone(),
            id: task.id.clone(),
            shell_integration_nonce: nonce,
        },
    }
}

/// Wait until `events` reports the end of the process or the terminal
async fn wait_for_exit(events: &mut broadcast::Receiver<TerminalEvent>) {
    loop {
        match events.recv().await {
            Ok(TerminalEvent::Exit(_)) | Ok(TerminalEvent::Disposed) | Err(RecvError::Closed) => return,
            Ok(TerminalEvent::Line(_)) | Err(RecvError::Lagged(_)) => continue,
        }
    }
}

impl TerminalTaskSystem {
    // ========================================================================
    // Acquisition
    // ========================================================================

    /// Terminal for one run of `task`: an idle one of the same panel policy
    /// when available, else a new (possibly split or rejoined) one
    pub(super) async fn create_terminal(
        self: &Arc<Self>,
        task: &Arc<Task>,
        trigger: RunTrigger,
        resolver: &VariableResolver,
        folder: Option<&WorkspaceFolder>,
    ) -> TaskResult<AcquiredTerminal> {
        let configuration = task
            .command()
            .ok_or_else(|| TaskError::unknown(format!("Task {} has no command to run", task.label)))?;
        let platform = resolver
            .system_info()
            .map(|info| info.platform())
            .unwrap_or_else(Platform::detect);
        let options = self.resolve_options(resolver, configuration.options.as_ref()).await?;
        let presentation = &configuration.presentation;
        let wait_on_exit = wait_on_exit_value(presentation, task.is_background());

        let mut config = if configuration.runtime == Some(RuntimeType::CustomExecution) {
            ShellLaunchConfig {
                name: self.terminal_name(task),
                terminal_type: Some(TASK_TERMINAL_TYPE.to_string()),
                initial_text: presentation
                    .echo
                    .then(|| format_message_for_terminal(&format!("Executing task: {}", task.label), true)),
                wait_on_exit,
                is_feature_terminal: true,
                custom_execution: true,
                ..Default::default()
            }
        } else {
            let (command, args) = self.resolve_command_and_args(resolver, configuration).await?;
            let launch = LaunchContext {
                task: task.as_ref(),
                configuration,
                folder,
                resolver,
                platform,
                options: &options,
            };
            self.create_shell_launch_config(&launch, &command, &args, wait_on_exit)
                .await?
                .ok_or_else(|| TaskError::unknown("Can't execute a shell command on an UNC drive using cmd.exe."))?
        };
        self.update_current_task(|current| current.shell_launch_config = Some(config.clone()));

        let map_key = task.map_key();
        let group = presentation.group.clone();
        let reusable = {
            let mut state = self.state.lock();
            let id = match presentation.panel {
                PanelKind::Dedicated => state.same_task_terminals.remove(&map_key),
                PanelKind::Shared => {
                    let by_key = state.idle_task_terminals.remove(&map_key);
                    by_key.or_else(|| {
                        let same_group = state.idle_task_terminals.iter().find_map(|(key, id)| {
                            let data = state.terminals.get(id)?;
                            (data.group == group).then(|| (key.clone(), *id))
                        });
                        same_group.map(|(key, id)| {
                            state.idle_task_terminals.remove(&key);
                            id
                        })
                    })
                }
                PanelKind::New => None,
            };
            id.and_then(|id| state.terminals.get(&id).cloned())
                .filter(|data| !data.terminal.is_disposed())
        };

        if let Some(data) = reusable {
            let terminal = data.terminal;
            let id = terminal.instance_id();
            if task.is_background() {
                config.reconnection_properties =
                    Some(reconnection_properties(task, group.clone(), data.nonce.clone()));
            }
            let nonces = (data.nonce.clone(), config.shell_integration_nonce.clone());
            if let (Some(previous), Some(current)) = nonces {
                if let Some(text) = config.initial_text.as_mut() {
                    *text = text.replace(current.as_str(), previous.as_str());
                }
                config.shell_integration_nonce = Some(previous);
            }

            let events = terminal.subscribe();
            terminal.reuse_terminal(config).await?;
            if presentation.clear {
                terminal.clear_buffer();
            }
            if let Some(record) = self.state.lock().terminals.get_mut(&id) {
                record.last_task = map_key;
                record.task = Some(Arc::clone(task));
            }
            debug!("Reusing terminal {} for task {}", id, task.label);
            return Ok(AcquiredTerminal { terminal, events });
        }

        let (terminal, events) = {
            let _queue = self.creation_queue.lock().await;
            self.do_create_terminal(task, trigger, group.as_deref(), config).await?
        };
        let id = terminal.instance_id();
        let nonce = terminal.shell_launch_config().shell_integration_nonce;
        if task.is_background() {
            terminal.set_reconnection_properties(Some(reconnection_properties(task, group.clone(), nonce.clone())));
        }
        self.state.lock().terminals.insert(
            id,
            TerminalData {
                terminal: Arc::clone(&terminal),
                last_task: map_key,
                task: Some(Arc::clone(task)),
                group,
                nonce,
            },
        );
        self.watch_disposal(&terminal);
        debug!("Created terminal {} for task {}", id, task.label);
        Ok(AcquiredTerminal { terminal, events })
    }

    async fn do_create_terminal(
        &self,
        task: &Task,
        trigger: RunTrigger,
        group: Option<&str>,
        config: ShellLaunchConfig,
    ) -> TaskResult<(Arc<dyn Terminal>, broadcast::Receiver<TerminalEvent>)> {
        if trigger == RunTrigger::Reconnect {
            if let Some(terminal) = self.find_reconnectable(task) {
                terminal.set_wait_on_exit(config.wait_on_exit.clone());
                trace!("Reconnected to task {} in terminal {}", task.label, terminal.instance_id());
                let events = terminal.subscribe();
                return Ok((terminal, events));
            }
        }

        if let Some(group) = group {
            let parent = self
                .state
                .lock()
                .terminals
                .iter()
                .find(|(_, data)| data.group.as_deref() == Some(group) && !data.terminal.is_disposed())
                .map(|(id, _)| *id);
            if let Some(parent) = parent {
                trace!("Splitting terminal {} for group {}", parent, group);
                let request = CreateTerminalRequest {
                    config: config.clone(),
                    parent: Some(parent),
                };
                match self.terminal_service.create_terminal(request).await {
                    Ok(terminal) => {
                        let events = terminal.subscribe();
                        return Ok((terminal, events));
                    }
                    Err(e) if e.is_terminal() => debug!("Splitting terminal {} failed: {}", parent, e),
                    Err(e) => return Err(e.into()),
                }
            }
        }

        let terminal = self
            .terminal_service
            .create_terminal(CreateTerminalRequest { config, parent: None })
            .await?;
        let events = terminal.subscribe();
        Ok((terminal, events))
    }

    /// Live task terminal whose reconnection data names `task`
    fn find_reconnectable(&self, task: &Task) -> Option<Arc<dyn Terminal>> {
        let common_id = task.common_task_id();
        self.terminal_service.instances().into_iter().find(|terminal| {
            terminal
                .shell_launch_config()
                .reconnection_properties
                .is_some_and(|props| props.owner_id == TASK_TERMINAL_TYPE && props.data.last_task == common_id)
        })
    }

    /// Register task terminals restored from a previous session, once
    pub(super) fn reconnect_to_terminals(&self) {
        if self.state.lock().has_reconnected {
            trace!("Already reconnected to task terminals");
            return;
        }
        let restored: Vec<(Arc<dyn Terminal>, ReconnectionData)> = self
            .terminal_service
            .instances()
            .into_iter()
            .filter_map(|terminal| {
                let props = terminal.shell_launch_config().reconnection_properties?;
                (props.owner_id == TASK_TERMINAL_TYPE && !terminal.is_disposed()).then_some((terminal, props.data))
            })
            .collect();
        trace!("Reconnecting to {} task terminals", restored.len());

        let mut state = self.state.lock();
        for (terminal, data) in restored {
            state.terminals.insert(
                terminal.instance_id(),
                TerminalData {
                    terminal,
                    last_task: data.last_task,
                    task: None,
                    group: data.group,
                    nonce: data.shell_integration_nonce,
                },
            );
        }
        state.has_reconnected = true;
    }

    /// Forget the terminal once it is disposed and report the termination
    fn watch_disposal(self: &Arc<Self>, terminal: &Arc<dyn Terminal>) {
        let mut events = terminal.subscribe();
        let system = Arc::downgrade(self);
        let terminal = Arc::clone(terminal);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(TerminalEvent::Disposed) | Err(RecvError::Closed) => break,
                    _ => continue,
                }
            }
            if let Some(system) = system.upgrade() {
                system.on_terminal_disposed(terminal.as_ref());
            }
        });
    }

    fn on_terminal_disposed(&self, terminal: &dyn Terminal) {
        let id = terminal.instance_id();
        let (data, terminating) = {
            let mut state = self.state.lock();
            let terminating = state.terminating.remove(&id);
            (state.delete_task_and_terminal(id), terminating)
        };
        trace!("Terminal {} disposed", id);
        if terminating {
            return;
        }
        if let Some(task) = data.and_then(|data| data.task) {
            self.fire(TaskEvent::Terminated {
                task,
                terminal_id: id,
                exit_reason: terminal.exit_reason(),
            });
        }
    }

    // ========================================================================
    // Termination
    // ========================================================================

    /// Dispose the terminal of a running task and wait for its process
    pub async fn terminate(&self, task: &Task) -> TerminateResult {
        let target = {
            let mut state = self.state.lock();
            let target = state
                .active_tasks
                .get(&task.map_key())
                .and_then(|active| active.terminal.clone().map(|t| (Arc::clone(&active.task), t)));
            if let Some((_, terminal)) = &target {
                state.terminating.insert(terminal.instance_id());
            }
            target
        };
        match target {
            Some((task, terminal)) => self.terminate_terminal(task, terminal).await,
            None => TerminateResult::failed(),
        }
    }

    pub async fn terminate_all(&self) -> Vec<TerminateResult> {
        let targets: Vec<(Arc<Task>, Arc<dyn Terminal>)> = {
            let mut state = self.state.lock();
            let targets: Vec<_> = state
                .active_tasks
                .values()
                .filter_map(|active| active.terminal.clone().map(|t| (Arc::clone(&active.task), t)))
                .collect();
            for (_, terminal) in &targets {
                state.terminating.insert(terminal.instance_id());
            }
            targets
        };
        debug!("Terminating {} tasks", targets.len());

        join_all(targets.into_iter().map(|(task, terminal)| async move {
            let result = self.terminate_terminal(Arc::clone(&task), terminal).await;
            self.state.lock().remove_active_task(&task);
            result
        }))
        .await
    }

    async fn terminate_terminal(&self, task: Arc<Task>, terminal: Arc<dyn Terminal>) -> TerminateResult {
        let id: TerminalId = terminal.instance_id();
        let mut events = terminal.subscribe();
        let already_disposed = terminal.is_disposed();
        terminal.dispose();
        if already_disposed {
            self.state.lock().terminating.remove(&id);
        } else {
            wait_for_exit(&mut events).await;
        }
        self.fire(TaskEvent::Terminated {
            task: Arc::clone(&task),
            terminal_id: id,
            exit_reason: terminal.exit_reason(),
        });
        TerminateResult {
            success: true,
            task: Some(task),
        }
    }
}
