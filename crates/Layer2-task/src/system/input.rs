//! Variables a run needs and how they are acquired

use super::execution::RunContext;
use super::TerminalTaskSystem;
use crate::error::TaskResult;
use crate::event::TaskEvent;
use crate::problem::CompiledMatcher;
use crate::resolver::{ProcessLookup, ResolveSet, TaskSystemInfo};
use crate::task::{ProblemMatcherRef, RuntimeType, Task, TaskKind, TaskScope, WorkspaceFolder};
use crate::variables::{collect_variables, variable_name, VariableResolver, PROCESS_VARIABLE};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use termtask_foundation::{find_executable, Platform};
use tracing::{debug, trace};

/// String leaves of a provider task definition
fn collect_definition_variables(variables: &mut BTreeSet<String>, value: &Value) {
    match value {
        Value::String(s) => collect_variables(variables, s),
        Value::Array(items) => {
            for item in items {
                collect_definition_variables(variables, item);
            }
        }
        Value::Object(fields) => {
            for (key, field) in fields {
                if key != "_key" && key != "type" {
                    collect_definition_variables(variables, field);
                }
            }
        }
        _ => {}
    }
}

impl TerminalTaskSystem {
    /// Every `${...}` placeholder running `task` needs
    pub(super) fn collect_task_variables(&self, variables: &mut BTreeSet<String>, task: &Task) {
        let Some(command) = task.command() else {
            return;
        };

        if command.runtime == Some(RuntimeType::CustomExecution) {
            match &task.kind {
                TaskKind::Contributed { defines, .. } => collect_definition_variables(variables, defines),
                _ => {
                    if let Some(customizes) = &task.source.customizes {
                        collect_definition_variables(variables, customizes);
                    }
                }
            }
        } else if let Some(name) = &command.name {
            collect_variables(variables, name.value());
            for arg in &command.args {
                collect_variables(variables, arg.value());
            }
            if task.source.scope != TaskScope::Global {
                variables.insert("${workspaceFolder}".to_string());
            }
            if let Some(options) = &command.options {
                if let Some(cwd) = &options.cwd {
                    collect_variables(variables, cwd);
                }
                if let Some(env) = &options.env {
                    for value in env.values() {
                        collect_variables(variables, value);
                    }
                }
                if let Some(shell) = &options.shell {
                    if let Some(executable) = &shell.executable {
                        collect_variables(variables, executable);
                    }
                    for arg in shell.args.iter().flatten() {
                        collect_variables(variables, arg);
                    }
                }
            }
        }

        for reference in &task.properties.problem_matchers {
            let prefix = match reference {
                ProblemMatcherRef::Named(name) => self.matchers.get(name).and_then(|m| m.file_prefix.clone()),
                ProblemMatcherRef::Inline(matcher) => matcher.file_prefix.clone(),
            };
            if let Some(prefix) = prefix {
                collect_variables(variables, &prefix);
            }
        }
    }

    /// Resolve `variables`, then announce that input was acquired.
    ///
    /// `None` means resolution was cancelled.
    pub(super) async fn acquire_input(
        &self,
        system_info: Option<&Arc<dyn TaskSystemInfo>>,
        folder: Option<&WorkspaceFolder>,
        task: &Arc<Task>,
        variables: &BTreeSet<String>,
        ctx: &RunContext,
    ) -> TaskResult<Option<BTreeMap<String, String>>> {
        let resolved = self
            .resolve_variables_from_set(system_info, folder, task, variables, ctx)
            .await?;
        self.fire(TaskEvent::AcquiredInput {
            task: Arc::clone(task),
        });
        Ok(resolved)
    }

    async fn resolve_variables_from_set(
        &self,
        system_info: Option<&Arc<dyn TaskSystemInfo>>,
        folder: Option<&WorkspaceFolder>,
        task: &Task,
        variables: &BTreeSet<String>,
        ctx: &RunContext,
    ) -> TaskResult<Option<BTreeMap<String, String>>> {
        let command = task.command();
        let is_process = command.and_then(|c| c.runtime) == Some(RuntimeType::Process);
        let command_name = command.and_then(|c| c.name.as_ref()).map(|n| n.value().to_string());
        let options = command.and_then(|c| c.options.as_ref());
        let cwd = options.and_then(|o| o.cwd.clone());
        let env_path = options
            .and_then(|o| o.env.as_ref())
            .and_then(search_path);

        let already = ctx.already_resolved.lock().clone();
        let unresolved: BTreeSet<String> = variables
            .iter()
            .filter(|v| !already.contains_key(variable_name(v)))
            .cloned()
            .collect();
        trace!(
            "Resolving {} variables for {} ({} already known)",
            unresolved.len(),
            task.label,
            variables.len() - unresolved.len()
        );

        let values = match (system_info, folder) {
            (Some(info), Some(folder)) => {
                let platform = info.platform();
                let mut set = ResolveSet {
                    variables: unresolved,
                    process: None,
                };
                if platform.is_windows() && is_process {
                    set.process = command_name.as_ref().map(|name| ProcessLookup {
                        name: name.clone(),
                        cwd: cwd.clone(),
                        path: env_path.clone(),
                    });
                }
                let Some(resolved) = info.resolve_variables(folder, &set).await? else {
                    return Ok(None);
                };
                let mut values = resolved.variables;
                values.extend(already);
                if let (true, Some(name)) = (is_process, command_name.as_deref()) {
                    let process = if platform.is_windows() {
                        self.resolve_and_find_executable(Some(info), Some(folder), name, cwd.as_deref(), env_path.as_deref())
                            .await?
                    } else {
                        name.to_string()
                    };
                    values.insert(PROCESS_VARIABLE.to_string(), process);
                }
                values
            }
            _ => {
                let unresolved: Vec<String> = unresolved.into_iter().collect();
                let resolved = self
                    .configuration_resolver
                    .resolve_with_interaction(folder, &unresolved, "tasks")
                    .await?;
                let Some(mut values) = resolved else {
                    return Ok(None);
                };
                values.extend(already);
                if let (true, Some(name)) = (is_process, command_name.as_deref()) {
                    let process = if Platform::detect().is_windows() {
                        self.resolve_and_find_executable(None, folder, name, cwd.as_deref(), env_path.as_deref())
                            .await?
                    } else {
                        self.configuration_resolver.resolve_async(folder, name).await?
                    };
                    values.insert(PROCESS_VARIABLE.to_string(), process);
                }
                values
            }
        };

        ctx.already_resolved
            .lock()
            .extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(Some(values))
    }

    /// Absolute path of a process task's program, or the name as given
    async fn resolve_and_find_executable(
        &self,
        system_info: Option<&Arc<dyn TaskSystemInfo>>,
        folder: Option<&WorkspaceFolder>,
        name: &str,
        cwd: Option<&str>,
        env_path: Option<&str>,
    ) -> TaskResult<String> {
        let resolver = &self.configuration_resolver;
        let command = resolver.resolve_async(folder, name).await?;
        let cwd = match cwd {
            Some(cwd) => Some(resolver.resolve_async(folder, cwd).await?),
            None => None,
        };
        let paths = match env_path {
            Some(path) => {
                let mut paths = Vec::new();
                for entry in path.split(';') {
                    paths.push(resolver.resolve_async(folder, entry).await?);
                }
                Some(paths)
            }
            None => None,
        };

        let found = match system_info {
            Some(info) => info.find_executable(&command, cwd.as_deref(), paths.as_deref()).await,
            None => find_executable(&command, cwd.as_deref().map(Path::new), paths.as_deref())
                .map(|p| p.display().to_string()),
        };
        if found.is_none() {
            debug!("Executable {} not found, using it as given", command);
        }
        Ok(found.unwrap_or(command))
    }

    /// Look up, resolve and compile the task's problem matchers.
    ///
    /// Unknown and invalid matchers are reported and skipped.
    pub(super) async fn resolve_matchers(
        &self,
        resolver: &VariableResolver,
        task: &Task,
    ) -> TaskResult<Vec<CompiledMatcher>> {
        let mut compiled = Vec::new();
        for reference in &task.properties.problem_matchers {
            let mut matcher = match reference {
                ProblemMatcherRef::Named(name) => match self.matchers.get(name) {
                    Some(matcher) => matcher.clone(),
                    None => {
                        self.log(format!(
                            "Problem matcher {} can't be resolved. The matcher will be ignored",
                            name
                        ));
                        continue;
                    }
                },
                ProblemMatcherRef::Inline(matcher) => (**matcher).clone(),
            };
            if let Some(prefix) = matcher.file_prefix.clone() {
                matcher.file_prefix = Some(resolver.resolve(&prefix).await?);
            }
            match CompiledMatcher::compile(matcher) {
                Ok(matcher) => compiled.push(matcher),
                Err(e) => self.log(format!("Problem matcher of task {} is invalid: {}", task.label, e)),
            }
        }
        Ok(compiled)
    }
}

/// `PATH` of a task environment; Windows spells it `Path`
fn search_path(env: &BTreeMap<String, String>) -> Option<String> {
    env.iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("path"))
        .map(|(_, value)| value.clone())
}
