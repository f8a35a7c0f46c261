//! Shell launch configuration of a task run

use super::TerminalTaskSystem;
use crate::error::{TaskError, TaskResult};
use crate::shell::{add_all_argument, shell_basename, shell_command_flags};
use crate::task::{
    CommandConfiguration, CommandOptions, CommandString, PanelKind, PresentationOptions, RevealKind, RuntimeType,
    ShellConfiguration, Task, WorkspaceFolder,
};
use crate::terminal::shell_integration::{format_message_for_terminal, output_sequence, start_sequence};
use crate::terminal::{ShellArgs, ShellLaunchConfig, WaitOnExit, TASK_TERMINAL_TYPE};
use crate::variables::{VariableResolver, PROCESS_VARIABLE};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use termtask_foundation::Platform;
use uuid::Uuid;

const CLOSE_TERMINAL_MESSAGE: &str = "Press any key to close the terminal.";
const REUSE_TERMINAL_MESSAGE: &str = "Terminal will be reused by tasks, press any key to close it.";

/// What the terminal does when the task's process exits.
///
/// Terminals stay open unless `close` is set, except for hidden background
/// tasks. Terminals that stay open print a reuse notice when they may be
/// reused.
pub fn wait_on_exit_value(presentation: &PresentationOptions, is_background: bool) -> WaitOnExit {
    let close = presentation.close;
    if close != Some(true) && (presentation.reveal != RevealKind::Never || !is_background || close == Some(false)) {
        if presentation.panel == PanelKind::New {
            return WaitOnExit::Message(CLOSE_TERMINAL_MESSAGE.to_string());
        }
        if presentation.show_reuse_message {
            return WaitOnExit::Message(REUSE_TERMINAL_MESSAGE.to_string());
        }
        return WaitOnExit::Wait;
    }
    if close == Some(true) {
        WaitOnExit::Close
    } else {
        WaitOnExit::Wait
    }
}

pub(super) fn is_unc(path: &str) -> bool {
    path.starts_with("\\\\")
}

/// Relative working directories are relative to the task's folder
fn task_cwd(cwd: &str, folder: Option<&WorkspaceFolder>) -> PathBuf {
    let path = Path::new(cwd);
    if is_unc(cwd) || path.is_absolute() {
        return path.to_path_buf();
    }
    match folder {
        Some(folder) => folder.path.join(path),
        None => path.to_path_buf(),
    }
}

/// Command options with every placeholder resolved
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(super) struct ResolvedOptions {
    /// `None` when neither a cwd nor a workspace folder resolves
    pub cwd: Option<String>,
    pub env: BTreeMap<String, String>,
    pub shell: Option<ShellConfiguration>,
}

/// Inputs shared by both launch configuration flavors
pub(super) struct LaunchContext<'a> {
    pub task: &'a Task,
    pub configuration: &'a CommandConfiguration,
    pub folder: Option<&'a WorkspaceFolder>,
    pub resolver: &'a VariableResolver,
    pub platform: Platform,
    pub options: &'a ResolvedOptions,
}

impl TerminalTaskSystem {
    pub(super) async fn resolve_options(
        &self,
        resolver: &VariableResolver,
        options: Option<&CommandOptions>,
    ) -> TaskResult<ResolvedOptions> {
        let mut resolved = ResolvedOptions::default();

        let cwd = match options.and_then(|o| o.cwd.as_deref()) {
            Some(cwd) => resolver.resolve(cwd).await?,
            None => resolver.resolve("${workspaceFolder}").await?,
        };
        if !cwd.contains("${") {
            resolved.cwd = Some(cwd);
        }

        if let Some(env) = options.and_then(|o| o.env.as_ref()) {
            for (name, value) in env {
                resolved.env.insert(name.clone(), resolver.resolve(value).await?);
            }
        }

        if let Some(shell) = options.and_then(|o| o.shell.as_ref()) {
            let executable = match &shell.executable {
                Some(executable) => Some(resolver.resolve(executable).await?),
                None => None,
            };
            let args = match &shell.args {
                Some(args) => {
                    let mut resolved_args = Vec::with_capacity(args.len());
                    for arg in args {
                        resolved_args.push(resolver.resolve(arg).await?);
                    }
                    Some(resolved_args)
                }
                None => None,
            };
            resolved.shell = Some(ShellConfiguration {
                executable,
                args,
                quoting: shell.quoting.clone(),
            });
        }
        Ok(resolved)
    }

    pub(super) async fn resolve_command_and_args(
        &self,
        resolver: &VariableResolver,
        configuration: &CommandConfiguration,
    ) -> TaskResult<(CommandString, Vec<CommandString>)> {
        let name = configuration
            .name
            .as_ref()
            .ok_or_else(|| TaskError::unknown("The task has no command to execute"))?;
        let command = name.with_value(resolver.resolve(name.value()).await?);
        let mut args = Vec::with_capacity(configuration.args.len());
        for arg in &configuration.args {
            args.push(arg.with_value(resolver.resolve(arg.value()).await?));
        }
        Ok((command, args))
    }

    /// Launch configuration of a shell or process task.
    ///
    /// `None` when the command cannot run at all (cmd.exe on a UNC cwd).
    pub(super) async fn create_shell_launch_config(
        &self,
        launch: &LaunchContext<'_>,
        command: &CommandString,
        args: &[CommandString],
        wait_on_exit: WaitOnExit,
    ) -> TaskResult<Option<ShellLaunchConfig>> {
        let cwd = launch.options.cwd.as_deref().map(|cwd| task_cwd(cwd, launch.folder));

        let mut config = if launch.configuration.runtime == Some(RuntimeType::Process) {
            self.process_launch_config(launch, args, cwd.as_deref()).await?
        } else {
            match self.shell_launch_config(launch, command, args, cwd.as_deref()) {
                Some(config) => config,
                None => return Ok(None),
            }
        };

        config.cwd = cwd;
        config.env.extend(launch.options.env.clone());
        config.wait_on_exit = wait_on_exit;
        config.is_feature_terminal = true;
        config.terminal_type = Some(TASK_TERMINAL_TYPE.to_string());
        config.name = self.terminal_name(launch.task);
        Ok(Some(config))
    }

    fn shell_launch_config(
        &self,
        launch: &LaunchContext<'_>,
        command: &CommandString,
        args: &[CommandString],
        cwd: Option<&Path>,
    ) -> Option<ShellLaunchConfig> {
        let platform = launch.platform;
        let profile = self.terminal_service.default_profile(platform);
        let shell = launch.options.shell.as_ref();

        let mut executable = profile.path.clone();
        let mut shell_args = profile.args.clone();
        let mut shell_specified = false;
        if let Some(shell) = shell {
            if let Some(configured) = &shell.executable {
                if *configured != executable {
                    shell_args.clear();
                }
                executable = configured.clone();
                shell_specified = true;
            }
            if let Some(configured) = &shell.args {
                shell_args = configured.clone();
            }
        }

        let basename = shell_basename(&executable);
        let command_line = self.command_line_builder.build(
            platform,
            &basename,
            shell.and_then(|s| s.quoting.as_ref()),
            command,
            launch.configuration.name.as_ref(),
            args,
        );

        if platform.is_windows() && basename == "cmd.exe" {
            let unc = match &launch.options.cwd {
                Some(cwd) => is_unc(cwd),
                None => dirs::home_dir().is_some_and(|home| is_unc(&home.to_string_lossy())),
            };
            if unc {
                return None;
            }
        }
        if platform == Platform::Mac && !shell_specified {
            shell_args.retain(|arg| arg != "-l");
        }

        let flags = shell_command_flags(platform, &basename, shell_specified);
        let mut combined = add_all_argument(&flags.flags, &shell_args);
        combined.push(command_line.clone());

        let nonce = Uuid::new_v4().to_string();
        let output = output_sequence(Some((command_line.as_str(), nonce.as_str())));
        let initial_text = if launch.configuration.presentation.echo {
            let message = match (self.workspace.multi_root, launch.folder) {
                (true, Some(folder)) => {
                    let folder_name = cwd
                        .filter(|cwd| !is_unc(&cwd.to_string_lossy()))
                        .and_then(Path::file_name)
                        .map(|name| name.to_string_lossy().into_owned())
                        .unwrap_or_else(|| folder.name.clone());
                    format!("Executing task in folder {}: {}", folder_name, command_line)
                }
                _ => format!("Executing task: {}", command_line),
            };
            format!(
                "{}{}{}",
                start_sequence(cwd),
                format_message_for_terminal(&message, true),
                output
            )
        } else {
            format!("{}{}", start_sequence(cwd), output)
        };

        Some(ShellLaunchConfig {
            executable: Some(executable),
            args: if flags.join_args {
                ShellArgs::Line(combined.join(" "))
            } else {
                ShellArgs::List(combined)
            },
            env: profile.env,
            initial_text: Some(initial_text),
            shell_integration_nonce: Some(nonce),
            ..Default::default()
        })
    }

    async fn process_launch_config(
        &self,
        launch: &LaunchContext<'_>,
        args: &[CommandString],
        cwd: Option<&Path>,
    ) -> TaskResult<ShellLaunchConfig> {
        let resolver = launch.resolver;
        let placeholder = format!("${{{}}}", PROCESS_VARIABLE);
        let executable = resolver.resolve(&resolver.resolve(&placeholder).await?).await?;
        let args: Vec<String> = args.iter().map(|arg| arg.value().to_string()).collect();

        let initial_text = if launch.configuration.presentation.echo {
            let line = format!("{} {}", executable, args.join(" "));
            format!(
                "{}{}{}",
                start_sequence(cwd),
                format_message_for_terminal(&format!("Executing task: {}", line.trim_end()), true),
                output_sequence(None)
            )
        } else {
            format!("{}{}", start_sequence(cwd), output_sequence(None))
        };

        Ok(ShellLaunchConfig {
            executable: Some(executable),
            args: ShellArgs::List(args),
            initial_text: Some(initial_text),
            ..Default::default()
        })
    }

    /// Qualified with the folder in multi-root workspaces
    pub(super) fn terminal_name(&self, task: &Task) -> String {
        if self.workspace.multi_root {
            task.qualified_label()
        } else {
            task.properties.name.clone().unwrap_or_default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn presentation(f: impl FnOnce(&mut PresentationOptions)) -> PresentationOptions {
        let mut options = PresentationOptions::default();
        f(&mut options);
        options
    }

    #[test]
    fn test_wait_on_exit_defaults_to_reuse_message() {
        let value = wait_on_exit_value(&PresentationOptions::default(), false);
        assert_eq!(value, WaitOnExit::Message(REUSE_TERMINAL_MESSAGE.to_string()));
    }

    #[test]
    fn test_wait_on_exit_new_panel() {
        let value = wait_on_exit_value(&presentation(|p| p.panel = PanelKind::New), false);
        assert_eq!(value, WaitOnExit::Message(CLOSE_TERMINAL_MESSAGE.to_string()));
        let value = wait_on_exit_value(&presentation(|p| p.show_reuse_message = false), false);
        assert_eq!(value, WaitOnExit::Wait);
    }

    #[test]
    fn test_wait_on_exit_close() {
        assert_eq!(wait_on_exit_value(&presentation(|p| p.close = Some(true)), false), WaitOnExit::Close);

        let hidden = presentation(|p| p.reveal = RevealKind::Never);
        assert_eq!(wait_on_exit_value(&hidden, true), WaitOnExit::Wait);
        assert!(matches!(wait_on_exit_value(&hidden, false), WaitOnExit::Message(_)));
    }

    #[test]
    fn test_task_cwd() {
        let folder = WorkspaceFolder::from_path("/work/app");
        assert_eq!(task_cwd("build", Some(&folder)), PathBuf::from("/work/app/build"));
        assert_eq!(task_cwd("/tmp", Some(&folder)), PathBuf::from("/tmp"));
        assert_eq!(task_cwd("\\\\server\\share", Some(&folder)), PathBuf::from("\\\\server\\share"));
        assert!(is_unc("\\\\server\\share"));
        assert!(!is_unc("C:\\work"));
    }
}
