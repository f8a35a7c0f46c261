//! Task definition and types
//!
//! A [`Task`] is a closed set of variants (custom, contributed, configuring,
//! in-memory) sharing common configuration properties. Keys derived from a
//! task identify one live instance (`map_key`), repeated runs of the same task
//! (`key`) and the task across recursion paths and reconnects
//! (`common_task_id`).

use crate::problem::ProblemMatcher;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Type tag used in keys of workspace tasks
pub const CUSTOMIZED_TASK_TYPE: &str = "$customized";

/// Folder id used for user-level tasks
pub const USER_TASKS_GROUP_KEY: &str = "settings";

// ============================================================================
// Workspace
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkspaceFolder {
    pub uri: String,
    pub name: String,
    pub path: PathBuf,
}

impl WorkspaceFolder {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            uri: format!("file://{}", path.display()),
            name,
            path,
        }
    }
}

/// Folders the task system works against
#[derive(Debug, Clone, Default)]
pub struct Workspace {
    pub folders: Vec<WorkspaceFolder>,
    /// Multi-root workspaces qualify terminal names and echo text with the folder
    pub multi_root: bool,
}

impl Workspace {
    pub fn single(folder: WorkspaceFolder) -> Self {
        Self {
            folders: vec![folder],
            multi_root: false,
        }
    }

    pub fn first_folder(&self) -> Option<&WorkspaceFolder> {
        self.folders.first()
    }
}

// ============================================================================
// Command configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuntimeType {
    Shell,
    Process,
    CustomExecution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ShellQuoting {
    Escape,
    Strong,
    Weak,
}

/// A command or argument, optionally tagged with how it must be quoted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandString {
    Plain(String),
    Quoted { value: String, quoting: ShellQuoting },
}

impl CommandString {
    pub fn value(&self) -> &str {
        match self {
            CommandString::Plain(s) => s,
            CommandString::Quoted { value, .. } => value,
        }
    }

    pub fn quoted(value: impl Into<String>, quoting: ShellQuoting) -> Self {
        CommandString::Quoted {
            value: value.into(),
            quoting,
        }
    }

    /// Same quoting, different text
    pub fn with_value(&self, value: String) -> Self {
        match self {
            CommandString::Plain(_) => CommandString::Plain(value),
            CommandString::Quoted { quoting, .. } => CommandString::Quoted {
                value,
                quoting: *quoting,
            },
        }
    }
}

impl From<&str> for CommandString {
    fn from(s: &str) -> Self {
        CommandString::Plain(s.to_string())
    }
}

impl From<String> for CommandString {
    fn from(s: String) -> Self {
        CommandString::Plain(s)
    }
}

impl fmt::Display for CommandString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EscapeOptions {
    /// Escape spaces only
    Char(char),
    Table {
        #[serde(rename = "escapeChar")]
        escape_char: char,
        #[serde(rename = "charsToEscape")]
        chars_to_escape: String,
    },
}

impl EscapeOptions {
    pub fn escape_char(&self) -> char {
        match self {
            EscapeOptions::Char(c) => *c,
            EscapeOptions::Table { escape_char, .. } => *escape_char,
        }
    }
}

/// Quote characters understood by a shell
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellQuotingOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strong: Option<char>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weak: Option<char>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escape: Option<EscapeOptions>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quoting: Option<ShellQuotingOptions>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<ShellConfiguration>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RevealKind {
    #[default]
    Always,
    Silent,
    Never,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RevealProblemKind {
    #[default]
    Never,
    OnProblem,
    Always,
}

/// Terminal reuse policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PanelKind {
    #[default]
    Shared,
    Dedicated,
    New,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PresentationOptions {
    pub echo: bool,
    pub reveal: RevealKind,
    pub reveal_problems: RevealProblemKind,
    pub focus: bool,
    pub panel: PanelKind,
    pub show_reuse_message: bool,
    pub clear: bool,
    /// Tasks of the same group share split terminals and idle terminals
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close: Option<bool>,
}

impl Default for PresentationOptions {
    fn default() -> Self {
        Self {
            echo: true,
            reveal: RevealKind::Always,
            reveal_problems: RevealProblemKind::Never,
            focus: false,
            panel: PanelKind::Shared,
            show_reuse_message: true,
            clear: false,
            group: None,
            close: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<CommandString>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<CommandString>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<CommandOptions>,
    #[serde(default)]
    pub presentation: PresentationOptions,
}

// ============================================================================
// Configuration properties
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DependsOrder {
    #[default]
    Parallel,
    Sequence,
}

/// How a dependency names its target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskIdentifier {
    /// Label or identifier
    Name(String),
    /// A task definition (`type` plus provider-specific fields)
    Definition(serde_json::Value),
}

impl TaskIdentifier {
    pub fn name(&self) -> String {
        match self {
            TaskIdentifier::Name(name) => name.clone(),
            TaskIdentifier::Definition(value) => value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDependency {
    /// Workspace folder uri the dependency lives in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    pub task: TaskIdentifier,
}

impl TaskDependency {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            uri: None,
            task: TaskIdentifier::Name(name.into()),
        }
    }
}

/// Named reference into the matcher registry, or an inline matcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProblemMatcherRef {
    Named(String),
    Inline(Box<ProblemMatcher>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigurationProperties {
    pub name: Option<String>,
    pub identifier: Option<String>,
    pub is_background: bool,
    pub problem_matchers: Vec<ProblemMatcherRef>,
    pub depends_on: Vec<TaskDependency>,
    pub depends_order: DependsOrder,
    /// `build`, `test`, ...
    pub group: Option<String>,
    pub prompt_on_close: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunOptions {
    pub reevaluate_on_rerun: bool,
    pub instance_limit: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            reevaluate_on_rerun: true,
            instance_limit: 1,
        }
    }
}

// ============================================================================
// Source
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskSourceKind {
    #[default]
    Workspace,
    Extension,
    InMemory,
    WorkspaceFile,
    User,
}

impl TaskSourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskSourceKind::Workspace => "workspace",
            TaskSourceKind::Extension => "extension",
            TaskSourceKind::InMemory => "inMemory",
            TaskSourceKind::WorkspaceFile => "workspaceFile",
            TaskSourceKind::User => "user",
        }
    }
}

/// Scope of a contributed task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskScope {
    Global = 1,
    Workspace = 2,
    #[default]
    Folder = 3,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSource {
    pub kind: TaskSourceKind,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_folder: Option<WorkspaceFolder>,
    #[serde(default)]
    pub scope: TaskScope,
    /// Definition of the contributed task a workspace task customizes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customizes: Option<serde_json::Value>,
}

// ============================================================================
// Task
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "camelCase")]
pub enum TaskKind {
    /// shell / process / composite tasks from a tasks file
    Custom { command: CommandConfiguration },
    /// Resolved from a provider
    Contributed {
        defines: serde_json::Value,
        command: CommandConfiguration,
    },
    /// Parsed customization of a provider task, not yet resolved
    Configuring { configures: serde_json::Value },
    InMemory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub label: String,
    /// Provider task type (`shell`, `process`, `npm`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    pub kind: TaskKind,
    #[serde(default)]
    pub source: TaskSource,
    #[serde(default)]
    pub run_options: RunOptions,
    #[serde(default)]
    pub properties: ConfigurationProperties,
    /// Instance number, assigned when a run joins existing instances
    #[serde(default)]
    pub instance: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub load_messages: Vec<String>,
}

impl Task {
    pub fn custom(id: impl Into<String>, label: impl Into<String>, command: CommandConfiguration) -> Self {
        let id = id.into();
        let label = label.into();
        Self {
            properties: ConfigurationProperties {
                name: Some(label.clone()),
                identifier: Some(label.clone()),
                ..Default::default()
            },
            id,
            label,
            task_type: None,
            kind: TaskKind::Custom { command },
            source: TaskSource::default(),
            run_options: RunOptions::default(),
            instance: 0,
            load_messages: Vec::new(),
        }
    }

    /// Shell task running `command` through the default shell
    pub fn shell(label: impl Into<String>, command: impl Into<String>) -> Self {
        let label = label.into();
        let command = CommandConfiguration {
            runtime: Some(RuntimeType::Shell),
            name: Some(CommandString::Plain(command.into())),
            ..Default::default()
        };
        let mut task = Self::custom(label.clone(), label, command);
        task.task_type = Some("shell".to_string());
        task
    }

    pub fn process(label: impl Into<String>, program: impl Into<String>, args: Vec<CommandString>) -> Self {
        let label = label.into();
        let command = CommandConfiguration {
            runtime: Some(RuntimeType::Process),
            name: Some(CommandString::Plain(program.into())),
            args,
            ..Default::default()
        };
        let mut task = Self::custom(label.clone(), label, command);
        task.task_type = Some("process".to_string());
        task
    }

    /// Task with no command of its own, only dependencies
    pub fn composite(label: impl Into<String>, depends_on: Vec<TaskDependency>) -> Self {
        let label = label.into();
        let mut task = Self::custom(label.clone(), label, CommandConfiguration::default());
        task.properties.depends_on = depends_on;
        task
    }

    pub fn in_memory(id: impl Into<String>, label: impl Into<String>) -> Self {
        let mut task = Self::custom(id, label, CommandConfiguration::default());
        task.kind = TaskKind::InMemory;
        task.source.kind = TaskSourceKind::InMemory;
        task
    }

    // ========================================================================
    // Builder
    // ========================================================================

    pub fn with_folder(mut self, folder: WorkspaceFolder) -> Self {
        self.source.workspace_folder = Some(folder);
        self
    }

    pub fn with_depends_on(mut self, deps: Vec<TaskDependency>, order: DependsOrder) -> Self {
        self.properties.depends_on = deps;
        self.properties.depends_order = order;
        self
    }

    pub fn with_background(mut self, background: bool) -> Self {
        self.properties.is_background = background;
        self
    }

    pub fn with_problem_matcher(mut self, matcher: ProblemMatcherRef) -> Self {
        self.properties.problem_matchers.push(matcher);
        self
    }

    pub fn with_instance_limit(mut self, limit: usize) -> Self {
        self.run_options.instance_limit = limit;
        self
    }

    pub fn with_presentation(mut self, f: impl FnOnce(&mut PresentationOptions)) -> Self {
        if let Some(command) = self.command_mut() {
            f(&mut command.presentation);
        }
        self
    }

    pub fn with_options(mut self, options: CommandOptions) -> Self {
        if let Some(command) = self.command_mut() {
            command.options = Some(options);
        }
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn command(&self) -> Option<&CommandConfiguration> {
        match &self.kind {
            TaskKind::Custom { command } | TaskKind::Contributed { command, .. } => Some(command),
            _ => None,
        }
    }

    pub fn command_mut(&mut self) -> Option<&mut CommandConfiguration> {
        match &mut self.kind {
            TaskKind::Custom { command } | TaskKind::Contributed { command, .. } => Some(command),
            _ => None,
        }
    }

    pub fn presentation(&self) -> Option<&PresentationOptions> {
        self.command().map(|c| &c.presentation)
    }

    pub fn presentation_group(&self) -> Option<&str> {
        self.presentation().and_then(|p| p.group.as_deref())
    }

    pub fn is_background(&self) -> bool {
        self.properties.is_background
    }

    pub fn is_in_memory(&self) -> bool {
        matches!(self.kind, TaskKind::InMemory)
    }

    pub fn is_custom(&self) -> bool {
        matches!(self.kind, TaskKind::Custom { .. })
    }

    /// Custom/contributed tasks with a runnable command
    pub fn has_command(&self) -> bool {
        self.command()
            .map(|c| c.name.is_some() || c.runtime == Some(RuntimeType::CustomExecution))
            .unwrap_or(false)
    }

    /// A custom task with neither a command nor dependencies
    pub fn is_empty(&self) -> bool {
        match &self.kind {
            TaskKind::Custom { command } => {
                command.name.is_none()
                    && command.runtime != Some(RuntimeType::CustomExecution)
                    && self.properties.depends_on.is_empty()
            }
            _ => false,
        }
    }

    pub fn workspace_folder(&self) -> Option<&WorkspaceFolder> {
        match self.kind {
            TaskKind::InMemory => None,
            _ => self.source.workspace_folder.as_ref(),
        }
    }

    pub fn qualified_label(&self) -> String {
        match self.workspace_folder() {
            Some(folder) => format!("{} ({})", self.label, folder.name),
            None => self.label.clone(),
        }
    }

    fn folder_id(&self) -> Option<String> {
        match &self.kind {
            TaskKind::Custom { .. } | TaskKind::Configuring { .. } => {
                if self.source.kind == TaskSourceKind::User {
                    Some(USER_TASKS_GROUP_KEY.to_string())
                } else {
                    self.source.workspace_folder.as_ref().map(|f| f.uri.clone())
                }
            }
            TaskKind::Contributed { .. } => match (self.source.scope, &self.source.workspace_folder) {
                (TaskScope::Folder, Some(folder)) => Some(folder.uri.clone()),
                _ => None,
            },
            TaskKind::InMemory => None,
        }
    }

    // ========================================================================
    // Keys
    // ========================================================================

    /// Key of one live instance
    pub fn map_key(&self) -> String {
        match &self.kind {
            TaskKind::Custom { .. } => match &self.source.workspace_folder {
                Some(folder) => format!("{}|{}|{}", folder.uri, self.id, self.instance),
                None => format!("{}|{}", self.id, self.instance),
            },
            TaskKind::Contributed { .. } => {
                let scope = self.source.scope as u8;
                match &self.source.workspace_folder {
                    Some(folder) => format!("{}|{}|{}|{}", scope, folder.uri, self.id, self.instance),
                    None => format!("{}|{}|{}", scope, self.id, self.instance),
                }
            }
            TaskKind::InMemory => format!("{}|{}", self.id, self.instance),
            TaskKind::Configuring { .. } => self.id.clone(),
        }
    }

    /// Identity shared by repeated runs of the same task
    pub fn key(&self) -> Option<String> {
        match &self.kind {
            TaskKind::Custom { .. } | TaskKind::Configuring { .. } => {
                let folder = self.folder_id()?;
                let mut id = self.properties.identifier.clone().unwrap_or_default();
                if self.source.kind != TaskSourceKind::Workspace {
                    id.push_str(self.source.kind.as_str());
                }
                Some(json!({ "type": CUSTOMIZED_TASK_TYPE, "folder": folder, "id": id }).to_string())
            }
            TaskKind::Contributed { .. } => Some(
                json!({
                    "type": "contributed",
                    "scope": self.source.scope as u8,
                    "id": self.id,
                    "folder": self.folder_id(),
                })
                .to_string(),
            ),
            TaskKind::InMemory => None,
        }
    }

    /// Key used for cycle detection and terminal reconnection
    pub fn common_task_id(&self) -> String {
        let generic = || json!({ "folder": self.folder_id(), "id": self.id }).to_string();
        match &self.kind {
            TaskKind::Custom { .. } if self.source.customizes.is_none() => self.key().unwrap_or_else(generic),
            _ => generic(),
        }
    }

    /// Matches a label, identifier or (with `compare_id`) the raw id
    pub fn matches(&self, identifier: &TaskIdentifier, compare_id: bool) -> bool {
        match identifier {
            TaskIdentifier::Name(name) => {
                name == &self.label
                    || self.properties.identifier.as_deref() == Some(name.as_str())
                    || (compare_id && name == &self.id)
            }
            TaskIdentifier::Definition(value) => match &self.kind {
                TaskKind::Contributed { defines, .. } => defines == value,
                TaskKind::Configuring { configures } => configures == value,
                _ => self.source.customizes.as_ref() == Some(value),
            },
        }
    }

    pub fn add_load_messages(&mut self, messages: impl IntoIterator<Item = String>) {
        self.load_messages.extend(messages);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder() -> WorkspaceFolder {
        WorkspaceFolder::from_path("/work/app")
    }

    #[test]
    fn test_custom_keys() {
        let mut task = Task::shell("build", "make").with_folder(folder());
        assert_eq!(task.map_key(), "file:///work/app|build|0");
        task.instance = 2;
        assert_eq!(task.map_key(), "file:///work/app|build|2");

        let key = task.key().unwrap();
        assert!(key.contains("\"$customized\""));
        assert!(key.contains("file:///work/app"));
        assert_eq!(task.common_task_id(), key);
    }

    #[test]
    fn test_key_ignores_instance() {
        let task = Task::shell("build", "make").with_folder(folder());
        let mut other = task.clone();
        other.instance = 5;
        assert_eq!(task.key(), other.key());
        assert_ne!(task.map_key(), other.map_key());
    }

    #[test]
    fn test_folderless_task_has_no_key() {
        let task = Task::shell("lint", "eslint .");
        assert_eq!(task.map_key(), "lint|0");
        assert!(task.key().is_none());
        assert!(task.common_task_id().contains("\"lint\""));
    }

    #[test]
    fn test_in_memory_and_empty() {
        let task = Task::in_memory("mem", "Memory");
        assert!(task.is_in_memory());
        assert!(task.key().is_none());
        assert_eq!(task.map_key(), "mem|0");

        let empty = Task::custom("e", "e", CommandConfiguration::default());
        assert!(empty.is_empty());
        let composite = Task::composite("all", vec![TaskDependency::named("build")]);
        assert!(!composite.is_empty());
        assert!(!composite.has_command());
    }

    #[test]
    fn test_contributed_map_key() {
        let mut task = Task::shell("watch", "npm run watch").with_folder(folder());
        let command = task.command().cloned().unwrap();
        task.kind = TaskKind::Contributed {
            defines: json!({ "type": "npm", "script": "watch" }),
            command,
        };
        assert_eq!(task.map_key(), "3|file:///work/app|watch|0");
        assert!(task.key().unwrap().contains("contributed"));
        assert!(task.matches(
            &TaskIdentifier::Definition(json!({ "type": "npm", "script": "watch" })),
            false
        ));
    }

    #[test]
    fn test_matches_label_and_id() {
        let mut task = Task::shell("Build App", "make");
        task.id = "shell-build".into();
        assert!(task.matches(&TaskIdentifier::Name("Build App".into()), false));
        assert!(!task.matches(&TaskIdentifier::Name("shell-build".into()), false));
        assert!(task.matches(&TaskIdentifier::Name("shell-build".into()), true));
    }

    #[test]
    fn test_presentation_defaults() {
        let p = PresentationOptions::default();
        assert!(p.echo);
        assert_eq!(p.reveal, RevealKind::Always);
        assert_eq!(p.panel, PanelKind::Shared);
        assert!(p.show_reuse_message);
        let r = RunOptions::default();
        assert_eq!(r.instance_limit, 1);
        assert!(r.reevaluate_on_rerun);
    }

    #[test]
    fn test_user_task_key_suffix() {
        let mut task = Task::shell("fmt", "cargo fmt");
        task.source.kind = TaskSourceKind::User;
        let key = task.key().unwrap();
        assert!(key.contains(USER_TASKS_GROUP_KEY));
        assert!(key.contains("fmtuser"));
    }
}
