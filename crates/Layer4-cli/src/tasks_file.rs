//! Tasks file - the task definitions of a workspace
//!
//! Looked up in the project settings directory:
//! ```text
//! project/
//! └── .termtask/
//!     ├── tasks.json   # or tasks.toml
//!     └── engine.json  # engine tunables (optional)
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use termtask_engine::{
    CommandOptions, CommandString, DependsOrder, PresentationOptions, ProblemMatcherRef, RunOptions, Task,
    TaskDependency, TaskIdentifier, WorkspaceFolder,
};
use termtask_foundation::PROJECT_DIR;

const TASKS_FILES: [&str; 2] = ["tasks.json", "tasks.toml"];

/// A single value or a list of them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TasksFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

/// One entry of the tasks file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskConfig {
    pub label: String,
    /// `shell` (default) or `process`
    #[serde(rename = "type")]
    pub task_type: Option<String>,
    pub command: Option<String>,
    pub args: Vec<CommandString>,
    pub options: Option<CommandOptions>,
    pub depends_on: OneOrMany<String>,
    pub depends_order: DependsOrder,
    pub is_background: bool,
    pub problem_matcher: OneOrMany<ProblemMatcherRef>,
    pub presentation: Option<PresentationOptions>,
    pub run_options: Option<RunOptions>,
    /// `build`, `test`, ...
    pub group: Option<String>,
    pub prompt_on_close: bool,
}

impl TaskConfig {
    pub fn into_task(self, folder: &WorkspaceFolder) -> Result<Task> {
        if self.label.is_empty() {
            bail!("A task in the tasks file has no label");
        }
        let depends_on: Vec<TaskDependency> = self
            .depends_on
            .into_vec()
            .into_iter()
            .map(|name| TaskDependency {
                uri: Some(folder.uri.clone()),
                task: TaskIdentifier::Name(name),
            })
            .collect();

        let mut task = match (self.command, self.task_type.as_deref()) {
            (None, _) => Task::composite(self.label.clone(), Vec::new()),
            (Some(command), Some("process")) => Task::process(self.label.clone(), command, self.args),
            (Some(command), None | Some("shell")) => {
                let mut task = Task::shell(self.label.clone(), command);
                if let Some(configuration) = task.command_mut() {
                    configuration.args = self.args;
                }
                task
            }
            (Some(_), Some(other)) => bail!("Task {} has unknown type '{}'", self.label, other),
        };

        task = task
            .with_folder(folder.clone())
            .with_depends_on(depends_on, self.depends_order)
            .with_background(self.is_background);
        for matcher in self.problem_matcher.into_vec() {
            task = task.with_problem_matcher(matcher);
        }
        if let Some(options) = self.options {
            task = task.with_options(options);
        }
        if let Some(presentation) = self.presentation {
            task = task.with_presentation(|p| *p = presentation);
        }
        if let Some(run_options) = self.run_options {
            task.run_options = run_options;
        }
        task.source.label = "Workspace".to_string();
        task.properties.group = self.group;
        task.properties.prompt_on_close = self.prompt_on_close;
        Ok(task)
    }
}

impl TasksFile {
    /// Parse a `.json` or `.toml` tasks file
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("Failed to read tasks file {}", path.display()))?;
        let file = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&content).with_context(|| format!("Invalid TOML in {}", path.display()))?,
            _ => serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))?,
        };
        Ok(file)
    }

    /// First tasks file found in `<root>/.termtask/`
    pub fn find(root: &Path) -> Option<PathBuf> {
        TASKS_FILES
            .iter()
            .map(|name| root.join(PROJECT_DIR).join(name))
            .find(|path| path.is_file())
    }

    pub fn into_tasks(self, folder: &WorkspaceFolder) -> Result<Vec<Task>> {
        self.tasks.into_iter().map(|config| config.into_task(folder)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use termtask_engine::{PanelKind, RuntimeType};

    fn folder() -> WorkspaceFolder {
        WorkspaceFolder::from_path("/work/app")
    }

    #[test]
    fn test_json_tasks() {
        let json = r#"{
            "version": "2.0.0",
            "tasks": [
                { "label": "build", "command": "make", "args": ["all", { "value": "out dir", "quoting": "strong" }],
                  "problemMatcher": "$gcc", "presentation": { "panel": "dedicated" } },
                { "label": "run", "type": "process", "command": "./app", "dependsOn": "build" },
                { "label": "ci", "dependsOn": ["build", "run"], "dependsOrder": "sequence" }
            ]
        }"#;
        let file: TasksFile = serde_json::from_str(json).unwrap();
        let tasks = file.into_tasks(&folder()).unwrap();
        assert_eq!(tasks.len(), 3);

        let build = &tasks[0];
        let command = build.command().unwrap();
        assert_eq!(command.args.len(), 2);
        assert_eq!(command.args[1].value(), "out dir");
        assert_eq!(command.presentation.panel, PanelKind::Dedicated);
        assert_eq!(build.properties.problem_matchers, vec![ProblemMatcherRef::Named("$gcc".into())]);

        assert_eq!(tasks[1].command().unwrap().runtime, Some(RuntimeType::Process));
        assert_eq!(tasks[1].properties.depends_on.len(), 1);

        let ci = &tasks[2];
        assert!(!ci.has_command());
        assert_eq!(ci.properties.depends_order, DependsOrder::Sequence);
        assert_eq!(ci.properties.depends_on[0].uri.as_deref(), Some(folder().uri.as_str()));
    }

    #[test]
    fn test_toml_file_is_found_and_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let settings = dir.path().join(PROJECT_DIR);
        fs::create_dir_all(&settings).unwrap();
        fs::write(
            settings.join("tasks.toml"),
            "[[tasks]]\nlabel = \"watch\"\ncommand = \"tsc -w\"\nisBackground = true\nproblemMatcher = \"$tsc-watch\"\n",
        )
        .unwrap();

        let path = TasksFile::find(dir.path()).unwrap();
        let tasks = TasksFile::load(&path).unwrap().into_tasks(&folder()).unwrap();
        assert!(tasks[0].is_background());
        assert_eq!(tasks[0].label, "watch");
    }

    #[test]
    fn test_rejects_unknown_type() {
        let config = TaskConfig {
            label: "odd".into(),
            task_type: Some("npm".into()),
            command: Some("install".into()),
            ..Default::default()
        };
        assert!(config.into_task(&folder()).is_err());
        assert!(TasksFile::find(Path::new("/nonexistent")).is_none());
    }
}
