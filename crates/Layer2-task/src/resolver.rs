//! Engine collaborators
//!
//! The task system resolves dependencies, variables and executables through
//! these traits. Local default implementations cover the CLI; embedders plug
//! in their own.

use crate::task::{Task, TaskIdentifier, WorkspaceFolder};
use crate::variables::{placeholder_regex, variable_name};
use async_trait::async_trait;
use parking_lot::RwLock;
use regex::Captures;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use termtask_foundation::{find_executable, Platform, Result};
use tracing::debug;

// ============================================================================
// Traits
// ============================================================================

#[async_trait]
pub trait ConfigurationResolver: Send + Sync {
    /// Replace the placeholders of `value`
    async fn resolve_async(&self, folder: Option<&WorkspaceFolder>, value: &str) -> Result<String>;

    /// Resolve a set of `${...}` placeholders, possibly asking the user.
    ///
    /// Keys of the result are variable names without `${}`. `None` means the
    /// user cancelled.
    async fn resolve_with_interaction(
        &self,
        folder: Option<&WorkspaceFolder>,
        variables: &[String],
        section: &str,
    ) -> Result<Option<BTreeMap<String, String>>>;
}

#[async_trait]
pub trait TaskResolver: Send + Sync {
    async fn resolve(&self, uri: Option<&str>, identifier: &TaskIdentifier) -> Option<Task>;
}

/// Executable lookup inputs for a process task on Windows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessLookup {
    pub name: String,
    pub cwd: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveSet {
    /// Placeholders including `${}`
    pub variables: BTreeSet<String>,
    pub process: Option<ProcessLookup>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedVariables {
    /// Variable name (without `${}`) to value
    pub variables: BTreeMap<String, String>,
}

/// Host probe for the machine the tasks run on
#[async_trait]
pub trait TaskSystemInfo: Send + Sync {
    fn platform(&self) -> Platform;

    async fn find_executable(&self, command: &str, cwd: Option<&str>, paths: Option<&[String]>) -> Option<String>;

    async fn resolve_variables(&self, folder: &WorkspaceFolder, set: &ResolveSet) -> Result<Option<ResolvedVariables>>;
}

// ============================================================================
// DefaultConfigurationResolver
// ============================================================================

/// Resolves the built-in variables against the local environment:
/// `workspaceFolder`, `workspaceFolderBasename`, `cwd`, `userHome`,
/// `pathSeparator` and `env:NAME`. Extra variables can be registered.
#[derive(Debug, Clone, Default)]
pub struct DefaultConfigurationResolver {
    platform: Platform,
    extra: BTreeMap<String, String>,
}

impl DefaultConfigurationResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(name.into(), value.into());
        self
    }

    pub fn lookup(&self, folder: Option<&WorkspaceFolder>, name: &str) -> Option<String> {
        if let Some(value) = self.extra.get(name) {
            return Some(value.clone());
        }
        if let Some(var) = name.strip_prefix("env:") {
            return Some(std::env::var(var).unwrap_or_default());
        }
        match name {
            "workspaceFolder" | "workspaceRoot" => folder.map(|f| f.path.display().to_string()),
            "workspaceFolderBasename" => folder.map(|f| f.name.clone()),
            "cwd" => folder
                .map(|f| f.path.clone())
                .or_else(|| std::env::current_dir().ok())
                .map(|p| p.display().to_string()),
            "userHome" => dirs::home_dir().map(|p| p.display().to_string()),
            "pathSeparator" => Some(self.platform.path_separator().to_string()),
            _ => None,
        }
    }
}

#[async_trait]
impl ConfigurationResolver for DefaultConfigurationResolver {
    async fn resolve_async(&self, folder: Option<&WorkspaceFolder>, value: &str) -> Result<String> {
        Ok(placeholder_regex()
            .replace_all(value, |caps: &Captures| {
                self.lookup(folder, &caps[1]).unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned())
    }

    async fn resolve_with_interaction(
        &self,
        folder: Option<&WorkspaceFolder>,
        variables: &[String],
        section: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        debug!("Resolving {} variables for {}", variables.len(), section);
        let mut resolved = BTreeMap::new();
        for variable in variables {
            let value = self.resolve_async(folder, variable).await?;
            resolved.insert(variable_name(variable).to_string(), value);
        }
        Ok(Some(resolved))
    }
}

// ============================================================================
// LocalTaskSystemInfo
// ============================================================================

pub struct LocalTaskSystemInfo {
    platform: Platform,
    resolver: DefaultConfigurationResolver,
}

impl LocalTaskSystemInfo {
    pub fn new() -> Self {
        Self::with_resolver(DefaultConfigurationResolver::new())
    }

    pub fn with_resolver(resolver: DefaultConfigurationResolver) -> Self {
        Self {
            platform: Platform::detect(),
            resolver,
        }
    }
}

impl Default for LocalTaskSystemInfo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskSystemInfo for LocalTaskSystemInfo {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn find_executable(&self, command: &str, cwd: Option<&str>, paths: Option<&[String]>) -> Option<String> {
        find_executable(command, cwd.map(Path::new), paths).map(|p| p.display().to_string())
    }

    async fn resolve_variables(&self, folder: &WorkspaceFolder, set: &ResolveSet) -> Result<Option<ResolvedVariables>> {
        let mut variables = BTreeMap::new();
        for variable in &set.variables {
            let value = self.resolver.resolve_async(Some(folder), variable).await?;
            variables.insert(variable_name(variable).to_string(), value);
        }
        Ok(Some(ResolvedVariables { variables }))
    }
}

// ============================================================================
// TaskCatalog
// ============================================================================

/// In-memory task list that resolves dependencies by label or identifier
#[derive(Default)]
pub struct TaskCatalog {
    tasks: RwLock<Vec<Task>>,
}

impl TaskCatalog {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self {
            tasks: RwLock::new(tasks),
        }
    }

    pub fn add(&self, task: Task) {
        self.tasks.write().push(task);
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.tasks.read().clone()
    }

    pub fn find(&self, label: &str) -> Option<Task> {
        self.find_in(None, &TaskIdentifier::Name(label.to_string()))
    }

    fn find_in(&self, uri: Option<&str>, identifier: &TaskIdentifier) -> Option<Task> {
        self.tasks
            .read()
            .iter()
            .filter(|task| match (uri, task.workspace_folder()) {
                (Some(uri), Some(folder)) => folder.uri == uri,
                _ => true,
            })
            .find(|task| task.matches(identifier, true))
            .cloned()
    }
}

#[async_trait]
impl TaskResolver for TaskCatalog {
    async fn resolve(&self, uri: Option<&str>, identifier: &TaskIdentifier) -> Option<Task> {
        self.find_in(uri, identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder() -> WorkspaceFolder {
        WorkspaceFolder::from_path("/work/app")
    }

    #[tokio::test]
    async fn test_default_resolver_builtins() {
        let resolver = DefaultConfigurationResolver::new()
            .with_platform(Platform::Linux)
            .with_variable("config:target", "release");
        let folder = folder();
        let value = resolver
            .resolve_async(Some(&folder), "${workspaceFolder}${pathSeparator}${config:target}")
            .await
            .unwrap();
        assert_eq!(value, "/work/app/release");
        assert_eq!(
            resolver.resolve_async(None, "${workspaceFolder}").await.unwrap(),
            "${workspaceFolder}"
        );
    }

    #[tokio::test]
    async fn test_resolve_with_interaction_strips_braces() {
        let resolver = DefaultConfigurationResolver::new();
        let folder = folder();
        let resolved = resolver
            .resolve_with_interaction(Some(&folder), &["${workspaceFolderBasename}".to_string()], "tasks")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.get("workspaceFolderBasename").map(String::as_str), Some("app"));
    }

    #[tokio::test]
    async fn test_catalog_resolves_by_label_and_folder() {
        let other = WorkspaceFolder::from_path("/work/other");
        let catalog = TaskCatalog::new(vec![
            Task::shell("build", "make").with_folder(other.clone()),
            Task::shell("build", "cargo build").with_folder(folder()),
        ]);
        let found = catalog
            .resolve(Some("file:///work/app"), &TaskIdentifier::Name("build".into()))
            .await
            .unwrap();
        assert_eq!(found.workspace_folder(), Some(&folder()));
        assert!(catalog.find("missing").is_none());
        assert_eq!(catalog.find("build").unwrap().workspace_folder(), Some(&other));
    }
}
