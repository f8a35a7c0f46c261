//! `${...}` placeholder resolution

use crate::resolver::{ConfigurationResolver, TaskSystemInfo};
use crate::task::WorkspaceFolder;
use futures::future::try_join_all;
use regex::{Captures, Regex};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};
use termtask_foundation::Result;

/// Variable holding the resolved executable of a process task
pub const PROCESS_VARIABLE: &str = "__process__";

pub(crate) fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\$\{(.*?)\}").expect("placeholder pattern is valid"))
}

/// Add every `${...}` occurrence of `value` to `variables`
pub fn collect_variables(variables: &mut BTreeSet<String>, value: &str) {
    for m in placeholder_regex().find_iter(value) {
        variables.insert(m.as_str().to_string());
    }
}

/// `${name}` -> `name`
pub fn variable_name(placeholder: &str) -> &str {
    placeholder
        .strip_prefix("${")
        .and_then(|s| s.strip_suffix('}'))
        .unwrap_or(placeholder)
}

/// Resolves placeholders of one task run.
///
/// Values resolved before the run win; anything else is delegated to the
/// configuration resolver, and without one the placeholder stays literal.
#[derive(Clone)]
pub struct VariableResolver {
    folder: Option<WorkspaceFolder>,
    system_info: Option<Arc<dyn TaskSystemInfo>>,
    values: BTreeMap<String, String>,
    service: Option<Arc<dyn ConfigurationResolver>>,
}

impl VariableResolver {
    pub fn new(
        folder: Option<WorkspaceFolder>,
        system_info: Option<Arc<dyn TaskSystemInfo>>,
        values: BTreeMap<String, String>,
        service: Option<Arc<dyn ConfigurationResolver>>,
    ) -> Self {
        Self {
            folder,
            system_info,
            values,
            service,
        }
    }

    pub fn folder(&self) -> Option<&WorkspaceFolder> {
        self.folder.as_ref()
    }

    pub fn system_info(&self) -> Option<&Arc<dyn TaskSystemInfo>> {
        self.system_info.as_ref()
    }

    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    pub async fn resolve(&self, value: &str) -> Result<String> {
        let placeholders: Vec<&str> = placeholder_regex()
            .find_iter(value)
            .map(|m| m.as_str())
            .collect();
        if placeholders.is_empty() {
            return Ok(value.to_string());
        }

        let resolved = try_join_all(placeholders.into_iter().map(|p| self.replace(p))).await?;

        let mut resolved = resolved.into_iter();
        Ok(placeholder_regex()
            .replace_all(value, |caps: &Captures| {
                resolved.next().unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned())
    }

    async fn replace(&self, placeholder: &str) -> Result<String> {
        if let Some(value) = self.values.get(variable_name(placeholder)) {
            return Ok(value.clone());
        }
        match &self.service {
            Some(service) => service.resolve_async(self.folder.as_ref(), placeholder).await,
            None => Ok(placeholder.to_string()),
        }
    }
}
