//! Problem matchers
//!
//! A matcher turns single output lines into [`Marker`]s through a regex with
//! numbered capture groups. Matchers with a `background` section also carry
//! the begin/end patterns that delimit one pass of a watching task.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use termtask_foundation::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerSeverity {
    Hint,
    Info,
    Warning,
    Error,
}

impl MarkerSeverity {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "error" | "fatal" => Some(Self::Error),
            "warning" | "warn" => Some(Self::Warning),
            "info" | "information" | "note" => Some(Self::Info),
            "hint" => Some(Self::Hint),
            _ => None,
        }
    }
}

/// One problem reported against a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Marker {
    pub owner: String,
    pub resource: String,
    pub severity: MarkerSeverity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FileLocation {
    Absolute,
    #[default]
    Relative,
    AutoDetect,
}

fn default_file_group() -> usize {
    1
}

/// Capture group indices are 1-based; 0 is the whole match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemPattern {
    pub regexp: String,
    #[serde(default = "default_file_group")]
    pub file: usize,
    #[serde(default)]
    pub line: Option<usize>,
    #[serde(default)]
    pub column: Option<usize>,
    #[serde(default)]
    pub end_line: Option<usize>,
    #[serde(default)]
    pub end_column: Option<usize>,
    #[serde(default)]
    pub severity: Option<usize>,
    #[serde(default)]
    pub code: Option<usize>,
    #[serde(default)]
    pub message: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundMatcher {
    #[serde(default)]
    pub active_on_start: bool,
    pub begins_pattern: String,
    pub ends_pattern: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemMatcher {
    pub owner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Used when the pattern has no severity group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<MarkerSeverity>,
    #[serde(default)]
    pub file_location: FileLocation,
    /// Base directory for relative file names; may contain `${...}` variables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_prefix: Option<String>,
    pub pattern: ProblemPattern,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<BackgroundMatcher>,
}

impl ProblemMatcher {
    pub fn is_watching(&self) -> bool {
        self.background.is_some()
    }
}

// ============================================================================
// Compiled matcher
// ============================================================================

#[derive(Debug, Clone)]
pub struct CompiledMatcher {
    matcher: ProblemMatcher,
    regex: Regex,
    begins: Option<Regex>,
    ends: Option<Regex>,
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::Regex(format!("{}: {}", pattern, e)))
}

impl CompiledMatcher {
    pub fn compile(matcher: ProblemMatcher) -> Result<Self> {
        let regex = compile(&matcher.pattern.regexp)?;
        let (begins, ends) = match &matcher.background {
            Some(bg) => (Some(compile(&bg.begins_pattern)?), Some(compile(&bg.ends_pattern)?)),
            None => (None, None),
        };
        Ok(Self {
            matcher,
            regex,
            begins,
            ends,
        })
    }

    pub fn matcher(&self) -> &ProblemMatcher {
        &self.matcher
    }

    pub fn owner(&self) -> &str {
        &self.matcher.owner
    }

    pub fn begins(&self) -> Option<&Regex> {
        self.begins.as_ref()
    }

    pub fn ends(&self) -> Option<&Regex> {
        self.ends.as_ref()
    }

    pub fn active_on_start(&self) -> bool {
        self.matcher
            .background
            .as_ref()
            .map(|bg| bg.active_on_start)
            .unwrap_or(false)
    }

    pub fn match_line(&self, line: &str) -> Option<Marker> {
        let caps = self.regex.captures(line)?;
        let pattern = &self.matcher.pattern;
        let group = |idx: Option<usize>| {
            idx.and_then(|i| caps.get(i))
                .map(|m| m.as_str())
                .filter(|s| !s.is_empty())
        };
        let number = |idx: Option<usize>| group(idx).and_then(|s| s.parse::<u32>().ok());

        let file = group(Some(pattern.file))?;
        let severity = group(pattern.severity)
            .and_then(MarkerSeverity::parse)
            .or(self.matcher.severity)
            .unwrap_or(MarkerSeverity::Error);
        let message = caps
            .get(pattern.message)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();
        let start_line = number(pattern.line).unwrap_or(1);
        let start_column = number(pattern.column).unwrap_or(1);

        Some(Marker {
            owner: self.matcher.owner.clone(),
            resource: self.resource(file),
            severity,
            message,
            code: group(pattern.code).map(str::to_string),
            source: self.matcher.source.clone(),
            start_line,
            start_column,
            end_line: number(pattern.end_line).unwrap_or(start_line),
            end_column: number(pattern.end_column).unwrap_or(start_column),
        })
    }

    fn resource(&self, file: &str) -> String {
        let file = file.trim();
        let path = Path::new(file);
        let resolved = match (self.matcher.file_location, &self.matcher.file_prefix) {
            (FileLocation::Absolute, _) => path.to_path_buf(),
            (_, Some(prefix)) if !path.is_absolute() => Path::new(prefix).join(path),
            _ => path.to_path_buf(),
        };
        format!("file://{}", resolved.display())
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Named matchers, referenced from tasks as `$name`
#[derive(Debug, Clone, Default)]
pub struct ProblemMatcherRegistry {
    matchers: HashMap<String, ProblemMatcher>,
}

impl ProblemMatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for (name, matcher) in builtin_matchers() {
            registry.register(name, matcher);
        }
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, matcher: ProblemMatcher) {
        self.matchers.insert(name.into(), matcher);
    }

    pub fn get(&self, name: &str) -> Option<&ProblemMatcher> {
        self.matchers.get(name.strip_prefix('$').unwrap_or(name))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.matchers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

fn builtin_matchers() -> Vec<(&'static str, ProblemMatcher)> {
    let tsc_pattern = ProblemPattern {
        regexp: r"^([^\s].*)[\(:](\d+)[,:](\d+)(?:\):\s+|\s+-\s+)(error|warning|info)\s+TS(\d+)\s*:\s*(.*)$".to_string(),
        file: 1,
        line: Some(2),
        column: Some(3),
        end_line: None,
        end_column: None,
        severity: Some(4),
        code: Some(5),
        message: 6,
    };
    let tsc = ProblemMatcher {
        owner: "typescript".to_string(),
        source: Some("ts".to_string()),
        severity: None,
        file_location: FileLocation::Relative,
        file_prefix: Some("${workspaceFolder}".to_string()),
        pattern: tsc_pattern.clone(),
        background: None,
    };
    let tsc_watch = ProblemMatcher {
        background: Some(BackgroundMatcher {
            active_on_start: true,
            begins_pattern: r"(Starting compilation in watch mode|File change detected\. Starting incremental compilation)\.\.\.".to_string(),
            ends_pattern: r"Found \d+ errors?\. Watching for file changes\.".to_string(),
        }),
        ..tsc.clone()
    };
    let gcc = ProblemMatcher {
        owner: "cpp".to_string(),
        source: Some("gcc".to_string()),
        severity: None,
        file_location: FileLocation::AutoDetect,
        file_prefix: Some("${workspaceFolder}".to_string()),
        pattern: ProblemPattern {
            regexp: r"^(.*?):(\d+):(\d*):?\s+(?:fatal\s+)?(warning|error):\s+(.*)$".to_string(),
            file: 1,
            line: Some(2),
            column: Some(3),
            end_line: None,
            end_column: None,
            severity: Some(4),
            code: None,
            message: 5,
        },
        background: None,
    };
    let eslint = ProblemMatcher {
        owner: "eslint".to_string(),
        source: Some("eslint".to_string()),
        severity: None,
        file_location: FileLocation::Relative,
        file_prefix: Some("${workspaceFolder}".to_string()),
        pattern: ProblemPattern {
            regexp: r"^(.+):\sline\s(\d+),\scol\s(\d+),\s(Error|Warning|Info)\s-\s(.+)\s\((.+)\)$".to_string(),
            file: 1,
            line: Some(2),
            column: Some(3),
            end_line: None,
            end_column: None,
            severity: Some(4),
            code: Some(6),
            message: 5,
        },
        background: None,
    };
    vec![
        ("tsc", tsc),
        ("tsc-watch", tsc_watch),
        ("gcc", gcc),
        ("eslint-compact", eslint),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gcc() -> CompiledMatcher {
        let registry = ProblemMatcherRegistry::with_builtins();
        let mut matcher = registry.get("$gcc").cloned().unwrap();
        matcher.file_prefix = Some("/src".to_string());
        CompiledMatcher::compile(matcher).unwrap()
    }

    #[test]
    fn test_gcc_error_line() {
        let marker = gcc().match_line("main.c:12:5: error: expected ';' before '}' token").unwrap();
        assert_eq!(marker.owner, "cpp");
        assert_eq!(marker.resource, "file:///src/main.c");
        assert_eq!(marker.severity, MarkerSeverity::Error);
        assert_eq!(marker.start_line, 12);
        assert_eq!(marker.start_column, 5);
        assert_eq!(marker.message, "expected ';' before '}' token");
    }

    #[test]
    fn test_gcc_absolute_path_and_warning() {
        let marker = gcc().match_line("/abs/util.c:3:1: warning: unused variable 'x'").unwrap();
        assert_eq!(marker.resource, "file:///abs/util.c");
        assert_eq!(marker.severity, MarkerSeverity::Warning);
    }

    #[test]
    fn test_non_matching_line() {
        assert!(gcc().match_line("make: Nothing to be done for 'all'.").is_none());
    }

    #[test]
    fn test_tsc_watch_patterns() {
        let registry = ProblemMatcherRegistry::with_builtins();
        let compiled = CompiledMatcher::compile(registry.get("tsc-watch").cloned().unwrap()).unwrap();
        assert!(compiled.active_on_start());
        assert!(compiled
            .begins()
            .unwrap()
            .is_match("[10:00:00 AM] File change detected. Starting incremental compilation..."));
        assert!(compiled
            .ends()
            .unwrap()
            .is_match("[10:00:01 AM] Found 0 errors. Watching for file changes."));

        let marker = compiled
            .match_line("src/app.ts(4,10): error TS2304: Cannot find name 'foo'.")
            .unwrap();
        assert_eq!(marker.code.as_deref(), Some("2304"));
        assert_eq!(marker.start_line, 4);
    }

    #[test]
    fn test_invalid_regex() {
        let mut matcher = ProblemMatcherRegistry::with_builtins().get("gcc").cloned().unwrap();
        matcher.pattern.regexp = "(".to_string();
        assert!(matches!(CompiledMatcher::compile(matcher), Err(Error::Regex(_))));
    }

    #[test]
    fn test_severity_parse() {
        assert_eq!(MarkerSeverity::parse("Error"), Some(MarkerSeverity::Error));
        assert_eq!(MarkerSeverity::parse("note"), Some(MarkerSeverity::Info));
        assert_eq!(MarkerSeverity::parse("bogus"), None);
    }
}
