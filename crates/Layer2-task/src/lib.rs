//! # termtask-engine
//!
//! Task execution engine: runs configured tasks inside terminals.
//!
//! ## Features
//!
//! - Dependency graphs, parallel or in sequence, with cycle detection
//! - Terminal reuse (shared, dedicated, new panels; grouped splits)
//! - Problem matchers for one-shot and background (watching) tasks
//! - Lifecycle events on a broadcast channel
//! - `${...}` variable resolution and shell-specific command line quoting
//! - PTY-backed terminals with shell integration sequences

pub mod error;
pub mod event;
pub mod output;
pub mod problem;
pub mod resolver;
pub mod shell;
pub mod system;
pub mod task;
pub mod terminal;
pub mod variables;

// Task model
pub use task::{
    CommandConfiguration, CommandOptions, CommandString, ConfigurationProperties, DependsOrder, PanelKind,
    PresentationOptions, ProblemMatcherRef, RevealKind, RevealProblemKind, RunOptions, RuntimeType,
    ShellConfiguration, Task, TaskDependency, TaskIdentifier, TaskKind, TaskScope, TaskSource, TaskSourceKind,
    Workspace, WorkspaceFolder,
};

// Task system
pub use error::{Severity, TaskError, TaskErrorCode, TaskResult};
pub use event::{TaskEvent, TaskEventKind, TaskRunType};
pub use output::{OutputChannel, OutputEntry};
pub use system::{
    wait_on_exit_value, ActiveTaskInfo, ExecutionFuture, RunTrigger, TaskExecuteKind, TaskExecuteResult,
    TaskSummary, TaskSystemBuilder, TerminalTaskSystem, TerminateResult, VerifiedTask,
};

// Collaborators
pub use resolver::{
    ConfigurationResolver, DefaultConfigurationResolver, LocalTaskSystemInfo, ProcessLookup, ResolveSet,
    ResolvedVariables, TaskCatalog, TaskResolver, TaskSystemInfo,
};
pub use variables::VariableResolver;

// Problem matching
pub use problem::{
    Marker, MarkerSeverity, OwnerProblems, ProblemCollector, ProblemMatcher, ProblemMatcherRegistry,
    TaskProblemMonitor,
};

// Shell and terminals
pub use shell::{ShellCommandLineBuilder, ShellQuotingTable, WellKnownCommands};
pub use terminal::{
    PtyTerminal, PtyTerminalService, RevealTarget, ShellLaunchConfig, Terminal, TerminalEvent, TerminalId,
    TerminalService, WaitOnExit,
};
