//! Terminal abstraction
//!
//! The engine never talks to a process directly: it asks a
//! [`TerminalService`] for a [`Terminal`], launches the task's shell in it and
//! consumes [`TerminalEvent`]s. `pty` provides the real backend.

pub mod pty;
pub mod shell_integration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use termtask_foundation::{Platform, Result};
use tokio::sync::broadcast;

pub use pty::{PtyTerminal, PtyTerminalService};

pub type TerminalId = u32;

/// Owner id stored in reconnection properties of task terminals
pub const TASK_TERMINAL_TYPE: &str = "Task";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalEvent {
    /// One line of process output, escape sequences removed
    Line(String),
    /// Process exited; `None` when killed or the code is unknown
    Exit(Option<i32>),
    Disposed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    Unknown,
    Shutdown,
    Process,
    User,
    Extension,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellArgs {
    List(Vec<String>),
    /// Single pre-joined argument string (Windows shells)
    Line(String),
}

impl Default for ShellArgs {
    fn default() -> Self {
        ShellArgs::List(Vec::new())
    }
}

impl ShellArgs {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            ShellArgs::List(args) => args.clone(),
            ShellArgs::Line(line) => vec![line.clone()],
        }
    }

    pub fn display(&self) -> String {
        match self {
            ShellArgs::List(args) => args.join(" "),
            ShellArgs::Line(line) => line.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectionData {
    /// Common task id of the task that last ran in the terminal
    pub last_task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub label: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell_integration_nonce: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectionProperties {
    pub owner_id: String,
    pub data: ReconnectionData,
}

/// What the terminal does once its process exits
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum WaitOnExit {
    /// Close the terminal
    #[default]
    Close,
    /// Keep it open
    Wait,
    /// Keep it open and print `message` after the exit code sequence
    Message(String),
}

impl WaitOnExit {
    pub fn render(&self, exit_code: i32) -> Option<String> {
        match self {
            WaitOnExit::Message(message) => Some(shell_integration::wait_on_exit_text(message, exit_code)),
            _ => None,
        }
    }

    pub fn keeps_open(&self) -> bool {
        !matches!(self, WaitOnExit::Close)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellLaunchConfig {
    pub name: String,
    /// `Task` for terminals owned by the task system
    pub terminal_type: Option<String>,
    pub executable: Option<String>,
    pub args: ShellArgs,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    /// Written to the terminal before the process output
    pub initial_text: Option<String>,
    pub wait_on_exit: WaitOnExit,
    pub shell_integration_nonce: Option<String>,
    pub reconnection_properties: Option<ReconnectionProperties>,
    pub is_feature_terminal: bool,
    /// Output is produced by a provider instead of a process
    pub custom_execution: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CreateTerminalRequest {
    pub config: ShellLaunchConfig,
    /// Split next to this terminal
    pub parent: Option<TerminalId>,
}

/// Default shell for a platform
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellProfile {
    pub path: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

#[async_trait]
pub trait Terminal: Send + Sync {
    fn instance_id(&self) -> TerminalId;

    fn process_id(&self) -> Option<u32>;

    /// Event stream of this terminal.
    ///
    /// The first call after creation observes every event since the terminal
    /// was created; later calls only see events sent after subscribing.
    fn subscribe(&self) -> broadcast::Receiver<TerminalEvent>;

    /// Resolves once the process is running
    async fn process_ready(&self) -> Result<()>;

    /// Launch a new process in this (idle) terminal
    async fn reuse_terminal(&self, config: ShellLaunchConfig) -> Result<()>;

    /// Report the exit of a custom execution running without a process
    fn complete_custom_execution(&self, exit_code: i32) -> Result<()>;

    fn clear_buffer(&self);

    /// Scrollback, oldest line first
    fn buffer_lines(&self) -> Vec<String>;

    fn shell_launch_config(&self) -> ShellLaunchConfig;

    fn set_reconnection_properties(&self, properties: Option<ReconnectionProperties>);

    fn set_wait_on_exit(&self, wait_on_exit: WaitOnExit);

    fn exit_reason(&self) -> Option<ExitReason>;

    fn is_disposed(&self) -> bool;

    /// Kill the process (if any) and release the terminal
    fn dispose(&self);
}

/// What the user should be shown for a task terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealTarget {
    /// The problems view
    Problems,
    Terminal { focus: bool },
}

#[async_trait]
pub trait TerminalService: Send + Sync {
    async fn create_terminal(&self, request: CreateTerminalRequest) -> Result<Arc<dyn Terminal>>;

    /// Live terminals, including ones restored from a previous session
    fn instances(&self) -> Vec<Arc<dyn Terminal>>;

    fn default_profile(&self, platform: Platform) -> ShellProfile {
        ShellProfile {
            path: platform.default_shell(),
            ..Default::default()
        }
    }

    /// Bring `target` forward for `terminal`; headless services ignore it
    fn reveal(&self, _terminal: &Arc<dyn Terminal>, _target: RevealTarget) {}
}
