//! Task lifecycle events
//!
//! Every execution publishes a sequence of [`TaskEvent`]s on the engine's
//! broadcast channel:
//!
//! ```text
//! Start -> [ProblemMatcherStarted] -> (Active <-> Inactive)*
//!       -> ProblemMatcherFoundErrors | ProblemMatcherEnded
//!       -> ProcessStarted -> ProcessEnded -> End
//! ```
//!
//! `Changed` fires whenever the active task table changes.

use crate::task::Task;
use crate::terminal::{ExitReason, TerminalId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskEventKind {
    Changed,
    Start,
    ProcessStarted,
    Active,
    Inactive,
    ProblemMatcherStarted,
    ProblemMatcherEnded,
    ProblemMatcherFoundErrors,
    AcquiredInput,
    DependsOnStarted,
    ProcessEnded,
    Terminated,
    End,
}

impl TaskEventKind {
    /// Kinds that are recorded as the state of an active execution
    pub fn is_state(&self) -> bool {
        !matches!(
            self,
            TaskEventKind::Changed | TaskEventKind::ProblemMatcherStarted | TaskEventKind::ProblemMatcherEnded
        )
    }
}

/// How the task runs in its terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskRunType {
    SingleRun,
    Background,
}

impl TaskRunType {
    pub fn of(task: &Task) -> Self {
        if task.is_background() {
            TaskRunType::Background
        } else {
            TaskRunType::SingleRun
        }
    }
}

#[derive(Debug, Clone)]
pub enum TaskEvent {
    Changed,
    Start {
        task: Arc<Task>,
        terminal_id: TerminalId,
        resolved_variables: BTreeMap<String, String>,
    },
    ProcessStarted {
        task: Arc<Task>,
        terminal_id: TerminalId,
        process_id: Option<u32>,
    },
    Active {
        task: Arc<Task>,
        terminal_id: TerminalId,
    },
    Inactive {
        task: Arc<Task>,
        terminal_id: TerminalId,
        duration: Option<Duration>,
    },
    ProblemMatcherStarted {
        task: Arc<Task>,
        terminal_id: TerminalId,
    },
    ProblemMatcherEnded {
        task: Arc<Task>,
        terminal_id: TerminalId,
        has_errors: bool,
    },
    ProblemMatcherFoundErrors {
        task: Arc<Task>,
        terminal_id: TerminalId,
    },
    AcquiredInput {
        task: Arc<Task>,
    },
    DependsOnStarted {
        task: Arc<Task>,
    },
    ProcessEnded {
        task: Arc<Task>,
        terminal_id: TerminalId,
        exit_code: Option<i32>,
        duration: Option<Duration>,
    },
    Terminated {
        task: Arc<Task>,
        terminal_id: TerminalId,
        exit_reason: Option<ExitReason>,
    },
    End {
        task: Arc<Task>,
    },
}

impl TaskEvent {
    pub fn kind(&self) -> TaskEventKind {
        match self {
            TaskEvent::Changed => TaskEventKind::Changed,
            TaskEvent::Start { .. } => TaskEventKind::Start,
            TaskEvent::ProcessStarted { .. } => TaskEventKind::ProcessStarted,
            TaskEvent::Active { .. } => TaskEventKind::Active,
            TaskEvent::Inactive { .. } => TaskEventKind::Inactive,
            TaskEvent::ProblemMatcherStarted { .. } => TaskEventKind::ProblemMatcherStarted,
            TaskEvent::ProblemMatcherEnded { .. } => TaskEventKind::ProblemMatcherEnded,
            TaskEvent::ProblemMatcherFoundErrors { .. } => TaskEventKind::ProblemMatcherFoundErrors,
            TaskEvent::AcquiredInput { .. } => TaskEventKind::AcquiredInput,
            TaskEvent::DependsOnStarted { .. } => TaskEventKind::DependsOnStarted,
            TaskEvent::ProcessEnded { .. } => TaskEventKind::ProcessEnded,
            TaskEvent::Terminated { .. } => TaskEventKind::Terminated,
            TaskEvent::End { .. } => TaskEventKind::End,
        }
    }

    pub fn task(&self) -> Option<&Arc<Task>> {
        match self {
            TaskEvent::Changed => None,
            TaskEvent::Start { task, .. }
            | TaskEvent::ProcessStarted { task, .. }
            | TaskEvent::Active { task, .. }
            | TaskEvent::Inactive { task, .. }
            | TaskEvent::ProblemMatcherStarted { task, .. }
            | TaskEvent::ProblemMatcherEnded { task, .. }
            | TaskEvent::ProblemMatcherFoundErrors { task, .. }
            | TaskEvent::AcquiredInput { task }
            | TaskEvent::DependsOnStarted { task }
            | TaskEvent::ProcessEnded { task, .. }
            | TaskEvent::Terminated { task, .. }
            | TaskEvent::End { task } => Some(task),
        }
    }

    pub fn terminal_id(&self) -> Option<TerminalId> {
        match self {
            TaskEvent::Start { terminal_id, .. }
            | TaskEvent::ProcessStarted { terminal_id, .. }
            | TaskEvent::Active { terminal_id, .. }
            | TaskEvent::Inactive { terminal_id, .. }
            | TaskEvent::ProblemMatcherStarted { terminal_id, .. }
            | TaskEvent::ProblemMatcherEnded { terminal_id, .. }
            | TaskEvent::ProblemMatcherFoundErrors { terminal_id, .. }
            | TaskEvent::ProcessEnded { terminal_id, .. }
            | TaskEvent::Terminated { terminal_id, .. } => Some(*terminal_id),
            _ => None,
        }
    }

    /// `map_key` of the task the event is about
    pub fn task_key(&self) -> Option<String> {
        self.task().map(|t| t.map_key())
    }
}
