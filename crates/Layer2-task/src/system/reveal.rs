//! When to bring a task's terminal or the problems view forward

use super::TerminalTaskSystem;
use crate::problem::{MarkerSeverity, ProblemCollector};
use crate::task::{PresentationOptions, RevealKind, RevealProblemKind, Task};
use crate::terminal::{RevealTarget, Terminal};
use std::sync::Arc;
use tracing::trace;

/// Matcher state of a run once its process exited
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct ExitOutcome {
    /// `None` when killed or unknown, which counts as a failure
    pub exit_code: Option<i32>,
    pub matches: usize,
    pub found_errors: bool,
}

impl ExitOutcome {
    pub(super) fn of(exit_code: Option<i32>, collector: &dyn ProblemCollector) -> Self {
        Self {
            exit_code,
            matches: collector.number_of_matches(),
            found_errors: found_errors(collector),
        }
    }

    fn failed(&self) -> bool {
        self.exit_code != Some(0) || self.found_errors
    }
}

/// At least one match, the worst of them an error
pub(super) fn found_errors(collector: &dyn ProblemCollector) -> bool {
    collector.number_of_matches() > 0
        && collector
            .max_marker_severity()
            .is_some_and(|severity| severity >= MarkerSeverity::Error)
}

pub(super) fn on_start(presentation: &PresentationOptions) -> Option<RevealTarget> {
    if presentation.reveal_problems == RevealProblemKind::Always {
        Some(RevealTarget::Problems)
    } else if presentation.focus || presentation.reveal == RevealKind::Always {
        Some(RevealTarget::Terminal {
            focus: presentation.focus,
        })
    } else {
        None
    }
}

/// A background task went idle with errors
pub(super) fn on_errors(presentation: &PresentationOptions) -> Option<RevealTarget> {
    if presentation.reveal_problems == RevealProblemKind::OnProblem {
        Some(RevealTarget::Problems)
    } else if presentation.reveal == RevealKind::Silent {
        Some(RevealTarget::Terminal { focus: false })
    } else {
        None
    }
}

pub(super) fn on_exit(presentation: &PresentationOptions, background: bool, outcome: ExitOutcome) -> Option<RevealTarget> {
    if !background && presentation.reveal_problems == RevealProblemKind::OnProblem && outcome.matches > 0 {
        Some(RevealTarget::Problems)
    } else if presentation.reveal == RevealKind::Silent && outcome.failed() {
        Some(RevealTarget::Terminal { focus: false })
    } else {
        None
    }
}

impl TerminalTaskSystem {
    pub(super) fn reveal(&self, task: &Task, terminal: &Arc<dyn Terminal>, target: Option<RevealTarget>) {
        if let Some(target) = target {
            trace!(?target, "Revealing {}", task.label);
            self.terminal_service.reveal(terminal, target);
        }
    }
}
