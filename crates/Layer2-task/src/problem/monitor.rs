//! Task problem monitor
//!
//! Aggregates what the problem collector of each task terminal reported, so
//! callers can ask "which problems does terminal N currently show".

use super::collector::{ProblemCollector, ProblemCollectorEvent};
use super::matcher::{Marker, MarkerSeverity};
use crate::terminal::{Terminal, TerminalEvent, TerminalId};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Problems of one owner (matcher) in one terminal
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnerProblems {
    pub resources: Vec<String>,
    pub markers: Vec<Marker>,
}

#[derive(Debug, Default)]
struct TerminalProblems {
    resources: BTreeMap<String, String>,
    /// owner -> resource -> marker
    markers: BTreeMap<String, BTreeMap<String, Marker>>,
}

impl TerminalProblems {
    fn clear(&mut self) {
        self.resources.clear();
        self.markers.clear();
    }
}

#[derive(Clone, Default)]
pub struct TaskProblemMonitor {
    terminals: Arc<RwLock<HashMap<TerminalId, TerminalProblems>>>,
    /// One watcher per terminal; a reused terminal replaces its watcher
    watchers: Arc<Mutex<HashMap<TerminalId, JoinHandle<()>>>>,
}

impl TaskProblemMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `terminal` for a new run and follow `collector` until the
    /// terminal disposes or runs its next task.
    ///
    /// Must be called inside a tokio runtime.
    pub fn add_terminal(&self, terminal: &Arc<dyn Terminal>, collector: &dyn ProblemCollector) {
        let id = terminal.instance_id();
        if let Some(previous) = self.watchers.lock().remove(&id) {
            previous.abort();
        }
        self.terminals.write().insert(id, TerminalProblems::default());

        let mut problems = collector.subscribe();
        let mut terminal_events = terminal.subscribe();
        let monitor = self.clone();
        let watcher = tokio::spawn(async move {
            let mut collector_open = true;
            loop {
                tokio::select! {
                    event = problems.recv(), if collector_open => match event {
                        Ok(event) => monitor.handle_event(id, &event),
                        Err(RecvError::Lagged(n)) => debug!("Problem monitor for terminal {} lagged by {}", id, n),
                        Err(RecvError::Closed) => collector_open = false,
                    },
                    event = terminal_events.recv() => match event {
                        Ok(TerminalEvent::Disposed) | Err(RecvError::Closed) => {
                            monitor.forget(id);
                            break;
                        }
                        _ => {}
                    },
                }
            }
        });
        self.watchers.lock().insert(id, watcher);
    }

    pub fn handle_event(&self, id: TerminalId, event: &ProblemCollectorEvent) {
        let mut terminals = self.terminals.write();
        let Some(record) = terminals.get_mut(&id) else {
            return;
        };
        match event {
            ProblemCollectorEvent::FoundErrors(markers) => {
                record.clear();
                for marker in markers.iter().filter(|m| m.severity == MarkerSeverity::Error) {
                    record
                        .resources
                        .insert(marker.resource.clone(), marker.resource.clone());
                    record
                        .markers
                        .entry(marker.owner.clone())
                        .or_default()
                        .insert(marker.resource.clone(), marker.clone());
                }
                trace!("Terminal {} now reports {} resources with errors", id, record.resources.len());
            }
            ProblemCollectorEvent::InvalidateLastMarker => record.clear(),
            _ => {}
        }
    }

    pub fn remove_terminal(&self, id: TerminalId) {
        if let Some(watcher) = self.forget(id) {
            watcher.abort();
        }
    }

    fn forget(&self, id: TerminalId) -> Option<JoinHandle<()>> {
        self.terminals.write().remove(&id);
        self.watchers.lock().remove(&id)
    }

    /// Terminals with a live watcher
    pub fn watched_terminals(&self) -> usize {
        self.watchers.lock().values().filter(|w| !w.is_finished()).count()
    }

    /// `None` for unknown terminals, an empty map for known and clean ones
    pub fn get_task_problems(&self, id: TerminalId) -> Option<BTreeMap<String, OwnerProblems>> {
        let terminals = self.terminals.read();
        let record = terminals.get(&id)?;
        Some(
            record
                .markers
                .iter()
                .map(|(owner, by_resource)| {
                    let problems = OwnerProblems {
                        resources: by_resource.keys().cloned().collect(),
                        markers: by_resource.values().cloned().collect(),
                    };
                    (owner.clone(), problems)
                })
                .collect(),
        )
    }
}
