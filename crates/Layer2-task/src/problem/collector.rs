//! Problem collectors
//!
//! A collector feeds terminal output lines through compiled matchers and
//! publishes [`ProblemCollectorEvent`]s. [`StartStopProblemCollector`] covers a
//! single run to completion; [`WatchingProblemCollector`] tracks the
//! begin/end passes of a background task.

use super::matcher::{CompiledMatcher, Marker, MarkerSeverity};
use parking_lot::Mutex;
use regex::Regex;
use std::sync::Arc;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProblemCollectorEvent {
    BackgroundProcessingBegins,
    BackgroundProcessingEnds,
    /// Every marker currently reported by the collector
    FoundErrors(Vec<Marker>),
    /// Previously delivered markers are stale
    InvalidateLastMarker,
}

pub trait ProblemCollector: Send + Sync {
    fn process_line(&self, line: &str);

    /// Called once before the first line, after subscribers are attached
    fn about_to_start(&self) {}

    /// Publish pending markers now instead of waiting for the end of a pass
    fn force_delivery(&self);

    /// The process finished; flush everything
    fn done(&self);

    fn dispose(&self);

    fn subscribe(&self) -> broadcast::Receiver<ProblemCollectorEvent>;

    /// Matches of the current pass
    fn number_of_matches(&self) -> usize;

    fn max_marker_severity(&self) -> Option<MarkerSeverity>;

    /// Begin patterns of background matchers, used for scrollback replay
    fn begin_patterns(&self) -> Vec<Regex> {
        Vec::new()
    }

    fn is_watching(&self) -> bool {
        false
    }
}

// ============================================================================
// Shared marker bookkeeping
// ============================================================================

#[derive(Debug, Default)]
struct MarkerState {
    markers: Vec<Marker>,
    dirty: bool,
    matches: usize,
    max_severity: Option<MarkerSeverity>,
    disposed: bool,
}

struct CollectorCore {
    matchers: Vec<CompiledMatcher>,
    tx: broadcast::Sender<ProblemCollectorEvent>,
    state: Mutex<MarkerState>,
}

impl CollectorCore {
    fn new(matchers: Vec<CompiledMatcher>) -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            matchers,
            tx,
            state: Mutex::new(MarkerState::default()),
        }
    }

    fn emit(&self, event: ProblemCollectorEvent) {
        if self.state.lock().disposed {
            return;
        }
        let _ = self.tx.send(event);
    }

    fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    /// Run `line` through the problem patterns; first match wins
    fn collect(&self, line: &str) {
        let Some(marker) = self.matchers.iter().find_map(|m| m.match_line(line)) else {
            return;
        };
        let mut state = self.state.lock();
        state.matches += 1;
        state.max_severity = state.max_severity.max(Some(marker.severity));
        state.markers.push(marker);
        state.dirty = true;
    }

    fn deliver(&self) {
        let markers = {
            let mut state = self.state.lock();
            if !state.dirty || state.disposed {
                return;
            }
            state.dirty = false;
            state.markers.clone()
        };
        let _ = self.tx.send(ProblemCollectorEvent::FoundErrors(markers));
    }

    fn reset(&self) {
        let mut state = self.state.lock();
        state.markers.clear();
        state.dirty = false;
        state.matches = 0;
        state.max_severity = None;
    }

    fn dispose(&self) {
        self.state.lock().disposed = true;
    }
}

// ============================================================================
// StartStopProblemCollector
// ============================================================================

/// Collects problems of a single, finite run
pub struct StartStopProblemCollector {
    core: CollectorCore,
    started: Mutex<bool>,
}

impl StartStopProblemCollector {
    pub fn new(matchers: Vec<CompiledMatcher>) -> Arc<Self> {
        Arc::new(Self {
            core: CollectorCore::new(matchers),
            started: Mutex::new(false),
        })
    }

    fn ensure_started(&self) {
        if self.core.matchers.is_empty() {
            return;
        }
        let first = {
            let mut started = self.started.lock();
            !std::mem::replace(&mut *started, true)
        };
        if first {
            self.core.emit(ProblemCollectorEvent::BackgroundProcessingBegins);
        }
    }
}

impl ProblemCollector for StartStopProblemCollector {
    fn process_line(&self, line: &str) {
        if self.core.is_disposed() {
            return;
        }
        self.ensure_started();
        self.core.collect(line);
    }

    fn force_delivery(&self) {
        self.core.deliver();
    }

    fn done(&self) {
        self.core.deliver();
        if *self.started.lock() {
            self.core.emit(ProblemCollectorEvent::BackgroundProcessingEnds);
        }
    }

    fn dispose(&self) {
        self.core.dispose();
    }

    fn subscribe(&self) -> broadcast::Receiver<ProblemCollectorEvent> {
        self.core.tx.subscribe()
    }

    fn number_of_matches(&self) -> usize {
        self.core.state.lock().matches
    }

    fn max_marker_severity(&self) -> Option<MarkerSeverity> {
        self.core.state.lock().max_severity
    }
}

// ============================================================================
// WatchingProblemCollector
// ============================================================================

/// Collects problems of a background task pass by pass
pub struct WatchingProblemCollector {
    core: CollectorCore,
    active: Mutex<bool>,
}

impl WatchingProblemCollector {
    pub fn new(matchers: Vec<CompiledMatcher>) -> Arc<Self> {
        Arc::new(Self {
            core: CollectorCore::new(matchers),
            active: Mutex::new(false),
        })
    }

    fn begin_pass(&self) {
        {
            let mut active = self.active.lock();
            if *active {
                return;
            }
            *active = true;
        }
        self.core.reset();
        self.core.emit(ProblemCollectorEvent::InvalidateLastMarker);
        self.core.emit(ProblemCollectorEvent::BackgroundProcessingBegins);
    }

    fn end_pass(&self) {
        {
            let mut active = self.active.lock();
            if !*active {
                return;
            }
            *active = false;
        }
        self.core.deliver();
        self.core.emit(ProblemCollectorEvent::BackgroundProcessingEnds);
    }
}

impl ProblemCollector for WatchingProblemCollector {
    fn about_to_start(&self) {
        if self.core.matchers.iter().any(CompiledMatcher::active_on_start) {
            self.begin_pass();
        }
    }

    fn process_line(&self, line: &str) {
        if self.core.is_disposed() {
            return;
        }
        if self
            .core
            .matchers
            .iter()
            .any(|m| m.begins().is_some_and(|re| re.is_match(line)))
        {
            self.begin_pass();
            return;
        }
        if self
            .core
            .matchers
            .iter()
            .any(|m| m.ends().is_some_and(|re| re.is_match(line)))
        {
            self.end_pass();
            return;
        }
        self.core.collect(line);
    }

    fn force_delivery(&self) {
        self.core.deliver();
    }

    fn done(&self) {
        self.core.deliver();
    }

    fn dispose(&self) {
        self.core.dispose();
    }

    fn subscribe(&self) -> broadcast::Receiver<ProblemCollectorEvent> {
        self.core.tx.subscribe()
    }

    fn number_of_matches(&self) -> usize {
        self.core.state.lock().matches
    }

    fn max_marker_severity(&self) -> Option<MarkerSeverity> {
        self.core.state.lock().max_severity
    }

    fn begin_patterns(&self) -> Vec<Regex> {
        self.core
            .matchers
            .iter()
            .filter_map(|m| m.begins().cloned())
            .collect()
    }

    fn is_watching(&self) -> bool {
        self.core.matchers.iter().any(|m| m.matcher().is_watching())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::matcher::ProblemMatcherRegistry;

    fn matcher(name: &str) -> CompiledMatcher {
        let mut m = ProblemMatcherRegistry::with_builtins().get(name).cloned().unwrap();
        m.file_prefix = Some("/ws".to_string());
        CompiledMatcher::compile(m).unwrap()
    }

    fn drain(rx: &mut broadcast::Receiver<ProblemCollectorEvent>) -> Vec<ProblemCollectorEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    #[test]
    fn test_start_stop_lifecycle() {
        let collector = StartStopProblemCollector::new(vec![matcher("gcc")]);
        let mut rx = collector.subscribe();

        collector.process_line("gcc -c main.c");
        collector.process_line("main.c:1:2: error: boom");
        collector.process_line("main.c:3:4: warning: careful");
        assert_eq!(collector.number_of_matches(), 2);
        assert_eq!(collector.max_marker_severity(), Some(MarkerSeverity::Error));

        collector.done();
        let events = drain(&mut rx);
        assert_eq!(events.first(), Some(&ProblemCollectorEvent::BackgroundProcessingBegins));
        assert!(matches!(&events[1], ProblemCollectorEvent::FoundErrors(m) if m.len() == 2));
        assert_eq!(events.last(), Some(&ProblemCollectorEvent::BackgroundProcessingEnds));
    }

    #[test]
    fn test_start_stop_without_matchers_is_silent() {
        let collector = StartStopProblemCollector::new(Vec::new());
        let mut rx = collector.subscribe();
        collector.process_line("anything");
        collector.done();
        assert!(drain(&mut rx).is_empty());
        assert_eq!(collector.max_marker_severity(), None);
    }

    #[test]
    fn test_force_delivery_only_when_dirty() {
        let collector = StartStopProblemCollector::new(vec![matcher("gcc")]);
        let mut rx = collector.subscribe();
        collector.process_line("a.c:1:1: error: x");
        collector.force_delivery();
        collector.force_delivery();
        let found = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, ProblemCollectorEvent::FoundErrors(_)))
            .count();
        assert_eq!(found, 1);
    }

    #[test]
    fn test_watching_passes() {
        let collector = WatchingProblemCollector::new(vec![matcher("tsc-watch")]);
        assert!(collector.is_watching());
        assert_eq!(collector.begin_patterns().len(), 1);
        let mut rx = collector.subscribe();

        collector.about_to_start();
        collector.process_line("src/a.ts(1,1): error TS1000: bad");
        collector.process_line("Found 1 error. Watching for file changes.");
        assert_eq!(collector.max_marker_severity(), Some(MarkerSeverity::Error));

        collector.process_line("File change detected. Starting incremental compilation...");
        assert_eq!(collector.number_of_matches(), 0);
        collector.process_line("Found 0 errors. Watching for file changes.");

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                ProblemCollectorEvent::InvalidateLastMarker,
                ProblemCollectorEvent::BackgroundProcessingBegins,
                ProblemCollectorEvent::FoundErrors(events_markers(&events)),
                ProblemCollectorEvent::BackgroundProcessingEnds,
                ProblemCollectorEvent::InvalidateLastMarker,
                ProblemCollectorEvent::BackgroundProcessingBegins,
                ProblemCollectorEvent::BackgroundProcessingEnds,
            ]
        );
        assert_eq!(collector.max_marker_severity(), None);
    }

    fn events_markers(events: &[ProblemCollectorEvent]) -> Vec<Marker> {
        events
            .iter()
            .find_map(|e| match e {
                ProblemCollectorEvent::FoundErrors(m) => Some(m.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }

    #[test]
    fn test_disposed_collector_ignores_input() {
        let collector = WatchingProblemCollector::new(vec![matcher("tsc-watch")]);
        let mut rx = collector.subscribe();
        collector.dispose();
        collector.about_to_start();
        collector.process_line("src/a.ts(1,1): error TS1000: bad");
        assert!(drain(&mut rx).is_empty());
        assert_eq!(collector.number_of_matches(), 0);
    }
}
