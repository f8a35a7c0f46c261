//! Problem matching: matchers, collectors and the per-terminal monitor

mod collector;
mod matcher;
mod monitor;

pub use collector::{
    ProblemCollector, ProblemCollectorEvent, StartStopProblemCollector, WatchingProblemCollector,
};
pub use matcher::{
    BackgroundMatcher, CompiledMatcher, FileLocation, Marker, MarkerSeverity, ProblemMatcher,
    ProblemMatcherRegistry, ProblemPattern,
};
pub use monitor::{OwnerProblems, TaskProblemMonitor};
