//! Engine output channel
//!
//! User-facing notices of the task system (dependency cycles, unresolved
//! dependencies and matchers, load warnings) land here, separate from the
//! tracing log.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::broadcast;
use tracing::info;

/// Broadcast channel capacity
const BROADCAST_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputEntry {
    pub timestamp: DateTime<Utc>,
    pub content: String,
    /// 1-based, keeps counting when old entries are dropped
    pub line_number: usize,
}

impl OutputEntry {
    pub fn format(&self) -> String {
        format!("[{}] {}", self.timestamp.format("%H:%M:%S%.3f"), self.content)
    }
}

struct OutputBuffer {
    entries: VecDeque<OutputEntry>,
    line_count: usize,
}

pub struct OutputChannel {
    name: String,
    max_entries: usize,
    buffer: Mutex<OutputBuffer>,
    tx: broadcast::Sender<OutputEntry>,
}

impl OutputChannel {
    pub fn new(name: impl Into<String>, max_entries: usize) -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            name: name.into(),
            max_entries: max_entries.max(1),
            buffer: Mutex::new(OutputBuffer {
                entries: VecDeque::new(),
                line_count: 0,
            }),
            tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn append_line(&self, content: impl Into<String>) {
        let content = content.into();
        info!(channel = %self.name, "{}", content);
        let entry = {
            let mut buffer = self.buffer.lock();
            buffer.line_count += 1;
            let entry = OutputEntry {
                timestamp: Utc::now(),
                content,
                line_number: buffer.line_count,
            };
            if buffer.entries.len() >= self.max_entries {
                buffer.entries.pop_front();
            }
            buffer.entries.push_back(entry.clone());
            entry
        };
        let _ = self.tx.send(entry);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutputEntry> {
        self.tx.subscribe()
    }

    pub fn entries(&self) -> Vec<OutputEntry> {
        self.buffer.lock().entries.iter().cloned().collect()
    }

    pub fn lines(&self) -> Vec<String> {
        self.buffer.lock().entries.iter().map(|e| e.content.clone()).collect()
    }

    pub fn tail(&self, n: usize) -> Vec<String> {
        let buffer = self.buffer.lock();
        let skip = buffer.entries.len().saturating_sub(n);
        buffer.entries.iter().skip(skip).map(|e| e.content.clone()).collect()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.buffer.lock().entries.iter().any(|e| e.content.contains(needle))
    }

    pub fn line_count(&self) -> usize {
        self.buffer.lock().line_count
    }

    pub fn clear(&self) {
        self.buffer.lock().entries.clear();
    }
}

impl Default for OutputChannel {
    fn default() -> Self {
        Self::new("Tasks", 2000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_buffer() {
        let output = OutputChannel::new("Tasks", 2);
        output.append_line("one");
        output.append_line("two");
        output.append_line("three");
        assert_eq!(output.lines(), vec!["two", "three"]);
        assert_eq!(output.line_count(), 3);
        assert_eq!(output.entries()[0].line_number, 2);
        assert_eq!(output.tail(1), vec!["three"]);
        assert!(output.contains("thr"));
        assert!(!output.contains("one"));
    }

    #[tokio::test]
    async fn test_subscribe() {
        let output = OutputChannel::default();
        let mut rx = output.subscribe();
        output.append_line("There is a dependency cycle");
        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.content, "There is a dependency cycle");
        assert!(entry.format().ends_with("There is a dependency cycle"));
    }
}
