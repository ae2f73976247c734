//! Per-session operator log stream
//!
//! The caller of a launch or disconnect supplies a [`SessionLog`]; every state
//! transition, retry and error for that session is written to it. This is the
//! tailed log an operator watches, separate from process-wide `tracing` output.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lines a [`SessionBuffer`] keeps by default
pub const DEFAULT_SESSION_LOG_MAX_LINES: usize = 10_000;

/// Sink for operator-visible log lines
pub trait SessionLog: Send + Sync {
    /// Write one line
    fn write_line(&self, line: &str);

    /// Write one line flagged as an error
    fn error(&self, line: &str) {
        self.write_line(&format!("ERROR: {line}"));
    }
}

/// Bounded in-memory [`SessionLog`]; the oldest lines are dropped once
/// `max_lines` is reached.
#[derive(Debug)]
pub struct SessionBuffer {
    lines: Mutex<VecDeque<String>>,
    max_lines: usize,
}

impl Default for SessionBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_LOG_MAX_LINES)
    }
}

impl SessionBuffer {
    pub fn new(max_lines: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::new()),
            max_lines,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy out the current lines
    pub fn snapshot(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }

    /// Whether any line contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.lock().iter().any(|line| line.contains(needle))
    }
}

impl SessionLog for SessionBuffer {
    fn write_line(&self, line: &str) {
        if self.max_lines == 0 {
            return;
        }
        let mut lines = self.lock();
        if lines.len() == self.max_lines {
            lines.pop_front();
        }
        lines.push_back(line.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_newest_lines_when_full() {
        let log = SessionBuffer::new(3);
        for i in 1..=4 {
            log.write_line(&format!("line {i}"));
        }

        assert_eq!(log.snapshot(), vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn zero_capacity_drops_everything() {
        let log = SessionBuffer::new(0);
        log.write_line("dropped");
        assert!(log.snapshot().is_empty());
    }

    #[test]
    fn error_lines_are_prefixed() {
        let log = SessionBuffer::default();
        log.write_line("checking state");
        log.error("start failed");

        assert_eq!(log.snapshot(), vec!["checking state", "ERROR: start failed"]);
        assert!(log.contains("start failed"));
        assert!(!log.contains("terminated"));
    }
}
