//! Per-worker counters
//!
//! Kept in memory and reported through structured logging.

use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub tasks_started: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub tasks_refused: u64,
    pub malformed_messages: u64,
    pub reconnects: u64,
}

impl WorkerStats {
    pub fn record_outcome(&mut self, success: bool) {
        if success {
            self.tasks_succeeded += 1;
        } else {
            self.tasks_failed += 1;
        }
    }

    pub fn log_summary(&self) {
        info!(
            tasks_started = self.tasks_started,
            tasks_succeeded = self.tasks_succeeded,
            tasks_failed = self.tasks_failed,
            tasks_refused = self.tasks_refused,
            malformed_messages = self.malformed_messages,
            reconnects = self.reconnects,
            "Worker statistics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_are_counted_separately() {
        let mut stats = WorkerStats::default();
        stats.record_outcome(true);
        stats.record_outcome(false);
        stats.record_outcome(false);
        assert_eq!(stats.tasks_succeeded, 1);
        assert_eq!(stats.tasks_failed, 2);
        stats.log_summary();
    }
}
