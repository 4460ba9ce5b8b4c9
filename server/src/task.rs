use protocol::TaskCondition;
use std::fmt;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Started,
    Finished,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Queued => f.write_str("QUEUED"),
            TaskState::Started => f.write_str("STARTED"),
            TaskState::Finished => f.write_str("FINISHED"),
        }
    }
}

/// One command dispatched to a device group on behalf of a test run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub argv: Vec<String>,
    pub timeout: Duration,
    pub state: TaskState,
}

impl Task {
    pub fn new(argv: Vec<String>, timeout: Duration) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            argv,
            timeout,
            state: TaskState::Queued,
        }
    }

    /// Timeout in the whole seconds the wire carries, rounded up so a
    /// sub-second timeout never turns into "no timeout".
    pub fn wire_timeout(&self) -> u64 {
        let whole = self.timeout.as_secs();
        if self.timeout.subsec_nanos() > 0 {
            whole.saturating_add(1)
        } else {
            whole
        }
    }

    /// Apply a reported condition. FINISHED is accepted from any state, so a
    /// task a worker refused to start can still be retired.
    pub fn apply(&mut self, condition: TaskCondition) -> TaskState {
        let next = match condition {
            TaskCondition::Started => TaskState::Started,
            TaskCondition::Finished => TaskState::Finished,
        };
        if next == TaskState::Started && self.state != TaskState::Queued {
            warn!(task_id = %self.id, state = %self.state, "Duplicate start reported");
        }
        self.state = next;
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = Task::new(vec!["true".into()], Duration::from_secs(1));
        let b = Task::new(vec!["true".into()], Duration::from_secs(1));
        assert_ne!(a.id, b.id);
        assert_eq!(a.state, TaskState::Queued);
    }

    #[test]
    fn finished_without_start_is_accepted() {
        let mut task = Task::new(vec!["true".into()], Duration::from_secs(1));
        assert_eq!(task.apply(TaskCondition::Finished), TaskState::Finished);
    }

    #[test]
    fn wire_timeout_rounds_up_to_whole_seconds() {
        let task = |timeout| Task::new(vec!["true".into()], timeout);
        assert_eq!(task(Duration::from_millis(900)).wire_timeout(), 1);
        assert_eq!(task(Duration::from_millis(1500)).wire_timeout(), 2);
        assert_eq!(task(Duration::from_secs(42)).wire_timeout(), 42);
        assert_eq!(task(Duration::ZERO).wire_timeout(), 0);
        assert_eq!(task(Duration::MAX).wire_timeout(), u64::MAX);
    }

    #[test]
    fn started_then_finished() {
        let mut task = Task::new(vec!["true".into()], Duration::from_secs(1));
        assert_eq!(task.apply(TaskCondition::Started), TaskState::Started);
        assert_eq!(task.apply(TaskCondition::Finished), TaskState::Finished);
    }
}
