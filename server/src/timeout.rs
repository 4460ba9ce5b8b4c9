//! Escalating deadlines of one task runner.
//!
//! Nothing here spawns or polls: the controller only records absolute
//! deadlines, and [`TimeoutController::expired`] is a future the runner races
//! against its blocking receive.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Ceiling for a worker to claim the first task.
pub const DEFAULT_QUEUE_TIMEOUT: Duration = Duration::from_secs(24 * 3600);
/// Added on top of the execution deadline so the worker's own timeouts fire
/// first.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(60);
/// Time a worker gives a task between SIGTERM and SIGKILL.
pub const DEFAULT_WORKER_KILL_GRACE: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutState {
    Idle,
    QueueWaiting,
    Executing,
    Done,
}

/// Which deadline fired, and how long it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Queue(Duration),
    Global(Duration),
    Controller(Duration),
}

#[derive(Debug)]
pub struct TimeoutController {
    queue_timeout: Duration,
    global_timeout: Duration,
    grace: Duration,
    state: TimeoutState,
    queue_deadline: Option<Instant>,
    global_deadline: Option<Instant>,
    controller_deadline: Option<(Instant, Duration)>,
}

impl TimeoutController {
    pub fn new(queue_timeout: Duration, global_timeout: Duration, grace: Duration) -> Self {
        Self {
            queue_timeout,
            global_timeout,
            grace,
            state: TimeoutState::Idle,
            queue_deadline: None,
            global_deadline: None,
            controller_deadline: None,
        }
    }

    pub fn state(&self) -> TimeoutState {
        self.state
    }

    /// Execution deadline armed by [`task_started`](Self::task_started).
    pub fn execution_timeout(&self) -> Duration {
        self.global_timeout.saturating_add(self.grace)
    }

    pub fn start_queue_timeout(&mut self) {
        debug!(timeout = ?self.queue_timeout, "Arming queue timeout");
        self.queue_deadline = deadline_after(self.queue_timeout);
        self.global_deadline = None;
        self.state = TimeoutState::QueueWaiting;
    }

    /// A worker claimed a task: disarm the queue deadline and arm the
    /// execution deadline. Only the first call has an effect.
    pub fn task_started(&mut self) {
        if self.state != TimeoutState::QueueWaiting {
            return;
        }
        let timeout = self.execution_timeout();
        info!(timeout = ?timeout, "First task started; arming execution timeout");
        self.queue_deadline = None;
        self.global_deadline = deadline_after(timeout);
        self.state = TimeoutState::Executing;
    }

    /// Arm the auxiliary controller deadline, independent of the others.
    pub fn start_controller_timeout(&mut self, timeout: Duration) {
        debug!(timeout = ?timeout, "Arming controller timeout");
        self.controller_deadline = deadline_after(timeout).map(|at| (at, timeout));
    }

    pub fn stop_controller_timeout(&mut self) {
        self.controller_deadline = None;
    }

    /// Disarm everything.
    pub fn stop(&mut self) {
        self.queue_deadline = None;
        self.global_deadline = None;
        self.controller_deadline = None;
        self.state = TimeoutState::Done;
    }

    pub fn is_armed(&self) -> bool {
        self.next_deadline().is_some()
    }

    fn next_deadline(&self) -> Option<(Instant, Expiry)> {
        let queue = self
            .queue_deadline
            .map(|at| (at, Expiry::Queue(self.queue_timeout)));
        let global = self
            .global_deadline
            .map(|at| (at, Expiry::Global(self.execution_timeout())));
        let controller = self
            .controller_deadline
            .map(|(at, timeout)| (at, Expiry::Controller(timeout)));

        [queue, global, controller]
            .into_iter()
            .flatten()
            .min_by_key(|(at, _)| *at)
    }

    /// Resolves when the earliest armed deadline passes; never resolves while
    /// nothing is armed.
    pub async fn expired(&self) -> Expiry {
        match self.next_deadline() {
            Some((at, expiry)) => {
                tokio::time::sleep_until(at).await;
                expiry
            }
            None => std::future::pending().await,
        }
    }
}

/// `None` when the deadline lies beyond what the clock can represent; such a
/// deadline never fires.
fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

impl Default for TimeoutController {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_TIMEOUT, Duration::from_secs(3600), DEFAULT_GRACE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHORT: Duration = Duration::from_millis(50);

    #[test]
    fn walks_through_its_states() {
        let mut timeouts = TimeoutController::new(SHORT, SHORT, Duration::ZERO);
        assert_eq!(timeouts.state(), TimeoutState::Idle);
        assert!(!timeouts.is_armed());

        timeouts.start_queue_timeout();
        assert_eq!(timeouts.state(), TimeoutState::QueueWaiting);
        timeouts.task_started();
        assert_eq!(timeouts.state(), TimeoutState::Executing);
        timeouts.stop();
        assert_eq!(timeouts.state(), TimeoutState::Done);
        assert!(!timeouts.is_armed());
    }

    #[test]
    fn task_started_before_queue_wait_is_ignored() {
        let mut timeouts = TimeoutController::default();
        timeouts.task_started();
        assert_eq!(timeouts.state(), TimeoutState::Idle);
        assert!(!timeouts.is_armed());
    }

    #[tokio::test]
    async fn queue_deadline_fires() {
        let mut timeouts = TimeoutController::new(SHORT, Duration::from_secs(60), Duration::ZERO);
        timeouts.start_queue_timeout();
        assert_eq!(timeouts.expired().await, Expiry::Queue(SHORT));
    }

    #[tokio::test]
    async fn execution_deadline_includes_grace() {
        let mut timeouts = TimeoutController::new(Duration::from_secs(60), SHORT, SHORT);
        timeouts.start_queue_timeout();
        timeouts.task_started();

        let started = std::time::Instant::now();
        assert_eq!(timeouts.expired().await, Expiry::Global(SHORT * 2));
        assert!(started.elapsed() >= SHORT * 2);
    }

    #[tokio::test]
    async fn controller_deadline_runs_alongside() {
        let mut timeouts =
            TimeoutController::new(Duration::from_secs(60), Duration::from_secs(60), SHORT);
        timeouts.start_queue_timeout();
        timeouts.start_controller_timeout(SHORT);
        assert_eq!(timeouts.expired().await, Expiry::Controller(SHORT));
    }

    #[tokio::test]
    async fn unrepresentable_deadlines_never_fire() {
        let mut timeouts = TimeoutController::new(Duration::MAX, Duration::MAX, DEFAULT_GRACE);
        assert_eq!(timeouts.execution_timeout(), Duration::MAX);

        timeouts.start_queue_timeout();
        timeouts.start_controller_timeout(Duration::MAX);
        assert_eq!(timeouts.state(), TimeoutState::QueueWaiting);
        timeouts.task_started();
        assert_eq!(timeouts.state(), TimeoutState::Executing);
        assert!(!timeouts.is_armed());

        let raced = tokio::time::timeout(SHORT, timeouts.expired()).await;
        assert!(raced.is_err());
    }

    #[tokio::test]
    async fn stopped_controller_never_fires() {
        let mut timeouts = TimeoutController::new(SHORT, SHORT, Duration::ZERO);
        timeouts.start_queue_timeout();
        timeouts.stop();
        let raced = tokio::time::timeout(SHORT * 3, timeouts.expired()).await;
        assert!(raced.is_err());
    }
}
