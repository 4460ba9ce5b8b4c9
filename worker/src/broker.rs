//! The worker's consume loop.
//!
//! One task at a time: the next delivery is only requested once the previous
//! task has reported FINISHED, so the broker can never hand this worker a
//! second task while one is executing.

use command_exec::{Command, ExecError, Signal};
use protocol::{
    pack, unpack, worker_is_compatible, CommandMessage, ErrorCode, Message, MonitorEventKind,
    TaskCondition,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use transport::{Delivery, Transport, TransportError};

use crate::config::WorkerConfig;
use crate::results::{collect_results, RESULTS_DIR_ENV};
use crate::stats::WorkerStats;
use crate::WORKER_VERSION;

/// Attempts made to deliver a single report to the reply queue.
const PUBLISH_ATTEMPTS: u32 = 3;
/// Longest stderr tail forwarded in an error report.
const STDERR_TAIL_LIMIT: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    Idle,
    Consuming,
    Executing,
    Reporting,
}

/// Pulls tasks for this worker's device groups and executes them.
pub struct TaskBroker {
    transport: Arc<dyn Transport>,
    config: WorkerConfig,
    queues: Vec<String>,
    hostname: String,
    shutdown: CancellationToken,
    state: BrokerState,
    keep_running: bool,
    stats: WorkerStats,
}

impl TaskBroker {
    pub fn new(transport: Arc<dyn Transport>, config: WorkerConfig) -> Self {
        let queues = config.queues();
        let hostname = config.worker_hostname();
        Self {
            transport,
            config,
            queues,
            hostname,
            shutdown: CancellationToken::new(),
            state: BrokerState::Idle,
            keep_running: true,
            stats: WorkerStats::default(),
        }
    }

    /// Token that stops the loop when cancelled. A running task is sent
    /// SIGTERM and still reported FINISHED.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn state(&self) -> BrokerState {
        self.state
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Consume until a `quit` command arrives or shutdown is requested.
    pub async fn run(mut self) -> WorkerStats {
        info!(queues = ?self.queues, version = WORKER_VERSION, host = %self.hostname, "Starting task broker");

        if let Err(e) = self.declare_queues().await {
            error!(error = %e, "Failed to declare device queues");
            self.recover().await;
        }

        while self.keep_running && !self.shutdown.is_cancelled() {
            self.state = BrokerState::Consuming;
            let delivery = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                delivery = self.transport.next_delivery(&self.queues) => delivery,
            };

            match delivery {
                Ok(delivery) => self.on_delivery(delivery).await,
                Err(e) => {
                    error!(error = %e, "Receiving from broker failed");
                    self.recover().await;
                }
            }
            self.state = BrokerState::Idle;
        }

        self.state = BrokerState::Idle;
        info!("Task broker stopped");
        self.stats.log_summary();
        self.stats
    }

    async fn declare_queues(&self) -> Result<(), TransportError> {
        for queue in &self.queues {
            self.transport.declare_queue(queue).await?;
        }
        Ok(())
    }

    /// Back off, then reconnect and re-declare. A failure here is only
    /// logged; the next loop iteration fails again and retries.
    async fn recover(&mut self) {
        let backoff = self.config.reconnect_backoff();
        warn!(backoff_ms = backoff.as_millis() as u64, "Reconnecting to broker after back-off");
        tokio::select! {
            _ = self.shutdown.cancelled() => return,
            _ = tokio::time::sleep(backoff) => {}
        }

        match self.transport.reconnect().await {
            Ok(()) => {
                self.stats.reconnects += 1;
                if let Err(e) = self.declare_queues().await {
                    error!(error = %e, "Re-declaring queues after reconnect failed");
                } else {
                    info!("Reconnected to broker");
                }
            }
            Err(e) => error!(error = %e, "Reconnect failed; will retry"),
        }
    }

    async fn on_delivery(&mut self, delivery: Delivery) {
        let command = match unpack(&delivery.payload) {
            Ok(Message::Command(command)) => command,
            Ok(other) => {
                warn!(queue = %delivery.queue, kind = %other.kind(), "Ignoring non-command message");
                self.stats.malformed_messages += 1;
                self.ack(delivery).await;
                return;
            }
            Err(e) => {
                error!(queue = %delivery.queue, error = %e, "Dropping malformed message");
                self.stats.malformed_messages += 1;
                self.ack(delivery).await;
                return;
            }
        };

        if !worker_is_compatible(command.min_worker_version.as_deref(), WORKER_VERSION) {
            warn!(
                task_id = %command.task_id,
                required = ?command.min_worker_version,
                version = WORKER_VERSION,
                "Refusing task from newer server; leaving it for another worker"
            );
            self.stats.tasks_refused += 1;
            if let Err(e) = delivery.requeue().await {
                error!(error = %e, "Failed to requeue refused task");
            }
            self.recover().await;
            return;
        }

        self.ack(delivery).await;

        if command.is_quit() {
            info!("Received quit command");
            self.keep_running = false;
            return;
        }
        if command.is_ignore() {
            debug!(task_id = %command.task_id, "Received ignore command");
            return;
        }

        self.dispatch(command).await;
    }

    async fn ack(&self, delivery: Delivery) {
        if let Err(e) = delivery.ack().await {
            warn!(error = %e, "Failed to acknowledge delivery");
        }
    }

    async fn dispatch(&mut self, command: CommandMessage) {
        let reply = command.response_queue.clone();
        let task_id = command.task_id.clone();
        info!(task_id = %task_id, argv = ?command.argv, timeout = command.timeout, "Executing task");

        self.state = BrokerState::Executing;
        self.stats.tasks_started += 1;
        self.report(&reply, Message::state_change(&task_id, TaskCondition::Started))
            .await;
        self.report(
            &reply,
            Message::monitor(
                MonitorEventKind::TaskStarted,
                &self.hostname,
                format!("task {task_id} started"),
            ),
        )
        .await;

        let outcome = self.execute(&command).await;

        self.state = BrokerState::Reporting;
        self.stats.record_outcome(outcome.is_ok());
        match outcome {
            Ok(messages) => {
                for message in messages {
                    self.report(&reply, message).await;
                }
                self.report(
                    &reply,
                    Message::monitor(
                        MonitorEventKind::TaskFinished,
                        &self.hostname,
                        format!("task {task_id} finished"),
                    ),
                )
                .await;
            }
            Err((info, code)) => {
                warn!(task_id = %task_id, code = code.code(), error = %info, "Task failed");
                self.report(&reply, Message::error(&info, code)).await;
                self.report(
                    &reply,
                    Message::monitor(MonitorEventKind::TaskFailed, &self.hostname, info),
                )
                .await;
            }
        }

        self.report(&reply, Message::state_change(&task_id, TaskCondition::Finished))
            .await;
        info!(task_id = %task_id, "Task finished");
    }

    /// Run the task's command on the blocking pool and collect its results.
    async fn execute(&self, command: &CommandMessage) -> Result<Vec<Message>, (String, ErrorCode)> {
        let results_dir = self
            .results_dir()
            .map_err(|e| (format!("cannot create results directory: {e}"), ErrorCode::Internal))?;

        let timeout = Duration::from_secs(command.timeout);
        let mut process = Command::new(command.argv.clone())
            .env(RESULTS_DIR_ENV, results_dir.path().to_string_lossy())
            .env("OTS_TASK_ID", &command.task_id)
            .env("OTS_TESTRUN_QUEUE", &command.response_queue);
        if command.timeout > 0 {
            process = process
                .soft_timeout(timeout)
                .hard_timeout(timeout.saturating_add(self.config.hard_timeout_grace()));
        }
        let signal = process.signal_handle();

        let mut join = tokio::task::spawn_blocking(move || process.execute(0));
        let finished = tokio::select! {
            joined = &mut join => Some(joined),
            _ = self.shutdown.cancelled() => None,
        };
        let joined = match finished {
            Some(joined) => joined,
            None => {
                warn!(task_id = %command.task_id, "Shutdown requested; terminating running task");
                if let Err(e) = signal.send_signal(Signal::Terminate) {
                    debug!(error = %e, "Task was not running anymore");
                }
                join.await
            }
        };

        match joined {
            Ok(Ok(output)) => {
                debug!(task_id = %command.task_id, duration = ?output.duration, "Command succeeded");
            }
            Ok(Err(e)) => return Err(describe_failure(&e)),
            Err(e) => return Err((format!("executor panicked: {e}"), ErrorCode::Internal)),
        }

        let collected = collect_results(results_dir.path(), &self.hostname)
            .map_err(|e| (format!("reading results failed: {e}"), ErrorCode::Internal))?;
        Ok(collected.into_messages())
    }

    fn results_dir(&self) -> std::io::Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("ots-task-");
        match &self.config.results_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
    }

    /// Publish a report to the reply queue, reconnecting on connection loss.
    async fn report(&mut self, queue: &str, message: Message) {
        let payload = match pack(&message) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, kind = %message.kind(), "Failed to encode report");
                return;
            }
        };

        for attempt in 1..=PUBLISH_ATTEMPTS {
            match self.transport.publish(queue, payload.clone()).await {
                Ok(()) => return,
                Err(e) if e.is_connection_loss() && attempt < PUBLISH_ATTEMPTS => {
                    warn!(attempt, queue = %queue, error = %e, "Report publish failed; reconnecting");
                    tokio::time::sleep(self.config.reconnect_backoff()).await;
                    if self.transport.reconnect().await.is_ok() {
                        self.stats.reconnects += 1;
                    }
                }
                Err(e) => {
                    error!(queue = %queue, kind = %message.kind(), error = %e, "Report lost");
                    return;
                }
            }
        }
    }
}

fn describe_failure(error: &ExecError) -> (String, ErrorCode) {
    let code = match error {
        ExecError::CommandFailed { .. } => ErrorCode::CommandFailed,
        ExecError::SoftTimeout { .. } => ErrorCode::SoftTimeout,
        ExecError::HardTimeout { .. } => ErrorCode::HardTimeout,
        ExecError::Spawn { .. } | ExecError::EmptyCommand => ErrorCode::SpawnFailed,
        _ => ErrorCode::Internal,
    };
    let mut info = error.to_string();
    if let Some(output) = error.output() {
        let stderr = output.stderr.trim();
        if !stderr.is_empty() {
            info.push_str("; stderr: ");
            info.push_str(tail(stderr, STDERR_TAIL_LIMIT));
        }
    }
    (info, code)
}

fn tail(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut start = text.len() - limit;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
