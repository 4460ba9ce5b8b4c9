//! Dispatches the tasks of one test run and waits for all of them.

use protocol::{pack, unpack, CommandMessage, Message, StateChangeMessage, TaskCondition};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use transport::{testrun_queue, Transport};

use crate::error::RunnerError;
use crate::task::{Task, TaskState};
use crate::timeout::{
    TimeoutController, TimeoutState, DEFAULT_GRACE, DEFAULT_QUEUE_TIMEOUT, DEFAULT_WORKER_KILL_GRACE,
};

/// Receives every reply that is not a state change.
pub trait ResponseHandler: Send {
    fn handle(&mut self, message: Message);
}

/// Collects relayed messages; handy where nothing else needs them.
impl ResponseHandler for Vec<Message> {
    fn handle(&mut self, message: Message) {
        self.push(message);
    }
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// How long the first task may wait for a worker.
    pub queue_timeout: Duration,
    /// Execution ceiling after the first start. When unset, every task
    /// contributes its timeout plus `worker_kill_grace`.
    pub global_timeout: Option<Duration>,
    pub grace: Duration,
    /// How long workers wait between SIGTERM and SIGKILL.
    pub worker_kill_grace: Duration,
    pub controller_timeout: Option<Duration>,
    pub min_worker_version: Option<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            queue_timeout: DEFAULT_QUEUE_TIMEOUT,
            global_timeout: None,
            grace: DEFAULT_GRACE,
            worker_kill_grace: DEFAULT_WORKER_KILL_GRACE,
            controller_timeout: None,
            min_worker_version: None,
        }
    }
}

pub struct TaskRunner {
    transport: Arc<dyn Transport>,
    routing_key: String,
    testrun_id: String,
    reply_queue: String,
    config: RunnerConfig,
    xml_plan: Option<String>,
    pending: Vec<Task>,
    tasks_ceiling: Duration,
    registry: HashMap<String, Task>,
    timeouts: TimeoutController,
    any_started: bool,
    executed: bool,
}

impl TaskRunner {
    /// The transport stays owned by the caller: the runner deletes its reply
    /// queue when done but never closes the connection, which workers or
    /// later runs may share. Dropping the last handle closes it.
    pub fn new(
        transport: Arc<dyn Transport>,
        routing_key: impl Into<String>,
        testrun_id: impl Into<String>,
        config: RunnerConfig,
    ) -> Self {
        let testrun_id = testrun_id.into();
        Self {
            transport,
            routing_key: routing_key.into(),
            reply_queue: testrun_queue(&testrun_id),
            testrun_id,
            config,
            xml_plan: None,
            pending: Vec::new(),
            tasks_ceiling: Duration::ZERO,
            registry: HashMap::new(),
            timeouts: TimeoutController::default(),
            any_started: false,
            executed: false,
        }
    }

    /// Test plan shipped inline with every command.
    pub fn with_xml_plan(mut self, plan: impl Into<String>) -> Self {
        self.xml_plan = Some(plan.into());
        self
    }

    /// Queue a command for dispatch; returns its task id.
    pub fn add_task(&mut self, argv: Vec<String>, timeout: Duration) -> Result<String, RunnerError> {
        if self.executed {
            return Err(RunnerError::AlreadyRun);
        }
        let task = Task::new(argv, timeout);
        let id = task.id.clone();
        // A worker may only give up on a task once its hard kill fired.
        self.tasks_ceiling = self.tasks_ceiling.saturating_add(
            Duration::from_secs(task.wire_timeout()).saturating_add(self.config.worker_kill_grace),
        );
        debug!(task_id = %id, argv = ?task.argv, "Task added");
        self.pending.push(task);
        Ok(id)
    }

    /// Execution deadline armed once the first task starts, grace excluded.
    pub fn global_timeout(&self) -> Duration {
        self.config.global_timeout.unwrap_or(self.tasks_ceiling)
    }

    pub fn testrun_id(&self) -> &str {
        &self.testrun_id
    }

    pub fn reply_queue(&self) -> &str {
        &self.reply_queue
    }

    /// Ids of dispatched tasks that have not reported FINISHED.
    pub fn in_flight(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.registry.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn task_state(&self, task_id: &str) -> Option<TaskState> {
        self.registry.get(task_id).map(|task| task.state)
    }

    pub fn timeout_state(&self) -> TimeoutState {
        self.timeouts.state()
    }

    /// Dispatch every added task and block until all of them finished.
    ///
    /// Non-state-change replies go to `handler`. Whatever the outcome, the
    /// deadlines are disarmed and the reply queue is deleted before
    /// returning. May only be called once.
    pub async fn run(&mut self, handler: &mut dyn ResponseHandler) -> Result<(), RunnerError> {
        if self.executed {
            return Err(RunnerError::AlreadyRun);
        }
        self.executed = true;

        let result = self.dispatch_and_wait(handler).await;
        self.release().await;

        match &result {
            Ok(()) => info!(testrun_id = %self.testrun_id, "All tasks finished"),
            Err(e) => error!(
                testrun_id = %self.testrun_id,
                error = %e,
                unfinished = self.registry.len(),
                "Task runner failed"
            ),
        }
        result
    }

    async fn dispatch_and_wait(
        &mut self,
        handler: &mut dyn ResponseHandler,
    ) -> Result<(), RunnerError> {
        if !self.transport.queue_exists(&self.routing_key).await? {
            return Err(RunnerError::QueueDoesNotExist {
                queue: self.routing_key.clone(),
            });
        }
        self.transport.declare_queue(&self.reply_queue).await?;

        self.timeouts = TimeoutController::new(
            self.config.queue_timeout,
            self.global_timeout(),
            self.config.grace,
        );
        self.timeouts.start_queue_timeout();
        if let Some(timeout) = self.config.controller_timeout {
            self.timeouts.start_controller_timeout(timeout);
        }

        self.publish_tasks().await?;

        let queues = vec![self.reply_queue.clone()];
        while !self.registry.is_empty() {
            let next = tokio::select! {
                biased;
                expiry = self.timeouts.expired() => Err(expiry),
                delivery = self.transport.next_delivery(&queues) => Ok(delivery),
            };

            let delivery = match next {
                Ok(delivery) => delivery?,
                Err(expiry) => {
                    warn!(testrun_id = %self.testrun_id, ?expiry, "Deadline expired");
                    return Err(expiry.into());
                }
            };

            let payload = delivery.payload.clone();
            if let Err(e) = delivery.ack().await {
                warn!(error = %e, "Failed to acknowledge reply");
            }

            match unpack(&payload) {
                Ok(Message::StateChange(change)) => self.on_state_change(change)?,
                Ok(message) => handler.handle(message),
                Err(e) => warn!(queue = %self.reply_queue, error = %e, "Skipping malformed reply"),
            }
        }

        self.timeouts.stop();
        Ok(())
    }

    async fn publish_tasks(&mut self) -> Result<(), RunnerError> {
        for task in std::mem::take(&mut self.pending) {
            let mut command = CommandMessage::new(
                task.argv.clone(),
                self.reply_queue.clone(),
                task.id.clone(),
                task.wire_timeout(),
            );
            if let Some(version) = &self.config.min_worker_version {
                command = command.with_min_worker_version(version.clone());
            }
            if let Some(plan) = &self.xml_plan {
                command = command.with_xml_plan(plan.clone());
            }

            let payload = pack(&Message::Command(command))?;
            self.registry.insert(task.id.clone(), task.clone());
            self.transport.publish(&self.routing_key, payload).await?;
            info!(task_id = %task.id, queue = %self.routing_key, "Task dispatched");
        }
        Ok(())
    }

    fn on_state_change(&mut self, change: StateChangeMessage) -> Result<(), RunnerError> {
        if change.status == TaskCondition::Started && !self.any_started {
            self.any_started = true;
            self.timeouts.task_started();
        }

        let task = self
            .registry
            .get_mut(&change.task_id)
            .ok_or_else(|| RunnerError::UnknownTask {
                task_id: change.task_id.clone(),
            })?;
        let state = task.apply(change.status);
        info!(task_id = %change.task_id, state = %state, "Task state changed");

        if state == TaskState::Finished {
            self.registry.remove(&change.task_id);
        }
        Ok(())
    }

    async fn release(&mut self) {
        self.timeouts.stop();
        if let Err(e) = self.transport.delete_queue(&self.reply_queue).await {
            warn!(queue = %self.reply_queue, error = %e, "Failed to delete reply queue");
        }
    }
}
