//! Configuration for the test-run server

use clap::Parser;
use std::env;
use std::time::Duration;

use crate::error::ConfigError;
use crate::runner::RunnerConfig;
use crate::testrun::PackageMap;
use crate::timeout::{DEFAULT_GRACE, DEFAULT_QUEUE_TIMEOUT, DEFAULT_WORKER_KILL_GRACE};

/// Configuration for one OTS test run
#[derive(Debug, Clone, Parser)]
#[command(name = "ots-server")]
#[command(about = "Dispatches a test run to a device group and judges its results")]
pub struct ServerConfig {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    /// Path to NATS credentials file
    #[arg(long, env = "NATS_CREDS_PATH")]
    pub nats_creds_path: Option<String>,

    /// Device group to dispatch to
    #[arg(long, env = "OTS_ROUTING_KEY")]
    pub routing_key: String,

    /// Shell command to run as one task (repeatable)
    #[arg(long = "task", required = true)]
    pub tasks: Vec<String>,

    /// Per-task execution timeout in seconds
    #[arg(long, env = "OTS_TASK_TIMEOUT_SECS", default_value_t = 3600)]
    pub task_timeout_secs: u64,

    /// How long a worker may take to claim the first task
    #[arg(long, env = "OTS_QUEUE_TIMEOUT_SECS", default_value_t = DEFAULT_QUEUE_TIMEOUT.as_secs())]
    pub queue_timeout_secs: u64,

    /// Execution ceiling after the first task started (defaults to the sum of task timeouts)
    #[arg(long, env = "OTS_GLOBAL_TIMEOUT_SECS")]
    pub global_timeout_secs: Option<u64>,

    /// Extra time granted on top of the execution ceiling
    #[arg(long, env = "OTS_TIMEOUT_GRACE_SECS", default_value_t = DEFAULT_GRACE.as_secs())]
    pub timeout_grace_secs: u64,

    /// Seconds workers wait between SIGTERM and SIGKILL; counted per task
    /// in the default execution ceiling
    #[arg(long, env = "OTS_HARD_TIMEOUT_GRACE_SECS", default_value_t = DEFAULT_WORKER_KILL_GRACE.as_secs())]
    pub worker_kill_grace_secs: u64,

    /// Deadline for the auxiliary hardware controller
    #[arg(long, env = "OTS_CONTROLLER_TIMEOUT_SECS")]
    pub controller_timeout_secs: Option<u64>,

    /// Oldest worker version allowed to take the tasks
    #[arg(long, env = "OTS_MIN_WORKER_VERSION")]
    pub min_worker_version: Option<String>,

    /// Count insignificant test cases towards the verdict
    #[arg(long, env = "OTS_INSIGNIFICANT_TESTS_MATTER")]
    pub insignificant_tests_matter: bool,

    /// Expected package, as <environment>:<package> (repeatable)
    #[arg(long = "package")]
    pub packages: Vec<String>,

    /// Output logs in JSON format
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            nats_url: env::var("NATS_URL").unwrap_or_else(|_| "nats://127.0.0.1:4222".to_string()),
            nats_creds_path: env::var("NATS_CREDS_PATH").ok(),
            routing_key: env::var("OTS_ROUTING_KEY").unwrap_or_default(),
            tasks: Vec::new(),
            task_timeout_secs: env_secs("OTS_TASK_TIMEOUT_SECS").unwrap_or(3600),
            queue_timeout_secs: env_secs("OTS_QUEUE_TIMEOUT_SECS")
                .unwrap_or(DEFAULT_QUEUE_TIMEOUT.as_secs()),
            global_timeout_secs: env_secs("OTS_GLOBAL_TIMEOUT_SECS"),
            timeout_grace_secs: env_secs("OTS_TIMEOUT_GRACE_SECS").unwrap_or(DEFAULT_GRACE.as_secs()),
            worker_kill_grace_secs: env_secs("OTS_HARD_TIMEOUT_GRACE_SECS")
                .unwrap_or(DEFAULT_WORKER_KILL_GRACE.as_secs()),
            controller_timeout_secs: env_secs("OTS_CONTROLLER_TIMEOUT_SECS"),
            min_worker_version: env::var("OTS_MIN_WORKER_VERSION").ok(),
            insignificant_tests_matter: env::var("OTS_INSIGNIFICANT_TESTS_MATTER")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            packages: Vec::new(),
            log_json: env::var("LOG_JSON")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
        }
    }
}

fn env_secs(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|s| s.parse().ok())
}

impl ServerConfig {
    /// Parse configuration from command-line args and environment variables
    pub fn parse_config() -> Self {
        ServerConfig::parse()
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            queue_timeout: Duration::from_secs(self.queue_timeout_secs),
            global_timeout: self.global_timeout_secs.map(Duration::from_secs),
            grace: Duration::from_secs(self.timeout_grace_secs),
            worker_kill_grace: Duration::from_secs(self.worker_kill_grace_secs),
            controller_timeout: self.controller_timeout_secs.map(Duration::from_secs),
            min_worker_version: self.min_worker_version.clone(),
        }
    }

    /// Argv of every task; each command runs through `sh -c`.
    pub fn task_argvs(&self) -> Result<Vec<Vec<String>>, ConfigError> {
        if self.tasks.is_empty() {
            return Err(ConfigError::NoTasks);
        }
        Ok(self
            .tasks
            .iter()
            .map(|task| vec!["sh".to_string(), "-c".to_string(), task.clone()])
            .collect())
    }

    pub fn declared_packages(&self) -> Result<PackageMap, ConfigError> {
        let mut declared = PackageMap::new();
        for value in &self.packages {
            let (environment, package) = value
                .split_once(':')
                .map(|(e, p)| (e.trim(), p.trim()))
                .filter(|(e, p)| !e.is_empty() && !p.is_empty())
                .ok_or_else(|| ConfigError::InvalidPackage {
                    value: value.clone(),
                })?;
            declared
                .entry(environment.to_string())
                .or_default()
                .insert(package.to_string());
        }
        Ok(declared)
    }
}
