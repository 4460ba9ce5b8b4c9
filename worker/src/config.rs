//! Configuration for the worker service

use clap::Parser;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for an OTS worker
#[derive(Debug, Clone, Parser)]
#[command(name = "ots-worker")]
#[command(about = "Executes OTS test tasks dispatched to a device group")]
pub struct WorkerConfig {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    /// Path to NATS credentials file
    #[arg(long, env = "NATS_CREDS_PATH")]
    pub nats_creds_path: Option<String>,

    /// Device-group routing keys to take tasks from (comma separated)
    #[arg(
        long = "routing-key",
        env = "OTS_ROUTING_KEYS",
        value_delimiter = ',',
        required = true
    )]
    pub routing_keys: Vec<String>,

    /// Seconds between SIGTERM (task timeout) and SIGKILL
    #[arg(long, env = "OTS_HARD_TIMEOUT_GRACE_SECS", default_value_t = 15)]
    pub hard_timeout_grace_secs: u64,

    /// Pause before reconnecting after a broker failure
    #[arg(long, env = "OTS_RECONNECT_BACKOFF_SECS", default_value_t = 5)]
    pub reconnect_backoff_secs: u64,

    /// Name reported as the origin of results (defaults to the host name)
    #[arg(long, env = "OTS_WORKER_HOSTNAME")]
    pub hostname: Option<String>,

    /// Directory under which per-task result directories are created
    #[arg(long, env = "OTS_RESULTS_ROOT")]
    pub results_root: Option<PathBuf>,

    /// Output logs in JSON format
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            nats_url: env::var("NATS_URL").unwrap_or_else(|_| "nats://127.0.0.1:4222".to_string()),
            nats_creds_path: env::var("NATS_CREDS_PATH").ok(),
            routing_keys: env::var("OTS_ROUTING_KEYS")
                .map(|keys| split_keys(&keys))
                .unwrap_or_default(),
            hard_timeout_grace_secs: env::var("OTS_HARD_TIMEOUT_GRACE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(15),
            reconnect_backoff_secs: env::var("OTS_RECONNECT_BACKOFF_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            hostname: env::var("OTS_WORKER_HOSTNAME").ok(),
            results_root: env::var("OTS_RESULTS_ROOT").ok().map(PathBuf::from),
            log_json: env::var("LOG_JSON")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
        }
    }
}

fn split_keys(keys: &str) -> Vec<String> {
    keys.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

impl WorkerConfig {
    /// Parse configuration from command-line args and environment variables
    pub fn parse_config() -> Self {
        WorkerConfig::parse()
    }

    /// Queues to consume from, one per routing key.
    pub fn queues(&self) -> Vec<String> {
        split_keys(&self.routing_keys.join(","))
    }

    pub fn hard_timeout_grace(&self) -> Duration {
        Duration::from_secs(self.hard_timeout_grace_secs)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }

    /// Name this worker reports results under.
    pub fn worker_hostname(&self) -> String {
        self.hostname
            .clone()
            .or_else(|| {
                hostname::get()
                    .ok()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "unknown-worker".to_string())
    }
}
