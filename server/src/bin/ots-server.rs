//! OTS server binary - runs one test run against a device group

use anyhow::Context;
use server::{execute_testrun, ServerConfig, TestRunRequest, Verdict};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use transport::{NatsOptions, NatsTransport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse_config();

    if config.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .init();
    }

    info!("Starting OTS server");
    info!("Configuration:");
    info!("  NATS URL: {}", config.nats_url);
    info!("  Routing key: {}", config.routing_key);
    info!("  Tasks: {}", config.tasks.len());
    info!("  Task timeout: {:?}", config.task_timeout());

    let mut request = TestRunRequest::new(
        config.routing_key.clone(),
        config.task_argvs().context("invalid task list")?,
    );
    request.task_timeout = config.task_timeout();
    request.declared_packages = config
        .declared_packages()
        .context("invalid package declaration")?;
    request.insignificant_tests_matter = config.insignificant_tests_matter;

    let transport = NatsTransport::connect(NatsOptions {
        url: config.nats_url.clone(),
        creds_path: config.nats_creds_path.clone(),
        ..NatsOptions::default()
    })
    .await
    .context("connecting to NATS")?;

    let testrun = execute_testrun(Arc::new(transport), &config.runner_config(), request).await;
    info!(
        testrun_id = %testrun.id(),
        verdict = %testrun.verdict(),
        results = testrun.results().len(),
        "Testrun complete"
    );

    if testrun.verdict() != Verdict::Pass {
        anyhow::bail!(
            "testrun {} finished with verdict {}{}",
            testrun.id(),
            testrun.verdict(),
            testrun
                .error_info()
                .map(|info| format!(": {info}"))
                .unwrap_or_default()
        );
    }
    Ok(())
}
