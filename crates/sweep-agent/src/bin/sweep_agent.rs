use std::sync::Arc;

use anyhow::bail;
use sweep_agent::{Agent, AgentConfig, AgentHandle, AgentReport, CommandTrial, HttpCoordinator};
use sweep_types::AgentResult;
use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const ENV_COORDINATOR_URL: &str = "SWEEP_COORDINATOR_URL";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let Some(program) = args.next() else {
        bail!("usage: sweep-agent <program> [args...]");
    };
    let trial = CommandTrial::new(program, args.collect());

    let config = AgentConfig::from_env()?;
    let url = std::env::var(ENV_COORDINATOR_URL)
        .unwrap_or_else(|_| "http://localhost:8080".to_string());

    let (handle_tx, handle_rx) = oneshot::channel::<AgentHandle>();
    tokio::spawn(async move {
        let Ok(handle) = handle_rx.await else {
            return;
        };
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.interrupt();
        }
    });

    // The agent blocks; keep it off the async workers.
    let report = tokio::task::spawn_blocking(move || -> AgentResult<AgentReport> {
        let coordinator = Arc::new(HttpCoordinator::new(url)?);
        let agent = Agent::new(config, coordinator, Arc::new(trial));
        let _ = handle_tx.send(agent.handle());
        agent.run()
    })
    .await??;

    info!(
        agent_id = %report.agent_id,
        runs = report.run_count,
        errored = report.errored.len(),
        termination = ?report.termination,
        "sweep agent finished"
    );
    for (run_id, cause) in &report.errored {
        warn!(run_id = %run_id, cause = %cause, "errored run");
    }
    Ok(())
}
