//! # Karapace Operator
//!
//! Lifecycle controller for a Karapace schema registry deployment.
//!
//! ## Overview
//!
//! The operator keeps a single registry unit converged with its declared
//! state by:
//!
//! 1. **Tracking relations** - peer, broker (kafka), certificates, and
//!    client integrations with cardinality enforcement
//! 2. **Managing secrets** - versioned internal credentials and unit TLS
//!    material, mutated only by the leader
//! 3. **Reconciling** - rendering service config and authfile, diffing
//!    against the last applied state, and applying the delta under a
//!    rolling-restart lock with bounded retry
//!
//! Events arrive as newline-delimited JSON on stdin (see
//! [`karapace_operator::reconciler::Event`]); a periodic status pass runs
//! regardless.
//!
//! ## Features
//!
//! - **Prometheus metrics**: Exposes metrics for monitoring and observability
//! - **Health probes**: HTTP endpoints for liveness and readiness checks

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use karapace_operator::cluster::ClusterContext;
use karapace_operator::config::RetryPolicy;
use karapace_operator::constants::{DEFAULT_METRICS_PORT, DEFAULT_UPDATE_STATUS_INTERVAL_SECS};
use karapace_operator::metrics;
use karapace_operator::reconciler::{Event, ReconciliationResult, Reconciler};
use karapace_operator::server::{start_server, ServerState};
use karapace_operator::workload::{RegistryPaths, SystemdWorkload};
use karapace_operator::LifecycleError;

#[derive(Parser, Debug)]
#[command(name = "karapace-operator", version, about)]
struct Args {
    /// Unit name of this operator instance
    #[arg(long, default_value = "karapace/0")]
    unit_name: String,

    /// Address advertised to brokers and clients
    #[arg(long, default_value = "127.0.0.1")]
    unit_address: String,

    /// Configuration directory of the managed service
    #[arg(long, default_value = "/etc/karapace")]
    conf_dir: PathBuf,

    /// Systemd service unit to manage
    #[arg(long, default_value = "karapace")]
    service: String,

    /// Port for the metrics and probe HTTP server
    #[arg(long, env = "METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    metrics_port: u16,

    /// Start as leader without waiting for a leader_elected event
    #[arg(long)]
    leader: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "karapace_operator=info".into()),
        )
        .init();

    let args = Args::parse();
    info!(unit = %args.unit_name, "Starting Karapace Operator");

    metrics::register_metrics()?;

    let server_state = ServerState::new();
    let server_state_clone = Arc::clone(&server_state);
    let server_port = args.metrics_port;

    tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });

    let mut ctx = ClusterContext::new(args.unit_name, args.unit_address);
    ctx.set_leader(args.leader);
    let workload = SystemdWorkload::new(args.service);
    let paths = RegistryPaths::new(args.conf_dir);
    let mut reconciler = Reconciler::new(ctx, workload, paths, RetryPolicy::default());

    let mut interval =
        tokio::time::interval(Duration::from_secs(DEFAULT_UPDATE_STATUS_INTERVAL_SECS));
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            _ = interval.tick() => {
                let result = reconciler.handle(Event::UpdateStatus).await;
                report(&server_state, &result);
            }
            line = lines.next_line() => {
                match line.context("failed to read event stream")? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => {
                        match serde_json::from_str::<Event>(&line) {
                            Ok(event) => {
                                let result = reconciler.handle(event).await;
                                report(&server_state, &result);
                            }
                            Err(e) => warn!(error = %e, "discarding malformed event"),
                        }
                    }
                    // Event stream closed; keep running on the timer
                    None => tokio::time::sleep(Duration::from_secs(
                        DEFAULT_UPDATE_STATUS_INTERVAL_SECS,
                    ))
                    .await,
                }
            }
        }
    }

    info!("Operator stopped");
    Ok(())
}

/// Reflect a pass outcome into logs and the probe endpoints.
fn report(state: &ServerState, result: &Result<ReconciliationResult, LifecycleError>) {
    match result {
        Ok(outcome) => {
            state.set_status(outcome.status.is_active(), outcome.status.message());
            for (key, value) in &outcome.outputs {
                // Credentials are intentionally not logged
                if key == "csr" || key == "endpoints" {
                    info!(key, value, "pass output");
                }
            }
        }
        Err(e) => {
            state.set_status(false, &e.to_string());
            error!(error = %e, "reconciliation failed");
        }
    }
}
