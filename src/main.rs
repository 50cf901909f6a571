use futures::StreamExt;
use kube::runtime::controller::Action;
use kube::runtime::{watcher, Controller};
use kube::{Api, Client};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use virta::controller::clock::SystemClock;
use virta::controller::{reconcile, reconcile_analysis_run, Context, ReconcileError};
use virta::crd::analysis::AnalysisRun;
use virta::crd::rollout::Rollout;
use virta::server::{
    create_metrics, run_health_server, shutdown_channel, wait_for_signal, ReadinessState,
};

/// Default port for health/metrics/admission endpoints
const HEALTH_PORT: u16 = 8080;

/// Error policy for the Rollout controller
///
/// Uses `warn!` since reconciliation errors are expected and trigger
/// requeue with backoff.
fn rollout_error_policy(_rollout: Arc<Rollout>, error: &ReconcileError, ctx: Arc<Context>) -> Action {
    warn!("Rollout reconcile error (will retry): {:?}", error);
    if let Some(ref metrics) = ctx.metrics {
        metrics.record_reconciliation_error("rollout", 0.0);
    }
    Action::requeue(Duration::from_secs(10))
}

/// Error policy for the AnalysisRun controller
fn analysis_error_policy(
    _run: Arc<AnalysisRun>,
    error: &ReconcileError,
    ctx: Arc<Context>,
) -> Action {
    warn!("AnalysisRun reconcile error (will retry): {:?}", error);
    if let Some(ref metrics) = ctx.metrics {
        metrics.record_reconciliation_error("analysisrun", 0.0);
    }
    Action::requeue(Duration::from_secs(10))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting VIRTA progressive delivery controller");

    let (shutdown_controller, _shutdown_signal) = shutdown_channel();
    let readiness = ReadinessState::new();

    let metrics = create_metrics()?;
    info!("Prometheus metrics registry initialized");

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    // Health/metrics/admission server runs for the whole process lifetime
    let health_readiness = readiness.clone();
    let health_metrics = metrics.clone();
    let health_handle = tokio::spawn(async move {
        if let Err(e) = run_health_server(HEALTH_PORT, health_readiness, health_metrics).await {
            warn!(error = %e, "Health server failed");
        }
    });

    let ctx = Arc::new(Context::new(
        client.clone(),
        Arc::new(SystemClock),
        Some(metrics.clone()),
    ));

    let rollouts = Api::<Rollout>::all(client.clone());
    let analysis_runs = Api::<AnalysisRun>::all(client.clone());

    readiness.set_ready();
    info!("Controller ready, starting reconciliation loops");

    // Errors are logged in the error policies; only log successes here
    let rollout_controller = Controller::new(rollouts, watcher::Config::default())
        .run(reconcile, rollout_error_policy, ctx.clone())
        .for_each(|res| async move {
            if let Ok(o) = res {
                info!("Reconciled rollout: {:?}", o);
            }
        });

    let analysis_controller = Controller::new(analysis_runs, watcher::Config::default())
        .run(reconcile_analysis_run, analysis_error_policy, ctx.clone())
        .for_each(|res| async move {
            if let Ok(o) = res {
                info!("Reconciled analysis run: {:?}", o);
            }
        });

    tokio::select! {
        _ = rollout_controller => {
            info!("Rollout controller stream ended");
        }
        _ = analysis_controller => {
            info!("AnalysisRun controller stream ended");
        }
        signal = wait_for_signal() => {
            info!(signal = signal, "Initiating graceful shutdown");
            // Stop receiving traffic while we wind down
            readiness.set_not_ready();
        }
    }

    shutdown_controller.shutdown();
    health_handle.abort();

    info!("VIRTA controller shut down gracefully");
    Ok(())
}
