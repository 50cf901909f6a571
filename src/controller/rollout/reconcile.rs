use crate::controller::clock::Clock;
use crate::controller::traffic::{
    build_reconcilers, traffic_split::gc_orphaned_splits, TrafficError, WeightVerification,
};
use crate::crd::rollout::{Phase, Rollout, RolloutStatus};
use k8s_openapi::api::apps::v1::ReplicaSet;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::analysis::{reconcile_step_analysis, terminate_analysis_run, StepVerdict};
use super::replicaset::{
    build_replicaset, calculate_replica_counts, classify_replicasets, compute_pod_template_hash,
    ensure_replicaset_scaled, scale_replicaset, ROLLOUT_LABEL,
};
use super::status::{
    calculate_requeue_interval_from_rollout, compute_desired_status, has_promote_annotation,
    is_progress_deadline_exceeded, PROMOTE_ANNOTATION,
};
use super::traffic::{desired_weight, max_traffic_weight};
use super::validation::validate_rollout;

/// Upper bound on a single traffic backend call
const TRAFFIC_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Rollout missing namespace")]
    MissingNamespace,

    #[error("Rollout missing name")]
    MissingName,

    #[error("ReplicaSet missing name in metadata")]
    ReplicaSetMissingName,

    #[error("Failed to serialize PodTemplateSpec: {0}")]
    SerializationError(String),

    #[error("Invalid spec: {0}")]
    ValidationError(String),

    #[error("Traffic routing failed: {0}")]
    TrafficError(#[from] TrafficError),

    #[error("Traffic backend {backend} timed out after {timeout:?}")]
    TrafficTimeout {
        backend: &'static str,
        timeout: Duration,
    },
}

pub struct Context {
    pub client: kube::Client,
    pub clock: Arc<dyn Clock>,
    /// Shared HTTP client handed to metric providers
    pub http: reqwest::Client,
    /// Optional controller metrics for Prometheus.
    /// When Some, records reconciliation counts and durations.
    pub metrics: Option<crate::server::SharedMetrics>,
}

impl Context {
    pub fn new(
        client: kube::Client,
        clock: Arc<dyn Clock>,
        metrics: Option<crate::server::SharedMetrics>,
    ) -> Self {
        Context {
            client,
            clock,
            http: reqwest::Client::new(),
            metrics,
        }
    }

    #[cfg(test)]
    #[allow(clippy::unwrap_used)] // Test helper - panicking is acceptable
    pub fn new_mock() -> Self {
        // The client is never exercised in unit tests; it only has to exist
        let mut config = kube::Config::new("https://localhost:8080".parse().unwrap());
        config.default_namespace = "default".to_string();
        config.accept_invalid_certs = true;
        let client = kube::Client::try_from(config).unwrap();

        Context {
            client,
            clock: Arc::new(crate::controller::clock::SystemClock),
            http: reqwest::Client::new(),
            metrics: None,
        }
    }
}

/// Reconcile a Rollout resource
///
/// One level-triggered pass: resolve the effective weight from the current
/// step index, scale the stable/new ReplicaSets under the surge and
/// unavailability budgets, push the weight to every configured traffic
/// backend, consult the gating analysis run, then advance the step index
/// and patch status. Everything is re-derived from the object snapshot;
/// nothing is carried between passes.
///
/// # Returns
/// * `Ok(Action)` - requeue action derived from the rollout state
/// * `Err(ReconcileError)` - transient failure, requeued with backoff
pub async fn reconcile(rollout: Arc<Rollout>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    let start_time = std::time::Instant::now();

    let namespace = rollout
        .namespace()
        .ok_or(ReconcileError::MissingNamespace)?;
    let name = rollout.name_any();
    let now = ctx.clock.now();

    info!(rollout = ?name, namespace = ?namespace, "Reconciling Rollout");

    // Validation failures are permanent: surface as Degraded, never retry
    if let Err(validation_error) = validate_rollout(&rollout) {
        error!(rollout = ?name, error = %validation_error, "Rollout spec validation failed");
        let degraded = RolloutStatus {
            phase: Some(Phase::Degraded),
            message: Some(validation_error),
            ..rollout.status.clone().unwrap_or_default()
        };
        patch_rollout_status(&ctx, &namespace, &name, &degraded).await?;
        if let Some(ref metrics) = ctx.metrics {
            metrics.record_reconciliation_error("rollout", start_time.elapsed().as_secs_f64());
        }
        return Ok(Action::await_change());
    }

    let pod_template_hash = compute_pod_template_hash(&rollout.spec.template)?;
    let stable_hash = rollout
        .status
        .as_ref()
        .and_then(|s| s.stable_hash.clone());

    // --- Replica scaling -------------------------------------------------
    // The weight in effect right now, before any step advancement
    let effective_weight = desired_weight(&rollout);
    let max_weight = max_traffic_weight(&rollout);

    let rs_api: Api<ReplicaSet> = Api::namespaced(ctx.client.clone(), &namespace);
    let owned = rs_api
        .list(&ListParams::default().labels(&format!("{}={}", ROLLOUT_LABEL, name)))
        .await?
        .items;
    let (new_rs, stable_rs, older_rss) =
        classify_replicasets(&owned, &pod_template_hash, stable_hash.as_deref());

    let (new_count, stable_count) = calculate_replica_counts(
        rollout.spec.replicas,
        effective_weight,
        max_weight,
        rollout.spec.max_surge.as_deref(),
        rollout.spec.max_unavailable.as_deref(),
        new_rs,
        stable_rs,
        &older_rss,
    );
    debug!(
        rollout = ?name,
        weight = effective_weight,
        new_count = new_count,
        stable_count = stable_count,
        "Computed replica counts"
    );

    let desired_new_rs = build_replicaset(&rollout, &pod_template_hash, new_count)?;
    ensure_replicaset_scaled(&rs_api, &desired_new_rs, new_count).await?;

    if let Some(stable) = stable_rs {
        // The stable set keeps its old template; only its scale moves
        scale_replicaset(&rs_api, stable, stable_count).await?;
    }

    // Superseded sets carry no traffic and drain to zero
    for old_rs in &older_rss {
        scale_replicaset(&rs_api, old_rs, 0).await?;
    }

    // --- Traffic routing -------------------------------------------------
    let mut traffic_verified = true;
    let reconcilers = build_reconcilers(&rollout, &namespace, ctx.client.clone());
    for mut reconciler in reconcilers {
        let backend = reconciler.type_name();
        reconciler.update_hash(
            &pod_template_hash,
            stable_hash.as_deref().unwrap_or(&pod_template_hash),
            &[],
        );

        let outcome =
            match tokio::time::timeout(TRAFFIC_TIMEOUT, reconciler.set_weight(effective_weight, &[]))
                .await
            {
                Ok(result) => result,
                Err(_) => {
                    return Err(ReconcileError::TrafficTimeout {
                        backend,
                        timeout: TRAFFIC_TIMEOUT,
                    })
                }
            };
        match outcome {
            Ok(outcome) => {
                debug!(rollout = ?name, backend = backend, outcome = ?outcome, "Weight reconciled");
            }
            Err(e) if e.is_permanent() => {
                // Malformed or missing managed resource: fail closed
                error!(rollout = ?name, backend = backend, error = %e, "Traffic resource invalid");
                let degraded = RolloutStatus {
                    phase: Some(Phase::Degraded),
                    message: Some(e.to_string()),
                    ..rollout.status.clone().unwrap_or_default()
                };
                patch_rollout_status(&ctx, &namespace, &name, &degraded).await?;
                return Ok(Action::await_change());
            }
            Err(e) => return Err(ReconcileError::TrafficError(e)),
        }

        let verification = match tokio::time::timeout(
            TRAFFIC_TIMEOUT,
            reconciler.verify_weight(effective_weight, &[]),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(ReconcileError::TrafficTimeout {
                    backend,
                    timeout: TRAFFIC_TIMEOUT,
                })
            }
        };
        match verification {
            WeightVerification::Verified | WeightVerification::Unsupported => {}
            WeightVerification::NotVerified => {
                info!(rollout = ?name, backend = backend, "Traffic split not yet observed");
                traffic_verified = false;
            }
        }
    }

    // Owned splits the config no longer references are orphans
    let traffic_routing = rollout
        .spec
        .strategy
        .canary
        .as_ref()
        .and_then(|c| c.traffic_routing.as_ref());
    if let Some(routing) = traffic_routing {
        let configured_split = routing
            .traffic_split
            .as_ref()
            .map(|s| s.name.clone().unwrap_or_else(|| name.clone()));
        gc_orphaned_splits(
            ctx.client.clone(),
            &namespace,
            &name,
            configured_split.as_deref(),
        )
        .await?;
    }

    if !traffic_verified {
        // Hold the step sequence until the backend observes the split
        if let Some(ref metrics) = ctx.metrics {
            metrics.record_reconciliation_success("rollout", start_time.elapsed().as_secs_f64());
        }
        return Ok(Action::requeue(Duration::from_secs(5)));
    }

    // --- Analysis gate ---------------------------------------------------
    let verdict = match current_step_verdict(&rollout, &ctx, &pod_template_hash).await {
        Ok(verdict) => verdict,
        Err(ReconcileError::ValidationError(message)) => {
            // Missing/invalid template is permanent; degrade instead of retrying
            error!(rollout = ?name, error = %message, "Analysis configuration invalid");
            let degraded = RolloutStatus {
                phase: Some(Phase::Degraded),
                message: Some(message),
                ..rollout.status.clone().unwrap_or_default()
            };
            patch_rollout_status(&ctx, &namespace, &name, &degraded).await?;
            return Ok(Action::await_change());
        }
        Err(e) => return Err(e),
    };

    // --- Step progression ------------------------------------------------
    let had_promote_annotation = has_promote_annotation(&rollout);
    let mut desired_status = compute_desired_status(&rollout, &pod_template_hash, verdict.as_ref(), now);

    // Progress deadline applies to whatever the pass decided
    if let Some(deadline_seconds) = rollout.spec.progress_deadline_seconds {
        if is_progress_deadline_exceeded(&desired_status, deadline_seconds, now) {
            warn!(
                rollout = ?name,
                deadline_seconds = deadline_seconds,
                "Progress deadline exceeded, marking rollout as Failed"
            );
            desired_status = RolloutStatus {
                phase: Some(Phase::Failed),
                current_weight: Some(0),
                message: Some(format!(
                    "Progress deadline exceeded: no progress made in {} seconds",
                    deadline_seconds
                )),
                ..desired_status
            };
        }
    }

    // Observed pod counts ride along on every status write
    desired_status.replicas = owned
        .iter()
        .map(|rs| rs.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0))
        .sum();
    desired_status.ready_replicas = owned
        .iter()
        .map(|rs| {
            rs.status
                .as_ref()
                .and_then(|s| s.ready_replicas)
                .unwrap_or(0)
        })
        .sum();
    desired_status.updated_replicas = new_count;

    // A rollout that stopped progressing terminates its gating run
    if matches!(
        desired_status.phase,
        Some(Phase::Failed) | Some(Phase::Completed)
    ) {
        if let Some(run_name) = rollout
            .status
            .as_ref()
            .and_then(|s| s.current_analysis_run.clone())
        {
            terminate_analysis_run(&ctx, &namespace, &run_name).await?;
            desired_status.current_analysis_run = None;
        }
    }

    let was_paused_before = rollout
        .status
        .as_ref()
        .map(|s| s.phase == Some(Phase::Paused))
        .unwrap_or(false);
    let progressed_due_to_annotation = had_promote_annotation
        && was_paused_before
        && rollout.status.as_ref() != Some(&desired_status);

    if rollout.status.as_ref() != Some(&desired_status) {
        info!(
            rollout = ?name,
            current_step = ?desired_status.current_step_index,
            current_weight = ?desired_status.current_weight,
            phase = ?desired_status.phase,
            "Updating Rollout status"
        );
        patch_rollout_status(&ctx, &namespace, &name, &desired_status).await?;

        if progressed_due_to_annotation {
            remove_promote_annotation(&ctx, &namespace, &name).await;
        }
    }

    let requeue_interval = calculate_requeue_interval_from_rollout(&rollout, &desired_status, now);

    if let Some(ref metrics) = ctx.metrics {
        metrics.record_reconciliation_success("rollout", start_time.elapsed().as_secs_f64());
        if let Some(weight) = desired_status.current_weight {
            metrics.set_traffic_weight(&namespace, &name, weight as i64);
        }
    }

    Ok(Action::requeue(requeue_interval))
}

/// Resolve the verdict gating the current step, creating the analysis run
/// if the step asks for one and none exists yet
async fn current_step_verdict(
    rollout: &Rollout,
    ctx: &Context,
    pod_template_hash: &str,
) -> Result<Option<StepVerdict>, ReconcileError> {
    let status = match &rollout.status {
        Some(status) => status,
        None => return Ok(None),
    };
    if status.canary_hash.as_deref() != Some(pod_template_hash) {
        // The sequence restarts for the new revision; old gates are moot
        return Ok(None);
    }
    if !matches!(status.phase, Some(Phase::Progressing) | Some(Phase::Paused)) {
        return Ok(None);
    }
    let step_index = match status.current_step_index {
        Some(index) => index,
        None => return Ok(None),
    };
    let step = rollout
        .spec
        .strategy
        .canary
        .as_ref()
        .and_then(|c| c.steps.get(step_index as usize));
    let analysis = match step.and_then(|s| s.analysis.as_ref()) {
        Some(analysis) => analysis,
        None => return Ok(None),
    };

    reconcile_step_analysis(rollout, ctx, analysis, step_index, pod_template_hash)
        .await
        .map(Some)
}

async fn patch_rollout_status(
    ctx: &Context,
    namespace: &str,
    name: &str,
    status: &RolloutStatus,
) -> Result<(), ReconcileError> {
    let rollout_api: Api<Rollout> = Api::namespaced(ctx.client.clone(), namespace);
    rollout_api
        .patch_status(
            name,
            &PatchParams::default(),
            &Patch::Merge(&serde_json::json!({ "status": status })),
        )
        .await?;
    Ok(())
}

/// Best-effort removal of the promote annotation after it was consumed
async fn remove_promote_annotation(ctx: &Context, namespace: &str, name: &str) {
    let rollout_api: Api<Rollout> = Api::namespaced(ctx.client.clone(), namespace);
    match rollout_api
        .patch(
            name,
            &PatchParams::default(),
            &Patch::Merge(&serde_json::json!({
                "metadata": {
                    "annotations": {
                        PROMOTE_ANNOTATION: serde_json::Value::Null
                    }
                }
            })),
        )
        .await
    {
        Ok(_) => info!(rollout = ?name, "Promote annotation removed"),
        Err(e) => {
            warn!(error = ?e, rollout = ?name, "Failed to remove promote annotation (non-fatal)")
        }
    }
}
