use super::reconcile::{Context, ReconcileError};
use crate::crd::analysis::{
    AnalysisPhase, AnalysisRun, AnalysisRunSpec, AnalysisTemplate, Argument,
};
use crate::crd::rollout::{AnalysisStep, Rollout};
use kube::api::{Api, ObjectMeta, Patch, PatchParams, PostParams};
use kube::ResourceExt;
use tracing::{info, warn};

use super::replicaset::{POD_TEMPLATE_HASH_LABEL, ROLLOUT_LABEL};

/// How many suffixed names to try before giving up on run creation
const MAX_NAME_COLLISIONS: u32 = 20;

/// Verdict of the analysis run gating the current step
#[derive(Debug, Clone, PartialEq)]
pub enum StepVerdict {
    /// Run exists but has not reached a terminal phase
    Pending { run: String },
    /// Run finished Successful; the step may advance
    Successful { run: String },
    /// Run finished worse than Successful; the rollout must abort
    Unsuccessful { run: String, phase: AnalysisPhase },
}

fn verdict_for(run_name: &str, phase: AnalysisPhase) -> StepVerdict {
    match phase {
        AnalysisPhase::Successful => StepVerdict::Successful {
            run: run_name.to_string(),
        },
        AnalysisPhase::Failed | AnalysisPhase::Error | AnalysisPhase::Inconclusive => {
            StepVerdict::Unsuccessful {
                run: run_name.to_string(),
                phase,
            }
        }
        AnalysisPhase::Pending | AnalysisPhase::Running => StepVerdict::Pending {
            run: run_name.to_string(),
        },
    }
}

fn run_phase(run: &AnalysisRun) -> AnalysisPhase {
    run.status.as_ref().map(|s| s.phase).unwrap_or_default()
}

/// Base name for the run gating a step: `{rollout}-{hash}-{step}`
pub fn analysis_run_base_name(rollout_name: &str, pod_template_hash: &str, step_index: i32) -> String {
    format!("{}-{}-{}", rollout_name, pod_template_hash, step_index)
}

/// Merge template-declared arguments with step-supplied overrides
///
/// Step values win by name; template declarations without a step override
/// keep their default value.
pub fn merge_args(declared: &[Argument], supplied: &[Argument]) -> Vec<Argument> {
    let mut merged: Vec<Argument> = declared.to_vec();
    for arg in supplied {
        match merged.iter_mut().find(|a| a.name == arg.name) {
            Some(existing) => existing.value = arg.value.clone(),
            None => merged.push(arg.clone()),
        }
    }
    merged
}

fn build_analysis_run(
    rollout: &Rollout,
    step: &AnalysisStep,
    template: &AnalysisTemplate,
    name: &str,
    pod_template_hash: &str,
) -> AnalysisRun {
    let mut labels = std::collections::BTreeMap::new();
    labels.insert(ROLLOUT_LABEL.to_string(), rollout.name_any());
    labels.insert(
        POD_TEMPLATE_HASH_LABEL.to_string(),
        pod_template_hash.to_string(),
    );

    AnalysisRun {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: rollout.metadata.namespace.clone(),
            labels: Some(labels),
            ..Default::default()
        },
        spec: AnalysisRunSpec {
            metrics: template.spec.metrics.clone(),
            args: merge_args(&template.spec.args, &step.args),
            terminate: false,
        },
        status: None,
    }
}

/// Ensure the analysis run gating this step exists and report its verdict
///
/// Creation is collision-safe: an existing run with the same name that is
/// still non-terminal is adopted as-is (idempotent retry after a half
/// completed pass); a terminal run of the same name forces an incrementing
/// numeric suffix so history is never overwritten.
pub async fn reconcile_step_analysis(
    rollout: &Rollout,
    ctx: &Context,
    step: &AnalysisStep,
    step_index: i32,
    pod_template_hash: &str,
) -> Result<StepVerdict, ReconcileError> {
    let namespace = rollout
        .namespace()
        .ok_or(ReconcileError::MissingNamespace)?;
    let rollout_name = rollout.name_any();
    let runs: Api<AnalysisRun> = Api::namespaced(ctx.client.clone(), &namespace);

    // A run already recorded in status is the gate, whatever its name
    if let Some(existing_name) = rollout
        .status
        .as_ref()
        .and_then(|s| s.current_analysis_run.as_ref())
    {
        match runs.get(existing_name).await {
            Ok(run) => return Ok(verdict_for(existing_name, run_phase(&run))),
            Err(kube::Error::Api(err)) if err.code == 404 => {
                warn!(
                    rollout = ?rollout_name,
                    run = ?existing_name,
                    "Recorded analysis run is gone; creating a replacement"
                );
            }
            Err(e) => return Err(ReconcileError::KubeError(e)),
        }
    }

    let templates: Api<AnalysisTemplate> = Api::namespaced(ctx.client.clone(), &namespace);
    let template = match templates.get(&step.template_name).await {
        Ok(t) => t,
        Err(kube::Error::Api(err)) if err.code == 404 => {
            return Err(ReconcileError::ValidationError(format!(
                "analysis template {:?} not found",
                step.template_name
            )));
        }
        Err(e) => return Err(ReconcileError::KubeError(e)),
    };

    crate::controller::analysis::validate_metrics(&template.spec.metrics)
        .map_err(ReconcileError::ValidationError)?;

    let base_name = analysis_run_base_name(&rollout_name, pod_template_hash, step_index);
    let mut name = base_name.clone();
    for collision in 0..MAX_NAME_COLLISIONS {
        match runs.get(&name).await {
            Ok(run) => {
                let phase = run_phase(&run);
                if !phase.is_terminal() {
                    // Idempotent retry: this run is already doing the work
                    return Ok(verdict_for(&name, phase));
                }
                name = format!("{}.{}", base_name, collision + 1);
            }
            Err(kube::Error::Api(err)) if err.code == 404 => {
                let run = build_analysis_run(rollout, step, &template, &name, pod_template_hash);
                runs.create(&PostParams::default(), &run).await?;
                info!(
                    rollout = ?rollout_name,
                    run = ?name,
                    step = step_index,
                    "Created analysis run"
                );
                return Ok(StepVerdict::Pending { run: name });
            }
            Err(e) => return Err(ReconcileError::KubeError(e)),
        }
    }

    Err(ReconcileError::ValidationError(format!(
        "analysis run name {:?} collided {} times",
        base_name, MAX_NAME_COLLISIONS
    )))
}

/// Request early completion of a still-running analysis run
///
/// Used when the owning rollout aborts or moves on; the run's own
/// reconciler terminates in-flight measurements through the provider.
pub async fn terminate_analysis_run(
    ctx: &Context,
    namespace: &str,
    run_name: &str,
) -> Result<(), ReconcileError> {
    let runs: Api<AnalysisRun> = Api::namespaced(ctx.client.clone(), namespace);
    match runs.get(run_name).await {
        Ok(run) => {
            if run_phase(&run).is_terminal() || run.spec.terminate {
                return Ok(());
            }
            info!(run = ?run_name, "Terminating analysis run");
            runs.patch(
                run_name,
                &PatchParams::default(),
                &Patch::Merge(&serde_json::json!({
                    "spec": { "terminate": true }
                })),
            )
            .await?;
            Ok(())
        }
        Err(kube::Error::Api(err)) if err.code == 404 => Ok(()),
        Err(e) => Err(ReconcileError::KubeError(e)),
    }
}
