use super::reconcile::ReconcileError;
use crate::crd::rollout::Rollout;
use k8s_openapi::api::apps::v1::{ReplicaSet, ReplicaSetSpec};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::{Api, ObjectMeta, Patch, PatchParams, PostParams};
use tracing::{debug, info};

/// Label carrying the pod-template hash that identifies a revision
pub const POD_TEMPLATE_HASH_LABEL: &str = "rollouts.virta.io/pod-template-hash";

/// Label tying a ReplicaSet back to its owning Rollout
pub const ROLLOUT_LABEL: &str = "rollouts.virta.io/rollout";

/// Marker label that keeps Deployment controllers from adopting our sets
pub const MANAGED_LABEL: &str = "rollouts.virta.io/managed";

/// Compute a stable 10-character hash for a PodTemplateSpec
///
/// Serializes the template to JSON and hashes the bytes with FNV-1a,
/// which is deterministic across processes (unlike SipHash).
///
/// # Errors
/// Returns SerializationError if the template cannot be serialized
pub fn compute_pod_template_hash(template: &PodTemplateSpec) -> Result<String, ReconcileError> {
    let json = serde_json::to_string(template)
        .map_err(|e| ReconcileError::SerializationError(e.to_string()))?;

    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in json.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }

    Ok(format!("{hash:x}")[..10].to_string())
}

/// Validate a surge/unavailable budget value
///
/// Accepts a percentage "0%".."100%" or a non-negative integer.
pub(crate) fn is_valid_budget_format(value: &str) -> bool {
    if let Some(percent_str) = value.strip_suffix('%') {
        match percent_str.parse::<i32>() {
            Ok(percent) => (0..=100).contains(&percent),
            Err(_) => false,
        }
    } else {
        match value.parse::<i32>() {
            Ok(abs) => abs >= 0,
            Err(_) => false,
        }
    }
}

/// Resolve a surge budget ("25%" or "5") to an absolute pod count
///
/// Percentages round up against `replicas`. Malformed or out-of-range
/// values resolve to 0 (validation rejects them before this point).
pub fn resolve_surge(value: Option<&str>, replicas: i32) -> i32 {
    resolve_budget(value.unwrap_or("25%"), replicas, true)
}

/// Resolve an unavailability budget ("25%" or "1") to an absolute pod count
///
/// Percentages round down against `replicas`, so availability is never
/// overestimated.
pub fn resolve_unavailable(value: Option<&str>, replicas: i32) -> i32 {
    resolve_budget(value.unwrap_or("0"), replicas, false)
}

fn resolve_budget(value: &str, replicas: i32, round_up: bool) -> i32 {
    if let Some(percent_str) = value.strip_suffix('%') {
        match percent_str.parse::<i32>() {
            Ok(percent) if (0..=100).contains(&percent) => {
                let scaled = replicas * percent;
                if round_up {
                    ceil_div(scaled, 100)
                } else {
                    scaled / 100
                }
            }
            _ => 0,
        }
    } else {
        match value.parse::<i32>() {
            Ok(abs) if abs >= 0 => abs,
            _ => 0,
        }
    }
}

fn ceil_div(numerator: i32, denominator: i32) -> i32 {
    if numerator <= 0 {
        return 0;
    }
    (numerator + denominator - 1) / denominator
}

/// End-state replica counts for the weight split
///
/// Both sides round up, so the desired counts sum to `replicas` or
/// `replicas + 1` (one extra unit at most, when the split is uneven).
/// A rollout with no distinct stable revision collapses to a single-variant
/// takeover: the new set owns every replica.
pub fn desired_replica_counts(
    replicas: i32,
    weight: i32,
    max_weight: i32,
    stable_exists: bool,
) -> (i32, i32) {
    if !stable_exists {
        return (replicas, 0);
    }
    let desired_new = ceil_div(replicas * weight, max_weight);
    let desired_stable = ceil_div(replicas * (max_weight - weight), max_weight);
    (desired_new, desired_stable)
}

fn spec_replicas(rs: Option<&ReplicaSet>) -> i32 {
    rs.and_then(|rs| rs.spec.as_ref())
        .and_then(|s| s.replicas)
        .unwrap_or(0)
}

fn available_replicas(rs: Option<&ReplicaSet>) -> i32 {
    rs.and_then(|rs| rs.status.as_ref())
        .map(|s| s.available_replicas.unwrap_or(0))
        .unwrap_or(0)
}

/// Replicas a set contributes to scale-down accounting
///
/// A set whose available count already exceeds its spec count is already
/// shrinking; it contributes only its spec count.
fn replicas_for_scale_down(rs: Option<&ReplicaSet>) -> i32 {
    let spec = spec_replicas(rs);
    let available = available_replicas(rs);
    spec.min(available)
}

/// Compute target replica counts for the new and stable ReplicaSets
///
/// Pure function of the rollout spec and the observed set states. Returns
/// `(new_count, stable_count)`.
///
/// The scale-up pass is bounded by `replicas + maxSurge - current total`
/// (plus one extra unit when the weight split double-rounds), preferring
/// the stable set. The scale-down pass is bounded by
/// `current available - (replicas - maxUnavailable)`; available replicas in
/// older, superseded sets are drained before the new or stable set is
/// touched. Neither pass moves a set past its own desired count.
#[allow(clippy::too_many_arguments)]
pub fn calculate_replica_counts(
    replicas: i32,
    weight: i32,
    max_weight: i32,
    max_surge: Option<&str>,
    max_unavailable: Option<&str>,
    new_rs: Option<&ReplicaSet>,
    stable_rs: Option<&ReplicaSet>,
    older_rss: &[ReplicaSet],
) -> (i32, i32) {
    let stable_exists = stable_rs.is_some();
    let (desired_new, desired_stable) =
        desired_replica_counts(replicas, weight, max_weight, stable_exists);

    let surge = resolve_surge(max_surge, replicas);
    let mut unavailable = resolve_unavailable(max_unavailable, replicas);
    if surge == 0 && unavailable == 0 {
        // Zero budget on both sides would deadlock the rollout
        unavailable = 1;
    }

    // An uneven split rounds both desired counts up; grant the extra unit
    // as surge so double-rounding does not starve the budget.
    let extra_surge = if max_weight > 0
        && (replicas * weight) % max_weight != 0
        && (replicas * (max_weight - weight)) % max_weight != 0
    {
        1
    } else {
        0
    };

    let mut new_count = spec_replicas(new_rs);
    let mut stable_count = if stable_exists {
        spec_replicas(stable_rs)
    } else {
        0
    };
    let older_spec_total: i32 = older_rss.iter().map(|rs| spec_replicas(Some(rs))).sum();
    let total_current = new_count + stable_count + older_spec_total;

    // Scale-up pass: stable first, then new, each capped at its desired count
    let mut scale_up = (replicas + surge + extra_surge) - total_current;
    if scale_up > 0 && stable_exists && stable_count < desired_stable {
        let grant = scale_up.min(desired_stable - stable_count);
        stable_count += grant;
        scale_up -= grant;
    }
    if scale_up > 0 && new_count < desired_new {
        new_count = (new_count + scale_up).min(desired_new);
    }

    // Scale-down pass: older sets drain first, then new, then stable
    let min_available = replicas - unavailable;
    let older_available: i32 = older_rss
        .iter()
        .map(|rs| replicas_for_scale_down(Some(rs)))
        .sum();
    let mut scale_down = replicas_for_scale_down(new_rs)
        + if stable_exists {
            replicas_for_scale_down(stable_rs)
        } else {
            0
        }
        + older_available
        - min_available;

    if scale_down <= 0 {
        return (new_count.max(0), stable_count.max(0));
    }
    if scale_down <= older_available {
        // The older sets absorb the whole budget; new/stable wait
        return (new_count.max(0), stable_count.max(0));
    }
    scale_down -= older_available;

    if new_count > desired_new {
        let cut = scale_down.min(new_count - desired_new);
        new_count -= cut;
        scale_down -= cut;
    }
    if stable_exists && scale_down > 0 && stable_count > desired_stable {
        stable_count -= scale_down.min(stable_count - desired_stable);
    }

    (new_count.max(0), stable_count.max(0))
}

/// Build a ReplicaSet for one revision of the Rollout
///
/// Name: `{rollout-name}-{pod-template-hash}`. The hash label identifies
/// the revision; roles (stable/canary) shift over time without renames.
pub fn build_replicaset(
    rollout: &Rollout,
    pod_template_hash: &str,
    replicas: i32,
) -> Result<ReplicaSet, ReconcileError> {
    let rollout_name = rollout
        .metadata
        .name
        .as_ref()
        .ok_or(ReconcileError::MissingName)?;
    let namespace = rollout.metadata.namespace.clone();

    let mut template = rollout.spec.template.clone();
    let mut labels = template
        .metadata
        .as_ref()
        .and_then(|m| m.labels.clone())
        .unwrap_or_default();

    labels.insert(
        POD_TEMPLATE_HASH_LABEL.to_string(),
        pod_template_hash.to_string(),
    );
    labels.insert(ROLLOUT_LABEL.to_string(), rollout_name.clone());
    labels.insert(MANAGED_LABEL.to_string(), "true".to_string());

    let mut template_metadata = template.metadata.take().unwrap_or_default();
    template_metadata.labels = Some(labels.clone());
    template.metadata = Some(template_metadata);

    let selector = LabelSelector {
        match_labels: Some(labels.clone()),
        ..Default::default()
    };

    Ok(ReplicaSet {
        metadata: ObjectMeta {
            name: Some(format!("{}-{}", rollout_name, pod_template_hash)),
            namespace,
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(ReplicaSetSpec {
            replicas: Some(replicas),
            selector,
            template: Some(template),
            ..Default::default()
        }),
        status: None,
    })
}

/// Ensure a ReplicaSet exists at the given scale (create or patch)
///
/// Idempotent: an existing set at the right scale is left alone.
pub async fn ensure_replicaset_scaled(
    rs_api: &Api<ReplicaSet>,
    rs: &ReplicaSet,
    replicas: i32,
) -> Result<(), ReconcileError> {
    let rs_name = rs
        .metadata
        .name
        .as_ref()
        .ok_or(ReconcileError::ReplicaSetMissingName)?;

    match rs_api.get(rs_name).await {
        Ok(existing) => {
            let current = existing.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);
            if current != replicas {
                info!(
                    replicaset = ?rs_name,
                    current = current,
                    desired = replicas,
                    "Scaling ReplicaSet"
                );
                let scale_patch = serde_json::json!({
                    "spec": { "replicas": replicas }
                });
                rs_api
                    .patch(rs_name, &PatchParams::default(), &Patch::Merge(&scale_patch))
                    .await?;
            } else {
                debug!(
                    replicaset = ?rs_name,
                    replicas = replicas,
                    "ReplicaSet already at desired scale"
                );
            }
        }
        Err(kube::Error::Api(err)) if err.code == 404 => {
            info!(
                replicaset = ?rs_name,
                replicas = replicas,
                "Creating ReplicaSet"
            );
            rs_api.create(&PostParams::default(), rs).await?;
        }
        Err(e) => return Err(ReconcileError::KubeError(e)),
    }

    Ok(())
}

/// Scale an existing ReplicaSet, leaving a missing one alone
///
/// Used for the stable and superseded sets, whose templates this pass does
/// not own; a set that vanished underneath us is not recreated.
pub async fn scale_replicaset(
    rs_api: &Api<ReplicaSet>,
    rs: &ReplicaSet,
    replicas: i32,
) -> Result<(), ReconcileError> {
    let rs_name = rs
        .metadata
        .name
        .as_ref()
        .ok_or(ReconcileError::ReplicaSetMissingName)?;
    let current = rs.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);
    if current == replicas {
        return Ok(());
    }

    info!(
        replicaset = ?rs_name,
        current = current,
        desired = replicas,
        "Scaling ReplicaSet"
    );
    let scale_patch = serde_json::json!({
        "spec": { "replicas": replicas }
    });
    match rs_api
        .patch(rs_name, &PatchParams::default(), &Patch::Merge(&scale_patch))
        .await
    {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(err)) if err.code == 404 => {
            debug!(replicaset = ?rs_name, "ReplicaSet gone before scaling; skipping");
            Ok(())
        }
        Err(e) => Err(ReconcileError::KubeError(e)),
    }
}

/// Partition the Rollout's ReplicaSets into (new, stable, older)
///
/// Classification is by the pod-template-hash label against the hashes in
/// the Rollout status; anything with neither hash is a superseded set.
pub fn classify_replicasets<'a>(
    all: &'a [ReplicaSet],
    canary_hash: &str,
    stable_hash: Option<&str>,
) -> (
    Option<&'a ReplicaSet>,
    Option<&'a ReplicaSet>,
    Vec<ReplicaSet>,
) {
    let hash_of = |rs: &ReplicaSet| -> Option<String> {
        rs.metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(POD_TEMPLATE_HASH_LABEL))
            .cloned()
    };

    let mut new_rs = None;
    let mut stable_rs = None;
    let mut older = Vec::new();

    for rs in all {
        match hash_of(rs) {
            Some(h) if h == canary_hash => new_rs = Some(rs),
            Some(h) if Some(h.as_str()) == stable_hash => stable_rs = Some(rs),
            _ => older.push(rs.clone()),
        }
    }

    (new_rs, stable_rs, older)
}
