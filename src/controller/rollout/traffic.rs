use crate::crd::rollout::{CanaryStep, Phase, Rollout};

/// Default total traffic value split between stable and canary
pub const DEFAULT_MAX_WEIGHT: i32 = 100;

/// The configured total traffic value for this rollout (default: 100)
pub fn max_traffic_weight(rollout: &Rollout) -> i32 {
    rollout
        .spec
        .strategy
        .canary
        .as_ref()
        .and_then(|c| c.traffic_routing.as_ref())
        .and_then(|t| t.max_traffic_weight)
        .unwrap_or(DEFAULT_MAX_WEIGHT)
}

/// Resolve the canary weight in effect at a step index
///
/// Reverse-scans the step sequence from `current_step_index` for the last
/// explicit `setWeight` directive. An index at or past the end of the
/// sequence means the rollout is fully promoted and the canary owns the
/// full weight; this also covers a rollout with no steps at all. A step
/// sequence with no weight directive before the current index has
/// committed nothing to the canary yet.
pub fn current_weight(steps: &[CanaryStep], current_step_index: i32, max_weight: i32) -> i32 {
    if current_step_index < 0 {
        return 0;
    }
    if current_step_index as usize >= steps.len() {
        return max_weight;
    }
    for step in steps[..=current_step_index as usize].iter().rev() {
        if let Some(weight) = step.set_weight {
            return weight;
        }
    }
    0
}

/// The weight the traffic backends should carry for this rollout right now
///
/// Derived, never stored: re-computed from the step sequence each pass.
/// A failed (aborted) rollout routes everything back to stable; a rollout
/// without status has not committed any canary traffic yet.
pub fn desired_weight(rollout: &Rollout) -> i32 {
    let max_weight = max_traffic_weight(rollout);

    let status = match &rollout.status {
        Some(status) => status,
        None => return 0,
    };
    if status.phase == Some(Phase::Failed) || status.phase == Some(Phase::Degraded) {
        return 0;
    }
    if status.phase == Some(Phase::Completed) {
        return max_weight;
    }

    let steps = rollout
        .spec
        .strategy
        .canary
        .as_ref()
        .map(|c| c.steps.as_slice())
        .unwrap_or(&[]);

    match status.current_step_index {
        Some(index) => current_weight(steps, index, max_weight),
        None => 0,
    }
}

/// Split a canary weight into (stable_weight, canary_weight)
///
/// The two sides always sum to `max_weight`, except when no stable revision
/// exists, in which case the canary unconditionally receives everything.
pub fn weight_split(canary_weight: i32, max_weight: i32, stable_exists: bool) -> (i32, i32) {
    if !stable_exists {
        return (0, max_weight);
    }
    (max_weight - canary_weight, canary_weight)
}
