use crate::crd::rollout::{CanaryStep, Phase, Rollout, RolloutStatus};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::warn;

use super::analysis::StepVerdict;
use super::traffic::max_traffic_weight;
use super::validation::parse_duration;

/// Annotation that manually promotes a paused rollout
pub const PROMOTE_ANNOTATION: &str = "virta.io/promote";

/// Check if the Rollout carries the promote annotation (virta.io/promote=true)
pub fn has_promote_annotation(rollout: &Rollout) -> bool {
    rollout
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(PROMOTE_ANNOTATION))
        .map(|value| value == "true")
        .unwrap_or(false)
}

fn steps(rollout: &Rollout) -> &[CanaryStep] {
    rollout
        .spec
        .strategy
        .canary
        .as_ref()
        .map(|c| c.steps.as_slice())
        .unwrap_or(&[])
}

/// Check if the progress deadline has been exceeded
///
/// A rollout is stuck when it is Progressing or Paused, has a recorded
/// progress start time, and that start time is further in the past than the
/// configured deadline.
pub fn is_progress_deadline_exceeded(
    status: &RolloutStatus,
    deadline_seconds: i32,
    now: DateTime<Utc>,
) -> bool {
    match &status.phase {
        Some(Phase::Progressing) | Some(Phase::Paused) => {}
        _ => return false,
    }

    let start_time = match &status.progress_started_at {
        Some(t) => t,
        None => return false,
    };

    let started = match DateTime::parse_from_rfc3339(start_time) {
        Ok(dt) => dt.with_timezone(&Utc),
        Err(e) => {
            warn!(error = %e, timestamp = %start_time, "Failed to parse progressStartedAt timestamp");
            return false;
        }
    };

    now.signed_duration_since(started).num_seconds() > deadline_seconds as i64
}

/// Initial status for a Rollout that has never been reconciled
///
/// The first revision has nothing to shift traffic away from: the new set
/// is the stable set, and the step sequence is treated as already walked
/// (single-variant takeover).
pub fn initialize_rollout_status(
    rollout: &Rollout,
    pod_template_hash: &str,
    now: DateTime<Utc>,
) -> RolloutStatus {
    RolloutStatus {
        current_step_index: Some(steps(rollout).len() as i32),
        current_weight: Some(max_traffic_weight(rollout)),
        canary_hash: Some(pod_template_hash.to_string()),
        stable_hash: Some(pod_template_hash.to_string()),
        phase: Some(Phase::Completed),
        message: Some("Initial revision promoted".to_string()),
        progress_started_at: Some(now.to_rfc3339()),
        ..Default::default()
    }
}

/// Status for a Rollout whose pod template changed: restart the sequence
///
/// The previous canary hash is superseded; whatever was promoted last
/// remains the stable revision until this sequence completes.
fn restart_for_new_revision(
    rollout: &Rollout,
    current: &RolloutStatus,
    pod_template_hash: &str,
    now: DateTime<Utc>,
) -> RolloutStatus {
    let first_step = steps(rollout).first();
    let pause_start_time = first_step
        .filter(|step| step.pause.is_some())
        .map(|_| now.to_rfc3339());
    let phase = match first_step {
        Some(step) if step.pause.as_ref().is_some_and(|p| p.duration.is_none()) => Phase::Paused,
        _ => Phase::Progressing,
    };

    RolloutStatus {
        current_step_index: Some(0),
        current_weight: Some(current_weight_at(rollout, 0)),
        canary_hash: Some(pod_template_hash.to_string()),
        stable_hash: current.stable_hash.clone(),
        current_analysis_run: None,
        phase: Some(phase),
        message: Some("Starting canary sequence for new revision".to_string()),
        pause_start_time,
        step_start_time: Some(now.to_rfc3339()),
        progress_started_at: Some(now.to_rfc3339()),
        ..Default::default()
    }
}

fn current_weight_at(rollout: &Rollout, index: i32) -> i32 {
    super::traffic::current_weight(steps(rollout), index, max_traffic_weight(rollout))
}

/// Check if the rollout should advance past its current step
///
/// Weight steps advance as soon as their weight has been applied. Pause
/// steps advance when the duration elapses or the promote annotation is
/// present. Analysis steps advance only on a Successful verdict.
pub fn should_progress_to_next_step(
    rollout: &Rollout,
    verdict: Option<&StepVerdict>,
    now: DateTime<Utc>,
) -> bool {
    let status = match &rollout.status {
        Some(status) => status,
        None => return false,
    };

    let current_step_index = match status.current_step_index {
        Some(idx) => idx,
        None => return false,
    };

    let current_step = match steps(rollout).get(current_step_index as usize) {
        Some(step) => step,
        None => return false, // past the end; nothing left to advance
    };

    if let Some(pause) = &current_step.pause {
        if has_promote_annotation(rollout) {
            return true;
        }

        if let Some(duration_str) = &pause.duration {
            if let Some(duration) = parse_duration(duration_str) {
                if let Some(pause_start_str) = &status.pause_start_time {
                    match DateTime::parse_from_rfc3339(pause_start_str) {
                        Ok(pause_start) => {
                            let elapsed = now.signed_duration_since(pause_start);
                            if elapsed.num_seconds() >= duration.as_secs() as i64 {
                                return true;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, timestamp = %pause_start_str,
                                "Failed to parse pauseStartTime timestamp, treating as still paused");
                        }
                    }
                }
            }
        }
        return false;
    }

    if current_step.analysis.is_some() {
        return matches!(verdict, Some(StepVerdict::Successful { .. }));
    }

    // setWeight step: the weight was applied this pass
    true
}

/// Advance the rollout to its next step
///
/// Entering a pause step records the pause start; reaching the end of the
/// sequence promotes the canary (stable hash catches up to the canary
/// hash and the full weight is committed).
pub fn advance_to_next_step(rollout: &Rollout, now: DateTime<Utc>) -> RolloutStatus {
    let current_status = rollout.status.clone().unwrap_or_default();
    let next_step_index = current_status.current_step_index.unwrap_or(-1) + 1;
    let step_list = steps(rollout);

    if next_step_index as usize >= step_list.len() {
        return RolloutStatus {
            current_step_index: Some(next_step_index),
            current_weight: Some(max_traffic_weight(rollout)),
            stable_hash: current_status.canary_hash.clone(),
            current_analysis_run: None,
            phase: Some(Phase::Completed),
            message: Some("Rollout completed: full traffic on new revision".to_string()),
            pause_start_time: None,
            ..current_status
        };
    }

    let next_step = &step_list[next_step_index as usize];
    let next_weight = current_weight_at(rollout, next_step_index);

    let (phase, pause_start_time) = match &next_step.pause {
        Some(pause) if pause.duration.is_none() => (Phase::Paused, Some(now.to_rfc3339())),
        Some(_) => (Phase::Progressing, Some(now.to_rfc3339())),
        None => (Phase::Progressing, None),
    };

    RolloutStatus {
        current_step_index: Some(next_step_index),
        current_weight: Some(next_weight),
        current_analysis_run: None,
        phase: Some(phase),
        message: Some(format!(
            "Advanced to step {} ({}% traffic)",
            next_step_index, next_weight
        )),
        pause_start_time,
        step_start_time: Some(now.to_rfc3339()),
        ..current_status
    }
}

/// Compute the desired status for a Rollout
///
/// The single entry point reconcile() uses to decide what to write back.
/// Everything is re-derived from the current object snapshot: no state is
/// carried between passes.
pub fn compute_desired_status(
    rollout: &Rollout,
    pod_template_hash: &str,
    verdict: Option<&StepVerdict>,
    now: DateTime<Utc>,
) -> RolloutStatus {
    let current = match &rollout.status {
        Some(status) => status,
        None => return initialize_rollout_status(rollout, pod_template_hash, now),
    };

    // A template change supersedes whatever was in flight, including a
    // Failed sequence: the new revision starts fresh.
    if current.canary_hash.as_deref() != Some(pod_template_hash) {
        return restart_for_new_revision(rollout, current, pod_template_hash, now);
    }

    // Terminal-by-operator phases are sticky until the spec changes
    if current.phase == Some(Phase::Failed) || current.phase == Some(Phase::Degraded) {
        return current.clone();
    }

    if let Some(StepVerdict::Unsuccessful { run, phase }) = verdict {
        return RolloutStatus {
            phase: Some(Phase::Failed),
            current_weight: Some(0),
            message: Some(format!(
                "Rollback triggered: analysis run {} finished {:?}",
                run, phase
            )),
            ..current.clone()
        };
    }

    if should_progress_to_next_step(rollout, verdict, now) {
        return advance_to_next_step(rollout, now);
    }

    // Holding at the current step; keep the gating run name visible
    let mut desired = current.clone();
    if let Some(StepVerdict::Pending { run }) = verdict {
        desired.current_analysis_run = Some(run.clone());
    }
    desired
}

/// Requeue interval derived from the remaining pause time
///
/// Clamped to [5s, 300s]; 30s when nothing is pending.
pub(crate) fn calculate_requeue_interval(
    pause_start: Option<&DateTime<Utc>>,
    pause_duration: Option<Duration>,
    now: DateTime<Utc>,
) -> Duration {
    const MIN_REQUEUE: Duration = Duration::from_secs(5);
    const MAX_REQUEUE: Duration = Duration::from_secs(300);
    const DEFAULT_REQUEUE: Duration = Duration::from_secs(30);

    match (pause_start, pause_duration) {
        (Some(start), Some(duration)) => {
            let elapsed = now.signed_duration_since(*start);
            let elapsed_secs = elapsed.num_seconds().max(0) as u64;
            let remaining_secs = duration.as_secs().saturating_sub(elapsed_secs);
            Duration::from_secs(remaining_secs).clamp(MIN_REQUEUE, MAX_REQUEUE)
        }
        _ => DEFAULT_REQUEUE,
    }
}

/// Extract the pause bookkeeping from a Rollout and compute the requeue
pub(crate) fn calculate_requeue_interval_from_rollout(
    rollout: &Rollout,
    status: &RolloutStatus,
    now: DateTime<Utc>,
) -> Duration {
    let pause_start = status
        .pause_start_time
        .as_ref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let pause_duration = status.current_step_index.and_then(|step_index| {
        steps(rollout)
            .get(step_index as usize)
            .and_then(|step| step.pause.as_ref())
            .and_then(|pause| pause.duration.as_ref())
            .and_then(|dur_str| parse_duration(dur_str))
    });

    calculate_requeue_interval(pause_start.as_ref(), pause_duration, now)
}
