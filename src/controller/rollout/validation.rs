use crate::crd::rollout::Rollout;
use std::time::Duration;

use super::traffic::max_traffic_weight;

/// Validate a Rollout specification
///
/// Covers the runtime constraints the CRD schema cannot express. Shared by
/// the reconcile loop and the validating admission webhook, so a rejected
/// spec carries the same message in both places.
///
/// Validation failures are permanent: the reconciler surfaces them as a
/// Degraded phase and does not retry.
pub fn validate_rollout(rollout: &Rollout) -> Result<(), String> {
    if rollout.spec.replicas < 0 {
        return Err(format!(
            "spec.replicas must be >= 0, got {}",
            rollout.spec.replicas
        ));
    }

    let canary = match &rollout.spec.strategy.canary {
        Some(canary) => canary,
        None => return Err("spec.strategy.canary is required".to_string()),
    };

    if canary.canary_service.is_empty() {
        return Err("spec.strategy.canary.canaryService cannot be empty".to_string());
    }
    if canary.stable_service.is_empty() {
        return Err("spec.strategy.canary.stableService cannot be empty".to_string());
    }

    let max_weight = max_traffic_weight(rollout);
    if max_weight <= 0 {
        return Err(format!(
            "spec.strategy.canary.trafficRouting.maxTrafficWeight must be > 0, got {}",
            max_weight
        ));
    }

    for (i, step) in canary.steps.iter().enumerate() {
        let directives = [
            step.set_weight.is_some(),
            step.pause.is_some(),
            step.analysis.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();
        if directives != 1 {
            return Err(format!(
                "steps[{}] must set exactly one of setWeight, pause or analysis",
                i
            ));
        }

        if let Some(weight) = step.set_weight {
            if !(0..=max_weight).contains(&weight) {
                return Err(format!(
                    "steps[{}].setWeight must be 0-{}, got {}",
                    i, max_weight, weight
                ));
            }
        }

        if let Some(pause) = &step.pause {
            if let Some(duration) = &pause.duration {
                if parse_duration(duration).is_none() {
                    return Err(format!("steps[{}].pause.duration invalid: {}", i, duration));
                }
            }
        }

        if let Some(analysis) = &step.analysis {
            if analysis.template_name.is_empty() {
                return Err(format!("steps[{}].analysis.templateName cannot be empty", i));
            }
        }
    }

    if let Some(traffic_routing) = &canary.traffic_routing {
        if let Some(gateway) = &traffic_routing.gateway_api {
            if gateway.http_route.is_empty() {
                return Err(
                    "spec.strategy.canary.trafficRouting.gatewayAPI.httpRoute cannot be empty"
                        .to_string(),
                );
            }
        }
        if let Some(split) = &traffic_routing.traffic_split {
            if split.name.as_deref() == Some("") {
                return Err(
                    "spec.strategy.canary.trafficRouting.trafficSplit.name cannot be empty"
                        .to_string(),
                );
            }
        }
    }

    if let Some(max_surge) = &rollout.spec.max_surge {
        if !super::replicaset::is_valid_budget_format(max_surge) {
            return Err(format!(
                "spec.maxSurge invalid format '{}': must be percentage (e.g., '25%') or absolute number (e.g., '5')",
                max_surge
            ));
        }
    }

    if let Some(max_unavailable) = &rollout.spec.max_unavailable {
        if !super::replicaset::is_valid_budget_format(max_unavailable) {
            return Err(format!(
                "spec.maxUnavailable invalid format '{}': must be percentage (e.g., '25%') or absolute number (e.g., '0')",
                max_unavailable
            ));
        }
    }

    if let Some(deadline) = rollout.spec.progress_deadline_seconds {
        if deadline < 0 {
            return Err(format!(
                "spec.progressDeadlineSeconds must be >= 0, got {}",
                deadline
            ));
        }
    }

    Ok(())
}

/// Parse a duration string like "30s", "5m" or "2h"
///
/// Zero durations are rejected, as are values past sane ceilings (24h in
/// seconds or minutes, one week in hours) which are almost always typos.
pub fn parse_duration(duration_str: &str) -> Option<Duration> {
    let duration_str = duration_str.trim();

    if duration_str.is_empty() {
        return None;
    }

    let unit = duration_str.chars().last()?;
    let number_str = &duration_str[..duration_str.len() - 1];
    let number: u64 = number_str.parse().ok()?;

    if number == 0 {
        return None;
    }

    match unit {
        's' => {
            if number <= 86400 {
                Some(Duration::from_secs(number))
            } else {
                None
            }
        }
        'm' => {
            if number <= 1440 {
                number.checked_mul(60).map(Duration::from_secs)
            } else {
                None
            }
        }
        'h' => {
            if number <= 168 {
                number.checked_mul(3600).map(Duration::from_secs)
            } else {
                None
            }
        }
        _ => None,
    }
}
