use crate::crd::analysis::Metric;
use std::collections::HashSet;

use super::conditions::validate_condition;
use crate::controller::rollout::validation::parse_duration;

/// Validate an analysis metric list
///
/// Fatal configuration errors are rejected here, before any run is created:
/// duplicate metric names, a count the limits could never reach, a missing
/// interval on repeated metrics, and provider config that is absent or
/// ambiguous. Shared by the admission webhook and the run reconciler.
pub fn validate_metrics(metrics: &[Metric]) -> Result<(), String> {
    if metrics.is_empty() {
        return Err("analysis requires at least one metric".to_string());
    }

    let mut names = HashSet::new();
    for metric in metrics {
        if metric.name.is_empty() {
            return Err("metric name cannot be empty".to_string());
        }
        if !names.insert(metric.name.as_str()) {
            return Err(format!("duplicate metric name {:?}", metric.name));
        }

        let provider_count = [
            metric.provider.prometheus.is_some(),
            metric.provider.web.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();
        match provider_count {
            0 => {
                return Err(format!(
                    "metric {:?} specifies no provider",
                    metric.name
                ))
            }
            1 => {}
            _ => {
                return Err(format!(
                    "metric {:?} specifies multiple providers",
                    metric.name
                ))
            }
        }

        if let Some(count) = metric.count {
            if count < 0 {
                return Err(format!("metric {:?} count must be >= 0", metric.name));
            }
            if count > 1 && metric.interval.is_none() {
                return Err(format!(
                    "metric {:?} requires an interval when count > 1",
                    metric.name
                ));
            }
            if count < metric.failure_limit() {
                return Err(format!(
                    "metric {:?} count ({}) is less than failureLimit ({})",
                    metric.name,
                    count,
                    metric.failure_limit()
                ));
            }
            if count < metric.inconclusive_limit() {
                return Err(format!(
                    "metric {:?} count ({}) is less than inconclusiveLimit ({})",
                    metric.name,
                    count,
                    metric.inconclusive_limit()
                ));
            }
        }

        if let Some(interval) = &metric.interval {
            if parse_duration(interval).is_none() {
                return Err(format!(
                    "metric {:?} interval invalid: {}",
                    metric.name, interval
                ));
            }
        }
        if let Some(delay) = &metric.initial_delay {
            if parse_duration(delay).is_none() {
                return Err(format!(
                    "metric {:?} initialDelay invalid: {}",
                    metric.name, delay
                ));
            }
        }

        if let Some(limit) = metric.failure_limit {
            if limit < 0 {
                return Err(format!("metric {:?} failureLimit must be >= 0", metric.name));
            }
        }
        if let Some(limit) = metric.consecutive_error_limit {
            if limit < 1 {
                return Err(format!(
                    "metric {:?} consecutiveErrorLimit must be >= 1",
                    metric.name
                ));
            }
        }

        if let Some(condition) = &metric.success_condition {
            validate_condition(condition).map_err(|e| {
                format!("metric {:?} successCondition invalid: {}", metric.name, e)
            })?;
        }
        if let Some(condition) = &metric.failure_condition {
            validate_condition(condition).map_err(|e| {
                format!("metric {:?} failureCondition invalid: {}", metric.name, e)
            })?;
        }
    }

    Ok(())
}
