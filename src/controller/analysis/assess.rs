//! Measurement and run assessment
//!
//! Pure functions: the run reconciler feeds them the current snapshot and
//! writes back whatever they decide. Counter updates happen in exactly one
//! place (`record_completed`) so the counters stay a projection of the
//! measurement list.

use crate::crd::analysis::{AnalysisPhase, AnalysisRun, Measurement, Metric, MetricResult};
use chrono::{DateTime, Utc};

use super::conditions::evaluate_condition;
use crate::controller::rollout::validation::parse_duration;

/// Measurements kept per metric after a run completes
pub const MEASUREMENT_HISTORY_LIMIT: usize = 10;

/// Decide a measurement's outcome from the measured value
///
/// With only one condition given, the other outcome is its negation. With
/// both given: both satisfied is a contradiction (Error), neither satisfied
/// is Inconclusive.
pub fn assess_measurement_value(metric: &Metric, value: f64) -> (AnalysisPhase, Option<String>) {
    let evaluate = |condition: &str| evaluate_condition(condition, value);

    match (&metric.success_condition, &metric.failure_condition) {
        (None, None) => (AnalysisPhase::Successful, None),
        (Some(success), None) => match evaluate(success) {
            Ok(true) => (AnalysisPhase::Successful, None),
            Ok(false) => (AnalysisPhase::Failed, None),
            Err(e) => (AnalysisPhase::Error, Some(e.to_string())),
        },
        (None, Some(failure)) => match evaluate(failure) {
            Ok(true) => (AnalysisPhase::Failed, None),
            Ok(false) => (AnalysisPhase::Successful, None),
            Err(e) => (AnalysisPhase::Error, Some(e.to_string())),
        },
        (Some(success), Some(failure)) => match (evaluate(success), evaluate(failure)) {
            (Ok(true), Ok(true)) => (
                AnalysisPhase::Error,
                Some("success and failure conditions both satisfied".to_string()),
            ),
            (Ok(true), Ok(false)) => (AnalysisPhase::Successful, None),
            (Ok(false), Ok(true)) => (AnalysisPhase::Failed, None),
            (Ok(false), Ok(false)) => (AnalysisPhase::Inconclusive, None),
            (Err(e), _) | (_, Err(e)) => (AnalysisPhase::Error, Some(e.to_string())),
        },
    }
}

/// Fold a finalized measurement into the metric's counters
///
/// `consecutiveError` resets on any non-Error outcome.
pub fn record_completed(result: &mut MetricResult, measurement: &Measurement) {
    result.count += 1;
    match measurement.phase {
        AnalysisPhase::Successful => {
            result.successful += 1;
            result.consecutive_error = 0;
        }
        AnalysisPhase::Failed => {
            result.failed += 1;
            result.consecutive_error = 0;
        }
        AnalysisPhase::Inconclusive => {
            result.inconclusive += 1;
            result.consecutive_error = 0;
        }
        AnalysisPhase::Error => {
            result.error += 1;
            result.consecutive_error += 1;
        }
        AnalysisPhase::Pending | AnalysisPhase::Running => {}
    }
    if let Some(message) = &measurement.message {
        result.message = Some(message.clone());
    }
}

/// The measurement currently in flight for a metric, if any
pub fn in_flight_measurement(result: &MetricResult) -> Option<&Measurement> {
    result
        .measurements
        .last()
        .filter(|m| !m.phase.is_terminal())
}

/// Whether the metric has taken every measurement it is going to take
///
/// An absent count means unbounded: the metric only stops via a limit or
/// explicit termination.
pub fn metric_finished(metric: &Metric, result: &MetricResult) -> bool {
    if in_flight_measurement(result).is_some() {
        return false;
    }
    match metric.count {
        Some(count) => result.count >= count,
        None => false,
    }
}

/// Aggregate status of a single metric
///
/// Once a limit is reached the status is terminal and never improves
/// (monotone non-improving within a run). A metric that completed its
/// count without tripping a limit is Successful.
pub fn assess_metric_status(metric: &Metric, result: &MetricResult) -> AnalysisPhase {
    if result.phase.is_terminal() {
        return result.phase;
    }
    if result.failed >= metric.failure_limit() {
        return AnalysisPhase::Failed;
    }
    if result.inconclusive >= metric.inconclusive_limit() {
        return AnalysisPhase::Inconclusive;
    }
    if result.consecutive_error >= metric.consecutive_error_limit() {
        return AnalysisPhase::Error;
    }
    if metric_finished(metric, result) {
        return AnalysisPhase::Successful;
    }
    if result.count > 0 || in_flight_measurement(result).is_some() {
        AnalysisPhase::Running
    } else {
        AnalysisPhase::Pending
    }
}

/// Aggregate status of the whole run
///
/// A terminal-bad metric completes the run immediately, bypassing the
/// remaining scheduled measurements of every other metric. Otherwise the
/// run keeps Running until every metric finished, and the final status is
/// the worst terminal status recorded. Under explicit termination the
/// still-running metrics simply stop counting.
pub fn calculate_run_status(
    run: &AnalysisRun,
    assessed: &[(AnalysisPhase, Option<String>)],
) -> (AnalysisPhase, Option<String>) {
    let terminating = run.spec.terminate;

    let mut worst = AnalysisPhase::Successful;
    let mut worst_message = None;
    let mut everything_terminal = true;

    for (phase, message) in assessed {
        if phase.is_terminal() {
            if worst.is_worse(*phase) {
                worst = *phase;
                worst_message = message.clone();
            }
        } else {
            everything_terminal = false;
        }
    }

    if worst != AnalysisPhase::Successful {
        // Failed/Error/Inconclusive propagates immediately
        return (worst, worst_message);
    }
    if everything_terminal || terminating {
        return (AnalysisPhase::Successful, None);
    }
    (AnalysisPhase::Running, None)
}

fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Whether a new measurement is due for this metric
///
/// Initial delay counts from the run start; the interval counts from the
/// previous measurement's finish. Metrics with an in-flight measurement,
/// a reached count, or a terminal status never take another one.
pub fn should_take_measurement(
    metric: &Metric,
    result: &MetricResult,
    run_started_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> bool {
    time_until_next_measurement(metric, result, run_started_at, now)
        .map(|wait| wait.is_zero())
        .unwrap_or(false)
}

/// Time until the next measurement is due, or None when none is coming
///
/// Zero means due now. The run reconciler requeues at the smallest
/// non-zero value across its metrics.
pub fn time_until_next_measurement(
    metric: &Metric,
    result: &MetricResult,
    run_started_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<std::time::Duration> {
    if result.phase.is_terminal() || in_flight_measurement(result).is_some() {
        return None;
    }
    if metric_finished(metric, result) {
        return None;
    }

    if result.count == 0 {
        if let Some(delay) = metric.initial_delay.as_deref().and_then(parse_duration) {
            let due = run_started_at + chrono::Duration::from_std(delay).ok()?;
            if now < due {
                return Some((due - now).to_std().ok()?);
            }
        }
        return Some(std::time::Duration::ZERO);
    }

    let interval = match metric.interval.as_deref().and_then(parse_duration) {
        Some(interval) => interval,
        // count == 1 needs no interval; any further measurement is due now
        None => return Some(std::time::Duration::ZERO),
    };

    let last_finished = result
        .measurements
        .last()
        .and_then(|m| m.finished_at.as_deref())
        .and_then(parse_rfc3339);

    match last_finished {
        Some(finished) => {
            let due = finished + chrono::Duration::from_std(interval).ok()?;
            if now < due {
                Some((due - now).to_std().ok()?)
            } else {
                Some(std::time::Duration::ZERO)
            }
        }
        None => Some(std::time::Duration::ZERO),
    }
}
