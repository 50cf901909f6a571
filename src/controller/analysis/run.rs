//! AnalysisRun reconciler
//!
//! Level-triggered: each pass re-derives everything from the current run
//! snapshot. No task ever blocks waiting for a measurement: the pass takes
//! or resumes whatever is due, writes status, and requeues at the next due
//! time.

use crate::controller::rollout::{Context, ReconcileError};
use crate::crd::analysis::{AnalysisPhase, AnalysisRun, AnalysisRunStatus, MetricResult};
use chrono::{DateTime, Utc};
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::assess::{
    assess_metric_status, calculate_run_status, in_flight_measurement, record_completed,
    should_take_measurement, time_until_next_measurement, MEASUREMENT_HISTORY_LIMIT,
};
use super::provider::resolve_provider;
use super::validation::validate_metrics;

const MIN_REQUEUE: Duration = Duration::from_secs(1);
const MAX_REQUEUE: Duration = Duration::from_secs(300);
const DEFAULT_REQUEUE: Duration = Duration::from_secs(10);

/// Reconcile an AnalysisRun
///
/// Validates the metric set, resumes or takes whatever measurements are
/// due, aggregates per-metric statuses into the run verdict, and requeues
/// at the earliest next measurement. Completion terminates in-flight
/// measurements through their providers so external side effects do not
/// leak.
pub async fn reconcile_analysis_run(
    run: Arc<AnalysisRun>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let namespace = run.namespace().ok_or(ReconcileError::MissingNamespace)?;
    let name = run.name_any();
    let now = ctx.clock.now();

    let previous_phase = run.status.as_ref().map(|s| s.phase).unwrap_or_default();
    if previous_phase.is_terminal() {
        debug!(run = ?name, phase = ?previous_phase, "Analysis run already terminal");
        return Ok(Action::await_change());
    }

    // Fatal configuration errors end the run before any measurement
    if let Err(message) = validate_metrics(&run.spec.metrics) {
        warn!(run = ?name, error = %message, "Analysis run spec invalid");
        let status = AnalysisRunStatus {
            phase: AnalysisPhase::Error,
            message: Some(message),
            started_at: Some(now.to_rfc3339()),
            completed_at: Some(now.to_rfc3339()),
            ..run.status.clone().unwrap_or_default()
        };
        patch_run_status(&ctx, &namespace, &name, &status).await?;
        return Ok(Action::await_change());
    }

    let mut status = run.status.clone().unwrap_or_default();
    if status.started_at.is_none() {
        status.started_at = Some(now.to_rfc3339());
    }
    let run_started = status
        .started_at
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now);

    let terminating = run.spec.terminate;
    let mut assessed: Vec<(AnalysisPhase, Option<String>)> = Vec::new();

    for metric in &run.spec.metrics {
        let index = match status.metric_results.iter().position(|r| r.name == metric.name) {
            Some(index) => index,
            None => {
                status.metric_results.push(MetricResult {
                    name: metric.name.clone(),
                    phase: AnalysisPhase::Pending,
                    ..Default::default()
                });
                status.metric_results.len() - 1
            }
        };

        let provider = match resolve_provider(metric, &ctx.http) {
            Ok(provider) => provider,
            Err(e) => {
                let result = &mut status.metric_results[index];
                result.phase = AnalysisPhase::Error;
                result.message = Some(e.to_string());
                assessed.push((AnalysisPhase::Error, result.message.clone()));
                continue;
            }
        };

        let result = &mut status.metric_results[index];
        if result.metadata.is_none() {
            result.metadata = provider.get_metadata(metric);
        }

        if result.phase.is_terminal() {
            assessed.push((result.phase, result.message.clone()));
            continue;
        }

        if in_flight_measurement(result).is_some() {
            // Resume (or cancel, when terminating) the open measurement
            let open = result
                .measurements
                .last()
                .cloned()
                .unwrap_or_default();
            let updated = if terminating {
                provider.terminate(&run, metric, open, now).await
            } else {
                provider.resume(&run, metric, open, now).await
            };
            let finalized = updated.phase.is_terminal();
            if let Some(last) = result.measurements.last_mut() {
                *last = updated.clone();
            }
            if finalized {
                record_completed(result, &updated);
            }
        } else if !terminating && should_take_measurement(metric, result, run_started, now) {
            let measurement = provider.run(&run, metric, now).await;
            debug!(
                run = ?name,
                metric = %metric.name,
                phase = ?measurement.phase,
                value = ?measurement.value,
                "Measurement taken"
            );
            let finalized = measurement.phase.is_terminal();
            result.measurements.push(measurement.clone());
            if finalized {
                record_completed(result, &measurement);
            }
        }

        result.phase = assess_metric_status(metric, result);
        assessed.push((result.phase, result.message.clone()));
    }

    let (run_phase, run_message) = calculate_run_status(&run, &assessed);
    status.phase = run_phase;
    if run_message.is_some() {
        status.message = run_message;
    }

    if run_phase.is_terminal() {
        status.completed_at = Some(now.to_rfc3339());
        info!(run = ?name, phase = ?run_phase, "Analysis run completed");

        // Cancel whatever is still in flight and trim history
        for metric in &run.spec.metrics {
            let index = match status.metric_results.iter().position(|r| r.name == metric.name) {
                Some(index) => index,
                None => continue,
            };
            let provider = match resolve_provider(metric, &ctx.http) {
                Ok(provider) => provider,
                Err(_) => continue,
            };

            let result = &mut status.metric_results[index];
            if in_flight_measurement(result).is_some() {
                let open = result.measurements.last().cloned().unwrap_or_default();
                let terminated = provider.terminate(&run, metric, open, now).await;
                let finalized = terminated.phase.is_terminal();
                if let Some(last) = result.measurements.last_mut() {
                    *last = terminated.clone();
                }
                if finalized {
                    record_completed(result, &terminated);
                }
            }

            if let Err(e) = provider
                .garbage_collect(&run, metric, MEASUREMENT_HISTORY_LIMIT)
                .await
            {
                warn!(run = ?name, metric = %metric.name, error = %e,
                    "Provider garbage collection failed (non-fatal)");
            }
            if result.measurements.len() > MEASUREMENT_HISTORY_LIMIT {
                let excess = result.measurements.len() - MEASUREMENT_HISTORY_LIMIT;
                result.measurements.drain(..excess);
            }
        }
    }

    if run.status.as_ref() != Some(&status) {
        patch_run_status(&ctx, &namespace, &name, &status).await?;
    }

    if let Some(ref metrics) = ctx.metrics {
        metrics.record_reconciliation_success("analysisrun", 0.0);
    }

    if run_phase.is_terminal() {
        return Ok(Action::await_change());
    }

    // Requeue at the earliest due measurement across all metrics
    let next_due = run
        .spec
        .metrics
        .iter()
        .filter_map(|metric| {
            status
                .metric_results
                .iter()
                .find(|r| r.name == metric.name)
                .and_then(|result| time_until_next_measurement(metric, result, run_started, now))
        })
        .min()
        .unwrap_or(DEFAULT_REQUEUE);

    Ok(Action::requeue(next_due.clamp(MIN_REQUEUE, MAX_REQUEUE)))
}

async fn patch_run_status(
    ctx: &Context,
    namespace: &str,
    name: &str,
    status: &AnalysisRunStatus,
) -> Result<(), ReconcileError> {
    let runs: Api<AnalysisRun> = Api::namespaced(ctx.client.clone(), namespace);
    runs.patch_status(
        name,
        &PatchParams::default(),
        &Patch::Merge(&serde_json::json!({ "status": status })),
    )
    .await?;
    Ok(())
}
