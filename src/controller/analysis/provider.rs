//! Metric provider contract
//!
//! A provider produces one Measurement per call. `run` must be idempotent
//! (no-op / return current state if already started); `resume` polls an
//! in-flight measurement; `terminate` stops one so external side effects
//! do not leak. Providers never propagate measurement failures as errors:
//! a failed call becomes an Error-status measurement that counts toward
//! the metric's consecutive-error limit.

use crate::crd::analysis::{AnalysisRun, Argument, Measurement, Metric};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("metric {0:?} specifies no provider")]
    NoProvider(String),

    #[error("metric {0:?} specifies multiple providers")]
    MultipleProviders(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("failed to parse provider response: {0}")]
    Parse(String),

    #[error("no data returned")]
    NoData,

    #[error("unresolved argument {0:?}")]
    UnresolvedArgument(String),
}

#[async_trait]
pub trait MetricProvider: Send + Sync {
    /// Stable identifier used for logging and metadata only
    fn type_name(&self) -> &'static str;

    /// Start (or idempotently re-enter) a measurement
    async fn run(&self, run: &AnalysisRun, metric: &Metric, now: DateTime<Utc>) -> Measurement;

    /// Poll an in-flight measurement for completion
    async fn resume(
        &self,
        run: &AnalysisRun,
        metric: &Metric,
        measurement: Measurement,
        now: DateTime<Utc>,
    ) -> Measurement;

    /// Stop an in-flight measurement
    async fn terminate(
        &self,
        run: &AnalysisRun,
        metric: &Metric,
        measurement: Measurement,
        now: DateTime<Utc>,
    ) -> Measurement;

    /// Clean up external artifacts beyond the retention limit
    async fn garbage_collect(
        &self,
        run: &AnalysisRun,
        metric: &Metric,
        limit: usize,
    ) -> Result<(), ProviderError>;

    /// Provider-specific metadata recorded on the metric result
    fn get_metadata(&self, metric: &Metric) -> Option<BTreeMap<String, String>>;
}

/// Select the provider configured on a metric
///
/// Validation guarantees exactly one backend is set; the error arms guard
/// against a run that slipped past admission.
pub fn resolve_provider(
    metric: &Metric,
    http: &reqwest::Client,
) -> Result<Box<dyn MetricProvider>, ProviderError> {
    match (&metric.provider.prometheus, &metric.provider.web) {
        (Some(prometheus), None) => Ok(Box::new(super::prometheus::PrometheusProvider::new(
            http.clone(),
            prometheus.clone(),
        ))),
        (None, Some(web)) => Ok(Box::new(super::web::WebProvider::new(
            http.clone(),
            web.clone(),
        ))),
        (None, None) => Err(ProviderError::NoProvider(metric.name.clone())),
        _ => Err(ProviderError::MultipleProviders(metric.name.clone())),
    }
}

/// Substitute `{{args.<name>}}` placeholders from run arguments
///
/// A placeholder with no matching argument (or an argument without a
/// value) is an error: silently measuring the wrong query is worse than
/// failing loudly.
pub fn resolve_args(template: &str, args: &[Argument]) -> Result<String, ProviderError> {
    let mut resolved = template.to_string();
    for arg in args {
        if let Some(value) = &arg.value {
            resolved = resolved.replace(&format!("{{{{args.{}}}}}", arg.name), value);
        }
    }
    if let Some(start) = resolved.find("{{args.") {
        let rest = &resolved[start..];
        let placeholder = rest.split("}}").next().unwrap_or(rest);
        return Err(ProviderError::UnresolvedArgument(format!(
            "{}}}}}",
            placeholder
        )));
    }
    Ok(resolved)
}

/// A fresh in-flight measurement stamped with its start time
pub fn new_measurement(now: DateTime<Utc>) -> Measurement {
    Measurement {
        phase: crate::crd::analysis::AnalysisPhase::Running,
        started_at: Some(now.to_rfc3339()),
        ..Default::default()
    }
}

/// Finalize a measurement with an outcome and finish time
pub fn finish_measurement(
    mut measurement: Measurement,
    phase: crate::crd::analysis::AnalysisPhase,
    message: Option<String>,
    now: DateTime<Utc>,
) -> Measurement {
    measurement.phase = phase;
    measurement.message = message;
    measurement.finished_at = Some(now.to_rfc3339());
    measurement
}


#[cfg(test)]
mod tests {
    use super::*;

    fn arg(name: &str, value: &str) -> Argument {
        Argument {
            name: name.to_string(),
            value: Some(value.to_string()),
        }
    }

    #[test]
    fn test_resolve_args_substitutes_placeholders() {
        let resolved = resolve_args(
            "rate(errors{service=\"{{args.service}}\"}[{{args.window}}])",
            &[arg("service", "checkout"), arg("window", "5m")],
        )
        .unwrap();
        assert_eq!(resolved, "rate(errors{service=\"checkout\"}[5m])");
    }

    #[test]
    fn test_resolve_args_unresolved_placeholder_is_an_error() {
        let err = resolve_args("up{job=\"{{args.job}}\"}", &[]).unwrap_err();
        assert!(matches!(err, ProviderError::UnresolvedArgument(_)));
        assert!(err.to_string().contains("args.job"));
    }

    #[test]
    fn test_resolve_args_no_placeholders() {
        assert_eq!(resolve_args("vector(1)", &[]).unwrap(), "vector(1)");
    }
}
