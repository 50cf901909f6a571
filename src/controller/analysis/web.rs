//! Generic HTTP metric provider
//!
//! Fetches a JSON body and reads a numeric value out of it via a dotted
//! path. Useful for metric stores without a dedicated provider.

use super::assess::assess_measurement_value;
use super::provider::{
    finish_measurement, new_measurement, resolve_args, MetricProvider, ProviderError,
};
use crate::crd::analysis::{AnalysisPhase, AnalysisRun, Measurement, Metric, WebMetric};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

pub struct WebProvider {
    http: reqwest::Client,
    config: WebMetric,
}

impl WebProvider {
    pub fn new(http: reqwest::Client, config: WebMetric) -> Self {
        Self { http, config }
    }

    async fn fetch(&self, url: &str) -> Result<f64, ProviderError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::Http(format!(
                "endpoint returned {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        extract_value(&body, self.config.json_path.as_deref())
    }
}

/// Navigate a dotted path ("data.score") into a JSON body and read a number
///
/// With no path the body itself must be the number.
pub(crate) fn extract_value(body: &Value, json_path: Option<&str>) -> Result<f64, ProviderError> {
    let mut current = body;
    if let Some(path) = json_path {
        for segment in path.split('.') {
            current = current
                .get(segment)
                .ok_or_else(|| ProviderError::Parse(format!("path segment {:?} not found", segment)))?;
        }
    }
    current
        .as_f64()
        .ok_or_else(|| ProviderError::Parse(format!("value {} is not a number", current)))
}

#[async_trait]
impl MetricProvider for WebProvider {
    fn type_name(&self) -> &'static str {
        "Web"
    }

    async fn run(&self, run: &AnalysisRun, metric: &Metric, now: DateTime<Utc>) -> Measurement {
        let measurement = new_measurement(now);

        let url = match resolve_args(&self.config.url, &run.spec.args) {
            Ok(url) => url,
            Err(e) => {
                return finish_measurement(
                    measurement,
                    AnalysisPhase::Error,
                    Some(e.to_string()),
                    now,
                )
            }
        };

        match self.fetch(&url).await {
            Ok(value) => {
                let (phase, message) = assess_measurement_value(metric, value);
                Measurement {
                    value: Some(value.to_string()),
                    ..finish_measurement(measurement, phase, message, now)
                }
            }
            Err(e) => {
                warn!(metric = %metric.name, error = %e, "Web measurement failed");
                finish_measurement(measurement, AnalysisPhase::Error, Some(e.to_string()), now)
            }
        }
    }

    async fn resume(
        &self,
        _run: &AnalysisRun,
        metric: &Metric,
        measurement: Measurement,
        _now: DateTime<Utc>,
    ) -> Measurement {
        warn!(metric = %metric.name, "Web provider asked to resume a measurement");
        measurement
    }

    async fn terminate(
        &self,
        _run: &AnalysisRun,
        _metric: &Metric,
        measurement: Measurement,
        now: DateTime<Utc>,
    ) -> Measurement {
        finish_measurement(measurement, AnalysisPhase::Successful, None, now)
    }

    async fn garbage_collect(
        &self,
        _run: &AnalysisRun,
        _metric: &Metric,
        _limit: usize,
    ) -> Result<(), ProviderError> {
        Ok(())
    }

    fn get_metadata(&self, _metric: &Metric) -> Option<BTreeMap<String, String>> {
        None
    }
}
