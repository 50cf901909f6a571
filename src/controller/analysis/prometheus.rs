//! Prometheus metric provider
//!
//! Issues instant queries against `/api/v1/query` and judges the first
//! returned sample against the metric's conditions.

use super::assess::assess_measurement_value;
use super::provider::{
    finish_measurement, new_measurement, resolve_args, MetricProvider, ProviderError,
};
use crate::crd::analysis::{AnalysisPhase, AnalysisRun, Measurement, Metric, PrometheusMetric};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub struct PrometheusProvider {
    http: reqwest::Client,
    config: PrometheusMetric,
}

impl PrometheusProvider {
    pub fn new(http: reqwest::Client, config: PrometheusMetric) -> Self {
        Self { http, config }
    }

    async fn query(&self, query: &str) -> Result<f64, ProviderError> {
        let url = format!("{}/api/v1/query", self.config.address.trim_end_matches('/'));
        let response = self
            .http
            .get(&url)
            .query(&[("query", query)])
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::Http(format!(
                "Prometheus returned {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;
        parse_instant_query(&body)
    }
}

/// Prometheus instant query response format
#[derive(Debug, Deserialize)]
struct PrometheusResponse {
    status: String,
    data: PrometheusData,
}

#[derive(Debug, Deserialize)]
struct PrometheusData {
    result: Vec<PrometheusResult>,
}

#[derive(Debug, Deserialize)]
struct PrometheusResult {
    value: (f64, String), // [timestamp, value_as_string]
}

/// Extract the first sample value from an instant query response
pub(crate) fn parse_instant_query(json_response: &str) -> Result<f64, ProviderError> {
    let response: PrometheusResponse = serde_json::from_str(json_response)
        .map_err(|e| ProviderError::Parse(format!("invalid JSON: {}", e)))?;

    if response.status != "success" {
        return Err(ProviderError::Http(format!(
            "Prometheus query failed with status: {}",
            response.status
        )));
    }

    let result = response.data.result.first().ok_or(ProviderError::NoData)?;

    result
        .value
        .1
        .parse::<f64>()
        .map_err(|e| ProviderError::Parse(format!("invalid value: {}", e)))
}

#[async_trait]
impl MetricProvider for PrometheusProvider {
    fn type_name(&self) -> &'static str {
        "Prometheus"
    }

    async fn run(&self, run: &AnalysisRun, metric: &Metric, now: DateTime<Utc>) -> Measurement {
        let measurement = new_measurement(now);

        let query = match resolve_args(&self.config.query, &run.spec.args) {
            Ok(query) => query,
            Err(e) => {
                return finish_measurement(
                    measurement,
                    AnalysisPhase::Error,
                    Some(e.to_string()),
                    now,
                )
            }
        };

        match self.query(&query).await {
            Ok(value) => {
                debug!(metric = %metric.name, value = value, "Prometheus measurement");
                let (phase, message) = assess_measurement_value(metric, value);
                Measurement {
                    value: Some(value.to_string()),
                    ..finish_measurement(measurement, phase, message, now)
                }
            }
            Err(e) => {
                warn!(metric = %metric.name, error = %e, "Prometheus measurement failed");
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
        // Instant queries complete synchronously; nothing to poll
        warn!(metric = %metric.name, "Prometheus provider asked to resume a measurement");
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
        // No external artifacts
        Ok(())
    }

    fn get_metadata(&self, _metric: &Metric) -> Option<BTreeMap<String, String>> {
        Some(
            [("resolvedAddress".to_string(), self.config.address.clone())]
                .into_iter()
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_instant_query_with_data() {
        let json_response = r#"{
            "status": "success",
            "data": {
                "resultType": "vector",
                "result": [
                    {
                        "metric": {},
                        "value": [1234567890, "5.2"]
                    }
                ]
            }
        }"#;

        match parse_instant_query(json_response) {
            Ok(value) => assert_eq!(value, 5.2),
            Err(e) => panic!("Should parse valid response, got error: {}", e),
        }
    }

    #[test]
    fn test_parse_instant_query_no_data() {
        let json_response = r#"{
            "status": "success",
            "data": {
                "resultType": "vector",
                "result": []
            }
        }"#;

        let result = parse_instant_query(json_response);
        assert!(matches!(result, Err(ProviderError::NoData)));
    }

    #[test]
    fn test_parse_instant_query_error_status() {
        let json_response = r#"{
            "status": "error",
            "data": { "result": [] }
        }"#;

        let result = parse_instant_query(json_response);
        assert!(matches!(result, Err(ProviderError::Http(_))));
    }

    #[test]
    fn test_parse_instant_query_invalid_json() {
        let result = parse_instant_query("not valid json");
        assert!(matches!(result, Err(ProviderError::Parse(_))));
    }
}
