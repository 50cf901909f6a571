use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default number of failed measurements at which a metric fails
pub const DEFAULT_FAILURE_LIMIT: i32 = 1;

/// Default number of inconclusive measurements at which a metric fails
pub const DEFAULT_INCONCLUSIVE_LIMIT: i32 = 1;

/// Default number of back-to-back errored measurements at which a metric
/// is marked Error
pub const DEFAULT_CONSECUTIVE_ERROR_LIMIT: i32 = 4;

/// AnalysisTemplate is a reusable, named set of metric definitions
///
/// A canary step references a template by name; the controller instantiates
/// it into an AnalysisRun, substituting step arguments into metric queries.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "virta.io",
    version = "v1alpha1",
    kind = "AnalysisTemplate",
    namespaced
)]
pub struct AnalysisTemplateSpec {
    /// Metrics to evaluate
    #[serde(default)]
    pub metrics: Vec<Metric>,

    /// Declared arguments; step-supplied values override declared defaults
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Argument>,
}

/// AnalysisRun is a bounded execution of one or more metric evaluations
///
/// Owned by exactly one Rollout reconciliation. Terminal once its phase is
/// Successful, Failed, Error or Inconclusive; superseded runs are garbage
/// collected outside this controller.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "virta.io",
    version = "v1alpha1",
    kind = "AnalysisRun",
    namespaced,
    status = "AnalysisRunStatus",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct AnalysisRunSpec {
    /// Metrics to evaluate
    #[serde(default)]
    pub metrics: Vec<Metric>,

    /// Resolved arguments available to metric queries as `{{args.<name>}}`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Argument>,

    /// Request early completion; in-flight measurements are terminated
    #[serde(default)]
    pub terminate: bool,
}

/// Named argument for query substitution
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct Argument {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// A single metric to measure repeatedly during a run
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
pub struct Metric {
    /// Metric name, unique within the run
    pub name: String,

    /// How many measurements to take. Absent means unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<i32>,

    /// Time between measurements (e.g. "30s"). Required when count > 1.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,

    /// Delay before the first measurement (e.g. "1m")
    #[serde(rename = "initialDelay", skip_serializing_if = "Option::is_none")]
    pub initial_delay: Option<String>,

    /// Number of failed measurements at which the metric fails (default: 1)
    #[serde(rename = "failureLimit", skip_serializing_if = "Option::is_none")]
    pub failure_limit: Option<i32>,

    /// Number of inconclusive measurements at which the metric is marked
    /// Inconclusive (default: 1)
    #[serde(
        rename = "inconclusiveLimit",
        skip_serializing_if = "Option::is_none"
    )]
    pub inconclusive_limit: Option<i32>,

    /// Number of back-to-back errored measurements at which the metric is
    /// marked Error (default: 4). Resets on any non-Error measurement.
    #[serde(
        rename = "consecutiveErrorLimit",
        skip_serializing_if = "Option::is_none"
    )]
    pub consecutive_error_limit: Option<i32>,

    /// Condition under which a measurement is successful,
    /// e.g. "result < 0.95"
    #[serde(rename = "successCondition", skip_serializing_if = "Option::is_none")]
    pub success_condition: Option<String>,

    /// Condition under which a measurement fails, e.g. "result >= 0.95"
    #[serde(rename = "failureCondition", skip_serializing_if = "Option::is_none")]
    pub failure_condition: Option<String>,

    /// The provider that produces this metric's values
    pub provider: MetricProviderSpec,
}

impl Metric {
    pub fn failure_limit(&self) -> i32 {
        self.failure_limit.unwrap_or(DEFAULT_FAILURE_LIMIT)
    }

    pub fn inconclusive_limit(&self) -> i32 {
        self.inconclusive_limit.unwrap_or(DEFAULT_INCONCLUSIVE_LIMIT)
    }

    pub fn consecutive_error_limit(&self) -> i32 {
        self.consecutive_error_limit
            .unwrap_or(DEFAULT_CONSECUTIVE_ERROR_LIMIT)
    }
}

/// Provider configuration; exactly one backend must be set
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct MetricProviderSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prometheus: Option<PrometheusMetric>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub web: Option<WebMetric>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
pub struct PrometheusMetric {
    /// Prometheus server address (e.g. "http://prometheus:9090")
    pub address: String,

    /// PromQL instant query; `{{args.<name>}}` placeholders are substituted
    pub query: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
pub struct WebMetric {
    /// URL returning a JSON body; `{{args.<name>}}` placeholders are
    /// substituted
    pub url: String,

    /// Dotted path to the numeric value inside the JSON body
    /// (e.g. "data.score"). Absent means the body itself is the number.
    #[serde(rename = "jsonPath", skip_serializing_if = "Option::is_none")]
    pub json_path: Option<String>,
}

/// Phase of an AnalysisRun, a MetricResult or a Measurement
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema,
)]
pub enum AnalysisPhase {
    #[default]
    Pending,
    Running,
    Successful,
    Failed,
    Error,
    Inconclusive,
}

impl AnalysisPhase {
    /// Whether this phase is terminal (no further measurements)
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AnalysisPhase::Successful
                | AnalysisPhase::Failed
                | AnalysisPhase::Error
                | AnalysisPhase::Inconclusive
        )
    }

    /// Rank used by `is_worse`/`worst`. Strict total order consistent with
    /// Successful < Inconclusive < Error < Failed; the non-terminal phases
    /// sit between Successful and Inconclusive so a running metric never
    /// outweighs a recorded verdict.
    fn worseness(self) -> u8 {
        match self {
            AnalysisPhase::Successful => 0,
            AnalysisPhase::Pending => 1,
            AnalysisPhase::Running => 2,
            AnalysisPhase::Inconclusive => 3,
            AnalysisPhase::Error => 4,
            AnalysisPhase::Failed => 5,
        }
    }

    /// Whether `other` is strictly worse than `self`
    pub fn is_worse(self, other: AnalysisPhase) -> bool {
        other.worseness() > self.worseness()
    }

    /// The worse of the two phases
    pub fn worst(self, other: AnalysisPhase) -> AnalysisPhase {
        if self.is_worse(other) {
            other
        } else {
            self
        }
    }
}

/// Status of an AnalysisRun
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct AnalysisRunStatus {
    #[serde(default)]
    pub phase: AnalysisPhase,

    /// Human-readable explanation of the phase
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Per-metric results, one entry per declared metric
    #[serde(rename = "metricResults", default, skip_serializing_if = "Vec::is_empty")]
    pub metric_results: Vec<MetricResult>,

    /// When the run started (RFC3339)
    #[serde(rename = "startedAt", skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,

    /// When the run reached a terminal phase (RFC3339)
    #[serde(rename = "completedAt", skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

/// Accumulated state of a single metric within a run
///
/// The counters are a cached projection of the measurement list: they are
/// updated in the same place a measurement is finalized and nowhere else.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct MetricResult {
    pub name: String,

    #[serde(default)]
    pub phase: AnalysisPhase,

    /// Measurement history, append-only, trimmed only by garbage collection
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub measurements: Vec<Measurement>,

    /// Human-readable explanation of the phase
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Number of measurements taken
    #[serde(default)]
    pub count: i32,

    #[serde(default)]
    pub successful: i32,

    #[serde(default)]
    pub failed: i32,

    #[serde(default)]
    pub inconclusive: i32,

    #[serde(default)]
    pub error: i32,

    /// Errors recorded back-to-back; resets on any non-Error measurement
    #[serde(rename = "consecutiveError", default)]
    pub consecutive_error: i32,

    /// Provider metadata for the metric as a whole
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
}

/// One sampled data point; immutable once finalized
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct Measurement {
    #[serde(default)]
    pub phase: AnalysisPhase,

    /// String-encoded value returned by the provider
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(rename = "startedAt", skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,

    #[serde(rename = "finishedAt", skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,

    /// When the next poll of an in-flight measurement is due (RFC3339)
    #[serde(rename = "resumeAt", skip_serializing_if = "Option::is_none")]
    pub resume_at: Option<String>,

    /// Provider-specific metadata (e.g. an external job id) used to resume
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
}

#[cfg(test)]
#[path = "analysis_test.rs"]
mod tests;
