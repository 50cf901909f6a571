use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Rollout is a Custom Resource for weight-driven progressive delivery
///
/// The controller shifts traffic and replica capacity from the stable
/// revision to the new revision through an ordered step sequence, gating
/// progression on analysis verdicts.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "virta.io",
    version = "v1alpha1",
    kind = "Rollout",
    namespaced,
    status = "RolloutStatus",
    printcolumn = r#"{"name":"Desired", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Step", "type":"integer", "jsonPath":".status.currentStepIndex"}"#,
    printcolumn = r#"{"name":"Weight", "type":"integer", "jsonPath":".status.currentWeight"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct RolloutSpec {
    /// Number of desired pods
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Label selector for pods
    pub selector: LabelSelector,

    /// Template describes the pods that will be created
    pub template: PodTemplateSpec,

    /// Deployment strategy
    pub strategy: RolloutStrategy,

    /// Maximum number of pods that can be scheduled above the desired number
    /// during update. Absolute number (e.g. "5") or percentage (e.g. "25%").
    /// Defaults to "25%" when not specified.
    #[serde(rename = "maxSurge", skip_serializing_if = "Option::is_none")]
    pub max_surge: Option<String>,

    /// Maximum number of pods that can be unavailable during the update.
    /// Absolute number (e.g. "1") or percentage (e.g. "25%").
    /// Defaults to "0" when not specified.
    #[serde(rename = "maxUnavailable", skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<String>,

    /// Maximum time in seconds for the rollout to make progress before it is
    /// considered failed. Defaults to 600 when not specified.
    #[serde(
        rename = "progressDeadlineSeconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub progress_deadline_seconds: Option<i32>,
}

fn default_replicas() -> i32 {
    1
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct RolloutStrategy {
    /// Canary deployment strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canary: Option<CanaryStrategy>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
pub struct CanaryStrategy {
    /// Name of the service that selects canary pods
    #[serde(rename = "canaryService")]
    pub canary_service: String,

    /// Name of the service that selects stable pods
    #[serde(rename = "stableService")]
    pub stable_service: String,

    /// Service port for traffic routing (default: 80)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,

    /// Steps define the canary rollout progression
    #[serde(default)]
    pub steps: Vec<CanaryStep>,

    /// Traffic routing configuration. Every configured backend is reconciled
    /// to the same logical canary weight each pass.
    #[serde(rename = "trafficRouting", skip_serializing_if = "Option::is_none")]
    pub traffic_routing: Option<TrafficRouting>,
}

/// A single canary step: exactly one of setWeight, pause or analysis
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct CanaryStep {
    /// Set the percentage of traffic routed to the canary
    #[serde(rename = "setWeight", skip_serializing_if = "Option::is_none")]
    pub set_weight: Option<i32>,

    /// Pause the rollout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pause: Option<PauseStep>,

    /// Launch an analysis run and gate progression on its verdict
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisStep>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
pub struct PauseStep {
    /// Duration (e.g. "30s", "5m"). If not specified, pauses indefinitely
    /// until manually promoted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
pub struct AnalysisStep {
    /// Name of the AnalysisTemplate to instantiate
    #[serde(rename = "templateName")]
    pub template_name: String,

    /// Arguments substituted into the template's metric queries
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<crate::crd::analysis::Argument>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct TrafficRouting {
    /// Gateway API HTTPRoute backend
    #[serde(rename = "gatewayAPI", skip_serializing_if = "Option::is_none")]
    pub gateway_api: Option<GatewayApiRouting>,

    /// SMI-style TrafficSplit backend
    #[serde(rename = "trafficSplit", skip_serializing_if = "Option::is_none")]
    pub traffic_split: Option<TrafficSplitRouting>,

    /// Total traffic value split between stable and canary (default: 100)
    #[serde(rename = "maxTrafficWeight", skip_serializing_if = "Option::is_none")]
    pub max_traffic_weight: Option<i32>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
pub struct GatewayApiRouting {
    /// Name of the HTTPRoute whose managed rule carries the weight split
    #[serde(rename = "httpRoute")]
    pub http_route: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
pub struct TrafficSplitRouting {
    /// Name of the TrafficSplit resource. Defaults to the rollout name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Root service the split applies to. Defaults to the stable service.
    #[serde(rename = "rootService", skip_serializing_if = "Option::is_none")]
    pub root_service: Option<String>,
}

/// Phase of a Rollout
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum Phase {
    /// Initial phase while the rollout is being set up
    #[default]
    Initializing,
    /// Rollout is actively progressing through canary steps
    Progressing,
    /// Rollout is paused waiting for a duration or manual promotion
    Paused,
    /// Rollout completed: full traffic on the new revision
    Completed,
    /// Rollout aborted or timed out; traffic restored to stable
    Failed,
    /// Spec is invalid and requires operator intervention (never retried)
    Degraded,
}

/// Status of the Rollout
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct RolloutStatus {
    /// Total number of non-terminated pods
    #[serde(default)]
    pub replicas: i32,

    /// Number of ready replicas
    #[serde(rename = "readyReplicas", default)]
    pub ready_replicas: i32,

    /// Number of updated (canary) replicas
    #[serde(rename = "updatedReplicas", default)]
    pub updated_replicas: i32,

    /// Current canary step index (0-indexed; == len(steps) once promoted)
    #[serde(rename = "currentStepIndex", skip_serializing_if = "Option::is_none")]
    pub current_step_index: Option<i32>,

    /// Current canary weight
    #[serde(rename = "currentWeight", skip_serializing_if = "Option::is_none")]
    pub current_weight: Option<i32>,

    /// Pod-template hash of the revision being rolled out
    #[serde(rename = "canaryHash", skip_serializing_if = "Option::is_none")]
    pub canary_hash: Option<String>,

    /// Pod-template hash of the previously promoted revision
    #[serde(rename = "stableHash", skip_serializing_if = "Option::is_none")]
    pub stable_hash: Option<String>,

    /// Name of the analysis run gating the current step, if any
    #[serde(
        rename = "currentAnalysisRun",
        skip_serializing_if = "Option::is_none"
    )]
    pub current_analysis_run: Option<String>,

    /// Phase of the rollout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,

    /// Human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Timestamp when the current pause started (RFC3339)
    #[serde(rename = "pauseStartTime", skip_serializing_if = "Option::is_none")]
    pub pause_start_time: Option<String>,

    /// Timestamp when the current step started (RFC3339)
    #[serde(rename = "stepStartTime", skip_serializing_if = "Option::is_none")]
    pub step_start_time: Option<String>,

    /// Timestamp when the rollout started progressing (RFC3339).
    /// Used for progressDeadlineSeconds timeout detection.
    #[serde(rename = "progressStartedAt", skip_serializing_if = "Option::is_none")]
    pub progress_started_at: Option<String>,
}

#[cfg(test)]
#[path = "rollout_test.rs"]
mod tests;
