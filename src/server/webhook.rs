//! Validating admission webhook
//!
//! Rejects invalid Rollout, AnalysisRun and AnalysisTemplate objects at
//! admission time, before any reconciliation happens, using the same
//! validation functions the reconcilers run. The denial message is the
//! validation message, so `kubectl apply` shows the operator exactly what
//! is wrong.
//!
//! ## Endpoints
//! - POST /validate - Kubernetes AdmissionReview (v1) webhook

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::controller::analysis::validate_metrics;
use crate::controller::rollout::validation::validate_rollout;
use crate::crd::analysis::{AnalysisRun, AnalysisTemplate};
use crate::crd::rollout::Rollout;

/// Kubernetes AdmissionReview request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    pub api_version: String,
    pub kind: String,
    pub request: AdmissionRequest,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    /// Unique ID for this request; echoed back in the response
    pub uid: String,
    /// Kind of the object under review
    pub kind: GroupVersionKind,
    /// The object being admitted
    pub object: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct GroupVersionKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AdmissionStatus>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct AdmissionStatus {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReviewResponse {
    pub api_version: String,
    pub kind: String,
    pub response: AdmissionResponse,
}

fn deny(uid: String, message: String) -> AdmissionResponse {
    AdmissionResponse {
        uid,
        allowed: false,
        status: Some(AdmissionStatus { message }),
    }
}

fn allow(uid: String) -> AdmissionResponse {
    AdmissionResponse {
        uid,
        allowed: true,
        status: None,
    }
}

/// Validate the object in an admission request
pub fn review(request: AdmissionRequest) -> AdmissionResponse {
    let object = match request.object {
        Some(object) => object,
        None => return allow(request.uid), // nothing to validate (e.g. DELETE)
    };

    let verdict = match request.kind.kind.as_str() {
        "Rollout" => match serde_json::from_value::<Rollout>(object) {
            Ok(rollout) => validate_rollout(&rollout),
            Err(e) => Err(format!("not a valid Rollout: {}", e)),
        },
        "AnalysisRun" => match serde_json::from_value::<AnalysisRun>(object) {
            Ok(run) => validate_metrics(&run.spec.metrics),
            Err(e) => Err(format!("not a valid AnalysisRun: {}", e)),
        },
        "AnalysisTemplate" => match serde_json::from_value::<AnalysisTemplate>(object) {
            Ok(template) => validate_metrics(&template.spec.metrics),
            Err(e) => Err(format!("not a valid AnalysisTemplate: {}", e)),
        },
        other => {
            warn!(kind = %other, "Admission request for unexpected kind; allowing");
            Ok(())
        }
    };

    match verdict {
        Ok(()) => allow(request.uid),
        Err(message) => deny(request.uid, message),
    }
}

/// Axum handler for the /validate endpoint
pub async fn handle_validate(Json(request_review): Json<AdmissionReview>) -> impl IntoResponse {
    info!(
        uid = %request_review.request.uid,
        kind = %request_review.request.kind.kind,
        "Processing admission request"
    );

    let response = review(request_review.request);

    if !response.allowed {
        warn!(
            uid = %response.uid,
            message = ?response.status.as_ref().map(|s| &s.message),
            "Admission denied"
        );
    }

    let review_response = AdmissionReviewResponse {
        api_version: "admission.k8s.io/v1".to_string(),
        kind: "AdmissionReview".to_string(),
        response,
    };

    (StatusCode::OK, Json(review_response))
}

#[cfg(test)]
#[path = "webhook_test.rs"]
mod tests;
