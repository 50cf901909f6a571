use super::*;
use serde_json::json;

fn rollout_object(steps: serde_json::Value) -> serde_json::Value {
    json!({
        "apiVersion": "virta.io/v1alpha1",
        "kind": "Rollout",
        "metadata": { "name": "app", "namespace": "default" },
        "spec": {
            "replicas": 3,
            "selector": {},
            "template": {},
            "strategy": {
                "canary": {
                    "canaryService": "app-canary",
                    "stableService": "app-stable",
                    "steps": steps
                }
            }
        }
    })
}

fn request_for(kind: &str, object: serde_json::Value) -> AdmissionRequest {
    AdmissionRequest {
        uid: "req-1".to_string(),
        kind: GroupVersionKind {
            group: "virta.io".to_string(),
            version: "v1alpha1".to_string(),
            kind: kind.to_string(),
        },
        object: Some(object),
    }
}

#[test]
fn test_valid_rollout_is_allowed() {
    let request = request_for(
        "Rollout",
        rollout_object(json!([
            { "setWeight": 20 },
            { "pause": { "duration": "30s" } }
        ])),
    );
    let response = review(request);
    assert!(response.allowed);
    assert_eq!(response.uid, "req-1");
}

#[test]
fn test_invalid_rollout_is_denied_with_message() {
    let request = request_for("Rollout", rollout_object(json!([{ "setWeight": 150 }])));
    let response = review(request);
    assert!(!response.allowed);
    assert!(response.status.unwrap().message.contains("setWeight"));
}

#[test]
fn test_undecodable_object_is_denied() {
    let request = request_for("Rollout", json!({ "spec": "not-an-object" }));
    let response = review(request);
    assert!(!response.allowed);
    assert!(response.status.unwrap().message.contains("not a valid Rollout"));
}

#[test]
fn test_analysis_run_count_below_limit_is_denied() {
    let object = json!({
        "apiVersion": "virta.io/v1alpha1",
        "kind": "AnalysisRun",
        "metadata": { "name": "run", "namespace": "default" },
        "spec": {
            "metrics": [{
                "name": "error-rate",
                "count": 1,
                "failureLimit": 2,
                "interval": "60s",
                "provider": {
                    "prometheus": { "address": "http://prom:9090", "query": "vector(1)" }
                }
            }]
        }
    });
    let response = review(request_for("AnalysisRun", object));
    assert!(!response.allowed);
    assert!(response.status.unwrap().message.contains("failureLimit"));
}

#[test]
fn test_analysis_template_without_provider_is_denied() {
    let object = json!({
        "apiVersion": "virta.io/v1alpha1",
        "kind": "AnalysisTemplate",
        "metadata": { "name": "tmpl", "namespace": "default" },
        "spec": {
            "metrics": [{ "name": "m", "provider": {} }]
        }
    });
    let response = review(request_for("AnalysisTemplate", object));
    assert!(!response.allowed);
    assert!(response.status.unwrap().message.contains("no provider"));
}

#[test]
fn test_delete_reviews_have_no_object_and_are_allowed() {
    let request = AdmissionRequest {
        uid: "req-2".to_string(),
        kind: GroupVersionKind {
            group: "virta.io".to_string(),
            version: "v1alpha1".to_string(),
            kind: "Rollout".to_string(),
        },
        object: None,
    };
    assert!(review(request).allowed);
}

#[test]
fn test_unknown_kind_is_allowed() {
    let request = request_for("ConfigMap", json!({}));
    assert!(review(request).allowed);
}
