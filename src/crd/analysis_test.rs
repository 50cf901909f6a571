use super::*;

const TERMINAL_ORDER: [AnalysisPhase; 4] = [
    AnalysisPhase::Successful,
    AnalysisPhase::Inconclusive,
    AnalysisPhase::Error,
    AnalysisPhase::Failed,
];

#[test]
fn test_is_worse_is_a_strict_total_order() {
    let all = [
        AnalysisPhase::Successful,
        AnalysisPhase::Pending,
        AnalysisPhase::Running,
        AnalysisPhase::Inconclusive,
        AnalysisPhase::Error,
        AnalysisPhase::Failed,
    ];
    for (i, a) in all.iter().enumerate() {
        // irreflexive
        assert!(!a.is_worse(*a));
        for b in all.iter().skip(i + 1) {
            // asymmetric and total
            assert!(a.is_worse(*b), "{:?} should be worse than {:?}", b, a);
            assert!(!b.is_worse(*a));
        }
    }
}

#[test]
fn test_terminal_worseness_order() {
    // Successful < Inconclusive < Error < Failed
    for (i, a) in TERMINAL_ORDER.iter().enumerate() {
        for b in TERMINAL_ORDER.iter().skip(i + 1) {
            assert!(a.is_worse(*b));
        }
    }
}

#[test]
fn test_worst_returns_the_worse_element() {
    assert_eq!(
        AnalysisPhase::Successful.worst(AnalysisPhase::Failed),
        AnalysisPhase::Failed
    );
    assert_eq!(
        AnalysisPhase::Failed.worst(AnalysisPhase::Successful),
        AnalysisPhase::Failed
    );
    assert_eq!(
        AnalysisPhase::Inconclusive.worst(AnalysisPhase::Error),
        AnalysisPhase::Error
    );
    assert_eq!(
        AnalysisPhase::Running.worst(AnalysisPhase::Running),
        AnalysisPhase::Running
    );
}

#[test]
fn test_terminal_phases() {
    assert!(AnalysisPhase::Successful.is_terminal());
    assert!(AnalysisPhase::Failed.is_terminal());
    assert!(AnalysisPhase::Error.is_terminal());
    assert!(AnalysisPhase::Inconclusive.is_terminal());
    assert!(!AnalysisPhase::Pending.is_terminal());
    assert!(!AnalysisPhase::Running.is_terminal());
}

#[test]
fn test_metric_limit_defaults() {
    let metric: Metric = serde_yaml::from_str(
        r#"
name: error-rate
provider:
  prometheus:
    address: http://prometheus:9090
    query: vector(1)
"#,
    )
    .unwrap();

    assert_eq!(metric.failure_limit(), DEFAULT_FAILURE_LIMIT);
    assert_eq!(metric.inconclusive_limit(), DEFAULT_INCONCLUSIVE_LIMIT);
    assert_eq!(
        metric.consecutive_error_limit(),
        DEFAULT_CONSECUTIVE_ERROR_LIMIT
    );
}

#[test]
fn test_metric_manifest_parses_camel_case_fields() {
    let metric: Metric = serde_yaml::from_str(
        r#"
name: latency-p95
count: 5
interval: 60s
initialDelay: 1m
failureLimit: 3
inconclusiveLimit: 2
consecutiveErrorLimit: 4
successCondition: "result < 0.5"
failureCondition: "result >= 0.5"
provider:
  web:
    url: http://metrics.internal/latency
    jsonPath: data.p95
"#,
    )
    .unwrap();

    assert_eq!(metric.count, Some(5));
    assert_eq!(metric.initial_delay.as_deref(), Some("1m"));
    assert_eq!(metric.failure_limit(), 3);
    assert_eq!(metric.inconclusive_limit(), 2);
    assert_eq!(
        metric.provider.web.as_ref().unwrap().json_path.as_deref(),
        Some("data.p95")
    );
}

#[test]
fn test_analysis_run_status_roundtrip() {
    let status = AnalysisRunStatus {
        phase: AnalysisPhase::Running,
        message: None,
        metric_results: vec![MetricResult {
            name: "error-rate".to_string(),
            phase: AnalysisPhase::Running,
            measurements: vec![Measurement {
                phase: AnalysisPhase::Successful,
                value: Some("0.01".to_string()),
                started_at: Some("2026-03-01T12:00:00Z".to_string()),
                finished_at: Some("2026-03-01T12:00:01Z".to_string()),
                ..Default::default()
            }],
            count: 1,
            successful: 1,
            ..Default::default()
        }],
        started_at: Some("2026-03-01T12:00:00Z".to_string()),
        completed_at: None,
    };

    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["phase"], "Running");
    assert_eq!(json["metricResults"][0]["name"], "error-rate");
    assert_eq!(json["metricResults"][0]["measurements"][0]["value"], "0.01");

    let parsed: AnalysisRunStatus = serde_json::from_value(json).unwrap();
    assert_eq!(parsed, status);
}

#[test]
fn test_crd_metadata() {
    use kube::CustomResourceExt;
    assert_eq!(AnalysisRun::crd().spec.names.kind, "AnalysisRun");
    assert_eq!(AnalysisTemplate::crd().spec.names.kind, "AnalysisTemplate");
    assert_eq!(AnalysisRun::crd().spec.group, "virta.io");
}
