use super::analysis::{analysis_run_base_name, merge_args, StepVerdict};
use super::*;
use crate::crd::analysis::{AnalysisPhase, Argument};
use crate::crd::rollout::{
    AnalysisStep, CanaryStep, CanaryStrategy, GatewayApiRouting, PauseStep, Phase, Rollout,
    RolloutSpec, RolloutStatus, RolloutStrategy, TrafficRouting,
};
use chrono::{TimeZone, Utc};
use k8s_openapi::api::apps::v1::{ReplicaSet, ReplicaSetStatus};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::ObjectMeta;

fn pod_template(image: &str) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(
                vec![("app".to_string(), "test-app".to_string())]
                    .into_iter()
                    .collect(),
            ),
            ..Default::default()
        }),
        spec: Some(k8s_openapi::api::core::v1::PodSpec {
            containers: vec![k8s_openapi::api::core::v1::Container {
                name: "app".to_string(),
                image: Some(image.to_string()),
                ..Default::default()
            }],
            ..Default::default()
        }),
    }
}

fn weight_step(weight: i32) -> CanaryStep {
    CanaryStep {
        set_weight: Some(weight),
        ..Default::default()
    }
}

fn pause_step(duration: Option<&str>) -> CanaryStep {
    CanaryStep {
        pause: Some(PauseStep {
            duration: duration.map(|d| d.to_string()),
        }),
        ..Default::default()
    }
}

fn analysis_step(template: &str) -> CanaryStep {
    CanaryStep {
        analysis: Some(AnalysisStep {
            template_name: template.to_string(),
            args: vec![],
        }),
        ..Default::default()
    }
}

fn make_rollout(replicas: i32, steps: Vec<CanaryStep>) -> Rollout {
    Rollout {
        metadata: ObjectMeta {
            name: Some("test-rollout".to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        spec: RolloutSpec {
            replicas,
            selector: LabelSelector::default(),
            template: pod_template("nginx:1.0"),
            strategy: RolloutStrategy {
                canary: Some(CanaryStrategy {
                    canary_service: "test-app-canary".to_string(),
                    stable_service: "test-app-stable".to_string(),
                    port: None,
                    steps,
                    traffic_routing: Some(TrafficRouting {
                        gateway_api: Some(GatewayApiRouting {
                            http_route: "test-route".to_string(),
                        }),
                        traffic_split: None,
                        max_traffic_weight: None,
                    }),
                }),
            },
            max_surge: None,
            max_unavailable: None,
            progress_deadline_seconds: None,
        },
        status: None,
    }
}

fn make_rs(name: &str, hash: &str, spec_replicas: i32, available: i32) -> ReplicaSet {
    ReplicaSet {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            labels: Some(
                vec![(POD_TEMPLATE_HASH_LABEL.to_string(), hash.to_string())]
                    .into_iter()
                    .collect(),
            ),
            ..Default::default()
        },
        spec: Some(k8s_openapi::api::apps::v1::ReplicaSetSpec {
            replicas: Some(spec_replicas),
            selector: LabelSelector::default(),
            template: None,
            ..Default::default()
        }),
        status: Some(ReplicaSetStatus {
            replicas: available,
            available_replicas: Some(available),
            ready_replicas: Some(available),
            ..Default::default()
        }),
    }
}

// --- Replica scaling engine ---------------------------------------------

#[test]
fn test_desired_counts_round_to_at_most_one_extra() {
    for weight in 0..=100 {
        let (new, stable) = desired_replica_counts(10, weight, 100, true);
        let total = new + stable;
        assert!(
            total == 10 || total == 11,
            "weight {}: desired {}+{}={} out of range",
            weight,
            new,
            stable,
            total
        );
    }
}

#[test]
fn test_desired_counts_single_variant_takeover() {
    assert_eq!(desired_replica_counts(10, 30, 100, false), (10, 0));
    assert_eq!(desired_replica_counts(5, 0, 100, false), (5, 0));
}

#[test]
fn test_desired_counts_small_replicas_keep_canary_alive() {
    // weight > 0 rounds the canary up to at least one replica
    let (new, _) = desired_replica_counts(2, 1, 100, true);
    assert_eq!(new, 1);
    let (new, stable) = desired_replica_counts(2, 0, 100, true);
    assert_eq!((new, stable), (0, 2));
}

#[test]
fn test_scale_down_bounded_by_percentage_unavailable() {
    // replicas=10, weight=30, maxSurge=0, maxUnavailable resolving to 2
    // against 10 replicas: stable drops to 8, canary waits for budget
    let stable = make_rs("app-stable", "aaa", 10, 10);
    let new = make_rs("app-new", "bbb", 0, 0);
    let (new_count, stable_count) = calculate_replica_counts(
        10,
        30,
        100,
        Some("0"),
        Some("20%"),
        Some(&new),
        Some(&stable),
        &[],
    );
    assert_eq!((new_count, stable_count), (0, 8));
}

#[test]
fn test_scale_down_bounded_by_absolute_unavailable() {
    let stable = make_rs("app-stable", "aaa", 10, 10);
    let new = make_rs("app-new", "bbb", 0, 0);
    let (new_count, stable_count) = calculate_replica_counts(
        10,
        30,
        100,
        Some("0"),
        Some("1"),
        Some(&new),
        Some(&stable),
        &[],
    );
    assert_eq!((new_count, stable_count), (0, 9));
}

#[test]
fn test_zero_budgets_force_one_unavailable() {
    let stable = make_rs("app-stable", "aaa", 10, 10);
    let new = make_rs("app-new", "bbb", 0, 0);
    let (new_count, stable_count) = calculate_replica_counts(
        10,
        30,
        100,
        Some("0"),
        Some("0"),
        Some(&new),
        Some(&stable),
        &[],
    );
    // forward progress is guaranteed: stable gives up one replica
    assert_eq!((new_count, stable_count), (0, 9));
}

#[test]
fn test_surge_budget_scales_canary_up_first_pass() {
    let stable = make_rs("app-stable", "aaa", 10, 10);
    let new = make_rs("app-new", "bbb", 0, 0);
    let (new_count, stable_count) = calculate_replica_counts(
        10,
        30,
        100,
        Some("2"),
        Some("0"),
        Some(&new),
        Some(&stable),
        &[],
    );
    assert_eq!((new_count, stable_count), (2, 10));
}

#[test]
fn test_uneven_split_grants_one_extra_surge_unit() {
    // weight 25 of 10 rounds both sides up (3 + 8 = 11); the extra unit
    // lets the canary start despite maxSurge=0
    let stable = make_rs("app-stable", "aaa", 10, 10);
    let new = make_rs("app-new", "bbb", 0, 0);
    let (new_count, stable_count) = calculate_replica_counts(
        10,
        25,
        100,
        Some("0"),
        Some("0"),
        Some(&new),
        Some(&stable),
        &[],
    );
    assert_eq!((new_count, stable_count), (1, 9));
}

#[test]
fn test_older_sets_absorb_scale_down_budget_first() {
    let stable = make_rs("app-stable", "aaa", 8, 8);
    let new = make_rs("app-new", "bbb", 0, 0);
    let older = vec![make_rs("app-old", "ccc", 4, 4)];
    let (new_count, stable_count) = calculate_replica_counts(
        10,
        0,
        100,
        Some("1"),
        Some("1"),
        Some(&new),
        Some(&stable),
        &older,
    );
    // budget (8+4-9=3) is smaller than the older sets' available count, so
    // neither stable nor new moves down this pass
    assert_eq!((new_count, stable_count), (0, 8));
}

#[test]
fn test_overscaled_set_contributes_only_spec_count() {
    // stable already shrinking: spec 5, available 10; only 5 counts
    let stable = make_rs("app-stable", "aaa", 5, 10);
    let new = make_rs("app-new", "bbb", 5, 5);
    let (new_count, stable_count) = calculate_replica_counts(
        10,
        50,
        100,
        Some("0"),
        Some("1"),
        Some(&new),
        Some(&stable),
        &[],
    );
    // desired (5,5); scale-down budget = 5+5-9 = 1, nothing above desired
    assert_eq!((new_count, stable_count), (5, 5));
}

#[test]
fn test_weight_100_drains_stable_fully() {
    let stable = make_rs("app-stable", "aaa", 10, 10);
    let new = make_rs("app-new", "bbb", 10, 10);
    let (new_count, stable_count) = calculate_replica_counts(
        10,
        100,
        100,
        Some("0"),
        Some("25%"),
        Some(&new),
        Some(&stable),
        &[],
    );
    // the canary alone already covers the availability floor, so the
    // stable side can drain in one pass
    assert_eq!((new_count, stable_count), (10, 0));
}

#[test]
fn test_takeover_scales_new_set_to_full() {
    let new = make_rs("app-new", "bbb", 0, 0);
    let (new_count, stable_count) =
        calculate_replica_counts(10, 0, 100, None, None, Some(&new), None, &[]);
    assert_eq!((new_count, stable_count), (10, 0));
}

#[test]
fn test_budget_resolution_fenceposts() {
    // surge rounds up, unavailable rounds down
    assert_eq!(resolve_surge(Some("25%"), 10), 3);
    assert_eq!(resolve_unavailable(Some("25%"), 10), 2);
    assert_eq!(resolve_surge(Some("5"), 10), 5);
    assert_eq!(resolve_unavailable(Some("1"), 10), 1);
    // defaults: 25% surge, 0 unavailable
    assert_eq!(resolve_surge(None, 8), 2);
    assert_eq!(resolve_unavailable(None, 8), 0);
    // malformed values resolve to zero (validation rejects them earlier)
    assert_eq!(resolve_surge(Some("150%"), 10), 0);
    assert_eq!(resolve_unavailable(Some("-1"), 10), 0);
}

#[test]
fn test_compute_pod_template_hash_is_stable() {
    let template = pod_template("nginx:1.0");
    let hash1 = compute_pod_template_hash(&template).unwrap();
    let hash2 = compute_pod_template_hash(&template).unwrap();
    assert_eq!(hash1, hash2);
    assert_eq!(hash1.len(), 10);

    let hash3 = compute_pod_template_hash(&pod_template("nginx:2.0")).unwrap();
    assert_ne!(hash1, hash3);
}

#[test]
fn test_classify_replicasets_by_hash() {
    let sets = vec![
        make_rs("a", "hash-new", 3, 3),
        make_rs("b", "hash-stable", 7, 7),
        make_rs("c", "hash-old", 1, 1),
    ];
    let (new_rs, stable_rs, older) = classify_replicasets(&sets, "hash-new", Some("hash-stable"));
    assert_eq!(new_rs.unwrap().metadata.name.as_deref(), Some("a"));
    assert_eq!(stable_rs.unwrap().metadata.name.as_deref(), Some("b"));
    assert_eq!(older.len(), 1);
}

#[test]
fn test_classify_promoted_revision_has_no_distinct_stable() {
    // stable hash == canary hash: the one set is "new", stable is absent
    let sets = vec![make_rs("a", "hash-x", 10, 10)];
    let (new_rs, stable_rs, older) = classify_replicasets(&sets, "hash-x", Some("hash-x"));
    assert!(new_rs.is_some());
    assert!(stable_rs.is_none());
    assert!(older.is_empty());
}

// --- Weight resolver -----------------------------------------------------

#[test]
fn test_current_weight_reverse_scan() {
    let steps = vec![
        weight_step(10),
        pause_step(Some("30s")),
        weight_step(30),
        pause_step(None),
    ];
    assert_eq!(current_weight(&steps, 0, 100), 10);
    assert_eq!(current_weight(&steps, 1, 100), 10);
    assert_eq!(current_weight(&steps, 2, 100), 30);
    assert_eq!(current_weight(&steps, 3, 100), 30);
}

#[test]
fn test_current_weight_defaults() {
    // past the end: fully promoted
    let steps = vec![weight_step(10)];
    assert_eq!(current_weight(&steps, 1, 100), 100);
    assert_eq!(current_weight(&steps, 5, 100), 100);
    // no weight committed yet
    let steps = vec![pause_step(None), weight_step(50)];
    assert_eq!(current_weight(&steps, 0, 100), 0);
    // no steps at all: permanently promoted
    assert_eq!(current_weight(&[], 0, 100), 100);
    // negative index: nothing committed
    assert_eq!(current_weight(&steps, -1, 100), 0);
}

#[test]
fn test_current_weight_respects_max_weight() {
    let steps = vec![weight_step(500)];
    assert_eq!(current_weight(&steps, 0, 1000), 500);
    assert_eq!(current_weight(&steps, 1, 1000), 1000);
}

#[test]
fn test_desired_weight_from_status() {
    let mut rollout = make_rollout(10, vec![weight_step(20), pause_step(None)]);
    assert_eq!(desired_weight(&rollout), 0); // no status yet

    rollout.status = Some(RolloutStatus {
        current_step_index: Some(1),
        phase: Some(Phase::Progressing),
        ..Default::default()
    });
    assert_eq!(desired_weight(&rollout), 20);

    rollout.status.as_mut().unwrap().phase = Some(Phase::Failed);
    assert_eq!(desired_weight(&rollout), 0); // aborted: everything to stable

    rollout.status.as_mut().unwrap().phase = Some(Phase::Completed);
    assert_eq!(desired_weight(&rollout), 100);
}

#[test]
fn test_weight_split_invariant() {
    for weight in [0, 10, 55, 100] {
        let (stable, canary) = weight_split(weight, 100, true);
        assert_eq!(stable + canary, 100);
    }
    assert_eq!(weight_split(30, 100, false), (0, 100));
}

// --- Validation ----------------------------------------------------------

#[test]
fn test_validate_rollout_accepts_valid_spec() {
    let rollout = make_rollout(
        3,
        vec![
            weight_step(20),
            pause_step(Some("30s")),
            analysis_step("success-rate"),
            weight_step(100),
        ],
    );
    assert!(validate_rollout(&rollout).is_ok());
}

#[test]
fn test_validate_rollout_rejects_step_with_multiple_directives() {
    let mut rollout = make_rollout(3, vec![weight_step(20)]);
    rollout.spec.strategy.canary.as_mut().unwrap().steps[0].pause =
        Some(PauseStep { duration: None });
    let err = validate_rollout(&rollout).unwrap_err();
    assert!(err.contains("exactly one"));
}

#[test]
fn test_validate_rollout_rejects_empty_step() {
    let rollout = make_rollout(3, vec![CanaryStep::default()]);
    assert!(validate_rollout(&rollout).is_err());
}

#[test]
fn test_validate_rollout_rejects_out_of_range_weight() {
    let rollout = make_rollout(3, vec![weight_step(150)]);
    let err = validate_rollout(&rollout).unwrap_err();
    assert!(err.contains("setWeight"));
}

#[test]
fn test_validate_rollout_rejects_bad_budget_formats() {
    let mut rollout = make_rollout(3, vec![weight_step(20)]);
    rollout.spec.max_surge = Some("banana".to_string());
    assert!(validate_rollout(&rollout).unwrap_err().contains("maxSurge"));

    let mut rollout = make_rollout(3, vec![weight_step(20)]);
    rollout.spec.max_unavailable = Some("200%".to_string());
    assert!(validate_rollout(&rollout)
        .unwrap_err()
        .contains("maxUnavailable"));
}

#[test]
fn test_validate_rollout_rejects_bad_pause_duration() {
    let rollout = make_rollout(3, vec![pause_step(Some("banana"))]);
    assert!(validate_rollout(&rollout).unwrap_err().contains("duration"));
}

#[test]
fn test_validate_rollout_rejects_empty_services() {
    let mut rollout = make_rollout(3, vec![weight_step(20)]);
    rollout
        .spec
        .strategy
        .canary
        .as_mut()
        .unwrap()
        .stable_service = String::new();
    assert!(validate_rollout(&rollout)
        .unwrap_err()
        .contains("stableService"));
}

#[test]
fn test_parse_duration_formats() {
    use std::time::Duration;
    assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
    assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
    assert_eq!(parse_duration("2h"), Some(Duration::from_secs(7200)));
    assert_eq!(parse_duration("0s"), None);
    assert_eq!(parse_duration("90000s"), None);
    assert_eq!(parse_duration("10d"), None);
    assert_eq!(parse_duration(""), None);
}

// --- Step progression ----------------------------------------------------

fn fixed_now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

#[test]
fn test_initialize_status_promotes_first_revision() {
    let rollout = make_rollout(3, vec![weight_step(20), weight_step(100)]);
    let status = initialize_rollout_status(&rollout, "abc123", fixed_now());

    assert_eq!(status.phase, Some(Phase::Completed));
    assert_eq!(status.current_step_index, Some(2));
    assert_eq!(status.current_weight, Some(100));
    assert_eq!(status.canary_hash.as_deref(), Some("abc123"));
    assert_eq!(status.stable_hash.as_deref(), Some("abc123"));
}

#[test]
fn test_new_revision_restarts_sequence() {
    let mut rollout = make_rollout(3, vec![weight_step(20), pause_step(Some("30s"))]);
    rollout.status = Some(RolloutStatus {
        current_step_index: Some(2),
        current_weight: Some(100),
        canary_hash: Some("old-hash".to_string()),
        stable_hash: Some("old-hash".to_string()),
        phase: Some(Phase::Completed),
        ..Default::default()
    });

    let status = compute_desired_status(&rollout, "new-hash", None, fixed_now());
    assert_eq!(status.phase, Some(Phase::Progressing));
    assert_eq!(status.current_step_index, Some(0));
    assert_eq!(status.current_weight, Some(20));
    assert_eq!(status.canary_hash.as_deref(), Some("new-hash"));
    assert_eq!(status.stable_hash.as_deref(), Some("old-hash"));
}

#[test]
fn test_timed_pause_blocks_until_elapsed() {
    let mut rollout = make_rollout(3, vec![weight_step(20), pause_step(Some("30s"))]);
    let pause_start = fixed_now();
    rollout.status = Some(RolloutStatus {
        current_step_index: Some(1),
        current_weight: Some(20),
        canary_hash: Some("h".to_string()),
        stable_hash: Some("s".to_string()),
        phase: Some(Phase::Progressing),
        pause_start_time: Some(pause_start.to_rfc3339()),
        ..Default::default()
    });

    let before = pause_start + chrono::Duration::seconds(10);
    assert!(!should_progress_to_next_step(&rollout, None, before));

    let after = pause_start + chrono::Duration::seconds(31);
    assert!(should_progress_to_next_step(&rollout, None, after));
}

#[test]
fn test_promote_annotation_overrides_pause() {
    let mut rollout = make_rollout(3, vec![weight_step(20), pause_step(None)]);
    rollout.metadata.annotations = Some(
        vec![("virta.io/promote".to_string(), "true".to_string())]
            .into_iter()
            .collect(),
    );
    rollout.status = Some(RolloutStatus {
        current_step_index: Some(1),
        phase: Some(Phase::Paused),
        canary_hash: Some("h".to_string()),
        ..Default::default()
    });

    assert!(should_progress_to_next_step(&rollout, None, fixed_now()));
}

#[test]
fn test_analysis_step_waits_for_successful_verdict() {
    let mut rollout = make_rollout(3, vec![weight_step(20), analysis_step("success-rate")]);
    rollout.status = Some(RolloutStatus {
        current_step_index: Some(1),
        phase: Some(Phase::Progressing),
        canary_hash: Some("h".to_string()),
        ..Default::default()
    });

    let pending = StepVerdict::Pending {
        run: "run-1".to_string(),
    };
    assert!(!should_progress_to_next_step(&rollout, Some(&pending), fixed_now()));
    assert!(!should_progress_to_next_step(&rollout, None, fixed_now()));

    let successful = StepVerdict::Successful {
        run: "run-1".to_string(),
    };
    assert!(should_progress_to_next_step(
        &rollout,
        Some(&successful),
        fixed_now()
    ));
}

#[test]
fn test_unsuccessful_verdict_aborts_rollout() {
    let mut rollout = make_rollout(3, vec![weight_step(20), analysis_step("success-rate")]);
    rollout.status = Some(RolloutStatus {
        current_step_index: Some(1),
        current_weight: Some(20),
        canary_hash: Some("h".to_string()),
        stable_hash: Some("s".to_string()),
        phase: Some(Phase::Progressing),
        ..Default::default()
    });

    let verdict = StepVerdict::Unsuccessful {
        run: "run-1".to_string(),
        phase: AnalysisPhase::Failed,
    };
    let status = compute_desired_status(&rollout, "h", Some(&verdict), fixed_now());

    assert_eq!(status.phase, Some(Phase::Failed));
    assert_eq!(status.current_weight, Some(0));
    assert!(status.message.as_deref().unwrap().contains("run-1"));
}

#[test]
fn test_advancing_past_last_step_promotes() {
    let mut rollout = make_rollout(3, vec![weight_step(20), weight_step(100)]);
    rollout.status = Some(RolloutStatus {
        current_step_index: Some(1),
        current_weight: Some(100),
        canary_hash: Some("new".to_string()),
        stable_hash: Some("old".to_string()),
        phase: Some(Phase::Progressing),
        ..Default::default()
    });

    let status = advance_to_next_step(&rollout, fixed_now());
    assert_eq!(status.phase, Some(Phase::Completed));
    assert_eq!(status.current_step_index, Some(2));
    assert_eq!(status.current_weight, Some(100));
    // promotion: the canary becomes the stable revision
    assert_eq!(status.stable_hash.as_deref(), Some("new"));
}

#[test]
fn test_failed_phase_is_sticky_for_same_revision() {
    let mut rollout = make_rollout(3, vec![weight_step(20)]);
    rollout.status = Some(RolloutStatus {
        current_step_index: Some(0),
        current_weight: Some(0),
        canary_hash: Some("h".to_string()),
        stable_hash: Some("s".to_string()),
        phase: Some(Phase::Failed),
        message: Some("rollback".to_string()),
        ..Default::default()
    });

    let status = compute_desired_status(&rollout, "h", None, fixed_now());
    assert_eq!(status.phase, Some(Phase::Failed));
}

#[test]
fn test_progress_deadline_detection() {
    let started = fixed_now() - chrono::Duration::seconds(700);
    let status = RolloutStatus {
        phase: Some(Phase::Progressing),
        progress_started_at: Some(started.to_rfc3339()),
        ..Default::default()
    };
    assert!(is_progress_deadline_exceeded(&status, 600, fixed_now()));
    assert!(!is_progress_deadline_exceeded(&status, 800, fixed_now()));

    let completed = RolloutStatus {
        phase: Some(Phase::Completed),
        progress_started_at: Some(started.to_rfc3339()),
        ..Default::default()
    };
    assert!(!is_progress_deadline_exceeded(&completed, 600, fixed_now()));
}

#[test]
fn test_requeue_interval_tracks_pause_remainder() {
    use std::time::Duration;
    let now = fixed_now();
    let pause_start = now - chrono::Duration::seconds(2);

    let interval =
        calculate_requeue_interval(Some(&pause_start), Some(Duration::from_secs(10)), now);
    assert_eq!(interval, Duration::from_secs(8));

    // clamped to at least 5s
    let nearly_done = now - chrono::Duration::seconds(9);
    let interval =
        calculate_requeue_interval(Some(&nearly_done), Some(Duration::from_secs(10)), now);
    assert_eq!(interval, Duration::from_secs(5));

    // no pause: default 30s
    assert_eq!(
        calculate_requeue_interval(None, None, now),
        Duration::from_secs(30)
    );
}

// --- Analysis run bookkeeping -------------------------------------------

#[test]
fn test_analysis_run_base_name() {
    assert_eq!(
        analysis_run_base_name("my-app", "abc123", 2),
        "my-app-abc123-2"
    );
}

#[test]
fn test_merge_args_step_overrides_template_defaults() {
    let declared = vec![
        Argument {
            name: "service".to_string(),
            value: Some("default-svc".to_string()),
        },
        Argument {
            name: "window".to_string(),
            value: Some("5m".to_string()),
        },
    ];
    let supplied = vec![
        Argument {
            name: "service".to_string(),
            value: Some("checkout".to_string()),
        },
        Argument {
            name: "extra".to_string(),
            value: Some("1".to_string()),
        },
    ];

    let merged = merge_args(&declared, &supplied);
    assert_eq!(merged.len(), 3);
    assert_eq!(
        merged.iter().find(|a| a.name == "service").unwrap().value,
        Some("checkout".to_string())
    );
    assert_eq!(
        merged.iter().find(|a| a.name == "window").unwrap().value,
        Some("5m".to_string())
    );
}
