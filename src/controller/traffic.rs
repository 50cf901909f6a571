//! Traffic routing protocol
//!
//! One abstract contract, implemented independently per backend. Backends
//! differ wildly in wire format, but all reduce to "find the two
//! destinations representing new/stable, set their proportional weight,
//! leave everything else untouched". New backends are added as new
//! variants behind the trait, never as type branches in shared logic.

pub mod gateway_api;
pub mod traffic_split;

use crate::crd::rollout::Rollout;
use async_trait::async_trait;
use thiserror::Error;

pub use gateway_api::GatewayApiReconciler;
pub use traffic_split::TrafficSplitReconciler;

/// Errors from a traffic backend
///
/// `MissingResource` and `Malformed` are validation failures surfaced to the
/// operator and never retried internally; `KubeError` covers transient API
/// conditions the caller requeues with backoff.
#[derive(Debug, Error)]
pub enum TrafficError {
    #[error("managed traffic resource {name:?} not found")]
    MissingResource { name: String },

    #[error("traffic resource {name:?} malformed: {reason}")]
    Malformed { name: String, reason: String },

    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),
}

impl TrafficError {
    /// Validation failures are permanent; everything else is retryable
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            TrafficError::MissingResource { .. } | TrafficError::Malformed { .. }
        )
    }
}

/// An extra weighted destination beyond the stable/canary pair
/// (e.g. an experiment variant)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightDestination {
    /// Service backing the destination
    pub service_name: String,

    /// Pod-template hash identifying the revision behind it
    pub pod_template_hash: String,

    /// Weight carved out of the stable side's share
    pub weight: i32,
}

/// Whether `set_weight` had to write anything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetWeightOutcome {
    /// The backend resource was patched
    Updated,
    /// Already converged; no write was issued
    Unchanged,
}

/// Result of asking a backend whether traffic is actually split as requested
///
/// "Cannot verify" and "observed, not yet split" are distinct signals: a
/// caller must never treat an unsupporting backend as a failed
/// verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightVerification {
    /// The backend has no way to observe live traffic
    Unsupported,
    /// The backend observed the requested split
    Verified,
    /// The backend observed a different split
    NotVerified,
}

/// Contract implemented once per traffic backend
///
/// Implementations read one or more externally-owned resources, compute a
/// minimal patch to reach the desired weight split, and apply it
/// idempotently. Conflicts from the optimistic-concurrency layer are the
/// caller's to retry via requeue, never retried internally.
#[async_trait]
pub trait TrafficRoutingReconciler: Send + Sync {
    /// Stable identifier used for logging and metrics only
    fn type_name(&self) -> &'static str;

    /// Record the pod-template identities backing "new" and "stable"
    ///
    /// Bookkeeping only; no external side effects.
    fn update_hash(
        &mut self,
        canary_hash: &str,
        stable_hash: &str,
        additional: &[WeightDestination],
    );

    /// Reconcile the backend so canary traffic equals `desired_weight`
    ///
    /// Idempotent: repeat calls with the same weight report `Unchanged`
    /// without writing. No partial patch is ever persisted.
    async fn set_weight(
        &self,
        desired_weight: i32,
        additional: &[WeightDestination],
    ) -> Result<SetWeightOutcome, TrafficError>;

    /// Check whether live traffic is actually split as requested
    async fn verify_weight(
        &self,
        desired_weight: i32,
        additional: &[WeightDestination],
    ) -> Result<WeightVerification, TrafficError>;
}

/// The weights every destination should carry for a desired canary weight
///
/// Stable receives the remainder after the canary and any additional
/// destinations take their share; the total always sums to `max_weight`.
pub(crate) fn destination_weights(
    stable_service: &str,
    canary_service: &str,
    desired_weight: i32,
    max_weight: i32,
    additional: &[WeightDestination],
) -> Vec<(String, i32)> {
    let additional_total: i32 = additional.iter().map(|d| d.weight).sum();
    let stable_weight = (max_weight - desired_weight - additional_total).max(0);

    let mut weights = vec![
        (stable_service.to_string(), stable_weight),
        (canary_service.to_string(), desired_weight),
    ];
    for dest in additional {
        weights.push((dest.service_name.clone(), dest.weight));
    }
    weights
}

/// Construct one reconciler per backend named in the rollout's
/// traffic-routing configuration
///
/// The adapters are transient: built fresh around the current config every
/// reconcile pass, never persisted.
pub fn build_reconcilers(
    rollout: &Rollout,
    namespace: &str,
    client: kube::Client,
) -> Vec<Box<dyn TrafficRoutingReconciler>> {
    let canary = match &rollout.spec.strategy.canary {
        Some(canary) => canary,
        None => return Vec::new(),
    };
    let routing = match &canary.traffic_routing {
        Some(routing) => routing,
        None => return Vec::new(),
    };
    let max_weight = crate::controller::rollout::traffic::max_traffic_weight(rollout);
    let rollout_name = rollout.metadata.name.clone().unwrap_or_default();

    let mut reconcilers: Vec<Box<dyn TrafficRoutingReconciler>> = Vec::new();

    if let Some(gateway) = &routing.gateway_api {
        reconcilers.push(Box::new(GatewayApiReconciler::new(
            client.clone(),
            namespace.to_string(),
            gateway.http_route.clone(),
            canary.stable_service.clone(),
            canary.canary_service.clone(),
            max_weight,
        )));
    }

    if let Some(split) = &routing.traffic_split {
        reconcilers.push(Box::new(TrafficSplitReconciler::new(
            client.clone(),
            namespace.to_string(),
            split.name.clone().unwrap_or_else(|| rollout_name.clone()),
            split
                .root_service
                .clone()
                .unwrap_or_else(|| canary.stable_service.clone()),
            canary.stable_service.clone(),
            canary.canary_service.clone(),
            rollout_name.clone(),
            max_weight,
        )));
    }

    reconcilers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_weights_two_way_split() {
        let weights = destination_weights("app-stable", "app-canary", 10, 100, &[]);
        assert_eq!(
            weights,
            vec![("app-stable".to_string(), 90), ("app-canary".to_string(), 10)]
        );
    }

    #[test]
    fn test_destination_weights_sum_to_max() {
        for weight in [0, 1, 25, 50, 99, 100] {
            let weights = destination_weights("s", "c", weight, 100, &[]);
            let total: i32 = weights.iter().map(|(_, w)| w).sum();
            assert_eq!(total, 100, "weight {} must split to 100", weight);
        }
    }

    #[test]
    fn test_destination_weights_additional_reduces_stable_share() {
        let experiment = WeightDestination {
            service_name: "app-exp".to_string(),
            pod_template_hash: "abc123".to_string(),
            weight: 20,
        };
        let weights = destination_weights("s", "c", 10, 100, &[experiment]);
        assert_eq!(
            weights,
            vec![
                ("s".to_string(), 70),
                ("c".to_string(), 10),
                ("app-exp".to_string(), 20)
            ]
        );
    }

    #[test]
    fn test_traffic_error_permanence() {
        assert!(TrafficError::MissingResource {
            name: "route".to_string()
        }
        .is_permanent());
        assert!(TrafficError::Malformed {
            name: "route".to_string(),
            reason: "x".to_string()
        }
        .is_permanent());
    }
}
