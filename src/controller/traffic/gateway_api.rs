//! Gateway API HTTPRoute traffic backend
//!
//! The reference adapter: the weight split lives in one HTTPRoute rule
//! whose backendRefs name the declared stable and canary services. Only
//! that rule is managed; every other rule in the resource is left
//! untouched.

use super::{
    destination_weights, SetWeightOutcome, TrafficError, TrafficRoutingReconciler,
    WeightDestination, WeightVerification,
};
use async_trait::async_trait;
use gateway_api::apis::standard::httproutes::HTTPRoute;
use kube::api::{Api, Patch, PatchParams};
use serde_json::Value;
use tracing::{debug, info};

pub struct GatewayApiReconciler {
    client: kube::Client,
    namespace: String,
    route_name: String,
    stable_service: String,
    canary_service: String,
    max_weight: i32,
    canary_hash: Option<String>,
    stable_hash: Option<String>,
}

impl GatewayApiReconciler {
    pub fn new(
        client: kube::Client,
        namespace: String,
        route_name: String,
        stable_service: String,
        canary_service: String,
        max_weight: i32,
    ) -> Self {
        Self {
            client,
            namespace,
            route_name,
            stable_service,
            canary_service,
            max_weight,
            canary_hash: None,
            stable_hash: None,
        }
    }

    async fn fetch_rules(&self) -> Result<Value, TrafficError> {
        let routes: Api<HTTPRoute> = Api::namespaced(self.client.clone(), &self.namespace);
        let route = match routes.get(&self.route_name).await {
            Ok(route) => route,
            Err(kube::Error::Api(err)) if err.code == 404 => {
                // A declared route that is gone is a hard error, not a
                // skip: the operator pointed us at it.
                return Err(TrafficError::MissingResource {
                    name: self.route_name.clone(),
                });
            }
            Err(e) => return Err(TrafficError::KubeError(e)),
        };

        serde_json::to_value(&route.spec.rules).map_err(|e| TrafficError::Malformed {
            name: self.route_name.clone(),
            reason: format!("rules not serializable: {}", e),
        })
    }
}

#[async_trait]
impl TrafficRoutingReconciler for GatewayApiReconciler {
    fn type_name(&self) -> &'static str {
        "GatewayAPI"
    }

    fn update_hash(
        &mut self,
        canary_hash: &str,
        stable_hash: &str,
        _additional: &[WeightDestination],
    ) {
        self.canary_hash = Some(canary_hash.to_string());
        self.stable_hash = Some(stable_hash.to_string());
    }

    async fn set_weight(
        &self,
        desired_weight: i32,
        additional: &[WeightDestination],
    ) -> Result<SetWeightOutcome, TrafficError> {
        let mut rules = self.fetch_rules().await?;
        let weights = destination_weights(
            &self.stable_service,
            &self.canary_service,
            desired_weight,
            self.max_weight,
            additional,
        );

        let changed = apply_weights_to_rules(
            &self.route_name,
            &mut rules,
            &self.stable_service,
            &weights,
        )?;

        if !changed {
            debug!(
                httproute = ?self.route_name,
                weight = desired_weight,
                "HTTPRoute already converged"
            );
            return Ok(SetWeightOutcome::Unchanged);
        }

        let routes: Api<HTTPRoute> = Api::namespaced(self.client.clone(), &self.namespace);
        routes
            .patch(
                &self.route_name,
                &PatchParams::default(),
                &Patch::Merge(&serde_json::json!({ "spec": { "rules": rules } })),
            )
            .await?;

        info!(
            httproute = ?self.route_name,
            weight = desired_weight,
            "HTTPRoute weights updated"
        );
        Ok(SetWeightOutcome::Updated)
    }

    async fn verify_weight(
        &self,
        _desired_weight: i32,
        _additional: &[WeightDestination],
    ) -> Result<WeightVerification, TrafficError> {
        // Gateway implementations do not expose observed traffic shares
        Ok(WeightVerification::Unsupported)
    }
}

/// Set the managed rule's backend weights; returns whether anything changed
///
/// The managed rule is the one whose backendRefs name the stable service.
/// Fails closed: no matching rule, an ambiguous match, or a destination
/// set that differs from the declared one refuses to mutate anything, with
/// the offending rule identified in the error.
pub(crate) fn apply_weights_to_rules(
    route_name: &str,
    rules: &mut Value,
    stable_service: &str,
    weights: &[(String, i32)],
) -> Result<bool, TrafficError> {
    let malformed = |reason: String| TrafficError::Malformed {
        name: route_name.to_string(),
        reason,
    };

    let rule_list = rules
        .as_array_mut()
        .ok_or_else(|| malformed("spec.rules is not a list".to_string()))?;

    let mut managed: Vec<usize> = Vec::new();
    for (i, rule) in rule_list.iter().enumerate() {
        let refs = rule.get("backendRefs").and_then(|r| r.as_array());
        let names_stable = refs.is_some_and(|refs| {
            refs.iter()
                .any(|r| r.get("name").and_then(|n| n.as_str()) == Some(stable_service))
        });
        if names_stable {
            managed.push(i);
        }
    }

    let rule_index = match managed.as_slice() {
        [] => {
            return Err(malformed(format!(
                "no rule references stable service {:?}",
                stable_service
            )))
        }
        [index] => *index,
        many => {
            return Err(malformed(format!(
                "rules {:?} all reference stable service {:?}; cannot tell which is managed",
                many, stable_service
            )))
        }
    };

    let refs = rule_list[rule_index]
        .get_mut("backendRefs")
        .and_then(|r| r.as_array_mut())
        .ok_or_else(|| malformed(format!("rule {} has no backendRefs", rule_index)))?;

    if refs.len() != weights.len() {
        return Err(malformed(format!(
            "rule {} has {} backendRefs, expected {}",
            rule_index,
            refs.len(),
            weights.len()
        )));
    }

    let mut changed = false;
    for backend_ref in refs.iter_mut() {
        let name = backend_ref
            .get("name")
            .and_then(|n| n.as_str())
            .ok_or_else(|| malformed(format!("rule {} has a backendRef without a name", rule_index)))?
            .to_string();

        let desired = weights
            .iter()
            .find(|(svc, _)| *svc == name)
            .map(|(_, w)| *w)
            .ok_or_else(|| {
                malformed(format!(
                    "rule {} references unexpected destination {:?}",
                    rule_index, name
                ))
            })?;

        let current = backend_ref.get("weight").and_then(|w| w.as_i64());
        if current != Some(desired as i64) {
            backend_ref["weight"] = Value::from(desired);
            changed = true;
        }
    }

    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn two_rule_route() -> Value {
        json!([
            {
                "backendRefs": [
                    { "name": "app-stable", "port": 80, "weight": 100 },
                    { "name": "app-canary", "port": 80, "weight": 0 }
                ]
            },
            {
                "matches": [{ "path": { "type": "PathPrefix", "value": "/admin" } }],
                "backendRefs": [
                    { "name": "admin-svc", "port": 8080, "weight": 1 }
                ]
            }
        ])
    }

    fn weights(stable: i32, canary: i32) -> Vec<(String, i32)> {
        vec![
            ("app-stable".to_string(), stable),
            ("app-canary".to_string(), canary),
        ]
    }

    #[test]
    fn test_set_weight_updates_managed_rule_only() {
        let mut rules = two_rule_route();
        let changed =
            apply_weights_to_rules("route", &mut rules, "app-stable", &weights(90, 10)).unwrap();

        assert!(changed);
        assert_eq!(rules[0]["backendRefs"][0]["weight"], 90);
        assert_eq!(rules[0]["backendRefs"][1]["weight"], 10);
        // unmanaged rule untouched
        assert_eq!(rules[1], two_rule_route()[1]);
    }

    #[test]
    fn test_set_weight_converged_reports_unchanged() {
        let mut rules = two_rule_route();
        apply_weights_to_rules("route", &mut rules, "app-stable", &weights(90, 10)).unwrap();

        let snapshot = rules.clone();
        let changed =
            apply_weights_to_rules("route", &mut rules, "app-stable", &weights(90, 10)).unwrap();

        assert!(!changed, "second identical call must be a no-op");
        assert_eq!(rules, snapshot);
    }

    #[test]
    fn test_missing_stable_destination_fails_closed() {
        let mut rules = json!([
            { "backendRefs": [{ "name": "something-else", "weight": 100 }] }
        ]);
        let err = apply_weights_to_rules("route", &mut rules, "app-stable", &weights(90, 10))
            .unwrap_err();
        assert!(matches!(err, TrafficError::Malformed { .. }));
        assert!(err.to_string().contains("app-stable"));
    }

    #[test]
    fn test_unexpected_destination_count_fails_closed() {
        let mut rules = json!([
            {
                "backendRefs": [
                    { "name": "app-stable", "weight": 50 },
                    { "name": "app-canary", "weight": 25 },
                    { "name": "app-mystery", "weight": 25 }
                ]
            }
        ]);
        let err = apply_weights_to_rules("route", &mut rules, "app-stable", &weights(90, 10))
            .unwrap_err();
        assert!(matches!(err, TrafficError::Malformed { .. }));
        assert!(err.to_string().contains("3 backendRefs"));
    }

    #[test]
    fn test_ambiguous_managed_rule_fails_closed() {
        let mut rules = json!([
            { "backendRefs": [{ "name": "app-stable", "weight": 100 }, { "name": "app-canary", "weight": 0 }] },
            { "backendRefs": [{ "name": "app-stable", "weight": 100 }, { "name": "app-canary", "weight": 0 }] }
        ]);
        let err = apply_weights_to_rules("route", &mut rules, "app-stable", &weights(90, 10))
            .unwrap_err();
        assert!(matches!(err, TrafficError::Malformed { .. }));
    }

    #[test]
    fn test_additional_destination_included_in_split() {
        let mut rules = json!([
            {
                "backendRefs": [
                    { "name": "app-stable", "weight": 100 },
                    { "name": "app-canary", "weight": 0 },
                    { "name": "app-experiment", "weight": 0 }
                ]
            }
        ]);
        let weights = vec![
            ("app-stable".to_string(), 70),
            ("app-canary".to_string(), 10),
            ("app-experiment".to_string(), 20),
        ];
        let changed = apply_weights_to_rules("route", &mut rules, "app-stable", &weights).unwrap();
        assert!(changed);
        assert_eq!(rules[0]["backendRefs"][2]["weight"], 20);
    }
}
