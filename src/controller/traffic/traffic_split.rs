//! SMI-style TrafficSplit traffic backend
//!
//! Unlike the HTTPRoute adapter, this backend owns the resource it writes:
//! the split is created on first use, stamped with an ownership label so a
//! later pass can recognize it, and refused if a same-named split belongs
//! to someone else. Reads are tolerant of partially-malformed payloads:
//! entries that parse are used, anomalies are logged, and only missing
//! essentials fail the pass.

use super::{
    destination_weights, SetWeightOutcome, TrafficError, TrafficRoutingReconciler,
    WeightDestination, WeightVerification,
};
use async_trait::async_trait;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::DynamicObject;
use kube::discovery::ApiResource;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

/// Label marking a split as owned by a Rollout
pub const MANAGED_BY_LABEL: &str = "virta.io/managed-by";

fn split_api_resource() -> ApiResource {
    ApiResource {
        group: "split.smi-spec.io".to_string(),
        version: "v1alpha2".to_string(),
        api_version: "split.smi-spec.io/v1alpha2".to_string(),
        kind: "TrafficSplit".to_string(),
        plural: "trafficsplits".to_string(),
    }
}

pub struct TrafficSplitReconciler {
    client: kube::Client,
    namespace: String,
    name: String,
    root_service: String,
    stable_service: String,
    canary_service: String,
    rollout_name: String,
    max_weight: i32,
    canary_hash: Option<String>,
    stable_hash: Option<String>,
}

impl TrafficSplitReconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: kube::Client,
        namespace: String,
        name: String,
        root_service: String,
        stable_service: String,
        canary_service: String,
        rollout_name: String,
        max_weight: i32,
    ) -> Self {
        Self {
            client,
            namespace,
            name,
            root_service,
            stable_service,
            canary_service,
            rollout_name,
            max_weight,
            canary_hash: None,
            stable_hash: None,
        }
    }

    fn api(&self) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), &self.namespace, &split_api_resource())
    }

    fn desired_backends(
        &self,
        desired_weight: i32,
        additional: &[WeightDestination],
    ) -> Vec<(String, i32)> {
        destination_weights(
            &self.stable_service,
            &self.canary_service,
            desired_weight,
            self.max_weight,
            additional,
        )
    }

    fn build_split(&self, backends: &[(String, i32)]) -> DynamicObject {
        let mut obj = DynamicObject::new(&self.name, &split_api_resource()).within(&self.namespace);
        obj.metadata.labels = Some(
            [(MANAGED_BY_LABEL.to_string(), self.rollout_name.clone())]
                .into_iter()
                .collect(),
        );
        obj.data = json!({
            "spec": {
                "service": self.root_service,
                "backends": backends
                    .iter()
                    .map(|(service, weight)| json!({ "service": service, "weight": weight }))
                    .collect::<Vec<_>>(),
            }
        });
        obj
    }

    fn check_ownership(&self, obj: &DynamicObject) -> Result<(), TrafficError> {
        let owner = obj
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(MANAGED_BY_LABEL));
        if owner != Some(&self.rollout_name) {
            return Err(TrafficError::Malformed {
                name: self.name.clone(),
                reason: format!(
                    "TrafficSplit exists but is owned by {:?}, not rollout {:?}",
                    owner, self.rollout_name
                ),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl TrafficRoutingReconciler for TrafficSplitReconciler {
    fn type_name(&self) -> &'static str {
        "TrafficSplit"
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
        let backends = self.desired_backends(desired_weight, additional);
        let api = self.api();

        let existing = match api.get(&self.name).await {
            Ok(obj) => obj,
            Err(kube::Error::Api(err)) if err.code == 404 => {
                let split = self.build_split(&backends);
                api.create(&PostParams::default(), &split).await?;
                info!(
                    trafficsplit = ?self.name,
                    weight = desired_weight,
                    "Created TrafficSplit"
                );
                return Ok(SetWeightOutcome::Updated);
            }
            Err(e) => return Err(TrafficError::KubeError(e)),
        };

        self.check_ownership(&existing)?;

        let current = read_backends(&self.name, &existing.data);
        if backends_match(&current, &backends) {
            debug!(trafficsplit = ?self.name, weight = desired_weight, "TrafficSplit already converged");
            return Ok(SetWeightOutcome::Unchanged);
        }

        api.patch(
            &self.name,
            &PatchParams::default(),
            &Patch::Merge(&json!({
                "spec": {
                    "service": self.root_service,
                    "backends": backends
                        .iter()
                        .map(|(service, weight)| json!({ "service": service, "weight": weight }))
                        .collect::<Vec<_>>(),
                }
            })),
        )
        .await?;

        info!(
            trafficsplit = ?self.name,
            weight = desired_weight,
            "TrafficSplit weights updated"
        );
        Ok(SetWeightOutcome::Updated)
    }

    async fn verify_weight(
        &self,
        desired_weight: i32,
        additional: &[WeightDestination],
    ) -> Result<WeightVerification, TrafficError> {
        let api = self.api();
        let obj = match api.get(&self.name).await {
            Ok(obj) => obj,
            Err(kube::Error::Api(err)) if err.code == 404 => {
                return Err(TrafficError::MissingResource {
                    name: self.name.clone(),
                });
            }
            Err(e) => return Err(TrafficError::KubeError(e)),
        };

        let current = read_backends(&self.name, &obj.data);
        let desired = self.desired_backends(desired_weight, additional);
        if backends_match(&current, &desired) {
            Ok(WeightVerification::Verified)
        } else {
            Ok(WeightVerification::NotVerified)
        }
    }
}

/// Best-effort read of a split's backend list
///
/// Entries missing a service name or carrying a non-numeric weight are
/// reported and skipped; the fields that did parse keep serving.
pub(crate) fn read_backends(name: &str, data: &Value) -> Vec<(String, i32)> {
    let entries = match data.pointer("/spec/backends").and_then(|b| b.as_array()) {
        Some(entries) => entries,
        None => {
            warn!(trafficsplit = ?name, "TrafficSplit has no spec.backends list");
            return Vec::new();
        }
    };

    let mut backends = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        let service = entry.get("service").and_then(|s| s.as_str());
        let weight = entry.get("weight").and_then(|w| w.as_i64());
        match (service, weight) {
            (Some(service), Some(weight)) => backends.push((service.to_string(), weight as i32)),
            _ => {
                warn!(
                    trafficsplit = ?name,
                    backend = i,
                    "Skipping malformed TrafficSplit backend entry"
                );
            }
        }
    }
    backends
}

/// Order-insensitive comparison of backend weight lists
pub(crate) fn backends_match(current: &[(String, i32)], desired: &[(String, i32)]) -> bool {
    if current.len() != desired.len() {
        return false;
    }
    desired.iter().all(|(service, weight)| {
        current
            .iter()
            .any(|(cur_service, cur_weight)| cur_service == service && cur_weight == weight)
    })
}

/// Delete owned splits the rollout no longer references
///
/// Selection is by the ownership label this adapter stamps at creation;
/// splits owned by other rollouts are never touched.
pub async fn gc_orphaned_splits(
    client: kube::Client,
    namespace: &str,
    rollout_name: &str,
    keep: Option<&str>,
) -> Result<u32, TrafficError> {
    let api: Api<DynamicObject> =
        Api::namespaced_with(client, namespace, &split_api_resource());
    let params = ListParams::default().labels(&format!("{}={}", MANAGED_BY_LABEL, rollout_name));

    let splits = match api.list(&params).await {
        Ok(list) => list.items,
        Err(kube::Error::Api(err)) if err.code == 404 => {
            // TrafficSplit CRD not installed in this cluster; nothing owned
            return Ok(0);
        }
        Err(e) => return Err(TrafficError::KubeError(e)),
    };

    let mut deleted = 0;
    for obj in splits {
        let name = match &obj.metadata.name {
            Some(name) => name.clone(),
            None => continue,
        };
        if Some(name.as_str()) == keep {
            continue;
        }
        info!(trafficsplit = ?name, rollout = ?rollout_name, "Deleting orphaned TrafficSplit");
        api.delete(&name, &DeleteParams::default()).await?;
        deleted += 1;
    }
    Ok(deleted)
}
