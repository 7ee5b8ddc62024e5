//! Data volume claims of dogus

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use crate::crd::Dogu;
use crate::resources::common::{owner_reference, standard_labels};

/// Condition set on a claim once the backend grew the volume but the
/// filesystem has not been expanded yet
pub const FILESYSTEM_RESIZE_PENDING: &str = "FileSystemResizePending";

/// Name of the data claim of a dogu
pub fn data_claim_name(dogu: &Dogu) -> String {
    dogu.name_any()
}

/// Generate the data claim of a dogu with the given requested size
pub fn generate_data_claim(dogu: &Dogu, size: &str) -> PersistentVolumeClaim {
    let name = dogu.name_any();

    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(data_claim_name(dogu)),
            namespace: dogu.namespace(),
            labels: Some(standard_labels(&name)),
            owner_references: Some(vec![owner_reference(dogu)]),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(size.to_string()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Storage size requested in the claim spec
pub fn requested_storage(claim: &PersistentVolumeClaim) -> Option<&Quantity> {
    claim
        .spec
        .as_ref()?
        .resources
        .as_ref()?
        .requests
        .as_ref()?
        .get("storage")
}

/// Storage capacity reported by the bound volume
pub fn capacity(claim: &PersistentVolumeClaim) -> Option<&Quantity> {
    claim.status.as_ref()?.capacity.as_ref()?.get("storage")
}

/// True while the claim waits for its filesystem to be expanded
pub fn is_filesystem_resize_pending(claim: &PersistentVolumeClaim) -> bool {
    claim
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == FILESYSTEM_RESIZE_PENDING && c.status == "True")
        })
}
