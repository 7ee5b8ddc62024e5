//! Labels, owner references and constants shared by the object generators

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;

use crate::crd::Dogu;

/// API version for the Dogu CRD
pub const API_VERSION: &str = "k8s.cloudogu.com/v2";

/// Kind for the Dogu CRD
pub const KIND: &str = "Dogu";

/// Field manager of every server-side apply the operator sends
pub const FIELD_MANAGER: &str = "dogu-operator";

/// Label selecting every object of one dogu
pub const LABEL_DOGU_NAME: &str = "dogu.name";

/// Pod-template label carrying the deployed dogu version
pub const LABEL_DOGU_VERSION: &str = "dogu.version";

/// Label marking the exec pod of a dogu
pub const LABEL_EXEC_POD: &str = "dogu.execpod";

/// Deployment annotation holding the version installed before the running upgrade
pub const ANNOTATION_PREVIOUS_VERSION: &str = "k8s.cloudogu.com/previous-dogu-version";

/// Deployment annotation recording the target version whose pre-upgrade script already ran
pub const ANNOTATION_PRE_UPGRADE_VERSION: &str = "k8s.cloudogu.com/pre-upgrade-version";

/// Pod annotation recording the version whose post-upgrade script already ran
pub const ANNOTATION_POST_UPGRADE_VERSION: &str = "k8s.cloudogu.com/post-upgrade-version";

/// Annotation on config objects carrying the time of their last change (RFC3339)
pub const ANNOTATION_LAST_UPDATED: &str = "k8s.cloudogu.com/last-updated";

/// Pod template annotation stamped by a rollout restart
pub const ANNOTATION_RESTARTED_AT: &str = "kubectl.kubernetes.io/restartedAt";

/// Generate an owner reference for a Dogu
///
/// Child resources are garbage collected together with their Dogu.
pub fn owner_reference(dogu: &Dogu) -> OwnerReference {
    OwnerReference {
        api_version: API_VERSION.to_string(),
        kind: KIND.to_string(),
        name: dogu.name_any(),
        uid: dogu.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Standard labels for all resources belonging to a dogu
pub fn standard_labels(dogu_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), "ces".to_string()),
        (
            "app.kubernetes.io/managed-by".to_string(),
            FIELD_MANAGER.to_string(),
        ),
        (LABEL_DOGU_NAME.to_string(), dogu_name.to_string()),
    ])
}

/// Labels of the dogu pods, including the deployed version
pub fn versioned_labels(dogu_name: &str, version: &str) -> BTreeMap<String, String> {
    let mut labels = standard_labels(dogu_name);
    labels.insert(LABEL_DOGU_VERSION.to_string(), version.to_string());
    labels
}

/// Selector labels matching every pod of a dogu regardless of version
pub fn selector_labels(dogu_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(LABEL_DOGU_NAME.to_string(), dogu_name.to_string())])
}

/// Label selector string for list calls
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}
