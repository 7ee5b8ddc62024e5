//! Exec pod generation
//!
//! The exec pod runs the image of the target dogu version with a no-op command
//! so that files shipped with the new version can be read before the dogu
//! itself is switched over.

use k8s_openapi::api::core::v1::{Container, Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use crate::crd::{Dogu, DoguDescriptor};
use crate::resources::common::{LABEL_DOGU_NAME, LABEL_EXEC_POD, owner_reference, standard_labels};

/// Name of the exec pod of a dogu
pub fn exec_pod_name(dogu: &Dogu) -> String {
    format!("{}-execpod", dogu.name_any())
}

/// Generate the exec pod for the given descriptor version
pub fn generate_exec_pod(dogu: &Dogu, descriptor: &DoguDescriptor) -> Pod {
    let name = exec_pod_name(dogu);
    // without the dogu name label the dogu's Service and pod selectors skip it
    let mut labels = standard_labels(&dogu.name_any());
    labels.remove(LABEL_DOGU_NAME);
    labels.insert(LABEL_EXEC_POD.to_string(), name.clone());

    Pod {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: dogu.namespace(),
            labels: Some(labels),
            owner_references: Some(vec![owner_reference(dogu)]),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name,
                image: Some(descriptor.image_reference()),
                image_pull_policy: Some("IfNotPresent".to_string()),
                command: Some(vec!["/bin/sleep".to_string(), "infinity".to_string()]),
                ..Default::default()
            }],
            restart_policy: Some("Never".to_string()),
            termination_grace_period_seconds: Some(0),
            ..Default::default()
        }),
        ..Default::default()
    }
}
