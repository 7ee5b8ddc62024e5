//! Deployment generation and inspection for dogus

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, ExecAction, PersistentVolumeClaimVolumeSource, PodSpec,
    PodTemplateSpec, Probe, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;

use crate::crd::{Dogu, DoguDescriptor};
use crate::resources::common::{
    ANNOTATION_PRE_UPGRADE_VERSION, ANNOTATION_PREVIOUS_VERSION, LABEL_DOGU_VERSION,
    owner_reference, selector_labels, standard_labels, versioned_labels,
};
use crate::resources::volume::data_claim_name;

/// Startup probe threshold used while a new version boots for the first time
pub const WIDENED_STARTUP_FAILURE_THRESHOLD: i32 = 1080;

/// Name of the pod volume backed by the data claim
const DATA_VOLUME: &str = "dogu-data";

/// Inputs of a rendered deployment that depend on live cluster state
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeploymentParams {
    /// 0 while the dogu is stopped, otherwise 1
    pub replicas: i32,
    /// Startup probe failure threshold; `None` keeps the cluster default
    pub startup_failure_threshold: Option<i32>,
    /// Version installed before the running upgrade
    pub previous_version: Option<String>,
}

/// Generate the Deployment of a dogu version
pub fn generate_deployment(
    dogu: &Dogu,
    descriptor: &DoguDescriptor,
    params: &DeploymentParams,
) -> Deployment {
    let name = dogu.name_any();
    let version = &dogu.spec.version;

    let startup_probe = Probe {
        exec: Some(ExecAction {
            command: Some(vec![
                "doguctl".to_string(),
                "state".to_string(),
                "ready".to_string(),
            ]),
        }),
        period_seconds: Some(10),
        timeout_seconds: Some(1),
        failure_threshold: params.startup_failure_threshold,
        ..Default::default()
    };

    let ports = descriptor
        .exposed_ports
        .iter()
        .map(|p| ContainerPort {
            container_port: p.container,
            protocol: Some(p.type_.to_uppercase()),
            ..Default::default()
        })
        .collect::<Vec<_>>();

    let volume_mounts = descriptor
        .volumes
        .iter()
        .map(|v| VolumeMount {
            name: DATA_VOLUME.to_string(),
            mount_path: v.path.clone(),
            sub_path: Some(v.name.clone()),
            ..Default::default()
        })
        .collect::<Vec<_>>();

    let volumes = descriptor.needs_data_volume().then(|| {
        vec![Volume {
            name: DATA_VOLUME.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: data_claim_name(dogu),
                read_only: Some(false),
            }),
            ..Default::default()
        }]
    });

    let container = Container {
        name: name.clone(),
        image: Some(descriptor.image_reference()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        ports: (!ports.is_empty()).then_some(ports),
        volume_mounts: (!volume_mounts.is_empty()).then_some(volume_mounts),
        startup_probe: Some(startup_probe),
        ..Default::default()
    };

    let annotations = params
        .previous_version
        .as_ref()
        .map(|v| BTreeMap::from([(ANNOTATION_PREVIOUS_VERSION.to_string(), v.clone())]));

    Deployment {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: dogu.namespace(),
            labels: Some(standard_labels(&name)),
            annotations,
            owner_references: Some(vec![owner_reference(dogu)]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(params.replicas),
            selector: LabelSelector {
                match_labels: Some(selector_labels(&name)),
                ..Default::default()
            },
            // Dogus hold exclusive locks on their data volume
            strategy: Some(DeploymentStrategy {
                type_: Some("Recreate".to_string()),
                ..Default::default()
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(versioned_labels(&name, version)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    hostname: Some(name.clone()),
                    containers: vec![container],
                    volumes,
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Version recorded in the pod template label of a deployment
pub fn template_version(deployment: &Deployment) -> Option<&str> {
    deployment
        .spec
        .as_ref()?
        .template
        .metadata
        .as_ref()?
        .labels
        .as_ref()?
        .get(LABEL_DOGU_VERSION)
        .map(String::as_str)
}

/// Startup probe failure threshold of the named container
pub fn startup_failure_threshold(deployment: &Deployment, container: &str) -> Option<i32> {
    deployment
        .spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .containers
        .iter()
        .find(|c| c.name == container)?
        .startup_probe
        .as_ref()?
        .failure_threshold
}

/// True while the named container runs with the widened startup threshold
pub fn has_widened_startup_probe(deployment: &Deployment, container: &str) -> bool {
    startup_failure_threshold(deployment, container) == Some(WIDENED_STARTUP_FAILURE_THRESHOLD)
}

/// Desired replica count of a deployment
pub fn desired_replicas(deployment: &Deployment) -> i32 {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1)
}

/// Previous-version annotation of a deployment
pub fn previous_version(deployment: &Deployment) -> Option<&str> {
    deployment
        .metadata
        .annotations
        .as_ref()?
        .get(ANNOTATION_PREVIOUS_VERSION)
        .map(String::as_str)
}

/// Target version whose pre-upgrade script finished against this deployment
pub fn pre_upgrade_version(deployment: &Deployment) -> Option<&str> {
    deployment
        .metadata
        .annotations
        .as_ref()?
        .get(ANNOTATION_PRE_UPGRADE_VERSION)
        .map(String::as_str)
}

/// True once every pod runs the current template, whether or not it is
/// available yet
pub fn rollout_settled(deployment: &Deployment) -> bool {
    let Some(status) = deployment.status.as_ref() else {
        return false;
    };
    if deployment.metadata.generation != status.observed_generation {
        return false;
    }
    let updated = status.updated_replicas.unwrap_or(0);
    updated == desired_replicas(deployment) && status.replicas.unwrap_or(0) == updated
}

/// Check whether the deployment controller has finished rolling out the current spec.
///
/// Complete means the latest generation was observed, no replica runs an outdated
/// template and every desired replica is available.
pub fn rollout_complete(deployment: &Deployment) -> bool {
    let Some(status) = deployment.status.as_ref() else {
        return false;
    };

    if deployment.metadata.generation != status.observed_generation {
        return false;
    }

    let desired = desired_replicas(deployment);
    let total = status.replicas.unwrap_or(0);
    let updated = status.updated_replicas.unwrap_or(0);
    let available = status.available_replicas.unwrap_or(0);

    updated == desired && total == updated && available >= desired
}

/// True when at least one replica is available
pub fn is_available(deployment: &Deployment) -> bool {
    deployment
        .status
        .as_ref()
        .and_then(|s| s.available_replicas)
        .unwrap_or(0)
        > 0
}
