//! Service generation for dogus
//!
//! One ClusterIP service per dogu named after the dogu, exposing the ports
//! declared in its descriptor. Dogus without exposed ports get no service.

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::crd::{Dogu, DoguDescriptor};
use crate::resources::common::{owner_reference, selector_labels, standard_labels};

/// Generate the service of a dogu, or `None` when it exposes no ports
pub fn generate_service(dogu: &Dogu, descriptor: &DoguDescriptor) -> Option<Service> {
    if descriptor.exposed_ports.is_empty() {
        return None;
    }

    let name = dogu.name_any();
    let ports = descriptor
        .exposed_ports
        .iter()
        .map(|p| {
            let protocol = p.type_.to_uppercase();
            ServicePort {
                name: Some(format!("{}-{}", p.type_.to_lowercase(), p.container)),
                port: p.container,
                target_port: Some(IntOrString::Int(p.container)),
                protocol: Some(protocol),
                ..Default::default()
            }
        })
        .collect();

    Some(Service {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: dogu.namespace(),
            labels: Some(standard_labels(&name)),
            owner_references: Some(vec![owner_reference(dogu)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(selector_labels(&name)),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    })
}
