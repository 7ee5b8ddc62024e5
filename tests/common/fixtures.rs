//! Test fixtures and builders for Dogu resources and registry entries
//!
//! # Quick Start
//!
//! ```rust,ignore
//! let dogu = DoguBuilder::new("ldap", "2.0.0").installed("1.0.0").build();
//! let descriptor = DescriptorBuilder::new("ldap", "2.0.0")
//!     .with_command("pre-upgrade", "/resources/pre-upgrade.sh")
//!     .build();
//! let registry = registry_config_map("ldap", &[descriptor]);
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use dogu_operator::crd::{
    Dependency, DescriptorVolume, Dogu, DoguDescriptor, DoguResources, DoguSpec, DoguStatus,
    ExposedCommand, ExposedPort, UpgradeConfig,
};
use dogu_operator::controller::descriptor::registry_config_map_name;
use dogu_operator::resources::common::ANNOTATION_LAST_UPDATED;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::core::ObjectMeta;

/// Namespace all fixtures live in
pub const NAMESPACE: &str = "ecosystem";

/// Fixed point in time, shifted by `secs`
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

// =============================================================================
// Dogu Builder
// =============================================================================

/// Builder for Dogu resources
pub struct DoguBuilder {
    name: String,
    version: String,
    installed: Option<String>,
    stopped: bool,
    startup_threshold: Option<i32>,
    min_volume_size: Option<String>,
    force_upgrade: bool,
    finalizers: Vec<String>,
    deleted: bool,
}

impl DoguBuilder {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            installed: None,
            stopped: false,
            startup_threshold: None,
            min_volume_size: None,
            force_upgrade: false,
            finalizers: vec![],
            deleted: false,
        }
    }

    pub fn installed(mut self, version: &str) -> Self {
        self.installed = Some(version.to_string());
        self
    }

    pub fn stopped(mut self) -> Self {
        self.stopped = true;
        self
    }

    pub fn with_startup_threshold(mut self, threshold: i32) -> Self {
        self.startup_threshold = Some(threshold);
        self
    }

    pub fn with_min_volume_size(mut self, size: &str) -> Self {
        self.min_volume_size = Some(size.to_string());
        self
    }

    pub fn force_upgrade(mut self) -> Self {
        self.force_upgrade = true;
        self
    }

    pub fn with_finalizer(mut self, finalizer: &str) -> Self {
        self.finalizers.push(finalizer.to_string());
        self
    }

    /// Mark the Dogu as being deleted
    pub fn deleted(mut self) -> Self {
        self.deleted = true;
        self
    }

    pub fn build(self) -> Dogu {
        Dogu {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(NAMESPACE.to_string()),
                uid: Some(format!("{}-uid", self.name)),
                generation: Some(1),
                finalizers: (!self.finalizers.is_empty()).then_some(self.finalizers),
                deletion_timestamp: self.deleted.then(|| Time(at(0))),
                ..Default::default()
            },
            spec: DoguSpec {
                name: format!("official/{}", self.name),
                version: self.version,
                stopped: self.stopped,
                resources: DoguResources {
                    min_data_volume_size: self.min_volume_size,
                },
                startup_probe_failure_threshold: self.startup_threshold,
                upgrade_config: UpgradeConfig {
                    force_upgrade: self.force_upgrade,
                },
            },
            status: self.installed.map(|v| DoguStatus {
                installed_version: Some(v),
                ..Default::default()
            }),
        }
    }
}

// =============================================================================
// Descriptor Builder
// =============================================================================

/// Builder for dogu descriptors as published in the local registry
pub struct DescriptorBuilder {
    descriptor: DoguDescriptor,
}

impl DescriptorBuilder {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            descriptor: DoguDescriptor {
                name: format!("official/{name}"),
                version: version.to_string(),
                image: format!("registry.cloudogu.com/official/{name}"),
                dependencies: vec![],
                exposed_commands: vec![],
                exposed_ports: vec![],
                volumes: vec![],
            },
        }
    }

    pub fn with_dependency(mut self, dogu: &str) -> Self {
        self.descriptor.dependencies.push(Dependency {
            type_: "dogu".to_string(),
            name: format!("official/{dogu}"),
            version: None,
        });
        self
    }

    pub fn with_command(mut self, name: &str, command: &str) -> Self {
        self.descriptor.exposed_commands.push(ExposedCommand {
            name: name.to_string(),
            command: command.to_string(),
        });
        self
    }

    pub fn with_port(mut self, port: i32) -> Self {
        self.descriptor.exposed_ports.push(ExposedPort {
            type_: "tcp".to_string(),
            container: port,
            host: port,
        });
        self
    }

    pub fn with_volume(mut self, name: &str, path: &str) -> Self {
        self.descriptor.volumes.push(DescriptorVolume {
            name: name.to_string(),
            path: path.to_string(),
        });
        self
    }

    pub fn build(self) -> DoguDescriptor {
        self.descriptor
    }
}

// =============================================================================
// Registry and Config Objects
// =============================================================================

/// Local registry ConfigMap holding the given descriptor versions of one dogu
pub fn registry_config_map(dogu: &str, descriptors: &[DoguDescriptor]) -> ConfigMap {
    let data = descriptors
        .iter()
        .map(|d| (d.version.clone(), serde_json::to_string(d).unwrap()))
        .collect::<BTreeMap<_, _>>();

    ConfigMap {
        metadata: ObjectMeta {
            name: Some(registry_config_map_name(dogu)),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}

/// Configuration ConfigMap whose last change happened at `changed_at`
pub fn config_map_changed_at(name: &str, changed_at: DateTime<Utc>) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            annotations: Some(BTreeMap::from([(
                ANNOTATION_LAST_UPDATED.to_string(),
                changed_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            )])),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            "logging/root".to_string(),
            "INFO".to_string(),
        )])),
        ..Default::default()
    }
}
