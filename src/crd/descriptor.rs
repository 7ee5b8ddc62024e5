//! Dogu descriptor (`dogu.json`) model
//!
//! The descriptor is published by the vendor of a dogu and describes its image,
//! dependencies, exposed commands and volumes. It is not a cluster resource; the
//! operator reads it from the local dogu registry.

use serde::{Deserialize, Serialize};

/// Name of the exposed command run before the deployment is switched to a new version
pub const PRE_UPGRADE_COMMAND: &str = "pre-upgrade";

/// Name of the exposed command run in the new version after an upgrade
pub const POST_UPGRADE_COMMAND: &str = "post-upgrade";

/// Dependency type referring to another dogu
pub const DEPENDENCY_TYPE_DOGU: &str = "dogu";

/// Descriptor of one dogu version
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct DoguDescriptor {
    /// Qualified name (e.g. "official/ldap")
    pub name: String,

    /// Version of the descriptor (e.g. "2.4.48-4")
    pub version: String,

    /// Image without tag (e.g. "registry.cloudogu.com/official/ldap")
    pub image: String,

    #[serde(default)]
    pub dependencies: Vec<Dependency>,

    #[serde(default)]
    pub exposed_commands: Vec<ExposedCommand>,

    #[serde(default)]
    pub exposed_ports: Vec<ExposedPort>,

    #[serde(default)]
    pub volumes: Vec<DescriptorVolume>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Dependency {
    #[serde(rename = "Type", default = "default_dependency_type")]
    pub type_: String,

    pub name: String,

    /// Version constraint (e.g. ">=2.0.0"); not evaluated by the operator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

fn default_dependency_type() -> String {
    DEPENDENCY_TYPE_DOGU.to_string()
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ExposedCommand {
    pub name: String,

    /// Absolute path of the executable inside the dogu image
    pub command: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ExposedPort {
    #[serde(rename = "Type", default = "default_port_type")]
    pub type_: String,

    pub container: i32,

    pub host: i32,
}

fn default_port_type() -> String {
    "tcp".to_string()
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct DescriptorVolume {
    pub name: String,

    /// Mount path inside the container
    pub path: String,
}

impl DoguDescriptor {
    /// Name without the registry namespace
    pub fn simple_name(&self) -> &str {
        self.name
            .rsplit_once('/')
            .map(|(_, simple)| simple)
            .unwrap_or(&self.name)
    }

    /// Fully qualified image reference of this version
    pub fn image_reference(&self) -> String {
        format!("{}:{}", self.image, self.version)
    }

    /// Look up an exposed command by name
    pub fn exposed_command(&self, name: &str) -> Option<&ExposedCommand> {
        self.exposed_commands.iter().find(|c| c.name == name)
    }

    /// Qualified or simple names of all dogus this dogu depends on
    pub fn dogu_dependencies(&self) -> impl Iterator<Item = &Dependency> {
        self.dependencies
            .iter()
            .filter(|d| d.type_ == DEPENDENCY_TYPE_DOGU)
    }

    /// Check whether this dogu declares a dependency on the given dogu.
    /// Both qualified ("official/postfix") and simple ("postfix") names match.
    pub fn depends_on(&self, dogu_name: &str) -> bool {
        let simple = dogu_name
            .rsplit_once('/')
            .map(|(_, s)| s)
            .unwrap_or(dogu_name);
        self.dogu_dependencies().any(|d| {
            let dep_simple = d.name.rsplit_once('/').map(|(_, s)| s).unwrap_or(&d.name);
            d.name == dogu_name || dep_simple == simple
        })
    }

    /// True when the dogu stores data and therefore needs a data volume
    pub fn needs_data_volume(&self) -> bool {
        !self.volumes.is_empty()
    }
}
