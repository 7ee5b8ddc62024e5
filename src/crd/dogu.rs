use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One Dogu resource represents one installed packaged application. The
/// operator converges the Deployment, Service and data volume of the dogu
/// towards `spec.version` and records the result in the status.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[kube(
    group = "k8s.cloudogu.com",
    version = "v2",
    kind = "Dogu",
    plural = "dogus",
    namespaced,
    status = "DoguStatus",
    printcolumn = r#"{"name":"Spec-Version", "type":"string", "jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Installed-Version", "type":"string", "jsonPath":".status.installedVersion"}"#,
    printcolumn = r#"{"name":"Stopped", "type":"boolean", "jsonPath":".spec.stopped"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DoguSpec {
    /// Qualified dogu name including its namespace in the registry (e.g. "official/ldap")
    pub name: String,

    /// Version to install or upgrade to (e.g. "2.4.48-4")
    pub version: String,

    /// Scale the dogu down to zero replicas while keeping all of its resources
    #[serde(default)]
    pub stopped: bool,

    /// Resource settings of the dogu
    #[serde(default)]
    pub resources: DoguResources,

    /// Startup probe failure threshold of the dogu container.
    /// The cluster default applies when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_probe_failure_threshold: Option<i32>,

    /// Upgrade behaviour
    #[serde(default)]
    pub upgrade_config: UpgradeConfig,
}

/// Resource settings of a dogu
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DoguResources {
    /// Minimum size of the data volume (e.g. "5Gi").
    /// The volume is grown when its capacity is below this size; it is never shrunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_data_volume_size: Option<String>,
}

/// Upgrade behaviour of a dogu
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeConfig {
    /// Allow switching to a lower version
    #[serde(default)]
    pub force_upgrade: bool,
}

/// Status of a Dogu
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DoguStatus {
    /// Version that was installed successfully the last time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_version: Option<String>,

    /// Conditions representing the latest observations of the dogu
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Start time of the most recently started dogu pod (RFC3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,

    /// Generation of the spec that was last reconciled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// One observation about the dogu, shaped like the conditions of core resources
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Healthy, Ready or Progressing
    #[serde(rename = "type")]
    pub type_: String,

    /// "True", "False" or "Unknown"
    pub status: String,

    /// CamelCase cause of the current status
    pub reason: String,

    pub message: String,

    /// RFC3339 time of the last status flip
    pub last_transition_time: String,

    /// Dogu generation the condition was computed for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl DoguSpec {
    /// Name without the registry namespace ("official/ldap" -> "ldap")
    pub fn simple_name(&self) -> &str {
        self.name
            .rsplit_once('/')
            .map(|(_, simple)| simple)
            .unwrap_or(&self.name)
    }
}

impl Dogu {
    /// Version recorded in the status after the last successful install or upgrade
    pub fn installed_version(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.installed_version.as_deref())
    }

    /// Current conditions, empty when no status has been written yet
    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }

    /// Look up a condition by type
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions().iter().find(|c| c.type_ == type_)
    }

    /// True while the spec asks for a version other than the installed one
    pub fn is_upgrade(&self) -> bool {
        self.installed_version()
            .is_some_and(|installed| installed != self.spec.version)
    }

    /// True once the API server marked the resource for deletion
    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}
