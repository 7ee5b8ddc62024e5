//! Dogu configuration sources
//!
//! Three repositories feed the restart detector: the dogu's own config
//! (`<dogu>-config` ConfigMap), its sensitive config (`<dogu>-config` Secret)
//! and the cluster-wide `global-config` ConfigMap. Only the time of the last
//! change matters to the operator; entries are exposed for completeness.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
#[cfg(test)]
use mockall::automock;

use crate::controller::error::Result;
use crate::controller::kube_client::KubeClient;
use crate::resources::common::ANNOTATION_LAST_UPDATED;

/// Name of the cluster-wide configuration object
pub const GLOBAL_CONFIG_NAME: &str = "global-config";

/// Snapshot of one configuration source
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DoguConfig {
    pub entries: BTreeMap<String, String>,
    /// Time of the last change; `None` when the source never recorded one
    pub last_updated: Option<DateTime<Utc>>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConfigRepository: Send + Sync {
    /// Load the configuration belonging to the dogu `name`.
    /// An absent configuration object is `Ok(None)`.
    async fn get(&self, name: &str) -> Result<Option<DoguConfig>>;
}

/// Which configuration object a repository reads
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigKind {
    Dogu,
    Sensitive,
    Global,
}

impl ConfigKind {
    /// Object name holding the configuration of the given dogu
    pub fn object_name(&self, dogu: &str) -> String {
        match self {
            ConfigKind::Dogu | ConfigKind::Sensitive => format!("{dogu}-config"),
            ConfigKind::Global => GLOBAL_CONFIG_NAME.to_string(),
        }
    }
}

/// Repository backed by ConfigMaps (dogu, global) or Secrets (sensitive)
pub struct KubeConfigRepository {
    kube: Arc<dyn KubeClient>,
    kind: ConfigKind,
}

impl KubeConfigRepository {
    pub fn new(kube: Arc<dyn KubeClient>, kind: ConfigKind) -> Self {
        Self { kube, kind }
    }
}

#[async_trait]
impl ConfigRepository for KubeConfigRepository {
    async fn get(&self, name: &str) -> Result<Option<DoguConfig>> {
        let object_name = self.kind.object_name(name);

        let config = match self.kind {
            ConfigKind::Dogu | ConfigKind::Global => {
                self.kube.get_config_map(&object_name).await?.map(|cm| DoguConfig {
                    last_updated: last_updated(&cm.metadata),
                    entries: cm.data.unwrap_or_default(),
                })
            }
            ConfigKind::Sensitive => self.kube.get_secret(&object_name).await?.map(|secret| {
                let mut entries: BTreeMap<String, String> = secret
                    .data
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(k, v)| (k, String::from_utf8_lossy(&v.0).to_string()))
                    .collect();
                entries.extend(secret.string_data.unwrap_or_default());
                DoguConfig {
                    last_updated: last_updated(&secret.metadata),
                    entries,
                }
            }),
        };

        Ok(config)
    }
}

/// Time of the last change of a configuration object.
///
/// The explicit annotation wins; objects written by other tools fall back to
/// the newest managed-fields entry.
pub fn last_updated(metadata: &ObjectMeta) -> Option<DateTime<Utc>> {
    let annotated = metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ANNOTATION_LAST_UPDATED))
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|t| t.with_timezone(&Utc));

    annotated.or_else(|| {
        metadata
            .managed_fields
            .as_ref()?
            .iter()
            .filter_map(|f| f.time.as_ref().map(|t| t.0))
            .max()
    })
}
