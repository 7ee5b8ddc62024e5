//! Dogu descriptor lookup
//!
//! Descriptors are read from the local dogu registry: one ConfigMap per dogu
//! named `dogu-spec-<dogu>`, whose data maps each available version to the
//! descriptor JSON of that version.

use std::sync::Arc;

use async_trait::async_trait;
use kube::ResourceExt;
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::controller::error::{Error, Result};
use crate::controller::kube_client::KubeClient;
use crate::crd::{Dogu, DoguDescriptor};

#[cfg_attr(test, automock)]
#[async_trait]
pub trait DescriptorFetcher: Send + Sync {
    /// Descriptor of the version currently installed for dogu `name`
    async fn fetch_installed(&self, name: &str) -> Result<DoguDescriptor>;

    /// Descriptor of the version a Dogu resource asks for
    async fn fetch_for_resource(&self, dogu: &Dogu) -> Result<DoguDescriptor>;
}

/// Name of the registry ConfigMap of a dogu
pub fn registry_config_map_name(dogu: &str) -> String {
    format!("dogu-spec-{dogu}")
}

/// Fetcher backed by the local registry ConfigMaps
pub struct LocalRegistryFetcher {
    kube: Arc<dyn KubeClient>,
}

impl LocalRegistryFetcher {
    pub fn new(kube: Arc<dyn KubeClient>) -> Self {
        Self { kube }
    }

    async fn fetch(&self, dogu: &str, version: &str) -> Result<DoguDescriptor> {
        let cm_name = registry_config_map_name(dogu);
        let config_map = self
            .kube
            .get_config_map(&cm_name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("dogu registry entry {cm_name}")))?;

        let raw = config_map
            .data
            .as_ref()
            .and_then(|d| d.get(version))
            .ok_or_else(|| {
                Error::NotFound(format!("descriptor of {dogu} version {version} in {cm_name}"))
            })?;

        debug!(dogu, version, "Loaded descriptor from local registry");
        Ok(serde_json::from_str(raw)?)
    }
}

#[async_trait]
impl DescriptorFetcher for LocalRegistryFetcher {
    async fn fetch_installed(&self, name: &str) -> Result<DoguDescriptor> {
        let dogu = self
            .kube
            .get_dogu(name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("dogu {name}")))?;
        let version = dogu
            .installed_version()
            .ok_or_else(|| Error::NotFound(format!("installed version of dogu {name}")))?;
        self.fetch(name, version).await
    }

    async fn fetch_for_resource(&self, dogu: &Dogu) -> Result<DoguDescriptor> {
        self.fetch(&dogu.name_any(), &dogu.spec.version).await
    }
}
