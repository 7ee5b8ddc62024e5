//! Dependency validation
//!
//! A dogu may only be installed or upgraded once every dogu it depends on is
//! present and installed in the namespace. Version constraints of
//! dependencies are not evaluated.

use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::controller::error::{Error, Result};
use crate::controller::kube_client::KubeClient;
use crate::crd::DoguDescriptor;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait DependencyValidator: Send + Sync {
    /// Fail when any dogu dependency of `descriptor` is missing
    async fn validate(&self, descriptor: &DoguDescriptor) -> Result<()>;
}

/// Validator checking Dogu resources in the watched namespace
pub struct InstalledDoguValidator {
    kube: Arc<dyn KubeClient>,
}

impl InstalledDoguValidator {
    pub fn new(kube: Arc<dyn KubeClient>) -> Self {
        Self { kube }
    }
}

#[async_trait]
impl DependencyValidator for InstalledDoguValidator {
    async fn validate(&self, descriptor: &DoguDescriptor) -> Result<()> {
        let dependencies: Vec<_> = descriptor.dogu_dependencies().collect();
        if dependencies.is_empty() {
            return Ok(());
        }

        let installed = self.kube.list_dogus().await?;

        let errors = dependencies
            .into_iter()
            .filter(|dep| {
                let simple = dep.name.rsplit_once('/').map(|(_, s)| s).unwrap_or(&dep.name);
                !installed
                    .iter()
                    .any(|d| d.spec.simple_name() == simple && d.installed_version().is_some())
            })
            .map(|dep| {
                Error::DependencyError(format!(
                    "{} requires dogu {} which is not installed",
                    descriptor.name, dep.name
                ))
            })
            .collect();

        Error::aggregate(errors)
    }
}
