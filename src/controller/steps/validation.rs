//! Descriptor and dependency validation
//!
//! Dogu versions look like `2.4.48-4`: dot separated upstream components
//! followed by a dash separated package release. Both parts compare
//! numerically, component by component.

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::debug;

use crate::controller::dependency::DependencyValidator;
use crate::controller::descriptor::DescriptorFetcher;
use crate::controller::error::{Error, Result};
use crate::controller::step::{Step, StepResult};
use crate::crd::Dogu;

/// Compare two dogu versions
///
/// Missing components count as zero. Non-numeric components fall back to a
/// lexical comparison.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let split = |v: &str| -> Vec<String> {
        v.split(['.', '-']).map(str::to_string).collect()
    };
    let (a, b) = (split(a), split(b));

    for i in 0..a.len().max(b.len()) {
        let left = a.get(i).map(String::as_str).unwrap_or("0");
        let right = b.get(i).map(String::as_str).unwrap_or("0");
        let ordering = match (left.parse::<u64>(), right.parse::<u64>()) {
            (Ok(l), Ok(r)) => l.cmp(&r),
            _ => left.cmp(right),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Verify that the descriptor of the requested version fits the resource
pub struct ValidateDescriptorStep {
    descriptors: Arc<dyn DescriptorFetcher>,
}

impl ValidateDescriptorStep {
    pub fn new(descriptors: Arc<dyn DescriptorFetcher>) -> Self {
        Self { descriptors }
    }
}

#[async_trait]
impl Step for ValidateDescriptorStep {
    fn name(&self) -> &'static str {
        "ValidateDescriptor"
    }

    async fn run(&self, dogu: &mut Dogu) -> Result<StepResult> {
        let descriptor = self.descriptors.fetch_for_resource(dogu).await?;

        if descriptor.name != dogu.spec.name {
            return Err(Error::DescriptorMismatch(format!(
                "descriptor is named {} but the resource requests {}",
                descriptor.name, dogu.spec.name
            )));
        }
        if descriptor.version != dogu.spec.version {
            return Err(Error::DescriptorMismatch(format!(
                "descriptor has version {} but the resource requests {}",
                descriptor.version, dogu.spec.version
            )));
        }

        if let Some(installed_version) = dogu.installed_version()
            && dogu.is_upgrade()
        {
            let installed = self.descriptors.fetch_installed(&dogu.name_any()).await?;
            if installed.simple_name() != descriptor.simple_name() {
                return Err(Error::DescriptorMismatch(format!(
                    "upgrade would replace dogu {} with {}",
                    installed.name, descriptor.name
                )));
            }
            if !dogu.spec.upgrade_config.force_upgrade
                && compare_versions(&dogu.spec.version, installed_version) == Ordering::Less
            {
                return Err(Error::ValidationError(format!(
                    "downgrade from {} to {} requires forceUpgrade",
                    installed_version, dogu.spec.version
                )));
            }
        }

        debug!(dogu = %dogu.name_any(), version = %descriptor.version, "Descriptor valid");
        Ok(StepResult::Continue)
    }
}

/// Require every dogu dependency to be installed
pub struct DependencyCheckStep {
    descriptors: Arc<dyn DescriptorFetcher>,
    dependencies: Arc<dyn DependencyValidator>,
}

impl DependencyCheckStep {
    pub fn new(
        descriptors: Arc<dyn DescriptorFetcher>,
        dependencies: Arc<dyn DependencyValidator>,
    ) -> Self {
        Self {
            descriptors,
            dependencies,
        }
    }
}

#[async_trait]
impl Step for DependencyCheckStep {
    fn name(&self) -> &'static str {
        "DependencyCheck"
    }

    async fn run(&self, dogu: &mut Dogu) -> Result<StepResult> {
        let descriptor = self.descriptors.fetch_for_resource(dogu).await?;
        self.dependencies.validate(&descriptor).await?;
        Ok(StepResult::Continue)
    }
}
