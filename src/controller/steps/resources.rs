//! Steps applying the owned Kubernetes objects of a dogu

use std::sync::Arc;

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::controller::descriptor::DescriptorFetcher;
use crate::controller::error::Result;
use crate::controller::kube_client::KubeClient;
use crate::controller::step::{Step, StepResult};
use crate::crd::Dogu;
use crate::resources::deployment::{
    DeploymentParams, WIDENED_STARTUP_FAILURE_THRESHOLD, generate_deployment,
    has_widened_startup_probe,
};
use crate::resources::quantity::max_quantity;
use crate::resources::service::generate_service;
use crate::resources::volume::{data_claim_name, generate_data_claim};

pub struct ApplyServiceStep {
    kube: Arc<dyn KubeClient>,
    descriptors: Arc<dyn DescriptorFetcher>,
}

impl ApplyServiceStep {
    pub fn new(kube: Arc<dyn KubeClient>, descriptors: Arc<dyn DescriptorFetcher>) -> Self {
        Self { kube, descriptors }
    }
}

#[async_trait]
impl Step for ApplyServiceStep {
    fn name(&self) -> &'static str {
        "ApplyService"
    }

    async fn run(&self, dogu: &mut Dogu) -> Result<StepResult> {
        let descriptor = self.descriptors.fetch_for_resource(dogu).await?;
        match generate_service(dogu, &descriptor) {
            Some(service) => self.kube.apply_service(&service).await?,
            None => debug!(dogu = %dogu.name_any(), "Dogu exposes no ports, no service"),
        }
        Ok(StepResult::Continue)
    }
}

/// Create the data claim once; later size changes go through the resize step
pub struct ApplyDataVolumeStep {
    kube: Arc<dyn KubeClient>,
    descriptors: Arc<dyn DescriptorFetcher>,
    default_size: String,
}

impl ApplyDataVolumeStep {
    pub fn new(
        kube: Arc<dyn KubeClient>,
        descriptors: Arc<dyn DescriptorFetcher>,
        default_size: String,
    ) -> Self {
        Self {
            kube,
            descriptors,
            default_size,
        }
    }
}

#[async_trait]
impl Step for ApplyDataVolumeStep {
    fn name(&self) -> &'static str {
        "ApplyDataVolume"
    }

    async fn run(&self, dogu: &mut Dogu) -> Result<StepResult> {
        let descriptor = self.descriptors.fetch_for_resource(dogu).await?;
        if !descriptor.needs_data_volume() {
            return Ok(StepResult::Continue);
        }

        let claim_name = data_claim_name(dogu);
        if self.kube.get_claim(&claim_name).await?.is_some() {
            return Ok(StepResult::Continue);
        }

        let size = match dogu.spec.resources.min_data_volume_size.as_deref() {
            Some(minimum) => max_quantity(minimum, &self.default_size)?,
            None => self.default_size.as_str(),
        };
        self.kube
            .create_claim(&generate_data_claim(dogu, size))
            .await?;

        info!(claim = %claim_name, size, "Created data volume claim");
        Ok(StepResult::Continue)
    }
}

/// Apply the Deployment of the requested version
///
/// A widened startup probe on the live object is carried over so that applying
/// the new version does not cut short the first boot.
pub struct ApplyDeploymentStep {
    kube: Arc<dyn KubeClient>,
    descriptors: Arc<dyn DescriptorFetcher>,
}

impl ApplyDeploymentStep {
    pub fn new(kube: Arc<dyn KubeClient>, descriptors: Arc<dyn DescriptorFetcher>) -> Self {
        Self { kube, descriptors }
    }
}

#[async_trait]
impl Step for ApplyDeploymentStep {
    fn name(&self) -> &'static str {
        "ApplyDeployment"
    }

    async fn run(&self, dogu: &mut Dogu) -> Result<StepResult> {
        let name = dogu.name_any();
        let descriptor = self.descriptors.fetch_for_resource(dogu).await?;
        let live = self.kube.get_deployment(&name).await?;

        let widened = live
            .as_ref()
            .is_some_and(|d| has_widened_startup_probe(d, &name));

        let params = DeploymentParams {
            replicas: if dogu.spec.stopped { 0 } else { 1 },
            startup_failure_threshold: if widened {
                Some(WIDENED_STARTUP_FAILURE_THRESHOLD)
            } else {
                dogu.spec.startup_probe_failure_threshold
            },
            previous_version: dogu
                .is_upgrade()
                .then(|| dogu.installed_version().map(str::to_string))
                .flatten(),
        };

        let deployment = generate_deployment(dogu, &descriptor, &params);
        self.kube.apply_deployment(&deployment).await?;

        debug!(
            deployment = %name,
            version = %dogu.spec.version,
            replicas = params.replicas,
            widened,
            "Applied deployment"
        );
        Ok(StepResult::Continue)
    }
}
