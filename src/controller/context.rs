use std::sync::Arc;

use kube::Client;

use crate::config::OperatorConfig;
use crate::controller::config_repository::{ConfigKind, ConfigRepository, KubeConfigRepository};
use crate::controller::dependency::{DependencyValidator, InstalledDoguValidator};
use crate::controller::descriptor::{DescriptorFetcher, LocalRegistryFetcher};
use crate::controller::events::{EventPublisher, KubeEventPublisher};
use crate::controller::exec::{CommandExecutor, PodExecutor};
use crate::controller::kube_client::{KubeClient, KubeClientImpl};
use crate::controller::restart::{RestartManager, RolloutRestartManager};
use crate::controller::signals::ReconcileSignals;
use crate::health::HealthState;

/// Name under which the operator publishes events
pub const CONTROLLER_NAME: &str = "dogu-operator";

/// Shared context for the controller
///
/// Every collaborator sits behind a trait object so steps can be exercised
/// against mocks.
#[derive(Clone)]
pub struct Context {
    pub kube: Arc<dyn KubeClient>,
    pub executor: Arc<dyn CommandExecutor>,
    pub descriptors: Arc<dyn DescriptorFetcher>,
    pub dogu_config: Arc<dyn ConfigRepository>,
    pub sensitive_config: Arc<dyn ConfigRepository>,
    pub global_config: Arc<dyn ConfigRepository>,
    pub restarts: Arc<dyn RestartManager>,
    pub dependencies: Arc<dyn DependencyValidator>,
    pub events: Arc<dyn EventPublisher>,
    /// Queue for reconcile requests of other dogus
    pub signals: ReconcileSignals,
    pub config: OperatorConfig,
    /// Health state for recording metrics
    pub health_state: Option<Arc<HealthState>>,
}

impl Context {
    /// Wire the production collaborators around one client
    pub fn new(
        client: Client,
        config: OperatorConfig,
        signals: ReconcileSignals,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        let kube: Arc<dyn KubeClient> = Arc::new(KubeClientImpl::new(client.clone(), &config.namespace));

        Self {
            executor: Arc::new(PodExecutor::new(
                client.clone(),
                &config.namespace,
                kube.clone(),
                config.exec_pod_wait,
            )),
            descriptors: Arc::new(LocalRegistryFetcher::new(kube.clone())),
            dogu_config: Arc::new(KubeConfigRepository::new(kube.clone(), ConfigKind::Dogu)),
            sensitive_config: Arc::new(KubeConfigRepository::new(kube.clone(), ConfigKind::Sensitive)),
            global_config: Arc::new(KubeConfigRepository::new(kube.clone(), ConfigKind::Global)),
            restarts: Arc::new(RolloutRestartManager::new(kube.clone())),
            dependencies: Arc::new(InstalledDoguValidator::new(kube.clone())),
            events: Arc::new(KubeEventPublisher::new(client, CONTROLLER_NAME)),
            kube,
            signals,
            config,
            health_state,
        }
    }
}
