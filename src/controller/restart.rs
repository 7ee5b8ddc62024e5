use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use kube::ResourceExt;
#[cfg(test)]
use mockall::automock;
use tracing::info;

use crate::controller::error::Result;
use crate::controller::kube_client::KubeClient;
use crate::crd::Dogu;

/// Restarts all pods of a dogu
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RestartManager: Send + Sync {
    async fn restart_dogu(&self, dogu: &Dogu) -> Result<()>;
}

/// Rollout restart through the pod template annotation, like `kubectl rollout restart`
pub struct RolloutRestartManager {
    kube: Arc<dyn KubeClient>,
}

impl RolloutRestartManager {
    pub fn new(kube: Arc<dyn KubeClient>) -> Self {
        Self { kube }
    }
}

#[async_trait]
impl RestartManager for RolloutRestartManager {
    async fn restart_dogu(&self, dogu: &Dogu) -> Result<()> {
        let name = dogu.name_any();
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        self.kube.stamp_restart(&name, &now).await?;
        info!(dogu = %name, restarted_at = %now, "Triggered rollout restart");
        Ok(())
    }
}
