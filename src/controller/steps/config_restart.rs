//! Restart on configuration change
//!
//! Dogus read their configuration at startup only. When any of the three
//! configuration sources changed after the newest dogu pod started, the dogu
//! is restarted once; the new pods then start after the change and the check
//! settles.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::controller::config_repository::ConfigRepository;
use crate::controller::error::Result;
use crate::controller::events::{EventPublisher, reasons as event_reasons};
use crate::controller::kube_client::KubeClient;
use crate::controller::restart::RestartManager;
use crate::controller::retry::RetryConfig;
use crate::controller::status::{reasons, set_conditions};
use crate::controller::step::{Step, StepResult};
use crate::crd::Dogu;
use crate::resources::common::{label_selector, selector_labels};
use crate::resources::deployment::rollout_settled;

/// Delay before checking a restarted dogu again
pub const RESTART_REQUEUE: Duration = Duration::from_secs(10);

/// Start time of the most recently started pod
pub fn latest_pod_start(pods: &[Pod]) -> Option<DateTime<Utc>> {
    pods.iter()
        .filter_map(|p| p.status.as_ref()?.start_time.as_ref())
        .map(|t| t.0)
        .max()
}

/// True when any known config change is newer than the newest pod start.
///
/// Without a pod start there is nothing to restart. Sources that never
/// recorded a change time are ignored.
pub fn needs_restart(last_start: Option<DateTime<Utc>>, changes: &[Option<DateTime<Utc>>]) -> bool {
    let Some(last_start) = last_start else {
        return false;
    };
    changes.iter().flatten().any(|changed| *changed > last_start)
}

pub struct ConfigChangeRestartStep {
    kube: Arc<dyn KubeClient>,
    sources: Vec<Arc<dyn ConfigRepository>>,
    restarts: Arc<dyn RestartManager>,
    events: Arc<dyn EventPublisher>,
    retry: RetryConfig,
}

impl ConfigChangeRestartStep {
    /// `sources` are the dogu, sensitive and global config repositories
    pub fn new(
        kube: Arc<dyn KubeClient>,
        sources: Vec<Arc<dyn ConfigRepository>>,
        restarts: Arc<dyn RestartManager>,
        events: Arc<dyn EventPublisher>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            kube,
            sources,
            restarts,
            events,
            retry,
        }
    }
}

#[async_trait]
impl Step for ConfigChangeRestartStep {
    fn name(&self) -> &'static str {
        "ConfigChangeRestart"
    }

    async fn run(&self, dogu: &mut Dogu) -> Result<StepResult> {
        let name = dogu.name_any();
        let Some(deployment) = self.kube.get_deployment(&name).await? else {
            return Ok(StepResult::Continue);
        };
        // a restart that is still rolling out already picks up the change;
        // pods that never become available are restarted all the same
        if !rollout_settled(&deployment) {
            debug!(dogu = %name, "Rollout in progress, skipping config check");
            return Ok(StepResult::Continue);
        }

        let pods = self
            .kube
            .list_pods(&label_selector(&selector_labels(&name)))
            .await?;
        let last_start = latest_pod_start(&pods);

        let mut changes = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            changes.push(source.get(&name).await?.and_then(|c| c.last_updated));
        }

        if !needs_restart(last_start, &changes) {
            return Ok(StepResult::Continue);
        }

        info!(dogu = %name, ?last_start, "Configuration changed since last start, restarting");
        self.restarts.restart_dogu(dogu).await?;
        self.events
            .normal(
                dogu,
                event_reasons::RESTARTED,
                "configuration changed since the last start".to_string(),
            )
            .await;
        set_conditions(self.kube.as_ref(), &self.retry, dogu, |c| {
            c.unavailable(reasons::RESTARTING, "configuration changed, restarting dogu")
        })
        .await?;
        Ok(StepResult::RequeueAfter(RESTART_REQUEUE))
    }
}
