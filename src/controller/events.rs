//! Kubernetes Event recording for Dogu resources
//!
//! Events are fire-and-forget: a failed publish is logged and never breaks a
//! reconcile pass.

use async_trait::async_trait;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
#[cfg(test)]
use mockall::automock;
use tracing::warn;

use crate::crd::Dogu;

/// Well-known event reasons
pub mod reasons {
    /// Install or change of a dogu failed
    pub const INSTALL_FAILED: &str = "InstallFailed";
    /// Upgrade of a dogu failed
    pub const UPGRADE_FAILED: &str = "UpgradeFailed";
    /// Deletion of a dogu failed
    pub const DELETE_FAILED: &str = "DeleteFailed";
    /// Dogu was restarted after a configuration change
    pub const RESTARTED: &str = "Restarted";
}

/// Publisher of Kubernetes Events on Dogu resources
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a Warning event
    async fn warning(&self, dogu: &Dogu, reason: &str, note: String);

    /// Publish a Normal event
    async fn normal(&self, dogu: &Dogu, reason: &str, note: String);
}

/// Production implementation wrapping `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }

    async fn publish(&self, dogu: &Dogu, type_: EventType, reason: &str, note: String) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(note),
            action: "Reconcile".to_string(),
            secondary: None,
        };
        let reference = dogu.object_ref(&());
        if let Err(e) = self.recorder.publish(&event, &reference).await {
            warn!(reason, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn warning(&self, dogu: &Dogu, reason: &str, note: String) {
        self.publish(dogu, EventType::Warning, reason, note).await;
    }

    async fn normal(&self, dogu: &Dogu, reason: &str, note: String) {
        self.publish(dogu, EventType::Normal, reason, note).await;
    }
}
