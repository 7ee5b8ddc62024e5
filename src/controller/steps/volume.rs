//! Data volume growth
//!
//! Growing a claim that is mounted read-write by a running pod is not
//! possible on every storage backend, so the dogu is scaled to zero first,
//! the claim request raised, and the dogu scaled back up once the backend
//! reports a pending filesystem resize. Each pass does at most one of those
//! moves and requeues; the live objects tell the next pass where it stands.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::controller::error::Result;
use crate::controller::kube_client::KubeClient;
use crate::controller::step::{Step, StepResult};
use crate::crd::Dogu;
use crate::resources::deployment::desired_replicas;
use crate::resources::quantity::{parse_quantity, quantity_bytes};
use crate::resources::volume::{
    capacity, data_claim_name, is_filesystem_resize_pending, requested_storage,
};

/// Delay before looking at a resize in flight again
pub const RESIZE_REQUEUE: Duration = Duration::from_secs(5);

/// Where a data volume stands relative to its minimum size
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VolumeResizeState {
    /// Large enough, or no minimum declared
    Satisfied,
    /// Too small while the dogu still runs
    NeedsScaleDown,
    /// Too small and the dogu is scaled down
    NeedsResize,
    /// The backend grew the volume; the filesystem expands once a pod mounts it
    NeedsScaleUp,
    /// The filesystem expands while the running pod mounts the volume
    AwaitingFilesystemResize,
}

/// Classify a claim from its observed sizes (in bytes) and the dogu's replicas.
///
/// An unbound claim has no capacity yet; its requested size is what binding
/// will provision.
pub fn classify(
    capacity: Option<f64>,
    requested: Option<f64>,
    minimum: Option<f64>,
    resize_pending: bool,
    replicas: i32,
) -> VolumeResizeState {
    if resize_pending {
        return if replicas == 0 {
            VolumeResizeState::NeedsScaleUp
        } else {
            VolumeResizeState::AwaitingFilesystemResize
        };
    }

    let Some(minimum) = minimum else {
        return VolumeResizeState::Satisfied;
    };
    let current = capacity.or(requested).unwrap_or(0.0);
    if current >= minimum {
        VolumeResizeState::Satisfied
    } else if replicas > 0 {
        VolumeResizeState::NeedsScaleDown
    } else {
        VolumeResizeState::NeedsResize
    }
}

pub struct VolumeResizeStep {
    kube: Arc<dyn KubeClient>,
}

impl VolumeResizeStep {
    pub fn new(kube: Arc<dyn KubeClient>) -> Self {
        Self { kube }
    }
}

#[async_trait]
impl Step for VolumeResizeStep {
    fn name(&self) -> &'static str {
        "VolumeResize"
    }

    async fn run(&self, dogu: &mut Dogu) -> Result<StepResult> {
        let Some(minimum_raw) = dogu.spec.resources.min_data_volume_size.clone() else {
            return Ok(StepResult::Continue);
        };
        let claim_name = data_claim_name(dogu);
        let Some(claim) = self.kube.get_claim(&claim_name).await? else {
            return Ok(StepResult::Continue);
        };

        let name = dogu.name_any();
        let replicas = self
            .kube
            .get_deployment(&name)
            .await?
            .map(|d| desired_replicas(&d))
            .unwrap_or(0);

        let minimum = parse_quantity(&minimum_raw)?;
        let requested = requested_storage(&claim).map(quantity_bytes).transpose()?;
        let current = capacity(&claim).map(quantity_bytes).transpose()?;
        let state = classify(
            current,
            requested,
            Some(minimum),
            is_filesystem_resize_pending(&claim),
            replicas,
        );
        debug!(claim = %claim_name, ?state, replicas, "Classified data volume");

        match state {
            VolumeResizeState::Satisfied | VolumeResizeState::AwaitingFilesystemResize => {
                Ok(StepResult::Continue)
            }
            VolumeResizeState::NeedsScaleUp if dogu.spec.stopped => Ok(StepResult::Continue),
            VolumeResizeState::NeedsScaleUp => {
                info!(deployment = %name, "Scaling up to finish filesystem resize");
                self.kube.scale_deployment(&name, 1).await?;
                Ok(StepResult::RequeueAfter(RESIZE_REQUEUE))
            }
            VolumeResizeState::NeedsScaleDown => {
                info!(deployment = %name, minimum = %minimum_raw, "Scaling down to grow data volume");
                self.kube.scale_deployment(&name, 0).await?;
                Ok(StepResult::RequeueAfter(RESIZE_REQUEUE))
            }
            VolumeResizeState::NeedsResize => {
                if requested.is_some_and(|r| r >= minimum) {
                    debug!(claim = %claim_name, "Resize already requested, waiting for backend");
                } else {
                    info!(claim = %claim_name, size = %minimum_raw, "Requesting larger data volume");
                    self.kube.resize_claim(&claim_name, &minimum_raw).await?;
                }
                Ok(StepResult::RequeueAfter(RESIZE_REQUEUE))
            }
        }
    }
}
