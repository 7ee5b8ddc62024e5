//! Use cases composing the reconcile steps
//!
//! A reconcile pass runs exactly one use case, chosen from the observed Dogu:
//! deletion wins, then a pending version change, otherwise the regular
//! install-or-change path that also covers steady state.

use std::fmt;

use crate::controller::context::Context;
use crate::controller::events::reasons as event_reasons;
use crate::controller::pipeline::Pipeline;
use crate::controller::step::Step;
use crate::controller::steps::*;
use crate::crd::Dogu;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UseCase {
    InstallOrChange,
    Upgrade,
    Delete,
}

impl UseCase {
    pub fn as_str(&self) -> &'static str {
        match self {
            UseCase::InstallOrChange => "install-or-change",
            UseCase::Upgrade => "upgrade",
            UseCase::Delete => "delete",
        }
    }

    /// Reason of the Warning event published when a pass fails
    pub fn failure_reason(&self) -> &'static str {
        match self {
            UseCase::InstallOrChange => event_reasons::INSTALL_FAILED,
            UseCase::Upgrade => event_reasons::UPGRADE_FAILED,
            UseCase::Delete => event_reasons::DELETE_FAILED,
        }
    }
}

impl fmt::Display for UseCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick the use case for the observed Dogu
pub fn select_use_case(dogu: &Dogu) -> UseCase {
    if dogu.is_being_deleted() {
        UseCase::Delete
    } else if dogu.is_upgrade() {
        UseCase::Upgrade
    } else {
        UseCase::InstallOrChange
    }
}

/// Build the pipeline of a use case from the collaborators in `ctx`
pub fn build_pipeline(use_case: UseCase, ctx: &Context) -> Pipeline {
    let steps = match use_case {
        UseCase::InstallOrChange => install_or_change_steps(ctx),
        UseCase::Upgrade => upgrade_steps(ctx),
        UseCase::Delete => delete_steps(ctx),
    };
    Pipeline::new(use_case.as_str(), steps).with_health_state(ctx.health_state.clone())
}

fn install_or_change_steps(ctx: &Context) -> Vec<Box<dyn Step>> {
    let retry = &ctx.config.conflict_retry;
    vec![
        Box::new(AddFinalizerStep::new(ctx.kube.clone(), retry.clone())),
        Box::new(ValidateDescriptorStep::new(ctx.descriptors.clone())),
        Box::new(DependencyCheckStep::new(
            ctx.descriptors.clone(),
            ctx.dependencies.clone(),
        )),
        Box::new(ApplyServiceStep::new(ctx.kube.clone(), ctx.descriptors.clone())),
        Box::new(ApplyDataVolumeStep::new(
            ctx.kube.clone(),
            ctx.descriptors.clone(),
            ctx.config.default_volume_size.clone(),
        )),
        Box::new(VolumeResizeStep::new(ctx.kube.clone())),
        Box::new(ApplyDeploymentStep::new(ctx.kube.clone(), ctx.descriptors.clone())),
        Box::new(StoppedStep::new(ctx.kube.clone(), retry.clone())),
        Box::new(RevertStartupProbeStep::new(ctx.kube.clone())),
        Box::new(ConfigChangeRestartStep::new(
            ctx.kube.clone(),
            vec![
                ctx.dogu_config.clone(),
                ctx.sensitive_config.clone(),
                ctx.global_config.clone(),
            ],
            ctx.restarts.clone(),
            ctx.events.clone(),
            retry.clone(),
        )),
        Box::new(InstalledVersionStep::new(ctx.kube.clone(), retry.clone())),
        Box::new(HealthStatusStep::new(ctx.kube.clone(), retry.clone())),
    ]
}

fn upgrade_steps(ctx: &Context) -> Vec<Box<dyn Step>> {
    let retry = &ctx.config.conflict_retry;
    vec![
        Box::new(AddFinalizerStep::new(ctx.kube.clone(), retry.clone())),
        Box::new(ValidateDescriptorStep::new(ctx.descriptors.clone())),
        Box::new(DependencyCheckStep::new(
            ctx.descriptors.clone(),
            ctx.dependencies.clone(),
        )),
        // the old version has to run on a grown volume before its script
        Box::new(ApplyDataVolumeStep::new(
            ctx.kube.clone(),
            ctx.descriptors.clone(),
            ctx.config.default_volume_size.clone(),
        )),
        Box::new(VolumeResizeStep::new(ctx.kube.clone())),
        Box::new(PreUpgradeScriptStep::new(
            ctx.kube.clone(),
            ctx.executor.clone(),
            ctx.descriptors.clone(),
            ctx.config.exec_pod_wait,
        )),
        Box::new(DeleteExecPodStep::new(ctx.kube.clone())),
        Box::new(WidenStartupProbeStep::new(ctx.kube.clone())),
        Box::new(ApplyServiceStep::new(ctx.kube.clone(), ctx.descriptors.clone())),
        Box::new(ApplyDeploymentStep::new(ctx.kube.clone(), ctx.descriptors.clone())),
        Box::new(StoppedStep::new(ctx.kube.clone(), retry.clone())),
        Box::new(PostUpgradeScriptStep::new(
            ctx.kube.clone(),
            ctx.executor.clone(),
            ctx.descriptors.clone(),
        )),
        Box::new(RevertStartupProbeStep::new(ctx.kube.clone())),
        Box::new(InstalledVersionStep::new(ctx.kube.clone(), retry.clone())),
        Box::new(NotifyDependentsStep::new(
            ctx.kube.clone(),
            ctx.descriptors.clone(),
            ctx.signals.clone(),
        )),
        Box::new(HealthStatusStep::new(ctx.kube.clone(), retry.clone())),
    ]
}

fn delete_steps(ctx: &Context) -> Vec<Box<dyn Step>> {
    let retry = &ctx.config.conflict_retry;
    vec![
        Box::new(DeletingStatusStep::new(ctx.kube.clone(), retry.clone())),
        Box::new(DeleteExecPodStep::new(ctx.kube.clone())),
        Box::new(NotifyDependentsStep::new(
            ctx.kube.clone(),
            ctx.descriptors.clone(),
            ctx.signals.clone(),
        )),
        Box::new(RemoveFinalizerStep::new(ctx.kube.clone(), retry.clone())),
    ]
}
