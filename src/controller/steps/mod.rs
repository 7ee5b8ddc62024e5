//! Reconcile steps
//!
//! Each step checks live state first and only acts when something is
//! missing, so re-running a whole pipeline is always safe.

pub mod config_restart;
pub mod exec_pod;
pub mod finalizer;
pub mod notify;
pub mod resources;
pub mod startup_probe;
pub mod status;
pub mod upgrade_scripts;
pub mod validation;
pub mod volume;

pub use config_restart::ConfigChangeRestartStep;
pub use exec_pod::DeleteExecPodStep;
pub use finalizer::{AddFinalizerStep, FINALIZER, RemoveFinalizerStep};
pub use notify::NotifyDependentsStep;
pub use resources::{ApplyDataVolumeStep, ApplyDeploymentStep, ApplyServiceStep};
pub use startup_probe::{RevertStartupProbeStep, WidenStartupProbeStep};
pub use status::{DeletingStatusStep, HealthStatusStep, InstalledVersionStep, StoppedStep};
pub use upgrade_scripts::{PostUpgradeScriptStep, PreUpgradeScriptStep};
pub use validation::{DependencyCheckStep, ValidateDescriptorStep};
pub use volume::VolumeResizeStep;
