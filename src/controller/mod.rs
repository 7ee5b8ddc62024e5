pub mod config_repository;
pub mod context;
pub mod dependency;
pub mod descriptor;
pub mod error;
pub mod events;
pub mod exec;
pub mod kube_client;
pub mod pipeline;
pub mod reconciler;
pub mod restart;
pub mod retry;
pub mod signals;
pub mod status;
pub mod step;
pub mod steps;
pub mod use_cases;

pub use context::Context;
pub use error::{BackoffConfig, Error, Result};
pub use pipeline::Pipeline;
pub use reconciler::{error_policy, reconcile};
pub use status::ConditionBuilder;
pub use step::{Step, StepResult};
pub use steps::FINALIZER;
pub use use_cases::{UseCase, build_pipeline, select_use_case};
