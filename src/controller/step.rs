use std::time::Duration;

use async_trait::async_trait;

use crate::controller::error::Result;
use crate::crd::Dogu;

/// Outcome of a step that did not fail
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepResult {
    /// Proceed with the next step
    Continue,
    /// Stop the pass without error; the dogu is paused or terminal for now
    Abort,
    /// Stop the pass and look again after the given delay
    RequeueAfter(Duration),
}

impl StepResult {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            StepResult::Continue => "continue",
            StepResult::Abort => "abort",
            StepResult::RequeueAfter(_) => "requeue",
        }
    }
}

/// One idempotent unit of reconcile work.
///
/// Steps hold only injected collaborator handles, never state of a pass. A
/// step that changes the Dogu writes the persisted object back into `dogu` so
/// later steps of the same pass see it.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, dogu: &mut Dogu) -> Result<StepResult>;
}
