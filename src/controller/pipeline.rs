//! Ordered execution of steps
//!
//! A pipeline runs its steps front to back against one Dogu and stops at the
//! first step that does not continue. Every pass starts again at the first
//! step, so progress made by earlier passes is re-checked, not remembered.

use std::sync::Arc;
use std::time::Duration;

use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use crate::controller::error::Result;
use crate::controller::step::{Step, StepResult};
use crate::crd::Dogu;
use crate::health::HealthState;

pub struct Pipeline {
    name: &'static str,
    steps: Vec<Box<dyn Step>>,
    health_state: Option<Arc<HealthState>>,
}

impl Pipeline {
    pub fn new(name: &'static str, steps: Vec<Box<dyn Step>>) -> Self {
        Self {
            name,
            steps,
            health_state: None,
        }
    }

    /// Record pipeline halts in the operator metrics
    pub fn with_health_state(mut self, health_state: Option<Arc<HealthState>>) -> Self {
        self.health_state = health_state;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Names of the steps in execution order
    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run steps until one does not continue.
    ///
    /// Returns `Ok(Some(d))` when a step asked to look again after `d`,
    /// `Ok(None)` when all steps continued or one aborted, and the error of
    /// the first failing step otherwise. A zero requeue delay counts as continue.
    #[instrument(skip_all, fields(pipeline = self.name, dogu = %dogu.name_any()))]
    pub async fn handle_until_applied(&self, dogu: &mut Dogu) -> Result<Option<Duration>> {
        for step in &self.steps {
            debug!(step = step.name(), "Running step");

            let result = match step.run(dogu).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(step = step.name(), error = %e, "Step failed");
                    self.record_halt(step.name(), "error");
                    return Err(e);
                }
            };

            match result {
                StepResult::Continue => {}
                StepResult::RequeueAfter(delay) if delay.is_zero() => {}
                StepResult::RequeueAfter(delay) => {
                    info!(step = step.name(), delay_secs = delay.as_secs(), "Step requested requeue");
                    self.record_halt(step.name(), result.as_str());
                    return Ok(Some(delay));
                }
                StepResult::Abort => {
                    info!(step = step.name(), "Step ended the pass");
                    self.record_halt(step.name(), result.as_str());
                    return Ok(None);
                }
            }
        }

        Ok(None)
    }

    fn record_halt(&self, step: &str, outcome: &str) {
        if let Some(state) = &self.health_state {
            state.metrics.record_halt(self.name, step, outcome);
        }
    }
}
