//! Reconciliation entry point for Dogu resources
//!
//! One pass selects a use case, runs its pipeline against a private copy of
//! the Dogu and maps the outcome onto a controller action. Failures are
//! surfaced on the Dogu itself as conditions and as a Warning event.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use kube::ResourceExt;
use kube::runtime::controller::Action;
use tracing::{debug, error, info, instrument, warn};

use crate::controller::context::Context;
use crate::controller::error::{BackoffConfig, Error, Result};
use crate::controller::status::set_conditions;
use crate::controller::use_cases::{UseCase, build_pipeline, select_use_case};
use crate::crd::Dogu;

/// Run one pass of the use case the Dogu currently calls for
#[instrument(skip(dogu, ctx), fields(name = %dogu.name_any(), namespace = dogu.namespace().unwrap_or_default()))]
pub async fn reconcile(dogu: Arc<Dogu>, ctx: Arc<Context>) -> Result<Action> {
    let started = Instant::now();
    let ns = dogu.namespace().unwrap_or_default();
    let name = dogu.name_any();

    let use_case = select_use_case(&dogu);
    info!(%use_case, version = %dogu.spec.version, "Reconciling Dogu");
    if let Some(state) = &ctx.health_state {
        state.metrics.record_use_case(use_case.as_str());
    }

    let mut dogu = (*dogu).clone();
    let pipeline = build_pipeline(use_case, &ctx);
    let timeout = ctx.config.reconcile_timeout;
    let result = match tokio::time::timeout(timeout, pipeline.handle_until_applied(&mut dogu)).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(timeout)),
    };

    if let Some(state) = &ctx.health_state {
        state
            .metrics
            .record_reconcile(&ns, &name, started.elapsed().as_secs_f64());
        state.mark_reconciled(Utc::now());
    }

    match result {
        Ok(Some(delay)) => {
            debug!(%use_case, delay_secs = delay.as_secs(), "Pass paused, requeueing");
            record_settled(&ctx, &ns, &name, false);
            Ok(Action::requeue(delay))
        }
        Ok(None) if use_case == UseCase::Delete => {
            info!("Dogu cleanup finished");
            Ok(Action::await_change())
        }
        Ok(None) => {
            record_settled(&ctx, &ns, &name, true);
            Ok(Action::requeue(ctx.config.resync_interval))
        }
        Err(e) => {
            if let Some(state) = &ctx.health_state {
                state.metrics.record_error(&ns, &name);
            }
            record_settled(&ctx, &ns, &name, false);
            report_failure(&ctx, &mut dogu, use_case, &e).await;
            Err(e)
        }
    }
}

fn record_settled(ctx: &Context, ns: &str, name: &str, settled: bool) {
    if let Some(state) = &ctx.health_state {
        state.metrics.set_dogu_settled(ns, name, settled);
    }
}

/// Put a failed pass on record: conditions on the Dogu and a Warning event.
///
/// Both are best effort; the original error is what the controller acts on.
async fn report_failure(ctx: &Context, dogu: &mut Dogu, use_case: UseCase, err: &Error) {
    let message = err.to_string();
    ctx.events
        .warning(dogu, use_case.failure_reason(), message.clone())
        .await;

    if use_case == UseCase::Delete && err.is_not_found() {
        return;
    }
    let reason = err.reason();
    let result = set_conditions(
        ctx.kube.as_ref(),
        &ctx.config.conflict_retry,
        dogu,
        |c| c.unavailable(reason, &message),
    )
    .await;
    if let Err(status_err) = result {
        warn!(error = %status_err, "Failed to record failure in Dogu status");
    }
}

/// Requeue delay after a failed pass
pub fn error_policy(dogu: Arc<Dogu>, error: &Error, _ctx: Arc<Context>) -> Action {
    // the controller keeps no per-object attempt count
    let delay = BackoffConfig::default().delay_for_error(error, 0);
    let dogu = dogu.name_any();

    if error.is_retryable() {
        warn!(%dogu, %error, delay_secs = delay.as_secs(), "Pass failed, retrying");
    } else {
        error!(%dogu, %error, delay_secs = delay.as_secs(), "Pass failed until the Dogu changes");
    }
    Action::requeue(delay)
}
