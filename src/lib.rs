pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod resources;

pub use config::{ConfigError, OperatorConfig};
pub use controller::{
    BackoffConfig, Context, Error, FINALIZER, Result, UseCase, error_policy, reconcile,
    select_use_case,
};
pub use crd::{Dogu, DoguDescriptor};
pub use health::{HealthState, Metrics};

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, Service};
use kube::runtime::controller::Error as ControllerError;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{Controller, reflector::ObjectRef};
use kube::{Api, Client};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info};

use crate::controller::signals::ReconcileSignals;

/// Run the Dogu controller until its watch streams end.
///
/// Besides the Dogus themselves the controller watches the Deployments,
/// Services, claims and exec pods it owns. Requests that steps raise for
/// other dogus, such as dependents of a changed dogu, come in as a separate
/// trigger stream.
pub async fn run_controller(
    client: Client,
    config: OperatorConfig,
    health_state: Option<Arc<HealthState>>,
) {
    let namespace = config.namespace.clone();
    info!(%namespace, "Starting Dogu controller");

    if let Some(state) = &health_state {
        state.set_ready(true);
    }

    let (signals, requests) = ReconcileSignals::channel();
    let ctx = Arc::new(Context::new(client.clone(), config, signals, health_state));
    let watched = WatcherConfig::default().any_semantic();

    Controller::new(Api::<Dogu>::namespaced(client.clone(), &namespace), watched.clone())
        .owns(Api::<Deployment>::namespaced(client.clone(), &namespace), watched.clone())
        .owns(Api::<Service>::namespaced(client.clone(), &namespace), watched.clone())
        .owns(
            Api::<PersistentVolumeClaim>::namespaced(client.clone(), &namespace),
            watched.clone(),
        )
        .owns(Api::<Pod>::namespaced(client, &namespace), watched)
        .reconcile_on(ReceiverStream::new(requests))
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move { log_outcome(result) })
        .await;

    error!("Dogu controller stream ended");
}

type PassOutcome = std::result::Result<
    (ObjectRef<Dogu>, kube::runtime::controller::Action),
    ControllerError<Error, kube::runtime::watcher::Error>,
>;

fn log_outcome(result: PassOutcome) {
    match result {
        Ok((dogu, action)) => debug!(dogu = %dogu.name, ?action, "Pass finished"),
        // Owned objects keep triggering briefly after their Dogu is gone
        Err(ControllerError::ReconcilerFailed(err, dogu)) if err.is_not_found() => {
            debug!(dogu = %dogu.name, "Dogu vanished during the pass");
        }
        Err(e) => error!(error = ?e, "Dogu pass failed"),
    }
}
