use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use dogu_operator::OperatorConfig;
use dogu_operator::config::ENV_POD_NAME;
use dogu_operator::health::{HealthState, run_health_server};
use dogu_operator::run_controller;

const LEASE_NAME: &str = "dogu-operator-leader";
const LEASE_TTL: Duration = Duration::from_secs(15);
const LEASE_RENEW_INTERVAL: Duration = Duration::from_secs(5);

/// Time given to running passes after SIGTERM before the process exits
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    install_crypto_provider()?;
    init_tracing()?;

    let config = OperatorConfig::from_env()?;
    if std::env::var(ENV_POD_NAME).is_err() {
        warn!(holder_id = %config.pod_name, "POD_NAME not set, falling back to the hostname");
    }
    info!(namespace = %config.namespace, "Starting dogu-operator");

    let client = Client::try_default().await?;
    let health_state = Arc::new(HealthState::new());
    let health_server = spawn_health_server(health_state.clone(), config.health_port);

    let lease = LeaseLock::new(
        client.clone(),
        &config.namespace,
        LeaseLockParams {
            holder_id: config.pod_name.clone(),
            lease_name: LEASE_NAME.to_string(),
            lease_ttl: LEASE_TTL,
        },
    );
    acquire_leadership(&lease, &config.pod_name).await;
    let renewal = spawn_lease_renewal(lease);

    let controller = {
        let health_state = health_state.clone();
        tokio::spawn(run_controller(client, config, Some(health_state)))
    };

    tokio::select! {
        result = controller => {
            if let Err(e) = result {
                error!(error = %e, "Controller task panicked");
            }
        }
        result = health_server => {
            if let Err(e) = result {
                error!(error = %e, "Health server task panicked");
            }
        }
        Err(e) = renewal => {
            error!(error = %e, "Lease renewal task panicked");
        }
        _ = shutdown_signal() => {
            health_state.set_ready(false);
            info!(grace_secs = SHUTDOWN_GRACE.as_secs(), "Shutdown requested, letting running passes finish");
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        }
    }

    info!("dogu-operator stopped");
    Ok(())
}

fn install_crypto_provider() -> Result<(), Box<dyn std::error::Error>> {
    let installed = rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_ok();
    if !installed && rustls::crypto::CryptoProvider::get_default().is_none() {
        return Err("no rustls crypto provider available".into());
    }
    Ok(())
}

fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::from_default_env()
        .add_directive("dogu_operator=info".parse()?)
        .add_directive("kube=info".parse()?)
        .add_directive("kube_leader_election=info".parse()?);
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

/// Probes answer on every replica, so the server starts before the election
fn spawn_health_server(state: Arc<HealthState>, port: u16) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = run_health_server(state, port).await {
            error!(error = %e, port, "Health server stopped");
        }
    })
}

/// Block until this replica holds the lease
async fn acquire_leadership(lease: &LeaseLock, holder_id: &str) {
    info!(holder_id, lease = LEASE_NAME, "Waiting for leadership");
    loop {
        match lease.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => {
                info!(holder_id, "Leadership acquired");
                return;
            }
            Ok(_) => info!("Lease held by another replica"),
            Err(e) => warn!(error = %e, "Lease acquisition failed"),
        }
        tokio::time::sleep(LEASE_RENEW_INTERVAL).await;
    }
}

/// Keep the lease alive. Losing it exits the process so the pod restarts
/// and rejoins the election instead of reconciling next to a new leader.
fn spawn_lease_renewal(lease: LeaseLock) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(LEASE_RENEW_INTERVAL).await;
            match lease.try_acquire_or_renew().await {
                Ok(result) if result.acquired_lease => {}
                Ok(_) => {
                    error!("Leadership lost, exiting");
                    std::process::exit(1);
                }
                Err(e) => {
                    error!(error = %e, "Lease renewal failed, exiting");
                    std::process::exit(1);
                }
            }
        }
    })
}

async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }
}
