//! Install, change and delete passes against the in-memory cluster

use crate::common::*;
use dogu_operator::controller::kube_client::KubeClient;
use dogu_operator::controller::status::{condition_status, condition_types, reasons};
use dogu_operator::controller::steps::FINALIZER;
use dogu_operator::controller::steps::config_restart::RESTART_REQUEUE;
use dogu_operator::controller::steps::status::HEALTH_REQUEUE;
use dogu_operator::controller::steps::volume::RESIZE_REQUEUE;
use dogu_operator::controller::{Error, reconcile};
use dogu_operator::crd::DoguDescriptor;
use dogu_operator::resources::deployment::{
    DeploymentParams, desired_replicas, generate_deployment, template_version,
};
use dogu_operator::resources::volume::{generate_data_claim, requested_storage};
use kube::ResourceExt;
use kube::runtime::controller::Action;

fn ldap() -> DoguDescriptor {
    DescriptorBuilder::new("ldap", "1.0.0")
        .with_port(389)
        .with_volume("db", "/var/lib/openldap")
        .build()
}

fn harness_with_registry() -> TestHarness {
    let harness = TestHarness::new();
    harness
        .cluster
        .insert_config_map(registry_config_map("ldap", &[ldap()]));
    harness
}

async fn pass(harness: &TestHarness, name: &str) -> Action {
    reconcile(harness.observed(name), harness.ctx.clone())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_fresh_install_becomes_healthy_after_rollout() {
    let harness = harness_with_registry();
    harness
        .cluster
        .insert_dogu(DoguBuilder::new("ldap", "1.0.0").build());

    assert_eq!(pass(&harness, "ldap").await, Action::requeue(HEALTH_REQUEUE));

    let dogu = harness.cluster.dogu("ldap").unwrap();
    assert!(dogu.finalizers().iter().any(|f| f == FINALIZER));
    assert_eq!(dogu.installed_version(), Some("1.0.0"));
    assert!(harness.cluster.service("ldap").is_some());
    let claim = harness.cluster.claim("ldap").unwrap();
    assert_eq!(requested_storage(&claim).unwrap().0, "2Gi");
    let deployment = harness.cluster.deployment("ldap").unwrap();
    assert_eq!(desired_replicas(&deployment), 1);
    assert_eq!(template_version(&deployment), Some("1.0.0"));

    harness.cluster.roll_out("ldap", at(0));
    assert_eq!(
        pass(&harness, "ldap").await,
        Action::requeue(harness.ctx.config.resync_interval)
    );

    let dogu = harness.cluster.dogu("ldap").unwrap();
    let ready = dogu.condition(condition_types::READY).unwrap();
    assert_eq!(ready.status, condition_status::TRUE);
    let progressing = dogu.condition(condition_types::PROGRESSING).unwrap();
    assert_eq!(progressing.status, condition_status::FALSE);
    assert!(dogu.status.unwrap().started_at.is_some());
    assert!(harness.events.events().is_empty());
}

#[tokio::test]
async fn test_claim_is_created_with_minimum_size_when_larger() {
    let harness = harness_with_registry();
    harness.cluster.insert_dogu(
        DoguBuilder::new("ldap", "1.0.0")
            .with_min_volume_size("10Gi")
            .build(),
    );

    pass(&harness, "ldap").await;
    let claim = harness.cluster.claim("ldap").unwrap();
    assert_eq!(requested_storage(&claim).unwrap().0, "10Gi");
}

#[tokio::test]
async fn test_dogu_without_ports_or_volumes_gets_only_a_deployment() {
    let harness = TestHarness::new();
    harness.cluster.insert_config_map(registry_config_map(
        "nginx-static",
        &[DescriptorBuilder::new("nginx-static", "1.26.1").build()],
    ));
    harness
        .cluster
        .insert_dogu(DoguBuilder::new("nginx-static", "1.26.1").build());

    pass(&harness, "nginx-static").await;
    assert!(harness.cluster.service("nginx-static").is_none());
    assert!(harness.cluster.claim("nginx-static").is_none());
    assert!(harness.cluster.deployment("nginx-static").is_some());
}

#[tokio::test]
async fn test_stopped_dogu_runs_no_replicas() {
    let harness = harness_with_registry();
    harness
        .cluster
        .insert_dogu(DoguBuilder::new("ldap", "1.0.0").stopped().build());

    assert_eq!(
        pass(&harness, "ldap").await,
        Action::requeue(harness.ctx.config.resync_interval)
    );

    let deployment = harness.cluster.deployment("ldap").unwrap();
    assert_eq!(desired_replicas(&deployment), 0);
    let dogu = harness.cluster.dogu("ldap").unwrap();
    let ready = dogu.condition(condition_types::READY).unwrap();
    assert_eq!(ready.status, condition_status::FALSE);
    assert_eq!(ready.reason, reasons::STOPPED);
}

#[tokio::test]
async fn test_config_change_restarts_once() {
    let harness = harness_with_registry();
    harness.cluster.insert_dogu(
        DoguBuilder::new("ldap", "1.0.0")
            .installed("1.0.0")
            .with_finalizer(FINALIZER)
            .build(),
    );
    pass(&harness, "ldap").await;
    harness.cluster.roll_out("ldap", at(0));
    assert_eq!(
        pass(&harness, "ldap").await,
        Action::requeue(harness.ctx.config.resync_interval)
    );
    assert!(harness.cluster.restarts().is_empty());

    harness
        .cluster
        .insert_config_map(config_map_changed_at("ldap-config", at(1)));
    assert_eq!(pass(&harness, "ldap").await, Action::requeue(RESTART_REQUEUE));
    assert_eq!(harness.cluster.restarts(), vec!["ldap".to_string()]);
    assert_eq!(
        harness.events.events(),
        vec![("Normal".to_string(), "Restarted".to_string())]
    );
    let ready = harness
        .cluster
        .dogu("ldap")
        .unwrap()
        .condition(condition_types::READY)
        .cloned()
        .unwrap();
    assert_eq!(ready.reason, reasons::RESTARTING);

    // the restarted pods start after the change
    harness.cluster.roll_out("ldap", at(2));
    assert_eq!(
        pass(&harness, "ldap").await,
        Action::requeue(harness.ctx.config.resync_interval)
    );
    assert_eq!(harness.cluster.restarts().len(), 1);
}

#[tokio::test]
async fn test_config_change_during_rollout_waits() {
    let harness = harness_with_registry();
    harness.cluster.insert_dogu(
        DoguBuilder::new("ldap", "1.0.0")
            .installed("1.0.0")
            .with_finalizer(FINALIZER)
            .build(),
    );
    harness
        .cluster
        .insert_config_map(config_map_changed_at("ldap-config", at(1)));

    // deployment created but not rolled out yet
    assert_eq!(pass(&harness, "ldap").await, Action::requeue(HEALTH_REQUEUE));
    assert!(harness.cluster.restarts().is_empty());
}

#[tokio::test]
async fn test_data_volume_grows_to_minimum() {
    let harness = harness_with_registry();
    let dogu = DoguBuilder::new("ldap", "1.0.0")
        .installed("1.0.0")
        .with_finalizer(FINALIZER)
        .with_min_volume_size("5Gi")
        .build();

    harness
        .cluster
        .create_claim(&generate_data_claim(&dogu, "2Gi"))
        .await
        .unwrap();
    harness.cluster.grow_claim("ldap", "2Gi");
    harness.cluster.insert_deployment(generate_deployment(
        &dogu,
        &ldap(),
        &DeploymentParams {
            replicas: 1,
            startup_failure_threshold: None,
            previous_version: None,
        },
    ));
    harness.cluster.roll_out("ldap", at(0));
    harness.cluster.insert_dogu(dogu);

    // scale down first
    assert_eq!(pass(&harness, "ldap").await, Action::requeue(RESIZE_REQUEUE));
    let deployment = harness.cluster.deployment("ldap").unwrap();
    assert_eq!(desired_replicas(&deployment), 0);

    // then request the larger size
    assert_eq!(pass(&harness, "ldap").await, Action::requeue(RESIZE_REQUEUE));
    let claim = harness.cluster.claim("ldap").unwrap();
    assert_eq!(requested_storage(&claim).unwrap().0, "5Gi");

    // backend not done yet, nothing changes
    assert_eq!(pass(&harness, "ldap").await, Action::requeue(RESIZE_REQUEUE));
    assert_eq!(
        desired_replicas(&harness.cluster.deployment("ldap").unwrap()),
        0
    );

    // grown: the pass carries on and the deployment scales up again
    harness.cluster.grow_claim("ldap", "5Gi");
    pass(&harness, "ldap").await;
    assert_eq!(
        desired_replicas(&harness.cluster.deployment("ldap").unwrap()),
        1
    );
}

#[tokio::test]
async fn test_missing_dependency_blocks_install() {
    let harness = TestHarness::new();
    harness.cluster.insert_config_map(registry_config_map(
        "redmine",
        &[DescriptorBuilder::new("redmine", "5.1.0")
            .with_dependency("postgresql")
            .build()],
    ));
    harness
        .cluster
        .insert_dogu(DoguBuilder::new("redmine", "5.1.0").build());

    let err = reconcile(harness.observed("redmine"), harness.ctx.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DependencyError(_)));
    assert!(harness.cluster.deployment("redmine").is_none());
    assert_eq!(
        harness.events.events(),
        vec![("Warning".to_string(), "InstallFailed".to_string())]
    );
    let ready = harness
        .cluster
        .dogu("redmine")
        .unwrap()
        .condition(condition_types::READY)
        .cloned()
        .unwrap();
    assert_eq!(ready.reason, "DependencyUnavailable");

    // installed dependency unblocks the next pass
    harness
        .cluster
        .insert_dogu(DoguBuilder::new("postgresql", "14.15.0").installed("14.15.0").build());
    reconcile(harness.observed("redmine"), harness.ctx.clone())
        .await
        .unwrap();
    assert!(harness.cluster.deployment("redmine").is_some());
}

#[tokio::test]
async fn test_delete_removes_finalizer_and_notifies_dependents() {
    let mut harness = harness_with_registry();
    harness.cluster.insert_config_map(registry_config_map(
        "redmine",
        &[DescriptorBuilder::new("redmine", "5.1.0")
            .with_dependency("ldap")
            .build()],
    ));
    harness
        .cluster
        .insert_dogu(DoguBuilder::new("redmine", "5.1.0").installed("5.1.0").build());
    harness.cluster.insert_dogu(
        DoguBuilder::new("ldap", "1.0.0")
            .installed("1.0.0")
            .with_finalizer(FINALIZER)
            .deleted()
            .build(),
    );

    assert_eq!(pass(&harness, "ldap").await, Action::await_change());
    assert!(harness.cluster.dogu("ldap").is_none());
    assert_eq!(harness.requests.try_recv().unwrap().name, "redmine");
    assert!(harness.events.events().is_empty());
}
