//! Whole upgrade passes against the in-memory cluster
//!
//! The deployment controller is advanced by hand between passes, so each test
//! reads as the sequence of passes the operator goes through.

use std::time::Duration;

use crate::common::*;
use dogu_operator::controller::kube_client::KubeClient;
use dogu_operator::controller::status::{condition_status, condition_types};
use dogu_operator::controller::steps::FINALIZER;
use dogu_operator::controller::steps::upgrade_scripts::POD_START_REQUEUE;
use dogu_operator::controller::steps::volume::RESIZE_REQUEUE;
use dogu_operator::controller::{Error, error_policy, reconcile};
use dogu_operator::crd::DoguDescriptor;
use dogu_operator::resources::common::ANNOTATION_POST_UPGRADE_VERSION;
use dogu_operator::resources::deployment::{
    DeploymentParams, desired_replicas, generate_deployment, pre_upgrade_version,
    previous_version, startup_failure_threshold, template_version,
};
use dogu_operator::resources::volume::{generate_data_claim, requested_storage};
use kube::ResourceExt;
use kube::runtime::controller::Action;

const PRE_UPGRADE: &str = "/resources/pre-upgrade.sh";
const POST_UPGRADE: &str = "/resources/post-upgrade.sh";
const COPIED_PRE_UPGRADE: &str = "/tmp/pre-upgrade/pre-upgrade.sh";

fn ldap(version: &str) -> DoguDescriptor {
    DescriptorBuilder::new("ldap", version)
        .with_port(389)
        .with_volume("db", "/var/lib/openldap")
        .with_command("pre-upgrade", PRE_UPGRADE)
        .with_command("post-upgrade", POST_UPGRADE)
        .build()
}

/// ldap 1.0.0 running with startup threshold 3, upgraded to `target`
fn running_ldap(harness: &TestHarness, target: &str) {
    let cluster = &harness.cluster;
    cluster.insert_config_map(registry_config_map(
        "ldap",
        &[ldap("0.9.0"), ldap("1.0.0"), ldap("2.0.0")],
    ));

    let installed = DoguBuilder::new("ldap", "1.0.0")
        .installed("1.0.0")
        .with_startup_threshold(3)
        .build();
    cluster.insert_deployment(generate_deployment(
        &installed,
        &ldap("1.0.0"),
        &DeploymentParams {
            replicas: 1,
            startup_failure_threshold: Some(3),
            previous_version: None,
        },
    ));
    cluster.roll_out("ldap", at(0));

    cluster.insert_dogu(
        DoguBuilder::new("ldap", target)
            .installed("1.0.0")
            .with_startup_threshold(3)
            .with_finalizer(FINALIZER)
            .build(),
    );
}

/// How often the copied pre-upgrade script was started, in any pod
fn pre_upgrade_runs(harness: &TestHarness) -> usize {
    harness
        .executor
        .calls()
        .iter()
        .filter(|call| call.argv.first().map(String::as_str) == Some(COPIED_PRE_UPGRADE))
        .count()
}

async fn pass(harness: &TestHarness) -> Action {
    reconcile(harness.observed("ldap"), harness.ctx.clone())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_upgrade_runs_scripts_and_restores_probe() {
    let mut harness = TestHarness::new();
    running_ldap(&harness, "2.0.0");
    let old_pod = "ldap-1-0";

    // a dependent dogu that has to learn about the upgrade
    harness.cluster.insert_config_map(registry_config_map(
        "redmine",
        &[DescriptorBuilder::new("redmine", "5.1.0")
            .with_dependency("ldap")
            .build()],
    ));
    harness
        .cluster
        .insert_dogu(DoguBuilder::new("redmine", "5.1.0").installed("5.1.0").build());

    // pass 1: pre-upgrade in the old pod, widened probe, new version applied
    let action = reconcile(harness.observed("ldap"), harness.ctx.clone())
        .await
        .unwrap();
    assert_eq!(action, Action::requeue(POD_START_REQUEUE));

    let deployment = harness.cluster.deployment("ldap").unwrap();
    assert_eq!(template_version(&deployment), Some("2.0.0"));
    assert_eq!(startup_failure_threshold(&deployment, "ldap"), Some(1080));
    assert_eq!(previous_version(&deployment), Some("1.0.0"));

    assert_eq!(
        harness.executor.commands_in("ldap-execpod"),
        vec![vec!["tar", "cf", "-", "-C", "/resources", "."]]
    );
    assert_eq!(
        harness.executor.commands_in(old_pod),
        vec![
            vec!["/bin/mkdir", "-p", "/tmp/pre-upgrade"],
            vec!["tar", "xf", "-", "-C", "/tmp/pre-upgrade"],
            vec!["/tmp/pre-upgrade/pre-upgrade.sh", "1.0.0", "2.0.0"],
        ]
    );
    assert!(harness.cluster.pod("ldap-execpod").is_none());
    assert_eq!(
        harness.cluster.dogu("ldap").unwrap().installed_version(),
        Some("1.0.0")
    );

    // pass 2: new pod started; post-upgrade, probe restored, version recorded
    harness.cluster.roll_out("ldap", at(10));
    let new_pod = harness.cluster.pod_names()[0].clone();
    reconcile(harness.observed("ldap"), harness.ctx.clone())
        .await
        .unwrap();

    assert_eq!(
        harness.executor.commands_in(&new_pod),
        vec![vec![POST_UPGRADE, "1.0.0", "2.0.0"]]
    );
    let pod = harness.cluster.pod(&new_pod).unwrap();
    assert_eq!(
        pod.annotations().get(ANNOTATION_POST_UPGRADE_VERSION).map(String::as_str),
        Some("2.0.0")
    );
    let deployment = harness.cluster.deployment("ldap").unwrap();
    assert_eq!(startup_failure_threshold(&deployment, "ldap"), Some(3));
    assert_eq!(
        harness.cluster.dogu("ldap").unwrap().installed_version(),
        Some("2.0.0")
    );
    let requested = harness.requests.try_recv().unwrap();
    assert_eq!(requested.name, "redmine");

    // pass 3: settled on the new version
    harness.cluster.roll_out("ldap", at(20));
    let calls = harness.executor.calls().len();
    let action = reconcile(harness.observed("ldap"), harness.ctx.clone())
        .await
        .unwrap();
    assert_eq!(action, Action::requeue(harness.ctx.config.resync_interval));
    assert_eq!(harness.executor.calls().len(), calls);

    let dogu = harness.cluster.dogu("ldap").unwrap();
    let healthy = dogu.condition(condition_types::HEALTHY).unwrap();
    assert_eq!(healthy.status, condition_status::TRUE);
    let deployment = harness.cluster.deployment("ldap").unwrap();
    assert_eq!(previous_version(&deployment), None);
    assert_eq!(startup_failure_threshold(&deployment, "ldap"), Some(3));
}

#[tokio::test]
async fn test_failed_pre_upgrade_keeps_old_version_running() {
    let harness = TestHarness::new();
    running_ldap(&harness, "2.0.0");
    harness
        .executor
        .fail_command("/tmp/pre-upgrade/pre-upgrade.sh");

    let err = reconcile(harness.observed("ldap"), harness.ctx.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ExecFailed { .. }));

    assert!(harness.cluster.pod("ldap-execpod").is_none());
    let deployment = harness.cluster.deployment("ldap").unwrap();
    assert_eq!(template_version(&deployment), Some("1.0.0"));
    assert_eq!(startup_failure_threshold(&deployment, "ldap"), Some(3));

    assert_eq!(
        harness.events.events(),
        vec![("Warning".to_string(), "UpgradeFailed".to_string())]
    );
    let dogu = harness.cluster.dogu("ldap").unwrap();
    let ready = dogu.condition(condition_types::READY).unwrap();
    assert_eq!(ready.status, condition_status::FALSE);
    assert_eq!(ready.reason, "ScriptFailed");
    assert_eq!(dogu.installed_version(), Some("1.0.0"));
}

#[tokio::test]
async fn test_downgrade_without_force_is_rejected() {
    let harness = TestHarness::new();
    running_ldap(&harness, "0.9.0");

    let dogu = harness.observed("ldap");
    let err = reconcile(dogu.clone(), harness.ctx.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ValidationError(_)));
    assert!(harness.executor.calls().is_empty());

    // waits for a changed spec instead of retrying quickly
    let action = error_policy(dogu, &err, harness.ctx.clone());
    assert_eq!(action, Action::requeue(Duration::from_secs(300)));
}

#[tokio::test]
async fn test_forced_downgrade_is_applied() {
    let harness = TestHarness::new();
    running_ldap(&harness, "2.0.0");
    harness.cluster.insert_dogu(
        DoguBuilder::new("ldap", "0.9.0")
            .installed("1.0.0")
            .with_startup_threshold(3)
            .with_finalizer(FINALIZER)
            .force_upgrade()
            .build(),
    );

    reconcile(harness.observed("ldap"), harness.ctx.clone())
        .await
        .unwrap();
    let deployment = harness.cluster.deployment("ldap").unwrap();
    assert_eq!(template_version(&deployment), Some("0.9.0"));
}

#[tokio::test]
async fn test_upgrade_with_volume_growth_restarts_old_version_for_script() {
    let harness = TestHarness::new();
    running_ldap(&harness, "2.0.0");
    let dogu = DoguBuilder::new("ldap", "2.0.0")
        .installed("1.0.0")
        .with_startup_threshold(3)
        .with_min_volume_size("5Gi")
        .with_finalizer(FINALIZER)
        .build();
    harness
        .cluster
        .create_claim(&generate_data_claim(&dogu, "2Gi"))
        .await
        .unwrap();
    harness.cluster.grow_claim("ldap", "2Gi");
    harness.cluster.insert_dogu(dogu);

    // the old version is scaled down and the claim grown
    assert_eq!(pass(&harness).await, Action::requeue(RESIZE_REQUEUE));
    harness.cluster.roll_out("ldap", at(5));
    assert!(harness.cluster.pod_names().is_empty());

    assert_eq!(pass(&harness).await, Action::requeue(RESIZE_REQUEUE));
    let claim = harness.cluster.claim("ldap").unwrap();
    assert_eq!(requested_storage(&claim).unwrap().0, "5Gi");
    assert_eq!(pass(&harness).await, Action::requeue(RESIZE_REQUEUE));

    // grown: the old version comes back for its pre-upgrade script
    harness.cluster.grow_claim("ldap", "5Gi");
    assert_eq!(pass(&harness).await, Action::requeue(POD_START_REQUEUE));
    let deployment = harness.cluster.deployment("ldap").unwrap();
    assert_eq!(desired_replicas(&deployment), 1);
    assert_eq!(template_version(&deployment), Some("1.0.0"));
    assert_eq!(pre_upgrade_runs(&harness), 0);

    harness.cluster.roll_out("ldap", at(10));
    let old_pod = harness.cluster.pod_names()[0].clone();
    assert_eq!(pass(&harness).await, Action::requeue(POD_START_REQUEUE));
    assert_eq!(
        harness.executor.commands_in(&old_pod).last().unwrap(),
        &vec![COPIED_PRE_UPGRADE, "1.0.0", "2.0.0"]
    );
    let deployment = harness.cluster.deployment("ldap").unwrap();
    assert_eq!(template_version(&deployment), Some("2.0.0"));

    harness.cluster.roll_out("ldap", at(20));
    pass(&harness).await;
    assert_eq!(
        harness.cluster.dogu("ldap").unwrap().installed_version(),
        Some("2.0.0")
    );
    assert_eq!(pre_upgrade_runs(&harness), 1);
    assert_eq!(
        desired_replicas(&harness.cluster.deployment("ldap").unwrap()),
        1
    );
}

#[tokio::test]
async fn test_pre_upgrade_runs_once_when_later_step_fails() {
    let harness = TestHarness::new();
    running_ldap(&harness, "2.0.0");
    harness.cluster.fail_service_applies(1);

    let err = reconcile(harness.observed("ldap"), harness.ctx.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::KubeError(_)));
    assert_eq!(pre_upgrade_runs(&harness), 1);
    let deployment = harness.cluster.deployment("ldap").unwrap();
    assert_eq!(template_version(&deployment), Some("1.0.0"));
    assert_eq!(pre_upgrade_version(&deployment), Some("2.0.0"));

    // the retry goes on with the old pods untouched by a second script run
    assert_eq!(pass(&harness).await, Action::requeue(POD_START_REQUEUE));
    assert_eq!(pre_upgrade_runs(&harness), 1);
    let deployment = harness.cluster.deployment("ldap").unwrap();
    assert_eq!(template_version(&deployment), Some("2.0.0"));
    assert_eq!(pre_upgrade_version(&deployment), Some("2.0.0"));

    harness.cluster.roll_out("ldap", at(10));
    pass(&harness).await;
    assert_eq!(
        harness.cluster.dogu("ldap").unwrap().installed_version(),
        Some("2.0.0")
    );
    assert_eq!(pre_upgrade_runs(&harness), 1);
}
