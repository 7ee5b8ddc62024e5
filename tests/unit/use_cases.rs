//! Unit tests for use case selection and pipeline composition

use crate::common::*;
use dogu_operator::controller::use_cases::{UseCase, build_pipeline, select_use_case};

#[test]
fn test_fresh_dogu_is_installed() {
    let dogu = DoguBuilder::new("ldap", "1.0.0").build();
    assert_eq!(select_use_case(&dogu), UseCase::InstallOrChange);
}

#[test]
fn test_installed_dogu_on_same_version_is_changed() {
    let dogu = DoguBuilder::new("ldap", "1.0.0").installed("1.0.0").build();
    assert_eq!(select_use_case(&dogu), UseCase::InstallOrChange);
}

#[test]
fn test_version_change_is_upgrade() {
    let dogu = DoguBuilder::new("ldap", "2.0.0").installed("1.0.0").build();
    assert_eq!(select_use_case(&dogu), UseCase::Upgrade);

    // downgrades take the upgrade path and are vetted by validation
    let dogu = DoguBuilder::new("ldap", "0.9.0").installed("1.0.0").build();
    assert_eq!(select_use_case(&dogu), UseCase::Upgrade);
}

#[test]
fn test_deletion_wins_over_upgrade() {
    let dogu = DoguBuilder::new("ldap", "2.0.0")
        .installed("1.0.0")
        .deleted()
        .build();
    assert_eq!(select_use_case(&dogu), UseCase::Delete);
}

#[test]
fn test_use_case_names() {
    assert_eq!(UseCase::InstallOrChange.to_string(), "install-or-change");
    assert_eq!(UseCase::Upgrade.to_string(), "upgrade");
    assert_eq!(UseCase::Delete.to_string(), "delete");
    assert_eq!(UseCase::Upgrade.failure_reason(), "UpgradeFailed");
}

#[test]
fn test_install_or_change_step_order() {
    let harness = TestHarness::new();
    let pipeline = build_pipeline(UseCase::InstallOrChange, &harness.ctx);
    assert_eq!(pipeline.name(), "install-or-change");
    assert_eq!(
        pipeline.step_names(),
        vec![
            "AddFinalizer",
            "ValidateDescriptor",
            "DependencyCheck",
            "ApplyService",
            "ApplyDataVolume",
            "VolumeResize",
            "ApplyDeployment",
            "Stopped",
            "RevertStartupProbe",
            "ConfigChangeRestart",
            "InstalledVersion",
            "HealthStatus",
        ]
    );
}

#[test]
fn test_upgrade_step_order() {
    let harness = TestHarness::new();
    let pipeline = build_pipeline(UseCase::Upgrade, &harness.ctx);
    assert_eq!(
        pipeline.step_names(),
        vec![
            "AddFinalizer",
            "ValidateDescriptor",
            "DependencyCheck",
            "ApplyDataVolume",
            "VolumeResize",
            "PreUpgradeScript",
            "DeleteExecPod",
            "WidenStartupProbe",
            "ApplyService",
            "ApplyDeployment",
            "Stopped",
            "PostUpgradeScript",
            "RevertStartupProbe",
            "InstalledVersion",
            "NotifyDependents",
            "HealthStatus",
        ]
    );
}

#[test]
fn test_delete_step_order() {
    let harness = TestHarness::new();
    let pipeline = build_pipeline(UseCase::Delete, &harness.ctx);
    assert_eq!(
        pipeline.step_names(),
        vec![
            "DeletingStatus",
            "DeleteExecPod",
            "NotifyDependents",
            "RemoveFinalizer",
        ]
    );
}
