//! Unit tests for status management
//!
//! Condition bookkeeping and the conflict-retrying status writes.

use crate::common::*;
use dogu_operator::controller::retry::RetryConfig;
use dogu_operator::controller::status::{
    ConditionBuilder, condition_status, condition_types, is_condition_true, reasons,
    set_conditions, update_status,
};
use dogu_operator::controller::steps::status::DoguHealth;
use kube::ResourceExt;
use std::time::Duration;

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        backoff_multiplier: 2.0,
    }
}

mod condition_tests {
    use super::*;

    #[test]
    fn test_conditions_are_replaced_not_duplicated() {
        let first = ConditionBuilder::new(Some(1))
            .healthy(false, reasons::ROLLOUT_IN_PROGRESS, "rolling out")
            .ready(false, reasons::ROLLOUT_IN_PROGRESS, "rolling out")
            .build();
        let second = ConditionBuilder::from_existing(first, Some(1))
            .healthy(true, reasons::HEALTHY, "all pods available")
            .build();

        assert_eq!(second.len(), 2);
        let healthy = second
            .iter()
            .find(|c| c.type_ == condition_types::HEALTHY)
            .unwrap();
        assert_eq!(healthy.status, condition_status::TRUE);
        assert_eq!(healthy.reason, reasons::HEALTHY);
    }

    #[test]
    fn test_progressing_is_independent_of_health() {
        let conditions = ConditionBuilder::new(None)
            .unavailable(reasons::STOPPED, "dogu is stopped")
            .progressing(false, reasons::STOPPED, "dogu is stopped")
            .build();
        assert_eq!(conditions.len(), 3);
        assert!(conditions.iter().all(|c| c.status == condition_status::FALSE));
    }

    #[test]
    fn test_health_requires_finished_rollout() {
        let rolling = DoguHealth {
            available: true,
            rollout_complete: false,
            probe_widened: false,
        };
        assert!(!rolling.is_healthy());

        let settled = DoguHealth {
            rollout_complete: true,
            ..rolling
        };
        assert!(settled.is_healthy());

        let unavailable = DoguHealth {
            available: false,
            ..settled
        };
        assert!(!unavailable.is_healthy());
    }
}

mod status_write_tests {
    use super::*;

    #[tokio::test]
    async fn test_status_write_survives_conflicts() {
        let cluster = FakeCluster::new();
        cluster.insert_dogu(DoguBuilder::new("ldap", "1.0.0").build());
        cluster.fail_status_patches(2);

        let mut dogu = cluster.dogu("ldap").unwrap();
        set_conditions(cluster.as_ref(), &fast_retry(), &mut dogu, |c| {
            c.healthy(true, reasons::HEALTHY, "ok")
        })
        .await
        .unwrap();

        assert!(is_condition_true(&dogu, condition_types::HEALTHY));
        assert!(is_condition_true(
            &cluster.dogu("ldap").unwrap(),
            condition_types::HEALTHY
        ));
    }

    #[tokio::test]
    async fn test_status_write_gives_up_after_bounded_conflicts() {
        let cluster = FakeCluster::new();
        cluster.insert_dogu(DoguBuilder::new("ldap", "1.0.0").build());
        cluster.fail_status_patches(10);

        let mut dogu = cluster.dogu("ldap").unwrap();
        let err = update_status(cluster.as_ref(), &fast_retry(), &mut dogu, |status, _| {
            status.installed_version = Some("1.0.0".to_string());
        })
        .await
        .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_stale_copy_does_not_overwrite_newer_status() {
        let cluster = FakeCluster::new();
        cluster.insert_dogu(DoguBuilder::new("ldap", "2.0.0").installed("1.0.0").build());
        let mut stale = cluster.dogu("ldap").unwrap();

        let mut fresh = cluster.dogu("ldap").unwrap();
        update_status(cluster.as_ref(), &fast_retry(), &mut fresh, |status, _| {
            status.started_at = Some("2023-11-14T22:13:20+00:00".to_string());
        })
        .await
        .unwrap();

        set_conditions(cluster.as_ref(), &fast_retry(), &mut stale, |c| {
            c.unavailable(reasons::RESTARTING, "configuration changed")
        })
        .await
        .unwrap();

        let stored = cluster.dogu("ldap").unwrap();
        let status = stored.status.unwrap();
        assert_eq!(status.installed_version.as_deref(), Some("1.0.0"));
        assert!(status.started_at.is_some());
        assert_eq!(status.conditions.len(), 2);
    }

    #[tokio::test]
    async fn test_unchanged_status_is_not_written() {
        let cluster = FakeCluster::new();
        cluster.insert_dogu(DoguBuilder::new("ldap", "1.0.0").installed("1.0.0").build());
        let mut dogu = cluster.dogu("ldap").unwrap();
        let version = dogu.resource_version();

        update_status(cluster.as_ref(), &fast_retry(), &mut dogu, |status, _| {
            status.installed_version = Some("1.0.0".to_string());
        })
        .await
        .unwrap();

        assert_eq!(cluster.dogu("ldap").unwrap().resource_version(), version);
    }
}
