//! Cluster access used by reconcile steps
//!
//! Every call is scoped to the namespace the operator watches. Steps only talk
//! to the cluster through [`KubeClient`] so they can be tested against mocks
//! and the in-memory fake cluster.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod, Secret, Service};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use serde_json::json;
use tracing::debug;

use crate::controller::error::{Error, Result};
use crate::crd::{Dogu, DoguStatus};
use crate::resources::FIELD_MANAGER;
use crate::resources::common::ANNOTATION_RESTARTED_AT;

/// Field manager for patches that must not be reverted by server-side apply
const RESTART_FIELD_MANAGER: &str = "dogu-operator-restart";

/// Field manager for upgrade bookkeeping on the Deployment
const UPGRADE_FIELD_MANAGER: &str = "dogu-operator-upgrade";

/// Trait abstracting the Kubernetes operations of the Dogu controller
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Get a Dogu by name
    async fn get_dogu(&self, name: &str) -> Result<Option<Dogu>>;

    /// List all Dogus of the namespace
    async fn list_dogus(&self) -> Result<Vec<Dogu>>;

    /// Replace the finalizers of a Dogu.
    ///
    /// The patch carries the resource version of `dogu` and fails with a
    /// conflict when the object changed in the meantime.
    async fn patch_dogu_finalizers(&self, dogu: &Dogu, finalizers: &[String]) -> Result<Dogu>;

    /// Replace the status of a Dogu, guarded by its resource version
    async fn patch_dogu_status(&self, dogu: &Dogu, status: &DoguStatus) -> Result<Dogu>;

    /// Get a Deployment by name
    async fn get_deployment(&self, name: &str) -> Result<Option<Deployment>>;

    /// Server-side apply a Deployment
    async fn apply_deployment(&self, deployment: &Deployment) -> Result<()>;

    /// Set the replica count of a Deployment
    async fn scale_deployment(&self, name: &str, replicas: i32) -> Result<()>;

    /// Set one annotation on a Deployment, kept across later applies
    async fn annotate_deployment(&self, name: &str, key: &str, value: &str) -> Result<()>;

    /// Remove an annotation set by `annotate_deployment`
    async fn remove_deployment_annotation(&self, name: &str, key: &str) -> Result<()>;

    /// Set or remove (`None`) the startup probe failure threshold of one container
    async fn patch_startup_probe(
        &self,
        name: &str,
        container: &str,
        failure_threshold: Option<i32>,
    ) -> Result<()>;

    /// Stamp the pod template with a restart timestamp, rolling all pods
    async fn stamp_restart(&self, name: &str, restarted_at: &str) -> Result<()>;

    /// Get a PersistentVolumeClaim by name
    async fn get_claim(&self, name: &str) -> Result<Option<PersistentVolumeClaim>>;

    /// Create a PersistentVolumeClaim; an existing claim is left untouched
    async fn create_claim(&self, claim: &PersistentVolumeClaim) -> Result<()>;

    /// Request a new storage size on a claim
    async fn resize_claim(&self, name: &str, size: &str) -> Result<()>;

    /// Server-side apply a Service
    async fn apply_service(&self, service: &Service) -> Result<()>;

    /// Get a Pod by name
    async fn get_pod(&self, name: &str) -> Result<Option<Pod>>;

    /// Create a Pod; an existing pod is left untouched
    async fn create_pod(&self, pod: &Pod) -> Result<()>;

    /// Delete a Pod; an absent pod counts as deleted
    async fn delete_pod(&self, name: &str) -> Result<()>;

    /// List pods matching a label selector
    async fn list_pods(&self, selector: &str) -> Result<Vec<Pod>>;

    /// Set one annotation on a Pod
    async fn annotate_pod(&self, name: &str, key: &str, value: &str) -> Result<()>;

    /// Get a ConfigMap by name
    async fn get_config_map(&self, name: &str) -> Result<Option<ConfigMap>>;

    /// Get a Secret by name
    async fn get_secret(&self, name: &str) -> Result<Option<Secret>>;
}

/// Real implementation backed by a kube `Client`
pub struct KubeClientImpl {
    client: Client,
    namespace: String,
}

impl KubeClientImpl {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
        }
    }

    fn api<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

fn ignore_status(result: std::result::Result<impl Sized, kube::Error>, code: u16) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == code => Ok(()),
        Err(e) => Err(Error::KubeError(e)),
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_dogu(&self, name: &str) -> Result<Option<Dogu>> {
        Ok(self.api::<Dogu>().get_opt(name).await?)
    }

    async fn list_dogus(&self) -> Result<Vec<Dogu>> {
        Ok(self.api::<Dogu>().list(&ListParams::default()).await?.items)
    }

    async fn patch_dogu_finalizers(&self, dogu: &Dogu, finalizers: &[String]) -> Result<Dogu> {
        let patch = json!({
            "metadata": {
                "resourceVersion": dogu.resource_version(),
                "finalizers": finalizers,
            }
        });
        let updated = self
            .api::<Dogu>()
            .patch(
                &dogu.name_any(),
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(updated)
    }

    async fn patch_dogu_status(&self, dogu: &Dogu, status: &DoguStatus) -> Result<Dogu> {
        let patch = json!({
            "metadata": {
                "resourceVersion": dogu.resource_version(),
            },
            "status": status,
        });
        let updated = self
            .api::<Dogu>()
            .patch_status(
                &dogu.name_any(),
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(updated)
    }

    async fn get_deployment(&self, name: &str) -> Result<Option<Deployment>> {
        Ok(self.api::<Deployment>().get_opt(name).await?)
    }

    async fn apply_deployment(&self, deployment: &Deployment) -> Result<()> {
        let name = deployment.name_any();
        let params = PatchParams::apply(FIELD_MANAGER).force();
        self.api::<Deployment>()
            .patch(&name, &params, &Patch::Apply(deployment))
            .await?;
        debug!(deployment = %name, "Applied deployment");
        Ok(())
    }

    async fn scale_deployment(&self, name: &str, replicas: i32) -> Result<()> {
        let patch = json!({ "spec": { "replicas": replicas } });
        self.api::<Deployment>()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn annotate_deployment(&self, name: &str, key: &str, value: &str) -> Result<()> {
        let patch = json!({ "metadata": { "annotations": { key: value } } });
        let params = PatchParams {
            field_manager: Some(UPGRADE_FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        self.api::<Deployment>()
            .patch(name, &params, &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn remove_deployment_annotation(&self, name: &str, key: &str) -> Result<()> {
        let patch = json!({ "metadata": { "annotations": { key: null } } });
        let params = PatchParams {
            field_manager: Some(UPGRADE_FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        self.api::<Deployment>()
            .patch(name, &params, &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn patch_startup_probe(
        &self,
        name: &str,
        container: &str,
        failure_threshold: Option<i32>,
    ) -> Result<()> {
        // Strategic merge keys containers by name; null removes the field
        let patch = json!({
            "spec": {
                "template": {
                    "spec": {
                        "containers": [{
                            "name": container,
                            "startupProbe": { "failureThreshold": failure_threshold },
                        }]
                    }
                }
            }
        });
        self.api::<Deployment>()
            .patch(name, &PatchParams::default(), &Patch::Strategic(&patch))
            .await?;
        Ok(())
    }

    async fn stamp_restart(&self, name: &str, restarted_at: &str) -> Result<()> {
        let patch = json!({
            "spec": {
                "template": {
                    "metadata": {
                        "annotations": {
                            ANNOTATION_RESTARTED_AT: restarted_at,
                        }
                    }
                }
            }
        });
        let params = PatchParams {
            field_manager: Some(RESTART_FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        self.api::<Deployment>()
            .patch(name, &params, &Patch::Strategic(&patch))
            .await?;
        Ok(())
    }

    async fn get_claim(&self, name: &str) -> Result<Option<PersistentVolumeClaim>> {
        Ok(self.api::<PersistentVolumeClaim>().get_opt(name).await?)
    }

    async fn create_claim(&self, claim: &PersistentVolumeClaim) -> Result<()> {
        let result = self
            .api::<PersistentVolumeClaim>()
            .create(&PostParams::default(), claim)
            .await;
        ignore_status(result, 409)
    }

    async fn resize_claim(&self, name: &str, size: &str) -> Result<()> {
        let patch = json!({
            "spec": { "resources": { "requests": { "storage": size } } }
        });
        self.api::<PersistentVolumeClaim>()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn apply_service(&self, service: &Service) -> Result<()> {
        let name = service.name_any();
        let params = PatchParams::apply(FIELD_MANAGER).force();
        self.api::<Service>()
            .patch(&name, &params, &Patch::Apply(service))
            .await?;
        debug!(service = %name, "Applied service");
        Ok(())
    }

    async fn get_pod(&self, name: &str) -> Result<Option<Pod>> {
        Ok(self.api::<Pod>().get_opt(name).await?)
    }

    async fn create_pod(&self, pod: &Pod) -> Result<()> {
        let result = self.api::<Pod>().create(&PostParams::default(), pod).await;
        ignore_status(result, 409)
    }

    async fn delete_pod(&self, name: &str) -> Result<()> {
        let result = self
            .api::<Pod>()
            .delete(name, &DeleteParams::default())
            .await;
        ignore_status(result, 404)
    }

    async fn list_pods(&self, selector: &str) -> Result<Vec<Pod>> {
        let params = ListParams::default().labels(selector);
        Ok(self.api::<Pod>().list(&params).await?.items)
    }

    async fn annotate_pod(&self, name: &str, key: &str, value: &str) -> Result<()> {
        let patch = json!({ "metadata": { "annotations": { key: value } } });
        self.api::<Pod>()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn get_config_map(&self, name: &str) -> Result<Option<ConfigMap>> {
        Ok(self.api::<ConfigMap>().get_opt(name).await?)
    }

    async fn get_secret(&self, name: &str) -> Result<Option<Secret>> {
        Ok(self.api::<Secret>().get_opt(name).await?)
    }
}
