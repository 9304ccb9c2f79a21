use super::Reconciler;
use crate::discovery::Selector;
use crate::error::{DeleteRefusedSnafu, Error, NothingToDeleteSnafu};
use crate::platform::{is_not_found, Platform, PlatformObject};
use snafu::ensure;
use stackable_operator::{
    k8s_openapi::api::core::v1::{Pod, ReplicationController, Service},
    kube::Resource,
};
use stackable_spark_cluster_crd::{
    constants::{
        DRIVER_STATUS_COMPLETED, DRIVER_STATUS_TERMINATED, LABEL_DELETE_PENDING,
        LABEL_DEPLOYER_POD_FOR, LABEL_EPHEMERAL,
    },
    openshift::{DeploymentConfig, Route},
    route_name, SparkRole,
};

/// Collects what happened during a delete, in the order it happened
#[derive(Default)]
struct DeleteReport {
    found: bool,
    info: Vec<String>,
}

impl<P: Platform> Reconciler<P> {
    /// Deletes every object of the cluster `name`.
    ///
    /// With an `app_status` of `completed` or `terminated` the call comes from a finishing
    /// driver, and an ephemeral cluster is only deleted when it is bound to the driver behind
    /// `app` and that driver has no more work. Individual delete failures do not stop the
    /// operation; they are reported in the returned info.
    pub async fn delete(
        &self,
        name: &str,
        namespace: &str,
        app: Option<&str>,
        app_status: Option<&str>,
    ) -> Result<String, Error> {
        if let Some(status @ (DRIVER_STATUS_COMPLETED | DRIVER_STATUS_TERMINATED)) = app_status {
            if let Some(reason) = self.refuse_delete(namespace, name, app, status).await {
                tracing::info!(cluster = name, %reason, "keeping ephemeral cluster");
                return DeleteRefusedSnafu {
                    cluster: name,
                    info: reason,
                }
                .fail();
            }
        }

        self.mark_delete_pending(namespace, name).await;

        let mut report = DeleteReport::default();
        let dcs = self
            .delete_listed::<DeploymentConfig>(
                namespace,
                &Selector::cluster_objects(None, Some(name)),
                "deployment config",
                &mut report,
            )
            .await;
        tracing::debug!(cluster = name, count = dcs.len(), "deleted deployment configs");

        let rcs = self
            .delete_listed::<ReplicationController>(
                namespace,
                &Selector::cluster_objects(None, Some(name)),
                "replication controller",
                &mut report,
            )
            .await;
        for rc in &rcs {
            for pod in self
                .delete_listed::<Pod>(
                    namespace,
                    &Selector::equals(LABEL_DEPLOYER_POD_FOR, rc),
                    "deployer pod",
                    &mut report,
                )
                .await
            {
                report.info.push(format!("deleted deployer pod {pod}"));
            }
        }
        self.delete_listed::<Pod>(
            namespace,
            &Selector::cluster_objects(None, Some(name)),
            "pod",
            &mut report,
        )
        .await;

        // A route alone does not make a cluster.
        let route = route_name(name);
        match self.platform.delete::<Route>(namespace, &route).await {
            Ok(()) => {}
            Err(error) if is_not_found(&error) => {}
            Err(error) => report
                .info
                .push(format!("unable to delete route {route} ({error})")),
        }

        self.delete_listed::<Service>(
            namespace,
            &Selector::cluster_objects(None, Some(name)),
            "service",
            &mut report,
        )
        .await;

        let info = report.info.join(", ");
        ensure!(
            report.found,
            NothingToDeleteSnafu {
                cluster: name,
                info
            }
        );
        tracing::info!(cluster = name, namespace, %info, "deleted spark cluster");
        Ok(info)
    }

    /// Deletes every object of kind `K` matching `selector` and returns the names deleted
    async fn delete_listed<K: PlatformObject>(
        &self,
        namespace: &str,
        selector: &Selector,
        kind: &str,
        report: &mut DeleteReport,
    ) -> Vec<String> {
        let objects: Vec<K> = match self.platform.list(namespace, selector).await {
            Ok(objects) => objects,
            Err(error) => {
                report
                    .info
                    .push(format!("unable to find {kind}s ({error})"));
                return Vec::new();
            }
        };
        let mut deleted = Vec::new();
        for obj in objects {
            let name = obj.meta().name.clone().unwrap_or_default();
            match self.platform.delete::<K>(namespace, &name).await {
                Ok(()) => {
                    report.found = true;
                    deleted.push(name);
                }
                Err(error) => report
                    .info
                    .push(format!("unable to delete {kind} {name} ({error})")),
            }
        }
        deleted
    }

    /// Decides whether a finishing driver may delete the cluster, returning the reason if not
    async fn refuse_delete(
        &self,
        namespace: &str,
        cluster: &str,
        app: Option<&str>,
        status: &str,
    ) -> Option<String> {
        let master = match self.role_config(namespace, cluster, SparkRole::Master).await {
            Ok(Some(master)) => master,
            Ok(None) => return None,
            Err(error) => {
                tracing::debug!(cluster, %error, "master unreadable, deleting anyway");
                return None;
            }
        };
        let owner = match master
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(LABEL_EPHEMERAL))
        {
            Some(owner) => owner.clone(),
            None => return Some("cluster is not ephemeral".to_string()),
        };

        let driver = match app {
            Some(app) => self.resolve_driver(namespace, app).await.unwrap_or_else(|error| {
                tracing::debug!(cluster, app, %error, "unable to resolve driver");
                None
            }),
            None => None,
        };
        if driver.as_deref() != Some(owner.as_str()) {
            return Some("cluster is not linked to app".to_string());
        }

        let replicas = match self
            .platform
            .get::<ReplicationController>(namespace, &owner)
            .await
        {
            Ok(Some(rc)) => rc.spec.and_then(|spec| spec.replicas),
            Ok(None) | Err(_) => return None,
        };
        let idle = match replicas {
            Some(0) => true,
            None | Some(1) => status == DRIVER_STATUS_COMPLETED,
            Some(_) => false,
        };
        if idle {
            None
        } else {
            Some("driver replica count > 0 (or > 1 for completed app)".to_string())
        }
    }

    /// Labels the master deployment config as being deleted, ignoring any failure
    async fn mark_delete_pending(&self, namespace: &str, cluster: &str) {
        let mut master = match self.role_config(namespace, cluster, SparkRole::Master).await {
            Ok(Some(master)) => master,
            _ => return,
        };
        master
            .metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert(LABEL_DELETE_PENDING.to_string(), "true".to_string());
        if let Err(error) = self.platform.replace(namespace, &master).await {
            tracing::debug!(cluster, %error, "unable to mark cluster as pending deletion");
        }
    }
}
