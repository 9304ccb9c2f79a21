//! Resolution of driver applications to the replication controller running them.

use super::Reconciler;
use crate::error::{Error, LookupAppSnafu};
use crate::platform::{is_conflict, Platform};
use snafu::ResultExt;
use stackable_operator::k8s_openapi::api::core::v1::{Pod, ReplicationController};
use stackable_spark_cluster_crd::{
    constants::{LABEL_DEPLOYMENT, LABEL_DRIVER_CLUSTER},
    openshift::DeploymentConfig,
};

impl<P: Platform> Reconciler<P> {
    /// Finds the replication controller behind `app`.
    ///
    /// `app` may name a pod (resolved through its `deployment` label), a replication controller,
    /// or a deployment config (resolved to the controller of its latest version).
    pub(super) async fn resolve_driver(
        &self,
        namespace: &str,
        app: &str,
    ) -> Result<Option<String>, Error> {
        let pod: Option<Pod> = self
            .platform
            .get(namespace, app)
            .await
            .context(LookupAppSnafu { app })?;
        if let Some(deployment) = pod
            .and_then(|pod| pod.metadata.labels)
            .and_then(|mut labels| labels.remove(LABEL_DEPLOYMENT))
        {
            return Ok(Some(deployment));
        }

        if self.driver_rc(namespace, app).await?.is_some() {
            return Ok(Some(app.to_string()));
        }

        let dc: Option<DeploymentConfig> = self
            .platform
            .get(namespace, app)
            .await
            .context(LookupAppSnafu { app })?;
        if let Some(rc_name) = dc.and_then(|dc| dc.latest_rc_name()) {
            if self.driver_rc(namespace, &rc_name).await?.is_some() {
                return Ok(Some(rc_name));
            }
        }
        Ok(None)
    }

    async fn driver_rc(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ReplicationController>, Error> {
        self.platform
            .get(namespace, name)
            .await
            .context(LookupAppSnafu { app: name })
    }

    /// Name of the cluster the driver replication controller `driver` is labelled with
    pub(super) async fn driver_cluster(
        &self,
        namespace: &str,
        driver: &str,
    ) -> Result<Option<String>, Error> {
        Ok(self
            .driver_rc(namespace, driver)
            .await?
            .and_then(|rc| rc.metadata.labels)
            .and_then(|mut labels| labels.remove(LABEL_DRIVER_CLUSTER)))
    }

    /// Labels the driver replication controller with the cluster it uses.
    ///
    /// Failing to do so never fails cluster creation; conflicts are retried.
    pub(super) async fn label_driver(&self, namespace: &str, driver: &str, cluster: &str) {
        let retry = self.settings.conflict_retry;
        for attempt in 1..=retry.attempts {
            let rc: Option<ReplicationController> = match self.platform.get(namespace, driver).await
            {
                Ok(rc) => rc,
                Err(error) => {
                    tracing::warn!(
                        driver,
                        cluster,
                        %error,
                        "unable to read driver replication controller"
                    );
                    return;
                }
            };
            let mut rc = match rc {
                Some(rc) => rc,
                None => {
                    tracing::warn!(driver, cluster, "driver replication controller disappeared");
                    return;
                }
            };
            rc.metadata
                .labels
                .get_or_insert_with(Default::default)
                .insert(LABEL_DRIVER_CLUSTER.to_string(), cluster.to_string());
            match self.platform.replace(namespace, &rc).await {
                Ok(_) => {
                    tracing::debug!(driver, cluster, "labelled driver replication controller");
                    return;
                }
                Err(error) if is_conflict(&error) && attempt < retry.attempts => {
                    tracing::debug!(driver, attempt, "conflict while labelling driver, retrying");
                    retry.pause().await;
                }
                Err(error) => {
                    tracing::warn!(
                        driver,
                        cluster,
                        %error,
                        "unable to label driver replication controller"
                    );
                    return;
                }
            }
        }
    }
}
