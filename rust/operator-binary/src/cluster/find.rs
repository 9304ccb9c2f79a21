use super::{Reconciler, SparkClusterView, SparkPod};
use crate::discovery;
use crate::error::{
    ClusterIncompleteSnafu, Error, FindObjectsSnafu, ListMastersSnafu, NoClusterForAppSnafu,
    NoSuchClusterSnafu,
};
use crate::platform::Platform;
use snafu::{ensure, OptionExt, ResultExt};
use stackable_spark_cluster_crd::{constants::LABEL_CLUSTER, SparkRole};
use std::collections::BTreeSet;

impl<P: Platform> Reconciler<P> {
    /// Fails with `NoSuchCluster` unless both deployment configs of `cluster` exist
    pub(super) async fn ensure_exists(&self, namespace: &str, cluster: &str) -> Result<(), Error> {
        let observed = self.observe(namespace, cluster).await?;
        ensure!(
            observed.master.is_some() && observed.worker.is_some(),
            NoSuchClusterSnafu { cluster }
        );
        Ok(())
    }

    /// Describes the cluster `name` including its pods
    pub async fn find(&self, name: &str, namespace: &str) -> Result<SparkClusterView, Error> {
        self.ensure_exists(namespace, name).await?;
        for role in [SparkRole::Master, SparkRole::Worker] {
            discovery::replication_controller(&self.platform, namespace, role, name)
                .await
                .context(FindObjectsSnafu {
                    kind: "ReplicationController",
                    cluster: name,
                })?
                .context(ClusterIncompleteSnafu {
                    cluster: name,
                    role,
                })?;
        }

        let mut view = self.describe(namespace, name).await?;
        view.pods = discovery::pods(&self.platform, namespace, None, name)
            .await
            .context(FindObjectsSnafu {
                kind: "Pod",
                cluster: name,
            })?
            .into_iter()
            .map(SparkPod::from)
            .collect();
        Ok(view)
    }

    /// Lists the clusters in `namespace`, or only the one used by the driver `app`.
    ///
    /// Listed clusters are summaries without pods; an incomplete cluster shows up with the
    /// `Incomplete` status rather than failing the listing.
    pub async fn find_all(
        &self,
        namespace: &str,
        app: Option<&str>,
    ) -> Result<Vec<SparkClusterView>, Error> {
        if let Some(app) = app {
            let driver = self
                .resolve_driver(namespace, app)
                .await?
                .context(NoClusterForAppSnafu { app })?;
            let cluster = self
                .driver_cluster(namespace, &driver)
                .await?
                .context(NoClusterForAppSnafu { app })?;
            return Ok(vec![self.find(&cluster, namespace).await?]);
        }

        let clusters = discovery::deployment_configs(
            &self.platform,
            namespace,
            Some(SparkRole::Master),
            None,
        )
        .await
        .context(ListMastersSnafu)?
        .into_iter()
        .filter_map(|dc| dc.metadata.labels?.remove(LABEL_CLUSTER))
        .collect::<BTreeSet<_>>();

        let mut views = Vec::with_capacity(clusters.len());
        for cluster in clusters {
            views.push(self.describe(namespace, &cluster).await?);
        }
        Ok(views)
    }
}
