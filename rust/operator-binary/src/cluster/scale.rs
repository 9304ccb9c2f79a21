use super::{Reconciler, SparkClusterView};
use crate::error::{ClusterIncompleteSnafu, Error, ParseAnnotationSnafu, ScaleRoleSnafu};
use crate::platform::{is_conflict, Platform};
use snafu::{OptionExt, ResultExt};
use stackable_spark_cluster_crd::{
    constants::ANNOTATION_CONFIG, openshift::DeploymentConfig, ClusterConfig, SparkRole,
    SENTINEL_COUNT,
};

impl<P: Platform> Reconciler<P> {
    /// Applies a new configuration to an existing cluster.
    ///
    /// Only the replica counts of a running cluster can change; they are resolved the same way
    /// as on create and applied to the workers first.
    pub async fn update(
        &self,
        name: &str,
        namespace: &str,
        overrides: &ClusterConfig,
    ) -> Result<SparkClusterView, Error> {
        self.ensure_exists(namespace, name).await?;
        let config = self.resolve_config(namespace, overrides).await?;
        self.apply_counts(namespace, name, config.master_count, config.worker_count)
            .await?;
        tracing::info!(
            cluster = name,
            namespace,
            masters = config.master_count,
            workers = config.worker_count,
            "updated spark cluster"
        );
        self.describe(namespace, name).await
    }

    /// Sets the replica counts of an existing cluster.
    ///
    /// A count of `-1` leaves that role untouched. Masters can only be scaled to 0 or 1.
    pub async fn scale(
        &self,
        name: &str,
        namespace: &str,
        masters: i32,
        workers: i32,
    ) -> Result<(), Error> {
        self.ensure_exists(namespace, name).await?;
        if masters > 1 {
            return Err(Error::InvalidConfig {
                source: stackable_spark_cluster_crd::Error::MasterCountOutOfRange {
                    count: masters,
                },
            });
        }
        self.apply_counts(namespace, name, masters, workers).await?;
        tracing::info!(cluster = name, namespace, masters, workers, "scaled spark cluster");
        Ok(())
    }

    /// Scales workers, then masters.
    ///
    /// The master deployment config is only written when its own count changes, and that write
    /// also records the new counts in its config annotation.
    async fn apply_counts(
        &self,
        namespace: &str,
        cluster: &str,
        masters: i32,
        workers: i32,
    ) -> Result<(), Error> {
        let workers_scaled = self
            .scale_role(namespace, cluster, SparkRole::Worker, workers, None)
            .await?;
        self.scale_role(
            namespace,
            cluster,
            SparkRole::Master,
            masters,
            workers_scaled.then(|| workers),
        )
        .await?;
        Ok(())
    }

    /// Sets the replicas of `role`'s deployment config, returning whether it changed.
    ///
    /// Scaling the master also stores `count` and `workers` in its config annotation.
    async fn scale_role(
        &self,
        namespace: &str,
        cluster: &str,
        role: SparkRole,
        count: i32,
        workers: Option<i32>,
    ) -> Result<bool, Error> {
        if count <= SENTINEL_COUNT {
            return Ok(false);
        }
        let retry = self.settings.conflict_retry;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut dc = self
                .role_config(namespace, cluster, role)
                .await
                .context(ScaleRoleSnafu { role, cluster })?
                .context(ClusterIncompleteSnafu { cluster, role })?;
            if dc.spec.replicas == count {
                return Ok(false);
            }
            dc.spec.replicas = count;
            if role == SparkRole::Master {
                record_counts(&mut dc, cluster, count, workers)?;
            }
            match self.platform.replace(namespace, &dc).await {
                Ok(_) => {
                    tracing::debug!(cluster, %role, count, "scaled deployment config");
                    return Ok(true);
                }
                Err(error) if is_conflict(&error) && attempt < retry.attempts => {
                    tracing::debug!(cluster, %role, attempt, "conflict while scaling, retrying");
                    retry.pause().await;
                }
                Err(error) => return Err(error).context(ScaleRoleSnafu { role, cluster }),
            }
        }
    }
}

/// Rewrites the counts in the config annotation of `master`, if it carries one
fn record_counts(
    master: &mut DeploymentConfig,
    cluster: &str,
    masters: i32,
    workers: Option<i32>,
) -> Result<(), Error> {
    let annotations = master
        .metadata
        .annotations
        .get_or_insert_with(Default::default);
    let mut config: ClusterConfig = match annotations.get(ANNOTATION_CONFIG) {
        Some(stored) => serde_json::from_str(stored).context(ParseAnnotationSnafu { cluster })?,
        None => return Ok(()),
    };
    config.master_count = masters;
    if let Some(workers) = workers {
        config.worker_count = workers;
    }
    annotations.insert(
        ANNOTATION_CONFIG.to_string(),
        serde_json::to_string(&config).context(ParseAnnotationSnafu { cluster })?,
    );
    Ok(())
}
