//! Lifecycle operations on Spark clusters: create, delete, find, update and scale.
//!
//! A cluster has no object of its own. It is the set of objects carrying its
//! `oshinko-cluster` label, and it exists as long as both its master and its worker
//! deployment config exist.

mod create;
mod delete;
mod driver;
mod find;
mod scale;

use crate::config::{self, ReconcilerSettings};
use crate::discovery;
use crate::error::{Error, FindObjectsSnafu};
use crate::platform::Platform;
use serde::Serialize;
use snafu::ResultExt;
use stackable_operator::k8s_openapi::api::core::v1::Pod;
use stackable_operator::kube;
use stackable_spark_cluster_crd::{
    constants::{ANNOTATION_CONFIG, LABEL_EPHEMERAL, LABEL_TYPE},
    openshift::DeploymentConfig,
    ClusterConfig, SparkRole,
};
use strum::Display;

/// Lifecycle state derived from the objects observed for a cluster
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq, Serialize)]
pub enum ClusterState {
    /// Neither deployment config exists
    Absent,
    /// Exactly one of the deployment configs exists
    Incomplete,
    Running,
    /// Both deployment configs exist but the master service does not
    #[strum(serialize = "MasterServiceMissing")]
    #[serde(rename = "MasterServiceMissing")]
    Degraded,
}

impl ClusterState {
    pub fn classify(has_master: bool, has_worker: bool, has_master_service: bool) -> Self {
        match (has_master, has_worker) {
            (false, false) => ClusterState::Absent,
            (true, true) if has_master_service => ClusterState::Running,
            (true, true) => ClusterState::Degraded,
            _ => ClusterState::Incomplete,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SparkPod {
    pub ip: Option<String>,
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub role: Option<String>,
}

impl From<Pod> for SparkPod {
    fn from(pod: Pod) -> Self {
        let status = pod.status.unwrap_or_default();
        SparkPod {
            ip: status.pod_ip,
            status: status.phase,
            role: pod
                .metadata
                .labels
                .and_then(|mut labels| labels.remove(LABEL_TYPE)),
        }
    }
}

/// Representation of a cluster as returned to callers, recomputed on every read
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SparkClusterView {
    pub namespace: String,
    pub name: String,
    pub href: String,
    pub image: Option<String>,
    pub master_url: Option<String>,
    pub master_web_url: Option<String>,
    pub master_web_route: Option<String>,
    pub status: ClusterState,
    /// Replicas reported by the worker deployment config status.
    ///
    /// This lags behind `config.worker_count`: it is 0 right after a create and only reaches
    /// the requested count once the rollout has settled. -1 if the deployment config is gone.
    pub worker_count: i32,
    /// Replicas reported by the master deployment config status, see `worker_count`
    pub master_count: i32,
    /// Stored configuration, with the counts requested on the deployment configs
    pub config: ClusterConfig,
    /// Driver replication controller the cluster is bound to, `None` for shared clusters
    pub ephemeral: Option<String>,
    pub pods: Vec<SparkPod>,
}

/// Raw observation of the objects making up a cluster
struct Observed {
    master: Option<DeploymentConfig>,
    worker: Option<DeploymentConfig>,
    master_url: Option<String>,
    master_web_url: Option<String>,
}

impl Observed {
    fn state(&self) -> ClusterState {
        ClusterState::classify(
            self.master.is_some(),
            self.worker.is_some(),
            self.master_url.is_some(),
        )
    }

    /// Whether anything at all is left of the cluster
    fn any_trace(&self) -> bool {
        self.master.is_some()
            || self.worker.is_some()
            || self.master_url.is_some()
            || self.master_web_url.is_some()
    }
}

fn replicas(dc: &Option<DeploymentConfig>) -> i32 {
    dc.as_ref()
        .map(|dc| dc.status.as_ref().map_or(0, |status| status.replicas))
        .unwrap_or(-1)
}

fn master_image(dc: &DeploymentConfig) -> Option<String> {
    dc.spec
        .template
        .as_ref()?
        .spec
        .as_ref()?
        .containers
        .first()?
        .image
        .clone()
}

pub struct Reconciler<P> {
    platform: P,
    settings: ReconcilerSettings,
}

impl<P: Platform> Reconciler<P> {
    pub fn new(platform: P, settings: ReconcilerSettings) -> Self {
        Reconciler { platform, settings }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Resolves `overrides` against the configured defaults and the stored configs of `namespace`
    pub async fn resolve_config(
        &self,
        namespace: &str,
        overrides: &ClusterConfig,
    ) -> Result<ClusterConfig, Error> {
        config::resolve(&self.platform, namespace, &self.settings.defaults, overrides).await
    }

    /// The deployment config of `role` in `cluster`, found by its labels
    async fn role_config(
        &self,
        namespace: &str,
        cluster: &str,
        role: SparkRole,
    ) -> kube::Result<Option<DeploymentConfig>> {
        let dcs =
            discovery::deployment_configs(&self.platform, namespace, Some(role), Some(cluster))
                .await?;
        Ok(dcs.into_iter().next())
    }

    async fn observe(&self, namespace: &str, cluster: &str) -> Result<Observed, Error> {
        let master = self
            .role_config(namespace, cluster, SparkRole::Master)
            .await
            .context(FindObjectsSnafu {
                kind: "DeploymentConfig",
                cluster,
            })?;
        let worker = self
            .role_config(namespace, cluster, SparkRole::Worker)
            .await
            .context(FindObjectsSnafu {
                kind: "DeploymentConfig",
                cluster,
            })?;
        let master_url =
            discovery::service_url(&self.platform, namespace, SparkRole::Master, cluster)
                .await
                .context(FindObjectsSnafu {
                    kind: "Service",
                    cluster,
                })?;
        let master_web_url =
            discovery::service_url(&self.platform, namespace, SparkRole::WebUi, cluster)
                .await
                .context(FindObjectsSnafu {
                    kind: "Service",
                    cluster,
                })?;
        Ok(Observed {
            master,
            worker,
            master_url,
            master_web_url,
        })
    }

    /// Builds the view of a cluster from what is observed, without listing its pods
    async fn describe(&self, namespace: &str, cluster: &str) -> Result<SparkClusterView, Error> {
        let observed = self.observe(namespace, cluster).await?;
        let master_web_route = discovery::route_host(&self.platform, namespace, cluster)
            .await
            .context(FindObjectsSnafu {
                kind: "Route",
                cluster,
            })?;

        let mut config = ClusterConfig::default();
        let mut ephemeral = None;
        let mut image = None;
        if let Some(master) = &observed.master {
            let labels = master.metadata.labels.as_ref();
            ephemeral = labels.and_then(|l| l.get(LABEL_EPHEMERAL)).cloned();
            let annotation = master
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(ANNOTATION_CONFIG));
            if let Some(annotation) = annotation {
                match serde_json::from_str(annotation) {
                    Ok(stored) => config = stored,
                    Err(error) => tracing::warn!(
                        cluster,
                        %error,
                        "ignoring unreadable config annotation"
                    ),
                }
            }
            image = config.spark_image.clone().or_else(|| master_image(master));
            config.master_count = master.spec.replicas;
        }
        // The annotation counts can lag behind the deployment configs.
        if let Some(worker) = &observed.worker {
            config.worker_count = worker.spec.replicas;
        }

        Ok(SparkClusterView {
            namespace: namespace.to_string(),
            name: cluster.to_string(),
            href: format!("/clusters/{cluster}"),
            image,
            status: observed.state(),
            worker_count: replicas(&observed.worker),
            master_count: replicas(&observed.master),
            master_url: observed.master_url,
            master_web_url: observed.master_web_url,
            master_web_route,
            config,
            ephemeral,
            pods: Vec::new(),
        })
    }
}
