//! Finding the objects of a cluster by label.

use crate::platform::Platform;
use stackable_operator::{
    k8s_openapi::api::core::v1::{Pod, ReplicationController, Service},
    kube,
};
use stackable_spark_cluster_crd::{
    constants::{LABEL_CLUSTER, LABEL_TYPE},
    openshift::{DeploymentConfig, Route},
    SparkRole,
};
use std::collections::BTreeMap;
use std::fmt::{self, Display};

#[derive(Clone, Debug, Eq, PartialEq)]
enum Requirement {
    Exists(String),
    Equals(String, String),
}

/// A label selector made of existence and equality requirements, all of which must hold
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    /// Selects objects created for Spark clusters.
    ///
    /// Both the cluster and the type label must be present; `role` and `cluster` narrow them
    /// down to a value when given.
    pub fn cluster_objects(role: Option<SparkRole>, cluster: Option<&str>) -> Self {
        let mut selector = Selector::default();
        selector.requirements.push(match cluster {
            Some(cluster) => Requirement::Equals(LABEL_CLUSTER.to_string(), cluster.to_string()),
            None => Requirement::Exists(LABEL_CLUSTER.to_string()),
        });
        selector.requirements.push(match role {
            Some(role) => Requirement::Equals(LABEL_TYPE.to_string(), role.to_string()),
            None => Requirement::Exists(LABEL_TYPE.to_string()),
        });
        selector
    }

    pub fn equals(key: &str, value: &str) -> Self {
        Selector {
            requirements: vec![Requirement::Equals(key.to_string(), value.to_string())],
        }
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|requirement| match requirement {
            Requirement::Exists(key) => labels.contains_key(key),
            Requirement::Equals(key, value) => labels.get(key) == Some(value),
        })
    }
}

impl Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .requirements
            .iter()
            .map(|requirement| match requirement {
                Requirement::Exists(key) => key.clone(),
                Requirement::Equals(key, value) => format!("{key}={value}"),
            })
            .collect::<Vec<_>>();
        write!(f, "{}", rendered.join(","))
    }
}

pub async fn deployment_configs<P: Platform>(
    platform: &P,
    namespace: &str,
    role: Option<SparkRole>,
    cluster: Option<&str>,
) -> kube::Result<Vec<DeploymentConfig>> {
    platform
        .list(namespace, &Selector::cluster_objects(role, cluster))
        .await
}

/// The newest replication controller of `role` in `cluster`.
///
/// Redeploying a deployment config leaves older replication controllers behind, so the one
/// with the latest creation timestamp wins.
pub async fn replication_controller<P: Platform>(
    platform: &P,
    namespace: &str,
    role: SparkRole,
    cluster: &str,
) -> kube::Result<Option<ReplicationController>> {
    let rcs: Vec<ReplicationController> = platform
        .list(namespace, &Selector::cluster_objects(Some(role), Some(cluster)))
        .await?;
    Ok(rcs.into_iter().max_by(|a, b| {
        a.metadata
            .creation_timestamp
            .as_ref()
            .map(|t| t.0)
            .cmp(&b.metadata.creation_timestamp.as_ref().map(|t| t.0))
            .then_with(|| a.metadata.name.cmp(&b.metadata.name))
    }))
}

/// URL of the first service of `role` in `cluster`, `None` if no such service exists
pub async fn service_url<P: Platform>(
    platform: &P,
    namespace: &str,
    role: SparkRole,
    cluster: &str,
) -> kube::Result<Option<String>> {
    let services: Vec<Service> = platform
        .list(namespace, &Selector::cluster_objects(Some(role), Some(cluster)))
        .await?;
    let scheme = match role {
        SparkRole::Master => "spark",
        _ => "http",
    };
    Ok(services.into_iter().find_map(|service| {
        let name = service.metadata.name?;
        let port = service.spec?.ports?.into_iter().next()?.port;
        Some(format!("{scheme}://{name}:{port}"))
    }))
}

/// Host of the web UI route of `cluster`
pub async fn route_host<P: Platform>(
    platform: &P,
    namespace: &str,
    cluster: &str,
) -> kube::Result<Option<String>> {
    let routes: Vec<Route> = platform
        .list(
            namespace,
            &Selector::cluster_objects(Some(SparkRole::WebUi), Some(cluster)),
        )
        .await?;
    Ok(routes
        .iter()
        .find_map(|route| route.host().map(str::to_string)))
}

pub async fn pods<P: Platform>(
    platform: &P,
    namespace: &str,
    role: Option<SparkRole>,
    cluster: &str,
) -> kube::Result<Vec<Pod>> {
    platform
        .list(namespace, &Selector::cluster_objects(role, Some(cluster)))
        .await
}
