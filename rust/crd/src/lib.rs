//! This module provides all required CRD definitions and additional helper methods.
pub mod cluster_config;
pub mod constants;
pub mod openshift;

pub use cluster_config::{ClusterConfig, Metrics, SENTINEL_COUNT};

use constants::*;
use serde::{Deserialize, Serialize};
use snafu::Snafu;
use stackable_operator::{
    kube::CustomResource,
    schemars::{self, JsonSchema},
};
use std::collections::BTreeMap;
use strum::{Display, EnumString};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("cluster configuration must have a master count of 0 or 1, got {count}"))]
    MasterCountOutOfRange { count: i32 },
    #[snafu(display(
        "cluster configuration may not have a worker count less than 0, got {count}"
    ))]
    NegativeWorkerCount { count: i32 },
    #[snafu(display("'{field}', expected {expected}"))]
    InvalidField { field: String, expected: String },
}

#[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "radanalytics.io",
    version = "v1",
    kind = "SparkCluster",
    plural = "sparkclusters",
    shortname = "sc",
    status = "SparkClusterStatus",
    namespaced,
    crates(
        kube_core = "stackable_operator::kube::core",
        k8s_openapi = "stackable_operator::k8s_openapi",
        schemars = "stackable_operator::schemars"
    )
)]
#[serde(rename_all = "camelCase")]
pub struct SparkClusterSpec {
    /// Spark image used when neither the config nor a stored config names one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub config: ClusterConfig,
}

#[derive(Clone, Default, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SparkClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_web_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_web_route: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_count: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_count: Option<i32>,
}

/// The value of the `oshinko-type` label on every object belonging to a cluster
#[derive(
    Clone, Copy, Debug, Deserialize, Display, EnumString, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SparkRole {
    Master,
    Worker,
    #[strum(serialize = "webui")]
    #[serde(rename = "webui")]
    WebUi,
    Metrics,
}

impl SparkRole {
    /// Name of the object of this role for cluster `cluster`
    pub fn object_name(&self, cluster: &str) -> String {
        let suffix = match self {
            SparkRole::Master => MASTER_SUFFIX,
            SparkRole::Worker => WORKER_SUFFIX,
            SparkRole::WebUi => WEB_SERVICE_SUFFIX,
            SparkRole::Metrics => METRICS_SERVICE_SUFFIX,
        };
        format!("{cluster}{suffix}")
    }

    /// Labels identifying the objects of this role in `cluster`
    pub fn labels(&self, cluster: &str) -> BTreeMap<String, String> {
        [
            (LABEL_CLUSTER.to_string(), cluster.to_string()),
            (LABEL_TYPE.to_string(), self.to_string()),
        ]
        .into()
    }
}

/// Name of the master service, which is the cluster name itself
pub fn master_service_name(cluster: &str) -> String {
    cluster.to_string()
}

pub fn route_name(cluster: &str) -> String {
    format!("{cluster}{ROUTE_SUFFIX}")
}

pub fn master_url(cluster: &str) -> String {
    format!("spark://{}:{}", master_service_name(cluster), MASTER_PORT)
}

pub fn master_web_url(cluster: &str) -> String {
    format!(
        "http://{}:{}",
        SparkRole::WebUi.object_name(cluster),
        MASTER_WEB_PORT
    )
}
