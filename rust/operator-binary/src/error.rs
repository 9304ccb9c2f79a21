use crate::composer;
use crate::platform::{is_already_exists, is_not_found};
use snafu::Snafu;
use stackable_operator::kube;
use stackable_spark_cluster_crd::SparkRole;
use strum::Display;

/// Stable numeric classification of reconciler failures, shared with API consumers
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub enum ErrorCode {
    ClusterConfig = 100,
    ClientOperation = 101,
    ClusterIncomplete = 102,
    NoSuchCluster = 103,
    ComponentExists = 104,
    Ephemeral = 105,
}

impl ErrorCode {
    pub fn code(self) -> u16 {
        self as u16
    }

    /// HTTP status a REST front end answers with for this code
    pub fn http_status(self) -> u16 {
        match self {
            ErrorCode::NoSuchCluster => 404,
            ErrorCode::ClusterConfig
            | ErrorCode::ClusterIncomplete
            | ErrorCode::ComponentExists
            | ErrorCode::Ephemeral => 409,
            ErrorCode::ClientOperation => 500,
        }
    }
}

#[derive(Snafu, Debug)]
#[allow(clippy::enum_variant_names)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("invalid cluster configuration"))]
    InvalidConfig {
        source: stackable_spark_cluster_crd::Error,
    },
    #[snafu(display("named config '{name}' does not exist"))]
    NamedConfigMissing { name: String },
    #[snafu(display("unable to read stored config '{name}'"))]
    ReadNamedConfig { source: kube::Error, name: String },
    #[snafu(display("unable to find spark configuration '{name}'"))]
    SparkConfigMissing { name: String },
    #[snafu(display("unable to read spark configuration '{name}'"))]
    ReadSparkConfig { source: kube::Error, name: String },
    #[snafu(display("no spark image specified"))]
    NoSparkImage,
    #[snafu(display("no such app '{app}'"))]
    NoSuchApp { app: String },
    #[snafu(display("unable to look up app '{app}'"))]
    LookupApp { source: kube::Error, app: String },
    #[snafu(display("failed to build resources for cluster '{cluster}'"))]
    ComposeCluster {
        source: composer::Error,
        cluster: String,
    },
    #[snafu(display("cluster '{cluster}' already exists{}", if *incomplete { " (incomplete)" } else { "" }))]
    ClusterExists { cluster: String, incomplete: bool },
    #[snafu(display("unable to create {kind} '{name}'"))]
    CreateObject {
        source: kube::Error,
        kind: &'static str,
        name: String,
    },
    #[snafu(display("no such cluster '{cluster}'"))]
    NoSuchCluster { cluster: String },
    #[snafu(display("no cluster found for app '{app}'"))]
    NoClusterForApp { app: String },
    #[snafu(display("cluster '{cluster}' is incomplete, spark {role} is missing"))]
    ClusterIncomplete { cluster: String, role: SparkRole },
    #[snafu(display("unable to find {kind} objects of cluster '{cluster}'"))]
    FindObjects {
        source: kube::Error,
        kind: &'static str,
        cluster: String,
    },
    #[snafu(display("unable to find spark masters"))]
    ListMasters { source: kube::Error },
    #[snafu(display("cluster not deleted '{cluster}': {info}"))]
    DeleteRefused { cluster: String, info: String },
    #[snafu(display("no such cluster '{cluster}'{}", if info.is_empty() { String::new() } else { format!(": {info}") }))]
    NothingToDelete { cluster: String, info: String },
    #[snafu(display("unable to update deployment config for spark {role} of cluster '{cluster}'"))]
    ScaleRole {
        source: kube::Error,
        role: SparkRole,
        cluster: String,
    },
    #[snafu(display("config annotation of cluster '{cluster}' is not valid"))]
    ParseAnnotation {
        source: serde_json::Error,
        cluster: String,
    },
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidConfig { .. }
            | Error::NamedConfigMissing { .. }
            | Error::SparkConfigMissing { .. }
            | Error::NoSparkImage
            | Error::NoSuchApp { .. } => ErrorCode::ClusterConfig,
            Error::ClusterExists { .. } => ErrorCode::ComponentExists,
            Error::CreateObject { source, .. } if is_already_exists(source) => {
                ErrorCode::ComponentExists
            }
            Error::NoSuchCluster { .. }
            | Error::NoClusterForApp { .. }
            | Error::NothingToDelete { .. } => ErrorCode::NoSuchCluster,
            Error::ClusterIncomplete { .. } => ErrorCode::ClusterIncomplete,
            Error::ScaleRole { source, .. } if is_not_found(source) => {
                ErrorCode::ClusterIncomplete
            }
            Error::DeleteRefused { .. } => ErrorCode::Ephemeral,
            Error::ReadNamedConfig { .. }
            | Error::ReadSparkConfig { .. }
            | Error::LookupApp { .. }
            | Error::ComposeCluster { .. }
            | Error::CreateObject { .. }
            | Error::FindObjects { .. }
            | Error::ListMasters { .. }
            | Error::ScaleRole { .. }
            | Error::ParseAnnotation { .. } => ErrorCode::ClientOperation,
        }
    }
}
