//! Builds the objects a Spark cluster consists of. Nothing in here talks to the platform.

use snafu::{ResultExt, Snafu};
use stackable_operator::{
    builder::{ContainerBuilder, ObjectMetaBuilder, PodBuilder},
    k8s_openapi::{
        api::core::v1::{
            ConfigMapVolumeSource, ContainerPort, EnvVar, HTTPGetAction, Probe, Service,
            ServicePort, ServiceSpec, Volume,
        },
        apimachinery::pkg::util::intstr::IntOrString,
    },
    kube::api::ObjectMeta,
};
use stackable_spark_cluster_crd::{
    constants::*,
    master_service_name, master_url, master_web_url,
    openshift::{
        DeploymentConfig, DeploymentConfigSpec, DeploymentStrategy, DeploymentTriggerPolicy,
        Route, RoutePort, RouteSpec, RouteTargetReference,
    },
    route_name, ClusterConfig, Metrics, SparkRole,
};
use std::collections::BTreeMap;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to serialize the config annotation"))]
    SerializeConfig { source: serde_json::Error },
}

/// The full object set of one cluster, in creation order
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterResources {
    pub master: DeploymentConfig,
    pub worker: DeploymentConfig,
    pub master_service: Service,
    pub web_service: Service,
    pub metrics_service: Option<Service>,
    pub web_route: Option<Route>,
}

fn web_health_check(port: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            port: IntOrString::Int(port),
            ..HTTPGetAction::default()
        }),
        period_seconds: Some(10),
        initial_delay_seconds: Some(10),
        ..Probe::default()
    }
}

fn env_var(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..EnvVar::default()
    }
}

fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: port,
        protocol: Some("TCP".to_string()),
        ..ContainerPort::default()
    }
}

fn metadata(name: &str, namespace: &str, labels: BTreeMap<String, String>) -> ObjectMeta {
    ObjectMetaBuilder::new()
        .name(name)
        .namespace(namespace)
        .with_labels(labels)
        .build()
}

struct Workload<'a> {
    cluster: &'a str,
    namespace: &'a str,
    role: SparkRole,
    image: &'a str,
    replicas: i32,
    spark_config: Option<&'a str>,
    env: Vec<EnvVar>,
    ports: Vec<ContainerPort>,
    web_port: i32,
}

impl Workload<'_> {
    fn build(self) -> DeploymentConfig {
        let name = self.role.object_name(self.cluster);
        let labels = self.role.labels(self.cluster);

        let mut env = vec![env_var(ENV_CLUSTER_NAME, self.cluster)];
        if self.spark_config.is_some() {
            env.push(env_var(ENV_UPDATE_CONF_DIR, SPARK_CONF_DIR));
        }
        env.extend(self.env);

        let mut container = ContainerBuilder::new(&name);
        container
            .image(self.image)
            .add_env_vars(env)
            .add_container_ports(self.ports)
            .readiness_probe(web_health_check(self.web_port))
            .liveness_probe(web_health_check(self.web_port));
        if self.spark_config.is_some() {
            container.add_volume_mount(CONFIG_VOLUME_NAME, SPARK_CONF_DIR);
        }
        let mut container = container.build();
        for mount in container.volume_mounts.iter_mut().flatten() {
            mount.read_only = Some(true);
        }

        let mut pod = PodBuilder::new();
        pod.metadata_builder(|m| m.with_labels(labels.clone()))
            .add_container(container);
        if let Some(config_map) = self.spark_config {
            pod.add_volume(Volume {
                name: CONFIG_VOLUME_NAME.to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: Some(config_map.to_string()),
                    ..ConfigMapVolumeSource::default()
                }),
                ..Volume::default()
            });
        }

        DeploymentConfig {
            metadata: metadata(&name, self.namespace, labels.clone()),
            spec: DeploymentConfigSpec {
                replicas: self.replicas,
                selector: Some(labels),
                template: Some(pod.build_template()),
                strategy: Some(DeploymentStrategy {
                    type_: "Rolling".to_string(),
                }),
                triggers: vec![DeploymentTriggerPolicy {
                    type_: "ConfigChange".to_string(),
                }],
            },
            status: None,
        }
    }
}

fn metrics_env(metrics: Metrics) -> Vec<EnvVar> {
    if metrics.enabled() {
        vec![env_var(ENV_METRICS_ON, metrics.to_string())]
    } else {
        Vec::new()
    }
}

/// The master deployment config.
///
/// `config` must be resolved; its JSON form is stored in the `oshinko-config` annotation.
/// An `ephemeral_owner` marks the cluster as bound to that driver replication controller.
pub fn master(
    cluster: &str,
    namespace: &str,
    image: &str,
    config: &ClusterConfig,
    ephemeral_owner: Option<&str>,
) -> Result<DeploymentConfig, Error> {
    let metrics = config.metrics();
    let mut ports = vec![
        container_port(PORT_NAME_WEB, MASTER_WEB_PORT),
        container_port(PORT_NAME_MASTER, MASTER_PORT),
    ];
    if metrics.enabled() {
        ports.push(container_port(PORT_NAME_METRICS, METRICS_PORT));
    }
    let mut dc = Workload {
        cluster,
        namespace,
        role: SparkRole::Master,
        image,
        replicas: config.master_count,
        spark_config: config.spark_master_config.as_deref(),
        env: metrics_env(metrics),
        ports,
        web_port: MASTER_WEB_PORT,
    }
    .build();

    if let Some(owner) = ephemeral_owner {
        dc.metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(LABEL_EPHEMERAL.to_string(), owner.to_string());
    }
    let annotation = serde_json::to_string(config).context(SerializeConfigSnafu)?;
    dc.metadata.annotations = Some([(ANNOTATION_CONFIG.to_string(), annotation)].into());
    Ok(dc)
}

pub fn worker(
    cluster: &str,
    namespace: &str,
    image: &str,
    config: &ClusterConfig,
) -> DeploymentConfig {
    let mut env = vec![
        env_var(ENV_MASTER_ADDRESS, master_url(cluster)),
        env_var(ENV_MASTER_UI_ADDRESS, master_web_url(cluster)),
    ];
    env.extend(metrics_env(config.metrics()));
    Workload {
        cluster,
        namespace,
        role: SparkRole::Worker,
        image,
        replicas: config.worker_count,
        spark_config: config.spark_worker_config.as_deref(),
        env,
        ports: vec![container_port(PORT_NAME_WEB, WORKER_WEB_PORT)],
        web_port: WORKER_WEB_PORT,
    }
    .build()
}

/// A service in front of the master pods exposing `port` under `role`'s labels
fn master_pod_service(
    name: &str,
    namespace: &str,
    cluster: &str,
    role: SparkRole,
    port_name: &str,
    port: i32,
) -> Service {
    Service {
        metadata: metadata(name, namespace, role.labels(cluster)),
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                name: Some(port_name.to_string()),
                port,
                target_port: Some(IntOrString::Int(port)),
                protocol: Some("TCP".to_string()),
                ..ServicePort::default()
            }]),
            selector: Some(SparkRole::Master.labels(cluster)),
            ..ServiceSpec::default()
        }),
        status: None,
    }
}

pub fn web_route(cluster: &str, namespace: &str) -> Route {
    Route {
        metadata: metadata(
            &route_name(cluster),
            namespace,
            SparkRole::WebUi.labels(cluster),
        ),
        spec: RouteSpec {
            host: None,
            to: RouteTargetReference {
                kind: "Service".to_string(),
                name: SparkRole::WebUi.object_name(cluster),
            },
            port: Some(RoutePort {
                target_port: IntOrString::String(PORT_NAME_WEB.to_string()),
            }),
        },
        status: None,
    }
}

/// Composes every object of `cluster` from a resolved config
pub fn compose(
    cluster: &str,
    namespace: &str,
    image: &str,
    config: &ClusterConfig,
    ephemeral_owner: Option<&str>,
) -> Result<ClusterResources, Error> {
    Ok(ClusterResources {
        master: master(cluster, namespace, image, config, ephemeral_owner)?,
        worker: worker(cluster, namespace, image, config),
        master_service: master_pod_service(
            &master_service_name(cluster),
            namespace,
            cluster,
            SparkRole::Master,
            PORT_NAME_MASTER,
            MASTER_PORT,
        ),
        web_service: master_pod_service(
            &SparkRole::WebUi.object_name(cluster),
            namespace,
            cluster,
            SparkRole::WebUi,
            PORT_NAME_WEB,
            MASTER_WEB_PORT,
        ),
        metrics_service: config.metrics().enabled().then(|| {
            master_pod_service(
                &SparkRole::Metrics.object_name(cluster),
                namespace,
                cluster,
                SparkRole::Metrics,
                PORT_NAME_METRICS,
                METRICS_PORT,
            )
        }),
        web_route: config
            .expose_web_ui()
            .then(|| web_route(cluster, namespace)),
    })
}
