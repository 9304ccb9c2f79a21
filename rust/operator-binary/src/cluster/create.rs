use super::{ClusterState, Reconciler, SparkClusterView};
use crate::composer::{self, ClusterResources};
use crate::config;
use crate::discovery;
use crate::error::{
    ClusterExistsSnafu, ComposeClusterSnafu, CreateObjectSnafu, Error, FindObjectsSnafu,
    NoSparkImageSnafu, NoSuchAppSnafu,
};
use crate::platform::{Platform, PlatformObject};
use snafu::{OptionExt, ResultExt};
use stackable_operator::kube::Resource;
use stackable_spark_cluster_crd::{ClusterConfig, SparkRole};

fn object_name<K: Resource>(obj: &K) -> String {
    obj.meta().name.clone().unwrap_or_default()
}

impl<P: Platform> Reconciler<P> {
    /// Creates the cluster `name` in `namespace`.
    ///
    /// The image is taken from the resolved config, then from `image`, then from the configured
    /// default image. With `app` given, the driver it resolves to is labelled with the cluster;
    /// `ephemeral` additionally binds the cluster to that driver.
    pub async fn create(
        &self,
        name: &str,
        namespace: &str,
        image: Option<&str>,
        overrides: &ClusterConfig,
        app: Option<&str>,
        ephemeral: bool,
    ) -> Result<SparkClusterView, Error> {
        let observed = self.observe(namespace, name).await?;
        if observed.any_trace() {
            return ClusterExistsSnafu {
                cluster: name,
                incomplete: observed.state() != ClusterState::Running,
            }
            .fail();
        }

        let mut config = self.resolve_config(namespace, overrides).await?;
        let image = config
            .spark_image
            .clone()
            .or_else(|| image.map(str::to_string))
            .or_else(|| self.settings.default_image.clone())
            .context(NoSparkImageSnafu)?;
        config.spark_image = Some(image.clone());
        for spark_config in [&config.spark_master_config, &config.spark_worker_config]
            .into_iter()
            .flatten()
        {
            config::check_spark_config(&self.platform, namespace, spark_config).await?;
        }

        let driver = match app {
            Some(app) => self.resolve_driver(namespace, app).await?,
            None => None,
        };
        let ephemeral_owner = match (ephemeral, &driver) {
            (false, _) => None,
            (true, Some(driver)) => Some(driver.as_str()),
            (true, None) => {
                return NoSuchAppSnafu {
                    app: app.unwrap_or_default(),
                }
                .fail()
            }
        };

        let resources = composer::compose(name, namespace, &image, &config, ephemeral_owner)
            .context(ComposeClusterSnafu { cluster: name })?;
        self.create_objects(name, namespace, &resources).await?;
        tracing::info!(cluster = name, namespace, %image, "created spark cluster");

        self.await_rollout(namespace, name).await;
        if let Some(driver) = &driver {
            self.label_driver(namespace, driver, name).await;
        }

        let master_url = discovery::service_url(&self.platform, namespace, SparkRole::Master, name)
            .await
            .context(FindObjectsSnafu {
                kind: "Service",
                cluster: name,
            })?;
        let master_web_url =
            discovery::service_url(&self.platform, namespace, SparkRole::WebUi, name)
                .await
                .context(FindObjectsSnafu {
                    kind: "Service",
                    cluster: name,
                })?;
        let master_web_route = discovery::route_host(&self.platform, namespace, name)
            .await
            .context(FindObjectsSnafu {
                kind: "Route",
                cluster: name,
            })?;
        Ok(SparkClusterView {
            namespace: namespace.to_string(),
            name: name.to_string(),
            href: format!("/clusters/{name}"),
            image: Some(image),
            status: ClusterState::classify(true, true, master_url.is_some()),
            master_url,
            master_web_url,
            master_web_route,
            master_count: config.master_count,
            worker_count: config.worker_count,
            ephemeral: ephemeral_owner.map(str::to_string),
            config,
            pods: Vec::new(),
        })
    }

    /// Creates the objects of a composed cluster in order.
    ///
    /// A failure after the master deployment config exists deletes what was created so far.
    /// Web UI, metrics and route objects are optional and only logged when they fail.
    async fn create_objects(
        &self,
        name: &str,
        namespace: &str,
        resources: &ClusterResources,
    ) -> Result<(), Error> {
        self.create_object(namespace, &resources.master, "DeploymentConfig")
            .await?;
        if let Err(err) = self
            .create_object(namespace, &resources.worker, "DeploymentConfig")
            .await
        {
            return Err(self.roll_back(namespace, name, err).await);
        }
        if let Err(err) = self
            .create_object(namespace, &resources.master_service, "Service")
            .await
        {
            return Err(self.roll_back(namespace, name, err).await);
        }

        let optional = self
            .create_object(namespace, &resources.web_service, "Service")
            .await
            .err()
            .into_iter();
        let metrics = match &resources.metrics_service {
            Some(service) => self.create_object(namespace, service, "Service").await.err(),
            None => None,
        };
        let route = match &resources.web_route {
            Some(route) => self.create_object(namespace, route, "Route").await.err(),
            None => None,
        };
        for error in optional.chain(metrics).chain(route) {
            tracing::warn!(cluster = name, %error, "optional cluster object not created");
        }
        Ok(())
    }

    async fn create_object<K: PlatformObject>(
        &self,
        namespace: &str,
        obj: &K,
        kind: &'static str,
    ) -> Result<K, Error> {
        self.platform
            .create(namespace, obj)
            .await
            .context(CreateObjectSnafu {
                kind,
                name: object_name(obj),
            })
    }

    /// Deletes the partially created cluster `name` and hands back the error that caused it
    async fn roll_back(&self, namespace: &str, name: &str, cause: Error) -> Error {
        match self.delete(name, namespace, None, None).await {
            Ok(info) => tracing::info!(cluster = name, %info, "removed partially created cluster"),
            Err(error) => {
                tracing::warn!(cluster = name, %error, "unable to remove partially created cluster")
            }
        }
        cause
    }

    /// Waits a bounded time for the replication controllers of both roles to appear
    async fn await_rollout(&self, namespace: &str, name: &str) {
        let poll = self.settings.rollout_poll;
        for attempt in 1..=poll.attempts {
            let mut ready = true;
            for role in [SparkRole::Master, SparkRole::Worker] {
                match discovery::replication_controller(&self.platform, namespace, role, name).await
                {
                    Ok(Some(_)) => {}
                    Ok(None) => ready = false,
                    Err(error) => {
                        tracing::debug!(
                            cluster = name,
                            %role,
                            %error,
                            "unable to look up replication controller"
                        );
                        ready = false;
                    }
                }
            }
            if ready {
                return;
            }
            if attempt < poll.attempts {
                poll.pause().await;
            }
        }
        tracing::debug!(cluster = name, "replication controllers not yet present");
    }
}

#[cfg(test)]
mod tests {
    use crate::cluster::tests::{reconciler, NS};
    use crate::cluster::ClusterState;
    use crate::error::ErrorCode;
    use crate::platform::fake::Verb;
    use stackable_operator::k8s_openapi::api::core::v1::{
        ConfigMap, Pod, ReplicationController, Service,
    };
    use stackable_operator::kube::api::ObjectMeta;
    use stackable_spark_cluster_crd::{
        constants::{ANNOTATION_CONFIG, LABEL_DEPLOYMENT, LABEL_DRIVER_CLUSTER, LABEL_EPHEMERAL},
        openshift::{DeploymentConfig, Route},
        ClusterConfig, Metrics,
    };

    fn driver_pod(name: &str, rc: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some([(LABEL_DEPLOYMENT.to_string(), rc.to_string())].into()),
                ..ObjectMeta::default()
            },
            ..Pod::default()
        }
    }

    fn driver_rc(name: &str) -> ReplicationController {
        ReplicationController {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            ..ReplicationController::default()
        }
    }

    #[tokio::test]
    async fn test_create_shared_cluster() {
        let reconciler = reconciler();
        let view = reconciler
            .create("demo", NS, None, &ClusterConfig::with_counts(1, 2), None, false)
            .await
            .unwrap();

        assert_eq!(view.status, ClusterState::Running);
        assert_eq!(view.master_url.as_deref(), Some("spark://demo:7077"));
        assert_eq!(view.master_web_url.as_deref(), Some("http://demo-ui:8080"));
        assert_eq!(view.href, "/clusters/demo");
        assert_eq!(view.worker_count, 2);
        assert_eq!(view.master_count, 1);
        assert_eq!(view.ephemeral, None);
        assert_eq!(view.image.as_deref(), Some("radanalyticsio/openshift-spark:2.4"));

        let platform = reconciler.platform();
        let master: DeploymentConfig = platform.object(NS, "demo-m").unwrap();
        let stored: ClusterConfig = serde_json::from_str(
            &master.metadata.annotations.unwrap()[ANNOTATION_CONFIG],
        )
        .unwrap();
        assert_eq!(stored.worker_count, 2);
        assert!(platform.object::<DeploymentConfig>(NS, "demo-w").is_some());
        assert!(platform.object::<Service>(NS, "demo").is_some());
        assert!(platform.object::<Service>(NS, "demo-ui").is_some());
        assert!(platform.object::<Route>(NS, "demo-ui-route").is_some());
        assert!(platform.object::<Service>(NS, "demo-metrics").is_none());
    }

    #[tokio::test]
    async fn test_create_prefers_config_image() {
        let reconciler = reconciler();
        let overrides = ClusterConfig {
            spark_image: Some("spark:config".to_string()),
            metrics: Some(Metrics::Prometheus),
            ..ClusterConfig::inherit()
        };
        let view = reconciler
            .create("demo", NS, Some("spark:argument"), &overrides, None, false)
            .await
            .unwrap();
        assert_eq!(view.image.as_deref(), Some("spark:config"));
        assert!(reconciler
            .platform()
            .object::<Service>(NS, "demo-metrics")
            .is_some());
    }

    #[tokio::test]
    async fn test_create_existing_cluster() {
        let reconciler = reconciler();
        reconciler
            .create("demo", NS, None, &ClusterConfig::inherit(), None, false)
            .await
            .unwrap();
        let err = reconciler
            .create("demo", NS, None, &ClusterConfig::inherit(), None, false)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ComponentExists);
        assert_eq!(err.to_string(), "cluster 'demo' already exists");
    }

    #[tokio::test]
    async fn test_create_rolls_back_on_worker_failure() {
        let reconciler = reconciler();
        let platform = reconciler.platform();
        platform.fail(Verb::Create, "DeploymentConfig", Some("demo-w"), 500, "InternalError");

        let err = reconciler
            .create("demo", NS, None, &ClusterConfig::inherit(), None, false)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ClientOperation);
        assert!(platform.object::<DeploymentConfig>(NS, "demo-m").is_none());
        assert_eq!(platform.object_count(NS), 0);

        let err = reconciler.find("demo", NS).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NoSuchCluster);
    }

    #[tokio::test]
    async fn test_create_rolls_back_on_master_service_failure() {
        let reconciler = reconciler();
        let platform = reconciler.platform();
        platform.fail(Verb::Create, "Service", Some("demo"), 409, "AlreadyExists");

        let err = reconciler
            .create("demo", NS, None, &ClusterConfig::inherit(), None, false)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ComponentExists);
        assert_eq!(platform.object_count(NS), 0);
    }

    #[tokio::test]
    async fn test_create_tolerates_route_failure() {
        let reconciler = reconciler();
        reconciler
            .platform()
            .fail(Verb::Create, "Route", None, 403, "Forbidden");
        let view = reconciler
            .create("demo", NS, None, &ClusterConfig::inherit(), None, false)
            .await
            .unwrap();
        assert_eq!(view.status, ClusterState::Running);
        assert_eq!(view.master_web_route, None);
    }

    #[tokio::test]
    async fn test_create_without_image() {
        let reconciler = crate::cluster::Reconciler::new(
            crate::platform::fake::FakePlatform::new(),
            crate::config::ReconcilerSettings::default(),
        );
        let err = reconciler
            .create("demo", NS, None, &ClusterConfig::inherit(), None, false)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ClusterConfig);
        assert_eq!(reconciler.platform().object_count(NS), 0);
    }

    #[tokio::test]
    async fn test_create_checks_spark_configs() {
        let reconciler = reconciler();
        let overrides = ClusterConfig {
            spark_worker_config: Some("worker-conf".to_string()),
            ..ClusterConfig::inherit()
        };
        let err = reconciler
            .create("demo", NS, None, &overrides, None, false)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ClusterConfig);

        reconciler.platform().insert(
            NS,
            &ConfigMap {
                metadata: ObjectMeta {
                    name: Some("worker-conf".to_string()),
                    ..ObjectMeta::default()
                },
                ..ConfigMap::default()
            },
        );
        reconciler
            .create("demo", NS, None, &overrides, None, false)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_create_ephemeral_binds_driver() {
        let reconciler = reconciler();
        let platform = reconciler.platform();
        platform.insert(NS, &driver_rc("app-1"));
        platform.insert(NS, &driver_pod("app-1-abcde", "app-1"));

        let view = reconciler
            .create(
                "demo",
                NS,
                None,
                &ClusterConfig::inherit(),
                Some("app-1-abcde"),
                true,
            )
            .await
            .unwrap();
        assert_eq!(view.ephemeral.as_deref(), Some("app-1"));

        let master: DeploymentConfig = platform.object(NS, "demo-m").unwrap();
        assert_eq!(
            master.metadata.labels.unwrap().get(LABEL_EPHEMERAL).map(String::as_str),
            Some("app-1")
        );
        let rc: ReplicationController = platform.object(NS, "app-1").unwrap();
        assert_eq!(
            rc.metadata.labels.unwrap().get(LABEL_DRIVER_CLUSTER).map(String::as_str),
            Some("demo")
        );
    }

    #[tokio::test]
    async fn test_create_ephemeral_without_driver() {
        let reconciler = reconciler();
        let err = reconciler
            .create("demo", NS, None, &ClusterConfig::inherit(), Some("ghost"), true)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ClusterConfig);
        assert_eq!(err.to_string(), "no such app 'ghost'");
        assert_eq!(reconciler.platform().object_count(NS), 0);
    }

    #[tokio::test]
    async fn test_create_shared_with_unknown_app() {
        let reconciler = reconciler();
        let view = reconciler
            .create("demo", NS, None, &ClusterConfig::inherit(), Some("ghost"), false)
            .await
            .unwrap();
        assert_eq!(view.ephemeral, None);
    }
}
