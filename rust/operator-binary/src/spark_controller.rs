//! Converges the Spark clusters described by [`SparkCluster`] resources.
//!
//! A missing cluster is created, diverging replica counts are updated, and the observed state
//! is written back to the resource status. Failed reconciles are retried with a per-resource
//! exponential backoff that resets on the next success.

use crate::cluster::{Reconciler, SparkClusterView};
use crate::error::{self, ErrorCode};
use crate::platform::Platform;
use snafu::{OptionExt, ResultExt, Snafu};
use stackable_operator::kube::{
    self,
    runtime::{
        controller::{Context, ReconcilerAction},
        reflector::ObjectRef,
    },
    ResourceExt,
};
use stackable_spark_cluster_crd::{
    constants::LABEL_CLUSTER, openshift::DeploymentConfig, SparkCluster, SparkClusterStatus,
};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("object {} has no namespace", obj_ref))]
    ObjectHasNoNamespace { obj_ref: ObjectRef<SparkCluster> },
    #[snafu(display("failed to converge cluster {}", obj_ref))]
    Converge {
        source: error::Error,
        obj_ref: ObjectRef<SparkCluster>,
    },
    #[snafu(display("failed to update status of {}", obj_ref))]
    UpdateStatus {
        source: kube::Error,
        obj_ref: ObjectRef<SparkCluster>,
    },
}

/// Delay before retrying a resource that failed `failures` times in a row: `base * 2^failures`,
/// capped at `max`
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        RetryBackoff {
            base: Duration::from_millis(5),
            max: Duration::from_secs(1000),
        }
    }
}

impl RetryBackoff {
    pub fn delay(&self, failures: u32) -> Duration {
        let delay = self.base.as_secs_f64() * 2f64.powi(failures.min(64) as i32);
        if delay >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(delay)
        }
    }
}

pub struct Ctx<P> {
    pub reconciler: Reconciler<P>,
    backoff: RetryBackoff,
    failures: Mutex<HashMap<ObjectRef<SparkCluster>, u32>>,
}

impl<P> Ctx<P> {
    pub fn new(reconciler: Reconciler<P>, backoff: RetryBackoff) -> Self {
        Ctx {
            reconciler,
            backoff,
            failures: Mutex::default(),
        }
    }

    /// Counts another failure for `obj_ref` and returns how long to wait before retrying it
    fn next_delay(&self, obj_ref: &ObjectRef<SparkCluster>) -> Duration {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let count = failures.entry(obj_ref.clone()).or_insert(0);
        let delay = self.backoff.delay(*count);
        *count += 1;
        delay
    }

    fn forget(&self, obj_ref: &ObjectRef<SparkCluster>) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(obj_ref);
    }
}

fn status_of(view: &SparkClusterView) -> SparkClusterStatus {
    SparkClusterStatus {
        state: Some(view.status.to_string()),
        message: None,
        master_url: view.master_url.clone(),
        master_web_url: view.master_web_url.clone(),
        master_web_route: view.master_web_route.clone(),
        master_count: Some(view.master_count),
        worker_count: Some(view.worker_count),
    }
}

/// Maps a deployment config to the resource owning its cluster, if it carries a cluster label
pub fn cluster_of_workload(dc: DeploymentConfig) -> Option<ObjectRef<SparkCluster>> {
    let namespace = dc.metadata.namespace?;
    let cluster = dc.metadata.labels?.remove(LABEL_CLUSTER)?;
    Some(ObjectRef::new(&cluster).within(&namespace))
}

pub async fn reconcile<P: Platform + 'static>(
    sc: SparkCluster,
    ctx: Context<Ctx<P>>,
) -> Result<ReconcilerAction, Error> {
    tracing::info!("Starting reconcile");
    let obj_ref = ObjectRef::from_obj(&sc);
    let ctx = ctx.get_ref();
    let namespace = sc.namespace().context(ObjectHasNoNamespaceSnafu {
        obj_ref: obj_ref.clone(),
    })?;
    let name = sc.name();

    let result = converge(&ctx.reconciler, &namespace, &name, &sc).await;
    let status = match &result {
        Ok(view) => status_of(view),
        Err(error) => SparkClusterStatus {
            state: Some("Error".to_string()),
            message: Some(error.to_string()),
            ..sc.status.clone().unwrap_or_default()
        },
    };
    let patched = ctx
        .reconciler
        .platform()
        .patch_status::<SparkCluster, _>(&namespace, &name, &status)
        .await;
    result.context(ConvergeSnafu {
        obj_ref: obj_ref.clone(),
    })?;
    patched.context(UpdateStatusSnafu {
        obj_ref: obj_ref.clone(),
    })?;

    ctx.forget(&obj_ref);
    Ok(ReconcilerAction {
        requeue_after: None,
    })
}

pub fn error_policy<P>(error: &Error, ctx: Context<Ctx<P>>) -> ReconcilerAction {
    let requeue_after = match error {
        // retrying cannot give the object a namespace
        Error::ObjectHasNoNamespace { .. } => None,
        Error::Converge { obj_ref, .. } | Error::UpdateStatus { obj_ref, .. } => {
            Some(ctx.get_ref().next_delay(obj_ref))
        }
    };
    tracing::warn!(%error, ?requeue_after, "Failed to reconcile");
    ReconcilerAction { requeue_after }
}

async fn converge<P: Platform>(
    reconciler: &Reconciler<P>,
    namespace: &str,
    name: &str,
    sc: &SparkCluster,
) -> Result<SparkClusterView, error::Error> {
    let spec = &sc.spec;
    let view = match reconciler.find(name, namespace).await {
        Ok(view) => view,
        Err(error) if error.code() == ErrorCode::NoSuchCluster => {
            // Leftovers of a partially deleted cluster would block creation.
            match reconciler.delete(name, namespace, None, None).await {
                Ok(info) => tracing::info!(cluster = name, %info, "removed incomplete cluster"),
                Err(error) if error.code() == ErrorCode::NoSuchCluster => {}
                Err(error) => return Err(error),
            }
            return reconciler
                .create(name, namespace, spec.image.as_deref(), &spec.config, None, false)
                .await;
        }
        Err(error) => return Err(error),
    };

    let desired = reconciler.resolve_config(namespace, &spec.config).await?;
    if desired.master_count != view.config.master_count
        || desired.worker_count != view.config.worker_count
    {
        return reconciler.update(name, namespace, &spec.config).await;
    }
    Ok(view)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::tests::{reconciler, NS};
    use crate::platform::fake::{FakePlatform, Verb};
    use indoc::indoc;
    use rstest::rstest;
    use stackable_operator::k8s_openapi::api::core::v1::Service;
    use stackable_operator::kube::api::ObjectMeta;
    use stackable_spark_cluster_crd::openshift::Route;
    use stackable_spark_cluster_crd::{ClusterConfig, SparkClusterSpec};

    fn spark_cluster(name: &str, workers: i32) -> SparkCluster {
        let mut sc = SparkCluster::new(
            name,
            SparkClusterSpec {
                image: Some("spark:crd".to_string()),
                config: ClusterConfig::with_counts(-1, workers),
            },
        );
        sc.metadata.namespace = Some(NS.to_string());
        sc
    }

    fn ctx() -> Context<Ctx<FakePlatform>> {
        Context::new(Ctx::new(reconciler(), RetryBackoff::default()))
    }

    fn platform(ctx: &Context<Ctx<FakePlatform>>) -> &FakePlatform {
        ctx.get_ref().reconciler.platform()
    }

    /// Stores `sc` on the platform so its status can be patched, and returns it
    fn seed(ctx: &Context<Ctx<FakePlatform>>, sc: SparkCluster) -> SparkCluster {
        platform(ctx).insert(NS, &sc);
        sc
    }

    fn status(ctx: &Context<Ctx<FakePlatform>>, name: &str) -> SparkClusterStatus {
        platform(ctx)
            .object::<SparkCluster>(NS, name)
            .unwrap()
            .status
            .unwrap()
    }

    #[rstest]
    #[case(0, Duration::from_millis(5))]
    #[case(1, Duration::from_millis(10))]
    #[case(4, Duration::from_millis(80))]
    #[case(18, Duration::from_secs(1000))]
    #[case(1000, Duration::from_secs(1000))]
    fn test_backoff_delay(#[case] failures: u32, #[case] expected: Duration) {
        let delay = RetryBackoff::default().delay(failures);
        assert!(
            (delay.as_secs_f64() - expected.as_secs_f64()).abs() < 1e-6,
            "{delay:?} != {expected:?}"
        );
    }

    #[tokio::test]
    async fn test_reconcile_creates_missing_cluster() {
        let ctx = ctx();
        let sc = seed(&ctx, spark_cluster("demo", 2));

        let action = reconcile(sc, ctx.clone()).await.unwrap();
        assert_eq!(action.requeue_after, None);

        let view = ctx.get_ref().reconciler.find("demo", NS).await.unwrap();
        assert_eq!(view.worker_count, 2);
        assert_eq!(view.image.as_deref(), Some("spark:crd"));
        let status = status(&ctx, "demo");
        assert_eq!(status.state.as_deref(), Some("Running"));
        assert_eq!(status.master_url.as_deref(), Some("spark://demo:7077"));
        assert_eq!(status.worker_count, Some(2));
    }

    #[tokio::test]
    async fn test_reconcile_from_manifest() {
        let ctx = ctx();
        let sc: SparkCluster = serde_yaml::from_str(indoc! {"
            apiVersion: radanalytics.io/v1
            kind: SparkCluster
            metadata:
              name: manifest
              namespace: spark
            spec:
              config:
                workerCount: 3
                exposeWebUI: false
                metrics: prometheus
        "})
        .unwrap();
        let sc = seed(&ctx, sc);

        reconcile(sc, ctx.clone()).await.unwrap();

        let platform = platform(&ctx);
        assert!(platform.object::<Route>(NS, "manifest-ui-route").is_none());
        assert!(platform.object::<Service>(NS, "manifest-metrics").is_some());
        let status = status(&ctx, "manifest");
        assert_eq!(status.worker_count, Some(3));
        assert_eq!(status.master_count, Some(1));
        assert_eq!(status.master_web_route, None);
    }

    #[tokio::test]
    async fn test_reconcile_updates_diverging_counts() {
        let ctx = ctx();
        let sc = seed(&ctx, spark_cluster("demo", 1));
        reconcile(sc, ctx.clone()).await.unwrap();
        let creates = platform(&ctx).count(Verb::Create, "DeploymentConfig");

        let sc = seed(&ctx, spark_cluster("demo", 4));
        reconcile(sc, ctx.clone()).await.unwrap();

        let platform = platform(&ctx);
        assert_eq!(platform.count(Verb::Create, "DeploymentConfig"), creates);
        assert_eq!(
            platform
                .object::<DeploymentConfig>(NS, "demo-w")
                .unwrap()
                .spec
                .replicas,
            4
        );
        assert_eq!(status(&ctx, "demo").worker_count, Some(4));
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let ctx = ctx();
        let sc = seed(&ctx, spark_cluster("demo", 1));
        reconcile(sc.clone(), ctx.clone()).await.unwrap();
        reconcile(sc, ctx.clone()).await.unwrap();

        let platform = platform(&ctx);
        assert_eq!(platform.count(Verb::Create, "DeploymentConfig"), 2);
        assert_eq!(platform.count(Verb::Replace, "DeploymentConfig"), 0);
    }

    #[tokio::test]
    async fn test_reconcile_rebuilds_incomplete_cluster() {
        let ctx = ctx();
        let sc = seed(&ctx, spark_cluster("demo", 1));
        reconcile(sc.clone(), ctx.clone()).await.unwrap();
        platform(&ctx)
            .delete::<DeploymentConfig>(NS, "demo-w")
            .await
            .unwrap();

        reconcile(sc, ctx.clone()).await.unwrap();
        assert_eq!(
            ctx.get_ref().reconciler.find("demo", NS).await.unwrap().status,
            crate::cluster::ClusterState::Running
        );
    }

    #[tokio::test]
    async fn test_reconcile_failure_is_reported_in_status() {
        let ctx = ctx();
        let mut sc = spark_cluster("demo", 1);
        sc.spec.config.name = Some("missing".to_string());
        let sc = seed(&ctx, sc);

        let err = reconcile(sc, ctx.clone()).await.unwrap_err();
        assert!(matches!(err, Error::Converge { .. }));
        let status = status(&ctx, "demo");
        assert_eq!(status.state.as_deref(), Some("Error"));
        assert_eq!(
            status.message.as_deref(),
            Some("named config 'missing' does not exist")
        );
    }

    #[tokio::test]
    async fn test_error_policy_backs_off_until_success() {
        let ctx = ctx();
        let mut failing = spark_cluster("demo", 1);
        failing.spec.config.name = Some("missing".to_string());
        let failing = seed(&ctx, failing);

        let mut delays = Vec::new();
        for _ in 0..3 {
            let err = reconcile(failing.clone(), ctx.clone()).await.unwrap_err();
            delays.push(error_policy(&err, ctx.clone()).requeue_after);
        }
        assert_eq!(
            delays,
            vec![
                Some(Duration::from_millis(5)),
                Some(Duration::from_millis(10)),
                Some(Duration::from_millis(20)),
            ]
        );

        let fixed = seed(&ctx, spark_cluster("demo", 1));
        reconcile(fixed, ctx.clone()).await.unwrap();
        let mut broken = spark_cluster("demo", 1);
        broken.spec.config.name = Some("missing".to_string());
        let err = reconcile(broken, ctx.clone()).await.unwrap_err();
        assert_eq!(
            error_policy(&err, ctx.clone()).requeue_after,
            Some(Duration::from_millis(5))
        );
    }

    #[tokio::test]
    async fn test_object_without_namespace_is_not_retried() {
        let ctx = ctx();
        let mut sc = spark_cluster("demo", 1);
        sc.metadata.namespace = None;

        let err = reconcile(sc, ctx.clone()).await.unwrap_err();
        assert!(matches!(err, Error::ObjectHasNoNamespace { .. }));
        assert_eq!(error_policy(&err, ctx.clone()).requeue_after, None);
        assert!(platform(&ctx).calls().is_empty());
    }

    #[test]
    fn test_workload_maps_to_owning_cluster() {
        let mut dc = DeploymentConfig::new("demo-w", Default::default());
        dc.metadata = ObjectMeta {
            name: Some("demo-w".to_string()),
            namespace: Some(NS.to_string()),
            labels: Some([(LABEL_CLUSTER.to_string(), "demo".to_string())].into()),
            ..ObjectMeta::default()
        };
        assert_eq!(
            cluster_of_workload(dc.clone()),
            Some(ObjectRef::new("demo").within(NS))
        );

        let mut unlabelled = dc;
        unlabelled.metadata.labels = None;
        assert_eq!(cluster_of_workload(unlabelled), None);
    }
}
