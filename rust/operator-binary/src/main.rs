mod cluster;
mod composer;
mod config;
mod discovery;
mod error;
mod platform;
mod spark_controller;

use crate::cluster::Reconciler;
use crate::config::ReconcilerSettings;
use crate::platform::KubePlatform;
use crate::spark_controller::RetryBackoff;
use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use futures::stream::StreamExt;
use stackable_operator::cli::ProductOperatorRun;
use stackable_operator::kube::api::ListParams;
use stackable_operator::kube::runtime::controller::{Context, Controller};
use stackable_operator::kube::CustomResourceExt;
use stackable_operator::logging::controller::report_controller_reconciled;
use stackable_operator::logging::TracingTarget;
use stackable_spark_cluster_crd::constants::{APP_NAME, DEFAULT_SPARK_IMAGE, LABEL_CLUSTER};
use stackable_spark_cluster_crd::openshift::DeploymentConfig;
use stackable_spark_cluster_crd::{ClusterConfig, Metrics, SparkCluster, SENTINEL_COUNT};

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

#[derive(Parser)]
#[clap(about = built_info::PKG_DESCRIPTION, author = stackable_operator::cli::AUTHOR)]
struct Opts {
    #[clap(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print the SparkCluster CustomResourceDefinition
    Crd,
    /// Run the SparkCluster controller
    Run(RunArgs),
    /// Create a shared cluster
    Create(CreateArgs),
    /// Create a cluster bound to the lifetime of a driver application
    #[clap(name = "create_eph")]
    CreateEph(CreateEphArgs),
    /// Delete a cluster
    Delete(TargetArgs),
    /// Delete an ephemeral cluster on behalf of a finishing driver
    #[clap(name = "delete_eph")]
    DeleteEph(DeleteEphArgs),
    /// Show one cluster, the cluster used by an app, or all clusters
    Get(GetArgs),
    /// Change the replica counts of a cluster
    Scale(ScaleArgs),
}

/// Reconciler defaults shared by the controller and the cluster subcommands
#[derive(Args)]
struct DefaultArgs {
    /// Image used when neither the request nor a stored config names one
    #[clap(long, env = "SPARK_CLUSTER_DEFAULT_IMAGE", default_value = DEFAULT_SPARK_IMAGE)]
    default_image: String,
    #[clap(long, env = "SPARK_CLUSTER_DEFAULT_MASTERS", default_value_t = 1)]
    default_masters: i32,
    #[clap(long, env = "SPARK_CLUSTER_DEFAULT_WORKERS", default_value_t = 1)]
    default_workers: i32,
}

impl DefaultArgs {
    fn settings(&self) -> ReconcilerSettings {
        let defaults = ReconcilerSettings::default();
        ReconcilerSettings {
            defaults: ClusterConfig {
                master_count: self.default_masters,
                worker_count: self.default_workers,
                ..defaults.defaults.clone()
            },
            default_image: Some(self.default_image.clone()),
            ..defaults
        }
    }
}

#[derive(Args)]
struct RunArgs {
    #[clap(flatten)]
    common: ProductOperatorRun,
    #[clap(flatten)]
    defaults: DefaultArgs,
}

#[derive(Args)]
struct TargetArgs {
    /// Name of the cluster
    name: String,
    #[clap(long, short = 'n', default_value = "default")]
    namespace: String,
}

#[derive(Args)]
struct ClusterArgs {
    #[clap(flatten)]
    target: TargetArgs,
    #[clap(long, default_value_t = SENTINEL_COUNT, allow_hyphen_values = true)]
    masters: i32,
    #[clap(long, default_value_t = SENTINEL_COUNT, allow_hyphen_values = true)]
    workers: i32,
    #[clap(long)]
    image: Option<String>,
    /// Stored config to start from
    #[clap(long = "storedconfig")]
    stored_config: Option<String>,
    /// ConfigMap with the Spark configuration of the master
    #[clap(long = "sparkmasterconfig")]
    spark_master_config: Option<String>,
    /// ConfigMap with the Spark configuration of the workers
    #[clap(long = "sparkworkerconfig")]
    spark_worker_config: Option<String>,
    #[clap(long = "exposeui")]
    expose_web_ui: Option<bool>,
    /// `none`, `jolokia` or `prometheus` (`true` and `false` are accepted too)
    #[clap(long)]
    metrics: Option<Metrics>,
    #[clap(flatten)]
    defaults: DefaultArgs,
}

impl ClusterArgs {
    fn overrides(&self) -> ClusterConfig {
        ClusterConfig {
            name: self.stored_config.clone(),
            spark_master_config: self.spark_master_config.clone(),
            spark_worker_config: self.spark_worker_config.clone(),
            expose_web_ui: self.expose_web_ui,
            metrics: self.metrics,
            ..ClusterConfig::with_counts(self.masters, self.workers)
        }
    }
}

#[derive(Args)]
struct CreateArgs {
    #[clap(flatten)]
    cluster: ClusterArgs,
    /// Driver application that uses the cluster
    #[clap(long)]
    app: Option<String>,
}

#[derive(Args)]
struct CreateEphArgs {
    #[clap(flatten)]
    cluster: ClusterArgs,
    /// Driver application the cluster is bound to
    #[clap(long)]
    app: String,
}

#[derive(Args)]
struct DeleteEphArgs {
    #[clap(flatten)]
    target: TargetArgs,
    #[clap(long)]
    app: String,
    /// Status of the driver application, `completed` or `terminated`
    #[clap(long = "app-status")]
    app_status: String,
}

#[derive(Args)]
struct GetArgs {
    /// Name of the cluster, all clusters are listed if omitted
    name: Option<String>,
    #[clap(long, short = 'n', default_value = "default")]
    namespace: String,
    /// Only show the cluster used by this driver application
    #[clap(long, conflicts_with = "name")]
    app: Option<String>,
}

#[derive(Args)]
struct ScaleArgs {
    #[clap(flatten)]
    target: TargetArgs,
    #[clap(long, default_value_t = SENTINEL_COUNT, allow_hyphen_values = true)]
    masters: i32,
    #[clap(long, default_value_t = SENTINEL_COUNT, allow_hyphen_values = true)]
    workers: i32,
}

fn initialize_logging(tracing_target: TracingTarget) {
    stackable_operator::logging::initialize_logging(
        "SPARK_CLUSTER_OPERATOR_LOG",
        APP_NAME,
        tracing_target,
    );
}

async fn reconciler(settings: ReconcilerSettings) -> anyhow::Result<Reconciler<KubePlatform>> {
    let client = stackable_operator::client::create_client(Some("radanalytics.io".to_string()))
        .await?;
    Ok(Reconciler::new(
        KubePlatform::new(client.as_kube_client()),
        settings,
    ))
}

/// Attaches the numeric error code to a reconciler error for the command line
fn with_code(error: error::Error) -> anyhow::Error {
    let code = error.code();
    anyhow::Error::new(error).context(format!(
        "request failed with error code {} (HTTP {})",
        code.code(),
        code.http_status()
    ))
}

fn print_yaml<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    match opts.cmd {
        Cmd::Crd => println!("{}", serde_yaml::to_string(&SparkCluster::crd())?,),
        Cmd::Run(RunArgs {
            common:
                ProductOperatorRun {
                    product_config: _,
                    watch_namespace,
                    tracing_target,
                },
            defaults,
        }) => {
            initialize_logging(tracing_target);
            stackable_operator::utils::print_startup_string(
                built_info::PKG_DESCRIPTION,
                built_info::PKG_VERSION,
                built_info::GIT_VERSION,
                built_info::TARGET,
                built_info::BUILT_TIME_UTC,
                built_info::RUSTC_VERSION,
            );

            let client =
                stackable_operator::client::create_client(Some("radanalytics.io".to_string()))
                    .await?;
            let ctx = spark_controller::Ctx::new(
                Reconciler::new(
                    KubePlatform::new(client.as_kube_client()),
                    defaults.settings(),
                ),
                RetryBackoff::default(),
            );

            Controller::new(
                watch_namespace.get_api::<SparkCluster>(&client),
                ListParams::default(),
            )
            .watches(
                watch_namespace.get_api::<DeploymentConfig>(&client),
                ListParams::default().labels(LABEL_CLUSTER),
                spark_controller::cluster_of_workload,
            )
            .shutdown_on_signal()
            .run(
                spark_controller::reconcile,
                spark_controller::error_policy,
                Context::new(ctx),
            )
            .map(|res| {
                report_controller_reconciled(&client, "sparkclusters.radanalytics.io", &res)
            })
            .collect::<()>()
            .await;
        }
        Cmd::Create(CreateArgs { cluster, app }) => {
            initialize_logging(TracingTarget::None);
            let reconciler = reconciler(cluster.defaults.settings()).await?;
            let view = reconciler
                .create(
                    &cluster.target.name,
                    &cluster.target.namespace,
                    cluster.image.as_deref(),
                    &cluster.overrides(),
                    app.as_deref(),
                    false,
                )
                .await
                .map_err(with_code)?;
            print_yaml(&view)?;
        }
        Cmd::CreateEph(CreateEphArgs { cluster, app }) => {
            initialize_logging(TracingTarget::None);
            let reconciler = reconciler(cluster.defaults.settings()).await?;
            let view = reconciler
                .create(
                    &cluster.target.name,
                    &cluster.target.namespace,
                    cluster.image.as_deref(),
                    &cluster.overrides(),
                    Some(&app),
                    true,
                )
                .await
                .map_err(with_code)?;
            print_yaml(&view)?;
        }
        Cmd::Delete(target) => {
            initialize_logging(TracingTarget::None);
            let reconciler = reconciler(ReconcilerSettings::default()).await?;
            let info = reconciler
                .delete(&target.name, &target.namespace, None, None)
                .await
                .map_err(with_code)?;
            println!("cluster \"{}\" deleted {}", target.name, info);
        }
        Cmd::DeleteEph(DeleteEphArgs {
            target,
            app,
            app_status,
        }) => {
            initialize_logging(TracingTarget::None);
            let reconciler = reconciler(ReconcilerSettings::default()).await?;
            let info = reconciler
                .delete(
                    &target.name,
                    &target.namespace,
                    Some(&app),
                    Some(&app_status),
                )
                .await
                .map_err(with_code)?;
            println!("cluster \"{}\" deleted {}", target.name, info);
        }
        Cmd::Get(GetArgs {
            name,
            namespace,
            app,
        }) => {
            initialize_logging(TracingTarget::None);
            let reconciler = reconciler(ReconcilerSettings::default()).await?;
            match name {
                Some(name) => {
                    let view = reconciler
                        .find(&name, &namespace)
                        .await
                        .map_err(with_code)?;
                    print_yaml(&view)?;
                }
                None => {
                    let views = reconciler
                        .find_all(&namespace, app.as_deref())
                        .await
                        .map_err(with_code)?;
                    print_yaml(&views)?;
                }
            }
        }
        Cmd::Scale(ScaleArgs {
            target,
            masters,
            workers,
        }) => {
            initialize_logging(TracingTarget::None);
            let reconciler = reconciler(ReconcilerSettings::default()).await?;
            reconciler
                .scale(&target.name, &target.namespace, masters, workers)
                .await
                .map_err(with_code)
                .with_context(|| format!("unable to scale cluster \"{}\"", target.name))?;
            println!("cluster \"{}\" scaled", target.name);
        }
    }

    Ok(())
}
