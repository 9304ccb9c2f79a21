use crate::error::{
    Error, InvalidConfigSnafu, NamedConfigMissingSnafu, ReadNamedConfigSnafu,
    ReadSparkConfigSnafu, SparkConfigMissingSnafu,
};
use crate::platform::Platform;
use snafu::{ensure, OptionExt, ResultExt};
use stackable_operator::k8s_openapi::api::core::v1::ConfigMap;
use stackable_spark_cluster_crd::{constants::DEFAULT_CONFIG_NAME, ClusterConfig};
use std::time::Duration;

/// A bounded number of attempts spaced by a fixed interval
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub interval: Duration,
}

impl RetryPolicy {
    pub const fn new(attempts: usize, interval: Duration) -> Self {
        RetryPolicy { attempts, interval }
    }

    pub async fn pause(&self) {
        tokio::time::sleep(self.interval).await;
    }
}

/// Everything the reconciler needs besides the platform itself
#[derive(Clone, Debug)]
pub struct ReconcilerSettings {
    /// Base of every config resolution, before stored configs and overrides
    pub defaults: ClusterConfig,
    pub default_image: Option<String>,
    /// How long create waits for the replication controllers of a new cluster
    pub rollout_poll: RetryPolicy,
    /// How often updates that lose an optimistic concurrency race are retried
    pub conflict_retry: RetryPolicy,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        ReconcilerSettings {
            defaults: ClusterConfig::builtin_defaults(),
            default_image: None,
            rollout_poll: RetryPolicy::new(4, Duration::from_millis(250)),
            conflict_retry: RetryPolicy::new(20, Duration::from_millis(250)),
        }
    }
}

/// Reads the stored config `name` into `config`.
///
/// Returns whether the config exists. A missing config is only an error if `required`.
async fn read_stored<P: Platform>(
    platform: &P,
    namespace: &str,
    name: &str,
    required: bool,
    config: &mut ClusterConfig,
) -> Result<bool, Error> {
    let stored: Option<ConfigMap> = platform
        .get(namespace, name)
        .await
        .context(ReadNamedConfigSnafu { name })?;
    let stored = match stored {
        Some(stored) => stored,
        None => {
            ensure!(!required, NamedConfigMissingSnafu { name });
            return Ok(false);
        }
    };
    if let Some(data) = &stored.data {
        config.apply_stored(name, data).context(InvalidConfigSnafu)?;
    }
    Ok(true)
}

/// Resolves the effective configuration of a cluster.
///
/// Starts from `defaults`, applies the stored default config if present, then the stored config
/// named by `overrides` (which must exist), then every explicitly set field of `overrides`.
pub async fn resolve<P: Platform>(
    platform: &P,
    namespace: &str,
    defaults: &ClusterConfig,
    overrides: &ClusterConfig,
) -> Result<ClusterConfig, Error> {
    let mut config = defaults.clone();
    let found_default =
        read_stored(platform, namespace, DEFAULT_CONFIG_NAME, false, &mut config).await?;
    match overrides.name.as_deref() {
        Some(name) if name != DEFAULT_CONFIG_NAME => {
            read_stored(platform, namespace, name, true, &mut config).await?;
        }
        _ if found_default => config.name = Some(DEFAULT_CONFIG_NAME.to_string()),
        _ => {}
    }
    config.merge(overrides);
    config.validate().context(InvalidConfigSnafu)?;
    tracing::debug!(?config, "resolved cluster config");
    Ok(config)
}

/// Checks that a Spark configuration ConfigMap referenced by a cluster config exists
pub async fn check_spark_config<P: Platform>(
    platform: &P,
    namespace: &str,
    name: &str,
) -> Result<(), Error> {
    platform
        .get::<ConfigMap>(namespace, name)
        .await
        .context(ReadSparkConfigSnafu { name })?
        .context(SparkConfigMissingSnafu { name })?;
    Ok(())
}
