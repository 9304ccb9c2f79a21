//! The layered cluster configuration: built-in defaults, an optional stored (named)
//! configuration and explicit per-request overrides.

use crate::{Error, InvalidFieldSnafu, MasterCountOutOfRangeSnafu, NegativeWorkerCountSnafu};
use serde::{Deserialize, Serialize};
use snafu::{ensure, OptionExt};
use stackable_operator::schemars::{self, JsonSchema};
use std::collections::BTreeMap;
use strum::{Display, EnumString};

/// Count value meaning "inherit, do not override"
pub const SENTINEL_COUNT: i32 = -1;

fn sentinel() -> i32 {
    SENTINEL_COUNT
}

#[derive(
    Clone, Copy, Debug, Deserialize, Display, EnumString, Eq, Hash, JsonSchema, PartialEq, Serialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Metrics {
    #[strum(to_string = "none", serialize = "false")]
    None,
    Jolokia,
    #[strum(to_string = "prometheus", serialize = "true")]
    Prometheus,
}

impl Metrics {
    pub fn enabled(self) -> bool {
        self != Metrics::None
    }
}

#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    #[serde(default = "sentinel")]
    pub master_count: i32,
    #[serde(default = "sentinel")]
    pub worker_count: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// ConfigMap mounted into the master pods as the Spark configuration directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spark_master_config: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spark_worker_config: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spark_image: Option<String>,
    #[serde(default, rename = "exposeWebUI", skip_serializing_if = "Option::is_none")]
    pub expose_web_ui: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Metrics>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self::inherit()
    }
}

impl ClusterConfig {
    /// The built-in base every resolution starts from
    pub fn builtin_defaults() -> Self {
        ClusterConfig {
            master_count: 1,
            worker_count: 1,
            name: Some("default".to_string()),
            spark_master_config: None,
            spark_worker_config: None,
            spark_image: None,
            expose_web_ui: Some(true),
            metrics: Some(Metrics::None),
        }
    }

    /// An override that changes nothing when merged
    pub fn inherit() -> Self {
        ClusterConfig {
            master_count: SENTINEL_COUNT,
            worker_count: SENTINEL_COUNT,
            name: None,
            spark_master_config: None,
            spark_worker_config: None,
            spark_image: None,
            expose_web_ui: None,
            metrics: None,
        }
    }

    pub fn with_counts(masters: i32, workers: i32) -> Self {
        ClusterConfig {
            master_count: masters,
            worker_count: workers,
            ..Self::inherit()
        }
    }

    /// Overlays every set field of `overrides` onto `self`.
    ///
    /// Counts at or below [`SENTINEL_COUNT`] and `None` fields are left untouched, so merging
    /// [`ClusterConfig::inherit`] is a no-op and merging the same override twice is idempotent.
    pub fn merge(&mut self, overrides: &ClusterConfig) {
        if overrides.master_count > SENTINEL_COUNT {
            self.master_count = overrides.master_count;
        }
        if overrides.worker_count > SENTINEL_COUNT {
            self.worker_count = overrides.worker_count;
        }
        merge_opt(&mut self.name, &overrides.name);
        merge_opt(&mut self.spark_master_config, &overrides.spark_master_config);
        merge_opt(&mut self.spark_worker_config, &overrides.spark_worker_config);
        merge_opt(&mut self.spark_image, &overrides.spark_image);
        merge_opt(&mut self.expose_web_ui, &overrides.expose_web_ui);
        merge_opt(&mut self.metrics, &overrides.metrics);
    }

    pub fn validate(&self) -> Result<(), Error> {
        ensure!(
            (0..=1).contains(&self.master_count),
            MasterCountOutOfRangeSnafu {
                count: self.master_count
            }
        );
        ensure!(
            self.worker_count >= 0,
            NegativeWorkerCountSnafu {
                count: self.worker_count
            }
        );
        Ok(())
    }

    pub fn expose_web_ui(&self) -> bool {
        self.expose_web_ui.unwrap_or(true)
    }

    pub fn metrics(&self) -> Metrics {
        self.metrics.unwrap_or(Metrics::None)
    }

    /// Applies the entries of a stored configuration's data map.
    ///
    /// Unknown keys are ignored; values are trimmed of trailing newlines the way
    /// `kubectl create configmap --from-file` leaves them.
    pub fn apply_stored(
        &mut self,
        config_name: &str,
        data: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        for (key, raw) in data {
            let value = raw.trim_matches('\n');
            match key.as_str() {
                "mastercount" => {
                    let count = parse_count(config_name, key, value)?;
                    if count > SENTINEL_COUNT {
                        self.master_count = count;
                    }
                }
                "workercount" => {
                    let count = parse_count(config_name, key, value)?;
                    if count > SENTINEL_COUNT {
                        self.worker_count = count;
                    }
                }
                "sparkmasterconfig" => self.spark_master_config = non_empty(value),
                "sparkworkerconfig" => self.spark_worker_config = non_empty(value),
                "sparkimage" => self.spark_image = non_empty(value),
                "exposeui" => {
                    self.expose_web_ui =
                        Some(value.parse::<bool>().ok().with_context(|| InvalidFieldSnafu {
                            field: format!("{config_name}.{key}"),
                            expected: "boolean",
                        })?)
                }
                "metrics" => {
                    self.metrics =
                        Some(value.parse::<Metrics>().ok().with_context(|| InvalidFieldSnafu {
                            field: format!("{config_name}.{key}"),
                            expected: "one of none, jolokia, prometheus, true, false",
                        })?)
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn merge_opt<T: Clone>(target: &mut Option<T>, source: &Option<T>) {
    if let Some(value) = source {
        *target = Some(value.clone());
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn parse_count(config_name: &str, key: &str, value: &str) -> Result<i32, Error> {
    value.parse::<i32>().ok().with_context(|| InvalidFieldSnafu {
        field: format!("{config_name}.{key}"),
        expected: "integer",
    })
}
