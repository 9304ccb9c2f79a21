pub const APP_NAME: &str = "spark-cluster";

// labels and annotations written on cluster objects
pub const LABEL_CLUSTER: &str = "oshinko-cluster";
pub const LABEL_TYPE: &str = "oshinko-type";
pub const LABEL_EPHEMERAL: &str = "ephemeral";
pub const LABEL_DRIVER_CLUSTER: &str = "uses-oshinko-cluster";
pub const LABEL_DELETE_PENDING: &str = "delete_pending";
pub const LABEL_DEPLOYMENT: &str = "deployment";
pub const LABEL_DEPLOYER_POD_FOR: &str = "openshift.io/deployer-pod-for.name";
pub const ANNOTATION_CONFIG: &str = "oshinko-config";

// ports
pub const PORT_NAME_MASTER: &str = "spark-master";
pub const PORT_NAME_WEB: &str = "spark-webui";
pub const PORT_NAME_METRICS: &str = "spark-metrics";
pub const MASTER_PORT: i32 = 7077;
pub const MASTER_WEB_PORT: i32 = 8080;
pub const WORKER_WEB_PORT: i32 = 8081;
pub const METRICS_PORT: i32 = 7777;

// object name suffixes
pub const MASTER_SUFFIX: &str = "-m";
pub const WORKER_SUFFIX: &str = "-w";
pub const WEB_SERVICE_SUFFIX: &str = "-ui";
pub const METRICS_SERVICE_SUFFIX: &str = "-metrics";
pub const ROUTE_SUFFIX: &str = "-ui-route";

// container environment
pub const ENV_CLUSTER_NAME: &str = "OSHINKO_SPARK_CLUSTER";
pub const ENV_UPDATE_CONF_DIR: &str = "UPDATE_SPARK_CONF_DIR";
pub const ENV_METRICS_ON: &str = "SPARK_METRICS_ON";
pub const ENV_MASTER_ADDRESS: &str = "SPARK_MASTER_ADDRESS";
pub const ENV_MASTER_UI_ADDRESS: &str = "SPARK_MASTER_UI_ADDRESS";
pub const SPARK_CONF_DIR: &str = "/etc/oshinko-spark-configs";
pub const CONFIG_VOLUME_NAME: &str = "spark-config";

pub const DEFAULT_CONFIG_NAME: &str = "default-oshinko-cluster-config";
pub const DEFAULT_SPARK_IMAGE: &str = "radanalyticsio/openshift-spark:latest";

/// Replication controller `status` annotation value of a finished driver
pub const DRIVER_STATUS_COMPLETED: &str = "completed";
pub const DRIVER_STATUS_TERMINATED: &str = "terminated";
