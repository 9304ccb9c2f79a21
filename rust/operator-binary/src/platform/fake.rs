//! In-memory [`Platform`] for tests.
//!
//! Objects are stored as JSON keyed by kind, namespace and name. Every call is recorded and
//! failures can be injected per verb, kind and (optionally) name. Creating or replacing a
//! `DeploymentConfig` rolls it out the way OpenShift does: a replication controller
//! `<name>-<version>` and one running pod per replica appear next to it.

use super::{api_error, Platform, PlatformObject};
use crate::discovery::Selector;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use stackable_operator::k8s_openapi::api::core::v1::{
    Pod, PodStatus, ReplicationController, ReplicationControllerSpec,
};
use stackable_operator::kube::{self, api::ObjectMeta, Resource};
use stackable_spark_cluster_crd::constants::LABEL_DEPLOYMENT;
use stackable_spark_cluster_crd::openshift::DeploymentConfig;
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Verb {
    Create,
    Get,
    List,
    Replace,
    Delete,
    PatchStatus,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Call {
    pub verb: Verb,
    pub kind: String,
    pub name: String,
}

struct Failure {
    verb: Verb,
    kind: String,
    name: Option<String>,
    code: u16,
    reason: String,
    remaining: Option<usize>,
}

type Key = (String, String, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, Value>,
    calls: Vec<Call>,
    failures: Vec<Failure>,
    resource_version: u64,
}

#[derive(Default)]
pub struct FakePlatform {
    state: Mutex<State>,
}

fn kind_of<K: PlatformObject>() -> String {
    K::kind(&()).to_string()
}

fn labels_of(value: &Value) -> BTreeMap<String, String> {
    serde_json::from_value(value["metadata"]["labels"].clone()).unwrap_or_default()
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `obj` directly, without recording a call or rolling anything out
    pub fn insert<K: PlatformObject>(&self, namespace: &str, obj: &K) {
        let mut state = self.state.lock().unwrap();
        let name = obj.meta().name.clone().expect("seeded objects need a name");
        let value = state.stamp(namespace, serde_json::to_value(obj).unwrap());
        state
            .objects
            .insert((kind_of::<K>(), namespace.to_string(), name), value);
    }

    /// Makes every matching call fail with the given API error
    pub fn fail(&self, verb: Verb, kind: &str, name: Option<&str>, code: u16, reason: &str) {
        self.push_failure(verb, kind, name, code, reason, None);
    }

    /// Makes the next `times` matching calls fail with the given API error
    pub fn fail_times(
        &self,
        verb: Verb,
        kind: &str,
        name: Option<&str>,
        code: u16,
        reason: &str,
        times: usize,
    ) {
        self.push_failure(verb, kind, name, code, reason, Some(times));
    }

    fn push_failure(
        &self,
        verb: Verb,
        kind: &str,
        name: Option<&str>,
        code: u16,
        reason: &str,
        remaining: Option<usize>,
    ) {
        self.state.lock().unwrap().failures.push(Failure {
            verb,
            kind: kind.to_string(),
            name: name.map(str::to_string),
            code,
            reason: reason.to_string(),
            remaining,
        });
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, verb: Verb, kind: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.verb == verb && call.kind == kind)
            .count()
    }

    pub fn object<K: PlatformObject>(&self, namespace: &str, name: &str) -> Option<K> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .get(&(kind_of::<K>(), namespace.to_string(), name.to_string()))
            .map(|value| serde_json::from_value(value.clone()).unwrap())
    }

    /// Number of stored objects in `namespace` across all kinds
    pub fn object_count(&self, namespace: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .objects
            .keys()
            .filter(|(_, ns, _)| ns == namespace)
            .count()
    }
}

impl State {
    fn record(&mut self, verb: Verb, kind: &str, name: &str) -> kube::Result<()> {
        self.calls.push(Call {
            verb,
            kind: kind.to_string(),
            name: name.to_string(),
        });
        let position = self.failures.iter().position(|f| {
            f.verb == verb && f.kind == kind && f.name.as_deref().map_or(true, |n| n == name)
        });
        if let Some(position) = position {
            let failure = &mut self.failures[position];
            let err = api_error(failure.code, &failure.reason, "injected failure");
            let exhausted = match &mut failure.remaining {
                Some(n) => {
                    *n -= 1;
                    *n == 0
                }
                None => false,
            };
            if exhausted {
                self.failures.remove(position);
            }
            return Err(err);
        }
        Ok(())
    }

    fn stamp(&mut self, namespace: &str, mut value: Value) -> Value {
        self.resource_version += 1;
        value["metadata"]["namespace"] = json!(namespace);
        value["metadata"]["resourceVersion"] = json!(self.resource_version.to_string());
        value
    }

    fn put(&mut self, kind: &str, namespace: &str, name: &str, value: Value) {
        let value = self.stamp(namespace, value);
        self.objects.insert(
            (kind.to_string(), namespace.to_string(), name.to_string()),
            value,
        );
    }

    /// Emulates the deployment controller for the given deployment config
    fn roll_out(&mut self, namespace: &str, dc: &mut Value, previous: Option<&Value>) {
        let version = previous
            .and_then(|prev| prev["status"]["latestVersion"].as_i64())
            .unwrap_or(1);
        let replicas = dc["spec"]["replicas"].as_i64().unwrap_or(0) as i32;
        dc["status"] = json!({
            "latestVersion": version,
            "replicas": replicas,
            "availableReplicas": replicas,
        });

        let dc_name = dc["metadata"]["name"].as_str().unwrap_or_default().to_string();
        let rc_name = format!("{dc_name}-{version}");
        let labels = labels_of(dc);
        let rc = ReplicationController {
            metadata: ObjectMeta {
                name: Some(rc_name.clone()),
                labels: Some(labels.clone()),
                ..ObjectMeta::default()
            },
            spec: Some(ReplicationControllerSpec {
                replicas: Some(replicas),
                ..ReplicationControllerSpec::default()
            }),
            status: None,
        };
        self.put(
            &kind_of::<ReplicationController>(),
            namespace,
            &rc_name,
            serde_json::to_value(&rc).unwrap(),
        );

        let pod_kind = kind_of::<Pod>();
        self.objects.retain(|(kind, ns, _), value| {
            !(*kind == pod_kind
                && ns == namespace
                && labels_of(value).get(LABEL_DEPLOYMENT) == Some(&rc_name))
        });
        let mut pod_labels: BTreeMap<String, String> = serde_json::from_value(
            dc["spec"]["template"]["metadata"]["labels"].clone(),
        )
        .unwrap_or_default();
        pod_labels.insert(LABEL_DEPLOYMENT.to_string(), rc_name.clone());
        for i in 0..replicas {
            let pod_name = format!("{rc_name}-pod{i}");
            let pod = Pod {
                metadata: ObjectMeta {
                    name: Some(pod_name.clone()),
                    labels: Some(pod_labels.clone()),
                    ..ObjectMeta::default()
                },
                spec: None,
                status: Some(PodStatus {
                    phase: Some("Running".to_string()),
                    pod_ip: Some(format!("10.128.0.{}", i + 2)),
                    ..PodStatus::default()
                }),
            };
            self.put(&pod_kind, namespace, &pod_name, serde_json::to_value(&pod).unwrap());
        }
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn create<K: PlatformObject>(&self, namespace: &str, obj: &K) -> kube::Result<K> {
        let kind = kind_of::<K>();
        let name = obj.meta().name.clone().unwrap_or_default();
        let mut state = self.state.lock().unwrap();
        state.record(Verb::Create, &kind, &name)?;
        let key = (kind.clone(), namespace.to_string(), name.clone());
        if state.objects.contains_key(&key) {
            return Err(api_error(
                409,
                "AlreadyExists",
                &format!("{kind} \"{name}\" already exists"),
            ));
        }
        let mut value = serde_json::to_value(obj).unwrap();
        if kind == kind_of::<DeploymentConfig>() {
            state.roll_out(namespace, &mut value, None);
        }
        state.put(&kind, namespace, &name, value);
        Ok(serde_json::from_value(state.objects[&key].clone()).unwrap())
    }

    async fn get<K: PlatformObject>(&self, namespace: &str, name: &str) -> kube::Result<Option<K>> {
        let kind = kind_of::<K>();
        let mut state = self.state.lock().unwrap();
        state.record(Verb::Get, &kind, name)?;
        Ok(state
            .objects
            .get(&(kind, namespace.to_string(), name.to_string()))
            .map(|value| serde_json::from_value(value.clone()).unwrap()))
    }

    async fn list<K: PlatformObject>(
        &self,
        namespace: &str,
        selector: &Selector,
    ) -> kube::Result<Vec<K>> {
        let kind = kind_of::<K>();
        let mut state = self.state.lock().unwrap();
        state.record(Verb::List, &kind, "")?;
        Ok(state
            .objects
            .iter()
            .filter(|((k, ns, _), value)| {
                *k == kind && ns == namespace && selector.matches(&labels_of(value))
            })
            .map(|(_, value)| serde_json::from_value(value.clone()).unwrap())
            .collect())
    }

    async fn replace<K: PlatformObject>(&self, namespace: &str, obj: &K) -> kube::Result<K> {
        let kind = kind_of::<K>();
        let name = obj.meta().name.clone().unwrap_or_default();
        let mut state = self.state.lock().unwrap();
        state.record(Verb::Replace, &kind, &name)?;
        let key = (kind.clone(), namespace.to_string(), name.clone());
        let previous = match state.objects.get(&key) {
            Some(previous) => previous.clone(),
            None => {
                return Err(api_error(
                    404,
                    "NotFound",
                    &format!("{kind} \"{name}\" not found"),
                ))
            }
        };
        let stale = obj
            .meta()
            .resource_version
            .as_deref()
            .map_or(false, |rv| Some(rv) != previous["metadata"]["resourceVersion"].as_str());
        if stale {
            return Err(api_error(
                409,
                "Conflict",
                "the object has been modified; please apply your changes to the latest version",
            ));
        }
        let mut value = serde_json::to_value(obj).unwrap();
        if kind == kind_of::<DeploymentConfig>() {
            state.roll_out(namespace, &mut value, Some(&previous));
        }
        state.put(&kind, namespace, &name, value);
        Ok(serde_json::from_value(state.objects[&key].clone()).unwrap())
    }

    async fn delete<K: PlatformObject>(&self, namespace: &str, name: &str) -> kube::Result<()> {
        let kind = kind_of::<K>();
        let mut state = self.state.lock().unwrap();
        state.record(Verb::Delete, &kind, name)?;
        match state
            .objects
            .remove(&(kind.clone(), namespace.to_string(), name.to_string()))
        {
            Some(_) => Ok(()),
            None => Err(api_error(
                404,
                "NotFound",
                &format!("{kind} \"{name}\" not found"),
            )),
        }
    }

    async fn patch_status<K: PlatformObject, S: Serialize + Send + Sync>(
        &self,
        namespace: &str,
        name: &str,
        status: &S,
    ) -> kube::Result<()> {
        let kind = kind_of::<K>();
        let mut state = self.state.lock().unwrap();
        state.record(Verb::PatchStatus, &kind, name)?;
        let key = (kind.clone(), namespace.to_string(), name.to_string());
        let mut value = match state.objects.get(&key) {
            Some(value) => value.clone(),
            None => {
                return Err(api_error(
                    404,
                    "NotFound",
                    &format!("{kind} \"{name}\" not found"),
                ))
            }
        };
        value["status"] = serde_json::to_value(status).unwrap();
        state.put(&kind, namespace, name, value);
        Ok(())
    }
}
