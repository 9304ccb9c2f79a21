//! Narrow, typed access to the objects a Spark cluster is made of.
//!
//! Everything the reconciler does goes through [`Platform`], so the reconciler can run against
//! the API server ([`KubePlatform`]) or against an in-memory fake in tests.

#[cfg(test)]
pub mod fake;

use crate::discovery::Selector;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use stackable_operator::kube::{
    self,
    api::{DeleteParams, ListParams, Patch, PatchParams, PostParams},
    core::ErrorResponse,
    Api, Resource,
};
use std::fmt::Debug;

/// Bounds shared by every object kind the platform client handles
pub trait PlatformObject:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<K> PlatformObject for K where
    K: Resource<DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

#[async_trait]
pub trait Platform: Send + Sync {
    async fn create<K: PlatformObject>(&self, namespace: &str, obj: &K) -> kube::Result<K>;

    /// Returns `None` instead of failing when the object does not exist
    async fn get<K: PlatformObject>(&self, namespace: &str, name: &str) -> kube::Result<Option<K>>;

    async fn list<K: PlatformObject>(
        &self,
        namespace: &str,
        selector: &Selector,
    ) -> kube::Result<Vec<K>>;

    /// Replaces the object, failing with a conflict if its resource version is stale
    async fn replace<K: PlatformObject>(&self, namespace: &str, obj: &K) -> kube::Result<K>;

    async fn delete<K: PlatformObject>(&self, namespace: &str, name: &str) -> kube::Result<()>;

    async fn patch_status<K: PlatformObject, S: Serialize + Send + Sync>(
        &self,
        namespace: &str,
        name: &str,
        status: &S,
    ) -> kube::Result<()>;
}

pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ErrorResponse { code: 404, .. }))
}

pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ErrorResponse { code: 409, reason, .. }) if reason == "AlreadyExists")
}

pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ErrorResponse { code: 409, reason, .. }) if reason == "Conflict")
}

#[cfg(test)]
pub fn api_error(code: u16, reason: &str, message: &str) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: message.to_string(),
        reason: reason.to_string(),
        code,
    })
}

/// [`Platform`] backed by the API server
#[derive(Clone)]
pub struct KubePlatform {
    client: kube::Client,
}

impl KubePlatform {
    pub fn new(client: kube::Client) -> Self {
        KubePlatform { client }
    }

    fn api<K: PlatformObject>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn object_name<K: PlatformObject>(obj: &K) -> &str {
    // Name is required, but K8s API will fail if this is not provided
    obj.meta().name.as_deref().unwrap_or("")
}

#[async_trait]
impl Platform for KubePlatform {
    async fn create<K: PlatformObject>(&self, namespace: &str, obj: &K) -> kube::Result<K> {
        self.api(namespace)
            .create(&PostParams::default(), obj)
            .await
    }

    async fn get<K: PlatformObject>(&self, namespace: &str, name: &str) -> kube::Result<Option<K>> {
        match self.api::<K>(namespace).get(name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn list<K: PlatformObject>(
        &self,
        namespace: &str,
        selector: &Selector,
    ) -> kube::Result<Vec<K>> {
        let params = ListParams::default().labels(&selector.to_string());
        Ok(self.api::<K>(namespace).list(&params).await?.items)
    }

    async fn replace<K: PlatformObject>(&self, namespace: &str, obj: &K) -> kube::Result<K> {
        self.api(namespace)
            .replace(object_name(obj), &PostParams::default(), obj)
            .await
    }

    async fn delete<K: PlatformObject>(&self, namespace: &str, name: &str) -> kube::Result<()> {
        self.api::<K>(namespace)
            .delete(name, &DeleteParams::background())
            .await?;
        Ok(())
    }

    async fn patch_status<K: PlatformObject, S: Serialize + Send + Sync>(
        &self,
        namespace: &str,
        name: &str,
        status: &S,
    ) -> kube::Result<()> {
        let patch = serde_json::json!({ "status": status });
        self.api::<K>(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}
