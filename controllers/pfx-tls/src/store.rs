//! Object store access for Secrets.
//!
//! The reconciler talks to Kubernetes only through [`SecretStore`], which
//! lets unit tests swap in an in-memory implementation.

use crate::error::StoreError;
use k8s_openapi::api::core::v1::Secret;
use kube::api::PostParams;
use kube::{Api, Client, ResourceExt};
use kube_runtime::reflector::{ObjectRef, Store};
use std::sync::Arc;

/// Read and write access to Secrets.
#[async_trait::async_trait]
pub trait SecretStore: Send + Sync {
    /// Read a Secret from the local cache. `Ok(None)` means it does not exist.
    fn cached(&self, namespace: &str, name: &str) -> Result<Option<Arc<Secret>>, StoreError>;

    /// Read a Secret from the API server.
    async fn fetch(&self, namespace: &str, name: &str) -> Result<Secret, StoreError>;

    /// Replace a Secret, failing with [`StoreError::Conflict`] if its
    /// `resourceVersion` no longer matches the server's.
    async fn replace(&self, secret: &Secret) -> Result<Secret, StoreError>;
}

/// [`SecretStore`] backed by a reflector cache and the Kubernetes API.
#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
    cache: Store<Secret>,
}

impl KubeSecretStore {
    /// Creates a new store reading through `cache` and writing through `client`.
    pub fn new(client: Client, cache: Store<Secret>) -> Self {
        Self { client, cache }
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn classify(err: kube::Error, namespace: &str, name: &str) -> StoreError {
    match err {
        kube::Error::Api(ref status) if status.code == 404 => StoreError::NotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
        },
        kube::Error::Api(ref status) if status.code == 409 => {
            StoreError::Conflict(status.message.clone())
        }
        other => StoreError::Kube(other),
    }
}

#[async_trait::async_trait]
impl SecretStore for KubeSecretStore {
    fn cached(&self, namespace: &str, name: &str) -> Result<Option<Arc<Secret>>, StoreError> {
        Ok(self.cache.get(&ObjectRef::new(name).within(namespace)))
    }

    async fn fetch(&self, namespace: &str, name: &str) -> Result<Secret, StoreError> {
        self.api(namespace)
            .get(name)
            .await
            .map_err(|e| classify(e, namespace, name))
    }

    async fn replace(&self, secret: &Secret) -> Result<Secret, StoreError> {
        let namespace = secret.namespace().unwrap_or_default();
        let name = secret.name_any();
        self.api(&namespace)
            .replace(&name, &PostParams::default(), secret)
            .await
            .map_err(|e| classify(e, &namespace, &name))
    }
}
