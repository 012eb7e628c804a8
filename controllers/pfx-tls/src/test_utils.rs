//! Test utilities for unit testing the reconciler
//!
//! This module provides an in-memory `SecretStore`, a call-counting
//! converter and helpers for creating test Secrets.

use crate::error::StoreError;
use crate::store::SecretStore;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::ResourceExt;
use pfx_converter::{CertificateConverter, ConvertError, PemBundle, PfxConverter};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Helper to create a test Secret with annotations and data
pub fn create_test_secret(
    namespace: &str,
    name: &str,
    annotations: &[(&str, &str)],
    data: &[(&str, &[u8])],
) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            annotations: (!annotations.is_empty()).then(|| {
                annotations
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect()
            }),
            ..Default::default()
        },
        data: (!data.is_empty()).then(|| {
            data.iter()
                .map(|(k, v)| ((*k).to_string(), ByteString(v.to_vec())))
                .collect()
        }),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

type SecretKey = (String, String);

fn secret_key(secret: &Secret) -> SecretKey {
    (secret.namespace().unwrap_or_default(), secret.name_any())
}

/// In-memory Secret store with a separately controllable cache view.
///
/// `insert` writes to both the "server" and the cache. `touch_server` bumps
/// the server copy only, simulating a write that the cache has not seen yet.
#[derive(Default)]
pub struct MockSecretStore {
    cache: Mutex<BTreeMap<SecretKey, Secret>>,
    server: Mutex<BTreeMap<SecretKey, Secret>>,
    next_version: AtomicUsize,
    replace_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    fail_fetch: Mutex<Option<fn() -> StoreError>>,
    delay: Mutex<Option<Duration>>,
}

impl MockSecretStore {
    /// Create a store holding `secrets`.
    pub fn with_secrets(secrets: impl IntoIterator<Item = Secret>) -> Arc<Self> {
        let store = Self::default();
        for secret in secrets {
            store.insert(secret);
        }
        Arc::new(store)
    }

    fn bump_version(&self) -> String {
        (self.next_version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Add or overwrite a Secret, visible to both cache and server.
    pub fn insert(&self, mut secret: Secret) {
        secret.metadata.resource_version = Some(self.bump_version());
        let key = secret_key(&secret);
        self.server.lock().unwrap().insert(key.clone(), secret.clone());
        self.cache.lock().unwrap().insert(key, secret);
    }

    /// Change the server copy's resourceVersion without updating the cache.
    pub fn touch_server(&self, namespace: &str, name: &str) {
        let version = self.bump_version();
        if let Some(secret) = self
            .server
            .lock()
            .unwrap()
            .get_mut(&(namespace.to_string(), name.to_string()))
        {
            secret.metadata.resource_version = Some(version);
        }
    }

    /// Copy the server state into the cache, as a watch event would.
    pub fn sync_cache(&self) {
        let server = self.server.lock().unwrap().clone();
        *self.cache.lock().unwrap() = server;
    }

    /// Make every `fetch` fail with the given error.
    pub fn fail_fetch_with(&self, error: fn() -> StoreError) {
        *self.fail_fetch.lock().unwrap() = Some(error);
    }

    /// Make every `fetch` and `replace` sleep for `delay` before answering.
    pub fn delay_calls_by(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    async fn simulate_latency(&self) {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    /// Current server copy of a Secret.
    pub fn server_copy(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.server
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Number of successful and failed `replace` calls.
    pub fn replace_calls(&self) -> usize {
        self.replace_calls.load(Ordering::SeqCst)
    }

    /// Number of `fetch` calls.
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SecretStore for MockSecretStore {
    fn cached(&self, namespace: &str, name: &str) -> Result<Option<Arc<Secret>>, StoreError> {
        Ok(self
            .cache
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .map(Arc::new))
    }

    async fn fetch(&self, namespace: &str, name: &str) -> Result<Secret, StoreError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        if let Some(error) = *self.fail_fetch.lock().unwrap() {
            return Err(error());
        }
        self.server_copy(namespace, name)
            .ok_or_else(|| StoreError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    async fn replace(&self, secret: &Secret) -> Result<Secret, StoreError> {
        self.replace_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        let key = secret_key(secret);
        let mut server = self.server.lock().unwrap();
        let current = server.get(&key).ok_or_else(|| StoreError::NotFound {
            namespace: key.0.clone(),
            name: key.1.clone(),
        })?;
        if current.metadata.resource_version != secret.metadata.resource_version {
            return Err(StoreError::Conflict(format!(
                "the object has been modified; please apply your changes to the latest version (have {:?}, want {:?})",
                secret.metadata.resource_version, current.metadata.resource_version
            )));
        }
        let mut stored = secret.clone();
        stored.metadata.resource_version = Some(self.bump_version());
        server.insert(key, stored.clone());
        Ok(stored)
    }
}

/// Converter that counts calls and delegates to [`PfxConverter`].
#[derive(Default)]
pub struct CountingConverter {
    calls: AtomicUsize,
}

impl CountingConverter {
    /// Number of `convert` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CertificateConverter for CountingConverter {
    fn convert(&self, bundle: &[u8], password: &str) -> Result<PemBundle, ConvertError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        PfxConverter::new().convert(bundle, password)
    }
}

/// Converter that panics, standing in for a bug deep inside conversion.
#[derive(Default)]
pub struct PanickingConverter;

impl CertificateConverter for PanickingConverter {
    fn convert(&self, _bundle: &[u8], _password: &str) -> Result<PemBundle, ConvertError> {
        panic!("converter exploded");
    }
}
