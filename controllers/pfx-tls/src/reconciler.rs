//! Reconciliation logic for PFX Secrets.
//!
//! Each work queue key goes through:
//! 1. Decode the key into namespace and name (malformed keys are dropped)
//! 2. Look the Secret up in the cache (deleted Secrets are dropped)
//! 3. Check eligibility: `convert == "true"` and `converted != "true"`
//! 4. Read the bundle from `data[pfx-key]`
//! 5. Resolve the password (inline, referenced Secret, or empty)
//! 6. Convert the bundle to PEM
//! 7. Write `tls.crt`/`tls.key`/`ca.crt`, the TLS type and the `converted` marker
//!
//! Any failure in steps 2 and 4-7 is returned to [`Reconciler::process_next_work_item`],
//! which requeues the key with backoff.

use crate::annotations::{
    ConversionAnnotations, PasswordSource, ANNOTATION_CONVERTED, CA_CERT_KEY, SECRET_TYPE_TLS,
    TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY,
};
use crate::error::{report_error, ReconcileError, StoreError};
use crate::object_key::split_meta_namespace_key;
use crate::store::SecretStore;
use futures::FutureExt;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use pfx_converter::{CertificateConverter, PemBundle};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use workqueue::WorkQueue;

/// Timeouts applied to network calls made during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Limit for reading the password Secret
    pub lookup_timeout: Duration,
    /// Limit for writing the converted Secret
    pub persist_timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            lookup_timeout: Duration::from_secs(10),
            persist_timeout: Duration::from_secs(30),
        }
    }
}

/// Result of a reconciliation that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Secret was converted and written back
    Converted,
    /// Secret carries the `converted` marker
    AlreadyConverted,
    /// Secret did not opt in
    NotEligible,
    /// Secret was deleted before it was processed
    NotFound,
    /// Work queue key could not be decoded
    InvalidKey,
}

/// Resolves once shutdown has been requested; never resolves if the sender is gone.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Reconciles PFX Secrets pulled from the work queue.
pub struct Reconciler {
    store: Arc<dyn SecretStore>,
    converter: Arc<dyn CertificateConverter>,
    queue: WorkQueue<String>,
    config: ReconcilerConfig,
    shutdown: watch::Receiver<bool>,
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        store: Arc<dyn SecretStore>,
        converter: Arc<dyn CertificateConverter>,
        queue: WorkQueue<String>,
        config: ReconcilerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            converter,
            queue,
            config,
            shutdown,
        }
    }

    /// Processes one key from the work queue.
    ///
    /// Returns `false` once the queue has shut down.
    pub async fn process_next_work_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        // A panic must not kill the worker or leave the key marked as processing
        let result = match AssertUnwindSafe(self.sync_handler(&key))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => Err(ReconcileError::Panicked {
                key: key.clone(),
                message: panic_message(payload.as_ref()),
            }),
        };

        match result {
            Ok(outcome) => {
                self.queue.forget(&key);
                match outcome {
                    SyncOutcome::Converted => info!("Successfully synced '{}'", key),
                    other => debug!("Synced '{}': {:?}", key, other),
                }
            }
            Err(err) => {
                self.queue.add_rate_limited(key.clone());
                warn!(
                    kind = %err.kind(),
                    requeues = self.queue.num_requeues(&key),
                    "Error syncing '{}', requeuing",
                    key
                );
                report_error(&err);
            }
        }

        self.queue.done(&key);
        true
    }

    /// Reconciles the Secret identified by `key`.
    pub async fn sync_handler(&self, key: &str) -> Result<SyncOutcome, ReconcileError> {
        let (namespace, name) = match split_meta_namespace_key(key) {
            Ok(parts) => parts,
            Err(err) => {
                report_error(&err);
                return Ok(SyncOutcome::InvalidKey);
            }
        };

        let secret = match self.store.cached(&namespace, &name) {
            Ok(Some(secret)) => secret,
            Ok(None) | Err(StoreError::NotFound { .. }) => {
                info!("Secret '{}' in work queue no longer exists", key);
                return Ok(SyncOutcome::NotFound);
            }
            Err(source) => {
                return Err(ReconcileError::Lookup {
                    key: key.to_string(),
                    source,
                });
            }
        };

        let annotations = ConversionAnnotations::parse(secret.metadata.annotations.as_ref());
        for suspicious in &annotations.suspicious_keys {
            warn!(
                "Secret '{}' has unrecognized annotation '{}'; did you mean one of pfx-tls.kubernetes.io/*?",
                key, suspicious
            );
        }

        if !annotations.is_eligible() {
            if annotations.convert {
                debug!("Secret {}/{} already converted, skipping", namespace, name);
                return Ok(SyncOutcome::AlreadyConverted);
            }
            return Ok(SyncOutcome::NotEligible);
        }

        self.process_secret(key, &namespace, &secret, &annotations)
            .await?;
        Ok(SyncOutcome::Converted)
    }

    async fn process_secret(
        &self,
        key: &str,
        namespace: &str,
        secret: &Secret,
        annotations: &ConversionAnnotations,
    ) -> Result<(), ReconcileError> {
        info!("Processing secret {} for PFX to PEM conversion", key);

        let bundle = secret
            .data
            .as_ref()
            .and_then(|data| data.get(&annotations.pfx_key))
            .ok_or_else(|| ReconcileError::MissingBundleData {
                key: key.to_string(),
                data_key: annotations.pfx_key.clone(),
            })?;

        let password = self
            .resolve_password(key, namespace, &annotations.password)
            .await?;

        let pem = self
            .converter
            .convert(&bundle.0, &password)
            .map_err(|source| ReconcileError::Conversion {
                key: key.to_string(),
                source,
            })?;

        let updated = build_converted_secret(secret, pem);
        self.bounded(
            "secret update",
            self.config.persist_timeout,
            self.store.replace(&updated),
        )
        .await
        .map_err(|source| ReconcileError::Persist {
            key: key.to_string(),
            source,
        })?;

        info!("Successfully converted PFX to PEM for secret {}", key);
        Ok(())
    }

    /// Resolves the PFX password: inline annotation, then referenced Secret, then empty.
    async fn resolve_password(
        &self,
        key: &str,
        namespace: &str,
        source: &PasswordSource,
    ) -> Result<String, ReconcileError> {
        let (secret_name, data_key) = match source {
            PasswordSource::Inline(password) => return Ok(password.clone()),
            PasswordSource::Empty => return Ok(String::new()),
            PasswordSource::SecretRef { name, key } => (name, key),
        };

        let password_secret = self
            .bounded(
                "password secret lookup",
                self.config.lookup_timeout,
                self.store.fetch(namespace, secret_name),
            )
            .await
            .map_err(|source| ReconcileError::PasswordSecret {
                key: key.to_string(),
                secret: secret_name.clone(),
                source,
            })?;

        let bytes = password_secret
            .data
            .and_then(|mut data| data.remove(data_key))
            .ok_or_else(|| ReconcileError::MissingPasswordKey {
                key: key.to_string(),
                secret: secret_name.clone(),
                data_key: data_key.clone(),
            })?;

        String::from_utf8(bytes.0).map_err(|_| ReconcileError::InvalidPassword {
            key: key.to_string(),
            secret: secret_name.clone(),
            data_key: data_key.clone(),
        })
    }

    /// Runs a store call with a timeout, aborting early on shutdown.
    async fn bounded<T, F>(
        &self,
        operation: &'static str,
        limit: Duration,
        call: F,
    ) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            result = tokio::time::timeout(limit, call) => match result {
                Ok(inner) => inner,
                Err(_) => {
                    error!("{} timed out after {:?}", operation, limit);
                    Err(StoreError::Timeout { operation, after: limit })
                }
            },
            () = shutdown_requested(&mut shutdown) => Err(StoreError::Cancelled),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// Builds the converted copy of `original`; the original is left untouched.
///
/// The copy keeps the original `resourceVersion` so the write is rejected if
/// the Secret changed in the meantime.
pub fn build_converted_secret(original: &Secret, pem: PemBundle) -> Secret {
    let mut updated = original.clone();

    let data = updated.data.get_or_insert_with(Default::default);
    data.insert(TLS_CERT_KEY.to_string(), ByteString(pem.certificate));
    data.insert(TLS_PRIVATE_KEY_KEY.to_string(), ByteString(pem.private_key));
    if let Some(ca_chain) = pem.ca_chain.filter(|chain| !chain.is_empty()) {
        data.insert(CA_CERT_KEY.to_string(), ByteString(ca_chain));
    }

    updated.type_ = Some(SECRET_TYPE_TLS.to_string());
    updated
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(ANNOTATION_CONVERTED.to_string(), "true".to_string());

    updated
}
