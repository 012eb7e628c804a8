//! Kubernetes resource watchers.
//!
//! Watches Secrets, keeps the reflector cache up to date and feeds the
//! `namespace/name` key of every added or updated Secret into the work queue.
//! No conversion logic lives here.

use crate::error::ControllerError;
use crate::object_key::meta_namespace_key;
use crate::reconciler::shutdown_requested;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::Api;
use kube_runtime::reflector::store::Writer;
use kube_runtime::{watcher, WatchStreamExt};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use workqueue::WorkQueue;

/// Watches Secrets and enqueues their keys.
pub struct Watcher {
    api: Api<Secret>,
    writer: Writer<Secret>,
    queue: WorkQueue<String>,
    shutdown: watch::Receiver<bool>,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(
        api: Api<Secret>,
        writer: Writer<Secret>,
        queue: WorkQueue<String>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            api,
            writer,
            queue,
            shutdown,
        }
    }

    /// Starts watching Secrets until shutdown.
    pub async fn watch_secrets(self) -> Result<(), ControllerError> {
        info!("Starting Secret watcher");

        let Self {
            api,
            writer,
            queue,
            mut shutdown,
        } = self;

        let stream = watcher(api, watcher::Config::default())
            .default_backoff()
            .reflect(writer);
        let mut stream = std::pin::pin!(stream);

        loop {
            tokio::select! {
                () = shutdown_requested(&mut shutdown) => {
                    info!("Secret watcher stopping");
                    return Ok(());
                }
                next = stream.next() => match next {
                    Some(Ok(event)) => enqueue_event(&queue, event),
                    Some(Err(e)) => {
                        // default_backoff() retries the watch after this
                        warn!("Secret watch stream error: {}", e);
                    }
                    None => {
                        return Err(ControllerError::Watch(
                            "Secret watch stream ended".to_string(),
                        ));
                    }
                },
            }
        }
    }
}

/// Enqueues the key of an added or updated Secret.
pub fn enqueue_secret(queue: &WorkQueue<String>, secret: &Secret) {
    match meta_namespace_key(secret) {
        Some(key) => queue.add(key),
        None => warn!("Ignoring Secret without a name"),
    }
}

/// Routes one watch event to the work queue.
pub fn enqueue_event(queue: &WorkQueue<String>, event: watcher::Event<Secret>) {
    match event {
        watcher::Event::Apply(secret) | watcher::Event::InitApply(secret) => {
            enqueue_secret(queue, &secret);
        }
        watcher::Event::Delete(secret) => {
            debug!(
                "Secret deleted: {}",
                meta_namespace_key(&secret).unwrap_or_else(|| "<unknown>".to_string())
            );
        }
        watcher::Event::Init => {
            debug!("Secret watcher initialized");
        }
        watcher::Event::InitDone => {
            info!("Secret watcher initialization complete");
        }
    }
}
