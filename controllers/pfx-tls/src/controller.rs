//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the Secret
//! watcher, the reflector cache, the work queue and the reconcile workers
//! together, and the connection setup that precedes it.

use crate::cli::Settings;
use crate::error::ControllerError;
use crate::reconciler::{shutdown_requested, Reconciler, ReconcilerConfig};
use crate::store::KubeSecretStore;
use crate::watcher::Watcher;
use k8s_openapi::api::core::v1::Secret;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use kube_runtime::reflector::{self, Store};
use pfx_converter::PfxConverter;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};
use workqueue::WorkQueue;

/// Builds a Kubernetes client from `--kubeconfig`/`--master`, or from the
/// in-cluster service account when no kubeconfig is given.
pub async fn build_client(settings: &Settings) -> Result<Client, ControllerError> {
    let mut config = match &settings.kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                ControllerError::KubeConfig(format!("error reading {}: {}", path.display(), e))
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    ControllerError::KubeConfig(format!("error building config from flags: {}", e))
                })?
        }
        None => Config::incluster().map_err(|e| {
            ControllerError::KubeConfig(format!("error building in-cluster config: {}", e))
        })?,
    };

    if let Some(master) = &settings.master {
        config.cluster_url = master.parse().map_err(|e| {
            ControllerError::InvalidConfig(format!("invalid --master URL '{}': {}", master, e))
        })?;
    }

    Ok(Client::try_from(config)?)
}

/// Main controller for PFX Secret conversion.
pub struct Controller {
    reconciler: Arc<Reconciler>,
    queue: WorkQueue<String>,
    cache: Store<Secret>,
    watcher: Watcher,
    workers: usize,
    shutdown: watch::Receiver<bool>,
}

impl Controller {
    /// Creates a new controller instance.
    pub fn new(
        client: Client,
        namespace: Option<&str>,
        workers: usize,
        converter: PfxConverter,
        config: ReconcilerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        info!("Setting up event handlers");

        let api: Api<Secret> = match namespace {
            Some(ns) => Api::namespaced(client.clone(), ns),
            None => Api::all(client.clone()),
        };
        let (cache, writer) = reflector::store();
        let queue = WorkQueue::new("Secrets");

        let store = KubeSecretStore::new(client, cache.clone());
        let reconciler = Reconciler::new(
            Arc::new(store),
            Arc::new(converter),
            queue.clone(),
            config,
            shutdown.clone(),
        );
        let watcher = Watcher::new(api, writer, queue.clone(), shutdown.clone());

        Self {
            reconciler: Arc::new(reconciler),
            queue,
            cache,
            watcher,
            workers,
            shutdown,
        }
    }

    /// Runs the controller until shutdown.
    ///
    /// Fails if the cache never syncs or the watcher dies.
    pub async fn run(self) -> Result<(), ControllerError> {
        let Self {
            reconciler,
            queue,
            cache,
            watcher,
            workers,
            mut shutdown,
        } = self;

        info!("Starting Secret controller");
        let mut watcher_task = tokio::spawn(watcher.watch_secrets());

        info!("Waiting for informer caches to sync");
        tokio::select! {
            ready = cache.wait_until_ready() => {
                ready.map_err(|e| ControllerError::CacheSync(e.to_string()))?;
            }
            result = &mut watcher_task => {
                queue.shut_down();
                return Err(ControllerError::CacheSync(watcher_exit_reason(result)));
            }
            () = shutdown_requested(&mut shutdown) => {
                queue.shut_down();
                return Ok(());
            }
        }

        info!("Starting workers");
        let worker_handles: Vec<JoinHandle<()>> = (0..workers)
            .map(|_| {
                let reconciler = Arc::clone(&reconciler);
                tokio::spawn(async move { while reconciler.process_next_work_item().await {} })
            })
            .collect();
        info!("Started workers");

        let outcome = tokio::select! {
            () = shutdown_requested(&mut shutdown) => Ok(()),
            result = &mut watcher_task => {
                let reason = watcher_exit_reason(result);
                error!("Secret watcher exited: {}", reason);
                Err(ControllerError::Watch(reason))
            }
        };

        info!("Shutting down workers");
        queue.shut_down();
        for handle in worker_handles {
            if let Err(e) = handle.await {
                error!("Worker panicked: {}", e);
            }
        }
        watcher_task.abort();

        outcome
    }
}

fn watcher_exit_reason(
    result: Result<Result<(), ControllerError>, tokio::task::JoinError>,
) -> String {
    match result {
        Ok(Ok(())) => "watcher stopped".to_string(),
        Ok(Err(e)) => e.to_string(),
        Err(e) => format!("watcher panicked: {}", e),
    }
}
