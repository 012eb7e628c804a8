//! PFX TLS Controller
//!
//! Watches Secrets annotated with `pfx-tls.kubernetes.io/convert: "true"`,
//! decodes the password-protected PKCS#12 bundle they carry and writes the
//! certificate, private key and CA chain back as PEM (`tls.crt`, `tls.key`,
//! `ca.crt`), turning the Secret into a `kubernetes.io/tls` Secret.
//!
//! Each Secret is converted once; the `pfx-tls.kubernetes.io/converted`
//! annotation prevents any further processing.

mod annotations;
mod cli;
mod controller;
mod error;
mod object_key;
mod reconciler;
mod store;
mod watcher;
#[cfg(test)]
mod test_utils;

use crate::cli::Settings;
use crate::error::ControllerError;
use clap::Parser;
use controller::{build_client, Controller};
use pfx_converter::PfxConverter;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    let settings = Settings::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pfx_tls_controller=info,workqueue=info".into()),
        )
        .init();

    // Required for rustls 0.23+ before the kube client opens any connection
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider was already installed");
    }

    if let Err(e) = run(settings).await {
        error!("Fatal: {}", e);
        return Err(e);
    }
    Ok(())
}

async fn run(settings: Settings) -> Result<(), ControllerError> {
    info!("Starting PFX TLS Controller");

    let reconciler_config = settings.reconciler_config()?;
    info!("Configuration:");
    info!("  Workers: {}", settings.workers);
    info!("  Namespace: {}", settings.namespace.as_deref().unwrap_or("all namespaces"));
    info!(
        "  Timeouts: lookup {:?}, persist {:?}",
        reconciler_config.lookup_timeout, reconciler_config.persist_timeout
    );

    let client = build_client(&settings).await?;

    // Held for the life of the process; dropping it unloads the provider
    let converter = PfxConverter::with_legacy_algorithms().unwrap_or_else(|e| {
        warn!(
            "Failed to load OpenSSL legacy provider, RC2/3DES bundles will not decode: {}",
            e
        );
        PfxConverter::new()
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal, initiating graceful shutdown...");
        let _ = shutdown_tx.send(true);
    });

    let controller = Controller::new(
        client,
        settings.namespace.as_deref(),
        settings.workers,
        converter,
        reconciler_config,
        shutdown_rx,
    );
    controller.run().await?;

    info!("PFX TLS Controller stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
