//! Command line configuration.

use crate::error::ControllerError;
use crate::reconciler::ReconcilerConfig;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// PFX TLS Controller: converts opt-in PFX Secrets into `kubernetes.io/tls` Secrets.
#[derive(Debug, Clone, Parser)]
#[command(name = "pfx-tls-controller", version, about)]
pub struct Settings {
    /// Path to a kubeconfig. Only required if out-of-cluster.
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// The address of the Kubernetes API server. Overrides any value in kubeconfig.
    #[arg(long)]
    pub master: Option<String>,

    /// Number of concurrent reconcile workers.
    #[arg(long, env = "PFX_TLS_WORKERS", default_value_t = 2)]
    pub workers: usize,

    /// Only watch Secrets in this namespace (default: all namespaces).
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub namespace: Option<String>,

    /// Timeout in seconds for reading a password Secret.
    #[arg(long, default_value_t = 10)]
    pub lookup_timeout_secs: u64,

    /// Timeout in seconds for writing a converted Secret.
    #[arg(long, default_value_t = 30)]
    pub persist_timeout_secs: u64,
}

impl Settings {
    /// Validate the settings and derive the reconciler timeouts.
    pub fn reconciler_config(&self) -> Result<ReconcilerConfig, ControllerError> {
        if self.workers == 0 {
            return Err(ControllerError::InvalidConfig(
                "--workers must be at least 1".to_string(),
            ));
        }
        if self.lookup_timeout_secs == 0 || self.persist_timeout_secs == 0 {
            return Err(ControllerError::InvalidConfig(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(ReconcilerConfig {
            lookup_timeout: Duration::from_secs(self.lookup_timeout_secs),
            persist_timeout: Duration::from_secs(self.persist_timeout_secs),
        })
    }
}
