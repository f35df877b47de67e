/// Kubernetes API client construction
use anyhow::{Context, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Builds clients from kubeconfig files
pub struct KubernetesClient;

impl KubernetesClient {
    /// Create a client for the current context of the given kubeconfig
    pub async fn connect(kubeconfig_path: &Path) -> Result<Client> {
        debug!("Loading kubeconfig from {}", kubeconfig_path.display());

        let kubeconfig = Kubeconfig::read_from(kubeconfig_path).with_context(|| {
            format!("Failed to read kubeconfig {}", kubeconfig_path.display())
        })?;

        let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .context("Failed to load kubeconfig")?;
        config.connect_timeout = Some(CONNECT_TIMEOUT);
        // Watches hold the connection open, so no read timeout
        config.read_timeout = None;

        Client::try_from(config).context("Failed to create Kubernetes client")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_kubeconfig_fails() {
        let result = KubernetesClient::connect(Path::new("/nonexistent/kubeconfig")).await;
        let err = result.err().expect("missing kubeconfig should fail");
        assert!(err.to_string().contains("Failed to read kubeconfig"));
    }
}
