//! Kubernetes client construction

use std::path::Path;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::warn;

use crate::Error;

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Options for building a kube client
#[derive(Debug, Clone, Default)]
pub struct ClientOptions<'a> {
    /// Kubeconfig path; the config is inferred (in-cluster or default kubeconfig) when unset
    pub kubeconfig: Option<&'a Path>,
    /// Skip verification of the API server certificate
    pub insecure_skip_tls_verify: bool,
}

/// Create a kube client with default timeouts
pub async fn create_client(options: ClientOptions<'_>) -> Result<Client, Error> {
    create_client_with_timeout(options, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

/// Create a kube client with custom timeouts
pub async fn create_client_with_timeout(
    options: ClientOptions<'_>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let mut config = load_config(options.kubeconfig).await?;
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);

    if options.insecure_skip_tls_verify {
        warn!("TLS verification disabled for kube-apiserver - not recommended for production");
        config.accept_invalid_certs = true;
        config.root_cert = None;
    }

    Client::try_from(config).map_err(|e| {
        Error::internal("create_client", format!("failed to create client: {}", e))
    })
}

async fn load_config(kubeconfig: Option<&Path>) -> Result<Config, Error> {
    match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal(
                    "create_client",
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal("create_client", format!("failed to load kubeconfig: {}", e))
                })
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal("create_client", format!("failed to infer config: {}", e))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_kubeconfig_file_is_reported() {
        let path = Path::new("/nonexistent/node-cleanup/kubeconfig");
        let result = create_client(ClientOptions {
            kubeconfig: Some(path),
            insecure_skip_tls_verify: false,
        })
        .await;
        let Err(err) = result else {
            panic!("a missing kubeconfig must not produce a client");
        };

        let msg = err.to_string();
        assert!(msg.contains("create_client"));
        assert!(msg.contains("/nonexistent/node-cleanup/kubeconfig"));
    }

    #[test]
    fn default_options_infer_config() {
        let options = ClientOptions::default();
        assert!(options.kubeconfig.is_none());
        assert!(!options.insecure_skip_tls_verify);
    }
}
