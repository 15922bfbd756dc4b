//! Node cleanup controller - holds Node deletions until cleanup actions succeed

use std::sync::Arc;

use clap::Parser;
use k8s_openapi::api::core::v1::Node;
use kube::runtime::{reflector, watcher, WatchStreamExt};
use kube::Api;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use node_cleanup_common::events::KubeEventPublisher;
use node_cleanup_common::kube_utils::{create_client, ClientOptions};
use node_cleanup_common::telemetry::init_logging;
use node_cleanup_common::{CONTROLLER_NAME, WATCH_TIMEOUT_SECS};
use node_cleanup_operator::{build_registry, Cli};
use node_cleanup_watcher::{CleanupWatcher, KubeNodeStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format)?;

    // kube and reqwest share one process-wide rustls provider
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        warn!("A rustls crypto provider was already installed");
    }

    cli.validate()?;
    cli.log_summary();

    let registry = Arc::new(build_registry(&cli)?);

    let client = create_client(ClientOptions {
        kubeconfig: cli.kubeconfig.as_deref(),
        insecure_skip_tls_verify: cli.insecure_skip_tls_verify,
    })
    .await?;

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let (cache, writer) = reflector::store::<Node>();
    let nodes: Api<Node> = Api::all(client.clone());
    let events = watcher(nodes, watcher::Config::default().timeout(WATCH_TIMEOUT_SECS))
        .default_backoff()
        .reflect(writer);

    let store = Arc::new(KubeNodeStore::with_cache(client.clone(), cache));
    let publisher = Arc::new(KubeEventPublisher::new(client, CONTROLLER_NAME));
    let (cleanup, queue) = CleanupWatcher::new(
        store,
        registry,
        publisher,
        cli.watcher_settings(),
        cancel,
    );

    cleanup.run(events, queue).await?;
    info!("Node cleanup controller exited");
    Ok(())
}

/// Cancel the token on SIGINT or SIGTERM
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, stopping");
        cancel.cancel();
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
