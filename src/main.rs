//! # sempex-operator
//!
//! Entry point for the Cluster certificate operator.
//!
//! ## Startup
//!
//! 1. **Settings** - Parse flags and `SEMPEX_*` environment variables
//! 2. **Tracing** - Install the subscriber (`RUST_LOG`, text or JSON)
//! 3. **Client** - Connect to the API server from kubeconfig or in-cluster config
//! 4. **Controller** - Watch Clusters and reconcile them until shutdown
//!
//! ## Shutdown
//!
//! SIGTERM or Ctrl+C cancels a root token. The controller stops taking new
//! work and in-flight passes are abandoned before they write.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use kube::Client;
use sempex_reconciler::{KubeResourceStore, ReconcilerBuilder, controller};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands, LogFormat};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.settings.log_format);

    info!(version = env!("CARGO_PKG_VERSION"), "sempex-operator starting");

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            wait_for_shutdown().await;
            cancel.cancel();
        }
    });

    let source = cli
        .settings
        .certificate_source()
        .context("Invalid certificate source settings")?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client. Please check your kubeconfig or in-cluster service account")?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let settings = cli
                .settings
                .controller_settings()
                .context("Invalid controller settings")?;
            controller::run(client, settings, source, cancel)
                .await
                .context("Cluster controller failed")?;
        }
        Commands::ReconcileOnce { key } => {
            let reconciler = ReconcilerBuilder::new()
                .with_store(Arc::new(KubeResourceStore::new(client)))
                .with_source(source)
                .with_config(cli.settings.reconciler_config()?)
                .with_span(info_span!("cluster_controller"))
                .build()?;
            let outcome = reconciler
                .reconcile(&key, &cancel)
                .await
                .with_context(|| format!("Reconciliation of '{key}' failed"))?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
    }

    info!("sempex-operator stopped");
    Ok(())
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

/// Wait for SIGTERM or Ctrl+C.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!("Failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        res = tokio::signal::ctrl_c() => match res {
            Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
            Err(err) => error!("Failed to listen for shutdown signal: {}", err),
        },
        () = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}
