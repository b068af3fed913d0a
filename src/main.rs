//! Carrier webhook - admission control for Carrier game-server workloads

use std::sync::Arc;

use anyhow::Context;
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use kube::Client;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use carrier_webhook::config::ServerOptions;
use carrier_webhook::rbac::{KubeAccessControl, Provisioner};
use carrier_webhook::validation::StructuralPodValidator;
use carrier_webhook::webhook::{webhook_router, Dispatcher, WebhookState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install crypto provider - aws-lc-rs backs both the kube client and the
    // HTTPS listener.
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let opts = ServerOptions::parse();
    init_tracing(opts.log_json);

    let sidecar = opts.sidecar_config()?;
    let tls = opts.tls()?;
    let addr = opts.listen_addr();

    let client = Client::try_default()
        .await
        .context("failed to create kubernetes client")?;

    let access = KubeAccessControl::start(client);
    access
        .wait_until_ready()
        .await
        .context("failed to sync service account and role binding caches")?;

    let provisioner = Provisioner::new(Arc::new(access));
    provisioner
        .ensure_cluster_role()
        .await
        .context("failed to create default cluster role")?;

    let dispatcher = Dispatcher::new(provisioner, Arc::new(StructuralPodValidator), sidecar);
    let app = webhook_router(Arc::new(WebhookState::new(dispatcher)));

    match tls {
        Some(paths) => {
            let tls_config = RustlsConfig::from_pem_file(&paths.cert, &paths.key)
                .await
                .context("failed to load TLS certificate and key")?;
            info!(addr = %addr, "Starting webhook server (https)");
            axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service())
                .await
                .context("webhook server error")?;
        }
        None => {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind {addr}"))?;
            info!(addr = %addr, "Starting webhook server (http)");
            axum::serve(listener, app)
                .await
                .context("webhook server error")?;
        }
    }
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
}
