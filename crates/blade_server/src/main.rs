use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use blade_server::{bootstrap, router, rpc, AppState, Config};
use blade_store::path::data_file_path;
use blade_store::Store;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SPEC_HOME_ENV: &str = "BLADE_SPEC_HOME";

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cfg = Config::parse();

    let db_path = data_file_path();
    let store = match Store::open(&db_path) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            tracing::error!("failed to open datastore {}: {}", db_path.display(), e);
            std::process::exit(1);
        }
    };
    let report = store.migration_report();
    if !report.is_noop() {
        tracing::info!(
            "migrated datastore from v{} to v{}",
            report.from_version,
            report.to_version
        );
    }

    if let Err(e) = run(cfg, store).await {
        tracing::error!("bladed failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cfg: Config, store: Arc<Store>) -> anyhow::Result<()> {
    let spec_dir = std::env::var_os(SPEC_HOME_ENV).map(PathBuf::from);
    let services = bootstrap(store, &cfg.sandbox_home, spec_dir.as_deref())
        .context("loading executor bundles")?;
    tracing::info!("{} executor keys registered", services.dispatcher.len());

    let mut state = AppState::new(services.experiments.clone(), services.preparations.clone())
        .with_auth_token(cfg.auth_token())
        .with_idempotency_ttl(cfg.idempotency_ttl());
    if let Some(path) = &cfg.openapi {
        let doc = std::fs::read_to_string(path)
            .with_context(|| format!("reading openapi document {}", path.display()))?;
        state = state.with_openapi(doc);
    }
    if state.auth_token.is_none() {
        tracing::warn!("no auth token configured, /api/v1 is open");
    }

    let rpc_addr = cfg.rpc_addr();
    let rpc_listener = tokio::net::TcpListener::bind(&rpc_addr)
        .await
        .with_context(|| format!("binding rpc listener {rpc_addr}"))?;
    tracing::info!("rpc listening on {}", rpc_addr);
    let rpc_task = tokio::spawn(rpc::serve(rpc_listener, services.experiments.clone()));

    let http_addr = cfg.http_addr();
    let listener = tokio::net::TcpListener::bind(&http_addr)
        .await
        .with_context(|| format!("binding http listener {http_addr}"))?;
    tracing::info!("bladed listening on {}", http_addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;

    rpc_task.abort();
    tracing::info!("bladed stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
