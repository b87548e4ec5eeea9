use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sensevoice_api::asr::default_loader;
use sensevoice_api::config::Config;
use sensevoice_api::handlers::AppState;
use sensevoice_api::service::AsrService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match Config::load_from_env() {
        Ok(config) => config,
        Err(err) => {
            init_tracing("INFO");
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };
    init_tracing(&config.server.log_level);

    info!(
        address = %config.server_address(),
        model_path = %config.model.model_path,
        max_concurrent = config.inference.max_concurrent,
        timeout_sec = config.inference.timeout_seconds,
        "configuration loaded"
    );

    let service = Arc::new(AsrService::new(&config, default_loader(&config)));

    // モデルのロードはバックグラウンドで行い、その間も /health は応答する
    let startup = {
        let service = service.clone();
        tokio::spawn(async move { service.startup().await })
    };

    let addr: SocketAddr = config
        .server_address()
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid server address: {e}"))?;

    let app = sensevoice_api::create_app(AppState::new(config, service.clone()));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("server error: {e}"))?;

    startup.abort();
    service.shutdown();
    info!("server stopped");
    Ok(())
}

/// `RUST_LOG` が設定されていればそれを優先し、無ければ設定の `log_level` を使う
fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_ascii_lowercase()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install tracing subscriber: {err}");
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
