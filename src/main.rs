use checksheet_approval::config::Config;
use checksheet_approval::engine::WorkflowEngine;
use checksheet_approval::http;
use checksheet_approval::store::SledStore;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store = Arc::new(SledStore::open(&config.db_path)?);
    let engine = Arc::new(WorkflowEngine::new(store.clone()));
    let app = http::router(engine);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(
        addr = %config.bind_addr,
        db = %config.db_path.display(),
        "checksheet approval service listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    store.flush()?;
    info!("shut down");
    Ok(())
}
