//! Process entry point: loads configuration, wires the ports and
//! adapters into an `AppState`, and serves the protocol and operator HTTP
//! surfaces side by side (§2, §10.3).

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

use tus_server::adapters::{FsStagingStore, OpendalObjectStore};
use tus_server::application::{FailureRegistry, FinalizationOrchestrator, MultipartAssembler, Reaper, SystemClock};
use tus_server::domain::UploadDescriptor;
use tus_server::ports::{ObjectStoreClient, StagingStore};
use tus_server::state::AppState;
use tus_server::{operator, protocol, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tus_server=info,warn")),
        )
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        port = config.port,
        tus_path = %config.tus_path,
        storage_dir = %config.storage_dir.display(),
        max_upload_size_bytes = config.max_upload_size_bytes,
        "starting tus-server"
    );

    let staging: Arc<dyn StagingStore> = Arc::new(
        FsStagingStore::new(config.storage_dir.clone(), config.max_upload_size_bytes).await?,
    );
    let object_store: Arc<dyn ObjectStoreClient> = Arc::new(OpendalObjectStore::new_s3(
        &config.minio_endpoint_url(),
        &config.minio_bucket,
        &config.minio_access_key,
        &config.minio_secret_key,
    )?);

    let assembler = Arc::new(MultipartAssembler::new());
    let registry = Arc::new(FailureRegistry::new(config.failed_upload_history_limit));
    let orchestrator = Arc::new(FinalizationOrchestrator::new(
        staging.clone(),
        object_store.clone(),
        assembler.clone(),
        registry.clone(),
    ));

    // §9/§10.5's redesign flag: the Protocol Endpoint hands a finalized
    // upload to the orchestrator over an explicit channel rather than a
    // callback into a transport library. A single task owns the receiving
    // end, so a given upload's finalization event is processed exactly
    // once even under concurrent PATCH handlers.
    let (finalize_tx, mut finalize_rx) = mpsc::channel::<UploadDescriptor>(256);

    let state = AppState {
        config: Arc::new(config.clone()),
        staging: staging.clone(),
        object_store,
        assembler: assembler.clone(),
        registry,
        orchestrator: orchestrator.clone(),
        finalize_tx,
    };

    tokio::spawn(async move {
        while let Some(descriptor) = finalize_rx.recv().await {
            let upload_id = descriptor.upload_id.clone();
            if let Err(e) = orchestrator.finalize(descriptor).await {
                tracing::error!(
                    upload_id = %upload_id,
                    error = %e,
                    "finalization failed, recorded in failure registry for operator retry"
                );
            }
        }
        tracing::info!("finalization worker exiting, channel closed");
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reaper = Arc::new(Reaper::new(
        assembler,
        staging,
        Arc::new(SystemClock),
        config.reaper_interval,
        config.reaper_stale_threshold,
    ));
    let reaper_handle = reaper.spawn(shutdown_rx);

    let app = axum::Router::new()
        .merge(protocol::router(state.clone()))
        .merge(operator::router(state.clone()))
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = reaper_handle.await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
