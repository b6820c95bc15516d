use dotenvy::dotenv;
use preview_gateway::config::PipelineConfig;
use preview_gateway::services::converter::Converter;
use preview_gateway::services::ephemeral::EphemeralStore;
use preview_gateway::services::pipeline::PipelineService;
use preview_gateway::services::scanner;
use preview_gateway::services::sink::UploadSink;
use preview_gateway::{AppState, create_app};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Initialize tracing with EnvFilter
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "preview_gateway=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting Preview Gateway...");

    let config = PipelineConfig::from_env();
    info!(
        "🛡️  Pipeline Config: Max Size={}MB, Virus Scan={}, Scanner={}, Convert Slots={}",
        config.max_file_size / 1024 / 1024,
        config.enable_virus_scan,
        config.virus_scanner_type,
        config.convert_concurrency
    );

    tokio::fs::create_dir_all(&config.spool_dir).await?;

    let scanner_service: Arc<dyn scanner::VirusScanner> = if config.enable_virus_scan {
        scanner::create_scanner(&config).into()
    } else {
        Arc::new(scanner::NoOpScanner)
    };
    if config.enable_virus_scan {
        if scanner_service.health_check().await {
            info!("🦠 Virus scanner connected successfully");
        } else {
            tracing::warn!(
                "⚠️  Virus scanner unreachable! Uploads will fail until it comes back."
            );
        }
    }

    let local_store = Arc::new(EphemeralStore::new(
        config.local_store_dir.clone(),
        Duration::from_secs(config.local_store_ttl_secs),
    )?);

    let pipeline = Arc::new(PipelineService::new(
        scanner_service.clone(),
        Converter::new(&config),
        UploadSink::new(local_store.clone()),
        &config,
    ));

    let state = AppState {
        pipeline,
        local_store: local_store.clone(),
        scanner: scanner_service,
        config: config.clone(),
    };

    // Setup Shutdown Channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // Start the local-store eviction worker
    tokio::spawn(async move {
        local_store.run_eviction(shutdown_rx).await;
    });

    let app = create_app(state).layer(
        TraceLayer::new_for_http()
            .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
                info!("📥 {} {}", request.method(), request.uri());
            })
            .on_response(
                |response: &axum::http::Response<_>,
                 latency: std::time::Duration,
                 _span: &tracing::Span| {
                    info!(
                        "📤 Finished in {:?} with status {}",
                        latency,
                        response.status()
                    );
                },
            ),
    );

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    info!("✅ Server ready at http://{}", addr);
    info!("📖 Swagger UI: http://{}/swagger-ui", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    info!("🛑 Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, starting graceful shutdown...");
        },
    }
}
